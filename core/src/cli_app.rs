use crate::bundle::ConversationBundle;
use crate::config::{Config, View};
use crate::conversation::Conversation;
use crate::message::{Message, MessageKind};
use colored::*;

/// Load the configured bundle, reconcile it and print the chosen view
pub fn run(config: &Config) -> anyhow::Result<()> {
    let path = config
        .bundle_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No bundle file given"))?;

    let bundle = ConversationBundle::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
    let loaded = bundle.into_conversation();
    let mut conversation = loaded.conversation;
    conversation.reconcile();

    let selected = select_view(&conversation, config.view);

    if config.json {
        println!("{}", serde_json::to_string_pretty(&selected)?);
        return Ok(());
    }

    print_header(&conversation, config.view, loaded.dropped);
    if selected.is_empty() {
        println!("  {}", "(nothing to show)".dimmed());
    }
    for msg in selected {
        print_message(msg);
    }
    Ok(())
}

pub fn select_view(conversation: &Conversation, view: View) -> Vec<&Message> {
    match view {
        View::Chat => conversation.chat_messages(),
        View::Agreements => conversation.agreement_messages(),
        View::Proposals => conversation.proposal_messages(),
        View::Cancellations => conversation.cancellation_pending_messages(),
        View::Unread => conversation.unread_messages(),
        View::Unreconciled => conversation.unreconciled_messages(),
    }
}

fn print_header(conversation: &Conversation, view: View, dropped: usize) {
    println!("{}", format!("⚡ {}", conversation.uri).bright_cyan().bold());
    println!(
        "  {} {:?}   {} {:?}   {} {}",
        "state:".bright_white(),
        conversation.state(),
        "view:".bright_white(),
        view,
        "messages:".bright_white(),
        conversation.len()
    );
    if !conversation.all_messages_loaded() {
        println!("  {}", "older messages not loaded".yellow());
    }
    if conversation.snapshot().is_none() {
        println!("  {}", "agreement data not loaded".yellow());
    }
    if dropped > 0 {
        println!("  {} {} malformed records dropped", "✗".red(), dropped);
    }
    println!();
}

fn print_message(msg: &Message) {
    let date = msg
        .date
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "----------------".to_string());

    let who = if msg.outgoing { "me  ".green() } else { "them".blue() };
    let text = msg.text.as_deref().unwrap_or("");
    let unread = if msg.unread { "●".yellow().to_string() } else { " ".to_string() };

    let mut line = format!("{} {} {} {}", unread, date.dimmed(), who, text);
    if msg.kind != MessageKind::Chat {
        line.push_str(&format!(" {}", format!("[{:?}]", msg.kind).magenta()));
    }

    let flags: Vec<String> = msg.message_status.flags().map(|f| f.to_string()).collect();
    if !flags.is_empty() {
        line.push_str(&format!(" {}", format!("({})", flags.join(", ")).cyan()));
    }
    println!("{}", line);
}
