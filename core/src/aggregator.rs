/// Conversation state aggregation
///
/// Pure projections over the messages of one conversation and, once loaded,
/// its agreement snapshot. Nothing here mutates its input: status changes are
/// returned as `StatusPatch` values for the conversation owner to apply.
use crate::message::{Message, MessageKind, MessageStatus, StatusFlag};
use crate::snapshot::AgreementSnapshot;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Status update for one message, emitted by `reconcile_conversation`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    pub message_uri: String,
    pub connection_uri: String,
    pub message_status: MessageStatus,
}

/// Display order: by date, undated first, ties by URI
pub fn chat_order(a: &Message, b: &Message) -> Ordering {
    a.date.cmp(&b.date).then_with(|| a.uri.cmp(&b.uri))
}

/// Chat-visible messages in display order.
///
/// Forwarded messages are left out and a URI that occurs twice in the input
/// is only kept once (first occurrence wins).
pub fn order_chat_messages<'a, I>(messages: I) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut seen = HashSet::new();
    let mut chat: Vec<&Message> = messages
        .into_iter()
        .filter(|msg| msg.is_chat_visible())
        .filter(|msg| {
            let msg: &'a Message = *msg;
            seen.insert(msg.uri.as_str())
        })
        .collect();
    chat.sort_by(|a, b| chat_order(a, b));
    chat
}

/// Running status of `message` OR-merged with what the snapshot says about
/// it. Without a snapshot the status is returned unchanged.
pub fn reconcile_status(message: &Message, snapshot: Option<&AgreementSnapshot>) -> MessageStatus {
    let Some(snapshot) = snapshot else {
        return message.message_status;
    };

    // TODO: claimed and proposed sets are matched on both URIs like the
    // others; confirm against the protocol whether only the remote URI counts.
    let derived = MessageStatus::from_flags(
        StatusFlag::ALL
            .into_iter()
            .filter(|flag| snapshot.matches_message(flag.category(), message)),
    );

    message.message_status.merge(derived)
}

/// Chat-visible messages whose status has not been marked up to date
pub fn select_unreconciled_messages<'a, I>(messages: I) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    order_chat_messages(messages)
        .into_iter()
        .filter(|msg| !msg.status_up_to_date)
        .collect()
}

/// Every URI referenced by the snapshot, i.e. the messages that must be
/// present before their status can be shown.
pub fn collect_agreement_message_uris(snapshot: &AgreementSnapshot) -> BTreeSet<String> {
    snapshot.all_uris()
}

/// One patch per unreconciled message. Nothing is emitted until a snapshot
/// is available.
pub fn reconcile_conversation<'a, I>(
    messages: I,
    snapshot: Option<&AgreementSnapshot>,
) -> Vec<StatusPatch>
where
    I: IntoIterator<Item = &'a Message>,
{
    let Some(snapshot) = snapshot else {
        debug!("No agreement snapshot yet, skipping reconciliation");
        return Vec::new();
    };

    let pending = select_unreconciled_messages(messages);
    debug!("Reconciling status of {} messages", pending.len());

    pending
        .into_iter()
        .map(|msg| StatusPatch {
            message_uri: msg.uri.clone(),
            connection_uri: msg.connection_uri.clone(),
            message_status: reconcile_status(msg, Some(snapshot)),
        })
        .collect()
}

fn chat_messages_where<'a, I, F>(messages: I, pred: F) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
    F: Fn(&MessageStatus) -> bool,
{
    order_chat_messages(messages)
        .into_iter()
        .filter(|msg| pred(&msg.message_status))
        .collect()
}

/// Accepted agreements that are still in force
pub fn agreement_messages<'a, I>(messages: I) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    chat_messages_where(messages, |s| {
        s.is_accepted && !s.is_cancelled && !s.is_cancellation_pending
    })
}

/// Open proposals nobody has answered yet
pub fn proposal_messages<'a, I>(messages: I) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    chat_messages_where(messages, |s| {
        s.is_proposed && !s.is_accepted && !s.is_rejected && !s.is_retracted && !s.is_cancelled
    })
}

pub fn cancellation_pending_messages<'a, I>(messages: I) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    chat_messages_where(messages, |s| s.is_cancellation_pending && !s.is_cancelled)
}

pub fn unread_messages<'a, I>(messages: I) -> Vec<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    order_chat_messages(messages)
        .into_iter()
        .filter(|msg| msg.unread)
        .collect()
}

/// The connect message opens every conversation; once it is loaded there is
/// nothing older to fetch.
pub fn all_messages_loaded<'a, I>(messages: I) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    messages
        .into_iter()
        .any(|msg| msg.is_chat_visible() && msg.kind == MessageKind::Connect)
}

/// A record that is the owner's own copy of an event addressed to the
/// owner's need. It has to be looked up again under its remote URI.
pub fn is_own_echo(message: &Message, owned_need_uri: &str) -> bool {
    message.outgoing && message.receiver_need_uri.as_deref() == Some(owned_need_uri)
}
