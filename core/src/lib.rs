/// Accord - conversation and agreement state for the owner side of a
/// matching platform
///
/// Turns the unordered messages fetched for a conversation, plus the
/// agreement-protocol snapshot of that conversation, into a time-ordered chat
/// view annotated with negotiation status.

pub mod error;
pub mod config;
pub mod message;
pub mod snapshot;
pub mod petri_net;
pub mod aggregator;
pub mod conversation;
pub mod store;
pub mod sync;
pub mod bundle;
pub mod cli_app;

pub use error::{AccordError, Result};
pub use config::Config;
pub use message::{Message, MessageKind, MessageStatus, StatusFlag};
pub use snapshot::{AgreementCategory, AgreementProtocolResponse, AgreementSnapshot};
pub use aggregator::{
    collect_agreement_message_uris, order_chat_messages, reconcile_status,
    select_unreconciled_messages, StatusPatch,
};
pub use conversation::{ConnectionState, Conversation, LoadState};
pub use store::ConversationStore;
pub use sync::{AgreementSource, ConversationSync, MessageSource};
