/// All conversations of the owning party, keyed by connection URI
use crate::aggregator::StatusPatch;
use crate::conversation::{ConnectionState, Conversation};
use crate::error::{AccordError, Result};
use crate::message::Message;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the conversation when a request is opened or received. An
    /// existing conversation only has its state updated.
    pub fn open(&mut self, connection_uri: &str, state: ConnectionState) -> &mut Conversation {
        let conv = self
            .conversations
            .entry(connection_uri.to_string())
            .or_insert_with(|| {
                info!("Opening conversation {}", connection_uri);
                Conversation::new(connection_uri, state)
            });
        conv.set_state(state);
        conv
    }

    /// Drop the local state of a closed conversation
    pub fn close(&mut self, connection_uri: &str) -> Option<Conversation> {
        let removed = self.conversations.remove(connection_uri);
        if removed.is_some() {
            info!("Closed conversation {}", connection_uri);
        }
        removed
    }

    pub fn get(&self, connection_uri: &str) -> Option<&Conversation> {
        self.conversations.get(connection_uri)
    }

    pub fn get_mut(&mut self, connection_uri: &str) -> Result<&mut Conversation> {
        self.conversations
            .get_mut(connection_uri)
            .ok_or_else(|| AccordError::UnknownConversation(connection_uri.to_string()))
    }

    /// Route a fetched message to its conversation
    pub fn insert_message(&mut self, msg: Message) -> Result<bool> {
        let conv = self.get_mut(&msg.connection_uri)?;
        Ok(conv.upsert_message(msg))
    }

    pub fn apply_patch(&mut self, patch: &StatusPatch) -> Result<bool> {
        let conv = self.get_mut(&patch.connection_uri)?;
        Ok(conv.apply_status_patch(patch))
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Total number of unread chat messages across all conversations
    pub fn unread_count(&self) -> usize {
        self.conversations
            .values()
            .map(|conv| conv.unread_messages().len())
            .sum()
    }
}
