/// Conversation bundle: a JSON dump of one conversation for offline
/// inspection. Raw records are kept as fetched and parsed on load.
use crate::conversation::{ConnectionState, Conversation};
use crate::error::{AccordError, Result};
use crate::message::Message;
use crate::petri_net::{index_by_process, PetriNetEntry};
use crate::snapshot::AgreementProtocolResponse;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const BUNDLE_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationBundle {
    pub version: u8,
    pub connection_uri: String,
    pub owned_need_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_need_uri: Option<String>,
    pub state: ConnectionState,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_data: Option<AgreementProtocolResponse>,
    #[serde(default)]
    pub petri_net: Vec<PetriNetEntry>,
}

/// Outcome of turning a bundle into a conversation
#[derive(Debug)]
pub struct LoadedBundle {
    pub conversation: Conversation,
    /// Records that could not be read as messages
    pub dropped: usize,
}

impl ConversationBundle {
    pub fn new(connection_uri: impl Into<String>, owned_need_uri: impl Into<String>, state: ConnectionState) -> Self {
        Self {
            version: BUNDLE_VERSION,
            connection_uri: connection_uri.into(),
            owned_need_uri: owned_need_uri.into(),
            remote_need_uri: None,
            state,
            messages: Vec::new(),
            agreement_data: None,
            petri_net: Vec::new(),
        }
    }

    /// Export bundle to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(AccordError::Serialization)?;
        fs::write(path, json).map_err(AccordError::Io)?;
        Ok(())
    }

    /// Load bundle from file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(AccordError::Io)?;
        let bundle: ConversationBundle =
            serde_json::from_slice(&data).map_err(AccordError::Serialization)?;

        if bundle.version != BUNDLE_VERSION {
            return Err(AccordError::UnsupportedBundle(format!(
                "version {}",
                bundle.version
            )));
        }

        Ok(bundle)
    }

    /// Build the conversation the bundle describes. Malformed records are
    /// dropped and counted; the agreement snapshot is installed but no
    /// reconciliation is run.
    pub fn into_conversation(self) -> LoadedBundle {
        let mut conversation = Conversation::new(self.connection_uri.clone(), self.state);
        conversation.remote_need_uri = self.remote_need_uri;

        let mut dropped = 0;
        let mut parsed = Vec::with_capacity(self.messages.len());
        for raw in self.messages {
            match Message::from_value(raw) {
                Ok(msg) => parsed.push(msg),
                Err(e) => {
                    warn!("Dropping record from bundle: {}", e);
                    dropped += 1;
                }
            }
        }

        conversation.begin_messages_load();
        let added = conversation.finish_messages_load(parsed);

        if let Some(response) = self.agreement_data {
            conversation.apply_snapshot(response.into());
        }
        if !self.petri_net.is_empty() {
            conversation.apply_petri_net(index_by_process(self.petri_net));
        }

        info!(
            "Loaded conversation {} with {} messages ({} dropped)",
            self.connection_uri, added, dropped
        );

        LoadedBundle {
            conversation,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conv.json");

        let mut bundle = ConversationBundle::new("conn", "need:me", ConnectionState::Connected);
        bundle.messages.push(json!({ "uri": "m1", "connectionUri": "conn" }));
        bundle.save(&path).unwrap();

        let loaded = ConversationBundle::load(&path).unwrap();
        assert_eq!(loaded.connection_uri, "conn");
        assert_eq!(loaded.messages.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conv.json");

        let mut bundle = ConversationBundle::new("conn", "need:me", ConnectionState::Connected);
        bundle.version = 7;
        bundle.save(&path).unwrap();

        let err = ConversationBundle::load(&path).unwrap_err();
        assert!(matches!(err, AccordError::UnsupportedBundle(_)));
    }

    #[test]
    fn test_malformed_records_are_dropped() {
        let mut bundle = ConversationBundle::new("conn", "need:me", ConnectionState::Connected);
        bundle.messages = vec![
            json!({ "uri": "m1", "connectionUri": "conn" }),
            json!({ "text": "no uri" }),
            json!("not even an object"),
            json!({ "uri": "m2", "connectionUri": "conn" }),
        ];
        bundle.agreement_data = Some(AgreementProtocolResponse {
            agreement_uris: vec!["m1".to_string()],
            ..Default::default()
        });

        let loaded = bundle.into_conversation();
        assert_eq!(loaded.dropped, 2);
        assert_eq!(loaded.conversation.len(), 2);
        assert!(loaded.conversation.snapshot().is_some());
    }
}
