/// Petri-net process data attached to a conversation
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetriNetEntry {
    #[serde(rename = "processURI", default, skip_serializing_if = "Option::is_none")]
    pub process_uri: Option<String>,

    /// Remaining fields are passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Petri-net data keyed by process URI
pub type PetriNetData = BTreeMap<String, PetriNetEntry>;

/// Index entries by process URI. Entries without one are dropped, a later
/// entry for the same process replaces an earlier one.
pub fn index_by_process(entries: Vec<PetriNetEntry>) -> PetriNetData {
    entries
        .into_iter()
        .filter_map(|entry| entry.process_uri.clone().map(|uri| (uri, entry)))
        .collect()
}
