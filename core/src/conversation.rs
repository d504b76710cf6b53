/// Store-side state of one conversation
///
/// `Conversation` is the single writer for its messages and agreement
/// snapshot. Fetch results and status patches are applied here; everything
/// read-only goes through the aggregator.
use crate::aggregator::{self, StatusPatch};
use crate::error::AccordError;
use crate::message::Message;
use crate::petri_net::PetriNetData;
use crate::snapshot::AgreementSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Connection state as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Suggested,
    RequestSent,
    RequestReceived,
    Connected,
    Closed,
}

/// Progress of one kind of fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    /// Connection URI
    pub uri: String,

    pub remote_need_uri: Option<String>,

    state: ConnectionState,

    /// Keyed by the owner-side message URI
    messages: BTreeMap<String, Message>,

    snapshot: Option<AgreementSnapshot>,

    petri_net: Option<PetriNetData>,

    messages_load: LoadState,
    /// Set once a "load more" batch brought nothing new
    history_exhausted: bool,
    agreement_load: LoadState,
    petri_net_load: LoadState,
}

impl Conversation {
    pub fn new(uri: impl Into<String>, state: ConnectionState) -> Self {
        Self {
            uri: uri.into(),
            remote_need_uri: None,
            state,
            messages: BTreeMap::new(),
            snapshot: None,
            petri_net: None,
            messages_load: LoadState::NotLoaded,
            history_exhausted: false,
            agreement_load: LoadState::NotLoaded,
            petri_net_load: LoadState::NotLoaded,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Update the connection state. Entering `Connected` schedules a fresh
    /// agreement and petri-net fetch; data loaded earlier is kept until the
    /// new one arrives.
    pub fn set_state(&mut self, state: ConnectionState) {
        if state == self.state {
            return;
        }
        info!("Conversation {} moved {:?} -> {:?}", self.uri, self.state, state);

        // A fetch already in flight covers the new state
        if state == ConnectionState::Connected {
            if self.agreement_load != LoadState::Loading {
                self.agreement_load = LoadState::NotLoaded;
            }
            if self.petri_net_load != LoadState::Loading {
                self.petri_net_load = LoadState::NotLoaded;
            }
        }
        self.state = state;
    }

    // ─── Messages ───────────────────────────────────────────────────────────

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn message(&self, uri: &str) -> Option<&Message> {
        self.messages.get(uri)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True if the event is known under `uri` on either side
    pub fn contains_event(&self, uri: &str) -> bool {
        self.messages.contains_key(uri) || self.messages.values().any(|m| m.is_known_as(uri))
    }

    /// Insert a message or merge it into the record of the same event.
    ///
    /// Returns true if a new event was added. A merge never lowers the
    /// accumulated status; the up-to-date marker survives only if the merge
    /// left both the status and the URIs of the record unchanged.
    pub fn upsert_message(&mut self, msg: Message) -> bool {
        if msg.connection_uri != self.uri {
            warn!(
                "Ignoring message {} for connection {} in conversation {}",
                msg.uri, msg.connection_uri, self.uri
            );
            return false;
        }

        let key = if self.messages.contains_key(&msg.uri) {
            Some(msg.uri.clone())
        } else {
            self.messages
                .values()
                .find(|m| m.same_event(&msg))
                .map(|m| m.uri.clone())
        };

        let Some(key) = key else {
            debug!("Adding message {} to {}", msg.uri, self.uri);
            self.messages.insert(msg.uri.clone(), msg);
            return true;
        };

        if let Some(existing) = self.messages.get_mut(&key) {
            let merged = existing.message_status.merge(msg.message_status);
            let prior_remote = existing.remote_uri.clone();

            if key == msg.uri {
                let remote_uri = msg.remote_uri.clone().or_else(|| existing.remote_uri.take());
                let up_to_date = existing.status_up_to_date
                    && merged == existing.message_status
                    && remote_uri == prior_remote;
                *existing = Message {
                    remote_uri,
                    message_status: merged,
                    status_up_to_date: up_to_date,
                    ..msg
                };
            } else {
                // Same event under the other party's URI: keep our record
                debug!("Merging {} into {}", msg.uri, key);
                if existing.remote_uri.is_none() {
                    existing.remote_uri = Some(msg.uri);
                }
                // A new alias may match snapshot entries the old record did not
                existing.status_up_to_date = existing.status_up_to_date
                    && merged == existing.message_status
                    && existing.remote_uri == prior_remote;
                existing.message_status = merged;
            }
        }
        false
    }

    /// Returns how many new events were added
    pub fn upsert_messages<I: IntoIterator<Item = Message>>(&mut self, messages: I) -> usize {
        messages
            .into_iter()
            .map(|msg| self.upsert_message(msg))
            .filter(|added| *added)
            .count()
    }

    /// Merge a patch into the running status and mark the message up to date.
    /// Patches for unknown messages are ignored.
    pub fn apply_status_patch(&mut self, patch: &StatusPatch) -> bool {
        match self.messages.get_mut(&patch.message_uri) {
            Some(msg) => {
                msg.message_status = msg.message_status.merge(patch.message_status);
                msg.status_up_to_date = true;
                true
            }
            None => {
                debug!("Status patch for unknown message {}", patch.message_uri);
                false
            }
        }
    }

    /// Reconcile every message that is not up to date against the current
    /// snapshot. Returns the number of patches applied.
    pub fn reconcile(&mut self) -> usize {
        let patches = aggregator::reconcile_conversation(self.messages.values(), self.snapshot.as_ref());
        patches
            .iter()
            .filter(|patch| self.apply_status_patch(patch))
            .count()
    }

    pub fn mark_all_read(&mut self) -> usize {
        let mut count = 0;
        for msg in self.messages.values_mut().filter(|m| m.unread) {
            msg.unread = false;
            count += 1;
        }
        count
    }

    /// Date of the oldest dated chat message, the cursor for "load more"
    pub fn oldest_date(&self) -> Option<DateTime<Utc>> {
        self.messages
            .values()
            .filter(|m| m.is_chat_visible())
            .filter_map(|m| m.date)
            .min()
    }

    pub fn begin_messages_load(&mut self) {
        self.messages_load = LoadState::Loading;
    }

    pub fn finish_messages_load(&mut self, batch: Vec<Message>) -> usize {
        let added = self.upsert_messages(batch);
        self.messages_load = LoadState::Loaded;
        debug!("Loaded {} new messages into {}", added, self.uri);
        added
    }

    pub fn fail_messages_load(&mut self, err: AccordError) -> AccordError {
        warn!("Loading messages for {} failed: {}", self.uri, err);
        self.messages_load = if self.messages.is_empty() {
            LoadState::NotLoaded
        } else {
            LoadState::Loaded
        };
        err
    }

    pub fn is_loading_messages(&self) -> bool {
        self.messages_load == LoadState::Loading
    }

    /// Stop paging. Called when a "load more" batch added no new event, e.g.
    /// when only undated messages are known and no cursor can be formed.
    pub fn mark_history_exhausted(&mut self) {
        debug!("No older messages for {}", self.uri);
        self.history_exhausted = true;
    }

    /// Older messages may still exist on the server
    pub fn can_load_more(&self) -> bool {
        !self.is_loading_messages() && !self.history_exhausted && !self.all_messages_loaded()
    }

    // ─── Agreement snapshot ─────────────────────────────────────────────────

    pub fn snapshot(&self) -> Option<&AgreementSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn agreement_load(&self) -> LoadState {
        self.agreement_load
    }

    pub fn begin_snapshot_load(&mut self) {
        self.agreement_load = LoadState::Loading;
    }

    /// Install a freshly fetched snapshot. On a refresh only messages that
    /// are referenced by URIs new to this snapshot need reconciling again.
    pub fn apply_snapshot(&mut self, snapshot: AgreementSnapshot) {
        if let Some(prior) = &self.snapshot {
            let introduced = snapshot.introduced_since(prior);
            let mut invalidated = 0;
            for msg in self.messages.values_mut() {
                let referenced = introduced.contains(&msg.uri)
                    || msg
                        .remote_uri
                        .as_ref()
                        .map(|r| introduced.contains(r))
                        .unwrap_or(false);
                if referenced && msg.status_up_to_date {
                    msg.status_up_to_date = false;
                    invalidated += 1;
                }
            }
            debug!(
                "Snapshot refresh for {} introduced {} uris, {} messages to reconcile",
                self.uri,
                introduced.len(),
                invalidated
            );
        }

        self.snapshot = Some(snapshot);
        self.agreement_load = LoadState::Loaded;
    }

    /// Record a failed snapshot fetch. A previously loaded snapshot stays in
    /// place; the error is handed back for the caller to surface.
    pub fn fail_snapshot_load(&mut self, err: AccordError) -> AccordError {
        warn!("Loading agreement data for {} failed: {}", self.uri, err);
        self.agreement_load = if self.snapshot.is_some() {
            LoadState::Loaded
        } else {
            LoadState::NotLoaded
        };
        err
    }

    // ─── Petri net ──────────────────────────────────────────────────────────

    pub fn petri_net(&self) -> Option<&PetriNetData> {
        self.petri_net.as_ref()
    }

    pub fn begin_petri_net_load(&mut self) {
        self.petri_net_load = LoadState::Loading;
    }

    pub fn apply_petri_net(&mut self, data: PetriNetData) {
        self.petri_net = Some(data);
        self.petri_net_load = LoadState::Loaded;
    }

    pub fn fail_petri_net_load(&mut self, err: AccordError) -> AccordError {
        warn!("Loading petri net data for {} failed: {}", self.uri, err);
        self.petri_net_load = if self.petri_net.is_some() {
            LoadState::Loaded
        } else {
            LoadState::NotLoaded
        };
        err
    }

    // ─── Gating ─────────────────────────────────────────────────────────────

    /// Initial batch needed: nothing loaded yet and no load in flight
    pub fn should_load_messages(&self) -> bool {
        self.state != ConnectionState::Closed
            && !self.is_loading_messages()
            && self.messages.is_empty()
    }

    pub fn should_load_agreement_data(&self, force: bool) -> bool {
        force || (self.is_connected() && self.agreement_load == LoadState::NotLoaded)
    }

    pub fn should_load_petri_net_data(&self, force: bool) -> bool {
        force || (self.is_connected() && self.petri_net_load == LoadState::NotLoaded)
    }

    pub fn should_reconcile(&self) -> bool {
        self.is_connected()
            && self.agreement_load == LoadState::Loaded
            && !self.is_loading_messages()
            && !self.unreconciled_messages().is_empty()
    }

    // ─── Views ──────────────────────────────────────────────────────────────

    pub fn chat_messages(&self) -> Vec<&Message> {
        aggregator::order_chat_messages(self.messages.values())
    }

    pub fn unreconciled_messages(&self) -> Vec<&Message> {
        aggregator::select_unreconciled_messages(self.messages.values())
    }

    pub fn agreement_messages(&self) -> Vec<&Message> {
        aggregator::agreement_messages(self.messages.values())
    }

    pub fn proposal_messages(&self) -> Vec<&Message> {
        aggregator::proposal_messages(self.messages.values())
    }

    pub fn cancellation_pending_messages(&self) -> Vec<&Message> {
        aggregator::cancellation_pending_messages(self.messages.values())
    }

    pub fn unread_messages(&self) -> Vec<&Message> {
        aggregator::unread_messages(self.messages.values())
    }

    pub fn all_messages_loaded(&self) -> bool {
        aggregator::all_messages_loaded(self.messages.values())
    }
}
