/// Keeping a conversation in step with the server
///
/// The fetch collaborators are traits implemented by the embedding
/// application. Results are applied to the `Conversation` as they complete;
/// every step is safe to repeat and a failed fetch leaves the state it found.
use crate::aggregator::{collect_agreement_message_uris, is_own_echo};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::error::{AccordError, Result};
use crate::message::Message;
use crate::petri_net::{index_by_process, PetriNetEntry};
use crate::snapshot::{AgreementProtocolResponse, AgreementSnapshot};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

/// How often an own echo may point at yet another own echo
const MAX_ECHO_HOPS: usize = 1;

/// Source of individual message records
#[allow(async_fn_in_trait)]
pub trait MessageSource {
    /// Fetch one event as seen by `owned_need_uri`
    async fn fetch_message(&self, owned_need_uri: &str, event_uri: &str) -> Result<Message>;

    /// Fetch up to `limit` of the newest messages older than `before`
    async fn fetch_messages(
        &self,
        connection_uri: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>>;
}

/// Source of agreement-protocol and petri-net data
#[allow(async_fn_in_trait)]
pub trait AgreementSource {
    async fn fetch_agreement_protocol_uris(
        &self,
        connection_uri: &str,
    ) -> Result<AgreementProtocolResponse>;

    async fn fetch_petri_net_uris(&self, connection_uri: &str) -> Result<Vec<PetriNetEntry>>;
}

impl<T: MessageSource> MessageSource for &T {
    async fn fetch_message(&self, owned_need_uri: &str, event_uri: &str) -> Result<Message> {
        (**self).fetch_message(owned_need_uri, event_uri).await
    }

    async fn fetch_messages(
        &self,
        connection_uri: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        (**self).fetch_messages(connection_uri, limit, before).await
    }
}

impl<T: AgreementSource> AgreementSource for &T {
    async fn fetch_agreement_protocol_uris(
        &self,
        connection_uri: &str,
    ) -> Result<AgreementProtocolResponse> {
        (**self).fetch_agreement_protocol_uris(connection_uri).await
    }

    async fn fetch_petri_net_uris(&self, connection_uri: &str) -> Result<Vec<PetriNetEntry>> {
        (**self).fetch_petri_net_uris(connection_uri).await
    }
}

pub struct ConversationSync<M, A> {
    message_source: M,
    agreement_source: A,
    owned_need_uri: String,
    initial_message_count: usize,
    more_message_count: usize,
}

impl<M: MessageSource, A: AgreementSource> ConversationSync<M, A> {
    pub fn new(message_source: M, agreement_source: A, owned_need_uri: impl Into<String>, config: &Config) -> Self {
        Self {
            message_source,
            agreement_source,
            owned_need_uri: owned_need_uri.into(),
            initial_message_count: config.initial_message_count,
            more_message_count: config.more_message_count,
        }
    }

    pub fn owned_need_uri(&self) -> &str {
        &self.owned_need_uri
    }

    /// Fetch the initial batch if the conversation has none yet
    pub async fn load_latest_messages(&self, conv: &mut Conversation) -> Result<usize> {
        if !conv.should_load_messages() {
            return Ok(0);
        }
        conv.begin_messages_load();
        match self
            .message_source
            .fetch_messages(&conv.uri, self.initial_message_count, None)
            .await
        {
            Ok(batch) => Ok(conv.finish_messages_load(batch)),
            Err(e) => Err(conv.fail_messages_load(e)),
        }
    }

    /// Fetch the next batch of older messages. Paging stops for good once a
    /// batch adds nothing new.
    pub async fn load_more_messages(&self, conv: &mut Conversation) -> Result<usize> {
        if !conv.can_load_more() {
            return Ok(0);
        }
        let before = conv.oldest_date();
        conv.begin_messages_load();
        match self
            .message_source
            .fetch_messages(&conv.uri, self.more_message_count, before)
            .await
        {
            Ok(batch) => {
                let added = conv.finish_messages_load(batch);
                if added == 0 {
                    conv.mark_history_exhausted();
                }
                Ok(added)
            }
            Err(e) => Err(conv.fail_messages_load(e)),
        }
    }

    /// Fetch an agreement-related event. Own echoes are looked up again
    /// under their remote URI so the event is stored once.
    pub async fn fetch_agreement_message(&self, event_uri: &str) -> Result<Message> {
        let mut current = event_uri.to_string();
        for _ in 0..=MAX_ECHO_HOPS {
            let msg = self
                .message_source
                .fetch_message(&self.owned_need_uri, &current)
                .await?;
            if !is_own_echo(&msg, &self.owned_need_uri) {
                return Ok(msg);
            }
            match msg.remote_uri {
                Some(remote) if remote != current => {
                    debug!("{} is our own echo, resolving {}", current, remote);
                    current = remote;
                }
                _ => {
                    return Err(AccordError::MalformedRecord(format!(
                        "own echo {} has no usable remote uri",
                        current
                    )))
                }
            }
        }
        Err(AccordError::MalformedRecord(format!(
            "{} did not resolve after {} hops",
            event_uri, MAX_ECHO_HOPS
        )))
    }

    /// Fetch the agreement snapshot and every message it references that is
    /// not present yet. Returns the number of messages added.
    ///
    /// If the snapshot fetch fails the previous snapshot stays in place and
    /// the error is returned. Individual messages that cannot be fetched are
    /// skipped.
    pub async fn refresh_agreement_data(&self, conv: &mut Conversation, force: bool) -> Result<usize> {
        if !conv.should_load_agreement_data(force) {
            return Ok(0);
        }

        conv.begin_snapshot_load();
        let snapshot: AgreementSnapshot = match self
            .agreement_source
            .fetch_agreement_protocol_uris(&conv.uri)
            .await
        {
            Ok(response) => response.into(),
            Err(e) => return Err(conv.fail_snapshot_load(e)),
        };

        let referenced = collect_agreement_message_uris(&snapshot);
        conv.apply_snapshot(snapshot);

        let missing: Vec<String> = referenced
            .into_iter()
            .filter(|uri| !conv.contains_event(uri))
            .collect();
        debug!("Fetching {} agreement messages for {}", missing.len(), conv.uri);

        let results = join_all(missing.iter().map(|uri| self.fetch_agreement_message(uri))).await;

        let mut added = 0;
        for (uri, result) in missing.iter().zip(results) {
            match result {
                Ok(msg) => {
                    if conv.upsert_message(msg) {
                        added += 1;
                    }
                }
                Err(e) if e.is_record_local() => {
                    warn!("Skipping agreement message {}: {}", uri, e);
                }
                Err(e) => {
                    warn!("Fetching agreement message {} failed: {}", uri, e);
                }
            }
        }

        info!("Agreement data for {} loaded, {} messages added", conv.uri, added);
        Ok(added)
    }

    pub async fn refresh_petri_net_data(&self, conv: &mut Conversation, force: bool) -> Result<usize> {
        if !conv.should_load_petri_net_data(force) {
            return Ok(0);
        }

        conv.begin_petri_net_load();
        match self.agreement_source.fetch_petri_net_uris(&conv.uri).await {
            Ok(entries) => {
                let data = index_by_process(entries);
                let count = data.len();
                conv.apply_petri_net(data);
                Ok(count)
            }
            Err(e) => Err(conv.fail_petri_net_load(e)),
        }
    }

    /// Apply status patches if everything they depend on is loaded
    pub fn reconcile(&self, conv: &mut Conversation) -> usize {
        if !conv.should_reconcile() {
            return 0;
        }
        let applied = conv.reconcile();
        debug!("Updated status of {} messages in {}", applied, conv.uri);
        applied
    }

    /// Run every step that is due. Steps are independent: a failure is
    /// logged, the remaining steps still run and the first error is
    /// returned at the end.
    pub async fn sync(&self, conv: &mut Conversation) -> Result<()> {
        let messages = self.load_latest_messages(conv).await.err();
        let agreement = self.refresh_agreement_data(conv, false).await.err();
        let petri_net = self.refresh_petri_net_data(conv, false).await.err();
        self.reconcile(conv);

        match messages.or(agreement).or(petri_net) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
