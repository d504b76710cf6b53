/// Sync driver tests
/// The fetch collaborators are replaced by in-memory fakes

extern crate accord_core;

use accord_core::petri_net::PetriNetEntry;
use accord_core::{
    AccordError, AgreementProtocolResponse, AgreementSource, Config, ConnectionState,
    Conversation, ConversationSync, Message, MessageKind, MessageSource, Result,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

const OWNED_NEED: &str = "need:me";
const CONN: &str = "conn:1";

fn at(uri: &str, secs: i64) -> Message {
    let mut msg = Message::new(uri, CONN);
    msg.date = Some(Utc.timestamp_opt(secs, 0).unwrap());
    msg
}

#[derive(Default)]
struct FakeMessages {
    /// Records served by `fetch_message`
    records: HashMap<String, Message>,
    /// URIs whose record cannot be parsed
    malformed: Vec<String>,
    /// Full history served by `fetch_messages`
    history: Vec<Message>,
    fail_batches: bool,
    batch_calls: RefCell<Vec<(usize, Option<DateTime<Utc>>)>>,
    message_calls: RefCell<Vec<String>>,
}

impl MessageSource for FakeMessages {
    async fn fetch_message(&self, owned_need_uri: &str, event_uri: &str) -> Result<Message> {
        assert_eq!(owned_need_uri, OWNED_NEED);
        self.message_calls.borrow_mut().push(event_uri.to_string());
        if self.malformed.iter().any(|u| u == event_uri) {
            return Message::from_value(json!({ "uri": event_uri }));
        }
        self.records
            .get(event_uri)
            .cloned()
            .ok_or_else(|| AccordError::NotFound(event_uri.to_string()))
    }

    async fn fetch_messages(
        &self,
        _connection_uri: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.batch_calls.borrow_mut().push((limit, before));
        if self.fail_batches {
            return Err(AccordError::Fetch("503 Service Unavailable".to_string()));
        }
        let mut older: Vec<Message> = self
            .history
            .iter()
            .filter(|m| match (before, m.date) {
                (Some(cursor), Some(date)) => date < cursor,
                (Some(_), None) => true,
                (None, _) => true,
            })
            .cloned()
            .collect();
        older.sort_by(|a, b| b.date.cmp(&a.date));
        older.truncate(limit);
        Ok(older)
    }
}

#[derive(Default)]
struct FakeAgreements {
    responses: RefCell<VecDeque<Result<AgreementProtocolResponse>>>,
    petri_net: RefCell<VecDeque<Result<Vec<PetriNetEntry>>>>,
}

impl FakeAgreements {
    fn respond(&self, response: Result<AgreementProtocolResponse>) {
        self.responses.borrow_mut().push_back(response);
    }
}

impl AgreementSource for FakeAgreements {
    async fn fetch_agreement_protocol_uris(&self, _connection_uri: &str) -> Result<AgreementProtocolResponse> {
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(AccordError::Fetch("no response queued".to_string())))
    }

    async fn fetch_petri_net_uris(&self, _connection_uri: &str) -> Result<Vec<PetriNetEntry>> {
        self.petri_net
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn response(value: serde_json::Value) -> AgreementProtocolResponse {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_refresh_fetches_missing_agreement_messages() {
    let mut messages = FakeMessages::default();
    messages.records.insert("m-new".to_string(), at("m-new", 5));
    messages.malformed.push("m-broken".to_string());

    // Our own copy of an event addressed to us: must be re-read remotely
    let mut echo = Message::new("m-echo", CONN);
    echo.outgoing = true;
    echo.receiver_need_uri = Some(OWNED_NEED.to_string());
    echo.remote_uri = Some("r-echo".to_string());
    messages.records.insert("m-echo".to_string(), echo);
    let mut remote_copy = at("r-echo", 6);
    remote_copy.remote_uri = Some("m-echo".to_string());
    messages.records.insert("r-echo".to_string(), remote_copy);

    let agreements = FakeAgreements::default();
    agreements.respond(Ok(response(json!({
        "agreementUris": ["m-known", "m-new"],
        "pendingProposals": [{ "uri": "p1", "proposes": ["m-echo"] }],
        "rejectedMessageUris": ["m-broken", "m-missing"]
    }))));

    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());
    let mut conv = Conversation::new(CONN, ConnectionState::Connected);
    conv.upsert_message(at("m-known", 1));

    let added = sync.refresh_agreement_data(&mut conv, false).await.unwrap();
    assert_eq!(added, 2);
    assert!(conv.contains_event("m-new"));
    assert!(conv.message("r-echo").is_some());
    assert!(conv.message("m-echo").is_none());
    assert!(!conv.contains_event("m-broken"));
    assert!(!conv.contains_event("m-missing"));

    // The already present message is not fetched again
    assert!(!messages.message_calls.borrow().contains(&"m-known".to_string()));

    assert_eq!(sync.reconcile(&mut conv), 3);
    assert!(conv.message("m-new").unwrap().message_status.is_accepted);
    assert!(conv.message("m-known").unwrap().message_status.is_accepted);
    // Proposed under our URI, stored under the remote party's
    assert!(conv.message("r-echo").unwrap().message_status.is_proposed);
}

#[tokio::test]
async fn test_failed_refresh_keeps_snapshot() {
    let messages = FakeMessages::default();
    let agreements = FakeAgreements::default();
    agreements.respond(Ok(response(json!({ "agreementUris": ["m1"] }))));
    agreements.respond(Err(AccordError::Fetch("connection reset".to_string())));

    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());
    let mut conv = Conversation::new(CONN, ConnectionState::Connected);
    conv.upsert_message(at("m1", 1));

    sync.refresh_agreement_data(&mut conv, false).await.unwrap();
    let snapshot = conv.snapshot().cloned();
    assert!(snapshot.is_some());

    let err = sync.refresh_agreement_data(&mut conv, true).await.unwrap_err();
    assert!(matches!(err, AccordError::Fetch(_)));
    assert_eq!(conv.snapshot().cloned(), snapshot);

    sync.reconcile(&mut conv);
    assert!(conv.message("m1").unwrap().message_status.is_accepted);
}

#[tokio::test]
async fn test_refresh_runs_once_per_connection() {
    let messages = FakeMessages::default();
    let agreements = FakeAgreements::default();
    agreements.respond(Ok(AgreementProtocolResponse::default()));

    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());
    let mut conv = Conversation::new(CONN, ConnectionState::Connected);

    sync.refresh_agreement_data(&mut conv, false).await.unwrap();
    // Nothing queued: a second fetch would fail
    assert_eq!(sync.refresh_agreement_data(&mut conv, false).await.unwrap(), 0);

    let mut pending = Conversation::new("conn:2", ConnectionState::RequestSent);
    assert_eq!(sync.refresh_agreement_data(&mut pending, false).await.unwrap(), 0);
    assert!(pending.snapshot().is_none());
}

#[tokio::test]
async fn test_load_latest_then_more() {
    let mut messages = FakeMessages::default();
    let mut connect = at("m00", 0);
    connect.kind = MessageKind::Connect;
    messages.history.push(connect);
    for i in 1..=20 {
        messages.history.push(at(&format!("m{:02}", i), i));
    }

    let agreements = FakeAgreements::default();
    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());
    let mut conv = Conversation::new(CONN, ConnectionState::Connected);

    assert_eq!(sync.load_latest_messages(&mut conv).await.unwrap(), 15);
    assert_eq!(conv.chat_messages()[0].uri, "m06");
    // Already loaded: no second initial fetch
    assert_eq!(sync.load_latest_messages(&mut conv).await.unwrap(), 0);

    assert_eq!(sync.load_more_messages(&mut conv).await.unwrap(), 5);
    assert_eq!(conv.chat_messages()[0].uri, "m01");
    assert!(!conv.all_messages_loaded());

    assert_eq!(sync.load_more_messages(&mut conv).await.unwrap(), 1);
    assert!(conv.all_messages_loaded());
    assert_eq!(sync.load_more_messages(&mut conv).await.unwrap(), 0);

    let calls = messages.batch_calls.borrow();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], (15, None));
    assert_eq!(calls[1], (5, Some(Utc.timestamp_opt(6, 0).unwrap())));
    assert_eq!(calls[2].0, 5);
}

#[tokio::test]
async fn test_sync_reports_first_error_but_reconciles() {
    let mut messages = FakeMessages {
        fail_batches: true,
        ..Default::default()
    };
    messages.records.insert("m1".to_string(), at("m1", 1));
    let agreements = FakeAgreements::default();
    agreements.respond(Ok(response(json!({ "claimedMessageUris": ["m1"] }))));
    agreements.petri_net.borrow_mut().push_back(Ok(serde_json::from_value(json!([
        { "processURI": "proc:1" }
    ]))
    .unwrap()));

    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());
    let mut conv = Conversation::new(CONN, ConnectionState::Connected);

    let err = sync.sync(&mut conv).await.unwrap_err();
    assert!(matches!(err, AccordError::Fetch(_)));

    assert!(conv.message("m1").unwrap().message_status.is_claimed);
    assert!(conv.petri_net().unwrap().contains_key("proc:1"));
    assert!(!conv.is_loading_messages());
}

#[tokio::test]
async fn test_echo_without_remote_uri_is_dropped() {
    let mut messages = FakeMessages::default();
    let mut echo = Message::new("m-echo", CONN);
    echo.outgoing = true;
    echo.receiver_need_uri = Some(OWNED_NEED.to_string());
    messages.records.insert("m-echo".to_string(), echo);

    let agreements = FakeAgreements::default();
    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());

    let err = sync.fetch_agreement_message("m-echo").await.unwrap_err();
    assert!(matches!(err, AccordError::MalformedRecord(_)));
}

#[tokio::test]
async fn test_echo_chain_stops_after_one_hop() {
    let mut messages = FakeMessages::default();
    for (uri, remote) in [("m-echo", "r-echo"), ("r-echo", "r-echo-2")] {
        let mut echo = Message::new(uri, CONN);
        echo.outgoing = true;
        echo.receiver_need_uri = Some(OWNED_NEED.to_string());
        echo.remote_uri = Some(remote.to_string());
        messages.records.insert(uri.to_string(), echo);
    }
    messages.records.insert("r-echo-2".to_string(), at("r-echo-2", 1));

    let agreements = FakeAgreements::default();
    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());

    let err = sync.fetch_agreement_message("m-echo").await.unwrap_err();
    assert!(matches!(err, AccordError::MalformedRecord(_)));
    assert_eq!(*messages.message_calls.borrow(), vec!["m-echo", "r-echo"]);
}

#[tokio::test]
async fn test_load_more_stops_without_progress() {
    let mut messages = FakeMessages::default();
    for uri in ["u1", "u2", "u3"] {
        messages.history.push(Message::new(uri, CONN));
    }

    let agreements = FakeAgreements::default();
    let sync = ConversationSync::new(&messages, &agreements, OWNED_NEED, &Config::default());
    let mut conv = Conversation::new(CONN, ConnectionState::Connected);

    assert_eq!(sync.load_latest_messages(&mut conv).await.unwrap(), 3);
    assert!(conv.oldest_date().is_none());

    // No cursor: the server hands back the same newest batch
    assert_eq!(sync.load_more_messages(&mut conv).await.unwrap(), 0);
    assert!(!conv.can_load_more());
    assert_eq!(sync.load_more_messages(&mut conv).await.unwrap(), 0);

    assert_eq!(messages.batch_calls.borrow().len(), 2);
}
