/// Message records and their derived negotiation status
use crate::error::{AccordError, Result};
use crate::snapshot::AgreementCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of event a message represents within a conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Connection request sent or received (first message of a conversation)
    Connect,
    /// Accepting a connection request
    Open,
    Close,
    /// Plain chat text
    #[default]
    Chat,
    HintFeedback,
    /// Relays an event of another conversation
    Forward,
    Proposal,
    Accept,
    Reject,
    Retract,
    Claim,
    ProposeToCancel,
    #[serde(other)]
    Unknown,
}

/// One event in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// URI assigned by the owner side
    pub uri: String,

    /// URI of the same event as assigned by the remote party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,

    /// Conversation (connection) the event belongs to
    pub connection_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, rename = "messageType")]
    pub kind: MessageKind,

    /// Relays another conversation's content; never part of the chat view
    #[serde(default)]
    pub forward_message: bool,

    #[serde(default)]
    pub unread: bool,

    /// Sent by the owning party
    #[serde(default)]
    pub outgoing: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_need_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_need_uri: Option<String>,

    #[serde(default)]
    pub message_status: MessageStatus,

    /// Maintained by the conversation owner: status has been reconciled
    /// against the current agreement snapshot.
    #[serde(default, rename = "isMessageStatusUpToDate")]
    pub status_up_to_date: bool,
}

impl Message {
    /// Create a plain chat message with everything else unset
    pub fn new(uri: impl Into<String>, connection_uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            remote_uri: None,
            connection_uri: connection_uri.into(),
            date: None,
            text: None,
            kind: MessageKind::Chat,
            forward_message: false,
            unread: false,
            outgoing: false,
            sender_need_uri: None,
            receiver_need_uri: None,
            message_status: MessageStatus::default(),
            status_up_to_date: false,
        }
    }

    /// Parse a raw fetched record. Anything that does not fit the message
    /// shape is reported as `MalformedRecord` so the caller can drop it.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let msg: Message = serde_json::from_value(value)
            .map_err(|e| AccordError::MalformedRecord(e.to_string()))?;
        if msg.uri.trim().is_empty() {
            return Err(AccordError::MalformedRecord("message without uri".to_string()));
        }
        if msg.connection_uri.trim().is_empty() {
            return Err(AccordError::MalformedRecord(format!(
                "message {} without connection uri",
                msg.uri
            )));
        }
        Ok(msg)
    }

    /// True if `uri` names this event on either side
    pub fn is_known_as(&self, uri: &str) -> bool {
        self.uri == uri || self.remote_uri.as_deref() == Some(uri)
    }

    /// True if both records describe the same logical event
    pub fn same_event(&self, other: &Message) -> bool {
        self.is_known_as(&other.uri)
            || other
                .remote_uri
                .as_deref()
                .map(|r| self.is_known_as(r))
                .unwrap_or(false)
    }

    pub fn is_chat_visible(&self) -> bool {
        !self.forward_message
    }
}

/// One of the seven negotiation flags carried by `MessageStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusFlag {
    Proposed,
    Claimed,
    Accepted,
    Rejected,
    Retracted,
    Cancelled,
    CancellationPending,
}

impl StatusFlag {
    pub const ALL: [StatusFlag; 7] = [
        StatusFlag::Proposed,
        StatusFlag::Claimed,
        StatusFlag::Accepted,
        StatusFlag::Rejected,
        StatusFlag::Retracted,
        StatusFlag::Cancelled,
        StatusFlag::CancellationPending,
    ];

    /// Snapshot set a flag is derived from
    pub fn category(self) -> AgreementCategory {
        match self {
            StatusFlag::Proposed => AgreementCategory::ProposedMessages,
            StatusFlag::Claimed => AgreementCategory::ClaimedMessages,
            StatusFlag::Accepted => AgreementCategory::Agreements,
            StatusFlag::Rejected => AgreementCategory::RejectedMessages,
            StatusFlag::Retracted => AgreementCategory::RetractedMessages,
            StatusFlag::Cancelled => AgreementCategory::CancelledAgreements,
            StatusFlag::CancellationPending => AgreementCategory::CancellationPendingAgreements,
        }
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusFlag::Proposed => "proposed",
            StatusFlag::Claimed => "claimed",
            StatusFlag::Accepted => "accepted",
            StatusFlag::Rejected => "rejected",
            StatusFlag::Retracted => "retracted",
            StatusFlag::Cancelled => "cancelled",
            StatusFlag::CancellationPending => "cancellation pending",
        };
        f.write_str(label)
    }
}

/// Derived negotiation state of a message. Flags only ever accumulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageStatus {
    pub is_proposed: bool,
    pub is_claimed: bool,
    pub is_accepted: bool,
    pub is_rejected: bool,
    pub is_retracted: bool,
    pub is_cancelled: bool,
    pub is_cancellation_pending: bool,
}

impl MessageStatus {
    fn slot_mut(&mut self, flag: StatusFlag) -> &mut bool {
        match flag {
            StatusFlag::Proposed => &mut self.is_proposed,
            StatusFlag::Claimed => &mut self.is_claimed,
            StatusFlag::Accepted => &mut self.is_accepted,
            StatusFlag::Rejected => &mut self.is_rejected,
            StatusFlag::Retracted => &mut self.is_retracted,
            StatusFlag::Cancelled => &mut self.is_cancelled,
            StatusFlag::CancellationPending => &mut self.is_cancellation_pending,
        }
    }

    pub fn get(&self, flag: StatusFlag) -> bool {
        match flag {
            StatusFlag::Proposed => self.is_proposed,
            StatusFlag::Claimed => self.is_claimed,
            StatusFlag::Accepted => self.is_accepted,
            StatusFlag::Rejected => self.is_rejected,
            StatusFlag::Retracted => self.is_retracted,
            StatusFlag::Cancelled => self.is_cancelled,
            StatusFlag::CancellationPending => self.is_cancellation_pending,
        }
    }

    /// Copy of this status with `flag` raised
    pub fn with(mut self, flag: StatusFlag) -> Self {
        *self.slot_mut(flag) = true;
        self
    }

    pub fn from_flags<I: IntoIterator<Item = StatusFlag>>(flags: I) -> Self {
        flags.into_iter().fold(Self::default(), Self::with)
    }

    /// Field-wise OR. There is no way to lower a flag through this type.
    pub fn merge(self, other: MessageStatus) -> Self {
        StatusFlag::ALL
            .into_iter()
            .filter(|flag| other.get(*flag))
            .fold(self, Self::with)
    }

    /// Raised flags in declaration order
    pub fn flags(&self) -> impl Iterator<Item = StatusFlag> + '_ {
        StatusFlag::ALL.into_iter().filter(move |flag| self.get(*flag))
    }

    pub fn is_empty(&self) -> bool {
        self.flags().next().is_none()
    }

    /// True if every flag raised in `earlier` is still raised here
    pub fn covers(&self, earlier: &MessageStatus) -> bool {
        earlier.flags().all(|flag| self.get(flag))
    }
}
