/// Agreement-protocol snapshot: which messages are proposed, accepted,
/// rejected, retracted, claimed, cancelled or pending cancellation.
use crate::message::Message;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The ten URI sets a snapshot is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgreementCategory {
    Agreements,
    PendingProposals,
    AcceptedCancellationProposals,
    CancellationPendingAgreements,
    PendingCancellationProposals,
    CancelledAgreements,
    RejectedMessages,
    RetractedMessages,
    ProposedMessages,
    ClaimedMessages,
}

impl AgreementCategory {
    pub const ALL: [AgreementCategory; 10] = [
        AgreementCategory::Agreements,
        AgreementCategory::PendingProposals,
        AgreementCategory::AcceptedCancellationProposals,
        AgreementCategory::CancellationPendingAgreements,
        AgreementCategory::PendingCancellationProposals,
        AgreementCategory::CancelledAgreements,
        AgreementCategory::RejectedMessages,
        AgreementCategory::RetractedMessages,
        AgreementCategory::ProposedMessages,
        AgreementCategory::ClaimedMessages,
    ];

    /// Field name used by the server and the store
    pub fn key(self) -> &'static str {
        match self {
            AgreementCategory::Agreements => "agreementUris",
            AgreementCategory::PendingProposals => "pendingProposalUris",
            AgreementCategory::AcceptedCancellationProposals => "acceptedCancellationProposalUris",
            AgreementCategory::CancellationPendingAgreements => "cancellationPendingAgreementUris",
            AgreementCategory::PendingCancellationProposals => "pendingCancellationProposalUris",
            AgreementCategory::CancelledAgreements => "cancelledAgreementUris",
            AgreementCategory::RejectedMessages => "rejectedMessageUris",
            AgreementCategory::RetractedMessages => "retractedMessageUris",
            AgreementCategory::ProposedMessages => "proposedMessageUris",
            AgreementCategory::ClaimedMessages => "claimedMessageUris",
        }
    }
}

impl fmt::Display for AgreementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Point-in-time view of the agreement protocol for one conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgreementSnapshot {
    pub agreement_uris: BTreeSet<String>,
    pub pending_proposal_uris: BTreeSet<String>,
    pub accepted_cancellation_proposal_uris: BTreeSet<String>,
    pub cancellation_pending_agreement_uris: BTreeSet<String>,
    pub pending_cancellation_proposal_uris: BTreeSet<String>,
    pub cancelled_agreement_uris: BTreeSet<String>,
    pub rejected_message_uris: BTreeSet<String>,
    pub retracted_message_uris: BTreeSet<String>,
    pub proposed_message_uris: BTreeSet<String>,
    pub claimed_message_uris: BTreeSet<String>,
}

impl AgreementSnapshot {
    pub fn uris(&self, category: AgreementCategory) -> &BTreeSet<String> {
        match category {
            AgreementCategory::Agreements => &self.agreement_uris,
            AgreementCategory::PendingProposals => &self.pending_proposal_uris,
            AgreementCategory::AcceptedCancellationProposals => {
                &self.accepted_cancellation_proposal_uris
            }
            AgreementCategory::CancellationPendingAgreements => {
                &self.cancellation_pending_agreement_uris
            }
            AgreementCategory::PendingCancellationProposals => {
                &self.pending_cancellation_proposal_uris
            }
            AgreementCategory::CancelledAgreements => &self.cancelled_agreement_uris,
            AgreementCategory::RejectedMessages => &self.rejected_message_uris,
            AgreementCategory::RetractedMessages => &self.retracted_message_uris,
            AgreementCategory::ProposedMessages => &self.proposed_message_uris,
            AgreementCategory::ClaimedMessages => &self.claimed_message_uris,
        }
    }

    /// Match on the owner's URI or on the remote party's URI
    pub fn matches(&self, category: AgreementCategory, uri: &str, remote_uri: Option<&str>) -> bool {
        let set = self.uris(category);
        set.contains(uri) || remote_uri.map(|r| set.contains(r)).unwrap_or(false)
    }

    pub fn matches_message(&self, category: AgreementCategory, msg: &Message) -> bool {
        self.matches(category, &msg.uri, msg.remote_uri.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        AgreementCategory::ALL
            .into_iter()
            .all(|category| self.uris(category).is_empty())
    }

    /// Union of every set; duplicates across categories collapse
    pub fn all_uris(&self) -> BTreeSet<String> {
        AgreementCategory::ALL
            .into_iter()
            .flat_map(|category| self.uris(category).iter().cloned())
            .collect()
    }

    /// URIs that appear in some category here but not in the same category
    /// of `prior`
    pub fn introduced_since(&self, prior: &AgreementSnapshot) -> BTreeSet<String> {
        AgreementCategory::ALL
            .into_iter()
            .flat_map(|category| {
                self.uris(category)
                    .difference(prior.uris(category))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A proposal that has been made but not yet accepted or rejected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingProposal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub proposes: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub proposes_to_cancel: Vec<String>,
}

/// Payload returned by the agreement-protocol endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgreementProtocolResponse {
    #[serde(deserialize_with = "null_as_empty")]
    pub agreement_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub pending_proposal_uris: Vec<String>,
    pub pending_proposals: Vec<PendingProposal>,
    #[serde(deserialize_with = "null_as_empty")]
    pub accepted_cancellation_proposal_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub cancellation_pending_agreement_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub pending_cancellation_proposal_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub cancelled_agreement_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub rejected_message_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub retracted_message_uris: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub claimed_message_uris: Vec<String>,
}

impl From<AgreementProtocolResponse> for AgreementSnapshot {
    fn from(response: AgreementProtocolResponse) -> Self {
        let proposed_message_uris = response
            .pending_proposals
            .iter()
            .flat_map(|proposal| proposal.proposes.iter().cloned())
            .collect();

        Self {
            agreement_uris: response.agreement_uris.into_iter().collect(),
            pending_proposal_uris: response.pending_proposal_uris.into_iter().collect(),
            accepted_cancellation_proposal_uris: response
                .accepted_cancellation_proposal_uris
                .into_iter()
                .collect(),
            cancellation_pending_agreement_uris: response
                .cancellation_pending_agreement_uris
                .into_iter()
                .collect(),
            pending_cancellation_proposal_uris: response
                .pending_cancellation_proposal_uris
                .into_iter()
                .collect(),
            cancelled_agreement_uris: response.cancelled_agreement_uris.into_iter().collect(),
            rejected_message_uris: response.rejected_message_uris.into_iter().collect(),
            retracted_message_uris: response.retracted_message_uris.into_iter().collect(),
            proposed_message_uris,
            claimed_message_uris: response.claimed_message_uris.into_iter().collect(),
        }
    }
}
