//! Types for ledger event ingestion and state queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminator for every event kind the synchronizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    OrderCreated,
    ProofSubmitted,
    DisputeOpened,
    EscrowLocked,
    EscrowReleased,
    EscrowRefunded,
    MissionCreated,
    MissionCompleted,
    RewardClaimed,
    CashbackGranted,
}

impl EventKind {
    /// Every kind, in routing order.
    pub const ALL: [EventKind; 10] = [
        EventKind::OrderCreated,
        EventKind::ProofSubmitted,
        EventKind::DisputeOpened,
        EventKind::EscrowLocked,
        EventKind::EscrowReleased,
        EventKind::EscrowRefunded,
        EventKind::MissionCreated,
        EventKind::MissionCompleted,
        EventKind::RewardClaimed,
        EventKind::CashbackGranted,
    ];

    /// Name used on the wire and in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "OrderCreated",
            EventKind::ProofSubmitted => "ProofSubmitted",
            EventKind::DisputeOpened => "DisputeOpened",
            EventKind::EscrowLocked => "EscrowLocked",
            EventKind::EscrowReleased => "EscrowReleased",
            EventKind::EscrowRefunded => "EscrowRefunded",
            EventKind::MissionCreated => "MissionCreated",
            EventKind::MissionCompleted => "MissionCompleted",
            EventKind::RewardClaimed => "RewardClaimed",
            EventKind::CashbackGranted => "CashbackGranted",
        }
    }

    /// Parse a wire name back into a kind.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription filter passed to the ledger client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kinds: Vec<EventKind>,
}

impl EventFilter {
    pub fn new(kinds: Vec<EventKind>) -> Self {
        Self { kinds }
    }

    /// Check whether an event kind passes this filter
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.contains(&kind)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(EventKind::ALL.to_vec())
    }
}

/// Raw event frame as delivered by the ledger indexer before decoding.
///
/// `data` is either a named object or a positional tuple, depending on how the
/// indexer was configured to render event arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLedgerEvent {
    /// The event kind name, e.g. `OrderCreated`.
    pub kind: String,
    /// Block that contains the event.
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    /// Position of the event inside its block.
    #[serde(rename = "eventIndex", default)]
    pub event_index: u32,
    /// Hash of the extrinsic that emitted the event, if any.
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<serde_json::Value>,
    /// Block timestamp, RFC 3339.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Event arguments.
    pub data: serde_json::Value,
}

/// Where a decoded event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Pushed by the ledger subscription.
    Subscription,
    /// Re-derived by the reconciliation poller.
    Reconciliation,
}

/// Location of an event on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPosition {
    pub block_number: u64,
    pub event_index: u32,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: u64,
    pub buyer: String,
    pub seller: String,
    pub marketplace_id: u64,
    pub total_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSubmitted {
    pub order_id: u64,
    pub proof_cid: String,
    pub attestor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeOpened {
    pub dispute_id: u64,
    pub order_id: u64,
    pub plaintiff: String,
    pub defendant: String,
}

/// Shared payload of the three escrow transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTransition {
    pub external_order_id: String,
    pub buyer: String,
    pub seller: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionCreated {
    pub mission_id: u64,
    pub title: String,
    pub description: String,
    pub mission_type: String,
    pub reward_amount: String,
    pub required_count: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionCompleted {
    pub user_id: String,
    pub mission_id: u64,
    pub current_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaimed {
    pub user_id: String,
    pub mission_id: u64,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashbackGranted {
    pub user_id: String,
    pub order_id: u64,
    pub order_amount: String,
    pub cashback_amount: String,
}

/// Strongly-typed payload, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    OrderCreated(OrderCreated),
    ProofSubmitted(ProofSubmitted),
    DisputeOpened(DisputeOpened),
    EscrowLocked(EscrowTransition),
    EscrowReleased(EscrowTransition),
    EscrowRefunded(EscrowTransition),
    MissionCreated(MissionCreated),
    MissionCompleted(MissionCompleted),
    RewardClaimed(RewardClaimed),
    CashbackGranted(CashbackGranted),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::OrderCreated(_) => EventKind::OrderCreated,
            EventPayload::ProofSubmitted(_) => EventKind::ProofSubmitted,
            EventPayload::DisputeOpened(_) => EventKind::DisputeOpened,
            EventPayload::EscrowLocked(_) => EventKind::EscrowLocked,
            EventPayload::EscrowReleased(_) => EventKind::EscrowReleased,
            EventPayload::EscrowRefunded(_) => EventKind::EscrowRefunded,
            EventPayload::MissionCreated(_) => EventKind::MissionCreated,
            EventPayload::MissionCompleted(_) => EventKind::MissionCompleted,
            EventPayload::RewardClaimed(_) => EventKind::RewardClaimed,
            EventPayload::CashbackGranted(_) => EventKind::CashbackGranted,
        }
    }

    /// Short natural-key description for log lines.
    pub fn describe(&self) -> String {
        match self {
            EventPayload::OrderCreated(e) => format!("order {}", e.order_id),
            EventPayload::ProofSubmitted(e) => {
                format!("proof {} for order {}", e.proof_cid, e.order_id)
            }
            EventPayload::DisputeOpened(e) => {
                format!("dispute {} on order {}", e.dispute_id, e.order_id)
            }
            EventPayload::EscrowLocked(e)
            | EventPayload::EscrowReleased(e)
            | EventPayload::EscrowRefunded(e) => {
                format!("escrow for external order {}", e.external_order_id)
            }
            EventPayload::MissionCreated(e) => format!("mission {}", e.mission_id),
            EventPayload::MissionCompleted(e) => {
                format!("mission {} completed by {}", e.mission_id, e.user_id)
            }
            EventPayload::RewardClaimed(e) => {
                format!("mission {} reward claimed by {}", e.mission_id, e.user_id)
            }
            EventPayload::CashbackGranted(e) => {
                format!("cashback for {} on order {}", e.user_id, e.order_id)
            }
        }
    }
}

/// A decoded ledger event ready for the handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub source: EventSource,
    /// Present for subscription events, absent for reconciled state.
    pub position: Option<ChainPosition>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl LedgerEvent {
    /// Build an event observed on the subscription stream.
    pub fn from_chain(position: ChainPosition, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            source: EventSource::Subscription,
            position: Some(position),
            timestamp,
            payload,
        }
    }

    /// Build an event re-derived from a state snapshot.
    pub fn reconciled(payload: EventPayload) -> Self {
        Self {
            source: EventSource::Reconciliation,
            position: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Named resources that can be pulled with a state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateResource {
    /// The catalog of currently active missions.
    ActiveMissions,
}

impl fmt::Display for StateResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateResource::ActiveMissions => f.write_str("active_missions"),
        }
    }
}

/// Current value of a [`StateResource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSnapshot {
    Missions(Vec<MissionCreated>),
}

impl StateSnapshot {
    /// Turn every item of the snapshot into an event for the handlers.
    pub fn into_events(self) -> Vec<LedgerEvent> {
        match self {
            StateSnapshot::Missions(missions) => missions
                .into_iter()
                .map(|mission| LedgerEvent::reconciled(EventPayload::MissionCreated(mission)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StateSnapshot::Missions(missions) => missions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors produced while turning a raw frame into a typed event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    #[error("{kind}: missing field `{field}`")]
    MissingField { kind: EventKind, field: &'static str },

    #[error("{kind}: field `{field}` has invalid value: {reason}")]
    InvalidField {
        kind: EventKind,
        field: &'static str,
        reason: String,
    },

    #[error("{kind}: event data must be an object or a tuple")]
    MalformedData { kind: EventKind },
}

/// Error types for ledger client operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("GraphQL error: {0}")]
    GraphQLError(String),

    #[error("No data returned")]
    NoData,

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Not connected: {0}")]
    NotConnected(String),
}

impl LedgerError {
    /// Whether the error means the transport itself is gone, as opposed to a
    /// single bad frame.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LedgerError::WebSocketError(_) | LedgerError::NotConnected(_) | LedgerError::SessionError(_)
        )
    }
}
