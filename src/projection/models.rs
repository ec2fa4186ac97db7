//! Materialized entities of the ledger projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a ledger-native order. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainOrderStatus {
    Created,
    ProofSubmitted,
    Disputed,
}

impl ChainOrderStatus {
    /// Whether moving to `next` keeps the status monotonic.
    pub fn can_advance_to(self, next: ChainOrderStatus) -> bool {
        next > self
    }
}

impl fmt::Display for ChainOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainOrderStatus::Created => "CREATED",
            ChainOrderStatus::ProofSubmitted => "PROOF_SUBMITTED",
            ChainOrderStatus::Disputed => "DISPUTED",
        };
        f.write_str(name)
    }
}

/// Mirror of an order that lives on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOrder {
    pub order_id: u64,
    pub buyer: String,
    pub seller: String,
    pub marketplace_id: u64,
    /// Decimal string, never parsed.
    pub total_amount: String,
    pub status: ChainOrderStatus,
    pub transaction_hash: String,
    pub block_number: u64,
    pub created_at: DateTime<Utc>,
}

/// Evidence of delivery attached to a [`ChainOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryProof {
    pub order_id: u64,
    pub proof_cid: String,
    pub attestor: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Opened,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub dispute_id: u64,
    pub order_id: u64,
    pub plaintiff: String,
    pub defendant: String,
    pub status: DisputeStatus,
    pub transaction_hash: String,
    pub block_number: u64,
    pub opened_at: DateTime<Utc>,
}

/// Escrow sub-state of a [`CommerceOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Escrowed,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowStatus::Escrowed => "ESCROWED",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Refunded => "REFUNDED",
        };
        f.write_str(name)
    }
}

/// Business order owned by checkout. Only `escrow_status` and
/// `escrow_updated_at` are written by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommerceOrder {
    pub id: u64,
    pub external_order_id: String,
    pub escrow_status: Option<EscrowStatus>,
    pub escrow_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowLogKind {
    Lock,
    Release,
    Refund,
}

impl EscrowLogKind {
    /// Status a commerce order lands in after this transition.
    pub fn resulting_status(self) -> EscrowStatus {
        match self {
            EscrowLogKind::Lock => EscrowStatus::Escrowed,
            EscrowLogKind::Release => EscrowStatus::Released,
            EscrowLogKind::Refund => EscrowStatus::Refunded,
        }
    }
}

/// Structured body of an [`EscrowLog`] row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLogPayload {
    pub buyer: String,
    pub seller: String,
    pub amount: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only escrow journal entry, one per applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLog {
    pub id: u64,
    pub commerce_order_id: u64,
    pub kind: EscrowLogKind,
    pub payload: EscrowLogPayload,
}

/// Reward mission from the ledger catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: u64,
    pub title: String,
    pub description: String,
    pub mission_type: String,
    pub reward_amount: String,
    pub required_count: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-user mission state; the one projection updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMissionProgress {
    pub user_id: String,
    pub mission_id: u64,
    pub current_count: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed: bool,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl UserMissionProgress {
    /// Fresh, untouched progress row.
    pub fn new(user_id: impl Into<String>, mission_id: u64) -> Self {
        Self {
            user_id: user_id.into(),
            mission_id,
            current_count: 0,
            completed: false,
            completed_at: None,
            claimed: false,
            claimed_at: None,
        }
    }
}

/// Record of a cashback disbursement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashbackGrant {
    pub id: u64,
    pub user_id: String,
    pub order_id: u64,
    pub order_amount: String,
    pub cashback_amount: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub event_index: u32,
    pub granted_at: DateTime<Utc>,
}

/// Insert form of [`CashbackGrant`]; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCashbackGrant {
    pub user_id: String,
    pub order_id: u64,
    pub order_amount: String,
    pub cashback_amount: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub event_index: u32,
    pub granted_at: DateTime<Utc>,
}

/// Insert form of [`EscrowLog`]; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEscrowLog {
    pub commerce_order_id: u64,
    pub kind: EscrowLogKind,
    pub payload: EscrowLogPayload,
}
