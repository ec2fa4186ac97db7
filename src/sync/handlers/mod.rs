//! Projection writers, one per event kind.
//!
//! Every handler follows the same read-check-then-write contract: derive the
//! natural key from the payload, look for an existing row, skip if the
//! projection already reflects the event, otherwise write and apply cascades.
//! Re-applying an event is therefore always safe.
//!
//! Handlers return errors instead of logging them; the router counts and logs
//! exactly one line per event.

mod escrow;
mod orders;
mod rewards;

pub use escrow::EscrowTransitionHandler;
pub use orders::{DisputeOpenedHandler, OrderCreatedHandler, ProofSubmittedHandler};
pub use rewards::{
    CashbackGrantedHandler, MissionCompletedHandler, MissionCreatedHandler, RewardClaimedHandler,
};

use super::types::{HandleOutcome, SyncError};
use crate::config::HandlerConfig;
use crate::ledger::{ChainPosition, EventKind, LedgerEvent};
use crate::projection::{EscrowLogKind, ProjectionStore, StoreError};

use std::sync::Arc;

/// Trait for applying one kind of ledger event to the projection.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// The single event kind this handler accepts.
    fn kind(&self) -> EventKind;

    /// Apply the event. Must be idempotent.
    async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError>;
}

/// The full handler set, one per [`EventKind`].
pub fn default_handlers(
    store: Arc<dyn ProjectionStore>,
    config: &HandlerConfig,
) -> Vec<Arc<dyn EventHandler>> {
    vec![
        Arc::new(OrderCreatedHandler::new(store.clone())),
        Arc::new(ProofSubmittedHandler::new(store.clone())),
        Arc::new(DisputeOpenedHandler::new(store.clone())),
        Arc::new(EscrowTransitionHandler::new(store.clone(), EscrowLogKind::Lock)),
        Arc::new(EscrowTransitionHandler::new(store.clone(), EscrowLogKind::Release)),
        Arc::new(EscrowTransitionHandler::new(store.clone(), EscrowLogKind::Refund)),
        Arc::new(MissionCreatedHandler::new(store.clone())),
        Arc::new(MissionCompletedHandler::new(store.clone())),
        Arc::new(RewardClaimedHandler::new(store.clone())),
        Arc::new(CashbackGrantedHandler::new(store, config.dedupe_cashback_grants)),
    ]
}

/// Ledger position of an event whose projection records chain provenance.
fn require_position(event: &LedgerEvent) -> Result<&ChainPosition, SyncError> {
    event.position.as_ref().ok_or_else(|| {
        SyncError::InvalidPayload(format!("{} event carries no ledger position", event.kind()))
    })
}

fn unexpected_payload(expected: EventKind, event: &LedgerEvent) -> SyncError {
    SyncError::InvalidPayload(format!(
        "expected {} payload, got {}",
        expected,
        event.kind()
    ))
}

/// Map an insert result to an outcome. A unique violation means a concurrent
/// path (push vs. poll) wrote the same row first.
fn insert_outcome(result: Result<(), StoreError>) -> Result<HandleOutcome, SyncError> {
    match result {
        Ok(()) => Ok(HandleOutcome::Applied),
        Err(StoreError::UniqueViolation { entity, key }) => Ok(HandleOutcome::Skipped(format!(
            "{} {} written concurrently",
            entity, key
        ))),
        Err(e) => Err(e.into()),
    }
}
