use super::{EventHandler, require_position, unexpected_payload};
use crate::ledger::{EscrowTransition, EventKind, EventPayload, LedgerEvent};
use crate::projection::{
	EscrowLogKind, EscrowLogPayload, EscrowStatus, NewEscrowLog, ProjectionStore,
};
use crate::sync::types::{HandleOutcome, SyncError};

use std::sync::Arc;

/// Applies one escrow transition to the matching commerce order and appends
/// the escrow journal entry.
///
/// LOCK applies only to an order with no escrow state yet; RELEASE and REFUND
/// apply from no state or ESCROWED. Anything against a terminal state is a
/// replay and is skipped.
pub struct EscrowTransitionHandler {
	store: Arc<dyn ProjectionStore>,
	transition: EscrowLogKind,
}

impl EscrowTransitionHandler {
	pub fn new(store: Arc<dyn ProjectionStore>, transition: EscrowLogKind) -> Self {
		Self { store, transition }
	}

	fn payload<'a>(&self, event: &'a LedgerEvent) -> Result<&'a EscrowTransition, SyncError> {
		match (self.transition, &event.payload) {
			(EscrowLogKind::Lock, EventPayload::EscrowLocked(t))
			| (EscrowLogKind::Release, EventPayload::EscrowReleased(t))
			| (EscrowLogKind::Refund, EventPayload::EscrowRefunded(t)) => Ok(t),
			_ => Err(unexpected_payload(self.kind(), event)),
		}
	}

	fn applies_from(&self, current: Option<EscrowStatus>) -> bool {
		match (self.transition, current) {
			(_, Some(status)) if status.is_terminal() => false,
			(EscrowLogKind::Lock, current) => current.is_none(),
			_ => true,
		}
	}
}

#[async_trait::async_trait]
impl EventHandler for EscrowTransitionHandler {
	fn kind(&self) -> EventKind {
		match self.transition {
			EscrowLogKind::Lock => EventKind::EscrowLocked,
			EscrowLogKind::Release => EventKind::EscrowReleased,
			EscrowLogKind::Refund => EventKind::EscrowRefunded,
		}
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let transition = self.payload(event)?;
		let position = require_position(event)?;

		let Some(order) = self
			.store
			.find_commerce_order(&transition.external_order_id)
			.await?
		else {
			return Ok(HandleOutcome::Dropped(format!(
				"no commerce order with external id {}",
				transition.external_order_id
			)));
		};

		if !self.applies_from(order.escrow_status) {
			return Ok(HandleOutcome::Skipped(format!(
				"commerce order {} already {}",
				order.id,
				order
					.escrow_status
					.map(|status| status.to_string())
					.unwrap_or_else(|| "without escrow".to_string())
			)));
		}

		self.store
			.apply_escrow_transition(NewEscrowLog {
				commerce_order_id: order.id,
				kind: self.transition,
				payload: EscrowLogPayload {
					buyer: transition.buyer.clone(),
					seller: transition.seller.clone(),
					amount: transition.amount.clone(),
					transaction_hash: position.transaction_hash.clone(),
					block_number: position.block_number,
					timestamp: event.timestamp,
				},
			})
			.await?;

		Ok(HandleOutcome::Applied)
	}
}
