use super::{EventHandler, insert_outcome, require_position, unexpected_payload};
use crate::ledger::{EventKind, EventPayload, LedgerEvent};
use crate::projection::{
	ChainOrder, ChainOrderStatus, DeliveryProof, Dispute, DisputeStatus, ProjectionStore,
};
use crate::sync::types::{HandleOutcome, SyncError};

use std::sync::Arc;

/// Projects `OrderCreated` into a [`ChainOrder`] row.
pub struct OrderCreatedHandler {
	store: Arc<dyn ProjectionStore>,
}

impl OrderCreatedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
		Self { store }
	}
}

#[async_trait::async_trait]
impl EventHandler for OrderCreatedHandler {
	fn kind(&self) -> EventKind {
		EventKind::OrderCreated
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::OrderCreated(order) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};
		let position = require_position(event)?;

		if self.store.find_chain_order(order.order_id).await?.is_some() {
			return Ok(HandleOutcome::Skipped(format!(
				"order {} already projected",
				order.order_id
			)));
		}

		let row = ChainOrder {
			order_id: order.order_id,
			buyer: order.buyer.clone(),
			seller: order.seller.clone(),
			marketplace_id: order.marketplace_id,
			total_amount: order.total_amount.clone(),
			status: ChainOrderStatus::Created,
			transaction_hash: position.transaction_hash.clone(),
			block_number: position.block_number,
			created_at: event.timestamp,
		};
		insert_outcome(self.store.insert_chain_order(row).await)
	}
}

/// Records a [`DeliveryProof`] and moves a CREATED order to PROOF_SUBMITTED.
pub struct ProofSubmittedHandler {
	store: Arc<dyn ProjectionStore>,
}

impl ProofSubmittedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
		Self { store }
	}
}

#[async_trait::async_trait]
impl EventHandler for ProofSubmittedHandler {
	fn kind(&self) -> EventKind {
		EventKind::ProofSubmitted
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::ProofSubmitted(proof) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};
		let position = require_position(event)?;

		if self
			.store
			.find_delivery_proof(proof.order_id, &proof.proof_cid)
			.await?
			.is_some()
		{
			return Ok(HandleOutcome::Skipped(format!(
				"proof {} already recorded for order {}",
				proof.proof_cid, proof.order_id
			)));
		}

		let order = self
			.store
			.find_chain_order(proof.order_id)
			.await?
			.ok_or_else(|| SyncError::MissingRelation {
				entity: "chain order",
				key: proof.order_id.to_string(),
			})?;

		let outcome = insert_outcome(
			self.store
				.insert_delivery_proof(DeliveryProof {
					order_id: proof.order_id,
					proof_cid: proof.proof_cid.clone(),
					attestor: proof.attestor.clone(),
					transaction_hash: position.transaction_hash.clone(),
					block_number: position.block_number,
					submitted_at: event.timestamp,
				})
				.await,
		)?;

		// Later states (DISPUTED) are never rolled back by a proof
		if outcome == HandleOutcome::Applied && order.status == ChainOrderStatus::Created {
			self.store
				.update_chain_order_status(order.order_id, ChainOrderStatus::ProofSubmitted)
				.await?;
		}
		Ok(outcome)
	}
}

/// Records a [`Dispute`] and moves its order to DISPUTED.
pub struct DisputeOpenedHandler {
	store: Arc<dyn ProjectionStore>,
}

impl DisputeOpenedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
		Self { store }
	}
}

#[async_trait::async_trait]
impl EventHandler for DisputeOpenedHandler {
	fn kind(&self) -> EventKind {
		EventKind::DisputeOpened
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::DisputeOpened(dispute) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};
		let position = require_position(event)?;

		if self.store.find_dispute(dispute.dispute_id).await?.is_some() {
			return Ok(HandleOutcome::Skipped(format!(
				"dispute {} already recorded",
				dispute.dispute_id
			)));
		}

		let order = self
			.store
			.find_chain_order(dispute.order_id)
			.await?
			.ok_or_else(|| SyncError::MissingRelation {
				entity: "chain order",
				key: dispute.order_id.to_string(),
			})?;

		let outcome = insert_outcome(
			self.store
				.insert_dispute(Dispute {
					dispute_id: dispute.dispute_id,
					order_id: dispute.order_id,
					plaintiff: dispute.plaintiff.clone(),
					defendant: dispute.defendant.clone(),
					status: DisputeStatus::Opened,
					transaction_hash: position.transaction_hash.clone(),
					block_number: position.block_number,
					opened_at: event.timestamp,
				})
				.await,
		)?;

		if outcome == HandleOutcome::Applied && order.status.can_advance_to(ChainOrderStatus::Disputed)
		{
			self.store
				.update_chain_order_status(order.order_id, ChainOrderStatus::Disputed)
				.await?;
		}
		Ok(outcome)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::{DisputeOpened, OrderCreated, ProofSubmitted};
	use crate::projection::MemoryProjectionStore;
	use crate::sync::handlers::testing::chain_event;

	fn order_created(order_id: u64) -> LedgerEvent {
		chain_event(
			10,
			0,
			EventPayload::OrderCreated(OrderCreated {
				order_id,
				buyer: "0xb0".into(),
				seller: "0x5e".into(),
				marketplace_id: 2,
				total_amount: "1000000000000".into(),
			}),
		)
	}

	fn proof(order_id: u64, cid: &str) -> LedgerEvent {
		chain_event(
			11,
			0,
			EventPayload::ProofSubmitted(ProofSubmitted {
				order_id,
				proof_cid: cid.into(),
				attestor: "0xa7".into(),
			}),
		)
	}

	fn dispute(dispute_id: u64, order_id: u64) -> LedgerEvent {
		chain_event(
			12,
			1,
			EventPayload::DisputeOpened(DisputeOpened {
				dispute_id,
				order_id,
				plaintiff: "0xb0".into(),
				defendant: "0x5e".into(),
			}),
		)
	}

	#[tokio::test]
	async fn order_created_is_idempotent() {
		let store = Arc::new(MemoryProjectionStore::new());
		let handler = OrderCreatedHandler::new(store.clone());

		assert_eq!(handler.handle(&order_created(1)).await.unwrap(), HandleOutcome::Applied);
		assert!(matches!(
			handler.handle(&order_created(1)).await.unwrap(),
			HandleOutcome::Skipped(_)
		));

		let orders = store.chain_orders();
		assert_eq!(orders.len(), 1);
		assert_eq!(orders[0].status, ChainOrderStatus::Created);
		assert_eq!(orders[0].total_amount, "1000000000000");
		assert_eq!(orders[0].block_number, 10);
	}

	#[tokio::test]
	async fn order_without_position_is_rejected() {
		let store = Arc::new(MemoryProjectionStore::new());
		let handler = OrderCreatedHandler::new(store.clone());
		let mut event = order_created(1);
		event.position = None;

		assert!(matches!(
			handler.handle(&event).await,
			Err(SyncError::InvalidPayload(_))
		));
		assert!(store.chain_orders().is_empty());
	}

	#[tokio::test]
	async fn proof_advances_created_order() {
		let store = Arc::new(MemoryProjectionStore::new());
		OrderCreatedHandler::new(store.clone())
			.handle(&order_created(1))
			.await
			.unwrap();
		let handler = ProofSubmittedHandler::new(store.clone());

		assert_eq!(handler.handle(&proof(1, "bafy1")).await.unwrap(), HandleOutcome::Applied);
		assert!(matches!(
			handler.handle(&proof(1, "bafy1")).await.unwrap(),
			HandleOutcome::Skipped(_)
		));

		assert_eq!(store.delivery_proofs().len(), 1);
		assert_eq!(store.chain_orders()[0].status, ChainOrderStatus::ProofSubmitted);
	}

	#[tokio::test]
	async fn proof_for_unknown_order_is_an_error() {
		let store = Arc::new(MemoryProjectionStore::new());
		let handler = ProofSubmittedHandler::new(store.clone());

		assert!(matches!(
			handler.handle(&proof(9, "bafy")).await,
			Err(SyncError::MissingRelation { .. })
		));
		assert!(store.delivery_proofs().is_empty());
	}

	#[tokio::test]
	async fn dispute_moves_order_to_disputed_from_any_state() {
		let store = Arc::new(MemoryProjectionStore::new());
		OrderCreatedHandler::new(store.clone())
			.handle(&order_created(1))
			.await
			.unwrap();
		ProofSubmittedHandler::new(store.clone())
			.handle(&proof(1, "bafy1"))
			.await
			.unwrap();

		let handler = DisputeOpenedHandler::new(store.clone());
		assert_eq!(handler.handle(&dispute(5, 1)).await.unwrap(), HandleOutcome::Applied);
		assert!(matches!(
			handler.handle(&dispute(5, 1)).await.unwrap(),
			HandleOutcome::Skipped(_)
		));
		assert_eq!(store.disputes().len(), 1);
		assert_eq!(store.chain_orders()[0].status, ChainOrderStatus::Disputed);
	}

	#[tokio::test]
	async fn late_proof_does_not_roll_back_dispute() {
		let store = Arc::new(MemoryProjectionStore::new());
		OrderCreatedHandler::new(store.clone())
			.handle(&order_created(1))
			.await
			.unwrap();
		DisputeOpenedHandler::new(store.clone())
			.handle(&dispute(5, 1))
			.await
			.unwrap();

		ProofSubmittedHandler::new(store.clone())
			.handle(&proof(1, "bafy-late"))
			.await
			.unwrap();
		assert_eq!(store.chain_orders()[0].status, ChainOrderStatus::Disputed);
		assert_eq!(store.delivery_proofs().len(), 1);
	}
}
