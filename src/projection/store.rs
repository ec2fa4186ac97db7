use super::models::*;

/// Errors raised by projection storage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Unique constraint violated on {entity}: {key}")]
	UniqueViolation { entity: &'static str, key: String },

	#[error("No {entity} row for {key}")]
	MissingRow { entity: &'static str, key: String },

	#[error("Snapshot I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Snapshot serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Storage the event handlers write the projection into.
///
/// Implementations enforce the natural-key unique constraints and nothing
/// else; idempotency checks live in the handlers.
#[async_trait::async_trait]
pub trait ProjectionStore: Send + Sync {
	async fn find_chain_order(&self, order_id: u64) -> Result<Option<ChainOrder>, StoreError>;
	async fn insert_chain_order(&self, order: ChainOrder) -> Result<(), StoreError>;
	async fn update_chain_order_status(
		&self,
		order_id: u64,
		status: ChainOrderStatus,
	) -> Result<(), StoreError>;

	async fn find_delivery_proof(
		&self,
		order_id: u64,
		proof_cid: &str,
	) -> Result<Option<DeliveryProof>, StoreError>;
	async fn insert_delivery_proof(&self, proof: DeliveryProof) -> Result<(), StoreError>;

	async fn find_dispute(&self, dispute_id: u64) -> Result<Option<Dispute>, StoreError>;
	async fn insert_dispute(&self, dispute: Dispute) -> Result<(), StoreError>;

	async fn find_commerce_order(
		&self,
		external_order_id: &str,
	) -> Result<Option<CommerceOrder>, StoreError>;
	/// Move the commerce order to the status `log.kind` results in and append
	/// `log` to its escrow journal. Both writes land or neither does.
	async fn apply_escrow_transition(&self, log: NewEscrowLog) -> Result<EscrowLog, StoreError>;
	async fn escrow_logs(&self, commerce_order_id: u64) -> Result<Vec<EscrowLog>, StoreError>;

	async fn find_mission(&self, mission_id: u64) -> Result<Option<Mission>, StoreError>;
	async fn insert_mission(&self, mission: Mission) -> Result<(), StoreError>;

	async fn find_mission_progress(
		&self,
		user_id: &str,
		mission_id: u64,
	) -> Result<Option<UserMissionProgress>, StoreError>;
	async fn upsert_mission_progress(&self, progress: UserMissionProgress) -> Result<(), StoreError>;

	async fn insert_cashback_grant(&self, grant: NewCashbackGrant)
	-> Result<CashbackGrant, StoreError>;
	/// Grant emitted at a given ledger position, if one was recorded.
	async fn find_cashback_grant(
		&self,
		user_id: &str,
		transaction_hash: &str,
		event_index: u32,
	) -> Result<Option<CashbackGrant>, StoreError>;
	async fn cashback_grants(&self, user_id: &str) -> Result<Vec<CashbackGrant>, StoreError>;
}
