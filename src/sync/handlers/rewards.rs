use super::{EventHandler, insert_outcome, require_position, unexpected_payload};
use crate::ledger::{EventKind, EventPayload, LedgerEvent};
use crate::projection::{Mission, NewCashbackGrant, ProjectionStore, UserMissionProgress};
use crate::sync::types::{HandleOutcome, SyncError};

use std::sync::Arc;

/// Projects `MissionCreated` into the mission catalog. Fed by both the
/// subscription and the reconciliation poller.
pub struct MissionCreatedHandler {
	store: Arc<dyn ProjectionStore>,
}

impl MissionCreatedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
		Self { store }
	}
}

#[async_trait::async_trait]
impl EventHandler for MissionCreatedHandler {
	fn kind(&self) -> EventKind {
		EventKind::MissionCreated
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::MissionCreated(mission) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};

		if self.store.find_mission(mission.mission_id).await?.is_some() {
			return Ok(HandleOutcome::Skipped(format!(
				"mission {} already in catalog",
				mission.mission_id
			)));
		}

		let row = Mission {
			mission_id: mission.mission_id,
			title: mission.title.clone(),
			description: mission.description.clone(),
			mission_type: mission.mission_type.clone(),
			reward_amount: mission.reward_amount.clone(),
			required_count: mission.required_count,
			active: mission.active,
			created_at: event.timestamp,
		};
		insert_outcome(self.store.insert_mission(row).await)
	}
}

/// Marks a user's mission progress as completed.
pub struct MissionCompletedHandler {
	store: Arc<dyn ProjectionStore>,
}

impl MissionCompletedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
		Self { store }
	}
}

#[async_trait::async_trait]
impl EventHandler for MissionCompletedHandler {
	fn kind(&self) -> EventKind {
		EventKind::MissionCompleted
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::MissionCompleted(completed) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};

		let mut progress = match self
			.store
			.find_mission_progress(&completed.user_id, completed.mission_id)
			.await?
		{
			Some(progress) if progress.completed => {
				return Ok(HandleOutcome::Skipped(format!(
					"mission {} already completed by {}",
					completed.mission_id, completed.user_id
				)));
			}
			Some(progress) => progress,
			None => UserMissionProgress::new(completed.user_id.clone(), completed.mission_id),
		};

		progress.current_count = completed.current_count;
		progress.completed = true;
		progress.completed_at = Some(event.timestamp);
		self.store.upsert_mission_progress(progress).await?;
		Ok(HandleOutcome::Applied)
	}
}

/// Marks a user's mission reward as claimed.
pub struct RewardClaimedHandler {
	store: Arc<dyn ProjectionStore>,
}

impl RewardClaimedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
		Self { store }
	}
}

#[async_trait::async_trait]
impl EventHandler for RewardClaimedHandler {
	fn kind(&self) -> EventKind {
		EventKind::RewardClaimed
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::RewardClaimed(claim) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};

		let mut progress = match self
			.store
			.find_mission_progress(&claim.user_id, claim.mission_id)
			.await?
		{
			Some(progress) if progress.claimed => {
				return Ok(HandleOutcome::Skipped(format!(
					"mission {} reward already claimed by {}",
					claim.mission_id, claim.user_id
				)));
			}
			Some(progress) => progress,
			None => UserMissionProgress::new(claim.user_id.clone(), claim.mission_id),
		};

		// A claim implies completion, even if the completion event was missed
		if !progress.completed {
			progress.completed = true;
			progress.completed_at = Some(event.timestamp);
		}
		progress.claimed = true;
		progress.claimed_at = Some(event.timestamp);
		self.store.upsert_mission_progress(progress).await?;
		Ok(HandleOutcome::Applied)
	}
}

/// Appends a [`crate::projection::CashbackGrant`].
///
/// Grants carry no natural key, so replays append again unless
/// `dedupe` is set, in which case a grant already recorded at the same
/// ledger position (user, transaction hash, event index) is skipped.
pub struct CashbackGrantedHandler {
	store: Arc<dyn ProjectionStore>,
	dedupe: bool,
}

impl CashbackGrantedHandler {
	pub fn new(store: Arc<dyn ProjectionStore>, dedupe: bool) -> Self {
		Self { store, dedupe }
	}
}

#[async_trait::async_trait]
impl EventHandler for CashbackGrantedHandler {
	fn kind(&self) -> EventKind {
		EventKind::CashbackGranted
	}

	async fn handle(&self, event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
		let EventPayload::CashbackGranted(grant) = &event.payload else {
			return Err(unexpected_payload(self.kind(), event));
		};
		let position = require_position(event)?;

		if self.dedupe
			&& self
				.store
				.find_cashback_grant(&grant.user_id, &position.transaction_hash, position.event_index)
				.await?
				.is_some()
		{
			return Ok(HandleOutcome::Skipped(format!(
				"cashback for {} at {}#{} already granted",
				grant.user_id, position.transaction_hash, position.event_index
			)));
		}

		self.store
			.insert_cashback_grant(NewCashbackGrant {
				user_id: grant.user_id.clone(),
				order_id: grant.order_id,
				order_amount: grant.order_amount.clone(),
				cashback_amount: grant.cashback_amount.clone(),
				transaction_hash: position.transaction_hash.clone(),
				block_number: position.block_number,
				event_index: position.event_index,
				granted_at: event.timestamp,
			})
			.await?;
		Ok(HandleOutcome::Applied)
	}
}
