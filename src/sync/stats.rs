//! Counters and timestamps for the synchronizer.
//!
//! The `StatsTracker` is shared by the event pump, the heartbeat and the
//! reconciliation poller. Every mutation goes through a single mutex so a
//! `get_stats()` call always sees a consistent copy.

use super::types::ConnectionStatus;
use crate::ledger::EventKind;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Service for tracking synchronization counters
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: Mutex<SyncStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful projection write for `kind`.
    pub fn record_applied(&self, kind: EventKind, at: DateTime<Utc>) {
        let mut stats = self.inner.lock();
        *stats.counter_mut(kind) += 1;
        stats.last_event = Some(at);
    }

    /// Record an event that was already projected.
    pub fn record_skipped(&self, at: DateTime<Utc>) {
        let mut stats = self.inner.lock();
        stats.events_skipped += 1;
        stats.last_event = Some(at);
    }

    /// Record an event dropped on a correlation miss.
    pub fn record_dropped(&self, at: DateTime<Utc>) {
        let mut stats = self.inner.lock();
        stats.events_dropped += 1;
        stats.last_event = Some(at);
    }

    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    pub fn record_heartbeat(&self, at: DateTime<Utc>) {
        self.inner.lock().last_heartbeat = Some(at);
    }

    /// Record a reconciliation tick that finished without error.
    pub fn record_poll(&self, at: DateTime<Utc>) {
        let mut stats = self.inner.lock();
        stats.polls_completed += 1;
        stats.last_poll = Some(at);
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.inner.lock().connection_status = status;
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.lock().connection_status
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.inner.lock().reconnect_attempts = attempts;
    }

    /// Get a copy of the current statistics
    pub fn get_stats(&self) -> SyncStats {
        self.inner.lock().clone()
    }

    /// Zero every counter and timestamp.
    ///
    /// Connection state (`connection_status`, `reconnect_attempts`) belongs to
    /// the connection manager and is left as is.
    pub fn reset(&self) {
        let mut stats = self.inner.lock();
        *stats = SyncStats {
            connection_status: stats.connection_status,
            reconnect_attempts: stats.reconnect_attempts,
            ..SyncStats::default()
        };
    }
}

/// Statistics about the synchronizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub orders_created: u64,
    pub proofs_submitted: u64,
    pub disputes_opened: u64,
    pub escrows_locked: u64,
    pub escrows_released: u64,
    pub escrows_refunded: u64,
    pub missions_created: u64,
    pub missions_completed: u64,
    pub rewards_claimed: u64,
    pub cashback_granted: u64,
    /// Handler failures, undecodable frames and failed poll queries.
    pub errors: u64,
    pub events_skipped: u64,
    pub events_dropped: u64,
    pub polls_completed: u64,
    /// Consecutive reconnect attempts since the last successful subscribe.
    pub reconnect_attempts: u32,
    pub last_event: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_poll: Option<DateTime<Utc>>,
    pub connection_status: ConnectionStatus,
}

impl SyncStats {
    /// Success counter for one event kind
    pub fn count_for(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::OrderCreated => self.orders_created,
            EventKind::ProofSubmitted => self.proofs_submitted,
            EventKind::DisputeOpened => self.disputes_opened,
            EventKind::EscrowLocked => self.escrows_locked,
            EventKind::EscrowReleased => self.escrows_released,
            EventKind::EscrowRefunded => self.escrows_refunded,
            EventKind::MissionCreated => self.missions_created,
            EventKind::MissionCompleted => self.missions_completed,
            EventKind::RewardClaimed => self.rewards_claimed,
            EventKind::CashbackGranted => self.cashback_granted,
        }
    }

    /// Sum of all per-kind success counters
    pub fn applied_total(&self) -> u64 {
        EventKind::ALL.iter().map(|kind| self.count_for(*kind)).sum()
    }

    fn counter_mut(&mut self, kind: EventKind) -> &mut u64 {
        match kind {
            EventKind::OrderCreated => &mut self.orders_created,
            EventKind::ProofSubmitted => &mut self.proofs_submitted,
            EventKind::DisputeOpened => &mut self.disputes_opened,
            EventKind::EscrowLocked => &mut self.escrows_locked,
            EventKind::EscrowReleased => &mut self.escrows_released,
            EventKind::EscrowRefunded => &mut self.escrows_refunded,
            EventKind::MissionCreated => &mut self.missions_created,
            EventKind::MissionCompleted => &mut self.missions_completed,
            EventKind::RewardClaimed => &mut self.rewards_claimed,
            EventKind::CashbackGranted => &mut self.cashback_granted,
        }
    }

    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Ledger sync {}: {} events applied ({} orders, {} proofs, {} disputes, {} escrow, {} mission, {} cashback), {} skipped, {} dropped, {} errors, {} polls{}",
            self.connection_status,
            self.applied_total(),
            self.orders_created,
            self.proofs_submitted,
            self.disputes_opened,
            self.escrows_locked + self.escrows_released + self.escrows_refunded,
            self.missions_created + self.missions_completed + self.rewards_claimed,
            self.cashback_granted,
            self.events_skipped,
            self.events_dropped,
            self.errors,
            self.polls_completed,
            if self.reconnect_attempts == 0 {
                String::new()
            } else {
                format!(" ({} reconnect attempts)", self.reconnect_attempts)
            }
        )
    }
}
