//! Ledger Synchronization Module
//!
//! This module provides the core logic for keeping the projection in step with the ledger.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `synchronizer`: The main entry point; wires together every service below.
//! - `connection`: Subscription lifecycle, heartbeat, and reconnect backoff.
//! - `poller`: Periodic reconciliation of resources whose push delivery is unreliable.
//! - `router`: Routes decoded events to their handler and is the error boundary for handling.
//! - `handlers`: Idempotent projection writers, one per event kind.
//! - `stats`: Counters, timestamps, and connection status shared by all tasks.

/// Subscription lifecycle with heartbeat and reconnect backoff
pub mod connection;
/// Idempotent projection writers
pub mod handlers;
/// Reconciliation polling of full ledger state
pub mod poller;
/// Event routing and outcome accounting
pub mod router;
/// Shared synchronization statistics
pub mod stats;
/// Main coordinator for the synchronizer
pub mod synchronizer;
mod types;

pub use connection::ConnectionManager;
pub use handlers::EventHandler;
pub use poller::{PollOutcome, ReconciliationPoller};
pub use router::{DispatchStatus, EventRouter};
pub use stats::{StatsTracker, SyncStats};
pub use synchronizer::Synchronizer;
pub use types::*;
