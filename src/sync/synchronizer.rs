//! Ledger synchronizer and integration point for all sync services.
//!
//! This module defines the `Synchronizer`, which composes every component
//! involved in keeping the projection in step with the ledger:
//! - the handler set, wired into an `EventRouter`
//! - the `ConnectionManager` (subscription, heartbeat, reconnect backoff)
//! - the `ReconciliationPoller` (periodic full-state pulls)
//! - the shared `StatsTracker`
//!
//! The ledger client and projection store are injected, so the same
//! synchronizer runs against the GraphQL adapter in production and against
//! `MockLedgerClient` in tests.

use super::connection::ConnectionManager;
use super::handlers::default_handlers;
use super::poller::{PollOutcome, ReconciliationPoller};
use super::router::EventRouter;
use super::stats::{StatsTracker, SyncStats};
use crate::config::{ConfigError, SynchronizerConfig};
use crate::ledger::LedgerClient;
use crate::projection::ProjectionStore;

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Main synchronizer that coordinates all sync components.
pub struct Synchronizer {
    connection: Arc<ConnectionManager>,
    poller: Arc<ReconciliationPoller>,
    stats: Arc<StatsTracker>,
    running: Mutex<bool>,
}

impl Synchronizer {
    /// Wire the default handler set against `store` and build the connection
    /// manager and poller around `ledger`.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if `config` fails validation.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn ProjectionStore>,
        config: SynchronizerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let stats = Arc::new(StatsTracker::new());

        let mut router = EventRouter::new(stats.clone());
        for handler in default_handlers(store, &config.handlers) {
            router.register_handler(handler);
        }
        let router = Arc::new(router);

        let connection = Arc::new(ConnectionManager::new(
            ledger.clone(),
            router.clone(),
            stats.clone(),
            config.connection,
        ));
        let poller = Arc::new(ReconciliationPoller::new(
            ledger,
            router,
            stats.clone(),
            config.poller,
        ));

        Ok(Self {
            connection,
            poller,
            stats,
            running: Mutex::new(false),
        })
    }

    /// Start synchronization.
    ///
    /// Subscribes to the ledger and starts the heartbeat and poll timers.
    /// A second call while running logs a warning and does nothing.
    pub async fn start(&self) {
        {
            let mut running = self.running.lock();
            if *running {
                warn!("Synchronizer already running, ignoring start");
                return;
            }
            *running = true;
        }

        info!("Starting ledger synchronizer");
        self.connection.start().await;
        self.poller.start();
    }

    /// Stop every task and release the subscription. Safe if never started.
    pub async fn stop(&self) {
        {
            let mut running = self.running.lock();
            if !*running {
                return;
            }
            *running = false;
        }

        info!("Stopping ledger synchronizer");
        self.poller.stop().await;
        self.connection.stop().await;
        info!("{}", self.stats.get_stats().summary());
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Copy of the current counters and connection status.
    pub fn get_stats(&self) -> SyncStats {
        self.stats.get_stats()
    }

    /// Zero every counter; connection state is left untouched.
    pub fn reset_stats(&self) {
        self.stats.reset();
        info!("Synchronizer statistics reset");
    }

    /// Run one reconciliation tick immediately, sharing the timer's
    /// in-flight guard.
    pub async fn reconcile_now(&self) -> PollOutcome {
        self.poller.poll_once().await
    }
}
