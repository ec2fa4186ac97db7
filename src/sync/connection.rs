//! Ledger subscription lifecycle.
//!
//! The `ConnectionManager` is the only component that subscribes to the
//! ledger. It runs two tasks:
//!
//! - a **session** task that owns the event stream, pumps events into the
//!   router, and on loss of the stream reconnects with backoff until
//!   `max_reconnect_attempts` is exceeded;
//! - a **heartbeat** task that probes `is_connected()` on a fixed period,
//!   forces a resubscribe when a connected ledger stops answering, and emits
//!   a heartbeat record with the current counters.
//!
//! `stop()` cancels both tasks, waits for them, and drops the subscription
//! before returning.

use super::router::EventRouter;
use super::stats::StatsTracker;
use super::types::ConnectionStatus;
use crate::config::ConnectionConfig;
use crate::ledger::{EventFilter, EventStream, LedgerClient};

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct ConnectionState {
    running: bool,
    /// Consecutive failed reconnect attempts.
    attempts: u32,
    /// Set once attempts exceed the configured maximum; cleared by `start()`.
    exhausted: bool,
    cancel: CancellationToken,
    /// Cancels the current subscription only, forcing a resubscribe.
    subscription: Option<CancellationToken>,
    session_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

/// Why the pump stopped reading the stream.
enum PumpExit {
    Stopped,
    StreamEnded,
    HeartbeatLost,
}

pub struct ConnectionManager {
    ledger: Arc<dyn LedgerClient>,
    router: Arc<EventRouter>,
    stats: Arc<StatsTracker>,
    config: ConnectionConfig,
    filter: EventFilter,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        router: Arc<EventRouter>,
        stats: Arc<StatsTracker>,
        config: ConnectionConfig,
    ) -> Self {
        let filter = router.filter();
        Self {
            ledger,
            router,
            stats,
            config,
            filter,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Subscribe and start the session and heartbeat tasks.
    ///
    /// A failed first subscribe is not an error: the session task retries
    /// with backoff. Calling `start()` while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let cancel = {
            let mut state = self.state.lock();
            if state.running {
                warn!("Ledger connection manager already running, ignoring start");
                return;
            }
            state.running = true;
            state.attempts = 0;
            state.exhausted = false;
            state.cancel = CancellationToken::new();
            state.cancel.clone()
        };
        self.stats.set_reconnect_attempts(0);

        info!(
            "Subscribing to {} ledger event kinds",
            self.filter.kinds.len()
        );
        let initial = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.ledger.subscribe(&self.filter) => result,
        };
        let stream = match initial {
            Ok(events) => {
                let subscription = self.attach(&cancel);
                Some((events, subscription))
            }
            Err(e) => {
                warn!("Ledger subscription failed: {}", e);
                self.stats.set_connection_status(ConnectionStatus::Disconnected);
                None
            }
        };

        let session = tokio::spawn(self.clone().run_session(cancel.clone(), stream));
        let heartbeat = tokio::spawn(self.clone().run_heartbeat(cancel.clone()));

        let mut state = self.state.lock();
        if cancel.is_cancelled() {
            // stop() raced with start(); the tasks exit on their own
            return;
        }
        state.session_task = Some(session);
        state.heartbeat_task = Some(heartbeat);
    }

    /// Cancel every task and release the subscription. Safe if never started.
    pub async fn stop(&self) {
        let tasks = {
            let mut state = self.state.lock();
            if !state.running {
                debug!("Ledger connection manager not running, nothing to stop");
                return;
            }
            state.running = false;
            state.cancel.cancel();
            state.subscription = None;
            [state.session_task.take(), state.heartbeat_task.take()]
        };

        for task in tasks.into_iter().flatten() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Ledger connection task panicked: {}", e);
                }
            }
        }

        self.stats.set_connection_status(ConnectionStatus::Disconnected);
        info!("Ledger connection manager stopped");
    }

    /// Probe the ledger once and reconcile the connection status.
    pub async fn heartbeat(&self) {
        let healthy = self.ledger.is_connected().await;
        let status = self.stats.connection_status();

        match (status, healthy) {
            (ConnectionStatus::Connected, false) => {
                warn!("Heartbeat: ledger connection lost");
                self.stats.set_connection_status(ConnectionStatus::Disconnected);
                if let Some(subscription) = self.state.lock().subscription.take() {
                    subscription.cancel();
                }
            }
            (ConnectionStatus::Disconnected | ConnectionStatus::Reconnecting, true) => {
                let mut state = self.state.lock();
                if state.exhausted {
                    debug!("Heartbeat: ledger reachable but reconnects are exhausted");
                } else {
                    state.attempts = 0;
                    drop(state);
                    info!("Heartbeat: ledger connection restored");
                    self.stats.set_reconnect_attempts(0);
                    self.stats.set_connection_status(ConnectionStatus::Connected);
                }
            }
            _ => {}
        }

        self.stats.record_heartbeat(Utc::now());
        let stats = self.stats.get_stats();
        info!(
            status = %stats.connection_status,
            applied = stats.applied_total(),
            orders_created = stats.orders_created,
            proofs_submitted = stats.proofs_submitted,
            disputes_opened = stats.disputes_opened,
            escrows_locked = stats.escrows_locked,
            escrows_released = stats.escrows_released,
            escrows_refunded = stats.escrows_refunded,
            missions_created = stats.missions_created,
            missions_completed = stats.missions_completed,
            rewards_claimed = stats.rewards_claimed,
            cashback_granted = stats.cashback_granted,
            skipped = stats.events_skipped,
            dropped = stats.events_dropped,
            errors = stats.errors,
            "Heartbeat"
        );
    }

    /// Register a fresh subscription token and mark the connection up.
    ///
    /// The token is stored before the status flips to Connected, so a
    /// heartbeat that observes Connected always finds a subscription to cancel.
    fn attach(&self, cancel: &CancellationToken) -> CancellationToken {
        let subscription = cancel.child_token();
        {
            let mut state = self.state.lock();
            state.attempts = 0;
            state.subscription = Some(subscription.clone());
            self.stats.set_reconnect_attempts(0);
            self.stats.set_connection_status(ConnectionStatus::Connected);
        }
        info!("Ledger subscription established");
        subscription
    }

    async fn run_session(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut stream: Option<(EventStream, CancellationToken)>,
    ) {
        loop {
            if let Some((events, subscription)) = stream.take() {
                match self.pump(events, &subscription, &cancel).await {
                    PumpExit::Stopped => return,
                    PumpExit::StreamEnded => {
                        warn!("Ledger event stream ended");
                        self.stats.set_connection_status(ConnectionStatus::Disconnected);
                    }
                    PumpExit::HeartbeatLost => {
                        info!("Dropping unresponsive ledger subscription");
                    }
                }
                self.state.lock().subscription = None;
            }

            let attempt = {
                let mut state = self.state.lock();
                state.attempts += 1;
                if state.attempts > self.config.max_reconnect_attempts {
                    state.exhausted = true;
                }
                state.attempts
            };
            self.stats.set_reconnect_attempts(attempt);

            if attempt > self.config.max_reconnect_attempts {
                self.stats.set_connection_status(ConnectionStatus::Disconnected);
                error!(
                    "Giving up on ledger subscription after {} reconnect attempts",
                    self.config.max_reconnect_attempts
                );
                return;
            }

            let delay = self.config.reconnect_delay(attempt);
            self.stats.set_connection_status(ConnectionStatus::Reconnecting);
            info!(
                "Reconnecting to ledger in {:?} (attempt {}/{})",
                delay, attempt, self.config.max_reconnect_attempts
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.ledger.subscribe(&self.filter) => result,
            };
            match result {
                Ok(events) => {
                    let subscription = self.attach(&cancel);
                    stream = Some((events, subscription));
                }
                Err(e) => {
                    warn!("Ledger reconnect attempt {} failed: {}", attempt, e);
                    self.stats.set_connection_status(ConnectionStatus::Disconnected);
                }
            }
        }
    }

    /// Feed the stream into the router. The event in flight always finishes
    /// before cancellation is observed.
    async fn pump(
        &self,
        mut events: EventStream,
        subscription: &CancellationToken,
        cancel: &CancellationToken,
    ) -> PumpExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = subscription.cancelled() => {
                    return if cancel.is_cancelled() {
                        PumpExit::Stopped
                    } else {
                        PumpExit::HeartbeatLost
                    };
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    self.router.dispatch(&event).await;
                }
                Some(Err(e)) if e.is_transport() => {
                    self.router.record_stream_error(&e);
                    return PumpExit::StreamEnded;
                }
                Some(Err(e)) => self.router.record_stream_error(&e),
                None => return PumpExit::StreamEnded,
            }
        }
    }

    async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.heartbeat().await,
            }
        }
    }
}
