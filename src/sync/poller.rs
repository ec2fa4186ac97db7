//! Reconciliation polling.
//!
//! Push delivery of some resources (the mission catalog) is unreliable, so the
//! poller pulls their full current value on a fixed timer and replays every
//! item through the same handlers the subscription uses. Handlers are
//! idempotent, so already-projected items are skipped.

use super::router::EventRouter;
use super::stats::StatsTracker;
use crate::config::PollerConfig;
use crate::ledger::LedgerClient;

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every resource was queried; `events` items were routed.
    Completed { events: usize },
    /// At least one resource query failed; the others were still routed.
    Failed { events: usize },
    /// Another tick was still in flight.
    Skipped,
    /// The poller was stopped between items; `events` items were routed.
    Cancelled { events: usize },
}

#[derive(Default)]
struct PollerTask {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

pub struct ReconciliationPoller {
    ledger: Arc<dyn LedgerClient>,
    router: Arc<EventRouter>,
    stats: Arc<StatsTracker>,
    config: PollerConfig,
    in_flight: AtomicBool,
    task: Mutex<PollerTask>,
}

/// Clears the in-flight flag when a tick ends, including on cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReconciliationPoller {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        router: Arc<EventRouter>,
        stats: Arc<StatsTracker>,
        config: PollerConfig,
    ) -> Self {
        Self {
            ledger,
            router,
            stats,
            config,
            in_flight: AtomicBool::new(false),
            task: Mutex::new(PollerTask::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().handle.is_some()
    }

    /// Spawn the polling timer. No-op when disabled or already running.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Reconciliation poller disabled");
            return;
        }

        let mut task = self.task.lock();
        if task.handle.is_some() {
            warn!("Reconciliation poller already running, ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        task.handle = Some(tokio::spawn(self.clone().run(cancel.clone())));
        task.cancel = Some(cancel);
        info!(
            "Reconciliation poller started: {:?} every {}s",
            self.config.resources, self.config.poll_interval_secs
        );
    }

    /// Cancel the timer, then wait for the task. A tick in flight finishes
    /// the item it is routing and stops before the next one.
    pub async fn stop(&self) {
        let (cancel, handle) = {
            let mut task = self.task.lock();
            (task.cancel.take(), task.handle.take())
        };
        let Some(handle) = handle else {
            return;
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!("Reconciliation poller task panicked: {}", e);
            }
        }
        info!("Reconciliation poller stopped");
    }

    /// Run one reconciliation tick now.
    ///
    /// A failing resource query is counted and logged; the remaining
    /// resources are still polled. Returns `Skipped` if a tick is already
    /// running.
    pub async fn poll_once(&self) -> PollOutcome {
        self.reconcile(&CancellationToken::new()).await
    }

    async fn reconcile(&self, cancel: &CancellationToken) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconciliation tick still in flight, skipping");
            return PollOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        let mut events = 0;
        let mut failed = false;
        for resource in &self.config.resources {
            let result = tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled { events },
                result = self.ledger.query_state(*resource) => result,
            };
            match result {
                Ok(snapshot) => {
                    debug!("Reconciling {} ({} items)", resource, snapshot.len());
                    for event in snapshot.into_events() {
                        if cancel.is_cancelled() {
                            return PollOutcome::Cancelled { events };
                        }
                        self.router.dispatch(&event).await;
                        events += 1;
                    }
                }
                Err(e) => {
                    failed = true;
                    self.stats.record_error();
                    error!("Reconciliation query for {} failed: {}", resource, e);
                }
            }
        }

        if failed {
            PollOutcome::Failed { events }
        } else {
            self.stats.record_poll(Utc::now());
            PollOutcome::Completed { events }
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let PollOutcome::Cancelled { events } = self.reconcile(&cancel).await {
                debug!("Reconciliation tick stopped after {} items", events);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MissionCreated, MockLedgerClient, StateResource, StateSnapshot};
    use crate::projection::{MemoryProjectionStore, ProjectionStore};
    use crate::ledger::{EventKind, LedgerEvent};
    use crate::sync::handlers::{EventHandler, MissionCreatedHandler};
    use crate::sync::types::{HandleOutcome, SyncError};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Takes five seconds per mission and counts the ones it finished.
    struct SlowMissionHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl EventHandler for SlowMissionHandler {
        fn kind(&self) -> EventKind {
            EventKind::MissionCreated
        }

        async fn handle(&self, _event: &LedgerEvent) -> Result<HandleOutcome, SyncError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(HandleOutcome::Applied)
        }
    }

    fn mission(mission_id: u64) -> MissionCreated {
        MissionCreated {
            mission_id,
            title: format!("Mission {}", mission_id),
            description: String::new(),
            mission_type: "REFERRAL".into(),
            reward_amount: "100".into(),
            required_count: 3,
            active: true,
        }
    }

    fn poller(
        ledger: Arc<MockLedgerClient>,
        store: Arc<MemoryProjectionStore>,
    ) -> (Arc<ReconciliationPoller>, Arc<StatsTracker>) {
        let stats = Arc::new(StatsTracker::new());
        let mut router = EventRouter::new(stats.clone());
        let store: Arc<dyn ProjectionStore> = store;
        router.register_handler(Arc::new(MissionCreatedHandler::new(store)));
        let poller = Arc::new(ReconciliationPoller::new(
            ledger,
            Arc::new(router),
            stats.clone(),
            PollerConfig::default(),
        ));
        (poller, stats)
    }

    #[tokio::test]
    async fn poll_routes_snapshot_items_idempotently() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.set_snapshot(
            StateResource::ActiveMissions,
            StateSnapshot::Missions(vec![mission(1), mission(2)]),
        );
        let store = Arc::new(MemoryProjectionStore::new());
        let (poller, stats) = poller(ledger, store.clone());

        assert_eq!(poller.poll_once().await, PollOutcome::Completed { events: 2 });
        assert_eq!(poller.poll_once().await, PollOutcome::Completed { events: 2 });

        let snapshot = stats.get_stats();
        assert_eq!(store.missions().len(), 2);
        assert_eq!(snapshot.missions_created, 2);
        assert_eq!(snapshot.events_skipped, 2);
        assert_eq!(snapshot.polls_completed, 2);
        assert!(snapshot.last_poll.is_some());
    }

    #[tokio::test]
    async fn failed_query_is_counted() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.fail_queries(Some("indexer unavailable"));
        let (poller, stats) = poller(ledger, Arc::new(MemoryProjectionStore::new()));

        assert_eq!(poller.poll_once().await, PollOutcome::Failed { events: 0 });
        let snapshot = stats.get_stats();
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.polls_completed, 0);
        assert!(snapshot.last_poll.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_tick_is_skipped() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.set_snapshot(
            StateResource::ActiveMissions,
            StateSnapshot::Missions(vec![mission(1)]),
        );
        ledger.set_query_delay(Some(Duration::from_secs(30)));
        let (poller, _) = poller(ledger.clone(), Arc::new(MemoryProjectionStore::new()));

        let slow = tokio::spawn({
            let poller = poller.clone();
            async move { poller.poll_once().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(poller.poll_once().await, PollOutcome::Skipped);
        assert_eq!(slow.await.unwrap(), PollOutcome::Completed { events: 1 });
        assert_eq!(ledger.query_calls(), 1);

        // The flag is released once the slow tick finishes
        ledger.set_query_delay(None);
        assert_eq!(poller.poll_once().await, PollOutcome::Completed { events: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn timer_keeps_running_after_failures() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.fail_queries(Some("boom"));
        let (poller, stats) = poller(ledger.clone(), Arc::new(MemoryProjectionStore::new()));

        poller.start();
        assert!(poller.is_running());
        tokio::time::sleep(Duration::from_secs(25)).await;

        // Ticks at 0s, 10s and 20s
        assert_eq!(ledger.query_calls(), 3);
        assert_eq!(stats.get_stats().errors, 3);

        poller.stop().await;
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ledger.query_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_finishes_the_item_in_flight_and_skips_the_rest() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.set_snapshot(
            StateResource::ActiveMissions,
            StateSnapshot::Missions(vec![mission(1), mission(2), mission(3)]),
        );
        let stats = Arc::new(StatsTracker::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new(stats.clone());
        router.register_handler(Arc::new(SlowMissionHandler(finished.clone())));
        let poller = Arc::new(ReconciliationPoller::new(
            ledger,
            Arc::new(router),
            stats.clone(),
            PollerConfig::default(),
        ));

        poller.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(stats.get_stats().missions_created, 1);
        assert_eq!(stats.get_stats().polls_completed, 0);

        // The in-flight guard was released
        assert!(matches!(poller.poll_once().await, PollOutcome::Completed { events: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_a_pending_query() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.set_snapshot(
            StateResource::ActiveMissions,
            StateSnapshot::Missions(vec![mission(1)]),
        );
        ledger.set_query_delay(Some(Duration::from_secs(30)));
        let store = Arc::new(MemoryProjectionStore::new());
        let (poller, stats) = poller(ledger, store.clone());

        poller.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(store.missions().is_empty());
        assert_eq!(stats.get_stats().polls_completed, 0);
    }

    #[tokio::test]
    async fn disabled_poller_never_starts() {
        let ledger = Arc::new(MockLedgerClient::new());
        let stats = Arc::new(StatsTracker::new());
        let poller = Arc::new(ReconciliationPoller::new(
            ledger.clone(),
            Arc::new(EventRouter::new(stats.clone())),
            stats,
            PollerConfig {
                enabled: false,
                ..PollerConfig::default()
            },
        ));
        poller.start();
        assert!(!poller.is_running());
        poller.stop().await;
        assert_eq!(ledger.query_calls(), 0);
    }
}
