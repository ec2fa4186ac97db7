//! End-to-end synchronizer scenarios against the in-process mock ledger.
//!
//! Every test runs with a paused clock so heartbeats, reconnect backoff and
//! poll ticks are driven deterministically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ledger_projection_sync::config::{
    BackoffStrategy, ConnectionConfig, HandlerConfig, PollerConfig, SynchronizerConfig,
};
use ledger_projection_sync::ledger::{
    CashbackGranted, ChainPosition, DecodeError, DisputeOpened, EscrowTransition, EventKind,
    EventPayload, LedgerError, LedgerEvent, MissionCreated, MockLedgerClient, OrderCreated,
    ProofSubmitted, StateResource, StateSnapshot,
};
use ledger_projection_sync::projection::{
    ChainOrderStatus, EscrowLogKind, EscrowStatus, MemoryProjectionStore, ProjectionStore,
};
use ledger_projection_sync::sync::{ConnectionStatus, PollOutcome, Synchronizer};

struct Harness {
    ledger: Arc<MockLedgerClient>,
    store: Arc<MemoryProjectionStore>,
    sync: Arc<Synchronizer>,
}

fn config() -> SynchronizerConfig {
    SynchronizerConfig {
        connection: ConnectionConfig::default(),
        poller: PollerConfig {
            enabled: false,
            ..PollerConfig::default()
        },
        handlers: HandlerConfig::default(),
    }
}

fn harness(config: SynchronizerConfig) -> Harness {
    let ledger = Arc::new(MockLedgerClient::new());
    let store = Arc::new(MemoryProjectionStore::new());
    let sync = Arc::new(Synchronizer::new(ledger.clone(), store.clone(), config).unwrap());
    Harness {
        ledger,
        store,
        sync,
    }
}

/// Let spawned tasks drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn event(block: u64, index: u32, payload: EventPayload) -> LedgerEvent {
    LedgerEvent::from_chain(
        ChainPosition {
            block_number: block,
            event_index: index,
            transaction_hash: format!("0x{:064x}", block * 100 + index as u64),
        },
        Utc.timestamp_opt(1_700_000_000 + block as i64, 0).single().unwrap(),
        payload,
    )
}

fn order_created(order_id: u64) -> LedgerEvent {
    event(
        1,
        0,
        EventPayload::OrderCreated(OrderCreated {
            order_id,
            buyer: "B".into(),
            seller: "S".into(),
            marketplace_id: 1,
            total_amount: "1000000000000".into(),
        }),
    )
}

fn escrow_locked(external_order_id: &str) -> LedgerEvent {
    event(
        4,
        0,
        EventPayload::EscrowLocked(EscrowTransition {
            external_order_id: external_order_id.into(),
            buyer: "B".into(),
            seller: "S".into(),
            amount: "42000".into(),
        }),
    )
}

fn mission(mission_id: u64) -> MissionCreated {
    MissionCreated {
        mission_id,
        title: "Invite a friend".into(),
        description: "Refer one new buyer".into(),
        mission_type: "REFERRAL".into(),
        reward_amount: "250".into(),
        required_count: 1,
        active: true,
    }
}

#[tokio::test(start_paused = true)]
async fn order_created_is_projected_once() {
    let h = harness(config());
    h.sync.start().await;

    assert!(h.ledger.emit(order_created(1)));
    settle().await;

    let orders = h.store.chain_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_id, 1);
    assert_eq!(orders[0].buyer, "B");
    assert_eq!(orders[0].seller, "S");
    assert_eq!(orders[0].total_amount, "1000000000000");
    assert_eq!(orders[0].status, ChainOrderStatus::Created);
    assert_eq!(h.sync.get_stats().orders_created, 1);

    // Replay
    assert!(h.ledger.emit(order_created(1)));
    settle().await;

    assert_eq!(h.store.chain_orders().len(), 1);
    let stats = h.sync.get_stats();
    assert_eq!(stats.orders_created, 1);
    assert_eq!(stats.events_skipped, 1);
    assert_eq!(stats.errors, 0);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn subscription_filter_covers_every_kind() {
    let h = harness(config());
    h.sync.start().await;

    let filter = h.ledger.last_filter().unwrap();
    assert_eq!(filter.kinds, EventKind::ALL.to_vec());

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn proof_and_dispute_cascade_order_status() {
    let h = harness(config());
    h.sync.start().await;

    h.ledger.emit(order_created(7));
    h.ledger.emit(event(
        2,
        0,
        EventPayload::ProofSubmitted(ProofSubmitted {
            order_id: 7,
            proof_cid: "bafyproof".into(),
            attestor: "A".into(),
        }),
    ));
    settle().await;
    assert_eq!(h.store.chain_orders()[0].status, ChainOrderStatus::ProofSubmitted);

    let dispute = event(
        3,
        0,
        EventPayload::DisputeOpened(DisputeOpened {
            dispute_id: 70,
            order_id: 7,
            plaintiff: "B".into(),
            defendant: "S".into(),
        }),
    );
    h.ledger.emit(dispute.clone());
    h.ledger.emit(dispute);
    settle().await;

    assert_eq!(h.store.chain_orders()[0].status, ChainOrderStatus::Disputed);
    assert_eq!(h.store.disputes().len(), 1);
    let stats = h.sync.get_stats();
    assert_eq!(stats.proofs_submitted, 1);
    assert_eq!(stats.disputes_opened, 1);
    assert_eq!(stats.events_skipped, 1);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn handler_failure_does_not_stop_ingestion() {
    let h = harness(config());
    h.sync.start().await;

    // Proof for an order the projection has never seen
    h.ledger.emit(event(
        2,
        0,
        EventPayload::ProofSubmitted(ProofSubmitted {
            order_id: 404,
            proof_cid: "bafy".into(),
            attestor: "A".into(),
        }),
    ));
    h.ledger.emit_error(LedgerError::DecodeError(DecodeError::UnknownKind(
        "Transfer".into(),
    )));
    h.ledger.emit(order_created(1));
    settle().await;

    let stats = h.sync.get_stats();
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.orders_created, 1);
    assert_eq!(stats.connection_status, ConnectionStatus::Connected);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn escrow_events_correlate_by_external_id() {
    let h = harness(config());
    h.sync.start().await;

    // Unknown external id: dropped with a warning, not an error
    h.ledger.emit(escrow_locked("ext-unknown"));
    settle().await;
    assert!(h.store.all_escrow_logs().is_empty());
    let stats = h.sync.get_stats();
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.events_dropped, 1);
    assert_eq!(stats.escrows_locked, 0);

    let order = h.store.insert_commerce_order("ext-1").unwrap();
    h.ledger.emit(escrow_locked("ext-1"));
    h.ledger.emit(escrow_locked("ext-1"));
    settle().await;

    let found = h.store.find_commerce_order("ext-1").await.unwrap().unwrap();
    assert_eq!(found.escrow_status, Some(EscrowStatus::Escrowed));
    let logs = h.store.escrow_logs(order.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, EscrowLogKind::Lock);
    assert_eq!(logs[0].payload.amount, "42000");
    assert_eq!(h.sync.get_stats().escrows_locked, 1);

    h.sync.stop().await;
}

fn cashback() -> LedgerEvent {
    event(
        9,
        1,
        EventPayload::CashbackGranted(CashbackGranted {
            user_id: "U".into(),
            order_id: 1,
            order_amount: "1000".into(),
            cashback_amount: "20".into(),
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn cashback_replay_is_not_deduplicated_by_default() {
    let h = harness(config());
    h.sync.start().await;

    h.ledger.emit(cashback());
    h.ledger.emit(cashback());
    settle().await;

    // Known gap: grants have no natural key
    assert_eq!(h.store.all_cashback_grants().len(), 2);
    assert_eq!(h.sync.get_stats().cashback_granted, 2);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cashback_dedupe_switch_closes_the_gap() {
    let mut config = config();
    config.handlers.dedupe_cashback_grants = true;
    let h = harness(config);
    h.sync.start().await;

    h.ledger.emit(cashback());
    h.ledger.emit(cashback());
    settle().await;

    assert_eq!(h.store.all_cashback_grants().len(), 1);
    let stats = h.sync.get_stats();
    assert_eq!(stats.cashback_granted, 1);
    assert_eq!(stats.events_skipped, 1);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts() {
    let mut config = config();
    config.connection.max_reconnect_attempts = 3;
    let h = harness(config);
    h.ledger.fail_subscriptions(true);
    h.ledger.set_connected(false);

    h.sync.start().await;
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Disconnected);

    // Delays of 5s, 10s and 20s, then the fourth failure exceeds the bound
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.ledger.subscribe_calls(), 4);
    let stats = h.sync.get_stats();
    assert_eq!(stats.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(stats.reconnect_attempts, 4);

    // No further automatic attempts, even once the ledger is reachable again
    h.ledger.fail_subscriptions(false);
    h.ledger.set_connected(true);
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.ledger.subscribe_calls(), 4);
    let stats = h.sync.get_stats();
    assert_eq!(stats.connection_status, ConnectionStatus::Disconnected);
    assert!(stats.last_heartbeat.is_some());

    // Only a fresh start recovers
    h.sync.stop().await;
    h.sync.start().await;
    assert_eq!(h.ledger.subscribe_calls(), 5);
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Connected);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn linear_backoff_waits_base_times_attempt() {
    let mut config = config();
    config.connection = ConnectionConfig {
        reconnect_base_delay_ms: 1_000,
        max_reconnect_attempts: 5,
        backoff: BackoffStrategy::Linear,
        ..ConnectionConfig::default()
    };
    let h = harness(config);
    h.ledger.fail_subscriptions(true);
    h.ledger.set_connected(false);
    h.sync.start().await;

    // Attempts at 1s, 3s (1 + 2) and 6s (1 + 2 + 3)
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(h.ledger.subscribe_calls(), 3);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.ledger.subscribe_calls(), 4);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_reconnect() {
    let h = harness(config());
    h.sync.start().await;

    h.ledger.close_stream();
    settle().await;
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Reconnecting);

    // The 5s backoff sleep is pending when stop lands
    h.sync.stop().await;
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.ledger.subscribe_calls(), 1);
    assert!(!h.ledger.has_subscriber());
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn terminated_subscription_resubscribes() {
    let h = harness(config());
    h.sync.start().await;

    assert!(h.ledger.emit_error(LedgerError::SessionError(
        "subscription terminated".to_string()
    )));
    settle().await;
    let stats = h.sync.get_stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.connection_status, ConnectionStatus::Reconnecting);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.ledger.subscribe_calls(), 2);
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Connected);

    assert!(h.ledger.emit(order_created(7)));
    settle().await;
    assert_eq!(h.store.chain_orders().len(), 1);

    h.sync.stop().await;
}

#[test]
fn zero_intervals_are_rejected_at_construction() {
    let ledger = Arc::new(MockLedgerClient::new());
    let store = Arc::new(MemoryProjectionStore::new());

    let mut bad_poll = config();
    bad_poll.poller = PollerConfig {
        enabled: true,
        poll_interval_secs: 0,
        ..PollerConfig::default()
    };
    assert!(Synchronizer::new(ledger.clone(), store.clone(), bad_poll).is_err());

    let mut bad_heartbeat = config();
    bad_heartbeat.connection.heartbeat_interval_secs = 0;
    assert!(Synchronizer::new(ledger, store, bad_heartbeat).is_err());
}

#[tokio::test(start_paused = true)]
async fn dropped_stream_resubscribes_and_keeps_ingesting() {
    let h = harness(config());
    h.sync.start().await;

    h.ledger.close_stream();
    settle().await;
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Reconnecting);
    assert!(!h.ledger.emit(order_created(1)));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.ledger.subscribe_calls(), 2);
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Connected);

    assert!(h.ledger.emit(order_created(2)));
    settle().await;
    assert_eq!(h.store.chain_orders().len(), 1);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_halts_all_activity() {
    let mut config = config();
    config.poller.enabled = true;
    let h = harness(config);
    h.ledger.set_snapshot(
        StateResource::ActiveMissions,
        StateSnapshot::Missions(vec![mission(1)]),
    );

    h.sync.start().await;
    settle().await;
    assert!(h.sync.is_running());
    assert!(h.ledger.has_subscriber());

    h.sync.stop().await;
    assert!(!h.sync.is_running());
    assert!(!h.ledger.has_subscriber());

    let frozen = h.sync.get_stats();
    let queries = h.ledger.query_calls();
    h.ledger.set_connected(false);
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.sync.get_stats(), frozen);
    assert_eq!(h.ledger.query_calls(), queries);
    assert_eq!(h.ledger.subscribe_calls(), 1);

    // Stopping twice is harmless
    h.sync.stop().await;
}

#[tokio::test]
async fn stop_without_start_is_safe() {
    let h = harness(config());
    h.sync.stop().await;
    assert!(!h.sync.is_running());
    assert_eq!(h.ledger.subscribe_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn double_start_is_a_no_op() {
    let h = harness(config());
    h.sync.start().await;
    h.sync.start().await;
    assert_eq!(h.ledger.subscribe_calls(), 1);
    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_records_and_recovers_status() {
    let h = harness(config());
    h.sync.start().await;
    assert!(h.sync.get_stats().last_heartbeat.is_none());

    tokio::time::sleep(Duration::from_secs(301)).await;
    let stats = h.sync.get_stats();
    assert!(stats.last_heartbeat.is_some());
    assert_eq!(stats.connection_status, ConnectionStatus::Connected);

    // Probe fails on the next beat: disconnect and resubscribe
    h.ledger.set_connected(false);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Reconnecting);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.ledger.subscribe_calls(), 2);
    assert_eq!(h.sync.get_stats().connection_status, ConnectionStatus::Connected);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn poller_reconciles_missions_through_handlers() {
    let mut config = config();
    config.poller.enabled = true;
    let h = harness(config);
    h.ledger.set_snapshot(
        StateResource::ActiveMissions,
        StateSnapshot::Missions(vec![mission(1), mission(2)]),
    );

    h.sync.start().await;
    settle().await;
    assert_eq!(h.store.missions().len(), 2);

    // A mission pushed on the stream is skipped by later polls
    h.ledger.emit(event(5, 0, EventPayload::MissionCreated(mission(3))));
    h.ledger.set_snapshot(
        StateResource::ActiveMissions,
        StateSnapshot::Missions(vec![mission(1), mission(2), mission(3)]),
    );
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.store.missions().len(), 3);
    let stats = h.sync.get_stats();
    assert_eq!(stats.missions_created, 3);
    assert_eq!(stats.events_skipped, 3);
    assert_eq!(stats.polls_completed, 2);
    assert!(stats.last_poll.is_some());

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failing_poll_is_counted_and_timer_continues() {
    let mut config = config();
    config.poller.enabled = true;
    let h = harness(config);
    h.ledger.fail_queries(Some("indexer down"));

    h.sync.start().await;
    tokio::time::sleep(Duration::from_secs(25)).await;

    let stats = h.sync.get_stats();
    assert_eq!(h.ledger.query_calls(), 3);
    assert_eq!(stats.errors, 3);
    assert_eq!(stats.polls_completed, 0);

    h.ledger.fail_queries(None);
    h.ledger
        .set_snapshot(StateResource::ActiveMissions, StateSnapshot::Missions(vec![]));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.sync.get_stats().polls_completed, 1);

    h.sync.stop().await;
}

#[tokio::test(start_paused = true)]
async fn overlapping_reconcile_is_skipped() {
    let h = harness(config());
    h.ledger.set_snapshot(
        StateResource::ActiveMissions,
        StateSnapshot::Missions(vec![mission(1)]),
    );
    h.ledger.set_query_delay(Some(Duration::from_secs(30)));

    let slow = tokio::spawn({
        let sync = h.sync.clone();
        async move { sync.reconcile_now().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.sync.reconcile_now().await, PollOutcome::Skipped);
    assert_eq!(slow.await.unwrap(), PollOutcome::Completed { events: 1 });
    assert_eq!(h.ledger.query_calls(), 1);
    assert_eq!(h.store.missions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_stats_keeps_connection_state() {
    let h = harness(config());
    h.sync.start().await;
    h.ledger.emit(order_created(1));
    settle().await;
    assert_eq!(h.sync.get_stats().orders_created, 1);

    h.sync.reset_stats();

    let stats = h.sync.get_stats();
    assert_eq!(stats.orders_created, 0);
    assert!(stats.last_event.is_none());
    assert_eq!(stats.connection_status, ConnectionStatus::Connected);

    // Counting resumes from zero
    h.ledger.emit(order_created(2));
    settle().await;
    assert_eq!(h.sync.get_stats().orders_created, 1);

    h.sync.stop().await;
}
