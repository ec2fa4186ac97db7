//! Routing of decoded ledger events to their handlers.
//!
//! The router is the single error boundary for event handling: handler
//! failures are caught here, counted, and logged, and never reach the pump or
//! the poller. It emits exactly one log line per routed event.

use super::handlers::EventHandler;
use super::stats::StatsTracker;
use super::types::HandleOutcome;
use crate::ledger::{EventFilter, EventKind, EventSource, LedgerError, LedgerEvent};
use crate::utils::abbreviate_hash;

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Applied,
    Skipped,
    Dropped,
    Failed,
    /// No handler registered for the kind.
    Unhandled,
}

/// Event router that owns one handler per event kind.
pub struct EventRouter {
    handlers: BTreeMap<EventKind, Arc<dyn EventHandler>>,
    stats: Arc<StatsTracker>,
}

impl EventRouter {
    pub fn new(stats: Arc<StatsTracker>) -> Self {
        Self {
            handlers: BTreeMap::new(),
            stats,
        }
    }

    /// Register a handler, replacing any previous handler for its kind.
    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Kinds with a registered handler, in routing order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.handlers.keys().copied().collect()
    }

    /// Subscription filter matching the registered handlers.
    pub fn filter(&self) -> EventFilter {
        EventFilter::new(self.kinds())
    }

    /// Route one event to its handler and record the outcome.
    pub async fn dispatch(&self, event: &LedgerEvent) -> DispatchStatus {
        let kind = event.kind();
        let subject = event.payload.describe();
        let origin = origin(event);

        let Some(handler) = self.handlers.get(&kind) else {
            warn!("No handler registered for {} ({}), ignoring", kind, subject);
            return DispatchStatus::Unhandled;
        };

        match handler.handle(event).await {
            Ok(HandleOutcome::Applied) => {
                self.stats.record_applied(kind, event.timestamp);
                info!("Applied {}: {} [{}]", kind, subject, origin);
                DispatchStatus::Applied
            }
            Ok(HandleOutcome::Skipped(reason)) => {
                self.stats.record_skipped(event.timestamp);
                info!("Skipped {}: {} [{}]", kind, reason, origin);
                DispatchStatus::Skipped
            }
            Ok(HandleOutcome::Dropped(reason)) => {
                self.stats.record_dropped(event.timestamp);
                warn!("Dropped {}: {} [{}]", kind, reason, origin);
                DispatchStatus::Dropped
            }
            Err(e) => {
                self.stats.record_error();
                error!("Failed to handle {} ({}) [{}]: {}", kind, subject, origin, e);
                DispatchStatus::Failed
            }
        }
    }

    /// Count and log an item the subscription could not deliver as an event.
    pub fn record_stream_error(&self, err: &LedgerError) {
        self.stats.record_error();
        error!("Ledger event stream error: {}", err);
    }
}

fn origin(event: &LedgerEvent) -> String {
    match (&event.source, &event.position) {
        (EventSource::Subscription, Some(position)) => format!(
            "block {} #{} tx {}",
            position.block_number,
            position.event_index,
            abbreviate_hash(&position.transaction_hash)
        ),
        (EventSource::Subscription, None) => "subscription".to_string(),
        (EventSource::Reconciliation, _) => "reconciliation".to_string(),
    }
}
