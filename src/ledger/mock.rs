//! Controllable in-process ledger for testing the synchronizer.
//!
//! `MockLedgerClient` implements [`LedgerClient`] without any network. Tests
//! drive it directly:
//!
//! - **Event emission**: push decoded events (or stream errors) into the live subscription
//! - **Failure injection**: fail subscribe calls, fail or delay state queries
//! - **Liveness**: flip the value returned by `is_connected`
//! - **Call counting**: observe how often subscribe and query were invoked

use super::types::*;
use super::{EventStream, LedgerClient};
use futures::channel::mpsc::{UnboundedSender, unbounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Default)]
struct MockState {
	connected: bool,
	fail_subscribe: bool,
	subscribe_calls: usize,
	query_calls: usize,
	sender: Option<UnboundedSender<Result<LedgerEvent, LedgerError>>>,
	filter: Option<EventFilter>,
	snapshots: HashMap<StateResource, StateSnapshot>,
	query_failure: Option<String>,
	query_delay: Option<Duration>,
}

/// In-memory [`LedgerClient`] double.
pub struct MockLedgerClient {
	state: Mutex<MockState>,
}

impl MockLedgerClient {
	/// A healthy ledger: subscriptions succeed and the probe reports connected.
	pub fn new() -> Self {
		Self {
			state: Mutex::new(MockState {
				connected: true,
				..MockState::default()
			}),
		}
	}

	/// Make every following subscribe call fail (or succeed again).
	pub fn fail_subscriptions(&self, fail: bool) {
		self.state.lock().fail_subscribe = fail;
	}

	/// Set the value returned by the liveness probe.
	pub fn set_connected(&self, connected: bool) {
		self.state.lock().connected = connected;
	}

	pub fn subscribe_calls(&self) -> usize {
		self.state.lock().subscribe_calls
	}

	pub fn query_calls(&self) -> usize {
		self.state.lock().query_calls
	}

	/// Filter passed to the most recent subscribe call.
	pub fn last_filter(&self) -> Option<EventFilter> {
		self.state.lock().filter.clone()
	}

	/// Whether a subscription stream is currently held by a consumer.
	pub fn has_subscriber(&self) -> bool {
		self.state
			.lock()
			.sender
			.as_ref()
			.is_some_and(|sender| !sender.is_closed())
	}

	/// Deliver an event on the live subscription. Returns false if nobody is subscribed.
	pub fn emit(&self, event: LedgerEvent) -> bool {
		self.send(Ok(event))
	}

	/// Deliver a stream-level error on the live subscription.
	pub fn emit_error(&self, error: LedgerError) -> bool {
		self.send(Err(error))
	}

	/// End the live subscription stream, as a dropped socket would.
	pub fn close_stream(&self) {
		let mut state = self.state.lock();
		state.sender = None;
		state.connected = false;
	}

	/// Value returned for `resource` by subsequent state queries.
	pub fn set_snapshot(&self, resource: StateResource, snapshot: StateSnapshot) {
		self.state.lock().snapshots.insert(resource, snapshot);
	}

	/// Make state queries fail with the given message, or clear the failure.
	pub fn fail_queries(&self, message: Option<&str>) {
		self.state.lock().query_failure = message.map(str::to_string);
	}

	/// Delay every state query, to simulate a slow ledger.
	pub fn set_query_delay(&self, delay: Option<Duration>) {
		self.state.lock().query_delay = delay;
	}

	fn send(&self, item: Result<LedgerEvent, LedgerError>) -> bool {
		let state = self.state.lock();
		match &state.sender {
			Some(sender) => sender.unbounded_send(item).is_ok(),
			None => false,
		}
	}
}

impl Default for MockLedgerClient {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl LedgerClient for MockLedgerClient {
	async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError> {
		let mut state = self.state.lock();
		state.subscribe_calls += 1;
		state.filter = Some(filter.clone());

		if state.fail_subscribe {
			return Err(LedgerError::NotConnected(
				"mock ledger refused the subscription".to_string(),
			));
		}

		let (sender, receiver) = unbounded();
		state.sender = Some(sender);
		state.connected = true;
		Ok(Box::pin(receiver))
	}

	async fn query_state(&self, resource: StateResource) -> Result<StateSnapshot, LedgerError> {
		let delay = {
			let mut state = self.state.lock();
			state.query_calls += 1;
			state.query_delay
		};

		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let state = self.state.lock();
		if let Some(message) = &state.query_failure {
			return Err(LedgerError::GraphQLError(message.clone()));
		}

		state
			.snapshots
			.get(&resource)
			.cloned()
			.ok_or(LedgerError::NoData)
	}

	async fn is_connected(&self) -> bool {
		self.state.lock().connected
	}
}
