//! Ledger integration module
//!
//! This module isolates everything that talks to the ledger. The rest of the
//! crate only sees the narrow [`LedgerClient`] trait: subscribe to decoded
//! events, query the current value of a resource, and probe liveness.

/// GraphQL client for the ledger indexer
mod client;
/// Raw frame to typed event decoding
pub mod decode;
/// In-process ledger double for tests and local runs
pub mod mock;
/// Type definitions for ledger data structures
mod types;

pub use client::GraphQlLedgerClient;
pub use mock::MockLedgerClient;
pub use types::*;

use futures::stream::BoxStream;

/// Stream of decoded events produced by a subscription.
///
/// Dropping the stream releases the underlying subscription.
pub type EventStream = BoxStream<'static, Result<LedgerEvent, LedgerError>>;

/// The capabilities the synchronizer needs from the ledger.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
	/// Subscribe to decoded events matching `filter`.
	async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError>;

	/// Pull the full current value of a named resource.
	async fn query_state(&self, resource: StateResource) -> Result<StateSnapshot, LedgerError>;

	/// Liveness probe for the ledger connection.
	async fn is_connected(&self) -> bool;
}
