//! Projection storage module
//!
//! Entities materialized from ledger events, the store trait the handlers
//! write through, an in-memory store, and file snapshots of that store.

pub mod memory;
pub mod models;
pub mod snapshot;
mod store;

pub use memory::{MemoryProjectionStore, ProjectionTables, TableCounts};
pub use models::*;
pub use snapshot::{FileSnapshotRepository, SnapshotMetadata, SnapshotRepository};
pub use store::{ProjectionStore, StoreError};
