//! Ledger projection synchronizer.
//!
//! Ingests order, escrow, dispute, delivery-proof and reward events from a
//! ledger and materializes them into an idempotent projection. See
//! [`sync::Synchronizer`] for the entry point.

pub mod config;
pub mod ledger;
pub mod projection;
pub mod sync;
pub mod utils;

pub use config::SynchronizerConfig;
pub use sync::{SyncStats, Synchronizer};
