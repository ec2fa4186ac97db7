//!
//! Utility module for the ledger synchronizer.
//!
//! Formatting helpers used when rendering ledger values in log lines.
/// Utility functions for formatting and display
pub mod index;

pub use index::abbreviate_hash;
