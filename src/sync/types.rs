use crate::projection::StoreError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error types for event handling and synchronization
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Store error: {0}")]
	StoreError(#[from] StoreError),

	#[error("Invalid payload: {0}")]
	InvalidPayload(String),

	#[error("Missing {entity} {key} required by this event")]
	MissingRelation { entity: &'static str, key: String },
}

/// Result of applying one event to the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
	/// The projection changed.
	Applied,
	/// Already reflected in the projection; nothing written.
	Skipped(String),
	/// A soft relation could not be resolved; nothing written.
	Dropped(String),
}

/// State of the ledger subscription as seen by the connection manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	#[default]
	Disconnected,
	Connected,
	Reconnecting,
}

impl fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionStatus::Disconnected => f.write_str("disconnected"),
			ConnectionStatus::Connected => f.write_str("connected"),
			ConnectionStatus::Reconnecting => f.write_str("reconnecting"),
		}
	}
}
