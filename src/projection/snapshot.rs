use super::memory::{ProjectionTables, TableCounts};
use super::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

const SNAPSHOT_FILE: &str = "projection_snapshot.json";
const METADATA_FILE: &str = "projection_snapshot.meta.json";

/// Sidecar written next to every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
	pub timestamp: DateTime<Utc>,
	pub counts: TableCounts,
}

/// Repository for projection snapshot persistence
#[async_trait::async_trait]
pub trait SnapshotRepository: Send + Sync {
	async fn save(&self, tables: &ProjectionTables) -> Result<SnapshotMetadata, StoreError>;
	async fn load(&self) -> Result<Option<ProjectionTables>, StoreError>;
}

/// File-based implementation of SnapshotRepository
pub struct FileSnapshotRepository {
	data_dir: PathBuf,
}

impl FileSnapshotRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn snapshot_filename(&self) -> PathBuf {
		self.data_dir.join(SNAPSHOT_FILE)
	}

	fn metadata_filename(&self) -> PathBuf {
		self.data_dir.join(METADATA_FILE)
	}
}

#[async_trait::async_trait]
impl SnapshotRepository for FileSnapshotRepository {
	async fn save(&self, tables: &ProjectionTables) -> Result<SnapshotMetadata, StoreError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		let metadata = SnapshotMetadata {
			timestamp: Utc::now(),
			counts: tables.counts(),
		};

		// Tables first so a metadata file never points at a missing snapshot
		let filename = self.snapshot_filename();
		tokio::fs::write(&filename, serde_json::to_vec_pretty(tables)?).await?;

		let metadata_filename = self.metadata_filename();
		tokio::fs::write(&metadata_filename, serde_json::to_vec_pretty(&metadata)?).await?;

		info!(
			"Saved projection snapshot to {:?} ({} rows)",
			filename,
			metadata.counts.total()
		);
		Ok(metadata)
	}

	async fn load(&self) -> Result<Option<ProjectionTables>, StoreError> {
		let filename = self.snapshot_filename();

		// Check if files exist
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(None);
		}

		let content = tokio::fs::read(&filename).await?;
		let tables: ProjectionTables = serde_json::from_slice(&content)?;

		match tokio::fs::read(self.metadata_filename()).await {
			Ok(meta_content) => match serde_json::from_slice::<SnapshotMetadata>(&meta_content) {
				Ok(metadata) if metadata.counts != tables.counts() => {
					warn!(
						"Snapshot metadata row counts do not match {:?}; trusting the snapshot",
						filename
					);
				}
				Ok(metadata) => {
					info!(
						"Loaded projection snapshot from {:?} taken at {} ({} rows)",
						filename,
						metadata.timestamp.to_rfc3339(),
						metadata.counts.total()
					);
				}
				Err(e) => warn!("Ignoring unreadable snapshot metadata: {}", e),
			},
			Err(e) => warn!("Snapshot metadata missing for {:?}: {}", filename, e),
		}

		Ok(Some(tables))
	}
}
