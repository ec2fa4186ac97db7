use ledger_projection_sync::config::SynchronizerConfig;
use ledger_projection_sync::ledger::GraphQlLedgerClient;
use ledger_projection_sync::projection::{
	FileSnapshotRepository, MemoryProjectionStore, SnapshotRepository,
};
use ledger_projection_sync::sync::Synchronizer;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Keep a relational projection of ledger events up to date.
#[derive(Debug, Parser)]
#[command(name = "ledger-projection-sync", version, about)]
struct Cli {
	/// GraphQL HTTP endpoint used for state queries
	#[arg(
		long,
		env = "LEDGER_HTTP_URL",
		default_value = "http://localhost:8088/api/v1/graphql"
	)]
	http_url: String,

	/// GraphQL WebSocket endpoint used for the event subscription
	#[arg(
		long,
		env = "LEDGER_WS_URL",
		default_value = "ws://localhost:8088/api/v1/graphql/ws"
	)]
	ws_url: String,

	/// Optional JSON configuration file
	#[arg(long, env = "LEDGER_SYNC_CONFIG")]
	config: Option<PathBuf>,

	/// Directory holding the projection snapshot
	#[arg(long, env = "LEDGER_SYNC_DATA_DIR", default_value = "data")]
	data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let cli = Cli::parse();

	// RUST_LOG overrides the default INFO level
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting ledger projection sync service");

	let config = match &cli.config {
		Some(path) => {
			info!("Loading configuration from {:?}", path);
			SynchronizerConfig::from_file(path)?
		}
		None => SynchronizerConfig::default(),
	};

	let ledger = Arc::new(GraphQlLedgerClient::new(cli.http_url, cli.ws_url)?);
	info!("Created ledger client");

	let repository = FileSnapshotRepository::new(cli.data_dir);
	let store = match repository.load().await {
		Ok(Some(tables)) => MemoryProjectionStore::from_tables(tables),
		Ok(None) => {
			info!("No projection snapshot found, starting from an empty projection");
			MemoryProjectionStore::new()
		}
		Err(e) => {
			warn!("Failed to load projection snapshot, starting empty: {}", e);
			MemoryProjectionStore::new()
		}
	};
	let store = Arc::new(store);

	let synchronizer = Synchronizer::new(ledger, store.clone(), config)?;
	synchronizer.start().await;

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}

	info!("Shutdown requested");
	synchronizer.stop().await;

	// Saved after stop so no handler is mid-write
	if let Err(e) = repository.save(&store.export()).await {
		error!("Failed to save projection snapshot: {}", e);
	}

	info!("Ledger projection sync service stopped");
	Ok(())
}
