use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nodepulse::{
    config::{Config, StorageConfig, read_config_file},
    engine::MonitorEngine,
    storage::{MemoryStore, MonitorStore},
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file; defaults apply when omitted
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("nodepulse", LevelFilter::DEBUG),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn MonitorStore>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            warn!("no storage configured, nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("opening SQLite store at {}", path.display());
            let store = nodepulse::storage::sqlite::SqliteStore::new(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    let store = open_store(&config).await?;
    let engine = MonitorEngine::from_config(store.clone(), &config);

    let devices = engine
        .start()
        .await
        .context("failed to load monitored devices")?;
    info!("engine started with {devices} devices");

    #[cfg(feature = "api")]
    {
        use nodepulse::api::{ApiConfig, ApiState, spawn_api_server};

        let api_config = ApiConfig::from_settings(&config.api);
        let addr = spawn_api_server(api_config, ApiState::new(engine.clone())).await?;
        info!("API available at http://{addr}/api");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");

    engine.shutdown().await;
    if let Err(e) = store.close().await {
        error!("failed to close store: {e}");
    }

    Ok(())
}
