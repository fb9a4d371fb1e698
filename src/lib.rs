pub mod config;
pub mod db;
pub mod detector;
pub mod frame;
pub mod handoff;
pub mod metrics;
pub mod models;
pub mod plc;
pub mod settings;
pub mod slot;
pub mod status;
pub mod storage;
pub mod supervisor;
pub mod tracker;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use config::AppConfig;
use db::Database;
use detector::ReplayLoader;
use frame::StillImageOpener;
use plc::S7Connector;
use settings::SettingsStore;
use storage::{DiskImageStore, ImageStore};
use supervisor::{Backends, InspectionController};

#[derive(Debug, Parser)]
#[command(name = "rollerline")]
#[command(about = "Two-station roller inspection line coordinator")]
#[command(version)]
pub struct Cli {
    /// Startup configuration (JSON). Reference defaults apply when missing.
    #[arg(long, default_value = "rollerline.json")]
    pub config: PathBuf,

    /// Operator settings file; overrides `settingsPath` from the config.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// SQLite journal; overrides `databasePath` from the config.
    #[arg(long)]
    pub database: Option<PathBuf>,
}

pub async fn run(cli: Cli) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("rollerline starting up...");

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(path) = cli.settings {
        config.settings_path = path;
    }
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let database = Database::new(config.database_path.clone())?;
    let settings = Arc::new(SettingsStore::new(config.settings_path.clone())?);
    let images: Arc<dyn ImageStore> = Arc::new(
        DiskImageStore::new(config.storage.root.clone(), config.storage.max_images)
            .context("failed to prepare image directories")?,
    );

    let backends = Backends {
        plc: Arc::new(S7Connector::new(config.plc.clone())),
        detectors: Arc::new(ReplayLoader),
        cameras: Arc::new(StillImageOpener),
        images: Some(images),
    };
    let controller = InspectionController::new(config, backends, database, settings);

    controller.start().await?;
    log::info!("line running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    log::info!("Ctrl-C received, shutting down");

    if let Some(stats) = controller.stop().await? {
        log::info!(
            "final counters: {}",
            serde_json::to_string(&stats).unwrap_or_default()
        );
    }
    Ok(())
}
