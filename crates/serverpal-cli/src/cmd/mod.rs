pub mod backup;
pub mod config;
pub mod daemon;
pub mod server;
pub mod update;

use anyhow::Context;
use serverpal_core::config::Config;
use serverpal_core::launcher::SystemLauncher;
use serverpal_core::observer::SharedObserver;
use serverpal_core::orchestrator::MaintenanceOrchestrator;
use serverpal_core::paths;
use std::path::Path;
use std::sync::Arc;

/// Build the engine from the config file, with session records kept beside it.
pub(crate) fn engine(
    config_path: &Path,
    observer: SharedObserver,
) -> anyhow::Result<MaintenanceOrchestrator> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let launcher = Arc::new(SystemLauncher::new(paths::sessions_dir(config_path)));
    Ok(MaintenanceOrchestrator::new(config, launcher, observer))
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}
