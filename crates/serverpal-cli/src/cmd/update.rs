use crate::output::{print_json, ConsoleObserver};
use anyhow::{bail, Result};
use std::path::Path;

/// One manual maintenance cycle. Ctrl-C interrupts a running updater and
/// waits for it to be reaped.
pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let engine = super::engine(config_path, ConsoleObserver::shared(json))?;
    let rt = super::runtime()?;

    let report = rt.block_on(async {
        let mut cycle = engine.spawn_maintenance_cycle();
        tokio::select! {
            joined = &mut cycle => joined,
            _ = tokio::signal::ctrl_c() => {
                engine.shutdown();
                cycle.await
            }
        }
    })?;

    let Some(report) = report else {
        bail!("a maintenance cycle is already running");
    };

    if json {
        print_json(&serde_json::json!({
            "backup": report.backup,
            "update": report.update,
            "restart": report.restart.as_ref().map(super::server::restart_json),
        }))?;
    }

    if let Some(restart) = &report.restart {
        super::server::check_restart(restart)?;
    }
    if report.update.is_failure() {
        bail!("{}", report.update);
    }
    Ok(())
}
