use crate::output::{print_json, ConsoleObserver};
use anyhow::{anyhow, Context, Result};
use serverpal_core::supervisor::RestartReport;
use std::path::Path;

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

pub fn start(config_path: &Path, json: bool) -> Result<()> {
    let engine = super::engine(config_path, ConsoleObserver::shared(json))?;
    let rt = super::runtime()?;

    match rt.block_on(engine.start_server()) {
        Ok(status) => {
            if json {
                print_json(&status)?;
            }
            Ok(())
        }
        // Reported by the engine; starting twice is not an error.
        Err(e) if e.is_informational() => {
            if json {
                print_json(&serde_json::json!({ "already_running": true }))?;
            }
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("failed to start the server")),
    }
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

pub fn stop(config_path: &Path, json: bool) -> Result<()> {
    let engine = super::engine(config_path, ConsoleObserver::shared(json))?;
    let rt = super::runtime()?;

    rt.block_on(engine.stop_server())
        .context("failed to stop the server")?;
    if json {
        print_json(&serde_json::json!({ "stopped": true }))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// restart
// ---------------------------------------------------------------------------

pub fn restart(config_path: &Path, json: bool) -> Result<()> {
    let engine = super::engine(config_path, ConsoleObserver::shared(json))?;
    let rt = super::runtime()?;

    let report = rt.block_on(engine.restart_server());
    if json {
        print_json(&restart_json(&report))?;
    }
    check_restart(&report)
}

pub(crate) fn restart_json(report: &RestartReport) -> serde_json::Value {
    serde_json::json!({
        "stopped": report.stop.is_ok(),
        "started": report.start.as_ref().ok(),
        "errors": report.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>(),
    })
}

/// Both halves of a restart must succeed.
pub(crate) fn check_restart(report: &RestartReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let causes: Vec<String> = report.errors().iter().map(|e| e.to_string()).collect();
    Err(anyhow!("restart failed: {}", causes.join("; ")))
}
