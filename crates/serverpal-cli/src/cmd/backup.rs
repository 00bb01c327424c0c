use crate::output::{print_json, ConsoleObserver};
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let engine = super::engine(config_path, ConsoleObserver::shared(json))?;
    let rt = super::runtime()?;

    let summary = rt.block_on(engine.backup()).context("backup failed")?;
    if json {
        print_json(&summary)?;
    }
    Ok(())
}
