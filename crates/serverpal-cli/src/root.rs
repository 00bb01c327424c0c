use anyhow::Context;
use serverpal_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `SERVERPAL_CONFIG` env var (passed in as `explicit`)
/// 2. `~/.serverpal/config.yaml`
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    paths::default_config_path().context("cannot locate the default config file")
}
