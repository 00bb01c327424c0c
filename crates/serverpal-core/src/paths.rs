use crate::error::{Result, ServerPalError};
use chrono::{DateTime, TimeZone};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const USER_DIR: &str = ".serverpal";
pub const CONFIG_FILE: &str = "config.yaml";
pub const SESSIONS_DIR: &str = "sessions";

pub const BACKUP_PREFIX: &str = "backup_";
pub const BACKUP_EXTENSION: &str = "zip";
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `~/.serverpal`
pub fn user_dir() -> Result<PathBuf> {
    home::home_dir()
        .map(|h| h.join(USER_DIR))
        .ok_or(ServerPalError::HomeNotFound)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(user_dir()?.join(CONFIG_FILE))
}

/// Session records live next to the config file they belong to.
pub fn sessions_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(SESSIONS_DIR)
}

pub fn session_record_path(sessions_dir: &Path, label: &str) -> PathBuf {
    sessions_dir.join(format!("{label}.yaml"))
}

/// `backup_<YYYYMMDD_HHmmss>.zip`, or `backup_<YYYYMMDD_HHmmss>_<n>.zip` for
/// the n-th collision within the same second.
pub fn backup_file_name<Tz>(at: &DateTime<Tz>, collision: u32) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let stamp = at.format(BACKUP_TIMESTAMP_FORMAT);
    if collision == 0 {
        format!("{BACKUP_PREFIX}{stamp}.{BACKUP_EXTENSION}")
    } else {
        format!("{BACKUP_PREFIX}{stamp}_{collision}.{BACKUP_EXTENSION}")
    }
}

// ---------------------------------------------------------------------------
// Session label validation
// ---------------------------------------------------------------------------

static LABEL_RE: OnceLock<Regex> = OnceLock::new();

fn label_re() -> &'static Regex {
    LABEL_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").unwrap())
}

/// Labels name both a console window and a record file, so they are kept to
/// a filename-safe alphabet.
pub fn validate_session_label(label: &str) -> Result<()> {
    if label.is_empty() || label.len() > 64 || !label_re().is_match(label) {
        return Err(ServerPalError::Config(format!(
            "invalid session label '{label}': use letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
