use crate::error::{Result, ServerPalError};
use crate::orchestrator::MaintenanceSchedule;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_APP_ID: &str = "2394010";
pub const DEFAULT_SESSION_LABEL: &str = "ServerPalConsole";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 210;
/// One year. Longer intervals cannot be represented by the timer.
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ConfigKey
// ---------------------------------------------------------------------------

/// Every key of the store, as accepted by `serverpal config set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    UpdaterExecutablePath,
    ServerExecutablePath,
    InstallDir,
    SourceDataDirectory,
    BackupDestinationDirectory,
    AppId,
    SessionLabel,
    BackupBeforeUpdate,
    ScheduleEnabled,
    ScheduleIntervalMinutes,
    CheckForUpdatesOnStart,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 11] = [
        ConfigKey::UpdaterExecutablePath,
        ConfigKey::ServerExecutablePath,
        ConfigKey::InstallDir,
        ConfigKey::SourceDataDirectory,
        ConfigKey::BackupDestinationDirectory,
        ConfigKey::AppId,
        ConfigKey::SessionLabel,
        ConfigKey::BackupBeforeUpdate,
        ConfigKey::ScheduleEnabled,
        ConfigKey::ScheduleIntervalMinutes,
        ConfigKey::CheckForUpdatesOnStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::UpdaterExecutablePath => "updater_executable_path",
            ConfigKey::ServerExecutablePath => "server_executable_path",
            ConfigKey::InstallDir => "install_dir",
            ConfigKey::SourceDataDirectory => "source_data_directory",
            ConfigKey::BackupDestinationDirectory => "backup_destination_directory",
            ConfigKey::AppId => "app_id",
            ConfigKey::SessionLabel => "session_label",
            ConfigKey::BackupBeforeUpdate => "backup_before_update",
            ConfigKey::ScheduleEnabled => "schedule_enabled",
            ConfigKey::ScheduleIntervalMinutes => "schedule_interval_minutes",
            ConfigKey::CheckForUpdatesOnStart => "check_for_updates_on_start",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ServerPalError;

    fn from_str(s: &str) -> Result<Self> {
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ServerPalError::Config(format!("unknown config key '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

/// Flat key-value store of paths and toggles. Empty strings mean "not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub updater_executable_path: String,
    #[serde(default)]
    pub server_executable_path: String,
    /// Directory the updater installs the server into.
    #[serde(default)]
    pub install_dir: String,
    #[serde(default)]
    pub source_data_directory: String,
    #[serde(default)]
    pub backup_destination_directory: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_session_label")]
    pub session_label: String,
    #[serde(default)]
    pub backup_before_update: bool,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub schedule_interval_minutes: u64,
    #[serde(default)]
    pub check_for_updates_on_start: bool,
}

fn default_version() -> u32 {
    1
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

fn default_session_label() -> String {
    DEFAULT_SESSION_LABEL.to_string()
}

fn default_interval_minutes() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            updater_executable_path: String::new(),
            server_executable_path: String::new(),
            install_dir: String::new(),
            source_data_directory: String::new(),
            backup_destination_directory: String::new(),
            app_id: default_app_id(),
            session_label: default_session_label(),
            backup_before_update: false,
            schedule_enabled: false,
            schedule_interval_minutes: default_interval_minutes(),
            check_for_updates_on_start: false,
        }
    }
}

impl Config {
    /// Load the store. A missing file behaves like an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn schedule(&self) -> MaintenanceSchedule {
        MaintenanceSchedule {
            enabled: self.schedule_enabled,
            interval: Duration::from_secs(self.schedule_interval_minutes.saturating_mul(60)),
            backup_before_update: self.backup_before_update,
        }
    }

    pub fn get(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::UpdaterExecutablePath => self.updater_executable_path.clone(),
            ConfigKey::ServerExecutablePath => self.server_executable_path.clone(),
            ConfigKey::InstallDir => self.install_dir.clone(),
            ConfigKey::SourceDataDirectory => self.source_data_directory.clone(),
            ConfigKey::BackupDestinationDirectory => self.backup_destination_directory.clone(),
            ConfigKey::AppId => self.app_id.clone(),
            ConfigKey::SessionLabel => self.session_label.clone(),
            ConfigKey::BackupBeforeUpdate => self.backup_before_update.to_string(),
            ConfigKey::ScheduleEnabled => self.schedule_enabled.to_string(),
            ConfigKey::ScheduleIntervalMinutes => self.schedule_interval_minutes.to_string(),
            ConfigKey::CheckForUpdatesOnStart => self.check_for_updates_on_start.to_string(),
        }
    }

    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            ConfigKey::UpdaterExecutablePath => self.updater_executable_path = value.to_string(),
            ConfigKey::ServerExecutablePath => self.server_executable_path = value.to_string(),
            ConfigKey::InstallDir => self.install_dir = value.to_string(),
            ConfigKey::SourceDataDirectory => self.source_data_directory = value.to_string(),
            ConfigKey::BackupDestinationDirectory => {
                self.backup_destination_directory = value.to_string()
            }
            ConfigKey::AppId => self.app_id = value.to_string(),
            ConfigKey::SessionLabel => {
                paths::validate_session_label(value)?;
                self.session_label = value.to_string();
            }
            ConfigKey::BackupBeforeUpdate => self.backup_before_update = parse_bool(key, value)?,
            ConfigKey::ScheduleEnabled => self.schedule_enabled = parse_bool(key, value)?,
            ConfigKey::ScheduleIntervalMinutes => {
                let minutes: u64 = value.parse().map_err(|_| {
                    ServerPalError::Config(format!(
                        "{key} expects a whole number of minutes, got '{value}'"
                    ))
                })?;
                if minutes > MAX_INTERVAL_MINUTES {
                    return Err(ServerPalError::Config(format!(
                        "{key} must be at most {MAX_INTERVAL_MINUTES} minutes, got {minutes}"
                    )));
                }
                self.schedule_interval_minutes = minutes;
            }
            ConfigKey::CheckForUpdatesOnStart => {
                self.check_for_updates_on_start = parse_bool(key, value)?
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let warn = |warnings: &mut Vec<ConfigWarning>, level, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        for (key, value, consequence) in [
            (
                ConfigKey::ServerExecutablePath,
                &self.server_executable_path,
                "start and restart will fail",
            ),
            (
                ConfigKey::UpdaterExecutablePath,
                &self.updater_executable_path,
                "update checks will fail",
            ),
            (
                ConfigKey::InstallDir,
                &self.install_dir,
                "the updater will install into its default directory",
            ),
        ] {
            if value.trim().is_empty() {
                warn(
                    &mut warnings,
                    WarnLevel::Warning,
                    format!("{key} is not set; {consequence}"),
                );
            }
        }

        if self.app_id.is_empty() || !self.app_id.chars().all(|c| c.is_ascii_digit()) {
            warn(
                &mut warnings,
                WarnLevel::Error,
                format!("app_id '{}' must be a numeric application id", self.app_id),
            );
        }

        if let Err(e) = paths::validate_session_label(&self.session_label) {
            warn(&mut warnings, WarnLevel::Error, e.to_string());
        }

        if self.schedule_interval_minutes == 0 {
            warn(
                &mut warnings,
                WarnLevel::Error,
                "schedule_interval_minutes must be greater than zero".to_string(),
            );
        } else if self.schedule_interval_minutes > MAX_INTERVAL_MINUTES {
            warn(
                &mut warnings,
                WarnLevel::Error,
                format!(
                    "schedule_interval_minutes must be at most {MAX_INTERVAL_MINUTES} (one year)"
                ),
            );
        }

        let source = self.source_data_directory.trim();
        let backup = self.backup_destination_directory.trim();
        if self.backup_before_update && (source.is_empty() || backup.is_empty()) {
            warn(
                &mut warnings,
                WarnLevel::Warning,
                "backup_before_update is enabled but source_data_directory or \
                 backup_destination_directory is not set; backups will fail"
                    .to_string(),
            );
        }
        if !source.is_empty() && !backup.is_empty() && Path::new(backup).starts_with(source) {
            warn(
                &mut warnings,
                WarnLevel::Warning,
                format!(
                    "backup_destination_directory '{backup}' is inside source_data_directory; \
                     every backup will also contain the earlier archives"
                ),
            );
        }

        warnings
    }
}

fn parse_bool(key: ConfigKey, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ServerPalError::Config(format!(
            "{key} expects true or false, got '{value}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
