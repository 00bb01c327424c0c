use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerPalError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to launch '{program}': {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("invalid backup source '{}': not an existing directory", .0.display())]
    InvalidSource(PathBuf),

    #[error("failed to enumerate '{}': {reason}", path.display())]
    EnumerationFailed { path: PathBuf, reason: String },

    #[error("archive '{}' already exists", .0.display())]
    ArchiveExists(PathBuf),

    #[error("failed to write archive '{}': {reason}", path.display())]
    ArchiveWriteFailed { path: PathBuf, reason: String },

    #[error("failed to terminate session '{label}': {reason}")]
    TerminationFailed { label: String, reason: String },

    #[error("updater exited with code {0}")]
    UpdateFailed(i32),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ServerPalError {
    /// `AlreadyRunning` is reported to the user but is not a failure.
    pub fn is_informational(&self) -> bool {
        matches!(self, ServerPalError::AlreadyRunning)
    }
}

pub type Result<T> = std::result::Result<T, ServerPalError>;
