use crate::error::{Result, ServerPalError};
use crate::launcher::{self, LaunchedProcess, ProcessLauncher, ProcessState, Termination};
use crate::observer::SharedObserver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ServerHandle
// ---------------------------------------------------------------------------

/// The running server child, owned exclusively by [`ProcessSupervisor`].
pub struct ServerHandle {
    process: Box<dyn LaunchedProcess>,
    executable: PathBuf,
    started_at: DateTime<Utc>,
    exit_code: Option<i32>,
    exited: bool,
}

impl ServerHandle {
    fn new(process: Box<dyn LaunchedProcess>, executable: PathBuf) -> Self {
        Self {
            process,
            executable,
            started_at: Utc::now(),
            exit_code: None,
            exited: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn is_alive(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match self.process.poll() {
            ProcessState::Running => true,
            ProcessState::Exited(code) => {
                self.exited = true;
                self.exit_code = code;
                false
            }
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn status(&mut self) -> ServerStatus {
        ServerStatus {
            running: self.is_alive(),
            pid: self.pid(),
            executable: self.executable.clone(),
            started_at: self.started_at,
            exit_code: self.exit_code,
        }
    }
}

/// Point-in-time snapshot of a [`ServerHandle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub executable: PathBuf,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
}

// ---------------------------------------------------------------------------
// RestartReport
// ---------------------------------------------------------------------------

/// Both halves of a restart. The start half runs even when stop failed.
#[derive(Debug)]
pub struct RestartReport {
    pub stop: Result<()>,
    pub start: Result<ServerStatus>,
}

impl RestartReport {
    pub fn is_success(&self) -> bool {
        self.stop.is_ok() && self.start.is_ok()
    }

    pub fn errors(&self) -> Vec<&ServerPalError> {
        let mut errors = Vec::new();
        if let Err(e) = &self.stop {
            errors.push(e);
        }
        if let Err(e) = &self.start {
            errors.push(e);
        }
        errors
    }
}

// ---------------------------------------------------------------------------
// ProcessSupervisor
// ---------------------------------------------------------------------------

pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    label: String,
    handle: Option<ServerHandle>,
    observer: SharedObserver,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        label: impl Into<String>,
        observer: SharedObserver,
    ) -> Self {
        Self {
            launcher,
            label: label.into(),
            handle: None,
            observer,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Takes effect for the next start/stop.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Launch the server unless a live handle already exists.
    pub fn start(&mut self, executable: &str) -> Result<ServerStatus> {
        self.observer
            .on_log_line("Attempting to start the server...");

        let executable = match launcher::resolve_executable(executable, "server executable") {
            Ok(path) => path,
            Err(e) => return Err(self.report(e)),
        };

        if self.is_running() {
            return Err(self.report(ServerPalError::AlreadyRunning));
        }

        let process = match self.launcher.launch(&executable, &self.label) {
            Ok(p) => p,
            // A session started by another serverpal process is still alive.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(self.report(ServerPalError::AlreadyRunning))
            }
            Err(e) => {
                return Err(self.report(ServerPalError::LaunchFailed {
                    program: executable.display().to_string(),
                    reason: e.to_string(),
                }))
            }
        };

        let mut handle = ServerHandle::new(process, executable);
        let status = handle.status();
        tracing::info!(label = %self.label, pid = ?status.pid, "server started");
        self.observer.on_log_line(&format!(
            "Server started in session '{}'{}.",
            self.label,
            status
                .pid
                .map(|p| format!(" (pid {p})"))
                .unwrap_or_default()
        ));
        self.handle = Some(handle);
        Ok(status)
    }

    /// Terminate the labelled session, whoever started it, and forget the
    /// in-memory handle.
    pub fn stop(&mut self) -> Result<()> {
        let result = self.launcher.terminate(&self.label);
        if let Some(mut handle) = self.handle.take() {
            handle.process.reap();
        }

        match result {
            Ok(Termination::Terminated) => {
                tracing::info!(label = %self.label, "server session terminated");
                self.observer
                    .on_log_line("Server and its session were terminated.");
                Ok(())
            }
            Ok(Termination::NothingToTerminate) => {
                tracing::info!(label = %self.label, "no server session to terminate");
                self.observer
                    .on_log_line("No running server session was found.");
                Ok(())
            }
            Err(e) => Err(self.report(ServerPalError::TerminationFailed {
                label: self.label.clone(),
                reason: e.to_string(),
            })),
        }
    }

    /// Stop, then start, with no validation in between.
    pub fn restart(&mut self, executable: &str) -> RestartReport {
        let stop = self.stop();
        let start = self.start(executable);
        RestartReport { stop, start }
    }

    /// Checks the in-memory handle only.
    pub fn is_running(&mut self) -> bool {
        self.handle.as_mut().is_some_and(|h| h.is_alive())
    }

    pub fn status(&mut self) -> Option<ServerStatus> {
        self.handle.as_mut().map(|h| h.status())
    }

    fn report(&self, err: ServerPalError) -> ServerPalError {
        if err.is_informational() {
            tracing::info!(label = %self.label, "{err}");
            self.observer.on_log_line("Server is already running.");
        } else {
            tracing::warn!(label = %self.label, error = %err, "server operation failed");
            self.observer.on_log_line(&format!("Server operation failed: {err}"));
        }
        err
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
