//! Platform process-launch capability.
//!
//! The server has to be found again for termination, possibly by a later run
//! of serverpal, so every launch is tagged with a session label. On Unix the
//! label names a session record holding the server's process group; on
//! Windows it is the title of the console window the server runs in.

use crate::error::{Result, ServerPalError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Exported to the server so its own tooling can tell which session it is.
pub const SESSION_ENV: &str = "SERVERPAL_SESSION";

// ---------------------------------------------------------------------------
// LaunchedProcess
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(Option<i32>),
}

pub trait LaunchedProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check.
    fn poll(&mut self) -> ProcessState;

    /// Kill the process if it is still alive and collect its exit status.
    fn reap(&mut self);
}

impl LaunchedProcess for Child {
    fn id(&self) -> Option<u32> {
        Some(Child::id(self))
    }

    fn poll(&mut self) -> ProcessState {
        match self.try_wait() {
            Ok(None) => ProcessState::Running,
            Ok(Some(status)) => ProcessState::Exited(status.code()),
            Err(e) => {
                tracing::warn!(pid = Child::id(self), error = %e, "liveness check failed");
                ProcessState::Exited(None)
            }
        }
    }

    fn reap(&mut self) {
        if let Ok(None) = self.try_wait() {
            let _ = self.kill();
            let _ = self.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessLauncher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Terminated,
    NothingToTerminate,
}

pub trait ProcessLauncher: Send + Sync {
    /// Start `executable` in an isolated session identified by `label`.
    fn launch(&self, executable: &Path, label: &str) -> io::Result<Box<dyn LaunchedProcess>>;

    /// Forcibly terminate everything running under `label`.
    ///
    /// Finding nothing to terminate is `Ok(NothingToTerminate)`; `Err` is
    /// reserved for the termination primitive itself failing.
    fn terminate(&self, label: &str) -> io::Result<Termination>;
}

// ---------------------------------------------------------------------------
// SessionRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub label: String,
    pub pid: u32,
    pub process_group: u32,
    pub executable: PathBuf,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SystemLauncher
// ---------------------------------------------------------------------------

/// The launcher for the host operating system.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    sessions_dir: PathBuf,
}

impl SystemLauncher {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Read the record for `label`. Unreadable records are discarded.
    pub fn read_record(&self, label: &str) -> Option<SessionRecord> {
        let path = crate::paths::session_record_path(&self.sessions_dir, label);
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_yaml::from_str::<SessionRecord>(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable session record");
                let _ = crate::io::remove_if_exists(&path);
                None
            }
        }
    }

    fn write_record(&self, record: &SessionRecord) -> Result<()> {
        let path = crate::paths::session_record_path(&self.sessions_dir, &record.label);
        let data = serde_yaml::to_string(record)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    fn remove_record(&self, label: &str) {
        let path = crate::paths::session_record_path(&self.sessions_dir, label);
        if let Err(e) = crate::io::remove_if_exists(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove session record");
        }
    }
}

#[cfg(unix)]
impl ProcessLauncher for SystemLauncher {
    fn launch(&self, executable: &Path, label: &str) -> io::Result<Box<dyn LaunchedProcess>> {
        use std::os::unix::process::CommandExt;

        if let Some(record) = self.read_record(label) {
            if session_is_live(&record) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("session '{label}' is still active (pid {})", record.pid),
                ));
            }
            self.remove_record(label);
        }

        let mut cmd = Command::new(executable);
        if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd.env(SESSION_ENV, label)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // New process group led by the server, so the whole tree can be
            // signalled at once.
            .process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id();
        let record = SessionRecord {
            label: label.to_string(),
            pid,
            process_group: pid,
            executable: executable.to_path_buf(),
            started_at: Utc::now(),
        };
        if let Err(e) = self.write_record(&record) {
            tracing::warn!(label, pid, error = %e, "server started but session record was not written");
        }
        tracing::debug!(label, pid, "launched server session");
        Ok(Box::new(child))
    }

    fn terminate(&self, label: &str) -> io::Result<Termination> {
        let Some(record) = self.read_record(label) else {
            return Ok(Termination::NothingToTerminate);
        };
        // `kill -- -1` would signal every process we may signal.
        if record.process_group <= 1 {
            tracing::warn!(label, pgid = record.process_group, "ignoring session record with invalid process group");
            self.remove_record(label);
            return Ok(Termination::NothingToTerminate);
        }
        // The group id may have been reused since the record was written.
        if !session_is_live(&record) {
            tracing::info!(label, pgid = record.process_group, "session record is stale, not signalling");
            self.remove_record(label);
            return Ok(Termination::NothingToTerminate);
        }

        let status = Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", record.process_group)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        self.remove_record(label);

        if status.success() {
            Ok(Termination::Terminated)
        } else {
            // The group is already gone.
            Ok(Termination::NothingToTerminate)
        }
    }
}

#[cfg(windows)]
impl ProcessLauncher for SystemLauncher {
    fn launch(&self, executable: &Path, label: &str) -> io::Result<Box<dyn LaunchedProcess>> {
        use std::os::windows::process::CommandExt;

        // `start` takes the first quoted argument as the window title.
        let child = Command::new("cmd")
            .raw_arg(format!("/c start \"{label}\" \"{}\"", executable.display()))
            .env(SESSION_ENV, label)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tracing::debug!(label, "launched server console window");
        Ok(Box::new(child))
    }

    fn terminate(&self, label: &str) -> io::Result<Termination> {
        let output = Command::new("taskkill")
            .args(["/FI", &format!("WINDOWTITLE eq {label}"), "/F", "/T"])
            .output()?;
        // taskkill reports "INFO: No tasks running..." with a zero exit code.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && !stdout.contains("INFO:") {
            Ok(Termination::Terminated)
        } else {
            Ok(Termination::NothingToTerminate)
        }
    }
}

#[cfg(not(any(unix, windows)))]
impl ProcessLauncher for SystemLauncher {
    fn launch(&self, _executable: &Path, _label: &str) -> io::Result<Box<dyn LaunchedProcess>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "server sessions are not supported on this platform",
        ))
    }

    fn terminate(&self, _label: &str) -> io::Result<Termination> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "server sessions are not supported on this platform",
        ))
    }
}

// ---------------------------------------------------------------------------
// Session ownership
// ---------------------------------------------------------------------------

/// True while some process in the recorded group still carries this
/// session's `SERVERPAL_SESSION` marker in its environment.
#[cfg(target_os = "linux")]
pub fn session_is_live(record: &SessionRecord) -> bool {
    let marker = format!("{SESSION_ENV}={}", record.label);
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| process_group_of(*pid) == Some(record.process_group))
        .any(|pid| environ_contains(pid, &marker))
}

/// Process group id from `/proc/<pid>/stat`. The command name may contain
/// spaces and parentheses, so fields are counted after the last `)`.
#[cfg(target_os = "linux")]
fn process_group_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    // state, ppid, pgrp
    rest.split_whitespace().nth(2)?.parse().ok()
}

#[cfg(target_os = "linux")]
fn environ_contains(pid: u32, entry: &str) -> bool {
    std::fs::read(format!("/proc/{pid}/environ"))
        .map(|env| env.split(|b| *b == 0).any(|var| var == entry.as_bytes()))
        .unwrap_or(false)
}

/// Without `/proc`, the group leader must still be alive and running the
/// recorded executable.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn session_is_live(record: &SessionRecord) -> bool {
    let executable = record.executable.to_string_lossy();
    Command::new("ps")
        .args(["-o", "command=", "-p", &record.pid.to_string()])
        .stderr(Stdio::null())
        .output()
        .map(|out| {
            out.status.success() && String::from_utf8_lossy(&out.stdout).contains(&*executable)
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Executable resolution
// ---------------------------------------------------------------------------

/// Resolve a configured executable. A bare program name that is not a file
/// in the working directory is looked up on `PATH`.
pub fn resolve_executable(raw: &str, what: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ServerPalError::Config(format!("{what} path is not set")));
    }
    let path = Path::new(raw);
    if path.components().count() == 1 && !path.exists() {
        return which::which(raw).map_err(|e| ServerPalError::LaunchFailed {
            program: raw.to_string(),
            reason: e.to_string(),
        });
    }
    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
