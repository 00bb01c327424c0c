//! Drives the external updater and decides whether it actually updated.
//!
//! The updater exits with status 0 whether or not anything changed, so the
//! outcome comes from its output: a "Running Update" marker for the tracked
//! application followed by a "removed from schedule (result No Error" marker.
//! The first alone also appears during no-op validation passes.

use crate::launcher;
use crate::observer::SharedObserver;
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// Emitted when the updater begins applying an update.
pub const UPDATE_STARTED_MARKER: &str = "update changed : Running Update";

/// Emitted when the update finished without error.
pub const UPDATE_FINISHED_MARKER: &str =
    "scheduler finished : removed from schedule (result No Error";

/// Exit code reported when the updater was killed by a signal.
const SIGNALLED_EXIT_CODE: i32 = -1;

// ---------------------------------------------------------------------------
// UpdateState / UpdateTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Running,
    Completed,
}

/// Marker state machine for one updater run.
#[derive(Debug, Clone)]
pub struct UpdateTracker {
    started: String,
    finished: String,
    state: UpdateState,
}

impl UpdateTracker {
    pub fn new(app_id: &str) -> Self {
        Self {
            started: format!("AppID {app_id} {UPDATE_STARTED_MARKER}"),
            finished: format!("AppID {app_id} {UPDATE_FINISHED_MARKER}"),
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Feed one output line and return the resulting state.
    pub fn observe(&mut self, line: &str) -> UpdateState {
        self.state = match self.state {
            UpdateState::Idle if line.contains(&self.started) => UpdateState::Running,
            UpdateState::Running if line.contains(&self.finished) => UpdateState::Completed,
            state => state,
        };
        self.state
    }

    /// Classify the run once the updater has exited.
    pub fn outcome(&self, exit_code: i32) -> UpdateOutcome {
        match self.state {
            UpdateState::Completed => UpdateOutcome::UpdateAppliedSuccessfully,
            UpdateState::Idle if exit_code != 0 => UpdateOutcome::UpdateFailed(exit_code),
            _ => UpdateOutcome::NoUpdateFound,
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum UpdateOutcome {
    NoUpdateFound,
    UpdateAppliedSuccessfully,
    UpdateFailed(i32),
    LaunchFailed(String),
    /// Engine shutdown while the updater was running; the updater was killed.
    Interrupted,
}

impl UpdateOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            UpdateOutcome::UpdateFailed(_) | UpdateOutcome::LaunchFailed(_)
        )
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::NoUpdateFound => write!(f, "no update found or applied"),
            UpdateOutcome::UpdateAppliedSuccessfully => write!(f, "update applied successfully"),
            UpdateOutcome::UpdateFailed(code) => write!(f, "update failed with exit code {code}"),
            UpdateOutcome::LaunchFailed(cause) => write!(f, "updater could not be launched: {cause}"),
            UpdateOutcome::Interrupted => write!(f, "update interrupted by shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Updater executable as configured (bare names are looked up on PATH).
    pub executable: String,
    pub install_dir: PathBuf,
    pub app_id: String,
}

impl UpdateRequest {
    /// Anonymous login, forced install directory, validated app update, and
    /// an unconditional quit so the updater always exits on its own.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["+login".into(), "anonymous".into()];
        if !self.install_dir.as_os_str().is_empty() {
            args.push("+force_install_dir".into());
            args.push(self.install_dir.clone().into_os_string());
        }
        args.extend([
            "+app_update".into(),
            self.app_id.clone().into(),
            "validate".into(),
            "+quit".into(),
        ]);
        args
    }
}

// ---------------------------------------------------------------------------
// UpdateRunner
// ---------------------------------------------------------------------------

pub struct UpdateRunner {
    observer: SharedObserver,
    shutdown: watch::Receiver<bool>,
}

impl UpdateRunner {
    /// `shutdown` flipping to `true` interrupts a running update.
    pub fn new(observer: SharedObserver, shutdown: watch::Receiver<bool>) -> Self {
        Self { observer, shutdown }
    }

    pub async fn run(&self, request: &UpdateRequest) -> UpdateOutcome {
        let executable = match launcher::resolve_executable(&request.executable, "updater executable") {
            Ok(path) => path,
            Err(e) => return self.launch_failed(e.to_string()),
        };

        let mut cmd = Command::new(&executable);
        cmd.args(request.args());
        tracing::info!(
            updater = %executable.display(),
            app_id = %request.app_id,
            install_dir = %request.install_dir.display(),
            "running updater"
        );
        self.drive(cmd, &request.app_id).await
    }

    /// Spawn `cmd`, stream and classify its output, and wait for it to exit.
    pub(crate) async fn drive(&self, mut cmd: Command, app_id: &str) -> UpdateOutcome {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return self.launch_failed(e.to_string()),
        };

        // Both streams feed one channel so lines are classified in arrival order.
        let (tx, mut rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        let shutdown = shutdown_requested(self.shutdown.clone());
        tokio::pin!(shutdown);

        let mut tracker = UpdateTracker::new(app_id);
        loop {
            tokio::select! {
                line = rx.recv() => {
                    let Some(line) = line else { break };
                    self.observer.on_log_line(&line);
                    let before = tracker.state();
                    let after = tracker.observe(&line);
                    if before != after {
                        tracing::info!(app_id, state = ?after, "updater state changed");
                    }
                }
                _ = &mut shutdown => return self.interrupt(&mut child).await,
            }
        }

        let exit_code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(SIGNALLED_EXIT_CODE),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to wait for updater");
                    SIGNALLED_EXIT_CODE
                }
            },
            _ = &mut shutdown => return self.interrupt(&mut child).await,
        };

        self.observer.on_log_line(&format!(
            "Updater completed with exit code: {exit_code}"
        ));
        let outcome = tracker.outcome(exit_code);
        tracing::info!(exit_code, outcome = %outcome, "updater finished");
        outcome
    }

    fn launch_failed(&self, cause: String) -> UpdateOutcome {
        tracing::warn!(%cause, "updater launch failed");
        self.observer
            .on_log_line(&format!("Failed to launch the updater: {cause}"));
        UpdateOutcome::LaunchFailed(cause)
    }

    async fn interrupt(&self, child: &mut tokio::process::Child) -> UpdateOutcome {
        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "failed to kill updater");
        }
        let _ = child.wait().await;
        tracing::info!("updater interrupted by shutdown");
        self.observer
            .on_log_line("Update interrupted by shutdown; the updater was stopped.");
        UpdateOutcome::Interrupted
    }
}

/// Forward lines until end of stream. Invalid UTF-8 is replaced rather than
/// ending the stream, so the pipe never fills up unread.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "updater output stream closed");
                break;
            }
        }
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone.
async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
