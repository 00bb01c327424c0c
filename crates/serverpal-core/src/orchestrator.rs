//! Backup, update, and conditional restart, manual or on a timer.
//!
//! Within one cycle the backup strictly precedes the update and the update
//! strictly precedes the restart decision. Backups are mutually exclusive
//! across the engine and supervisor operations are serialized behind one
//! lock, so independent manual requests never interleave on the same
//! resource.

use crate::archiver::{self, BackupSummary};
use crate::config::{Config, MAX_INTERVAL_MINUTES};
use crate::error::{Result, ServerPalError};
use crate::launcher::ProcessLauncher;
use crate::observer::SharedObserver;
use crate::supervisor::{ProcessSupervisor, RestartReport, ServerStatus};
use crate::updater::{UpdateOutcome, UpdateRequest, UpdateRunner};
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

/// Recurring maintenance settings. Only reconfiguration changes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceSchedule {
    pub enabled: bool,
    pub interval: Duration,
    pub backup_before_update: bool,
}

// ---------------------------------------------------------------------------
// Cycle reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackupStep {
    Completed(BackupSummary),
    Failed { cause: String },
}

/// What one maintenance cycle did.
#[derive(Debug)]
pub struct CycleReport {
    /// `None` when backup-before-update is off.
    pub backup: Option<BackupStep>,
    pub update: UpdateOutcome,
    /// Present only when the update was applied.
    pub restart: Option<RestartReport>,
}

impl CycleReport {
    pub fn restarted(&self) -> bool {
        self.restart.is_some()
    }
}

// ---------------------------------------------------------------------------
// MaintenanceOrchestrator
// ---------------------------------------------------------------------------

struct Inner {
    config: RwLock<Config>,
    observer: SharedObserver,
    supervisor: Mutex<ProcessSupervisor>,
    /// Last status seen by a supervisor operation, served while one is busy.
    last_status: Mutex<Option<ServerStatus>>,
    backup_guard: tokio::sync::Mutex<()>,
    cycle_in_flight: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    schedule_task: Mutex<Option<JoinHandle<()>>>,
    /// Cycles started by the timer, drained on shutdown.
    scheduled: Mutex<JoinSet<()>>,
}

/// Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct MaintenanceOrchestrator {
    inner: Arc<Inner>,
}

impl MaintenanceOrchestrator {
    pub fn new(config: Config, launcher: Arc<dyn ProcessLauncher>, observer: SharedObserver) -> Self {
        let supervisor = ProcessSupervisor::new(launcher, config.session_label.clone(), observer.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                observer,
                supervisor: Mutex::new(supervisor),
                last_status: Mutex::new(None),
                backup_guard: tokio::sync::Mutex::new(()),
                cycle_in_flight: AtomicBool::new(false),
                shutdown_tx,
                schedule_task: Mutex::new(None),
                scheduled: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration and re-arm the schedule from it. Running
    /// operations keep the configuration they started with.
    pub fn reconfigure(&self, config: Config) {
        self.inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_label(config.session_label.clone());
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        tracing::info!("configuration replaced");
        self.start_schedule();
    }

    // -- server ------------------------------------------------------------

    pub async fn start_server(&self) -> Result<ServerStatus> {
        let executable = self.config().server_executable_path;
        self.with_supervisor(move |sup| sup.start(&executable)).await
    }

    pub async fn stop_server(&self) -> Result<()> {
        self.with_supervisor(|sup| sup.stop()).await
    }

    pub async fn restart_server(&self) -> RestartReport {
        let executable = self.config().server_executable_path;
        self.with_supervisor(move |sup| sup.restart(&executable)).await
    }

    pub fn is_running(&self) -> bool {
        self.server_status().is_some_and(|s| s.running)
    }

    /// Never waits on a launch or stop in progress; the last known status is
    /// returned instead.
    pub fn server_status(&self) -> Option<ServerStatus> {
        let mut sup = match self.inner.supervisor.try_lock() {
            Ok(sup) => sup,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return self.inner.cached_status(),
        };
        let status = sup.status();
        drop(sup);
        self.inner.cache_status(status.clone());
        status
    }

    /// Runs a supervisor operation on the blocking pool; launching and
    /// terminating shell out to the platform's process tools.
    async fn with_supervisor<T, F>(&self, op: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut ProcessSupervisor) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        off_runtime(move || {
            let mut sup = inner
                .supervisor
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let value = op(&mut sup);
            inner.cache_status(sup.status());
            value
        })
        .await
    }

    // -- backup ------------------------------------------------------------

    /// Archive the source directory into a fresh timestamped archive. Waits
    /// for any backup already in progress.
    pub async fn backup(&self) -> Result<BackupSummary> {
        let _guard = self.inner.backup_guard.lock().await;
        let result = self.backup_locked().await;
        match &result {
            Ok(summary) => {
                tracing::info!(
                    archive = %summary.archive.display(),
                    files = summary.files,
                    "backup completed"
                );
                self.inner.observer.on_log_line(&format!(
                    "Backup completed: {} ({} files).",
                    summary.archive.display(),
                    summary.files
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "backup failed");
                self.inner
                    .observer
                    .on_log_line(&format!("Backup failed: {e}"));
            }
        }
        result
    }

    async fn backup_locked(&self) -> Result<BackupSummary> {
        let cfg = self.config();
        let source = required_dir(&cfg.source_data_directory, "source data directory")?;
        let backup_dir = required_dir(&cfg.backup_destination_directory, "backup destination directory")?;

        self.inner.observer.on_log_line(&format!(
            "Starting backup of {} into {}...",
            source.display(),
            backup_dir.display()
        ));
        let observer = self.inner.observer.clone();
        off_runtime(move || {
            crate::io::ensure_dir(&backup_dir)?;
            archiver::archive_to_dir(&source, &backup_dir, &Local::now(), |percent| {
                observer.on_progress(percent)
            })
        })
        .await
    }

    // -- update ------------------------------------------------------------

    /// Run the updater once. Never touches the server.
    pub async fn update(&self) -> UpdateOutcome {
        self.inner
            .observer
            .on_log_line("Checking for server updates...");
        let stopping = *self.inner.shutdown_tx.borrow();
        if stopping {
            return UpdateOutcome::Interrupted;
        }
        let cfg = self.config();
        let request = UpdateRequest {
            executable: cfg.updater_executable_path,
            install_dir: PathBuf::from(cfg.install_dir),
            app_id: cfg.app_id,
        };
        UpdateRunner::new(self.inner.observer.clone(), self.inner.shutdown_tx.subscribe())
            .run(&request)
            .await
    }

    // -- maintenance cycle -------------------------------------------------

    /// Optional backup, then update, then restart only if the update was
    /// applied. Returns `None` when another cycle is already in flight.
    pub async fn run_maintenance_cycle(&self) -> Option<CycleReport> {
        let Some(_cycle) = CycleGuard::acquire(&self.inner.cycle_in_flight) else {
            tracing::info!("maintenance cycle already in flight, skipping");
            self.inner
                .observer
                .on_log_line("A maintenance cycle is already running; skipping this request.");
            return None;
        };

        tracing::info!("maintenance cycle started");
        let cfg = self.config();

        // A failed backup does not block the update.
        let backup = if cfg.backup_before_update {
            Some(match self.backup().await {
                Ok(summary) => BackupStep::Completed(summary),
                Err(e) => BackupStep::Failed {
                    cause: e.to_string(),
                },
            })
        } else {
            None
        };

        let update = self.update().await;
        self.inner.observer.on_log_line(outcome_message(&update));
        tracing::info!(outcome = %update, "maintenance cycle finished update step");

        let restart = match update {
            UpdateOutcome::UpdateAppliedSuccessfully => Some(self.restart_server().await),
            _ => None,
        };

        Some(CycleReport {
            backup,
            update,
            restart,
        })
    }

    pub fn spawn_backup(&self) -> JoinHandle<Result<BackupSummary>> {
        let this = self.clone();
        tokio::spawn(async move { this.backup().await })
    }

    pub fn spawn_update(&self) -> JoinHandle<UpdateOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.update().await })
    }

    pub fn spawn_maintenance_cycle(&self) -> JoinHandle<Option<CycleReport>> {
        let this = self.clone();
        tokio::spawn(async move { this.run_maintenance_cycle().await })
    }

    // -- schedule ----------------------------------------------------------

    /// (Re)arm the recurring cycle from the current configuration. The first
    /// cycle runs one full interval from now. Outside a Tokio runtime this
    /// only disarms.
    pub fn start_schedule(&self) {
        self.stop_schedule();

        let schedule = self.config().schedule();
        if !schedule.enabled {
            tracing::debug!("maintenance schedule disabled");
            return;
        }
        if schedule.interval.is_zero() {
            tracing::warn!("maintenance interval is zero, schedule not started");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, schedule not started");
            return;
        };
        let minutes = schedule.interval.as_secs() / 60;
        let first_tick = Some(schedule.interval)
            .filter(|i| *i <= Duration::from_secs(MAX_INTERVAL_MINUTES * 60))
            .and_then(|i| Instant::now().checked_add(i));
        let Some(first_tick) = first_tick else {
            tracing::warn!(
                interval_minutes = minutes,
                "maintenance interval too long, schedule not started"
            );
            self.inner.observer.on_log_line(&format!(
                "Maintenance schedule not started: {minutes} minutes is longer than the \
                 {MAX_INTERVAL_MINUTES}-minute maximum."
            ));
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let task = runtime.spawn(run_schedule(weak, first_tick, schedule.interval));
        *self
            .inner
            .schedule_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        tracing::info!(interval_minutes = minutes, "maintenance schedule armed");
        self.inner.observer.on_log_line(&format!(
            "Scheduled maintenance every {minutes} minutes."
        ));
    }

    /// Disarm the timer. A cycle already running completes.
    pub fn stop_schedule(&self) {
        let task = self
            .inner
            .schedule_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            tracing::info!("maintenance schedule stopped");
        }
    }

    pub fn schedule_active(&self) -> bool {
        self.inner
            .schedule_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop the schedule and interrupt running updaters. The server process
    /// is left alone.
    pub fn shutdown(&self) {
        self.stop_schedule();
        self.inner.shutdown_tx.send_replace(true);
        tracing::info!("orchestrator shut down");
    }

    /// [`shutdown`](Self::shutdown), then wait for scheduled cycles still
    /// running to wind down.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let mut cycles = std::mem::take(
            &mut *self
                .inner
                .scheduled
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if cycles.is_empty() {
            return;
        }
        tracing::info!(cycles = cycles.len(), "waiting for scheduled cycles");
        self.inner.observer.on_log_line(&format!(
            "Waiting for {} scheduled maintenance cycle(s) to finish...",
            cycles.len()
        ));
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(error = %e, "scheduled maintenance cycle panicked");
                }
            }
        }
    }
}

impl MaintenanceOrchestrator {
    fn spawn_scheduled_cycle(&self) {
        let this = self.clone();
        let mut scheduled = self
            .inner
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while scheduled.try_join_next().is_some() {}
        scheduled.spawn(async move {
            this.run_maintenance_cycle().await;
        });
    }
}

impl Inner {
    fn cached_status(&self) -> Option<ServerStatus> {
        self.last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cache_status(&self, status: Option<ServerStatus>) {
        *self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }
}

async fn run_schedule(inner: Weak<Inner>, first_tick: Instant, period: Duration) {
    let mut ticker = tokio::time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        tracing::info!("scheduled maintenance cycle due");
        MaintenanceOrchestrator { inner }.spawn_scheduled_cycle();
    }
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn outcome_message(outcome: &UpdateOutcome) -> &'static str {
    match outcome {
        UpdateOutcome::NoUpdateFound => "No update found or applied. Server continues running.",
        UpdateOutcome::UpdateAppliedSuccessfully => {
            "Update applied successfully. Restarting the server..."
        }
        UpdateOutcome::UpdateFailed(_) => "Update failed. Server left untouched.",
        UpdateOutcome::LaunchFailed(_) => "Updater could not be launched. Server left untouched.",
        UpdateOutcome::Interrupted => "Update interrupted. Server left untouched.",
    }
}

fn required_dir(raw: &str, what: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ServerPalError::Config(format!("{what} is not set")));
    }
    Ok(PathBuf::from(raw))
}

/// Run blocking work on the blocking pool, re-raising its panics here.
async fn off_runtime<T, F>(work: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::testing::RecordingObserver;
    use crate::supervisor::tests::FakeLauncher;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const STARTED: &str = "AppID 2394010 update changed : Running Update,";
    const FINISHED: &str =
        "AppID 2394010 scheduler finished : removed from schedule (result No Error, state 0xc)";

    struct Fixture {
        dir: TempDir,
        engine: MaintenanceOrchestrator,
        launcher: Arc<FakeLauncher>,
        observer: Arc<RecordingObserver>,
    }

    fn fixture(configure: impl FnOnce(&mut Config, &Path)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            server_executable_path: "/srv/pal/PalServer.sh".into(),
            ..Config::default()
        };
        configure(&mut config, dir.path());
        let launcher = Arc::new(FakeLauncher::default());
        let observer = RecordingObserver::shared();
        let engine = MaintenanceOrchestrator::new(config, launcher.clone(), observer.clone());
        Fixture {
            dir,
            engine,
            launcher,
            observer,
        }
    }

    #[cfg(unix)]
    fn fake_updater(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-updater.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn seed_source(dir: &Path) -> PathBuf {
        let source = dir.join("Saved");
        fs::create_dir_all(source.join("SaveGames")).unwrap();
        fs::write(source.join("Level.sav"), b"level").unwrap();
        fs::write(source.join("SaveGames/Player.sav"), b"player").unwrap();
        source
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn started_marker_only_leaves_server_alone() {
        let fx = fixture(|cfg, dir| {
            cfg.updater_executable_path = fake_updater(dir, &format!("echo '{STARTED}'"));
        });
        let report = fx.engine.run_maintenance_cycle().await.unwrap();
        assert_eq!(report.update, UpdateOutcome::NoUpdateFound);
        assert!(!report.restarted());
        assert!(fx.launcher.calls().is_empty());
        assert!(fx.observer.saw("No update found or applied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn applied_update_restarts_exactly_once() {
        let fx = fixture(|cfg, dir| {
            cfg.updater_executable_path =
                fake_updater(dir, &format!("echo '{STARTED}'\necho '{FINISHED}'"));
        });
        let report = fx.engine.run_maintenance_cycle().await.unwrap();
        assert_eq!(report.update, UpdateOutcome::UpdateAppliedSuccessfully);
        assert!(report.restart.as_ref().unwrap().is_success());
        assert_eq!(fx.launcher.calls(), vec!["terminate", "launch"]);
        assert!(fx.engine.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_updater_leaves_server_alone() {
        let fx = fixture(|cfg, dir| {
            cfg.updater_executable_path = fake_updater(dir, "echo 'Login Failure'\nexit 3");
        });
        let report = fx.engine.run_maintenance_cycle().await.unwrap();
        assert_eq!(report.update, UpdateOutcome::UpdateFailed(3));
        assert!(fx.launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn unset_updater_is_reported_not_raised() {
        let fx = fixture(|_, _| {});
        let report = fx.engine.run_maintenance_cycle().await.unwrap();
        assert!(matches!(report.update, UpdateOutcome::LaunchFailed(_)));
        assert!(report.backup.is_none());
        assert!(fx.observer.saw("Updater could not be launched"));
    }

    #[tokio::test]
    async fn backup_failure_does_not_block_update() {
        let fx = fixture(|cfg, dir| {
            cfg.backup_before_update = true;
            cfg.source_data_directory = dir.join("missing").to_string_lossy().into_owned();
            cfg.backup_destination_directory = dir.join("backups").to_string_lossy().into_owned();
        });
        let report = fx.engine.run_maintenance_cycle().await.unwrap();
        assert!(matches!(report.backup, Some(BackupStep::Failed { .. })));
        assert!(matches!(report.update, UpdateOutcome::LaunchFailed(_)));

        let lines = fx.observer.lines();
        let backup_at = lines.iter().position(|l| l.contains("Backup failed")).unwrap();
        let update_at = lines
            .iter()
            .position(|l| l.contains("Checking for server updates"))
            .unwrap();
        assert!(backup_at < update_at);
    }

    #[tokio::test]
    async fn backup_writes_timestamped_archive() {
        let fx = fixture(|cfg, dir| {
            cfg.source_data_directory = seed_source(dir).to_string_lossy().into_owned();
            cfg.backup_destination_directory = dir.join("backups").to_string_lossy().into_owned();
        });
        let summary = fx.engine.backup().await.unwrap();
        assert_eq!(summary.files, 2);
        assert!(summary.archive.starts_with(fx.dir.path().join("backups")));
        let name = summary.archive.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("backup_") && name.ends_with(".zip"), "{name}");
        assert_eq!(fx.observer.progress().last(), Some(&100));
    }

    #[tokio::test]
    async fn backup_without_destination_is_config_error() {
        let fx = fixture(|cfg, dir| {
            cfg.source_data_directory = seed_source(dir).to_string_lossy().into_owned();
        });
        let err = fx.engine.backup().await.unwrap_err();
        assert!(matches!(err, ServerPalError::Config(_)));
        assert!(fx.observer.saw("Backup failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_backups_never_share_an_archive() {
        let fx = fixture(|cfg, dir| {
            cfg.source_data_directory = seed_source(dir).to_string_lossy().into_owned();
            cfg.backup_destination_directory = dir.join("backups").to_string_lossy().into_owned();
        });
        let a = fx.engine.spawn_backup();
        let b = fx.engine.spawn_backup();
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_ne!(a.archive, b.archive);
        assert!(a.archive.exists() && b.archive.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let fx = fixture(|cfg, dir| {
            cfg.updater_executable_path = fake_updater(dir, "sleep 1");
        });
        let first = fx.engine.spawn_maintenance_cycle();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(fx.engine.run_maintenance_cycle().await.is_none());
        assert!(fx.observer.saw("skipping"));
        assert!(first.await.unwrap().is_some());
        assert!(fx.engine.run_maintenance_cycle().await.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_interrupts_running_update() {
        let fx = fixture(|cfg, dir| {
            cfg.updater_executable_path = fake_updater(dir, "exec sleep 30");
        });
        let update = fx.engine.spawn_update();
        tokio::time::sleep(Duration::from_millis(200)).await;
        fx.engine.shutdown();

        let outcome = tokio::time::timeout(Duration::from_secs(5), update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Interrupted);
        assert_eq!(fx.engine.update().await, UpdateOutcome::Interrupted);
        assert!(fx.launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn manual_server_operations_go_through_launcher() {
        let fx = fixture(|_, _| {});
        let status = fx.engine.start_server().await.unwrap();
        assert!(status.running);
        assert!(fx.engine.server_status().unwrap().running);

        fx.engine.stop_server().await.unwrap();
        assert!(!fx.engine.is_running());
        assert_eq!(fx.launcher.calls(), vec!["launch", "terminate"]);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_waits_one_interval_then_repeats() {
        let fx = fixture(|cfg, _| {
            cfg.schedule_enabled = true;
            cfg.schedule_interval_minutes = 5;
        });
        fx.engine.start_schedule();
        assert!(fx.engine.schedule_active());

        settle().await;
        assert_eq!(fx.observer.count("Checking for server updates"), 0);

        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        settle().await;
        assert_eq!(fx.observer.count("Checking for server updates"), 1);

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        settle().await;
        assert_eq!(fx.observer.count("Checking for server updates"), 2);

        fx.engine.stop_schedule();
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        settle().await;
        assert_eq!(fx.observer.count("Checking for server updates"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_rearms_schedule() {
        let fx = fixture(|_, _| {});
        fx.engine.start_schedule();
        assert!(!fx.engine.schedule_active());

        let mut cfg = fx.engine.config();
        cfg.schedule_enabled = true;
        cfg.schedule_interval_minutes = 1;
        cfg.session_label = "PalWorld2".into();
        fx.engine.reconfigure(cfg);

        assert!(fx.engine.schedule_active());
        assert_eq!(fx.engine.config().session_label, "PalWorld2");
        assert!(fx.observer.saw("every 1 minutes"));

        fx.engine.shutdown();
        assert!(!fx.engine.schedule_active());
    }

    #[tokio::test]
    async fn status_is_served_while_supervisor_is_busy() {
        let fx = fixture(|_, _| {});
        fx.engine.start_server().await.unwrap();

        let _busy = fx.engine.inner.supervisor.lock().unwrap();
        let status = fx.engine.server_status().unwrap();
        assert!(status.running);
        assert_eq!(status.executable, PathBuf::from("/srv/pal/PalServer.sh"));
        assert!(fx.engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn overlong_interval_is_reported_and_not_armed() {
        let fx = fixture(|cfg, _| {
            cfg.schedule_enabled = true;
            cfg.schedule_interval_minutes = u64::MAX;
        });
        fx.engine.start_schedule();

        assert!(!fx.engine.schedule_active());
        assert!(fx.observer.saw("Maintenance schedule not started"));
        assert!(!fx.observer.saw("Scheduled maintenance every"));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_scheduled_cycle() {
        let fx = fixture(|cfg, dir| {
            cfg.schedule_enabled = true;
            cfg.schedule_interval_minutes = 1;
            cfg.updater_executable_path = fake_updater(dir, "exec sleep 30");
        });
        fx.engine.start_schedule();
        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(fx.observer.count("Checking for server updates"), 1);

        fx.engine.shutdown_and_wait().await;
        assert!(fx.observer.saw("Waiting for 1 scheduled maintenance cycle(s)"));
        assert!(fx.observer.saw("Update interrupted"));
        assert!(!fx.engine.schedule_active());
        assert!(fx.launcher.calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_without_scheduled_cycles_returns_at_once() {
        let fx = fixture(|_, _| {});
        fx.engine.shutdown_and_wait().await;
        assert!(!fx.observer.saw("Waiting for"));
        assert_eq!(fx.engine.update().await, UpdateOutcome::Interrupted);
    }

    #[test]
    fn schedule_outside_runtime_does_not_arm() {
        let fx = fixture(|cfg, _| cfg.schedule_enabled = true);
        fx.engine.start_schedule();
        assert!(!fx.engine.schedule_active());
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }
}
