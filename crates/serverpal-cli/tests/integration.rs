#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STARTED: &str = "AppID 2394010 update changed : Running Update,";
const FINISHED: &str =
    "AppID 2394010 scheduler finished : removed from schedule (result No Error, state 0xc)";

fn config_path(dir: &TempDir) -> PathBuf {
    dir.path().join("config.yaml")
}

fn serverpal(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("serverpal").unwrap();
    cmd.current_dir(dir.path())
        .env("SERVERPAL_CONFIG", config_path(dir))
        .env_remove("RUST_LOG");
    cmd
}

fn set(dir: &TempDir, key: &str, value: &str) {
    serverpal(dir)
        .args(["config", "set", key, value])
        .assert()
        .success();
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[cfg(unix)]
fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn seed_source(dir: &TempDir) -> PathBuf {
    let source = dir.path().join("Saved");
    fs::create_dir_all(source.join("SaveGames/0")).unwrap();
    fs::write(source.join("Config.ini"), "[Server]\n").unwrap();
    fs::write(source.join("SaveGames/0/Level.sav"), vec![7u8; 4096]).unwrap();
    fs::write(source.join("SaveGames/0/Players.sav"), "players").unwrap();
    source
}

// ---------------------------------------------------------------------------
// serverpal config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_defaults_once() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default config"));
    assert!(config_path(&dir).exists());

    serverpal(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn config_show_without_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("app_id: 2394010"))
        .stdout(predicate::str::contains("session_label: ServerPalConsole"))
        .stdout(predicate::str::contains("schedule_interval_minutes: 210"));
    assert!(!config_path(&dir).exists());
}

#[test]
fn config_set_then_get() {
    let dir = TempDir::new().unwrap();
    set(&dir, "backup_before_update", "yes");
    serverpal(&dir)
        .args(["config", "get", "backup_before_update"])
        .assert()
        .success()
        .stdout("true\n");

    let yaml = fs::read_to_string(config_path(&dir)).unwrap();
    assert!(yaml.contains("backup_before_update: true"));
}

#[test]
fn config_set_rejects_unknown_key_and_bad_values() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .args(["config", "set", "backup_dir", "/tmp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown config key"));

    serverpal(&dir)
        .args(["config", "set", "schedule_enabled", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expects true or false"));

    serverpal(&dir)
        .args(["config", "set", "session_label", "bad label!"])
        .assert()
        .failure();
}

#[test]
fn config_validate_flags_errors() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning]"));

    set(&dir, "schedule_interval_minutes", "0");
    serverpal(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn interval_beyond_a_year_is_rejected_and_never_armed() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .args(["config", "set", "schedule_interval_minutes", "18446744073709551615"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at most 525600 minutes"));

    set(&dir, "schedule_enabled", "true");
    let yaml = fs::read_to_string(config_path(&dir)).unwrap();
    fs::write(
        config_path(&dir),
        yaml.replace(
            "schedule_interval_minutes: 210",
            "schedule_interval_minutes: 18446744073709551615",
        ),
    )
    .unwrap();

    serverpal(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("at most 525600"));
    serverpal(&dir)
        .arg("daemon")
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("Maintenance schedule not started"))
        .stdout(predicate::str::contains("Scheduled maintenance every").not());
}

#[test]
fn config_show_json() {
    let dir = TempDir::new().unwrap();
    let output = serverpal(&dir)
        .args(["--json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["app_id"], "2394010");
    assert_eq!(value["schedule_enabled"], false);
}

// ---------------------------------------------------------------------------
// serverpal backup
// ---------------------------------------------------------------------------

#[test]
fn backup_creates_restorable_archive() {
    let dir = TempDir::new().unwrap();
    let source = seed_source(&dir);
    let backups = dir.path().join("backups");
    set(&dir, "source_data_directory", path_str(&source));
    set(&dir, "backup_destination_directory", path_str(&backups));

    serverpal(&dir)
        .arg("backup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup progress: 100%"))
        .stdout(predicate::str::contains("Backup completed"));

    let archives: Vec<_> = fs::read_dir(&backups).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(archives.len(), 1);
    let name = archives[0].file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("backup_") && name.ends_with(".zip"), "{name}");

    let mut zip = zip::ZipArchive::new(fs::File::open(&archives[0]).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["Config.ini", "SaveGames/0/Level.sav", "SaveGames/0/Players.sav"]
    );
    let mut players = String::new();
    std::io::Read::read_to_string(&mut zip.by_name("SaveGames/0/Players.sav").unwrap(), &mut players)
        .unwrap();
    assert_eq!(players, "players");
}

#[test]
fn backup_json_reports_summary() {
    let dir = TempDir::new().unwrap();
    let source = seed_source(&dir);
    set(&dir, "source_data_directory", path_str(&source));
    set(&dir, "backup_destination_directory", path_str(&dir.path().join("b")));

    let output = serverpal(&dir).args(["--json", "backup"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["files"], 3);
}

#[test]
fn backup_of_missing_source_fails_without_archive() {
    let dir = TempDir::new().unwrap();
    let backups = dir.path().join("backups");
    set(&dir, "source_data_directory", path_str(&dir.path().join("nope")));
    set(&dir, "backup_destination_directory", path_str(&backups));

    serverpal(&dir)
        .arg("backup")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: backup failed"));
    let leftovers = fs::read_dir(&backups).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn backup_without_configuration_fails() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .arg("backup")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not set"));
}

// ---------------------------------------------------------------------------
// serverpal update
// ---------------------------------------------------------------------------

#[test]
fn update_without_updater_fails() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .arg("update")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Updater could not be launched"));
}

#[cfg(unix)]
#[test]
fn update_with_no_change_leaves_server_alone() {
    let dir = TempDir::new().unwrap();
    let updater = script(&dir, "steamcmd.sh", &format!("echo 'Redirecting stderr'\necho '{STARTED}'"));
    set(&dir, "updater_executable_path", path_str(&updater));

    let output = serverpal(&dir).args(["--json", "update"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["update"]["outcome"], "no_update_found");
    assert!(value["restart"].is_null());

    let log = String::from_utf8_lossy(&output.stderr);
    assert!(log.contains("Redirecting stderr"));
    assert!(log.contains("No update found or applied"));
}

#[cfg(unix)]
#[test]
fn update_failure_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let updater = script(&dir, "steamcmd.sh", "echo 'ERROR! Timeout downloading item'\nexit 8");
    set(&dir, "updater_executable_path", path_str(&updater));

    serverpal(&dir)
        .arg("update")
        .assert()
        .failure()
        .stderr(predicate::str::contains("update failed with exit code 8"));
}

#[cfg(unix)]
#[test]
fn update_passes_install_dir_and_app_id() {
    let dir = TempDir::new().unwrap();
    let args_file = dir.path().join("args.txt");
    let updater = script(
        &dir,
        "steamcmd.sh",
        &format!("echo \"$@\" > '{}'", args_file.display()),
    );
    set(&dir, "updater_executable_path", path_str(&updater));
    set(&dir, "install_dir", "/srv/palworld");

    serverpal(&dir).arg("update").assert().success();
    let args = fs::read_to_string(args_file).unwrap();
    assert_eq!(
        args.trim(),
        "+login anonymous +force_install_dir /srv/palworld +app_update 2394010 validate +quit"
    );
}

#[cfg(unix)]
#[test]
fn update_backs_up_first_when_enabled() {
    let dir = TempDir::new().unwrap();
    let source = seed_source(&dir);
    let backups = dir.path().join("backups");
    let updater = script(&dir, "steamcmd.sh", &format!("echo '{STARTED}'"));
    set(&dir, "updater_executable_path", path_str(&updater));
    set(&dir, "source_data_directory", path_str(&source));
    set(&dir, "backup_destination_directory", path_str(&backups));
    set(&dir, "backup_before_update", "true");

    let output = serverpal(&dir).arg("update").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let backup_at = stdout.find("Backup completed").unwrap();
    let update_at = stdout.find("Checking for server updates").unwrap();
    assert!(backup_at < update_at);
    assert_eq!(fs::read_dir(&backups).unwrap().count(), 1);
}

// ---------------------------------------------------------------------------
// serverpal start / stop / restart
// ---------------------------------------------------------------------------

#[test]
fn stop_without_session_is_a_noop() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("No running server session was found."));
}

#[cfg(unix)]
#[test]
fn stop_ignores_record_whose_group_belongs_to_another_process() {
    use std::os::unix::process::CommandExt;

    let dir = TempDir::new().unwrap();
    let mut foreign = std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let record = dir.path().join("sessions/ServerPalConsole.yaml");
    fs::create_dir_all(record.parent().unwrap()).unwrap();
    fs::write(
        &record,
        format!(
            "label: ServerPalConsole\npid: {id}\nprocess_group: {id}\n\
             executable: /srv/pal/PalServer.sh\nstarted_at: 2024-01-01T00:00:00Z\n",
            id = foreign.id()
        ),
    )
    .unwrap();

    serverpal(&dir)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("No running server session was found."));
    let untouched = foreign.try_wait().unwrap().is_none();
    foreign.kill().unwrap();
    foreign.wait().unwrap();
    assert!(untouched, "unrelated process group was signalled");
    assert!(!record.exists());
}

#[test]
fn start_without_server_path_fails() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .arg("start")
        .assert()
        .failure()
        .stderr(predicate::str::contains("server executable path is not set"));
}

#[cfg(unix)]
#[test]
fn start_then_stop_server_session() {
    let dir = TempDir::new().unwrap();
    let server = script(&dir, "PalServer.sh", "exec sleep 30");
    set(&dir, "server_executable_path", path_str(&server));
    let record = dir.path().join("sessions/ServerPalConsole.yaml");

    serverpal(&dir)
        .arg("start")
        .assert()
        .success()
        .stdout(predicate::str::contains("Server started in session 'ServerPalConsole'"));
    assert!(record.exists());

    serverpal(&dir)
        .arg("start")
        .assert()
        .success()
        .stdout(predicate::str::contains("Server is already running."));

    serverpal(&dir)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("Server and its session were terminated."));
    assert!(!record.exists());
}

// ---------------------------------------------------------------------------
// serverpal daemon
// ---------------------------------------------------------------------------

#[test]
fn daemon_console_status_and_quit() {
    let dir = TempDir::new().unwrap();
    serverpal(&dir)
        .arg("daemon")
        .write_stdin("status\nbogus\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Server: stopped"))
        .stdout(predicate::str::contains("Schedule: disabled"))
        .stdout(predicate::str::contains("Unknown command 'bogus'"));
}

#[test]
fn daemon_reports_schedule_and_exits_on_end_of_input() {
    let dir = TempDir::new().unwrap();
    set(&dir, "schedule_enabled", "true");
    set(&dir, "schedule_interval_minutes", "90");
    serverpal(&dir)
        .arg("daemon")
        .write_stdin("status\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled maintenance every 90 minutes."))
        .stdout(predicate::str::contains("Schedule: every 90 minutes"));
}

#[test]
fn daemon_checks_for_updates_on_start() {
    let dir = TempDir::new().unwrap();
    set(&dir, "check_for_updates_on_start", "true");
    serverpal(&dir)
        .arg("daemon")
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("Checking for server updates"));
}
