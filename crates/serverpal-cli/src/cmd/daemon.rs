//! Long-running host: the maintenance schedule plus a line-oriented console.
//!
//! Every console command runs on its own task, so a long backup never blocks
//! a `stop`. On exit the schedule is disarmed and running updaters are
//! interrupted. Scheduled cycles and console tasks still in flight are
//! awaited before returning. The server itself keeps running.

use crate::output::ConsoleObserver;
use anyhow::{Context, Result};
use serverpal_core::observer::{SharedObserver, TracingObserver};
use serverpal_core::orchestrator::MaintenanceOrchestrator;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

const HELP: &str = "\
Commands:
  start     start the server
  stop      terminate the server session
  restart   stop, then start the server
  backup    back up the source data directory now
  update    run a maintenance cycle now (backup, update, restart if updated)
  status    show server and schedule state
  reload    re-read the config file and re-arm the schedule
  help      show this list
  quit      leave serverpal (the server keeps running)";

pub fn run(config_path: &Path, no_console: bool) -> Result<()> {
    // Headless hosts send engine events to the log instead of the terminal.
    let observer: SharedObserver = if no_console {
        Arc::new(TracingObserver)
    } else {
        ConsoleObserver::shared(false)
    };
    let engine = super::engine(config_path, observer)?;
    let rt = super::runtime()?;

    rt.block_on(async {
        let mut tasks = JoinSet::new();

        engine.start_schedule();
        if engine.config().check_for_updates_on_start {
            tracing::info!("checking for updates on start");
            let e = engine.clone();
            tasks.spawn(async move {
                e.run_maintenance_cycle().await;
            });
        }

        if no_console {
            println!("serverpal running. Press Ctrl-C to exit.");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
        } else {
            println!("serverpal console. Type 'help' for commands.");
            console(&engine, config_path, &mut tasks).await?;
        }

        engine.shutdown_and_wait().await;
        while tasks.join_next().await.is_some() {}
        anyhow::Ok(())
    })
}

async fn console(
    engine: &MaintenanceOrchestrator,
    config_path: &Path,
    tasks: &mut JoinSet<()>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read console input")? else {
                    break;
                };
                if !dispatch(engine, config_path, tasks, line.trim()) {
                    break;
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Returns `false` when the console should exit.
fn dispatch(
    engine: &MaintenanceOrchestrator,
    config_path: &Path,
    tasks: &mut JoinSet<()>,
    command: &str,
) -> bool {
    let e = engine.clone();
    match command {
        "" => {}
        "start" => {
            tasks.spawn(async move {
                let _ = e.start_server().await;
            });
        }
        "stop" => {
            tasks.spawn(async move {
                let _ = e.stop_server().await;
            });
        }
        "restart" => {
            tasks.spawn(async move {
                e.restart_server().await;
            });
        }
        "backup" => {
            tasks.spawn(async move {
                let _ = e.backup().await;
            });
        }
        "update" => {
            tasks.spawn(async move {
                e.run_maintenance_cycle().await;
            });
        }
        "status" => print_status(engine),
        "reload" => reload(engine, config_path),
        "help" => println!("{HELP}"),
        "quit" | "exit" => return false,
        other => println!("Unknown command '{other}'. Type 'help' for commands."),
    }
    true
}

fn print_status(engine: &MaintenanceOrchestrator) {
    match engine.server_status() {
        Some(status) if status.running => match status.pid {
            Some(pid) => println!("Server: running (pid {pid})"),
            None => println!("Server: running"),
        },
        Some(status) => match status.exit_code {
            Some(code) => println!("Server: stopped (exit code {code})"),
            None => println!("Server: stopped"),
        },
        None => println!("Server: stopped"),
    }

    let schedule = engine.config().schedule();
    if engine.schedule_active() {
        println!(
            "Schedule: every {} minutes (backup before update: {})",
            schedule.interval.as_secs() / 60,
            if schedule.backup_before_update { "on" } else { "off" }
        );
    } else {
        println!("Schedule: disabled");
    }
}

fn reload(engine: &MaintenanceOrchestrator, config_path: &Path) {
    match serverpal_core::config::Config::load(config_path) {
        Ok(config) => {
            engine.reconfigure(config);
            println!("Configuration reloaded.");
        }
        Err(e) => {
            tracing::warn!(error = %e, "config reload failed");
            println!("Configuration not reloaded: {e}");
        }
    }
}
