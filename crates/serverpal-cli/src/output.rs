use serde::Serialize;
use serverpal_core::observer::{Observer, SharedObserver};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

const NO_PROGRESS: u16 = u16::MAX;

/// Prints engine events to the terminal. With `--json` they go to stderr so
/// stdout carries only the JSON document.
pub struct ConsoleObserver {
    to_stderr: bool,
    last_progress: AtomicU16,
}

impl ConsoleObserver {
    pub fn shared(json: bool) -> SharedObserver {
        Arc::new(Self {
            to_stderr: json,
            last_progress: AtomicU16::new(NO_PROGRESS),
        })
    }

    fn emit(&self, line: &str) {
        if self.to_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
}

impl Observer for ConsoleObserver {
    fn on_log_line(&self, line: &str) {
        self.emit(line);
    }

    fn on_progress(&self, percent: u8) {
        // One line per distinct percentage.
        if self.last_progress.swap(percent as u16, Ordering::Relaxed) != percent as u16 {
            self.emit(&format!("Backup progress: {percent}%"));
        }
    }
}
