//! Presentation-side sink for engine events.
//!
//! The engine never assumes a thread-affinity model for its consumer: events
//! may be delivered from the scheduler task, a worker task, or the blocking
//! thread that writes a backup archive.

use std::sync::Arc;

pub trait Observer: Send + Sync {
    /// One human-readable line: engine status messages and updater output.
    fn on_log_line(&self, line: &str);

    /// Backup progress in whole percent (0..=100).
    fn on_progress(&self, percent: u8);
}

pub type SharedObserver = Arc<dyn Observer>;

/// Forwards events to `tracing` for hosts without a presentation layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_log_line(&self, line: &str) {
        tracing::info!(target: "serverpal", "{line}");
    }

    fn on_progress(&self, percent: u8) {
        tracing::debug!(target: "serverpal", percent, "backup progress");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every event for later assertions.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        lines: Mutex<Vec<String>>,
        progress: Mutex<Vec<u8>>,
    }

    impl RecordingObserver {
        pub(crate) fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        pub(crate) fn progress(&self) -> Vec<u8> {
            self.progress.lock().unwrap().clone()
        }

        pub(crate) fn saw(&self, needle: &str) -> bool {
            self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
        }

        pub(crate) fn count(&self, needle: &str) -> usize {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.contains(needle))
                .count()
        }
    }

    impl Observer for RecordingObserver {
        fn on_log_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn on_progress(&self, percent: u8) {
            self.progress.lock().unwrap().push(percent);
        }
    }
}
