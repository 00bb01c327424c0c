//! Point-in-time ZIP backups of a directory tree.
//!
//! Archives are standard ZIP containers with maximum-compression deflate
//! entries named by their forward-slash path relative to the source root, so
//! any ordinary archive tool can restore them.

use crate::error::{Result, ServerPalError};
use crate::paths;
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate level 9.
const MAX_COMPRESSION_LEVEL: i64 = 9;

/// Entries at least this large need ZIP64 extensions.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

// ---------------------------------------------------------------------------
// BackupJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "cause", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Succeeded,
    Failed(String),
}

/// One archiver invocation. The archive is valid only when the job ends in
/// `Succeeded`, which requires every enumerated file to have been written.
#[derive(Debug)]
pub struct BackupJob {
    source: PathBuf,
    destination: PathBuf,
    total_files: u64,
    processed_files: u64,
    state: JobState,
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub source: PathBuf,
    pub archive: PathBuf,
    pub files: u64,
}

impl BackupJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            total_files: 0,
            processed_files: 0,
            state: JobState::Running,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn processed_files(&self) -> u64 {
        self.processed_files
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Run the job to completion. `on_progress` receives integer-truncated,
    /// non-decreasing percentages and ends with 100 on success.
    pub fn run(&mut self, mut on_progress: impl FnMut(u8)) -> Result<BackupSummary> {
        match self.execute(&mut on_progress) {
            Ok(()) => {
                self.state = JobState::Succeeded;
                Ok(BackupSummary {
                    source: self.source.clone(),
                    archive: self.destination.clone(),
                    files: self.processed_files,
                })
            }
            Err(e) => {
                self.state = JobState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn execute(&mut self, on_progress: &mut dyn FnMut(u8)) -> Result<()> {
        if !self.source.is_dir() {
            return Err(ServerPalError::InvalidSource(self.source.clone()));
        }

        self.total_files = self.count_files()?;
        tracing::debug!(
            source = %self.source.display(),
            total = self.total_files,
            "enumerated backup source"
        );

        // Never truncate an archive another writer got to first.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.destination)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ServerPalError::ArchiveExists(self.destination.clone()),
                _ => self.write_error(e),
            })?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(MAX_COMPRESSION_LEVEL));

        for entry in self.walk() {
            let entry = entry.map_err(|e| self.write_error(e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.processed_files == self.total_files {
                return Err(self.write_error("source gained files while the backup was running"));
            }

            let name = entry_name(&self.source, entry.path())?;
            let len = entry.metadata().map_err(|e| self.write_error(e))?.len();
            zip.start_file(name, options.large_file(len >= ZIP64_THRESHOLD))
                .map_err(|e| self.write_error(e))?;
            let mut input = File::open(entry.path()).map_err(|e| self.write_error(e))?;
            io::copy(&mut input, &mut zip).map_err(|e| self.write_error(e))?;

            self.processed_files += 1;
            on_progress((self.processed_files * 100 / self.total_files) as u8);
        }

        zip.finish()
            .map_err(|e| self.write_error(e))?
            .flush()
            .map_err(|e| self.write_error(e))?;

        if self.processed_files != self.total_files {
            return Err(self.write_error(format!(
                "source lost files while the backup was running ({} of {} written)",
                self.processed_files, self.total_files
            )));
        }
        if self.total_files == 0 {
            on_progress(100);
        }
        Ok(())
    }

    /// Full traversal pass. Nothing is written if this fails.
    fn count_files(&self) -> Result<u64> {
        let mut total = 0;
        for entry in self.walk() {
            let entry = entry.map_err(|e| ServerPalError::EnumerationFailed {
                path: self.source.clone(),
                reason: e.to_string(),
            })?;
            if entry.file_type().is_file() {
                total += 1;
            }
        }
        Ok(total)
    }

    /// Sorted traversal that never descends into the archive being written.
    fn walk(&self) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
        let destination = self.destination.clone();
        WalkDir::new(&self.source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| e.path() != destination)
    }

    fn write_error(&self, reason: impl ToString) -> ServerPalError {
        ServerPalError::ArchiveWriteFailed {
            path: self.destination.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Archive `source` into `destination`, reporting progress as it goes.
pub fn archive(
    source: &Path,
    destination: &Path,
    on_progress: impl FnMut(u8),
) -> Result<BackupSummary> {
    BackupJob::new(source, destination).run(on_progress)
}

/// Archive `source` into the first free timestamped name in `backup_dir`.
/// A name claimed by another writer after the lookup moves on to the next
/// suffix.
pub fn archive_to_dir<Tz>(
    source: &Path,
    backup_dir: &Path,
    at: &DateTime<Tz>,
    mut on_progress: impl FnMut(u8),
) -> Result<BackupSummary>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    loop {
        let destination = next_archive_path(backup_dir, at);
        match BackupJob::new(source, &destination).run(&mut on_progress) {
            Err(ServerPalError::ArchiveExists(taken)) => {
                tracing::debug!(archive = %taken.display(), "archive name taken, trying next");
            }
            result => return result,
        }
    }
}

/// First free `backup_<timestamp>[_n].zip` path in `backup_dir`.
pub fn next_archive_path<Tz>(backup_dir: &Path, at: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut collision = 0;
    loop {
        let candidate = backup_dir.join(paths::backup_file_name(at, collision));
        if !candidate.exists() {
            return candidate;
        }
        collision += 1;
    }
}

/// Relative path with `/` separators, whatever the host separator is.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| ServerPalError::EnumerationFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
