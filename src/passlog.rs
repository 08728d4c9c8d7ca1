//! Pass Log - scratch diagnostic log of sync passes
//!
//! Every pass gets a timestamped header and one line per operation with its
//! elapsed time. Start markers are written before an operation runs, so a
//! pass that never returns still leaves a trace of where it stopped.
//! A bounded number of recent passes is also kept in memory.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// How an operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    Failed(String),
}

/// Timing record for one operation in a pass
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub label: String,
    pub elapsed: Duration,
    pub outcome: OperationOutcome,
}

impl OperationRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, OperationOutcome::Failed(_))
    }
}

/// Everything recorded about one sync pass
#[derive(Debug, Clone)]
pub struct PassReport {
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub records: Vec<OperationRecord>,
}

impl PassReport {
    pub fn failed_operations(&self) -> usize {
        self.records.iter().filter(|r| r.is_failure()).count()
    }

    pub fn successful_operations(&self) -> usize {
        self.records.len() - self.failed_operations()
    }

    pub fn render(&self) -> String {
        let mut out = header_line(&self.started_at, self.records.len());
        for record in &self.records {
            out.push('\n');
            out.push_str(&completion_line(record));
        }
        out
    }
}

fn header_line(started_at: &DateTime<Local>, operations: usize) -> String {
    format!(
        "[{}] Sync pass: {} operation{}",
        started_at.format("%Y-%m-%d %H:%M:%S"),
        operations,
        if operations == 1 { "" } else { "s" }
    )
}

fn completion_line(record: &OperationRecord) -> String {
    match &record.outcome {
        OperationOutcome::Completed => format!(
            "  <- {} {:.3}s",
            record.label,
            record.elapsed.as_secs_f64()
        ),
        OperationOutcome::Failed(error) => format!(
            "  <- {} failed after {:.3}s: {}",
            record.label,
            record.elapsed.as_secs_f64(),
            error
        ),
    }
}

/// Append-only pass log with a bounded in-memory history
pub struct PassLog {
    capacity: usize,
    passes: VecDeque<PassReport>,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl PassLog {
    /// Keep up to `capacity` passes in memory only.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            passes: VecDeque::new(),
            path: None,
            file: None,
        }
    }

    /// Also append every line to the file at `path`.
    pub fn with_file(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let mut log = Self::in_memory(capacity);
        log.path = Some(path.into());
        log
    }

    pub fn start_pass(&mut self, started_at: &DateTime<Local>, operations: usize) {
        self.write_line(&header_line(started_at, operations));
    }

    pub fn start_operation(&mut self, label: &str) {
        self.write_line(&format!("  -> {}", label));
    }

    pub fn finish_operation(&mut self, record: &OperationRecord) {
        self.write_line(&completion_line(record));
    }

    pub fn finish_pass(&mut self, report: PassReport) {
        if self.passes.len() == self.capacity {
            self.passes.pop_front();
        }
        self.passes.push_back(report);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    fn write_line(&mut self, line: &str) {
        let Some(path) = &self.path else {
            return;
        };

        if self.file.is_none() {
            match open_append(path) {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    warn!("Cannot open pass log {}: {}", path.display(), e);
                    return;
                }
            }
        }

        if let Some(file) = &mut self.file {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write pass log {}: {}", path.display(), e);
                self.file = None;
            }
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
