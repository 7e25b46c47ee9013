use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use skusync_core::Lap;

use crate::cycle::CycleReport;
use crate::error::IngestError;

/// File name of the cycle history inside the run-log directory.
pub const CYCLE_LOG_FILE: &str = "cycles.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Nothing newer than the watermark.
    Noop,
    Completed,
    /// Some objects or files failed and will be retried.
    Partial,
    /// Aborted before any file was loaded.
    Failed,
}

/// One line of `cycles.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleLogEntry {
    pub cycle_id: Uuid,
    pub table: String,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub listed: usize,
    pub selected: usize,
    pub fetched: usize,
    pub merged_files: usize,
    pub table_rows: usize,
    pub failures: Vec<String>,
    pub error: Option<String>,
    pub timings: Vec<Lap>,
}

impl CycleLogEntry {
    pub fn from_report(report: &CycleReport) -> Self {
        let status = if report.is_noop() {
            CycleStatus::Noop
        } else if report.has_failures() {
            CycleStatus::Partial
        } else {
            CycleStatus::Completed
        };

        let failures = report
            .fetch_failures
            .iter()
            .map(|f| format!("fetch {}: {}", f.key, f.reason))
            .chain(
                report
                    .failed
                    .iter()
                    .map(|f| format!("{} {}: {}", f.stage, f.path.display(), f.reason)),
            )
            .collect();

        Self {
            cycle_id: report.cycle_id,
            table: report.table.clone(),
            status,
            started_at: report.started_at,
            finished_at: report.finished_at,
            duration_ms: (report.finished_at - report.started_at).num_milliseconds(),
            watermark_before: report.watermark_before.as_timestamp(),
            watermark_after: report.watermark_after.as_timestamp(),
            listed: report.listed,
            selected: report.selected.len(),
            fetched: report.fetched.len(),
            merged_files: report.merged.len(),
            table_rows: report.merged.last().map(|m| m.outcome.written).unwrap_or(0),
            failures,
            error: None,
            timings: report.timings.clone(),
        }
    }

    /// Entry for cycle `cycle_id` that stopped on a fatal error, with the
    /// laps it completed before stopping.
    pub fn from_error(
        cycle_id: Uuid,
        table: &str,
        started_at: DateTime<Utc>,
        error: &IngestError,
        timings: &[Lap],
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            cycle_id,
            table: table.to_string(),
            status: CycleStatus::Failed,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            watermark_before: None,
            watermark_after: None,
            listed: 0,
            selected: 0,
            fetched: 0,
            merged_files: 0,
            table_rows: 0,
            failures: Vec::new(),
            error: Some(error.to_string()),
            timings: timings.to_vec(),
        }
    }
}

/// Append `entry` to `<log_dir>/cycles.jsonl`.
///
/// Logging problems never fail the cycle; they are reported as warnings.
pub fn append_cycle_log(log_dir: &Path, entry: &CycleLogEntry) -> Option<PathBuf> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        warn!(error = %e, dir = %log_dir.display(), "failed to create run log directory");
        return None;
    }

    let log_path = log_dir.join(CYCLE_LOG_FILE);
    let json_line = match serde_json::to_string(entry) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize cycle log entry");
            return None;
        }
    };

    // each line is self-contained, plain append is enough
    let mut file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %log_path.display(), "failed to open cycle log");
            return None;
        }
    };

    if let Err(e) = writeln!(file, "{}", json_line) {
        warn!(error = %e, "failed to write cycle log entry");
        return None;
    }
    Some(log_path)
}
