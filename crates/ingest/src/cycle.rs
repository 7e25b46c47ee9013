//! One pass of the incremental ingestion job.
//!
//! ```text
//! WATERMARK_READ → LIST_REMOTE → SELECT_NEW → FETCH → [PARSE → MERGE → ARCHIVE]* → DONE
//! ```
//!
//! Only the fetch stage runs concurrently. Staged files are loaded one at a
//! time in file-name order so the destination table has a single writer.
//! Files left in staging by an earlier failed cycle are picked up again by the
//! next cycle that has something new to fetch. Objects whose download failed
//! are remembered in the staging work directory and selected again by the
//! next cycle even when the watermark has moved past them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use skusync_core::{Config, Lap, ObjectKey, RemoteObject, StopWatch, Watermark};
use skusync_storage::{Archiver, ConcurrentFetcher, RemoteStore, StagingArea};

use crate::error::IngestError;
use crate::merge::{MergeEngine, MergeOutcome};
use crate::normalize::RecordNormalizer;
use crate::relational::RelationalStore;
use crate::watermark::WatermarkTracker;

/// Knobs for one cycle, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub table: String,
    pub staging_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    /// Ignore the watermark and select every remote object.
    pub full_reload: bool,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            table: config.ingest.table.clone(),
            staging_dir: config.storage.data_dir.clone(),
            archive_dir: config.storage.archive_dir.clone(),
            concurrency: config.ingest.fetch_concurrency,
            fetch_timeout: Duration::from_secs(config.ingest.fetch_timeout_secs),
            full_reload: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectFailure {
    pub key: ObjectKey,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedFile {
    pub path: PathBuf,
    pub archived_to: PathBuf,
    pub outcome: MergeOutcome,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub full_reload: bool,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
    pub listed: usize,
    pub selected: Vec<ObjectKey>,
    /// Selected only because an earlier download failed.
    pub retried: Vec<ObjectKey>,
    pub fetched: Vec<ObjectKey>,
    pub fetch_failures: Vec<ObjectFailure>,
    pub merged: Vec<MergedFile>,
    pub failed: Vec<FileFailure>,
    pub timings: Vec<Lap>,
}

impl CycleReport {
    /// Nothing on the remote was newer than the watermark.
    pub fn is_noop(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.fetch_failures.is_empty() || !self.failed.is_empty()
    }

    pub fn log_summary(&self) {
        info!(
            cycle_id = %self.cycle_id,
            table = %self.table,
            listed = self.listed,
            selected = self.selected.len(),
            retried = self.retried.len(),
            fetched = self.fetched.len(),
            fetch_failures = self.fetch_failures.len(),
            merged = self.merged.len(),
            failed = self.failed.len(),
            watermark_before = %self.watermark_before,
            watermark_after = %self.watermark_after,
            "ingestion cycle finished"
        );
    }
}

/// Remote objects modified strictly after `cutoff`, plus any listed object
/// named in `retry`, in key order.
pub fn select_new(
    objects: &[RemoteObject],
    cutoff: Watermark,
    retry: &BTreeSet<ObjectKey>,
) -> Vec<RemoteObject> {
    let mut selected: Vec<RemoteObject> = objects
        .iter()
        .filter(|o| cutoff.admits(o.last_modified) || retry.contains(&o.key))
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.key.cmp(&b.key));
    selected
}

/// Wires the stages together for a single destination table.
pub struct IngestionCycle {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn RelationalStore>,
    settings: CycleSettings,
    tracker: WatermarkTracker,
    merger: MergeEngine,
    fetcher: ConcurrentFetcher,
    staging: StagingArea,
    archiver: Archiver,
}

impl IngestionCycle {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn RelationalStore>,
        settings: CycleSettings,
    ) -> Self {
        let staging = StagingArea::new(&settings.staging_dir);
        Self {
            tracker: WatermarkTracker::new(store.clone(), settings.table.clone()),
            merger: MergeEngine::new(store.clone()),
            fetcher: ConcurrentFetcher::new(
                remote.clone(),
                staging.clone(),
                settings.concurrency,
                settings.fetch_timeout,
            ),
            archiver: Archiver::new(&settings.archive_dir),
            staging,
            remote,
            store,
            settings,
        }
    }

    /// Run one cycle under a fresh id. Errors returned here are fatal (see
    /// [`IngestError::is_fatal`]); per-object and per-file failures are
    /// recorded in the report instead.
    pub async fn run(&self, stopwatch: &mut StopWatch) -> Result<CycleReport, IngestError> {
        self.run_as(Uuid::new_v4(), stopwatch).await
    }

    /// [`IngestionCycle::run`] with a caller-chosen id, so a fatal error can be
    /// logged under the same id the cycle used.
    pub async fn run_as(
        &self,
        cycle_id: Uuid,
        stopwatch: &mut StopWatch,
    ) -> Result<CycleReport, IngestError> {
        let started_at = Utc::now();
        let table = self.settings.table.as_str();
        info!(cycle_id = %cycle_id, table = %table, "ingestion cycle starting");

        self.staging.ensure()?;
        self.archiver.ensure()?;

        stopwatch.start();
        self.store
            .ping()
            .await
            .map_err(|e| IngestError::Connectivity(format!("relational store: {e}")))?;
        let watermark_before = self.tracker.current_watermark().await?;
        stopwatch.stop("watermark_read");

        stopwatch.start();
        let listed = self.remote.list_objects().await.map_err(|e| {
            IngestError::Connectivity(format!("remote store {}: {e}", self.remote.location()))
        })?;
        stopwatch.stop("list_remote");

        let cutoff = if self.settings.full_reload {
            info!("full reload requested, ignoring watermark");
            Watermark::Absent
        } else {
            watermark_before
        };
        let retry = match self.staging.load_retry_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "could not read retry list, relying on the watermark alone");
                BTreeSet::new()
            }
        };
        let selected = select_new(&listed, cutoff, &retry);
        let retried: Vec<ObjectKey> = selected
            .iter()
            .filter(|o| !cutoff.admits(o.last_modified))
            .map(|o| o.key.clone())
            .collect();
        info!(
            listed = listed.len(),
            selected = selected.len(),
            retried = retried.len(),
            cutoff = %cutoff,
            "selected new remote objects"
        );

        let mut report = CycleReport {
            cycle_id,
            table: table.to_string(),
            started_at,
            finished_at: started_at,
            full_reload: self.settings.full_reload,
            watermark_before,
            watermark_after: watermark_before,
            listed: listed.len(),
            selected: selected.iter().map(|o| o.key.clone()).collect(),
            retried,
            fetched: Vec::new(),
            fetch_failures: Vec::new(),
            merged: Vec::new(),
            failed: Vec::new(),
            timings: Vec::new(),
        };

        if selected.is_empty() {
            if !retry.is_empty() {
                // every key left to retry has disappeared from the remote
                self.save_retry(&BTreeSet::new());
            }
            info!("no remote objects newer than the watermark, nothing to do");
            return Ok(finish(report, stopwatch));
        }

        stopwatch.start();
        let fetch = self.fetcher.fetch_all(&selected).await;
        stopwatch.stop("fetch");
        report.fetched = fetch.fetched.into_iter().collect();
        let failed_keys: BTreeSet<ObjectKey> = fetch.failed.iter().map(|f| f.key.clone()).collect();
        self.save_retry(&failed_keys);
        report.fetch_failures = fetch
            .failed
            .into_iter()
            .map(|f| {
                let key = f.key.clone();
                let e = IngestError::from(f);
                warn!(key = %key, stage = e.stage(), error = %e, "object will be retried next cycle");
                ObjectFailure {
                    key,
                    reason: e.to_string(),
                }
            })
            .collect();

        for path in self.staging.list_files() {
            let label = path
                .strip_prefix(self.staging.root())
                .unwrap_or(&path)
                .display()
                .to_string();
            stopwatch.start();
            match self.load_file(&path).await {
                Ok(merged) => report.merged.push(merged),
                Err(e) => {
                    error!(path = %path.display(), stage = e.stage(), error = %e, "file left in staging for retry");
                    report.failed.push(FileFailure {
                        path: path.clone(),
                        stage: e.stage(),
                        reason: e.to_string(),
                    });
                }
            }
            stopwatch.stop(&format!("load {}", label));
        }

        if !report.merged.is_empty() {
            report.watermark_after = match self.tracker.current_watermark().await {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "could not re-read watermark after merge");
                    watermark_before
                }
            };
        }

        Ok(finish(report, stopwatch))
    }

    fn save_retry(&self, keys: &BTreeSet<ObjectKey>) {
        if let Err(e) = self.staging.save_retry_keys(keys) {
            warn!(error = %e, count = keys.len(), "could not record objects to retry");
        }
    }

    /// PARSE → MERGE → ARCHIVE for one staged file.
    async fn load_file(&self, path: &Path) -> Result<MergedFile, IngestError> {
        let records = RecordNormalizer::normalize(path)?;
        let outcome = self
            .merger
            .merge_and_replace(records, &self.settings.table)
            .await?;
        let archived_to = self
            .archiver
            .archive(path)
            .map_err(|source| IngestError::Archive {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(MergedFile {
            path: path.to_path_buf(),
            archived_to,
            outcome,
        })
    }
}

fn finish(mut report: CycleReport, stopwatch: &StopWatch) -> CycleReport {
    report.finished_at = Utc::now();
    report.timings = stopwatch.laps().to_vec();
    report.log_summary();
    report
}
