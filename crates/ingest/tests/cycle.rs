//! End-to-end cycles against an in-process remote and relational store.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use skusync_core::{ObjectKey, Record, RemoteObject, StopWatch, Watermark};
use skusync_ingest::{CycleSettings, IngestError, IngestionCycle, MemoryStore};
use skusync_storage::{RemoteStore, StorageError};

// ── Fake remote ─────────────────────────────────────────────────────

#[derive(Default)]
struct FakeRemote {
    objects: Mutex<BTreeMap<String, (Bytes, DateTime<Utc>)>>,
    broken: Mutex<HashSet<String>>,
    unreachable: std::sync::atomic::AtomicBool,
    lists: AtomicUsize,
    gets: AtomicUsize,
}

impl FakeRemote {
    fn put(&self, key: &str, body: &str, ts: DateTime<Utc>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from(body.to_string()), ts));
    }

    fn break_key(&self, key: &str) {
        self.broken.lock().unwrap().insert(key.to_string());
    }

    fn repair_key(&self, key: &str) {
        self.broken.lock().unwrap().remove(key);
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn list_objects(&self) -> Result<Vec<RemoteObject>, StorageError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StorageError::NotConfigured("container unreachable".into()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(k, (body, ts))| RemoteObject {
                key: ObjectKey::new(k.clone()).unwrap(),
                last_modified: *ts,
                size: Some(body.len() as u64),
            })
            .collect())
    }

    async fn get_object_bytes(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(key.as_str()) {
            return Err(StorageError::Other(format!("503 for {key}")));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key.as_str())
            .map(|(body, _)| body.clone())
            .ok_or_else(|| StorageError::Other(format!("no such object {key}")))
    }

    fn location(&self) -> &str {
        "fake://container"
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    _tmp: tempfile::TempDir,
    remote: Arc<FakeRemote>,
    store: Arc<MemoryStore>,
    settings: CycleSettings,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let settings = CycleSettings {
            table: "data".into(),
            staging_dir: tmp.path().join("data"),
            archive_dir: tmp.path().join("processed_data"),
            concurrency: 4,
            fetch_timeout: Duration::from_secs(5),
            full_reload: false,
        };
        Self {
            _tmp: tmp,
            remote: Arc::new(FakeRemote::default()),
            store: Arc::new(store),
            settings,
        }
    }

    async fn run(&self) -> Result<skusync_ingest::CycleReport, IngestError> {
        let cycle = IngestionCycle::new(self.remote.clone(), self.store.clone(), self.settings.clone());
        let mut stopwatch = StopWatch::new();
        cycle.run(&mut stopwatch).await
    }

    fn row(&self, sku: &str) -> Option<Record> {
        self.store
            .table("data")?
            .into_iter()
            .find(|r| r.sku == sku)
    }

    fn staged(&self) -> Vec<String> {
        file_names(&self.settings.staging_dir)
    }

    fn archived(&self) -> Vec<String> {
        file_names(&self.settings.archive_dir)
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// A fixed time well before any ingestion stamp.
fn past() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A fixed time well after any ingestion stamp.
fn future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn first_cycle_loads_and_archives_everything() {
    let h = Harness::new();
    h.remote.put("a.csv", "name,sku,description\nWidget,1,Blue\n", past());
    h.remote.put("b.csv", "name,sku,description\nGadget,2,Red\n", past());

    let report = h.run().await.unwrap();

    assert_eq!(report.watermark_before, Watermark::Absent);
    assert_eq!(report.selected.len(), 2);
    assert_eq!(report.merged.len(), 2);
    assert!(!report.has_failures());
    assert_eq!(h.store.table("data").unwrap().len(), 2);
    assert_eq!(h.row("1").unwrap().name.as_deref(), Some("Widget"));
    assert!(h.staged().is_empty());

    let archived = h.archived();
    assert_eq!(archived.len(), 2);
    assert!(archived[0].ends_with("_a.csv"));
    assert!(archived[1].ends_with("_b.csv"));
    assert!(matches!(report.watermark_after, Watermark::At(_)));
}

#[tokio::test]
async fn second_cycle_without_changes_does_nothing() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n2,B\n", past());

    h.run().await.unwrap();
    let table = h.store.table("data").unwrap();
    let writes = h.store.write_count();
    let reads = h.store.read_count();
    let gets = h.remote.gets();

    let report = h.run().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.watermark_after, report.watermark_before);
    assert_eq!(h.store.table("data").unwrap(), table);
    assert_eq!(h.store.write_count(), writes);
    assert_eq!(h.store.read_count(), reads);
    assert_eq!(h.remote.gets(), gets);
}

#[tokio::test]
async fn newer_file_overwrites_existing_sku() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n2,Keep\n", past());
    let first = h.run().await.unwrap();

    h.remote.put("b.csv", "sku,name\n1,B\n", future());
    let second = h.run().await.unwrap();

    assert_eq!(second.selected.len(), 1);
    assert_eq!(second.selected[0].as_str(), "b.csv");
    let table = h.store.table("data").unwrap();
    assert_eq!(table.iter().filter(|r| r.sku == "1").count(), 1);
    assert_eq!(h.row("1").unwrap().name.as_deref(), Some("B"));
    assert_eq!(h.row("2").unwrap().name.as_deref(), Some("Keep"));
    assert!(second.watermark_after >= first.watermark_after);
}

#[tokio::test]
async fn first_row_wins_within_one_file() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,X\n1,Y\n", past());

    h.run().await.unwrap();

    assert_eq!(h.store.table("data").unwrap().len(), 1);
    assert_eq!(h.row("1").unwrap().name.as_deref(), Some("X"));
}

#[tokio::test]
async fn bad_file_does_not_block_the_others() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n", past());
    h.remote.put("b.csv", "sku,price\n2,9.99\n", past());
    h.remote.put("c.csv", "sku,name\n3,C\n", past());

    let report = h.run().await.unwrap();

    assert_eq!(report.merged.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].stage, "parse");
    assert!(report.failed[0].path.ends_with("b.csv"));
    assert!(report.has_failures());

    assert!(h.row("1").is_some());
    assert!(h.row("3").is_some());
    assert!(h.row("2").is_none());
    assert_eq!(h.staged(), vec!["b.csv"]);
    assert_eq!(h.archived().len(), 2);
}

#[tokio::test]
async fn leftover_staged_file_is_retried_on_next_active_cycle() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n", past());
    h.remote.put("b.csv", "sku,price\n2,9.99\n", past());
    h.run().await.unwrap();
    assert_eq!(h.staged(), vec!["b.csv"]);

    // operator fixes the staged file in place
    std::fs::write(h.settings.staging_dir.join("b.csv"), "sku,name\n2,B\n").unwrap();
    h.remote.put("c.csv", "sku,name\n3,C\n", future());

    let report = h.run().await.unwrap();

    assert_eq!(report.merged.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(h.row("2").unwrap().name.as_deref(), Some("B"));
    assert!(h.staged().is_empty());
}

#[tokio::test]
async fn only_objects_newer_than_watermark_are_fetched() {
    let t = Utc.with_ymd_and_hms(2025, 6, 14, 12, 0, 0).unwrap();
    let seeded = Record {
        sku: "0".into(),
        name: Some("seed".into()),
        description: None,
        chg_dttm: Some(t),
    };
    let h = Harness::with_store(MemoryStore::new().with_table("data", vec![seeded]));
    h.remote.put("k1", "sku\n1\n", t - chrono::Duration::seconds(1));
    h.remote.put("k2", "sku\n2\n", t);
    h.remote.put("k3", "sku\n3\n", t + chrono::Duration::seconds(1));

    let report = h.run().await.unwrap();

    assert_eq!(report.watermark_before, Watermark::At(t));
    let selected: Vec<&str> = report.selected.iter().map(|k| k.as_str()).collect();
    assert_eq!(selected, vec!["k3"]);
    assert_eq!(h.remote.gets(), 1);
    assert!(h.row("3").is_some());
    assert!(h.row("1").is_none());
    assert!(h.row("2").is_none());
}

#[tokio::test]
async fn full_reload_ignores_watermark() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n", past());
    h.run().await.unwrap();

    let mut h = h;
    h.settings.full_reload = true;
    let report = h.run().await.unwrap();

    assert_eq!(report.selected.len(), 1);
    assert_eq!(report.merged.len(), 1);
    assert!(report.full_reload);
    assert_eq!(h.store.table("data").unwrap().len(), 1);
}

#[tokio::test]
async fn failed_download_is_reported_and_others_load() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n", past());
    h.remote.put("b.csv", "sku,name\n2,B\n", past());
    h.remote.break_key("a.csv");

    let report = h.run().await.unwrap();

    assert_eq!(report.fetch_failures.len(), 1);
    assert_eq!(report.fetch_failures[0].key.as_str(), "a.csv");
    assert!(report.fetch_failures[0]
        .reason
        .starts_with("fetch of 'a.csv' failed: "));
    assert_eq!(report.merged.len(), 1);
    assert!(h.row("2").is_some());
    assert!(h.row("1").is_none());
}

#[tokio::test]
async fn failed_download_is_retried_after_watermark_moves_past_it() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku,name\n1,A\n", past());
    h.remote.put("b.csv", "sku,name\n2,B\n", past());
    h.remote.break_key("a.csv");

    let first = h.run().await.unwrap();
    assert_eq!(first.fetch_failures.len(), 1);
    assert!(first.watermark_after > Watermark::At(past()));

    h.remote.repair_key("a.csv");
    let second = h.run().await.unwrap();

    let selected: Vec<&str> = second.selected.iter().map(|k| k.as_str()).collect();
    assert_eq!(selected, vec!["a.csv"]);
    assert_eq!(second.retried, second.selected);
    assert!(second.fetch_failures.is_empty());
    assert_eq!(second.merged.len(), 1);
    assert_eq!(h.row("1").unwrap().name.as_deref(), Some("A"));
    assert_eq!(h.row("2").unwrap().name.as_deref(), Some("B"));

    let third = h.run().await.unwrap();
    assert!(third.is_noop());
}

#[tokio::test]
async fn object_named_like_a_temp_file_is_loaded() {
    let h = Harness::new();
    h.remote.put("export.csv.part", "sku,name\n7,Seven\n", past());

    let report = h.run().await.unwrap();

    assert_eq!(report.merged.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(h.row("7").unwrap().name.as_deref(), Some("Seven"));
    assert!(h.staged().is_empty());
    assert!(h.archived()[0].ends_with("_export.csv.part"));
}

#[tokio::test]
async fn unreachable_database_aborts_before_listing() {
    let h = Harness::new();
    h.remote.put("a.csv", "sku\n1\n", past());
    h.store.set_unreachable(true);

    let err = h.run().await.unwrap_err();

    assert!(matches!(err, IngestError::Connectivity(_)));
    assert!(err.is_fatal());
    assert_eq!(h.remote.lists.load(Ordering::SeqCst), 0);
    assert_eq!(h.remote.gets(), 0);
}

#[tokio::test]
async fn unreachable_remote_is_fatal() {
    let h = Harness::new();
    h.remote.unreachable.store(true, Ordering::SeqCst);

    let err = h.run().await.unwrap_err();

    assert!(matches!(err, IngestError::Connectivity(_)));
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn failed_merge_keeps_file_staged_and_table_intact() {
    let h = Harness::with_store(MemoryStore::new().with_table(
        "data",
        vec![Record {
            sku: "1".into(),
            name: Some("old".into()),
            description: None,
            chg_dttm: Some(past()),
        }],
    ));
    h.remote.put("a.csv", "sku,name\n1,new\n", future());
    h.store.set_fail_writes(true);

    let report = h.run().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].stage, "merge");
    assert_eq!(h.row("1").unwrap().name.as_deref(), Some("old"));
    assert_eq!(h.staged(), vec!["a.csv"]);
    assert_eq!(report.watermark_after, report.watermark_before);
}
