use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use skusync_core::{ObjectKey, RemoteObject};

use crate::backend::RemoteStore;
use crate::error::StorageError;
use crate::staging::StagingArea;

/// An object that could not be staged this cycle.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub key: ObjectKey,
    pub reason: String,
}

/// Outcome of [`ConcurrentFetcher::fetch_all`].
#[derive(Debug, Default)]
pub struct FetchReport {
    pub fetched: BTreeSet<ObjectKey>,
    pub failed: Vec<FetchFailure>,
}

/// Downloads objects into the staging area, `concurrency` at a time.
pub struct ConcurrentFetcher {
    remote: Arc<dyn RemoteStore>,
    staging: StagingArea,
    concurrency: usize,
    timeout: Duration,
}

impl ConcurrentFetcher {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        staging: StagingArea,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            staging,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Stage every distinct key in `objects`.
    ///
    /// Failures (including timeouts) are per object: logged, reported in
    /// [`FetchReport::failed`], and never abort the other downloads. Returns
    /// once every download has finished.
    pub async fn fetch_all(&self, objects: &[RemoteObject]) -> FetchReport {
        let keys: BTreeSet<ObjectKey> = objects.iter().map(|o| o.key.clone()).collect();
        let total = keys.len();
        let start = std::time::Instant::now();

        let results: Vec<(ObjectKey, Result<PathBuf, StorageError>)> = stream::iter(keys)
            .map(|key| async move {
                info!(key = %key, "downloading object");
                let result = self.fetch_one(&key).await;
                (key, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = FetchReport::default();
        for (key, result) in results {
            match result {
                Ok(_) => {
                    report.fetched.insert(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "fetch failed, object skipped this cycle");
                    report.failed.push(FetchFailure {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Fetch complete: {}/{} objects staged ({} failed) in {:.1}s",
            report.fetched.len(),
            total,
            report.failed.len(),
            start.elapsed().as_secs_f64()
        );
        report
    }

    async fn fetch_one(&self, key: &ObjectKey) -> Result<PathBuf, StorageError> {
        let bytes = tokio::time::timeout(self.timeout, self.remote.get_object_bytes(key))
            .await
            .map_err(|_| StorageError::Timeout {
                key: key.to_string(),
                secs: self.timeout.as_secs(),
            })??;
        self.staging.write_atomic(key, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;

    /// Remote whose objects are fixed in memory; `"hang/..."` keys never resolve
    /// and `"broken/..."` keys fail.
    struct FakeRemote {
        objects: HashMap<String, &'static str>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeRemote {
        fn new(objects: &[(&str, &'static str)]) -> Self {
            Self {
                objects: objects.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn list_objects(&self) -> Result<Vec<RemoteObject>, StorageError> {
            Ok(Vec::new())
        }

        async fn get_object_bytes(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if key.as_str().starts_with("hang/") {
                futures::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if key.as_str().starts_with("broken/") {
                return Err(StorageError::Other("connection reset".into()));
            }
            self.objects
                .get(key.as_str())
                .map(|body| Bytes::from_static(body.as_bytes()))
                .ok_or_else(|| StorageError::Other(format!("no such object {key}")))
        }

        fn location(&self) -> &str {
            "fake"
        }
    }

    fn object(key: &str) -> RemoteObject {
        RemoteObject {
            key: ObjectKey::new(key).unwrap(),
            last_modified: Utc::now(),
            size: None,
        }
    }

    #[tokio::test]
    async fn fetches_all_and_isolates_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new(&[("a.csv", "sku\n1\n"), ("dir/b.csv", "sku\n2\n")]));
        let fetcher = ConcurrentFetcher::new(
            remote.clone(),
            StagingArea::new(tmp.path().join("data")),
            4,
            Duration::from_secs(5),
        );

        let report = fetcher
            .fetch_all(&[object("a.csv"), object("broken/c.csv"), object("dir/b.csv")])
            .await;

        let fetched: Vec<&str> = report.fetched.iter().map(|k| k.as_str()).collect();
        assert_eq!(fetched, vec!["a.csv", "dir/b.csv"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key.as_str(), "broken/c.csv");
        assert!(tmp.path().join("data/dir/b.csv").exists());
        assert!(!tmp.path().join("data/broken/c.csv").exists());
    }

    #[tokio::test]
    async fn duplicate_keys_fetched_once() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new(&[("a.csv", "sku\n1\n")]));
        let fetcher = ConcurrentFetcher::new(
            remote.clone(),
            StagingArea::new(tmp.path().join("data")),
            4,
            Duration::from_secs(5),
        );

        let report = fetcher.fetch_all(&[object("a.csv"), object("a.csv")]).await;
        assert_eq!(report.fetched.len(), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("f{i}.csv")).collect();
        let pairs: Vec<(&str, &'static str)> = names.iter().map(|n| (n.as_str(), "sku\n1\n")).collect();
        let remote = Arc::new(FakeRemote::new(&pairs));
        let fetcher = ConcurrentFetcher::new(
            remote.clone(),
            StagingArea::new(tmp.path().join("data")),
            3,
            Duration::from_secs(5),
        );

        let objects: Vec<RemoteObject> = names.iter().map(|n| object(n)).collect();
        let report = fetcher.fetch_all(&objects).await;
        assert_eq!(report.fetched.len(), 12);
        assert!(remote.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn hung_fetch_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::new(&[("a.csv", "sku\n1\n")]));
        let fetcher = ConcurrentFetcher::new(
            remote,
            StagingArea::new(tmp.path().join("data")),
            2,
            Duration::from_millis(100),
        );

        let report = fetcher.fetch_all(&[object("hang/x.csv"), object("a.csv")]).await;
        assert_eq!(report.fetched.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("timed out"));
    }
}
