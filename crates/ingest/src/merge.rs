use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use skusync_core::Record;

use crate::error::{IngestError, RelationalError};
use crate::relational::{RelationalStore, WriteMode};

/// Counts from one [`MergeEngine::merge_and_replace`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub existing: usize,
    pub incoming: usize,
    pub written: usize,
    /// The destination table did not exist before this merge.
    pub created: bool,
}

/// Reconciles incoming records with the destination table.
///
/// Upsert is whole-row: on a key conflict the incoming row replaces the
/// stored one entirely.
pub struct MergeEngine {
    store: Arc<dyn RelationalStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Union existing rows with `incoming`, keep the last row per `sku`, and
    /// replace the table's contents with the result in one write.
    pub async fn merge_and_replace(
        &self,
        incoming: Vec<Record>,
        table: &str,
    ) -> Result<MergeOutcome, IngestError> {
        let merge_err = |source: RelationalError| IngestError::Merge {
            table: table.to_string(),
            source,
        };

        let exists = self.store.table_exists(table).await.map_err(merge_err)?;
        let existing = if exists {
            match self.store.read_table(table).await {
                Ok(rows) => rows,
                Err(RelationalError::TableNotFound(_)) => Vec::new(),
                Err(e) => return Err(merge_err(e)),
            }
        } else {
            info!(table = %table, "destination table absent, it will be created");
            Vec::new()
        };

        let existing_count = existing.len();
        let incoming_count = incoming.len();

        // existing first so incoming rows win
        let mut union = existing;
        union.extend(incoming);
        let merged = dedup_keep_last(union);

        self.store
            .bulk_write(table, &merged, WriteMode::Replace)
            .await
            .map_err(merge_err)?;

        let outcome = MergeOutcome {
            existing: existing_count,
            incoming: incoming_count,
            written: merged.len(),
            created: !exists,
        };
        info!(
            table = %table,
            existing = outcome.existing,
            incoming = outcome.incoming,
            written = outcome.written,
            "merge committed"
        );
        Ok(outcome)
    }
}

/// Keep only the last row for each `sku`, preserving the relative order of
/// the survivors.
pub fn dedup_keep_last(rows: Vec<Record>) -> Vec<Record> {
    let mut last: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        last.insert(row.sku.clone(), i);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(i, row)| last.get(&row.sku) == Some(i))
        .map(|(_, row)| row)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::MemoryStore;

    fn rec(sku: &str, v: &str) -> Record {
        Record {
            sku: sku.into(),
            name: Some(v.into()),
            description: None,
            chg_dttm: None,
        }
    }

    #[test]
    fn keep_last_preserves_survivor_order() {
        let rows = vec![rec("1", "A"), rec("2", "B"), rec("1", "C"), rec("3", "D")];
        let kept = dedup_keep_last(rows);
        assert_eq!(kept, vec![rec("2", "B"), rec("1", "C"), rec("3", "D")]);
    }

    #[tokio::test]
    async fn incoming_wins_over_existing() {
        let store = Arc::new(MemoryStore::new().with_table("data", vec![rec("1", "A"), rec("2", "K")]));
        let engine = MergeEngine::new(store.clone());

        let outcome = engine
            .merge_and_replace(vec![rec("1", "B")], "data")
            .await
            .unwrap();

        assert_eq!(outcome.existing, 2);
        assert_eq!(outcome.written, 2);
        assert!(!outcome.created);
        let table = store.table("data").unwrap();
        let one: Vec<_> = table.iter().filter(|r| r.sku == "1").collect();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn creates_missing_table() {
        let store = Arc::new(MemoryStore::new());
        let engine = MergeEngine::new(store.clone());

        let outcome = engine
            .merge_and_replace(vec![rec("1", "X")], "data")
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(store.read_count(), 0);
        assert_eq!(store.table("data").unwrap(), vec![rec("1", "X")]);
    }

    #[tokio::test]
    async fn failed_write_leaves_table_untouched() {
        let store = Arc::new(MemoryStore::new().with_table("data", vec![rec("1", "A")]));
        store.set_fail_writes(true);
        let engine = MergeEngine::new(store.clone());

        let err = engine
            .merge_and_replace(vec![rec("1", "B"), rec("2", "C")], "data")
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Merge { .. }));
        assert!(!err.is_fatal());
        assert_eq!(store.table("data").unwrap(), vec![rec("1", "A")]);
    }

    #[tokio::test]
    async fn merging_same_rows_twice_is_stable() {
        let store = Arc::new(MemoryStore::new());
        let engine = MergeEngine::new(store.clone());
        let batch = vec![rec("1", "A"), rec("2", "B")];

        engine.merge_and_replace(batch.clone(), "data").await.unwrap();
        let first = store.table("data").unwrap();
        engine.merge_and_replace(batch, "data").await.unwrap();
        assert_eq!(store.table("data").unwrap(), first);
    }
}
