use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use skusync_core::Record;

use super::{validate_table_name, RelationalStore, WriteMode};
use crate::error::RelationalError;

/// In-process [`RelationalStore`] with switchable failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    unreachable: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with `rows`.
    pub fn with_table(self, table: &str, rows: Vec<Record>) -> Self {
        self.lock().insert(table.to_string(), rows);
        self
    }

    /// Snapshot of `table`, if it exists.
    pub fn table(&self, table: &str) -> Option<Vec<Record>> {
        self.lock().get(table).cloned()
    }

    /// Make every call fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make `bulk_write` fail after validating its input.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `bulk_write` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// `read_table` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Record>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reachable(&self) -> Result<(), RelationalError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RelationalError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

fn check_unique(rows: &[Record]) -> Result<(), RelationalError> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.sku.as_str()) {
            return Err(RelationalError::ConstraintViolation(format!(
                "duplicate key sku={}",
                row.sku
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn ping(&self) -> Result<(), RelationalError> {
        self.check_reachable()
    }

    async fn table_exists(&self, table: &str) -> Result<bool, RelationalError> {
        self.check_reachable()?;
        validate_table_name(table)?;
        Ok(self.lock().contains_key(table))
    }

    async fn max_change_timestamp(
        &self,
        table: &str,
    ) -> Result<Option<DateTime<Utc>>, RelationalError> {
        self.check_reachable()?;
        let tables = self.lock();
        let rows = tables
            .get(table)
            .ok_or_else(|| RelationalError::TableNotFound(table.to_string()))?;
        Ok(rows.iter().filter_map(|r| r.chg_dttm).max())
    }

    async fn read_table(&self, table: &str) -> Result<Vec<Record>, RelationalError> {
        self.check_reachable()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .get(table)
            .cloned()
            .ok_or_else(|| RelationalError::TableNotFound(table.to_string()))
    }

    async fn bulk_write(
        &self,
        table: &str,
        rows: &[Record],
        mode: WriteMode,
    ) -> Result<u64, RelationalError> {
        self.check_reachable()?;
        validate_table_name(table)?;

        let mut tables = self.lock();
        let mut next = match mode {
            WriteMode::Replace => Vec::with_capacity(rows.len()),
            WriteMode::Append => tables.get(table).cloned().unwrap_or_default(),
        };
        next.extend_from_slice(rows);
        check_unique(&next)?;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RelationalError::Unavailable("write rejected".into()));
        }

        tables.insert(table.to_string(), next);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(rows.len() as u64)
    }

    async fn copy_table(&self, source: &str, target: &str) -> Result<u64, RelationalError> {
        self.check_reachable()?;
        validate_table_name(target)?;
        let mut tables = self.lock();
        let rows = tables
            .get(source)
            .cloned()
            .ok_or_else(|| RelationalError::TableNotFound(source.to_string()))?;
        let copied = rows.len() as u64;
        tables.insert(target.to_string(), rows);
        Ok(copied)
    }
}
