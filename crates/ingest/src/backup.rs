use serde::Serialize;
use tracing::info;

use crate::error::IngestError;
use crate::relational::{validate_table_name, RelationalStore};

/// Suffix of the default backup table name.
pub const BACKUP_SUFFIX: &str = "_backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupOutcome {
    pub source: String,
    pub target: String,
    pub rows: u64,
}

/// `<table>_backup`
pub fn default_backup_name(table: &str) -> String {
    format!("{table}{BACKUP_SUFFIX}")
}

/// Snapshot `table` into `target` (or `<table>_backup`), replacing any
/// previous snapshot.
pub async fn backup_table(
    store: &dyn RelationalStore,
    table: &str,
    target: Option<&str>,
) -> Result<BackupOutcome, IngestError> {
    let target = target
        .map(str::to_string)
        .unwrap_or_else(|| default_backup_name(table));
    validate_table_name(&target).map_err(IngestError::Query)?;
    if target == table {
        return Err(IngestError::Config(format!(
            "backup target must differ from source table '{table}'"
        )));
    }

    store
        .ping()
        .await
        .map_err(|e| IngestError::Connectivity(format!("relational store: {e}")))?;

    let rows = store
        .copy_table(table, &target)
        .await
        .map_err(IngestError::Query)?;

    info!(source = %table, target = %target, rows, "table backed up");
    Ok(BackupOutcome {
        source: table.to_string(),
        target,
        rows,
    })
}
