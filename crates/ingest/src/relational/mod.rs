//! Destination-table access.
//!
//! [`RelationalStore`] is the narrow interface the cycle needs from a
//! database: capability checks, the watermark query, whole-table reads, and
//! whole-table writes. [`PgStore`] talks to PostgreSQL; [`MemoryStore`] keeps
//! tables in process for tests and dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use skusync_core::Record;

use crate::error::RelationalError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// How [`RelationalStore::bulk_write`] treats rows already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The table ends up holding exactly the given rows.
    Replace,
    /// The given rows are added to the existing ones.
    Append,
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> Result<(), RelationalError>;

    async fn table_exists(&self, table: &str) -> Result<bool, RelationalError>;

    /// `MAX(chg_dttm)` of `table`; `None` when the table is empty.
    async fn max_change_timestamp(
        &self,
        table: &str,
    ) -> Result<Option<DateTime<Utc>>, RelationalError>;

    /// Every row of `table`, or [`RelationalError::TableNotFound`].
    async fn read_table(&self, table: &str) -> Result<Vec<Record>, RelationalError>;

    /// Write `rows` to `table`, creating it (sku primary key) if absent.
    ///
    /// All-or-nothing: on error the table keeps its previous contents.
    async fn bulk_write(
        &self,
        table: &str,
        rows: &[Record],
        mode: WriteMode,
    ) -> Result<u64, RelationalError>;

    /// Replace `target` with a copy of `source`. Returns rows copied.
    async fn copy_table(&self, source: &str, target: &str) -> Result<u64, RelationalError>;
}

/// Accept only plain identifiers so table names can be spliced into SQL.
pub fn validate_table_name(name: &str) -> Result<&str, RelationalError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && name.len() <= 63 {
        Ok(name)
    } else {
        Err(RelationalError::InvalidIdentifier(name.to_string()))
    }
}
