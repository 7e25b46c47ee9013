//! Incremental SKU ingestion: remote drop zone → staging → destination table.

pub mod backup;
pub mod cycle;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod relational;
pub mod run_log;
pub mod watermark;

pub use backup::{backup_table, BackupOutcome};
pub use cycle::{select_new, CycleReport, CycleSettings, IngestionCycle};
pub use error::{IngestError, RelationalError};
pub use merge::{MergeEngine, MergeOutcome};
pub use normalize::RecordNormalizer;
pub use relational::{MemoryStore, PgStore, RelationalStore, WriteMode};
pub use run_log::{append_cycle_log, CycleLogEntry, CycleStatus};
pub use watermark::WatermarkTracker;
