use std::sync::Arc;

use tracing::info;

use skusync_core::Watermark;

use crate::error::{IngestError, RelationalError};
use crate::relational::RelationalStore;

/// Reads the cutoff below which remote objects count as already ingested.
pub struct WatermarkTracker {
    store: Arc<dyn RelationalStore>,
    table: String,
}

impl WatermarkTracker {
    pub fn new(store: Arc<dyn RelationalStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// `MAX(chg_dttm)` of the destination table, or `Absent` when the table is
    /// missing or empty.
    pub async fn current_watermark(&self) -> Result<Watermark, IngestError> {
        if !self
            .store
            .table_exists(&self.table)
            .await
            .map_err(IngestError::Query)?
        {
            info!(table = %self.table, "destination table absent, everything is new");
            return Ok(Watermark::Absent);
        }

        let watermark = match self.store.max_change_timestamp(&self.table).await {
            Ok(ts) => Watermark::from_option(ts),
            // dropped between the two calls
            Err(RelationalError::TableNotFound(_)) => Watermark::Absent,
            Err(e) => return Err(IngestError::Query(e)),
        };

        info!(table = %self.table, watermark = %watermark, "watermark read");
        Ok(watermark)
    }
}
