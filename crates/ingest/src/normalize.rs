use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use skusync_core::{ingestion_now, Record};

use crate::error::IngestError;

/// Turns a staged CSV file into records ready to merge.
///
/// The header must contain `sku`; `name` and `description` are optional and
/// any incoming `chg_dttm` column is ignored (it is always re-stamped). Other
/// columns are a schema mismatch.
pub struct RecordNormalizer;

#[derive(Debug, Clone, Copy)]
struct Columns {
    sku: usize,
    name: Option<usize>,
    description: Option<usize>,
}

impl RecordNormalizer {
    /// Parse `path`, stamping every row with the current time.
    pub fn normalize(path: &Path) -> Result<Vec<Record>, IngestError> {
        Self::normalize_at(path, ingestion_now())
    }

    /// Parse `path`, stamping every row with `at`.
    pub fn normalize_at(path: &Path, at: DateTime<Utc>) -> Result<Vec<Record>, IngestError> {
        let file = std::fs::File::open(path).map_err(|e| IngestError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let records = Self::normalize_reader(file, path, at)?;
        info!(path = %path.display(), rows = records.len(), "normalized file");
        Ok(records)
    }

    /// Parse CSV from `reader`; `source` only labels errors.
    pub fn normalize_reader<R: Read>(
        reader: R,
        source: &Path,
        at: DateTime<Utc>,
    ) -> Result<Vec<Record>, IngestError> {
        let parse_err = |reason: String| IngestError::Parse {
            path: source.to_path_buf(),
            reason,
        };

        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv.headers().map_err(|e| parse_err(e.to_string()))?.clone();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(parse_err("empty file".into()));
        }
        let columns = resolve_columns(&headers).map_err(|reason| IngestError::SchemaMismatch {
            path: source.to_path_buf(),
            reason,
        })?;

        let mut rows = Vec::new();
        for (i, result) in csv.records().enumerate() {
            let row = result.map_err(|e| parse_err(e.to_string()))?;
            let sku = row.get(columns.sku).unwrap_or("");
            if sku.is_empty() {
                // header is line 1
                return Err(parse_err(format!("empty sku on line {}", i + 2)));
            }
            rows.push(Record {
                sku: sku.to_string(),
                name: optional_field(&row, columns.name),
                description: optional_field(&row, columns.description),
                chg_dttm: Some(at),
            });
        }

        let parsed = rows.len();
        let deduped = dedup_keep_first(rows);
        if deduped.len() < parsed {
            debug!(
                path = %source.display(),
                dropped = parsed - deduped.len(),
                "dropped duplicate skus within file"
            );
        }
        Ok(deduped)
    }
}

fn optional_field(row: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<Columns, String> {
    let mut sku = None;
    let mut name = None;
    let mut description = None;

    for (idx, raw) in headers.iter().enumerate() {
        let header = raw.trim_start_matches('\u{feff}').to_ascii_lowercase();
        let slot = match header.as_str() {
            "sku" => &mut sku,
            "name" => &mut name,
            "description" => &mut description,
            "chg_dttm" => continue,
            other => return Err(format!("unexpected column '{}'", other)),
        };
        if slot.replace(idx).is_some() {
            return Err(format!("duplicate column '{}'", header));
        }
    }

    let sku = sku.ok_or_else(|| "missing required column 'sku'".to_string())?;
    Ok(Columns {
        sku,
        name,
        description,
    })
}

/// Drop rows whose `sku` was already seen, keeping file order.
pub fn dedup_keep_first(rows: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|r| seen.insert(r.sku.clone()))
        .collect()
}
