use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SkusyncError;

/// Column names of the destination table, in storage order.
pub const RECORD_COLUMNS: &[&str] = &["sku", "name", "description", "chg_dttm"];

/// Key of an object in the remote store (e.g. `"2025/06/products.csv"`).
///
/// Always a relative, `/`-separated path with no empty, `.` or `..` segments,
/// so it can be mirrored under the staging directory without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self, SkusyncError> {
        let key = key.into();
        let invalid = |reason: &str| SkusyncError::InvalidKey {
            key: key.clone(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(invalid("keys must be relative and '/'-separated"));
        }
        for segment in key.split('/') {
            match segment {
                "" => return Err(invalid("empty path segment")),
                "." | ".." => return Err(invalid("relative path segment")),
                _ => {}
            }
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative filesystem path mirroring the key's segments.
    pub fn relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }

    /// Last segment of the key.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = SkusyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

/// Snapshot of an object listed from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub key: ObjectKey,
    pub last_modified: DateTime<Utc>,
    pub size: Option<u64>,
}

/// One row of the destination table, keyed by `sku`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub sku: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Ingestion timestamp, stamped when the row was normalized.
    pub chg_dttm: Option<DateTime<Utc>>,
}

/// Latest `chg_dttm` already committed to the destination table.
///
/// `Absent` orders before every timestamp, so comparing two watermarks with
/// `>=` expresses monotonicity directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Watermark {
    Absent,
    At(DateTime<Utc>),
}

impl Watermark {
    pub fn from_option(ts: Option<DateTime<Utc>>) -> Self {
        ts.map_or(Watermark::Absent, Watermark::At)
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Watermark::Absent => None,
            Watermark::At(ts) => Some(*ts),
        }
    }

    /// Whether an object modified at `ts` has not been ingested yet.
    pub fn admits(&self, ts: DateTime<Utc>) -> bool {
        match self {
            Watermark::Absent => true,
            Watermark::At(mark) => ts > *mark,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Absent => f.write_str("absent"),
            Watermark::At(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Current UTC time at the precision the relational store keeps (microseconds).
pub fn ingestion_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
