//! Process metadata records
//!
//! Every quarter processed yields exactly one terminal row in the load
//! history: a `STARTED` row is written before acquisition begins and is
//! upserted to `SUCCESS` or `FAILED` when the quarter resolves. The terminal
//! `SUCCESS` upsert shares the data transaction, so the history never claims
//! success for data that did not commit.

use chrono::{DateTime, Utc};
use faers_common::Quarter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Load status recorded in `_faers_load_history`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    Started,
    Success,
    Failed,
    RolledBack,
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(LoadStatus::Started),
            "SUCCESS" => Ok(LoadStatus::Success),
            "FAILED" => Ok(LoadStatus::Failed),
            "ROLLED_BACK" => Ok(LoadStatus::RolledBack),
            other => Err(format!("Unknown load status: {}", other)),
        }
    }
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Started => "STARTED",
            LoadStatus::Success => "SUCCESS",
            LoadStatus::Failed => "FAILED",
            LoadStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

/// One row of `_faers_load_history`
#[derive(Debug, Clone)]
pub struct LoadHistoryRecord {
    pub load_id: Uuid,
    pub quarter: Quarter,
    /// Load mode label: `DELTA`, `PARTIAL` or `FULL`
    pub mode: String,
    pub status: LoadStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// SHA-256 over the source archive bytes
    pub source_checksum: Option<String>,
    pub rows_deleted: i64,
    pub error: Option<String>,
}

impl LoadHistoryRecord {
    /// A fresh STARTED record for a new quarter-unit-of-work
    pub fn started(quarter: Quarter, mode: &str) -> Self {
        Self {
            load_id: Uuid::new_v4(),
            quarter,
            mode: mode.to_string(),
            status: LoadStatus::Started,
            started_at: Utc::now(),
            finished_at: None,
            source_checksum: None,
            rows_deleted: 0,
            error: None,
        }
    }
}

/// Per-table row counters recorded in `_faers_row_counts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRowCounts {
    pub table: String,
    pub rows_in: i64,
    pub rows_after_dedup: i64,
}

/// Outcome of the post-load data quality checks
#[derive(Debug, Clone)]
pub struct DqReport {
    pub passed: bool,
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_started_record() {
        let quarter: Quarter = "2023Q1".parse().unwrap();
        let record = LoadHistoryRecord::started(quarter, "DELTA");
        assert_eq!(record.status, LoadStatus::Started);
        assert_eq!(record.mode, "DELTA");
        assert!(record.finished_at.is_none());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(LoadStatus::Started.as_str(), "STARTED");
        assert_eq!(LoadStatus::Success.as_str(), "SUCCESS");
        assert_eq!(LoadStatus::Failed.as_str(), "FAILED");
        assert_eq!(LoadStatus::RolledBack.as_str(), "ROLLED_BACK");
    }
}
