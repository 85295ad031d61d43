//! The load orchestration engine
//!
//! Drives one of three load modes over the per-quarter unit of work:
//!
//! - **Delta**: every quarter strictly newer than the latest SUCCESS in the
//!   load history, ascending. A failure stops the batch; committed quarters
//!   stay committed.
//! - **Partial**: an explicit quarter set, ascending. A failure stops the
//!   remainder of the batch.
//! - **Full**: every quarter advertised upstream, ascending, with delta
//!   semantics per quarter. Re-running resumes after the last SUCCESS
//!   because later quarters replace earlier case versions.
//!
//! Per quarter: STARTED history row, acquire + validate, parse + stage,
//! deduplicate + cascade filter, then one data transaction covering
//! nullification deletes, delta-merge bulk load, data quality checks and the
//! terminal SUCCESS metadata. Any failure rolls the transaction back and
//! records FAILED; the target is bit-identical to before the quarter began.

use faers_common::{FaersError, Quarter, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::archive::ReleaseArchive;
use crate::config::AppSettings;
use crate::dedup;
use crate::download::QuarterSource;
use crate::loader::DatabaseLoader;
use crate::metadata::{LoadHistoryRecord, LoadStatus, TableRowCounts};
use crate::models::ALL_TABLES;
use crate::parser;
use crate::staging::StagingWriter;

/// Requested load mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMode {
    /// Everything newer than the latest successful quarter
    Delta,
    /// An explicit set of quarters
    Partial(Vec<Quarter>),
    /// The whole advertised history
    Full,
}

impl LoadMode {
    /// Label recorded in the load history `mode` column
    pub fn label(&self) -> &'static str {
        match self {
            LoadMode::Delta => "DELTA",
            LoadMode::Partial(_) => "PARTIAL",
            LoadMode::Full => "FULL",
        }
    }
}

/// External cancellation signal, checked at stage boundaries.
///
/// Cancelling rolls back the active transaction and records FAILED with a
/// `CANCELLED` reason; no partial commits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FaersError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of one committed quarter
#[derive(Debug, Clone)]
pub struct QuarterSummary {
    pub quarter: Quarter,
    pub load_id: uuid::Uuid,
    pub rows_deleted: u64,
    pub dq_message: String,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub quarters: Vec<QuarterSummary>,
}

/// Orchestrates FAERS loads against one target store
pub struct LoaderEngine<S: QuarterSource> {
    settings: AppSettings,
    source: S,
    loader: Box<dyn DatabaseLoader>,
    cancel: CancelToken,
}

impl<S: QuarterSource> LoaderEngine<S> {
    pub fn new(settings: AppSettings, source: S, loader: Box<dyn DatabaseLoader>) -> Self {
        Self { settings, source, loader, cancel: CancelToken::new() }
    }

    /// Handle for external cancellation (signal handlers, supervisors)
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute a load run. Quarters are processed strictly sequentially in
    /// ascending order; the first failing quarter stops the batch.
    pub async fn run(&mut self, mode: LoadMode) -> Result<RunSummary> {
        info!(mode = mode.label(), "Starting FAERS load");
        let quarters = self.quarters_to_load(&mode).await?;

        if quarters.is_empty() {
            info!("No quarters to load");
            return Ok(RunSummary::default());
        }
        info!(count = quarters.len(), first = %quarters[0], "Quarters selected for loading");

        let mut summary = RunSummary::default();
        for quarter in quarters {
            self.cancel.check()?;
            let quarter_summary = self.process_quarter(quarter, mode.label()).await?;
            summary.quarters.push(quarter_summary);
        }

        info!(quarters = summary.quarters.len(), "Load run complete");
        Ok(summary)
    }

    /// Resolve the ascending quarter list for a mode
    async fn quarters_to_load(&mut self, mode: &LoadMode) -> Result<Vec<Quarter>> {
        match mode {
            LoadMode::Partial(quarters) => {
                let mut quarters = quarters.clone();
                quarters.sort();
                quarters.dedup();
                Ok(quarters)
            },
            LoadMode::Delta => {
                let last_loaded = self.loader.latest_success_quarter().await?;
                let available = self.source.discover().await?;
                if available.is_empty() {
                    warn!("Could not determine any available quarter upstream");
                    return Ok(Vec::new());
                }
                let quarters: Vec<Quarter> = match last_loaded {
                    Some(last) => {
                        available.into_iter().filter(|q| *q > last).collect()
                    },
                    None => {
                        info!("No previous successful load found, starting from the full catalog");
                        available
                    },
                };
                if quarters.is_empty() {
                    info!("Database is already up-to-date, no new quarters to load");
                }
                Ok(quarters)
            },
            LoadMode::Full => self.source.discover().await,
        }
    }

    /// The per-quarter unit of work
    async fn process_quarter(
        &mut self,
        quarter: Quarter,
        mode_label: &str,
    ) -> Result<QuarterSummary> {
        info!(quarter = %quarter, "Processing quarter");
        let mut record = LoadHistoryRecord::started(quarter, mode_label);
        // STARTED is visible immediately, outside the data transaction
        self.loader.update_load_history(&record).await.map_err(FaersError::from)?;

        let staging_dir = self
            .settings
            .processing
            .staging_dir
            .join(format!("{}_{}", quarter.to_url_fragment(), record.load_id));

        match self.run_quarter_pipeline(&mut record, &staging_dir).await {
            Ok(dq_message) => {
                let _ = std::fs::remove_dir_all(&staging_dir);
                info!(quarter = %quarter, load_id = %record.load_id, "Quarter committed");
                Ok(QuarterSummary {
                    quarter,
                    load_id: record.load_id,
                    rows_deleted: record.rows_deleted.max(0) as u64,
                    dq_message,
                })
            },
            Err(e) => {
                error!(quarter = %quarter, error = %e, "Processing failed, rolling back");
                if let Err(rollback_err) = self.loader.rollback().await {
                    error!(error = %rollback_err, "Rollback failed");
                }

                record.status = LoadStatus::Failed;
                record.finished_at = Some(chrono::Utc::now());
                record.error = Some(format!("{}: {}", e.reason_code(), e));
                if let Err(history_err) = self.loader.update_load_history(&record).await {
                    error!(error = %history_err, "Failed to record FAILED status");
                }

                if self.settings.processing.keep_staging_on_failure {
                    warn!(dir = %staging_dir.display(), "Keeping staging directory for forensics");
                } else {
                    let _ = std::fs::remove_dir_all(&staging_dir);
                }
                Err(e)
            },
        }
    }

    /// Acquire → parse → stage → dedup → transactional load.
    ///
    /// Returns the DQ report message on success. The caller owns rollback
    /// and FAILED bookkeeping.
    async fn run_quarter_pipeline(
        &mut self,
        record: &mut LoadHistoryRecord,
        staging_dir: &std::path::Path,
    ) -> Result<String> {
        let quarter = record.quarter;

        // Acquisition
        self.cancel.check()?;
        let acquired = self.source.acquire(quarter).await?;
        record.source_checksum = Some(acquired.sha256.clone());
        self.warn_on_checksum_drift(quarter, &acquired.sha256).await;

        // Parse + stage
        self.cancel.check()?;
        std::fs::create_dir_all(staging_dir)?;
        let mut archive = ReleaseArchive::open(&acquired.path)?;
        let writer = StagingWriter::new(
            &staging_dir.join("chunks"),
            self.settings.processing.staging_format,
            self.settings.processing.chunk_size,
        )?;
        let parsed = parser::parse_archive(&mut archive, &staging_dir.join("scratch"), writer)?;
        if parsed.skipped_rows > 0 {
            warn!(quarter = %quarter, skipped = parsed.skipped_rows, "Malformed rows were skipped");
        }

        let mut nullified: Vec<String> = parsed.nullified_caseids.iter().cloned().collect();
        nullified.sort();

        if parsed.staged.is_empty() && nullified.is_empty() {
            warn!(quarter = %quarter, "No records and no nullifications, nothing to load");
            record.status = LoadStatus::Success;
            record.finished_at = Some(chrono::Utc::now());
            self.loader.update_load_history(record).await.map_err(FaersError::from)?;
            return Ok("Quarter contained no loadable records".to_string());
        }

        // Deduplicate + cascade filter
        self.cancel.check()?;
        let nullified_set: HashSet<String> = parsed.nullified_caseids;
        let surviving = dedup::select_surviving_primaryids(&parsed.staged, &nullified_set)?;
        let outcome = dedup::filter_staged(
            &parsed.staged,
            staging_dir,
            &surviving,
            self.settings.processing.partial_date_policy,
            self.settings.processing.chunk_size,
        )?;

        let counts: Vec<TableRowCounts> = ALL_TABLES
            .iter()
            .map(|table| TableRowCounts {
                table: table.name().to_string(),
                rows_in: parsed.staged.rows_in(*table) as i64,
                rows_after_dedup: outcome
                    .rows_after_dedup
                    .get(table.name())
                    .copied()
                    .unwrap_or(0) as i64,
            })
            .collect();

        // One transaction: nullifications, delta merge, DQ checks, terminal
        // metadata. Commit makes all of it visible at once.
        self.cancel.check()?;
        self.loader.begin_transaction().await.map_err(FaersError::from)?;

        let rows_deleted = self
            .loader
            .execute_deletions(&nullified)
            .await
            .map_err(FaersError::from)?;
        record.rows_deleted = rows_deleted as i64;

        if !outcome.surviving_caseids.is_empty() {
            self.loader
                .delta_merge(&outcome.surviving_caseids, &outcome.final_files)
                .await
                .map_err(FaersError::from)?;
        }

        let dq = self.loader.run_post_load_dq_checks().await.map_err(FaersError::from)?;
        if !dq.passed {
            return Err(FaersError::DataQuality(dq.message));
        }

        record.status = LoadStatus::Success;
        record.finished_at = Some(chrono::Utc::now());
        self.loader.update_load_history(record).await.map_err(FaersError::from)?;
        self.loader
            .record_row_counts(record.load_id, &counts)
            .await
            .map_err(FaersError::from)?;

        self.cancel.check()?;
        self.loader.commit().await.map_err(FaersError::from)?;

        Ok(dq.message)
    }

    /// The source is authoritative: a checksum that differs from an earlier
    /// load of the same quarter is surprising but not fatal.
    async fn warn_on_checksum_drift(&mut self, quarter: Quarter, sha256: &str) {
        match self.loader.history(quarter).await {
            Ok(history) => {
                let previous = history
                    .iter()
                    .filter_map(|r| r.source_checksum.as_deref())
                    .find(|c| *c != sha256);
                if let Some(previous) = previous {
                    warn!(
                        quarter = %quarter,
                        previous = %previous,
                        current = %sha256,
                        "Archive checksum differs from a previously recorded load"
                    );
                }
            },
            Err(e) => warn!(quarter = %quarter, error = %e, "Could not read load history"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_labels() {
        assert_eq!(LoadMode::Delta.label(), "DELTA");
        assert_eq!(LoadMode::Partial(vec![]).label(), "PARTIAL");
        assert_eq!(LoadMode::Full.label(), "FULL");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(FaersError::Cancelled)));
    }
}
