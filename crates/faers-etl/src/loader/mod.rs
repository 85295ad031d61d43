//! The database loader contract
//!
//! All backend-specific work sits behind [`DatabaseLoader`]. The engine only
//! ever talks to this trait: connect, prepare schema, open a transaction,
//! apply nullifications, delta-merge the deduplicated staged files through
//! the backend's native bulk path, run data quality checks, write process
//! metadata, commit or roll back.
//!
//! Backends are discovered through [`LoaderRegistry`], a process-wide map
//! from backend name to factory populated at startup by whichever modules
//! the binary links in.

pub mod postgres;

use crate::config::DatabaseSettings;
use crate::metadata::{DqReport, LoadHistoryRecord, TableRowCounts};
use crate::staging::StagedFile;
use async_trait::async_trait;
use faers_common::{FaersError, Quarter};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by loader backends
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Database unreachable: {0}")]
    Unreachable(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Transaction failed: {0}")]
    TxnFailed(String),

    #[error("Bulk format rejected for table '{table}': {reason}")]
    BulkFormat { table: String, reason: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Staged file unreadable: {0}")]
    Staging(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LoadError> for FaersError {
    fn from(e: LoadError) -> Self {
        FaersError::load(operation_label(&e), e.to_string())
    }
}

fn operation_label(e: &LoadError) -> &'static str {
    match e {
        LoadError::Auth(_) => "connect",
        LoadError::Unreachable(_) => "connect",
        LoadError::SchemaConflict(_) => "prepare_schema",
        LoadError::TxnFailed(_) => "transaction",
        LoadError::BulkFormat { .. } => "bulk_load",
        LoadError::Constraint(_) => "merge",
        LoadError::Staging(_) => "bulk_load",
        LoadError::Database(_) => "database",
    }
}

/// The narrow contract every target-store backend implements.
///
/// Data mutations between `begin_transaction` and `commit` must be atomic:
/// either the whole quarter lands or none of it does. `update_load_history`
/// participates in the open transaction when one is active, which couples
/// the terminal SUCCESS row to the data commit.
#[async_trait]
pub trait DatabaseLoader: Send {
    /// Establish a connection to the target store
    async fn connect(&mut self) -> Result<(), LoadError>;

    /// Create the seven FAERS tables and process-metadata tables if absent
    async fn initialize_schema(&mut self) -> Result<(), LoadError>;

    async fn begin_transaction(&mut self) -> Result<(), LoadError>;
    async fn commit(&mut self) -> Result<(), LoadError>;
    async fn rollback(&mut self) -> Result<(), LoadError>;

    /// Load one staged file through the backend's native bulk path
    async fn bulk_load(&mut self, table: &str, source: &StagedFile) -> Result<u64, LoadError>;

    /// Delete every row belonging to the given CASEIDs across all tables
    async fn execute_deletions(&mut self, case_ids: &[String]) -> Result<u64, LoadError>;

    /// Delete existing versions of the given CASEIDs, then bulk-load the new
    /// per-table files. Yields latest-version-only state.
    async fn delta_merge(
        &mut self,
        case_ids: &[String],
        sources: &BTreeMap<&'static str, StagedFile>,
    ) -> Result<(), LoadError>;

    /// Insert or update one load-history row
    async fn update_load_history(&mut self, record: &LoadHistoryRecord) -> Result<(), LoadError>;

    /// Record per-table row counters for a load
    async fn record_row_counts(
        &mut self,
        load_id: Uuid,
        counts: &[TableRowCounts],
    ) -> Result<(), LoadError>;

    /// Latest quarter with a SUCCESS history row, if any
    async fn latest_success_quarter(&mut self) -> Result<Option<Quarter>, LoadError>;

    /// All history rows for a quarter, newest first
    async fn history(&mut self, quarter: Quarter) -> Result<Vec<LoadHistoryRecord>, LoadError>;

    /// Post-load data quality checks against the loaded state
    async fn run_post_load_dq_checks(&mut self) -> Result<DqReport, LoadError>;

    /// Release the connection
    async fn close(&mut self) -> Result<(), LoadError>;
}

/// Factory producing an unconnected loader for the given settings
pub type LoaderFactory = fn(&DatabaseSettings) -> Box<dyn DatabaseLoader>;

/// Process-wide backend registry, keyed by the `db.type` configuration value
pub struct LoaderRegistry {
    factories: BTreeMap<String, LoaderFactory>,
}

impl LoaderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// The registry with all built-in backends registered
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("postgresql", |settings| {
            Box::new(postgres::PostgresLoader::new(settings.clone()))
        });
        registry
    }

    /// Register a backend under a stable identifier
    pub fn register(&mut self, name: &str, factory: LoaderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Registered backend names
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|k| k.as_str()).collect()
    }

    /// Instantiate the backend selected by `settings.type`
    pub fn create(
        &self,
        settings: &DatabaseSettings,
    ) -> faers_common::Result<Box<dyn DatabaseLoader>> {
        match self.factories.get(&settings.r#type) {
            Some(factory) => Ok(factory(settings)),
            None => Err(FaersError::config(
                format!("Unsupported database type: {}", settings.r#type),
                format!("Known backends: {}", self.names().join(", ")),
            )),
        }
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
