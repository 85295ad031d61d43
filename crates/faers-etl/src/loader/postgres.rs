//! PostgreSQL reference backend
//!
//! Implements the loader contract on a single `PgConnection` with explicit
//! transaction control. Data lands through the native bulk path only:
//! `COPY <table> FROM STDIN (FORMAT CSV, HEADER TRUE, DELIMITER '$',
//! NULL '')`. CSV staged files are streamed to the wire in fixed-size
//! buffers; Parquet staged files are transcoded batch-by-batch into the same
//! CSV wire format. Row-by-row inserts are used only for the two small
//! process-metadata tables.

use crate::config::{DatabaseSettings, StagingFormat};
use crate::metadata::{DqReport, LoadHistoryRecord, TableRowCounts};
use crate::models::{Table, ALL_TABLES};
use crate::staging::{ChunkReader, StagedFile};
use async_trait::async_trait;
use faers_common::Quarter;
use sqlx::{Connection, Executor, PgConnection, Row};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DatabaseLoader, LoadError};

/// Deletion order: children before the DEMO parent
const DELETE_ORDER: [Table; 7] = [
    Table::Ther,
    Table::Rpsr,
    Table::Reac,
    Table::Outc,
    Table::Indi,
    Table::Drug,
    Table::Demo,
];

/// Rows accumulated per COPY buffer when transcoding Parquet
const COPY_BATCH_ROWS: usize = 8192;

pub struct PostgresLoader {
    settings: DatabaseSettings,
    conn: Option<PgConnection>,
}

impl PostgresLoader {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self { settings, conn: None }
    }

    fn conn(&mut self) -> Result<&mut PgConnection, LoadError> {
        self.conn
            .as_mut()
            .ok_or_else(|| LoadError::Unreachable("no database connection available".to_string()))
    }

    fn copy_statement(table: Table) -> String {
        let columns: Vec<String> =
            table.columns().iter().map(|c| format!("\"{}\"", c)).collect();
        format!(
            "COPY {} ({}) FROM STDIN (FORMAT CSV, HEADER TRUE, DELIMITER '$', NULL '')",
            table.name(),
            columns.join(", ")
        )
    }

    fn create_table_ddl(table: Table) -> String {
        let columns: Vec<String> = table
            .columns()
            .iter()
            .map(|c| {
                if table == Table::Demo && *c == "primaryid" {
                    format!("    \"{}\" TEXT PRIMARY KEY", c)
                } else {
                    format!("    \"{}\" TEXT NULL", c)
                }
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            table.name(),
            columns.join(",\n")
        )
    }

    /// Stream a CSV staged file into an open COPY
    async fn copy_csv_file(
        conn: &mut PgConnection,
        table: Table,
        source: &StagedFile,
    ) -> Result<u64, LoadError> {
        let statement = Self::copy_statement(table);
        let mut copy = conn
            .copy_in_raw(&statement)
            .await
            .map_err(|e| classify_copy_error(table, e))?;

        let mut file = match std::fs::File::open(&source.path) {
            Ok(f) => f,
            Err(e) => {
                copy.abort("staged file unreadable").await.ok();
                return Err(LoadError::Staging(format!(
                    "{}: {}",
                    source.path.display(),
                    e
                )));
            },
        };

        let mut buffer = vec![0u8; 8192];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    copy.abort("staged file unreadable").await.ok();
                    return Err(LoadError::Staging(format!(
                        "{}: {}",
                        source.path.display(),
                        e
                    )));
                },
            };
            copy.send(&buffer[..n])
                .await
                .map_err(|e| classify_copy_error(table, e))?;
        }

        copy.finish().await.map_err(|e| classify_copy_error(table, e))
    }

    /// Transcode a Parquet staged file into the CSV wire format
    async fn copy_parquet_file(
        conn: &mut PgConnection,
        table: Table,
        source: &StagedFile,
    ) -> Result<u64, LoadError> {
        let statement = Self::copy_statement(table);
        let mut reader = ChunkReader::open(&source.path, StagingFormat::Parquet)
            .map_err(|e| LoadError::Staging(e.to_string()))?;

        let mut copy = conn
            .copy_in_raw(&statement)
            .await
            .map_err(|e| classify_copy_error(table, e))?;

        // Header line first (COPY runs with HEADER TRUE)
        let mut pending: Vec<Vec<Option<String>>> = Vec::with_capacity(COPY_BATCH_ROWS);
        let mut first_batch = true;
        loop {
            let mut done = false;
            while pending.len() < COPY_BATCH_ROWS {
                match reader.next() {
                    Some(Ok(row)) => pending.push(row),
                    Some(Err(e)) => {
                        copy.abort("staged file unreadable").await.ok();
                        return Err(LoadError::Staging(e.to_string()));
                    },
                    None => {
                        done = true;
                        break;
                    },
                }
            }

            if !pending.is_empty() || first_batch {
                let bytes = match encode_csv_batch(table, &pending, first_batch) {
                    Ok(bytes) => bytes,
                    Err(reason) => {
                        copy.abort("batch encoding failed").await.ok();
                        return Err(LoadError::BulkFormat {
                            table: table.name().to_string(),
                            reason,
                        });
                    },
                };
                first_batch = false;
                pending.clear();
                copy.send(bytes.as_slice())
                    .await
                    .map_err(|e| classify_copy_error(table, e))?;
            }

            if done {
                break;
            }
        }

        copy.finish().await.map_err(|e| classify_copy_error(table, e))
    }
}

/// Serialize a batch of rows as `$`-delimited CSV bytes
fn encode_csv_batch(
    table: Table,
    rows: &[Vec<Option<String>>],
    include_header: bool,
) -> Result<Vec<u8>, String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'$')
        .from_writer(Vec::new());
    if include_header {
        writer.write_record(table.columns()).map_err(|e| e.to_string())?;
    }
    for row in rows {
        writer
            .write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))
            .map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

/// Map a sqlx error from the COPY path onto the contract taxonomy
fn classify_copy_error(table: Table, e: sqlx::Error) -> LoadError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(code) = db.code() {
            if code.starts_with("23") {
                return LoadError::Constraint(db.to_string());
            }
            if code.starts_with("22") {
                return LoadError::BulkFormat {
                    table: table.name().to_string(),
                    reason: db.to_string(),
                };
            }
        }
    }
    LoadError::Database(e)
}

/// Map a connection error onto AUTH vs UNREACHABLE
fn classify_connect_error(e: sqlx::Error) -> LoadError {
    match &e {
        sqlx::Error::Database(db) => {
            // 28xxx: invalid authorization specification
            if db.code().map(|c| c.starts_with("28")).unwrap_or(false) {
                LoadError::Auth(db.to_string())
            } else {
                LoadError::Unreachable(db.to_string())
            }
        },
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            LoadError::Unreachable(e.to_string())
        },
        _ => LoadError::Unreachable(e.to_string()),
    }
}

#[async_trait]
impl DatabaseLoader for PostgresLoader {
    async fn connect(&mut self) -> Result<(), LoadError> {
        info!(
            host = %self.settings.host,
            dbname = %self.settings.dbname,
            "Connecting to PostgreSQL"
        );
        let conn = PgConnection::connect(&self.settings.connection_url())
            .await
            .map_err(classify_connect_error)?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn initialize_schema(&mut self) -> Result<(), LoadError> {
        let conn = self.conn()?;
        for table in ALL_TABLES {
            let ddl = Self::create_table_ddl(table);
            debug!(table = table.name(), "Executing DDL");
            conn.execute(ddl.as_str())
                .await
                .map_err(|e| LoadError::SchemaConflict(e.to_string()))?;
        }

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _faers_load_history (
                load_id UUID PRIMARY KEY,
                quarter VARCHAR(10) NOT NULL,
                mode VARCHAR(20) NOT NULL,
                status VARCHAR(20) NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                source_checksum VARCHAR(64),
                rows_deleted BIGINT NOT NULL DEFAULT 0,
                error TEXT
            );
            "#,
        )
        .await
        .map_err(|e| LoadError::SchemaConflict(e.to_string()))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _faers_row_counts (
                load_id UUID NOT NULL,
                table_name VARCHAR(10) NOT NULL,
                rows_in BIGINT NOT NULL,
                rows_after_dedup BIGINT NOT NULL,
                PRIMARY KEY (load_id, table_name)
            );
            "#,
        )
        .await
        .map_err(|e| LoadError::SchemaConflict(e.to_string()))?;

        info!("Schema initialization complete");
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<(), LoadError> {
        self.conn()?
            .execute("BEGIN")
            .await
            .map_err(|e| LoadError::TxnFailed(e.to_string()))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        self.conn()?
            .execute("COMMIT")
            .await
            .map_err(|e| LoadError::TxnFailed(e.to_string()))?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        self.conn()?
            .execute("ROLLBACK")
            .await
            .map_err(|e| LoadError::TxnFailed(e.to_string()))?;
        Ok(())
    }

    async fn bulk_load(&mut self, table: &str, source: &StagedFile) -> Result<u64, LoadError> {
        let table = Table::from_name(table).ok_or_else(|| LoadError::BulkFormat {
            table: table.to_string(),
            reason: "unknown FAERS table".to_string(),
        })?;
        info!(table = table.name(), path = %source.path.display(), "Starting native bulk load");

        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| LoadError::Unreachable("no database connection available".to_string()))?;

        let rows = match source.format {
            StagingFormat::Csv => Self::copy_csv_file(conn, table, source).await?,
            StagingFormat::Parquet => Self::copy_parquet_file(conn, table, source).await?,
        };

        info!(table = table.name(), rows, "Bulk load complete");
        Ok(rows)
    }

    async fn execute_deletions(&mut self, case_ids: &[String]) -> Result<u64, LoadError> {
        if case_ids.is_empty() {
            return Ok(0);
        }
        info!(cases = case_ids.len(), "Deleting existing case versions");

        let conn = self.conn()?;
        let primary_ids: Vec<String> =
            sqlx::query_scalar("SELECT primaryid FROM demo WHERE caseid = ANY($1)")
                .bind(case_ids)
                .fetch_all(&mut *conn)
                .await?;

        if primary_ids.is_empty() {
            debug!("No matching primaryids for the given caseids, nothing to delete");
            return Ok(0);
        }

        let mut total_deleted = 0u64;
        for table in DELETE_ORDER {
            let sql = format!("DELETE FROM {} WHERE primaryid = ANY($1)", table.name());
            let result = sqlx::query(&sql)
                .bind(&primary_ids)
                .execute(&mut *conn)
                .await
                .map_err(|e| classify_copy_error(table, e))?;
            total_deleted += result.rows_affected();
        }

        info!(rows = total_deleted, "Deletion complete");
        Ok(total_deleted)
    }

    async fn delta_merge(
        &mut self,
        case_ids: &[String],
        sources: &BTreeMap<&'static str, StagedFile>,
    ) -> Result<(), LoadError> {
        // Remove prior versions first so a re-run of the same quarter is
        // idempotent, then append through the bulk path.
        self.execute_deletions(case_ids).await?;

        for table in ALL_TABLES {
            if let Some(source) = sources.get(table.name()) {
                self.bulk_load(table.name(), source).await?;
            }
        }
        Ok(())
    }

    async fn update_load_history(&mut self, record: &LoadHistoryRecord) -> Result<(), LoadError> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO _faers_load_history (
                load_id, quarter, mode, status, started_at, finished_at,
                source_checksum, rows_deleted, error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (load_id) DO UPDATE SET
                status = EXCLUDED.status,
                finished_at = EXCLUDED.finished_at,
                source_checksum = EXCLUDED.source_checksum,
                rows_deleted = EXCLUDED.rows_deleted,
                error = EXCLUDED.error
            "#,
        )
        .bind(record.load_id)
        .bind(record.quarter.to_string())
        .bind(&record.mode)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(&record.source_checksum)
        .bind(record.rows_deleted)
        .bind(&record.error)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn record_row_counts(
        &mut self,
        load_id: Uuid,
        counts: &[TableRowCounts],
    ) -> Result<(), LoadError> {
        let conn = self.conn()?;
        for count in counts {
            sqlx::query(
                r#"
                INSERT INTO _faers_row_counts (load_id, table_name, rows_in, rows_after_dedup)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (load_id, table_name) DO UPDATE SET
                    rows_in = EXCLUDED.rows_in,
                    rows_after_dedup = EXCLUDED.rows_after_dedup
                "#,
            )
            .bind(load_id)
            .bind(&count.table)
            .bind(count.rows_in)
            .bind(count.rows_after_dedup)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn latest_success_quarter(&mut self) -> Result<Option<Quarter>, LoadError> {
        let conn = self.conn()?;
        let quarter: Option<String> = sqlx::query_scalar(
            r#"
            SELECT quarter FROM _faers_load_history
            WHERE status = 'SUCCESS'
            ORDER BY quarter DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await?;

        match quarter {
            Some(q) => match q.parse::<Quarter>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => {
                    warn!(quarter = %q, error = %e, "Ignoring unparseable quarter in load history");
                    Ok(None)
                },
            },
            None => Ok(None),
        }
    }

    async fn history(&mut self, quarter: Quarter) -> Result<Vec<LoadHistoryRecord>, LoadError> {
        let conn = self.conn()?;
        let rows = sqlx::query(
            r#"
            SELECT load_id, quarter, mode, status, started_at, finished_at,
                   source_checksum, rows_deleted, error
            FROM _faers_load_history
            WHERE quarter = $1
            ORDER BY started_at DESC
            "#,
        )
        .bind(quarter.to_string())
        .fetch_all(&mut *conn)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let status = status.parse().map_err(|e: String| {
                LoadError::Database(sqlx::Error::Decode(e.into()))
            })?;
            let quarter_str: String = row.get("quarter");
            let quarter = quarter_str.parse().map_err(|e: String| {
                LoadError::Database(sqlx::Error::Decode(e.into()))
            })?;
            records.push(LoadHistoryRecord {
                load_id: row.get("load_id"),
                quarter,
                mode: row.get("mode"),
                status,
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                source_checksum: row.get("source_checksum"),
                rows_deleted: row.get("rows_deleted"),
                error: row.get("error"),
            });
        }
        Ok(records)
    }

    async fn run_post_load_dq_checks(&mut self) -> Result<DqReport, LoadError> {
        info!("Running post-load data quality checks");
        let conn = self.conn()?;

        let row = sqlx::query(
            "SELECT COUNT(DISTINCT caseid) AS distinct_caseids, COUNT(*) AS total_rows FROM demo",
        )
        .fetch_one(&mut *conn)
        .await?;
        let distinct_caseids: i64 = row.get("distinct_caseids");
        let total_rows: i64 = row.get("total_rows");

        if distinct_caseids != total_rows {
            return Ok(DqReport {
                passed: false,
                message: format!(
                    "Deduplication error detected in DEMO: {} rows but only {} unique CASEIDs",
                    total_rows, distinct_caseids
                ),
            });
        }

        let null_pks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM demo WHERE primaryid IS NULL OR primaryid = ''",
        )
        .fetch_one(&mut *conn)
        .await?;

        if null_pks != 0 {
            return Ok(DqReport {
                passed: false,
                message: format!("DEMO contains {} rows with a null or empty primaryid", null_pks),
            });
        }

        Ok(DqReport {
            passed: true,
            message: format!(
                "DEMO contains {} rows, all with unique CASEIDs and non-null primaryids",
                total_rows
            ),
        })
    }

    async fn close(&mut self) -> Result<(), LoadError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}
