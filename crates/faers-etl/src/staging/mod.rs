//! Staged chunk files
//!
//! The parser streams rows into per-table chunk files under the quarter's
//! staging directory. A chunk is closed when it reaches the configured row
//! threshold, which bounds the working set regardless of archive size. The
//! deduplicator and loader consume chunks through a format-agnostic reader.
//!
//! Chunk files are named `{table}_chunk_{n}.{csv|parquet}`; the deduplicated
//! outputs written by the filter pass are `{table}_final.{ext}`.

mod csv_chunks;
mod parquet_chunks;

pub use csv_chunks::{write_csv_chunk, CsvChunkReader, CsvChunkWriter};
pub use parquet_chunks::{write_parquet_chunk, ParquetChunkReader, ParquetChunkWriter};

use crate::config::StagingFormat;
use crate::models::{Row, Table, ALL_TABLES};
use faers_common::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A staged data file handed to the loader
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub format: StagingFormat,
}

/// The staged chunk set for one quarter, produced by [`StagingWriter::finish`]
#[derive(Debug)]
pub struct StagedTables {
    format: StagingFormat,
    chunks: BTreeMap<&'static str, Vec<PathBuf>>,
    rows_in: BTreeMap<&'static str, u64>,
}

impl StagedTables {
    pub fn format(&self) -> StagingFormat {
        self.format
    }

    /// Chunk files for a table, in write order
    pub fn chunks(&self, table: Table) -> &[PathBuf] {
        self.chunks.get(table.name()).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Rows staged for a table before deduplication
    pub fn rows_in(&self, table: Table) -> u64 {
        self.rows_in.get(table.name()).copied().unwrap_or(0)
    }

    /// True when no DEMO rows were staged at all
    pub fn is_empty(&self) -> bool {
        self.rows_in(Table::Demo) == 0
    }
}

/// Buffering writer that rolls per-table chunk files at a row threshold
pub struct StagingWriter {
    dir: PathBuf,
    format: StagingFormat,
    chunk_rows: usize,
    buffers: BTreeMap<&'static str, Vec<Row>>,
    counters: BTreeMap<&'static str, usize>,
    chunks: BTreeMap<&'static str, Vec<PathBuf>>,
    rows_in: BTreeMap<&'static str, u64>,
}

impl StagingWriter {
    /// Create a writer rooted at `dir` (created if absent)
    pub fn new(dir: &Path, format: StagingFormat, chunk_rows: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            format,
            chunk_rows: chunk_rows.max(1),
            buffers: BTreeMap::new(),
            counters: BTreeMap::new(),
            chunks: BTreeMap::new(),
            rows_in: BTreeMap::new(),
        })
    }

    /// Append one row; `row` must be aligned to `table.columns()`
    pub fn append(&mut self, table: Table, row: Row) -> Result<()> {
        debug_assert_eq!(row.len(), table.columns().len());
        *self.rows_in.entry(table.name()).or_insert(0) += 1;
        let buffer = self.buffers.entry(table.name()).or_default();
        buffer.push(row);
        if buffer.len() >= self.chunk_rows {
            self.flush(table)?;
        }
        Ok(())
    }

    /// Flush remaining buffers and return the chunk inventory
    pub fn finish(mut self) -> Result<StagedTables> {
        for table in ALL_TABLES {
            self.flush(table)?;
        }
        Ok(StagedTables {
            format: self.format,
            chunks: self.chunks,
            rows_in: self.rows_in,
        })
    }

    fn flush(&mut self, table: Table) -> Result<()> {
        let buffer = match self.buffers.get_mut(table.name()) {
            Some(b) if !b.is_empty() => std::mem::take(b),
            _ => return Ok(()),
        };

        let counter = self.counters.entry(table.name()).or_insert(0);
        let path = self.dir.join(format!(
            "{}_chunk_{}.{}",
            table.name(),
            counter,
            self.format.extension()
        ));
        *counter += 1;

        debug!(table = table.name(), rows = buffer.len(), path = %path.display(), "Flushing staged chunk");
        write_chunk(&path, self.format, table.columns(), &buffer)?;
        self.chunks.entry(table.name()).or_default().push(path);
        Ok(())
    }
}

/// Write one chunk file in the given format
pub fn write_chunk(
    path: &Path,
    format: StagingFormat,
    columns: &[&str],
    rows: &[Row],
) -> Result<()> {
    match format {
        StagingFormat::Csv => write_csv_chunk(path, columns, rows),
        StagingFormat::Parquet => write_parquet_chunk(path, columns, rows),
    }
}

/// Format-agnostic streaming writer for one staged file
pub enum ChunkWriter {
    Csv(CsvChunkWriter),
    Parquet(ParquetChunkWriter),
}

impl ChunkWriter {
    /// Create a writer; `batch_rows` bounds the Parquet batch buffer
    pub fn create(
        path: &Path,
        format: StagingFormat,
        columns: &[&str],
        batch_rows: usize,
    ) -> Result<Self> {
        match format {
            StagingFormat::Csv => Ok(ChunkWriter::Csv(CsvChunkWriter::create(path, columns)?)),
            StagingFormat::Parquet => Ok(ChunkWriter::Parquet(ParquetChunkWriter::create(
                path, columns, batch_rows,
            )?)),
        }
    }

    pub fn append(&mut self, row: Row) -> Result<()> {
        match self {
            ChunkWriter::Csv(w) => w.append(&row),
            ChunkWriter::Parquet(w) => w.append(row),
        }
    }

    /// Close the file and return the row count written
    pub fn finish(self) -> Result<u64> {
        match self {
            ChunkWriter::Csv(w) => w.finish(),
            ChunkWriter::Parquet(w) => w.finish(),
        }
    }
}

/// Format-agnostic reader over one chunk file
pub enum ChunkReader {
    Csv(CsvChunkReader),
    Parquet(ParquetChunkReader),
}

impl ChunkReader {
    pub fn open(path: &Path, format: StagingFormat) -> Result<Self> {
        match format {
            StagingFormat::Csv => Ok(ChunkReader::Csv(CsvChunkReader::open(path)?)),
            StagingFormat::Parquet => Ok(ChunkReader::Parquet(ParquetChunkReader::open(path)?)),
        }
    }

    /// Column names of the chunk, in file order
    pub fn headers(&self) -> &[String] {
        match self {
            ChunkReader::Csv(r) => r.headers(),
            ChunkReader::Parquet(r) => r.headers(),
        }
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ChunkReader::Csv(r) => r.next(),
            ChunkReader::Parquet(r) => r.next(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn demo_row(primaryid: &str, caseid: &str, fda_dt: Option<&str>) -> Row {
        let mut row: Row = vec![None; Table::Demo.columns().len()];
        row[0] = Some(primaryid.to_string());
        row[1] = Some(caseid.to_string());
        if let Some(idx) = Table::Demo.column_index("fda_dt") {
            row[idx] = fda_dt.map(|s| s.to_string());
        }
        row
    }

    #[test]
    fn test_chunk_rollover_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StagingWriter::new(dir.path(), StagingFormat::Csv, 2).unwrap();

        for i in 0..5 {
            writer
                .append(Table::Demo, demo_row(&format!("{}", 1000 + i), "100", Some("20230101")))
                .unwrap();
        }
        let staged = writer.finish().unwrap();

        // 5 rows at a threshold of 2 gives chunks of 2, 2, 1
        assert_eq!(staged.chunks(Table::Demo).len(), 3);
        assert_eq!(staged.rows_in(Table::Demo), 5);
        assert_eq!(staged.rows_in(Table::Drug), 0);
    }

    #[test]
    fn test_round_trip_preserves_nulls() {
        for format in [StagingFormat::Csv, StagingFormat::Parquet] {
            let dir = tempfile::tempdir().unwrap();
            let mut writer = StagingWriter::new(dir.path(), format, 100).unwrap();
            writer.append(Table::Demo, demo_row("1001", "100", None)).unwrap();
            writer.append(Table::Demo, demo_row("1002", "100", Some("20230215"))).unwrap();
            let staged = writer.finish().unwrap();

            let chunks = staged.chunks(Table::Demo);
            assert_eq!(chunks.len(), 1);
            let reader = ChunkReader::open(&chunks[0], format).unwrap();
            assert_eq!(reader.headers()[0], "primaryid");

            let rows: Vec<Row> = reader.collect::<Result<_>>().unwrap();
            assert_eq!(rows.len(), 2);
            let fda_dt = Table::Demo.column_index("fda_dt").unwrap();
            assert_eq!(rows[0][fda_dt], None, "format {:?}", format);
            assert_eq!(rows[1][fda_dt].as_deref(), Some("20230215"));
        }
    }

    #[test]
    fn test_empty_writer_produces_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StagingWriter::new(dir.path(), StagingFormat::Csv, 10).unwrap();
        let staged = writer.finish().unwrap();
        assert!(staged.is_empty());
        assert!(staged.chunks(Table::Demo).is_empty());
    }
}
