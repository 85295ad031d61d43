//! Parquet chunk files
//!
//! Columnar staging format, zstd-compressed. Every column is nullable Utf8:
//! the upstream data is untyped text and typing is deferred to consumers.

use crate::models::Row;
use arrow_array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use faers_common::{FaersError, Result};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Write one Parquet chunk as a single record batch
pub fn write_parquet_chunk(path: &Path, columns: &[&str], rows: &[Row]) -> Result<()> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let arrays: Vec<ArrayRef> = (0..columns.len())
        .map(|col| {
            let values: Vec<Option<&str>> =
                rows.iter().map(|row| row[col].as_deref()).collect();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| parquet_error(path, e.to_string()))?;

    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .map_err(|e| parquet_error(path, e.to_string()))?;
    writer.write(&batch).map_err(|e| parquet_error(path, e.to_string()))?;
    writer.close().map_err(|e| parquet_error(path, e.to_string()))?;
    Ok(())
}

/// Streaming writer for one Parquet file, used by the dedup filter pass.
///
/// Rows are buffered up to `batch_rows` and written as successive record
/// batches through a single `ArrowWriter`, keeping memory bounded.
pub struct ParquetChunkWriter {
    path: PathBuf,
    schema: Arc<Schema>,
    writer: ArrowWriter<File>,
    buffer: Vec<Row>,
    batch_rows: usize,
    rows: u64,
}

impl ParquetChunkWriter {
    pub fn create(path: &Path, columns: &[&str], batch_rows: usize) -> Result<Self> {
        let fields: Vec<Field> = columns
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(|e| parquet_error(path, e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            schema,
            writer,
            buffer: Vec::new(),
            batch_rows: batch_rows.max(1),
            rows: 0,
        })
    }

    pub fn append(&mut self, row: Row) -> Result<()> {
        self.buffer.push(row);
        self.rows += 1;
        if self.buffer.len() >= self.batch_rows {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.buffer);
        let arrays: Vec<ArrayRef> = (0..self.schema.fields().len())
            .map(|col| {
                let values: Vec<Option<&str>> =
                    rows.iter().map(|row| row[col].as_deref()).collect();
                Arc::new(StringArray::from(values)) as ArrayRef
            })
            .collect();
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)
            .map_err(|e| parquet_error(&self.path, e.to_string()))?;
        self.writer
            .write(&batch)
            .map_err(|e| parquet_error(&self.path, e.to_string()))?;
        Ok(())
    }

    /// Flush remaining rows, close the file, return the row count written
    pub fn finish(mut self) -> Result<u64> {
        self.flush_batch()?;
        self.writer
            .close()
            .map_err(|e| parquet_error(&self.path, e.to_string()))?;
        Ok(self.rows)
    }
}

/// Streaming reader over one Parquet chunk
pub struct ParquetChunkReader {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
    headers: Vec<String>,
    current: Vec<StringArray>,
    current_len: usize,
    row: usize,
}

impl ParquetChunkReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| parquet_error(path, e.to_string()))?;
        let headers = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let reader = builder
            .with_batch_size(8192)
            .build()
            .map_err(|e| parquet_error(path, e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            headers,
            current: Vec::new(),
            current_len: 0,
            row: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn load_next_batch(&mut self) -> Option<Result<()>> {
        let batch = match self.reader.next()? {
            Ok(b) => b,
            Err(e) => return Some(Err(parquet_error(&self.path, e.to_string()))),
        };
        let mut columns = Vec::with_capacity(batch.num_columns());
        for column in batch.columns() {
            match column.as_any().downcast_ref::<StringArray>() {
                Some(arr) => columns.push(arr.clone()),
                None => {
                    return Some(Err(parquet_error(
                        &self.path,
                        "staged chunk contains a non-string column".to_string(),
                    )))
                },
            }
        }
        self.current = columns;
        self.current_len = batch.num_rows();
        self.row = 0;
        Some(Ok(()))
    }
}

impl Iterator for ParquetChunkReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.row >= self.current_len {
            match self.load_next_batch()? {
                Ok(()) => {},
                Err(e) => return Some(Err(e)),
            }
        }
        let i = self.row;
        self.row += 1;
        let row = self
            .current
            .iter()
            .map(|arr| if arr.is_null(i) { None } else { Some(arr.value(i).to_string()) })
            .collect();
        Some(Ok(row))
    }
}

fn parquet_error(path: &Path, reason: String) -> FaersError {
    FaersError::parse(path.display().to_string(), reason)
}
