//! CSV chunk files
//!
//! `$`-delimited with a header row and minimal quoting, matching what the
//! Postgres COPY path consumes (`FORMAT CSV, HEADER TRUE, DELIMITER '$',
//! NULL ''`). The empty field is the NULL sentinel.

use crate::models::Row;
use faers_common::{FaersError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// The staging delimiter, shared with the upstream ASCII format
pub const DELIMITER: u8 = b'$';

/// Write one CSV chunk with a header row
pub fn write_csv_chunk(path: &Path, columns: &[&str], rows: &[Row]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    writer.write_record(columns).map_err(|e| csv_error(path, e))?;
    for row in rows {
        writer
            .write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))
            .map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

/// Streaming writer for one CSV file, used by the dedup filter pass
pub struct CsvChunkWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl CsvChunkWriter {
    pub fn create(path: &Path, columns: &[&str]) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;
        writer.write_record(columns).map_err(|e| csv_error(path, e))?;
        Ok(Self { path: path.to_path_buf(), writer, rows: 0 })
    }

    pub fn append(&mut self, row: &Row) -> Result<()> {
        self.writer
            .write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))
            .map_err(|e| csv_error(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the row count written
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Streaming reader over one CSV chunk
pub struct CsvChunkReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    headers: Vec<String>,
}

impl CsvChunkReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| csv_error(path, e))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        Ok(Self { path: path.to_path_buf(), reader, headers })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for CsvChunkReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = csv::StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(false) => None,
            Ok(true) => {
                let row = record
                    .iter()
                    .map(|field| if field.is_empty() { None } else { Some(field.to_string()) })
                    .collect();
                Some(Ok(row))
            },
            Err(e) => Some(Err(csv_error(&self.path, e))),
        }
    }
}

fn csv_error(path: &Path, e: csv::Error) -> FaersError {
    FaersError::parse(path.display().to_string(), e.to_string())
}
