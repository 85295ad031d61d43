//! ASCII release parser
//!
//! FAERS ASCII releases carry one `$`-delimited text file per table with a
//! header row, plus a deletion list (`DELE*.TXT` or similar) naming CASEIDs
//! retracted this quarter. Files are read line-wise as raw bytes: each field
//! is decoded as UTF-8 with a Latin-1 fallback, since older quarters mix
//! encodings. Header names are lower-cased and mapped onto the canonical
//! column set; unknown columns are ignored, absent ones load as NULL.

use crate::models::{Row, Table, ALL_TABLES};
use crate::staging::StagingWriter;
use faers_common::{FaersError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of parsing one extracted ASCII quarter directory
pub struct AsciiOutcome {
    pub nullified_caseids: HashSet<String>,
    pub skipped_rows: u64,
}

/// Parse all recognized table files in `dir` into the staging writer
pub fn parse_quarter_dir(dir: &Path, writer: &mut StagingWriter) -> Result<AsciiOutcome> {
    let nullified_caseids = match find_deletion_file(dir) {
        Some(path) => parse_deletion_file(&path)?,
        None => {
            info!("No deletion file found for this quarter");
            HashSet::new()
        },
    };

    let mut skipped_rows = 0u64;
    for table in ALL_TABLES {
        match find_table_file(dir, table.name()) {
            Some(path) => {
                skipped_rows += parse_table_file(&path, table, writer)?;
            },
            None => warn!(table = table.name(), dir = %dir.display(), "No data file found"),
        }
    }

    Ok(AsciiOutcome { nullified_caseids, skipped_rows })
}

/// Locate `{TABLE}*.txt` case-insensitively (e.g. `DEMO23Q1.TXT`)
fn find_table_file(dir: &Path, table_name: &str) -> Option<PathBuf> {
    let prefix = table_name.to_lowercase();
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.starts_with(&prefix) && name.ends_with(".txt")
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Locate the quarter's deletion list
fn find_deletion_file(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.ends_with(".txt")
                && (name.starts_with("dele") || name.starts_with("deleted_cases") || name.starts_with("del_"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Parse a deletion file into the nullification set.
///
/// Two shapes appear upstream: a `$`-delimited file with a header naming a
/// `caseid` column, and a bare list with one CASEID per line.
pub fn parse_deletion_file(path: &Path) -> Result<HashSet<String>> {
    info!(path = %path.display(), "Found deletion file");
    let contents = std::fs::read(path)?;
    let mut caseids = HashSet::new();

    let mut lines = contents.split(|b| *b == b'\n');
    let first = match lines.next() {
        Some(line) => decode_line(line),
        None => return Ok(caseids),
    };

    let header: Vec<String> = first
        .trim_end_matches('\r')
        .split('$')
        .map(|h| h.trim().to_lowercase())
        .collect();

    if let Some(idx) = header.iter().position(|h| h == "caseid") {
        for line in lines {
            let line = decode_line(line);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some(value) = line.split('$').nth(idx) {
                let value = value.trim();
                if !value.is_empty() {
                    caseids.insert(value.to_string());
                }
            }
        }
    } else {
        // Bare one-per-line form; the first line is data, not a header
        let first = first.trim();
        if first.chars().all(|c| c.is_ascii_digit()) && !first.is_empty() {
            caseids.insert(first.to_string());
        }
        for line in lines {
            let line = decode_line(line);
            let value = line.trim();
            if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
                caseids.insert(value.to_string());
            }
        }
    }

    info!(count = caseids.len(), "Extracted CASEIDs for deletion");
    Ok(caseids)
}

/// Parse one table file, returning the count of malformed rows skipped
fn parse_table_file(path: &Path, table: Table, writer: &mut StagingWriter) -> Result<u64> {
    debug!(path = %path.display(), table = table.name(), "Parsing ASCII table file");

    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'$')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(file);

    let mut records = reader.byte_records();
    let header: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| FaersError::parse(path.display().to_string(), e.to_string()))?
            .iter()
            .map(|field| decode_field(field).trim().to_lowercase())
            .collect(),
        None => {
            warn!(path = %path.display(), "File is empty or has no header");
            return Ok(0);
        },
    };

    // Map each canonical column onto its position in this file's header
    let positions: Vec<Option<usize>> = table
        .columns()
        .iter()
        .map(|col| header.iter().position(|h| h == col))
        .collect();

    let mut skipped = 0u64;
    let mut line_number = 1u64;
    for record in records {
        line_number += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), line = line_number, error = %e, "Skipping unreadable row");
                skipped += 1;
                continue;
            },
        };
        if record.len() != header.len() {
            warn!(
                path = %path.display(),
                line = line_number,
                fields = record.len(),
                expected = header.len(),
                "Skipping malformed row"
            );
            skipped += 1;
            continue;
        }

        let row: Row = positions
            .iter()
            .map(|pos| {
                pos.and_then(|i| record.get(i)).and_then(|field| {
                    let value = decode_field(field);
                    let value = value.trim();
                    if value.is_empty() { None } else { Some(value.to_string()) }
                })
            })
            .collect();
        writer.append(table, row)?;
    }

    Ok(skipped)
}

/// Decode a field as UTF-8, falling back to Latin-1
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|b| *b as char).collect(),
    }
}

fn decode_line(bytes: &[u8]) -> String {
    decode_field(bytes)
}
