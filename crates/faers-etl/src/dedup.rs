//! Case-version deduplication
//!
//! FAERS publishes multiple versions of a case over time; only the latest
//! version may survive into the target store. The selection rule: within the
//! working set, for each CASEID keep the row with the maximum FDA_DT,
//! breaking ties with the maximum PRIMARYID.
//!
//! DEMO drives selection because FDA_DT and PRIMARYID live there. FDA_DT is
//! parsed strictly as `YYYYMMDD`; a missing, partial or unparseable value
//! sorts below every real date. PRIMARYIDs compare numerically when both
//! sides are integers, lexically otherwise, so the tie-break is total and
//! deterministic. CASEIDs nullified in the same quarter never survive.

use crate::config::{PartialDatePolicy, StagingFormat};
use crate::models::{Row, Table, ALL_TABLES};
use crate::staging::{ChunkReader, ChunkWriter, StagedFile, StagedTables};
use chrono::NaiveDate;
use faers_common::{FaersError, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Result of the dedup + cascade filter pass
pub struct DedupOutcome {
    /// Final per-table files, only for tables with surviving rows
    pub final_files: BTreeMap<&'static str, StagedFile>,
    /// Rows written per table after dedup (all seven tables)
    pub rows_after_dedup: BTreeMap<&'static str, u64>,
    /// CASEIDs present in the final DEMO output, the delta-merge key set
    pub surviving_caseids: Vec<String>,
}

/// Compare two PRIMARYIDs: numeric when both parse as integers, else lexical
fn cmp_primaryid(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Parse FDA_DT strictly; partial dates are not dates for ordering purposes
fn parse_fda_dt(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
}

/// `(fda_dt desc, primaryid desc)`: true when `candidate` beats `current`
fn wins(
    candidate: (&Option<NaiveDate>, &str),
    current: (&Option<NaiveDate>, &str),
) -> bool {
    match candidate.0.cmp(current.0) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => cmp_primaryid(candidate.1, current.1) == Ordering::Greater,
    }
}

/// Scan DEMO chunks and select the surviving PRIMARYID per CASEID
pub fn select_surviving_primaryids(
    staged: &StagedTables,
    nullified_caseids: &HashSet<String>,
) -> Result<HashSet<String>> {
    let mut best: HashMap<String, (Option<NaiveDate>, String)> = HashMap::new();

    for chunk in staged.chunks(Table::Demo) {
        let reader = ChunkReader::open(chunk, staged.format())?;
        let caseid_idx = column_index(reader.headers(), "caseid", chunk)?;
        let primaryid_idx = column_index(reader.headers(), "primaryid", chunk)?;
        let fda_dt_idx = reader.headers().iter().position(|h| h == "fda_dt");

        for row in reader {
            let row = row?;
            let caseid = match row.get(caseid_idx).and_then(|v| v.as_deref()) {
                Some(c) => c,
                None => continue,
            };
            let primaryid = match row.get(primaryid_idx).and_then(|v| v.as_deref()) {
                Some(p) => p,
                None => continue,
            };
            if nullified_caseids.contains(caseid) {
                continue;
            }
            let fda_dt =
                parse_fda_dt(fda_dt_idx.and_then(|i| row.get(i)).and_then(|v| v.as_deref()));

            match best.get_mut(caseid) {
                None => {
                    best.insert(caseid.to_string(), (fda_dt, primaryid.to_string()));
                },
                Some(current) => {
                    if wins((&fda_dt, primaryid), (&current.0, current.1.as_str())) {
                        *current = (fda_dt, primaryid.to_string());
                    }
                },
            }
        }
    }

    info!(cases = best.len(), "Deduplication complete");
    Ok(best.into_values().map(|(_, primaryid)| primaryid).collect())
}

/// Rewrite staged tables keeping only surviving PRIMARYIDs.
///
/// DEMO and all six children are filtered by membership; the drug-name
/// cleaning and the configured partial-date policy are applied here so the
/// staged chunks keep the source bytes untouched.
pub fn filter_staged(
    staged: &StagedTables,
    out_dir: &Path,
    surviving: &HashSet<String>,
    date_policy: PartialDatePolicy,
    batch_rows: usize,
) -> Result<DedupOutcome> {
    info!(keep = surviving.len(), "Filtering staged files to surviving records");

    let mut final_files = BTreeMap::new();
    let mut rows_after_dedup = BTreeMap::new();
    let mut surviving_caseids = Vec::new();

    for table in ALL_TABLES {
        let chunks = staged.chunks(table);
        if chunks.is_empty() || surviving.is_empty() {
            rows_after_dedup.insert(table.name(), 0);
            continue;
        }

        let path = out_dir.join(format!("{}_final.{}", table.name(), staged.format().extension()));
        let mut writer =
            ChunkWriter::create(&path, staged.format(), table.columns(), batch_rows)?;
        let caseid_col = table.column_index("caseid");

        for chunk in chunks {
            let reader = ChunkReader::open(chunk, staged.format())?;
            let primaryid_idx = column_index(reader.headers(), "primaryid", chunk)?;

            for row in reader {
                let mut row: Row = row?;
                let keep = row
                    .get(primaryid_idx)
                    .and_then(|v| v.as_deref())
                    .map(|p| surviving.contains(p))
                    .unwrap_or(false);
                if !keep {
                    continue;
                }
                transform_row(table, &mut row, date_policy);
                if table == Table::Demo {
                    if let Some(caseid) =
                        caseid_col.and_then(|i| row.get(i)).and_then(|v| v.clone())
                    {
                        surviving_caseids.push(caseid);
                    }
                }
                writer.append(row)?;
            }
        }

        let rows = writer.finish()?;
        rows_after_dedup.insert(table.name(), rows);
        if rows > 0 {
            final_files.insert(
                table.name(),
                StagedFile { path, format: staged.format() },
            );
        } else {
            warn!(table = table.name(), "No records left after filtering");
            let _ = std::fs::remove_file(&path);
        }
    }

    surviving_caseids.sort();
    surviving_caseids.dedup();

    Ok(DedupOutcome { final_files, rows_after_dedup, surviving_caseids })
}

/// Per-table value transforms applied to surviving rows
fn transform_row(table: Table, row: &mut Row, date_policy: PartialDatePolicy) {
    match table {
        Table::Demo => {
            if date_policy == PartialDatePolicy::PadWith01 {
                if let Some(idx) = table.column_index("fda_dt") {
                    if let Some(Some(value)) = row.get_mut(idx).map(|v| v.as_mut()) {
                        if let Some(padded) = pad_partial_date(value) {
                            *value = padded;
                        }
                    }
                }
            }
        },
        Table::Drug => {
            if let Some(idx) = table.column_index("drugname") {
                if let Some(slot) = row.get_mut(idx) {
                    *slot = slot.as_deref().and_then(clean_drug_name);
                }
            }
        },
        _ => {},
    }
}

/// Pad compact partial dates: `2022` becomes `20220101`, `202203` becomes `20220301`
fn pad_partial_date(value: &str) -> Option<String> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match value.len() {
        4 => Some(format!("{}0101", value)),
        6 => Some(format!("{}01", value)),
        _ => None,
    }
}

/// Normalize a drug name: trim, drop literal NULL, strip special characters,
/// upper-case. Returns None when nothing is left.
fn clean_drug_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn column_index(headers: &[String], column: &str, chunk: &Path) -> Result<usize> {
    headers.iter().position(|h| h == column).ok_or_else(|| {
        FaersError::parse(
            chunk.display().to_string(),
            format!("staged chunk is missing required column '{}'", column),
        )
    })
}
