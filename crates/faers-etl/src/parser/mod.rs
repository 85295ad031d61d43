//! FAERS source parsers
//!
//! Two upstream formats exist: `$`-delimited ASCII tables (one file per
//! table, plus a deletion list) and ICH E2B XML (one stream of
//! `<safetyreport>` elements). Both are parsed streaming into the staging
//! writer; neither holds more than one report or one line in memory at a
//! time beyond the staging buffers.
//!
//! Row-level problems (malformed lines, reports missing their identifiers)
//! are logged and counted, never fatal. Structural problems (unreadable
//! member, broken XML) fail the quarter.

pub mod ascii;
pub mod xml;

use crate::archive::{ArchiveFormat, ReleaseArchive};
use crate::staging::{StagedTables, StagingWriter};
use faers_common::{FaersError, Result};
use std::collections::HashSet;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Result of parsing one quarter's archive
pub struct ParseOutcome {
    pub staged: StagedTables,
    /// CASEIDs marked for deletion in this quarter
    pub nullified_caseids: HashSet<String>,
    /// Row-level records skipped as malformed
    pub skipped_rows: u64,
}

/// Parse a validated archive into staged chunks plus the nullification set.
///
/// Members are extracted into `scratch_dir` first; parsing then streams from
/// file handles, so the working set stays bounded for multi-GB members.
pub fn parse_archive(
    archive: &mut ReleaseArchive,
    scratch_dir: &Path,
    mut writer: StagingWriter,
) -> Result<ParseOutcome> {
    match archive.detect_format()? {
        ArchiveFormat::Ascii => {
            info!("Detected ASCII format");
            let extract_dir = scratch_dir.join("ascii");
            archive.extract_to(&extract_dir)?;
            let outcome = ascii::parse_quarter_dir(&extract_dir, &mut writer)?;
            Ok(ParseOutcome {
                staged: writer.finish()?,
                nullified_caseids: outcome.nullified_caseids,
                skipped_rows: outcome.skipped_rows,
            })
        },
        ArchiveFormat::Xml => {
            info!("Detected XML format");
            // Spool the member to disk so parsing streams from a file handle
            // instead of holding a multi-GB document in memory.
            let extract_dir = scratch_dir.join("xml");
            let extracted = archive.extract_to(&extract_dir)?;
            let xml_path = extracted
                .iter()
                .find(|p| {
                    p.extension()
                        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("xml"))
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    FaersError::parse("archive".to_string(), "no XML member found".to_string())
                })?;
            let file = std::fs::File::open(xml_path)?;
            let outcome = xml::parse_xml_stream(BufReader::new(file), &mut writer)?;
            Ok(ParseOutcome {
                staged: writer.finish()?,
                nullified_caseids: outcome.nullified_caseids,
                skipped_rows: outcome.skipped_reports,
            })
        },
    }
}
