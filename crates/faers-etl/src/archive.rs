//! FAERS release archive handling
//!
//! Releases are zip files. Member extensions distinguish the two source
//! formats: `.TXT` members are `$`-delimited ASCII tables, a `.XML` member is
//! an ICH E2B report stream. Structural validation reads every member to EOF
//! so the zip CRC32 of each entry is checked before any parsing begins.

use faers_common::{FaersError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// Source data format of a release archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Ascii,
    Xml,
}

/// An opened, structurally validated release archive
pub struct ReleaseArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl ReleaseArchive {
    /// Open an archive without validating member CRCs
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(file).map_err(|e| {
            FaersError::archive_corrupt(path.display().to_string(), e.to_string())
        })?;
        Ok(Self { path: path.to_path_buf(), archive })
    }

    /// Validate every member by decompressing it to EOF (checks CRC32)
    pub fn validate(&mut self) -> Result<()> {
        for index in 0..self.archive.len() {
            let mut entry = self.archive.by_index(index).map_err(|e| {
                FaersError::archive_corrupt(self.path.display().to_string(), e.to_string())
            })?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            std::io::copy(&mut entry, &mut std::io::sink()).map_err(|e| {
                FaersError::archive_corrupt(
                    self.path.display().to_string(),
                    format!("member '{}': {}", name, e),
                )
            })?;
        }
        debug!(path = %self.path.display(), members = self.archive.len(), "Archive validated");
        Ok(())
    }

    /// Member file names
    pub fn member_names(&self) -> Vec<String> {
        self.archive.file_names().map(|n| n.to_string()).collect()
    }

    /// Detect the source format from member extensions
    pub fn detect_format(&self) -> Result<ArchiveFormat> {
        let names = self.member_names();
        if names.iter().any(|n| n.to_lowercase().ends_with(".xml")) {
            Ok(ArchiveFormat::Xml)
        } else if names.iter().any(|n| n.to_lowercase().ends_with(".txt")) {
            Ok(ArchiveFormat::Ascii)
        } else {
            Err(FaersError::parse(
                self.path.display().to_string(),
                "archive contains neither .TXT nor .XML members".to_string(),
            ))
        }
    }

    /// Extract all file members into `dir`, flattening any internal paths.
    ///
    /// Returns the extracted file paths. FAERS archives are flat in practice;
    /// flattening guards against archives that nest tables one level deep.
    pub fn extract_to(&mut self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut extracted = Vec::new();

        for index in 0..self.archive.len() {
            let mut entry = self.archive.by_index(index).map_err(|e| {
                FaersError::archive_corrupt(self.path.display().to_string(), e.to_string())
            })?;
            if entry.is_dir() {
                continue;
            }
            let file_name = entry
                .name()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if file_name.is_empty() {
                continue;
            }
            let target = dir.join(&file_name);
            let mut out = File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
            extracted.push(target);
        }

        info!(path = %self.path.display(), count = extracted.len(), "Extracted archive members");
        Ok(extracted)
    }
}
