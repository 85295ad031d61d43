//! Acquisition: discovery, fetch and integrity
//!
//! [`QuarterSource`] is the seam between the orchestration engine and the
//! outside world: it answers "which quarters exist upstream" and "give me a
//! validated archive for this quarter". [`FdaArchiveSource`] is the
//! production implementation (FDA index page + retrying HTTPS downloads);
//! tests substitute a local source over synthetic archives.

pub mod discovery;
pub mod fetcher;

use async_trait::async_trait;
use faers_common::{Quarter, Result};
use std::path::PathBuf;

use crate::config::DownloaderSettings;
use discovery::FdaIndex;
use fetcher::Fetcher;

/// A downloaded, integrity-validated release archive
#[derive(Debug, Clone)]
pub struct AcquiredArchive {
    pub quarter: Quarter,
    pub path: PathBuf,
    /// SHA-256 over the whole zip file
    pub sha256: String,
}

/// Upstream catalog + archive fetch, abstracted for testability
#[async_trait]
pub trait QuarterSource: Send + Sync {
    /// Quarters advertised upstream, sorted ascending
    async fn discover(&self) -> Result<Vec<Quarter>>;

    /// Download and validate the archive for one quarter
    async fn acquire(&self, quarter: Quarter) -> Result<AcquiredArchive>;
}

/// The production source: scrapes the FDA index and downloads release zips
pub struct FdaArchiveSource {
    index: FdaIndex,
    fetcher: Fetcher,
}

impl FdaArchiveSource {
    pub fn new(settings: &DownloaderSettings) -> Result<Self> {
        Ok(Self {
            index: FdaIndex::new(settings)?,
            fetcher: Fetcher::new(settings.clone())?,
        })
    }
}

#[async_trait]
impl QuarterSource for FdaArchiveSource {
    async fn discover(&self) -> Result<Vec<Quarter>> {
        let discovered = self.index.discover().await?;
        Ok(discovered.into_iter().map(|d| d.quarter).collect())
    }

    async fn acquire(&self, quarter: Quarter) -> Result<AcquiredArchive> {
        let url = discovery::download_url(quarter);
        self.fetcher.fetch(quarter, &url).await
    }
}
