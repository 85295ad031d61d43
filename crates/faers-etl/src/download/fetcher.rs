//! Archive fetcher
//!
//! Downloads release zips with a retrying HTTPS session: exponential backoff
//! on connect/read errors and on upstream {500, 502, 503, 504} responses.
//! The body streams into a `.part` file that is atomically renamed into
//! place on completion, so a partially written file from a crashed run is
//! never mistaken for a finished archive. Before an archive is handed to the
//! pipeline every zip member is CRC-validated and the file's SHA-256 is
//! computed for the load history.

use faers_common::{checksum, FaersError, Quarter, Result};
use reqwest::{Client, StatusCode};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::AcquiredArchive;
use crate::archive::ReleaseArchive;
use crate::config::DownloaderSettings;

/// Statuses worth retrying; everything else non-success fails immediately
const RETRYABLE_STATUS: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Backoff before retry `attempt` (1-based): `factor * 2^(attempt-1)` seconds
fn backoff_delay(factor: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(factor.max(0.0) * f64::from(1u32 << (attempt - 1).min(16)))
}

enum DownloadFailure {
    Retryable(String),
    Fatal(String),
}

pub struct Fetcher {
    client: Client,
    settings: DownloaderSettings,
}

impl Fetcher {
    pub fn new(settings: DownloaderSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent("faers-loader/0.1")
            .build()
            .map_err(|e| FaersError::acquisition("http client", e.to_string()))?;
        Ok(Self { client, settings })
    }

    /// Download, validate and seal the archive for one quarter
    pub async fn fetch(&self, quarter: Quarter, url: &str) -> Result<AcquiredArchive> {
        std::fs::create_dir_all(&self.settings.download_dir)?;

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("faers_ascii_{}.zip", quarter.to_url_fragment()));
        let final_path = self.settings.download_dir.join(&file_name);
        let part_path = self.settings.download_dir.join(format!("{}.part", file_name));

        info!(quarter = %quarter, url, "Downloading FAERS archive");
        self.download_with_retry(url, &part_path).await?;
        std::fs::rename(&part_path, &final_path)?;

        info!(path = %final_path.display(), "Verifying archive integrity");
        let mut archive = ReleaseArchive::open(&final_path)?;
        archive.validate()?;

        let sha256 = checksum::sha256_file(&final_path)?;
        info!(quarter = %quarter, sha256 = %sha256, "Archive sealed");

        Ok(AcquiredArchive { quarter, path: final_path, sha256 })
    }

    async fn download_with_retry(&self, url: &str, dest: &Path) -> Result<()> {
        let attempts = self.settings.retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.download_once(url, dest).await {
                Ok(()) => return Ok(()),
                Err(DownloadFailure::Fatal(reason)) => {
                    return Err(FaersError::acquisition(url, reason));
                },
                Err(DownloadFailure::Retryable(reason)) => {
                    warn!(url, attempt, max = attempts, reason = %reason, "Download attempt failed");
                    last_error = reason;
                    if attempt < attempts {
                        let delay = backoff_delay(self.settings.backoff_factor, attempt);
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(FaersError::acquisition(
            url,
            format!("failed after {} attempts: {}", attempts, last_error),
        ))
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<(), DownloadFailure> {
        // A leftover .part file from an interrupted run is treated as absent
        let _ = std::fs::remove_file(dest);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadFailure::Retryable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP status {}", status);
            return if RETRYABLE_STATUS.contains(&status) {
                Err(DownloadFailure::Retryable(reason))
            } else {
                Err(DownloadFailure::Fatal(reason))
            };
        }

        let mut file = std::fs::File::create(dest)
            .map_err(|e| DownloadFailure::Fatal(e.to_string()))?;
        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    file.write_all(&bytes)
                        .map_err(|e| DownloadFailure::Fatal(e.to_string()))?;
                },
                Ok(None) => break,
                // Read error mid-body: the partial file is discarded on retry
                Err(e) => return Err(DownloadFailure::Retryable(e.to_string())),
            }
        }
        file.flush().map_err(|e| DownloadFailure::Fatal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0.3, 1), Duration::from_secs_f64(0.3));
        assert_eq!(backoff_delay(0.3, 2), Duration::from_secs_f64(0.6));
        assert_eq!(backoff_delay(0.3, 3), Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_backoff_negative_factor_clamps_to_zero() {
        assert_eq!(backoff_delay(-1.0, 3), Duration::ZERO);
    }

    #[test]
    fn test_retryable_status_set() {
        assert!(RETRYABLE_STATUS.contains(&StatusCode::SERVICE_UNAVAILABLE));
        assert!(!RETRYABLE_STATUS.contains(&StatusCode::NOT_FOUND));
    }
}
