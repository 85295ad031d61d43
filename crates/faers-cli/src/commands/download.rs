//! `faers download`

use faers_common::{FaersError, Quarter, Result};
use faers_etl::download::{FdaArchiveSource, QuarterSource};
use faers_etl::AppSettings;
use tracing::info;

/// Acquire one archive; the latest advertised quarter when none is given
pub async fn run(settings: &AppSettings, quarter: Option<Quarter>) -> Result<()> {
    let source = FdaArchiveSource::new(&settings.downloader)?;

    let target = match quarter {
        Some(q) => q,
        None => {
            info!("No quarter specified, discovering the latest");
            source
                .discover()
                .await?
                .into_iter()
                .last()
                .ok_or_else(|| {
                    FaersError::acquisition(
                        "FDA index",
                        "no quarters advertised upstream".to_string(),
                    )
                })?
        },
    };

    let acquired = source.acquire(target).await?;
    println!(
        "Downloaded {} to {} (sha256 {})",
        acquired.quarter,
        acquired.path.display(),
        acquired.sha256
    );
    Ok(())
}
