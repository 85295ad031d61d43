//! `faers db init` and `faers db verify`

use faers_common::{FaersError, Result};
use faers_etl::{AppSettings, LoaderRegistry};
use tracing::info;

/// Create the FAERS tables and process-metadata tables if absent
pub async fn init(settings: &AppSettings) -> Result<()> {
    let registry = LoaderRegistry::builtin();
    let mut loader = registry.create(&settings.db)?;

    loader.connect().await.map_err(FaersError::from)?;
    info!("Initializing database schema");
    let result = loader.initialize_schema().await.map_err(FaersError::from);
    loader.close().await.map_err(FaersError::from)?;
    result?;

    println!("Database schema initialization complete.");
    Ok(())
}

/// Run the post-load data quality checks against the loaded state
pub async fn verify(settings: &AppSettings) -> Result<()> {
    let registry = LoaderRegistry::builtin();
    let mut loader = registry.create(&settings.db)?;

    loader.connect().await.map_err(FaersError::from)?;
    let report = loader.run_post_load_dq_checks().await.map_err(FaersError::from);
    loader.close().await.map_err(FaersError::from)?;
    let report = report?;

    if report.passed {
        println!("DQ check passed: {}", report.message);
        Ok(())
    } else {
        Err(FaersError::DataQuality(report.message))
    }
}
