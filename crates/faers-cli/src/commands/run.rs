//! `faers run`

use faers_common::{FaersError, Quarter, Result};
use faers_etl::download::FdaArchiveSource;
use faers_etl::{AppSettings, LoadMode, LoaderEngine, LoaderRegistry};
use tracing::{info, warn};

use crate::RunMode;

/// Execute a load run in the requested mode
pub async fn run(settings: &AppSettings, mode: RunMode, quarters: Vec<Quarter>) -> Result<()> {
    let load_mode = match mode {
        RunMode::Partial => {
            if quarters.is_empty() {
                return Err(FaersError::config(
                    "Partial mode requires at least one --quarter".to_string(),
                    "Example: faers run --mode partial --quarter 2023Q1".to_string(),
                ));
            }
            LoadMode::Partial(quarters)
        },
        RunMode::Delta | RunMode::Full => {
            if !quarters.is_empty() {
                return Err(FaersError::config(
                    format!("--quarter is not valid in {:?} mode", mode),
                    "Use --mode partial to load explicit quarters".to_string(),
                ));
            }
            match mode {
                RunMode::Delta => LoadMode::Delta,
                _ => LoadMode::Full,
            }
        },
    };

    let registry = LoaderRegistry::builtin();
    let mut loader = registry.create(&settings.db)?;
    loader.connect().await.map_err(FaersError::from)?;
    loader.initialize_schema().await.map_err(FaersError::from)?;

    let source = FdaArchiveSource::new(&settings.downloader)?;
    let mut engine = LoaderEngine::new(settings.clone(), source, loader);

    // Ctrl-C aborts at the next stage boundary; the active transaction is
    // rolled back and the quarter is recorded FAILED with reason CANCELLED.
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancel requested, aborting at the next stage boundary");
            cancel.cancel();
        }
    });

    let summary = engine.run(load_mode).await?;

    if summary.quarters.is_empty() {
        println!("ETL process finished with no new data to load.");
    } else {
        for quarter in &summary.quarters {
            info!(
                quarter = %quarter.quarter,
                load_id = %quarter.load_id,
                rows_deleted = quarter.rows_deleted,
                "Quarter loaded"
            );
        }
        let last = &summary.quarters[summary.quarters.len() - 1];
        println!(
            "ETL process completed: {} quarter(s) loaded. {}",
            summary.quarters.len(),
            last.dq_message
        );
    }
    Ok(())
}
