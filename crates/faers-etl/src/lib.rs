//! FAERS ETL Core Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streaming ETL pipeline for the FDA Adverse Event Reporting System (FAERS)
//! quarterly public releases.
//!
//! # Architecture
//!
//! The pipeline is a straight-line dataflow wrapped by an orchestration
//! engine:
//!
//! - **Acquisition** ([`download`]): discovers quarters on the FDA index,
//!   downloads archives with a retrying HTTP session, and validates zip
//!   integrity before anything is parsed.
//! - **Parsing** ([`parser`]): `$`-delimited ASCII tables or streaming ICH
//!   E2B XML, projected into the seven FAERS tables plus the quarter's
//!   nullification set.
//! - **Staging** ([`staging`]): bounded-size chunk files per (quarter, table)
//!   in CSV or Parquet.
//! - **Deduplication** ([`dedup`]): the FDA case-version selection rule and
//!   the child-table cascade filter.
//! - **Loading** ([`loader`]): a narrow backend contract with a Postgres
//!   native-bulk (`COPY FROM STDIN`) reference implementation and a backend
//!   registry.
//! - **Orchestration** ([`engine`]): load modes (delta / partial / full),
//!   the per-quarter state machine and load-history metadata.

pub mod archive;
pub mod config;
pub mod dedup;
pub mod download;
pub mod engine;
pub mod loader;
pub mod metadata;
pub mod models;
pub mod parser;
pub mod staging;

pub use config::AppSettings;
pub use engine::{CancelToken, LoadMode, LoaderEngine};
pub use loader::{DatabaseLoader, LoaderRegistry};
