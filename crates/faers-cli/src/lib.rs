//! FAERS Loader CLI
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line interface over the FAERS ETL core:
//!
//! - **Schema**: create target tables (`faers db init`)
//! - **Verification**: post-load data quality checks (`faers db verify`)
//! - **Acquisition**: download archives without loading (`faers download`)
//! - **Loads**: run delta / partial / full loads (`faers run`)
//!
//! Exit codes: `0` success, `2` configuration error, `3` acquisition error,
//! `4` parse error, `5` load error, `6` integrity error.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use faers_common::Quarter;
use std::path::PathBuf;

/// FAERS Loader - ETL for FDA Adverse Event Reporting System releases
#[derive(Parser, Debug)]
#[command(name = "faers")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: faers.yaml, or FAERS_CONFIG_FILE)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Configuration profile to use (a named section of the config file)
    #[arg(short, long, global = true)]
    pub profile: Option<String>,
}

/// Requested load mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Load every quarter newer than the latest successful one
    Delta,
    /// Load only the quarters given with --quarter
    Partial,
    /// Load the whole advertised history
    Full,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Target database operations
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },

    /// Download archive(s) without loading them
    Download {
        /// Specific quarter to download (e.g. 2025Q1); latest if omitted
        #[arg(short, long)]
        quarter: Option<Quarter>,
    },

    /// Run the ETL process
    Run {
        /// Load mode
        #[arg(short, long, value_enum, default_value_t = RunMode::Delta)]
        mode: RunMode,

        /// Quarter(s) to load in partial mode; repeatable
        #[arg(short, long)]
        quarter: Vec<Quarter>,
    },
}

/// Database subcommands
#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Create the FAERS tables and process-metadata tables if absent
    Init,
    /// Run data quality checks against the loaded state
    Verify,
}
