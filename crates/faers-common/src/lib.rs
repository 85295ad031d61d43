//! FAERS Loader Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the FAERS loader workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Error Handling**: The process-wide error taxonomy and result type
//! - **Checksums**: Streaming SHA-256 for archive integrity
//! - **Logging**: Centralized tracing initialization (text or JSON)
//! - **Quarter**: The `YYYYQn` release identifier

pub mod checksum;
pub mod error;
pub mod logging;
pub mod quarter;

// Re-export commonly used types
pub use error::{FaersError, Result};
pub use quarter::Quarter;
