//! Error types for the FAERS loader
//!
//! This module provides user-facing error types with actionable messages.
//! The variants follow the pipeline's failure taxonomy: configuration
//! problems abort before side effects, acquisition and parse problems fail
//! the quarter being processed, and load/data-quality problems roll back the
//! quarter's transaction.

use thiserror::Error;

/// Result type alias for FAERS loader operations
pub type Result<T> = std::result::Result<T, FaersError>;

/// Main error type for the FAERS loader
#[derive(Error, Debug)]
pub enum FaersError {
    /// File system operations failed (read, write, create directory, etc.)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}. {suggestion}")]
    Config { message: String, suggestion: String },

    /// Upstream catalog or archive could not be fetched
    #[error("Acquisition of '{subject}' failed: {reason}")]
    Acquisition { subject: String, reason: String },

    /// Downloaded archive failed structural (CRC) validation
    #[error("Archive '{path}' is corrupt: {reason}")]
    ArchiveCorrupt { path: String, reason: String },

    /// Unrecoverable structural failure while parsing source data
    #[error("Failed to parse {subject}: {reason}")]
    Parse { subject: String, reason: String },

    /// Target database operation failed
    #[error("Load operation failed: {operation} - {reason}")]
    Load { operation: String, reason: String },

    /// Post-load data quality check failed
    #[error("Data quality check failed: {0}")]
    DataQuality(String),

    /// An external cancel request aborted the load
    #[error("Load cancelled")]
    Cancelled,
}

impl FaersError {
    /// Create a configuration error with a suggestion
    pub fn config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an acquisition error
    pub fn acquisition(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Acquisition {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create an archive-corruption error
    pub fn archive_corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ArchiveCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error
    pub fn parse(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a load error
    pub fn load(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error class.
    ///
    /// `0` success, `2` configuration, `3` acquisition, `4` parse, `5` load,
    /// `6` integrity.
    pub fn exit_code(&self) -> i32 {
        match self {
            FaersError::Config { .. } => 2,
            FaersError::Acquisition { .. } => 3,
            FaersError::Parse { .. } => 4,
            FaersError::Load { .. } | FaersError::DataQuality(_) | FaersError::Cancelled => 5,
            FaersError::ArchiveCorrupt { .. } => 6,
            FaersError::Io(_) => 5,
        }
    }

    /// Short machine-readable reason stored in the load history `error` column.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FaersError::Config { .. } => "CONFIG",
            FaersError::Acquisition { .. } => "ACQUISITION",
            FaersError::ArchiveCorrupt { .. } => "ARCHIVE_CORRUPT",
            FaersError::Parse { .. } => "PARSE",
            FaersError::Load { .. } => "LOAD",
            FaersError::DataQuality(_) => "DQ_FAIL",
            FaersError::Cancelled => "CANCELLED",
            FaersError::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(FaersError::config("missing db.host", "set FAERS_DB__HOST").exit_code(), 2);
        assert_eq!(FaersError::acquisition("2023Q1", "connect timeout").exit_code(), 3);
        assert_eq!(FaersError::parse("DEMO23Q1.TXT", "no header").exit_code(), 4);
        assert_eq!(FaersError::load("COPY", "constraint violated").exit_code(), 5);
        assert_eq!(FaersError::archive_corrupt("a.zip", "bad CRC").exit_code(), 6);
        assert_eq!(FaersError::Cancelled.exit_code(), 5);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(FaersError::Cancelled.reason_code(), "CANCELLED");
        assert_eq!(
            FaersError::archive_corrupt("a.zip", "bad CRC").reason_code(),
            "ARCHIVE_CORRUPT"
        );
    }
}
