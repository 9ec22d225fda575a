//! Unified error types for the cardinality limiter.
//!
//! Error codes:
//! - QUOTA_001-003: Quota backend errors
//! - CONFIG_001-002: Configuration errors
//!
//! The limiter itself never surfaces these for expected operational
//! conditions (quota exhaustion, backend outages). They flow between the
//! backend, the options layer, and the caller-side worker stage.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Quota backend error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    /// QUOTA_001: Backend unreachable or returned an error
    Unavailable,
    /// QUOTA_002: Backend did not answer within the configured timeout
    Timeout,
    /// QUOTA_003: Committing usage failed
    CommitFailed,
}

impl BackendErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable => "QUOTA_001",
            Self::Timeout => "QUOTA_002",
            Self::CommitFailed => "QUOTA_003",
        }
    }
}

/// Configuration error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorCode {
    /// CONFIG_001: Quota rule fails validation
    InvalidQuota,
    /// CONFIG_002: Rollout rate outside [0, 1] or not a number
    InvalidRolloutRate,
}

impl ConfigErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuota => "CONFIG_001",
            Self::InvalidRolloutRate => "CONFIG_002",
        }
    }
}

/// Unified error type for the cardinality limiter.
#[derive(Debug, Error)]
pub enum Error {
    /// Quota backend error with code.
    #[error("[{code}] {message}")]
    Backend {
        code: &'static str,
        message: String,
    },

    /// Configuration error with code.
    #[error("[{code}] {message}")]
    Config {
        code: &'static str,
        message: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Create a quota backend error.
    pub fn backend(code: BackendErrorCode, msg: impl Into<String>) -> Self {
        Self::Backend {
            code: code.code(),
            message: msg.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(code: ConfigErrorCode, msg: impl Into<String>) -> Self {
        Self::Config {
            code: code.code(),
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Backend { code, .. } => Some(*code),
            Self::Config { code, .. } => Some(*code),
            _ => None,
        }
    }
}
