//! Unified error handling for the OpenFAN controller
//!
//! One error type shared by the core library and the daemon. Transport and
//! protocol failures are kept as distinct variants for logging, but callers
//! that fall back across endpoint variants treat them alike (see
//! [`OpenFanError::is_transient`]).

use std::io;
use std::path::PathBuf;

/// Result type alias using OpenFanError
pub type Result<T> = std::result::Result<T, OpenFanError>;

/// Unified error type for all OpenFAN operations
#[derive(thiserror::Error, Debug)]
pub enum OpenFanError {
    // ============================================================================
    // Device Transport Errors
    // ============================================================================
    #[error("HTTP {status} from {path}: {body}")]
    Http {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Request to {path} failed: {reason}")]
    Network {
        path: String,
        reason: String,
    },

    #[error("Request to {path} timed out")]
    Timeout {
        path: String,
    },

    // ============================================================================
    // Device Protocol Errors
    // ============================================================================
    #[error("Unexpected response from {path}: {reason}")]
    Protocol {
        path: String,
        reason: String,
    },

    #[error("Non-JSON response from {path}")]
    NonJson {
        path: String,
    },

    // ============================================================================
    // Coordinator Errors
    // ============================================================================
    #[error("Device update failed: {0}")]
    UpdateFailed(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Profile name '{0}' is reserved by a built-in profile")]
    BuiltinProfile(String),

    #[error("Unknown fan index: {0}")]
    UnknownFan(u8),

    #[error("Invalid calibration request: {reason}")]
    InvalidCalibration {
        reason: String,
    },

    // ============================================================================
    // Control Errors
    // ============================================================================
    #[error("Calibration already running for fan {0}")]
    CalibrationInProgress(u8),

    #[error("openfand is already running for this config (pid {0})")]
    AlreadyRunning(u32),

    // ============================================================================
    // I/O and Serialization Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl OpenFanError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error for a request path
    pub fn protocol(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for failures of a single device request (network, timeout,
    /// HTTP status or unrecognized body). These are the errors that
    /// endpoint fallback swallows before trying the next variant.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http { .. }
                | Self::Network { .. }
                | Self::Timeout { .. }
                | Self::Protocol { .. }
                | Self::NonJson { .. }
        )
    }
}

// Allow converting from String to OpenFanError
impl From<String> for OpenFanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to OpenFanError
impl From<&str> for OpenFanError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
