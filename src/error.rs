//! Error types for the Array Provisioner
//!
//! Provides structured error types for all provisioner components including
//! configuration, backend registry, precondition resolution and the volume
//! sagas.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Backend not found: {backend}")]
    BackendNotFound { backend: String },

    #[error("Storage pool {pool} doesn't exist on backend {backend}")]
    PoolNotFound { backend: String, pool: String },

    #[error("Clone source volume {volume} does not exist")]
    SourceNotFound { volume: String },

    #[error("Volume not found: {volume}")]
    VolumeNotFound { volume: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Must specify storage pool to create volume")]
    MissingPool,

    #[error("Unrecognized volume parameter: {key}")]
    UnknownParameter { key: String },

    #[error("Invalid clone speed {value}: must be an integer between 1 and 4")]
    InvalidCloneSpeed { value: String },

    #[error("Invalid QoS {qos}: {reason}")]
    InvalidQos { qos: String, reason: String },

    #[error("Insufficient capacity: requested {requested} bytes, source volume has {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    #[error("Invalid volume handle: {0}")]
    InvalidHandle(String),

    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unreachable: {backend} - {reason}")]
    BackendUnreachable { backend: String, reason: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("Create snapshot {snapshot} failed: {reason}")]
    SnapshotCreateFailed { snapshot: String, reason: String },

    #[error("Wait timeout after {0:?}")]
    WaitTimeout(Duration),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error, used by callers to decide how to
/// surface it (HTTP status, fatal at startup, logged only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fatal, startup only: zero backends, malformed config
    Config,
    /// Pool, volume, snapshot or backend absent
    NotFound,
    /// Bad request parameters; no array call was attempted
    Validation,
    /// The array client failed or could not be reached
    BackendUnreachable,
    /// A saga step failed after earlier steps succeeded
    PartialFailure,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) | Error::JsonParse(_) | Error::YamlParse(_) => {
                ErrorCategory::Config
            }

            Error::BackendNotFound { .. }
            | Error::PoolNotFound { .. }
            | Error::SourceNotFound { .. }
            | Error::VolumeNotFound { .. } => ErrorCategory::NotFound,

            Error::MissingPool
            | Error::UnknownParameter { .. }
            | Error::InvalidCloneSpeed { .. }
            | Error::InvalidQos { .. }
            | Error::InsufficientCapacity { .. }
            | Error::InvalidHandle(_)
            | Error::ApiValidation(_) => ErrorCategory::Validation,

            Error::BackendUnreachable { .. }
            | Error::BackendOperationFailed { .. }
            | Error::WaitTimeout(_) => ErrorCategory::BackendUnreachable,

            Error::SnapshotCreateFailed { .. } => ErrorCategory::PartialFailure,

            Error::Internal(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Config | ErrorCategory::Validation
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BackendUnreachable { .. } | Error::WaitTimeout(_)
        )
    }

    /// Wrap an array client failure for `backend`
    pub fn backend_op(
        backend: impl Into<String>,
        operation: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::BackendOperationFailed {
            backend: backend.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
