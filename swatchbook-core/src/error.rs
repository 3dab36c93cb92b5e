//! Error types for SWATCHBOOK operations

use thiserror::Error;

/// Cache tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Pipeline stage errors.
///
/// These never cross the manager boundary; a failing stage simply emits
/// nothing for the key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("No opaque pixels to quantize")]
    EmptySwatch,

    #[error("Stage {stage} failed for {key}: {reason}")]
    StageFailed {
        stage: String,
        key: String,
        reason: String,
    },

    #[error("Pipeline {stage} is closed")]
    Closed { stage: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Telemetry initialization failed: {reason}")]
    TelemetryInit { reason: String },
}

/// Master error type for all SWATCHBOOK errors.
#[derive(Debug, Clone, Error)]
pub enum SwatchbookError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for SWATCHBOOK operations.
pub type SwatchbookResult<T> = Result<T, SwatchbookError>;

// =============================================================================
// TESTS
// =============================================================================
