//! Error types for chainlens operations

use crate::Identifier;
use thiserror::Error;

/// Keyed cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Unsupported cache operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Scheduling errors for queued operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Operation {operation} aborted before completion")]
    Aborted { operation: String },

    #[error("No async runtime available for {operation}")]
    RuntimeUnavailable { operation: String },
}

/// Failures reported by the raw storage-change transport.
///
/// A stream error is sticky on a subscription source: every read returns
/// it until the next successful raw update arrives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Change stream for {identifier} failed: {reason}")]
    TransportFailed { identifier: Identifier, reason: String },

    #[error("Subscription to {identifier} rejected: {reason}")]
    SubscribeFailed { identifier: Identifier, reason: String },
}

/// Failures obtaining a codec factory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Codec factory unavailable: {reason}")]
    FactoryUnavailable { reason: String },

    #[error("Codec factory version {version} does not know coding path {path}")]
    UnknownCodingPath { path: String, version: u32 },
}

/// Failures turning raw bytes into a typed value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Bytes do not match shape at {path}: {reason}")]
    ShapeMismatch { path: String, reason: String },

    #[error("Decoded value for {identifier} is not a {type_name}: {reason}")]
    TypeMismatch {
        identifier: Identifier,
        type_name: &'static str,
        reason: String,
    },
}

/// Failures from single-value snapshot sources (polling feeds).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Snapshot fetch for {identifier} failed: {reason}")]
    SourceFailed { identifier: Identifier, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all chainlens errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainlensError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ChainlensError {
    /// Whether the next read may succeed without any new raw event.
    ///
    /// Codec and decode failures are recomputed on every read; stream
    /// failures stay until the transport delivers a new value.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::Decode(_) | Self::Fetch(_) | Self::Operation(_)
        )
    }

    /// Whether this error means the operation was cancelled before it ran.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Operation(OperationError::Cancelled { .. }))
    }
}

/// Result type alias for chainlens operations.
pub type ChainlensResult<T> = Result<T, ChainlensError>;

// =============================================================================
// TESTS
// =============================================================================
