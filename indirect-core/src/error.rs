//! Error types for resolution operations

use crate::{ArtifactKind, Operation, UnreachableReason};
use thiserror::Error;

/// Request and artifact validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid environment {name:?}: {reason}")]
    InvalidEnvironment { name: String, reason: String },

    #[error("Invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Unknown artifact kind: {name}")]
    UnknownKind { name: String },

    #[error("Artifact {found} does not match request for {expected}")]
    KeyMismatch { expected: String, found: String },

    #[error("Request rejected by {backend} with status {status}: {body}")]
    Rejected {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("Correlation token already stamped as {existing}, refusing {attempted}")]
    TokenAlreadyStamped { existing: String, attempted: String },

    #[error("Version already pinned to {existing}, refusing {attempted}")]
    VersionAlreadyPinned { existing: String, attempted: String },
}

/// Wire and storage encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode {format}: {reason}")]
    Encode { format: String, reason: String },

    #[error("Failed to decode {format}: {reason}")]
    Decode { format: String, reason: String },

    #[error("Unsupported content type: {content_type}")]
    UnsupportedContentType { content_type: String },

    #[error("Response from {backend} carried no content type")]
    MissingContentType { backend: String },
}

/// Storage medium errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O failure in {backend}: {reason}")]
    Io { backend: String, reason: String },

    #[error("Database failure in {backend}: {reason}")]
    Database { backend: String, reason: String },

    #[error("Corrupt entry {key:?} in {backend}: {reason}")]
    Corrupt {
        backend: String,
        key: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Cache writer for {cache} has stopped")]
    WriterStopped { cache: String },
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

    #[error("Unknown backend: {name}")]
    UnknownBackend { name: String },

    #[error("Backend {name} is already registered")]
    DuplicateBackend { name: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndirectError {
    #[error("{kind} {key:?} not found")]
    NotFound { kind: ArtifactKind, key: String },

    #[error("Backend {backend} unreachable: {reason}")]
    Unreachable {
        backend: String,
        reason: UnreachableReason,
    },

    #[error("Backend {backend} does not support {operation}")]
    UnsupportedOperation {
        backend: String,
        operation: Operation,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parent cycle detected: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Parent {name:?} of {child:?} not found")]
    ParentNotFound { name: String, child: String },

    #[error("Consistency mismatch: expected token {expected}, found {found:?}")]
    ConsistencyMismatch {
        expected: String,
        found: Option<String>,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl IndirectError {
    pub fn unreachable(backend: impl Into<String>, reason: UnreachableReason) -> Self {
        IndirectError::Unreachable {
            backend: backend.into(),
            reason,
        }
    }

    pub fn unsupported(backend: impl Into<String>, operation: Operation) -> Self {
        IndirectError::UnsupportedOperation {
            backend: backend.into(),
            operation,
        }
    }

    /// Only unreachable failures may be answered from a cache.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, IndirectError::Unreachable { .. })
    }

    /// Errors that no fallback can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndirectError::Validation(_)
                | IndirectError::UnsupportedOperation { .. }
                | IndirectError::Cycle { .. }
                | IndirectError::ParentNotFound { .. }
                | IndirectError::Config(_)
        )
    }
}

/// Result type alias for resolution operations.
pub type IndirectResult<T> = Result<T, IndirectError>;

// =============================================================================
// TESTS
// =============================================================================
