use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadScoreRange(String),
    BadImageBounds(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadScoreRange(e) => write!(f, "Score range error: {}", e),
            ConfigError::BadImageBounds(e) => write!(f, "Image bounds error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors surfaced by metadata store operations.
///
/// Every operation either fully applies or has no effect; any of these
/// errors means the transaction was rolled back.
///
/// - `Validation`: malformed or missing input, a caller bug — do not retry.
/// - `NotFound`: a referenced row is absent — resolve the reference first.
/// - `Conflict`: uniqueness violation (`labels.name`, `models.version`) —
///   treat as "already exists" and look the row up.
/// - `InvalidTransition`: illegal training-job status change.
/// - `Transient`: backend lock contention — safe to retry with backoff.
#[derive(Debug)]
pub enum StoreError {
    ConnectionFailed(String),
    Validation(String),
    NotFound(String),
    Conflict(String),
    InvalidTransition(String),
    Transient(String),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(e) => write!(f, "Store connection failed: {}", e),
            StoreError::Validation(e) => write!(f, "Validation error: {}", e),
            StoreError::NotFound(e) => write!(f, "Not found: {}", e),
            StoreError::Conflict(e) => write!(f, "Conflict: {}", e),
            StoreError::InvalidTransition(e) => write!(f, "Invalid transition: {}", e),
            StoreError::Transient(e) => write!(f, "Transient storage error: {}", e),
            StoreError::Backend(e) => write!(f, "Storage backend error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}
