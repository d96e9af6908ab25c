//! Error types for rota-core

use thiserror::Error;

/// Result type alias using rota-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rota-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot file exists but could not be parsed
    #[error("Parse error in {filename}: {message}")]
    Parse { filename: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot not found
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Row not found in the working copy
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// A merge was applied before every conflict had a resolution
    #[error("Incomplete resolution: {0} conflicts still unresolved")]
    IncompleteResolution(usize),

    /// The base snapshot moved between conflict detection and apply
    #[error("Stale base: expected latest snapshot {expected}, found {found}")]
    StaleBase { expected: String, found: String },

    /// Resolution referenced a conflict key that was not detected
    #[error("Unknown conflict: {0}")]
    UnknownConflict(String),

    /// Resolution is not valid for the conflict it targets
    #[error("Invalid resolution for {key}: {message}")]
    InvalidResolution { key: String, message: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Build a `Parse` error for a specific snapshot file.
    pub fn parse(filename: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            filename: filename.into(),
            message: message.to_string(),
        }
    }
}
