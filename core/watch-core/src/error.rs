//! Error types for watch-core operations.

use std::path::PathBuf;

/// All errors that can occur in watch-core operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using WatchError.
pub type Result<T> = std::result::Result<T, WatchError>;

// Conversion for string error compatibility with the daemon crates.
impl From<WatchError> for String {
    fn from(err: WatchError) -> String {
        err.to_string()
    }
}
