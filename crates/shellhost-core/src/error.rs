//! Error types for shellhost.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellHostError {
    /// The subprocess could not be launched. Fatal for the session.
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    /// Writing to the subprocess stdin failed. Escalates to cleanup.
    #[error("Stdin write failed: {0}")]
    WriteFailed(std::io::Error),

    #[error("Unsupported encoding label: {0}")]
    UnsupportedEncoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for shellhost operations.
pub type Result<T> = std::result::Result<T, ShellHostError>;
