//! AVI writer errors.

use thiserror::Error;

/// Errors from the AVI writer.
#[derive(Error, Debug)]
pub enum AviError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation invalid in the writer's current state.
    #[error("Invalid writer state: {0}")]
    InvalidState(String),

    /// Frame data does not match the stream layout.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Result type for AVI operations.
pub type Result<T> = std::result::Result<T, AviError>;
