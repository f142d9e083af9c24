//! Image writer errors.

use thiserror::Error;

/// Errors from the image encoders.
#[derive(Error, Debug)]
pub enum ImageError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dimensions or buffer sizes disagree.
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ImageError>;
