//! Error types for the strdec library.
//!
//! Per-frame failures (unrecognized format, corruption, energy overflow) are
//! recoverable: callers log them and either skip the frame or substitute a
//! synthetic error frame. Stream-level failures (I/O, cancellation) abort.

use thiserror::Error;

/// Main error type for the strdec library.
#[derive(Error, Debug)]
pub enum Error {
    /// Bitstream-level errors (framing, truncation, identification).
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// Codec errors (decoding/encoding).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided; programmer error, non-recoverable.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format combination.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation was cancelled by the user.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Bitstream-level errors.
#[derive(Error, Debug)]
pub enum BitstreamError {
    /// The bitstream ended before the declared block geometry was read.
    #[error("Unexpected end of bitstream")]
    UnexpectedEnd,

    /// The frame header matches no known bitstream format.
    #[error("Unrecognized bitstream format")]
    UnrecognizedFormat,

    /// Generic bitstream error message.
    #[error("{0}")]
    Other(String),
}

/// Codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Valid header but semantically impossible data: bad VLC, DC out of
    /// range, overlong run. Carries the macroblock and sub-block (0..6)
    /// where decoding stopped.
    #[error("Corruption in macroblock {macroblock} block {block}: {detail}")]
    ReadCorruption {
        macroblock: usize,
        block: usize,
        detail: String,
    },

    /// The encoder cannot fit the frame into its byte budget at any qscale.
    #[error("Too much energy to compress: {0}")]
    TooMuchEnergy(String),

    /// Generic codec error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for CodecError {
    fn from(s: String) -> Self {
        CodecError::Other(s)
    }
}

impl From<&str> for CodecError {
    fn from(s: &str) -> Self {
        CodecError::Other(s.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Bitstream(BitstreamError::UnexpectedEnd))
    }

    /// Check if this error is contained to one frame (processing of the
    /// stream can continue).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Bitstream(BitstreamError::UnexpectedEnd)
                | Error::Bitstream(BitstreamError::UnrecognizedFormat)
                | Error::Codec(CodecError::ReadCorruption { .. })
                | Error::Codec(CodecError::TooMuchEnergy(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidParameter("bad width".into());
        assert_eq!(err.to_string(), "Invalid parameter: bad width");
    }

    #[test]
    fn test_corruption_carries_coordinates() {
        let err: Error = CodecError::ReadCorruption {
            macroblock: 12,
            block: 3,
            detail: "run past end of block".into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("macroblock 12"));
        assert!(msg.contains("block 3"));
    }

    #[test]
    fn test_is_eof() {
        assert!(Error::from(BitstreamError::UnexpectedEnd).is_eof());
        assert!(!Error::Cancelled.is_eof());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::from(BitstreamError::UnrecognizedFormat).is_recoverable());
        assert!(Error::from(CodecError::TooMuchEnergy("q63".into())).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::invalid_param("x").is_recoverable());
    }
}
