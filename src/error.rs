//! Error types for the buffer and codec core

use std::fmt;

/// Result type alias for buffer and codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types raised by the buffer system and the compression codec
#[derive(Debug)]
pub enum Error {
    /// Operation on a buffer whose reference count already reached zero
    IllegalReferenceCount(i32),
    /// Reader/writer/absolute index outside the valid range
    IndexOutOfRange(String),
    /// Growth would surpass the buffer's maximum capacity
    CapacityExceeded {
        /// Capacity the operation needed
        requested: usize,
        /// Hard upper bound of the buffer
        max: usize,
    },
    /// Malformed input data (truncated text, non-contiguous window)
    InvalidData(&'static str),
    /// Codec violation: unexpected frame type, empty mid-message frame,
    /// failure to produce compressed output
    Codec(&'static str),
    /// Protocol violation on the frame stream
    Protocol(&'static str),
    /// Decompressed message exceeds the configured bound
    MessageTooLarge,
    /// Compression/decompression error from the underlying stream
    Compression(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IllegalReferenceCount(count) => {
                write!(f, "Illegal reference count: {}", count)
            }
            Error::IndexOutOfRange(msg) => write!(f, "Index out of range: {}", msg),
            Error::CapacityExceeded { requested, max } => {
                write!(f, "Capacity exceeded: requested {} > max {}", requested, max)
            }
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::Codec(msg) => write!(f, "Codec error: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::Compression(msg) => write!(f, "Compression error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn index(msg: impl Into<String>) -> Self {
        Error::IndexOutOfRange(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::IllegalReferenceCount(0);
        assert_eq!(e.to_string(), "Illegal reference count: 0");

        let e = Error::CapacityExceeded {
            requested: 512,
            max: 256,
        };
        assert!(e.to_string().contains("512"));
        assert!(e.to_string().contains("256"));
    }
}
