//! Error types for haystack-core.
//!
//! Decode faults are per-entry: the aggregator recovers from them by
//! skipping the entry, so none of these ever abort a batch.

use std::error::Error as StdError;
use std::fmt;

/// Result type alias for haystack-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding a single report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Payload is shorter than the fixed envelope header.
    MalformedPayload {
        /// Actual payload size in bytes.
        size: usize,
        /// Minimum required size.
        minimum: usize,
    },

    /// Payload is not valid base64 as transmitted by the upstream network.
    InvalidEncoding,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedPayload { size, minimum } => {
                write!(
                    f,
                    "malformed payload: {} bytes, minimum is {}",
                    size, minimum
                )
            }
            Error::InvalidEncoding => write!(f, "payload is not valid base64"),
        }
    }
}

impl StdError for Error {}
