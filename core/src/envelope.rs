//! Report envelope encoding and decoding.
//!
//! Envelope format:
//! ```text
//! +------------------+--------------------------------------+
//! |   Time Offset    |   Device Data                        |
//! |   (4 bytes BE)   |   (opaque, 0..N bytes)               |
//! +------------------+--------------------------------------+
//! ```
//!
//! The time offset counts seconds since the upstream network's reference
//! epoch (2001-01-01T00:00:00Z). The device data carries the encrypted
//! location and ephemeral key material and is never interpreted here.

use crate::error::{Error, Result};

/// Seconds between the Unix epoch and the reference epoch (2001-01-01).
pub const EPOCH_OFFSET: i64 = 978_307_200;

/// Header size: time offset (4) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// A decoded report payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Seconds since the reference epoch.
    pub time_offset: u32,
    /// Opaque device-specific bytes following the header.
    pub data: Vec<u8>,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(time_offset: u32, data: Vec<u8>) -> Self {
        Self { time_offset, data }
    }

    /// Encode envelope to bytes.
    ///
    /// Format: [time_offset: u32 BE][data]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len());
        bytes.extend_from_slice(&self.time_offset.to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Decode envelope from bytes.
    ///
    /// # Errors
    ///
    /// - `MalformedPayload` if shorter than the 4-byte header
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedPayload {
                size: bytes.len(),
                minimum: HEADER_SIZE,
            });
        }

        let (header, data) = bytes.split_at(HEADER_SIZE);
        let time_offset = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

        Ok(Self {
            time_offset,
            data: data.to_vec(),
        })
    }

    /// Absolute report time in Unix seconds.
    pub fn timestamp(&self) -> i64 {
        absolute_timestamp(self.time_offset)
    }
}

/// Convert a reference-epoch offset to Unix seconds.
#[inline]
pub fn absolute_timestamp(offset: u32) -> i64 {
    i64::from(offset) + EPOCH_OFFSET
}
