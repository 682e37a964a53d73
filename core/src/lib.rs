//! Haystack Core - report decoding and aggregation for the haystack relay.
//!
//! This library provides the protocol logic of the relay:
//! - Report envelope codec (time offset header + opaque device data)
//! - Merging of per-identifier upstream bundles into one report sequence
//!
//! # Constraints
//!
//! This library intentionally does NOT:
//! - Access the network
//! - Perform file I/O
//! - Decrypt device data
//! - Log anything
//!
//! # Example
//!
//! ```
//! use haystack_core::{aggregate, Envelope, RawEntry};
//! use base64::Engine;
//! use std::collections::HashMap;
//!
//! let encode = |offset, data: &[u8]| {
//!     base64::engine::general_purpose::STANDARD.encode(Envelope::new(offset, data.to_vec()).encode())
//! };
//!
//! let mut bundles = HashMap::new();
//! bundles.insert("DeviceA".to_string(), vec![RawEntry {
//!     payload: encode(100, b"X"),
//!     source_id: "DeviceA".to_string(),
//!     published_at: 1_234_567_890,
//! }]);
//! bundles.insert("DeviceB".to_string(), vec![RawEntry {
//!     payload: encode(100, b"Y"),
//!     source_id: "DeviceB".to_string(),
//!     published_at: 1_234_567_890,
//! }]);
//!
//! let order = vec!["DeviceA".to_string(), "DeviceB".to_string()];
//! let result = aggregate(&order, &bundles);
//!
//! // Same second, different devices: both reports survive
//! assert_eq!(result.reports.len(), 2);
//! assert!(result.reports.iter().all(|r| r.timestamp == 978_307_300));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod envelope;
pub mod error;

pub use aggregate::{aggregate, decode_entry, Aggregation, Identifier, RawBundle, RawEntry, Report};
pub use envelope::{absolute_timestamp, Envelope, EPOCH_OFFSET, HEADER_SIZE};
pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
