//! Merging of per-identifier raw bundles into one report sequence.
//!
//! Every raw entry returned upstream becomes exactly one [`Report`] unless it
//! fails to decode (counted in `skipped`) or is a repeated delivery of an
//! entry already seen for the same identifier (counted in `duplicates`).
//! Repeats are recognised by identifier plus exact payload bytes. Reports are
//! never collapsed on timestamp: two devices publishing in the same second
//! both appear in the output.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use base64::Engine;
use std::collections::{HashMap, HashSet};

/// Opaque string naming a tracked device.
pub type Identifier = String;

/// One undecoded entry as returned by the upstream network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Base64-encoded envelope.
    pub payload: String,
    /// Identifier the upstream associated with this entry.
    pub source_id: Identifier,
    /// Transport-level publish time (not the envelope timestamp).
    pub published_at: i64,
}

/// All entries returned for one identifier, in upstream order.
pub type RawBundle = Vec<RawEntry>;

/// A decoded, identifier-tagged report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Identifier the report was fetched for.
    pub identifier: Identifier,
    /// Absolute Unix seconds decoded from the envelope.
    pub timestamp: i64,
    /// Opaque device data following the envelope header.
    pub data: Vec<u8>,
    /// Transport-level publish time carried over from the raw entry.
    pub published_at: i64,
}

/// Result of aggregating a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Reports in identifier request order, then upstream order.
    pub reports: Vec<Report>,
    /// Entries that failed to decode.
    pub skipped: usize,
    /// Entries dropped as repeated deliveries of an earlier entry.
    pub duplicates: usize,
}

impl Aggregation {
    /// Number of upstream entries accounted for.
    pub fn total_entries(&self) -> usize {
        self.reports.len() + self.skipped + self.duplicates
    }
}

/// Decode a single raw entry into a report for `identifier`.
///
/// # Errors
///
/// - `InvalidEncoding` if the payload is not base64
/// - `MalformedPayload` if the decoded envelope is too short
pub fn decode_entry(identifier: &str, entry: &RawEntry) -> Result<Report> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(entry.payload.as_bytes())
        .map_err(|_| Error::InvalidEncoding)?;
    let envelope = Envelope::decode(&bytes)?;

    Ok(Report {
        identifier: identifier.to_string(),
        timestamp: envelope.timestamp(),
        data: envelope.data,
        published_at: entry.published_at,
    })
}

/// Merge the bundles for every identifier in `order` into one sequence.
///
/// Identifiers in `order` without a bundle contribute nothing. Bundles for
/// identifiers not listed in `order` are ignored. A repeated identifier in
/// `order` is only processed once.
pub fn aggregate(order: &[Identifier], bundles: &HashMap<Identifier, RawBundle>) -> Aggregation {
    let mut aggregation = Aggregation::default();
    let mut visited: HashSet<&str> = HashSet::with_capacity(order.len());

    for identifier in order {
        if !visited.insert(identifier.as_str()) {
            continue;
        }
        let Some(bundle) = bundles.get(identifier) else {
            continue;
        };

        // Duplicate deliveries can only occur within one identifier's bundle.
        // (timestamp, data) is the full envelope, i.e. the exact payload bytes.
        let mut seen: HashSet<(i64, Vec<u8>)> = HashSet::with_capacity(bundle.len());

        for entry in bundle {
            match decode_entry(identifier, entry) {
                Ok(report) => {
                    if seen.insert((report.timestamp, report.data.clone())) {
                        aggregation.reports.push(report);
                    } else {
                        aggregation.duplicates += 1;
                    }
                }
                Err(_) => aggregation.skipped += 1,
            }
        }
    }

    aggregation
}
