//! Data models for the haystack relay.
//!
//! Two groups: the relay's own API (what callers send and receive) and the
//! upstream wire format (what the report network sends and receives).
//! Nothing here outlives a request.

use haystack_core::{Identifier, RawEntry, Report};
use serde::{Deserialize, Serialize};

// === API Request/Response Models ===

/// Fetch reports request
#[derive(Debug, Deserialize)]
pub struct FetchReportsRequest {
    /// Device identifiers (hashed advertisement keys, base64)
    pub ids: Vec<Identifier>,
    /// Fetch window in days (optional, 1..=7)
    #[serde(default)]
    pub days: Option<u32>,
}

/// Fetch reports response
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchReportsResponse {
    pub results: Vec<ReportRecord>,
    /// Entries dropped because their payload could not be decoded
    pub skipped: usize,
    /// Repeated deliveries of an identical payload, collapsed to one record
    pub duplicates: usize,
}

/// One decoded report in the fetch response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRecord {
    pub identifier: Identifier,
    /// Absolute Unix seconds
    pub timestamp: i64,
    /// Base64-encoded device data (encrypted location + key material)
    pub data: String,
    #[serde(rename = "datePublished")]
    pub date_published: i64,
}

impl From<Report> for ReportRecord {
    fn from(report: Report) -> Self {
        Self {
            identifier: report.identifier,
            timestamp: report.timestamp,
            data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &report.data),
            date_published: report.published_at,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

// === Upstream Wire Models ===

/// Batch fetch request sent upstream
#[derive(Debug, Serialize, Deserialize)]
pub struct UpstreamRequest {
    pub search: Vec<SearchQuery>,
}

/// A single search in the upstream batch
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Window start, Unix milliseconds
    pub start_date: i64,
    /// Window end, Unix milliseconds
    pub end_date: i64,
    pub ids: Vec<Identifier>,
}

/// Batch fetch response returned upstream
#[derive(Debug, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub results: Vec<UpstreamEntry>,
}

/// One entry in the upstream response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamEntry {
    /// Base64-encoded envelope
    pub payload: String,
    /// Identifier the entry belongs to
    pub id: Identifier,
    #[serde(default)]
    pub date_published: i64,
}

impl From<UpstreamEntry> for RawEntry {
    fn from(entry: UpstreamEntry) -> Self {
        Self {
            payload: entry.payload,
            source_id: entry.id,
            published_at: entry.date_published,
        }
    }
}
