//! Upstream report network client.
//!
//! One batch call per relay request: every requested identifier goes out in
//! a single search, and the flat list of entries that comes back is split
//! into one bundle per identifier. No retries, no caching - the caller
//! decides what to do on failure.

use crate::credentials::Credential;
use crate::models::{SearchQuery, UpstreamRequest, UpstreamResponse};
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use haystack_core::{Envelope, Identifier, RawBundle, RawEntry};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Time range passed to the upstream search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window covering the last `days` days up to `now`
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - ChronoDuration::days(i64::from(days)),
            end: now,
        }
    }
}

/// Upstream client
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
}

impl UpstreamClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Unavailable(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Fetch raw bundles for `ids` in one upstream call.
    ///
    /// `ids` must already be deduplicated. The result has an entry for every
    /// requested identifier; identifiers without reports map to an empty
    /// bundle. Entries for identifiers that were not requested are dropped.
    pub async fn fetch(
        &self,
        ids: &[Identifier],
        credential: &Credential,
        window: FetchWindow,
    ) -> Result<HashMap<Identifier, RawBundle>, UpstreamError> {
        let body = UpstreamRequest {
            search: vec![SearchQuery {
                start_date: window.start.timestamp_millis(),
                end_date: window.end.timestamp_millis(),
                ids: ids.to_vec(),
            }],
        };

        let mut request = self
            .client
            .post(&self.url)
            .basic_auth(
                &credential.account.dsid,
                Some(&credential.account.search_party_token),
            )
            .json(&body);

        for (name, value) in &credential.anisette {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Upstream request failed");
            UpstreamError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = %status, "Upstream rejected credentials");
            return Err(UpstreamError::AuthenticationFailed);
        }
        if !status.is_success() {
            warn!(status = %status, "Upstream returned non-success status");
            return Err(UpstreamError::Unavailable(format!("upstream returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("failed to read body: {e}")))?;
        let parsed: UpstreamResponse = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;

        let bundles = partition(ids, parsed);
        debug!(
            ids = ids.len(),
            entries = bundles.values().map(Vec::len).sum::<usize>(),
            "Fetched upstream reports"
        );

        Ok(bundles)
    }
}

/// Split the flat upstream result list into one bundle per requested id.
fn partition(ids: &[Identifier], response: UpstreamResponse) -> HashMap<Identifier, RawBundle> {
    let mut bundles: HashMap<Identifier, RawBundle> =
        ids.iter().map(|id| (id.clone(), Vec::new())).collect();

    let mut ignored = 0usize;
    let mut invalid = 0usize;

    for entry in response.results {
        let Some(bundle) = bundles.get_mut(&entry.id) else {
            ignored += 1;
            continue;
        };
        if !payload_is_well_formed(&entry.payload) {
            invalid += 1;
        }
        bundle.push(RawEntry::from(entry));
    }

    if ignored > 0 || invalid > 0 {
        debug!(ignored, invalid, "Upstream entries needing attention");
    }

    bundles
}

/// Validation only: the aggregator decodes, counts and skips bad payloads.
fn payload_is_well_formed(payload: &str) -> bool {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map(|bytes| Envelope::decode(&bytes).is_ok())
        .unwrap_or(false)
}

/// Upstream errors
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream rejected credentials")]
    AuthenticationFailed,

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}
