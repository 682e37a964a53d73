//! HTTP request handlers for the haystack relay API.
//!
//! All handlers follow the contract:
//! - Stateless per request (no report is kept after the response)
//! - Partial success is success: skipped entries still return 200
//! - Minimal logging (counts only, never identifiers or credentials)

use crate::auth::{AuthError, EndpointAuth};
use crate::config::MAX_DAYS;
use crate::credentials::CredentialProvider;
use crate::models::{
    ErrorResponse, FetchReportsRequest, FetchReportsResponse, HealthResponse, ReportRecord,
};
use crate::upstream::{FetchWindow, UpstreamClient, UpstreamError};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use haystack_core::{aggregate, Identifier};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<dyn CredentialProvider>,
    pub upstream: UpstreamClient,
    /// Endpoint Basic auth (may be disabled)
    pub auth: EndpointAuth,
    /// Fetch window used when the request omits `days`
    pub default_days: u32,
}

impl AppState {
    pub fn new(credentials: Arc<dyn CredentialProvider>, upstream: UpstreamClient) -> Self {
        Self {
            credentials,
            upstream,
            auth: EndpointAuth::disabled(),
            default_days: MAX_DAYS,
        }
    }

    pub fn with_auth(mut self, auth: EndpointAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_default_days(mut self, days: u32) -> Self {
        self.default_days = days;
        self
    }
}

// === Health Check ===

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// === Report Fetch ===

/// POST /v1/reports - Fetch and aggregate reports for a batch of identifiers
///
/// Duplicate identifiers are fetched once. Every report returned upstream
/// for a requested identifier appears in the response; reports sharing a
/// timestamp are never merged.
pub async fn fetch_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FetchReportsRequest>, JsonRejection>,
) -> Result<Json<FetchReportsResponse>, ApiError> {
    state.auth.verify(&headers)?;

    let Json(req) = body.map_err(|rejection| {
        debug!(error = %rejection, "Rejected fetch request body");
        ApiError::BadRequest("request body must be {\"ids\": [...]}")
    })?;

    let days = match req.days {
        None => state.default_days,
        Some(d) if (1..=MAX_DAYS).contains(&d) => d,
        Some(_) => return Err(ApiError::BadRequest("days must be between 1 and 7")),
    };

    let ids = dedupe_ids(req.ids);
    if ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty"));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ApiError::BadRequest("ids must not contain empty identifiers"));
    }

    let credential = state.credentials.credential().await.map_err(|e| {
        warn!(error = %e, "Credential unavailable");
        ApiError::AuthenticationFailed
    })?;

    let window = FetchWindow::last_days(days, chrono::Utc::now());
    let bundles = match state.upstream.fetch(&ids, &credential, window).await {
        Ok(bundles) => bundles,
        Err(UpstreamError::AuthenticationFailed) => {
            state.credentials.invalidate().await;
            return Err(ApiError::AuthenticationFailed);
        }
        Err(e) => return Err(e.into()),
    };

    let aggregation = aggregate(&ids, &bundles);

    info!(
        ids = ids.len(),
        days,
        reports = aggregation.reports.len(),
        skipped = aggregation.skipped,
        duplicates = aggregation.duplicates,
        "Fetched reports"
    );

    Ok(Json(FetchReportsResponse {
        results: aggregation
            .reports
            .into_iter()
            .map(ReportRecord::from)
            .collect(),
        skipped: aggregation.skipped,
        duplicates: aggregation.duplicates,
    }))
}

/// Remove repeated identifiers, keeping the first occurrence of each
pub fn dedupe_ids(ids: Vec<Identifier>) -> Vec<Identifier> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

// === Error Handling ===

/// API error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    /// Upstream rejected the credential or none could be obtained
    AuthenticationFailed,
    /// Transport failure, non-success status, or unparseable upstream body
    UpstreamUnavailable,
    /// Endpoint authorization error (wraps AuthError)
    Auth(AuthError),
}

/// Implement From<AuthError> to enable ? operator in handlers
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::AuthenticationFailed => ApiError::AuthenticationFailed,
            // A body we cannot parse is the upstream's fault, not the caller's
            UpstreamError::Unavailable(_) | UpstreamError::MalformedResponse(_) => {
                ApiError::UpstreamUnavailable
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            ApiError::Auth(auth_err) => return auth_err.into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::AuthenticationFailed => (
                StatusCode::BAD_GATEWAY,
                "AUTHENTICATION_FAILED",
                "upstream authentication failed",
            ),
            ApiError::UpstreamUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UPSTREAM_UNAVAILABLE",
                "upstream unavailable, try again later",
            ),
        };

        let body = Json(ErrorResponse {
            error: message.to_string(),
            code,
        });

        (status, body).into_response()
    }
}
