//! # Haystack Relay
//!
//! Fetches crowd-sourced location reports for tracked devices from the
//! upstream report network and returns them, decoded and merged, in one
//! response.
//!
//! ## Design Principles
//!
//! - **Stateless**: reports are fetched fresh per request and never stored
//! - **Lossless merge**: every upstream entry for a requested identifier is
//!   returned; reports are never deduplicated on timestamp
//! - **Injected credentials**: upstream authentication comes from a
//!   [`credentials::CredentialProvider`] chosen at startup
//! - **Minimal logging**: counts only, no identifiers or credentials
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │   Client    │────▶│   Relay     │────▶│  Report network  │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!                            │
//!                     ┌──────┴──────┐
//!                     │             │
//!               Credentials     Anisette
//!                 (vault)        server
//! ```
//!
//! ## API Overview
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Health check |
//! | `/v1/reports` | POST | Fetch reports for a batch of identifiers |
//! | `/` | POST | Alias of `/v1/reports`; returns decoded report records, not raw upstream entries |

pub mod auth;
pub mod config;
pub mod credentials;
pub mod handlers;
pub mod models;
pub mod upstream;
pub mod vault;

pub use config::Config;
pub use handlers::AppState;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Maximum request body size (64 KiB).
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Build the Axum router with all endpoints and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check (unauthenticated)
        .route("/health", get(handlers::health))
        // Report fetch
        .route("/", post(handlers::fetch_reports))
        .route("/v1/reports", post(handlers::fetch_reports))
        // Middleware stack (order matters: first added = outermost)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
