//! Haystack Relay - location report fetch and aggregation service
//!
//! A stateless relay that:
//! - Authenticates to the upstream report network with stored account
//!   credentials and fresh anisette headers
//! - Fetches report bundles for a batch of identifiers in one call
//! - Decodes and merges them without losing same-second reports

use haystack_relay::{
    auth::EndpointAuth,
    build_router,
    credentials::{CredentialProvider, FileCredentialProvider, UnavailableCredentialProvider},
    upstream::UpstreamClient,
    AppState, Config,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Initialize structured logging
    init_tracing();

    // Load and validate configuration
    let config = Config::from_env();
    log_startup_info(&config);

    // Credentials are loaded once; a missing file leaves the relay up but
    // every fetch fails with AUTHENTICATION_FAILED until it is provisioned.
    let credentials: Arc<dyn CredentialProvider> =
        match FileCredentialProvider::from_config(&config) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!(error = %e, "Credentials not loaded - fetches will fail");
                Arc::new(UnavailableCredentialProvider)
            }
        };

    let upstream = match UpstreamClient::new(&config.upstream_url, config.upstream_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build upstream client");
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::new(credentials, upstream)
        .with_auth(EndpointAuth::from_options(
            config.endpoint_user.as_deref(),
            config.endpoint_pass.as_deref(),
        ))
        .with_default_days(config.default_days);

    // Build and serve the application
    let app = build_router(state);
    match serve(app, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with environment-based log levels.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("haystack_relay=debug,tower_http=info")),
        )
        .init();
}

/// Log startup configuration (no secrets).
fn log_startup_info(config: &Config) {
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        upstream_url = %config.upstream_url,
        anisette_url = %config.anisette_url,
        upstream_timeout_secs = config.upstream_timeout.as_secs(),
        default_days = config.default_days,
        endpoint_auth = config.endpoint_auth_configured(),
        "Starting haystack relay"
    );
}

/// Bind to address and serve the application.
async fn serve(app: axum::Router, config: &Config) -> std::io::Result<()> {
    let bind_addr = format!("{}:{}", config.bind_addr, config.port);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!(addr = %bind_addr, "Server listening");

    axum::serve(listener, app).await
}
