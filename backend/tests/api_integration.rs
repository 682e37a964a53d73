//! Integration tests for the haystack relay API.
//!
//! Runs the full router against a mock upstream report network served by a
//! second axum app on a loopback port.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use async_trait::async_trait;
use axum_test::TestServer;
use base64::Engine;
use haystack_core::Envelope;
use haystack_relay::{
    auth::EndpointAuth,
    build_router,
    credentials::{
        Credential, CredentialError, CredentialProvider, StaticCredentialProvider,
        UnavailableCredentialProvider,
    },
    handlers::AppState,
    upstream::UpstreamClient,
    vault::AccountCredentials,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request captured by the mock upstream
#[derive(Debug, Clone)]
struct RecordedRequest {
    body: Value,
    authorization: Option<String>,
    anisette_md: Option<String>,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Mock upstream report network
struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockUpstream {
    fn url(&self) -> String {
        format!("http://{}/acsnservice/fetch", self.addr)
    }

    fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn mock_fetch(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    state.requests.lock().unwrap().push(RecordedRequest {
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
        authorization: header_str("authorization"),
        anisette_md: header_str("x-apple-i-md"),
    });

    (state.status, state.body.clone())
}

/// Start a mock upstream that answers every fetch with `status` and `body`
async fn spawn_upstream(status: StatusCode, body: String) -> MockUpstream {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        status,
        body,
        requests: requests.clone(),
    };

    let app = Router::new()
        .route("/acsnservice/fetch", post(mock_fetch))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockUpstream { addr, requests }
}

/// Mock upstream returning `results`
async fn spawn_upstream_with(results: Value) -> MockUpstream {
    spawn_upstream(StatusCode::OK, json!({ "results": results }).to_string()).await
}

fn account() -> AccountCredentials {
    AccountCredentials {
        dsid: "123456789".to_string(),
        search_party_token: "search-party-token".to_string(),
    }
}

fn test_state(upstream_url: &str) -> AppState {
    let mut anisette = BTreeMap::new();
    anisette.insert("X-Apple-I-MD".to_string(), "anisette-md".to_string());
    anisette.insert("X-Apple-I-MD-M".to_string(), "anisette-md-m".to_string());

    let credentials = Arc::new(StaticCredentialProvider::new(account(), anisette));
    let upstream = UpstreamClient::new(upstream_url, Duration::from_secs(5)).unwrap();
    AppState::new(credentials, upstream)
}

/// Provider counting how often the relay asks it to drop cached state
struct CountingProvider {
    inner: StaticCredentialProvider,
    invalidations: AtomicUsize,
}

impl CountingProvider {
    fn new() -> Self {
        Self {
            inner: StaticCredentialProvider::new(account(), BTreeMap::new()),
            invalidations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        self.inner.credential().await
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build test server pointed at the given upstream
fn build_test_server(upstream_url: &str) -> TestServer {
    TestServer::new(build_router(test_state(upstream_url))).unwrap()
}

/// Base64 payload with the given time offset and device data
fn payload(offset: u32, data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Envelope::new(offset, data.to_vec()).encode())
}

fn entry(id: &str, offset: u32, data: &[u8]) -> Value {
    json!({
        "payload": payload(offset, data),
        "id": id,
        "datePublished": 1_234_567_890
    })
}

fn decode_data(value: &Value) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(value.as_str().unwrap())
        .unwrap()
}

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = build_test_server("http://127.0.0.1:9/unused");

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

// =============================================================================
// Aggregation Tests
// =============================================================================

#[tokio::test]
async fn test_colliding_timestamps_are_both_returned() {
    let upstream = spawn_upstream_with(json!([
        entry("DeviceA", 100, b"X"),
        entry("DeviceB", 100, b"Y"),
    ]))
    .await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["DeviceA", "DeviceB"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let results = body["results"].as_array().unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["identifier"], "DeviceA");
    assert_eq!(results[1]["identifier"], "DeviceB");
    assert_eq!(results[0]["timestamp"], 978_307_300);
    assert_eq!(results[1]["timestamp"], 978_307_300);
    assert_eq!(decode_data(&results[0]["data"]), b"X");
    assert_eq!(decode_data(&results[1]["data"]), b"Y");
    assert_eq!(results[0]["datePublished"], 1_234_567_890);
    assert_eq!(body["skipped"], 0);
    assert_eq!(body["duplicates"], 0);
}

#[tokio::test]
async fn test_root_path_returns_decoded_records() {
    let upstream = spawn_upstream_with(json!([
        entry("DeviceA", 100, b"DEVICE_A_DATA"),
        entry("DeviceB", 100, b"DEVICE_B_DATA"),
    ]))
    .await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/")
        .json(&json!({ "ids": ["DeviceA", "DeviceB"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["identifier"], "DeviceA");
    assert_eq!(decode_data(&results[0]["data"]), b"DEVICE_A_DATA");
    assert!(results[0].get("payload").is_none());
}

#[tokio::test]
async fn test_repeated_delivery_is_counted() {
    let upstream = spawn_upstream_with(json!([
        entry("A", 7, b"same"),
        entry("A", 7, b"same"),
        entry("A", 8, b"same"),
        { "payload": "AAE=", "id": "A", "datePublished": 1 },
    ]))
    .await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["duplicates"], 1);

    // Every upstream entry is accounted for
    let total = results.len() as u64
        + body["skipped"].as_u64().unwrap()
        + body["duplicates"].as_u64().unwrap();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn test_duplicate_ids_fetched_once() {
    let upstream = spawn_upstream_with(json!([entry("A", 1, b"a"), entry("B", 2, b"b")])).await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A", "A", "B"] }))
        .await;
    response.assert_status_ok();

    let recorded = upstream.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].body["search"][0]["ids"], json!(["A", "B"]));

    let body: Value = response.json();
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_entries_are_skipped() {
    let upstream = spawn_upstream_with(json!([
        { "payload": "AAE=", "id": "A", "datePublished": 1 },
        entry("A", 5, b"ok"),
        entry("B", 6, b"fine"),
    ]))
    .await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A", "B"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["skipped"], 1);
}

#[tokio::test]
async fn test_empty_upstream_result() {
    let upstream = spawn_upstream_with(json!([entry("A", 1, b"a")])).await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A", "Quiet"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results.iter().all(|r| r["identifier"] == "A"));
}

#[tokio::test]
async fn test_unrequested_entries_ignored() {
    let upstream = spawn_upstream_with(json!([entry("A", 1, b"a"), entry("Other", 1, b"o")])).await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["skipped"], 0);
}

// =============================================================================
// Upstream Request Shape Tests
// =============================================================================

#[tokio::test]
async fn test_upstream_receives_credentials_and_window() {
    let upstream = spawn_upstream_with(json!([])).await;
    let server = build_test_server(&upstream.url());

    server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"], "days": 3 }))
        .await
        .assert_status_ok();

    let recorded = upstream.recorded();
    assert_eq!(recorded.len(), 1);

    let expected_auth = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("123456789:search-party-token")
    );
    assert_eq!(recorded[0].authorization.as_deref(), Some(expected_auth.as_str()));
    assert_eq!(recorded[0].anisette_md.as_deref(), Some("anisette-md"));

    let search = &recorded[0].body["search"][0];
    let start = search["startDate"].as_i64().unwrap();
    let end = search["endDate"].as_i64().unwrap();
    assert_eq!(end - start, 3 * 24 * 60 * 60 * 1000);
}

// =============================================================================
// Bad Request Tests
// =============================================================================

#[tokio::test]
async fn test_bad_requests() {
    let upstream = spawn_upstream_with(json!([])).await;
    let server = build_test_server(&upstream.url());

    let bodies = [
        json!({}),
        json!({ "ids": [] }),
        json!({ "ids": "A" }),
        json!({ "ids": [""] }),
        json!({ "ids": ["A"], "days": 0 }),
        json!({ "ids": ["A"], "days": 30 }),
    ];

    for body in bodies {
        let response = server.post("/v1/reports").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["code"], "BAD_REQUEST", "body: {body}");
    }

    let response = server.post("/v1/reports").text("not json").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    // Nothing reached the upstream
    assert!(upstream.recorded().is_empty());
}

// =============================================================================
// Upstream Failure Tests
// =============================================================================

#[tokio::test]
async fn test_upstream_connection_refused() {
    // Reserve a port, then close it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = build_test_server(&format!("http://{addr}/acsnservice/fetch"));

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
    assert!(body.get("results").is_none());
}

#[tokio::test]
async fn test_upstream_server_error() {
    let upstream = spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, String::new()).await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_upstream_malformed_body() {
    let upstream = spawn_upstream(StatusCode::OK, "<html>oops</html>".to_string()).await;
    let server = build_test_server(&upstream.url());

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_upstream_rejects_credentials() {
    for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
        let upstream = spawn_upstream(status, String::new()).await;
        let provider = Arc::new(CountingProvider::new());
        let client = UpstreamClient::new(&upstream.url(), Duration::from_secs(5)).unwrap();
        let state = AppState::new(provider.clone(), client);
        let server = TestServer::new(build_router(state)).unwrap();

        let response = server
            .post("/v1/reports")
            .json(&json!({ "ids": ["A"] }))
            .await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert_eq!(body["code"], "AUTHENTICATION_FAILED", "upstream {status}");
        assert_eq!(
            provider.invalidations.load(Ordering::SeqCst),
            1,
            "upstream {status}"
        );
    }
}

#[tokio::test]
async fn test_other_upstream_failures_keep_credentials() {
    let upstream = spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, String::new()).await;
    let provider = Arc::new(CountingProvider::new());
    let client = UpstreamClient::new(&upstream.url(), Duration::from_secs(5)).unwrap();
    let server = TestServer::new(build_router(AppState::new(provider.clone(), client))).unwrap();

    server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(provider.invalidations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_credential_unavailable() {
    let upstream = spawn_upstream_with(json!([])).await;
    let client = UpstreamClient::new(&upstream.url(), Duration::from_secs(5)).unwrap();
    let state = AppState::new(Arc::new(UnavailableCredentialProvider), client);
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");
    assert!(upstream.recorded().is_empty());
}

// =============================================================================
// Endpoint Auth Tests
// =============================================================================

#[tokio::test]
async fn test_endpoint_basic_auth() {
    let upstream = spawn_upstream_with(json!([entry("A", 1, b"a")])).await;
    let state = test_state(&upstream.url()).with_auth(EndpointAuth::new("owner", "hunter2"));
    let server = TestServer::new(build_router(state)).unwrap();

    // Missing header
    let response = server
        .post("/v1/reports")
        .json(&json!({ "ids": ["A"] }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .is_some());

    // Wrong password
    let wrong = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("owner:nope")
    );
    let response = server
        .post("/v1/reports")
        .add_header(header::AUTHORIZATION, wrong)
        .json(&json!({ "ids": ["A"] }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Not a Basic header
    let response = server
        .post("/v1/reports")
        .add_header(header::AUTHORIZATION, "Bearer abc123".to_string())
        .json(&json!({ "ids": ["A"] }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\"haystack\""
    );
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_AUTH");

    // Correct credentials
    let right = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("owner:hunter2")
    );
    let response = server
        .post("/v1/reports")
        .add_header(header::AUTHORIZATION, right)
        .json(&json!({ "ids": ["A"] }))
        .await;
    response.assert_status_ok();

    // Health stays open
    server.get("/health").await.assert_status_ok();

    assert_eq!(upstream.recorded().len(), 1);
}
