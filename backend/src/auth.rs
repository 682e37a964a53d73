//! Optional HTTP Basic authentication for the relay's own endpoints.
//!
//! When `ENDPOINT_USER` and `ENDPOINT_PASS` are both configured, fetch
//! requests must carry `Authorization: Basic base64(user:pass)`. Otherwise the
//! relay is open (intended for deployments behind an authenticating proxy).
//!
//! # Security Model
//!
//! - Only SHA-256 of `user:pass` is kept in memory after startup
//! - Comparison is over digests, so timing does not depend on the password
//! - Credentials are never logged

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use ring::digest::{digest, SHA256};
use serde::Serialize;

/// Realm advertised in `WWW-Authenticate`
pub const REALM: &str = "haystack";

/// Endpoint credentials check
#[derive(Clone, Default)]
pub struct EndpointAuth {
    /// SHA-256 of `user:pass` (hex-encoded); `None` disables the check
    expected_hash: Option<String>,
}

impl EndpointAuth {
    /// Auth disabled: every request is accepted
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Require `user`/`pass` on every request
    pub fn new(user: &str, pass: &str) -> Self {
        Self {
            expected_hash: Some(hash_token(&format!("{user}:{pass}"))),
        }
    }

    /// Build from optional config values; both must be present to enable
    pub fn from_options(user: Option<&str>, pass: Option<&str>) -> Self {
        match (user, pass) {
            (Some(user), Some(pass)) => Self::new(user, pass),
            _ => Self::disabled(),
        }
    }

    /// Check if the relay requires endpoint credentials
    pub fn is_enabled(&self) -> bool {
        self.expected_hash.is_some()
    }

    /// Verify the request headers.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let Some(expected) = &self.expected_hash else {
            return Ok(());
        };

        let header_value = headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidHeader)?;

        let pair = extract_basic_credentials(header_value).ok_or(AuthError::InvalidHeader)?;

        if hash_token(&pair) == *expected {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }
}

/// Hash a token using SHA-256 and return hex-encoded result
pub fn hash_token(token: &str) -> String {
    let hash = digest(&SHA256, token.as_bytes());
    hex::encode(hash.as_ref())
}

/// Extract the decoded `user:pass` pair from a Basic Authorization header
pub fn extract_basic_credentials(authorization: &str) -> Option<String> {
    let encoded = authorization
        .strip_prefix("Basic ")
        .or_else(|| authorization.strip_prefix("basic "))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let pair = String::from_utf8(decoded).ok()?;

    pair.contains(':').then_some(pair)
}

/// Authorization error
#[derive(Debug)]
pub enum AuthError {
    /// Missing Authorization header
    MissingHeader,
    /// Invalid Authorization header format
    InvalidHeader,
    /// Credentials did not match
    Unauthorized,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::MissingHeader => (
                StatusCode::UNAUTHORIZED,
                "MISSING_AUTH",
                "Authorization header required",
            ),
            AuthError::InvalidHeader => (
                StatusCode::UNAUTHORIZED,
                "INVALID_AUTH",
                "Invalid Authorization header format",
            ),
            AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid credentials",
            ),
        };

        let body = Json(AuthErrorResponse {
            error: message.to_string(),
            code,
        });

        let challenge = format!("Basic realm=\"{REALM}\"");
        ([(WWW_AUTHENTICATE, challenge)], (status, body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
    code: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn hash_token_works() {
        let hash = hash_token("user:pass");

        // Should be 64 hex chars (32 bytes SHA-256)
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_token("user:pass"));
    }

    #[test]
    fn disabled_accepts_anything() {
        let auth = EndpointAuth::disabled();
        assert!(!auth.is_enabled());
        assert!(auth.verify(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn from_options_needs_both_values() {
        assert!(!EndpointAuth::from_options(Some("u"), None).is_enabled());
        assert!(!EndpointAuth::from_options(None, Some("p")).is_enabled());
        assert!(EndpointAuth::from_options(Some("u"), Some("p")).is_enabled());
    }

    #[test]
    fn verify_checks_credentials() {
        let auth = EndpointAuth::new("alice", "s3cret");

        assert!(auth.verify(&basic("alice", "s3cret")).is_ok());
        assert!(matches!(
            auth.verify(&basic("alice", "wrong")),
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.verify(&HeaderMap::new()),
            Err(AuthError::MissingHeader)
        ));
    }

    #[test]
    fn non_basic_header_is_challenged() {
        let auth = EndpointAuth::new("alice", "s3cret");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));

        let err = auth.verify(&headers).unwrap_err();
        assert!(matches!(err, AuthError::InvalidHeader));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            "Basic realm=\"haystack\""
        );
    }

    #[test]
    fn every_auth_error_is_unauthorized() {
        for err in [
            AuthError::MissingHeader,
            AuthError::InvalidHeader,
            AuthError::Unauthorized,
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(response.headers().contains_key(WWW_AUTHENTICATE));
        }
    }

    #[test]
    fn extract_basic_credentials_works() {
        assert_eq!(
            extract_basic_credentials("Basic dXNlcjpwYXNz"),
            Some("user:pass".to_string())
        );
        assert_eq!(
            extract_basic_credentials("basic dXNlcjpwYXNz"),
            Some("user:pass".to_string())
        );
        // "nocolon"
        assert_eq!(extract_basic_credentials("Basic bm9jb2xvbg=="), None);
        assert_eq!(extract_basic_credentials("Bearer abc123"), None);
        assert_eq!(extract_basic_credentials("Basic %%%"), None);
    }
}
