//! Credential provider for upstream authentication.
//!
//! An upstream call needs two things: the account credentials (dsid and
//! search party token, sent as Basic auth) and a fresh set of anisette
//! headers attesting the requesting device. The provider is injected into
//! the application state at construction; the upstream client never reaches
//! for global state.
//!
//! # Expiry Contract
//!
//! Every [`Credential`] carries `expires_at`. Callers may hold one for the
//! duration of a single upstream call. [`FileCredentialProvider`] reuses
//! anisette headers until they expire, then fetches a new set.

use crate::config::Config;
use crate::vault::{self, AccountCredentials, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Everything needed to authenticate one upstream call
#[derive(Clone)]
pub struct Credential {
    pub account: AccountCredentials,
    /// Anisette headers, sent verbatim
    pub anisette: BTreeMap<String, String>,
    /// When the anisette headers must no longer be used
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Check whether the credential is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("account", &self.account)
            .field("anisette_headers", &self.anisette.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of upstream credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a credential valid for at least one upstream call.
    async fn credential(&self) -> Result<Credential, CredentialError>;

    /// Forget any cached state after the upstream rejected a credential.
    async fn invalidate(&self) {}
}

/// Provider returning a fixed credential (tests, local tooling)
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(account: AccountCredentials, anisette: BTreeMap<String, String>) -> Self {
        Self {
            credential: Credential {
                account,
                anisette,
                expires_at: DateTime::<Utc>::MAX_UTC,
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        Ok(self.credential.clone())
    }
}

/// Provider that never yields a credential
pub struct UnavailableCredentialProvider;

#[async_trait]
impl CredentialProvider for UnavailableCredentialProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        Err(CredentialError::Unavailable("no credentials configured".to_string()))
    }
}

/// Client for an anisette server
pub struct AnisetteClient {
    client: reqwest::Client,
    url: String,
}

impl AnisetteClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch a fresh set of anisette headers.
    ///
    /// The server returns a flat JSON object; non-string values are dropped.
    pub async fn fetch(&self) -> Result<BTreeMap<String, String>, CredentialError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("anisette request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Unavailable(format!(
                "anisette server returned {status}"
            )));
        }

        let body: serde_json::Map<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("invalid anisette response: {e}")))?;

        let mut headers: BTreeMap<String, String> = body
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();

        if headers.is_empty() {
            return Err(CredentialError::Unavailable(
                "anisette server returned no headers".to_string(),
            ));
        }

        add_client_headers(&mut headers, Utc::now());
        Ok(headers)
    }
}

/// Add the client-side headers that accompany anisette data.
fn add_client_headers(headers: &mut BTreeMap<String, String>, now: DateTime<Utc>) {
    headers
        .entry("X-Apple-I-Client-Time".to_string())
        .or_insert_with(|| now.format("%Y-%m-%dT%H:%M:%SZ").to_string());
    headers
        .entry("X-Apple-I-TimeZone".to_string())
        .or_insert_with(|| "UTC".to_string());
    headers
        .entry("loc".to_string())
        .or_insert_with(|| "en_US".to_string());
    headers
        .entry("X-Apple-Locale".to_string())
        .or_insert_with(|| "en_US".to_string());
}

/// Provider backed by the credentials file and an anisette server
pub struct FileCredentialProvider {
    account: AccountCredentials,
    anisette: AnisetteClient,
    ttl: Duration,
    cached: RwLock<Option<Credential>>,
}

impl FileCredentialProvider {
    /// Load account credentials from disk. The file format is resolved here,
    /// once, not on every call.
    pub fn from_config(config: &Config) -> Result<Self, CredentialError> {
        let account = vault::load(&config.credentials_path, &config.master_key_path)?;
        let anisette = AnisetteClient::new(&config.anisette_url, config.upstream_timeout)?;

        Ok(Self::new(account, anisette, config.anisette_ttl))
    }

    pub fn new(account: AccountCredentials, anisette: AnisetteClient, ttl: Duration) -> Self {
        Self {
            account,
            anisette,
            ttl,
            cached: RwLock::new(None),
        }
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        let now = Utc::now();

        if let Some(credential) = self.cached.read().await.as_ref() {
            if credential.is_valid_at(now) {
                return Ok(credential.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(credential) = cached.as_ref() {
            if credential.is_valid_at(now) {
                return Ok(credential.clone());
            }
        }

        let anisette = self.anisette.fetch().await.map_err(|e| {
            warn!(error = %e, "Failed to refresh anisette headers");
            e
        })?;

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(60));
        let credential = Credential {
            account: self.account.clone(),
            anisette,
            expires_at: now + ttl,
        };

        debug!(
            headers = credential.anisette.len(),
            ttl_secs = self.ttl.as_secs(),
            "Refreshed anisette headers"
        );

        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Drop cached anisette headers so the next call fetches fresh ones.
    async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

/// Credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}
