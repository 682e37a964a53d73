//! At-rest storage of the upstream account credentials.
//!
//! The credentials file (`auth.json`) is either legacy plaintext JSON or a
//! sealed blob. The format is resolved once when the file is loaded; after
//! that the relay only ever holds the decoded [`AccountCredentials`].
//!
//! # Sealed Format
//!
//! ```text
//! base64( fernet_token )
//! ```
//!
//! The Fernet key is the url-safe base64 of a 32-byte key derived from the
//! master key file with PBKDF2-HMAC-SHA256 (100 000 iterations, salt = first
//! 16 bytes of the master key). Files written by the existing provisioning
//! tooling use this layout, so they load unchanged.

use base64::Engine;
use fernet::Fernet;
use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;
use tracing::{debug, warn};

/// PBKDF2 iteration count for key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Master key bytes used as PBKDF2 salt.
const SALT_LEN: usize = 16;

/// Derived key length (Fernet signing + encryption keys).
const KEY_LEN: usize = 32;

/// Account credentials for the upstream report network
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredentials {
    /// Account directory services id
    pub dsid: String,
    /// Search party token issued for the account
    pub search_party_token: String,
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("dsid", &"<redacted>")
            .field("search_party_token", &"<redacted>")
            .finish()
    }
}

/// Credentials file contents, classified at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCredentials {
    /// Legacy plaintext JSON
    Plaintext(AccountCredentials),
    /// Sealed blob (base64)
    Encrypted(String),
}

impl StoredCredentials {
    /// Classify raw file contents.
    pub fn parse(contents: &str) -> Result<Self, VaultError> {
        let contents = contents.trim();
        if contents.starts_with('{') {
            let creds = serde_json::from_str(contents)
                .map_err(|e| VaultError::InvalidFormat(e.to_string()))?;
            Ok(Self::Plaintext(creds))
        } else if contents.is_empty() {
            Err(VaultError::InvalidFormat("credentials file is empty".to_string()))
        } else {
            Ok(Self::Encrypted(contents.to_string()))
        }
    }

    /// Resolve to account credentials, unsealing with `master_key` if needed.
    pub fn resolve(self, master_key: Option<&[u8]>) -> Result<AccountCredentials, VaultError> {
        match self {
            Self::Plaintext(creds) => Ok(creds),
            Self::Encrypted(blob) => {
                let master_key = master_key.ok_or(VaultError::MissingMasterKey)?;
                let json = unseal(master_key, &blob)?;
                serde_json::from_slice(&json).map_err(|e| VaultError::InvalidFormat(e.to_string()))
            }
        }
    }
}

/// Load account credentials from `path`.
///
/// The master key is only read when the file is sealed.
pub fn load(path: &Path, master_key_path: &Path) -> Result<AccountCredentials, VaultError> {
    let contents = std::fs::read_to_string(path)?;

    match StoredCredentials::parse(&contents)? {
        stored @ StoredCredentials::Plaintext(_) => {
            warn!(path = %path.display(), "Reading plaintext credentials - consider sealing them");
            stored.resolve(None)
        }
        stored @ StoredCredentials::Encrypted(_) => {
            let master_key = read_master_key(master_key_path)?;
            debug!("Unsealing stored credentials");
            stored.resolve(Some(&master_key))
        }
    }
}

/// Read the master key file (surrounding whitespace ignored).
pub fn read_master_key(path: &Path) -> Result<Vec<u8>, VaultError> {
    let raw = std::fs::read(path).map_err(|_| VaultError::MissingMasterKey)?;
    let trimmed = String::from_utf8_lossy(&raw).trim().as_bytes().to_vec();
    if trimmed.len() < SALT_LEN {
        return Err(VaultError::MissingMasterKey);
    }
    Ok(trimmed)
}

/// Seal account credentials with `master_key`.
pub fn seal_credentials(
    master_key: &[u8],
    creds: &AccountCredentials,
) -> Result<String, VaultError> {
    let json = serde_json::to_vec(creds).map_err(|e| VaultError::InvalidFormat(e.to_string()))?;
    seal(master_key, &json)
}

/// Seal arbitrary bytes.
pub fn seal(master_key: &[u8], plaintext: &[u8]) -> Result<String, VaultError> {
    let token = fernet(master_key)?.encrypt(plaintext);
    Ok(base64::engine::general_purpose::STANDARD.encode(token))
}

/// Unseal a blob produced by [`seal`].
pub fn unseal(master_key: &[u8], blob: &str) -> Result<Vec<u8>, VaultError> {
    let token = base64::engine::general_purpose::STANDARD
        .decode(blob.trim())
        .map_err(|_| VaultError::InvalidFormat("sealed blob is not base64".to_string()))?;
    let token = String::from_utf8(token)
        .map_err(|_| VaultError::InvalidFormat("sealed blob is not a token".to_string()))?;

    fernet(master_key)?
        .decrypt(&token)
        .map_err(|_| VaultError::Crypto)
}

fn fernet(master_key: &[u8]) -> Result<Fernet, VaultError> {
    Fernet::new(&derive_key(master_key)?).ok_or(VaultError::Crypto)
}

/// Derive the url-safe base64 Fernet key from the master key.
fn derive_key(master_key: &[u8]) -> Result<String, VaultError> {
    if master_key.len() < SALT_LEN {
        return Err(VaultError::MissingMasterKey);
    }

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).ok_or(VaultError::Crypto)?;
    let mut key_bytes = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &master_key[..SALT_LEN],
        master_key,
        &mut key_bytes,
    );

    Ok(base64::engine::general_purpose::URL_SAFE.encode(key_bytes))
}

/// Credential vault errors
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("failed to read credentials: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credentials format: {0}")]
    InvalidFormat(String),

    #[error("master key missing or too short")]
    MissingMasterKey,

    #[error("failed to unseal credentials")]
    Crypto,
}
