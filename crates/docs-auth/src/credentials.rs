//! Credential model and storage
//!
//! The `CredentialStore` trait is the seam to whatever persists the signed-in
//! user's tokens. `MemoryCredentialStore` keeps them in process;
//! `FileCredentialStore` keeps a JSON file written atomically (temp file +
//! rename) with owner-only permissions.
//!
//! Only the token manager in `docs-session` writes through these stores.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::endpoints::BEARER;
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// The signed-in user's OAuth credential.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta),
/// computed from `TokenResponse::expires_in` plus the time of receipt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Current access token (Bearer token for API calls)
    pub access_token: String,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: String,
    /// Always "bearer" for this client
    pub token_type: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
}

impl Credential {
    /// Build a bearer credential, validating the access token syntax.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: u64,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if !is_bearer_token(&access_token) {
            return Err(Error::InvalidCredentials(
                "access token is not a valid bearer token".into(),
            ));
        }
        Ok(Self {
            access_token,
            refresh_token: refresh_token.into(),
            token_type: BEARER.to_string(),
            expires_at,
        })
    }

    /// Convert a token endpoint response received at `now` (unix millis).
    ///
    /// A response without a refresh token keeps `previous`'s. The expiry never
    /// moves backwards relative to `previous`.
    pub fn from_token_response(
        response: TokenResponse,
        now: u64,
        previous: Option<&Credential>,
    ) -> Result<Self> {
        if !response.token_type.eq_ignore_ascii_case(BEARER) {
            return Err(Error::InvalidCredentials(format!(
                "unsupported token type: {}",
                response.token_type
            )));
        }

        let refresh_token = match (response.refresh_token, previous) {
            (Some(rt), _) => rt,
            (None, Some(prev)) => prev.refresh_token.clone(),
            (None, None) => {
                return Err(Error::InvalidCredentials(
                    "token response carries no refresh token".into(),
                ));
            }
        };

        let mut expires_at = now.saturating_add(response.expires_in.saturating_mul(1000));
        if let Some(prev) = previous {
            expires_at = expires_at.max(prev.expires_at);
        }

        Self::new(response.access_token, refresh_token, expires_at)
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Milliseconds left before expiry, zero once expired.
    pub fn remaining_millis(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Whether `token` matches the RFC 6750 `b64token` syntax:
/// `1*( ALPHA / DIGIT / "-" / "." / "_" / "~" / "+" / "/" ) *"="`.
pub fn is_bearer_token(token: &str) -> bool {
    let body = token.trim_end_matches('=');
    !body.is_empty()
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'+' | b'/'))
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Storage for the current credential.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// The current credential, or `None` when signed out.
    fn get(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>>;

    /// Replace the current credential.
    fn replace(
        &self,
        credential: Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Forget the current credential (sign out).
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-process credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            state: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.read().await.clone()) })
    }

    fn replace(
        &self,
        credential: Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = Some(credential);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = None;
            Ok(())
        })
    }
}

/// JSON-file credential store.
///
/// The Mutex serializes writes; reads clone the in-memory copy so they never
/// touch the disk.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl FileCredentialStore {
    /// Load the credential from `path`.
    ///
    /// If the file doesn't exist it is created holding `null` (signed out).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credential: Option<Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            if let Some(stored) = &credential {
                validate_stored(stored)?;
            }
            info!(path = %path.display(), signed_in = credential.is_some(), "loaded credential");
            credential
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            write_atomic(&path, &None).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn replace(
        &self,
        credential: Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let next = Some(credential);
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!("replaced credential");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &None).await?;
            *state = None;
            debug!("cleared credential");
            Ok(())
        })
    }
}

/// A credential read back from disk must still be a bearer credential.
fn validate_stored(credential: &Credential) -> Result<()> {
    if !credential.token_type.eq_ignore_ascii_case(BEARER) {
        return Err(Error::CredentialParse(format!(
            "credential file holds unsupported token type: {}",
            credential.token_type
        )));
    }
    if !is_bearer_token(&credential.access_token) {
        return Err(Error::CredentialParse(
            "credential file holds a malformed access token".into(),
        ));
    }
    Ok(())
}

/// Write the credential file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 since the file holds OAuth tokens.
async fn write_atomic(path: &Path, data: &Option<Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}
