//! Credential usability checks and single-flight refresh
//!
//! The manager keeps one slot for the refresh currently in flight. The
//! refresh runs as its own spawned task and its outcome is shared, so a
//! waiter that gives up (its request was cancelled) never aborts it for the
//! others. The task stores the new credential and clears the slot under the
//! slot lock, and only if the store still holds the credential it started
//! from: a sign-in or sign-out that landed meanwhile wins.
//!
//! If the runtime that spawned the task shuts down first, the task is
//! aborted. Whoever observes that clears the slot and waiters start over.
//!
//! A caller asking for a refresh names the access token it found stale. If
//! no refresh is running and the store already holds a different token,
//! someone refreshed in the meantime and the stored credential is returned
//! without touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use docs_auth::{AuthConfig, Credential, CredentialStore, now_millis};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::{Error, Result, store_error};

/// Refresh this long before the access token expires.
pub const DEFAULT_MIN_VALIDITY: Duration = Duration::from_secs(5 * 60);

/// Tunables for the token manager.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// A credential expiring sooner than this is refreshed before use
    pub min_validity: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            min_validity: DEFAULT_MIN_VALIDITY,
        }
    }
}

/// Whether `credential` can be sent as-is at `now` (unix millis).
///
/// False when signed out, when the access token is empty, or when fewer
/// than `min_validity` remain before expiry.
pub fn is_usable(credential: Option<&Credential>, now: u64, min_validity: Duration) -> bool {
    match credential {
        Some(c) if !c.access_token.is_empty() => {
            c.remaining_millis(now) >= min_validity.as_millis() as u64
        }
        _ => false,
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential>>>;

struct InFlight {
    generation: u64,
    refresh: SharedRefresh,
}

/// Sole reader and writer of the credential store on behalf of requests.
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    auth: Arc<AuthConfig>,
    settings: TokenSettings,
    inflight: Arc<Mutex<Option<InFlight>>>,
    generation: AtomicU64,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        auth: AuthConfig,
        settings: TokenSettings,
    ) -> Self {
        Self {
            store,
            transport,
            auth: Arc::new(auth),
            settings,
            inflight: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// `is_usable` with this manager's margin.
    pub fn is_usable(&self, credential: Option<&Credential>, now: u64) -> bool {
        is_usable(credential, now, self.settings.min_validity)
    }

    /// Snapshot of the stored credential, without refreshing.
    pub async fn current(&self) -> Result<Option<Credential>> {
        self.store.get().await.map_err(store_error)
    }

    pub async fn is_signed_in(&self) -> Result<bool> {
        Ok(self.current().await?.is_some())
    }

    /// A credential that is usable right now, refreshing first if needed.
    pub async fn credential(&self) -> Result<Credential> {
        let current = self.current().await?.ok_or(Error::NotSignedIn)?;
        let now = now_millis();
        if self.is_usable(Some(&current), now) {
            return Ok(current);
        }
        debug!(
            remaining_ms = current.remaining_millis(now),
            "credential below minimum validity, refreshing"
        );
        self.refresh_after(&current.access_token).await
    }

    /// Obtain a credential newer than `stale_access_token`.
    ///
    /// Joins the refresh in flight if there is one; otherwise returns the
    /// stored credential if it already differs from the stale token, and
    /// only then starts a new refresh.
    pub async fn refresh_after(&self, stale_access_token: &str) -> Result<Credential> {
        loop {
            let refresh = {
                let mut slot = self.inflight.lock().await;
                match slot.as_ref() {
                    Some(pending) => {
                        debug!(generation = pending.generation, "joining in-flight token refresh");
                        pending.refresh.clone()
                    }
                    None => {
                        let current = self.current().await?.ok_or(Error::NotSignedIn)?;
                        if current.access_token != stale_access_token {
                            debug!("credential already replaced, skipping refresh");
                            return Ok(current);
                        }
                        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                        let refresh = self.spawn_refresh(generation);
                        *slot = Some(InFlight {
                            generation,
                            refresh: refresh.clone(),
                        });
                        refresh
                    }
                }
            };
            match refresh.await {
                Err(Error::RefreshInterrupted(reason)) => {
                    warn!(%reason, "token refresh interrupted, starting over");
                }
                result => return result,
            }
        }
    }

    /// Force a refresh of the stored credential (joins one in flight).
    pub async fn refresh(&self) -> Result<Credential> {
        let current = self.current().await?.ok_or(Error::NotSignedIn)?;
        self.refresh_after(&current.access_token).await
    }

    /// Store a credential obtained out of band (e.g. by the sign-in UI).
    ///
    /// A refresh still in flight is detached and will not overwrite it.
    pub async fn sign_in(&self, credential: Credential) -> Result<()> {
        let mut slot = self.inflight.lock().await;
        *slot = None;
        self.store.replace(credential).await.map_err(store_error)?;
        info!("signed in");
        Ok(())
    }

    /// Complete the authorization-code flow.
    pub async fn sign_in_with_code(&self, code: &str) -> Result<Credential> {
        let response = docs_auth::exchange_code(self.transport.as_ref(), &self.auth, code)
            .await
            .map_err(|e| Error::SignIn(e.to_string()))?;
        self.store_grant(response).await
    }

    /// Sign in with the resource owner password grant.
    pub async fn sign_in_with_password(&self, username: &str, password: &str) -> Result<Credential> {
        let response =
            docs_auth::password_grant(self.transport.as_ref(), &self.auth, username, password)
                .await
                .map_err(|e| Error::SignIn(e.to_string()))?;
        self.store_grant(response).await
    }

    /// Clear the stored credential. A refresh still in flight is discarded.
    pub async fn sign_out(&self) -> Result<()> {
        let mut slot = self.inflight.lock().await;
        *slot = None;
        self.store.clear().await.map_err(store_error)?;
        info!("signed out");
        Ok(())
    }

    async fn store_grant(&self, response: docs_auth::TokenResponse) -> Result<Credential> {
        let credential = Credential::from_token_response(response, now_millis(), None)
            .map_err(|e| Error::SignIn(e.to_string()))?;
        self.sign_in(credential.clone()).await?;
        Ok(credential)
    }

    /// Start the refresh exchange on its own task.
    fn spawn_refresh(&self, generation: u64) -> SharedRefresh {
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let auth = Arc::clone(&self.auth);
        let inflight = Arc::clone(&self.inflight);

        let task = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                let exchanged = exchange_refresh(store.as_ref(), transport.as_ref(), &auth).await;
                let mut slot = inflight.lock().await;
                let result = match exchanged {
                    Ok((previous, credential)) => {
                        commit(store.as_ref(), &previous, credential).await
                    }
                    Err(e) => Err(e),
                };
                clear_slot(&mut slot, generation);
                result
            })
        };

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached its own cleanup
                    clear_slot(&mut *inflight.lock().await, generation);
                    if e.is_cancelled() {
                        Err(Error::RefreshInterrupted(e.to_string()))
                    } else {
                        Err(Error::RefreshFailed(format!(
                            "refresh task ended abnormally: {e}"
                        )))
                    }
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn clear_slot(slot: &mut Option<InFlight>, generation: u64) {
    if slot.as_ref().is_some_and(|p| p.generation == generation) {
        *slot = None;
    }
}

/// One refresh-token exchange. Returns the credential it started from along
/// with the new one; nothing is stored yet.
async fn exchange_refresh(
    store: &dyn CredentialStore,
    transport: &dyn Transport,
    auth: &AuthConfig,
) -> Result<(Credential, Credential)> {
    let previous = store
        .get()
        .await
        .map_err(store_error)?
        .ok_or(Error::NotSignedIn)?;
    let requested_at = now_millis();

    let response = match docs_auth::refresh_token(transport, auth, &previous.refresh_token).await
    {
        Ok(response) => response,
        Err(docs_auth::Error::InvalidCredentials(msg)) => {
            warn!(error = %msg, "refresh token rejected");
            metrics::counter!("docs_token_refresh_total", "outcome" => "rejected").increment(1);
            return Err(Error::RefreshRejected(msg));
        }
        Err(e) => {
            warn!(error = %e, "token refresh failed");
            metrics::counter!("docs_token_refresh_total", "outcome" => "failed").increment(1);
            return Err(Error::RefreshFailed(e.to_string()));
        }
    };

    let credential = Credential::from_token_response(response, requested_at, Some(&previous))
        .map_err(|e| Error::RefreshRejected(e.to_string()))?;
    Ok((previous, credential))
}

/// Store `credential` unless the store moved on from `previous` while the
/// exchange ran. Must be called with the in-flight slot locked.
async fn commit(
    store: &dyn CredentialStore,
    previous: &Credential,
    credential: Credential,
) -> Result<Credential> {
    match store.get().await.map_err(store_error)? {
        None => {
            info!("signed out during token refresh, discarding result");
            metrics::counter!("docs_token_refresh_total", "outcome" => "discarded").increment(1);
            Err(Error::NotSignedIn)
        }
        Some(current) if current.access_token != previous.access_token => {
            info!("credential replaced during token refresh, discarding result");
            metrics::counter!("docs_token_refresh_total", "outcome" => "discarded").increment(1);
            Ok(current)
        }
        Some(_) => {
            store
                .replace(credential.clone())
                .await
                .map_err(store_error)?;
            info!(
                expires_in_secs = credential.remaining_millis(now_millis()) / 1000,
                "token refresh succeeded"
            );
            metrics::counter!("docs_token_refresh_total", "outcome" => "success").increment(1);
            Ok(credential)
        }
    }
}
