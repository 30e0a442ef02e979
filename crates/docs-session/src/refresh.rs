//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes the credential before it expires,
//! so most requests never pay for a refresh. The task goes through the same
//! single-flight path as requests, so it never races them.

use std::sync::Arc;
use std::time::Duration;

use docs_auth::now_millis;
use tracing::{debug, warn};

use crate::error::Error;
use crate::manager::TokenManager;

/// Spawn a background task that refreshes the credential ahead of expiry.
///
/// Runs every `interval` and refreshes when the credential expires within
/// `threshold`. A rejected refresh token is logged and left for the user to
/// sign in again; transient errors wait for the next cycle.
pub fn spawn_refresh_task(
    manager: Arc<TokenManager>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&manager, threshold).await;
        }
    })
}

/// Run one refresh cycle.
async fn refresh_cycle(manager: &TokenManager, threshold: Duration) {
    let credential = match manager.current().await {
        Ok(Some(c)) => c,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "could not read credential store");
            return;
        }
    };

    if credential.remaining_millis(now_millis()) > threshold.as_millis() as u64 {
        return;
    }
    debug!("credential expiring within threshold, refreshing");

    match manager.refresh_after(&credential.access_token).await {
        Ok(_) => {}
        Err(Error::RefreshRejected(msg)) => {
            warn!(error = %msg, "refresh token rejected, sign-in required");
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use docs_auth::{AuthConfig, Credential, CredentialStore, MemoryCredentialStore};
    use transport::mock::{MockReply, MockTransport};

    use crate::manager::TokenSettings;

    const TOKEN_URL: &str = "https://auth.test/oauth/token";

    fn setup(expires_at: u64) -> (Arc<TokenManager>, Arc<MockTransport>, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::with_credential(
            Credential::new("at_a", "rt_a", expires_at).unwrap(),
        ));
        let transport = Arc::new(MockTransport::new());
        let auth = AuthConfig::new(
            TOKEN_URL,
            "client-1",
            Secret::new("cs".to_string()),
            "https://app.test/callback",
        );
        let manager = Arc::new(TokenManager::new(
            store.clone(),
            transport.clone(),
            auth,
            TokenSettings::default(),
        ));
        (manager, transport, store)
    }

    #[tokio::test]
    async fn refresh_cycle_skips_valid_tokens() {
        let (manager, transport, store) = setup(now_millis() + 3_600_000);

        refresh_cycle(&manager, Duration::from_secs(900)).await;

        assert!(transport.calls().is_empty());
        assert_eq!(store.get().await.unwrap().unwrap().access_token, "at_a");
    }

    #[tokio::test]
    async fn refresh_cycle_refreshes_expiring_token() {
        let (manager, transport, store) = setup(now_millis() + 1_000);
        transport.enqueue(
            TOKEN_URL,
            MockReply::ok(r#"{"access_token":"at_b","refresh_token":"rt_b","expires_in":3600}"#),
        );

        refresh_cycle(&manager, Duration::from_secs(900)).await;

        assert_eq!(store.get().await.unwrap().unwrap().access_token, "at_b");
    }

    #[tokio::test]
    async fn rejected_refresh_keeps_credential() {
        let (manager, transport, store) = setup(now_millis() + 1_000);
        transport.enqueue(TOKEN_URL, MockReply::status(401));

        refresh_cycle(&manager, Duration::from_secs(900)).await;

        assert_eq!(transport.call_count(TOKEN_URL), 1);
        assert_eq!(store.get().await.unwrap().unwrap().access_token, "at_a");
    }

    #[tokio::test]
    async fn signed_out_cycle_is_a_no_op() {
        let (manager, transport, _) = setup(0);
        manager.sign_out().await.unwrap();

        refresh_cycle(&manager, Duration::from_secs(900)).await;

        assert!(transport.calls().is_empty());
    }
}
