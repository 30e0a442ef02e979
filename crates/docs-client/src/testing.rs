//! Shared fixtures for engine tests

use std::sync::Arc;

use common::Secret;
use docs_auth::{AuthConfig, Credential, CredentialStore, MemoryCredentialStore, now_millis};
use docs_session::{TokenManager, TokenSettings};
use transport::mock::MockTransport;

use crate::client::Client;
use crate::retry::RetryPolicy;

pub(crate) const API: &str = "https://api.test";
pub(crate) const TOKEN_URL: &str = "https://auth.test/oauth/token";

const ACCESS_TOKEN: &str = "at_initial";

pub(crate) fn token_body(access_token: &str) -> String {
    format!(
        r#"{{"access_token":"{access_token}","refresh_token":"rt_next","token_type":"bearer","expires_in":3600}}"#
    )
}

pub(crate) struct Fixture {
    pub(crate) client: Client,
    pub(crate) transport: Arc<MockTransport>,
    store: Arc<MemoryCredentialStore>,
}

impl Fixture {
    /// Credential valid for another hour.
    pub(crate) fn signed_in() -> Self {
        Self::build(Some(now_millis() + 3_600_000), RetryPolicy::default())
    }

    /// Credential that expired a second ago.
    pub(crate) fn expired() -> Self {
        Self::build(Some(now_millis().saturating_sub(1_000)), RetryPolicy::default())
    }

    pub(crate) fn signed_out() -> Self {
        Self::build(None, RetryPolicy::default())
    }

    pub(crate) fn with_retry(retry: RetryPolicy) -> Self {
        Self::build(Some(now_millis() + 3_600_000), retry)
    }

    pub(crate) fn access_token(&self) -> &'static str {
        ACCESS_TOKEN
    }

    pub(crate) async fn stored_access_token(&self) -> String {
        self.store
            .get()
            .await
            .unwrap()
            .map(|c| c.access_token)
            .unwrap_or_default()
    }

    fn build(expires_at: Option<u64>, retry: RetryPolicy) -> Self {
        let store = Arc::new(match expires_at {
            Some(expires_at) => MemoryCredentialStore::with_credential(
                Credential::new(ACCESS_TOKEN, "rt_initial", expires_at).unwrap(),
            ),
            None => MemoryCredentialStore::new(),
        });
        let transport = Arc::new(MockTransport::new());
        let auth = AuthConfig::new(
            TOKEN_URL,
            "client-test",
            Secret::new("secret-test".to_string()),
            "https://app.test/callback",
        );
        let tokens = Arc::new(TokenManager::new(
            store.clone(),
            transport.clone(),
            auth,
            TokenSettings::default(),
        ));
        let client = Client::builder(API, transport.clone(), tokens)
            .retry_policy(retry)
            .build();

        Self {
            client,
            transport,
            store,
        }
    }
}
