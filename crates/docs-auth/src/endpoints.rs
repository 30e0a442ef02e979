//! Authentication endpoint configuration
//!
//! The client id and secret identify the registered application; the
//! user's tokens live in the credential store, never here.

use common::Secret;

/// `grant_type` values accepted by the token endpoint.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// Content type of token endpoint requests.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// The only token type this client can present.
pub const BEARER: &str = "bearer";

/// Token endpoint location and client identity.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Token endpoint for code exchange, password grant and refresh
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Redirect URI registered for the authorization-code flow
    pub redirect_uri: String,
}

impl AuthConfig {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
        }
    }
}
