//! OAuth grant exchange against the token endpoint
//!
//! Handles the three grants the authentication endpoint accepts:
//! 1. Authorization code (completion of the interactive sign-in)
//! 2. Resource owner password (headless sign-in)
//! 3. Refresh token (proactive and reactive refresh)
//!
//! All of them POST a form to `AuthConfig::token_url` through the same
//! `Transport` the resource requests use.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::{HeaderValue, Method, Transport, TransportRequest, header};

use crate::endpoints::{
    AuthConfig, BEARER, FORM_CONTENT_TYPE, GRANT_AUTHORIZATION_CODE, GRANT_PASSWORD,
    GRANT_REFRESH_TOKEN,
};
use crate::error::{Error, Result};

/// Response from the token endpoint for every grant.
///
/// `expires_in` is a delta in seconds from the response time. A missing
/// `refresh_token` means the server did not rotate it.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

fn default_token_type() -> String {
    BEARER.to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A grant presented to the token endpoint.
#[derive(Clone, Copy)]
pub enum Grant<'a> {
    AuthorizationCode { code: &'a str },
    Password { username: &'a str, password: &'a str },
    RefreshToken { refresh_token: &'a str },
}

impl Grant<'_> {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => GRANT_AUTHORIZATION_CODE,
            Grant::Password { .. } => GRANT_PASSWORD,
            Grant::RefreshToken { .. } => GRANT_REFRESH_TOKEN,
        }
    }
}

/// Encode the form body for `grant`, including client identity.
fn encode_form(config: &AuthConfig, grant: Grant<'_>) -> String {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", grant.grant_type());
    match grant {
        Grant::AuthorizationCode { code } => {
            form.append_pair("code", code);
            form.append_pair("redirect_uri", &config.redirect_uri);
        }
        Grant::Password { username, password } => {
            form.append_pair("username", username);
            form.append_pair("password", password);
        }
        Grant::RefreshToken { refresh_token } => {
            form.append_pair("refresh_token", refresh_token);
        }
    }
    form.append_pair("client_id", &config.client_id);
    form.append_pair("client_secret", config.client_secret.expose());
    form.finish()
}

/// POST `grant` to the token endpoint and decode the token response.
///
/// 400/401/403 mean the grant itself was refused (revoked refresh token,
/// bad code, wrong password) and map to `InvalidCredentials`; other
/// failures are `TokenExchange` or `Transport`.
pub async fn request_token(
    transport: &dyn Transport,
    config: &AuthConfig,
    grant: Grant<'_>,
) -> Result<TokenResponse> {
    let mut request = TransportRequest::new(Method::POST, config.token_url.clone());
    request.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(FORM_CONTENT_TYPE),
    );
    request
        .headers
        .insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    request.body = Some(Bytes::from(encode_form(config, grant)));

    debug!(grant_type = grant.grant_type(), "requesting token");

    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Transport(format!("token request failed: {e}")))?;
    let status = response.status;
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Transport(format!("reading token response: {e}")))?;

    if !(200..300).contains(&status) {
        let text = String::from_utf8_lossy(&body);
        if matches!(status, 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "{} grant rejected ({status}): {text}",
                grant.grant_type()
            )));
        }
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {text}"
        )));
    }

    serde_json::from_slice::<TokenResponse>(&body)
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Exchange an authorization code obtained by the sign-in UI.
pub async fn exchange_code(
    transport: &dyn Transport,
    config: &AuthConfig,
    code: &str,
) -> Result<TokenResponse> {
    request_token(transport, config, Grant::AuthorizationCode { code }).await
}

/// Sign in with username and password.
pub async fn password_grant(
    transport: &dyn Transport,
    config: &AuthConfig,
    username: &str,
    password: &str,
) -> Result<TokenResponse> {
    request_token(transport, config, Grant::Password { username, password }).await
}

/// Obtain a new access token with a refresh token.
pub async fn refresh_token(
    transport: &dyn Transport,
    config: &AuthConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    request_token(
        transport,
        config,
        Grant::RefreshToken {
            refresh_token: refresh,
        },
    )
    .await
}
