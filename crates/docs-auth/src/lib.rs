//! OAuth credentials and token endpoint access for the document API
//!
//! Holds the `Credential` model, the `CredentialStore` seam with in-memory
//! and file-backed implementations, and the grant exchanges against the
//! authentication endpoint. This crate performs single exchanges only;
//! deciding when to refresh and coalescing concurrent refreshes is the job
//! of `docs-session`.
//!
//! Credential flow:
//! 1. The sign-in UI (external) yields an authorization code or a credential
//! 2. `token::exchange_code()` or `token::password_grant()` obtains tokens
//! 3. `Credential::from_token_response()` validates and timestamps them
//! 4. A `CredentialStore` holds the current credential
//! 5. `token::refresh_token()` rotates it before or after expiry

pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod token;

pub use credentials::{
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, is_bearer_token,
    now_millis,
};
pub use endpoints::AuthConfig;
pub use error::{Error, Result};
pub use token::{Grant, TokenResponse, exchange_code, password_grant, refresh_token, request_token};
