//! Token lifecycle management for the document API client
//!
//! `TokenManager` owns every write to the credential store. It decides
//! whether the current credential is still usable, refreshes it when it is
//! not, and guarantees at most one refresh exchange in flight: callers that
//! need a refresh while one is running wait for that one instead of
//! starting their own.
//!
//! Credential lifecycle:
//! 1. Sign-in stores a credential (`sign_in*`)
//! 2. Requests ask for a usable credential (`credential()`), refreshing
//!    proactively when it expires within the minimum validity margin
//! 3. A request rejected with 401 asks for a refresh past the rejected token
//!    (`refresh_after()`), coalesced with any refresh already running
//! 4. Optionally a background task refreshes ahead of expiry
//! 5. Sign-out clears the store

pub mod error;
pub mod manager;
pub mod refresh;

pub use error::{Error, Result};
pub use manager::{DEFAULT_MIN_VALIDITY, TokenManager, TokenSettings, is_usable};
pub use refresh::spawn_refresh_task;
