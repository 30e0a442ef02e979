//! Shared types for the document API workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
