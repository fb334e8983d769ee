//! Common types for the OAuth crawler workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
