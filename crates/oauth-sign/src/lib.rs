//! OAuth request signing for the crawler
//!
//! Provides the credential bundle (`Token`), the outbound request shape
//! (`CrawlRequest`), RFC 5849 HMAC-SHA1 signing behind the `Signer` trait,
//! and OAuth2 bearer attachment for hosts that use a single static token.
//! This crate holds no pool state; rotation lives in `token-pool`.
//!
//! Signing flow:
//! 1. Tokens are loaded from config or a JSON file via `credentials::load_tokens()`
//! 2. The rotation layer picks a `Token` and calls `Signer::sign()`
//! 3. The returned `SignedHeaders` are merged into the request's header map
//! 4. The request goes out with `Authorization: OAuth ...`

pub mod bearer;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod request;
pub mod signer;

pub use bearer::BearerAuth;
pub use constants::*;
pub use credentials::{Token, load_tokens};
pub use error::{Error, Result};
pub use request::{CrawlRequest, TokenBinding};
pub use signer::{HmacSha1Signer, SignedHeaders, Signer};
