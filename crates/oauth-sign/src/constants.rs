//! OAuth protocol constants
//!
//! Fixed values from RFC 5849 used when building the signature base string
//! and the `Authorization` header.

/// Protocol version sent as `oauth_version`.
pub const OAUTH_VERSION: &str = "1.0";

/// The only signature method this crate produces.
pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";

/// Body content type whose parameters take part in the signature (RFC 5849 §3.4.1.3.1).
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Random bytes per nonce before encoding.
pub const NONCE_BYTES: usize = 16;
