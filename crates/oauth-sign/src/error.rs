//! Error types for signing and credential loading

/// Errors from OAuth signing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("insecure transport: {0} is not an https:// URL")]
    InsecureTransport(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for signing operations.
pub type Result<T> = std::result::Result<T, Error>;
