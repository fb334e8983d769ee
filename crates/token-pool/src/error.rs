//! Error types for pool and coordinator operations

/// Errors from pool construction and request preparation.
///
/// An empty pool at acquire time is not an error; it is reported as a held
/// request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Signing(#[from] oauth_sign::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
