//! OAuth1 credential bundles and token file loading
//!
//! A token file is a JSON array of objects carrying the four OAuth1 fields.
//! Both the bare field names and the `oauth_`-prefixed spelling are accepted.
//! The file is read once at startup; the pool owns the tokens afterward.

use std::path::Path;

use common::Secret;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

/// One OAuth1 credential set.
///
/// Immutable once loaded. Two tokens are the same token when all four fields
/// are equal; nothing deduplicates them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
    #[serde(alias = "oauth_client_key")]
    pub client_key: String,
    #[serde(alias = "oauth_client_secret")]
    pub client_secret: Secret<String>,
    #[serde(alias = "oauth_resource_owner_key")]
    pub resource_owner_key: String,
    #[serde(alias = "oauth_resource_owner_secret")]
    pub resource_owner_secret: Secret<String>,
}

impl Token {
    pub fn new(
        client_key: impl Into<String>,
        client_secret: impl Into<String>,
        resource_owner_key: impl Into<String>,
        resource_owner_secret: impl Into<String>,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            client_secret: Secret::new(client_secret.into()),
            resource_owner_key: resource_owner_key.into(),
            resource_owner_secret: Secret::new(resource_owner_secret.into()),
        }
    }

    /// Non-secret identifier for logs and health output.
    pub fn label(&self) -> &str {
        &self.resource_owner_key
    }
}

/// Load a JSON token file.
///
/// An empty array is returned as-is; rejecting an empty pool is the pool's job.
pub async fn load_tokens(path: &Path) -> Result<Vec<Token>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("reading token file {}: {e}", path.display())))?;
    let tokens: Vec<Token> = serde_json::from_str(&contents)
        .map_err(|e| Error::CredentialParse(format!("parsing token file {}: {e}", path.display())))?;
    info!(path = %path.display(), tokens = tokens.len(), "loaded oauth1 tokens");
    Ok(tokens)
}
