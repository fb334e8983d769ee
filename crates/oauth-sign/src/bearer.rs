//! OAuth2 bearer attachment
//!
//! Attaches a single static access token to requests that no other OAuth flow
//! has authorized yet. Bearer tokens are only ever sent over https; a plain
//! http URL rejects the request instead of downgrading. There is no refresh.

use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::debug;

use crate::error::{Error, Result};
use crate::request::CrawlRequest;

/// Static OAuth2 client credentials.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    client_id: String,
    token: Secret<String>,
}

impl BearerAuth {
    pub fn new(client_id: impl Into<String>, token: Secret<String>) -> Self {
        Self {
            client_id: client_id.into(),
            token,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Attach `Authorization: Bearer ...` to `request`.
    ///
    /// Returns `Ok(false)` without touching the request when it is already
    /// OAuth-authorized.
    pub fn attach(&self, request: &mut CrawlRequest) -> Result<bool> {
        if request.oauth {
            return Ok(false);
        }
        if !is_secure_transport(&request.url) {
            return Err(Error::InsecureTransport(request.url.clone()));
        }

        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token.expose()))
            .map_err(|e| Error::Signing(format!("invalid bearer token value: {e}")))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        request.oauth = true;
        debug!(request_id = %request.id, client_id = %self.client_id, "attached bearer token");
        Ok(true)
    }
}

fn is_secure_transport(url: &str) -> bool {
    url.to_ascii_lowercase().starts_with("https://")
}
