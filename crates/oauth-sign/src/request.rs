//! Outbound crawl request shape
//!
//! The rotation layer only needs a URL, a method, a mutable header map and a
//! place to park the token that signed the request. Transport concerns stay
//! with the host.

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};

use crate::constants::FORM_CONTENT_TYPE;
use crate::credentials::Token;

/// Request-scoped record of which token signed a request.
///
/// `success_count` is the number of successful round-trips the token had
/// already completed when it was handed out, so the recycled live entry
/// carries the right count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub token: Token,
    pub success_count: u64,
}

/// A request travelling through the signing and retry path.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub id: String,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Set once any OAuth flow has authorized the request.
    pub oauth: bool,
    /// Token used for the in-flight attempt; cleared before a retry.
    pub binding: Option<TokenBinding>,
    /// Number of times the request has been handed to the dispatcher.
    pub attempts: u32,
}

impl CrawlRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            oauth: false,
            binding: None,
            attempts: 0,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_body(mut self, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static(content_type),
        );
        self.body = Some(body.into());
        self
    }

    /// Whether the body's parameters belong in the signature base string.
    pub fn has_form_body(&self) -> bool {
        self.body.is_some()
            && self
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(';').next())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
    }

    /// Drop the token binding, OAuth marker and stale signature so the
    /// request can be signed again.
    pub fn unbind(&mut self) -> Option<TokenBinding> {
        self.oauth = false;
        self.headers.remove(AUTHORIZATION);
        self.binding.take()
    }
}
