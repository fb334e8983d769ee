//! OAuth 1.0 request signing per RFC 5849
//!
//! Builds the signature base string from the request method, base URI and
//! normalized parameters (query, protocol, and form body parameters), signs
//! it with HMAC-SHA1 keyed by the consumer and token secrets, and renders the
//! protocol parameters as an `Authorization: OAuth ...` header.
//!
//! Signing never mutates the token or the request. The caller merges the
//! returned headers.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use ring::hmac;
use url::Url;

use crate::constants::{NONCE_BYTES, OAUTH_VERSION, SIGNATURE_METHOD};
use crate::credentials::Token;
use crate::error::{Error, Result};
use crate::request::CrawlRequest;

/// Header set produced by a signer.
#[derive(Debug, Clone)]
pub struct SignedHeaders(HeaderMap);

impl SignedHeaders {
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.0.get(AUTHORIZATION)
    }

    /// Insert every signed header into `headers`, replacing existing values.
    pub fn merge_into(self, headers: &mut HeaderMap) {
        for (name, value) in self.0.iter() {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// Produces OAuth headers for a request with a given token.
///
/// Implementations are pure with respect to their inputs: no I/O, no retry.
pub trait Signer: Send + Sync {
    fn sign(&self, token: &Token, request: &CrawlRequest) -> Result<SignedHeaders>;
}

/// HMAC-SHA1 signer with header placement.
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSha1Signer;

impl HmacSha1Signer {
    pub fn new() -> Self {
        Self
    }

    /// Sign with an explicit nonce and timestamp.
    pub fn sign_with(
        &self,
        token: &Token,
        request: &CrawlRequest,
        nonce: &str,
        timestamp: u64,
    ) -> Result<SignedHeaders> {
        let timestamp = timestamp.to_string();
        let protocol = protocol_params(token, nonce, &timestamp);
        let base = signature_base_string(request, &protocol)?;

        let signing_key = format!(
            "{}&{}",
            encode(token.client_secret.expose()),
            encode(token.resource_owner_secret.expose())
        );
        let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, signing_key.as_bytes());
        let signature = STANDARD.encode(hmac::sign(&key, base.as_bytes()).as_ref());

        let mut fields: Vec<String> = protocol
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", encode(name), encode(value)))
            .collect();
        fields.push(format!("oauth_signature=\"{}\"", encode(&signature)));

        let value = HeaderValue::from_str(&format!("OAuth {}", fields.join(", ")))
            .map_err(|e| Error::Signing(format!("invalid authorization header: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(SignedHeaders(headers))
    }
}

impl Signer for HmacSha1Signer {
    fn sign(&self, token: &Token, request: &CrawlRequest) -> Result<SignedHeaders> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.sign_with(token, request, &generate_nonce(), timestamp)
    }
}

/// Random URL-safe nonce.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Protocol parameters in header order (signature excluded).
fn protocol_params<'a>(token: &'a Token, nonce: &'a str, timestamp: &'a str) -> [(&'static str, &'a str); 6] {
    [
        ("oauth_nonce", nonce),
        ("oauth_timestamp", timestamp),
        ("oauth_version", OAUTH_VERSION),
        ("oauth_signature_method", SIGNATURE_METHOD),
        ("oauth_consumer_key", &token.client_key),
        ("oauth_token", &token.resource_owner_key),
    ]
}

/// RFC 5849 §3.4.1 signature base string.
fn signature_base_string(request: &CrawlRequest, protocol: &[(&str, &str)]) -> Result<String> {
    let url = Url::parse(&request.url)
        .map_err(|e| Error::Signing(format!("invalid url {}: {e}", request.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Signing(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::Signing(format!("url has no host: {}", request.url)))?;

    // Url already lower-cases scheme and host and drops default ports.
    let base_uri = match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    };

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .collect();
    params.extend(protocol.iter().map(|(k, v)| (encode(k), encode(v))));
    if request.has_form_body() {
        if let Some(body) = &request.body {
            params.extend(
                url::form_urlencoded::parse(body).map(|(k, v)| (encode(&k), encode(&v))),
            );
        }
    }
    params.sort();

    let normalized = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    Ok(format!(
        "{}&{}&{}",
        request.method.as_str().to_ascii_uppercase(),
        encode(&base_uri),
        encode(&normalized)
    ))
}

/// RFC 3986 percent-encoding: everything but `ALPHA / DIGIT / "-" / "." / "_" / "~"`.
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
