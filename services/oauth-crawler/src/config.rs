//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! OAuth secrets may live inline in the TOML, but the env overrides
//! (`OAUTH_TOKENS_FILE`, `OAUTH2_TOKEN`) keep them out of the file entirely.

use common::Secret;
use oauth_sign::Token;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub oauth1: Option<OAuth1Config>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
}

/// Crawl loop settings
#[derive(Debug, Deserialize)]
pub struct CrawlerConfig {
    pub seeds: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Retry budget per request, counting the first dispatch.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Listener for /health and /metrics; disabled when absent.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Response classification policy for the OAuth1 pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    SingleUse,
    Status,
}

/// OAuth1 token pool settings
#[derive(Debug, Deserialize)]
pub struct OAuth1Config {
    #[serde(default)]
    pub cooldown_minutes: u64,
    #[serde(default)]
    pub classifier: ClassifierKind,
    #[serde(default)]
    pub tokens: Vec<Token>,
    /// JSON token file, appended after the inline tokens.
    #[serde(default)]
    pub tokens_file: Option<PathBuf>,
}

/// OAuth2 bearer settings
#[derive(Debug, Deserialize)]
pub struct OAuth2Config {
    pub client_id: String,
    #[serde(default)]
    pub token: Option<Secret<String>>,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_in_flight() -> usize {
    16
}

fn default_user_agent() -> String {
    concat!("oauth-crawler/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    5
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Env overrides:
    /// - `OAUTH_TOKENS_FILE` replaces `oauth1.tokens_file`
    /// - `OAUTH2_TOKEN` replaces `oauth2.token`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.crawler.seeds.is_empty() {
            return Err(common::Error::invalid("crawler.seeds", "at least one seed URL is required"));
        }
        for seed in &config.crawler.seeds {
            if !seed.starts_with("http://") && !seed.starts_with("https://") {
                return Err(common::Error::invalid(
                    "crawler.seeds",
                    format!("seed must start with http:// or https://, got: {seed}"),
                ));
            }
        }

        if config.crawler.timeout_secs == 0 {
            return Err(common::Error::invalid("crawler.timeout_secs", "must be greater than 0"));
        }
        if config.crawler.max_in_flight == 0 {
            return Err(common::Error::invalid("crawler.max_in_flight", "must be greater than 0"));
        }
        if config.crawler.max_attempts == 0 {
            return Err(common::Error::invalid("crawler.max_attempts", "must be greater than 0"));
        }

        if let Some(oauth1) = config.oauth1.as_mut() {
            if let Ok(p) = std::env::var("OAUTH_TOKENS_FILE") {
                oauth1.tokens_file = Some(PathBuf::from(p));
            }
        }

        if let Some(oauth2) = config.oauth2.as_mut() {
            if let Ok(token) = std::env::var("OAUTH2_TOKEN") {
                oauth2.token = Some(Secret::new(token));
            }
            if oauth2.token.as_ref().is_none_or(|t| t.expose().is_empty()) {
                return Err(common::Error::Config(
                    "oauth2 requires a token (oauth2.token or OAUTH2_TOKEN)".into(),
                ));
            }
        }

        if config.oauth1.is_none() && config.oauth2.is_none() {
            return Err(common::Error::Config(
                "at least one of [oauth1] or [oauth2] must be configured".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-crawler.toml")
    }
}

impl OAuth1Config {
    /// Inline tokens followed by those from `tokens_file`, if any.
    pub async fn resolve_tokens(&self) -> oauth_sign::Result<Vec<Token>> {
        let mut tokens = self.tokens.clone();
        if let Some(path) = &self.tokens_file {
            tokens.extend(oauth_sign::load_tokens(path).await?);
        }
        Ok(tokens)
    }
}
