//! Prometheus metrics exposition
//!
//! The library crates emit through the `metrics` facade; this module installs
//! the Prometheus recorder and adds the crawler's own series:
//!
//! - `crawler_responses_total` (counter): label `status` (HTTP code or fetch error kind)
//! - `oauth_cooldown_wait_seconds` (histogram): idle waits for a token to cool down

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::crawler::FetchOutcome;

/// Cooldown waits range from sub-second to the length of a cooldown window.
const COOLDOWN_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("oauth_cooldown_wait_seconds".to_string()),
        COOLDOWN_BUCKETS,
    )?)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record one fetch outcome by status code or error kind.
pub fn record_response(outcome: &FetchOutcome) {
    let status = match outcome {
        Ok(page) => page.status.to_string(),
        Err(e) => e.kind().to_string(),
    };
    metrics::counter!("crawler_responses_total", "status" => status).increment(1);
}
