//! Request lifecycle around the token pool
//!
//! Each request goes `Unsigned → Signed/in flight → {Accepted, Retry, Held}`:
//!
//! - `prepare` acquires a token and signs the request, or parks the request in
//!   the holding queue when no token is usable. Holding is back-pressure, not
//!   an error.
//! - `complete` classifies the response, retires or recycles the token, and
//!   either accepts the response or hands the request back unbound for
//!   another pass through `prepare`.
//! - `on_idle` is called by the host before it would stop. With held requests
//!   and no live tokens it sleeps until the oldest dead token cools down, then
//!   releases every held request in the order it was held.
//!
//! Every operation holds the coordinator lock for its whole duration, so the
//! cooldown sleep in `on_idle` stalls `prepare` and `complete` until it ends.

use std::collections::VecDeque;
use std::sync::Arc;

use oauth_sign::{CrawlRequest, Signer};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classify::{Classifier, SingleUse};
use crate::clock::{Clock, TokioClock};
use crate::error::Result;
use crate::pool::TokenPool;

/// Result of trying to sign a request.
#[derive(Debug)]
pub enum Prepared {
    /// Signed and ready for the dispatcher.
    Dispatch(CrawlRequest),
    /// No token was usable; the request is in the holding queue.
    Held,
}

/// Result of feeding a response back.
#[derive(Debug)]
pub enum Completion<R> {
    /// Final response for the original caller.
    Accepted(R),
    /// The request, unbound, to be prepared again.
    Retry(CrawlRequest),
}

/// Answer to the host's idle notification.
#[derive(Debug)]
pub enum IdleDecision {
    /// Nothing was held; the host may stop.
    Idle,
    /// Held requests, oldest first, to schedule again. The host must keep running.
    KeepRunning(Vec<CrawlRequest>),
}

/// Drives requests through the token pool.
pub struct RetryCoordinator<R, C: Clock = TokioClock> {
    pool: Arc<TokenPool<C>>,
    signer: Arc<dyn Signer>,
    classifier: Arc<dyn Classifier<R>>,
    held: Mutex<VecDeque<CrawlRequest>>,
    max_attempts: Option<u32>,
}

impl<R, C: Clock> RetryCoordinator<R, C> {
    /// Coordinator with the single-use classifier and unlimited retries.
    pub fn new(pool: Arc<TokenPool<C>>, signer: Arc<dyn Signer>) -> Self {
        Self {
            pool,
            signer,
            classifier: Arc::new(SingleUse),
            held: Mutex::new(VecDeque::new()),
            max_attempts: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier<R>>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Stop retrying a request once it has been dispatched `attempts` times;
    /// the last response is accepted instead.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn pool(&self) -> &Arc<TokenPool<C>> {
        &self.pool
    }

    pub async fn held_len(&self) -> usize {
        self.held.lock().await.len()
    }

    /// Sign `request` with the next usable token, or hold it.
    ///
    /// A signing failure puts the token back untouched and propagates the
    /// signer's error; the request is dropped.
    pub async fn prepare(&self, mut request: CrawlRequest) -> Result<Prepared> {
        let mut held = self.held.lock().await;

        let Some(lease) = self.pool.acquire().await else {
            debug!(request_id = %request.id, held = held.len() + 1, "no usable token, holding request");
            metrics::counter!("oauth_requests_held_total").increment(1);
            held.push_back(request);
            return Ok(Prepared::Held);
        };

        match self.signer.sign(&lease.token, &request) {
            Ok(signed) => {
                signed.merge_into(&mut request.headers);
                request.oauth = true;
                request.attempts += 1;
                debug!(
                    request_id = %request.id,
                    token = lease.token.label(),
                    attempt = request.attempts,
                    "request signed"
                );
                request.binding = Some(lease.into());
                Ok(Prepared::Dispatch(request))
            }
            Err(e) => {
                warn!(request_id = %request.id, url = %request.url, error = %e, "signing failed");
                self.pool.restore(lease).await;
                Err(e.into())
            }
        }
    }

    /// Settle the token that signed `request` and decide the request's fate.
    ///
    /// Requests that were never signed by this coordinator pass through as
    /// accepted without touching the pool.
    pub async fn complete(&self, mut request: CrawlRequest, response: R) -> Completion<R> {
        let _guard = self.held.lock().await;

        let Some(binding) = request.unbind() else {
            return Completion::Accepted(response);
        };

        let verdict = self.classifier.classify(&response);
        if verdict.token_dead {
            self.pool.retire(binding.token).await;
        } else {
            self.pool
                .recycle(binding.token, binding.success_count + 1)
                .await;
        }

        if !verdict.retry {
            return Completion::Accepted(response);
        }
        if let Some(max) = self.max_attempts {
            if request.attempts >= max {
                warn!(
                    request_id = %request.id,
                    attempts = request.attempts,
                    "retry limit reached, accepting last response"
                );
                return Completion::Accepted(response);
            }
        }
        debug!(request_id = %request.id, attempts = request.attempts, "request will be retried");
        Completion::Retry(request)
    }

    /// Handle the host's idle notification.
    pub async fn on_idle(&self) -> IdleDecision {
        let mut held = self.held.lock().await;
        if held.is_empty() {
            return IdleDecision::Idle;
        }

        if !self.pool.has_live().await {
            if let Some(wait) = self.pool.earliest_dead_cooldown_remaining().await {
                if !wait.is_zero() {
                    info!(
                        held = held.len(),
                        wait_secs = wait.as_secs_f64(),
                        "no live tokens, waiting for cooldown"
                    );
                    metrics::histogram!("oauth_cooldown_wait_seconds").record(wait.as_secs_f64());
                    self.pool.clock().sleep(wait).await;
                }
            }
        }

        let released: Vec<CrawlRequest> = held.drain(..).collect();
        info!(released = released.len(), "releasing held requests");
        metrics::counter!("oauth_requests_released_total").increment(released.len() as u64);
        IdleDecision::KeepRunning(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Verdict;
    use crate::clock::ManualClock;
    use crate::cooldown::CooldownWindow;
    use oauth_sign::{HmacSha1Signer, Token};
    use reqwest::header::AUTHORIZATION;
    use std::time::Duration;

    fn token(name: &str) -> Token {
        Token::new(format!("ck-{name}"), "cs", name, "rs")
    }

    fn tokens(names: &[&str]) -> Vec<Token> {
        names.iter().map(|n| token(n)).collect()
    }

    fn coordinator(names: &[&str], window: Duration) -> RetryCoordinator<u16> {
        let pool = TokenPool::with_tokio_clock(tokens(names), CooldownWindow::from_duration(window))
            .unwrap();
        RetryCoordinator::new(Arc::new(pool), Arc::new(HmacSha1Signer::new()))
    }

    fn dispatched(prepared: Prepared) -> CrawlRequest {
        match prepared {
            Prepared::Dispatch(request) => request,
            Prepared::Held => panic!("expected dispatch, request was held"),
        }
    }

    fn signer_label(request: &CrawlRequest) -> String {
        request
            .binding
            .as_ref()
            .unwrap()
            .token
            .label()
            .to_string()
    }

    #[tokio::test]
    async fn prepare_signs_and_binds_token() {
        let coord = coordinator(&["a"], Duration::ZERO);
        let req = dispatched(
            coord
                .prepare(CrawlRequest::get("https://api.example.com/items"))
                .await
                .unwrap(),
        );
        assert!(req.oauth);
        assert_eq!(req.attempts, 1);
        assert_eq!(signer_label(&req), "a");
        assert_eq!(req.binding.as_ref().unwrap().success_count, 0);
        let auth = req.headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(auth.starts_with("OAuth "), "{auth}");
        assert!(auth.contains("oauth_token=\"a\""), "{auth}");
    }

    #[tokio::test]
    async fn default_classifier_retires_and_accepts() {
        let coord = coordinator(&["a"], Duration::from_secs(60));
        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());

        match coord.complete(req, 200).await {
            Completion::Accepted(status) => assert_eq!(status, 200),
            Completion::Retry(_) => panic!("default policy never retries"),
        }
        let counts = coord.pool().counts().await;
        assert_eq!((counts.live, counts.dead, counts.in_flight), (0, 1, 0));
    }

    #[tokio::test]
    async fn exhausted_pool_holds_requests() {
        let coord = coordinator(&["a"], Duration::from_secs(60));
        let _in_flight = dispatched(coord.prepare(CrawlRequest::get("https://x.test/1")).await.unwrap());

        let held = coord.prepare(CrawlRequest::get("https://x.test/2")).await.unwrap();
        assert!(matches!(held, Prepared::Held));
        assert_eq!(coord.held_len().await, 1);
    }

    #[tokio::test]
    async fn success_counter_grows_by_one_per_round_trip() {
        let coord = coordinator(&["a"], Duration::from_secs(60))
            .with_classifier(Arc::new(|_: &u16| Verdict::new(false, false)));

        for expected in 0..5u64 {
            let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());
            assert_eq!(req.binding.as_ref().unwrap().success_count, expected);
            assert!(matches!(coord.complete(req, 200).await, Completion::Accepted(200)));
        }

        let counts = coord.pool().counts().await;
        assert_eq!((counts.live, counts.dead), (1, 0));
        let lease = coord.pool().acquire().await.unwrap();
        assert_eq!(lease.success_count, 5);
    }

    #[tokio::test]
    async fn retry_returns_unbound_request() {
        let coord = coordinator(&["a", "b"], Duration::from_secs(60))
            .with_classifier(Arc::new(|status: &u16| {
                if *status == 429 {
                    Verdict::new(true, true)
                } else {
                    Verdict::new(false, false)
                }
            }));

        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());
        let id = req.id.clone();
        let retry = match coord.complete(req, 429).await {
            Completion::Retry(req) => req,
            Completion::Accepted(_) => panic!("429 must be retried"),
        };
        assert_eq!(retry.id, id);
        assert!(retry.binding.is_none());
        assert!(!retry.oauth);
        assert!(retry.headers.get(AUTHORIZATION).is_none());

        let again = dispatched(coord.prepare(retry).await.unwrap());
        assert_eq!(signer_label(&again), "b");
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn retry_limit_accepts_last_response() {
        let coord = coordinator(&["a", "b", "c"], Duration::ZERO)
            .with_classifier(Arc::new(|_: &u16| Verdict::new(true, true)))
            .with_max_attempts(2);

        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());
        let req = match coord.complete(req, 429).await {
            Completion::Retry(req) => req,
            Completion::Accepted(_) => panic!("first failure should retry"),
        };
        let req = dispatched(coord.prepare(req).await.unwrap());
        assert!(matches!(coord.complete(req, 429).await, Completion::Accepted(429)));
    }

    #[tokio::test]
    async fn unsigned_requests_pass_through() {
        let coord = coordinator(&["a"], Duration::ZERO);
        let outcome = coord.complete(CrawlRequest::get("https://x.test/"), 204).await;
        assert!(matches!(outcome, Completion::Accepted(204)));
        assert_eq!(coord.pool().counts().await.in_flight, 0);
    }

    #[tokio::test]
    async fn signing_error_restores_token() {
        let coord = coordinator(&["a", "b"], Duration::from_secs(60));
        let err = coord.prepare(CrawlRequest::get("not a url")).await.unwrap_err();
        assert!(matches!(err, crate::Error::Signing(_)), "got: {err:?}");

        let counts = coord.pool().counts().await;
        assert_eq!(counts.in_flight, 0);
        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());
        assert_eq!(signer_label(&req), "a");
    }

    #[tokio::test]
    async fn idle_with_nothing_held_is_a_noop() {
        let coord = coordinator(&["a"], Duration::from_secs(60));
        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());
        coord.complete(req, 200).await;

        let start = tokio::time::Instant::now();
        assert!(matches!(coord.on_idle().await, IdleDecision::Idle));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_waits_for_cooldown_then_releases_in_order() {
        let coord = coordinator(&["a"], Duration::from_secs(60));
        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/0")).await.unwrap());
        coord.complete(req, 200).await;

        for i in 1..=3 {
            let held = coord
                .prepare(CrawlRequest::get(format!("https://x.test/{i}")))
                .await
                .unwrap();
            assert!(matches!(held, Prepared::Held));
        }

        let start = tokio::time::Instant::now();
        let released = match coord.on_idle().await {
            IdleDecision::KeepRunning(requests) => requests,
            IdleDecision::Idle => panic!("held requests must keep the host running"),
        };
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        let urls: Vec<&str> = released.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://x.test/1", "https://x.test/2", "https://x.test/3"]
        );
        assert_eq!(coord.held_len().await, 0);

        let mut released = released.into_iter();
        let first = released.next().unwrap();
        let req = dispatched(coord.prepare(first).await.unwrap());
        assert_eq!(signer_label(&req), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_skips_wait_when_live_tokens_exist() {
        let coord = coordinator(&["a", "b"], Duration::from_secs(600))
            .with_classifier(Arc::new(|_: &u16| Verdict::new(false, false)));
        let a = dispatched(coord.prepare(CrawlRequest::get("https://x.test/a")).await.unwrap());
        let b = dispatched(coord.prepare(CrawlRequest::get("https://x.test/b")).await.unwrap());
        assert!(matches!(
            coord.prepare(CrawlRequest::get("https://x.test/c")).await.unwrap(),
            Prepared::Held
        ));
        coord.complete(a, 200).await;
        coord.complete(b, 200).await;

        let start = tokio::time::Instant::now();
        assert!(matches!(coord.on_idle().await, IdleDecision::KeepRunning(ref r) if r.len() == 1));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_releases_without_wait_when_every_token_is_in_flight() {
        let coord = coordinator(&["a"], Duration::from_secs(600));
        let _in_flight = dispatched(coord.prepare(CrawlRequest::get("https://x.test/a")).await.unwrap());
        assert!(matches!(
            coord.prepare(CrawlRequest::get("https://x.test/b")).await.unwrap(),
            Prepared::Held
        ));

        let start = tokio::time::Instant::now();
        assert!(matches!(coord.on_idle().await, IdleDecision::KeepRunning(ref r) if r.len() == 1));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn two_token_window_scenario() {
        // Manual clock: retire both at t=0, nothing at t=0, "a" at t=60s.
        let clock = ManualClock::new();
        let pool = TokenPool::new(
            tokens(&["a", "b"]),
            CooldownWindow::from_minutes(1),
            clock.clone(),
        )
        .unwrap();
        let coord: RetryCoordinator<u16, ManualClock> =
            RetryCoordinator::new(Arc::new(pool), Arc::new(HmacSha1Signer::new()));

        let a = dispatched(coord.prepare(CrawlRequest::get("https://x.test/a")).await.unwrap());
        let b = dispatched(coord.prepare(CrawlRequest::get("https://x.test/b")).await.unwrap());
        assert_eq!(signer_label(&a), "a");
        assert_eq!(signer_label(&b), "b");
        coord.complete(a, 200).await;
        coord.complete(b, 200).await;

        assert!(coord.pool().acquire().await.is_none());
        clock.advance(Duration::from_secs(60));
        assert_eq!(coord.pool().acquire().await.unwrap().token.label(), "a");
    }

    #[tokio::test]
    async fn idle_wait_runs_on_the_pool_clock() {
        let clock = ManualClock::new();
        let pool = TokenPool::new(tokens(&["a"]), CooldownWindow::from_minutes(1), clock.clone())
            .unwrap();
        let coord: RetryCoordinator<u16, ManualClock> =
            RetryCoordinator::new(Arc::new(pool), Arc::new(HmacSha1Signer::new()));

        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/a")).await.unwrap());
        coord.complete(req, 200).await;
        assert!(matches!(
            coord.prepare(CrawlRequest::get("https://x.test/b")).await.unwrap(),
            Prepared::Held
        ));

        let wall = std::time::Instant::now();
        let released = match coord.on_idle().await {
            IdleDecision::KeepRunning(requests) => requests,
            IdleDecision::Idle => panic!("held request must keep the host running"),
        };
        assert!(wall.elapsed() < Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
        assert_eq!(released.len(), 1);

        let req = dispatched(coord.prepare(released.into_iter().next().unwrap()).await.unwrap());
        assert_eq!(signer_label(&req), "a");
        assert_eq!(req.url, "https://x.test/b");
    }

    #[tokio::test]
    async fn emits_pool_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let coord = coordinator(&["a"], Duration::from_secs(60));
        let req = dispatched(coord.prepare(CrawlRequest::get("https://x.test/")).await.unwrap());
        let _ = coord.prepare(CrawlRequest::get("https://x.test/held")).await.unwrap();
        coord.complete(req, 200).await;

        let output = handle.render();
        assert!(output.contains("oauth_tokens_acquired_total"), "{output}");
        assert!(output.contains("source=\"dead\""), "{output}");
        assert!(output.contains("oauth_tokens_retired_total"), "{output}");
        assert!(output.contains("oauth_requests_held_total"), "{output}");
    }
}
