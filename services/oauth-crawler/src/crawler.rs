//! Crawl host loop
//!
//! Schedules requests, runs them through the OAuth layers, fetches them
//! concurrently and feeds responses back to the retry coordinator. When nothing
//! is scheduled or in flight the coordinator's idle hook decides whether held
//! requests come back or the crawl ends.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use oauth_sign::{BearerAuth, CrawlRequest};
use tokio::sync::watch;
use tokio::task::{self, JoinSet};
use token_pool::{
    Completion, IdleDecision, Prepared, RetryCoordinator, Verdict, classify_status,
};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::metrics;
use crate::service::{CrawlerAction, CrawlerEvent, CrawlerState, handle_event};

/// What the crawler keeps of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub body_len: usize,
}

/// The response type the token pool classifies.
pub type FetchOutcome = Result<Page, FetchError>;

/// Status-code policy extended to transport failures: timeouts and refused
/// connections keep the token and retry, anything else is final.
pub fn status_policy(outcome: &FetchOutcome) -> Verdict {
    match outcome {
        Ok(page) => classify_status(page.status),
        Err(FetchError::Timeout | FetchError::Connect(_)) => Verdict::new(false, true),
        Err(FetchError::Other(_)) => Verdict::new(false, false),
    }
}

/// Totals reported when the crawl ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Pages accepted as final.
    pub pages: usize,
    /// Fetches that ended in a transport error and were accepted.
    pub errors: usize,
    /// Requests never dispatched: signing or transport policy refused them,
    /// or they were still queued at shutdown.
    pub dropped: usize,
    /// Times the idle hook released held requests.
    pub resumptions: u32,
}

impl CrawlSummary {
    fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            Ok(page) => {
                info!(url = %page.url, status = page.status, bytes = page.body_len, "page accepted");
                self.pages += 1;
            }
            Err(e) => {
                warn!(error = %e, "fetch failed");
                self.errors += 1;
            }
        }
    }
}

/// Drives one crawl from seeds to completion.
pub struct Crawler {
    client: reqwest::Client,
    timeout: Duration,
    max_in_flight: usize,
    oauth1: Option<Arc<RetryCoordinator<FetchOutcome>>>,
    oauth2: Option<BearerAuth>,
}

impl Crawler {
    pub fn new(client: reqwest::Client, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            client,
            timeout,
            max_in_flight: max_in_flight.max(1),
            oauth1: None,
            oauth2: None,
        }
    }

    pub fn with_oauth1(mut self, coordinator: Arc<RetryCoordinator<FetchOutcome>>) -> Self {
        self.oauth1 = Some(coordinator);
        self
    }

    pub fn with_oauth2(mut self, bearer: BearerAuth) -> Self {
        self.oauth2 = Some(bearer);
        self
    }

    /// Crawl `seeds` until the work runs out or `shutdown` flips to true.
    ///
    /// On shutdown no new requests are dispatched; fetches already in flight
    /// are awaited and settled before returning. Requests still queued at
    /// that point are counted as dropped.
    pub async fn run(
        &self,
        seeds: Vec<CrawlRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) -> CrawlSummary {
        let mut summary = CrawlSummary::default();
        let mut queue: VecDeque<CrawlRequest> = seeds.into();
        let mut tasks: JoinSet<FetchOutcome> = JoinSet::new();
        // Dispatched requests by fetch task, so a failed task still settles its token.
        let mut in_flight: HashMap<task::Id, CrawlRequest> = HashMap::new();
        let mut watching = true;

        let (mut state, action) = handle_event(CrawlerState::Initializing, CrawlerEvent::ConfigLoaded);
        if action != CrawlerAction::StartCrawl {
            return summary;
        }
        info!(seeds = queue.len(), max_in_flight = self.max_in_flight, "state: Crawling");

        loop {
            if *shutdown.borrow() && matches!(state, CrawlerState::Crawling { .. }) {
                let (new_state, action) = handle_event(state, CrawlerEvent::ShutdownSignal);
                state = new_state;
                info!(in_flight = tasks.len(), queued = queue.len(), "state: Draining");
                if matches!(action, CrawlerAction::Shutdown { .. }) {
                    break;
                }
            }

            if matches!(state, CrawlerState::Crawling { .. }) {
                while tasks.len() < self.max_in_flight {
                    let Some(request) = queue.pop_front() else {
                        break;
                    };
                    if let Some(request) = self.authorize(request, &mut summary).await {
                        let client = self.client.clone();
                        let timeout = self.timeout;
                        let outgoing = request.clone();
                        let handle = tasks
                            .spawn(async move { fetch(&client, &outgoing, timeout).await });
                        in_flight.insert(handle.id(), request);
                    }
                }
            }

            if tasks.is_empty() {
                let (new_state, action) = handle_event(state, CrawlerEvent::WorkDrained);
                state = new_state;
                match action {
                    CrawlerAction::NotifyIdle => {}
                    _ => break,
                }

                let decision = tokio::select! {
                    decision = self.notify_idle() => decision,
                    _ = stopped(shutdown.clone()) => {
                        let (new_state, _) = handle_event(state, CrawlerEvent::ShutdownSignal);
                        state = new_state;
                        info!("shutdown while idle");
                        break;
                    }
                };

                let event = match decision {
                    IdleDecision::KeepRunning(released) => {
                        let count = released.len();
                        queue.extend(released);
                        CrawlerEvent::HeldReleased { count }
                    }
                    IdleDecision::Idle => CrawlerEvent::NothingHeld,
                };
                let (new_state, action) = handle_event(state, event);
                state = new_state;
                match action {
                    CrawlerAction::Resubmit { count } => {
                        summary.resumptions += 1;
                        info!(count, resumptions = summary.resumptions, "resubmitting held requests");
                    }
                    _ => break,
                }
                continue;
            }

            tokio::select! {
                Some(joined) = tasks.join_next_with_id() => {
                    let (id, outcome) = match joined {
                        Ok((id, outcome)) => (id, outcome),
                        Err(e) => {
                            warn!(error = %e, "fetch task failed");
                            (e.id(), Err(FetchError::from(e)))
                        }
                    };
                    match in_flight.remove(&id) {
                        Some(request) => self.settle(request, outcome, &mut queue, &mut summary).await,
                        None => summary.record(&outcome),
                    }
                }
                changed = shutdown.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                }
            }
        }

        if !queue.is_empty() {
            warn!(count = queue.len(), "dropping requests queued at shutdown");
            summary.dropped += queue.len();
        }

        info!(?state, ?summary, "crawl finished");
        summary
    }

    /// Apply OAuth1 then OAuth2. `None` means the request was held or dropped.
    async fn authorize(
        &self,
        request: CrawlRequest,
        summary: &mut CrawlSummary,
    ) -> Option<CrawlRequest> {
        let mut request = match &self.oauth1 {
            Some(coordinator) => match coordinator.prepare(request).await {
                Ok(Prepared::Dispatch(request)) => request,
                Ok(Prepared::Held) => return None,
                Err(e) => {
                    warn!(error = %e, "dropping request that could not be signed");
                    summary.dropped += 1;
                    return None;
                }
            },
            None => request,
        };

        if let Some(bearer) = &self.oauth2 {
            if let Err(e) = bearer.attach(&mut request) {
                warn!(request_id = %request.id, error = %e, "dropping request");
                summary.dropped += 1;
                return None;
            }
        }
        Some(request)
    }

    async fn settle(
        &self,
        request: CrawlRequest,
        outcome: FetchOutcome,
        queue: &mut VecDeque<CrawlRequest>,
        summary: &mut CrawlSummary,
    ) {
        metrics::record_response(&outcome);
        let Some(coordinator) = &self.oauth1 else {
            summary.record(&outcome);
            return;
        };
        match coordinator.complete(request, outcome).await {
            Completion::Accepted(outcome) => summary.record(&outcome),
            Completion::Retry(request) => {
                debug!(request_id = %request.id, "requeueing request");
                queue.push_back(request);
            }
        }
    }

    async fn notify_idle(&self) -> IdleDecision {
        match &self.oauth1 {
            Some(coordinator) => coordinator.on_idle().await,
            None => IdleDecision::Idle,
        }
    }
}

async fn fetch(client: &reqwest::Client, request: &CrawlRequest, timeout: Duration) -> FetchOutcome {
    let mut builder = client
        .request(request.method.clone(), &request.url)
        .headers(request.headers.clone())
        .timeout(timeout);
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    Ok(Page {
        url: request.url.clone(),
        status,
        body_len: body.len(),
    })
}

/// Resolves once shutdown is requested; never if the sender is gone.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
