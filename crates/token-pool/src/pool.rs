//! Live/dead token queues
//!
//! The pool holds every token in exactly one place: the live queue (usable
//! now, with its success count), the dead queue (cooling down, with its death
//! time), or in flight (handed out by `acquire` and not yet returned). Both
//! queues are FIFO; the dead queue is therefore also ordered by death time,
//! so only its front entry matters for eligibility.
//!
//! All four operations take the same mutex, so interleaved requests can never
//! observe a token in two places.

use std::collections::VecDeque;
use std::time::Duration;

use oauth_sign::{Token, TokenBinding};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::clock::{Clock, TokioClock};
use crate::cooldown::CooldownWindow;
use crate::error::{Error, Result};

#[derive(Debug)]
struct LiveEntry {
    token: Token,
    success_count: u64,
}

#[derive(Debug)]
struct DeadEntry {
    token: Token,
    /// `None` means the token has never been used.
    died_at: Option<Instant>,
}

#[derive(Debug)]
enum Origin {
    Live,
    Dead { died_at: Option<Instant> },
}

/// A token handed out by [`TokenPool::acquire`].
#[derive(Debug)]
pub struct Lease {
    pub token: Token,
    /// Successes recorded for this token so far; zero when drawn from dead.
    pub success_count: u64,
    origin: Origin,
}

impl Lease {
    /// Whether the token came from the live queue.
    pub fn from_live(&self) -> bool {
        matches!(self.origin, Origin::Live)
    }
}

impl From<Lease> for TokenBinding {
    fn from(lease: Lease) -> Self {
        TokenBinding {
            token: lease.token,
            success_count: lease.success_count,
        }
    }
}

/// Snapshot of where the pool's tokens are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub live: usize,
    pub dead: usize,
    /// Dead tokens whose cooldown has not elapsed yet.
    pub cooling_down: usize,
    pub in_flight: usize,
}

#[derive(Debug)]
struct PoolState {
    live: VecDeque<LiveEntry>,
    dead: VecDeque<DeadEntry>,
    in_flight: usize,
}

/// Rotating pool of OAuth1 tokens.
pub struct TokenPool<C: Clock = TokioClock> {
    state: Mutex<PoolState>,
    window: CooldownWindow,
    total: usize,
    clock: C,
}

impl TokenPool<TokioClock> {
    /// Pool reading tokio's clock.
    pub fn with_tokio_clock(tokens: Vec<Token>, window: CooldownWindow) -> Result<Self> {
        Self::new(tokens, window, TokioClock)
    }
}

impl<C: Clock> TokenPool<C> {
    /// Create a pool from a non-empty token list.
    ///
    /// Every token starts in the dead queue with no death time, so all of
    /// them are immediately eligible, in the order given.
    pub fn new(tokens: Vec<Token>, window: CooldownWindow, clock: C) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::Configuration(
                "at least one oauth1 token is required".into(),
            ));
        }
        let total = tokens.len();
        let dead = tokens
            .into_iter()
            .map(|token| DeadEntry {
                token,
                died_at: None,
            })
            .collect();
        info!(
            tokens = total,
            cooldown_secs = window.duration().as_secs(),
            "token pool initialized"
        );
        Ok(Self {
            state: Mutex::new(PoolState {
                live: VecDeque::new(),
                dead,
                in_flight: 0,
            }),
            window,
            total,
            clock,
        })
    }

    /// Take the next usable token without waiting.
    ///
    /// Live tokens are preferred, oldest-recycled first. Otherwise the front
    /// dead token is returned once its cooldown has elapsed, with its success
    /// count reset. `None` means nothing is usable right now.
    pub async fn acquire(&self) -> Option<Lease> {
        let mut state = self.state.lock().await;

        let lease = if let Some(entry) = state.live.pop_front() {
            Lease {
                token: entry.token,
                success_count: entry.success_count,
                origin: Origin::Live,
            }
        } else {
            let front = state.dead.front()?;
            if !self.window.remaining(front.died_at, self.clock.now()).is_zero() {
                return None;
            }
            let entry = state.dead.pop_front()?;
            Lease {
                token: entry.token,
                success_count: 0,
                origin: Origin::Dead {
                    died_at: entry.died_at,
                },
            }
        };

        state.in_flight += 1;
        let source = if lease.from_live() { "live" } else { "dead" };
        metrics::counter!("oauth_tokens_acquired_total", "source" => source).increment(1);
        debug!(
            token = lease.token.label(),
            source,
            success_count = lease.success_count,
            "token acquired"
        );
        Some(lease)
    }

    /// Return a token to the back of the live queue.
    pub async fn recycle(&self, token: Token, success_count: u64) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        debug!(token = token.label(), success_count, "token recycled");
        state.live.push_back(LiveEntry {
            token,
            success_count,
        });
        metrics::counter!("oauth_tokens_recycled_total").increment(1);
        metrics::gauge!("oauth_tokens_live").set(state.live.len() as f64);
    }

    /// Move a token to the back of the dead queue, stamped with the current time.
    pub async fn retire(&self, token: Token) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        debug!(
            token = token.label(),
            cooldown_secs = self.window.duration().as_secs(),
            "token retired"
        );
        state.dead.push_back(DeadEntry {
            token,
            died_at: Some(self.clock.now()),
        });
        metrics::counter!("oauth_tokens_retired_total").increment(1);
        metrics::gauge!("oauth_tokens_dead").set(state.dead.len() as f64);
    }

    /// Undo an `acquire` whose request never went out.
    ///
    /// The token goes back to the front of the queue it came from with its
    /// original success count or death time.
    pub async fn restore(&self, lease: Lease) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        match lease.origin {
            Origin::Live => state.live.push_front(LiveEntry {
                token: lease.token,
                success_count: lease.success_count,
            }),
            Origin::Dead { died_at } => state.dead.push_front(DeadEntry {
                token: lease.token,
                died_at,
            }),
        }
    }

    /// Time until the oldest dead token becomes eligible.
    ///
    /// `None` when the dead queue is empty: waiting will never free a token.
    pub async fn earliest_dead_cooldown_remaining(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .dead
            .front()
            .map(|entry| self.window.remaining(entry.died_at, self.clock.now()))
    }

    pub async fn has_live(&self) -> bool {
        !self.state.lock().await.live.is_empty()
    }

    pub async fn counts(&self) -> PoolCounts {
        let state = self.state.lock().await;
        let now = self.clock.now();
        let cooling_down = state
            .dead
            .iter()
            .filter(|entry| !self.window.remaining(entry.died_at, now).is_zero())
            .count();
        PoolCounts {
            total: self.total,
            live: state.live.len(),
            dead: state.dead.len(),
            cooling_down,
            in_flight: state.in_flight,
        }
    }

    /// Number of tokens the pool was created with.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn window(&self) -> CooldownWindow {
        self.window
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Pool health summary for the health endpoint.
    ///
    /// Healthy when a token can be acquired right now, degraded when none can
    /// but some are in flight and may come back live, unhealthy otherwise.
    pub async fn health(&self) -> serde_json::Value {
        let counts = self.counts().await;
        let next_available = self.earliest_dead_cooldown_remaining().await;
        let eligible = counts.live + (counts.dead - counts.cooling_down);

        let status = if eligible > 0 {
            "healthy"
        } else if counts.in_flight > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "tokens_total": counts.total,
            "tokens_live": counts.live,
            "tokens_dead": counts.dead,
            "tokens_cooling_down": counts.cooling_down,
            "tokens_in_flight": counts.in_flight,
            "next_available_secs": next_available.map(|d| d.as_secs()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn token(name: &str) -> Token {
        Token::new(
            format!("ck-{name}"),
            format!("cs-{name}"),
            name,
            format!("rs-{name}"),
        )
    }

    fn pool(names: &[&str], window_secs: u64) -> (TokenPool<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let pool = TokenPool::new(
            names.iter().map(|n| token(n)).collect(),
            CooldownWindow::from_duration(Duration::from_secs(window_secs)),
            clock.clone(),
        )
        .unwrap();
        (pool, clock)
    }

    async fn assert_conserved(pool: &TokenPool<ManualClock>) {
        let c = pool.counts().await;
        assert_eq!(c.live + c.dead + c.in_flight, c.total, "counts: {c:?}");
    }

    #[test]
    fn zero_tokens_is_configuration_error() {
        let result = TokenPool::new(vec![], CooldownWindow::default(), ManualClock::new());
        let err = result.err().unwrap();
        assert!(matches!(err, Error::Configuration(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn fresh_tokens_come_out_in_order() {
        let (pool, _) = pool(&["a", "b"], 60);
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!(first.token.label(), "a");
        assert_eq!(second.token.label(), "b");
        assert!(!first.from_live());
        assert_eq!(first.success_count, 0);
        assert!(pool.acquire().await.is_none());
        assert_conserved(&pool).await;
    }

    #[tokio::test]
    async fn retired_tokens_wait_out_the_window() {
        let (pool, clock) = pool(&["a", "b"], 60);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.retire(a.token).await;
        pool.retire(b.token).await;

        assert!(pool.acquire().await.is_none());

        clock.advance(Duration::from_secs(59));
        assert!(pool.acquire().await.is_none());

        clock.advance(Duration::from_secs(1));
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.token.label(), "a");
        assert_conserved(&pool).await;
    }

    #[tokio::test]
    async fn live_is_preferred_over_eligible_dead() {
        let (pool, _) = pool(&["a", "b", "c"], 0);
        let a = pool.acquire().await.unwrap();
        pool.recycle(a.token, 1).await;

        let next = pool.acquire().await.unwrap();
        assert_eq!(next.token.label(), "a");
        assert!(next.from_live());
        assert_eq!(next.success_count, 1);
    }

    #[tokio::test]
    async fn live_queue_is_fifo() {
        let (pool, _) = pool(&["a", "b", "c"], 3600);
        let mut leases = Vec::new();
        while let Some(lease) = pool.acquire().await {
            leases.push(lease);
        }
        // Recycle in a different order than acquired.
        for idx in [2, 0, 1] {
            let lease = &leases[idx];
            pool.recycle(lease.token.clone(), idx as u64).await;
        }
        let mut order = Vec::new();
        for _ in 0..3 {
            let lease = pool.acquire().await.unwrap();
            order.push((lease.token.label().to_string(), lease.success_count));
        }
        assert_eq!(
            order,
            vec![
                ("c".to_string(), 2u64),
                ("a".to_string(), 0u64),
                ("b".to_string(), 1u64)
            ]
        );
    }

    #[tokio::test]
    async fn zero_window_makes_dead_tokens_reusable_at_once() {
        let (pool, _) = pool(&["a"], 0);
        let a = pool.acquire().await.unwrap();
        pool.retire(a.token).await;
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.token.label(), "a");
        assert_eq!(again.success_count, 0);
    }

    #[tokio::test]
    async fn only_front_dead_entry_gates_acquire() {
        let (pool, clock) = pool(&["a", "b"], 60);
        let a = pool.acquire().await.unwrap();
        pool.retire(a.token).await;
        clock.advance(Duration::from_secs(30));
        let b = pool.acquire().await.unwrap();
        pool.retire(b.token).await;

        assert_eq!(
            pool.earliest_dead_cooldown_remaining().await,
            Some(Duration::from_secs(30))
        );

        clock.advance(Duration::from_secs(30));
        assert_eq!(pool.acquire().await.unwrap().token.label(), "a");
        assert!(pool.acquire().await.is_none());
        assert_eq!(
            pool.earliest_dead_cooldown_remaining().await,
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn empty_dead_queue_has_no_finite_wait() {
        let (pool, _) = pool(&["a"], 60);
        let a = pool.acquire().await.unwrap();
        assert_eq!(pool.earliest_dead_cooldown_remaining().await, None);
        pool.recycle(a.token, 1).await;
        assert_eq!(pool.earliest_dead_cooldown_remaining().await, None);
        assert!(pool.has_live().await);
    }

    #[tokio::test]
    async fn restore_puts_token_back_where_it_was() {
        let (pool, clock) = pool(&["a", "b"], 60);
        let a = pool.acquire().await.unwrap();
        pool.retire(a.token).await;
        clock.advance(Duration::from_secs(60));

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.token.label(), "b");
        pool.restore(lease).await;

        // "b" never died, so it is eligible again and still ahead of "a".
        assert_eq!(pool.acquire().await.unwrap().token.label(), "b");
        let counts = pool.counts().await;
        assert_eq!(counts.in_flight, 1);
        assert_conserved(&pool).await;
    }

    #[tokio::test]
    async fn conservation_holds_through_mixed_traffic() {
        let (pool, clock) = pool(&["a", "b", "c", "d"], 10);
        for round in 0..20u64 {
            if let Some(lease) = pool.acquire().await {
                assert_conserved(&pool).await;
                if round % 3 == 0 {
                    pool.retire(lease.token).await;
                } else {
                    pool.recycle(lease.token, lease.success_count + 1).await;
                }
            }
            assert_conserved(&pool).await;
            clock.advance(Duration::from_secs(4));
        }
    }

    #[tokio::test]
    async fn health_reports_counts_and_status() {
        let (pool, clock) = pool(&["a", "b"], 60);
        let health = pool.health().await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["tokens_total"], 2);
        assert_eq!(health["tokens_dead"], 2);
        assert_eq!(health["tokens_cooling_down"], 0);
        assert_eq!(health["next_available_secs"], 0);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.retire(a.token).await;
        let health = pool.health().await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["tokens_in_flight"], 1);
        assert_eq!(health["next_available_secs"], 60);

        pool.retire(b.token).await;
        clock.advance(Duration::from_secs(15));
        let health = pool.health().await;
        assert_eq!(health["status"], "unhealthy");
        assert_eq!(health["tokens_cooling_down"], 2);
        assert_eq!(health["next_available_secs"], 45);
    }
}
