//! Crawler lifecycle state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The crawl loop executes whatever I/O each action implies.

/// Crawler lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerState {
    /// Config loaded, pool not yet used
    Initializing,
    /// Scheduling, signing and fetching requests
    Crawling { resumptions: u32 },
    /// Nothing scheduled or in flight; waiting on the idle hook's answer
    Idle { resumptions: u32 },
    /// Shutdown requested, letting in-flight fetches finish
    Draining,
    /// Terminal state
    Stopped { exit_code: i32 },
}

/// Events that drive state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerEvent {
    /// Configuration parsed and token pool built
    ConfigLoaded,
    /// Nothing left scheduled or in flight
    WorkDrained,
    /// Idle hook released held requests
    HeldReleased { count: usize },
    /// Idle hook had nothing held
    NothingHeld,
    /// SIGTERM/SIGINT received
    ShutdownSignal,
}

/// Actions the crawl loop should execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerAction {
    /// Begin scheduling seed requests
    StartCrawl,
    /// Invoke the coordinator's idle hook
    NotifyIdle,
    /// Put released requests back on the schedule
    Resubmit { count: usize },
    /// Stop the crawl loop
    Shutdown { exit_code: i32 },
    /// No-op
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: CrawlerState, event: CrawlerEvent) -> (CrawlerState, CrawlerAction) {
    match (state, event) {
        // --- Initializing ---
        (CrawlerState::Initializing, CrawlerEvent::ConfigLoaded) => (
            CrawlerState::Crawling { resumptions: 0 },
            CrawlerAction::StartCrawl,
        ),

        // --- Crawling ---
        (CrawlerState::Crawling { resumptions }, CrawlerEvent::WorkDrained) => (
            CrawlerState::Idle { resumptions },
            CrawlerAction::NotifyIdle,
        ),

        (CrawlerState::Crawling { .. }, CrawlerEvent::ShutdownSignal) => {
            (CrawlerState::Draining, CrawlerAction::None)
        }

        // --- Idle ---
        (CrawlerState::Idle { resumptions }, CrawlerEvent::HeldReleased { count }) => (
            CrawlerState::Crawling {
                resumptions: resumptions + 1,
            },
            CrawlerAction::Resubmit { count },
        ),

        (CrawlerState::Idle { .. }, CrawlerEvent::NothingHeld) => (
            CrawlerState::Stopped { exit_code: 0 },
            CrawlerAction::Shutdown { exit_code: 0 },
        ),

        // --- Draining ---
        (CrawlerState::Draining, CrawlerEvent::WorkDrained) => (
            CrawlerState::Stopped { exit_code: 0 },
            CrawlerAction::Shutdown { exit_code: 0 },
        ),

        // --- Any other state + shutdown = stop ---
        (CrawlerState::Draining, CrawlerEvent::ShutdownSignal) => {
            (CrawlerState::Draining, CrawlerAction::None)
        }
        (_, CrawlerEvent::ShutdownSignal) => (
            CrawlerState::Stopped { exit_code: 0 },
            CrawlerAction::Shutdown { exit_code: 0 },
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, CrawlerAction::None),
    }
}
