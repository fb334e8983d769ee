//! Cooldown window math
//!
//! Remaining cooldown is a pure function of the window, the death time and the
//! current time, floored at zero. A token with no death time ("died infinitely
//! long ago") is always eligible, as is every token under a zero window.

use std::time::Duration;

use tokio::time::Instant;

/// Fixed duration a retired token waits before it may be drawn again.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow(Duration);

impl CooldownWindow {
    pub fn from_minutes(minutes: u64) -> Self {
        Self(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Cooldown left for a token that died at `died_at`, as seen at `now`.
    pub fn remaining(&self, died_at: Option<Instant>, now: Instant) -> Duration {
        match died_at {
            None => Duration::ZERO,
            Some(died_at) => self.0.saturating_sub(now.saturating_duration_since(died_at)),
        }
    }
}
