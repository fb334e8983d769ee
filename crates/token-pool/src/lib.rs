//! Rotating OAuth1 token pool for the crawler
//!
//! Keeps a set of OAuth1 credential bundles split into a live queue (usable
//! now) and a dead queue (cooling down after use or failure), and drives each
//! crawl request through acquire, sign, classify and recycle/retire. Requests
//! that find no usable token are held and released on the host's idle signal.
//!
//! Token lifecycle:
//! 1. All tokens start dead with no death time, so they are eligible at once
//! 2. `TokenPool::acquire()` hands out the oldest live token, else an eligible dead one
//! 3. The classifier decides whether the response killed the token
//! 4. Dead tokens wait out the cooldown window before they can be drawn again
//! 5. Live tokens go to the back of the live queue with their success count bumped

pub mod classify;
pub mod clock;
pub mod cooldown;
pub mod coordinator;
pub mod error;
pub mod pool;

pub use classify::{Classifier, SingleUse, Verdict, classify_status};
pub use clock::{Clock, ManualClock, TokioClock};
pub use cooldown::CooldownWindow;
pub use coordinator::{Completion, IdleDecision, Prepared, RetryCoordinator};
pub use error::{Error, Result};
pub use pool::{Lease, PoolCounts, TokenPool};
