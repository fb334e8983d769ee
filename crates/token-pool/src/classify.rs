//! Response classification policies
//!
//! A classifier looks at whatever the host calls a response and answers two
//! independent questions: did this response kill the token, and should the
//! request be tried again. The pool never interprets responses itself.
//!
//! The default `SingleUse` policy retires the token after every response and
//! never retries, which cycles through the whole pool one request per token.
//! It also means success counts never grow past one under the default; hosts
//! that want long-lived tokens supply their own policy.

/// Outcome of classifying one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub token_dead: bool,
    pub retry: bool,
}

impl Verdict {
    pub const fn new(token_dead: bool, retry: bool) -> Self {
        Self { token_dead, retry }
    }
}

/// Decides token fate and retry for a response of type `R`.
pub trait Classifier<R>: Send + Sync {
    fn classify(&self, response: &R) -> Verdict;
}

impl<R, F> Classifier<R> for F
where
    F: Fn(&R) -> Verdict + Send + Sync,
{
    fn classify(&self, response: &R) -> Verdict {
        self(response)
    }
}

/// Retire the token after every response; never retry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleUse;

impl<R> Classifier<R> for SingleUse {
    fn classify(&self, _response: &R) -> Verdict {
        Verdict::new(true, false)
    }
}

/// Status-code policy for HTTP hosts.
///
/// 401/403 and 429 mean the token was rejected or rate-limited: retire it and
/// retry with another. 408 and 5xx are the server's problem: keep the token
/// and retry. Everything else is final and the token stays live.
pub fn classify_status(status: u16) -> Verdict {
    match status {
        401 | 403 | 429 => Verdict::new(true, true),
        408 | 500..=599 => Verdict::new(false, true),
        _ => Verdict::new(false, false),
    }
}
