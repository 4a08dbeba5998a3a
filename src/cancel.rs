//! A first-class cancellation token threaded through the page pipeline
//! (spec §4.5 "Cancellation", §5, §9 "Ad-hoc cancellation via shared event").
//!
//! Replaces the source's ad-hoc shared `threading.Event` with an explicit,
//! cloneable token: reads are lock-free (`Ordering::Acquire`), and it is
//! set at most once per document run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal shared across every page task of one
/// document run. Cheap to clone (`Arc` inside); cloning shares the same
/// underlying flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token. Idempotent; safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
