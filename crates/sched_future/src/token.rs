//! Cooperative cancellation, in the style of a `CancellationToken`:
//! a payload that wants to respond to `cancel(true)` promptly can poll
//! [`CancellationToken::is_cancelled`] at convenient checkpoints. A
//! payload that never checks it simply runs to completion — the
//! worker cannot forcibly preempt a running closure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply cloneable handle a running payload can poll to notice a
/// `cancel(true)` request.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub(crate) fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn request_cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once `cancel(true)` has been requested against the task
    /// owning this token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear_and_latches_on_request() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_observe_the_same_request() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.request_cancel();
        assert!(clone.is_cancelled());
    }
}
