//! The task payload (spec §3 "Task Record", §9 "Dynamic dispatch on
//! payloads"): either a side-effecting action with no return value,
//! or a value-producing computation of type `T`. Rendered here as a
//! single boxed closure plus a `kind` tag used only for logging —
//! there is no open-ended polymorphism and the scheduler never
//! subclasses payloads.

use crate::token::CancellationToken;

type BoxedJob<T> = Box<dyn FnOnce(CancellationToken) -> T + Send + 'static>;

/// Distinguishes an `Action` from a `Computation` payload for
/// diagnostics only; it carries no execution-time meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A side-effecting action with no return value (`T = ()`).
    Action,
    /// A value-producing computation.
    Computation,
}

/// A unit of work submitted to the scheduler.
pub struct Payload<T: Send + 'static> {
    kind: PayloadKind,
    job: BoxedJob<T>,
}

impl Payload<()> {
    /// Wraps a plain side-effecting action.
    pub fn action(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind: PayloadKind::Action,
            job: Box::new(move |_token| f()),
        }
    }

    /// Wraps a side-effecting action that wants to cooperatively
    /// observe cancellation via a [`CancellationToken`].
    pub fn action_with_token(f: impl FnOnce(CancellationToken) + Send + 'static) -> Self {
        Self {
            kind: PayloadKind::Action,
            job: Box::new(f),
        }
    }
}

impl<T: Send + 'static> Payload<T> {
    /// Wraps a value-producing computation.
    pub fn computation(f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            kind: PayloadKind::Computation,
            job: Box::new(move |_token| f()),
        }
    }

    /// Wraps a value-producing computation that wants to
    /// cooperatively observe cancellation via a [`CancellationToken`].
    pub fn computation_with_token(f: impl FnOnce(CancellationToken) -> T + Send + 'static) -> Self {
        Self {
            kind: PayloadKind::Computation,
            job: Box::new(f),
        }
    }

    /// The diagnostic kind of this payload.
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Runs the payload, consuming it. Not part of the public API —
    /// only the worker in `sched_core` is meant to call this.
    #[doc(hidden)]
    pub fn run(self, token: CancellationToken) -> T {
        (self.job)(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_runs_and_reports_its_kind() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let payload = Payload::action(move || ran_clone.store(true, std::sync::atomic::Ordering::SeqCst));
        assert_eq!(payload.kind(), PayloadKind::Action);
        payload.run(CancellationToken::new());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn computation_returns_its_value() {
        let payload = Payload::computation(|| 42);
        assert_eq!(payload.kind(), PayloadKind::Computation);
        assert_eq!(payload.run(CancellationToken::new()), 42);
    }

    #[test]
    fn computation_with_token_observes_cancellation() {
        let token = CancellationToken::new();
        token.request_cancel();
        let payload = Payload::computation_with_token(|tok: CancellationToken| tok.is_cancelled());
        assert!(payload.run(token));
    }
}
