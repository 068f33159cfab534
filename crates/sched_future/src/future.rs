//! The **ListenableFuture** (spec §2, ≈15%; §4.3): the completion
//! handle attached to every submission.
//!
//! Ownership follows spec §3/§9: the returned [`ListenableFuture`] and
//! the scheduler-internal [`FutureWriter`] both point at one shared
//! `FutureInner`; there is no task-to-future cycle because the
//! future's "remove me from the queue" hook is a plain boxed closure,
//! not a pointer back into the task record.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use sched_errors::{SchedResult, SchedulerError};

use crate::token::CancellationToken;

/// The payload handed to an [`ListenableFuture::on_complete`]
/// callback. Cancellation is reported as `Failure(Cancelled)` so a
/// callback consumer only ever needs to handle the two cases named by
/// spec invariant 4 (`handleResult`/`handleFailure`).
pub enum Completion<T> {
    /// The payload produced a value.
    Success(T),
    /// The payload failed, was cancelled, or timed out before it
    /// could run.
    Failure(SchedulerError),
}

enum FutureState<T> {
    Pending,
    Completed(T),
    Failed(SchedulerError),
    Cancelled,
}

impl<T> FutureState<T> {
    fn is_terminal(&self) -> bool {
        !matches!(self, FutureState::Pending)
    }
}

type Callback<T> = Box<dyn FnOnce(Completion<T>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct Internal<T> {
    state: FutureState<T>,
    callbacks: Vec<Callback<T>>,
    running: bool,
    cancel_hook: Option<CancelHook>,
}

struct FutureInner<T> {
    guard: Mutex<Internal<T>>,
    condvar: Condvar,
    token: CancellationToken,
}

/// The caller-facing completion handle.
pub struct ListenableFuture<T: Clone + Send + 'static> {
    inner: Arc<FutureInner<T>>,
}

impl<T: Clone + Send + 'static> Clone for ListenableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The scheduler-facing write handle. Not exposed to callers.
pub struct FutureWriter<T: Clone + Send + 'static> {
    inner: Arc<FutureInner<T>>,
}

impl<T: Clone + Send + 'static> Clone for FutureWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Creates a freshly pending future and its scheduler-side writer.
#[must_use]
pub fn new_future_pair<T: Clone + Send + 'static>() -> (FutureWriter<T>, ListenableFuture<T>) {
    let inner = Arc::new(FutureInner {
        guard: Mutex::new(Internal {
            state: FutureState::Pending,
            callbacks: Vec::new(),
            running: false,
            cancel_hook: None,
        }),
        condvar: Condvar::new(),
        token: CancellationToken::new(),
    });
    (
        FutureWriter {
            inner: inner.clone(),
        },
        ListenableFuture { inner },
    )
}

impl<T: Clone + Send + 'static> ListenableFuture<T> {
    /// Blocks until the future is terminal and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Cancelled`] if cancelled, or
    /// [`SchedulerError::ExecutionFailure`] if the payload failed.
    pub fn get(&self) -> SchedResult<T> {
        let mut internal = self.inner.guard.lock().unwrap();
        while matches!(internal.state, FutureState::Pending) {
            internal = self.inner.condvar.wait(internal).unwrap();
        }
        Self::read_terminal(&internal.state)
    }

    /// Blocks until the future is terminal or `timeout` elapses.
    ///
    /// A `timeout` of zero performs a single non-blocking probe. A
    /// negative `timeout` fails with [`SchedulerError::BadArgument`].
    /// This call never alters task state.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Timeout`] if still pending when the
    /// timeout elapses, in addition to the errors documented on
    /// [`ListenableFuture::get`].
    pub fn get_timeout(&self, timeout_millis: i64) -> SchedResult<T> {
        if timeout_millis < 0 {
            return Err(SchedulerError::bad_argument("timeout must be non-negative"));
        }

        let mut internal = self.inner.guard.lock().unwrap();
        if timeout_millis == 0 {
            return if matches!(internal.state, FutureState::Pending) {
                Err(SchedulerError::Timeout)
            } else {
                Self::read_terminal(&internal.state)
            };
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_millis as u64);
        while matches!(internal.state, FutureState::Pending) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SchedulerError::Timeout);
            }
            let (guard, timeout_result) =
                self.inner.condvar.wait_timeout(internal, remaining).unwrap();
            internal = guard;
            if timeout_result.timed_out() && matches!(internal.state, FutureState::Pending) {
                return Err(SchedulerError::Timeout);
            }
        }
        Self::read_terminal(&internal.state)
    }

    fn read_terminal(state: &FutureState<T>) -> SchedResult<T> {
        match state {
            FutureState::Completed(value) => Ok(value.clone()),
            FutureState::Failed(err) => Err(err.clone()),
            FutureState::Cancelled => Err(SchedulerError::Cancelled),
            FutureState::Pending => unreachable!("caller waited for terminal state"),
        }
    }

    /// Attempts to cancel the task backing this future.
    ///
    /// Returns `true` if the future was pending (removed from its
    /// queue and marked cancelled), or running with
    /// `interrupt_running = true` (the running payload's eventual
    /// result is discarded in favor of [`SchedulerError::Cancelled`],
    /// and its [`CancellationToken`] is flagged so cooperative code
    /// can stop early — the worker cannot forcibly preempt it).
    /// Returns `false` if already terminal, or running without
    /// permission to interrupt.
    pub fn cancel(&self, interrupt_running: bool) -> bool {
        let (hook, cancelled) = {
            let mut internal = self.inner.guard.lock().unwrap();
            if internal.state.is_terminal() {
                (None, false)
            } else if internal.running && !interrupt_running {
                (None, false)
            } else {
                if interrupt_running {
                    self.inner.token.request_cancel();
                }
                let hook = internal.cancel_hook.take();
                internal.state = FutureState::Cancelled;
                (hook, true)
            }
        };

        if cancelled {
            self.publish_and_notify();
            if let Some(hook) = hook {
                hook();
            }
        }
        cancelled
    }

    /// Registers a callback invoked exactly once with this future's
    /// outcome: synchronously on the calling thread if already
    /// terminal, otherwise on whichever thread completes the future.
    /// Panics raised by `cb` are caught and logged; they never affect
    /// completion or other callbacks.
    pub fn on_complete(&self, cb: impl FnOnce(Completion<T>) + Send + 'static) {
        let boxed: Callback<T> = Box::new(cb);
        let mut internal = self.inner.guard.lock().unwrap();
        if internal.state.is_terminal() {
            let completion = Self::to_completion(&internal.state);
            drop(internal);
            Self::invoke_callback(boxed, completion);
        } else {
            internal.callbacks.push(boxed);
        }
    }

    fn to_completion(state: &FutureState<T>) -> Completion<T> {
        match state {
            FutureState::Completed(value) => Completion::Success(value.clone()),
            FutureState::Failed(err) => Completion::Failure(err.clone()),
            FutureState::Cancelled => Completion::Failure(SchedulerError::Cancelled),
            FutureState::Pending => unreachable!("checked is_terminal above"),
        }
    }

    fn invoke_callback(cb: Callback<T>, completion: Completion<T>) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(completion)));
        if let Err(payload) = result {
            sched_trace::log_error!(
                "onComplete callback panicked: {}",
                sched_errors::describe_panic_payload(payload.as_ref())
            );
        }
    }

    fn publish_and_notify(&self) {
        let callbacks = {
            let mut internal = self.inner.guard.lock().unwrap();
            std::mem::take(&mut internal.callbacks)
        };
        self.inner.condvar.notify_all();

        let completion_template = {
            let internal = self.inner.guard.lock().unwrap();
            Self::to_completion(&internal.state)
        };
        for cb in callbacks {
            let completion = match &completion_template {
                Completion::Success(v) => Completion::Success(v.clone()),
                Completion::Failure(e) => Completion::Failure(e.clone()),
            };
            Self::invoke_callback(cb, completion);
        }
    }

    /// True if this future's outcome is [`SchedulerError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.guard.lock().unwrap().state, FutureState::Cancelled)
    }

    /// True once the future has reached any terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.guard.lock().unwrap().state.is_terminal()
    }

    /// The cooperative cancellation token for the task backing this
    /// future.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

impl<T: Clone + Send + 'static> FutureWriter<T> {
    /// Completes the future with a value. No-op if already terminal
    /// (e.g. the future was concurrently cancelled).
    pub fn complete(&self, value: T) {
        let became_terminal = {
            let mut internal = self.inner.guard.lock().unwrap();
            if internal.state.is_terminal() {
                false
            } else {
                internal.state = FutureState::Completed(value);
                true
            }
        };
        if became_terminal {
            self.publish();
        }
    }

    /// Directly marks the future cancelled, without running a cancel
    /// hook — for a task the scheduler has already physically removed
    /// from its queue itself (e.g. `shutdownNow` draining every
    /// pending task at once). No-op if already terminal.
    pub fn cancel(&self) -> bool {
        let became_terminal = {
            let mut internal = self.inner.guard.lock().unwrap();
            if internal.state.is_terminal() {
                false
            } else {
                internal.state = FutureState::Cancelled;
                true
            }
        };
        if became_terminal {
            self.publish();
        }
        became_terminal
    }

    /// Fails the future with `err`. No-op if already terminal.
    pub fn fail(&self, err: SchedulerError) {
        let became_terminal = {
            let mut internal = self.inner.guard.lock().unwrap();
            if internal.state.is_terminal() {
                false
            } else {
                internal.state = FutureState::Failed(err);
                true
            }
        };
        if became_terminal {
            self.publish();
        }
    }

    fn publish(&self) {
        let as_listenable = ListenableFuture {
            inner: self.inner.clone(),
        };
        as_listenable.publish_and_notify();
    }

    /// True once this future has reached any terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.guard.lock().unwrap().state.is_terminal()
    }

    /// Marks the backing task as running, so a subsequent
    /// `cancel(true)` knows the cancel hook is no longer valid (the
    /// task has left its `DelayQueue`) and must instead rely on the
    /// cooperative [`CancellationToken`].
    pub fn mark_running(&self) {
        self.inner.guard.lock().unwrap().running = true;
    }

    /// Clears the `running` flag set by [`FutureWriter::mark_running`].
    /// Used by recurring tasks between ticks, while the task sits back
    /// in its `DelayQueue` waiting for the next run.
    pub fn mark_pending(&self) {
        self.inner.guard.lock().unwrap().running = false;
    }

    /// Installs (replacing any previous) the closure that removes
    /// this task from whichever `DelayQueue` currently holds it. Used
    /// by the scheduler each time a task (re-)enters `pending` state.
    pub fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.guard.lock().unwrap().cancel_hook = Some(Box::new(hook));
    }

    /// The cooperative cancellation token for the task backing this
    /// future.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn get_blocks_until_completed() {
        let (writer, future) = new_future_pair::<i32>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.complete(7);
        });
        assert_eq!(future.get().unwrap(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn get_timeout_zero_probes_without_blocking() {
        let (_writer, future) = new_future_pair::<i32>();
        assert!(matches!(future.get_timeout(0), Err(SchedulerError::Timeout)));
    }

    #[test]
    fn get_timeout_rejects_negative() {
        let (_writer, future) = new_future_pair::<i32>();
        assert!(matches!(
            future.get_timeout(-1),
            Err(SchedulerError::BadArgument(_))
        ));
    }

    #[test]
    fn get_timeout_expires_while_pending() {
        let (_writer, future) = new_future_pair::<i32>();
        assert!(matches!(future.get_timeout(10), Err(SchedulerError::Timeout)));
    }

    #[test]
    fn cancel_pending_invokes_hook_and_completes_cancelled() {
        let (writer, future) = new_future_pair::<i32>();
        let hook_called = Arc::new(AtomicUsize::new(0));
        let hook_called_clone = hook_called.clone();
        writer.set_cancel_hook(move || {
            hook_called_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(future.cancel(false));
        assert!(future.is_cancelled());
        assert_eq!(hook_called.load(Ordering::SeqCst), 1);
        assert!(matches!(future.get(), Err(SchedulerError::Cancelled)));
    }

    #[test]
    fn cancel_twice_returns_true_at_most_once() {
        let (_writer, future) = new_future_pair::<i32>();
        assert!(future.cancel(false));
        assert!(!future.cancel(false));
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let (writer, future) = new_future_pair::<i32>();
        writer.complete(1);
        assert!(!future.cancel(true));
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn cancel_running_without_interrupt_permission_fails() {
        let (writer, future) = new_future_pair::<i32>();
        writer.mark_running();
        assert!(!future.cancel(false));
        writer.complete(5);
        assert_eq!(future.get().unwrap(), 5);
    }

    #[test]
    fn cancel_running_with_interrupt_permission_wins_the_race() {
        let (writer, future) = new_future_pair::<i32>();
        writer.mark_running();
        let token = future.cancellation_token();
        assert!(future.cancel(true));
        assert!(token.is_cancelled());
        // The worker's eventual completion attempt is now a no-op.
        writer.complete(99);
        assert!(matches!(future.get(), Err(SchedulerError::Cancelled)));
    }

    #[test]
    fn on_complete_fires_synchronously_when_already_terminal() {
        let (writer, future) = new_future_pair::<i32>();
        writer.complete(3);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        future.on_complete(move |completion| {
            if let Completion::Success(v) = completion {
                seen_clone.store(v as usize, Ordering::SeqCst);
            }
        });
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn on_complete_fires_exactly_once_from_the_completing_thread() {
        let (writer, future) = new_future_pair::<i32>();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        future.on_complete(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        writer.complete(1);
        writer.complete(2); // no-op, already terminal
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn writer_cancel_marks_the_future_cancelled_without_a_hook() {
        let (writer, future) = new_future_pair::<i32>();
        assert!(writer.cancel());
        assert!(matches!(future.get(), Err(SchedulerError::Cancelled)));
        assert!(!writer.cancel()); // already terminal
    }

    #[test]
    fn on_complete_panic_is_swallowed() {
        let (writer, future) = new_future_pair::<i32>();
        future.on_complete(|_| panic!("boom"));
        writer.complete(1); // must not propagate the panic
        assert!(future.is_done());
    }
}
