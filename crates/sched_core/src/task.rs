//! The task record (spec §3 "Task Record"): an object-safe
//! [`SchedulableTask`] trait type-erases the payload's result type `T`
//! so one `DelayQueue` can carry one-shot and recurring tasks of
//! differing result types side by side. `TaskRef` is the cheaply
//! cloneable, `DelayItem`-implementing handle the queues actually
//! store — a local newtype around `Arc<dyn SchedulableTask>`, since
//! the orphan rules forbid implementing a foreign trait directly on
//! `Arc<dyn Trait>`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use sched_clock::Clock;
use sched_delayqueue::DelayItem;
use sched_errors::SchedulerError;
use sched_future::{CancellationToken, FutureWriter, Payload, Priority};

/// Object-safe view of a queued unit of work. Every method is
/// dispatch-only plumbing; the actual payload/action lives behind
/// interior mutability inside the concrete implementor.
pub(crate) trait SchedulableTask: Send + Sync {
    fn sequence(&self) -> u64;
    fn priority(&self) -> Priority;
    fn ready_at_millis(&self) -> i64;
    fn mark_running(&self);
    fn mark_pending(&self);
    fn is_terminal(&self) -> bool;
    fn set_cancel_hook(&self, hook: Box<dyn FnOnce() + Send>);
    /// Directly marks this task's future cancelled, without consulting
    /// or running its cancel hook. Used when the scheduler has already
    /// physically removed the task from its queue by other means (a
    /// bulk drain on `shutdownNow`).
    fn cancel(&self) -> bool;
    /// Executes one run. Returns `true` if this task should be
    /// re-offered into its priority queue (a recurring task whose
    /// future is still pending), `false` if it is done for good.
    fn run(&self) -> bool;
}

/// The handle a [`sched_delayqueue::DelayQueue`] actually stores.
#[derive(Clone)]
pub(crate) struct TaskRef(pub(crate) Arc<dyn SchedulableTask>);

impl DelayItem for TaskRef {
    fn ready_at_millis(&self) -> i64 {
        self.0.ready_at_millis()
    }
    fn sequence(&self) -> u64 {
        self.0.sequence()
    }
}

impl std::ops::Deref for TaskRef {
    type Target = dyn SchedulableTask;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// A one-shot task: payload runs at most once.
pub(crate) struct OneShotEntry<T: Clone + Send + 'static> {
    sequence: u64,
    priority: Priority,
    ready_at: i64,
    writer: FutureWriter<T>,
    payload: Mutex<Option<Payload<T>>>,
}

impl<T: Clone + Send + 'static> OneShotEntry<T> {
    pub(crate) fn new(
        sequence: u64,
        priority: Priority,
        ready_at: i64,
        writer: FutureWriter<T>,
        payload: Payload<T>,
    ) -> Self {
        Self {
            sequence,
            priority,
            ready_at,
            writer,
            payload: Mutex::new(Some(payload)),
        }
    }
}

impl<T: Clone + Send + 'static> SchedulableTask for OneShotEntry<T> {
    fn sequence(&self) -> u64 {
        self.sequence
    }
    fn priority(&self) -> Priority {
        self.priority
    }
    fn ready_at_millis(&self) -> i64 {
        self.ready_at
    }
    fn mark_running(&self) {
        self.writer.mark_running();
    }
    fn mark_pending(&self) {
        self.writer.mark_pending();
    }
    fn is_terminal(&self) -> bool {
        self.writer.is_terminal()
    }
    fn set_cancel_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        self.writer.set_cancel_hook(hook);
    }
    fn cancel(&self) -> bool {
        self.writer.cancel()
    }
    fn run(&self) -> bool {
        let payload = self.payload.lock().unwrap().take();
        let Some(payload) = payload else {
            return false;
        };
        if self.writer.is_terminal() {
            return false;
        }
        let token = self.writer.token();
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| payload.run(token))) {
            Ok(value) => self.writer.complete(value),
            Err(panic_payload) => {
                let message = sched_errors::describe_panic_payload(panic_payload.as_ref());
                sched_trace::log_error!("task {} panicked: {message}", self.sequence);
                self.writer.fail(SchedulerError::execution_failure(message));
            }
        }
        false
    }
}

/// What makes a task repeat, and how its next `ready-at` is computed
/// (spec §4.2 "Recurring task semantics").
pub(crate) enum RecurrenceKind {
    /// Next `ready-at` is `completion_time + period_ms`.
    FixedDelay { period_ms: i64 },
    /// Next `ready-at` is `previous_tick + period_ms`, computed without
    /// reference to how long the run actually took — drift-free, and
    /// non-coalescing: an overrun run is immediately followed by
    /// however many back-to-back catch-up runs are needed.
    FixedRate { period_ms: i64, next_tick: i64 },
}

struct RecurringState {
    action: Box<dyn FnMut(CancellationToken) + Send>,
    kind: RecurrenceKind,
}

/// A repeating task: the same action runs every tick until it throws,
/// the future is cancelled, or the pool shuts down.
pub(crate) struct RecurringEntry {
    sequence: u64,
    priority: Priority,
    ready_at: AtomicI64,
    writer: FutureWriter<()>,
    clock: Arc<dyn Clock>,
    state: Mutex<RecurringState>,
}

impl RecurringEntry {
    pub(crate) fn new(
        sequence: u64,
        priority: Priority,
        first_ready_at: i64,
        writer: FutureWriter<()>,
        clock: Arc<dyn Clock>,
        action: Box<dyn FnMut(CancellationToken) + Send>,
        kind: RecurrenceKind,
    ) -> Self {
        Self {
            sequence,
            priority,
            ready_at: AtomicI64::new(first_ready_at),
            writer,
            clock,
            state: Mutex::new(RecurringState { action, kind }),
        }
    }
}

impl SchedulableTask for RecurringEntry {
    fn sequence(&self) -> u64 {
        self.sequence
    }
    fn priority(&self) -> Priority {
        self.priority
    }
    fn ready_at_millis(&self) -> i64 {
        self.ready_at.load(Ordering::SeqCst)
    }
    fn mark_running(&self) {
        self.writer.mark_running();
    }
    fn mark_pending(&self) {
        self.writer.mark_pending();
    }
    fn is_terminal(&self) -> bool {
        self.writer.is_terminal()
    }
    fn set_cancel_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        self.writer.set_cancel_hook(hook);
    }
    fn cancel(&self) -> bool {
        self.writer.cancel()
    }
    fn run(&self) -> bool {
        if self.writer.is_terminal() {
            return false;
        }
        let token = self.writer.token();
        let mut state = self.state.lock().unwrap();
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (state.action)(token.clone())));
        match result {
            Ok(()) => {
                if self.writer.is_terminal() || token.is_cancelled() {
                    return false;
                }
                let next_ready_at = match &mut state.kind {
                    RecurrenceKind::FixedDelay { period_ms } => self.clock.now_millis() + *period_ms,
                    RecurrenceKind::FixedRate { period_ms, next_tick } => {
                        *next_tick += *period_ms;
                        *next_tick
                    }
                };
                self.ready_at.store(next_ready_at, Ordering::SeqCst);
                true
            }
            Err(panic_payload) => {
                let message = sched_errors::describe_panic_payload(panic_payload.as_ref());
                sched_trace::log_error!("recurring task {} panicked: {message}", self.sequence);
                self.writer.fail(SchedulerError::execution_failure(message));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_clock::TestClock;
    use sched_future::new_future_pair;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_shot_entry_completes_writer_with_the_payload_result() {
        let (writer, future) = new_future_pair::<i32>();
        let entry = OneShotEntry::new(1, Priority::High, 0, writer, Payload::computation(|| 42));
        assert!(!entry.run());
        assert_eq!(future.get().unwrap(), 42);
    }

    #[test]
    fn one_shot_entry_catches_panics_as_execution_failure() {
        let (writer, future) = new_future_pair::<i32>();
        let entry = OneShotEntry::new(
            1,
            Priority::High,
            0,
            writer,
            Payload::computation(|| panic!("boom")),
        );
        assert!(!entry.run());
        assert!(matches!(future.get(), Err(SchedulerError::ExecutionFailure { .. })));
    }

    #[test]
    fn one_shot_entry_skips_running_an_already_cancelled_task() {
        let (writer, future) = new_future_pair::<i32>();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let entry = OneShotEntry::new(
            1,
            Priority::High,
            0,
            writer,
            Payload::computation(move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                0
            }),
        );
        assert!(future.cancel(false));
        assert!(!entry.run());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recurring_fixed_delay_advances_ready_at_from_completion_time() {
        let clock = Arc::new(TestClock::new(1_000));
        let (writer, _future) = new_future_pair::<()>();
        let entry = RecurringEntry::new(
            1,
            Priority::High,
            1_000,
            writer,
            clock.clone(),
            Box::new(|_token| {}),
            RecurrenceKind::FixedDelay { period_ms: 50 },
        );
        clock.advance(5);
        assert!(entry.run());
        assert_eq!(entry.ready_at_millis(), 1_005 + 50);
    }

    #[test]
    fn recurring_fixed_rate_is_independent_of_when_the_run_finishes() {
        let clock = Arc::new(TestClock::new(0));
        let (writer, _future) = new_future_pair::<()>();
        let entry = RecurringEntry::new(
            1,
            Priority::High,
            100,
            writer,
            clock.clone(),
            Box::new(|_token| {}),
            RecurrenceKind::FixedRate {
                period_ms: 100,
                next_tick: 100,
            },
        );
        clock.advance(9_999); // the run "took" a very long time
        assert!(entry.run());
        assert_eq!(entry.ready_at_millis(), 200);
        clock.advance(1);
        assert!(entry.run());
        assert_eq!(entry.ready_at_millis(), 300);
    }

    #[test]
    fn recurring_task_that_panics_stops_recurring_and_fails_its_future() {
        let clock = Arc::new(TestClock::new(0));
        let (writer, future) = new_future_pair::<()>();
        let entry = RecurringEntry::new(
            1,
            Priority::High,
            0,
            writer,
            clock,
            Box::new(|_token| panic!("boom")),
            RecurrenceKind::FixedDelay { period_ms: 10 },
        );
        assert!(!entry.run());
        assert!(matches!(future.get(), Err(SchedulerError::ExecutionFailure { .. })));
    }

    #[test]
    fn recurring_task_stops_once_its_future_is_cancelled() {
        let clock = Arc::new(TestClock::new(0));
        let (writer, future) = new_future_pair::<()>();
        let entry = RecurringEntry::new(
            1,
            Priority::High,
            0,
            writer,
            clock,
            Box::new(|_token| {}),
            RecurrenceKind::FixedDelay { period_ms: 10 },
        );
        assert!(future.cancel(true));
        assert!(!entry.run());
    }
}
