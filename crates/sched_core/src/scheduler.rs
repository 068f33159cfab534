//! The [`PriorityScheduler`] (spec §4.2, ≈35%) and its worker pool
//! (≈7%): three `DelayQueue`s, one per [`Priority`], a starvation-fair
//! dispatch policy, elastic worker sizing, and the three pool states
//! (`Running → ShuttingDown → Terminated`).

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sched_clock::Clock;
use sched_delayqueue::DelayQueue;
use sched_errors::{SchedResult, SchedulerError};
use sched_future::{new_future_pair, CancellationToken, ListenableFuture, Payload, Priority};

use crate::config::PoolConfig;
use crate::task::{OneShotEntry, RecurrenceKind, RecurringEntry, SchedulableTask, TaskRef};

/// Upper bound on how long an idle worker ever parks before re-checking
/// the queues on its own, regardless of whether it was woken. The
/// `wake_mutex`/`wake_condvar` pair (notified by every `offer` and by
/// `shutdown`/`shutdown_now`) is what actually wakes a parked worker
/// precisely when there is something to do; this cap is only the
/// defensive fallback for whatever it doesn't cover.
const MAX_IDLE_PARK: Duration = Duration::from_millis(250);

/// Global lifecycle state (spec §3 "Pool State").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions and dispatching normally.
    Running,
    /// No longer accepting submissions; queued work continues to
    /// drain (`shutdown`) or has already been cancelled (`shutdownNow`).
    ShuttingDown,
    /// Every worker has exited and no pending work remains.
    Terminated,
}

/// A task still pending at the moment [`PriorityScheduler::shutdown_now`]
/// drained it.
#[derive(Debug, Clone, Copy)]
pub struct DrainedTask {
    /// The dropped task's insertion sequence.
    pub sequence: u64,
    /// The dropped task's priority.
    pub priority: Priority,
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    high: Arc<DelayQueue<TaskRef>>,
    low: Arc<DelayQueue<TaskRef>>,
    starvable: Arc<DelayQueue<TaskRef>>,
    sequence: AtomicU64,
    state: Mutex<PoolState>,
    termination: Condvar,
    worker_count: AtomicUsize,
    busy_count: AtomicUsize,
    force_stop: std::sync::atomic::AtomicBool,
    consecutive_high: AtomicU32,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Guards nothing by itself — paired with `wake_condvar` purely so
    /// a worker can atomically "check the queues, then park" without
    /// missing a wakeup from an `offer` that lands in between (spec §4.2
    /// dispatch rule 4, §5 "a worker suspends only inside ... and inside
    /// user code"). Every `offer` and every `shutdown`/`shutdown_now`
    /// call is made while holding this lock, so a worker already parked
    /// in `wake_condvar.wait_timeout` is guaranteed to observe it.
    wake_mutex: Mutex<()>,
    wake_condvar: Condvar,
}

impl SchedulerInner {
    fn queue_for(&self, priority: Priority) -> &Arc<DelayQueue<TaskRef>> {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
            Priority::Starvable => &self.starvable,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_running(&self) -> SchedResult<()> {
        if *self.state.lock().unwrap() == PoolState::Running {
            Ok(())
        } else {
            sched_trace::log_warn!("submission rejected: pool is not running");
            Err(SchedulerError::PoolClosed)
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.state.lock().unwrap() != PoolState::Running
    }

    fn all_queues_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty() && self.starvable.is_empty()
    }

    fn place(self: &Arc<Self>, task: Arc<dyn SchedulableTask>) {
        let task_ref = TaskRef(task.clone());
        let queue = self.queue_for(task.priority()).clone();
        let sequence = task.sequence();
        task.set_cancel_hook(Box::new(move || {
            queue.remove(sequence);
        }));
        sched_trace::log_debug!("task {sequence} placed at priority {:?}", task.priority());
        {
            let _guard = self.wake_mutex.lock().unwrap();
            self.queue_for(task.priority()).offer(task_ref);
            self.wake_condvar.notify_all();
        }
        self.maybe_start_worker();
    }

    fn maybe_start_worker(self: &Arc<Self>) {
        let count = self.worker_count.load(Ordering::SeqCst);
        let busy = self.busy_count.load(Ordering::SeqCst);
        let should_spawn = count < self.config.core_pool_size
            || (busy >= count && count < self.config.max_pool_size);
        if should_spawn {
            self.spawn_worker(count < self.config.core_pool_size);
        }
    }

    fn spawn_worker(self: &Arc<Self>, is_core: bool) {
        let count = self.worker_count.fetch_add(1, Ordering::SeqCst) + 1;
        sched_trace::log_info!("worker started (core={is_core}, pool size now {count})");
        let inner = self.clone();
        let handle = thread::spawn(move || inner.worker_loop(is_core));
        self.workers.lock().unwrap().push(handle);
    }

    fn worker_loop(self: Arc<Self>, is_core: bool) {
        let mut idle_since = Instant::now();
        loop {
            if self.force_stop.load(Ordering::SeqCst) {
                break;
            }
            match self.try_dispatch_one() {
                Some(task) => {
                    idle_since = Instant::now();
                    self.busy_count.fetch_add(1, Ordering::SeqCst);
                    self.run_task(task);
                    self.busy_count.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    if self.is_shutdown() && self.all_queues_empty() {
                        break;
                    }
                    if !is_core
                        && idle_since.elapsed() >= self.config.keep_alive
                        && self.worker_count.load(Ordering::SeqCst) > self.config.core_pool_size
                    {
                        break;
                    }
                    self.park_until_next_ready();
                }
            }
        }
        let count = self.worker_count.fetch_sub(1, Ordering::SeqCst) - 1;
        sched_trace::log_info!("worker stopped (pool size now {count})");
        self.maybe_terminate();
    }

    /// Blocks until the earliest `ready-at` across the three queues is
    /// reached, or until `offer`/`shutdown`/`shutdown_now` notifies
    /// `wake_condvar`, whichever comes first — the precise-wakeup half
    /// of spec §4.2 dispatch rule 4 ("otherwise sleep on the earliest
    /// `ready-at` across the three queues").
    fn park_until_next_ready(&self) {
        let earliest = [self.high.peek(), self.low.peek(), self.starvable.peek()]
            .into_iter()
            .flatten()
            .map(|t| t.ready_at_millis())
            .min();

        let guard = self.wake_mutex.lock().unwrap();
        let wait_for = match earliest {
            Some(ready_at) => {
                let now = self.clock.now_millis();
                Duration::from_millis((ready_at - now).max(0) as u64).min(MAX_IDLE_PARK)
            }
            None => MAX_IDLE_PARK,
        };
        let _ = self.wake_condvar.wait_timeout(guard, wait_for.max(Duration::from_millis(1)));
    }

    /// Implements the §4.2 dispatch policy: `High` is serviced ahead
    /// of `Low`, except that after `fairness_weight` consecutive `High`
    /// dispatches a ready `Low` task is serviced unconditionally.
    /// `Starvable` is only serviced when both `High` and `Low` are
    /// empty or not yet ready.
    fn try_dispatch_one(&self) -> Option<TaskRef> {
        let now = self.clock.now_millis();
        let high_ready = self
            .high
            .peek()
            .is_some_and(|t| t.ready_at_millis() <= now);
        let low_ready = self.low.peek().is_some_and(|t| t.ready_at_millis() <= now);

        if high_ready {
            if low_ready && self.consecutive_high.load(Ordering::SeqCst) >= self.config.fairness_weight {
                self.consecutive_high.store(0, Ordering::SeqCst);
                if let Some(task) = self.low.try_take() {
                    return Some(task);
                }
            }
            if let Some(task) = self.high.try_take() {
                self.consecutive_high.fetch_add(1, Ordering::SeqCst);
                return Some(task);
            }
        }

        if let Some(task) = self.low.try_take() {
            self.consecutive_high.store(0, Ordering::SeqCst);
            return Some(task);
        }

        if !high_ready && !low_ready {
            if let Some(task) = self.starvable.try_take() {
                return Some(task);
            }
        }

        None
    }

    fn run_task(&self, task: TaskRef) {
        sched_trace::log_debug!("dispatching task {} (priority {:?})", task.sequence(), task.priority());
        task.mark_running();
        let should_reschedule = task.run();
        if should_reschedule && !task.is_terminal() {
            task.mark_pending();
            let sequence = task.sequence();
            let priority = task.priority();
            let queue = self.queue_for(priority).clone();
            let remove_queue = queue.clone();
            task.0.set_cancel_hook(Box::new(move || {
                remove_queue.remove(sequence);
            }));
            sched_trace::log_debug!("task {sequence} re-queued for its next recurrence");
            let _guard = self.wake_mutex.lock().unwrap();
            queue.offer(task);
            self.wake_condvar.notify_all();
        }
    }

    /// Wakes every worker parked in [`SchedulerInner::park_until_next_ready`]
    /// so a `shutdown`/`shutdown_now` is noticed immediately rather than
    /// after the defensive `MAX_IDLE_PARK` fallback.
    fn wake_idle_workers(&self) {
        let _guard = self.wake_mutex.lock().unwrap();
        self.wake_condvar.notify_all();
    }

    fn maybe_terminate(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == PoolState::ShuttingDown
            && self.worker_count.load(Ordering::SeqCst) == 0
            && self.all_queues_empty()
        {
            *state = PoolState::Terminated;
            sched_trace::log_info!("pool terminated");
            self.termination.notify_all();
        }
    }
}

/// A fixed/elastic worker pool dispatching prioritized, delayed, and
/// recurring tasks (spec §4.2).
#[derive(Clone)]
pub struct PriorityScheduler {
    inner: Arc<SchedulerInner>,
}

impl PriorityScheduler {
    /// Builds a scheduler with `config`, driven by `clock`.
    #[must_use]
    pub fn new(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                high: Arc::new(DelayQueue::new(clock.clone())),
                low: Arc::new(DelayQueue::new(clock.clone())),
                starvable: Arc::new(DelayQueue::new(clock.clone())),
                clock,
                config,
                sequence: AtomicU64::new(0),
                state: Mutex::new(PoolState::Running),
                termination: Condvar::new(),
                worker_count: AtomicUsize::new(0),
                busy_count: AtomicUsize::new(0),
                force_stop: std::sync::atomic::AtomicBool::new(false),
                consecutive_high: AtomicU32::new(0),
                workers: Mutex::new(Vec::new()),
                wake_mutex: Mutex::new(()),
                wake_condvar: Condvar::new(),
            }),
        }
    }

    /// Builds a scheduler backed by the real [`sched_clock::SystemClock`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default(), Arc::new(sched_clock::SystemClock::new()))
    }

    /// Runs `action` exactly once, at the default priority, with no
    /// delay and no observable future.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not `Running`.
    pub fn execute(&self, action: impl FnOnce() + Send + 'static) -> SchedResult<()> {
        self.submit(Payload::action(action), Priority::default(), 0)
            .map(|_future| ())
    }

    /// Submits `payload` for immediate dispatch (subject to `priority`
    /// and the ready queue it lands in).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not `Running`, or
    /// [`SchedulerError::BadArgument`] if `delay_millis` is negative.
    pub fn submit<T: Clone + Send + 'static>(
        &self,
        payload: Payload<T>,
        priority: Priority,
        delay_millis: i64,
    ) -> SchedResult<ListenableFuture<T>> {
        if delay_millis < 0 {
            return Err(SchedulerError::bad_argument("delay must be non-negative"));
        }
        self.inner.ensure_running()?;

        let sequence = self.inner.next_sequence();
        let ready_at = self.inner.clock.now_millis() + delay_millis;
        let (writer, future) = new_future_pair::<T>();
        let entry: Arc<dyn SchedulableTask> =
            Arc::new(OneShotEntry::new(sequence, priority, ready_at, writer, payload));
        self.inner.place(entry);
        Ok(future)
    }

    /// Equivalent to [`PriorityScheduler::submit`] — `schedule` is the
    /// name the spec's public contract uses for the delayed form.
    ///
    /// # Errors
    ///
    /// See [`PriorityScheduler::submit`].
    pub fn schedule<T: Clone + Send + 'static>(
        &self,
        payload: Payload<T>,
        delay_millis: i64,
        priority: Priority,
    ) -> SchedResult<ListenableFuture<T>> {
        self.submit(payload, priority, delay_millis)
    }

    /// Schedules `action` to re-run every `delay_millis` after the
    /// previous run *completes* (spec §4.2).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if not `Running`, or
    /// [`SchedulerError::BadArgument`] if either delay is negative.
    pub fn schedule_with_fixed_delay(
        &self,
        action: impl FnMut(CancellationToken) + Send + 'static,
        initial_delay_millis: i64,
        delay_millis: i64,
        priority: Priority,
    ) -> SchedResult<ListenableFuture<()>> {
        if initial_delay_millis < 0 || delay_millis < 0 {
            return Err(SchedulerError::bad_argument(
                "recurring delays must be non-negative",
            ));
        }
        self.inner.ensure_running()?;

        let sequence = self.inner.next_sequence();
        let ready_at = self.inner.clock.now_millis() + initial_delay_millis;
        let (writer, future) = new_future_pair::<()>();
        let entry: Arc<dyn SchedulableTask> = Arc::new(RecurringEntry::new(
            sequence,
            priority,
            ready_at,
            writer,
            self.inner.clock.clone(),
            Box::new(action),
            RecurrenceKind::FixedDelay {
                period_ms: delay_millis,
            },
        ));
        self.inner.place(entry);
        Ok(future)
    }

    /// Schedules `action` to tick every `period_millis`, drift-free:
    /// the `n`-th tick is always `T0 + n*period_millis`, regardless of
    /// how long any individual run takes. Overrun runs are followed by
    /// however many back-to-back catch-up runs are needed; missed
    /// ticks are never coalesced (spec §4.2, §9).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if not `Running`, or
    /// [`SchedulerError::BadArgument`] if `initial_delay_millis` is
    /// negative or `period_millis` is not positive.
    pub fn schedule_at_fixed_rate(
        &self,
        action: impl FnMut(CancellationToken) + Send + 'static,
        initial_delay_millis: i64,
        period_millis: i64,
        priority: Priority,
    ) -> SchedResult<ListenableFuture<()>> {
        if initial_delay_millis < 0 {
            return Err(SchedulerError::bad_argument("initial delay must be non-negative"));
        }
        if period_millis <= 0 {
            return Err(SchedulerError::bad_argument("period must be positive"));
        }
        self.inner.ensure_running()?;

        let sequence = self.inner.next_sequence();
        let first_tick = self.inner.clock.now_millis() + initial_delay_millis;
        let (writer, future) = new_future_pair::<()>();
        let entry: Arc<dyn SchedulableTask> = Arc::new(RecurringEntry::new(
            sequence,
            priority,
            first_tick,
            writer,
            self.inner.clock.clone(),
            Box::new(action),
            RecurrenceKind::FixedRate {
                period_ms: period_millis,
                next_tick: first_tick,
            },
        ));
        self.inner.place(entry);
        Ok(future)
    }

    /// Removes `future`'s backing task if it is still pending.
    /// Piggybacks on the same cancel-hook machinery `cancel` uses,
    /// since both operations must perform the identical
    /// dequeue-by-identity action.
    pub fn remove<T: Clone + Send + 'static>(&self, future: &ListenableFuture<T>) -> bool {
        future.cancel(false)
    }

    /// Stops accepting submissions; already-queued work continues to
    /// drain normally as workers become available.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == PoolState::Running {
                *state = PoolState::ShuttingDown;
                sched_trace::log_info!("shutdown requested; draining queued work");
            }
        }
        self.inner.wake_idle_workers();
    }

    /// Stops accepting submissions, drains and cancels every pending
    /// task across all three queues, and signals workers to exit after
    /// their current task. Returns every task that was pending at the
    /// moment of the call.
    pub fn shutdown_now(&self) -> Vec<DrainedTask> {
        {
            let mut state = self.inner.state.lock().unwrap();
            *state = PoolState::ShuttingDown;
        }
        self.inner.force_stop.store(true, Ordering::SeqCst);
        sched_trace::log_info!("shutdown_now requested; cancelling queued work");
        self.inner.wake_idle_workers();

        let mut drained = Vec::new();
        for queue in [&self.inner.high, &self.inner.low, &self.inner.starvable] {
            for task in queue.drain_to() {
                drained.push(DrainedTask {
                    sequence: task.sequence(),
                    priority: task.priority(),
                });
                task.cancel();
            }
        }
        self.inner.maybe_terminate();
        drained
    }

    /// True once [`PriorityScheduler::shutdown`] or
    /// [`PriorityScheduler::shutdown_now`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.inner.state.lock().unwrap() != PoolState::Running
    }

    /// True once every worker has exited and no pending work remains.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        *self.inner.state.lock().unwrap() == PoolState::Terminated
    }

    /// Blocks until the pool reaches `Terminated` or `timeout_millis`
    /// elapses. Returns whether it terminated in time.
    #[must_use]
    pub fn await_termination(&self, timeout_millis: i64) -> bool {
        let state = self.inner.state.lock().unwrap();
        if *state == PoolState::Terminated {
            return true;
        }
        if timeout_millis <= 0 {
            return false;
        }
        let (state, timeout_result) = self
            .inner
            .termination
            .wait_timeout_while(state, Duration::from_millis(timeout_millis as u64), |s| {
                *s != PoolState::Terminated
            })
            .unwrap();
        !timeout_result.timed_out() && *state == PoolState::Terminated
    }

    /// Current worker count, for diagnostics and tests.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count.load(Ordering::SeqCst)
    }
}
