//! The **ScheduledExecutorServiceWrapper** (spec §2, ≈10%; §4.5): a
//! thin adapter projecting [`sched_core::PriorityScheduler`] behind the
//! generic "scheduled executor service" shape external callers and
//! tests are written against (spec §6).
//!
//! All tasks submitted through this surface use the wrapper's default
//! priority unless the caller passes a different one explicitly to
//! [`ScheduledExecutorServiceWrapper::schedule`] and friends.

use sched_core::{DrainedTask, PriorityScheduler};
use sched_errors::{SchedResult, SchedulerError};
use sched_future::{CancellationToken, ListenableFuture, Payload, Priority};

/// A drained-but-never-started task handed back by
/// [`ScheduledExecutorServiceWrapper::shutdown_now`]. Only the
/// scheduling metadata survives — the user payload itself was boxed
/// and type-erased inside the cancelled task record, matching how
/// [`sched_core::PriorityScheduler::shutdown_now`] reports it.
pub type UndrainedAction = DrainedTask;

/// Adapts a [`PriorityScheduler`] to the generic scheduled-executor
/// contract of spec §6.
#[derive(Clone)]
pub struct ScheduledExecutorServiceWrapper {
    scheduler: PriorityScheduler,
    default_priority: Priority,
}

impl ScheduledExecutorServiceWrapper {
    /// Wraps `scheduler`, using [`Priority::default`] for every
    /// submission that does not specify its own priority.
    #[must_use]
    pub fn new(scheduler: PriorityScheduler) -> Self {
        Self {
            scheduler,
            default_priority: Priority::default(),
        }
    }

    /// Wraps `scheduler`, using `default_priority` for every submission
    /// that does not specify its own priority.
    #[must_use]
    pub fn with_default_priority(scheduler: PriorityScheduler, default_priority: Priority) -> Self {
        Self {
            scheduler,
            default_priority,
        }
    }

    /// Runs `action` exactly once; no future is returned.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running.
    pub fn execute(&self, action: impl FnOnce() + Send + 'static) -> SchedResult<()> {
        self.scheduler.execute(action)
    }

    /// Submits a side-effecting `action`, returning a `future<()>`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running.
    pub fn submit_action(&self, action: impl FnOnce() + Send + 'static) -> SchedResult<ListenableFuture<()>> {
        self.scheduler
            .submit(Payload::action(action), self.default_priority, 0)
    }

    /// Submits a side-effecting `action`, completing the returned
    /// future with the caller-supplied `result` once `action` finishes
    /// — the `submit(action, result) -> future<result>` form of §6.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running.
    pub fn submit_with_result<T: Clone + Send + 'static>(
        &self,
        action: impl FnOnce() + Send + 'static,
        result: T,
    ) -> SchedResult<ListenableFuture<T>> {
        self.scheduler.submit(
            Payload::computation(move || {
                action();
                result
            }),
            self.default_priority,
            0,
        )
    }

    /// Submits a value-producing `computation`, returning a
    /// `future<T>`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running.
    pub fn submit_computation<T: Clone + Send + 'static>(
        &self,
        computation: impl FnOnce() -> T + Send + 'static,
    ) -> SchedResult<ListenableFuture<T>> {
        self.scheduler
            .submit(Payload::computation(computation), self.default_priority, 0)
    }

    /// Submits `payload` for dispatch no earlier than `delay_millis`
    /// from now, at the wrapper's default priority.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running, or
    /// [`SchedulerError::BadArgument`] if `delay_millis` is negative.
    pub fn schedule<T: Clone + Send + 'static>(
        &self,
        payload: Payload<T>,
        delay_millis: i64,
    ) -> SchedResult<ListenableFuture<T>> {
        self.scheduler.schedule(payload, delay_millis, self.default_priority)
    }

    /// Re-runs `action` every `delay_millis` after the previous run
    /// completes, starting after `initial_delay_millis`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running, or
    /// [`SchedulerError::BadArgument`] if either delay is negative.
    pub fn schedule_with_fixed_delay(
        &self,
        action: impl FnMut(CancellationToken) + Send + 'static,
        initial_delay_millis: i64,
        delay_millis: i64,
    ) -> SchedResult<ListenableFuture<()>> {
        self.scheduler.schedule_with_fixed_delay(
            action,
            initial_delay_millis,
            delay_millis,
            self.default_priority,
        )
    }

    /// Ticks `action` every `period_millis`, drift-free, starting after
    /// `initial_delay_millis`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running, or
    /// [`SchedulerError::BadArgument`] if `initial_delay_millis` is
    /// negative or `period_millis` is not positive.
    pub fn schedule_at_fixed_rate(
        &self,
        action: impl FnMut(CancellationToken) + Send + 'static,
        initial_delay_millis: i64,
        period_millis: i64,
    ) -> SchedResult<ListenableFuture<()>> {
        self.scheduler.schedule_at_fixed_rate(
            action,
            initial_delay_millis,
            period_millis,
            self.default_priority,
        )
    }

    /// Submits every payload in `payloads`, then blocks until each has
    /// reached a terminal state (completed, failed, or cancelled), and
    /// returns the (now terminal) futures in submission order.
    ///
    /// Rust's type system makes a "null collection element" (spec §6's
    /// `BadArgument` on a null element) unreachable — every element of
    /// `payloads` is, by construction, a valid [`Payload`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PoolClosed`] if the pool is not running at
    /// submission time.
    pub fn invoke_all<T: Clone + Send + 'static>(
        &self,
        payloads: Vec<Payload<T>>,
    ) -> SchedResult<Vec<ListenableFuture<T>>> {
        let mut futures = Vec::with_capacity(payloads.len());
        for payload in payloads {
            futures.push(self.scheduler.submit(payload, self.default_priority, 0)?);
        }
        for future in &futures {
            let _ = future.get();
        }
        Ok(futures)
    }

    /// Stops accepting submissions; already-queued work continues to
    /// drain.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// Stops accepting submissions and cancels every pending task,
    /// returning the ones that never started.
    pub fn shutdown_now(&self) -> Vec<UndrainedAction> {
        self.scheduler.shutdown_now()
    }

    /// True once [`ScheduledExecutorServiceWrapper::shutdown`] or
    /// [`ScheduledExecutorServiceWrapper::shutdown_now`] has been
    /// called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.scheduler.is_shutdown()
    }

    /// True once every worker has exited and no pending work remains.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.scheduler.is_terminated()
    }

    /// Blocks until the pool terminates or `timeout_millis` elapses.
    #[must_use]
    pub fn await_termination(&self, timeout_millis: i64) -> bool {
        self.scheduler.await_termination(timeout_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_clock::SystemClock;
    use sched_core::PoolConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn wrapper(pool_size: usize) -> ScheduledExecutorServiceWrapper {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(pool_size), Arc::new(SystemClock::new()));
        ScheduledExecutorServiceWrapper::new(scheduler)
    }

    #[test]
    #[ntest::timeout(2_000)]
    fn execute_runs_without_returning_a_future() {
        let exec = wrapper(1);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        exec.execute(move || ran_clone.store(true, Ordering::SeqCst)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    #[ntest::timeout(2_000)]
    fn submit_with_result_completes_with_the_supplied_value() {
        let exec = wrapper(1);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let future = exec
            .submit_with_result(move || ran_clone.store(true, Ordering::SeqCst), "done")
            .unwrap();
        assert_eq!(future.get().unwrap(), "done");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    #[ntest::timeout(2_000)]
    fn invoke_all_waits_for_every_submission() {
        let exec = wrapper(4);
        let count = Arc::new(AtomicUsize::new(0));
        let payloads: Vec<Payload<i32>> = (0..5)
            .map(|i| {
                let count = count.clone();
                Payload::computation(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();
        let futures = exec.invoke_all(payloads).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
        let values: Vec<i32> = futures.iter().map(|f| f.get().unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    #[ntest::timeout(3_000)]
    fn shutdown_now_returns_undrained_actions() {
        let exec = wrapper(1);
        exec.execute(|| std::thread::sleep(Duration::from_millis(200))).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        for _ in 0..3 {
            exec.submit_computation(|| 0).unwrap();
        }
        let undrained = exec.shutdown_now();
        assert_eq!(undrained.len(), 3);
        assert!(exec.await_termination(2_000));
    }

    #[test]
    fn submit_after_shutdown_is_pool_closed() {
        let exec = wrapper(1);
        exec.shutdown();
        let result = exec.submit_computation(|| 1);
        assert!(matches!(result, Err(SchedulerError::PoolClosed)));
    }
}
