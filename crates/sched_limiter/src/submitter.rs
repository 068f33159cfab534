//! The per-key submitter handle (spec §4.4
//! `getSubmitterSchedulerForKey`): every submission through it is
//! pre-bound to one key. It is a thin projection onto the limiter it
//! was created from, not a separate pool — dropping it does not
//! cancel anything already submitted.

use sched_errors::SchedResult;
use sched_future::{ListenableFuture, Payload, Priority};
use std::hash::Hash;

use crate::limiter::KeyedSchedulerLimiter;

/// A [`KeyedSchedulerLimiter`] handle pre-bound to one key.
pub struct KeyedSubmitter<K> {
    limiter: KeyedSchedulerLimiter<K>,
    key: K,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> KeyedSubmitter<K> {
    pub(crate) fn new(limiter: KeyedSchedulerLimiter<K>, key: K) -> Self {
        Self { limiter, key }
    }

    /// Submits `payload` under this submitter's key, subject to the
    /// owning limiter's per-key cap.
    ///
    /// # Errors
    ///
    /// See [`KeyedSchedulerLimiter::submit`].
    pub fn submit<T: Clone + Send + 'static>(
        &self,
        payload: Payload<T>,
        priority: Priority,
        delay_millis: i64,
    ) -> SchedResult<ListenableFuture<T>> {
        self.limiter
            .submit(self.key.clone(), payload, priority, delay_millis)
    }

    /// Convenience for `submit` with no delay.
    ///
    /// # Errors
    ///
    /// See [`KeyedSchedulerLimiter::submit`].
    pub fn submit_now<T: Clone + Send + 'static>(
        &self,
        payload: Payload<T>,
        priority: Priority,
    ) -> SchedResult<ListenableFuture<T>> {
        self.submit(payload, priority, 0)
    }

    /// The key this submitter forwards submissions under.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use sched_clock::SystemClock;
    use sched_core::{PoolConfig, PriorityScheduler};
    use std::sync::Arc;

    #[test]
    fn submitter_forwards_to_its_bound_key() {
        let scheduler = PriorityScheduler::new(PoolConfig::fixed(2), Arc::new(SystemClock::new()));
        let limiter: KeyedSchedulerLimiter<&'static str> =
            KeyedSchedulerLimiter::new(scheduler, LimiterConfig::new(2));
        let submitter = limiter.submitter_for_key("tenant-1");
        assert_eq!(*submitter.key(), "tenant-1");
        let future = submitter
            .submit_now(Payload::computation(|| 5), Priority::High)
            .unwrap();
        assert_eq!(future.get().unwrap(), 5);
    }
}
