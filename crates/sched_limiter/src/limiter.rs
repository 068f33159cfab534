//! The **Keyed Concurrency Limiter** (spec §2, ≈20%; §4.4): caps the
//! number of concurrently executing tasks sharing a routing key, while
//! still drawing workers from the backing [`PriorityScheduler`].
//!
//! The key→[`LimiterContainer`] map is sharded into `P` stripes (spec
//! §9): a key hashes to exactly one stripe, and writes to that stripe
//! take only that stripe's lock. `P` governs contention, not
//! correctness.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sched_core::PriorityScheduler;
use sched_errors::{describe_panic_payload, SchedResult, SchedulerError};
use sched_future::{new_future_pair, FutureWriter, ListenableFuture, Payload, Priority};

use crate::config::LimiterConfig;
use crate::container::{LimiterContainer, WaitingEntry};
use crate::submitter::KeyedSubmitter;

struct LimiterInner<K> {
    scheduler: PriorityScheduler,
    config: LimiterConfig,
    stripes: Vec<Mutex<HashMap<K, Arc<LimiterContainer>>>>,
    next_waiting_id: AtomicU64,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> LimiterInner<K> {
    fn stripe_index(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.stripes.len() - 1)
    }

    fn container_for(&self, key: &K) -> Arc<LimiterContainer> {
        let idx = self.stripe_index(key);
        let mut map = self.stripes[idx].lock().unwrap();
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(LimiterContainer::new()))
            .clone()
    }

    /// Two-phase tentative removal (spec §9): a container whose
    /// `handling` count just hit zero is only actually dropped from
    /// the map if it is *still* zero once the stripe lock is held and
    /// it is still the same container instance the map holds for this
    /// key — a concurrent submission that raced in between simply
    /// finds its own fresh container (or increments this one) first.
    fn maybe_evict(&self, key: &K, container: &Arc<LimiterContainer>) {
        if container.handling.load(Ordering::SeqCst) != 0 {
            return;
        }
        let idx = self.stripe_index(key);
        let mut map = self.stripes[idx].lock().unwrap();
        if let Some(current) = map.get(key) {
            if Arc::ptr_eq(current, container) && container.handling.load(Ordering::SeqCst) == 0 {
                map.remove(key);
            }
        }
    }
}

/// Given a backing scheduler and a per-key maximum concurrency,
/// guarantees no more than `max_concurrency` tasks run concurrently
/// for the same key, across any number of keys (spec §4.4).
pub struct KeyedSchedulerLimiter<K> {
    inner: Arc<LimiterInner<K>>,
}

impl<K> Clone for KeyedSchedulerLimiter<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> KeyedSchedulerLimiter<K> {
    /// Builds a limiter over `scheduler` with `config`.
    #[must_use]
    pub fn new(scheduler: PriorityScheduler, config: LimiterConfig) -> Self {
        let stripe_count = config.stripes.max(1).next_power_of_two();
        let mut stripes = Vec::with_capacity(stripe_count);
        stripes.resize_with(stripe_count, || Mutex::new(HashMap::new()));
        Self {
            inner: Arc::new(LimiterInner {
                scheduler,
                config,
                stripes,
                next_waiting_id: AtomicU64::new(0),
            }),
        }
    }

    /// Submits `payload` for key `key`: at most
    /// [`LimiterConfig::max_concurrency`] tasks sharing `key` ever run
    /// at once, regardless of how many are submitted across all keys.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::BadArgument`] if `delay_millis` is negative;
    /// [`SchedulerError::PoolClosed`] if the backing scheduler is not
    /// running at submission time.
    pub fn submit<T: Clone + Send + 'static>(
        &self,
        key: K,
        payload: Payload<T>,
        priority: Priority,
        delay_millis: i64,
    ) -> SchedResult<ListenableFuture<T>> {
        if delay_millis < 0 {
            return Err(SchedulerError::bad_argument("delay must be non-negative"));
        }

        let (writer, future) = new_future_pair::<T>();
        let container = self.inner.container_for(&key);
        container.handling.fetch_add(1, Ordering::SeqCst);

        if delay_millis > 0 {
            let inner = self.inner.clone();
            let trampoline_key = key.clone();
            let trampoline_container = container.clone();
            let trampoline_writer = writer.clone();
            let scheduled = self.inner.scheduler.schedule(
                Payload::action(move || {
                    admit_or_enqueue(
                        inner,
                        trampoline_key,
                        trampoline_container,
                        trampoline_writer,
                        payload,
                        priority,
                    );
                }),
                delay_millis,
                priority,
            );
            let trampoline = match scheduled {
                Ok(trampoline) => trampoline,
                Err(err) => {
                    container.handling.fetch_sub(1, Ordering::SeqCst);
                    self.inner.maybe_evict(&key, &container);
                    return Err(err);
                }
            };
            let hook_inner = self.inner.clone();
            writer.set_cancel_hook(move || {
                // admit_or_enqueue (and the handling/active bookkeeping
                // it owns) never ran for this submission — only reachable
                // if the trampoline itself is what we just removed.
                if trampoline.cancel(false) {
                    container.handling.fetch_sub(1, Ordering::SeqCst);
                    hook_inner.maybe_evict(&key, &container);
                }
            });
        } else {
            admit_or_enqueue(self.inner.clone(), key, container, writer, payload, priority);
        }

        Ok(future)
    }

    /// Convenience for `submit` with no delay.
    ///
    /// # Errors
    ///
    /// See [`KeyedSchedulerLimiter::submit`].
    pub fn submit_now<T: Clone + Send + 'static>(
        &self,
        key: K,
        payload: Payload<T>,
        priority: Priority,
    ) -> SchedResult<ListenableFuture<T>> {
        self.submit(key, payload, priority, 0)
    }

    /// Removes `future`'s backing task if it is still pending —
    /// whether it is waiting out an initial delay, sitting in a
    /// container's `waitingTasks` queue, or already handed to the
    /// backing scheduler but not yet dispatched. Returns whether it
    /// was found and removed.
    ///
    /// Implemented via the same cancel-hook each task installs as it
    /// moves between phases, rather than literally scanning every
    /// container's waiting queue — the hook already knows exactly
    /// where its task lives, which is strictly less work for the same
    /// result.
    pub fn remove<T: Clone + Send + 'static>(&self, future: &ListenableFuture<T>) -> bool {
        future.cancel(false)
    }

    /// Returns a handle that forwards all submissions to this limiter
    /// pre-bound to `key` — a projection onto this limiter, not a new
    /// pool (spec §4.4 `getSubmitterSchedulerForKey`).
    #[must_use]
    pub fn submitter_for_key(&self, key: K) -> KeyedSubmitter<K> {
        KeyedSubmitter::new(self.clone(), key)
    }

    /// Total number of keys still tracked across every stripe. Exposed
    /// only for tests asserting that a key's container is actually
    /// evicted once nothing references it anymore.
    #[cfg(test)]
    fn tracked_key_count(&self) -> usize {
        self.inner.stripes.iter().map(|stripe| stripe.lock().unwrap().len()).sum()
    }
}

fn admit_or_enqueue<K, T>(
    inner: Arc<LimiterInner<K>>,
    key: K,
    container: Arc<LimiterContainer>,
    writer: FutureWriter<T>,
    payload: Payload<T>,
    priority: Priority,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    if writer.is_terminal() {
        // Cancelled while waiting out its initial delay.
        container.handling.fetch_sub(1, Ordering::SeqCst);
        inner.maybe_evict(&key, &container);
        return;
    }

    let admitted = {
        let mut state = container.state.lock().unwrap();
        if state.active < inner.config.max_concurrency {
            state.active += 1;
            true
        } else {
            false
        }
    };

    if admitted {
        submit_wrapper(inner, key, container, writer, payload, priority);
        return;
    }

    let id = inner.next_waiting_id.fetch_add(1, Ordering::SeqCst);
    let thunk_inner = inner.clone();
    let thunk_key = key.clone();
    let thunk_container = container.clone();
    let thunk_writer = writer.clone();
    let thunk: Box<dyn FnOnce() + Send> = Box::new(move || {
        submit_wrapper(thunk_inner, thunk_key, thunk_container, thunk_writer, payload, priority);
    });
    {
        let mut state = container.state.lock().unwrap();
        state.waiting.push_back(WaitingEntry { id, thunk });
    }

    let hook_inner = inner.clone();
    let hook_key = key;
    let hook_container = container;
    writer.set_cancel_hook(move || {
        let removed = {
            let mut state = hook_container.state.lock().unwrap();
            let before = state.waiting.len();
            state.waiting.retain(|entry| entry.id != id);
            state.waiting.len() != before
        };
        if removed {
            hook_container.handling.fetch_sub(1, Ordering::SeqCst);
            hook_inner.maybe_evict(&hook_key, &hook_container);
        }
    });
}

fn submit_wrapper<K, T>(
    inner: Arc<LimiterInner<K>>,
    key: K,
    container: Arc<LimiterContainer>,
    writer: FutureWriter<T>,
    payload: Payload<T>,
    priority: Priority,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    let run_writer = writer.clone();
    let run_inner = inner.clone();
    let run_key = key.clone();
    let run_container = container.clone();
    let submission = inner.scheduler.submit(
        Payload::action(move || {
            if !run_writer.is_terminal() {
                run_writer.mark_running();
                let token = run_writer.token();
                match std::panic::catch_unwind(AssertUnwindSafe(|| payload.run(token))) {
                    Ok(value) => run_writer.complete(value),
                    Err(panic_payload) => {
                        let message = describe_panic_payload(panic_payload.as_ref());
                        sched_trace::log_error!("keyed task panicked: {message}");
                        run_writer.fail(SchedulerError::execution_failure(message));
                    }
                }
            }
            release(run_inner, run_key, run_container);
        }),
        priority,
        0,
    );

    match submission {
        Ok(exec_future) => {
            writer.set_cancel_hook(move || {
                // Only our own cancellation actually removed the wrapper
                // before it ran — if it already started (or finished),
                // its own completion path is the one that releases the
                // slot, and calling release() a second time here would
                // double-release it.
                if exec_future.cancel(false) {
                    release(inner, key, container);
                }
            });
        }
        Err(err) => {
            // Backing scheduler has shut down between admission and
            // dispatch; fail the caller's future and release the slot
            // we already counted as active so the container doesn't
            // wedge at a phantom non-zero count.
            writer.fail(err);
            release(inner, key, container);
        }
    }
}

fn release<K>(inner: Arc<LimiterInner<K>>, key: K, container: Arc<LimiterContainer>)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    let next = {
        let mut state = container.state.lock().unwrap();
        state.active -= 1;
        if let Some(entry) = state.waiting.pop_front() {
            state.active += 1;
            Some(entry)
        } else {
            None
        }
    };
    if let Some(entry) = next {
        (entry.thunk)();
    }
    container.handling.fetch_sub(1, Ordering::SeqCst);
    inner.maybe_evict(&key, &container);
}
