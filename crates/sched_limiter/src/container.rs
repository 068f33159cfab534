//! The per-key **LimiterContainer** (spec §3, §4.4): counts in-flight
//! tasks for one key and holds the FIFO of tasks that were ready but
//! blocked by the concurrency cap.

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

/// A single waiting task: a type-erased thunk that, when invoked,
/// submits that task's wrapper to the backing scheduler. `id` is the
/// identity [`crate::KeyedSchedulerLimiter::remove`] matches against.
pub(crate) struct WaitingEntry {
    pub(crate) id: u64,
    pub(crate) thunk: Box<dyn FnOnce() + Send>,
}

pub(crate) struct ContainerState {
    pub(crate) active: usize,
    pub(crate) waiting: VecDeque<WaitingEntry>,
}

/// Per-key gate: `active` + `waiting.len()` + scheduled-but-not-yet-
/// ready tasks never exceeds [`crate::LimiterConfig::max_concurrency`]
/// concurrently running; `handling` tracks all three categories at
/// once so the container knows when it is safe to evict itself from
/// the map.
pub(crate) struct LimiterContainer {
    pub(crate) state: Mutex<ContainerState>,
    pub(crate) handling: AtomicUsize,
}

impl LimiterContainer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ContainerState {
                active: 0,
                waiting: VecDeque::new(),
            }),
            handling: AtomicUsize::new(0),
        }
    }
}
