//! The **Keyed Concurrency Limiter** (spec §2, ≈20%; §4.4): a layer
//! above [`sched_core::PriorityScheduler`] that caps, per user-supplied
//! routing key, how many submissions sharing that key may run at once
//! — while every task still draws its worker thread from the backing
//! scheduler.

mod config;
mod container;
mod limiter;
mod submitter;

pub use config::LimiterConfig;
pub use limiter::KeyedSchedulerLimiter;
pub use submitter::KeyedSubmitter;
