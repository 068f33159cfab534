//! The **PriorityScheduler** and its **Worker** pool (spec §2, ≈35% +
//! 7%; §4.2): three `DelayQueue`s, one per [`sched_future::Priority`],
//! a starvation-fair dispatch policy, elastic worker sizing, recurring
//! task re-queueing, and graceful/forceful shutdown.

mod config;
mod scheduler;
mod task;

pub use config::PoolConfig;
pub use scheduler::{DrainedTask, PoolState, PriorityScheduler};
