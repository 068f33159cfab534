//! Pool sizing knobs (spec §4.2 "Worker pool management").

use std::time::Duration;

/// Parameters governing how many workers a [`crate::PriorityScheduler`]
/// keeps alive and how aggressively it services `High` over `Low`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers kept alive indefinitely, even while idle.
    pub core_pool_size: usize,
    /// Upper bound on worker count; exceeded only transiently while a
    /// worker that should exit finishes its current task.
    pub max_pool_size: usize,
    /// How long a non-core worker may sit idle before exiting.
    pub keep_alive: Duration,
    /// Number of consecutive `High` dispatches serviced before `Low`
    /// is serviced unconditionally, when both are ready.
    pub fairness_weight: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            max_pool_size: 16,
            keep_alive: Duration::from_secs(60),
            fairness_weight: 4,
        }
    }
}

impl PoolConfig {
    /// A pool with exactly `size` core and max workers, no elasticity.
    #[must_use]
    pub fn fixed(size: usize) -> Self {
        Self {
            core_pool_size: size,
            max_pool_size: size,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_knobs() {
        let config = PoolConfig::default();
        assert_eq!(config.core_pool_size, 4);
        assert_eq!(config.max_pool_size, 16);
        assert_eq!(config.fairness_weight, 4);
    }

    #[test]
    fn fixed_pins_core_and_max_equal() {
        let config = PoolConfig::fixed(1);
        assert_eq!(config.core_pool_size, 1);
        assert_eq!(config.max_pool_size, 1);
    }
}
