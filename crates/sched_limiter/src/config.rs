//! Sizing knobs for the keyed concurrency limiter (spec §4.4).

/// Parameters governing a [`crate::KeyedSchedulerLimiter`].
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum number of concurrently executing tasks sharing a key.
    pub max_concurrency: usize,
    /// Number of stripes the key→container map is sharded into.
    /// Rounded up to the next power of two so a stripe index can be
    /// computed as `hash & (stripes - 1)` (spec §9). Governs
    /// contention only, never correctness.
    pub stripes: usize,
}

impl LimiterConfig {
    /// A limiter config with the given per-key cap and the default
    /// stripe count (16).
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }
}

impl Default for LimiterConfig {
    /// `max_concurrency = 1` (the strictest, safest default — the
    /// spec leaves `M` entirely caller-chosen) and `stripes = 16`
    /// (the spec's stated default).
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            stripes: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_keeps_default_stripe_count() {
        let config = LimiterConfig::new(4);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.stripes, 16);
    }
}
