//! The scheduling [`Priority`] tag (spec §3, GLOSSARY).

/// Controls dispatch order among ready tasks. `High` and `Low` are
/// starvation-fair against each other (spec §4.2); `Starvable` is not
/// — it may be deferred indefinitely in favor of the other two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Dispatched ahead of `Low`, subject to the fairness weight.
    High,
    /// Starvation-fair against `High`: serviced unconditionally after
    /// a configurable number of consecutive `High` dispatches.
    Low,
    /// May be deferred indefinitely in favor of `High`/`Low` work.
    Starvable,
}

impl Default for Priority {
    /// Submissions that do not specify a priority use `High`, matching
    /// the common case of a caller that has not opted into fairness
    /// tuning.
    fn default() -> Self {
        Priority::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_is_high() {
        assert_eq!(Priority::default(), Priority::High);
    }
}
