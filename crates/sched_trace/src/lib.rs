//! Thin wrappers over `tracing`'s macros, feature-gated the same way
//! the rest of this workspace gates optional log noise: turning off a
//! feature compiles the call sites away entirely instead of paying a
//! runtime filter check.

/// Logs at info level when the `log_info` feature is enabled.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        #[cfg(feature = "log_info")]
        {
            tracing::info!($($arg)*);
        }
    };
}

/// Logs at warn level when the `log_warnings` feature is enabled.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "log_warnings")]
        {
            tracing::warn!($($arg)*);
        }
    };
}

/// Logs at error level when the `log_errors` feature is enabled.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        #[cfg(feature = "log_errors")]
        {
            tracing::error!($($arg)*);
        }
    };
}

/// Logs at debug level when the `log_debug` feature is enabled.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "log_debug")]
        {
            tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn info_macro_emits_through_tracing() {
        log_info!("worker {} started", 1);
        assert!(logs_contain("worker 1 started"));
    }

    #[traced_test]
    #[test]
    fn error_macro_emits_through_tracing() {
        log_error!("callback panicked: {}", "boom");
        assert!(logs_contain("callback panicked"));
    }
}
