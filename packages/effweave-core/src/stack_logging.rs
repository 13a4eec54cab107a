//! Compile-time gated debug logging utilities for the evaluator.

/// Emit evaluator debug logs only when the `stack_debug_logs` Cargo feature
/// is enabled.
///
/// With the feature disabled (default), this macro compiles to a no-op while
/// still type-checking format arguments. When enabled, records go through the
/// `log` facade at trace level under the `effweave::stack` target.
#[macro_export]
macro_rules! stack_debug_log {
    ($($arg:tt)*) => {{
        #[cfg(feature = "stack_debug_logs")]
        {
            ::log::trace!(target: "effweave::stack", $($arg)*);
        }
        #[cfg(not(feature = "stack_debug_logs"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}
