//! Core identifier types for the effect stack.
//!
//! All IDs are lightweight Copy types using the newtype pattern and are
//! allocated from process-wide atomic counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an installed interpreter scope (a prompt).
///
/// Every installation of a handler gets a fresh Marker; short-circuits are
/// addressed to the marker of the prompt that should receive them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Marker(pub u64);

/// Identity of one invocation of a native Error interpreter.
///
/// Errors raised on the native panic channel carry the identity of the
/// interpreter that owns them so that nested interpreters of the same error
/// type never catch each other's errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Identity(pub u64);

/// Unique identifier for spawned tasks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(pub u64);

static MARKER_COUNTER: AtomicU64 = AtomicU64::new(1);
static IDENTITY_COUNTER: AtomicU64 = AtomicU64::new(1);
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Marker {
    /// Create a fresh unique Marker.
    pub fn fresh() -> Self {
        Marker(MARKER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a Marker with a specific value (for testing).
    pub fn from_raw(value: u64) -> Self {
        Marker(value)
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Identity {
    /// Create a fresh unique Identity.
    pub fn fresh() -> Self {
        Identity(IDENTITY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl TaskId {
    pub fn fresh() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_fresh_is_unique() {
        let m1 = Marker::fresh();
        let m2 = Marker::fresh();
        assert_ne!(m1, m2);
    }

    #[test]
    fn test_identity_fresh_is_monotonic() {
        let i1 = Identity::fresh();
        let i2 = Identity::fresh();
        assert!(i2.raw() > i1.raw());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Marker::from_raw(7).to_string(), "m7");
        assert_eq!(Identity(3).to_string(), "#3");
        assert_eq!(TaskId(9).to_string(), "task-9");
    }
}
