//! Effect keys: the runtime identity requests are routed by.

use std::any::{type_name, TypeId};
use std::fmt;

/// An operation type that can be sent to an interpreter.
///
/// Implementors are plain data (usually an enum of operations). Routing only
/// looks at the concrete type, so two effects with equal shape but distinct
/// Rust types never see each other's requests.
pub trait Effect: Send + 'static {}

/// Routing key of an effect request.
///
/// Keys compare by `TypeId`; the stored name is for diagnostics only.
#[derive(Clone, Copy)]
pub struct EffectKey {
    id: TypeId,
    name: &'static str,
}

impl EffectKey {
    pub fn of<E: Effect>() -> Self {
        EffectKey {
            id: TypeId::of::<E>(),
            name: type_name::<E>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EffectKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EffectKey {}

impl std::hash::Hash for EffectKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectKey({})", self.name)
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    impl Effect for Ping {}

    struct Pong;
    impl Effect for Pong {}

    #[test]
    fn test_keys_compare_by_type() {
        assert_eq!(EffectKey::of::<Ping>(), EffectKey::of::<Ping>());
        assert_ne!(EffectKey::of::<Ping>(), EffectKey::of::<Pong>());
    }

    #[test]
    fn test_key_name_is_type_name() {
        assert!(EffectKey::of::<Ping>().name().ends_with("Ping"));
    }
}
