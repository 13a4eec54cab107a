//! Handler scopes.
//!
//! A scope is a persistent, `Arc`-linked chain of slots, innermost first.
//! Installing an interpreter pushes a slot; dispatch walks outward to the
//! first slot whose key matches. Because the chain is immutable, a handler
//! can keep evaluating in the scope that was current when a request was sent
//! while its own effects see only the slots below it.

use std::fmt;
use std::sync::Arc;

use crate::handler::Handler;
use crate::ids::Marker;
use crate::key::EffectKey;

pub(crate) struct Slot {
    pub marker: Marker,
    pub key: EffectKey,
    pub handler: Arc<dyn Handler>,
    /// The scope the interpreter was installed in.
    pub outer: Scope,
}

#[derive(Clone, Default)]
pub(crate) struct Scope {
    head: Option<Arc<Slot>>,
}

impl Scope {
    pub fn root() -> Self {
        Scope::default()
    }

    pub fn push(&self, marker: Marker, key: EffectKey, handler: Arc<dyn Handler>) -> Scope {
        Scope {
            head: Some(Arc::new(Slot {
                marker,
                key,
                handler,
                outer: self.clone(),
            })),
        }
    }

    pub fn slots(&self) -> Slots<'_> {
        Slots {
            cursor: self.head.as_deref(),
        }
    }

    pub fn find(&self, key: EffectKey) -> Option<&Slot> {
        self.slots().find(|slot| slot.key == key)
    }

    /// Slots strictly inside the slot identified by `marker`.
    pub fn slots_inside(&self, marker: Marker) -> impl Iterator<Item = &Slot> {
        self.slots().take_while(move |slot| slot.marker != marker)
    }

    /// Copy the chain for evaluation elsewhere. Handlers that keep local
    /// state hand out independent copies; the rest are shared.
    pub fn fork(&self) -> Scope {
        let slots: Vec<&Slot> = self.slots().collect();
        let mut forked = Scope::root();
        for slot in slots.into_iter().rev() {
            let handler = slot
                .handler
                .fork()
                .unwrap_or_else(|| Arc::clone(&slot.handler));
            forked = forked.push(slot.marker, slot.key, handler);
        }
        forked
    }

    pub fn depth(&self) -> usize {
        self.slots().count()
    }
}

pub(crate) struct Slots<'a> {
    cursor: Option<&'a Slot>,
}

impl<'a> Iterator for Slots<'a> {
    type Item = &'a Slot;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        self.cursor = slot.outer.head.as_deref();
        Some(slot)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.slots()
                    .map(|slot| format!("{}:{}", slot.marker, slot.key)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unwind;
    use crate::handler::{HandlerCx, Request};
    use crate::key::Effect;
    use crate::value::Value;

    struct Ping;
    impl Effect for Ping {}
    struct Pong;
    impl Effect for Pong {}

    struct Nop;
    impl Handler for Nop {
        fn handle(&self, _request: Request, _cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
            unreachable!("not dispatched in these tests")
        }
    }

    #[test]
    fn test_find_returns_innermost_match() {
        let outer = Marker::fresh();
        let inner = Marker::fresh();
        let scope = Scope::root()
            .push(outer, EffectKey::of::<Ping>(), Arc::new(Nop))
            .push(Marker::fresh(), EffectKey::of::<Pong>(), Arc::new(Nop))
            .push(inner, EffectKey::of::<Ping>(), Arc::new(Nop));

        assert_eq!(scope.find(EffectKey::of::<Ping>()).unwrap().marker, inner);
        assert_eq!(scope.depth(), 3);
    }

    #[test]
    fn test_slot_outer_hides_inner_slots() {
        let outer = Marker::fresh();
        let scope = Scope::root()
            .push(outer, EffectKey::of::<Ping>(), Arc::new(Nop))
            .push(Marker::fresh(), EffectKey::of::<Ping>(), Arc::new(Nop));

        let innermost = scope.find(EffectKey::of::<Ping>()).unwrap();
        let below = innermost.outer.find(EffectKey::of::<Ping>()).unwrap();
        assert_eq!(below.marker, outer);
        assert!(below.outer.find(EffectKey::of::<Ping>()).is_none());
    }

    #[test]
    fn test_fork_preserves_order_and_markers() {
        let a = Marker::fresh();
        let b = Marker::fresh();
        let scope = Scope::root()
            .push(a, EffectKey::of::<Ping>(), Arc::new(Nop))
            .push(b, EffectKey::of::<Pong>(), Arc::new(Nop));

        let forked = scope.fork();
        let markers: Vec<Marker> = forked.slots().map(|slot| slot.marker).collect();
        assert_eq!(markers, vec![b, a]);
    }

    #[test]
    fn test_slots_inside_stops_at_marker() {
        let stop = Marker::fresh();
        let scope = Scope::root()
            .push(Marker::fresh(), EffectKey::of::<Pong>(), Arc::new(Nop))
            .push(stop, EffectKey::of::<Ping>(), Arc::new(Nop))
            .push(Marker::fresh(), EffectKey::of::<Pong>(), Arc::new(Nop));

        assert_eq!(scope.slots_inside(stop).count(), 1);
    }
}
