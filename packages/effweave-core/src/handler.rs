//! Handler trait, effect requests, and the context handlers run with.

use std::any::type_name;
use std::sync::Arc;

use crate::error::{StackError, Unwind};
use crate::ids::Marker;
use crate::key::{Effect, EffectKey};
use crate::program::{Eff, ErasedEff, Prog};
use crate::scope::{Scope, Slot};
use crate::value::{downcast, Value};
use crate::vm;

/// An operation in flight, together with the key it is routed by.
pub struct Request {
    key: EffectKey,
    op: Value,
}

impl Request {
    pub fn new<E: Effect>(op: E) -> Self {
        Request {
            key: EffectKey::of::<E>(),
            op: Box::new(op),
        }
    }

    pub fn key(&self) -> EffectKey {
        self.key
    }

    pub fn into_op<E: Effect>(self) -> Result<E, Unwind> {
        Ok(downcast::<E>(self.op, "request operation")?)
    }
}

/// An interpreter for one effect key.
///
/// Handlers are shared between every request their scope serves, so state is
/// kept behind interior mutability.
pub trait Handler: Send + Sync + 'static {
    /// Serve one request. The returned value resumes the requester; an
    /// `Err` unwinds from the request site.
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind>;

    /// Run the body of this handler's scope. Native interpreters override
    /// this to intercept payloads raised on the native panic channel.
    fn enter(
        &self,
        _marker: Marker,
        body: &mut dyn FnMut() -> Result<Value, Unwind>,
    ) -> Result<Value, Unwind> {
        body()
    }

    /// Independent copy used when a computation is detached from the
    /// current evaluation. `None` shares this handler.
    fn fork(&self) -> Option<Arc<dyn Handler>> {
        None
    }

    /// Capture local state for a later [`Handler::restore`].
    fn snapshot(&self) -> Option<Value> {
        None
    }

    fn restore(&self, _saved: Value) {}

    fn describe(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Context of a handler serving a request.
///
/// Two scopes matter: the request site, where nested computations carried
/// by the request run, and the handler's own scope, which only contains the
/// interpreters installed below it.
pub struct HandlerCx<'a> {
    site: &'a Scope,
    slot: &'a Slot,
}

impl<'a> HandlerCx<'a> {
    pub(crate) fn new(site: &'a Scope, slot: &'a Slot) -> Self {
        HandlerCx { site, slot }
    }

    /// Marker of the prompt this handler was installed with.
    pub fn marker(&self) -> Marker {
        self.slot.marker
    }

    pub fn key(&self) -> EffectKey {
        self.slot.key
    }

    /// Short-circuit to this handler's own prompt.
    pub fn abort(&self, payload: Value) -> Unwind {
        Unwind::abort(self.slot.marker, payload)
    }

    /// Evaluate in the handler's own scope.
    pub fn run<A: Send + 'static>(&self, eff: Eff<A>) -> Result<A, Unwind> {
        typed(vm::eval(eff.into_prog(), &self.slot.outer))
    }

    pub fn run_erased(&self, eff: ErasedEff) -> Result<Value, Unwind> {
        vm::eval(eff.into_prog(), &self.slot.outer)
    }

    /// Evaluate a computation carried by the request at the request site.
    pub fn run_nested<A: Send + 'static>(&self, eff: Eff<A>) -> Result<A, Unwind> {
        typed(vm::eval(eff.into_prog(), self.site))
    }

    pub fn run_nested_erased(&self, eff: ErasedEff) -> Result<Value, Unwind> {
        vm::eval(eff.into_prog(), self.site)
    }

    /// Re-dispatch a request to the interpreters installed below this one.
    /// Nested computations of the forwarded request still run at the
    /// original request site.
    pub fn forward(&self, request: Request) -> Result<Value, Unwind> {
        vm::dispatch_in(&self.slot.outer, request, self.site)
    }

    /// Like [`HandlerCx::forward`], but also skip the nearest interpreter
    /// below this one that serves the request's key.
    pub fn forward_past(&self, request: Request) -> Result<Value, Unwind> {
        let key = request.key();
        match self.slot.outer.find(key) {
            Some(skipped) => vm::dispatch_in(&skipped.outer, request, self.site),
            None => Err(StackError::unhandled(key).into()),
        }
    }

    /// Capture the state of the interpreters between the request site and
    /// this handler.
    pub fn snapshot_site(&self) -> SiteSnapshot {
        let saved = self
            .site
            .slots_inside(self.slot.marker)
            .filter_map(|slot| {
                slot.handler
                    .snapshot()
                    .map(|state| (Arc::clone(&slot.handler), state))
            })
            .collect::<Vec<_>>();
        crate::stack_debug_log!(
            "snapshot {} interpreter(s) inside {}",
            saved.len(),
            self.slot.marker
        );
        SiteSnapshot { saved }
    }

    pub fn restore_site(&self, snapshot: SiteSnapshot) {
        for (handler, state) in snapshot.saved {
            handler.restore(state);
        }
    }

    /// Lower a computation into a self-contained closure over a fork of the
    /// request-site stack, runnable on any thread.
    pub fn detach(&self, eff: impl Into<ErasedEff>) -> Detached {
        Detached {
            scope: self.site.fork(),
            prog: eff.into().into_prog(),
        }
    }
}

fn typed<A: 'static>(outcome: Result<Value, Unwind>) -> Result<A, Unwind> {
    Ok(downcast::<A>(outcome?, "nested computation")?)
}

/// Saved state of the interpreters above a handler.
pub struct SiteSnapshot {
    saved: Vec<(Arc<dyn Handler>, Value)>,
}

/// A computation bound to a forked stack, ready to run natively.
#[must_use = "a detached computation does nothing until run"]
pub struct Detached {
    scope: Scope,
    prog: Prog,
}

impl Detached {
    pub fn run(self) -> Result<Value, Unwind> {
        vm::eval(self.prog, &self.scope)
    }

    pub fn run_typed<A: Send + 'static>(self) -> Result<A, Unwind> {
        typed(self.run())
    }
}
