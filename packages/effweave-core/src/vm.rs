//! The evaluator.
//!
//! `eval` walks a program with an explicit stack of bind frames, so long
//! `and_then` chains do not grow the native stack. Rust recursion happens only
//! where a handler evaluates a nested computation.

use std::panic::{self, AssertUnwindSafe};

use crate::config::{debug_enabled, DebugLevel};
use crate::error::{StackError, Unwind};
use crate::handler::{HandlerCx, Request};
use crate::ids::Marker;
use crate::native::{self, ErrorCarrier};
use crate::program::{Cont, Eff, Install, Prog, ScopeEnd};
use crate::scope::Scope;
use crate::stack_debug_log;
use crate::value::{downcast, Value};

pub(crate) fn eval(prog: Prog, scope: &Scope) -> Result<Value, Unwind> {
    let mut frames: Vec<Cont> = Vec::new();
    let mut current = prog;
    loop {
        let outcome = match current {
            Prog::Pure(value) => Ok(value),
            Prog::Bind(inner, k) => {
                frames.push(k);
                current = *inner;
                continue;
            }
            Prog::Send(request) => dispatch_in(scope, request, scope),
            Prog::Native(step) => step(scope),
            Prog::Install(install) => run_install(*install, scope),
            Prog::Unwind(unwind) => Err(unwind),
        };
        match outcome {
            Ok(value) => match frames.pop() {
                Some(k) => current = k(value),
                None => return Ok(value),
            },
            // Pending frames belong to the abandoned computation.
            Err(unwind) => return Err(unwind),
        }
    }
}

/// Dispatch `request` to the nearest matching interpreter in `search`, with
/// `site` as the scope nested computations run in.
pub(crate) fn dispatch_in(search: &Scope, request: Request, site: &Scope) -> Result<Value, Unwind> {
    native::poll_interrupt();
    let key = request.key();
    let Some(slot) = search.find(key) else {
        log::debug!("no interpreter for {key} (site depth {})", site.depth());
        return Err(StackError::unhandled(key).into());
    };
    if debug_enabled(DebugLevel::Dispatch) {
        log::debug!("dispatch {key} -> {} at {}", slot.handler.describe(), slot.marker);
    }
    stack_debug_log!("dispatch {} site={:?}", key, site);
    let cx = HandlerCx::new(site, slot);
    slot.handler.handle(request, &cx)
}

fn run_install(install: Install, scope: &Scope) -> Result<Value, Unwind> {
    let Install {
        key,
        handler,
        body,
        exit,
    } = install;
    let marker = Marker::fresh();
    let inner = scope.push(marker, key, handler.clone());
    if debug_enabled(DebugLevel::Trace) {
        log::debug!("install {} for {key} at {marker}", handler.describe());
    }

    let mut body = Some(body);
    let outcome = handler.enter(marker, &mut || match body.take() {
        Some(body) => eval(body, &inner),
        None => Err(StackError::ScopeReentered {
            handler: handler.describe(),
        }
        .into()),
    });

    let end = match outcome {
        Ok(value) => ScopeEnd::Returned(value),
        Err(unwind) => ScopeEnd::Aborted(unwind.claim(marker)?),
    };
    stack_debug_log!("leave {}", marker);
    exit(end)
}

impl<A: Send + 'static> Eff<A> {
    /// Evaluate a fully interpreted computation on the current thread.
    ///
    /// Reports requests nobody interprets, short-circuits that escaped their
    /// prompt, and identity-tagged native errors that outlived the
    /// interpreter owning them. Foreign native panics propagate unchanged.
    pub fn try_run(self) -> Result<A, StackError> {
        let prog = self.into_prog();
        match panic::catch_unwind(AssertUnwindSafe(|| eval(prog, &Scope::root()))) {
            Ok(Ok(value)) => downcast::<A>(value, "final result"),
            Ok(Err(unwind)) => Err(unwind.into_stack_error()),
            Err(payload) => match payload.downcast::<ErrorCarrier>() {
                Ok(carrier) => {
                    let err = carrier.escaped();
                    log::error!("{err}");
                    Err(err)
                }
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    /// Evaluate a fully interpreted computation.
    ///
    /// # Panics
    ///
    /// Panics with the [`StackError`] description when [`Eff::try_run`]
    /// reports a contract violation.
    pub fn run(self) -> A {
        match self.try_run() {
            Ok(value) => value,
            Err(err) => panic!("effect stack failed: {err}"),
        }
    }
}
