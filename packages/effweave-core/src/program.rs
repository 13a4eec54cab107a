//! Computations evaluated by the stack runtime.
//!
//! `Prog` is the untyped program tree the evaluator walks. `Eff<A>` is the
//! typed facade users build programs with; `ErasedEff` is the form in which
//! higher-order requests carry nested computations.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{StackError, Unwind};
use crate::handler::{Handler, Request};
use crate::key::{Effect, EffectKey};
use crate::scope::Scope;
use crate::value::{downcast, erase, Value};

pub(crate) type Cont = Box<dyn FnOnce(Value) -> Prog + Send>;
pub(crate) type NativeStep = Box<dyn FnOnce(&Scope) -> Result<Value, Unwind> + Send>;
pub(crate) type ScopeExit = Box<dyn FnOnce(ScopeEnd<Value>) -> Result<Value, Unwind> + Send>;

pub(crate) enum Prog {
    Pure(Value),
    Send(Request),
    Bind(Box<Prog>, Cont),
    /// Host code run with access to the current handler scope.
    Native(NativeStep),
    Install(Box<Install>),
    Unwind(Unwind),
}

pub(crate) struct Install {
    pub key: EffectKey,
    pub handler: Arc<dyn Handler>,
    pub body: Prog,
    pub exit: ScopeExit,
}

/// How the body of an interpreter scope finished.
pub enum ScopeEnd<A> {
    Returned(A),
    /// The handler aborted to its own prompt with this payload.
    Aborted(Value),
}

impl<A: 'static> ScopeEnd<A> {
    /// The scope's result: the body's value, or the payload the handler
    /// aborted with, which must then have the scope's result type.
    pub fn resolve(self) -> Result<A, Unwind> {
        match self {
            ScopeEnd::Returned(value) => Ok(value),
            ScopeEnd::Aborted(payload) => Ok(downcast::<A>(payload, "aborted scope result")?),
        }
    }
}

/// Continue with the value if it has type `A`, otherwise fault.
fn checked<A: 'static>(value: Value, context: &'static str) -> Prog {
    if value.is::<A>() {
        Prog::Pure(value)
    } else {
        Prog::Unwind(StackError::type_mismatch::<A>(context).into())
    }
}

/// An effectful computation producing `A`.
///
/// Nothing happens until the computation is run, either at the top with
/// [`Eff::run`] or nested inside an interpreter.
#[must_use = "computations do nothing until they are run"]
pub struct Eff<A> {
    prog: Prog,
    _out: PhantomData<fn() -> A>,
}

/// A computation whose result type has been erased.
#[must_use = "computations do nothing until they are run"]
pub struct ErasedEff {
    prog: Prog,
}

impl<A: Send + 'static> Eff<A> {
    pub(crate) fn from_prog(prog: Prog) -> Self {
        Eff {
            prog,
            _out: PhantomData,
        }
    }

    pub(crate) fn into_prog(self) -> Prog {
        self.prog
    }

    pub(crate) fn native(step: impl FnOnce(&Scope) -> Result<Value, Unwind> + Send + 'static) -> Self {
        Eff::from_prog(Prog::Native(Box::new(step)))
    }

    pub fn pure(value: A) -> Self {
        Eff::from_prog(Prog::Pure(erase(value)))
    }

    /// Defer building a computation until it is evaluated.
    pub fn lazy(build: impl FnOnce() -> Eff<A> + Send + 'static) -> Self {
        Eff::from_prog(Prog::Bind(
            Box::new(Prog::Pure(erase(()))),
            Box::new(move |_| build().prog),
        ))
    }

    /// Run a host side effect. Also a point where pending interrupts of the
    /// current task are delivered.
    pub fn embed(action: impl FnOnce() -> A + Send + 'static) -> Self {
        Eff::native(move |_| {
            crate::native::poll_interrupt();
            Ok(erase(action()))
        })
    }

    /// Send an operation to the nearest interpreter of `E`.
    pub fn send<E: Effect>(op: E) -> Self {
        Eff::request(Request::new(op))
    }

    pub fn request(request: Request) -> Self {
        Eff::from_prog(Prog::Bind(
            Box::new(Prog::Send(request)),
            Box::new(|value| checked::<A>(value, "effect result")),
        ))
    }

    /// Resume an unwind captured earlier with [`Eff::capture`].
    pub fn rethrow(unwind: Unwind) -> Self {
        Eff::from_prog(Prog::Unwind(unwind))
    }

    pub fn map<B: Send + 'static>(self, f: impl FnOnce(A) -> B + Send + 'static) -> Eff<B> {
        Eff::from_prog(Prog::Bind(
            Box::new(self.prog),
            Box::new(move |value| match downcast::<A>(value, "map") {
                Ok(a) => Prog::Pure(erase(f(a))),
                Err(err) => Prog::Unwind(err.into()),
            }),
        ))
    }

    pub fn and_then<B: Send + 'static>(
        self,
        f: impl FnOnce(A) -> Eff<B> + Send + 'static,
    ) -> Eff<B> {
        Eff::from_prog(Prog::Bind(
            Box::new(self.prog),
            Box::new(move |value| match downcast::<A>(value, "and_then") {
                Ok(a) => f(a).prog,
                Err(err) => Prog::Unwind(err.into()),
            }),
        ))
    }

    pub fn then<B: Send + 'static>(self, next: Eff<B>) -> Eff<B> {
        Eff::from_prog(Prog::Bind(Box::new(self.prog), Box::new(move |_| next.prog)))
    }

    pub fn void(self) -> Eff<()> {
        self.map(|_| ())
    }

    pub fn erase(self) -> ErasedEff {
        ErasedEff { prog: self.prog }
    }

    /// Run this computation in the current scope and return how it stopped
    /// as data instead of propagating the unwind.
    pub fn capture(self) -> Eff<Result<A, Unwind>> {
        let prog = self.prog;
        Eff::native(move |scope| {
            let outcome = crate::vm::eval(prog, scope)
                .and_then(|value| downcast::<A>(value, "capture").map_err(Unwind::from));
            Ok(erase(outcome))
        })
    }
}

impl Eff<()> {
    pub fn unit() -> Self {
        Eff::pure(())
    }
}

impl ErasedEff {
    pub(crate) fn into_prog(self) -> Prog {
        self.prog
    }

    pub fn pure<T: Send + 'static>(value: T) -> Self {
        Eff::pure(value).erase()
    }

    /// Recover the typed view; evaluation faults if the computation produces
    /// something other than `A`.
    pub fn typed<A: Send + 'static>(self) -> Eff<A> {
        Eff::from_prog(Prog::Bind(
            Box::new(self.prog),
            Box::new(|value| checked::<A>(value, "erased computation")),
        ))
    }
}

impl<A: Send + 'static> From<Eff<A>> for ErasedEff {
    fn from(eff: Eff<A>) -> Self {
        eff.erase()
    }
}
