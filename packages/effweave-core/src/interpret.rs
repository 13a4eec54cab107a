//! Installing interpreters.
//!
//! Every installer pushes one slot for a single effect key around a body.
//! `handle_with` is the general form; the others wrap a closure in one of
//! the small handlers below.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Unwind;
use crate::handler::{Handler, HandlerCx, Request};
use crate::key::{Effect, EffectKey};
use crate::program::{Eff, ErasedEff, Install, Prog, ScopeEnd};
use crate::value::{downcast, erase, Value};

struct FirstOrder<E, F> {
    serve: F,
    _effect: PhantomData<fn(E)>,
}

impl<E, F> Handler for FirstOrder<E, F>
where
    E: Effect,
    F: Fn(E) -> ErasedEff + Send + Sync + 'static,
{
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        let op = request.into_op::<E>()?;
        cx.run_erased((self.serve)(op))
    }
}

struct HigherOrder<E, F> {
    serve: F,
    _effect: PhantomData<fn(E)>,
}

impl<E, F> Handler for HigherOrder<E, F>
where
    E: Effect,
    F: Fn(E, &HandlerCx<'_>) -> Result<Value, Unwind> + Send + Sync + 'static,
{
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        let op = request.into_op::<E>()?;
        (self.serve)(op, cx)
    }
}

struct Translate<E, F> {
    translate: F,
    _effect: PhantomData<fn(E)>,
}

impl<E, G, F> Handler for Translate<E, F>
where
    E: Effect,
    G: Effect,
    F: Fn(E) -> G + Send + Sync + 'static,
{
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        let op = request.into_op::<E>()?;
        cx.forward(Request::new((self.translate)(op)))
    }

    fn describe(&self) -> &'static str {
        "reinterpret"
    }
}

struct Raise;

impl Handler for Raise {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        cx.forward_past(request)
    }

    fn describe(&self) -> &'static str {
        "raise"
    }
}

impl<A: Send + 'static> Eff<A> {
    /// Install `handler` for `key` around this computation. `exit` maps how
    /// the body finished to the result of the whole scope.
    pub fn handle_with<R: Send + 'static>(
        self,
        key: EffectKey,
        handler: impl Handler,
        exit: impl FnOnce(ScopeEnd<A>) -> Result<R, Unwind> + Send + 'static,
    ) -> Eff<R> {
        self.handle_with_shared(key, Arc::new(handler), exit)
    }

    pub fn handle_with_shared<R: Send + 'static>(
        self,
        key: EffectKey,
        handler: Arc<dyn Handler>,
        exit: impl FnOnce(ScopeEnd<A>) -> Result<R, Unwind> + Send + 'static,
    ) -> Eff<R> {
        Eff::from_prog(Prog::Install(Box::new(Install {
            key,
            handler,
            body: self.into_prog(),
            exit: Box::new(move |end| {
                let end = match end {
                    ScopeEnd::Returned(value) => {
                        ScopeEnd::Returned(downcast::<A>(value, "scope result")?)
                    }
                    ScopeEnd::Aborted(payload) => ScopeEnd::Aborted(payload),
                };
                exit(end).map(erase)
            }),
        })))
    }

    /// Interpret the topmost occurrences of `E`. The handler's computation
    /// runs with the interpreters installed below this one.
    pub fn interpret<E: Effect>(
        self,
        serve: impl Fn(E) -> ErasedEff + Send + Sync + 'static,
    ) -> Eff<A> {
        let handler = FirstOrder {
            serve,
            _effect: PhantomData,
        };
        self.handle_with(EffectKey::of::<E>(), handler, ScopeEnd::resolve)
    }

    /// Interpret `E` with access to the handler context, for operations that
    /// carry nested computations.
    pub fn interpret_h<E: Effect>(
        self,
        serve: impl Fn(E, &HandlerCx<'_>) -> Result<Value, Unwind> + Send + Sync + 'static,
    ) -> Eff<A> {
        let handler = HigherOrder {
            serve,
            _effect: PhantomData,
        };
        self.handle_with(EffectKey::of::<E>(), handler, ScopeEnd::resolve)
    }

    /// Rewrite requests of `E` into requests of `G` served further down.
    pub fn reinterpret<E: Effect, G: Effect>(
        self,
        translate: impl Fn(E) -> G + Send + Sync + 'static,
    ) -> Eff<A> {
        let handler = Translate {
            translate,
            _effect: PhantomData,
        };
        self.handle_with(EffectKey::of::<E>(), handler, ScopeEnd::resolve)
    }

    /// Route requests of `E` past the nearest interpreter of `E` installed
    /// outside this computation.
    pub fn raise_over<E: Effect>(self) -> Eff<A> {
        self.handle_with(EffectKey::of::<E>(), Raise, ScopeEnd::resolve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use parking_lot::Mutex;

    enum Ask {
        Number,
    }
    impl Effect for Ask {}

    struct Log(String);
    impl Effect for Log {}

    struct Twice(ErasedEff);
    impl Effect for Twice {}

    fn ask() -> Eff<u32> {
        Eff::send(Ask::Number)
    }

    #[test]
    fn test_interpret_resumes_with_value() {
        let eff = ask()
            .and_then(|a| ask().map(move |b| a + b))
            .interpret(|op: Ask| match op {
                Ask::Number => ErasedEff::pure(21_u32),
            });
        assert_eq!(eff.run(), 42);
    }

    #[test]
    fn test_nearest_interpreter_wins() {
        let eff = ask()
            .interpret(|_: Ask| ErasedEff::pure(1_u32))
            .interpret(|_: Ask| ErasedEff::pure(2_u32));
        assert_eq!(eff.run(), 1);
    }

    #[test]
    fn test_handler_effects_go_below_it() {
        // The inner Ask interpreter asks too; it must reach the outer one.
        let eff = ask()
            .interpret(|_: Ask| ask().map(|n| n * 10).erase())
            .interpret(|_: Ask| ErasedEff::pure(4_u32));
        assert_eq!(eff.run(), 40);
    }

    #[test]
    fn test_interpret_h_runs_nested_at_site() {
        let eff = Eff::<u32>::send(Twice(ask().erase()))
            .interpret_h(|Twice(inner): Twice, cx| {
                let n: u32 = cx.run_nested(inner.typed())?;
                Ok(erase(n * 2))
            })
            .interpret(|_: Ask| ErasedEff::pure(5_u32));
        assert_eq!(eff.run(), 10);
    }

    #[test]
    fn test_reinterpret_forwards_translated_op() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let eff = ask()
            .reinterpret(|_: Ask| Log("asked".to_string()))
            .interpret(move |Log(line): Log| {
                sink.lock().push(line);
                ErasedEff::pure(9_u32)
            });
        assert_eq!(eff.run(), 9);
        assert_eq!(*seen.lock(), vec!["asked".to_string()]);
    }

    #[test]
    fn test_raise_over_skips_nearest() {
        let eff = ask()
            .raise_over::<Ask>()
            .interpret(|_: Ask| ErasedEff::pure(1_u32))
            .interpret(|_: Ask| ErasedEff::pure(2_u32));
        assert_eq!(eff.run(), 2);
    }

    #[test]
    fn test_raise_over_without_target_is_unhandled() {
        let eff = ask().raise_over::<Ask>().interpret(|_: Ask| ErasedEff::pure(1_u32));
        assert!(matches!(eff.try_run(), Err(StackError::Unhandled { .. })));
    }

    #[test]
    fn test_wrong_result_type_is_a_fault() {
        let eff = ask().interpret(|_: Ask| ErasedEff::pure("not a number"));
        assert!(matches!(
            eff.try_run(),
            Err(StackError::TypeMismatch { expected: "u32", .. })
        ));
    }

    #[test]
    fn test_abort_to_own_prompt_ends_scope() {
        let eff = ask()
            .map(|n| n + 1000)
            .interpret_h(|_: Ask, cx| Err(cx.abort(erase(7_u32))));
        assert_eq!(eff.run(), 7);
    }
}
