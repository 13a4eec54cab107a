//! The Error effect: throw and catch.
//!
//! Two interpreters with the same observable behaviour:
//!
//! - [`run_error`] short-circuits through return values: a throw aborts to
//!   the interpreter's prompt.
//! - [`error_to_native`] raises the error on the native panic channel,
//!   stamped with an identity fresh to that interpreter invocation, so
//!   nested interpreters of the same error type never catch each other's
//!   errors.
//!
//! Neither interpreter rolls back state. Changes an abandoned action made
//! to any interpreter, installed inside or outside the Error interpreter,
//! are still visible to the catch handler and after the throw. This differs
//! from `run_resource`, which discards what release changed on an abandoned
//! bracket.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use effweave_core::value::downcast;
use effweave_core::{
    erase, Eff, Effect, EffectKey, ErasedEff, ErrorCarrier, Handler, HandlerCx, Identity, Marker,
    Request, ScopeEnd, Unwind, Value,
};

pub enum ErrorOp<E> {
    Throw(E),
    Catch {
        action: ErasedEff,
        handler: Box<dyn FnOnce(E) -> ErasedEff + Send>,
    },
}

impl<E: Send + 'static> Effect for ErrorOp<E> {}

pub fn throw<E: Send + 'static, A: Send + 'static>(error: E) -> Eff<A> {
    Eff::send(ErrorOp::Throw(error))
}

/// Run `action`; if it throws `E`, continue with `handler`.
pub fn catch<E, A>(action: Eff<A>, handler: impl FnOnce(E) -> Eff<A> + Send + 'static) -> Eff<A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    Eff::send(ErrorOp::Catch {
        action: action.erase(),
        handler: Box::new(move |error| handler(error).erase()),
    })
}

pub fn from_either<E: Send + 'static, A: Send + 'static>(result: Result<A, E>) -> Eff<A> {
    match result {
        Ok(value) => Eff::pure(value),
        Err(error) => throw(error),
    }
}

/// Throw `error` when the option is empty.
pub fn note<E: Send + 'static, A: Send + 'static>(option: Option<A>, error: E) -> Eff<A> {
    match option {
        Some(value) => Eff::pure(value),
        None => throw(error),
    }
}

/// Run `action` and return a thrown `E` as a value.
pub fn try_<E: Send + 'static, A: Send + 'static>(action: Eff<A>) -> Eff<Result<A, E>> {
    catch(action.map(Ok), |error| Eff::pure(Err(error)))
}

/// Like [`try_`], but only errors `select` maps to `Some` are returned; the
/// rest are rethrown.
pub fn try_just<E, B, A>(
    select: impl FnOnce(&E) -> Option<B> + Send + 'static,
    action: Eff<A>,
) -> Eff<Result<A, B>>
where
    E: Send + 'static,
    B: Send + 'static,
    A: Send + 'static,
{
    try_::<E, A>(action).and_then(move |outcome| match outcome {
        Ok(value) => Eff::pure(Ok(value)),
        Err(error) => match select(&error) {
            Some(selected) => Eff::pure(Err(selected)),
            None => throw(error),
        },
    })
}

/// Like [`catch`], but only errors `select` maps to `Some` reach `handler`.
pub fn catch_just<E, B, A>(
    select: impl FnOnce(&E) -> Option<B> + Send + 'static,
    action: Eff<A>,
    handler: impl FnOnce(B) -> Eff<A> + Send + 'static,
) -> Eff<A>
where
    E: Send + 'static,
    B: Send + 'static,
    A: Send + 'static,
{
    catch(action, move |error: E| match select(&error) {
        Some(selected) => handler(selected),
        None => throw(error),
    })
}

/// Rethrow errors of `body` as `E2`.
pub fn map_error<E1, E2, A>(body: Eff<A>, convert: impl FnOnce(E1) -> E2 + Send + 'static) -> Eff<A>
where
    E1: Send + 'static,
    E2: Send + 'static,
    A: Send + 'static,
{
    run_error::<E1, A>(body).and_then(move |outcome| match outcome {
        Ok(value) => Eff::pure(value),
        Err(error) => throw(convert(error)),
    })
}

/// Send the throws and catches of `body` past the nearest interpreter of
/// `E` installed around it.
pub fn raise<E: Send + 'static, A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.raise_over::<ErrorOp<E>>()
}

/// Run a host closure, turning a native panic with payload `X` into a throw
/// of `X`. Other panics keep unwinding.
pub fn from_exception<X, A>(action: impl FnOnce() -> A + Send + 'static) -> Eff<A>
where
    X: Send + 'static,
    A: Send + 'static,
{
    from_exception_via(action, |caught: X| caught)
}

pub fn from_exception_via<X, E, A>(
    action: impl FnOnce() -> A + Send + 'static,
    convert: impl FnOnce(X) -> E + Send + 'static,
) -> Eff<A>
where
    X: Send + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    from_exception_sem_via(Eff::embed(action), convert)
}

/// Run an effectful computation, turning a native panic with payload `X`
/// raised anywhere inside it into a throw of `X`.
pub fn from_exception_sem<X, A>(action: Eff<A>) -> Eff<A>
where
    X: Send + 'static,
    A: Send + 'static,
{
    from_exception_sem_via(action, |caught: X| caught)
}

pub fn from_exception_sem_via<X, E, A>(
    action: Eff<A>,
    convert: impl FnOnce(X) -> E + Send + 'static,
) -> Eff<A>
where
    X: Send + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    action
        .catch_native::<X>()
        .and_then(move |outcome| from_either(outcome.map_err(convert)))
}

fn thrown<E: 'static>(payload: Value) -> Result<E, Unwind> {
    Ok(downcast::<E>(payload, "thrown error")?)
}

fn scope_result<E: Send + 'static, A: Send + 'static>(
    end: ScopeEnd<A>,
) -> Result<Result<A, E>, Unwind> {
    match end {
        ScopeEnd::Returned(value) => Ok(Ok(value)),
        ScopeEnd::Aborted(payload) => Ok(Err(thrown::<E>(payload)?)),
    }
}

struct LocalError<E>(PhantomData<fn(E)>);

impl<E: Send + 'static> Handler for LocalError<E> {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        match request.into_op::<ErrorOp<E>>()? {
            ErrorOp::Throw(error) => Err(cx.abort(erase(error))),
            ErrorOp::Catch { action, handler } => match cx.run_nested_erased(action) {
                Ok(value) => Ok(value),
                Err(unwind) => {
                    let error = thrown::<E>(unwind.claim(cx.marker())?)?;
                    cx.run_nested_erased(handler(error))
                }
            },
        }
    }

    fn describe(&self) -> &'static str {
        "run_error"
    }
}

/// Interpret `E` errors by short-circuiting to this interpreter.
pub fn run_error<E: Send + 'static, A: Send + 'static>(body: Eff<A>) -> Eff<Result<A, E>> {
    body.handle_with(
        EffectKey::of::<ErrorOp<E>>(),
        LocalError::<E>(PhantomData),
        scope_result::<E, A>,
    )
}

struct NativeError<E> {
    identity: Identity,
    _error: PhantomData<fn(E)>,
}

impl<E: Send + 'static> Handler for NativeError<E> {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        match request.into_op::<ErrorOp<E>>()? {
            ErrorOp::Throw(error) => ErrorCarrier::raise(self.identity, error),
            ErrorOp::Catch { action, handler } => {
                match panic::catch_unwind(AssertUnwindSafe(|| cx.run_nested_erased(action))) {
                    Ok(outcome) => outcome,
                    Err(payload) => match ErrorCarrier::claim(payload, self.identity) {
                        Ok(error) => cx.run_nested_erased(handler(thrown::<E>(error)?)),
                        Err(payload) => panic::resume_unwind(payload),
                    },
                }
            }
        }
    }

    fn enter(
        &self,
        marker: Marker,
        body: &mut dyn FnMut() -> Result<Value, Unwind>,
    ) -> Result<Value, Unwind> {
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(outcome) => outcome,
            Err(payload) => match ErrorCarrier::claim(payload, self.identity) {
                Ok(error) => Err(Unwind::abort(marker, error)),
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    fn describe(&self) -> &'static str {
        "error_to_native"
    }
}

/// Interpret `E` errors on the native panic channel. Each evaluation of the
/// returned computation allocates a fresh identity.
pub fn error_to_native<E: Send + 'static, A: Send + 'static>(body: Eff<A>) -> Eff<Result<A, E>> {
    Eff::lazy(move || {
        let identity = Identity::fresh();
        log::trace!("native error interpreter {identity} for {}", std::any::type_name::<E>());
        body.handle_with(
            EffectKey::of::<ErrorOp<E>>(),
            NativeError::<E> {
                identity,
                _error: PhantomData,
            },
            scope_result::<E, A>,
        )
    })
}
