//! The Resource effect: scoped acquisition with guaranteed release.
//!
//! [`general_bracket`] is the only primitive; every other operation here is
//! derived from it. Release runs exactly once, before the bracket returns or
//! propagates, and learns how the use phase ended through an [`Exit`].

use std::panic::{self, AssertUnwindSafe};

use effweave_core::native::{self, Mask};
use effweave_core::value::downcast;
use effweave_core::{
    erase, Eff, Effect, EffectKey, ErasedEff, Handler, HandlerCx, Request, ScopeEnd, StackError,
    Unwind, Value,
};

/// How the use phase of a bracket ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit<B> {
    Success(B),
    /// Abandoned by a short-circuit under [`run_resource`], or by a native
    /// exception under [`resource_to_native`].
    Failure,
    /// Abandoned by a runtime fault under [`run_resource`], or by a
    /// short-circuit under [`resource_to_native`].
    Aborted,
}

impl<B> Exit<B> {
    pub fn as_ref(&self) -> Exit<&B> {
        match self {
            Exit::Success(value) => Exit::Success(value),
            Exit::Failure => Exit::Failure,
            Exit::Aborted => Exit::Aborted,
        }
    }

    pub fn map<C>(self, f: impl FnOnce(B) -> C) -> Exit<C> {
        match self {
            Exit::Success(value) => Exit::Success(f(value)),
            Exit::Failure => Exit::Failure,
            Exit::Aborted => Exit::Aborted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }
}

type UsePhase = Box<dyn FnOnce(&Value) -> ErasedEff + Send>;
type ReleasePhase = Box<dyn FnOnce(Value, Exit<&Value>) -> ErasedEff + Send>;

/// The bracket request: acquire, use, release, and how to pair the use and
/// release results.
pub struct GeneralBracket {
    acquire: ErasedEff,
    use_: UsePhase,
    release: ReleasePhase,
    pair: fn(Value, Value) -> Result<Value, StackError>,
}

impl Effect for GeneralBracket {}

fn pair<B: Send + 'static, C: Send + 'static>(
    used: Value,
    released: Value,
) -> Result<Value, StackError> {
    let used = downcast::<B>(used, "bracket use result")?;
    let released = downcast::<C>(released, "bracket release result")?;
    Ok(erase((used, released)))
}

fn mismatch<T>(context: &'static str) -> ErasedEff {
    Eff::<()>::rethrow(StackError::type_mismatch::<T>(context).into()).erase()
}

/// Acquire a resource, use it, and release it with the outcome of the use.
/// Returns the results of use and release.
pub fn general_bracket<R, B, C>(
    acquire: Eff<R>,
    release: impl FnOnce(R, Exit<&B>) -> Eff<C> + Send + 'static,
    use_: impl FnOnce(&R) -> Eff<B> + Send + 'static,
) -> Eff<(B, C)>
where
    R: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    Eff::send(GeneralBracket {
        acquire: acquire.erase(),
        use_: Box::new(move |resource: &Value| match resource.downcast_ref::<R>() {
            Some(resource) => use_(resource).erase(),
            None => mismatch::<R>("bracket use"),
        }),
        release: Box::new(move |resource: Value, exit: Exit<&Value>| {
            let resource = match downcast::<R>(resource, "bracket release") {
                Ok(resource) => resource,
                Err(err) => return Eff::<()>::rethrow(err.into()).erase(),
            };
            let exit = match exit {
                Exit::Success(used) => match used.downcast_ref::<B>() {
                    Some(used) => Exit::Success(used),
                    None => return mismatch::<B>("bracket release"),
                },
                Exit::Failure => Exit::Failure,
                Exit::Aborted => Exit::Aborted,
            };
            release(resource, exit).erase()
        }),
        pair: pair::<B, C>,
    })
}

pub fn bracket<R, B, C>(
    acquire: Eff<R>,
    release: impl FnOnce(R) -> Eff<C> + Send + 'static,
    use_: impl FnOnce(&R) -> Eff<B> + Send + 'static,
) -> Eff<B>
where
    R: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    general_bracket(acquire, move |resource, _| release(resource), use_).map(|(used, _)| used)
}

/// Bracket whose use and release do not need the resource.
pub fn bracket_<R, B, C>(acquire: Eff<R>, release: Eff<C>, use_: Eff<B>) -> Eff<B>
where
    R: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    bracket(acquire, move |_| release, move |_| use_)
}

/// Release only when use did not complete.
pub fn bracket_on_error<R, B, C>(
    acquire: Eff<R>,
    release: impl FnOnce(R) -> Eff<C> + Send + 'static,
    use_: impl FnOnce(&R) -> Eff<B> + Send + 'static,
) -> Eff<B>
where
    R: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    general_bracket(
        acquire,
        move |resource, exit| match exit {
            Exit::Success(_) => Eff::unit(),
            Exit::Failure | Exit::Aborted => release(resource).void(),
        },
        use_,
    )
    .map(|(used, ())| used)
}

/// Run `finalizer` after `action`, however `action` ends.
pub fn finally<A: Send + 'static, B: Send + 'static>(action: Eff<A>, finalizer: Eff<B>) -> Eff<A> {
    bracket_(Eff::unit(), finalizer, action)
}

/// Run `handler` only if `action` is abandoned.
pub fn on_exception<A: Send + 'static, B: Send + 'static>(action: Eff<A>, handler: Eff<B>) -> Eff<A> {
    bracket_on_error(Eff::unit(), move |()| handler, move |_| action)
}

struct LocalResource;

impl Handler for LocalResource {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        let GeneralBracket {
            acquire,
            use_,
            release,
            pair,
        } = request.into_op()?;

        let resource = cx.run_nested_erased(acquire)?;
        match cx.run_nested_erased(use_(&resource)) {
            Ok(used) => {
                let released = cx.run_nested_erased(release(resource, Exit::Success(&used)))?;
                Ok(pair(used, released)?)
            }
            Err(unwind) => {
                let exit = if unwind.is_abort() {
                    Exit::Failure
                } else {
                    Exit::Aborted
                };
                // Whatever release does to state above this interpreter is
                // discarded on the abandoned path.
                let snapshot = cx.snapshot_site();
                let released = cx.run_nested_erased(release(resource, exit));
                cx.restore_site(snapshot);
                released?;
                Err(unwind)
            }
        }
    }

    fn describe(&self) -> &'static str {
        "run_resource"
    }
}

/// Interpret brackets by inspecting how the use phase returned. Native
/// panics pass through without running release; use
/// [`resource_to_native`] when they must be covered.
pub fn run_resource<A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.handle_with(EffectKey::of::<GeneralBracket>(), LocalResource, ScopeEnd::resolve)
}

struct NativeResource;

impl Handler for NativeResource {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        let GeneralBracket {
            acquire,
            use_,
            release,
            pair,
        } = request.into_op()?;

        let caller_mask = native::current_mask();
        let resource = cx.run_nested_erased(acquire)?;
        let outcome = native::with_mask(Mask::Uninterruptible, || -> Result<Value, Unwind> {
            let used = panic::catch_unwind(AssertUnwindSafe(|| {
                native::with_mask(caller_mask, || cx.run_nested_erased(use_(&resource)))
            }));
            match used {
                Ok(Ok(used)) => {
                    let released = cx.run_nested_erased(release(resource, Exit::Success(&used)))?;
                    Ok(pair(used, released)?)
                }
                Ok(Err(unwind)) => {
                    log::debug!("bracket use abandoned by a short-circuit; releasing");
                    cx.run_nested_erased(release(resource, Exit::Aborted))?;
                    Err(unwind)
                }
                Err(payload) => {
                    log::debug!("bracket use raised a native exception; releasing");
                    cx.run_nested_erased(release(resource, Exit::Failure))?;
                    panic::resume_unwind(payload)
                }
            }
        });
        native::poll_interrupt();
        outcome
    }

    fn describe(&self) -> &'static str {
        "resource_to_native"
    }
}

/// Interpret brackets with native exception handling and interruption
/// masking: acquire runs under the caller's mask, release runs
/// uninterruptibly, and use runs with the caller's mask restored.
pub fn resource_to_native<A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.handle_with(
        EffectKey::of::<GeneralBracket>(),
        NativeResource,
        ScopeEnd::resolve,
    )
}
