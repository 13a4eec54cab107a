//! Bridge to the native runtime.
//!
//! Native interpreters use the panic channel (`resume_unwind` /
//! `catch_unwind`) as their exception mechanism. Errors travel inside an
//! [`ErrorCarrier`] stamped with the identity of the interpreter that owns
//! them. Each thread also carries a task context: the interrupt flag of the
//! task it runs (if any) and the current interruption [`Mask`].

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::StackError;
use crate::ids::{Identity, TaskId};
use crate::program::Eff;
use crate::value::{downcast, erase, Value};

/// An application error on the native panic channel.
pub struct ErrorCarrier {
    identity: Identity,
    error_type: &'static str,
    payload: Value,
}

impl ErrorCarrier {
    /// Raise `error` on behalf of the interpreter with `identity`.
    ///
    /// Uses `resume_unwind`, so the panic hook is not invoked.
    pub fn raise<E: Send + 'static>(identity: Identity, error: E) -> ! {
        panic::resume_unwind(Box::new(ErrorCarrier {
            identity,
            error_type: type_name::<E>(),
            payload: erase(error),
        }))
    }

    /// Take the error out of a native panic payload if it belongs to the
    /// interpreter with `identity`. Any other payload is handed back so the
    /// caller can re-raise it untouched.
    pub fn claim(
        payload: Box<dyn Any + Send>,
        identity: Identity,
    ) -> Result<Value, Box<dyn Any + Send>> {
        match payload.downcast::<ErrorCarrier>() {
            Ok(carrier) if carrier.identity == identity => Ok(carrier.payload),
            Ok(carrier) => Err(carrier),
            Err(payload) => Err(payload),
        }
    }

    pub(crate) fn escaped(&self) -> StackError {
        StackError::EscapedError {
            identity: self.identity,
            error_type: self.error_type,
        }
    }
}

impl fmt::Debug for ErrorCarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCarrier")
            .field("identity", &self.identity)
            .field("error_type", &self.error_type)
            .finish_non_exhaustive()
    }
}

/// Panic payload delivered to a task that was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted {
    pub task: TaskId,
}

/// Which interrupts may be delivered on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mask {
    #[default]
    Unmasked,
    /// Interrupts are delivered only at blocking points.
    Masked,
    /// Interrupts stay pending until the mask is lifted.
    Uninterruptible,
}

/// Shared interrupt request flag of one task.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        InterruptFlag::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

struct TaskContext {
    id: TaskId,
    flag: InterruptFlag,
}

thread_local! {
    static TASK: RefCell<Option<TaskContext>> = RefCell::new(None);
    static MASK: Cell<Mask> = Cell::new(Mask::Unmasked);
}

pub fn current_task() -> Option<TaskId> {
    TASK.with(|task| task.borrow().as_ref().map(|cx| cx.id))
}

pub fn current_mask() -> Mask {
    MASK.with(Cell::get)
}

struct MaskGuard {
    previous: Mask,
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        MASK.with(|mask| mask.set(self.previous));
    }
}

/// Run `f` with `mask`; the previous mask is restored even if `f` unwinds.
pub fn with_mask<T>(mask: Mask, f: impl FnOnce() -> T) -> T {
    let previous = MASK.with(|cell| cell.replace(mask));
    let _guard = MaskGuard { previous };
    f()
}

/// Deliver a pending interrupt at a non-blocking safe point.
pub fn poll_interrupt() {
    deliver(false);
}

/// Deliver a pending interrupt before blocking.
pub fn poll_interrupt_blocking() {
    deliver(true);
}

fn deliver(blocking: bool) {
    let allowed = match current_mask() {
        Mask::Unmasked => true,
        Mask::Masked => blocking,
        Mask::Uninterruptible => false,
    };
    if !allowed {
        return;
    }
    let pending = TASK.with(|task| {
        task.borrow()
            .as_ref()
            .and_then(|cx| cx.flag.take().then_some(cx.id))
    });
    if let Some(task) = pending {
        log::debug!("delivering interrupt to {task}");
        panic::resume_unwind(Box::new(Interrupted { task }));
    }
}

struct TaskGuard {
    previous: Option<TaskContext>,
    mask: Mask,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        TASK.with(|task| *task.borrow_mut() = previous);
        MASK.with(|mask| mask.set(self.mask));
    }
}

/// Run `f` as task `id` on the current thread: interrupts raised on `flag`
/// are delivered at its safe points. The task starts unmasked.
pub fn run_in_task<T>(id: TaskId, flag: InterruptFlag, f: impl FnOnce() -> T) -> T {
    let previous = TASK.with(|task| task.borrow_mut().replace(TaskContext { id, flag }));
    let mask = MASK.with(|cell| cell.replace(Mask::Unmasked));
    let _guard = TaskGuard { previous, mask };
    f()
}

impl<A: Send + 'static> Eff<A> {
    /// Catch a native panic whose payload has type `X`. Other payloads keep
    /// unwinding.
    pub fn catch_native<X: Send + 'static>(self) -> Eff<Result<A, X>> {
        let prog = self.into_prog();
        Eff::native(move |scope| {
            match panic::catch_unwind(AssertUnwindSafe(|| crate::vm::eval(prog, scope))) {
                Ok(outcome) => {
                    let value = downcast::<A>(outcome?, "catch_native")?;
                    Ok(erase(Ok::<A, X>(value)))
                }
                Err(payload) => match payload.downcast::<X>() {
                    Ok(caught) => Ok(erase(Err::<A, X>(*caught))),
                    Err(payload) => panic::resume_unwind(payload),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interrupted_by(f: impl FnOnce()) -> Option<TaskId> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => None,
            Err(payload) => payload.downcast::<Interrupted>().ok().map(|i| i.task),
        }
    }

    #[test]
    fn test_claim_matches_identity_only() {
        let mine = Identity::fresh();
        let other = Identity::fresh();
        let payload = panic::catch_unwind(|| ErrorCarrier::raise(other, "oops")).unwrap_err();

        let payload = ErrorCarrier::claim(payload, mine).unwrap_err();
        let error = ErrorCarrier::claim(payload, other).unwrap();
        assert_eq!(*error.downcast::<&str>().unwrap(), "oops");
    }

    #[test]
    fn test_claim_hands_back_foreign_payloads() {
        let payload: Box<dyn Any + Send> = Box::new(17_u8);
        let payload = ErrorCarrier::claim(payload, Identity::fresh()).unwrap_err();
        assert_eq!(*payload.downcast::<u8>().unwrap(), 17);
    }

    #[test]
    fn test_poll_outside_task_is_noop() {
        assert_eq!(current_task(), None);
        poll_interrupt();
        poll_interrupt_blocking();
    }

    #[test]
    fn test_unmasked_task_receives_interrupt() {
        let id = TaskId::fresh();
        let flag = InterruptFlag::new();
        flag.raise();
        let hit = interrupted_by(|| run_in_task(id, flag.clone(), poll_interrupt));
        assert_eq!(hit, Some(id));
        assert!(!flag.is_raised());
        assert_eq!(current_task(), None);
    }

    #[test]
    fn test_uninterruptible_defers_until_unmasked() {
        let id = TaskId::fresh();
        let flag = InterruptFlag::new();
        let hit = interrupted_by(|| {
            run_in_task(id, flag.clone(), || {
                with_mask(Mask::Uninterruptible, || {
                    flag.raise();
                    poll_interrupt();
                    poll_interrupt_blocking();
                });
                assert!(flag.is_raised());
                poll_interrupt();
            })
        });
        assert_eq!(hit, Some(id));
    }

    #[test]
    fn test_masked_delivers_only_at_blocking_points() {
        let id = TaskId::fresh();
        let flag = InterruptFlag::new();
        flag.raise();
        let hit = interrupted_by(|| {
            run_in_task(id, flag.clone(), || {
                with_mask(Mask::Masked, || {
                    poll_interrupt();
                    assert!(flag.is_raised());
                    poll_interrupt_blocking();
                })
            })
        });
        assert_eq!(hit, Some(id));
        assert_eq!(current_mask(), Mask::Unmasked);
    }

    #[test]
    fn test_catch_native_selects_payload_type() {
        struct Boom(u32);
        let eff = Eff::<u32>::embed(|| panic::resume_unwind(Box::new(Boom(7))))
            .catch_native::<Boom>()
            .map(|outcome| outcome.map_err(|boom| boom.0));
        assert_eq!(eff.run(), Err(7));

        let fine = Eff::pure(3_u32).catch_native::<Boom>().map(|r| r.is_ok());
        assert!(fine.run());
    }
}
