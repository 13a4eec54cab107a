//! The Async effect: spawn, await and cancel tasks.
//!
//! Under [`async_to_native`] each spawned body runs on its own native thread
//! with a forked copy of the stack it was spawned from. Awaiting re-raises
//! in the awaiting context whatever stopped the task, so identity-stamped
//! errors reach the native error interpreter that owns them.
//! [`run_async_sequential`] runs each body to completion at spawn time.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use effweave_core::native::{self, InterruptFlag, Interrupted};
use effweave_core::value::{describe_panic, downcast};
use effweave_core::{
    erase, Eff, Effect, EffectKey, ErasedEff, Handler, HandlerCx, Request, RuntimeConfig,
    ScopeEnd, StackError, TaskId, Unwind, Value,
};

type Joined = thread::Result<Result<Value, Unwind>>;

enum TaskState {
    Running(JoinHandle<Result<Value, Unwind>>),
    Finished(Joined),
    Taken,
}

struct TaskCell {
    id: TaskId,
    interrupt: InterruptFlag,
    state: Mutex<TaskState>,
}

/// Untyped handle to a spawned task, as carried by requests.
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskCell>);

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.0.id
    }

    fn cancel(&self) {
        log::debug!("cancel requested for {}", self.0.id);
        self.0.interrupt.raise();
    }

    /// Wait for the task. `None` when it ended because it was interrupted.
    fn join(&self) -> Result<Option<Value>, Unwind> {
        // An interrupted awaiter must leave the task joinable.
        native::poll_interrupt_blocking();
        let state = std::mem::replace(&mut *self.0.state.lock(), TaskState::Taken);
        let joined = match state {
            TaskState::Running(handle) => handle.join(),
            TaskState::Finished(joined) => joined,
            TaskState::Taken => return Ok(None),
        };
        settle(self.0.id, joined)
    }
}

fn settle(id: TaskId, joined: Joined) -> Result<Option<Value>, Unwind> {
    match joined {
        Ok(outcome) => outcome.map(Some),
        Err(payload) => match payload.downcast::<Interrupted>() {
            Ok(interrupted) if interrupted.task == id => {
                log::debug!("{id} ended by interruption");
                Ok(None)
            }
            Ok(interrupted) => panic::resume_unwind(interrupted),
            Err(payload) => {
                log::debug!("{id} stopped by a native panic: {}", describe_panic(&*payload));
                panic::resume_unwind(payload)
            }
        },
    }
}

/// A spawned task producing `A`.
pub struct Task<A> {
    handle: TaskHandle,
    _out: PhantomData<fn() -> A>,
}

impl<A> Task<A> {
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }
}

pub enum AsyncOp {
    Spawn(ErasedEff),
    Await {
        task: TaskHandle,
        finish: fn(Option<Value>) -> Result<Value, StackError>,
    },
    Cancel(TaskHandle),
}

impl Effect for AsyncOp {}

fn finish<A: Send + 'static>(joined: Option<Value>) -> Result<Value, StackError> {
    let joined = match joined {
        Some(value) => Some(downcast::<A>(value, "awaited task")?),
        None => None,
    };
    Ok(erase(joined))
}

pub fn spawn<A: Send + 'static>(body: Eff<A>) -> Eff<Task<A>> {
    Eff::<TaskHandle>::send(AsyncOp::Spawn(body.erase())).map(|handle| Task {
        handle,
        _out: PhantomData,
    })
}

/// Wait for `task`; `None` if it was cancelled before completing.
pub fn await_<A: Send + 'static>(task: Task<A>) -> Eff<Option<A>> {
    Eff::send(AsyncOp::Await {
        task: task.handle,
        finish: finish::<A>,
    })
}

/// Ask `task` to stop. The request is observed at the task's next safe
/// point outside masked regions.
pub fn cancel<A>(task: &Task<A>) -> Eff<()> {
    Eff::send(AsyncOp::Cancel(task.handle.clone()))
}

fn await_task(
    task: TaskHandle,
    finish: fn(Option<Value>) -> Result<Value, StackError>,
) -> Result<Value, Unwind> {
    Ok(finish(task.join()?)?)
}

fn cancel_task(task: TaskHandle) -> Result<Value, Unwind> {
    task.cancel();
    Ok(erase(()))
}

struct NativeAsync {
    config: Arc<RuntimeConfig>,
}

impl NativeAsync {
    fn spawn(&self, body: ErasedEff, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        let detached = cx.detach(body);
        let id = TaskId::fresh();
        let interrupt = InterruptFlag::new();
        let task_interrupt = interrupt.clone();

        let name = format!("{}-{}", self.config.task_name_prefix, id.raw());
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = self.config.task_stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || native::run_in_task(id, task_interrupt, || detached.run()))
            .map_err(|source| StackError::TaskSpawn { task: id, source })?;
        log::debug!("spawned {id} on thread {name}");

        Ok(erase(TaskHandle(Arc::new(TaskCell {
            id,
            interrupt,
            state: Mutex::new(TaskState::Running(handle)),
        }))))
    }
}

impl Handler for NativeAsync {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        match request.into_op::<AsyncOp>()? {
            AsyncOp::Spawn(body) => self.spawn(body, cx),
            AsyncOp::Await { task, finish } => await_task(task, finish),
            AsyncOp::Cancel(task) => cancel_task(task),
        }
    }

    fn describe(&self) -> &'static str {
        "async_to_native"
    }
}

/// Run spawned tasks on native threads configured by the installed
/// [`RuntimeConfig`].
pub fn async_to_native<A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    Eff::lazy(move || async_to_native_with(body, RuntimeConfig::current()))
}

pub fn async_to_native_with<A: Send + 'static>(body: Eff<A>, config: Arc<RuntimeConfig>) -> Eff<A> {
    body.handle_with(
        EffectKey::of::<AsyncOp>(),
        NativeAsync { config },
        ScopeEnd::resolve,
    )
}

struct SequentialAsync;

impl Handler for SequentialAsync {
    fn handle(&self, request: Request, cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        match request.into_op::<AsyncOp>()? {
            AsyncOp::Spawn(body) => {
                let id = TaskId::fresh();
                let interrupt = InterruptFlag::new();
                let joined: Result<_, Box<dyn Any + Send>> = panic::catch_unwind(AssertUnwindSafe(|| {
                    native::run_in_task(id, interrupt.clone(), || cx.run_nested_erased(body))
                }));
                Ok(erase(TaskHandle(Arc::new(TaskCell {
                    id,
                    interrupt,
                    state: Mutex::new(TaskState::Finished(joined)),
                }))))
            }
            AsyncOp::Await { task, finish } => await_task(task, finish),
            AsyncOp::Cancel(task) => cancel_task(task),
        }
    }

    fn describe(&self) -> &'static str {
        "run_async_sequential"
    }
}

/// Run each spawned body to completion when it is spawned, in the stack it
/// was spawned from. Its outcome is replayed when the task is awaited.
pub fn run_async_sequential<A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.handle_with(EffectKey::of::<AsyncOp>(), SequentialAsync, ScopeEnd::resolve)
}
