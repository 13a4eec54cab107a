//! Error types for the effect stack.
//!
//! `StackError` covers violations of the runtime contract. `Unwind` is the
//! evaluator's short-circuit signal: either an `Abort` addressed to a prompt,
//! or a `Fault` carrying a `StackError`.

use std::any::type_name;
use std::fmt;

use thiserror::Error;

use crate::ids::{Identity, Marker, TaskId};
use crate::key::EffectKey;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("unhandled effect {key}: no interpreter for it is installed")]
    Unhandled { key: EffectKey },

    #[error("type mismatch in {context}: expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        context: &'static str,
    },

    #[error("short-circuit addressed to prompt {marker} escaped every enclosing interpreter")]
    EscapedAbort { marker: Marker },

    #[error(
        "error of type {error_type} thrown under native error interpreter {identity} escaped its scope; \
         the computation that raised it outlived the interpreter that owns it"
    )]
    EscapedError {
        identity: Identity,
        error_type: &'static str,
    },

    #[error("interpreter {handler} entered the body of its scope more than once")]
    ScopeReentered { handler: &'static str },

    #[error("failed to start a native thread for {task}: {source}")]
    TaskSpawn {
        task: TaskId,
        #[source]
        source: std::io::Error,
    },
}

impl StackError {
    pub fn unhandled(key: EffectKey) -> Self {
        StackError::Unhandled { key }
    }

    pub fn type_mismatch<T>(context: &'static str) -> Self {
        StackError::TypeMismatch {
            expected: type_name::<T>(),
            context,
        }
    }
}

/// A short-circuit travelling to the prompt identified by `target`.
pub struct Abort {
    target: Marker,
    payload: Value,
}

impl Abort {
    pub fn target(&self) -> Marker {
        self.target
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

impl fmt::Debug for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Abort")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// How a computation stopped without producing a value.
#[derive(Debug)]
pub enum Unwind {
    Abort(Abort),
    Fault(StackError),
}

impl Unwind {
    pub fn abort(target: Marker, payload: Value) -> Self {
        Unwind::Abort(Abort { target, payload })
    }

    /// Take the payload if this unwind is addressed to `marker`, otherwise
    /// hand the unwind back unchanged.
    pub fn claim(self, marker: Marker) -> Result<Value, Unwind> {
        match self {
            Unwind::Abort(abort) if abort.target == marker => Ok(abort.payload),
            other => Err(other),
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Unwind::Abort(_))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Unwind::Fault(_))
    }

    /// Convert an unwind that reached the top of the stack into the error
    /// reported to the caller.
    pub fn into_stack_error(self) -> StackError {
        match self {
            Unwind::Abort(abort) => StackError::EscapedAbort {
                marker: abort.target,
            },
            Unwind::Fault(err) => err,
        }
    }
}

impl From<StackError> for Unwind {
    fn from(err: StackError) -> Self {
        Unwind::Fault(err)
    }
}
