//! Type-erased values flowing through the evaluator.

use std::any::Any;

use crate::error::StackError;

/// A value produced by a computation or carried by a request.
///
/// The evaluator never inspects values; typed facades downcast them at the
/// edges, and a failed downcast is reported as a runtime fault rather than a
/// panic.
pub type Value = Box<dyn Any + Send>;

pub fn erase<T: Send + 'static>(value: T) -> Value {
    Box::new(value)
}

pub fn downcast<T: 'static>(value: Value, context: &'static str) -> Result<T, StackError> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| StackError::type_mismatch::<T>(context))
}

/// Best-effort rendering of a native panic payload for diagnostics.
pub fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<opaque panic payload>".to_owned()
    }
}
