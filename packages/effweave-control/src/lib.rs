//! effweave-control: control effects for the effweave stack runtime.
//!
//! - [`error`]: throw and catch, interpreted locally or on the native
//!   panic channel with per-interpreter identities
//! - [`resource`]: brackets whose release always runs, with local and
//!   interruption-masked native interpreters
//! - [`tagged`]: independent instances of one effect, told apart by a
//!   type-level tag
//! - [`concurrent`]: spawn, await and cancel tasks

pub mod concurrent;
pub mod error;
pub mod resource;
pub mod tagged;

pub use concurrent::{
    async_to_native, async_to_native_with, await_, cancel, run_async_sequential, spawn, Task,
};
pub use error::{
    catch, catch_just, error_to_native, from_either, from_exception, from_exception_sem,
    from_exception_sem_via, from_exception_via, map_error, note, raise, run_error, throw, try_,
    try_just, ErrorOp,
};
pub use resource::{
    bracket, bracket_, bracket_on_error, finally, general_bracket, on_exception,
    resource_to_native, run_resource, Exit, GeneralBracket,
};
pub use tagged::{retag, send_tagged, tag, tagged, untag, Tagged};
