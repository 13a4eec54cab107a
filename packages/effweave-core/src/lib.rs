//! effweave-core: effect stack runtime.
//!
//! # Architecture
//!
//! - **Program tree**: `Eff<A>` builds an untyped tree of pure values,
//!   requests, binds, native steps and interpreter installations
//! - **Scope chain**: installed interpreters form a persistent `Arc`-linked
//!   chain; dispatch walks it from the request site outward
//! - **Short-circuit as data**: abandoning a computation returns an
//!   `Unwind` addressed to a prompt marker instead of unwinding the host
//!   stack
//! - **Native bridge**: native interpreters use the panic channel with
//!   identity-stamped carriers, plus per-thread interruption masks

mod config;
pub mod error;
mod handler;
pub mod ids;
mod interpret;
mod key;
pub mod native;
mod program;
mod scope;
mod stack_logging;
pub mod value;
mod vm;

pub use config::{ConfigError, DebugConfig, DebugLevel, RuntimeConfig, CONFIG_ENV_VAR};
pub use error::{Abort, StackError, Unwind};
pub use handler::{Detached, Handler, HandlerCx, Request, SiteSnapshot};
pub use ids::{Identity, Marker, TaskId};
pub use key::{Effect, EffectKey};
pub use native::{ErrorCarrier, InterruptFlag, Interrupted, Mask};
pub use program::{Eff, ErasedEff, ScopeEnd};
pub use value::{erase, Value};
