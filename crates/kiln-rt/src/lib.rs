//! Execution model shared by every kiln target.
//!
//! Generated programs run as chains of continuation frames driven by a
//! trampoline: each label function executes one slice of a procedure and
//! returns the frame to continue with, or `None` to give control back to the
//! host. Heap values are reference counted in a generational arena and
//! destroyed the moment their count drops to zero.
//!
//! # Module Structure
//!
//! - `value` - Dynamic values and vtables
//! - `arena` - Generational slot arena behind heap objects and frames
//! - `heap` - Reference-counted objects and the destroy cascade
//! - `ops` - Accessors called by generated code (fields, locals, maps)
//! - `frame` - Continuation frames
//! - `runtime` - Trampoline, resume slot, fibers and kill
//! - `host` - Virtual-time task queue and host messages
//! - `events` - Per-source event queues
//! - `debugger` - Breakpoints and stepping
//! - `shim` - Board and enum table supplied by the simulation shim

mod arena;
mod config;
mod debugger;
mod events;
mod frame;
mod heap;
mod host;
mod ops;
mod runtime;
mod shim;
mod value;

pub use arena::Key;
pub use config::*;
pub use debugger::*;
pub use events::*;
pub use frame::*;
pub use heap::*;
pub use host::*;
pub use runtime::*;
pub use shim::*;
pub use value::*;

use thiserror::Error;

/// Runtime failures.
///
/// `User` errors come from the program itself (null dereference, explicit
/// panic, stack overflow) and go through the installed error handler.
/// `Assertion` errors are broken invariants and always propagate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("{0}")]
    User(String),
}

impl RuntimeError {
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    pub const fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Fail with an assertion error unless `cond` holds.
pub(crate) fn check(cond: bool, msg: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(RuntimeError::assertion(msg))
    }
}
