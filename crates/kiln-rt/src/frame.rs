//! Continuation frames.

use std::fmt;

use crate::arena::Key;
use crate::{Result, Runtime, Value};

/// Handle to a live frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub(crate) Key);

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {:?}", self.0)
    }
}

/// One slice of a procedure: runs from the frame's `pc` until it calls,
/// suspends or leaves, and returns the frame to continue with.
pub type LabelFn = fn(&mut Runtime, FrameId) -> Result<Option<FrameId>>;

/// Run once when a frame leaves, with its return value.
pub type FinalCallback = Box<dyn FnOnce(&mut Runtime, Value) -> Result<()>>;

/// Activation record of a procedure.
pub struct Frame {
    pub func: LabelFn,
    /// Re-entry point; `-1` while the body is executing.
    pub pc: i32,
    pub depth: u32,
    /// Saved accumulator across suspensions.
    pub r0: Value,
    pub parent: Option<FrameId>,
    /// Result of the last callee or resume.
    pub retval: Value,
    pub lambda_args: Vec<Value>,
    /// Captures of the action this frame runs.
    pub caps: Vec<Value>,
    pub locals: Vec<Value>,
    pub last_brk_id: Option<u32>,
    pub(crate) final_callback: Option<FinalCallback>,
}

impl Frame {
    pub fn new(func: LabelFn, parent: Option<FrameId>, depth: u32) -> Self {
        Self {
            func,
            pc: 0,
            depth,
            r0: Value::Undefined,
            parent,
            retval: Value::Undefined,
            lambda_args: Vec::new(),
            caps: Vec::new(),
            locals: Vec::new(),
            last_brk_id: None,
            final_callback: None,
        }
    }

    /// Local slot `i`, growing the slot vector on first use.
    pub fn local_mut(&mut self, i: usize) -> &mut Value {
        if self.locals.len() <= i {
            self.locals.resize(i + 1, Value::Undefined);
        }
        &mut self.locals[i]
    }

    pub fn local(&self, i: usize) -> Value {
        self.locals.get(i).cloned().unwrap_or_default()
    }

    pub fn arg(&self, i: usize) -> Value {
        self.lambda_args.get(i).cloned().unwrap_or_default()
    }

    pub const fn has_final_callback(&self) -> bool {
        self.final_callback.is_some()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("pc", &self.pc)
            .field("depth", &self.depth)
            .field("parent", &self.parent)
            .field("retval", &self.retval)
            .finish_non_exhaustive()
    }
}

/// Frame state reported to a debugger client.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSnapshot {
    pub pc: i32,
    pub depth: u32,
    pub r0: Value,
    pub locals: Vec<Value>,
    pub args: Vec<Value>,
}

impl From<&Frame> for FrameSnapshot {
    fn from(frame: &Frame) -> Self {
        Self {
            pc: frame.pc,
            depth: frame.depth,
            r0: frame.r0.clone(),
            locals: frame.locals.clone(),
            args: frame.lambda_args.clone(),
        }
    }
}
