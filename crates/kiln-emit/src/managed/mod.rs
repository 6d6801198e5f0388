//! Managed lowerings for hosted execution.
//!
//! Both managed targets turn a procedure into one resumable function over a
//! heap-allocated frame `s`: the body is a `switch` on the re-entry pc, every
//! label and every suspension point becomes a `case`, and calls return the
//! callee frame to the runtime trampoline instead of nesting native calls.
//! [`Dialect`] supplies the few pieces of syntax that differ between the
//! dynamic-scripting ([`Script`]) and the object-oriented ([`Clr`]) output.
//!
//! # Module Structure
//!
//! - `lower` - Expression and statement lowering shared by both dialects
//! - `script` - Dynamic-scripting syntax, literal pool and vtables
//! - `clr` - Managed class syntax, literal pool and vtables

mod clr;
mod lower;
mod script;

pub use clr::Clr;
pub use script::Script;

use std::marker::PhantomData;

use kiln_ir::{Binary, Procedure};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::{EmitConfig, Target};
use crate::shared::SharedStack;
use crate::{EmitError, Emitter, Result};

/// Syntax hooks of one managed target.
pub trait Dialect {
    const TARGET: Target;
    /// Value of a declared but unassigned local.
    const UNDEFINED: &'static str;

    /// Function opening, ending just before the first `case 0:`.
    fn open(label: &str, rt: &str) -> String;

    /// Function close after the final `leave`.
    fn close(rt: &str) -> String;

    /// Statement transferring control to `case n`. `backward` is set when
    /// `case n` was already emitted, i.e. the jump closes a loop and must pass
    /// the yield check.
    fn goto(n: u32, backward: bool) -> String;

    /// Raw lines introducing `case n`.
    fn case(n: u32) -> String;

    /// Condition testing `value` for truthiness.
    fn truthy(rt: &str, value: &str) -> String;

    /// Identity comparison.
    fn same(a: &str, b: &str) -> String;

    /// Statement handing the continuation `resume` to the asynchronous `call`.
    fn promise(call: &str, resume: &str) -> String;

    /// Program text before the procedures.
    fn prelude(bin: &Binary, rt: &str) -> String;

    /// Program text after the procedures.
    fn postlude(bin: &Binary, rt: &str) -> String;
}

/// Emitter for one managed [`Dialect`].
pub struct ManagedEmitter<D> {
    pub(self) config: EmitConfig,
    pub(self) code: String,
    pub(self) proc_label: String,
    pub(self) shared: SharedStack,
    /// Next `case` number for resume points past the IR labels.
    pub(self) next_case: u32,
    /// Cases emitted so far in the current procedure.
    pub(self) entered: FxHashSet<u32>,
    /// Nesting of argument stashes, keeps nested calls from sharing slots.
    pub(self) stash_depth: usize,
    pub(self) breakpoints: bool,
    pub(self) trace: bool,
    _dialect: PhantomData<fn() -> D>,
}

/// Dynamic-scripting lowering used by the simulator.
pub type ScriptEmitter = ManagedEmitter<Script>;

/// Object-oriented lowering used for hosted runs.
pub type ClrEmitter = ManagedEmitter<Clr>;

impl<D: Dialect> ManagedEmitter<D> {
    #[must_use]
    pub fn new(config: EmitConfig) -> Self {
        Self {
            config,
            code: String::new(),
            proc_label: String::new(),
            shared: SharedStack::new(""),
            next_case: 0,
            entered: FxHashSet::default(),
            stash_depth: 0,
            breakpoints: false,
            trace: false,
            _dialect: PhantomData,
        }
    }

    fn reset(&mut self, bin: &Binary, proc: &Procedure) {
        self.code = String::with_capacity(4096);
        self.proc_label = proc.label();
        self.shared = SharedStack::new(&self.proc_label);
        self.next_case = proc.num_labels().unwrap_or(0) + 1;
        self.entered.clear();
        self.stash_depth = 0;
        self.breakpoints = bin.options.breakpoints;
        self.trace = bin.options.trace;
    }
}

impl<D: Dialect> Emitter for ManagedEmitter<D> {
    fn target(&self) -> Target {
        D::TARGET
    }

    fn emit(&mut self, bin: &Binary, proc: &Procedure) -> Result<String> {
        if !proc.is_resolved() {
            return Err(EmitError::Unresolved { proc: proc.label() });
        }
        self.reset(bin, proc);
        debug!(proc = %self.proc_label, target = %D::TARGET, "managed: emitting procedure");

        self.emit_prologue(proc);
        for stmt in &proc.body {
            self.emit_stmt(bin, stmt)?;
        }
        self.shared.assert_empty()?;
        self.emit_epilogue();
        Ok(std::mem::take(&mut self.code))
    }

    fn prelude(&self, bin: &Binary) -> String {
        D::prelude(bin, &self.config.runtime_name)
    }

    fn postlude(&self, bin: &Binary) -> String {
        D::postlude(bin, &self.config.runtime_name)
    }
}

/// Entry procedure: the first root, or the first procedure.
fn entry_label(bin: &Binary) -> Option<String> {
    bin.procs
        .iter()
        .find(|p| p.is_root)
        .or_else(|| bin.procs.first())
        .map(Procedure::label)
}

/// Quote `s` as a double-quoted literal valid in both dialects.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests;
