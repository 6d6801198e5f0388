//! Procedure builder fluent API.

use crate::cell::Cell;
use crate::expr::Expr;
use crate::procedure::Procedure;
use crate::stmt::Stmt;

/// Builder for procedures.
///
/// Cells get their indices from the order they are declared in.
pub struct ProcBuilder {
    proc: Procedure,
}

impl ProcBuilder {
    /// Create a new procedure builder.
    pub fn new(name: &str, seq: u32) -> Self {
        Self {
            proc: Procedure::new(name, seq),
        }
    }

    /// Mark as program entry.
    #[must_use]
    pub const fn root(mut self) -> Self {
        self.proc.is_root = true;
        self
    }

    /// Declare the next argument.
    #[must_use]
    pub fn arg(mut self, name: &str) -> Self {
        let idx = self.proc.args.len() as u32;
        self.proc.args.push(Cell::arg(idx, name));
        self
    }

    /// Declare the next local; `f` adjusts its flags.
    #[must_use]
    pub fn local_with(mut self, name: &str, f: impl FnOnce(Cell) -> Cell) -> Self {
        let idx = self.proc.locals.len() as u32;
        self.proc.locals.push(f(Cell::local(idx, name)));
        self
    }

    /// Declare the next plain local.
    #[must_use]
    pub fn local(self, name: &str) -> Self {
        self.local_with(name, |c| c)
    }

    /// Declare the next captured slot.
    #[must_use]
    pub fn capture(mut self, name: &str, is_ref: bool) -> Self {
        let idx = self.proc.captured.len() as u32;
        let cell = Cell::capture(idx, name);
        self.proc
            .captured
            .push(if is_ref { cell.with_ref() } else { cell });
        self
    }

    /// Look up a declared local by name.
    pub fn local_cell(&self, name: &str) -> Option<Cell> {
        self.proc.locals.iter().find(|c| c.name == name).cloned()
    }

    /// Look up a declared argument by name.
    pub fn arg_cell(&self, name: &str) -> Option<Cell> {
        self.proc.args.iter().find(|c| c.name == name).cloned()
    }

    /// Add an expression statement.
    #[must_use]
    pub fn expr(self, e: Expr) -> Self {
        self.stmt(Stmt::expr(e))
    }

    /// Add a label.
    #[must_use]
    pub fn label(self, name: &str) -> Self {
        self.stmt(Stmt::label(name))
    }

    /// Add an unconditional jump.
    #[must_use]
    pub fn jmp(self, label: &str) -> Self {
        self.stmt(Stmt::jmp(label))
    }

    /// Add a stack-empty marker.
    #[must_use]
    pub fn stack_empty(self) -> Self {
        self.stmt(Stmt::stack_empty())
    }

    /// Add a compiler breakpoint.
    #[must_use]
    pub fn breakpoint(self, id: u32) -> Self {
        self.stmt(Stmt::breakpoint(id))
    }

    /// Add any statement.
    #[must_use]
    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.proc.body.push(stmt);
        self
    }

    /// Finish without resolving.
    pub fn build(self) -> Procedure {
        self.proc
    }

    /// Finish and resolve labels.
    ///
    /// # Errors
    ///
    /// Propagates label resolution failures.
    pub fn build_resolved(self) -> crate::Result<Procedure> {
        let mut proc = self.proc;
        proc.resolve()?;
        Ok(proc)
    }
}
