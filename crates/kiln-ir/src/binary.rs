//! Whole-program container.

use crate::cell::Cell;
use crate::class::ClassInfo;
use crate::procedure::Procedure;
use crate::Result;

/// Options selected by the compile session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Emit breakpoint checks.
    pub breakpoints: bool,
    /// Emit source-level trace calls instead of breakpoint lookups.
    pub trace: bool,
}

/// Payload of a literal-pool entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiteralData {
    Str(String),
    Hex(Vec<u8>),
}

/// A labelled constant referenced through [`Expr::Pointer`](crate::Expr::Pointer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Literal {
    pub label: String,
    pub data: LiteralData,
}

/// Everything the emitters see: procedures, globals, classes and literals.
#[derive(Clone, Debug, Default)]
pub struct Binary {
    pub procs: Vec<Procedure>,
    pub globals: Vec<Cell>,
    pub classes: Vec<ClassInfo>,
    /// Interface member names, indexed by interface slot.
    pub iface_members: Vec<String>,
    pub literals: Vec<Literal>,
    pub options: CompileOptions,
}

impl Binary {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn add_proc(&mut self, proc: Procedure) {
        self.procs.push(proc);
    }

    pub fn add_global(&mut self, cell: Cell) {
        self.globals.push(cell);
    }

    pub fn add_class(&mut self, class: ClassInfo) {
        self.classes.push(class);
    }

    /// Intern a string literal, returning its label.
    pub fn add_string(&mut self, text: &str) -> String {
        if let Some(lit) = self
            .literals
            .iter()
            .find(|l| matches!(&l.data, LiteralData::Str(s) if s == text))
        {
            return lit.label.clone();
        }
        let label = format!("_str{}", self.literals.len());
        self.literals.push(Literal {
            label: label.clone(),
            data: LiteralData::Str(text.to_string()),
        });
        label
    }

    /// Add a hex blob literal, returning its label.
    pub fn add_hex(&mut self, bytes: &[u8]) -> String {
        let label = format!("_hex{}", self.literals.len());
        self.literals.push(Literal {
            label: label.clone(),
            data: LiteralData::Hex(bytes.to_vec()),
        });
        label
    }

    /// Resolve every procedure.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure.
    pub fn resolve_all(&mut self) -> Result<()> {
        for proc in &mut self.procs {
            proc.resolve()?;
        }
        Ok(())
    }

    /// Find a procedure by its unique label.
    pub fn proc(&self, label: &str) -> Option<&Procedure> {
        self.procs.iter().find(|p| p.label() == label)
    }

    /// One past the highest breakpoint id, i.e. the breakpoint table size.
    pub fn breakpoint_count(&self) -> usize {
        self.procs
            .iter()
            .flat_map(Procedure::breakpoint_ids)
            .max()
            .map_or(0, |m| m as usize + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::Stmt;

    #[test]
    fn test_strings_are_interned() {
        let mut bin = Binary::new();
        let a = bin.add_string("hello");
        let b = bin.add_string("world");
        let c = bin.add_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(bin.literals.len(), 2);
    }

    #[test]
    fn test_breakpoint_count() {
        let mut bin = Binary::new();
        assert_eq!(bin.breakpoint_count(), 0);
        let mut p = Procedure::new("main", 0);
        p.body = vec![Stmt::breakpoint(0), Stmt::debugger(7)];
        bin.add_proc(p);
        assert_eq!(bin.breakpoint_count(), 8);
        bin.resolve_all().unwrap();
        assert!(bin.proc("main__P0").unwrap().is_resolved());
    }
}
