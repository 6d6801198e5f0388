//! Statement IR.

use std::fmt;

use crate::expr::Expr;

/// Numeric label id assigned by [`Procedure::resolve`](crate::Procedure::resolve).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Jump conditions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JmpMode {
    Always,
    /// Jump when the accumulator equals the jump expression's value.
    IfJmpValEq,
    IfNotZero,
    IfZero,
}

/// Statement kinds.
#[derive(Clone, Debug)]
pub enum Stmt {
    /// Evaluate for effect; the result stays in the accumulator.
    Expr(Expr),
    Jmp {
        label: String,
        mode: JmpMode,
        expr: Option<Expr>,
        /// Bound by resolve.
        target: Option<LabelId>,
    },
    Label {
        name: String,
        /// Assigned by resolve.
        id: Option<LabelId>,
    },
    /// All shared temporaries must be consumed here.
    StackEmpty,
    Breakpoint {
        id: u32,
        /// Explicit `debugger` statement, fires unconditionally.
        is_debugger: bool,
    },
}

impl Stmt {
    pub const fn expr(e: Expr) -> Self {
        Self::Expr(e)
    }

    pub fn label(name: &str) -> Self {
        Self::Label {
            name: name.to_string(),
            id: None,
        }
    }

    /// Unconditional jump.
    pub fn jmp(label: &str) -> Self {
        Self::jmp_mode(label, JmpMode::Always, None)
    }

    /// Unconditional jump carrying a value into the accumulator.
    pub fn jmp_with(label: &str, value: Expr) -> Self {
        Self::jmp_mode(label, JmpMode::Always, Some(value))
    }

    pub fn jmp_if_zero(label: &str, cond: Expr) -> Self {
        Self::jmp_mode(label, JmpMode::IfZero, Some(cond))
    }

    pub fn jmp_if_not_zero(label: &str, cond: Expr) -> Self {
        Self::jmp_mode(label, JmpMode::IfNotZero, Some(cond))
    }

    /// Jump when the accumulator equals `value`.
    pub fn jmp_if_eq(label: &str, value: Expr) -> Self {
        Self::jmp_mode(label, JmpMode::IfJmpValEq, Some(value))
    }

    fn jmp_mode(label: &str, mode: JmpMode, expr: Option<Expr>) -> Self {
        Self::Jmp {
            label: label.to_string(),
            mode,
            expr,
            target: None,
        }
    }

    pub const fn stack_empty() -> Self {
        Self::StackEmpty
    }

    /// Compiler-inserted breakpoint.
    pub const fn breakpoint(id: u32) -> Self {
        Self::Breakpoint {
            id,
            is_debugger: false,
        }
    }

    /// User-placed `debugger` statement.
    pub const fn debugger(id: u32) -> Self {
        Self::Breakpoint {
            id,
            is_debugger: true,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(e) => write!(f, "    {e}"),
            Self::Jmp {
                label, mode, expr, ..
            } => {
                write!(f, "    jmp {label} {mode:?}")?;
                if let Some(e) = expr {
                    write!(f, " {e}")?;
                }
                Ok(())
            }
            Self::Label { name, .. } => write!(f, "{name}:"),
            Self::StackEmpty => write!(f, "    ;; stack empty"),
            Self::Breakpoint { id, is_debugger } => {
                write!(f, "    ;; brk {id}{}", if *is_debugger { " debugger" } else { "" })
            }
        }
    }
}
