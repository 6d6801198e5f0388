//! Expression IR.

use std::fmt;

use crate::cell::Cell;

/// Identifier tying shared references to their definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SharedId(pub u32);

impl fmt::Display for SharedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a runtime call hands control back.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CallingConvention {
    /// Returns synchronously.
    #[default]
    Plain,
    /// Returns a promise-like value that completes later.
    Promise,
    /// Suspends the fiber and resumes through the pending resume slot.
    Suspend,
}

/// Field metadata attached to field accesses.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldInfo {
    pub index: u32,
    pub name: String,
    pub is_ref: bool,
    /// Cheap accessor emitted instead of the generic field load.
    pub shim: Option<String>,
}

impl FieldInfo {
    pub fn new(index: u32, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            is_ref: false,
            shim: None,
        }
    }

    #[must_use]
    pub const fn with_ref(mut self) -> Self {
        self.is_ref = true;
        self
    }

    #[must_use]
    pub fn with_shim(mut self, shim: &str) -> Self {
        self.shim = Some(shim.to_string());
        self
    }
}

/// Fast path taken by interface calls when the receiver is a map.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MapMethod {
    /// Interned member key.
    pub key: u32,
    /// Setter (`true`) or getter (`false`).
    pub is_set: bool,
}

/// Dispatch target of a procedure call.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ProcTarget {
    /// Direct call to a procedure label.
    Static(String),
    /// `receiver.vtable.methods[index]`.
    Virtual { index: u32 },
    /// `receiver.vtable.iface[index]`, optionally with a map fast path.
    Interface { index: u32, map: Option<MapMethod> },
}

/// Destination of a store expression.
#[derive(Clone, Debug)]
pub enum StoreTarget {
    Cell(Cell),
    Field { object: Box<Expr>, field: FieldInfo },
}

/// Expression tree node.
#[derive(Clone, Debug)]
pub enum Expr {
    Number(i32),
    /// Address of a literal-pool or procedure label.
    Pointer(String),
    Cell(Cell),
    Field {
        object: Box<Self>,
        field: FieldInfo,
    },
    Store {
        target: StoreTarget,
        value: Box<Self>,
    },
    RuntimeCall {
        name: String,
        args: Vec<Self>,
        convention: CallingConvention,
    },
    ProcCall {
        target: ProcTarget,
        args: Vec<Self>,
    },
    /// Evaluates `expr` once and caches it for `total_uses` shared reads.
    SharedDef {
        id: SharedId,
        total_uses: u32,
        expr: Box<Self>,
    },
    SharedRef(SharedId),
    Incr(Box<Self>),
    Decr(Box<Self>),
    Sequence(Vec<Self>),
}

impl Expr {
    pub const fn num(v: i32) -> Self {
        Self::Number(v)
    }

    pub fn ptr(label: &str) -> Self {
        Self::Pointer(label.to_string())
    }

    pub const fn cell(cell: Cell) -> Self {
        Self::Cell(cell)
    }

    pub fn field(object: Self, field: FieldInfo) -> Self {
        Self::Field {
            object: Box::new(object),
            field,
        }
    }

    pub fn store(cell: Cell, value: Self) -> Self {
        Self::Store {
            target: StoreTarget::Cell(cell),
            value: Box::new(value),
        }
    }

    pub fn store_field(object: Self, field: FieldInfo, value: Self) -> Self {
        Self::Store {
            target: StoreTarget::Field {
                object: Box::new(object),
                field,
            },
            value: Box::new(value),
        }
    }

    /// Plain runtime call.
    pub fn rt_call(name: &str, args: Vec<Self>) -> Self {
        Self::rt_call_with(name, args, CallingConvention::Plain)
    }

    pub fn rt_call_with(name: &str, args: Vec<Self>, convention: CallingConvention) -> Self {
        Self::RuntimeCall {
            name: name.to_string(),
            args,
            convention,
        }
    }

    /// Direct call to a procedure label.
    pub fn call(label: &str, args: Vec<Self>) -> Self {
        Self::ProcCall {
            target: ProcTarget::Static(label.to_string()),
            args,
        }
    }

    /// Virtual call; the receiver is `args[0]`.
    pub const fn call_virtual(index: u32, args: Vec<Self>) -> Self {
        Self::ProcCall {
            target: ProcTarget::Virtual { index },
            args,
        }
    }

    /// Interface call; the receiver is `args[0]`.
    pub const fn call_iface(index: u32, map: Option<MapMethod>, args: Vec<Self>) -> Self {
        Self::ProcCall {
            target: ProcTarget::Interface { index, map },
            args,
        }
    }

    pub fn shared_def(id: SharedId, total_uses: u32, expr: Self) -> Self {
        Self::SharedDef {
            id,
            total_uses,
            expr: Box::new(expr),
        }
    }

    pub const fn shared_ref(id: SharedId) -> Self {
        Self::SharedRef(id)
    }

    pub fn incr(expr: Self) -> Self {
        Self::Incr(Box::new(expr))
    }

    pub fn decr(expr: Self) -> Self {
        Self::Decr(Box::new(expr))
    }

    pub const fn seq(exprs: Vec<Self>) -> Self {
        Self::Sequence(exprs)
    }

    /// True for leaves that can be loaded straight into any register.
    pub const fn is_simple(&self) -> bool {
        match self {
            Self::Number(_) | Self::Pointer(_) | Self::SharedRef(_) => true,
            Self::Cell(c) => !c.boxed,
            _ => false,
        }
    }

    /// True when the expression may suspend the running fiber.
    pub fn may_suspend(&self) -> bool {
        match self {
            Self::Number(_) | Self::Pointer(_) | Self::Cell(_) | Self::SharedRef(_) => false,
            Self::RuntimeCall {
                convention, args, ..
            } => *convention != CallingConvention::Plain || args.iter().any(Self::may_suspend),
            Self::ProcCall { .. } => true,
            Self::Field { object, .. } => object.may_suspend(),
            Self::Store { target, value } => {
                value.may_suspend()
                    || matches!(target, StoreTarget::Field { object, .. } if object.may_suspend())
            }
            Self::SharedDef { expr, .. } | Self::Incr(expr) | Self::Decr(expr) => {
                expr.may_suspend()
            }
            Self::Sequence(exprs) => exprs.iter().any(Self::may_suspend),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{a}")?;
            }
            Ok(())
        }
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Pointer(l) => write!(f, "&{l}"),
            Self::Cell(c) => write!(f, "{c}"),
            Self::Field { object, field } => write!(f, "{object}.{}", field.name),
            Self::Store { target, value } => match target {
                StoreTarget::Cell(c) => write!(f, "{c} := {value}"),
                StoreTarget::Field { object, field } => {
                    write!(f, "{object}.{} := {value}", field.name)
                }
            },
            Self::RuntimeCall { name, args, .. } => {
                write!(f, "{name}(")?;
                list(f, args)?;
                write!(f, ")")
            }
            Self::ProcCall { target, args } => {
                match target {
                    ProcTarget::Static(l) => write!(f, "call {l}(")?,
                    ProcTarget::Virtual { index } => write!(f, "callvirt[{index}](")?,
                    ProcTarget::Interface { index, .. } => write!(f, "calliface[{index}](")?,
                }
                list(f, args)?;
                write!(f, ")")
            }
            Self::SharedDef { id, expr, .. } => write!(f, "def{id}({expr})"),
            Self::SharedRef(id) => write!(f, "ref{id}"),
            Self::Incr(e) => write!(f, "incr({e})"),
            Self::Decr(e) => write!(f, "decr({e})"),
            Self::Sequence(exprs) => {
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_factories() {
        assert!(matches!(Expr::num(42), Expr::Number(42)));
        let e = Expr::rt_call("Number_::adds", vec![Expr::num(1), Expr::num(2)]);
        assert!(matches!(
            e,
            Expr::RuntimeCall {
                convention: CallingConvention::Plain,
                ..
            }
        ));
        let e = Expr::call_virtual(2, vec![Expr::cell(Cell::arg(0, "this"))]);
        assert!(matches!(
            e,
            Expr::ProcCall {
                target: ProcTarget::Virtual { index: 2 },
                ..
            }
        ));
    }

    #[test]
    fn test_expr_is_simple() {
        assert!(Expr::num(1).is_simple());
        assert!(Expr::shared_ref(SharedId(0)).is_simple());
        assert!(Expr::cell(Cell::local(0, "x")).is_simple());
        assert!(!Expr::cell(Cell::local(0, "x").with_boxed()).is_simple());
        assert!(!Expr::rt_call("f", vec![]).is_simple());
    }

    #[test]
    fn test_expr_may_suspend() {
        let pause = Expr::rt_call_with("loops::pause", vec![], CallingConvention::Suspend);
        assert!(pause.may_suspend());
        assert!(Expr::seq(vec![Expr::num(1), pause]).may_suspend());
        assert!(!Expr::rt_call("f", vec![Expr::num(1)]).may_suspend());
    }

    #[test]
    fn test_expr_display() {
        let e = Expr::store(
            Cell::local(0, "x"),
            Expr::rt_call("f", vec![Expr::num(1), Expr::ptr("str0")]),
        );
        assert_eq!(e.to_string(), "local0(x) := f(1, &str0)");
    }
}
