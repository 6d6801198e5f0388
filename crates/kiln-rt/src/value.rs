//! Dynamic values and class tables.

use std::fmt;
use std::rc::Rc;

use crate::{LabelFn, ObjId};

/// A value held in a frame slot, field or map entry.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Str(Rc<str>),
    /// Heap object; the only reference-counted variant.
    Ref(ObjId),
    /// Bare function used as an action without captures.
    Func(LabelFn),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    pub const fn as_ref_id(&self) -> Option<ObjId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Truthiness as seen by conditional jumps.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
            Self::Ref(_) | Self::Func(_) => true,
        }
    }

    /// Numeric view with `null`, `undefined` and `false` as 0 and `true` as 1.
    pub fn null_fix(&self) -> Self {
        match self {
            Self::Undefined | Self::Null | Self::Bool(false) => Self::Int(0),
            Self::Bool(true) => Self::Int(1),
            v => v.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::Func(a), Self::Func(b)) => std::ptr::fn_addr_eq(*a, *b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Ref(id) => write!(f, "ref#{id:?}"),
            Self::Func(_) => f.write_str("<function>"),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ObjId> for Value {
    fn from(id: ObjId) -> Self {
        Self::Ref(id)
    }
}

/// Class table shared by every instance of a class.
#[derive(Debug)]
pub struct VTable {
    pub name: String,
    pub class_no: u32,
    /// One entry per field; `true` fields hold counted references.
    pub refmask: Vec<bool>,
    pub methods: Vec<LabelFn>,
    pub iface: Vec<Option<LabelFn>>,
}

impl VTable {
    pub fn new(name: impl Into<String>, refmask: Vec<bool>) -> Self {
        Self {
            name: name.into(),
            class_no: 0,
            refmask,
            methods: Vec::new(),
            iface: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_class_no(mut self, class_no: u32) -> Self {
        self.class_no = class_no;
        self
    }

    #[must_use]
    pub fn with_methods(mut self, methods: Vec<LabelFn>) -> Self {
        self.methods = methods;
        self
    }

    #[must_use]
    pub fn with_iface(mut self, iface: Vec<Option<LabelFn>>) -> Self {
        self.iface = iface;
        self
    }

    pub fn num_fields(&self) -> usize {
        self.refmask.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness_and_null_fix() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("x").truthy());
        assert_eq!(Value::Null.null_fix(), Value::Int(0));
        assert_eq!(Value::Bool(true).null_fix(), Value::Int(1));
        assert_eq!(Value::str("a").null_fix(), Value::str("a"));
    }

    #[test]
    fn test_equality_is_strict() {
        assert_ne!(Value::Null, Value::Undefined);
        assert_ne!(Value::Int(0), Value::Bool(false));
        assert_eq!(Value::str("ab"), Value::str("ab"));
    }
}
