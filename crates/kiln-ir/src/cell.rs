//! Storage cells.

use std::fmt;

/// Where a cell lives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CellKind {
    /// Program-wide slot owned by the binary.
    Global,
    /// Procedure-local slot.
    Local,
    /// Captured slot of the enclosing action.
    Capture,
    /// Incoming argument.
    Arg,
}

/// Narrowing applied to values stored in a cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum BitSize {
    #[default]
    None,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
}

impl BitSize {
    /// Name of the runtime converter applied on store, if any.
    pub const fn converter(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Int8 => Some("toInt8"),
            Self::UInt8 => Some("toUInt8"),
            Self::Int16 => Some("toInt16"),
            Self::UInt16 => Some("toUInt16"),
            Self::Int32 => Some("toInt32"),
            Self::UInt32 => Some("toUInt32"),
        }
    }

    /// Storage width in bytes (zero when not narrowed).
    pub const fn bytes(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32)
    }
}

/// A storage location referenced by IR expressions.
///
/// Reference-ness and boxing are fixed when the cell is created. A boxed cell
/// is a captured local that is written after capture; its value lives in a
/// heap box and every access goes through the runtime's local accessors.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Cell {
    pub kind: CellKind,
    pub index: u32,
    pub name: String,
    pub bit_size: BitSize,
    pub is_ref: bool,
    pub boxed: bool,
}

impl Cell {
    fn new(kind: CellKind, index: u32, name: &str) -> Self {
        Self {
            kind,
            index,
            name: name.to_string(),
            bit_size: BitSize::None,
            is_ref: false,
            boxed: false,
        }
    }

    /// Create a global cell.
    pub fn global(index: u32, name: &str) -> Self {
        Self::new(CellKind::Global, index, name)
    }

    /// Create a local cell.
    pub fn local(index: u32, name: &str) -> Self {
        Self::new(CellKind::Local, index, name)
    }

    /// Create a capture cell.
    pub fn capture(index: u32, name: &str) -> Self {
        Self::new(CellKind::Capture, index, name)
    }

    /// Create an argument cell.
    pub fn arg(index: u32, name: &str) -> Self {
        Self::new(CellKind::Arg, index, name)
    }

    /// Mark the cell as holding ref-counted values.
    #[must_use]
    pub const fn with_ref(mut self) -> Self {
        self.is_ref = true;
        self
    }

    /// Mark the cell as boxed for capture.
    #[must_use]
    pub const fn with_boxed(mut self) -> Self {
        self.boxed = true;
        self
    }

    #[must_use]
    pub const fn with_bit_size(mut self, bit_size: BitSize) -> Self {
        self.bit_size = bit_size;
        self
    }

    pub const fn is_global(&self) -> bool {
        matches!(self.kind, CellKind::Global)
    }

    /// Unique identifier usable as a variable name in textual targets.
    pub fn unique_name(&self) -> String {
        match self.kind {
            CellKind::Arg => format!("arg{}", self.index),
            CellKind::Capture => format!("cap{}", self.index),
            CellKind::Local | CellKind::Global => format!("{}___{}", self.name, self.index),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            CellKind::Global => "global",
            CellKind::Local => "local",
            CellKind::Capture => "cap",
            CellKind::Arg => "arg",
        };
        write!(f, "{kind}{}({})", self.index, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_flags() {
        let c = Cell::local(3, "x").with_ref().with_boxed();
        assert!(c.is_ref);
        assert!(c.boxed);
        assert_eq!(c.unique_name(), "x___3");
        assert_eq!(Cell::arg(1, "y").unique_name(), "arg1");
    }

    #[test]
    fn test_bit_size_converter() {
        assert_eq!(BitSize::None.converter(), None);
        assert_eq!(BitSize::Int8.converter(), Some("toInt8"));
        assert_eq!(BitSize::UInt16.bytes(), 2);
        assert!(BitSize::Int32.is_signed());
        assert!(!BitSize::UInt32.is_signed());
    }
}
