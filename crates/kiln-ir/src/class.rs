//! Class tables.

/// Per-class dispatch and layout information.
///
/// Method and interface tables hold procedure labels. The interface table is
/// sparse: a class only fills the slots of interface members it implements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub class_no: u32,
    pub methods: Vec<String>,
    pub iface: Vec<Option<String>>,
    /// One flag per instance field; `true` marks a ref-counted field.
    pub ref_mask: Vec<bool>,
}

impl ClassInfo {
    pub fn new(name: &str, class_no: u32) -> Self {
        Self {
            name: name.to_string(),
            class_no,
            methods: Vec::new(),
            iface: Vec::new(),
            ref_mask: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, label: &str) -> Self {
        self.methods.push(label.to_string());
        self
    }

    /// Fill interface slot `index`, growing the table as needed.
    #[must_use]
    pub fn with_iface(mut self, index: usize, label: &str) -> Self {
        if self.iface.len() <= index {
            self.iface.resize(index + 1, None);
        }
        self.iface[index] = Some(label.to_string());
        self
    }

    #[must_use]
    pub fn with_fields(mut self, ref_mask: &[bool]) -> Self {
        self.ref_mask = ref_mask.to_vec();
        self
    }

    pub const fn num_fields(&self) -> usize {
        self.ref_mask.len()
    }

    /// Indices of ref-counted fields.
    pub fn ref_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.ref_mask
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.then_some(i))
    }

    /// Vtable label used by emitted code.
    pub fn vtable_label(&self) -> String {
        format!("{}__VT", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_tables() {
        let c = ClassInfo::new("Point", 1)
            .with_method("Point_toString__P4")
            .with_iface(3, "Point_get_x__P5")
            .with_fields(&[false, true, false, true]);
        assert_eq!(c.num_fields(), 4);
        assert_eq!(c.ref_fields().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(c.iface.len(), 4);
        assert_eq!(c.iface[0], None);
        assert_eq!(c.iface[3].as_deref(), Some("Point_get_x__P5"));
        assert_eq!(c.vtable_label(), "Point__VT");
    }
}
