//! Procedures and label resolution.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::cell::Cell;
use crate::stmt::{LabelId, Stmt};
use crate::{IrError, Result};

/// A function or closure body.
#[derive(Clone, Debug)]
pub struct Procedure {
    pub name: String,
    /// Sequence number making the label unique across the binary.
    pub seq: u32,
    pub args: Vec<Cell>,
    pub locals: Vec<Cell>,
    pub captured: Vec<Cell>,
    pub body: Vec<Stmt>,
    /// Program entry point.
    pub is_root: bool,
    num_labels: Option<u32>,
}

impl Procedure {
    pub fn new(name: &str, seq: u32) -> Self {
        Self {
            name: name.to_string(),
            seq,
            args: Vec::new(),
            locals: Vec::new(),
            captured: Vec::new(),
            body: Vec::new(),
            is_root: false,
            num_labels: None,
        }
    }

    /// Unique assembly/text label.
    pub fn label(&self) -> String {
        format!("{}__P{}", self.name, self.seq)
    }

    pub const fn is_resolved(&self) -> bool {
        self.num_labels.is_some()
    }

    /// Number of label ids handed out by resolve, if resolved.
    pub const fn num_labels(&self) -> Option<u32> {
        self.num_labels
    }

    /// Number label statements in source order and bind jumps to them.
    ///
    /// Ids start at 1; id 0 is the procedure entry in the managed targets.
    ///
    /// # Errors
    ///
    /// Fails if the procedure was already resolved, a label name repeats, or
    /// a jump names a label that does not exist.
    pub fn resolve(&mut self) -> Result<()> {
        if self.is_resolved() {
            return Err(IrError::AlreadyResolved { proc: self.label() });
        }

        let mut ids: FxHashMap<String, LabelId> = FxHashMap::default();
        let mut next = 1;
        for stmt in &mut self.body {
            if let Stmt::Label { name, id } = stmt {
                let lbl = LabelId(next);
                if ids.insert(name.clone(), lbl).is_some() {
                    return Err(IrError::DuplicateLabel {
                        proc: format!("{}__P{}", self.name, self.seq),
                        label: name.clone(),
                    });
                }
                *id = Some(lbl);
                next += 1;
            }
        }

        for stmt in &mut self.body {
            if let Stmt::Jmp { label, target, .. } = stmt {
                match ids.get(label.as_str()) {
                    Some(id) => *target = Some(*id),
                    None => {
                        return Err(IrError::MissingLabel {
                            proc: format!("{}__P{}", self.name, self.seq),
                            label: label.clone(),
                        });
                    }
                }
            }
        }

        self.num_labels = Some(next - 1);
        Ok(())
    }

    /// Frame slots needed by the body: args, locals and captures.
    pub fn frame_size(&self) -> usize {
        self.args.len() + self.locals.len() + self.captured.len()
    }

    /// Ids of all breakpoint statements, in order.
    pub fn breakpoint_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.body.iter().filter_map(|s| match s {
            Stmt::Breakpoint { id, .. } => Some(*id),
            _ => None,
        })
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nPROC {} args={}", self.label(), self.args.len())?;
        for stmt in &self.body {
            writeln!(f, "{stmt}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::stmt::JmpMode;

    fn looped() -> Procedure {
        let mut p = Procedure::new("main", 0);
        p.body = vec![
            Stmt::label("top"),
            Stmt::expr(Expr::num(1)),
            Stmt::jmp_if_zero("done", Expr::num(0)),
            Stmt::jmp("top"),
            Stmt::label("done"),
        ];
        p
    }

    #[test]
    fn test_resolve_numbers_labels_in_order() {
        let mut p = looped();
        p.resolve().unwrap();
        assert_eq!(p.num_labels(), Some(2));
        assert!(matches!(
            p.body[0],
            Stmt::Label {
                id: Some(LabelId(1)),
                ..
            }
        ));
        assert!(matches!(
            p.body[2],
            Stmt::Jmp {
                mode: JmpMode::IfZero,
                target: Some(LabelId(2)),
                ..
            }
        ));
        assert!(matches!(
            p.body[3],
            Stmt::Jmp {
                target: Some(LabelId(1)),
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_twice_fails() {
        let mut p = looped();
        p.resolve().unwrap();
        assert_eq!(
            p.resolve(),
            Err(IrError::AlreadyResolved {
                proc: "main__P0".into()
            })
        );
    }

    #[test]
    fn test_resolve_missing_label() {
        let mut p = Procedure::new("f", 3);
        p.body = vec![Stmt::jmp("nowhere")];
        let err = p.resolve().unwrap_err();
        assert_eq!(
            err,
            IrError::MissingLabel {
                proc: "f__P3".into(),
                label: "nowhere".into()
            }
        );
        assert!(!p.is_resolved());
    }

    #[test]
    fn test_resolve_duplicate_label() {
        let mut p = Procedure::new("f", 0);
        p.body = vec![Stmt::label("a"), Stmt::label("a")];
        assert!(matches!(p.resolve(), Err(IrError::DuplicateLabel { .. })));
    }
}
