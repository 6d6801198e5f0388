//! Shared-expression temporary tracking.

use rustc_hash::FxHashMap;

use kiln_ir::SharedId;

use crate::{EmitError, Result};

/// One in-flight shared value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedSlot {
    pub id: SharedId,
    pub total: u32,
    pub used: u32,
    /// Temporary slot index, i.e. the stack position at definition time.
    pub slot: usize,
}

impl SharedSlot {
    pub const fn drained(&self) -> bool {
        self.used == self.total
    }
}

/// Stack of shared temporaries for one procedure.
///
/// A definition pushes a slot; each reference bumps its use counter. Slots
/// leave the stack from the top once fully drained, so a slot index is only
/// reused after every value defined above it is gone.
#[derive(Debug)]
pub struct SharedStack {
    proc: String,
    entries: Vec<SharedSlot>,
    /// Drained and popped definitions, kept to tell overuse from non-definition.
    retired: FxHashMap<SharedId, u32>,
    max_depth: usize,
}

impl SharedStack {
    pub fn new(proc: &str) -> Self {
        Self {
            proc: proc.to_string(),
            entries: Vec::new(),
            retired: FxHashMap::default(),
            max_depth: 0,
        }
    }

    /// Register a definition; returns the slot to store the value in.
    ///
    /// # Errors
    ///
    /// Fails if `id` was already defined in this procedure.
    pub fn define(&mut self, id: SharedId, total: u32) -> Result<usize> {
        if self.retired.contains_key(&id) || self.entries.iter().any(|e| e.id == id) {
            return Err(EmitError::SharedRedefined {
                proc: self.proc.clone(),
                id,
            });
        }
        let slot = self.entries.len();
        self.entries.push(SharedSlot {
            id,
            total,
            used: 0,
            slot,
        });
        self.max_depth = self.max_depth.max(self.entries.len());
        Ok(slot)
    }

    /// Record one read of `id`; returns its slot.
    ///
    /// # Errors
    ///
    /// Fails if `id` has not been defined yet or its uses are exhausted.
    pub fn use_ref(&mut self, id: SharedId) -> Result<usize> {
        let proc = &self.proc;
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return Err(match self.retired.get(&id) {
                Some(&total) => EmitError::SharedOverused {
                    proc: proc.clone(),
                    id,
                    total,
                },
                None => EmitError::SharedUndefined {
                    proc: proc.clone(),
                    id,
                },
            });
        };
        if entry.drained() {
            return Err(EmitError::SharedOverused {
                proc: proc.clone(),
                id,
                total: entry.total,
            });
        }
        entry.used += 1;
        Ok(entry.slot)
    }

    /// Pop drained slots off the top; returns how many were popped.
    pub fn pop_drained(&mut self) -> usize {
        let mut popped = 0;
        while let Some(top) = self.entries.last() {
            if !top.drained() {
                break;
            }
            self.retired.insert(top.id, top.total);
            self.entries.pop();
            popped += 1;
        }
        popped
    }

    /// Assert every temporary has been consumed.
    ///
    /// # Errors
    ///
    /// Fails with the number of slots still holding unread uses.
    pub fn assert_empty(&mut self) -> Result<()> {
        self.pop_drained();
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(EmitError::StackNotEmpty {
                proc: self.proc.clone(),
                pending: self.entries.len(),
            })
        }
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Deepest the stack has been.
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn live(&self) -> &[SharedSlot] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_use_drain() {
        let mut st = SharedStack::new("p");
        let slot = st.define(SharedId(1), 2).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(st.use_ref(SharedId(1)).unwrap(), 0);
        assert_eq!(st.pop_drained(), 0);
        st.use_ref(SharedId(1)).unwrap();
        assert_eq!(st.pop_drained(), 1);
        assert!(st.assert_empty().is_ok());
    }

    #[test]
    fn test_use_before_define() {
        let mut st = SharedStack::new("p");
        assert!(matches!(
            st.use_ref(SharedId(9)),
            Err(EmitError::SharedUndefined { id: SharedId(9), .. })
        ));
    }

    #[test]
    fn test_overuse_while_live_and_after_pop() {
        let mut st = SharedStack::new("p");
        st.define(SharedId(0), 1).unwrap();
        st.use_ref(SharedId(0)).unwrap();
        assert!(matches!(
            st.use_ref(SharedId(0)),
            Err(EmitError::SharedOverused { total: 1, .. })
        ));
        st.pop_drained();
        assert!(matches!(
            st.use_ref(SharedId(0)),
            Err(EmitError::SharedOverused { total: 1, .. })
        ));
    }

    #[test]
    fn test_pending_at_stack_empty() {
        let mut st = SharedStack::new("p");
        st.define(SharedId(0), 1).unwrap();
        st.define(SharedId(1), 1).unwrap();
        st.use_ref(SharedId(1)).unwrap();
        assert!(matches!(
            st.assert_empty(),
            Err(EmitError::StackNotEmpty { pending: 1, .. })
        ));
        assert_eq!(st.max_depth(), 2);
    }

    #[test]
    fn test_slots_reused_after_drain() {
        let mut st = SharedStack::new("p");
        st.define(SharedId(0), 1).unwrap();
        st.use_ref(SharedId(0)).unwrap();
        st.pop_drained();
        assert_eq!(st.define(SharedId(1), 1).unwrap(), 0);
        assert!(matches!(
            st.define(SharedId(0), 1),
            Err(EmitError::SharedRedefined { .. })
        ));
    }
}
