//! Reference-counted heap.
//!
//! Objects start with a count of one, owned by their creator. Dropping the
//! count to zero removes the object from the arena and releases every
//! reference it holds: the fields marked in a record's refmask, the first
//! `reflen` captures of an action, the value of a ref local, and map
//! entries stored as references. The cascade runs on an explicit worklist
//! so long chains do not recurse.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::arena::{Arena, Key};
use crate::{LabelFn, Result, RuntimeError, VTable, Value};

/// Handle to a live heap object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(Key);

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// One entry of a [`RefObject::Map`].
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub key: i32,
    pub val: Value,
    /// `val` holds a counted reference.
    pub is_ref: bool,
    pub key_name: Option<Rc<str>>,
}

/// Heap object payloads.
#[derive(Debug)]
pub enum RefObject {
    Record {
        vtable: Rc<VTable>,
        fields: Vec<Value>,
    },
    /// Closure; captures `[0, reflen)` are references.
    Action {
        func: LabelFn,
        reflen: usize,
        fields: Vec<Value>,
    },
    /// Boxed captured local holding a plain value.
    Local(Value),
    /// Boxed captured local holding a reference.
    RefLocal(Value),
    Map(Vec<MapEntry>),
}

impl RefObject {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Record { .. } => "record",
            Self::Action { .. } => "action",
            Self::Local(_) => "local",
            Self::RefLocal(_) => "ref-local",
            Self::Map(_) => "map",
        }
    }

    /// References released when this object is destroyed.
    fn into_owned_refs(self) -> Vec<Value> {
        match self {
            Self::Record { vtable, fields } => fields
                .into_iter()
                .zip(vtable.refmask.iter())
                .filter_map(|(v, &is_ref)| is_ref.then_some(v))
                .collect(),
            Self::Action {
                reflen, mut fields, ..
            } => {
                fields.truncate(reflen);
                fields
            }
            Self::Local(_) => Vec::new(),
            Self::RefLocal(v) => vec![v],
            Self::Map(entries) => entries
                .into_iter()
                .filter(|e| e.is_ref)
                .map(|e| e.val)
                .collect(),
        }
    }
}

/// Reference-count traffic since the heap was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocated: u64,
    pub destroyed: u64,
    pub incr: u64,
    pub decr: u64,
}

#[derive(Debug)]
struct Entry {
    refcnt: u32,
    obj: RefObject,
}

/// Arena of reference-counted objects; also the live-object registry.
#[derive(Default)]
pub struct Heap {
    objects: Arena<Entry>,
    stats: HeapStats,
}

fn stale(id: ObjId) -> RuntimeError {
    RuntimeError::assertion(format!("object {id:?} used after destroy"))
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate with a count of one.
    pub fn alloc(&mut self, obj: RefObject) -> ObjId {
        self.stats.allocated += 1;
        let kind = obj.kind();
        let id = ObjId(self.objects.insert(Entry { refcnt: 1, obj }));
        trace!(id = ?id, kind, "heap: alloc");
        id
    }

    /// # Errors
    ///
    /// Fails for a destroyed object.
    pub fn get(&self, id: ObjId) -> Result<&RefObject> {
        self.objects.get(id.0).map(|e| &e.obj).ok_or_else(|| stale(id))
    }

    /// # Errors
    ///
    /// Fails for a destroyed object.
    pub fn get_mut(&mut self, id: ObjId) -> Result<&mut RefObject> {
        self.objects
            .get_mut(id.0)
            .map(|e| &mut e.obj)
            .ok_or_else(|| stale(id))
    }

    /// Current count, `None` once destroyed.
    pub fn refcnt(&self, id: ObjId) -> Option<u32> {
        self.objects.get(id.0).map(|e| e.refcnt)
    }

    pub fn is_live(&self, id: ObjId) -> bool {
        self.objects.contains(id.0)
    }

    /// Take another reference. No-op on non-heap values.
    ///
    /// # Errors
    ///
    /// Fails for a destroyed object.
    pub fn incr(&mut self, v: &Value) -> Result<()> {
        let Value::Ref(id) = v else {
            return Ok(());
        };
        let entry = self.objects.get_mut(id.0).ok_or_else(|| stale(*id))?;
        entry.refcnt += 1;
        self.stats.incr += 1;
        Ok(())
    }

    /// Release a reference, destroying the object and cascading into its
    /// references when the count reaches zero. No-op on non-heap values.
    ///
    /// # Errors
    ///
    /// Fails for a destroyed object anywhere in the cascade.
    pub fn decr(&mut self, v: &Value) -> Result<()> {
        let Value::Ref(id) = v else {
            return Ok(());
        };
        let mut dead = Vec::new();
        self.release(*id, &mut dead)?;
        while let Some(id) = dead.pop() {
            let entry = self
                .objects
                .remove(id.0)
                .ok_or_else(|| RuntimeError::assertion(format!("object {id:?} destroyed twice")))?;
            self.stats.destroyed += 1;
            trace!(id = ?id, kind = entry.obj.kind(), "heap: destroy");
            for field in entry.obj.into_owned_refs() {
                if let Value::Ref(child) = field {
                    self.release(child, &mut dead)?;
                }
            }
        }
        Ok(())
    }

    fn release(&mut self, id: ObjId, dead: &mut Vec<ObjId>) -> Result<()> {
        let entry = self.objects.get_mut(id.0).ok_or_else(|| stale(id))?;
        if entry.refcnt == 0 {
            return Err(RuntimeError::assertion(format!("object {id:?} refcount underflow")));
        }
        entry.refcnt -= 1;
        self.stats.decr += 1;
        if entry.refcnt == 0 {
            dead.push(id);
        }
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.objects.len()
    }

    pub const fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Log every live object; used to chase leaks.
    pub fn dump_live(&self) {
        debug!(live = self.live_count(), "heap: live objects");
        for (key, entry) in self.objects.iter() {
            debug!(
                id = ?ObjId(key),
                kind = entry.obj.kind(),
                refcnt = entry.refcnt,
                "heap: live"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameId, Runtime};

    fn nop(_: &mut Runtime, _: FrameId) -> Result<Option<FrameId>> {
        Ok(None)
    }

    fn leaf(heap: &mut Heap) -> ObjId {
        heap.alloc(RefObject::Local(Value::Int(0)))
    }

    #[test]
    fn test_incr_decr_noop_on_plain_values() {
        let mut heap = Heap::new();
        heap.incr(&Value::Int(3)).unwrap();
        heap.decr(&Value::str("s")).unwrap();
        assert_eq!(heap.stats(), HeapStats::default());
    }

    #[test]
    fn test_record_destroy_follows_refmask() {
        let mut heap = Heap::new();
        let a = leaf(&mut heap);
        let b = leaf(&mut heap);
        let c = leaf(&mut heap);
        let vt = Rc::new(VTable::new("Triple", vec![true, false, true]));
        let rec = heap.alloc(RefObject::Record {
            vtable: vt,
            fields: vec![a.into(), b.into(), c.into()],
        });

        heap.decr(&rec.into()).unwrap();
        assert!(!heap.is_live(rec));
        assert!(!heap.is_live(a));
        assert!(heap.is_live(b));
        assert!(!heap.is_live(c));
        assert_eq!(heap.refcnt(b), Some(1));
    }

    #[test]
    fn test_action_destroy_releases_reflen_prefix() {
        let mut heap = Heap::new();
        let caps: Vec<ObjId> = (0..3).map(|_| leaf(&mut heap)).collect();
        let action = heap.alloc(RefObject::Action {
            func: nop,
            reflen: 2,
            fields: caps.iter().map(|&c| c.into()).collect(),
        });
        heap.decr(&action.into()).unwrap();
        assert!(!heap.is_live(caps[0]));
        assert!(!heap.is_live(caps[1]));
        assert!(heap.is_live(caps[2]));
    }

    #[test]
    fn test_refcount_conservation() {
        let mut heap = Heap::new();
        let inner = leaf(&mut heap);
        let holder = heap.alloc(RefObject::RefLocal(inner.into()));
        for _ in 0..4 {
            heap.incr(&holder.into()).unwrap();
        }
        for _ in 0..4 {
            heap.decr(&holder.into()).unwrap();
        }
        assert!(heap.is_live(holder));
        heap.decr(&holder.into()).unwrap();

        let stats = heap.stats();
        assert_eq!(heap.live_count(), 0);
        assert_eq!(stats.allocated, stats.destroyed);
        // Every allocation carries one implicit reference.
        assert_eq!(stats.allocated + stats.incr, stats.decr);
    }

    #[test]
    fn test_long_chain_cascade() {
        let mut heap = Heap::new();
        let mut head = leaf(&mut heap);
        for _ in 0..100_000 {
            head = heap.alloc(RefObject::RefLocal(head.into()));
        }
        heap.decr(&head.into()).unwrap();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_use_after_destroy() {
        let mut heap = Heap::new();
        let a = leaf(&mut heap);
        heap.decr(&a.into()).unwrap();
        assert!(matches!(heap.decr(&a.into()), Err(RuntimeError::Assertion(_))));
        assert!(matches!(heap.incr(&a.into()), Err(RuntimeError::Assertion(_))));
        assert!(heap.get(a).is_err());
    }

    #[test]
    fn test_map_releases_ref_entries_only() {
        let mut heap = Heap::new();
        let kept = leaf(&mut heap);
        let owned = leaf(&mut heap);
        let map = heap.alloc(RefObject::Map(vec![
            MapEntry {
                key: 1,
                val: kept.into(),
                is_ref: false,
                key_name: None,
            },
            MapEntry {
                key: 2,
                val: owned.into(),
                is_ref: true,
                key_name: None,
            },
        ]));
        heap.decr(&map.into()).unwrap();
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(owned));
    }
}
