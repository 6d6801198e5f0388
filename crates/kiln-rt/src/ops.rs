//! Accessors called by generated code.
//!
//! Field and map accessors consume one reference to their receiver, the one
//! the generated code took when it loaded the receiver. `_ref` variants move
//! counted references in and out; the plain variants copy values.

use std::rc::Rc;

use crate::{
    LabelFn, MapEntry, ObjId, RefObject, Result, Runtime, RuntimeError, VTable, Value, check,
};

fn null_check(v: &Value) -> Result<ObjId> {
    match v {
        Value::Ref(id) => Ok(*id),
        v if v.is_nullish() => Err(RuntimeError::user("Dereferencing null/undefined value.")),
        v => Err(RuntimeError::assertion(format!("{v:?} is not an object"))),
    }
}

impl Runtime {
    // ========================================================================
    // Records
    // ========================================================================

    pub fn mk_class_instance(&mut self, vtable: &Rc<VTable>) -> Value {
        let fields = vec![Value::Undefined; vtable.num_fields()];
        Value::Ref(self.heap.alloc(RefObject::Record {
            vtable: Rc::clone(vtable),
            fields,
        }))
    }

    fn field_mut(&mut self, r: &Value, idx: usize, is_ref: bool) -> Result<&mut Value> {
        let id = null_check(r)?;
        let RefObject::Record { vtable, fields } = self.heap.get_mut(id)? else {
            return Err(RuntimeError::assertion("field access on a non-record"));
        };
        let mask = vtable.refmask.get(idx).copied();
        check(mask == Some(is_ref), "field kind mismatch")?;
        fields
            .get_mut(idx)
            .ok_or_else(|| RuntimeError::assertion("field index out of range"))
    }

    /// # Errors
    ///
    /// Returns a user error for a null receiver.
    pub fn ldfld(&mut self, r: &Value, idx: usize) -> Result<Value> {
        let v = self.field_mut(r, idx, false)?.clone();
        self.heap.decr(r)?;
        Ok(v)
    }

    /// # Errors
    ///
    /// Returns a user error for a null receiver.
    pub fn ldfld_ref(&mut self, r: &Value, idx: usize) -> Result<Value> {
        let v = self.field_mut(r, idx, true)?.clone();
        self.heap.incr(&v)?;
        self.heap.decr(r)?;
        Ok(v)
    }

    /// # Errors
    ///
    /// Returns a user error for a null receiver.
    pub fn stfld(&mut self, r: &Value, idx: usize, v: Value) -> Result<()> {
        *self.field_mut(r, idx, false)? = v;
        self.heap.decr(r)
    }

    /// Store a counted reference, releasing the previous one.
    ///
    /// # Errors
    ///
    /// Returns a user error for a null receiver.
    pub fn stfld_ref(&mut self, r: &Value, idx: usize, v: Value) -> Result<()> {
        let old = std::mem::replace(self.field_mut(r, idx, true)?, v);
        self.heap.decr(&old)?;
        self.heap.decr(r)
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Action of `len` empty captures, the first `reflen` counted.
    pub fn mk_action(&mut self, reflen: usize, len: usize, func: LabelFn) -> Value {
        Value::Ref(self.heap.alloc(RefObject::Action {
            func,
            reflen,
            fields: vec![Value::Null; len],
        }))
    }

    /// Fill capture `idx` of a fresh action; returns the action for chaining.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range or already filled capture.
    pub fn stclo(&mut self, a: &Value, idx: usize, v: Value) -> Result<Value> {
        let id = null_check(a)?;
        let RefObject::Action { fields, .. } = self.heap.get_mut(id)? else {
            return Err(RuntimeError::assertion("stclo on a non-action"));
        };
        let slot = fields
            .get_mut(idx)
            .ok_or_else(|| RuntimeError::assertion("capture index out of range"))?;
        check(*slot == Value::Null, "capture already set")?;
        *slot = v;
        Ok(a.clone())
    }

    // ========================================================================
    // Boxed locals
    // ========================================================================

    pub fn mkloc(&mut self) -> Value {
        Value::Ref(self.heap.alloc(RefObject::Local(Value::Int(0))))
    }

    pub fn mkloc_ref(&mut self) -> Value {
        Value::Ref(self.heap.alloc(RefObject::RefLocal(Value::Null)))
    }

    fn local_slot(&mut self, r: &Value, is_ref: bool) -> Result<&mut Value> {
        match (self.heap.get_mut(null_check(r)?)?, is_ref) {
            (RefObject::Local(v), false) | (RefObject::RefLocal(v), true) => Ok(v),
            _ => Err(RuntimeError::assertion("local kind mismatch")),
        }
    }

    /// # Errors
    ///
    /// Fails if `r` is not a plain boxed local.
    pub fn ldloc(&mut self, r: &Value) -> Result<Value> {
        Ok(self.local_slot(r, false)?.clone())
    }

    /// # Errors
    ///
    /// Fails if `r` is not a ref boxed local.
    pub fn ldloc_ref(&mut self, r: &Value) -> Result<Value> {
        let v = self.local_slot(r, true)?.clone();
        self.heap.incr(&v)?;
        Ok(v)
    }

    /// # Errors
    ///
    /// Fails if `r` is not a plain boxed local.
    pub fn stloc(&mut self, r: &Value, v: Value) -> Result<()> {
        *self.local_slot(r, false)? = v;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails if `r` is not a ref boxed local.
    pub fn stloc_ref(&mut self, r: &Value, v: Value) -> Result<()> {
        let old = std::mem::replace(self.local_slot(r, true)?, v);
        self.heap.decr(&old)
    }

    // ========================================================================
    // Maps
    // ========================================================================

    pub fn mk_map(&mut self) -> Value {
        Value::Ref(self.heap.alloc(RefObject::Map(Vec::new())))
    }

    pub fn is_map(&self, v: &Value) -> bool {
        v.as_ref_id()
            .and_then(|id| self.heap.get(id).ok())
            .is_some_and(|o| matches!(o, RefObject::Map(_)))
    }

    fn map_entries(&mut self, map: &Value) -> Result<&mut Vec<MapEntry>> {
        match self.heap.get_mut(null_check(map)?)? {
            RefObject::Map(entries) => Ok(entries),
            _ => Err(RuntimeError::assertion("map access on a non-map")),
        }
    }

    /// Value at `key`, 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns a user error for a null map.
    pub fn map_get(&mut self, map: &Value, key: i32) -> Result<Value> {
        let v = self
            .map_entries(map)?
            .iter()
            .find(|e| e.key == key)
            .map_or(Value::Int(0), |e| e.val.clone());
        self.heap.decr(map)?;
        Ok(v)
    }

    /// # Errors
    ///
    /// Returns a user error for a null map.
    pub fn map_get_ref(&mut self, map: &Value, key: i32) -> Result<Value> {
        let v = self
            .map_entries(map)?
            .iter()
            .find(|e| e.key == key)
            .map_or(Value::Int(0), |e| e.val.clone());
        self.heap.incr(&v)?;
        self.heap.decr(map)?;
        Ok(v)
    }

    fn map_store(
        &mut self,
        map: &Value,
        key: i32,
        val: Value,
        is_ref: bool,
        key_name: Option<&str>,
    ) -> Result<()> {
        let key_name = key_name.map(Rc::from);
        let entries = self.map_entries(map)?;
        let released = match entries.iter_mut().find(|e| e.key == key) {
            Some(e) => {
                let old = std::mem::replace(&mut e.val, val);
                let was_ref = std::mem::replace(&mut e.is_ref, is_ref);
                e.key_name = key_name;
                was_ref.then_some(old)
            }
            None => {
                entries.push(MapEntry {
                    key,
                    val,
                    is_ref,
                    key_name,
                });
                None
            }
        };
        if let Some(old) = released {
            self.heap.decr(&old)?;
        }
        self.heap.decr(map)
    }

    /// Store a plain value at `key`.
    ///
    /// # Errors
    ///
    /// Returns a user error for a null map.
    pub fn map_set(&mut self, map: &Value, key: i32, val: Value, key_name: Option<&str>) -> Result<()> {
        self.map_store(map, key, val, false, key_name)
    }

    /// Store a counted reference at `key`.
    ///
    /// # Errors
    ///
    /// Returns a user error for a null map.
    pub fn map_set_ref(
        &mut self,
        map: &Value,
        key: i32,
        val: Value,
        key_name: Option<&str>,
    ) -> Result<()> {
        self.map_store(map, key, val, true, key_name)
    }

    /// Abort the current fiber with a user error.
    ///
    /// # Errors
    ///
    /// Always.
    pub fn panic(&self, code: i32) -> Result<()> {
        Err(RuntimeError::user(format!("PANIC! Code {code}")))
    }
}
