//! Heap objects.
//!
//! A [`ScriptObject`] is a shape reference, a slot vector whose length
//! always equals the shape's property count, a prototype value, and a kind
//! payload for the specializations the engine knows about: arrays (with the
//! fast-mode dense store), functions, error objects, and the opaque
//! enumeration state used by for-in.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::error::ErrorKind;
use crate::shape::ShapeId;
use crate::string_table::StringId;
use crate::value::Value;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u8 {
        const EXTENSIBLE = 1 << 0;
        const HAS_ACCESSOR = 1 << 1;
    }
}

/// Identity of a builtin constructor, used by `new` dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Array,
    String,
    Boolean,
    Number,
    Error(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// A compiled script function; the index resolves through the VM's code
    /// block table.
    Script { block: u32 },
    Builtin(Builtin),
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub kind: FunctionKind,
    pub name: Option<StringId>,
}

/// Dense-first array storage. While `fast` holds, numeric properties live in
/// `values` (with `Value::Empty` marking unset indices) and `length` is the
/// dense length. Leaving fast mode moves everything to the sparse map and is
/// one-way.
#[derive(Debug, Clone, Default)]
pub struct ArrayStorage {
    values: Vec<Value>,
    sparse: FxHashMap<u32, Value>,
    length: u32,
    fast: bool,
}

impl ArrayStorage {
    pub fn with_length(length: u32) -> Self {
        Self {
            values: vec![Value::Empty; length as usize],
            sparse: FxHashMap::default(),
            length,
            fast: true,
        }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        let length = values.len() as u32;
        Self {
            values,
            sparse: FxHashMap::default(),
            length,
            fast: true,
        }
    }

    pub fn is_fastmode(&self) -> bool {
        self.fast
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Raw dense read; `Empty` means unset.
    pub fn get(&self, idx: u32) -> Value {
        if self.fast {
            if idx < self.length {
                self.values[idx as usize]
            } else {
                Value::Empty
            }
        } else {
            self.sparse.get(&idx).copied().unwrap_or(Value::Empty)
        }
    }

    pub fn set(&mut self, idx: u32, value: Value) {
        if self.fast {
            if idx < self.length {
                self.values[idx as usize] = value;
                return;
            }
            if idx == self.length {
                self.values.push(value);
                self.length += 1;
                return;
            }
            self.leave_fastmode();
        }
        self.sparse.insert(idx, value);
        if idx >= self.length {
            self.length = idx + 1;
        }
    }

    /// Delete an index, leaving a hole. Fast mode survives; holes are what
    /// `Empty` is for.
    pub fn remove(&mut self, idx: u32) {
        if self.fast {
            if idx < self.length {
                self.values[idx as usize] = Value::Empty;
            }
        } else {
            self.sparse.remove(&idx);
        }
    }

    pub fn set_length(&mut self, length: u32) {
        if self.fast {
            self.values.resize(length as usize, Value::Empty);
        } else {
            self.sparse.retain(|&k, _| k < length);
        }
        self.length = length;
    }

    fn leave_fastmode(&mut self) {
        for (i, v) in self.values.drain(..).enumerate() {
            if !v.is_empty() {
                self.sparse.insert(i as u32, v);
            }
        }
        self.fast = false;
    }

    fn trace(&self, mark: &mut dyn FnMut(Value)) {
        for &v in &self.values {
            mark(v);
        }
        for &v in self.sparse.values() {
            mark(v);
        }
    }
}

/// Snapshot state for a for-in loop.
#[derive(Debug, Clone)]
pub struct EnumerationData {
    pub keys: Vec<StringId>,
    pub cursor: usize,
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(ArrayStorage),
    Function(FunctionData),
    Error(ErrorKind),
    Enumeration(EnumerationData),
}

#[derive(Debug, Clone)]
pub struct ScriptObject {
    pub shape: ShapeId,
    pub slots: Vec<Value>,
    pub proto: Value,
    pub flags: ObjectFlags,
    pub kind: ObjectKind,
}

impl ScriptObject {
    pub fn new_ordinary(shape: ShapeId, proto: Value) -> Self {
        Self {
            shape,
            slots: Vec::new(),
            proto,
            flags: ObjectFlags::EXTENSIBLE,
            kind: ObjectKind::Ordinary,
        }
    }

    pub fn new_array(shape: ShapeId, proto: Value, storage: ArrayStorage) -> Self {
        Self {
            shape,
            slots: Vec::new(),
            proto,
            flags: ObjectFlags::EXTENSIBLE,
            kind: ObjectKind::Array(storage),
        }
    }

    pub fn new_function(shape: ShapeId, proto: Value, data: FunctionData) -> Self {
        Self {
            shape,
            slots: Vec::new(),
            proto,
            flags: ObjectFlags::EXTENSIBLE,
            kind: ObjectKind::Function(data),
        }
    }

    pub fn new_error(shape: ShapeId, proto: Value, kind: ErrorKind) -> Self {
        Self {
            shape,
            slots: Vec::new(),
            proto,
            flags: ObjectFlags::EXTENSIBLE,
            kind: ObjectKind::Error(kind),
        }
    }

    pub fn new_enumeration(keys: Vec<StringId>) -> Self {
        Self {
            shape: crate::shape::ShapeArena::root(),
            proto: Value::Null,
            slots: Vec::new(),
            flags: ObjectFlags::empty(),
            kind: ObjectKind::Enumeration(EnumerationData { keys, cursor: 0 }),
        }
    }

    pub fn array(&self) -> Option<&ArrayStorage> {
        match &self.kind {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn array_mut(&mut self) -> Option<&mut ArrayStorage> {
        match &mut self.kind {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.kind {
            ObjectKind::Error(k) => Some(*k),
            _ => None,
        }
    }

    /// Report every outgoing reference for the collector.
    pub fn trace(&self, mark: &mut dyn FnMut(Value)) {
        for &v in &self.slots {
            mark(v);
        }
        mark(self.proto);
        if let ObjectKind::Array(a) = &self.kind {
            a.trace(mark);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_array_read_write() {
        let mut a = ArrayStorage::from_values(vec![
            Value::Int32(10),
            Value::Int32(20),
            Value::Int32(30),
        ]);
        assert!(a.is_fastmode());
        assert_eq!(a.length(), 3);
        assert_eq!(a.get(1), Value::Int32(20));

        a.set(1, Value::Double(2.5));
        assert_eq!(a.get(1), Value::Double(2.5));
        assert!(a.is_fastmode());
    }

    #[test]
    fn append_at_length_stays_fast() {
        let mut a = ArrayStorage::with_length(0);
        a.set(0, Value::Int32(1));
        a.set(1, Value::Int32(2));
        assert!(a.is_fastmode());
        assert_eq!(a.length(), 2);
    }

    #[test]
    fn out_of_range_write_leaves_fastmode_for_good() {
        let mut a = ArrayStorage::from_values(vec![Value::Int32(1)]);
        a.set(100, Value::Int32(2));
        assert!(!a.is_fastmode());
        assert_eq!(a.length(), 101);
        assert_eq!(a.get(100), Value::Int32(2));
        assert_eq!(a.get(0), Value::Int32(1));
        assert_eq!(a.get(50), Value::Empty);

        // Writing back in range does not restore fast mode.
        a.set(0, Value::Int32(3));
        assert!(!a.is_fastmode());
    }

    #[test]
    fn unset_slot_reads_empty() {
        let a = ArrayStorage::with_length(3);
        assert_eq!(a.get(0), Value::Empty);
        assert_eq!(a.get(2), Value::Empty);
        assert_eq!(a.get(3), Value::Empty);
    }
}
