//! Runtime state and the operations the interpreter leans on.
//!
//! [`Runtime`] owns the heap, the shape arena, and the string table, and
//! implements the ECMAScript abstract operations (ToNumber, ToString,
//! ToPrimitive, equality) plus the member-access paths the bytecode
//! dispatches into: the generic indexed reads/writes with their array and
//! string fast paths, and the precomputed-name reads/writes that drive the
//! inline caches.

use crate::error::{ErrorKind, Thrown, messages};
use crate::heap::{CellKind, Heap, HeapRef};
use crate::ic::PropertyCache;
use crate::object::{ArrayStorage, ScriptObject};
use crate::shape::{PropertyFlags, ShapeArena};
use crate::string_table::{ASCII_TABLE_SIZE, Atoms, StringId, StringTable, parse_array_index};
use crate::value::{Value, f64_to_int32, f64_to_uint32};

pub struct Runtime {
    pub heap: Heap,
    pub shapes: ShapeArena,
    pub strings: StringTable,
    pub atoms: Atoms,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        let mut strings = StringTable::new();
        let atoms = Atoms::new(&mut strings);
        Self {
            heap: Heap::new(),
            shapes: ShapeArena::new(),
            strings,
            atoms,
        }
    }

    // ========================================================================
    // Conversions
    // ========================================================================

    pub fn to_boolean(&self, v: Value) -> bool {
        match v {
            Value::Empty | Value::Undefined | Value::Null => false,
            Value::Boolean(b) => b,
            Value::Int32(i) => i != 0,
            Value::Double(d) => d != 0.0 && !d.is_nan(),
            Value::Str(s) => !self.strings.resolve(s).is_empty(),
            Value::Ptr(_) => true,
        }
    }

    pub fn to_number(&mut self, v: Value) -> f64 {
        match v {
            Value::Empty | Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int32(i) => i as f64,
            Value::Double(d) => d,
            Value::Str(s) => string_to_number(self.strings.resolve(s)),
            Value::Ptr(_) => {
                let prim = self.to_primitive(v);
                self.to_number(prim)
            }
        }
    }

    pub fn to_int32(&mut self, v: Value) -> i32 {
        match v {
            Value::Int32(i) => i,
            _ => f64_to_int32(self.to_number(v)),
        }
    }

    pub fn to_uint32(&mut self, v: Value) -> u32 {
        match v {
            Value::Int32(i) => i as u32,
            _ => f64_to_uint32(self.to_number(v)),
        }
    }

    /// ToPrimitive with the default (number) hint. Objects in this slice
    /// have no user-visible `valueOf`/`toString`, so they convert through
    /// their canonical string form.
    pub fn to_primitive(&mut self, v: Value) -> Value {
        match v {
            Value::Ptr(r) => Value::Str(self.object_to_string(r)),
            other => other,
        }
    }

    pub fn to_string_id(&mut self, v: Value) -> StringId {
        match v {
            Value::Empty | Value::Undefined => self.atoms.undefined,
            Value::Null => self.atoms.null,
            Value::Boolean(true) => self.atoms.true_,
            Value::Boolean(false) => self.atoms.false_,
            Value::Int32(i) => {
                let s = i.to_string();
                self.strings.intern(&s)
            }
            Value::Double(d) => self.number_to_string_id(d),
            Value::Str(s) => s,
            Value::Ptr(r) => self.object_to_string(r),
        }
    }

    pub fn number_to_string_id(&mut self, d: f64) -> StringId {
        if d.is_nan() {
            return self.atoms.nan;
        }
        if d == f64::INFINITY {
            return self.atoms.infinity;
        }
        if d == f64::NEG_INFINITY {
            return self.atoms.negative_infinity;
        }
        let s = if d == d.trunc() && d.abs() < 1e18 {
            (d as i64).to_string()
        } else {
            d.to_string()
        };
        self.strings.intern(&s)
    }

    fn object_to_string(&mut self, r: HeapRef) -> StringId {
        if let Some(kind) = self.heap.cell(r).error_kind() {
            return self.strings.intern(kind.name());
        }
        match r.kind {
            CellKind::Array => self.array_join(r),
            CellKind::Function => self.atoms.function,
            CellKind::Ordinary => self.strings.intern("[object Object]"),
        }
    }

    fn array_join(&mut self, r: HeapRef) -> StringId {
        let length = self
            .heap
            .cell(r)
            .array()
            .map(|a| a.length())
            .unwrap_or(0);
        let mut out = String::new();
        for i in 0..length {
            if i > 0 {
                out.push(',');
            }
            let v = self
                .heap
                .cell(r)
                .array()
                .map(|a| a.get(i))
                .unwrap_or(Value::Empty);
            if !v.is_empty() && !v.is_undefined_or_null() {
                let id = self.to_string_id(v);
                out.push_str(self.strings.resolve(id));
            }
        }
        self.strings.intern(&out)
    }

    /// Convert a property value to an array index, or None when it is not a
    /// canonical index.
    pub fn to_index(&self, v: Value) -> Option<u32> {
        match v {
            Value::Int32(i) if i >= 0 => Some(i as u32),
            Value::Double(d)
                if d >= 0.0 && d == d.trunc() && d < u32::MAX as f64 =>
            {
                Some(d as u32)
            }
            Value::Str(s) => parse_array_index(self.strings.resolve(s)),
            _ => None,
        }
    }

    fn length_value(length: u32) -> Value {
        if length <= i32::MAX as u32 {
            Value::Int32(length as i32)
        } else {
            Value::Double(length as f64)
        }
    }

    fn string_length(&self, s: StringId) -> u32 {
        self.strings.resolve(s).encode_utf16().count() as u32
    }

    // ========================================================================
    // Equality
    // ========================================================================

    /// Abstract equality (`==`).
    pub fn abstract_equals(&mut self, a: Value, b: Value) -> bool {
        match (a, b) {
            (a, b) if a.is_number() && b.is_number() => a.as_number() == b.as_number(),
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Ptr(x), Value::Ptr(y)) => x == y,
            (x, y) if x.is_undefined_or_null() && y.is_undefined_or_null() => true,
            (x, y) if x.is_undefined_or_null() || y.is_undefined_or_null() => false,
            (Value::Boolean(x), y) => {
                let n = Value::Double(if x { 1.0 } else { 0.0 });
                self.abstract_equals(n, y)
            }
            (x, Value::Boolean(y)) => {
                let n = Value::Double(if y { 1.0 } else { 0.0 });
                self.abstract_equals(x, n)
            }
            (x, Value::Str(_)) if x.is_number() => {
                let n = self.to_number(b);
                x.as_number() == n
            }
            (Value::Str(_), y) if y.is_number() => {
                let n = self.to_number(a);
                n == y.as_number()
            }
            (Value::Ptr(_), y) if y.is_number() || y.is_str() => {
                let p = self.to_primitive(a);
                self.abstract_equals(p, b)
            }
            (x, Value::Ptr(_)) if x.is_number() || x.is_str() => {
                let p = self.to_primitive(b);
                self.abstract_equals(a, p)
            }
            _ => false,
        }
    }

    /// The abstract relational comparison. `None` means a NaN was involved
    /// and every comparison outcome is false. `left_first` controls the
    /// ToPrimitive evaluation order, which is observable once objects have
    /// user conversion hooks.
    pub fn abstract_less_than(
        &mut self,
        left: Value,
        right: Value,
        left_first: bool,
    ) -> Option<bool> {
        let (lval, rval) = if left_first {
            let l = self.to_primitive(left);
            let r = self.to_primitive(right);
            (l, r)
        } else {
            let r = self.to_primitive(right);
            let l = self.to_primitive(left);
            (l, r)
        };
        if let (Value::Int32(l), Value::Int32(r)) = (lval, rval) {
            return Some(l < r);
        }
        if let (Value::Str(l), Value::Str(r)) = (lval, rval) {
            return Some(self.strings.resolve(l) < self.strings.resolve(r));
        }
        let n1 = self.to_number(lval);
        let n2 = self.to_number(rval);
        if n1.is_nan() || n2.is_nan() {
            return None;
        }
        Some(n1 < n2)
    }

    /// `delete obj[prop]`. Returns false when the property exists and is
    /// non-configurable. Removing a named property rebuilds the shape from
    /// the surviving entries; deletion is rare enough that the rebuild cost
    /// does not matter, and it keeps shapes append-only.
    pub fn delete_property(&mut self, obj: Value, property: Value) -> Result<bool, Thrown> {
        let r = match obj {
            Value::Ptr(r) => r,
            Value::Undefined | Value::Empty => {
                return Err(self.type_error(messages::GET_FROM_UNDEFINED));
            }
            Value::Null => return Err(self.type_error(messages::GET_FROM_NULL)),
            _ => return Ok(true),
        };
        if r.kind == CellKind::Array
            && let Some(idx) = self.to_index(property)
        {
            if let Some(arr) = self.heap.cell_mut(r).array_mut() {
                arr.remove(idx);
            }
            return Ok(true);
        }
        let key = self.to_string_id(property);
        let shape = self.heap.cell(r).shape;
        let Some(slot) = self.shapes.find_property(shape, key) else {
            return Ok(true);
        };
        if !self
            .shapes
            .flags_at(shape, slot)
            .contains(PropertyFlags::CONFIGURABLE)
        {
            return Ok(false);
        }
        let entries: Vec<_> = self.shapes.entries(shape).to_vec();
        let old_slots = std::mem::take(&mut self.heap.cell_mut(r).slots);
        let mut new_shape = ShapeArena::root();
        let mut new_slots = Vec::with_capacity(old_slots.len() - 1);
        for (i, entry) in entries.iter().enumerate() {
            if i as u32 == slot {
                continue;
            }
            new_shape = self.shapes.transition(new_shape, entry.key, entry.flags);
            new_slots.push(old_slots[i]);
        }
        let cell = self.heap.cell_mut(r);
        cell.shape = new_shape;
        cell.slots = new_slots;
        Ok(true)
    }

    // ========================================================================
    // Object construction
    // ========================================================================

    pub fn create_ordinary_object(&mut self, proto: Value) -> HeapRef {
        self.heap
            .allocate(ScriptObject::new_ordinary(ShapeArena::root(), proto))
    }

    pub fn create_array(&mut self, storage: ArrayStorage, proto: Value) -> HeapRef {
        self.heap
            .allocate(ScriptObject::new_array(ShapeArena::root(), proto, storage))
    }

    pub fn create_error_object(
        &mut self,
        kind: ErrorKind,
        message: &str,
        proto: Value,
    ) -> HeapRef {
        let r = self
            .heap
            .allocate(ScriptObject::new_error(ShapeArena::root(), proto, kind));
        let name_atom = self.atoms.name;
        let message_atom = self.atoms.message;
        let name = self.strings.intern(kind.name());
        let msg = self.strings.intern(message);
        self.define_own_property(r, name_atom, PropertyFlags::data_default(), Value::Str(name));
        self.define_own_property(
            r,
            message_atom,
            PropertyFlags::data_default(),
            Value::Str(msg),
        );
        r
    }

    pub fn throw_error(&mut self, kind: ErrorKind, message: &'static str) -> Thrown {
        let obj = self.create_error_object(kind, message, Value::Null);
        Thrown(Value::Ptr(obj))
    }

    pub fn type_error(&mut self, message: &'static str) -> Thrown {
        self.throw_error(ErrorKind::TypeError, message)
    }

    pub fn range_error(&mut self, message: &'static str) -> Thrown {
        self.throw_error(ErrorKind::RangeError, message)
    }

    pub fn reference_error(&mut self, message: &'static str) -> Thrown {
        self.throw_error(ErrorKind::ReferenceError, message)
    }

    // ========================================================================
    // Property storage
    // ========================================================================

    /// Write a data property on the object itself, transitioning the shape
    /// when the key is new. The slot vector and the shape move together.
    pub fn define_own_property(
        &mut self,
        r: HeapRef,
        key: StringId,
        flags: PropertyFlags,
        value: Value,
    ) {
        let shape = self.heap.cell(r).shape;
        if let Some(slot) = self.shapes.find_property(shape, key) {
            self.heap.cell_mut(r).slots[slot as usize] = value;
            return;
        }
        let next = self.shapes.transition(shape, key, flags);
        let cell = self.heap.cell_mut(r);
        cell.slots.push(value);
        cell.shape = next;
    }

    pub fn get_own_property(&self, r: HeapRef, key: StringId) -> Option<Value> {
        let cell = self.heap.cell(r);
        self.shapes
            .find_property(cell.shape, key)
            .map(|slot| cell.slots[slot as usize])
    }

    /// Named lookup along the prototype chain; Undefined when absent.
    pub fn get_property(&self, v: Value, key: StringId) -> Value {
        let mut cur = v;
        while let Value::Ptr(r) = cur {
            if let Some(found) = self.get_own_property(r, key) {
                return found;
            }
            cur = self.heap.cell(r).proto;
        }
        Value::Undefined
    }

    /// Named write obeying writability, including readonly shadowing along
    /// the prototype chain.
    pub fn set_property(
        &mut self,
        r: HeapRef,
        key: StringId,
        value: Value,
    ) -> Result<(), Thrown> {
        let shape = self.heap.cell(r).shape;
        if let Some(slot) = self.shapes.find_property(shape, key) {
            if !self
                .shapes
                .flags_at(shape, slot)
                .contains(PropertyFlags::WRITABLE)
            {
                return Err(self.type_error(messages::NOT_WRITABLE));
            }
            self.heap.cell_mut(r).slots[slot as usize] = value;
            return Ok(());
        }
        let mut proto = self.heap.cell(r).proto;
        while let Value::Ptr(p) = proto {
            let pshape = self.heap.cell(p).shape;
            if self.shapes.has_readonly_property(pshape)
                && let Some(slot) = self.shapes.find_property(pshape, key)
                && !self
                    .shapes
                    .flags_at(pshape, slot)
                    .contains(PropertyFlags::WRITABLE)
            {
                return Err(self.type_error(messages::NOT_WRITABLE));
            }
            proto = self.heap.cell(p).proto;
        }
        self.define_own_property(r, key, PropertyFlags::data_default(), value);
        Ok(())
    }

    // ========================================================================
    // Generic member access
    // ========================================================================

    /// `obj[prop]` with the fast paths: dense array reads and string
    /// character reads through the ascii table.
    pub fn get_object_operation(
        &mut self,
        will_be_object: Value,
        property: Value,
    ) -> Result<Value, Thrown> {
        match will_be_object {
            Value::Ptr(r) if r.kind == CellKind::Array => {
                if let Some(arr) = self.heap.cell(r).array()
                    && arr.is_fastmode()
                    && let Some(idx) = self.to_index(property)
                    && idx < arr.length()
                {
                    let v = arr.get(idx);
                    if !v.is_empty() {
                        return Ok(v);
                    }
                }
                Ok(self.generic_get(r, property))
            }
            Value::Ptr(r) => Ok(self.generic_get(r, property)),
            Value::Str(s) => {
                if let Some(idx) = self.to_index(property) {
                    if idx < self.string_length(s) {
                        return Ok(Value::Str(self.char_at(s, idx)));
                    }
                    return Ok(Value::Undefined);
                }
                let key = self.to_string_id(property);
                if key == self.atoms.length {
                    return Ok(Self::length_value(self.string_length(s)));
                }
                Ok(Value::Undefined)
            }
            Value::Undefined | Value::Empty => {
                Err(self.type_error(messages::GET_FROM_UNDEFINED))
            }
            Value::Null => Err(self.type_error(messages::GET_FROM_NULL)),
            _ => Ok(Value::Undefined),
        }
    }

    fn char_at(&mut self, s: StringId, idx: u32) -> StringId {
        let unit = self
            .strings
            .resolve(s)
            .encode_utf16()
            .nth(idx as usize)
            .unwrap_or(0);
        if (unit as usize) < ASCII_TABLE_SIZE {
            self.atoms.ascii[unit as usize]
        } else {
            let ch = char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
            let mut buf = [0u8; 4];
            self.strings.intern(ch.encode_utf8(&mut buf))
        }
    }

    fn generic_get(&mut self, r: HeapRef, property: Value) -> Value {
        if r.kind == CellKind::Array
            && let Some(idx) = self.to_index(property)
        {
            if let Some(arr) = self.heap.cell(r).array() {
                let v = arr.get(idx);
                if !v.is_empty() {
                    return v;
                }
            }
        }
        let key = self.to_string_id(property);
        if r.kind == CellKind::Array && key == self.atoms.length {
            let length = self.heap.cell(r).array().map(|a| a.length()).unwrap_or(0);
            return Self::length_value(length);
        }
        self.get_property(Value::Ptr(r), key)
    }

    /// `obj[prop] = v` with the dense-array fast path.
    pub fn set_object_operation(
        &mut self,
        will_be_object: Value,
        property: Value,
        value: Value,
    ) -> Result<(), Thrown> {
        match will_be_object {
            Value::Ptr(r) if r.kind == CellKind::Array => {
                if let Some(idx) = self.to_index(property) {
                    if let Some(arr) = self.heap.cell_mut(r).array_mut() {
                        arr.set(idx, value);
                    }
                    return Ok(());
                }
                let key = self.to_string_id(property);
                if key == self.atoms.length {
                    let n = self.to_number(value);
                    let len = n as u32;
                    if len as f64 != n {
                        return Err(self.range_error(messages::INVALID_ARRAY_LENGTH));
                    }
                    if let Some(arr) = self.heap.cell_mut(r).array_mut() {
                        arr.set_length(len);
                    }
                    return Ok(());
                }
                self.set_property(r, key, value)
            }
            Value::Ptr(r) => {
                let key = self.to_string_id(property);
                self.set_property(r, key, value)
            }
            Value::Undefined | Value::Empty => {
                Err(self.type_error(messages::SET_TO_UNDEFINED))
            }
            Value::Null => Err(self.type_error(messages::SET_TO_NULL)),
            // Primitive receivers silently drop the write in sloppy mode.
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Precomputed-name member access (inline cached)
    // ========================================================================

    /// `obj.key` through the per-site shape-chain cache.
    pub fn get_object_precomputed(
        &mut self,
        will_be_object: Value,
        key: StringId,
        cache: &mut PropertyCache,
    ) -> Result<Value, Thrown> {
        match will_be_object {
            Value::Ptr(r) => {
                if r.kind == CellKind::Array && key == self.atoms.length {
                    let length = self.heap.cell(r).array().map(|a| a.length()).unwrap_or(0);
                    return Ok(Self::length_value(length));
                }

                let c_siz = cache.chain.len();
                if c_siz > 0 {
                    let mut obj = r;
                    let mut miss = false;
                    for i in 0..c_siz - 1 {
                        if cache.chain[i] != self.heap.cell(obj).shape {
                            miss = true;
                            break;
                        }
                        let proto = self.heap.cell(obj).proto;
                        if let Value::Ptr(p) = proto {
                            obj = p;
                        } else {
                            miss = true;
                            break;
                        }
                    }
                    if !miss && cache.chain[c_siz - 1] == self.heap.cell(obj).shape {
                        return Ok(match cache.slot {
                            Some(slot) => self.heap.cell(obj).slots[slot as usize],
                            None => Value::Undefined,
                        });
                    }
                }

                // Cache miss: rebuild the chain from the receiver.
                cache.clear();
                let mut obj = r;
                loop {
                    let shape = self.heap.cell(obj).shape;
                    cache.chain.push(shape);
                    if let Some(slot) = self.shapes.find_property(shape, key) {
                        cache.slot = Some(slot);
                        break;
                    }
                    match self.heap.cell(obj).proto {
                        Value::Ptr(p) => obj = p,
                        _ => break,
                    }
                }
                Ok(match cache.slot {
                    Some(slot) => self.heap.cell(obj).slots[slot as usize],
                    None => Value::Undefined,
                })
            }
            Value::Str(s) => {
                if key == self.atoms.length {
                    return Ok(Self::length_value(self.string_length(s)));
                }
                Ok(Value::Undefined)
            }
            Value::Undefined | Value::Empty => {
                Err(self.type_error(messages::GET_FROM_UNDEFINED))
            }
            Value::Null => Err(self.type_error(messages::GET_FROM_NULL)),
            _ => Ok(Value::Undefined),
        }
    }

    /// `obj.key = v` through the per-site transition cache.
    pub fn set_object_precomputed(
        &mut self,
        will_be_object: Value,
        key: StringId,
        value: Value,
        cache: &mut PropertyCache,
    ) -> Result<(), Thrown> {
        match will_be_object {
            Value::Ptr(r) => {
                let shape = self.heap.cell(r).shape;

                // Own-property hit: write in place.
                if let Some(slot) = cache.slot
                    && cache.chain.first() == Some(&shape)
                {
                    if !self
                        .shapes
                        .flags_at(shape, slot)
                        .contains(PropertyFlags::WRITABLE)
                    {
                        return Err(self.type_error(messages::NOT_WRITABLE));
                    }
                    self.heap.cell_mut(r).slots[slot as usize] = value;
                    return Ok(());
                }

                // Transition hit: append the slot and swap the shape.
                if let Some(next_shape) = cache.transition {
                    let c_siz = cache.chain.len();
                    let mut obj = r;
                    let mut miss = false;
                    for i in 0..c_siz.saturating_sub(1) {
                        if cache.chain[i] != self.heap.cell(obj).shape {
                            miss = true;
                            break;
                        }
                        match self.heap.cell(obj).proto {
                            Value::Ptr(p) => obj = p,
                            _ => {
                                miss = true;
                                break;
                            }
                        }
                    }
                    if !miss
                        && c_siz > 0
                        && cache.chain[c_siz - 1] == self.heap.cell(obj).shape
                    {
                        let cell = self.heap.cell_mut(r);
                        cell.slots.push(value);
                        cell.shape = next_shape;
                        return Ok(());
                    }
                }

                // Slow path: rebuild.
                cache.clear();
                if let Some(slot) = self.shapes.find_property(shape, key) {
                    cache.chain.push(shape);
                    cache.slot = Some(slot);
                    if !self
                        .shapes
                        .flags_at(shape, slot)
                        .contains(PropertyFlags::WRITABLE)
                    {
                        return Err(self.type_error(messages::NOT_WRITABLE));
                    }
                    self.heap.cell_mut(r).slots[slot as usize] = value;
                    return Ok(());
                }

                cache.chain.push(shape);
                let mut proto = self.heap.cell(r).proto;
                while let Value::Ptr(p) = proto {
                    let pshape = self.heap.cell(p).shape;
                    cache.chain.push(pshape);
                    if self.shapes.has_readonly_property(pshape)
                        && let Some(slot) = self.shapes.find_property(pshape, key)
                        && !self
                            .shapes
                            .flags_at(pshape, slot)
                            .contains(PropertyFlags::WRITABLE)
                    {
                        cache.clear();
                        return Err(self.type_error(messages::NOT_WRITABLE));
                    }
                    proto = self.heap.cell(p).proto;
                }

                let before = self.heap.cell(r).shape;
                self.define_own_property(r, key, PropertyFlags::data_default(), value);
                if self.heap.cell(r).shape != before {
                    cache.transition = Some(self.heap.cell(r).shape);
                }
                Ok(())
            }
            Value::Undefined | Value::Empty => {
                Err(self.type_error(messages::SET_TO_UNDEFINED))
            }
            Value::Null => Err(self.type_error(messages::SET_TO_NULL)),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    /// ECMA-262 §11.5.3. The integer fast path requires a positive int32
    /// dividend and a non-zero int32 divisor; everything else takes the
    /// double path so negative-zero signs survive.
    pub fn mod_operation(&mut self, left: Value, right: Value) -> Value {
        if let (Value::Int32(l), Value::Int32(r)) = (left, right)
            && l > 0
            && r != 0
        {
            return Value::Int32(l % r);
        }
        let lvalue = self.to_number(left);
        let rvalue = self.to_number(right);
        if lvalue.is_nan() || rvalue.is_nan() {
            Value::Double(f64::NAN)
        } else if lvalue.is_infinite() || rvalue == 0.0 {
            Value::Double(f64::NAN)
        } else if rvalue.is_infinite() {
            Value::from_f64(lvalue)
        } else if lvalue == 0.0 {
            if lvalue.is_sign_negative() {
                Value::Double(-0.0)
            } else {
                Value::Int32(0)
            }
        } else {
            let neg = lvalue < 0.0;
            let a = lvalue.abs();
            let b = rvalue.abs();
            let d = (a / b).trunc();
            let mut rem = a - d * b;
            if neg {
                rem = -rem;
            }
            Value::from_f64(rem)
        }
    }

    pub fn typeof_operation(&self, v: Value) -> StringId {
        match v {
            Value::Empty | Value::Undefined => self.atoms.undefined,
            Value::Null => self.atoms.object,
            Value::Boolean(_) => self.atoms.boolean,
            Value::Int32(_) | Value::Double(_) => self.atoms.number,
            Value::Str(_) => self.atoms.string,
            Value::Ptr(r) if r.kind == CellKind::Function => self.atoms.function,
            Value::Ptr(_) => self.atoms.object,
        }
    }

    /// `l instanceof r`: walk `l.__proto__` looking for `r.prototype`.
    pub fn instance_of_operation(
        &mut self,
        lval: Value,
        rval: Value,
    ) -> Result<bool, Thrown> {
        if !rval.is_function_object() {
            return Err(self.type_error(messages::INSTANCEOF_NOT_FUNCTION));
        }
        let target_proto = self.get_property(rval, self.atoms.prototype);
        if !target_proto.is_object() {
            return Err(self.type_error(messages::INSTANCEOF_INVALID_PROTOTYPE));
        }
        if !lval.is_object() {
            return Ok(false);
        }
        let mut o = self.heap.cell(lval.as_ptr()).proto;
        while let Value::Ptr(p) = o {
            if o.strict_equals(target_proto) {
                return Ok(true);
            }
            o = self.heap.cell(p).proto;
        }
        Ok(false)
    }

    /// `key in obj`: own-property test up the prototype chain.
    pub fn in_operation(&mut self, key: Value, obj: Value) -> Result<bool, Thrown> {
        if !obj.is_object() {
            return Err(self.type_error(messages::IN_NOT_OBJECT));
        }
        let key_id = self.to_string_id(key);
        let index = self.to_index(key);
        let mut cur = obj;
        while let Value::Ptr(r) = cur {
            if self.get_own_property(r, key_id).is_some() {
                return Ok(true);
            }
            if r.kind == CellKind::Array
                && let Some(idx) = index
                && let Some(arr) = self.heap.cell(r).array()
                && !arr.get(idx).is_empty()
            {
                return Ok(true);
            }
            cur = self.heap.cell(r).proto;
        }
        Ok(false)
    }

    // ========================================================================
    // For-in enumeration
    // ========================================================================

    /// Snapshot the enumerable keys of a value into a fresh enumeration
    /// object. Array indices come first (as strings), then named properties
    /// in shape order.
    pub fn enumerate_object(&mut self, v: Value) -> HeapRef {
        let mut keys: Vec<StringId> = Vec::new();
        if let Value::Ptr(r) = v {
            if r.kind == CellKind::Array {
                let length = self.heap.cell(r).array().map(|a| a.length()).unwrap_or(0);
                for i in 0..length {
                    let present = self
                        .heap
                        .cell(r)
                        .array()
                        .map(|a| !a.get(i).is_empty())
                        .unwrap_or(false);
                    if present {
                        let s = i.to_string();
                        keys.push(self.strings.intern(&s));
                    }
                }
            }
            let shape = self.heap.cell(r).shape;
            for entry in self.shapes.entries(shape) {
                if entry.flags.contains(PropertyFlags::ENUMERABLE) {
                    keys.push(entry.key);
                }
            }
        }
        self.heap.allocate(ScriptObject::new_enumeration(keys))
    }
}

/// ECMAScript ToNumber on string data.
fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return match u64::from_str_radix(hex, 16) {
            Ok(n) => n as f64,
            Err(_) => f64::NAN,
        };
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Reject the spellings Rust accepts but ECMAScript does not.
    if !t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-' | b'e' | b'E'))
    {
        return f64::NAN;
    }
    t.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ArrayStorage;

    fn runtime() -> Runtime {
        Runtime::new()
    }

    #[test]
    fn typeof_covers_every_tag_class() {
        let mut rt = runtime();
        let obj = rt.create_ordinary_object(Value::Null);
        let arr = rt.create_array(ArrayStorage::with_length(0), Value::Null);
        let f = rt.heap.allocate(ScriptObject::new_function(
            ShapeArena::root(),
            Value::Null,
            crate::object::FunctionData {
                kind: crate::object::FunctionKind::Script { block: 0 },
                name: None,
            },
        ));

        let resolve = |rt: &Runtime, v: Value| {
            let id = rt.typeof_operation(v);
            rt.strings.resolve(id).to_string()
        };
        assert_eq!(resolve(&rt, Value::Undefined), "undefined");
        assert_eq!(resolve(&rt, Value::Empty), "undefined");
        assert_eq!(resolve(&rt, Value::Null), "object");
        assert_eq!(resolve(&rt, Value::Boolean(true)), "boolean");
        assert_eq!(resolve(&rt, Value::Int32(1)), "number");
        assert_eq!(resolve(&rt, Value::Double(0.5)), "number");
        let s = rt.strings.intern("x");
        assert_eq!(resolve(&rt, Value::Str(s)), "string");
        assert_eq!(resolve(&rt, Value::Ptr(obj)), "object");
        assert_eq!(resolve(&rt, Value::Ptr(arr)), "object");
        assert_eq!(resolve(&rt, Value::Ptr(f)), "function");
    }

    #[test]
    fn mod_operation_edge_cases() {
        let mut rt = runtime();
        // -0 % 1 keeps the sign bit.
        let r = rt.mod_operation(Value::Double(-0.0), Value::Int32(1));
        assert!(matches!(r, Value::Double(d) if d == 0.0 && d.is_sign_negative()));
        // 1 % 0 and Infinity % 1 are NaN.
        assert!(matches!(
            rt.mod_operation(Value::Int32(1), Value::Int32(0)),
            Value::Double(d) if d.is_nan()
        ));
        assert!(matches!(
            rt.mod_operation(Value::Double(f64::INFINITY), Value::Int32(1)),
            Value::Double(d) if d.is_nan()
        ));
        // 1 % Infinity is the dividend.
        assert_eq!(
            rt.mod_operation(Value::Int32(1), Value::Double(f64::INFINITY)),
            Value::Int32(1)
        );
        // Plain positive case takes the integer path.
        assert_eq!(
            rt.mod_operation(Value::Int32(7), Value::Int32(3)),
            Value::Int32(1)
        );
        // Negative dividends go through the double path but stay exact.
        assert_eq!(
            rt.mod_operation(Value::Int32(-7), Value::Int32(3)),
            Value::Int32(-1)
        );
    }

    #[test]
    fn string_to_number_forms() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  42  "), 42.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("12abc").is_nan());
        assert!(string_to_number("inf").is_nan());
    }

    #[test]
    fn precomputed_read_records_then_hits() {
        let mut rt = runtime();
        let b = rt.strings.intern("b");
        let obj = rt.create_ordinary_object(Value::Null);
        rt.define_own_property(obj, b, PropertyFlags::data_default(), Value::Int32(2));

        let mut cache = PropertyCache::default();
        assert!(cache.is_cold());
        let v = rt
            .get_object_precomputed(Value::Ptr(obj), b, &mut cache)
            .unwrap();
        assert_eq!(v, Value::Int32(2));
        assert_eq!(cache.chain.len(), 1);
        assert_eq!(cache.slot, Some(0));

        // Second read hits without changing the cache.
        let chain = cache.chain.clone();
        let v = rt
            .get_object_precomputed(Value::Ptr(obj), b, &mut cache)
            .unwrap();
        assert_eq!(v, Value::Int32(2));
        assert_eq!(cache.chain, chain);
    }

    #[test]
    fn precomputed_read_caches_absence() {
        let mut rt = runtime();
        let missing = rt.strings.intern("missing");
        let obj = rt.create_ordinary_object(Value::Null);

        let mut cache = PropertyCache::default();
        let v = rt
            .get_object_precomputed(Value::Ptr(obj), missing, &mut cache)
            .unwrap();
        assert_eq!(v, Value::Undefined);
        assert_eq!(cache.slot, None);
        assert!(!cache.is_cold());

        let v = rt
            .get_object_precomputed(Value::Ptr(obj), missing, &mut cache)
            .unwrap();
        assert_eq!(v, Value::Undefined);
    }

    #[test]
    fn precomputed_write_records_transition() {
        let mut rt = runtime();
        let x = rt.strings.intern("x");
        let first = rt.create_ordinary_object(Value::Null);
        let mut cache = PropertyCache::default();

        rt.set_object_precomputed(Value::Ptr(first), x, Value::Int32(1), &mut cache)
            .unwrap();
        let transitioned = rt.heap.cell(first).shape;
        assert_eq!(cache.transition, Some(transitioned));

        // A second object with the starting shape takes the cached
        // transition: append slot, swap shape.
        let second = rt.create_ordinary_object(Value::Null);
        rt.set_object_precomputed(Value::Ptr(second), x, Value::Int32(2), &mut cache)
            .unwrap();
        assert_eq!(rt.heap.cell(second).shape, transitioned);
        assert_eq!(rt.get_own_property(second, x), Some(Value::Int32(2)));
    }

    #[test]
    fn readonly_shadow_throws_type_error() {
        let mut rt = runtime();
        let x = rt.strings.intern("x");
        let proto = rt.create_ordinary_object(Value::Null);
        rt.define_own_property(
            proto,
            x,
            PropertyFlags::ENUMERABLE | PropertyFlags::CONFIGURABLE,
            Value::Int32(1),
        );
        let obj = rt.create_ordinary_object(Value::Ptr(proto));

        let mut cache = PropertyCache::default();
        let err = rt
            .set_object_precomputed(Value::Ptr(obj), x, Value::Int32(2), &mut cache)
            .unwrap_err();
        let Thrown(Value::Ptr(e)) = err else {
            panic!("expected thrown error object");
        };
        assert_eq!(rt.heap.cell(e).error_kind(), Some(ErrorKind::TypeError));
    }

    #[test]
    fn instanceof_requires_callable_rhs() {
        let mut rt = runtime();
        let err = rt
            .instance_of_operation(Value::Int32(1), Value::Int32(3))
            .unwrap_err();
        let Thrown(Value::Ptr(e)) = err else {
            panic!("expected thrown error object");
        };
        assert_eq!(rt.heap.cell(e).error_kind(), Some(ErrorKind::TypeError));
    }

    #[test]
    fn string_char_read_uses_ascii_table() {
        let mut rt = runtime();
        let hello = rt.strings.intern("hello");
        let v = rt
            .get_object_operation(Value::Str(hello), Value::Int32(1))
            .unwrap();
        assert_eq!(v, Value::Str(rt.atoms.ascii[b'e' as usize]));
    }

    #[test]
    fn null_and_undefined_reads_throw() {
        let mut rt = runtime();
        let foo = rt.strings.intern("foo");
        assert!(rt
            .get_object_precomputed(Value::Null, foo, &mut PropertyCache::default())
            .is_err());
        assert!(rt
            .get_object_precomputed(Value::Undefined, foo, &mut PropertyCache::default())
            .is_err());
    }

    #[test]
    fn enumeration_snapshots_keys_in_insertion_order() {
        let mut rt = runtime();
        let x = rt.strings.intern("x");
        let y = rt.strings.intern("y");
        let obj = rt.create_ordinary_object(Value::Null);
        rt.define_own_property(obj, x, PropertyFlags::data_default(), Value::Int32(1));
        rt.define_own_property(obj, y, PropertyFlags::data_default(), Value::Int32(2));

        let e = rt.enumerate_object(Value::Ptr(obj));
        let crate::object::ObjectKind::Enumeration(data) = &rt.heap.cell(e).kind else {
            panic!("expected enumeration cell");
        };
        assert_eq!(data.keys, vec![x, y]);
    }
}
