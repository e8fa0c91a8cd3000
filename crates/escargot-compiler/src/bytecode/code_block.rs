//! Compiled function units.
//!
//! A [`CodeBlock`] is immutable after emission except for its runtime
//! feedback: the inline-cache slots and type-profile slots, which live
//! behind `RefCell` (execution is single-threaded), and the execution
//! counter driving JIT tier-up.

use std::cell::{Cell, RefCell};

use escargot_core::ic::PropertyCache;
use escargot_core::string_table::{StringId, StringTable};
use escargot_core::types::TypeProfile;
use escargot_core::value::Value;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use super::opcode::{JUMP_SENTINEL, Opcode};

/// SSA indices attached to one emitted instruction: the value it defines and
/// up to two source operands. `-1` means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsaTriple {
    pub target: i32,
    pub src1: i32,
    pub src2: i32,
}

impl SsaTriple {
    pub const NONE: SsaTriple = SsaTriple {
        target: -1,
        src1: -1,
        src2: -1,
    };
}

#[derive(Debug)]
pub struct CodeBlock {
    /// The instruction stream.
    pub code: Vec<u8>,
    /// Deduplicated constants referenced by `Push` and the precomputed-case
    /// member opcodes.
    pub constants: Vec<Value>,
    /// Parameter names, in declaration order. Slots `0..params.len()` of a
    /// frame hold the arguments.
    pub params: Vec<StringId>,
    /// Total frame slots: parameters followed by hoisted locals.
    pub local_count: u16,
    /// One triple per emitted instruction, indexed by instruction counter.
    pub ssa_index_table: Vec<SsaTriple>,
    /// Number of SSA values the block defines; sizes the JIT's operand-type
    /// table.
    pub ssa_value_count: u32,
    /// Flat call-site records: callee, receiver, argc, then argc argument
    /// indices (all SSA indices, receiver `-1` for construct calls).
    pub function_call_infos: Vec<i32>,
    /// Inline-cache slots, addressed by operand.
    pub caches: RefCell<Vec<PropertyCache>>,
    /// Type-profile slots, addressed by operand.
    pub profiles: RefCell<Vec<TypeProfile>>,
    /// Offset added to `CreateFunction` operands when the owning program was
    /// loaded into a VM's code-block table.
    pub block_offset: Cell<u32>,
    /// Completed interpreter executions, for JIT tier-up.
    pub execute_count: Cell<u32>,
    /// Whether this is top-level program code (names resolve against the
    /// global object) rather than a function body.
    pub is_global: bool,
    pub name: Option<StringId>,
}

impl CodeBlock {
    pub fn read_op(&self, offset: usize) -> Option<Opcode> {
        self.code
            .get(offset)
            .and_then(|&b| Opcode::try_from(b).ok())
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        ((self.code[offset] as u16) << 8) | self.code[offset + 1] as u16
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        ((self.code[offset] as u32) << 24)
            | ((self.code[offset + 1] as u32) << 16)
            | ((self.code[offset + 2] as u32) << 8)
            | self.code[offset + 3] as u32
    }

    /// Decode the opcode sequence, skipping operands. Test helper, as is the
    /// assertion below.
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let mut offset = 0;
        while offset < self.code.len() {
            match self.read_op(offset) {
                Some(op) => {
                    ops.push(op);
                    offset += 1 + op.operand_size();
                }
                None => break,
            }
        }
        ops
    }

    /// Assert the given opcodes occur in order (not necessarily contiguous).
    #[track_caller]
    pub fn assert_contains_opcodes(&self, expected: &[Opcode]) {
        let actual = self.opcodes();
        let mut want = expected.iter().peekable();
        for op in &actual {
            if want.peek() == Some(&op) {
                want.next();
            }
        }
        if let Some(missing) = want.next() {
            panic!(
                "missing opcode {} in sequence; bytecode is {:?}",
                missing.name(),
                actual.iter().map(|o| o.name()).collect::<Vec<_>>()
            );
        }
    }

    /// Scan every jump in the buffer; returns the offsets of jumps still
    /// holding the sentinel or pointing outside the code.
    pub fn unresolved_jumps(&self) -> Vec<usize> {
        let mut bad = Vec::new();
        let mut offset = 0;
        while offset < self.code.len() {
            let Some(op) = self.read_op(offset) else { break };
            if op.is_jump() {
                let target = self.read_u32(offset + 1);
                if target == JUMP_SENTINEL || target as usize >= self.code.len() {
                    bad.push(offset);
                }
            }
            offset += 1 + op.operand_size();
        }
        bad
    }

    /// Render the instruction stream for inspection.
    pub fn dump(&self, strings: &StringTable) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let mut offset = 0;
        while offset < self.code.len() {
            let Some(op) = self.read_op(offset) else { break };
            let _ = write!(out, "{offset:5}  {}", op.name());
            match op {
                Opcode::Push => {
                    let idx = self.read_u16(offset + 1);
                    let _ = write!(out, " {:?}", self.constants[idx as usize]);
                }
                Opcode::GetById | Opcode::PutById | Opcode::CreateBinding => {
                    let name = StringId(self.read_u32(offset + 1));
                    let _ = write!(out, " {}", strings.resolve(name));
                }
                op if op.is_jump() => {
                    let _ = write!(out, " -> {}", self.read_u32(offset + 1));
                }
                _ => {}
            }
            out.push('\n');
            offset += 1 + op.operand_size();
        }
        out
    }
}

/// Hashable identity of a pool constant. Doubles key on their ordered bit
/// representation so `0.0`/`-0.0`/NaN behave deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantKey {
    Empty,
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Double(OrderedFloat<f64>),
    Str(StringId),
}

impl ConstantKey {
    pub fn of(v: Value) -> Option<ConstantKey> {
        match v {
            Value::Empty => Some(ConstantKey::Empty),
            Value::Undefined => Some(ConstantKey::Undefined),
            Value::Null => Some(ConstantKey::Null),
            Value::Boolean(b) => Some(ConstantKey::Boolean(b)),
            Value::Int32(i) => Some(ConstantKey::Int32(i)),
            Value::Double(d) => Some(ConstantKey::Double(OrderedFloat(d))),
            Value::Str(s) => Some(ConstantKey::Str(s)),
            // Heap references never appear in a constant pool.
            Value::Ptr(_) => None,
        }
    }
}

/// Constant pool under construction, with deduplication.
#[derive(Debug, Default)]
pub struct ConstantPool {
    values: Vec<Value>,
    index: FxHashMap<ConstantKey, u16>,
}

impl ConstantPool {
    pub fn add(&mut self, v: Value) -> Option<u16> {
        let key = ConstantKey::of(v)?;
        if let Some(&idx) = self.index.get(&key) {
            return Some(idx);
        }
        let idx = u16::try_from(self.values.len()).ok()?;
        self.values.push(v);
        self.index.insert(key, idx);
        Some(idx)
    }

    pub fn get(&self, idx: u16) -> Value {
        self.values[idx as usize]
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_pool_dedups() {
        let mut pool = ConstantPool::default();
        let a = pool.add(Value::Int32(7)).unwrap();
        let b = pool.add(Value::Int32(8)).unwrap();
        let c = pool.add(Value::Int32(7)).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn doubles_dedup_by_bits() {
        let mut pool = ConstantPool::default();
        let a = pool.add(Value::Double(0.0)).unwrap();
        let b = pool.add(Value::Double(-0.0)).unwrap();
        let c = pool.add(Value::Double(0.0)).unwrap();
        assert_ne!(a, b, "-0.0 must stay distinct from 0.0");
        assert_eq!(a, c);
    }

    #[test]
    fn nan_constants_dedup() {
        let mut pool = ConstantPool::default();
        let a = pool.add(Value::Double(f64::NAN)).unwrap();
        let b = pool.add(Value::Double(f64::NAN)).unwrap();
        assert_eq!(a, b);
    }
}
