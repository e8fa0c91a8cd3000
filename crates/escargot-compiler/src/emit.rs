//! Bytecode emission.
//!
//! [`ByteCodeEmitter`] owns the byte buffer for one function and everything
//! that must stay aligned with it: the constant pool, the SSA-index table
//! (one triple per instruction, targets allocated in strict program order),
//! the inline-cache and type-profile slot counts, and the call-site table.
//!
//! The emitter mirrors the operand stack with a shadow stack of SSA indices
//! so every instruction's triple records exactly which definitions it
//! consumes, including through `DuplicateTopOfStackValue` and the temp-stack
//! pair. Forward jumps are written with [`JUMP_SENTINEL`] and patched via
//! [`JumpEntry`] handles that remember the opcode they expect to find.

use escargot_core::value::Value;

use crate::bytecode::code_block::{CodeBlock, ConstantPool, SsaTriple};
use crate::bytecode::opcode::{JUMP_SENTINEL, Opcode};
use crate::error::CompileError;
use escargot_core::string_table::StringId;

/// Number of buffer bytes reserved per unit of the rough size estimate.
pub const ROUGH_WORD_BYTES: usize = 8;

/// A pending jump: where its opcode byte lives and which opcode it must be.
/// Patching asserts the buffer still agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpEntry {
    pub position: usize,
    pub opcode: Opcode,
}

pub struct ByteCodeEmitter {
    code: Vec<u8>,
    constants: ConstantPool,
    ssa: Vec<SsaTriple>,
    shadow: Vec<i32>,
    shadow_temp: Vec<i32>,
    next_ssa: i32,
    profile_count: u16,
    cache_count: u16,
    call_infos: Vec<i32>,
}

impl ByteCodeEmitter {
    /// Reserve the buffer up front from the rough-size pre-pass so emission
    /// never reallocates under a recorded code position.
    pub fn with_rough_size(words: usize) -> Self {
        Self {
            code: Vec::with_capacity(words * ROUGH_WORD_BYTES),
            constants: ConstantPool::default(),
            ssa: Vec::new(),
            shadow: Vec::new(),
            shadow_temp: Vec::new(),
            next_ssa: 0,
            profile_count: 0,
            cache_count: 0,
            call_infos: Vec::new(),
        }
    }

    pub fn current_code_size(&self) -> usize {
        self.code.len()
    }

    /// Current operand-stack depth as tracked by the shadow stack.
    pub fn stack_depth(&self) -> usize {
        self.shadow.len()
    }

    // ========================================================================
    // Raw writers
    // ========================================================================

    fn write_op(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    fn write_u16(&mut self, v: u16) {
        self.code.push((v >> 8) as u8);
        self.code.push(v as u8);
    }

    fn write_u32(&mut self, v: u32) {
        self.code.push((v >> 24) as u8);
        self.code.push((v >> 16) as u8);
        self.code.push((v >> 8) as u8);
        self.code.push(v as u8);
    }

    fn triple(&mut self, target: i32, src1: i32, src2: i32) {
        self.ssa.push(SsaTriple { target, src1, src2 });
    }

    fn alloc_ssa(&mut self) -> i32 {
        let idx = self.next_ssa;
        self.next_ssa += 1;
        idx
    }

    fn pop_shadow(&mut self) -> i32 {
        self.shadow.pop().unwrap_or(-1)
    }

    fn peek_shadow(&self, depth: usize) -> i32 {
        if self.shadow.len() > depth {
            self.shadow[self.shadow.len() - 1 - depth]
        } else {
            -1
        }
    }

    fn alloc_profile(&mut self) -> Result<u16, CompileError> {
        let slot = self.profile_count;
        self.profile_count = self
            .profile_count
            .checked_add(1)
            .ok_or(CompileError::TooManyProfileSlots)?;
        Ok(slot)
    }

    fn alloc_cache(&mut self) -> Result<u16, CompileError> {
        let slot = self.cache_count;
        self.cache_count = self
            .cache_count
            .checked_add(1)
            .ok_or(CompileError::TooManyCacheSlots)?;
        Ok(slot)
    }

    fn add_constant(&mut self, v: Value) -> Result<u16, CompileError> {
        self.constants.add(v).ok_or(CompileError::TooManyConstants)
    }

    /// Drop the shadow entry for a branch arm whose value merges with the
    /// arm emitted next (conditional expressions).
    pub fn discard_branch_value(&mut self) {
        self.pop_shadow();
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    pub fn emit_push(&mut self, v: Value) -> Result<(), CompileError> {
        let idx = self.add_constant(v)?;
        self.write_op(Opcode::Push);
        self.write_u16(idx);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
        Ok(())
    }

    pub fn emit_pop(&mut self) {
        self.write_op(Opcode::Pop);
        let s = self.pop_shadow();
        self.triple(-1, s, -1);
    }

    pub fn emit_pop_expression_statement(&mut self) {
        self.write_op(Opcode::PopExpressionStatement);
        let s = self.pop_shadow();
        self.triple(-1, s, -1);
    }

    pub fn emit_duplicate_top(&mut self) {
        self.write_op(Opcode::DuplicateTopOfStackValue);
        let s = self.peek_shadow(0);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    /// Park the top of stack; returns the instruction's byte offset, the
    /// anchor a later `PopFromTempStack` names.
    pub fn emit_push_into_temp_stack(&mut self) -> usize {
        let position = self.code.len();
        self.write_op(Opcode::PushIntoTempStack);
        let s = self.pop_shadow();
        self.shadow_temp.push(s);
        self.triple(-1, s, -1);
        position
    }

    /// Unpark a value. The SSA identity of the parked definition travels
    /// with it; no new value is defined.
    pub fn emit_pop_from_temp_stack(&mut self, anchor: usize) {
        self.write_op(Opcode::PopFromTempStack);
        self.write_u32(anchor as u32);
        let s = self.shadow_temp.pop().unwrap_or(-1);
        self.shadow.push(s);
        self.triple(-1, s, -1);
    }

    pub fn emit_load_stack_pointer(&mut self, depth: u16) {
        self.write_op(Opcode::LoadStackPointer);
        self.write_u16(depth);
        self.shadow.truncate(depth as usize);
        self.triple(-1, -1, -1);
    }

    // ========================================================================
    // Variables
    // ========================================================================

    pub fn emit_get_by_id(&mut self, name: StringId) -> Result<(), CompileError> {
        let profile = self.alloc_profile()?;
        self.write_op(Opcode::GetById);
        self.write_u32(name.0);
        self.write_u16(profile);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
        Ok(())
    }

    pub fn emit_put_by_id(&mut self, name: StringId) {
        self.write_op(Opcode::PutById);
        self.write_u32(name.0);
        let s = self.pop_shadow();
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    pub fn emit_create_binding(&mut self, name: StringId) {
        self.write_op(Opcode::CreateBinding);
        self.write_u32(name.0);
        self.triple(-1, -1, -1);
    }

    pub fn emit_get_by_index(&mut self, slot: u16) -> Result<(), CompileError> {
        let profile = self.alloc_profile()?;
        self.write_op(Opcode::GetByIndex);
        self.write_u16(slot);
        self.write_u16(profile);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
        Ok(())
    }

    pub fn emit_put_by_index(&mut self, slot: u16) {
        self.write_op(Opcode::PutByIndex);
        self.write_u16(slot);
        let s = self.pop_shadow();
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    // ========================================================================
    // Member access
    // ========================================================================

    pub fn emit_get_object(&mut self, peeking: bool) -> Result<(), CompileError> {
        let profile = self.alloc_profile()?;
        let object_profile = self.alloc_profile()?;
        self.write_op(if peeking {
            Opcode::GetObjectWithPeeking
        } else {
            Opcode::GetObject
        });
        self.write_u16(profile);
        self.write_u16(object_profile);
        let (s1, s2) = if peeking {
            (self.peek_shadow(1), self.peek_shadow(0))
        } else {
            let prop = self.pop_shadow();
            let obj = self.pop_shadow();
            (obj, prop)
        };
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s1, s2);
        Ok(())
    }

    pub fn emit_get_object_precomputed(
        &mut self,
        property: Value,
        peeking: bool,
    ) -> Result<(), CompileError> {
        let constant = self.add_constant(property)?;
        let cache = self.alloc_cache()?;
        let profile = self.alloc_profile()?;
        let object_profile = self.alloc_profile()?;
        self.write_op(if peeking {
            Opcode::GetObjectWithPeekingPreComputedCase
        } else {
            Opcode::GetObjectPreComputedCase
        });
        self.write_u16(constant);
        self.write_u16(cache);
        self.write_u16(profile);
        self.write_u16(object_profile);
        let s1 = if peeking {
            self.peek_shadow(0)
        } else {
            self.pop_shadow()
        };
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s1, -1);
        Ok(())
    }

    pub fn emit_set_object(&mut self) -> Result<(), CompileError> {
        self.emit_member_write(Opcode::SetObject)
    }

    pub fn emit_put_in_object(&mut self) -> Result<(), CompileError> {
        self.emit_member_write(Opcode::PutInObject)
    }

    fn emit_member_write(&mut self, op: Opcode) -> Result<(), CompileError> {
        let object_profile = self.alloc_profile()?;
        self.write_op(op);
        self.write_u16(object_profile);
        let _value = self.pop_shadow();
        let prop = self.pop_shadow();
        let obj = self.pop_shadow();
        // The stored value's definition is target − 1 by construction; the
        // triple carries the object and property.
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, obj, prop);
        Ok(())
    }

    pub fn emit_put_in_object_precomputed(
        &mut self,
        property: Value,
    ) -> Result<(), CompileError> {
        let constant = self.add_constant(property)?;
        let cache = self.alloc_cache()?;
        let object_profile = self.alloc_profile()?;
        self.write_op(Opcode::PutInObjectPreComputedCase);
        self.write_u16(constant);
        self.write_u16(cache);
        self.write_u16(object_profile);
        let _value = self.pop_shadow();
        let obj = self.pop_shadow();
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, obj, -1);
        Ok(())
    }

    // ========================================================================
    // Operators
    // ========================================================================

    /// Any opcode of shape `[a, b] -> [r]` with no operands.
    pub fn emit_binary(&mut self, op: Opcode) {
        debug_assert_eq!(op.operand_size(), 0);
        self.write_op(op);
        let s2 = self.pop_shadow();
        let s1 = self.pop_shadow();
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s1, s2);
    }

    /// Any opcode of shape `[a] -> [r]` with no operands.
    pub fn emit_unary(&mut self, op: Opcode) {
        debug_assert_eq!(op.operand_size(), 0);
        self.write_op(op);
        let s = self.pop_shadow();
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    pub fn emit_jump(&mut self, target: Option<usize>) -> JumpEntry {
        self.emit_jump_op(Opcode::Jump, target, JumpStackEffect::None)
    }

    pub fn emit_jump_if_false(&mut self) -> JumpEntry {
        self.emit_jump_op(
            Opcode::JumpIfTopOfStackValueIsFalse,
            None,
            JumpStackEffect::PopCondition,
        )
    }

    pub fn emit_jump_if_true(&mut self) -> JumpEntry {
        self.emit_jump_op(
            Opcode::JumpIfTopOfStackValueIsTrue,
            None,
            JumpStackEffect::PopCondition,
        )
    }

    /// The taken path additionally pops one value; that extra pop merges
    /// with a fallthrough path that pops it by other means, so the shadow
    /// stack only models the condition pop.
    pub fn emit_jump_and_pop_if_true(&mut self) -> JumpEntry {
        self.emit_jump_op(
            Opcode::JumpAndPopIfTopOfStackValueIsTrue,
            None,
            JumpStackEffect::PopCondition,
        )
    }

    pub fn emit_jump_if_false_peeking(&mut self) -> JumpEntry {
        self.emit_jump_op(
            Opcode::JumpIfTopOfStackValueIsFalseWithPeeking,
            None,
            JumpStackEffect::Peek,
        )
    }

    pub fn emit_jump_if_true_peeking(&mut self) -> JumpEntry {
        self.emit_jump_op(
            Opcode::JumpIfTopOfStackValueIsTrueWithPeeking,
            None,
            JumpStackEffect::Peek,
        )
    }

    fn emit_jump_op(
        &mut self,
        op: Opcode,
        target: Option<usize>,
        effect: JumpStackEffect,
    ) -> JumpEntry {
        let position = self.code.len();
        self.write_op(op);
        self.write_u32(target.map(|t| t as u32).unwrap_or(JUMP_SENTINEL));
        let s = match effect {
            JumpStackEffect::None => -1,
            JumpStackEffect::PopCondition => self.pop_shadow(),
            JumpStackEffect::Peek => self.peek_shadow(0),
        };
        self.triple(-1, s, -1);
        JumpEntry {
            position,
            opcode: op,
        }
    }

    /// Resolve a pending jump to `target`. Panics if the buffer does not
    /// hold the recorded opcode at the recorded position; that would mean
    /// the patch list and the code stream disagree.
    pub fn patch_jump(&mut self, entry: JumpEntry, target: usize) {
        assert_eq!(
            self.code[entry.position],
            entry.opcode as u8,
            "patch entry does not match emitted opcode"
        );
        let at = entry.position + 1;
        self.code[at] = (target >> 24) as u8;
        self.code[at + 1] = (target >> 16) as u8;
        self.code[at + 2] = (target >> 8) as u8;
        self.code[at + 3] = target as u8;
    }

    pub fn emit_loop_start(&mut self) {
        self.write_op(Opcode::LoopStart);
        self.triple(-1, -1, -1);
    }

    // ========================================================================
    // For-in
    // ========================================================================

    pub fn emit_enumerate_object(&mut self) {
        self.write_op(Opcode::EnumerateObject);
        let s = self.pop_shadow();
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    pub fn emit_check_if_key_is_last(&mut self) {
        self.write_op(Opcode::CheckIfKeyIsLast);
        let s = self.peek_shadow(0);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    pub fn emit_enumerate_object_key(&mut self) {
        self.write_op(Opcode::EnumerateObjectKey);
        let s = self.peek_shadow(0);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, s, -1);
    }

    // ========================================================================
    // Literals, functions, calls
    // ========================================================================

    pub fn emit_create_object(&mut self, reserved: u16) {
        self.write_op(Opcode::CreateObject);
        self.write_u16(reserved);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
    }

    pub fn emit_create_array(&mut self, length: u16) {
        self.write_op(Opcode::CreateArray);
        self.write_u16(length);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
    }

    pub fn emit_init_object(&mut self) {
        self.emit_init(Opcode::InitObject)
    }

    pub fn emit_init_array_object(&mut self) {
        self.emit_init(Opcode::InitArrayObject)
    }

    fn emit_init(&mut self, op: Opcode) {
        self.write_op(op);
        let _value = self.pop_shadow();
        let key = self.pop_shadow();
        let obj = self.peek_shadow(0);
        // As with the member writes, the initializer value is target − 1.
        let t = self.alloc_ssa();
        self.triple(t, obj, key);
    }

    pub fn emit_create_function(&mut self, block: u16) {
        self.write_op(Opcode::CreateFunction);
        self.write_u16(block);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
    }

    pub fn emit_this(&mut self) {
        self.write_op(Opcode::This);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
    }

    pub fn emit_prepare_function_call(&mut self) {
        self.write_op(Opcode::PrepareFunctionCall);
        self.triple(-1, -1, -1);
    }

    pub fn emit_push_function_call_receiver(&mut self) {
        self.write_op(Opcode::PushFunctionCallReceiver);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
    }

    pub fn emit_call_function(&mut self, argc: u16) -> Result<(), CompileError> {
        let profile = self.alloc_profile()?;
        self.write_op(Opcode::CallFunction);
        self.write_u16(argc);
        self.write_u16(profile);
        self.record_call_site(argc, true);
        Ok(())
    }

    pub fn emit_new_function_call(&mut self, argc: u16) -> Result<(), CompileError> {
        let profile = self.alloc_profile()?;
        self.write_op(Opcode::NewFunctionCall);
        self.write_u16(argc);
        self.write_u16(profile);
        self.record_call_site(argc, false);
        Ok(())
    }

    fn record_call_site(&mut self, argc: u16, has_receiver: bool) {
        let argc = argc as usize;
        let mut args = vec![-1; argc];
        for slot in args.iter_mut().rev() {
            *slot = self.pop_shadow();
        }
        let receiver = if has_receiver { self.pop_shadow() } else { -1 };
        let callee = self.pop_shadow();
        self.call_infos.push(callee);
        self.call_infos.push(receiver);
        self.call_infos.push(argc as i32);
        self.call_infos.extend_from_slice(&args);
        let t = self.alloc_ssa();
        self.shadow.push(t);
        self.triple(t, -1, -1);
    }

    // ========================================================================
    // Exceptions, return, halt
    // ========================================================================

    pub fn emit_throw(&mut self) {
        self.write_op(Opcode::Throw);
        let s = self.pop_shadow();
        self.triple(-1, s, -1);
    }

    pub fn emit_return(&mut self) {
        self.write_op(Opcode::ReturnFunction);
        self.triple(-1, -1, -1);
    }

    pub fn emit_return_with_value(&mut self) {
        self.write_op(Opcode::ReturnFunctionWithValue);
        let s = self.pop_shadow();
        self.triple(-1, s, -1);
    }

    pub fn emit_end(&mut self) {
        self.write_op(Opcode::End);
        self.triple(-1, -1, -1);
    }

    // ========================================================================
    // Finish
    // ========================================================================

    pub fn finish(
        self,
        params: Vec<StringId>,
        local_count: u16,
        is_global: bool,
        name: Option<StringId>,
    ) -> CodeBlock {
        use escargot_core::ic::PropertyCache;
        use escargot_core::types::TypeProfile;
        use std::cell::{Cell, RefCell};

        CodeBlock {
            code: self.code,
            constants: self.constants.into_values(),
            params,
            local_count,
            ssa_index_table: self.ssa,
            ssa_value_count: self.next_ssa as u32,
            function_call_infos: self.call_infos,
            caches: RefCell::new(vec![
                PropertyCache::default();
                self.cache_count as usize
            ]),
            profiles: RefCell::new(vec![
                TypeProfile::default();
                self.profile_count as usize
            ]),
            block_offset: Cell::new(0),
            execute_count: Cell::new(0),
            is_global,
            name,
        }
    }
}

enum JumpStackEffect {
    None,
    PopCondition,
    Peek,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_patch_forward_jump() {
        let mut e = ByteCodeEmitter::with_rough_size(8);
        e.emit_push(Value::Boolean(true)).unwrap();
        let jump = e.emit_jump_if_false();
        e.emit_push(Value::Int32(1)).unwrap();
        e.emit_pop();
        let end = e.current_code_size();
        e.patch_jump(jump, end);
        e.emit_end();

        let block = e.finish(Vec::new(), 0, true, None);
        assert!(block.unresolved_jumps().is_empty());
        assert_eq!(block.read_u32(jump.position + 1), end as u32);
    }

    #[test]
    fn unpatched_jump_is_detected() {
        let mut e = ByteCodeEmitter::with_rough_size(8);
        e.emit_push(Value::Boolean(true)).unwrap();
        let jump = e.emit_jump_if_false();
        e.emit_end();
        let block = e.finish(Vec::new(), 0, true, None);
        assert_eq!(block.unresolved_jumps(), vec![jump.position]);
    }

    #[test]
    #[should_panic(expected = "patch entry does not match")]
    fn patching_a_forged_entry_panics() {
        let mut e = ByteCodeEmitter::with_rough_size(8);
        e.emit_push(Value::Int32(0)).unwrap();
        let mut entry = e.emit_jump(None);
        entry.position += 1;
        e.patch_jump(entry, 0);
    }

    #[test]
    fn ssa_targets_are_program_ordered_and_unique() {
        let mut e = ByteCodeEmitter::with_rough_size(8);
        e.emit_push(Value::Int32(1)).unwrap();
        e.emit_push(Value::Int32(2)).unwrap();
        e.emit_binary(Opcode::Plus);
        e.emit_pop_expression_statement();
        e.emit_end();
        let block = e.finish(Vec::new(), 0, true, None);

        let targets: Vec<i32> = block
            .ssa_index_table
            .iter()
            .map(|t| t.target)
            .filter(|&t| t >= 0)
            .collect();
        assert_eq!(targets, vec![0, 1, 2]);
        // Plus consumes the two pushes.
        assert_eq!(block.ssa_index_table[2].src1, 0);
        assert_eq!(block.ssa_index_table[2].src2, 1);
        // The statement pop consumes the sum.
        assert_eq!(block.ssa_index_table[3].src1, 2);
    }

    #[test]
    fn temp_stack_preserves_ssa_identity() {
        let mut e = ByteCodeEmitter::with_rough_size(8);
        e.emit_push(Value::Int32(5)).unwrap();
        let anchor = e.emit_push_into_temp_stack();
        e.emit_push(Value::Int32(9)).unwrap();
        e.emit_pop();
        e.emit_pop_from_temp_stack(anchor);
        e.emit_return_with_value();
        let block = e.finish(Vec::new(), 0, true, None);

        // The return consumes the original push's definition (index 0), not
        // a fresh one.
        let ret = block.ssa_index_table.last().unwrap();
        assert_eq!(ret.src1, 0);
    }

    #[test]
    fn call_site_records_callee_receiver_and_args() {
        let mut e = ByteCodeEmitter::with_rough_size(8);
        e.emit_push(Value::Int32(0)).unwrap(); // callee (0)
        e.emit_push_function_call_receiver(); // receiver (1)
        e.emit_push(Value::Int32(10)).unwrap(); // arg0 (2)
        e.emit_push(Value::Int32(20)).unwrap(); // arg1 (3)
        e.emit_call_function(2).unwrap();
        let block = e.finish(Vec::new(), 0, true, None);

        assert_eq!(block.function_call_infos, vec![0, 1, 2, 2, 3]);
    }
}
