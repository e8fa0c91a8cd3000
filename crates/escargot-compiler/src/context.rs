//! Emission context for break/continue resolution.
//!
//! Every loop, switch, and for-in opens a child [`GenerateContext`]. Break
//! and continue statements emit a sentinel jump and record its
//! [`JumpEntry`] here; the enclosing construct consumes the lists it is
//! responsible for and patches the recorded jumps, and whatever remains
//! (labeled jumps, a continue inside a switch) propagates to the parent
//! context. A context must be drained before the function finishes; a
//! leftover entry is a structural error, not a warning.

use escargot_core::string_table::{StringId, StringTable};

use crate::emit::{ByteCodeEmitter, JumpEntry};
use crate::error::CompileError;

#[derive(Debug, Default)]
pub struct GenerateContext {
    break_positions: Vec<JumpEntry>,
    continue_positions: Vec<JumpEntry>,
    labeled_break_positions: Vec<(StringId, JumpEntry)>,
    labeled_continue_positions: Vec<(StringId, JumpEntry)>,
    /// Where an enclosing label's `continue` should land; loops update this
    /// and propagate it upward.
    pub position_to_continue: usize,
    /// Operand-stack depth owed to enclosing constructs (for-in enumeration
    /// state); labeled-statement exits truncate back to it.
    pub offset_to_base_pointer: usize,
}

impl GenerateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child context for a nested construct: inherits the anchors, starts
    /// with empty jump lists.
    pub fn new_child(&self) -> Self {
        Self {
            position_to_continue: self.position_to_continue,
            offset_to_base_pointer: self.offset_to_base_pointer,
            ..Self::default()
        }
    }

    pub fn push_break_position(&mut self, entry: JumpEntry) {
        self.break_positions.push(entry);
    }

    pub fn push_continue_position(&mut self, entry: JumpEntry) {
        self.continue_positions.push(entry);
    }

    pub fn push_labeled_break_position(&mut self, label: StringId, entry: JumpEntry) {
        self.labeled_break_positions.push((label, entry));
    }

    pub fn push_labeled_continue_position(&mut self, label: StringId, entry: JumpEntry) {
        self.labeled_continue_positions.push((label, entry));
    }

    pub fn consume_break_positions(&mut self, emitter: &mut ByteCodeEmitter, target: usize) {
        for entry in self.break_positions.drain(..) {
            emitter.patch_jump(entry, target);
        }
    }

    pub fn consume_continue_positions(
        &mut self,
        emitter: &mut ByteCodeEmitter,
        target: usize,
    ) {
        for entry in self.continue_positions.drain(..) {
            emitter.patch_jump(entry, target);
        }
    }

    pub fn consume_labeled_break_positions(
        &mut self,
        emitter: &mut ByteCodeEmitter,
        target: usize,
        label: StringId,
    ) {
        self.labeled_break_positions.retain(|(l, entry)| {
            if *l == label {
                emitter.patch_jump(*entry, target);
                false
            } else {
                true
            }
        });
    }

    pub fn consume_labeled_continue_positions(
        &mut self,
        emitter: &mut ByteCodeEmitter,
        target: usize,
        label: StringId,
    ) {
        self.labeled_continue_positions.retain(|(l, entry)| {
            if *l == label {
                emitter.patch_jump(*entry, target);
                false
            } else {
                true
            }
        });
    }

    /// Hand everything unconsumed to the parent context.
    pub fn propagate_information_to(self, parent: &mut GenerateContext) {
        parent.break_positions.extend(self.break_positions);
        parent.continue_positions.extend(self.continue_positions);
        parent
            .labeled_break_positions
            .extend(self.labeled_break_positions);
        parent
            .labeled_continue_positions
            .extend(self.labeled_continue_positions);
        parent.position_to_continue = self.position_to_continue;
    }

    /// Verify nothing pending survived to the end of the function.
    pub fn ensure_drained(&self, strings: &StringTable) -> Result<(), CompileError> {
        if !self.break_positions.is_empty() {
            return Err(CompileError::StrayBreak);
        }
        if !self.continue_positions.is_empty() {
            return Err(CompileError::StrayContinue);
        }
        if let Some((label, _)) = self
            .labeled_break_positions
            .first()
            .or(self.labeled_continue_positions.first())
        {
            return Err(CompileError::UnresolvedLabel(
                strings.resolve(*label).to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escargot_core::value::Value;

    #[test]
    fn consume_patches_registered_jumps() {
        let mut emitter = ByteCodeEmitter::with_rough_size(8);
        let mut ctx = GenerateContext::new();
        emitter.emit_push(Value::Int32(0)).unwrap();
        ctx.push_break_position(emitter.emit_jump(None));
        ctx.push_break_position(emitter.emit_jump(None));
        let end = emitter.current_code_size();
        ctx.consume_break_positions(&mut emitter, end);
        emitter.emit_end();

        let block = emitter.finish(Vec::new(), 0, true, None);
        assert!(block.unresolved_jumps().is_empty());
        let strings = StringTable::new();
        assert!(ctx.ensure_drained(&strings).is_ok());
    }

    #[test]
    fn labeled_lists_drain_per_label(){
        let mut strings = StringTable::new();
        let outer = strings.intern("outer");
        let inner = strings.intern("inner");

        let mut emitter = ByteCodeEmitter::with_rough_size(8);
        let mut ctx = GenerateContext::new();
        ctx.push_labeled_break_position(outer, emitter.emit_jump(None));
        ctx.push_labeled_break_position(inner, emitter.emit_jump(None));

        ctx.consume_labeled_break_positions(&mut emitter, 0, inner);
        assert!(matches!(
            ctx.ensure_drained(&strings),
            Err(CompileError::UnresolvedLabel(l)) if l == "outer"
        ));
        ctx.consume_labeled_break_positions(&mut emitter, 0, outer);
        assert!(ctx.ensure_drained(&strings).is_ok());
    }

    #[test]
    fn propagate_moves_pending_entries_up() {
        let mut emitter = ByteCodeEmitter::with_rough_size(8);
        let mut parent = GenerateContext::new();
        let mut child = parent.new_child();
        child.push_continue_position(emitter.emit_jump(None));
        child.position_to_continue = 42;
        child.propagate_information_to(&mut parent);
        assert_eq!(parent.position_to_continue, 42);
        assert_eq!(parent.continue_positions.len(), 1);
    }
}
