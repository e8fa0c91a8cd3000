//! Statement emission.

use std::rc::Rc;

use escargot_core::string_table::StringId;
use escargot_core::value::Value;

use crate::ast::{Expr, ForInit, Stmt, SwitchCase};
use crate::context::GenerateContext;
use crate::error::CompileError;
use crate::generator::FunctionGenerator;

type Result<T> = std::result::Result<T, CompileError>;

impl<'a> FunctionGenerator<'a> {
    pub(crate) fn generate_statement(
        &mut self,
        stmt: &Stmt,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        match stmt {
            Stmt::Expression(e) => {
                self.generate_expression(e, ctx)?;
                self.emitter.emit_pop_expression_statement();
                Ok(())
            }
            Stmt::VarDecl(decls) => self.generate_var_decl(decls, ctx),
            Stmt::FunctionDecl { name, params, body } => {
                let index = self.compile_inner_function(Some(*name), params, body)?;
                self.emitter.emit_create_function(index);
                self.generate_store_to_name(*name);
                self.emitter.emit_pop();
                Ok(())
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.generate_statement(s, ctx)?;
                }
                Ok(())
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.generate_expression(test, ctx)?;
                let else_jump = self.emitter.emit_jump_if_false();
                self.generate_statement(consequent, ctx)?;
                match alternate {
                    Some(alt) => {
                        let end_jump = self.emitter.emit_jump(None);
                        let else_pos = self.emitter.current_code_size();
                        self.emitter.patch_jump(else_jump, else_pos);
                        self.generate_statement(alt, ctx)?;
                        let end = self.emitter.current_code_size();
                        self.emitter.patch_jump(end_jump, end);
                    }
                    None => {
                        let end = self.emitter.current_code_size();
                        self.emitter.patch_jump(else_jump, end);
                    }
                }
                Ok(())
            }
            Stmt::While { test, body } => {
                let mut new_ctx = ctx.new_child();
                self.emitter.emit_loop_start();
                let while_start = self.emitter.current_code_size();
                self.generate_expression(test, &mut new_ctx)?;
                let test_jump = self.emitter.emit_jump_if_false();
                self.generate_statement(body, &mut new_ctx)?;
                self.emitter.emit_jump(Some(while_start));
                let while_end = self.emitter.current_code_size();
                self.emitter.patch_jump(test_jump, while_end);
                new_ctx.consume_break_positions(&mut self.emitter, while_end);
                new_ctx.consume_continue_positions(&mut self.emitter, while_start);
                new_ctx.position_to_continue = while_start;
                new_ctx.propagate_information_to(ctx);
                Ok(())
            }
            Stmt::DoWhile { body, test } => {
                let mut new_ctx = ctx.new_child();
                self.emitter.emit_loop_start();
                let body_start = self.emitter.current_code_size();
                self.generate_statement(body, &mut new_ctx)?;
                let continue_position = self.emitter.current_code_size();
                self.generate_expression(test, &mut new_ctx)?;
                let back_jump = self.emitter.emit_jump_if_true();
                self.emitter.patch_jump(back_jump, body_start);
                let end = self.emitter.current_code_size();
                new_ctx.consume_break_positions(&mut self.emitter, end);
                new_ctx.consume_continue_positions(&mut self.emitter, continue_position);
                new_ctx.position_to_continue = continue_position;
                new_ctx.propagate_information_to(ctx);
                Ok(())
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.generate_for(init, test, update, body, ctx),
            Stmt::ForIn { left, right, body } => {
                self.generate_for_in(left, right, body, ctx)
            }
            Stmt::Switch {
                discriminant,
                cases_before_default,
                default,
                cases_after_default,
            } => self.generate_switch(
                discriminant,
                cases_before_default,
                default,
                cases_after_default,
                ctx,
            ),
            Stmt::Break => {
                let entry = self.emitter.emit_jump(None);
                ctx.push_break_position(entry);
                Ok(())
            }
            Stmt::Continue => {
                let entry = self.emitter.emit_jump(None);
                ctx.push_continue_position(entry);
                Ok(())
            }
            Stmt::BreakLabel(label) => {
                let entry = self.emitter.emit_jump(None);
                ctx.push_labeled_break_position(*label, entry);
                Ok(())
            }
            Stmt::ContinueLabel(label) => {
                let entry = self.emitter.emit_jump(None);
                ctx.push_labeled_continue_position(*label, entry);
                Ok(())
            }
            Stmt::Labeled { label, body } => {
                let start = self.emitter.current_code_size();
                ctx.position_to_continue = start;
                let base_before = ctx.offset_to_base_pointer;
                self.generate_statement(body, ctx)?;
                let end = self.emitter.current_code_size();
                self.emitter.emit_load_stack_pointer(base_before as u16);
                ctx.consume_labeled_break_positions(&mut self.emitter, end, *label);
                let continue_target = ctx.position_to_continue;
                ctx.consume_labeled_continue_positions(
                    &mut self.emitter,
                    continue_target,
                    *label,
                );
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => {
                        self.generate_expression(e, ctx)?;
                        self.emitter.emit_return_with_value();
                    }
                    None => self.emitter.emit_return(),
                }
                Ok(())
            }
            Stmt::Throw(e) => {
                self.generate_expression(e, ctx)?;
                self.emitter.emit_throw();
                Ok(())
            }
            Stmt::Empty => Ok(()),
        }
    }

    fn generate_var_decl(
        &mut self,
        decls: &[(StringId, Option<Expr>)],
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        for (name, init) in decls {
            match init {
                Some(e) => {
                    self.generate_expression(e, ctx)?;
                    self.generate_store_to_name(*name);
                    self.emitter.emit_pop();
                }
                None => {
                    // Hoisted slots start undefined; global declarations
                    // still need their binding created.
                    if self.is_global {
                        self.emitter.emit_create_binding(*name);
                    }
                }
            }
        }
        Ok(())
    }

    fn generate_for(
        &mut self,
        init: &Option<ForInit>,
        test: &Option<Expr>,
        update: &Option<Expr>,
        body: &Stmt,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        let mut new_ctx = ctx.new_child();

        match init {
            Some(ForInit::VarDecl(decls)) => self.generate_var_decl(decls, &mut new_ctx)?,
            Some(ForInit::Expr(e)) => {
                self.generate_expression(e, &mut new_ctx)?;
                self.emitter.emit_pop();
            }
            None => {}
        }

        self.emitter.emit_loop_start();
        let for_start = self.emitter.current_code_size();

        match test {
            Some(e) => self.generate_expression(e, &mut new_ctx)?,
            None => self.emitter.emit_push(Value::Boolean(true))?,
        }
        let test_jump = self.emitter.emit_jump_if_false();

        self.generate_statement(body, &mut new_ctx)?;

        let update_position = self.emitter.current_code_size();
        if let Some(e) = update {
            self.generate_expression(e, &mut new_ctx)?;
            self.emitter.emit_pop();
        }
        self.emitter.emit_jump(Some(for_start));

        let for_end = self.emitter.current_code_size();
        self.emitter.patch_jump(test_jump, for_end);
        new_ctx.consume_break_positions(&mut self.emitter, for_end);
        new_ctx.consume_continue_positions(&mut self.emitter, update_position);
        new_ctx.position_to_continue = update_position;
        new_ctx.propagate_information_to(ctx);
        Ok(())
    }

    /// For-in compiles to: evaluate the collection, bail past the loop when
    /// it is undefined or null, snapshot its keys into an enumeration
    /// object, then loop on the key-exhaustion check, writing each key to
    /// the loop variable through the temp stack.
    fn generate_for_in(
        &mut self,
        left: &Expr,
        right: &Expr,
        body: &Stmt,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        let mut new_ctx = ctx.new_child();
        new_ctx.offset_to_base_pointer = ctx.offset_to_base_pointer + 1;

        self.generate_expression(right, &mut new_ctx)?;

        self.emitter.emit_duplicate_top();
        self.emitter.emit_push(Value::Undefined)?;
        self.emitter.emit_binary(crate::bytecode::opcode::Opcode::Equal);
        let exit1 = self.emitter.emit_jump_and_pop_if_true();

        self.emitter.emit_duplicate_top();
        self.emitter.emit_push(Value::Null)?;
        self.emitter.emit_binary(crate::bytecode::opcode::Opcode::Equal);
        let exit2 = self.emitter.emit_jump_and_pop_if_true();

        self.emitter.emit_enumerate_object();
        self.emitter.emit_loop_start();
        let continue_position = self.emitter.current_code_size();
        self.emitter.emit_check_if_key_is_last();
        let exit3 = self.emitter.emit_jump_and_pop_if_true();
        self.emitter.emit_enumerate_object_key();

        let push_position = self.emitter.emit_push_into_temp_stack();
        self.generate_resolve_address(left, &mut new_ctx)?;
        self.emitter.emit_pop_from_temp_stack(push_position);
        self.generate_put(left)?;
        self.emitter.emit_pop();

        self.generate_statement(body, &mut new_ctx)?;

        self.emitter.emit_jump(Some(continue_position));
        let for_in_end = self.emitter.current_code_size();
        self.emitter.emit_pop();

        new_ctx.consume_break_positions(&mut self.emitter, for_in_end);
        new_ctx.consume_continue_positions(&mut self.emitter, continue_position);
        new_ctx.position_to_continue = continue_position;

        let skip_exit = self.emitter.emit_jump(None);
        let exit_position = self.emitter.current_code_size();
        self.emitter.patch_jump(exit1, exit_position);
        self.emitter.patch_jump(exit2, exit_position);
        self.emitter.patch_jump(exit3, exit_position);
        self.emitter.patch_jump(skip_exit, self.emitter.current_code_size());

        new_ctx.propagate_information_to(ctx);
        Ok(())
    }

    /// Case tests run in source order (before-default cases first, then
    /// after-default ones); bodies are laid out in source order so matching
    /// a case falls through the default clause exactly as the standard asks.
    fn generate_switch(
        &mut self,
        discriminant: &Expr,
        cases_before: &[SwitchCase],
        default: &Option<Vec<Stmt>>,
        cases_after: &[SwitchCase],
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        let mut new_ctx = ctx.new_child();
        self.generate_expression(discriminant, &mut new_ctx)?;

        let mut case_jumps = Vec::with_capacity(cases_before.len() + cases_after.len());
        for case in cases_before.iter().chain(cases_after) {
            self.emitter.emit_duplicate_top();
            self.generate_expression(&case.test, &mut new_ctx)?;
            self.emitter
                .emit_binary(crate::bytecode::opcode::Opcode::StrictEqual);
            case_jumps.push(self.emitter.emit_jump_and_pop_if_true());
        }

        self.emitter.emit_pop();
        let jump_to_default = self.emitter.emit_jump(None);

        let mut jump_index = 0;
        for case in cases_before {
            let here = self.emitter.current_code_size();
            self.emitter.patch_jump(case_jumps[jump_index], here);
            jump_index += 1;
            for s in &case.body {
                self.generate_statement(s, &mut new_ctx)?;
            }
        }
        if let Some(stmts) = default {
            let here = self.emitter.current_code_size();
            self.emitter.patch_jump(jump_to_default, here);
            for s in stmts {
                self.generate_statement(s, &mut new_ctx)?;
            }
        }
        for case in cases_after {
            let here = self.emitter.current_code_size();
            self.emitter.patch_jump(case_jumps[jump_index], here);
            jump_index += 1;
            for s in &case.body {
                self.generate_statement(s, &mut new_ctx)?;
            }
        }

        let break_position = self.emitter.current_code_size();
        new_ctx.consume_break_positions(&mut self.emitter, break_position);
        new_ctx.position_to_continue = ctx.position_to_continue;
        if default.is_none() {
            self.emitter
                .patch_jump(jump_to_default, self.emitter.current_code_size());
        }
        new_ctx.propagate_information_to(ctx);
        Ok(())
    }

    pub(crate) fn compile_inner_function(
        &mut self,
        name: Option<StringId>,
        params: &[StringId],
        body: &[Stmt],
    ) -> Result<u16> {
        let block = FunctionGenerator::compile(
            name,
            params.to_vec(),
            body,
            false,
            &mut *self.blocks,
            self.strings,
        )?;
        let index = u16::try_from(self.blocks.len())
            .map_err(|_| CompileError::TooManyFunctions)?;
        self.blocks.push(Rc::new(block));
        Ok(index)
    }

    /// Store the top of stack to a variable, leaving the value on the stack.
    pub(crate) fn generate_store_to_name(&mut self, name: StringId) {
        match self.local_slot(name) {
            Some(slot) => self.emitter.emit_put_by_index(slot),
            None => self.emitter.emit_put_by_id(name),
        }
    }
}
