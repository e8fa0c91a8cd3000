//! Expression emission.
//!
//! Assignment targets follow the resolve/reference/put split: resolving
//! pushes whatever address parts the target needs (nothing for a local, the
//! object and possibly the property for a member), referencing reads the
//! current value without disturbing the address, and putting stores the top
//! of stack while leaving it as the expression's value.

use escargot_core::value::Value;

use crate::ast::{BinaryOp, Expr, Literal, LogicalOp, MemberKey, UnaryOp, UpdateOp};
use crate::bytecode::opcode::Opcode;
use crate::context::GenerateContext;
use crate::error::CompileError;
use crate::generator::FunctionGenerator;

type Result<T> = std::result::Result<T, CompileError>;

impl<'a> FunctionGenerator<'a> {
    pub(crate) fn generate_expression(
        &mut self,
        expr: &Expr,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        match expr {
            Expr::Literal(lit) => self.emitter.emit_push(literal_value(lit)),
            Expr::Identifier(name) => match self.local_slot(*name) {
                Some(slot) => self.emitter.emit_get_by_index(slot),
                None => self.emitter.emit_get_by_id(*name),
            },
            Expr::This => {
                self.emitter.emit_this();
                Ok(())
            }
            Expr::Array(elements) => {
                let length =
                    u16::try_from(elements.len()).map_err(|_| CompileError::TooManyConstants)?;
                self.emitter.emit_create_array(length);
                for (i, element) in elements.iter().enumerate() {
                    self.emitter.emit_push(Value::Int32(i as i32))?;
                    self.generate_expression(element, ctx)?;
                    self.emitter.emit_init_array_object();
                }
                Ok(())
            }
            Expr::Object(properties) => {
                let reserved =
                    u16::try_from(properties.len()).map_err(|_| CompileError::TooManyConstants)?;
                self.emitter.emit_create_object(reserved);
                for (key, value) in properties {
                    self.emitter.emit_push(Value::Str(*key))?;
                    self.generate_expression(value, ctx)?;
                    self.emitter.emit_init_object();
                }
                Ok(())
            }
            Expr::Function { name, params, body } => {
                let index = self.compile_inner_function(*name, params, body)?;
                self.emitter.emit_create_function(index);
                Ok(())
            }
            Expr::Binary { op, left, right } => {
                self.generate_expression(left, ctx)?;
                self.generate_expression(right, ctx)?;
                self.emitter.emit_binary(binary_opcode(*op));
                Ok(())
            }
            Expr::Logical { op, left, right } => {
                self.generate_expression(left, ctx)?;
                let short_circuit = match op {
                    LogicalOp::And => self.emitter.emit_jump_if_false_peeking(),
                    LogicalOp::Or => self.emitter.emit_jump_if_true_peeking(),
                };
                self.emitter.emit_pop();
                self.generate_expression(right, ctx)?;
                let end = self.emitter.current_code_size();
                self.emitter.patch_jump(short_circuit, end);
                Ok(())
            }
            Expr::Unary { op, expr } => self.generate_unary(*op, expr, ctx),
            Expr::Update { op, prefix, target } => {
                self.generate_update(*op, *prefix, target, ctx)
            }
            Expr::Assign { target, op, value } => {
                self.generate_resolve_address(target, ctx)?;
                if let Some(binop) = op {
                    self.generate_reference_resolved_address(target)?;
                    self.generate_expression(value, ctx)?;
                    self.emitter.emit_binary(binary_opcode(*binop));
                } else {
                    self.generate_expression(value, ctx)?;
                }
                self.generate_put(target)
            }
            Expr::Member { object, key } => {
                self.generate_expression(object, ctx)?;
                match key {
                    MemberKey::Named(name) => self
                        .emitter
                        .emit_get_object_precomputed(Value::Str(*name), false),
                    MemberKey::Computed(prop) => match precomputed_key(prop) {
                        Some(constant) => {
                            self.emitter.emit_get_object_precomputed(constant, false)
                        }
                        None => {
                            self.generate_expression(prop, ctx)?;
                            self.emitter.emit_get_object(false)
                        }
                    },
                }
            }
            Expr::Call { callee, args } => {
                self.emitter.emit_prepare_function_call();
                self.generate_expression(callee, ctx)?;
                self.emitter.emit_push_function_call_receiver();
                for arg in args {
                    self.generate_expression(arg, ctx)?;
                }
                let argc =
                    u16::try_from(args.len()).map_err(|_| CompileError::TooManyArguments)?;
                self.emitter.emit_call_function(argc)
            }
            Expr::New { callee, args } => {
                self.generate_expression(callee, ctx)?;
                for arg in args {
                    self.generate_expression(arg, ctx)?;
                }
                let argc =
                    u16::try_from(args.len()).map_err(|_| CompileError::TooManyArguments)?;
                self.emitter.emit_new_function_call(argc)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.generate_expression(test, ctx)?;
                let else_jump = self.emitter.emit_jump_if_false();
                self.generate_expression(consequent, ctx)?;
                let end_jump = self.emitter.emit_jump(None);
                // The arms merge to one stack slot; drop the consequent's
                // shadow entry before emitting the alternate.
                self.emitter.discard_branch_value();
                let else_pos = self.emitter.current_code_size();
                self.emitter.patch_jump(else_jump, else_pos);
                self.generate_expression(alternate, ctx)?;
                let end = self.emitter.current_code_size();
                self.emitter.patch_jump(end_jump, end);
                Ok(())
            }
        }
    }

    fn generate_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        match op {
            UnaryOp::Delete => match operand {
                Expr::Member { object, key } => {
                    self.generate_expression(object, ctx)?;
                    match key {
                        MemberKey::Named(name) => {
                            self.emitter.emit_push(Value::Str(*name))?
                        }
                        MemberKey::Computed(prop) => self.generate_expression(prop, ctx)?,
                    }
                    self.emitter.emit_binary(Opcode::UnaryDelete);
                    Ok(())
                }
                // Deleting a non-reference is a no-op that yields true.
                _ => self.emitter.emit_push(Value::Boolean(true)),
            },
            _ => {
                self.generate_expression(operand, ctx)?;
                let opcode = match op {
                    UnaryOp::Minus => Opcode::UnaryMinus,
                    UnaryOp::Plus => Opcode::UnaryPlus,
                    UnaryOp::BitwiseNot => Opcode::BitwiseNot,
                    UnaryOp::LogicalNot => Opcode::LogicalNot,
                    UnaryOp::TypeOf => Opcode::UnaryTypeOf,
                    UnaryOp::Delete => unreachable!(),
                };
                self.emitter.emit_unary(opcode);
                Ok(())
            }
        }
    }

    /// Postfix updates park the ToNumber'd old value on the temp stack so
    /// the store and the statement's own pop cannot disturb it.
    fn generate_update(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        target: &Expr,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        let step = match op {
            UpdateOp::Increment => Opcode::Increment,
            UpdateOp::Decrement => Opcode::Decrement,
        };
        self.generate_resolve_address(target, ctx)?;
        self.generate_reference_resolved_address(target)?;
        self.emitter.emit_unary(Opcode::ToNumber);
        if prefix {
            self.emitter.emit_unary(step);
            self.generate_put(target)
        } else {
            self.emitter.emit_duplicate_top();
            let anchor = self.emitter.emit_push_into_temp_stack();
            self.emitter.emit_unary(step);
            self.generate_put(target)?;
            self.emitter.emit_pop();
            self.emitter.emit_pop_from_temp_stack(anchor);
            Ok(())
        }
    }

    pub(crate) fn generate_resolve_address(
        &mut self,
        target: &Expr,
        ctx: &mut GenerateContext,
    ) -> Result<()> {
        match target {
            Expr::Identifier(_) => Ok(()),
            Expr::Member { object, key } => {
                self.generate_expression(object, ctx)?;
                if let MemberKey::Computed(prop) = key {
                    self.generate_expression(prop, ctx)?;
                }
                Ok(())
            }
            _ => Err(CompileError::InvalidAssignmentTarget),
        }
    }

    pub(crate) fn generate_reference_resolved_address(
        &mut self,
        target: &Expr,
    ) -> Result<()> {
        match target {
            Expr::Identifier(name) => match self.local_slot(*name) {
                Some(slot) => self.emitter.emit_get_by_index(slot),
                None => self.emitter.emit_get_by_id(*name),
            },
            Expr::Member { key, .. } => match key {
                MemberKey::Named(name) => self
                    .emitter
                    .emit_get_object_precomputed(Value::Str(*name), true),
                MemberKey::Computed(_) => self.emitter.emit_get_object(true),
            },
            _ => Err(CompileError::InvalidAssignmentTarget),
        }
    }

    pub(crate) fn generate_put(&mut self, target: &Expr) -> Result<()> {
        match target {
            Expr::Identifier(name) => {
                self.generate_store_to_name(*name);
                Ok(())
            }
            Expr::Member { key, .. } => match key {
                MemberKey::Named(name) => {
                    self.emitter.emit_put_in_object_precomputed(Value::Str(*name))
                }
                MemberKey::Computed(_) => self.emitter.emit_put_in_object(),
            },
            _ => Err(CompileError::InvalidAssignmentTarget),
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Undefined => Value::Undefined,
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Number(n) => Value::from_f64(*n),
        Literal::String(s) => Value::Str(*s),
    }
}

/// Constant keys eligible for the precomputed-case member read: interned
/// strings and int32 indices, matching what the inline-cache and the
/// array-precomputed paths can consume.
fn precomputed_key(prop: &Expr) -> Option<Value> {
    match prop {
        Expr::Literal(Literal::String(s)) => Some(Value::Str(*s)),
        Expr::Literal(Literal::Number(n)) => match Value::from_f64(*n) {
            v @ Value::Int32(_) => Some(v),
            _ => None,
        },
        _ => None,
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Plus => Opcode::Plus,
        BinaryOp::Minus => Opcode::Minus,
        BinaryOp::Multiply => Opcode::Multiply,
        BinaryOp::Division => Opcode::Division,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::BitwiseAnd => Opcode::BitwiseAnd,
        BinaryOp::BitwiseOr => Opcode::BitwiseOr,
        BinaryOp::BitwiseXor => Opcode::BitwiseXor,
        BinaryOp::LeftShift => Opcode::LeftShift,
        BinaryOp::SignedRightShift => Opcode::SignedRightShift,
        BinaryOp::UnsignedRightShift => Opcode::UnsignedRightShift,
        BinaryOp::Equal => Opcode::Equal,
        BinaryOp::NotEqual => Opcode::NotEqual,
        BinaryOp::StrictEqual => Opcode::StrictEqual,
        BinaryOp::NotStrictEqual => Opcode::NotStrictEqual,
        BinaryOp::GreaterThan => Opcode::GreaterThan,
        BinaryOp::GreaterThanOrEqual => Opcode::GreaterThanOrEqual,
        BinaryOp::LessThan => Opcode::LessThan,
        BinaryOp::LessThanOrEqual => Opcode::LessThanOrEqual,
        BinaryOp::In => Opcode::StringIn,
        BinaryOp::InstanceOf => Opcode::InstanceOf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Stmt;
    use crate::generator::compile_program;
    use escargot_core::string_table::StringTable;

    #[test]
    fn named_member_read_uses_precomputed_case() {
        let mut strings = StringTable::new();
        let o = strings.intern("o");
        let b = strings.intern("b");
        let program = compile_program(
            &[Stmt::Expression(Expr::Member {
                object: Box::new(Expr::Identifier(o)),
                key: MemberKey::Named(b),
            })],
            &strings,
        )
        .unwrap();
        program.entry_block().assert_contains_opcodes(&[
            Opcode::GetById,
            Opcode::GetObjectPreComputedCase,
            Opcode::PopExpressionStatement,
        ]);
    }

    #[test]
    fn literal_index_read_is_precomputed_too() {
        let mut strings = StringTable::new();
        let a = strings.intern("a");
        let program = compile_program(
            &[Stmt::Expression(Expr::Member {
                object: Box::new(Expr::Identifier(a)),
                key: MemberKey::Computed(Box::new(Expr::Literal(Literal::Number(1.0)))),
            })],
            &strings,
        )
        .unwrap();
        let block = program.entry_block();
        block.assert_contains_opcodes(&[Opcode::GetById, Opcode::GetObjectPreComputedCase]);
        assert!(block.constants.contains(&Value::Int32(1)));
    }

    #[test]
    fn computed_member_write_uses_put_in_object() {
        let mut strings = StringTable::new();
        let a = strings.intern("a");
        let i = strings.intern("i");
        let program = compile_program(
            &[Stmt::Expression(Expr::Assign {
                target: Box::new(Expr::Member {
                    object: Box::new(Expr::Identifier(a)),
                    key: MemberKey::Computed(Box::new(Expr::Identifier(i))),
                }),
                op: None,
                value: Box::new(Expr::Literal(Literal::Number(3.0))),
            })],
            &strings,
        )
        .unwrap();
        program.entry_block().assert_contains_opcodes(&[
            Opcode::GetById,
            Opcode::GetById,
            Opcode::Push,
            Opcode::PutInObject,
        ]);
    }

    #[test]
    fn postfix_update_round_trips_through_temp_stack() {
        let mut strings = StringTable::new();
        let i = strings.intern("i");
        let program = compile_program(
            &[Stmt::Expression(Expr::Update {
                op: UpdateOp::Increment,
                prefix: false,
                target: Box::new(Expr::Identifier(i)),
            })],
            &strings,
        )
        .unwrap();
        program.entry_block().assert_contains_opcodes(&[
            Opcode::GetById,
            Opcode::ToNumber,
            Opcode::DuplicateTopOfStackValue,
            Opcode::PushIntoTempStack,
            Opcode::Increment,
            Opcode::PutById,
            Opcode::Pop,
            Opcode::PopFromTempStack,
        ]);
    }

    #[test]
    fn logical_and_short_circuits_with_peeking_jump() {
        let mut strings = StringTable::new();
        let a = strings.intern("a");
        let b = strings.intern("b");
        let program = compile_program(
            &[Stmt::Expression(Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(Expr::Identifier(a)),
                right: Box::new(Expr::Identifier(b)),
            })],
            &strings,
        )
        .unwrap();
        program.entry_block().assert_contains_opcodes(&[
            Opcode::GetById,
            Opcode::JumpIfTopOfStackValueIsFalseWithPeeking,
            Opcode::Pop,
            Opcode::GetById,
        ]);
    }
}
