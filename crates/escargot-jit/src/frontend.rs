//! Bytecode to graph translation.
//!
//! One linear scan over the byte buffer with three cursors moving together:
//! the byte offset, the instruction counter indexing the SSA table, and the
//! call-info cursor into the flat call-site table. Basic blocks are
//! discovered lazily through `mapping` (byte offset of a leader to its
//! block); a jump to an unseen offset creates the block ahead of the scan,
//! and the scan adopts it when the cursor arrives.
//!
//! Anything the translation cannot express returns `None`. Bailing out is
//! normal and lossless: the caller simply keeps interpreting.

use escargot_compiler::bytecode::code_block::CodeBlock;
use escargot_compiler::bytecode::opcode::Opcode;
use escargot_core::value::Value;
use rustc_hash::FxHashMap;

use crate::graph::{BlockId, EsGraph};
use crate::ir::Esir;

pub fn generate_ir_from_code_block(code_block: &CodeBlock) -> Option<EsGraph> {
    let mut graph = EsGraph::new(code_block.ssa_value_count);
    let profiles = code_block.profiles.borrow();
    let caches = code_block.caches.borrow();

    let mut idx = 0usize;
    let mut counter = 0usize;
    let mut call_info_index = 0usize;

    let mut mapping: FxHashMap<usize, BlockId> = FxHashMap::default();
    let entry = graph.create_block();
    graph.push_to_order(entry);
    mapping.insert(0, entry);
    let mut current = entry;

    while idx < code_block.code.len() {
        let op = Opcode::try_from(code_block.code[idx]).ok()?;

        if let Some(&mapped) = mapping.get(&idx) {
            if mapped != current {
                if !graph.block(current).ends_with_jump_or_branch() {
                    graph.add_edge(current, mapped);
                }
                current = mapped;
            }
            if graph.block(current).index.is_none() {
                graph.push_to_order(current);
            }
        }

        let ssa = code_block.ssa_index_table[counter];
        let next = idx + 1 + op.operand_size();

        match op {
            Opcode::Push => {
                let value = code_block.constants[code_block.read_u16(idx + 1) as usize];
                let literal = match value {
                    Value::Int32(i) => Esir::ConstantInt {
                        target: ssa.target,
                        value: i,
                    },
                    Value::Double(d) => Esir::ConstantDouble {
                        target: ssa.target,
                        value: d,
                    },
                    Value::Boolean(b) => Esir::ConstantInt {
                        target: ssa.target,
                        value: b as i32,
                    },
                    Value::Str(s) => Esir::ConstantString {
                        target: ssa.target,
                        value: s,
                    },
                    _ => return None,
                };
                graph.push_instruction(current, literal);
            }

            // The stack choreography dissolves into SSA.
            Opcode::Pop
            | Opcode::PopExpressionStatement
            | Opcode::PushIntoTempStack
            | Opcode::PopFromTempStack
            | Opcode::LoadStackPointer
            | Opcode::PrepareFunctionCall => {}

            Opcode::DuplicateTopOfStackValue => {
                graph.push_instruction(
                    current,
                    Esir::Move {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }

            Opcode::GetById => {
                let name = escargot_core::string_table::StringId(
                    code_block.read_u32(idx + 1),
                );
                let profile = profiles[code_block.read_u16(idx + 5) as usize];
                graph.push_instruction(
                    current,
                    Esir::GetVarGeneric {
                        target: ssa.target,
                        name,
                    },
                );
                graph.set_operand_type(ssa.target, profile.observed());
            }
            Opcode::PutById => {
                let name = escargot_core::string_table::StringId(
                    code_block.read_u32(idx + 1),
                );
                graph.push_instruction(
                    current,
                    Esir::SetVarGeneric {
                        target: ssa.target,
                        name,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::GetByIndex => {
                let index = code_block.read_u16(idx + 1);
                let profile = profiles[code_block.read_u16(idx + 3) as usize];
                let ir = if (index as usize) < code_block.params.len() {
                    Esir::GetArgument {
                        target: ssa.target,
                        index,
                    }
                } else {
                    Esir::GetVar {
                        target: ssa.target,
                        index,
                    }
                };
                graph.push_instruction(current, ir);
                graph.set_operand_type(ssa.target, profile.observed());
            }
            Opcode::PutByIndex => {
                let index = code_block.read_u16(idx + 1);
                graph.push_instruction(
                    current,
                    Esir::SetVar {
                        target: ssa.target,
                        index,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::CreateBinding => return None,

            Opcode::GetObject => {
                let profile = profiles[code_block.read_u16(idx + 1) as usize];
                let object_type =
                    profiles[code_block.read_u16(idx + 3) as usize].observed();
                graph.set_operand_type(ssa.target, profile.observed());
                if object_type.is_array_object_type() {
                    graph.push_instruction(
                        current,
                        Esir::GetArrayObject {
                            target: ssa.target,
                            object: ssa.src1,
                            property: ssa.src2,
                        },
                    );
                } else if object_type.is_object_type() {
                    graph.push_instruction(
                        current,
                        Esir::GetObject {
                            target: ssa.target,
                            object: ssa.src1,
                            property: ssa.src2,
                        },
                    );
                } else {
                    return None;
                }
            }
            Opcode::GetObjectWithPeeking
            | Opcode::GetObjectWithPeekingPreComputedCase => return None,
            Opcode::GetObjectPreComputedCase => {
                let property =
                    code_block.constants[code_block.read_u16(idx + 1) as usize];
                let cache = &caches[code_block.read_u16(idx + 3) as usize];
                let profile = profiles[code_block.read_u16(idx + 5) as usize];
                let object_type =
                    profiles[code_block.read_u16(idx + 7) as usize].observed();
                if object_type.is_string_object_type() {
                    // No string-object specialization in this tier.
                    return None;
                }
                if !object_type.is_object_type() {
                    return None;
                }
                graph.set_operand_type(ssa.target, profile.observed());
                if object_type.is_array_object_type() {
                    let Value::Int32(index) = property else { return None };
                    graph.push_instruction(
                        current,
                        Esir::GetArrayObjectPreComputed {
                            target: ssa.target,
                            object: ssa.src1,
                            index,
                        },
                    );
                } else {
                    let Value::Str(key) = property else { return None };
                    graph.push_instruction(
                        current,
                        Esir::GetObjectPreComputed {
                            target: ssa.target,
                            object: ssa.src1,
                            key,
                            cached_chain: cache.chain.clone(),
                            cached_slot: cache.slot,
                        },
                    );
                }
            }
            Opcode::SetObject | Opcode::PutInObject => {
                // The stored value is the definition just before this one.
                graph.push_instruction(
                    current,
                    Esir::SetObject {
                        target: ssa.target,
                        object: ssa.src1,
                        property: ssa.src2,
                        source: ssa.target - 1,
                    },
                );
            }
            Opcode::PutInObjectPreComputedCase => {
                let property =
                    code_block.constants[code_block.read_u16(idx + 1) as usize];
                let Value::Str(key) = property else { return None };
                graph.push_instruction(
                    current,
                    Esir::SetObjectPreComputed {
                        target: ssa.target,
                        object: ssa.src1,
                        key,
                        source: ssa.target - 1,
                    },
                );
            }

            Opcode::Plus => {
                graph.push_instruction(
                    current,
                    Esir::GenericPlus {
                        target: ssa.target,
                        left: ssa.src1,
                        right: ssa.src2,
                    },
                );
            }
            Opcode::Minus => {
                graph.push_instruction(
                    current,
                    Esir::Minus {
                        target: ssa.target,
                        left: ssa.src1,
                        right: ssa.src2,
                    },
                );
            }
            Opcode::Multiply => {
                graph.push_instruction(
                    current,
                    Esir::GenericMultiply {
                        target: ssa.target,
                        left: ssa.src1,
                        right: ssa.src2,
                    },
                );
            }
            Opcode::Division => {
                graph.push_instruction(
                    current,
                    Esir::GenericDivision {
                        target: ssa.target,
                        left: ssa.src1,
                        right: ssa.src2,
                    },
                );
            }
            Opcode::Mod => {
                graph.push_instruction(
                    current,
                    Esir::GenericMod {
                        target: ssa.target,
                        left: ssa.src1,
                        right: ssa.src2,
                    },
                );
            }
            Opcode::Increment => {
                graph.push_instruction(
                    current,
                    Esir::Increment {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::Decrement => {
                graph.push_instruction(
                    current,
                    Esir::Decrement {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::ToNumber | Opcode::UnaryPlus => {
                graph.push_instruction(
                    current,
                    Esir::ToNumber {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::UnaryMinus => {
                graph.push_instruction(
                    current,
                    Esir::UnaryMinus {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::BitwiseNot => {
                graph.push_instruction(
                    current,
                    Esir::BitwiseNot {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::LogicalNot => {
                graph.push_instruction(
                    current,
                    Esir::LogicalNot {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::UnaryTypeOf => {
                graph.push_instruction(
                    current,
                    Esir::TypeOf {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }

            Opcode::BitwiseAnd
            | Opcode::BitwiseOr
            | Opcode::BitwiseXor
            | Opcode::LeftShift
            | Opcode::SignedRightShift
            | Opcode::UnsignedRightShift
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::StrictEqual
            | Opcode::NotStrictEqual
            | Opcode::GreaterThan
            | Opcode::GreaterThanOrEqual
            | Opcode::LessThan
            | Opcode::LessThanOrEqual => {
                let (target, left, right) = (ssa.target, ssa.src1, ssa.src2);
                let ir = match op {
                    Opcode::BitwiseAnd => Esir::BitwiseAnd { target, left, right },
                    Opcode::BitwiseOr => Esir::BitwiseOr { target, left, right },
                    Opcode::BitwiseXor => Esir::BitwiseXor { target, left, right },
                    Opcode::LeftShift => Esir::LeftShift { target, left, right },
                    Opcode::SignedRightShift => {
                        Esir::SignedRightShift { target, left, right }
                    }
                    Opcode::UnsignedRightShift => {
                        Esir::UnsignedRightShift { target, left, right }
                    }
                    Opcode::Equal => Esir::Equal { target, left, right },
                    Opcode::NotEqual => Esir::NotEqual { target, left, right },
                    Opcode::StrictEqual => Esir::StrictEqual { target, left, right },
                    Opcode::NotStrictEqual => {
                        Esir::NotStrictEqual { target, left, right }
                    }
                    Opcode::GreaterThan => Esir::GreaterThan { target, left, right },
                    Opcode::GreaterThanOrEqual => {
                        Esir::GreaterThanOrEqual { target, left, right }
                    }
                    Opcode::LessThan => Esir::LessThan { target, left, right },
                    _ => Esir::LessThanOrEqual { target, left, right },
                };
                graph.push_instruction(current, ir);
            }

            Opcode::StringIn | Opcode::InstanceOf | Opcode::UnaryDelete => return None,

            Opcode::Jump => {
                let target_offset = code_block.read_u32(idx + 1) as usize;
                let target_block = match mapping.get(&target_offset) {
                    Some(&block) => {
                        graph.add_edge(current, block);
                        block
                    }
                    None => graph.create_block_with_parent(current),
                };
                graph.push_instruction(
                    current,
                    Esir::Jump {
                        target: ssa.target,
                        block: target_block,
                    },
                );
                mapping.insert(target_offset, target_block);
            }
            Opcode::JumpIfTopOfStackValueIsFalse => {
                let target_offset = code_block.read_u32(idx + 1) as usize;
                let true_block = graph.create_block_with_parent(current);
                let false_block = graph.create_block_with_parent(current);
                graph.push_instruction(
                    current,
                    Esir::Branch {
                        target: ssa.target,
                        condition: ssa.src1,
                        true_block,
                        false_block,
                    },
                );
                mapping.insert(next, true_block);
                mapping.insert(target_offset, false_block);
            }
            Opcode::JumpIfTopOfStackValueIsTrue
            | Opcode::JumpAndPopIfTopOfStackValueIsTrue
            | Opcode::JumpIfTopOfStackValueIsFalseWithPeeking
            | Opcode::JumpIfTopOfStackValueIsTrueWithPeeking => return None,
            Opcode::LoopStart => {
                let loop_block = graph.create_block();
                graph.push_instruction(loop_block, Esir::LoopStart { target: -1 });
                mapping.insert(next, loop_block);
            }

            Opcode::EnumerateObject => {
                graph.push_instruction(
                    current,
                    Esir::GetEnumerableObjectData {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::CheckIfKeyIsLast => {
                graph.push_instruction(
                    current,
                    Esir::CheckIfKeyIsLast {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::EnumerateObjectKey => {
                graph.push_instruction(
                    current,
                    Esir::GetEnumerateKey {
                        target: ssa.target,
                        source: ssa.src1,
                    },
                );
            }

            Opcode::CreateObject => {
                graph.push_instruction(
                    current,
                    Esir::CreateObject {
                        target: ssa.target,
                        reserved: code_block.read_u16(idx + 1),
                    },
                );
            }
            Opcode::CreateArray => {
                graph.push_instruction(
                    current,
                    Esir::CreateArray {
                        target: ssa.target,
                        length: code_block.read_u16(idx + 1),
                    },
                );
            }
            Opcode::InitObject | Opcode::InitArrayObject => {
                let ir = if op == Opcode::InitObject {
                    Esir::InitObject {
                        target: ssa.target,
                        object: ssa.src1,
                        key: ssa.src2,
                        source: ssa.target - 1,
                    }
                } else {
                    Esir::InitArrayObject {
                        target: ssa.target,
                        object: ssa.src1,
                        key: ssa.src2,
                        source: ssa.target - 1,
                    }
                };
                graph.push_instruction(current, ir);
            }
            Opcode::CreateFunction => {
                graph.push_instruction(
                    current,
                    Esir::CreateFunction {
                        target: ssa.target,
                        block: code_block.read_u16(idx + 1),
                    },
                );
            }
            Opcode::This => {
                graph.push_instruction(current, Esir::GetThis { target: ssa.target });
            }

            Opcode::PushFunctionCallReceiver => {
                graph.push_instruction(
                    current,
                    Esir::ConstantEsValue {
                        target: ssa.target,
                        value: Value::Undefined,
                    },
                );
            }
            Opcode::CallFunction | Opcode::NewFunctionCall => {
                let infos = &code_block.function_call_infos;
                let callee = infos[call_info_index];
                let receiver = infos[call_info_index + 1];
                let argc = infos[call_info_index + 2] as usize;
                let arguments =
                    infos[call_info_index + 3..call_info_index + 3 + argc].to_vec();
                call_info_index += 3 + argc;
                let profile = profiles[code_block.read_u16(idx + 3) as usize];
                let ir = if op == Opcode::CallFunction {
                    Esir::CallJs {
                        target: ssa.target,
                        callee,
                        receiver,
                        arguments,
                    }
                } else {
                    Esir::CallNewJs {
                        target: ssa.target,
                        callee,
                        arguments,
                    }
                };
                graph.push_instruction(current, ir);
                graph.set_operand_type(ssa.target, profile.observed());
            }

            Opcode::Throw => {
                graph.push_instruction(
                    current,
                    Esir::Throw {
                        target: -1,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::ReturnFunction => {
                graph.push_instruction(current, Esir::Return { target: -1 });
            }
            Opcode::ReturnFunctionWithValue => {
                graph.push_instruction(
                    current,
                    Esir::ReturnWithValue {
                        target: -1,
                        source: ssa.src1,
                    },
                );
            }
            Opcode::End => break,
        }

        idx = next;
        counter += 1;
    }

    Some(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escargot_compiler::ast::*;
    use escargot_compiler::generator::compile_program;
    use escargot_core::string_table::StringTable;
    use rustc_hash::FxHashSet;

    fn num(n: f64) -> Expr {
        Expr::Literal(Literal::Number(n))
    }

    /// `function () { var s = 0; for (var i = 1; i <= 10; i++) s += i; return s; }`
    fn sum_loop_body(strings: &mut StringTable) -> Vec<Stmt> {
        let s = strings.intern("s");
        let i = strings.intern("i");
        vec![
            Stmt::VarDecl(vec![(s, Some(num(0.0)))]),
            Stmt::For {
                init: Some(ForInit::VarDecl(vec![(i, Some(num(1.0)))])),
                test: Some(Expr::Binary {
                    op: BinaryOp::LessThanOrEqual,
                    left: Box::new(Expr::Identifier(i)),
                    right: Box::new(num(10.0)),
                }),
                update: Some(Expr::Update {
                    op: UpdateOp::Increment,
                    prefix: false,
                    target: Box::new(Expr::Identifier(i)),
                }),
                body: Box::new(Stmt::Expression(Expr::Assign {
                    target: Box::new(Expr::Identifier(s)),
                    op: Some(BinaryOp::Plus),
                    value: Box::new(Expr::Identifier(i)),
                })),
            },
            Stmt::Return(Some(Expr::Identifier(s))),
        ]
    }

    #[test]
    fn sum_loop_builds_a_graph_with_a_loop_start() {
        let mut strings = StringTable::new();
        let f = strings.intern("f");
        let body = sum_loop_body(&mut strings);
        let program = compile_program(
            &[Stmt::FunctionDecl {
                name: f,
                params: vec![],
                body,
            }],
            &strings,
        )
        .unwrap();
        let block = &program.blocks[0];

        let graph = generate_ir_from_code_block(block).expect("graph");
        assert!(graph.basic_block_size() > 1);
        let names: Vec<&str> = graph.instructions().map(|ir| ir.name()).collect();
        assert!(names.contains(&"LoopStart"));
        assert!(names.contains(&"GenericPlus"));
        assert!(names.contains(&"LessThanOrEqual"));
        assert!(names.contains(&"ReturnWithValue"));
    }

    #[test]
    fn ssa_targets_are_defined_once() {
        let mut strings = StringTable::new();
        let f = strings.intern("f");
        let body = sum_loop_body(&mut strings);
        let program = compile_program(
            &[Stmt::FunctionDecl {
                name: f,
                params: vec![],
                body,
            }],
            &strings,
        )
        .unwrap();
        let graph = generate_ir_from_code_block(&program.blocks[0]).expect("graph");

        let mut seen = FxHashSet::default();
        for ir in graph.instructions() {
            let t = ir.target();
            if t >= 0 {
                assert!(seen.insert(t), "SSA index {t} defined twice");
            }
        }
    }

    #[test]
    fn for_in_bails_out() {
        let mut strings = StringTable::new();
        let k = strings.intern("k");
        let x = strings.intern("x");
        let program = compile_program(
            &[Stmt::ForIn {
                left: Box::new(Expr::Identifier(k)),
                right: Expr::Object(vec![(x, num(1.0))]),
                body: Box::new(Stmt::Empty),
            }],
            &strings,
        )
        .unwrap();
        assert!(generate_ir_from_code_block(program.entry_block()).is_none());
    }

    #[test]
    fn instanceof_bails_out() {
        let mut strings = StringTable::new();
        let a = strings.intern("a");
        let b = strings.intern("b");
        let program = compile_program(
            &[Stmt::Expression(Expr::Binary {
                op: BinaryOp::InstanceOf,
                left: Box::new(Expr::Identifier(a)),
                right: Box::new(Expr::Identifier(b)),
            })],
            &strings,
        )
        .unwrap();
        assert!(generate_ir_from_code_block(program.entry_block()).is_none());
    }

    #[test]
    fn cold_member_access_profile_bails_out() {
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
        // Never interpreted: the object profile is empty, so the translation
        // cannot commit to a shape of access.
        assert!(generate_ir_from_code_block(program.entry_block()).is_none());
    }

    #[test]
    fn branch_splits_blocks_with_edges() {
        let mut strings = StringTable::new();
        let x = strings.intern("x");
        let program = compile_program(
            &[
                Stmt::VarDecl(vec![(x, Some(num(1.0)))]),
                Stmt::If {
                    test: Expr::Identifier(x),
                    consequent: Box::new(Stmt::Expression(num(1.0))),
                    alternate: Some(Box::new(Stmt::Expression(num(2.0)))),
                },
            ],
            &strings,
        )
        .unwrap();
        let graph = generate_ir_from_code_block(program.entry_block()).expect("graph");
        let entry = graph.ordered_block(0);
        assert_eq!(graph.block(entry).children.len(), 2);
        assert!(graph.block(entry).ends_with_jump_or_branch());
    }
}
