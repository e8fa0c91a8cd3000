//! Type inference over the graph.
//!
//! The interpreter only profiles heap loads, arguments, and call results;
//! everything else is derived here. One forward pass, block by block in
//! execution order, reads source operand types and writes the destination
//! type, rewriting generic instructions into specialized forms in place.
//! Each rewrite is a speculation the code generator must guard; a guard
//! failure is an OSR exit back to the interpreter.
//!
//! Returns `false` to abandon the compile (phi operands disagree, a unary
//! numeric op fed by a non-number, an addition over types the tier cannot
//! express). Abandoning is recoverable by construction: the interpreter
//! result is always available.

use escargot_core::types::Type;

use crate::graph::EsGraph;
use crate::ir::Esir;

pub fn run(graph: &mut EsGraph) -> bool {
    for i in 0..graph.basic_block_size() {
        let block_id = graph.ordered_block(i);
        for j in 0..graph.block(block_id).instructions.len() {
            let ir = graph.block(block_id).instructions[j].clone();
            match ir {
                Esir::ConstantEsValue { .. } => {}
                Esir::ConstantDouble { target, .. } => {
                    graph.set_operand_type(target, Type::DOUBLE);
                }
                Esir::ConstantString { target, .. } => {
                    graph.set_operand_type(target, Type::STRING);
                }

                Esir::ConstantInt { target, value } => {
                    // A consumer may have forced this constant to be double
                    // typed; re-materialize it instead of converting at
                    // runtime.
                    if graph.operand_type(target).is_double_type() {
                        graph.block_mut(block_id).replace(
                            j,
                            Esir::ConstantDouble {
                                target,
                                value: value as f64,
                            },
                        );
                    } else {
                        graph.set_operand_type(target, Type::INT32);
                    }
                }

                Esir::ToNumber { target, source } => {
                    let ty = if graph.operand_type(source).is_int32_type() {
                        Type::INT32
                    } else {
                        Type::DOUBLE
                    };
                    graph.set_operand_type(target, ty);
                }

                Esir::GenericPlus {
                    target,
                    left,
                    right,
                } => {
                    let left_type = graph.operand_type(left);
                    let right_type = graph.operand_type(right);
                    if left_type.is_int32_type() && right_type.is_int32_type() {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::Int32Plus { target, left, right });
                        graph.set_operand_type(target, Type::INT32);
                    } else if left_type.is_number_type() && right_type.is_number_type()
                    {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::DoublePlus { target, left, right });
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else if left_type.is_string_type() || right_type.is_string_type()
                    {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::StringPlus { target, left, right });
                        graph.set_operand_type(target, Type::STRING);
                    } else if left_type.is_undefined_type()
                        || right_type.is_undefined_type()
                    {
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else {
                        return false;
                    }
                }

                Esir::Increment { target, source } | Esir::Decrement { target, source } => {
                    let src = graph.operand_type(source);
                    if src.is_int32_type() {
                        graph.set_operand_type(target, Type::INT32);
                    } else if src.is_double_type() {
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else {
                        return false;
                    }
                }

                Esir::Minus {
                    target,
                    left,
                    right,
                } => {
                    let left_type = graph.operand_type(left);
                    let right_type = graph.operand_type(right);
                    if left_type.is_number_type() && right_type.is_number_type() {
                        if left_type.is_int32_type() && right_type.is_int32_type() {
                            graph.set_operand_type(target, Type::INT32);
                        } else {
                            graph.set_operand_type(target, Type::DOUBLE);
                        }
                    } else {
                        graph.set_operand_type(target, Type::INT32);
                    }
                }

                Esir::GenericMultiply {
                    target,
                    left,
                    right,
                } => {
                    let left_type = graph.operand_type(left);
                    let right_type = graph.operand_type(right);
                    if left_type.is_int32_type() && right_type.is_int32_type() {
                        // The product can overflow int32; the result is typed
                        // double and the overflow check exits to the
                        // interpreter.
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::Int32Multiply { target, left, right });
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else if left_type.is_number_type() && right_type.is_number_type()
                    {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::DoubleMultiply { target, left, right });
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else {
                        graph.set_operand_type(target, Type::DOUBLE);
                    }
                }

                Esir::GenericDivision {
                    target,
                    left,
                    right,
                } => {
                    let left_type = graph.operand_type(left);
                    let right_type = graph.operand_type(right);
                    if left_type.is_number_type() && right_type.is_number_type() {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::DoubleDivision { target, left, right });
                    }
                    graph.set_operand_type(target, Type::DOUBLE);
                }

                Esir::GenericMod {
                    target,
                    left,
                    right,
                } => {
                    let left_type = graph.operand_type(left);
                    let right_type = graph.operand_type(right);
                    if left_type.is_int32_type() && right_type.is_int32_type() {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::Int32Mod { target, left, right });
                        graph.set_operand_type(target, Type::INT32);
                    } else if left_type.is_number_type() && right_type.is_number_type()
                    {
                        graph
                            .block_mut(block_id)
                            .replace(j, Esir::DoubleMod { target, left, right });
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else {
                        graph.set_operand_type(target, Type::DOUBLE);
                    }
                }

                // Specialized arithmetic re-states its contract on a second
                // pass; inference is a fixed point.
                Esir::Int32Plus { target, .. } | Esir::Int32Mod { target, .. } => {
                    graph.set_operand_type(target, Type::INT32);
                }
                Esir::DoublePlus { target, .. }
                | Esir::DoubleMultiply { target, .. }
                | Esir::Int32Multiply { target, .. }
                | Esir::DoubleDivision { target, .. }
                | Esir::DoubleMod { target, .. } => {
                    graph.set_operand_type(target, Type::DOUBLE);
                }
                Esir::StringPlus { target, .. } => {
                    graph.set_operand_type(target, Type::STRING);
                }

                Esir::BitwiseAnd { target, .. }
                | Esir::BitwiseOr { target, .. }
                | Esir::BitwiseXor { target, .. }
                | Esir::BitwiseNot { target, .. }
                | Esir::LeftShift { target, .. }
                | Esir::SignedRightShift { target, .. }
                | Esir::UnsignedRightShift { target, .. } => {
                    graph.set_operand_type(target, Type::INT32);
                }

                Esir::LogicalNot { target, .. }
                | Esir::Equal { target, .. }
                | Esir::NotEqual { target, .. }
                | Esir::StrictEqual { target, .. }
                | Esir::NotStrictEqual { target, .. }
                | Esir::GreaterThan { target, .. }
                | Esir::GreaterThanOrEqual { target, .. }
                | Esir::LessThan { target, .. }
                | Esir::LessThanOrEqual { target, .. } => {
                    graph.set_operand_type(target, Type::BOOLEAN);
                }

                Esir::UnaryMinus { target, source } => {
                    let src = graph.operand_type(source);
                    if src.is_int32_type() {
                        graph.set_operand_type(target, Type::INT32);
                    } else if src.is_double_type() {
                        graph.set_operand_type(target, Type::DOUBLE);
                    } else {
                        return false;
                    }
                }

                Esir::TypeOf { target, .. } => {
                    graph.set_operand_type(target, Type::SIMPLE_STRING);
                }

                Esir::CreateFunction { target, .. } => {
                    if target >= 0 {
                        graph.set_operand_type(target, Type::FUNCTION_OBJECT);
                    }
                }

                Esir::Jump { .. }
                | Esir::Branch { .. }
                | Esir::CallJs { .. }
                | Esir::CallNewJs { .. }
                | Esir::Return { .. }
                | Esir::ReturnWithValue { .. }
                | Esir::LoopStart { .. }
                | Esir::Throw { .. } => {}

                Esir::Move { target, source } => {
                    let src = graph.operand_type(source);
                    graph.set_operand_type(target, src);
                }

                Esir::GetEnumerableObjectData { target, .. } => {
                    graph.set_operand_type(target, Type::OBJECT);
                }
                Esir::GetEnumerateKey { .. } => {}
                Esir::CheckIfKeyIsLast { target, .. } => {
                    graph.set_operand_type(target, Type::BOOLEAN);
                }

                // Profiled loads carry their interpreter-observed type.
                Esir::GetThis { .. }
                | Esir::GetArgument { .. }
                | Esir::GetVar { .. }
                | Esir::GetVarGeneric { .. }
                | Esir::GetGlobalVarGeneric { .. } => {}

                Esir::GetObject {
                    target,
                    object,
                    property,
                } => {
                    let object_type = graph.operand_type(object);
                    let property_type = graph.operand_type(property);
                    if object_type.is_array_object_type() {
                        if property_type.is_int32_type() || property_type.is_double_type()
                        {
                            graph.block_mut(block_id).replace(
                                j,
                                Esir::GetArrayObject {
                                    target,
                                    object,
                                    property,
                                },
                            );
                        }
                    } else if object_type.is_string_type()
                        && property_type.is_int32_type()
                    {
                        graph.block_mut(block_id).replace(
                            j,
                            Esir::GetStringByIndex {
                                target,
                                object,
                                property,
                            },
                        );
                    }
                }

                Esir::SetObject {
                    target,
                    object,
                    property,
                    source,
                } => {
                    let src = graph.operand_type(source);
                    graph.set_operand_type(target, src);
                    let object_type = graph.operand_type(object);
                    let property_type = graph.operand_type(property);
                    if object_type.is_array_object_type()
                        && (property_type.is_int32_type()
                            || property_type.is_double_type())
                    {
                        graph.block_mut(block_id).replace(
                            j,
                            Esir::SetArrayObject {
                                target,
                                object,
                                property,
                                source,
                            },
                        );
                    }
                }

                Esir::SetObjectPreComputed { target, source, .. } => {
                    let src = graph.operand_type(source);
                    graph.set_operand_type(target, src);
                }

                Esir::GetArrayObject { .. }
                | Esir::GetStringByIndex { .. }
                | Esir::GetObjectPreComputed { .. }
                | Esir::GetArrayObjectPreComputed { .. }
                | Esir::SetArrayObject { .. } => {}

                Esir::SetVar { target, source, .. }
                | Esir::SetVarGeneric { target, source, .. }
                | Esir::SetGlobalVarGeneric { target, source, .. } => {
                    let src = graph.operand_type(source);
                    graph.set_operand_type(target, src);
                }

                Esir::CreateObject { target, .. } => {
                    graph.set_operand_type(target, Type::OBJECT);
                }
                Esir::CreateArray { target, .. } => {
                    graph.set_operand_type(target, Type::ARRAY_OBJECT);
                }
                Esir::InitObject { .. } | Esir::InitArrayObject { .. } => {}

                Esir::AllocPhi { .. } => {}
                Esir::StorePhi { target, source, .. } => {
                    let src = graph.operand_type(source);
                    graph.set_operand_type(target, src);
                }
                Esir::LoadPhi {
                    target,
                    source0,
                    source1,
                    ..
                } => {
                    let t0 = graph.operand_type(source0);
                    let t1 = graph.operand_type(source1);
                    if t0 != t1 {
                        return false;
                    }
                    graph.set_operand_type(target, t0);
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::generate_ir_from_code_block;
    use escargot_compiler::ast::*;
    use escargot_compiler::generator::compile_program;
    use escargot_core::string_table::{StringId, StringTable};
    use escargot_core::value::Value;

    fn num(n: f64) -> Expr {
        Expr::Literal(Literal::Number(n))
    }

    fn int_graph(body: Vec<Stmt>, strings: &StringTable) -> EsGraph {
        let decl = Stmt::FunctionDecl {
            name: StringId(0),
            params: vec![],
            body,
        };
        let program = compile_program(&[decl], strings).unwrap();
        generate_ir_from_code_block(&program.blocks[0]).expect("graph")
    }

    #[test]
    fn int_plus_int_specializes_to_int32_plus() {
        let strings = {
            let mut s = StringTable::new();
            s.intern("f");
            s
        };
        let mut graph = int_graph(
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(num(1.0)),
                right: Box::new(num(2.0)),
            }))],
            &strings,
        );
        assert!(run(&mut graph));
        let names: Vec<&str> = graph.instructions().map(|ir| ir.name()).collect();
        assert!(names.contains(&"Int32Plus"));
        assert!(!names.contains(&"GenericPlus"));
    }

    #[test]
    fn int_times_int_is_typed_double_for_the_overflow_exit() {
        let strings = {
            let mut s = StringTable::new();
            s.intern("f");
            s
        };
        let mut graph = int_graph(
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Multiply,
                left: Box::new(num(3.0)),
                right: Box::new(num(4.0)),
            }))],
            &strings,
        );
        assert!(run(&mut graph));
        let multiply = graph
            .instructions()
            .find(|ir| ir.name() == "Int32Multiply")
            .expect("specialized multiply");
        assert!(graph.operand_type(multiply.target()).is_double_type());
    }

    #[test]
    fn mixed_plus_becomes_double_plus() {
        let strings = {
            let mut s = StringTable::new();
            s.intern("f");
            s
        };
        let mut graph = int_graph(
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(num(1.5)),
                right: Box::new(num(2.0)),
            }))],
            &strings,
        );
        assert!(run(&mut graph));
        let names: Vec<&str> = graph.instructions().map(|ir| ir.name()).collect();
        assert!(names.contains(&"DoublePlus"));
    }

    #[test]
    fn string_concat_specializes_to_string_plus() {
        let mut strings = StringTable::new();
        strings.intern("f");
        let hello = strings.intern("hello");
        let mut graph = int_graph(
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(Expr::Literal(Literal::String(hello))),
                right: Box::new(num(2.0)),
            }))],
            &strings,
        );
        assert!(run(&mut graph));
        let plus = graph
            .instructions()
            .find(|ir| ir.name() == "StringPlus")
            .expect("string plus");
        assert!(graph.operand_type(plus.target()).is_string_type());
    }

    #[test]
    fn comparisons_and_logic_are_boolean() {
        let strings = {
            let mut s = StringTable::new();
            s.intern("f");
            s
        };
        let mut graph = int_graph(
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::LessThanOrEqual,
                left: Box::new(num(1.0)),
                right: Box::new(num(2.0)),
            }))],
            &strings,
        );
        assert!(run(&mut graph));
        let cmp = graph
            .instructions()
            .find(|ir| ir.name() == "LessThanOrEqual")
            .unwrap();
        assert!(graph.operand_type(cmp.target()).is_boolean_type());
    }

    #[test]
    fn inference_is_a_fixed_point() {
        let strings = {
            let mut s = StringTable::new();
            s.intern("f");
            s
        };
        let mut graph = int_graph(
            vec![
                Stmt::VarDecl(vec![(StringId(0), Some(num(2.0)))]),
                Stmt::Return(Some(Expr::Binary {
                    op: BinaryOp::Multiply,
                    left: Box::new(Expr::Binary {
                        op: BinaryOp::Plus,
                        left: Box::new(num(1.0)),
                        right: Box::new(num(2.0)),
                    }),
                    right: Box::new(num(4.0)),
                })),
            ],
            &strings,
        );
        assert!(run(&mut graph));
        let first = graph.operand_types().to_vec();
        assert!(run(&mut graph));
        assert_eq!(graph.operand_types(), &first[..]);
    }

    #[test]
    fn load_phi_with_disagreeing_sources_abandons_the_compile() {
        let mut graph = EsGraph::new(4);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(entry, Esir::ConstantInt { target: 0, value: 1 });
        graph.push_instruction(
            entry,
            Esir::ConstantString {
                target: 1,
                value: StringId(0),
            },
        );
        graph.set_operand_type(0, escargot_core::types::Type::INT32);
        graph.set_operand_type(1, escargot_core::types::Type::STRING);
        graph.push_instruction(entry, Esir::AllocPhi { target: 2 });
        graph.push_instruction(
            entry,
            Esir::LoadPhi {
                target: 3,
                phi: 2,
                source0: 0,
                source1: 1,
            },
        );
        assert!(!run(&mut graph));
    }

    #[test]
    fn load_phi_with_matching_sources_propagates() {
        let mut graph = EsGraph::new(4);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(entry, Esir::ConstantInt { target: 0, value: 1 });
        graph.push_instruction(entry, Esir::ConstantInt { target: 1, value: 2 });
        graph.set_operand_type(0, escargot_core::types::Type::INT32);
        graph.set_operand_type(1, escargot_core::types::Type::INT32);
        graph.push_instruction(entry, Esir::AllocPhi { target: 2 });
        graph.push_instruction(
            entry,
            Esir::StorePhi {
                target: 2,
                phi: 2,
                source: 0,
            },
        );
        graph.push_instruction(
            entry,
            Esir::LoadPhi {
                target: 3,
                phi: 2,
                source0: 0,
                source1: 1,
            },
        );
        assert!(run(&mut graph));
        assert!(graph.operand_type(3).is_int32_type());
    }

    #[test]
    fn double_typed_int_constant_is_rematerialized() {
        let mut graph = EsGraph::new(1);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(entry, Esir::ConstantInt { target: 0, value: 7 });
        graph.set_operand_type(0, escargot_core::types::Type::DOUBLE);
        assert!(run(&mut graph));
        let ir = graph.instructions().next().unwrap().clone();
        assert_eq!(
            ir,
            Esir::ConstantDouble {
                target: 0,
                value: 7.0
            }
        );
    }

    #[test]
    fn increment_of_non_number_abandons() {
        let mut graph = EsGraph::new(2);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(
            entry,
            Esir::ConstantString {
                target: 0,
                value: StringId(0),
            },
        );
        graph.set_operand_type(0, escargot_core::types::Type::STRING);
        graph.push_instruction(entry, Esir::Increment { target: 1, source: 0 });
        assert!(!run(&mut graph));
    }

    #[test]
    fn typeof_is_simple_string() {
        let mut graph = EsGraph::new(2);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(entry, Esir::ConstantInt { target: 0, value: 1 });
        graph.set_operand_type(0, escargot_core::types::Type::INT32);
        graph.push_instruction(entry, Esir::TypeOf { target: 1, source: 0 });
        assert!(run(&mut graph));
        assert!(graph.operand_type(1).is_string_type());
    }

    #[test]
    fn set_object_on_array_profile_specializes() {
        let mut graph = EsGraph::new(4);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(
            entry,
            Esir::GetVarGeneric {
                target: 0,
                name: StringId(0),
            },
        );
        graph.set_operand_type(0, escargot_core::types::Type::ARRAY_OBJECT);
        graph.push_instruction(entry, Esir::ConstantInt { target: 1, value: 0 });
        graph.set_operand_type(1, escargot_core::types::Type::INT32);
        graph.push_instruction(entry, Esir::ConstantInt { target: 2, value: 9 });
        graph.set_operand_type(2, escargot_core::types::Type::INT32);
        graph.push_instruction(
            entry,
            Esir::SetObject {
                target: 3,
                object: 0,
                property: 1,
                source: 2,
            },
        );
        assert!(run(&mut graph));
        let names: Vec<&str> = graph.instructions().map(|ir| ir.name()).collect();
        assert!(names.contains(&"SetArrayObject"));
    }

    #[test]
    fn push_receiver_lowers_to_a_value_constant() {
        // Covered here because the receiver constant must survive inference
        // untouched.
        let mut graph = EsGraph::new(1);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        graph.push_instruction(
            entry,
            Esir::ConstantEsValue {
                target: 0,
                value: Value::Undefined,
            },
        );
        assert!(run(&mut graph));
        assert!(graph.operand_type(0).is_bottom());
    }
}
