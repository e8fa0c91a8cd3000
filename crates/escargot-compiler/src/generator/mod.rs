//! The bytecode generator.
//!
//! [`compile_program`] compiles a top-level statement list (and every
//! function it contains, recursively) into a [`CompiledProgram`]. Each
//! function gets one [`FunctionGenerator`] pass:
//!
//! 1. a hoisting pre-scan assigns frame slots to parameters and `var`
//!    declarations, so identifier access compiles to `GetByIndex`/
//!    `PutByIndex` wherever possible (global code has no slots; everything
//!    goes by name);
//! 2. a rough-size pre-pass reserves the code buffer;
//! 3. the recursive emission walk produces the byte stream, the SSA table,
//!    and the side tables, resolving break/continue through
//!    [`GenerateContext`].

mod expr;
mod stmt;

use std::rc::Rc;

use escargot_core::string_table::{StringId, StringTable};
use rustc_hash::FxHashMap;

use crate::ast::{ForInit, Stmt};
use crate::bytecode::code_block::CodeBlock;
use crate::context::GenerateContext;
use crate::emit::ByteCodeEmitter;
use crate::error::CompileError;

/// A compiled program: every code block it defines, entry last. The
/// `CreateFunction` operands index into `blocks`.
#[derive(Debug)]
pub struct CompiledProgram {
    pub blocks: Vec<Rc<CodeBlock>>,
    pub entry: u32,
}

impl CompiledProgram {
    pub fn entry_block(&self) -> &Rc<CodeBlock> {
        &self.blocks[self.entry as usize]
    }
}

pub fn compile_program(
    body: &[Stmt],
    strings: &StringTable,
) -> Result<CompiledProgram, CompileError> {
    let mut blocks = Vec::new();
    let entry = FunctionGenerator::compile(None, Vec::new(), body, true, &mut blocks, strings)?;
    blocks.push(Rc::new(entry));
    let entry = (blocks.len() - 1) as u32;
    Ok(CompiledProgram { blocks, entry })
}

pub(crate) struct FunctionGenerator<'a> {
    pub(crate) emitter: ByteCodeEmitter,
    /// name -> frame slot; empty for global code.
    pub(crate) locals: FxHashMap<StringId, u16>,
    pub(crate) is_global: bool,
    pub(crate) blocks: &'a mut Vec<Rc<CodeBlock>>,
    pub(crate) strings: &'a StringTable,
}

impl<'a> FunctionGenerator<'a> {
    pub(crate) fn compile(
        name: Option<StringId>,
        params: Vec<StringId>,
        body: &[Stmt],
        is_global: bool,
        blocks: &'a mut Vec<Rc<CodeBlock>>,
        strings: &'a StringTable,
    ) -> Result<CodeBlock, CompileError> {
        let rough_words = 2 + body
            .iter()
            .map(|s| s.rough_code_size_in_words())
            .sum::<usize>();

        let mut locals = FxHashMap::default();
        if !is_global {
            for (i, &p) in params.iter().enumerate() {
                let slot = u16::try_from(i).map_err(|_| CompileError::TooManyLocals)?;
                locals.entry(p).or_insert(slot);
            }
            let mut hoisted = Vec::new();
            collect_hoisted_names(body, &mut hoisted);
            for name in hoisted {
                let next = locals.len();
                let slot = u16::try_from(next).map_err(|_| CompileError::TooManyLocals)?;
                locals.entry(name).or_insert(slot);
            }
        }
        let local_count =
            u16::try_from(locals.len()).map_err(|_| CompileError::TooManyLocals)?;

        let mut generator = FunctionGenerator {
            emitter: ByteCodeEmitter::with_rough_size(rough_words),
            locals,
            is_global,
            blocks,
            strings,
        };

        let mut ctx = GenerateContext::new();
        for stmt in body {
            generator.generate_statement(stmt, &mut ctx)?;
        }
        ctx.ensure_drained(strings)?;

        if !is_global {
            generator.emitter.emit_return();
        }
        generator.emitter.emit_end();

        Ok(generator.emitter.finish(params, local_count, is_global, name))
    }

    pub(crate) fn local_slot(&self, name: StringId) -> Option<u16> {
        self.locals.get(&name).copied()
    }
}

/// Collect names that get frame slots: `var` declarations and function
/// declarations, through every nested statement but not into nested
/// functions.
fn collect_hoisted_names(body: &[Stmt], out: &mut Vec<StringId>) {
    for stmt in body {
        match stmt {
            Stmt::VarDecl(decls) => out.extend(decls.iter().map(|(n, _)| *n)),
            Stmt::FunctionDecl { name, .. } => out.push(*name),
            Stmt::Block(stmts) => collect_hoisted_names(stmts, out),
            Stmt::If {
                consequent,
                alternate,
                ..
            } => {
                collect_hoisted_names(std::slice::from_ref(consequent), out);
                if let Some(alt) = alternate {
                    collect_hoisted_names(std::slice::from_ref(alt), out);
                }
            }
            Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::Labeled { body, .. } => {
                collect_hoisted_names(std::slice::from_ref(body), out)
            }
            Stmt::For { init, body, .. } => {
                if let Some(ForInit::VarDecl(decls)) = init {
                    out.extend(decls.iter().map(|(n, _)| *n));
                }
                collect_hoisted_names(std::slice::from_ref(body), out);
            }
            Stmt::ForIn { body, .. } => {
                collect_hoisted_names(std::slice::from_ref(body), out)
            }
            Stmt::Switch {
                cases_before_default,
                default,
                cases_after_default,
                ..
            } => {
                for case in cases_before_default.iter().chain(cases_after_default) {
                    collect_hoisted_names(&case.body, out);
                }
                if let Some(stmts) = default {
                    collect_hoisted_names(stmts, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::bytecode::opcode::Opcode;
    use crate::emit::ROUGH_WORD_BYTES;
    use escargot_core::value::Value;

    fn num(n: f64) -> Expr {
        Expr::Literal(Literal::Number(n))
    }

    fn ident(strings: &mut StringTable, name: &str) -> Expr {
        Expr::Identifier(strings.intern(name))
    }

    #[test]
    fn expression_statement_pops_its_value() {
        let strings = StringTable::new();
        let program = compile_program(
            &[Stmt::Expression(Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(num(1.0)),
                right: Box::new(num(2.0)),
            })],
            &strings,
        )
        .unwrap();
        let block = program.entry_block();
        block.assert_contains_opcodes(&[
            Opcode::Push,
            Opcode::Push,
            Opcode::Plus,
            Opcode::PopExpressionStatement,
            Opcode::End,
        ]);
        assert_eq!(block.constants, vec![Value::Int32(1), Value::Int32(2)]);
    }

    #[test]
    fn jump_closure_holds_for_loops_and_breaks(){
        let mut strings = StringTable::new();
        let i = strings.intern("i");
        // for (var i = 0; i < 10; i++) { if (i) break; else continue; }
        let body = Stmt::For {
            init: Some(ForInit::VarDecl(vec![(i, Some(num(0.0)))])),
            test: Some(Expr::Binary {
                op: BinaryOp::LessThan,
                left: Box::new(Expr::Identifier(i)),
                right: Box::new(num(10.0)),
            }),
            update: Some(Expr::Update {
                op: UpdateOp::Increment,
                prefix: false,
                target: Box::new(Expr::Identifier(i)),
            }),
            body: Box::new(Stmt::Block(vec![Stmt::If {
                test: Expr::Identifier(i),
                consequent: Box::new(Stmt::Break),
                alternate: Some(Box::new(Stmt::Continue)),
            }])),
        };
        let program = compile_program(&[body], &strings).unwrap();
        assert!(program.entry_block().unresolved_jumps().is_empty());
    }

    #[test]
    fn rough_size_bounds_emitted_bytes() {
        let mut strings = StringTable::new();
        let keys = strings.intern("keys");
        let k = strings.intern("k");
        let x = strings.intern("x");
        let push = strings.intern("push");

        let programs: Vec<Vec<Stmt>> = vec![
            vec![Stmt::Expression(num(1.5))],
            vec![Stmt::Expression(Expr::Assign {
                target: Box::new(Expr::Member {
                    object: Box::new(ident(&mut strings, "o")),
                    key: MemberKey::Named(x),
                }),
                op: Some(BinaryOp::Plus),
                value: Box::new(num(2.0)),
            })],
            vec![Stmt::ForIn {
                left: Box::new(Expr::Identifier(k)),
                right: Expr::Object(vec![(x, num(1.0))]),
                body: Box::new(Stmt::Expression(Expr::Call {
                    callee: Box::new(Expr::Member {
                        object: Box::new(Expr::Identifier(keys)),
                        key: MemberKey::Named(push),
                    }),
                    args: vec![Expr::Identifier(k)],
                })),
            }],
            vec![Stmt::Switch {
                discriminant: ident(&mut strings, "v"),
                cases_before_default: vec![SwitchCase {
                    test: num(1.0),
                    body: vec![Stmt::Break],
                }],
                default: Some(vec![Stmt::Empty]),
                cases_after_default: vec![SwitchCase {
                    test: num(2.0),
                    body: vec![Stmt::Break],
                }],
            }],
        ];

        for body in &programs {
            let words = 2 + body
                .iter()
                .map(|s| s.rough_code_size_in_words())
                .sum::<usize>();
            let program = compile_program(body, &strings).unwrap();
            let emitted = program.entry_block().code.len();
            assert!(
                emitted <= words * ROUGH_WORD_BYTES,
                "rough estimate {words} words did not cover {emitted} bytes"
            );
        }
    }

    #[test]
    fn function_params_and_vars_get_slots() {
        let mut strings = StringTable::new();
        let f = strings.intern("f");
        let a = strings.intern("a");
        let s = strings.intern("s");
        let program = compile_program(
            &[Stmt::FunctionDecl {
                name: f,
                params: vec![a],
                body: vec![
                    Stmt::VarDecl(vec![(s, Some(num(0.0)))]),
                    Stmt::Return(Some(Expr::Binary {
                        op: BinaryOp::Plus,
                        left: Box::new(Expr::Identifier(a)),
                        right: Box::new(Expr::Identifier(s)),
                    })),
                ],
            }],
            &strings,
        )
        .unwrap();
        // Entry is last; the function body is the other block.
        assert_eq!(program.blocks.len(), 2);
        let func = &program.blocks[0];
        assert_eq!(func.params, vec![a]);
        assert_eq!(func.local_count, 2);
        func.assert_contains_opcodes(&[
            Opcode::GetByIndex,
            Opcode::GetByIndex,
            Opcode::Plus,
            Opcode::ReturnFunctionWithValue,
        ]);
    }

    #[test]
    fn stray_break_is_rejected() {
        let strings = StringTable::new();
        let err = compile_program(&[Stmt::Break], &strings).unwrap_err();
        assert_eq!(err, CompileError::StrayBreak);
    }

    #[test]
    fn unresolved_label_is_rejected() {
        let mut strings = StringTable::new();
        let lbl = strings.intern("missing");
        let err = compile_program(
            &[Stmt::While {
                test: Expr::Literal(Literal::Boolean(true)),
                body: Box::new(Stmt::BreakLabel(lbl)),
            }],
            &strings,
        )
        .unwrap_err();
        assert_eq!(err, CompileError::UnresolvedLabel("missing".into()));
    }
}
