//! Escargot JIT middle-end.
//!
//! Lifts hot bytecode into a typed SSA graph and specializes it:
//!
//! - [`frontend::generate_ir_from_code_block`]: bytecode plus interpreter
//!   profiles to an [`graph::EsGraph`] of [`ir::Esir`] instructions, or
//!   `None` when the tier cannot express the block (bailing is lossless)
//! - [`type_inference::run`]: the forward specialization pass; `false`
//!   abandons the compile and leaves the interpreter in charge
//!
//! The machine-code back-end is an external collaborator: it consumes a
//! graph whose operand-type table is fully populated, with an OSR-exit
//! point at every speculative instruction.

pub mod frontend;
pub mod graph;
pub mod ir;
pub mod type_inference;

pub use frontend::generate_ir_from_code_block;
pub use graph::{BlockId, EsBasicBlock, EsGraph};
pub use ir::Esir;

/// Run the whole middle-end for one code block: front-end then inference.
/// `None` means "keep interpreting".
pub fn compile(code_block: &escargot_compiler::CodeBlock) -> Option<EsGraph> {
    let mut graph = generate_ir_from_code_block(code_block)?;
    if type_inference::run(&mut graph) {
        Some(graph)
    } else {
        None
    }
}
