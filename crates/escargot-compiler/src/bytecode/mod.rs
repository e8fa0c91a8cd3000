//! The bytecode ISA and compiled-function containers.

pub mod code_block;
pub mod opcode;

pub use code_block::{CodeBlock, ConstantPool, SsaTriple};
pub use opcode::{JUMP_SENTINEL, Opcode};
