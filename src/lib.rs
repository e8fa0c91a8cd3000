//! Escargot: a lightweight ECMAScript execution core.
//!
//! The pipeline: an embedder-built AST is compiled to stack-machine
//! bytecode ([`escargot_compiler`]), interpreted with type profiling and
//! inline caches ([`interp`] over [`escargot_core`]), and — once a code
//! block runs hot — lifted into a typed SSA graph and specialized by the
//! JIT middle-end ([`escargot_jit`]). Machine-code emission is an external
//! collaborator; the typed graph is this crate's hand-off point, and
//! execution always has the interpreter to fall back to.
//!
//! ```
//! use escargot::VmInstance;
//! use escargot_compiler::ast::{Expr, Literal, Stmt};
//!
//! let mut vm = VmInstance::new();
//! let result = vm
//!     .evaluate(&[Stmt::Expression(Expr::Literal(Literal::Number(41.0)))])
//!     .unwrap();
//! assert_eq!(result, escargot_core::Value::Int32(41));
//! ```

pub mod interp;
pub mod vm;

pub use escargot_compiler as compiler;
pub use escargot_core as core;
pub use escargot_jit as jit;

pub use escargot_core::{Thrown, Value};
pub use vm::VmInstance;
