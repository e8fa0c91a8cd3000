//! Escargot core: the value model and runtime substrate.
//!
//! This crate holds everything the bytecode generator, the interpreter, and
//! the JIT middle-end share:
//!
//! - [`value::Value`]: the tagged runtime value
//! - [`string_table`]: interned strings and the well-known atoms
//! - [`heap`]: the generational cell arena
//! - [`shape`]: hidden classes and their transition tree
//! - [`object`]: heap objects, fast-mode arrays, functions
//! - [`ic`]: per-site inline caches
//! - [`types`]: the type lattice and profile slots
//! - [`error`]: error kinds, the message catalog, thrown values
//! - [`runtime`]: the runtime operations (conversions, member access,
//!   operators, enumeration)

pub mod error;
pub mod heap;
pub mod ic;
pub mod object;
pub mod runtime;
pub mod shape;
pub mod string_table;
pub mod types;
pub mod value;

pub use error::{ErrorKind, Thrown};
pub use heap::{CellKind, Heap, HeapRef};
pub use ic::PropertyCache;
pub use object::{
    ArrayStorage, Builtin, EnumerationData, FunctionData, FunctionKind, ObjectFlags,
    ObjectKind, ScriptObject,
};
pub use runtime::Runtime;
pub use shape::{PropertyFlags, ShapeArena, ShapeId};
pub use string_table::{ASCII_TABLE_SIZE, Atoms, StringId, StringTable};
pub use types::{Type, TypeProfile};
pub use value::Value;
