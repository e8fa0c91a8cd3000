//! The VM instance.
//!
//! [`VmInstance`] owns the runtime state (heap, shapes, strings), the
//! global object with its builtin constructors, and the loaded code-block
//! table. It drives the tiering policy: every code block counts its
//! interpreter executions, and on crossing the hot threshold the JIT
//! middle-end is asked for a typed graph, which is cached for the code
//! generator (and for inspection). There is no native back-end here, so
//! execution continues in the interpreter either way.

use std::rc::Rc;

use escargot_compiler::ast::Stmt;
use escargot_compiler::error::CompileError;
use escargot_compiler::generator::{CompiledProgram, compile_program};
use escargot_compiler::CodeBlock;
use escargot_core::error::{ErrorKind, Thrown, messages};
use escargot_core::object::{ArrayStorage, Builtin, FunctionData, FunctionKind, ScriptObject};
use escargot_core::runtime::Runtime;
use escargot_core::shape::{PropertyFlags, ShapeArena};
use escargot_core::value::Value;
use escargot_core::HeapRef;
use escargot_jit::EsGraph;
use rustc_hash::FxHashMap;

use crate::interp;

/// Interpreter executions before a code block is offered to the JIT.
pub const DEFAULT_JIT_THRESHOLD: u32 = 8;

/// Script call depth bound; exceeding it throws RangeError.
pub const MAX_CALL_DEPTH: usize = 512;

pub struct VmInstance {
    pub runtime: Runtime,
    pub global: HeapRef,
    pub code_blocks: Vec<Rc<CodeBlock>>,
    pub object_prototype: HeapRef,
    pub array_prototype: HeapRef,
    pub function_prototype: HeapRef,
    pub jit_threshold: u32,
    pub(crate) call_depth: usize,
    /// The receiver a member expression most recently resolved through,
    /// consumed by `PushFunctionCallReceiver`.
    pub(crate) last_member_object: Value,
    jit_graphs: FxHashMap<u32, EsGraph>,
}

impl Default for VmInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl VmInstance {
    pub fn new() -> Self {
        let mut runtime = Runtime::new();
        let object_prototype = runtime.create_ordinary_object(Value::Null);
        let function_prototype =
            runtime.create_ordinary_object(Value::Ptr(object_prototype));
        let array_prototype = runtime.create_ordinary_object(Value::Ptr(object_prototype));
        let global = runtime.create_ordinary_object(Value::Ptr(object_prototype));

        let mut vm = Self {
            runtime,
            global,
            code_blocks: Vec::new(),
            object_prototype,
            array_prototype,
            function_prototype,
            jit_threshold: DEFAULT_JIT_THRESHOLD,
            call_depth: 0,
            last_member_object: Value::Undefined,
            jit_graphs: FxHashMap::default(),
        };
        vm.install_builtins();
        vm
    }

    fn install_builtins(&mut self) {
        let array_proto = Value::Ptr(self.array_prototype);
        self.install_constructor("Array", Builtin::Array, Some(array_proto));
        self.install_constructor("String", Builtin::String, None);
        self.install_constructor("Boolean", Builtin::Boolean, None);
        self.install_constructor("Number", Builtin::Number, None);
        for kind in [
            ErrorKind::Error,
            ErrorKind::ReferenceError,
            ErrorKind::TypeError,
            ErrorKind::SyntaxError,
            ErrorKind::RangeError,
        ] {
            self.install_constructor(kind.name(), Builtin::Error(kind), None);
        }
    }

    fn install_constructor(
        &mut self,
        name: &str,
        builtin: Builtin,
        prototype: Option<Value>,
    ) {
        let name_id = self.runtime.strings.intern(name);
        let prototype = prototype.unwrap_or_else(|| {
            Value::Ptr(
                self.runtime
                    .create_ordinary_object(Value::Ptr(self.object_prototype)),
            )
        });
        let ctor = self.runtime.heap.allocate(ScriptObject::new_function(
            ShapeArena::root(),
            Value::Ptr(self.function_prototype),
            FunctionData {
                kind: FunctionKind::Builtin(builtin),
                name: Some(name_id),
            },
        ));
        let prototype_atom = self.runtime.atoms.prototype;
        self.runtime
            .define_own_property(ctor, prototype_atom, PropertyFlags::data_default(), prototype);
        self.runtime.define_own_property(
            self.global,
            name_id,
            PropertyFlags::data_default(),
            Value::Ptr(ctor),
        );
    }

    // ========================================================================
    // Loading and running
    // ========================================================================

    /// Append a compiled program's blocks to the table, rebasing their
    /// `CreateFunction` operands. Returns the entry block's index.
    pub fn load(&mut self, program: CompiledProgram) -> u32 {
        let base = self.code_blocks.len() as u32;
        let entry = base + program.entry;
        for block in program.blocks {
            block.block_offset.set(base);
            self.code_blocks.push(block);
        }
        entry
    }

    pub fn compile(&mut self, body: &[Stmt]) -> Result<u32, CompileError> {
        let program = compile_program(body, &self.runtime.strings)?;
        Ok(self.load(program))
    }

    /// Run a loaded block as top-level code.
    pub fn run(&mut self, entry: u32) -> Result<Value, Thrown> {
        interp::execute(self, entry, Value::Ptr(self.global), &[])
    }

    /// Compile and run in one step. Compile errors surface as thrown
    /// SyntaxError objects, the way a host `eval` reports them.
    pub fn evaluate(&mut self, body: &[Stmt]) -> Result<Value, Thrown> {
        match self.compile(body) {
            Ok(entry) => self.run(entry),
            Err(_) => Err(self
                .runtime
                .throw_error(ErrorKind::SyntaxError, "program failed to compile")),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    pub fn call_function(
        &mut self,
        callee: Value,
        receiver: Value,
        args: &[Value],
    ) -> Result<Value, Thrown> {
        if !callee.is_function_object() {
            return Err(self.runtime.type_error(messages::CALL_NOT_FUNCTION));
        }
        let data = self
            .runtime
            .heap
            .cell(callee.as_ptr())
            .function()
            .cloned()
            .expect("function cell");
        match data.kind {
            FunctionKind::Script { block } => {
                interp::execute(self, block, receiver, args)
            }
            FunctionKind::Builtin(builtin) => self.call_builtin(builtin, args),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: &[Value]) -> Result<Value, Thrown> {
        match builtin {
            Builtin::Array => {
                let storage = self.array_args_to_storage(args)?;
                let proto = Value::Ptr(self.array_prototype);
                Ok(Value::Ptr(self.runtime.create_array(storage, proto)))
            }
            Builtin::String => {
                let v = args.first().copied().unwrap_or(Value::Str(
                    self.runtime.atoms.empty,
                ));
                Ok(Value::Str(self.runtime.to_string_id(v)))
            }
            Builtin::Boolean => {
                let v = args.first().copied().unwrap_or(Value::Undefined);
                Ok(Value::Boolean(self.runtime.to_boolean(v)))
            }
            Builtin::Number => {
                let v = args.first().copied().unwrap_or(Value::Int32(0));
                let n = self.runtime.to_number(v);
                Ok(Value::from_f64(n))
            }
            Builtin::Error(kind) => Ok(Value::Ptr(self.make_error(kind, args))),
        }
    }

    fn array_args_to_storage(&mut self, args: &[Value]) -> Result<ArrayStorage, Thrown> {
        if args.len() == 1 && args[0].is_number() {
            let n = args[0].as_number();
            let length = n as u32;
            if length as f64 != n {
                return Err(self.runtime.range_error(messages::INVALID_ARRAY_LENGTH));
            }
            Ok(ArrayStorage::with_length(length))
        } else {
            Ok(ArrayStorage::from_values(args.to_vec()))
        }
    }

    fn make_error(&mut self, kind: ErrorKind, args: &[Value]) -> HeapRef {
        let message = match args.first() {
            Some(&v) if !v.is_undefined() => {
                let id = self.runtime.to_string_id(v);
                self.runtime.strings.resolve(id).to_string()
            }
            _ => String::new(),
        };
        self.runtime.create_error_object(kind, &message, Value::Null)
    }

    /// `new callee(args)`: allocate the receiver by constructor identity,
    /// wire its prototype from the constructor's `prototype` property, run
    /// the body, and keep the receiver unless the call returned an object.
    pub fn construct(&mut self, callee: Value, args: &[Value]) -> Result<Value, Thrown> {
        if !callee.is_function_object() {
            return Err(self.runtime.type_error(messages::NEW_NOT_FUNCTION));
        }
        let data = self
            .runtime
            .heap
            .cell(callee.as_ptr())
            .function()
            .cloned()
            .expect("function cell");

        let receiver = match data.kind {
            FunctionKind::Builtin(Builtin::Array) => {
                let storage = self.array_args_to_storage(args)?;
                self.runtime.create_array(storage, Value::Null)
            }
            FunctionKind::Builtin(Builtin::Error(kind)) => self.make_error(kind, args),
            FunctionKind::Builtin(_) => self.runtime.create_ordinary_object(Value::Null),
            FunctionKind::Script { .. } => {
                self.runtime.create_ordinary_object(Value::Null)
            }
        };

        let proto = self.runtime.get_property(callee, self.runtime.atoms.prototype);
        let proto = if proto.is_object() {
            proto
        } else {
            Value::Ptr(
                self.runtime
                    .create_ordinary_object(Value::Ptr(self.object_prototype)),
            )
        };
        self.runtime.heap.cell_mut(receiver).proto = proto;

        if let FunctionKind::Script { block } = data.kind {
            let result = interp::execute(self, block, Value::Ptr(receiver), args)?;
            if result.is_object() {
                return Ok(result);
            }
        }
        Ok(Value::Ptr(receiver))
    }

    // ========================================================================
    // Tiering
    // ========================================================================

    /// Called by the interpreter when a block crosses the hot threshold.
    /// Bail-outs are remembered as absent entries; re-profiling may change
    /// the outcome on a later call, so only a successful graph is cached.
    pub(crate) fn tier_up(&mut self, block_index: u32) {
        if self.jit_graphs.contains_key(&block_index) {
            return;
        }
        let block = self.code_blocks[block_index as usize].clone();
        if let Some(graph) = escargot_jit::compile(&block) {
            self.jit_graphs.insert(block_index, graph);
        }
    }

    /// The typed graph for a block, when the middle-end produced one.
    pub fn jit_graph(&self, block_index: u32) -> Option<&EsGraph> {
        self.jit_graphs.get(&block_index)
    }

    /// Collect garbage, rooting the global object and the values the caller
    /// still holds.
    pub fn collect_garbage(&mut self, extra_roots: &[Value]) {
        let mut roots = vec![
            Value::Ptr(self.global),
            Value::Ptr(self.object_prototype),
            Value::Ptr(self.array_prototype),
            Value::Ptr(self.function_prototype),
            self.last_member_object,
        ];
        roots.extend_from_slice(extra_roots);
        self.runtime.heap.collect(&roots);
    }
}
