//! The bytecode interpreter.
//!
//! Direct dispatch over the byte buffer of one code block. Each frame owns
//! its operand stack, temp stack, and slot vector; the environment beyond
//! the frame is the binding map (for `CreateBinding`) and the global
//! object. Hot opcodes feed the type-profile slots the JIT front-end reads,
//! and the precomputed-name member opcodes run through their inline caches.
//!
//! Arithmetic keeps the int32 fast path with overflow spill to double;
//! `+` falls back to ToPrimitive and string concatenation; `%` goes through
//! the dedicated mod operation.

use escargot_compiler::bytecode::opcode::Opcode;
use escargot_core::error::{Thrown, messages};
use escargot_core::object::{FunctionData, FunctionKind, ObjectKind, ScriptObject};
use escargot_core::shape::{PropertyFlags, ShapeArena};
use escargot_core::string_table::StringId;
use escargot_core::value::Value;

use crate::vm::{MAX_CALL_DEPTH, VmInstance};

/// Execute a loaded code block as a call frame.
pub fn execute(
    vm: &mut VmInstance,
    block_index: u32,
    this_value: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    if vm.call_depth >= MAX_CALL_DEPTH {
        return Err(vm.runtime.range_error(messages::CALL_STACK_EXCEEDED));
    }
    vm.call_depth += 1;
    let result = run_frame(vm, block_index, this_value, args);
    vm.call_depth -= 1;
    result
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn peek(stack: &[Value], depth: usize) -> Value {
    stack[stack.len() - 1 - depth]
}

fn lookup_global(vm: &VmInstance, name: StringId) -> Option<Value> {
    let mut cur = Value::Ptr(vm.global);
    while let Value::Ptr(r) = cur {
        if let Some(v) = vm.runtime.get_own_property(r, name) {
            return Some(v);
        }
        cur = vm.runtime.heap.cell(r).proto;
    }
    None
}

fn run_frame(
    vm: &mut VmInstance,
    block_index: u32,
    this_value: Value,
    args: &[Value],
) -> Result<Value, Thrown> {
    let block = vm.code_blocks[block_index as usize].clone();

    let count = block.execute_count.get() + 1;
    block.execute_count.set(count);
    if count == vm.jit_threshold {
        vm.tier_up(block_index);
    }

    let mut slots = vec![Value::Undefined; block.local_count as usize];
    for i in 0..block.params.len().min(args.len()) {
        slots[i] = args[i];
    }
    let mut bindings: rustc_hash::FxHashMap<StringId, Value> =
        rustc_hash::FxHashMap::default();

    let mut stack: Vec<Value> = Vec::new();
    let mut temp: Vec<Value> = Vec::new();
    let mut completion = Value::Undefined;
    let mut ip = 0usize;

    loop {
        let op = Opcode::try_from(block.code[ip]).expect("corrupt bytecode");
        let next = ip + 1 + op.operand_size();

        match op {
            // ================================================================
            // Stack manipulation
            // ================================================================
            Opcode::Push => {
                stack.push(block.constants[block.read_u16(ip + 1) as usize]);
            }
            Opcode::Pop => {
                pop(&mut stack);
            }
            Opcode::PopExpressionStatement => {
                completion = pop(&mut stack);
            }
            Opcode::DuplicateTopOfStackValue => {
                stack.push(peek(&stack, 0));
            }
            Opcode::PushIntoTempStack => {
                let v = pop(&mut stack);
                temp.push(v);
            }
            Opcode::PopFromTempStack => {
                stack.push(temp.pop().expect("temp stack underflow"));
            }
            Opcode::LoadStackPointer => {
                stack.truncate(block.read_u16(ip + 1) as usize);
            }

            // ================================================================
            // Variable access
            // ================================================================
            Opcode::GetById => {
                let name = StringId(block.read_u32(ip + 1));
                let value = if !block.is_global && bindings.contains_key(&name) {
                    bindings[&name]
                } else {
                    match lookup_global(vm, name) {
                        Some(v) => v,
                        None => {
                            return Err(vm
                                .runtime
                                .reference_error(messages::UNDEFINED_VARIABLE));
                        }
                    }
                };
                block.profiles.borrow_mut()[block.read_u16(ip + 5) as usize]
                    .record(value);
                stack.push(value);
            }
            Opcode::PutById => {
                let name = StringId(block.read_u32(ip + 1));
                let value = peek(&stack, 0);
                if !block.is_global && bindings.contains_key(&name) {
                    bindings.insert(name, value);
                } else {
                    vm.runtime.set_property(vm.global, name, value)?;
                }
            }
            Opcode::CreateBinding => {
                let name = StringId(block.read_u32(ip + 1));
                if block.is_global {
                    if lookup_global(vm, name).is_none() {
                        vm.runtime.define_own_property(
                            vm.global,
                            name,
                            PropertyFlags::data_default(),
                            Value::Undefined,
                        );
                    }
                } else {
                    bindings.entry(name).or_insert(Value::Undefined);
                }
            }
            Opcode::GetByIndex => {
                let value = slots[block.read_u16(ip + 1) as usize];
                block.profiles.borrow_mut()[block.read_u16(ip + 3) as usize]
                    .record(value);
                stack.push(value);
            }
            Opcode::PutByIndex => {
                slots[block.read_u16(ip + 1) as usize] = peek(&stack, 0);
            }

            // ================================================================
            // Member access
            // ================================================================
            Opcode::GetObject | Opcode::GetObjectWithPeeking => {
                let (object, property) = if op == Opcode::GetObject {
                    let property = pop(&mut stack);
                    let object = pop(&mut stack);
                    (object, property)
                } else {
                    (peek(&stack, 1), peek(&stack, 0))
                };
                vm.last_member_object = object;
                block.profiles.borrow_mut()[block.read_u16(ip + 3) as usize]
                    .record(object);
                let value = vm.runtime.get_object_operation(object, property)?;
                block.profiles.borrow_mut()[block.read_u16(ip + 1) as usize]
                    .record(value);
                stack.push(value);
            }
            Opcode::GetObjectPreComputedCase
            | Opcode::GetObjectWithPeekingPreComputedCase => {
                let property = block.constants[block.read_u16(ip + 1) as usize];
                let object = if op == Opcode::GetObjectPreComputedCase {
                    pop(&mut stack)
                } else {
                    peek(&stack, 0)
                };
                vm.last_member_object = object;
                block.profiles.borrow_mut()[block.read_u16(ip + 7) as usize]
                    .record(object);
                let value = match property {
                    Value::Str(key) => {
                        let mut caches = block.caches.borrow_mut();
                        let cache = &mut caches[block.read_u16(ip + 3) as usize];
                        vm.runtime.get_object_precomputed(object, key, cache)?
                    }
                    other => vm.runtime.get_object_operation(object, other)?,
                };
                block.profiles.borrow_mut()[block.read_u16(ip + 5) as usize]
                    .record(value);
                stack.push(value);
            }
            Opcode::SetObject | Opcode::PutInObject => {
                let value = pop(&mut stack);
                let property = pop(&mut stack);
                let object = pop(&mut stack);
                block.profiles.borrow_mut()[block.read_u16(ip + 1) as usize]
                    .record(object);
                vm.runtime.set_object_operation(object, property, value)?;
                stack.push(value);
            }
            Opcode::PutInObjectPreComputedCase => {
                let property = block.constants[block.read_u16(ip + 1) as usize];
                let value = pop(&mut stack);
                let object = pop(&mut stack);
                block.profiles.borrow_mut()[block.read_u16(ip + 5) as usize]
                    .record(object);
                match property {
                    Value::Str(key) => {
                        let mut caches = block.caches.borrow_mut();
                        let cache = &mut caches[block.read_u16(ip + 3) as usize];
                        vm.runtime
                            .set_object_precomputed(object, key, value, cache)?;
                    }
                    other => vm.runtime.set_object_operation(object, other, value)?,
                }
                stack.push(value);
            }

            // ================================================================
            // Arithmetic
            // ================================================================
            Opcode::Plus => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let value = match (left, right) {
                    (Value::Int32(a), Value::Int32(b)) => match a.checked_add(b) {
                        Some(sum) => Value::Int32(sum),
                        None => Value::Double(a as f64 + b as f64),
                    },
                    _ if left.is_number() && right.is_number() => {
                        Value::from_f64(left.as_number() + right.as_number())
                    }
                    _ => {
                        let lp = vm.runtime.to_primitive(left);
                        let rp = vm.runtime.to_primitive(right);
                        if lp.is_str() || rp.is_str() {
                            let ls = vm.runtime.to_string_id(lp);
                            let rs = vm.runtime.to_string_id(rp);
                            Value::Str(vm.runtime.strings.concat(ls, rs))
                        } else {
                            let a = vm.runtime.to_number(lp);
                            let b = vm.runtime.to_number(rp);
                            Value::from_f64(a + b)
                        }
                    }
                };
                stack.push(value);
            }
            Opcode::Minus => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let value = match (left, right) {
                    (Value::Int32(a), Value::Int32(b)) => match a.checked_sub(b) {
                        Some(diff) => Value::Int32(diff),
                        None => Value::Double(a as f64 - b as f64),
                    },
                    _ => {
                        let a = vm.runtime.to_number(left);
                        let b = vm.runtime.to_number(right);
                        Value::from_f64(a - b)
                    }
                };
                stack.push(value);
            }
            Opcode::Multiply => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let value = match (left, right) {
                    (Value::Int32(a), Value::Int32(b)) => match a.checked_mul(b) {
                        // A zero product from a negative factor must be -0.
                        Some(p) if !(p == 0 && (a < 0 || b < 0)) => Value::Int32(p),
                        _ => Value::from_f64(a as f64 * b as f64),
                    },
                    _ => {
                        let a = vm.runtime.to_number(left);
                        let b = vm.runtime.to_number(right);
                        Value::from_f64(a * b)
                    }
                };
                stack.push(value);
            }
            Opcode::Division => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let a = vm.runtime.to_number(left);
                let b = vm.runtime.to_number(right);
                stack.push(Value::from_f64(a / b));
            }
            Opcode::Mod => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let value = vm.runtime.mod_operation(left, right);
                stack.push(value);
            }
            Opcode::Increment => {
                let v = pop(&mut stack);
                stack.push(step_number(vm, v, 1.0));
            }
            Opcode::Decrement => {
                let v = pop(&mut stack);
                stack.push(step_number(vm, v, -1.0));
            }
            Opcode::UnaryPlus | Opcode::ToNumber => {
                let v = pop(&mut stack);
                if v.is_number() {
                    stack.push(v);
                } else {
                    let n = vm.runtime.to_number(v);
                    stack.push(Value::from_f64(n));
                }
            }
            Opcode::UnaryMinus => {
                let v = pop(&mut stack);
                let value = match v {
                    Value::Int32(0) => Value::Double(-0.0),
                    Value::Int32(i) => match i.checked_neg() {
                        Some(n) => Value::Int32(n),
                        None => Value::Double(-(i as f64)),
                    },
                    Value::Double(d) => Value::Double(-d),
                    _ => {
                        let n = vm.runtime.to_number(v);
                        Value::from_f64(-n)
                    }
                };
                stack.push(value);
            }
            Opcode::BitwiseAnd
            | Opcode::BitwiseOr
            | Opcode::BitwiseXor
            | Opcode::LeftShift
            | Opcode::SignedRightShift => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let a = vm.runtime.to_int32(left);
                let b = vm.runtime.to_int32(right);
                let value = match op {
                    Opcode::BitwiseAnd => a & b,
                    Opcode::BitwiseOr => a | b,
                    Opcode::BitwiseXor => a ^ b,
                    Opcode::LeftShift => a.wrapping_shl(b as u32 & 0x1f),
                    _ => a.wrapping_shr(b as u32 & 0x1f),
                };
                stack.push(Value::Int32(value));
            }
            Opcode::UnsignedRightShift => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let a = vm.runtime.to_uint32(left);
                let shift = vm.runtime.to_uint32(right) & 0x1f;
                stack.push(Value::from_f64((a >> shift) as f64));
            }
            Opcode::BitwiseNot => {
                let v = pop(&mut stack);
                let a = vm.runtime.to_int32(v);
                stack.push(Value::Int32(!a));
            }
            Opcode::LogicalNot => {
                let v = pop(&mut stack);
                stack.push(Value::Boolean(!vm.runtime.to_boolean(v)));
            }

            // ================================================================
            // Comparison
            // ================================================================
            Opcode::Equal => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let eq = vm.runtime.abstract_equals(left, right);
                stack.push(Value::Boolean(eq));
            }
            Opcode::NotEqual => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let eq = vm.runtime.abstract_equals(left, right);
                stack.push(Value::Boolean(!eq));
            }
            Opcode::StrictEqual => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                stack.push(Value::Boolean(left.strict_equals(right)));
            }
            Opcode::NotStrictEqual => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                stack.push(Value::Boolean(!left.strict_equals(right)));
            }
            Opcode::LessThan => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let lt = vm.runtime.abstract_less_than(left, right, true);
                stack.push(Value::Boolean(lt == Some(true)));
            }
            Opcode::GreaterThan => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let gt = vm.runtime.abstract_less_than(right, left, false);
                stack.push(Value::Boolean(gt == Some(true)));
            }
            Opcode::LessThanOrEqual => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let gt = vm.runtime.abstract_less_than(right, left, false);
                stack.push(Value::Boolean(gt == Some(false)));
            }
            Opcode::GreaterThanOrEqual => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let lt = vm.runtime.abstract_less_than(left, right, true);
                stack.push(Value::Boolean(lt == Some(false)));
            }
            Opcode::StringIn => {
                let object = pop(&mut stack);
                let key = pop(&mut stack);
                let found = vm.runtime.in_operation(key, object)?;
                stack.push(Value::Boolean(found));
            }
            Opcode::InstanceOf => {
                let right = pop(&mut stack);
                let left = pop(&mut stack);
                let is = vm.runtime.instance_of_operation(left, right)?;
                stack.push(Value::Boolean(is));
            }
            Opcode::UnaryTypeOf => {
                let v = pop(&mut stack);
                let name = vm.runtime.typeof_operation(v);
                stack.push(Value::Str(name));
            }
            Opcode::UnaryDelete => {
                let property = pop(&mut stack);
                let object = pop(&mut stack);
                let deleted = vm.runtime.delete_property(object, property)?;
                stack.push(Value::Boolean(deleted));
            }

            // ================================================================
            // Control flow
            // ================================================================
            Opcode::Jump => {
                ip = block.read_u32(ip + 1) as usize;
                continue;
            }
            Opcode::JumpIfTopOfStackValueIsFalse => {
                let c = pop(&mut stack);
                if !vm.runtime.to_boolean(c) {
                    ip = block.read_u32(ip + 1) as usize;
                    continue;
                }
            }
            Opcode::JumpIfTopOfStackValueIsTrue => {
                let c = pop(&mut stack);
                if vm.runtime.to_boolean(c) {
                    ip = block.read_u32(ip + 1) as usize;
                    continue;
                }
            }
            Opcode::JumpAndPopIfTopOfStackValueIsTrue => {
                let c = pop(&mut stack);
                if vm.runtime.to_boolean(c) {
                    pop(&mut stack);
                    ip = block.read_u32(ip + 1) as usize;
                    continue;
                }
            }
            Opcode::JumpIfTopOfStackValueIsFalseWithPeeking => {
                if !vm.runtime.to_boolean(peek(&stack, 0)) {
                    ip = block.read_u32(ip + 1) as usize;
                    continue;
                }
            }
            Opcode::JumpIfTopOfStackValueIsTrueWithPeeking => {
                if vm.runtime.to_boolean(peek(&stack, 0)) {
                    ip = block.read_u32(ip + 1) as usize;
                    continue;
                }
            }
            Opcode::LoopStart => {}

            // ================================================================
            // For-in
            // ================================================================
            Opcode::EnumerateObject => {
                let collection = pop(&mut stack);
                let e = vm.runtime.enumerate_object(collection);
                stack.push(Value::Ptr(e));
            }
            Opcode::CheckIfKeyIsLast => {
                let e = peek(&stack, 0).as_ptr();
                let done = match &vm.runtime.heap.cell(e).kind {
                    ObjectKind::Enumeration(data) => data.cursor >= data.keys.len(),
                    _ => true,
                };
                stack.push(Value::Boolean(done));
            }
            Opcode::EnumerateObjectKey => {
                let e = peek(&stack, 0).as_ptr();
                let key = match &mut vm.runtime.heap.cell_mut(e).kind {
                    ObjectKind::Enumeration(data) => {
                        let key = data.keys[data.cursor];
                        data.cursor += 1;
                        key
                    }
                    _ => panic!("enumeration state expected"),
                };
                stack.push(Value::Str(key));
            }

            // ================================================================
            // Literals and functions
            // ================================================================
            Opcode::CreateObject => {
                let proto = Value::Ptr(vm.object_prototype);
                let obj = vm.runtime.create_ordinary_object(proto);
                stack.push(Value::Ptr(obj));
            }
            Opcode::CreateArray => {
                let length = block.read_u16(ip + 1) as u32;
                let proto = Value::Ptr(vm.array_prototype);
                let storage = escargot_core::object::ArrayStorage::with_length(length);
                let arr = vm.runtime.create_array(storage, proto);
                stack.push(Value::Ptr(arr));
            }
            Opcode::InitObject => {
                let value = pop(&mut stack);
                let key = pop(&mut stack);
                let object = peek(&stack, 0).as_ptr();
                let key_id = vm.runtime.to_string_id(key);
                vm.runtime.define_own_property(
                    object,
                    key_id,
                    PropertyFlags::data_default(),
                    value,
                );
            }
            Opcode::InitArrayObject => {
                let value = pop(&mut stack);
                let key = pop(&mut stack);
                let array = peek(&stack, 0).as_ptr();
                let index = vm
                    .runtime
                    .to_index(key)
                    .expect("array literal index");
                if let Some(storage) = vm.runtime.heap.cell_mut(array).array_mut() {
                    storage.set(index, value);
                }
            }
            Opcode::CreateFunction => {
                let index = block.block_offset.get() + block.read_u16(ip + 1) as u32;
                let name = vm.code_blocks[index as usize].name;
                let proto_property = vm
                    .runtime
                    .create_ordinary_object(Value::Ptr(vm.object_prototype));
                let function = vm.runtime.heap.allocate(ScriptObject::new_function(
                    ShapeArena::root(),
                    Value::Ptr(vm.function_prototype),
                    FunctionData {
                        kind: FunctionKind::Script { block: index },
                        name,
                    },
                ));
                let prototype_atom = vm.runtime.atoms.prototype;
                vm.runtime.define_own_property(
                    function,
                    prototype_atom,
                    PropertyFlags::data_default(),
                    Value::Ptr(proto_property),
                );
                stack.push(Value::Ptr(function));
            }
            Opcode::This => {
                stack.push(this_value);
            }

            // ================================================================
            // Calls
            // ================================================================
            Opcode::PrepareFunctionCall => {
                vm.last_member_object = Value::Undefined;
            }
            Opcode::PushFunctionCallReceiver => {
                stack.push(vm.last_member_object);
            }
            Opcode::CallFunction => {
                let argc = block.read_u16(ip + 1) as usize;
                let mut call_args = vec![Value::Undefined; argc];
                for slot in call_args.iter_mut().rev() {
                    *slot = pop(&mut stack);
                }
                let receiver = pop(&mut stack);
                let callee = pop(&mut stack);
                let result = vm.call_function(callee, receiver, &call_args)?;
                block.profiles.borrow_mut()[block.read_u16(ip + 3) as usize]
                    .record(result);
                stack.push(result);
            }
            Opcode::NewFunctionCall => {
                let argc = block.read_u16(ip + 1) as usize;
                let mut call_args = vec![Value::Undefined; argc];
                for slot in call_args.iter_mut().rev() {
                    *slot = pop(&mut stack);
                }
                let callee = pop(&mut stack);
                let result = vm.construct(callee, &call_args)?;
                block.profiles.borrow_mut()[block.read_u16(ip + 3) as usize]
                    .record(result);
                stack.push(result);
            }

            // ================================================================
            // Exceptions, return, halt
            // ================================================================
            Opcode::Throw => {
                return Err(Thrown(pop(&mut stack)));
            }
            Opcode::ReturnFunction => {
                return Ok(Value::Undefined);
            }
            Opcode::ReturnFunctionWithValue => {
                return Ok(pop(&mut stack));
            }
            Opcode::End => {
                return Ok(completion);
            }
        }

        ip = next;
    }
}

/// Increment/decrement a value that ToNumber already normalized.
fn step_number(vm: &mut VmInstance, v: Value, delta: f64) -> Value {
    match v {
        Value::Int32(i) => {
            let stepped = i as i64 + delta as i64;
            match i32::try_from(stepped) {
                Ok(n) => Value::Int32(n),
                Err(_) => Value::Double(stepped as f64),
            }
        }
        Value::Double(d) => Value::from_f64(d + delta),
        _ => {
            let n = vm.runtime.to_number(v);
            Value::from_f64(n + delta)
        }
    }
}
