//! VM executor
//!
//! Interprets a verified [`Module`]. Calls between YX methods push frames on
//! an explicit stack rather than recursing on the host stack, so a runaway
//! recursion ends in [`VMError::CallStackOverflow`] instead of crashing the
//! process.

use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::middle::bytecode::{Constant, Instr, MethodDef, Module};
use crate::middle::image::{CompiledImage, ImageError};
use crate::runner::capture::OutputBuffer;
use crate::std::{NativeContext, NativeExport, ReferenceSet};
use crate::vm::errors::{VMError, VMResult};
use crate::vm::heap::AllocMeter;
use crate::vm::value::{Object, Shape, Value};

/// Instructions between two deadline checks
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// VM configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VMConfig {
    /// Wall-clock budget for everything run on one VM
    pub timeout: Duration,
    /// Instruction budget for everything run on one VM
    pub max_instructions: u64,
    /// Deepest chain of nested YX calls
    pub max_call_depth: usize,
    /// Bytes of strings, lists and objects one VM may create
    pub max_alloc_bytes: usize,
    /// Operand stack slots across all frames
    pub max_stack: usize,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            max_instructions: 50_000_000,
            max_call_depth: 512,
            max_alloc_bytes: 64 * 1024 * 1024,
            max_stack: 64 * 1024,
        }
    }
}

/// A decoded, verified image with its natives resolved
#[derive(Debug)]
pub struct LoadedImage {
    module: Module,
    constants: Vec<Value>,
    shapes: Vec<Rc<Shape>>,
    natives: Vec<&'static NativeExport>,
}

impl LoadedImage {
    /// Decode, verify and link an image against the reference set
    pub fn load(
        image: &CompiledImage,
        refs: &'static ReferenceSet,
    ) -> Result<Self, ImageError> {
        Self::from_module(image.decode()?, refs)
    }

    /// Link an already verified module
    pub fn from_module(
        module: Module,
        refs: &'static ReferenceSet,
    ) -> Result<Self, ImageError> {
        let natives = module
            .imports
            .iter()
            .map(|name| {
                refs.lookup(name)
                    .ok_or_else(|| ImageError::UnknownNative(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let constants = module
            .constants
            .iter()
            .map(|c| match c {
                Constant::Int(n) => Value::Int(*n),
                Constant::Float(x) => Value::Float(*x),
                Constant::Str(s) => Value::string(s.as_str()),
            })
            .collect();

        let shapes = module
            .types
            .iter()
            .enumerate()
            .map(|(type_idx, ty)| {
                Rc::new(Shape {
                    type_idx,
                    name: ty.name.clone(),
                    fields: ty.fields.clone(),
                })
            })
            .collect();

        debug!(
            "Loaded image: {} types, {} natives",
            module.types.len(),
            natives.len()
        );
        Ok(Self {
            module,
            constants,
            shapes,
            natives,
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    fn method(
        &self,
        type_idx: usize,
        method_idx: usize,
    ) -> Option<&MethodDef> {
        self.module
            .types
            .get(type_idx)
            .and_then(|t| t.methods.get(method_idx))
    }

    fn name(
        &self,
        idx: u32,
    ) -> &str {
        self.module.const_str(idx).unwrap_or("?")
    }
}

/// Call frame
#[derive(Debug)]
struct Frame {
    type_idx: usize,
    method_idx: usize,
    pc: usize,
    locals: Vec<Value>,
    /// Operand stack height at entry
    stack_base: usize,
}

/// 虚拟机
///
/// One VM serves one execution: the deadline starts when it is created and
/// the instruction and allocation budgets are shared by every invocation.
pub struct VM<'i> {
    image: &'i LoadedImage,
    refs: &'static ReferenceSet,
    config: VMConfig,
    deadline: Option<Instant>,
    executed: u64,
    heap: AllocMeter,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl<'i> VM<'i> {
    /// 使用配置创建 VM
    pub fn new(
        image: &'i LoadedImage,
        refs: &'static ReferenceSet,
        config: VMConfig,
    ) -> Self {
        Self {
            image,
            refs,
            deadline: Instant::now().checked_add(config.timeout),
            executed: 0,
            heap: AllocMeter::new(config.max_alloc_bytes),
            stack: Vec::new(),
            frames: Vec::new(),
            config,
        }
    }

    /// Instructions executed so far
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Bytes charged against the allocation budget so far
    pub fn allocated_bytes(&self) -> usize {
        self.heap.used()
    }

    /// Run a method to completion
    ///
    /// For instance methods `args[0]` is the receiver. The VM is left clean
    /// on failure and can run further invocations.
    pub fn invoke(
        &mut self,
        type_idx: usize,
        method_idx: usize,
        args: Vec<Value>,
        output: &mut OutputBuffer,
    ) -> VMResult<Value> {
        let image = self.image;
        let method = image.method(type_idx, method_idx).ok_or_else(|| {
            VMError::RuntimeError(format!("no method {}:{}", type_idx, method_idx))
        })?;
        if args.len() != method.param_slots() {
            return Err(VMError::ArityMismatch {
                callee: method.name.clone(),
                expected: method.param_slots(),
                found: args.len(),
            });
        }

        let base_depth = self.frames.len();
        let stack_base = self.stack.len();
        self.push_frame(type_idx, method_idx, args)?;
        let result = self.run(base_depth, output);
        if result.is_err() {
            self.frames.truncate(base_depth);
            self.stack.truncate(stack_base);
        }
        result
    }

    // ------------------------------------------------------------------
    // Frames and stack
    // ------------------------------------------------------------------

    fn push_frame(
        &mut self,
        type_idx: usize,
        method_idx: usize,
        args: Vec<Value>,
    ) -> VMResult<()> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(VMError::CallStackOverflow(self.config.max_call_depth));
        }
        let image = self.image;
        let locals_len = image
            .method(type_idx, method_idx)
            .map(|m| m.locals as usize)
            .unwrap_or(0);
        let mut locals = args;
        locals.resize(locals_len.max(locals.len()), Value::Unit);
        self.frames.push(Frame {
            type_idx,
            method_idx,
            pc: 0,
            locals,
            stack_base: self.stack.len(),
        });
        Ok(())
    }

    fn frame(&mut self) -> VMResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| VMError::RuntimeError("no active frame".to_string()))
    }

    fn push(
        &mut self,
        value: Value,
    ) -> VMResult<()> {
        if self.stack.len() >= self.config.max_stack {
            return Err(VMError::RuntimeError("operand stack overflow".to_string()));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VMResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| VMError::RuntimeError("operand stack underflow".to_string()))
    }

    /// Pop `n` values, returned in push order
    fn pop_n(
        &mut self,
        n: usize,
    ) -> VMResult<Vec<Value>> {
        if n > self.stack.len() {
            return Err(VMError::RuntimeError("operand stack underflow".to_string()));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn local(
        &mut self,
        slot: usize,
    ) -> VMResult<&mut Value> {
        self.frame()?
            .locals
            .get_mut(slot)
            .ok_or_else(|| VMError::RuntimeError(format!("bad local slot {}", slot)))
    }

    /// Count one instruction against the budgets
    fn tick(&mut self) -> VMResult<()> {
        self.executed += 1;
        if self.executed > self.config.max_instructions {
            return Err(VMError::InstructionBudget(self.config.max_instructions));
        }
        if self.executed % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(VMError::Timeout(self.config.timeout));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interpreter loop
    // ------------------------------------------------------------------

    fn run(
        &mut self,
        base_depth: usize,
        output: &mut OutputBuffer,
    ) -> VMResult<Value> {
        let image = self.image;
        loop {
            self.tick()?;

            let frame = self.frame()?;
            let Some(method) = image.method(frame.type_idx, frame.method_idx) else {
                return Err(VMError::RuntimeError("frame refers to no method".to_string()));
            };
            // Falling off the end returns Unit
            let instr = method.code.get(frame.pc).copied().unwrap_or(Instr::Return);
            let at_end = frame.pc >= method.code.len();
            frame.pc += 1;
            if at_end {
                self.push(Value::Unit)?;
            }

            match instr {
                Instr::Const(idx) => {
                    let value = image
                        .constants
                        .get(idx as usize)
                        .cloned()
                        .unwrap_or(Value::Unit);
                    self.push(value)?;
                }
                Instr::Unit => self.push(Value::Unit)?,
                Instr::True => self.push(Value::Bool(true))?,
                Instr::False => self.push(Value::Bool(false))?,
                Instr::Load(slot) => {
                    let value = self.local(slot as usize)?.clone();
                    self.push(value)?;
                }
                Instr::Store(slot) => {
                    let value = self.pop()?;
                    *self.local(slot as usize)? = value;
                }
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Dup => {
                    let value = self.pop()?;
                    self.push(value.clone())?;
                    self.push(value)?;
                }

                Instr::Add
                | Instr::Sub
                | Instr::Mul
                | Instr::Div
                | Instr::Rem
                | Instr::Eq
                | Instr::Ne
                | Instr::Lt
                | Instr::Le
                | Instr::Gt
                | Instr::Ge
                | Instr::MakeRange => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let value = self.binary(instr, lhs, rhs)?;
                    self.push(value)?;
                }
                Instr::Neg => {
                    let value = match self.pop()? {
                        Value::Int(n) => Value::Int(n.checked_neg().ok_or(VMError::IntegerOverflow)?),
                        Value::Float(x) => Value::Float(-x),
                        other => {
                            return Err(VMError::type_mismatch(format!(
                                "cannot negate {}",
                                other.type_name()
                            )))
                        }
                    };
                    self.push(value)?;
                }
                Instr::Not => {
                    let b = self.pop()?.as_bool()?;
                    self.push(Value::Bool(!b))?;
                }

                Instr::Jump(target) => self.frame()?.pc = target as usize,
                Instr::JumpIfFalse(target) => {
                    if !self.pop()?.as_bool()? {
                        self.frame()?.pc = target as usize;
                    }
                }
                Instr::JumpIfTrue(target) => {
                    if self.pop()?.as_bool()? {
                        self.frame()?.pc = target as usize;
                    }
                }

                Instr::CallStatic {
                    type_idx,
                    method_idx,
                    argc,
                } => {
                    let args = self.pop_n(argc as usize)?;
                    self.push_frame(type_idx as usize, method_idx as usize, args)?;
                }
                Instr::CallNative { import, argc } => {
                    let args = self.pop_n(argc as usize)?;
                    let native = image.natives.get(import as usize).copied().ok_or_else(|| {
                        VMError::RuntimeError(format!("bad import {}", import))
                    })?;
                    let value = self.call_native(native, &args, output)?;
                    self.push(value)?;
                }
                Instr::CallMethod { name, argc } => {
                    let mut args = self.pop_n(argc as usize)?;
                    let receiver = self.pop()?;
                    let name = image.name(name);
                    if let Some((type_idx, method_idx)) = self.instance_method(&receiver, name, argc)? {
                        args.insert(0, receiver);
                        self.push_frame(type_idx, method_idx, args)?;
                    } else if let Some(native) = self.refs.builtin_method(&receiver, name) {
                        args.insert(0, receiver);
                        let value = self.call_native(native, &args, output)?;
                        self.push(value)?;
                    } else {
                        return Err(VMError::UnknownMethod {
                            receiver: receiver.type_name().to_string(),
                            method: name.to_string(),
                        });
                    }
                }

                Instr::NewStruct(type_idx) => {
                    let shape = image
                        .shapes
                        .get(type_idx as usize)
                        .cloned()
                        .ok_or_else(|| VMError::RuntimeError(format!("bad type {}", type_idx)))?;
                    let fields = self.pop_n(shape.fields.len())?;
                    self.heap
                        .charge(fields.len().max(1) * std::mem::size_of::<Value>())?;
                    self.push(Value::Object(Rc::new(Object {
                        shape,
                        fields: fields.into(),
                    })))?;
                }
                Instr::GetField(name) => {
                    let object = self.pop()?;
                    let value = field_slot(&object, image.name(name), |fields, i| fields[i].clone())?;
                    self.push(value)?;
                }
                Instr::SetField(name) => {
                    let value = self.pop()?;
                    let object = self.pop()?;
                    field_slot(&object, image.name(name), move |fields, i| fields[i] = value)?;
                }
                Instr::NewList(count) => {
                    let items = self.pop_n(count as usize)?;
                    self.heap
                        .charge(items.len() * std::mem::size_of::<Value>())?;
                    self.push(Value::list(items))?;
                }
                Instr::Index => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let value = self.index(&object, &index)?;
                    self.push(value)?;
                }
                Instr::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?.as_int()?;
                    let object = self.pop()?;
                    let list = object.as_list()?;
                    let mut items = list.borrow_mut();
                    let len = items.len();
                    let slot = checked_index(index, len)?;
                    items[slot] = value;
                }

                Instr::IterStart(slot) => {
                    let iterable = self.pop()?;
                    let cursor = match iterable {
                        v @ (Value::List(_) | Value::Range(..)) => v,
                        Value::Str(s) => {
                            let chars: Vec<Value> =
                                s.chars().map(|c| Value::string(c.to_string())).collect();
                            self.heap
                                .charge(chars.len() * std::mem::size_of::<Value>())?;
                            Value::list(chars)
                        }
                        other => {
                            return Err(VMError::type_mismatch(format!(
                                "cannot iterate over {}",
                                other.type_name()
                            )))
                        }
                    };
                    *self.local(slot as usize)? = cursor;
                    *self.local(slot as usize + 1)? = Value::Int(0);
                }
                Instr::IterNext { slot, exit } => {
                    let slot = slot as usize;
                    let position = self.local(slot + 1)?.as_int()?;
                    let next = match &*self.local(slot)? {
                        Value::List(items) => usize::try_from(position)
                            .ok()
                            .and_then(|i| items.borrow().get(i).cloned()),
                        Value::Range(start, end) => start
                            .checked_add(position)
                            .filter(|n| n < end)
                            .map(Value::Int),
                        _ => None,
                    };
                    match next {
                        Some(value) => {
                            *self.local(slot + 1)? = Value::Int(position + 1);
                            self.push(value)?;
                        }
                        None => self.frame()?.pc = exit as usize,
                    }
                }

                Instr::Return => {
                    let result = self.pop()?;
                    if let Some(frame) = self.frames.pop() {
                        self.stack.truncate(frame.stack_base);
                    }
                    if self.frames.len() <= base_depth {
                        return Ok(result);
                    }
                    self.push(result)?;
                }
                Instr::Throw => {
                    let message = match self.pop()? {
                        Value::Str(s) => s.to_string(),
                        other => {
                            let mut text = String::new();
                            self.render_into(&mut text, &other)?;
                            text
                        }
                    };
                    return Err(VMError::Thrown(message));
                }
            }
        }
    }

    /// Append the display text of `value`, bounded by the allocation budget
    fn render_into(
        &self,
        out: &mut String,
        value: &Value,
    ) -> VMResult<()> {
        let limit = out.len().saturating_add(self.heap.remaining());
        value
            .write_bounded(out, limit)
            .map_err(|_| VMError::AllocationBudget(self.heap.limit()))
    }

    fn call_native(
        &mut self,
        native: &NativeExport,
        args: &[Value],
        output: &mut OutputBuffer,
    ) -> VMResult<Value> {
        let mut ctx = NativeContext {
            output,
            heap: &mut self.heap,
        };
        native.call(args, &mut ctx)
    }

    /// Declared instance method of an object receiver, arity checked
    fn instance_method(
        &self,
        receiver: &Value,
        name: &str,
        argc: u8,
    ) -> VMResult<Option<(usize, usize)>> {
        let Value::Object(object) = receiver else {
            return Ok(None);
        };
        let type_idx = object.shape.type_idx;
        let Some(ty) = self.image.module.types.get(type_idx) else {
            return Ok(None);
        };
        let Some(method_idx) = ty
            .methods
            .iter()
            .position(|m| m.name == name && !m.is_static)
        else {
            return Ok(None);
        };
        let arity = ty.methods[method_idx].arity;
        if arity != argc {
            return Err(VMError::ArityMismatch {
                callee: format!("{}.{}", ty.name, name),
                expected: arity as usize,
                found: argc as usize,
            });
        }
        Ok(Some((type_idx, method_idx)))
    }

    fn binary(
        &mut self,
        instr: Instr,
        lhs: Value,
        rhs: Value,
    ) -> VMResult<Value> {
        let value = match instr {
            Instr::Eq => Value::Bool(lhs.equals(&rhs)?),
            Instr::Ne => Value::Bool(!lhs.equals(&rhs)?),
            Instr::Lt => Value::Bool(lhs.compare(&rhs)?.is_lt()),
            Instr::Le => Value::Bool(lhs.compare(&rhs)?.is_le()),
            Instr::Gt => Value::Bool(lhs.compare(&rhs)?.is_gt()),
            Instr::Ge => Value::Bool(lhs.compare(&rhs)?.is_ge()),
            Instr::MakeRange => Value::Range(lhs.as_int()?, rhs.as_int()?),
            _ => return self.arithmetic(instr, lhs, rhs),
        };
        Ok(value)
    }

    fn arithmetic(
        &mut self,
        instr: Instr,
        lhs: Value,
        rhs: Value,
    ) -> VMResult<Value> {
        match (instr, &lhs, &rhs) {
            (Instr::Add, Value::Str(_), _) | (Instr::Add, _, Value::Str(_)) => {
                let mut text = String::new();
                self.render_into(&mut text, &lhs)?;
                self.render_into(&mut text, &rhs)?;
                self.heap.charge(text.len())?;
                Ok(Value::string(text))
            }
            (Instr::Add, Value::List(a), Value::List(b)) => {
                let items: Vec<Value> = a.borrow().iter().chain(b.borrow().iter()).cloned().collect();
                self.heap
                    .charge(items.len() * std::mem::size_of::<Value>())?;
                Ok(Value::list(items))
            }
            (_, Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                let result = match instr {
                    Instr::Add => a.checked_add(b),
                    Instr::Sub => a.checked_sub(b),
                    Instr::Mul => a.checked_mul(b),
                    Instr::Div | Instr::Rem if b == 0 => return Err(VMError::DivisionByZero),
                    Instr::Div => a.checked_div(b),
                    Instr::Rem => a.checked_rem(b),
                    _ => None,
                };
                result.map(Value::Int).ok_or(VMError::IntegerOverflow)
            }
            (_, Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (lhs.as_float()?, rhs.as_float()?);
                let x = match instr {
                    Instr::Add => a + b,
                    Instr::Sub => a - b,
                    Instr::Mul => a * b,
                    Instr::Div | Instr::Rem if b == 0.0 => return Err(VMError::DivisionByZero),
                    Instr::Div => a / b,
                    _ => a % b,
                };
                Ok(Value::Float(x))
            }
            _ => Err(VMError::type_mismatch(format!(
                "cannot apply `{}` to {} and {}",
                operator_symbol(instr),
                lhs.type_name(),
                rhs.type_name()
            ))),
        }
    }

    fn index(
        &mut self,
        object: &Value,
        index: &Value,
    ) -> VMResult<Value> {
        let index = index.as_int()?;
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let i = checked_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let i = checked_index(index, len)?;
                let c = s.chars().nth(i).map(String::from).unwrap_or_default();
                self.heap.charge(c.len())?;
                Ok(Value::string(c))
            }
            other => Err(VMError::type_mismatch(format!(
                "cannot index into {}",
                other.type_name()
            ))),
        }
    }
}

fn checked_index(
    index: i64,
    len: usize,
) -> VMResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(VMError::IndexOutOfBounds { index, len })
}

/// Run `f` on an object's fields at the slot named `field`
fn field_slot<T>(
    object: &Value,
    field: &str,
    f: impl FnOnce(&mut Vec<Value>, usize) -> T,
) -> VMResult<T> {
    let unknown = || VMError::UnknownField {
        receiver: object.type_name().to_string(),
        field: field.to_string(),
    };
    let Value::Object(obj) = object else {
        return Err(unknown());
    };
    let i = obj.shape.field_index(field).ok_or_else(unknown)?;
    let mut fields = obj.fields.borrow_mut();
    Ok(f(&mut fields, i))
}

fn operator_symbol(instr: Instr) -> &'static str {
    match instr {
        Instr::Add => "+",
        Instr::Sub => "-",
        Instr::Mul => "*",
        Instr::Div => "/",
        Instr::Rem => "%",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Compiler;

    fn load(source: &str) -> LoadedImage {
        let image = Compiler::new().compile(source).unwrap();
        LoadedImage::load(&image, ReferenceSet::standard()).unwrap()
    }

    fn run_with(
        source: &str,
        config: VMConfig,
    ) -> (VMResult<Value>, String) {
        let image = load(source);
        let (ty, method) = image.module().entry_points()[0];
        let mut vm = VM::new(&image, ReferenceSet::standard(), config);
        let mut output = OutputBuffer::new(1 << 16);
        let result = vm.invoke(ty, method, vec![], &mut output);
        (result, output.as_str().to_string())
    }

    fn run(source: &str) -> (VMResult<Value>, String) {
        run_with(source, VMConfig::default())
    }

    #[test]
    fn test_arithmetic_and_printing() {
        let (result, out) = run(r#"pub fn Main() { println(1 + 2 * 3, 7 / 2, 7 % 3, 1.5 + 1, "a" + 1); }"#);
        result.unwrap();
        assert_eq!(out, "7 3 1 2.5 a1\n");
    }

    #[test]
    fn test_recursion() {
        let (result, out) = run(
            "fn fib(n: Int) -> Int { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }
             pub fn Main() { println(fib(15)); }",
        );
        result.unwrap();
        assert_eq!(out, "610\n");
    }

    #[test]
    fn test_objects_and_instance_methods() {
        let (result, out) = run(
            "type Counter {
                n: Int
                pub fn new() -> Counter { return Counter { n: 0 }; }
                fn bump(self, by: Int) { self.n = self.n + by; }
             }
             pub fn Main() {
                let c = Counter.new();
                c.bump(2);
                c.bump(3);
                println(c.n, c);
             }",
        );
        result.unwrap();
        assert_eq!(out, "5 Counter { n: 5 }\n");
    }

    #[test]
    fn test_loops_lists_and_builtins() {
        let (result, out) = run(
            r#"pub fn Main() {
                let xs = [3, 1, 2];
                xs.push(10);
                let mut total = 0;
                for x in xs { total = total + x; }
                let mut i = 0;
                while true { i = i + 1; if i >= 3 { break; } }
                for ch in "ab" { print(ch.upper()); }
                println("", total, i, len(xs), xs[3], "  t ".trim());
            }"#,
        );
        result.unwrap();
        assert_eq!(out, "AB 16 3 4 10 t\n");
    }

    #[test]
    fn test_short_circuit_skips_rhs() {
        let (result, out) = run(
            r#"fn loud() -> Bool { println("evaluated"); return true; }
               pub fn Main() { println(false && loud(), true || loud()); }"#,
        );
        result.unwrap();
        assert_eq!(out, "false true\n");
    }

    #[test]
    fn test_thrown_message() {
        let (result, out) = run(r#"pub fn Main() { println("before"); throw "bad " + 42; }"#);
        assert_eq!(result, Err(VMError::Thrown("bad 42".to_string())));
        assert_eq!(out, "before\n");
    }

    #[test]
    fn test_runtime_errors() {
        let cases = [
            ("pub fn Main() { println(1 / 0); }", VMError::DivisionByZero),
            (
                "pub fn Main() { println(9223372036854775807 + 1); }",
                VMError::IntegerOverflow,
            ),
            (
                "pub fn Main() { let xs = [1]; println(xs[1]); }",
                VMError::IndexOutOfBounds { index: 1, len: 1 },
            ),
        ];
        for (source, expected) in cases {
            assert_eq!(run(source).0, Err(expected), "{}", source);
        }
        assert!(matches!(
            run("pub fn Main() { println(1 + true); }").0,
            Err(VMError::TypeMismatch(_))
        ));
        assert!(matches!(
            run("pub fn Main() { let x = 1; x.frob(); }").0,
            Err(VMError::UnknownMethod { .. })
        ));
        assert!(matches!(
            run("pub fn Main() { let xs = [1]; println(xs.nope); }").0,
            Err(VMError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_unbounded_recursion_overflows_cleanly() {
        let (result, _) = run("fn down(n: Int) -> Int { return down(n + 1); } pub fn Main() { down(0); }");
        assert_eq!(result, Err(VMError::CallStackOverflow(512)));
    }

    #[test]
    fn test_instruction_budget() {
        let config = VMConfig {
            max_instructions: 10_000,
            ..VMConfig::default()
        };
        let (result, _) = run_with("pub fn Main() { while true { } }", config);
        assert_eq!(result, Err(VMError::InstructionBudget(10_000)));
    }

    #[test]
    fn test_deadline() {
        let config = VMConfig {
            timeout: Duration::from_millis(20),
            max_instructions: u64::MAX,
            ..VMConfig::default()
        };
        let started = Instant::now();
        let (result, _) = run_with("pub fn Main() { let mut i = 0; while true { i = i + 1; } }", config);
        assert_eq!(result, Err(VMError::Timeout(Duration::from_millis(20))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_allocation_budget() {
        let config = VMConfig {
            max_alloc_bytes: 4096,
            ..VMConfig::default()
        };
        let (result, _) = run_with(
            r#"pub fn Main() { let mut s = "x"; while true { s = s + s; } }"#,
            config,
        );
        assert_eq!(result, Err(VMError::AllocationBudget(4096)));
    }

    #[test]
    fn test_deeply_nested_list_is_released() {
        let (result, out) = run(
            r#"pub fn Main() {
                let mut a = [];
                for _ in 0..100000 { a = [a]; }
                a = 0;
                println("done");
            }"#,
        );
        result.unwrap();
        assert_eq!(out, "done\n");
    }

    #[test]
    fn test_shared_list_rendering_is_bounded() {
        let config = VMConfig {
            max_alloc_bytes: 1 << 16,
            ..VMConfig::default()
        };
        let (result, _) = run_with(
            r#"pub fn Main() { let a = [1]; a.push(a); a.push(a); let s = "" + a; }"#,
            config.clone(),
        );
        assert_eq!(result, Err(VMError::AllocationBudget(1 << 16)));

        let (result, _) = run_with(
            "pub fn Main() { let a = [1]; a.push(a); a.push(a); throw a; }",
            config,
        );
        assert_eq!(result, Err(VMError::AllocationBudget(1 << 16)));
    }

    #[test]
    fn test_equality_of_huge_values_fails() {
        let (result, _) = run(
            r#"pub fn Main() {
                let mut a = [1];
                let mut b = [1];
                for _ in 0..40 { a = [a, a]; b = [b, b]; }
                println(a == b);
            }"#,
        );
        assert_eq!(
            result,
            Err(VMError::RuntimeError("values too large to compare".to_string()))
        );
    }

    #[test]
    fn test_vm_is_reusable_after_failure() {
        let image = load(
            r#"type A { pub fn Main() { throw "first"; } }
               type B { pub fn Main() { println("second"); } }"#,
        );
        let entries = image.module().entry_points();
        let mut vm = VM::new(&image, ReferenceSet::standard(), VMConfig::default());
        let mut output = OutputBuffer::new(1024);
        assert!(vm.invoke(entries[0].0, entries[0].1, vec![], &mut output).is_err());
        vm.invoke(entries[1].0, entries[1].1, vec![], &mut output).unwrap();
        assert_eq!(output.as_str(), "second\n");
    }

    #[test]
    fn test_unknown_native_fails_to_load() {
        let image = Compiler::new().compile("pub fn Main() { println(1); }").unwrap();
        let mut module = image.decode().unwrap();
        module.imports[0] = "std.os.exec".to_string();
        let err = LoadedImage::from_module(module, ReferenceSet::standard()).unwrap_err();
        assert_eq!(err, ImageError::UnknownNative("std.os.exec".to_string()));
    }
}
