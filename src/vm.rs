use std::cell::RefCell;
use std::convert::TryFrom;
use std::io::Write;
use std::rc::Rc;

use super::chunk::{Chunk, Instruction};
use super::reporter::{Report, Reporter};
use super::table::Table;
use super::value::{Closure, Function, Object, Upvalue, Value};

pub const STACK_MAX: usize = 256;
pub const FRAMES_MAX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Success,
    CompileError,
    RuntimeError,
}

struct CallFrame {
    function: Rc<Function>,
    /// Set when the callee was a `Closure` rather than a bare `Function`,
    /// so `GET_UPVALUE`/`SET_UPVALUE` have somewhere to resolve against.
    closure: Option<Rc<Closure>>,
    ip: usize,
    /// Base of this frame's local-slot window: `GET_LOCAL`/`SET_LOCAL 0`
    /// addresses `stack[locals_base]`. Unlike the callee-occupies-slot-0
    /// convention, the compiler's own slot numbering starts at the first
    /// real local (no slot is reserved for the callee), so `locals_base`
    /// here points past it.
    locals_base: usize,
    /// Stack index of the callee itself (or `0` for the root frame, which
    /// has no callee value on the stack at all); `RETURN` truncates back
    /// to this, discarding the callee and every argument/local above it.
    call_base: usize,
}

/// Stack machine with a fixed-budget value stack and call-frame stack
/// (`STACK_MAX`/`FRAMES_MAX` slots) plus a globals table and a registry of
/// heap objects allocated at runtime. The registry, `globals`, and the
/// stack/frame `Vec`s are all dropped together when `Vm` is dropped,
/// which is the bulk-teardown the source's single intrusive object list
/// provided; `Rc` refcounting does the actual freeing.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    objects: Vec<Object>,
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            objects: Vec::new(),
            open_upvalues: Vec::new(),
        }
    }

    pub fn globals(&self) -> &Table {
        &self.globals
    }

    fn allocate_string(&mut self, bytes: String) -> Value {
        let obj = Object::new_string(bytes);
        self.objects.push(obj.clone());
        Value::Obj(obj)
    }

    fn push(&mut self, value: Value, reporter: &mut dyn Reporter) -> Result<(), ()> {
        if self.stack.len() >= STACK_MAX {
            self.runtime_error(reporter, "Stack overflow.");
            return Err(());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow: malformed bytecode")
    }

    fn peek(&self, distance_from_top: usize) -> &Value {
        let index = self.stack.len() - 1 - distance_from_top;
        &self.stack[index]
    }

    fn runtime_error(&mut self, reporter: &mut dyn Reporter, msg: impl Into<String>) {
        reporter.error(Report::runtime(msg));
        self.stack.clear();
        self.frames.clear();
    }

    /// Installs `chunk` as a fresh top-level function in frame 0 and runs
    /// it to completion. Resets the stack/frames but leaves `globals` and
    /// the object registry intact, so a single `Vm` can `interpret`
    /// several inputs in a row the way the embedding shell's REPL does.
    pub fn run_chunk(
        &mut self,
        chunk: Chunk,
        reporter: &mut dyn Reporter,
        out: &mut dyn Write,
    ) -> InterpretResult {
        self.stack.clear();
        self.frames.clear();

        let script = Rc::new(Function {
            name: None,
            arity: 0,
            upvalue_count: 0,
            chunk,
        });
        self.frames.push(CallFrame {
            function: script,
            closure: None,
            ip: 0,
            locals_base: 0,
            call_base: 0,
        });

        self.run(reporter, out)
    }

    fn run(&mut self, reporter: &mut dyn Reporter, out: &mut dyn Write) -> InterpretResult {
        if cfg!(feature = "debug-execution") {
            println!("[DEBUG] started executing");
        }
        loop {
            self.trace();
            let instr = match self.fetch() {
                Some(instr) => instr,
                None => return InterpretResult::Success,
            };
            match self.execute(instr, reporter, out) {
                Ok(Some(result)) => return result,
                Ok(None) => {}
                Err(()) => return InterpretResult::RuntimeError,
            }
        }
    }

    #[cfg(feature = "debug-bytecode")]
    fn trace(&self) {
        if cfg!(feature = "debug-execution") {
            let frame = self.frame();
            print!("{}", frame.function.chunk.disassemble_instr_at(frame.ip).0);
        }
    }

    #[cfg(not(feature = "debug-bytecode"))]
    fn trace(&self) {}

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("run() always has an active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run() always has an active frame")
    }

    fn fetch(&mut self) -> Option<Instruction> {
        let frame = self.frame_mut();
        let byte = *frame.function.chunk.code().get(frame.ip)?;
        frame.ip += 1;
        Instruction::try_from(byte).ok()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.function.chunk.code()[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let value = frame.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().function.chunk.constants()[index].clone()
    }

    /// Executes one instruction. `Ok(Some(result))` ends the run loop
    /// (`EXIT` or an unwound-to-nothing `RETURN`); `Ok(None)` continues.
    fn execute(
        &mut self,
        instr: Instruction,
        reporter: &mut dyn Reporter,
        out: &mut dyn Write,
    ) -> Result<Option<InterpretResult>, ()> {
        match instr {
            Instruction::Constant => {
                let value = self.read_constant();
                self.push(value, reporter)?;
            }
            Instruction::True => self.push(Value::Bool(true), reporter)?,
            Instruction::False => self.push(Value::Bool(false), reporter)?,
            Instruction::Add => self.binary_add(reporter)?,
            Instruction::Minus => self.binary_numeric(reporter, |a, b| a - b)?,
            Instruction::Multiply => self.binary_numeric(reporter, |a, b| a * b)?,
            Instruction::Divide => self.binary_numeric(reporter, |a, b| a / b)?,
            Instruction::Not => {
                let value = self.pop();
                match value.as_bool() {
                    Some(b) => self.push(Value::Bool(!b), reporter)?,
                    None => {
                        self.runtime_error(reporter, "Operand must be a boolean.");
                        return Err(());
                    }
                }
            }
            Instruction::Gt => self.compare(reporter, |a, b| a > b)?,
            Instruction::Lt => self.compare(reporter, |a, b| a < b)?,
            Instruction::Gte => self.compare(reporter, |a, b| a >= b)?,
            Instruction::Lte => self.compare(reporter, |a, b| a <= b)?,
            Instruction::Eq => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a == b), reporter)?;
            }
            Instruction::Neq => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a != b), reporter)?;
            }
            Instruction::Jump => {
                let offset = self.read_u16();
                self.frame_mut().ip += offset as usize;
            }
            Instruction::JumpIfFalse => {
                let offset = self.read_u16();
                match self.peek(0).as_bool() {
                    Some(false) => self.frame_mut().ip += offset as usize,
                    Some(true) => {}
                    None => {
                        self.runtime_error(reporter, "Condition must be a boolean.");
                        return Err(());
                    }
                }
            }
            Instruction::JumpIfTrue => {
                let offset = self.read_u16();
                match self.peek(0).as_bool() {
                    Some(true) => self.frame_mut().ip += offset as usize,
                    Some(false) => {}
                    None => {
                        self.runtime_error(reporter, "Condition must be a boolean.");
                        return Err(());
                    }
                }
            }
            Instruction::JumpIfNotMatch => {
                let offset = self.read_u16();
                let b = self.pop();
                let a = self.peek(0).clone();
                if a != b {
                    self.frame_mut().ip += offset as usize;
                }
            }
            Instruction::Loop => {
                let target = self.read_u16();
                self.frame_mut().ip = target as usize;
            }
            Instruction::DefineGlobal => {
                let name = self.read_constant();
                let value = self.pop();
                let name = name.as_str().expect("compiler only ever names globals with strings").to_string();
                self.globals.set(Rc::new(super::value::ObaString::new(name)), value);
            }
            Instruction::GetGlobal => {
                let name = self.read_constant();
                let name = name.as_str().expect("compiler only ever names globals with strings");
                let key = super::value::ObaString::new(name.to_string());
                match self.globals.get(&key) {
                    Some(value) => {
                        let value = value.clone();
                        self.push(value, reporter)?;
                    }
                    None => {
                        self.runtime_error(reporter, format!("Undefined variable: {}", name));
                        return Err(());
                    }
                }
            }
            Instruction::SetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().locals_base;
                self.stack[base + slot] = self.peek(0).clone();
            }
            Instruction::GetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().locals_base;
                let value = self.stack[base + slot].clone();
                self.push(value, reporter)?;
            }
            Instruction::GetUpvalue => {
                let slot = self.read_byte() as usize;
                let closure = self
                    .frame()
                    .closure
                    .clone()
                    .expect("GET_UPVALUE only valid inside a closure call");
                let value = self.read_upvalue(&closure.upvalues[slot]);
                self.push(value, reporter)?;
            }
            Instruction::SetUpvalue => {
                let slot = self.read_byte() as usize;
                let value = self.peek(0).clone();
                let closure = self
                    .frame()
                    .closure
                    .clone()
                    .expect("SET_UPVALUE only valid inside a closure call");
                self.write_upvalue(&closure.upvalues[slot], value);
            }
            Instruction::CloseUpvalue => {
                let value = self.pop();
                if let Some(cell) = self.open_upvalues.pop() {
                    *cell.borrow_mut() = Upvalue::Closed(value);
                }
            }
            Instruction::Closure => {
                let value = self.read_constant();
                let function = match value {
                    Value::Obj(Object::Function(f)) => f,
                    _ => unreachable!("CLOSURE's constant operand is always a Function"),
                };
                let upvalue_count = self.read_byte() as usize;
                let mut upvalues = Vec::with_capacity(upvalue_count);
                for _ in 0..upvalue_count {
                    let is_local = self.read_byte() != 0;
                    let index = self.read_byte() as usize;
                    if is_local {
                        let base = self.frame().locals_base;
                        let cell = Rc::new(RefCell::new(Upvalue::Open(base + index)));
                        self.open_upvalues.push(Rc::clone(&cell));
                        upvalues.push(cell);
                    } else {
                        let enclosing = self
                            .frame()
                            .closure
                            .clone()
                            .expect("non-local upvalue capture requires an enclosing closure");
                        upvalues.push(Rc::clone(&enclosing.upvalues[index]));
                    }
                }
                let closure = Rc::new(Closure { function, upvalues });
                let obj = Object::Closure(closure);
                self.objects.push(obj.clone());
                self.push(Value::Obj(obj), reporter)?;
            }
            Instruction::SwapStackTop => {
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            Instruction::Call => {
                let argc = self.read_byte() as usize;
                self.call(argc, reporter)?;
            }
            Instruction::Return => {
                let result = self.pop();
                let frame = self.frames.pop().expect("RETURN always has a frame to unwind");
                self.stack.truncate(frame.call_base);
                if self.frames.is_empty() {
                    self.push(result, reporter)?;
                    return Ok(Some(InterpretResult::Success));
                }
                self.push(result, reporter)?;
            }
            Instruction::Pop => {
                self.pop();
            }
            Instruction::Debug => {
                let value = self.pop();
                let _ = writeln!(out, "DEBUG: {}", value);
            }
            Instruction::Exit => return Ok(Some(InterpretResult::Success)),
        }
        Ok(None)
    }

    fn read_upvalue(&self, cell: &Rc<RefCell<Upvalue>>) -> Value {
        match &*cell.borrow() {
            Upvalue::Open(slot) => self.stack[*slot].clone(),
            Upvalue::Closed(value) => value.clone(),
        }
    }

    fn write_upvalue(&mut self, cell: &Rc<RefCell<Upvalue>>, value: Value) {
        let slot = match &*cell.borrow() {
            Upvalue::Open(slot) => Some(*slot),
            Upvalue::Closed(_) => None,
        };
        match slot {
            Some(slot) => self.stack[slot] = value,
            None => *cell.borrow_mut() = Upvalue::Closed(value),
        }
    }

    fn binary_add(&mut self, reporter: &mut dyn Reporter) -> Result<(), ()> {
        let b = self.pop();
        let a = self.pop();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                let result = x + y;
                self.push(Value::Number(result), reporter)
            }
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => {
                    let concatenated = format!("{}{}", x, y);
                    let value = self.allocate_string(concatenated);
                    self.push(value, reporter)
                }
                _ => {
                    self.runtime_error(reporter, "Operands must be two numbers or two strings.");
                    Err(())
                }
            },
        }
    }

    /// `MINUS`/`MULTIPLY`/`DIVIDE`: numeric-only. Unlike `ADD`, there is no
    /// string fallback here — the source's shared dispatcher concatenated
    /// strings for every arithmetic opcode; that is the defect fixed in
    /// this implementation (see DESIGN.md).
    fn binary_numeric(
        &mut self,
        reporter: &mut dyn Reporter,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), ()> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => self.push(Value::Number(op(x, y)), reporter),
            _ => {
                self.runtime_error(reporter, "Operands must be numbers.");
                Err(())
            }
        }
    }

    fn compare(&mut self, reporter: &mut dyn Reporter, op: impl Fn(f64, f64) -> bool) -> Result<(), ()> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => self.push(Value::Bool(op(x, y)), reporter),
            _ => {
                self.runtime_error(reporter, "Operands must be numbers.");
                Err(())
            }
        }
    }

    fn call(&mut self, argc: usize, reporter: &mut dyn Reporter) -> Result<(), ()> {
        let callee_index = self.stack.len() - 1 - argc;
        let callee = self.stack[callee_index].clone();
        let (function, closure) = match &callee {
            Value::Obj(Object::Function(f)) => (Rc::clone(f), None),
            Value::Obj(Object::Closure(c)) => (Rc::clone(&c.function), Some(Rc::clone(c))),
            _ => {
                self.runtime_error(reporter, "Can only call functions.");
                return Err(());
            }
        };
        if argc as u8 != function.arity {
            self.runtime_error(
                reporter,
                format!("Expected {} arguments but got {}.", function.arity, argc),
            );
            return Err(());
        }
        if self.frames.len() >= FRAMES_MAX {
            self.runtime_error(reporter, "Call stack overflow.");
            return Err(());
        }
        self.frames.push(CallFrame {
            function,
            closure,
            ip: 0,
            locals_base: callee_index + 1,
            call_base: callee_index,
        });
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

pub fn new_vm() -> Vm {
    Vm::new()
}

pub fn free_vm(vm: Vm) {
    drop(vm)
}
