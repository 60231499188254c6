//! The bytecode interpreter.
//!
//! Everything that has to survive a collection lives in the heap: frames,
//! threads and the native frame are heap objects reachable from permanent
//! roots. [`Vm`] holds handles to them together with the host collaborators,
//! the native function table and the module table.
//!
//! Execution is one instruction at a time. Between instructions the loop
//! honours reschedule requests from the tick and runs interval collections,
//! so thread switches and GC never observe a half-executed instruction.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod scheduler;

use std::{collections::VecDeque, sync::Arc};

use crate::{
    builtins::{self, NativeCall, NativeFn, NativeTable},
    bytecode::op::{Instruction, Opcode, decode_at},
    config::VmConfig,
    exception_private::{ExcType, RunError, RunResult},
    exception_public::format_report,
    heap::{Heap, HeapData, HeapId, HeapStats},
    image::{self, TableEntry},
    io::PlatformIo,
    memspace::{MemSpace, MemSpaces},
    modules::CodeLoader,
    object::{self, PrintState},
    periodic::Periodic,
    tracer::{NoopTracer, VmTracer},
    types::{Block, BlockKind, Code, Frame},
    value::Value,
};

pub(crate) use binary::{BinOp, numeric_op};

/// How a call to [`Vm::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every thread ran to completion.
    Completed,
    /// A `STOP_CODE` instruction halted the interpreter.
    Stopped,
}

/// What the loop does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Stop,
}

/// Reason a frame's block stack is being unwound.
#[derive(Debug)]
pub(super) enum Unwind {
    Exception(RunError),
    Return(Value),
    Break,
    /// `continue` inside a `try`; carries the loop's restart offset.
    Continue(usize),
}

/// Codes pushed for `END_FINALLY` when a `finally` block runs on a non-exception exit.
pub(super) mod why {
    pub const RETURN: i32 = 0x08;
    pub const BREAK: i32 = 0x10;
    pub const CONTINUE: i32 = 0x20;
}

/// The interpreter runtime.
///
/// `P` supplies byte I/O; `Tr` receives execution events and defaults to the
/// zero-cost [`NoopTracer`].
pub struct Vm<P: PlatformIo, Tr: VmTracer = NoopTracer> {
    pub(crate) heap: Heap,
    pub(crate) mem: MemSpaces,
    pub(crate) io: P,
    pub(crate) tracer: Tr,
    pub(crate) config: VmConfig,
    pub(crate) periodic: Arc<Periodic>,
    pub(crate) natives: NativeTable,
    pub(crate) modules: Vec<TableEntry>,
    pub(crate) loader: Option<Box<dyn CodeLoader>>,
    /// Dict searched after the globals by `LOAD_NAME` and `LOAD_GLOBAL`.
    pub(crate) builtins: HeapId,
    pub(crate) object_class: HeapId,
    /// Builtin exception classes indexed by `ExcType as usize`.
    pub(crate) exc_classes: Vec<HeapId>,
    native_frame: HeapId,
    /// Run queue; the running thread is at the front.
    threads: VecDeque<HeapId>,
    /// Innermost frame of the running thread.
    frame: Option<HeapId>,
    main_thread: Option<HeapId>,
    next_thread_id: u32,
    print_state: PrintState,
}

impl<P: PlatformIo> Vm<P> {
    /// Creates a runtime with the builtins installed and no modules loaded.
    pub fn new(config: VmConfig, mem: MemSpaces, io: P) -> RunResult<Self> {
        Self::with_tracer(config, mem, io, NoopTracer)
    }
}

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    pub fn with_tracer(config: VmConfig, mem: MemSpaces, io: P, tracer: Tr) -> RunResult<Self> {
        let mut heap = Heap::from_config(&config);
        let builtins = heap.alloc_dict()?;
        heap.add_root(builtins);
        let native_frame = heap.allocate(HeapData::NativeFrame(crate::types::NativeFrame::default()))?;
        heap.add_root(native_frame);
        let mut natives = NativeTable::new();
        let classes = builtins::install(&mut heap, &mut natives, builtins)?;
        tracing::debug!(
            heap_size = config.heap_size,
            chunk_size = config.chunk_size,
            used_chunks = heap.used_chunks(),
            "runtime initialised"
        );
        Ok(Self {
            heap,
            mem,
            io,
            tracer,
            periodic: Arc::new(Periodic::new(config.timeslice_ms)),
            config,
            natives,
            modules: Vec::new(),
            loader: None,
            builtins,
            object_class: classes.object,
            exc_classes: classes.exceptions,
            native_frame,
            threads: VecDeque::new(),
            frame: None,
            main_thread: None,
            next_thread_id: 0,
            print_state: PrintState::default(),
        })
    }

    // ------------------------------------------------------------------
    // Host interface
    // ------------------------------------------------------------------

    /// Scans the module table at `addr` in `space` and registers its code images.
    ///
    /// Returns the number of modules found.
    pub fn load_module_table(&mut self, space: MemSpace, addr: usize) -> RunResult<usize> {
        let entries = image::load_table(&mut self.heap, &self.mem, space, addr)?;
        for entry in &entries {
            self.heap.add_root(entry.code);
        }
        let count = entries.len();
        self.modules.extend(entries);
        tracing::info!(count, %space, "module table loaded");
        Ok(count)
    }

    /// Registers a native function under an image native-table index.
    pub fn register_native(&mut self, index: u16, name: &'static str, func: NativeFn) -> RunResult<()> {
        self.natives.register(index, name, func)
    }

    /// The registered module images, in table order.
    #[must_use]
    pub fn module_table(&self) -> &[TableEntry] {
        &self.modules
    }

    /// Names of the registered modules, in table order.
    pub fn module_names(&self) -> impl Iterator<Item = &[u8]> {
        self.modules.iter().map(|e| e.name.as_slice())
    }

    /// Handle to the tick state, for the timer context.
    #[must_use]
    pub fn periodic(&self) -> Arc<Periodic> {
        Arc::clone(&self.periodic)
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    #[must_use]
    pub fn mem(&self) -> &MemSpaces {
        &self.mem
    }

    #[must_use]
    pub fn io(&self) -> &P {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut P {
        &mut self.io
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    #[must_use]
    pub fn print_state(&self) -> PrintState {
        self.print_state
    }

    /// Number of threads still scheduled.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Handle of the builtin class for `kind`.
    #[must_use]
    pub fn exception_class(&self, kind: ExcType) -> HeapId {
        self.exc_classes[kind as usize]
    }

    /// Writes the report for an unhandled error to the platform output.
    pub fn report_error(&mut self, err: &RunError) {
        tracing::warn!(kind = %err.kind(), code = err.code(), "unhandled exception");
        let report = format_report(err);
        if self.io.put_bytes(report.as_bytes()).and_then(|()| self.io.flush()).is_err() {
            tracing::error!("could not write error report");
        }
    }

    /// Imports `module` and runs it as the main thread until every thread has finished.
    pub fn run_module(&mut self, module: &str) -> RunResult<RunOutcome> {
        let name = self.heap.alloc_str(module.as_bytes())?;
        let mark = self.heap.temp_root_mark();
        self.heap.push_temp_root(name)?;
        let result = self.import_module(Value::Ref(name));
        self.heap.restore_temp_roots(mark);
        let module = result?;
        let thread = self.spawn_module_thread(module)?;
        self.main_thread = Some(thread);
        self.run()
    }

    /// Queues a secondary thread running the body of an already imported
    /// module; [`Vm::run`] executes it.
    pub fn spawn_module(&mut self, module: HeapId) -> RunResult<()> {
        self.spawn_module_thread(module).map(|_| ())
    }

    /// Runs scheduled threads until all have finished, the main thread
    /// fails, or `STOP_CODE` executes.
    pub fn run(&mut self) -> RunResult<RunOutcome> {
        let mark = self.heap.temp_root_mark();
        self.frame = self.front_thread_frame();
        loop {
            if self.periodic.take_reschedule() {
                self.reschedule();
            }
            if self.heap.should_collect() {
                self.collect_garbage();
            }
            if self.frame.is_none() {
                if self.threads.is_empty() {
                    return Ok(RunOutcome::Completed);
                }
                self.retire_current_thread();
                continue;
            }
            match self.step() {
                Ok(Flow::Next) => {}
                Ok(Flow::Stop) => {
                    tracing::info!("stop code reached");
                    return Ok(RunOutcome::Stopped);
                }
                Err(err) => {
                    self.heap.restore_temp_roots(mark);
                    if let Err(err) = self.handle_exception(err) {
                        let was_main = self.threads.front().copied() == self.main_thread;
                        self.retire_current_thread();
                        if was_main {
                            return Err(err);
                        }
                        self.report_error(&err);
                    }
                }
            }
        }
    }

    /// Runs a full collection and reports it to the tracer.
    pub fn collect_garbage(&mut self) -> usize {
        let freed = self.heap.collect_garbage();
        self.tracer.on_gc(freed, self.heap.used_chunks());
        freed
    }

    // ------------------------------------------------------------------
    // Frame access
    // ------------------------------------------------------------------

    pub(super) fn current_frame(&self) -> RunResult<HeapId> {
        self.frame.ok_or_else(|| ExcType::system_error("no frame is executing"))
    }

    pub(super) fn frame_ref(&self, fid: HeapId) -> RunResult<&Frame> {
        match self.heap.get(fid) {
            HeapData::Frame(f) => Ok(f),
            other => Err(ExcType::system_error(format!("expected frame, got {}", other.type_of()))),
        }
    }

    pub(super) fn frame_mut(&mut self, fid: HeapId) -> RunResult<&mut Frame> {
        match self.heap.get_mut(fid) {
            HeapData::Frame(f) => Ok(f),
            other => Err(ExcType::system_error(format!("expected frame, got {}", other.type_of()))),
        }
    }

    pub(super) fn cur(&self) -> RunResult<&Frame> {
        self.frame_ref(self.current_frame()?)
    }

    pub(super) fn cur_mut(&mut self) -> RunResult<&mut Frame> {
        let fid = self.current_frame()?;
        self.frame_mut(fid)
    }

    pub(super) fn code_ref(&self, id: HeapId) -> RunResult<&Code> {
        match self.heap.get(id) {
            HeapData::Code(c) => Ok(c),
            other => Err(ExcType::system_error(format!("expected code, got {}", other.type_of()))),
        }
    }

    /// Makes `frame` the running thread's innermost frame.
    pub(super) fn set_frame(&mut self, frame: Option<HeapId>) {
        self.frame = frame;
        if let Some(&thread) = self.threads.front()
            && let HeapData::Thread(t) = self.heap.get_mut(thread)
        {
            t.frame = frame;
        }
    }

    // ------------------------------------------------------------------
    // Operand stack
    // ------------------------------------------------------------------

    pub(super) fn push(&mut self, v: Value) -> RunResult<()> {
        self.cur_mut()?.stack.push(v);
        Ok(())
    }

    pub(super) fn pop(&mut self) -> RunResult<Value> {
        self.cur_mut()?.stack.pop().ok_or_else(stack_underflow)
    }

    /// The value `n` slots below the top; `peek(0)` is TOS.
    pub(super) fn peek(&self, n: usize) -> RunResult<Value> {
        let stack = &self.cur()?.stack;
        stack
            .len()
            .checked_sub(n + 1)
            .map(|i| stack[i])
            .ok_or_else(stack_underflow)
    }

    /// Copies of the top `n` values, deepest first.
    pub(super) fn peek_n(&self, n: usize) -> RunResult<Vec<Value>> {
        let stack = &self.cur()?.stack;
        let start = stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        Ok(stack[start..].to_vec())
    }

    pub(super) fn drop_n(&mut self, n: usize) -> RunResult<()> {
        let stack = &mut self.cur_mut()?.stack;
        let keep = stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        stack.truncate(keep);
        Ok(())
    }

    pub(super) fn replace_top(&mut self, v: Value) -> RunResult<()> {
        let stack = &mut self.cur_mut()?.stack;
        let top = stack.last_mut().ok_or_else(stack_underflow)?;
        *top = v;
        Ok(())
    }

    /// Moves TOS down `n - 1` places: `[a, b, c]` becomes `[c, a, b]` for `n = 3`.
    fn rotate(&mut self, n: usize) -> RunResult<()> {
        let stack = &mut self.cur_mut()?.stack;
        let start = stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        stack[start..].rotate_right(1);
        Ok(())
    }

    fn jump(&mut self, target: usize) -> RunResult<()> {
        self.cur_mut()?.ip = target;
        Ok(())
    }

    fn jump_forward(&mut self, delta: usize) -> RunResult<()> {
        self.cur_mut()?.ip += delta;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Code-object tables
    // ------------------------------------------------------------------

    fn tuple_item(&self, tuple: HeapId, index: usize, what: &str) -> RunResult<Value> {
        match self.heap.get(tuple) {
            HeapData::Tuple(items) => items
                .get(index)
                .copied()
                .ok_or_else(|| ExcType::system_error(format!("{what} index {index} out of range"))),
            _ => Err(ExcType::system_error(format!("{what} table is not a tuple"))),
        }
    }

    pub(super) fn const_at(&self, index: usize) -> RunResult<Value> {
        let code = self.code_ref(self.cur()?.code)?;
        self.tuple_item(code.consts, index, "constant")
    }

    pub(super) fn name_at(&self, index: usize) -> RunResult<Value> {
        let code = self.code_ref(self.cur()?.code)?;
        self.tuple_item(code.names, index, "name")
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn fetch(&mut self) -> RunResult<Instruction> {
        let (code, ip) = {
            let f = self.cur()?;
            (f.code, f.ip)
        };
        let bytecode = self.code_ref(code)?.bytecode;
        if ip >= bytecode.len {
            return Err(ExcType::system_error("instruction pointer ran past the end of the code"));
        }
        let ins = decode_at(&self.mem, &bytecode, ip)?;
        self.cur_mut()?.ip = ip + ins.len();
        Ok(ins)
    }

    fn step(&mut self) -> RunResult<Flow> {
        let first = self.fetch()?;
        let (offset, opcode, arg) = if first.opcode == Opcode::ExtendedArg {
            let next = self.fetch()?;
            let wide = (usize::from(first.arg()) << 16) | usize::from(next.arg());
            (first.offset, next.opcode, wide)
        } else {
            (first.offset, first.opcode, usize::from(first.arg()))
        };
        let (stack_depth, frame_depth) = {
            let f = self.cur()?;
            (f.stack.len(), f.depth)
        };
        self.tracer.on_instruction(offset, opcode, stack_depth, frame_depth);

        match opcode {
            // ============================================================
            // Stack manipulation
            // ============================================================
            Opcode::StopCode => return Ok(Flow::Stop),
            Opcode::Nop => {}
            Opcode::PopTop => {
                self.pop()?;
            }
            Opcode::RotTwo => self.rotate(2)?,
            Opcode::RotThree => self.rotate(3)?,
            Opcode::RotFour => self.rotate(4)?,
            Opcode::DupTop => {
                let v = self.peek(0)?;
                self.push(v)?;
            }
            Opcode::DupTopx => {
                if !(1..=5).contains(&arg) {
                    return Err(ExcType::system_error(format!("bad DUP_TOPX count {arg}")));
                }
                let top = self.peek_n(arg)?;
                self.cur_mut()?.stack.extend(top);
            }

            // ============================================================
            // Operators
            // ============================================================
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryInvert => {
                let v = self.peek(0)?;
                let result = self.unary_op(opcode, v)?;
                self.replace_top(result)?;
            }
            Opcode::UnaryNot => {
                let v = self.peek(0)?;
                let result = Value::Bool(object::is_false(&self.heap, v));
                self.replace_top(result)?;
            }
            Opcode::BinaryPower | Opcode::InplacePower => self.binary_opcode(BinOp::Pow, opcode)?,
            Opcode::BinaryMultiply | Opcode::InplaceMultiply => self.binary_opcode(BinOp::Mul, opcode)?,
            Opcode::BinaryDivide | Opcode::InplaceDivide => self.binary_opcode(BinOp::Div, opcode)?,
            Opcode::BinaryFloorDivide | Opcode::InplaceFloorDivide => {
                self.binary_opcode(BinOp::FloorDiv, opcode)?;
            }
            Opcode::BinaryTrueDivide | Opcode::InplaceTrueDivide => self.binary_opcode(BinOp::TrueDiv, opcode)?,
            Opcode::BinaryModulo | Opcode::InplaceModulo => self.binary_opcode(BinOp::Mod, opcode)?,
            Opcode::BinaryAdd | Opcode::InplaceAdd => self.binary_opcode(BinOp::Add, opcode)?,
            Opcode::BinarySubtract | Opcode::InplaceSubtract => self.binary_opcode(BinOp::Sub, opcode)?,
            Opcode::BinaryLshift | Opcode::InplaceLshift => self.binary_opcode(BinOp::LShift, opcode)?,
            Opcode::BinaryRshift | Opcode::InplaceRshift => self.binary_opcode(BinOp::RShift, opcode)?,
            Opcode::BinaryAnd | Opcode::InplaceAnd => self.binary_opcode(BinOp::And, opcode)?,
            Opcode::BinaryXor | Opcode::InplaceXor => self.binary_opcode(BinOp::Xor, opcode)?,
            Opcode::BinaryOr | Opcode::InplaceOr => self.binary_opcode(BinOp::Or, opcode)?,
            Opcode::CompareOp => self.compare_op(arg)?,

            // ============================================================
            // Containers
            // ============================================================
            Opcode::BinarySubscr => self.binary_subscr()?,
            Opcode::Slice0 => self.slice_opcode(false, false)?,
            Opcode::Slice1 => self.slice_opcode(true, false)?,
            Opcode::Slice2 => self.slice_opcode(false, true)?,
            Opcode::Slice3 => self.slice_opcode(true, true)?,
            Opcode::StoreSubscr => self.store_subscr()?,
            Opcode::DeleteSubscr => self.delete_subscr()?,
            Opcode::StoreMap => self.store_map()?,
            Opcode::BuildTuple => self.build_sequence(arg, false)?,
            Opcode::BuildList => self.build_sequence(arg, true)?,
            Opcode::BuildMap => {
                let dict = self.heap.alloc_dict()?;
                self.push(Value::Ref(dict))?;
            }
            Opcode::ListAppend => self.list_append(arg)?,
            Opcode::UnpackSequence => self.unpack_sequence(arg)?,
            Opcode::GetIter => self.get_iter()?,
            Opcode::ForIter => {
                if !self.for_iter()? {
                    self.pop()?;
                    self.jump_forward(arg)?;
                }
            }

            // ============================================================
            // Printing
            // ============================================================
            Opcode::PrintExpr => {
                let v = self.pop()?;
                self.print_value(v, true)?;
                if !v.is_none() {
                    self.io.put_byte(b'\n')?;
                }
                self.print_state.soft_space = false;
            }
            Opcode::PrintItem => {
                let v = self.pop()?;
                if self.print_state.soft_space {
                    self.io.put_byte(b' ')?;
                }
                let ends_line = self.print_value(v, false)?;
                self.print_state.soft_space = !ends_line;
            }
            Opcode::PrintNewline => {
                self.io.put_byte(b'\n')?;
                self.print_state.soft_space = false;
            }

            // ============================================================
            // Variables
            // ============================================================
            Opcode::LoadConst => {
                let v = self.const_at(arg)?;
                self.push(v)?;
            }
            Opcode::LoadLocals => {
                let names = self
                    .cur()?
                    .names
                    .ok_or_else(|| ExcType::system_error("no locals dict"))?;
                self.push(Value::Ref(names))?;
            }
            Opcode::LoadName => {
                let name = self.name_at(arg)?;
                let v = self.load_name(name)?;
                self.push(v)?;
            }
            Opcode::StoreName => {
                let name = self.name_at(arg)?;
                self.store_name(name)?;
            }
            Opcode::DeleteName => {
                let name = self.name_at(arg)?;
                self.delete_name(name)?;
            }
            Opcode::LoadGlobal => {
                let name = self.name_at(arg)?;
                let v = self.load_global(name)?;
                self.push(v)?;
            }
            Opcode::StoreGlobal => {
                let name = self.name_at(arg)?;
                let globals = self.cur()?.globals;
                self.store_into(globals, name)?;
            }
            Opcode::DeleteGlobal => {
                let name = self.name_at(arg)?;
                let globals = self.cur()?.globals;
                self.delete_from(globals, name)?;
            }
            Opcode::LoadFast => {
                let v = self
                    .cur()?
                    .locals
                    .get(arg)
                    .copied()
                    .ok_or_else(|| ExcType::system_error(format!("local index {arg} out of range")))?
                    .ok_or_else(|| ExcType::NameError.msg("local variable referenced before assignment"))?;
                self.push(v)?;
            }
            Opcode::StoreFast => {
                let v = self.pop()?;
                let slot = self
                    .cur_mut()?
                    .locals
                    .get_mut(arg)
                    .ok_or_else(|| ExcType::system_error(format!("local index {arg} out of range")))?;
                *slot = Some(v);
            }
            Opcode::DeleteFast => {
                let slot = self
                    .cur_mut()?
                    .locals
                    .get_mut(arg)
                    .ok_or_else(|| ExcType::system_error(format!("local index {arg} out of range")))?;
                if slot.take().is_none() {
                    return Err(ExcType::NameError.msg("local variable referenced before assignment"));
                }
            }
            Opcode::LoadClosure => {
                let cell = self.cell_at(arg)?;
                self.push(Value::Ref(cell))?;
            }
            Opcode::LoadDeref => {
                let cell = self.cell_at(arg)?;
                let v = match self.heap.get(cell) {
                    HeapData::Cell(v) => *v,
                    other => return Err(ExcType::system_error(format!("expected cell, got {}", other.type_of()))),
                };
                self.push(v)?;
            }
            Opcode::StoreDeref => {
                let v = self.pop()?;
                let cell = self.cell_at(arg)?;
                if let HeapData::Cell(slot) = self.heap.get_mut(cell) {
                    *slot = v;
                }
            }

            // ============================================================
            // Attributes and modules
            // ============================================================
            Opcode::LoadAttr => {
                let name = self.name_at(arg)?;
                let obj = self.peek(0)?;
                let v = self.load_attr(obj, name)?;
                self.replace_top(v)?;
            }
            Opcode::StoreAttr => {
                let name = self.name_at(arg)?;
                self.store_attr(name)?;
            }
            Opcode::DeleteAttr => {
                let name = self.name_at(arg)?;
                let obj = self.pop()?;
                self.delete_attr(obj, name)?;
            }
            Opcode::ImportName => {
                let name = self.name_at(arg)?;
                // fromlist and level
                self.drop_n(2)?;
                let module = self.import_module(name)?;
                self.push_module_frame(module)?;
            }
            Opcode::ImportFrom => {
                let name = self.name_at(arg)?;
                let module = self.peek(0)?;
                let v = self.load_attr(module, name)?;
                self.push(v)?;
            }

            // ============================================================
            // Control flow
            // ============================================================
            Opcode::JumpForward => self.jump_forward(arg)?,
            Opcode::JumpAbsolute => self.jump(arg)?,
            Opcode::PopJumpIfFalse => {
                let v = self.pop()?;
                if object::is_false(&self.heap, v) {
                    self.jump(arg)?;
                }
            }
            Opcode::PopJumpIfTrue => {
                let v = self.pop()?;
                if !object::is_false(&self.heap, v) {
                    self.jump(arg)?;
                }
            }
            Opcode::JumpIfFalseOrPop => {
                let v = self.peek(0)?;
                if object::is_false(&self.heap, v) {
                    self.jump(arg)?;
                } else {
                    self.pop()?;
                }
            }
            Opcode::JumpIfTrueOrPop => {
                let v = self.peek(0)?;
                if object::is_false(&self.heap, v) {
                    self.pop()?;
                } else {
                    self.jump(arg)?;
                }
            }
            Opcode::SetupLoop => self.push_block(BlockKind::Loop, arg)?,
            Opcode::SetupExcept => self.push_block(BlockKind::Except, arg)?,
            Opcode::SetupFinally => self.push_block(BlockKind::Finally, arg)?,
            Opcode::PopBlock => {
                let f = self.cur_mut()?;
                let block = f
                    .blocks
                    .pop()
                    .ok_or_else(|| ExcType::system_error("POP_BLOCK with an empty block stack"))?;
                f.stack.truncate(block.level);
            }
            Opcode::BreakLoop => self.unwind(Unwind::Break)?,
            Opcode::ContinueLoop => self.unwind(Unwind::Continue(arg))?,
            Opcode::ReturnValue => {
                let v = self.pop()?;
                self.unwind(Unwind::Return(v))?;
            }
            Opcode::EndFinally => self.end_finally()?,
            Opcode::RaiseVarargs => return Err(self.raise_varargs(arg)),

            // ============================================================
            // Functions and classes
            // ============================================================
            Opcode::CallFunction => self.call_function(arg)?,
            Opcode::MakeFunction => self.make_function(arg, false)?,
            Opcode::MakeClosure => self.make_function(arg, true)?,
            Opcode::BuildClass => self.build_class()?,

            Opcode::ExtendedArg => {
                return Err(ExcType::system_error("EXTENDED_ARG must be followed by an instruction"));
            }
            other => {
                debug_assert!(!other.is_supported(), "{other} fell through dispatch");
                return Err(ExcType::system_error(format!("unsupported opcode {other}")));
            }
        }
        Ok(Flow::Next)
    }

    fn push_block(&mut self, kind: BlockKind, delta: usize) -> RunResult<()> {
        let f = self.cur_mut()?;
        let block = Block {
            kind,
            handler: f.ip + delta,
            level: f.stack.len(),
        };
        f.blocks.push(block);
        Ok(())
    }

    fn cell_at(&self, index: usize) -> RunResult<HeapId> {
        self.cur()?
            .cells
            .get(index)
            .copied()
            .ok_or_else(|| ExcType::system_error(format!("cell index {index} out of range")))
    }

    /// Writes `v` for `print`; returns whether the output ended a line.
    fn print_value(&mut self, v: Value, is_expr_repr: bool) -> RunResult<bool> {
        let mut out = Vec::new();
        object::print(&self.heap, v, is_expr_repr, false, &mut out, &mut self.print_state)?;
        self.io.put_bytes(&out)?;
        Ok(out.last() == Some(&b'\n'))
    }

    /// Builds the context handed to a native function.
    pub(super) fn native_call(&mut self, name: &'static str, args: &[Value]) -> RunResult<NativeCall<'_>> {
        let (globals, locals) = match self.frame {
            Some(fid) => {
                let f = self.frame_ref(fid)?;
                (f.globals, f.names)
            }
            None => (self.builtins, None),
        };
        Ok(NativeCall::new(
            name,
            args,
            &mut self.heap,
            &mut self.io,
            &self.periodic,
            builtins::CallScope {
                globals,
                locals,
                object_class: self.object_class,
            },
        ))
    }
}

fn stack_underflow() -> RunError {
    ExcType::system_error("operand stack underflow")
}
