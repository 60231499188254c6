//! Calls and returns.
//!
//! A call leaves its operands on the caller's stack until the callee's frame
//! has been allocated, so a collection triggered by the allocation still sees
//! the arguments. Only then are the callee and its arguments popped.

use smallvec::SmallVec;

use super::Vm;
use crate::{
    exception_private::{ExcType, RunResult},
    exception_public::TraceFrame,
    heap::{HeapData, HeapId, VALUE_SLOT_SIZE},
    io::PlatformIo,
    tracer::VmTracer,
    types::{
        Class, Code, Frame, FrameKind, Function, Instance,
        class::{class_lookup, exc_kind_of},
        code::{code_flags, code_name},
        dict::dict_set_str,
    },
    value::Value,
};

/// Operand-stack slots reserved beyond the compiler's estimate.
const STACK_SLACK: usize = 3;

/// What a value turns into when called.
enum Callee {
    Code(HeapId),
    Native(HeapId, u16),
    Class(HeapId),
    Method(Value, HeapId),
}

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    /// `CALL_FUNCTION`: low byte positional count, high byte keyword count.
    pub(super) fn call_function(&mut self, arg: usize) -> RunResult<()> {
        let argc = arg & 0xFF;
        if arg >> 8 != 0 {
            return Err(ExcType::type_error("keyword arguments are not supported"));
        }
        let callee = self.peek(argc)?;
        self.call_value(callee, argc)
    }

    fn classify_callee(&self, callee: Value) -> RunResult<Callee> {
        let Value::Ref(id) = callee else {
            return Err(ExcType::type_error_not_callable(callee.type_of(&self.heap)));
        };
        match self.heap.get(id) {
            HeapData::Function(f) => match self.heap.get(f.code) {
                HeapData::Code(_) => Ok(Callee::Code(id)),
                HeapData::NativeCode(nc) => Ok(Callee::Native(id, nc.index)),
                other => Err(ExcType::system_error(format!("function wraps a {}", other.type_of()))),
            },
            HeapData::Class(_) => Ok(Callee::Class(id)),
            HeapData::Method(m) => Ok(Callee::Method(m.receiver, m.function)),
            other => Err(ExcType::type_error_not_callable(other.type_of())),
        }
    }

    /// Calls `callee`, which sits below its `argc` arguments on the stack.
    fn call_value(&mut self, callee: Value, argc: usize) -> RunResult<()> {
        match self.classify_callee(callee)? {
            Callee::Code(func) => self.call_code(func, argc, FrameKind::Call),
            Callee::Native(func, index) => self.call_native(func, index, argc),
            Callee::Class(class) => self.instantiate(class, argc),
            Callee::Method(receiver, function) => {
                let stack = &mut self.cur_mut()?.stack;
                let slot = stack.len() - argc - 1;
                stack[slot] = Value::Ref(function);
                stack.insert(slot + 1, receiver);
                self.call_value(Value::Ref(function), argc + 1)
            }
        }
    }

    fn call_code(&mut self, func: HeapId, argc: usize, kind: FrameKind) -> RunResult<()> {
        let args = self.peek_n(argc)?;
        let frame = self.build_frame(func, &args, kind, self.frame)?;
        self.drop_n(argc + 1)?;
        self.enter_frame(frame)
    }

    fn enter_frame(&mut self, frame: HeapId) -> RunResult<()> {
        let (name, depth) = {
            let f = self.frame_ref(frame)?;
            let code = self.code_ref(f.code)?;
            (code_name(&self.heap, code.names), f.depth)
        };
        self.set_frame(Some(frame));
        self.tracer.on_call(&name, depth);
        Ok(())
    }

    /// Depth of a frame whose caller is `back`; MemoryError past the configured limit.
    fn depth_after(&self, back: Option<HeapId>) -> RunResult<usize> {
        let depth = match back {
            Some(b) => self.frame_ref(b)?.depth + 1,
            None => 1,
        };
        if depth > self.config.max_frame_depth {
            return Err(ExcType::MemoryError.msg(format!(
                "maximum frame depth {} exceeded",
                self.config.max_frame_depth
            )));
        }
        Ok(depth)
    }

    /// Allocates a frame for calling the bytecode function `func` with `args`.
    ///
    /// Binds positional parameters, fills missing trailing ones from the
    /// defaults, packs surplus arguments for `*args` functions and creates the
    /// cells. `args` must stay reachable until the frame is installed.
    pub(super) fn build_frame(
        &mut self,
        func: HeapId,
        args: &[Value],
        kind: FrameKind,
        back: Option<HeapId>,
    ) -> RunResult<HeapId> {
        let (code_id, globals, defaults, closure) = match self.heap.get(func) {
            HeapData::Function(f) => (f.code, f.globals, f.defaults, f.closure),
            other => return Err(ExcType::system_error(format!("cannot build a frame for {}", other.type_of()))),
        };
        let code = self.code_ref(code_id)?.clone();
        let defaults = match defaults.map(|d| self.heap.get(d)) {
            Some(HeapData::Tuple(items)) => items.clone(),
            _ => Vec::new(),
        };
        let argcount = usize::from(code.argcount);
        let varargs = code.has_flag(code_flags::VARARGS);
        let given = args.len();
        if (given > argcount && !varargs) || given + defaults.len() < argcount {
            let name = code_name(&self.heap, code.names);
            return Err(ExcType::type_error_arg_count(&name, argcount, given));
        }
        let depth = self.depth_after(back)?;

        let nlocals = usize::from(code.nlocals).max(argcount + usize::from(varargs));
        let mut locals: Vec<Option<Value>> = vec![None; nlocals];
        for (slot, v) in locals.iter_mut().zip(args.iter().take(argcount)) {
            *slot = Some(*v);
        }
        for (i, slot) in locals.iter_mut().enumerate().take(argcount).skip(given) {
            *slot = Some(defaults[i + defaults.len() - argcount]);
        }

        let mark = self.heap.temp_root_mark();
        let result = self.assemble_frame(
            Frame {
                back,
                func,
                code: code_id,
                globals,
                names: None,
                ip: 0,
                stack: Vec::with_capacity(usize::from(code.stacksize) + STACK_SLACK),
                locals,
                cells: Vec::new(),
                blocks: SmallVec::new(),
                kind,
                depth,
            },
            &code,
            varargs.then(|| args.get(argcount..).unwrap_or(&[])),
            closure,
        );
        self.heap.restore_temp_roots(mark);
        result
    }

    /// Allocates the objects a new frame owns, then the frame itself and its cells.
    fn assemble_frame(
        &mut self,
        mut frame: Frame,
        code: &Code,
        varargs: Option<&[Value]>,
        closure: Option<HeapId>,
    ) -> RunResult<HeapId> {
        if let Some(extra) = varargs {
            let tuple = self.heap.alloc_tuple(extra.to_vec())?;
            self.heap.push_temp_root(tuple)?;
            frame.locals[usize::from(code.argcount)] = Some(Value::Ref(tuple));
        }
        // code compiled without OPTIMIZED (class bodies) resolves names through a dict
        if !code.has_flag(code_flags::OPTIMIZED) {
            let names = self.heap.alloc_dict()?;
            self.heap.push_temp_root(names)?;
            frame.names = Some(names);
        }
        let cell_inits: Vec<Value> = code
            .cellvars
            .map(|id| match self.heap.get(id) {
                HeapData::Tuple(items) => items
                    .iter()
                    .map(|spec| {
                        spec.as_int()
                            .and_then(|i| usize::try_from(i).ok())
                            .and_then(|i| frame.locals.get(i).copied().flatten())
                            .unwrap_or(Value::None)
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();
        let free_cells: Vec<HeapId> = match closure.map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(items)) => items.iter().filter_map(|v| v.ref_id()).collect(),
            _ => Vec::new(),
        };

        let fid = self.heap.allocate(HeapData::Frame(frame))?;
        self.heap.push_temp_root(fid)?;
        for initial in cell_inits {
            let cell = self.heap.allocate(HeapData::Cell(initial))?;
            self.heap.reserve_growth(fid, VALUE_SLOT_SIZE, &[Value::Ref(cell)])?;
            self.frame_mut(fid)?.cells.push(cell);
        }
        if !free_cells.is_empty() {
            self.heap.reserve_growth(fid, free_cells.len() * VALUE_SLOT_SIZE, &[])?;
            self.frame_mut(fid)?.cells.extend(free_cells);
        }
        Ok(fid)
    }

    /// Allocates a frame that runs a module body with the module's dict as both globals and names.
    pub(super) fn module_frame(&mut self, module: HeapId, kind: FrameKind, back: Option<HeapId>) -> RunResult<HeapId> {
        let (code_id, attrs) = match self.heap.get(module) {
            HeapData::Module(m) => (m.code, m.attrs),
            other => return Err(ExcType::system_error(format!("expected module, got {}", other.type_of()))),
        };
        let (nlocals, stacksize) = {
            let code = self.code_ref(code_id)?;
            (usize::from(code.nlocals), usize::from(code.stacksize))
        };
        let depth = self.depth_after(back)?;
        self.heap.allocate(HeapData::Frame(Frame {
            back,
            func: module,
            code: code_id,
            globals: attrs,
            names: Some(attrs),
            ip: 0,
            stack: Vec::with_capacity(stacksize + STACK_SLACK),
            locals: vec![None; nlocals],
            cells: Vec::new(),
            blocks: SmallVec::new(),
            kind,
            depth,
        }))
    }

    /// Runs an imported module's body; its frame returns the module itself.
    pub(super) fn push_module_frame(&mut self, module: HeapId) -> RunResult<()> {
        let frame = self.module_frame(module, FrameKind::Import(module), self.frame)?;
        self.enter_frame(frame)
    }

    /// Pops the current frame and hands `value` to the caller according to the frame's kind.
    pub(super) fn return_from_frame(&mut self, value: Value) -> RunResult<()> {
        let (back, kind, depth) = {
            let f = self.cur()?;
            (f.back, f.kind, f.depth)
        };
        self.set_frame(back);
        self.tracer.on_return(depth - 1);
        match kind {
            FrameKind::Call => self.push(value),
            FrameKind::Import(module) => self.push(Value::Ref(module)),
            FrameKind::Init(instance) => {
                if !value.is_none() {
                    return Err(ExcType::type_error(format!(
                        "__init__() should return None, not '{}'",
                        value.type_of(&self.heap)
                    )));
                }
                self.push(instance)
            }
            FrameKind::Entry => Ok(()),
        }
    }

    /// Calls a native function. Its arguments move into the native frame for the duration.
    fn call_native(&mut self, func: HeapId, index: u16, argc: usize) -> RunResult<()> {
        let entry = *self
            .natives
            .get(index)
            .ok_or_else(|| ExcType::system_error(format!("native function {index} is not registered")))?;
        let args = self.peek_n(argc)?;
        let depth = self.cur()?.depth + 1;
        let back = self.frame;
        self.heap.reserve_growth(self.native_frame, argc * VALUE_SLOT_SIZE, &[])?;
        if let HeapData::NativeFrame(nf) = self.heap.get_mut(self.native_frame) {
            nf.func = Some(func);
            nf.back = back;
            nf.locals.clone_from(&args);
        }
        self.drop_n(argc + 1)?;
        self.tracer.on_call(entry.name, depth);

        let (result, spawns, collect) = {
            let mut call = self.native_call(entry.name, &args)?;
            let result = (entry.func)(&mut call);
            (result, call.take_spawns(), call.collection_requested())
        };
        // the result is pushed before any thread is created so it stays reachable
        let outcome = match result {
            Ok(v) => self.push(v).and_then(|()| {
                spawns
                    .into_iter()
                    .try_for_each(|f| self.spawn_function_thread(f).map(|_| ()))
            }),
            Err(err) => Err(err),
        };

        if let HeapData::NativeFrame(nf) = self.heap.get_mut(self.native_frame) {
            nf.func = None;
            nf.back = None;
            nf.locals.clear();
        }
        self.heap.refresh_size(self.native_frame);
        self.tracer.on_return(depth - 1);
        if collect && outcome.is_ok() {
            let freed = self.collect_garbage();
            tracing::debug!(freed, "collection requested by program");
        }
        outcome.map_err(|mut err| {
            err.push_frame(TraceFrame::Native {
                name: entry.name.to_owned(),
            });
            err
        })
    }

    /// Calling a class creates an instance and runs `__init__` on it if the class chain has one.
    fn instantiate(&mut self, class: HeapId, argc: usize) -> RunResult<()> {
        let attrs = self.heap.alloc_dict()?;
        let instance = Value::Ref(self.heap.allocate(HeapData::Instance(Instance { class, attrs }))?);
        // the instance takes the class's stack slot; the class stays reachable through it
        {
            let stack = &mut self.cur_mut()?.stack;
            let slot = stack.len() - argc - 1;
            stack[slot] = instance;
        }
        match class_lookup(&self.heap, class, b"__init__") {
            Some(Value::Ref(init)) if matches!(self.classify_callee(Value::Ref(init)), Ok(Callee::Code(_))) => {
                let stack = &mut self.cur_mut()?.stack;
                let slot = stack.len() - argc - 1;
                stack.insert(slot, Value::Ref(init));
                self.call_code(init, argc + 1, FrameKind::Init(instance))
            }
            Some(other) => Err(ExcType::type_error(format!(
                "__init__ must be a bytecode function, not '{}'",
                other.type_of(&self.heap)
            ))),
            None => {
                if exc_kind_of(&self.heap, class).is_some() {
                    let args = self.peek_n(argc)?;
                    let tuple = self.heap.alloc_tuple(args)?;
                    dict_set_str(&mut self.heap, attrs, b"args", Value::Ref(tuple))?;
                } else if argc > 0 {
                    return Err(ExcType::type_error("this constructor takes no arguments"));
                }
                self.drop_n(argc)
            }
        }
    }

    /// `MAKE_FUNCTION n` / `MAKE_CLOSURE n`: TOS is the code, below it the
    /// closure tuple (closures only), below that `n` default values.
    pub(super) fn make_function(&mut self, ndefaults: usize, closure: bool) -> RunResult<()> {
        let operands = ndefaults + 1 + usize::from(closure);
        let code = self.peek(0)?;
        let code_id = code
            .ref_id()
            .filter(|id| matches!(self.heap.get(*id), HeapData::Code(_) | HeapData::NativeCode(_)))
            .ok_or_else(|| {
                ExcType::system_error(format!(
                    "MAKE_FUNCTION needs a code object, got {}",
                    code.type_of(&self.heap)
                ))
            })?;
        let closure = if closure {
            let cells = self.peek(1)?;
            Some(
                cells
                    .ref_id()
                    .filter(|id| matches!(self.heap.get(*id), HeapData::Tuple(_)))
                    .ok_or_else(|| ExcType::system_error("MAKE_CLOSURE needs a tuple of cells"))?,
            )
        } else {
            None
        };
        let globals = self.cur()?.globals;
        let mut defaults = self.peek_n(operands)?;
        defaults.truncate(ndefaults);

        let mark = self.heap.temp_root_mark();
        let defaults = if defaults.is_empty() {
            None
        } else {
            let tuple = self.heap.alloc_tuple(defaults)?;
            self.heap.push_temp_root(tuple)?;
            Some(tuple)
        };
        let func = self.heap.allocate(HeapData::Function(Function {
            code: code_id,
            globals,
            attrs: None,
            defaults,
            closure,
        }));
        self.heap.restore_temp_roots(mark);
        let func = func?;
        self.drop_n(operands)?;
        self.push(Value::Ref(func))
    }

    /// `BUILD_CLASS`: TOS is the attribute dict, TOS1 the bases tuple, TOS2 the name.
    pub(super) fn build_class(&mut self) -> RunResult<()> {
        let attrs = self.peek(0)?;
        let bases = self.peek(1)?;
        let name = self.peek(2)?;
        let attrs = attrs
            .ref_id()
            .filter(|id| matches!(self.heap.get(*id), HeapData::Dict(_)))
            .ok_or_else(|| ExcType::type_error("class body must produce a dict"))?;
        let name = name
            .ref_id()
            .filter(|id| matches!(self.heap.get(*id), HeapData::Str(_)))
            .ok_or_else(|| ExcType::type_error("class name must be a string"))?;
        let bases = match bases {
            Value::None => None,
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Tuple(_)) => Some(id),
            other => {
                return Err(ExcType::type_error(format!(
                    "class bases must be a tuple, not '{}'",
                    other.type_of(&self.heap)
                )));
            }
        };
        let class = self.heap.allocate(HeapData::Class(Class {
            name,
            attrs,
            bases,
            exc_kind: None,
        }))?;
        self.drop_n(3)?;
        self.push(Value::Ref(class))
    }
}
