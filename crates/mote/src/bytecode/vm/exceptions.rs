//! Raising, catching and unwinding.
//!
//! The running thread records the class and value of the exception in flight.
//! An error propagating out of an instruction unwinds the current frame's
//! block stack; when no `except` or `finally` block takes it, the frame is
//! popped, a traceback line is recorded and the caller is tried next.

use super::{Unwind, Vm, why};
use crate::{
    exception_private::{ExcType, RunError, RunResult},
    exception_public::{TraceFrame, line_for_offset},
    heap::{HeapData, HeapId},
    io::PlatformIo,
    object::display_value,
    tracer::VmTracer,
    types::{
        BlockKind,
        class::{class_name, exc_kind_of},
        code::code_name,
        dict::dict_get_str,
    },
    value::Value,
};

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    /// The class and value of the running thread's current exception.
    pub(super) fn thread_exception(&self) -> (Value, Value) {
        match self.threads.front().map(|t| self.heap.get(*t)) {
            Some(HeapData::Thread(t)) => (t.exc_type, t.exc_value),
            _ => (Value::None, Value::None),
        }
    }

    fn set_thread_exception(&mut self, exc_type: Value, exc_value: Value) {
        if let Some(&thread) = self.threads.front()
            && let HeapData::Thread(t) = self.heap.get_mut(thread)
        {
            t.exc_type = exc_type;
            t.exc_value = exc_value;
        }
    }

    /// Leaves blocks of the current frame until one handles `reason`.
    ///
    /// Returns `Err` with the exception when the frame has no handler for it;
    /// the frame itself is left in place for the caller to pop.
    pub(super) fn unwind(&mut self, mut reason: Unwind) -> RunResult<()> {
        loop {
            let Some(block) = self.cur_mut()?.blocks.pop() else {
                return match reason {
                    Unwind::Return(v) => self.return_from_frame(v),
                    Unwind::Exception(err) => Err(err),
                    Unwind::Break | Unwind::Continue(_) => {
                        Err(ExcType::system_error("'break' or 'continue' outside a loop"))
                    }
                };
            };
            reason = match (block.kind, reason) {
                (BlockKind::Loop, Unwind::Continue(target)) => {
                    let f = self.cur_mut()?;
                    f.blocks.push(block);
                    f.ip = target;
                    return Ok(());
                }
                (BlockKind::Loop, Unwind::Break) => {
                    let f = self.cur_mut()?;
                    f.stack.truncate(block.level);
                    f.ip = block.handler;
                    return Ok(());
                }
                (BlockKind::Except | BlockKind::Finally, Unwind::Exception(err)) => {
                    let (exc_type, exc_value) = self.thread_exception();
                    // traceback slot, value, class
                    self.enter_handler(block.level, block.handler, &[Value::None, exc_value, exc_type])?;
                    self.tracer.on_exception_caught(err.kind(), block.handler);
                    tracing::trace!(kind = %err.kind(), handler = block.handler, "exception caught");
                    return Ok(());
                }
                (BlockKind::Finally, Unwind::Return(v)) => {
                    return self.enter_handler(block.level, block.handler, &[v, Value::Int(why::RETURN)]);
                }
                (BlockKind::Finally, Unwind::Break) => {
                    return self.enter_handler(block.level, block.handler, &[Value::Int(why::BREAK)]);
                }
                (BlockKind::Finally, Unwind::Continue(target)) => {
                    let target = i32::try_from(target).map_err(|_| ExcType::system_error("jump target out of range"))?;
                    return self.enter_handler(
                        block.level,
                        block.handler,
                        &[Value::Int(target), Value::Int(why::CONTINUE)],
                    );
                }
                (_, other) => {
                    self.cur_mut()?.stack.truncate(block.level);
                    other
                }
            };
        }
    }

    fn enter_handler(&mut self, level: usize, handler: usize, pushed: &[Value]) -> RunResult<()> {
        let f = self.cur_mut()?;
        f.stack.truncate(level);
        f.stack.extend_from_slice(pushed);
        f.ip = handler;
        Ok(())
    }

    /// `END_FINALLY`: resumes whatever exit the `finally` block interrupted.
    pub(super) fn end_finally(&mut self) -> RunResult<()> {
        match self.pop()? {
            Value::None => Ok(()),
            Value::Int(why::RETURN) => {
                let v = self.pop()?;
                self.unwind(Unwind::Return(v))
            }
            Value::Int(why::BREAK) => self.unwind(Unwind::Break),
            Value::Int(why::CONTINUE) => {
                let target = self
                    .pop()?
                    .as_int()
                    .and_then(|t| usize::try_from(t).ok())
                    .ok_or_else(|| ExcType::system_error("bad continue target"))?;
                self.unwind(Unwind::Continue(target))
            }
            exc if self.class_of_raised(exc).is_some() => {
                let value = self.pop()?;
                // traceback slot
                self.pop()?;
                match self.raise_object(exc, Some(value)) {
                    Ok(err) | Err(err) => Err(err),
                }
            }
            other => Err(ExcType::system_error(format!(
                "bad END_FINALLY operand {}",
                display_value(&self.heap, other)
            ))),
        }
    }

    /// `RAISE_VARARGS n`: `raise`, `raise E`, `raise E, v` or `raise E, v, tb`.
    pub(super) fn raise_varargs(&mut self, argc: usize) -> RunError {
        match self.raise_from_stack(argc) {
            Ok(err) | Err(err) => err,
        }
    }

    fn raise_from_stack(&mut self, argc: usize) -> RunResult<RunError> {
        match argc {
            0 => {
                let (exc_type, exc_value) = self.thread_exception();
                if exc_type.is_none() {
                    return Err(ExcType::type_error(
                        "exceptions must be classes or instances, not NoneType",
                    ));
                }
                self.raise_object(exc_type, Some(exc_value))
            }
            1 => {
                let exc = self.pop()?;
                self.raise_object(exc, None)
            }
            2 | 3 => {
                if argc == 3 {
                    // tracebacks are not objects here; the third operand is ignored
                    self.pop()?;
                }
                let value = self.pop()?;
                let exc = self.pop()?;
                self.raise_object(exc, Some(value))
            }
            _ => Err(ExcType::system_error(format!("bad RAISE_VARARGS count {argc}"))),
        }
    }

    /// Records `exc` as the thread's exception and builds the error that carries it.
    ///
    /// `exc` is a class or an instance. For a class, `arg` becomes the raised
    /// value; without one the class itself is the value.
    fn raise_object(&mut self, exc: Value, arg: Option<Value>) -> RunResult<RunError> {
        let (class, value) = match exc.heap_data(&self.heap) {
            Some(HeapData::Class(_)) => (exc, arg.unwrap_or(exc)),
            Some(HeapData::Instance(inst)) => (Value::Ref(inst.class), exc),
            _ => {
                return Err(ExcType::type_error(format!(
                    "exceptions must be classes or instances, not {}",
                    exc.type_of(&self.heap)
                )));
            }
        };
        let Value::Ref(class_id) = class else {
            return Err(ExcType::system_error("exception class is not a heap object"));
        };
        let kind = exc_kind_of(&self.heap, class_id).unwrap_or(ExcType::Exception);
        let user_name = (!self.exc_classes.contains(&class_id)).then(|| class_name(&self.heap, class_id));
        let message = self.exception_message(value);
        self.set_thread_exception(class, value);
        Ok(RunError::new(kind, message).with_class_name(user_name).into_user_raised())
    }

    /// Text shown after the class name: the instance's `args`, or the raised value itself.
    fn exception_message(&self, value: Value) -> Option<String> {
        match value.heap_data(&self.heap) {
            Some(HeapData::Class(_)) => None,
            Some(HeapData::Instance(inst)) => {
                let args = dict_get_str(&self.heap, inst.attrs, b"args")?;
                match args.heap_data(&self.heap) {
                    Some(HeapData::Tuple(items)) => match items.as_slice() {
                        [] => None,
                        [only] => Some(self.message_text(*only)),
                        _ => Some(display_value(&self.heap, args)),
                    },
                    _ => Some(self.message_text(args)),
                }
            }
            _ if value.is_none() => None,
            _ => Some(self.message_text(value)),
        }
    }

    fn message_text(&self, v: Value) -> String {
        match v.as_str_bytes(&self.heap) {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => display_value(&self.heap, v),
        }
    }

    /// Unwinds the running thread for `err`.
    ///
    /// Returns `Ok` once a handler has taken the exception, or the error with
    /// its traceback when it escaped the thread's bottom frame.
    pub(super) fn handle_exception(&mut self, mut err: RunError) -> RunResult<()> {
        self.tracer.on_exception_raise(err.kind());
        if !err.is_user_raised() {
            let class = Value::Ref(self.exception_class(err.kind()));
            self.set_thread_exception(class, class);
        }
        while let Some(fid) = self.frame {
            err = match self.unwind(Unwind::Exception(err)) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if let Some(line) = self.trace_frame(fid) {
                err.push_frame(line);
            }
            let (back, depth) = match self.frame_ref(fid) {
                Ok(f) => (f.back, f.depth),
                Err(_) => (None, 1),
            };
            self.set_frame(back);
            self.tracer.on_return(depth - 1);
        }
        tracing::debug!(kind = %err.kind(), frames = err.traceback().len(), "exception left the thread");
        Err(err)
    }

    /// Traceback line for the instruction `fid` was executing.
    fn trace_frame(&self, fid: HeapId) -> Option<TraceFrame> {
        let f = self.frame_ref(fid).ok()?;
        let code = self.code_ref(f.code).ok()?;
        let filename = String::from_utf8_lossy(&code.filename.read_all(&self.mem))
            .trim_end_matches('\0')
            .to_owned();
        let lnotab = code.lnotab.read_all(&self.mem);
        Some(TraceFrame::Code {
            filename,
            line: line_for_offset(&lnotab, code.first_line, f.ip.saturating_sub(1)),
            name: code_name(&self.heap, code.names),
        })
    }
}
