//! Round-robin scheduling of interpreter threads.
//!
//! The run queue holds thread objects; the one at the front is running.
//! Switching is cooperative with the tick: the timer only raises a flag and
//! the loop rotates the queue between instructions.

use super::Vm;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    io::PlatformIo,
    tracer::VmTracer,
    types::{FrameKind, Thread},
    value::Value,
};

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    fn thread_id(&self, thread: HeapId) -> u32 {
        match self.heap.get(thread) {
            HeapData::Thread(t) => t.id,
            _ => u32::MAX,
        }
    }

    pub(super) fn front_thread_frame(&self) -> Option<HeapId> {
        let thread = *self.threads.front()?;
        match self.heap.get(thread) {
            HeapData::Thread(t) => t.frame,
            _ => None,
        }
    }

    /// Moves the running thread to the back of the queue and resumes the next one.
    pub(super) fn reschedule(&mut self) {
        if self.threads.len() < 2 {
            return;
        }
        self.threads.rotate_left(1);
        let (Some(&from), Some(&to)) = (self.threads.back(), self.threads.front()) else {
            return;
        };
        self.frame = self.front_thread_frame();
        let (from, to) = (self.thread_id(from), self.thread_id(to));
        self.tracer.on_thread_switch(from, to);
        tracing::trace!(from, to, "thread switch");
    }

    /// Drops the running thread from the queue and resumes the next one.
    pub(super) fn retire_current_thread(&mut self) {
        if let Some(thread) = self.threads.pop_front() {
            self.heap.remove_root(thread);
            if self.main_thread == Some(thread) {
                self.main_thread = None;
            }
            tracing::debug!(thread = self.thread_id(thread), remaining = self.threads.len(), "thread finished");
        }
        self.frame = self.front_thread_frame();
    }

    /// Queues a thread that runs `module`'s body.
    pub(super) fn spawn_module_thread(&mut self, module: HeapId) -> RunResult<HeapId> {
        let frame = self.module_frame(module, FrameKind::Entry, None)?;
        self.enqueue_thread(frame)
    }

    /// Queues a thread that calls the bytecode function `func` with no arguments.
    pub(super) fn spawn_function_thread(&mut self, func: Value) -> RunResult<HeapId> {
        let func_id = func
            .ref_id()
            .filter(|id| match self.heap.get(*id) {
                HeapData::Function(f) => matches!(self.heap.get(f.code), HeapData::Code(_)),
                _ => false,
            })
            .ok_or_else(|| {
                ExcType::type_error(format!(
                    "a thread needs a bytecode function, not '{}'",
                    func.type_of(&self.heap)
                ))
            })?;
        let frame = self.build_frame(func_id, &[], FrameKind::Entry, None)?;
        self.enqueue_thread(frame)
    }

    fn enqueue_thread(&mut self, frame: HeapId) -> RunResult<HeapId> {
        let id = self.next_thread_id;
        self.next_thread_id = id.wrapping_add(1);
        let thread = self.heap.allocate(HeapData::Thread(Thread::new(id, frame)))?;
        self.heap.add_root(thread);
        if self.threads.is_empty() {
            self.frame = Some(frame);
        }
        self.threads.push_back(thread);
        tracing::debug!(thread = id, queued = self.threads.len(), "thread created");
        Ok(thread)
    }
}
