//! Interpreter execution tracing.
//!
//! The [`VmTracer`] trait has a hook for each interesting interpreter event.
//! The VM carries the tracer as a type parameter, so with [`NoopTracer`] every
//! hook is inlined away.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost default |
//! | [`StderrTracer`] | Human-readable execution log on stderr |
//! | [`ProfilingTracer`] | Opcode counts, call counts, depth and switch statistics |
//! | [`RecordingTracer`] | Full event list, for tests and post-mortems |

use std::fmt;

use ahash::AHashMap;

use crate::{bytecode::Opcode, exception_private::ExcType};

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Instruction {
        ip: usize,
        opcode: Opcode,
        stack_depth: usize,
    },
    Call {
        name: String,
        depth: usize,
    },
    Return {
        depth: usize,
    },
    Raise {
        kind: ExcType,
    },
    Caught {
        kind: ExcType,
        handler: usize,
    },
    ThreadSwitch {
        from: u32,
        to: u32,
    },
    Collection {
        freed_chunks: usize,
        used_chunks: usize,
    },
}

/// Hooks invoked by the interpreter. Every method defaults to a no-op.
pub trait VmTracer: fmt::Debug {
    /// Before each instruction is dispatched.
    ///
    /// # Arguments
    /// * `ip` - Offset of the opcode in the current code object
    /// * `opcode` - The opcode about to run
    /// * `stack_depth` - Operand stack depth of the current frame
    /// * `frame_depth` - Length of the current thread's frame chain
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// A bytecode or native call started; `depth` is the chain length after the push.
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// A frame returned; `depth` is the chain length after the pop.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// An exception started propagating.
    #[inline(always)]
    fn on_exception_raise(&mut self, _kind: ExcType) {}

    /// A handler block caught a propagating exception.
    #[inline(always)]
    fn on_exception_caught(&mut self, _kind: ExcType, _handler: usize) {}

    /// The scheduler moved from one thread to another.
    #[inline(always)]
    fn on_thread_switch(&mut self, _from: u32, _to: u32) {}

    /// A collection ran at an instruction boundary or on request.
    #[inline(always)]
    fn on_gc(&mut self, _freed_chunks: usize, _used_chunks: usize) {}
}

/// Tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that logs every event to stderr.
///
/// ```text
/// [    0] LOAD_CONST        stack=0  frames=1
///   >>> CALL f              depth=2
/// [    0] LOAD_FAST         stack=0  frames=2
///   <<< RETURN              depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Instructions to trace before going quiet. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops tracing after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {:<18} stack={stack_depth}  frames={frame_depth}", opcode.to_string());
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {name:<16} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN              depth={depth}");
        }
    }

    fn on_exception_raise(&mut self, kind: ExcType) {
        if !self.stopped {
            eprintln!("  !!! RAISE {kind}");
        }
    }

    fn on_exception_caught(&mut self, kind: ExcType, handler: usize) {
        if !self.stopped {
            eprintln!("  ... CAUGHT {kind} -> {handler}");
        }
    }

    fn on_thread_switch(&mut self, from: u32, to: u32) {
        if !self.stopped {
            eprintln!("  ~~~ SWITCH thread {from} -> {to}");
        }
    }

    fn on_gc(&mut self, freed_chunks: usize, used_chunks: usize) {
        if !self.stopped {
            eprintln!("  ### GC freed={freed_chunks} used={used_chunks}");
        }
    }
}

/// Tracer that collects execution statistics.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: AHashMap<Opcode, u64>,
    total_instructions: u64,
    total_calls: u64,
    max_depth: usize,
    exceptions_raised: u64,
    thread_switches: u64,
    collections: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug, Clone)]
pub struct ProfilingReport {
    /// Per-opcode counts, most frequent first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub total_calls: u64,
    pub max_depth: usize,
    pub exceptions_raised: u64,
    pub thread_switches: u64,
    pub collections: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            total_calls: self.total_calls,
            max_depth: self.max_depth,
            exceptions_raised: self.exceptions_raised,
            thread_switches: self.thread_switches,
            collections: self.collections,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
        self.max_depth = self.max_depth.max(frame_depth);
    }

    fn on_call(&mut self, _name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_exception_raise(&mut self, _kind: ExcType) {
        self.exceptions_raised += 1;
    }

    fn on_thread_switch(&mut self, _from: u32, _to: u32) {
        self.thread_switches += 1;
    }

    fn on_gc(&mut self, _freed_chunks: usize, _used_chunks: usize) {
        self.collections += 1;
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== mote profile ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max frame depth:    {}", self.max_depth)?;
        writeln!(f, "Exceptions raised:  {}", self.exceptions_raised)?;
        writeln!(f, "Thread switches:    {}", self.thread_switches)?;
        writeln!(f, "Collections:        {}", self.collections)?;
        writeln!(f)?;
        writeln!(f, "--- opcodes by count ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions.max(1) as f64) * 100.0;
            writeln!(f, "  {:<20} {count:>10}  ({pct:>5.1}%)", opcode.to_string())?;
        }
        Ok(())
    }
}

/// Tracer that records every event, optionally up to a limit.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|l| self.events.len() < l) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            ip,
            opcode,
            stack_depth,
        });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_exception_raise(&mut self, kind: ExcType) {
        self.record(TraceEvent::Raise { kind });
    }

    fn on_exception_caught(&mut self, kind: ExcType, handler: usize) {
        self.record(TraceEvent::Caught { kind, handler });
    }

    fn on_thread_switch(&mut self, from: u32, to: u32) {
        self.record(TraceEvent::ThreadSwitch { from, to });
    }

    fn on_gc(&mut self, freed_chunks: usize, used_chunks: usize) {
        self.record(TraceEvent::Collection {
            freed_chunks,
            used_chunks,
        });
    }
}
