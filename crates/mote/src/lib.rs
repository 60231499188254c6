#![doc = include_str!("../../../README.md")]
// first so every other module can name heap handles
mod heap;

mod builtins;
mod bytecode;
mod config;
mod exception_private;
mod exception_public;
mod image;
mod io;
mod memspace;
mod modules;
mod object;
mod periodic;
mod run;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    builtins::{BUILTIN_BASE, NativeCall, NativeEntry, NativeFn, NativeTable},
    bytecode::{HAVE_ARGUMENT, Instruction, Opcode, RunOutcome, Vm, decode_at, disassemble},
    config::VmConfig,
    exception_private::{ExcType, RESULT_CODE_BASE, RunError, RunResult},
    exception_public::{TraceFrame, format_report, line_for_offset},
    heap::{Heap, HeapData, HeapId, HeapStats},
    image::{IMAGE_TABLE_END, TableEntry, load_code, load_object, load_table, obj_type},
    io::{CollectIo, NoIo, PlatformIo, StdIo},
    memspace::{MemRef, MemSpace, MemSpaces},
    modules::{CodeLoader, module_new},
    object::{Cmp, PrintState, compare, is_false, is_identical, is_in, order, repr},
    periodic::{Periodic, TICK_PERIOD_US},
    run::{Finished, RESTART_BANNER, Runner},
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    types::{
        Class, Code, Dict, Function, Instance, Module, NativeCode, Thread, Type, code_flags,
        dict::{dict_get, dict_get_str, dict_set},
    },
    value::Value,
};
