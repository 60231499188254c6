//! Implementations of the board-facing builtins: ticks(), gc(), heap(),
//! putb(), getb(), run_in_thread() and exit().

use super::{NativeCall, int_from_len};
use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Implementation of the ticks() builtin function.
///
/// Milliseconds since start, wrapping into the int range.
pub fn builtin_ticks(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(0)?;
    Ok(Value::Int(i32::from_ne_bytes(call.ms_ticks().to_ne_bytes())))
}

/// Implementation of the gc() builtin function.
///
/// The runtime collects after the call returns, once the result is rooted.
pub fn builtin_gc(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(0)?;
    call.request_collection();
    Ok(Value::None)
}

/// Implementation of the heap() builtin function.
///
/// Answers `(free_bytes, total_bytes)`.
pub fn builtin_heap(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(0)?;
    let heap = call.heap();
    let free = int_from_len(heap.free_chunks() * heap.chunk_size())?;
    let total = int_from_len(heap.capacity_chunks() * heap.chunk_size())?;
    call.heap_mut().alloc_tuple(vec![free, total]).map(Value::Ref)
}

/// Implementation of the putb() builtin function.
pub fn builtin_putb(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let byte = u8::try_from(call.int_arg(0)?).map_err(|_| ExcType::value_error("putb() byte must be in range(256)"))?;
    call.io().put_byte(byte)?;
    Ok(Value::None)
}

/// Implementation of the getb() builtin function.
///
/// Blocks until the platform delivers a byte.
pub fn builtin_getb(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(0)?;
    let io = call.io();
    io.flush()?;
    Ok(Value::Int(i32::from(io.get_byte()?)))
}

/// Implementation of the run_in_thread() builtin function.
///
/// The new thread starts at the next scheduling point; the caller keeps running.
pub fn builtin_run_in_thread(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let func = call.arg(0)?;
    call.spawn_thread(func)?;
    Ok(Value::None)
}

/// Implementation of the exit() builtin function.
pub fn builtin_exit(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(0, 1)?;
    Err(match call.args().first() {
        Some(code) => ExcType::SystemExit.msg(crate::object::display_value(call.heap(), *code)),
        None => ExcType::SystemExit.bare(),
    })
}
