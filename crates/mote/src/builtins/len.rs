//! Implementation of the len() builtin function.

use super::{NativeCall, int_from_len};
use crate::{
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    value::Value,
};

/// Implementation of the len() builtin function.
///
/// Counts bytes of strings and bytearrays, items of tuples and lists, and entries of dicts.
pub fn builtin_len(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let v = call.arg(0)?;
    let len = match v.heap_data(call.heap()) {
        Some(HeapData::Str(b) | HeapData::Bytearray(b)) => b.len(),
        Some(HeapData::Tuple(items) | HeapData::List(items)) => items.len(),
        Some(HeapData::Dict(d)) => d.len(),
        _ => {
            return Err(ExcType::type_error(format!(
                "object of type '{}' has no len()",
                v.type_of(call.heap())
            )));
        }
    };
    int_from_len(len)
}
