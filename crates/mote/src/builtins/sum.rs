//! Implementation of the sum() builtin function.

use super::NativeCall;
use crate::{
    bytecode::vm::{BinOp, numeric_op},
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    value::Value,
};

/// Implementation of the sum() builtin function.
///
/// Adds the numbers of a tuple or list to `start` (default 0) with the same
/// promotion and overflow rules as `+`.
pub fn builtin_sum(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(1, 2)?;
    let seq = call.arg(0)?;
    let start = call.args().get(1).copied().unwrap_or(Value::Int(0));
    let items = match seq.heap_data(call.heap()) {
        Some(HeapData::Tuple(items) | HeapData::List(items)) => items.clone(),
        _ => return Err(ExcType::type_error_not_iterable(seq.type_of(call.heap()))),
    };
    items.into_iter().try_fold(start, |total, item| {
        numeric_op(BinOp::Add, total, item).unwrap_or_else(|| {
            Err(ExcType::type_error(format!(
                "unsupported operand type(s) for +: '{}' and '{}'",
                total.type_of(call.heap()),
                item.type_of(call.heap())
            )))
        })
    })
}
