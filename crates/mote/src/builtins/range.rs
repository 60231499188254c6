//! Implementation of the range() builtin function.

use super::{NativeCall, ensure_fits};
use crate::{
    exception_private::{ExcType, RunResult},
    heap::VALUE_SLOT_SIZE,
    value::Value,
};

/// Implementation of the range() builtin function.
///
/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`; the
/// result is a list.
pub fn builtin_range(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(1, 3)?;
    let (start, stop, step) = match call.args().len() {
        1 => (0, call.int_arg(0)?, 1),
        2 => (call.int_arg(0)?, call.int_arg(1)?, 1),
        _ => (call.int_arg(0)?, call.int_arg(1)?, call.int_arg(2)?),
    };
    if step == 0 {
        return Err(ExcType::value_error("range() step argument must not be zero"));
    }
    let count = range_len(start, stop, step);
    ensure_fits(call.heap(), count.saturating_mul(VALUE_SLOT_SIZE))?;
    let items: Vec<Value> = (0..count)
        .map(|i| {
            let offset = i64::try_from(i).unwrap_or(i64::MAX) * i64::from(step);
            // every element lies between start and stop, so it fits an i32
            Value::Int(i32::try_from(i64::from(start) + offset).unwrap_or_default())
        })
        .collect();
    call.heap_mut().alloc_list(items).map(Value::Ref)
}

/// Number of elements in `range(start, stop, step)`.
fn range_len(start: i32, stop: i32, step: i32) -> usize {
    let (start, stop, step) = (i64::from(start), i64::from(stop), i64::from(step));
    let span = if step > 0 { stop - start } else { start - stop };
    if span <= 0 {
        return 0;
    }
    let step = step.abs();
    usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
}
