//! Implementation of the min() and max() builtin functions.

use std::cmp::Ordering;

use super::NativeCall;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    object,
    value::Value,
};

/// Implementation of the min() builtin function.
pub fn builtin_min(call: &mut NativeCall<'_>) -> RunResult<Value> {
    extreme(call, Ordering::Less)
}

/// Implementation of the max() builtin function.
pub fn builtin_max(call: &mut NativeCall<'_>) -> RunResult<Value> {
    extreme(call, Ordering::Greater)
}

/// With one argument, the extreme item of that sequence; otherwise the extreme argument.
///
/// Ties keep the earliest candidate.
fn extreme(call: &mut NativeCall<'_>, wanted: Ordering) -> RunResult<Value> {
    let args = call.args().to_vec();
    let candidates: Vec<Value> = match args.as_slice() {
        [] => {
            return Err(ExcType::type_error(format!(
                "{}() expected at least 1 argument",
                call.name()
            )));
        }
        [single] => match single.heap_data(call.heap()) {
            Some(HeapData::Tuple(items) | HeapData::List(items)) => items.clone(),
            Some(HeapData::Str(bytes)) => {
                let best = if wanted == Ordering::Less {
                    bytes.iter().min()
                } else {
                    bytes.iter().max()
                };
                let byte = *best.ok_or_else(|| empty_sequence(call.name()))?;
                return call.alloc_str(&[byte]);
            }
            _ => {
                return Err(ExcType::type_error_not_iterable(single.type_of(call.heap())));
            }
        },
        _ => args.clone(),
    };
    let (&first, rest) = candidates.split_first().ok_or_else(|| empty_sequence(call.name()))?;
    let mut best = first;
    for &v in rest {
        if object::order(call.heap(), v, best)? == wanted {
            best = v;
        }
    }
    Ok(best)
}

fn empty_sequence(name: &str) -> crate::exception_private::RunError {
    ExcType::value_error(format!("{name}() arg is an empty sequence"))
}
