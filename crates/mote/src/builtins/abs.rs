//! Implementation of the abs() builtin function.

use super::NativeCall;
use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Implementation of the abs() builtin function.
///
/// `abs(-2147483648)` does not fit an int and fails with OverflowError.
pub fn builtin_abs(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    match call.arg(0)? {
        Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(ExcType::overflow),
        Value::Bool(b) => Ok(Value::Int(i32::from(b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(ExcType::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_of(call.heap())
        ))),
    }
}
