//! Implementations of the conversion builtins: chr(), ord(), str(), int(), float() and bytearray().

use super::{NativeCall, ensure_fits};
use crate::{
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    object::{self, PrintState},
    value::Value,
};

/// Implementation of the chr() builtin function.
pub fn builtin_chr(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let code = call.int_arg(0)?;
    let byte = u8::try_from(code).map_err(|_| ExcType::value_error("chr() arg not in range(256)"))?;
    call.alloc_str(&[byte])
}

/// Implementation of the ord() builtin function.
pub fn builtin_ord(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let v = call.arg(0)?;
    match v.as_str_bytes(call.heap()) {
        Some(&[byte]) => Ok(Value::Int(i32::from(byte))),
        Some(bytes) => Err(ExcType::type_error(format!(
            "ord() expected a character, but string of length {} found",
            bytes.len()
        ))),
        None => Err(ExcType::type_error(format!(
            "ord() expected string of length 1, but {} found",
            v.type_of(call.heap())
        ))),
    }
}

/// Implementation of the str() builtin function.
///
/// Strings come back unchanged and numbers use their repr; anything else is
/// rendered the way `print` shows it.
pub fn builtin_str(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(0, 1)?;
    let Some(&v) = call.args().first() else {
        return call.alloc_str(b"");
    };
    if v.as_str_bytes(call.heap()).is_some() {
        return Ok(v);
    }
    if matches!(v, Value::Int(_) | Value::Float(_)) {
        let text = object::repr(call.heap(), v)?;
        return call.alloc_str(text.as_bytes());
    }
    let mut out = Vec::new();
    object::print(call.heap(), v, false, false, &mut out, &mut PrintState::default())?;
    call.alloc_str(&out)
}

/// Implementation of the int() builtin function.
///
/// Floats truncate toward zero; strings are parsed as optionally signed decimal.
pub fn builtin_int(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(0, 1)?;
    let Some(&v) = call.args().first() else {
        return Ok(Value::Int(0));
    };
    match v {
        Value::Int(_) => Ok(v),
        Value::Bool(b) => Ok(Value::Int(i32::from(b))),
        Value::Float(f) => float_to_int(f),
        other => match other.as_str_bytes(call.heap()) {
            Some(bytes) => parse_text::<i32>(bytes, "int").map(Value::Int),
            None => Err(ExcType::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_of(call.heap())
            ))),
        },
    }
}

fn float_to_int(f: f32) -> RunResult<Value> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    let t = f.trunc();
    // i32::MAX is not representable in f32; the first float past the range is 2^31
    if t >= 2_147_483_648.0 || t < -2_147_483_648.0 {
        return Err(ExcType::overflow());
    }
    Ok(Value::Int(t as i32))
}

/// Implementation of the float() builtin function.
pub fn builtin_float(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(0, 1)?;
    let Some(&v) = call.args().first() else {
        return Ok(Value::Float(0.0));
    };
    if let Some(f) = v.as_float() {
        return Ok(Value::Float(f));
    }
    match v.as_str_bytes(call.heap()) {
        Some(bytes) => parse_text::<f32>(bytes, "float").map(Value::Float),
        None => Err(ExcType::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            v.type_of(call.heap())
        ))),
    }
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8], what: &str) -> RunResult<T> {
    std::str::from_utf8(bytes)
        .ok()
        .map(str::trim)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| {
            ExcType::value_error(format!(
                "invalid literal for {what}(): '{}'",
                String::from_utf8_lossy(bytes)
            ))
        })
}

/// Implementation of the bytearray() builtin function.
///
/// Accepts a length (zero-filled), a string, or a tuple or list of ints in `0..256`.
pub fn builtin_bytearray(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args_between(0, 1)?;
    let bytes = match call.args().first().copied() {
        None => Vec::new(),
        Some(Value::Int(n)) => {
            let n = usize::try_from(n).map_err(|_| ExcType::value_error("negative count"))?;
            ensure_fits(call.heap(), n)?;
            vec![0; n]
        }
        Some(v) => match v.heap_data(call.heap()) {
            Some(HeapData::Str(b) | HeapData::Bytearray(b)) => b.clone(),
            Some(HeapData::Tuple(items) | HeapData::List(items)) => items
                .iter()
                .map(|item| {
                    item.as_int()
                        .and_then(|i| u8::try_from(i).ok())
                        .ok_or_else(|| ExcType::value_error("byte must be in range(0, 256)"))
                })
                .collect::<RunResult<Vec<u8>>>()?,
            _ => {
                return Err(ExcType::type_error(format!(
                    "cannot convert '{}' object to bytearray",
                    v.type_of(call.heap())
                )));
            }
        },
    };
    call.heap_mut().allocate(HeapData::Bytearray(bytes)).map(Value::Ref)
}
