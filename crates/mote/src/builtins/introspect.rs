//! Implementations of the introspection builtins: id(), type(), isinstance(),
//! hasattr(), globals() and locals().

use super::NativeCall;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    object::find_attr,
    types::class::is_subclass,
    value::Value,
};

/// Implementation of the id() builtin function.
///
/// Heap objects answer their slot index. Inline scalars are identical
/// exactly when equal, so their id is derived from the value.
pub fn builtin_id(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let id = match call.arg(0)? {
        Value::Ref(id) => i32::try_from(id.index()).map_err(|_| ExcType::overflow())?,
        Value::None => -1,
        Value::Bool(b) => -2 - i32::from(b),
        Value::Int(i) => i,
        Value::Float(f) => i32::from_ne_bytes(f.to_bits().to_ne_bytes()),
    };
    Ok(Value::Int(id))
}

/// Implementation of the type() builtin function.
///
/// Answers the numeric type tag; there are no type objects.
pub fn builtin_type(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let v = call.arg(0)?;
    Ok(Value::Int(i32::from(v.type_of(call.heap()).tag())))
}

/// Implementation of the isinstance() builtin function.
///
/// The second argument is a class or a tuple of classes. Every instance is an
/// instance of `object`.
pub fn builtin_isinstance(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(2)?;
    let (obj, spec) = (call.arg(0)?, call.arg(1)?);
    let heap = call.heap();
    let classes = match spec.heap_data(heap) {
        Some(HeapData::Class(_)) => vec![spec],
        Some(HeapData::Tuple(items)) => items.clone(),
        _ => {
            return Err(ExcType::type_error(
                "isinstance() arg 2 must be a class or tuple of classes",
            ));
        }
    };
    let Some(HeapData::Instance(inst)) = obj.heap_data(heap) else {
        return Ok(Value::Bool(false));
    };
    let class = inst.class;
    let object = call.object_class();
    let found = classes.iter().any(|c| match c {
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Class(_)) => {
            *id == object || is_subclass(heap, class, *id)
        }
        _ => false,
    });
    Ok(Value::Bool(found))
}

/// Implementation of the hasattr() builtin function.
pub fn builtin_hasattr(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(2)?;
    let (obj, name) = (call.arg(0)?, call.arg(1)?);
    if name.as_str_bytes(call.heap()).is_none() {
        return Err(ExcType::type_error("hasattr(): attribute name must be string"));
    }
    Ok(Value::Bool(find_attr(call.heap(), obj, name)?.is_some()))
}

/// Implementation of the globals() builtin function.
pub fn builtin_globals(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(0)?;
    Ok(Value::Ref(call.globals()))
}

/// Implementation of the locals() builtin function.
///
/// Module and class bodies answer their names dict; function bodies keep
/// locals in slots and answer the globals instead.
pub fn builtin_locals(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(0)?;
    Ok(Value::Ref(call.locals().unwrap_or_else(|| call.globals())))
}
