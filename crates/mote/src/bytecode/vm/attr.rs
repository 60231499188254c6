//! Name resolution and attribute access.
//!
//! `*_NAME` opcodes search the frame's names dict, then the globals, then the
//! builtins. `*_GLOBAL` opcodes skip the names dict. Attribute loads that find
//! a function on an instance's class return it bound to the instance.

use super::Vm;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    io::PlatformIo,
    object::find_attr,
    tracer::VmTracer,
    types::{
        Method,
        dict::{dict_delete, dict_get, dict_set},
    },
    value::Value,
};

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    fn name_text(&self, name: Value) -> String {
        name.as_str_bytes(&self.heap)
            .map_or_else(|| "?".to_owned(), |b| String::from_utf8_lossy(b).into_owned())
    }

    pub(super) fn load_name(&self, name: Value) -> RunResult<Value> {
        let f = self.cur()?;
        if let Some(names) = f.names
            && let Some(v) = dict_get(&self.heap, names, name)?
        {
            return Ok(v);
        }
        self.load_global_from(f.globals, name)
    }

    pub(super) fn load_global(&self, name: Value) -> RunResult<Value> {
        self.load_global_from(self.cur()?.globals, name)
    }

    fn load_global_from(&self, globals: HeapId, name: Value) -> RunResult<Value> {
        if let Some(v) = dict_get(&self.heap, globals, name)? {
            return Ok(v);
        }
        if let Some(v) = dict_get(&self.heap, self.builtins, name)? {
            return Ok(v);
        }
        Err(ExcType::name_error(&self.name_text(name)))
    }

    pub(super) fn store_name(&mut self, name: Value) -> RunResult<()> {
        let f = self.cur()?;
        let target = f.names.unwrap_or(f.globals);
        self.store_into(target, name)
    }

    /// Pops TOS into `dict` under `name`.
    pub(super) fn store_into(&mut self, dict: HeapId, name: Value) -> RunResult<()> {
        let v = self.peek(0)?;
        dict_set(&mut self.heap, dict, name, v)?;
        self.pop()?;
        Ok(())
    }

    pub(super) fn delete_name(&mut self, name: Value) -> RunResult<()> {
        let f = self.cur()?;
        let target = f.names.unwrap_or(f.globals);
        self.delete_from(target, name)
    }

    /// Removes `name` from a namespace dict; NameError when it is not bound.
    pub(super) fn delete_from(&mut self, dict: HeapId, name: Value) -> RunResult<()> {
        if dict_get(&self.heap, dict, name)?.is_none() {
            return Err(ExcType::name_error(&self.name_text(name)));
        }
        dict_delete(&mut self.heap, dict, name)
    }

    /// `obj.name`, binding functions found through an instance's class.
    ///
    /// `obj` must be reachable (on the operand stack) because binding allocates.
    pub(super) fn load_attr(&mut self, obj: Value, name: Value) -> RunResult<Value> {
        let found = find_attr(&self.heap, obj, name)?
            .ok_or_else(|| ExcType::attribute_error(obj.type_of(&self.heap), &self.name_text(name)))?;
        let is_instance = matches!(obj.heap_data(&self.heap), Some(HeapData::Instance(_)));
        if is_instance
            && let Value::Ref(func) = found
            && matches!(self.heap.get(func), HeapData::Function(_))
            && !self.instance_owns(obj, name)?
        {
            let method = self.heap.allocate(HeapData::Method(Method {
                receiver: obj,
                function: func,
            }))?;
            return Ok(Value::Ref(method));
        }
        Ok(found)
    }

    /// Whether `name` is in the instance's own dict rather than its class chain.
    fn instance_owns(&self, obj: Value, name: Value) -> RunResult<bool> {
        match obj.heap_data(&self.heap) {
            Some(HeapData::Instance(inst)) => Ok(dict_get(&self.heap, inst.attrs, name)?.is_some()),
            _ => Ok(false),
        }
    }

    /// The attribute dict of `obj`; with `create`, functions get one on first use.
    pub(super) fn attrs_of(&mut self, obj: Value, create: bool) -> RunResult<HeapId> {
        let Value::Ref(id) = obj else {
            return Err(ExcType::AttributeError.msg(format!(
                "'{}' object has no attribute dict",
                obj.type_of(&self.heap)
            )));
        };
        match self.heap.get(id) {
            HeapData::Module(m) => Ok(m.attrs),
            HeapData::Class(c) => Ok(c.attrs),
            HeapData::Instance(inst) => Ok(inst.attrs),
            HeapData::Function(f) => match f.attrs {
                Some(attrs) => Ok(attrs),
                None if create => {
                    let attrs = self.heap.alloc_dict()?;
                    if let HeapData::Function(f) = self.heap.get_mut(id) {
                        f.attrs = Some(attrs);
                    }
                    Ok(attrs)
                }
                None => Err(ExcType::AttributeError.msg("function has no attributes")),
            },
            other => Err(ExcType::AttributeError.msg(format!(
                "'{}' object has no attribute dict",
                other.type_of()
            ))),
        }
    }

    /// `STORE_ATTR`: `TOS.name = TOS1`.
    pub(super) fn store_attr(&mut self, name: Value) -> RunResult<()> {
        let obj = self.peek(0)?;
        let value = self.peek(1)?;
        let attrs = self.attrs_of(obj, true)?;
        dict_set(&mut self.heap, attrs, name, value)?;
        self.drop_n(2)
    }

    /// `DELETE_ATTR`: `del obj.name`.
    pub(super) fn delete_attr(&mut self, obj: Value, name: Value) -> RunResult<()> {
        let attrs = self.attrs_of(obj, false)?;
        if dict_get(&self.heap, attrs, name)?.is_none() {
            return Err(ExcType::attribute_error(obj.type_of(&self.heap), &self.name_text(name)));
        }
        dict_delete(&mut self.heap, attrs, name)
    }
}
