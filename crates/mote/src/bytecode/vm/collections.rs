//! Subscripting, slicing, container construction, unpacking and iteration.

use super::Vm;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    io::PlatformIo,
    object::display_value,
    tracer::VmTracer,
    types::{
        SeqIter, Type,
        dict::{dict_delete, dict_get, dict_set},
        str::{normalize_index, slice_bounds},
    },
    value::Value,
};

/// Next element produced by an iterator step.
enum Next {
    Done,
    Value(Value),
    /// A string element still needing its one-character string object.
    Char(u8),
}

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    fn index_arg(&self, index: Value, len: usize, container: Type) -> RunResult<usize> {
        let i = index.as_int().ok_or_else(|| {
            ExcType::type_error(format!(
                "{container} indices must be integers, not {}",
                index.type_of(&self.heap)
            ))
        })?;
        normalize_index(i, len).ok_or_else(|| ExcType::index_error(container))
    }

    /// `container[index]`.
    pub(crate) fn subscript_get(&mut self, container: Value, index: Value) -> RunResult<Value> {
        let Value::Ref(id) = container else {
            return Err(ExcType::type_error_not_sub(container.type_of(&self.heap)));
        };
        match self.heap.get(id) {
            HeapData::Str(s) => {
                let i = self.index_arg(index, s.len(), Type::Str)?;
                let byte = s[i];
                Ok(Value::Ref(self.heap.alloc_str(&[byte])?))
            }
            HeapData::Tuple(items) => Ok(items[self.index_arg(index, items.len(), Type::Tuple)?]),
            HeapData::List(items) => Ok(items[self.index_arg(index, items.len(), Type::List)?]),
            HeapData::Bytearray(bytes) => {
                let i = self.index_arg(index, bytes.len(), Type::Bytearray)?;
                Ok(Value::Int(i32::from(bytes[i])))
            }
            HeapData::Dict(_) => {
                dict_get(&self.heap, id, index)?.ok_or_else(|| ExcType::key_error(display_value(&self.heap, index)))
            }
            other => Err(ExcType::type_error_not_sub(other.type_of())),
        }
    }

    pub(super) fn binary_subscr(&mut self) -> RunResult<()> {
        let index = self.peek(0)?;
        let container = self.peek(1)?;
        let v = self.subscript_get(container, index)?;
        self.drop_n(2)?;
        self.push(v)
    }

    /// `SLICE+n`: the sequence sits below the optional start and stop.
    pub(super) fn slice_opcode(&mut self, has_start: bool, has_stop: bool) -> RunResult<()> {
        let count = 1 + usize::from(has_start) + usize::from(has_stop);
        let operands = self.peek_n(count)?;
        let seq = operands[0];
        let start = if has_start { self.slice_arg(operands[1])? } else { None };
        let stop = if has_stop { self.slice_arg(operands[count - 1])? } else { None };
        let Value::Ref(id) = seq else {
            return Err(ExcType::type_error_not_sub(seq.type_of(&self.heap)));
        };
        let data = match self.heap.get(id) {
            HeapData::Str(s) => {
                let (lo, hi) = slice_bounds(start, stop, s.len());
                HeapData::Str(s[lo..hi].to_vec())
            }
            HeapData::Tuple(items) => {
                let (lo, hi) = slice_bounds(start, stop, items.len());
                HeapData::Tuple(items[lo..hi].to_vec())
            }
            HeapData::List(items) => {
                let (lo, hi) = slice_bounds(start, stop, items.len());
                HeapData::List(items[lo..hi].to_vec())
            }
            other => return Err(ExcType::type_error_not_sub(other.type_of())),
        };
        let result = self.heap.allocate(data)?;
        self.drop_n(count)?;
        self.push(Value::Ref(result))
    }

    fn slice_arg(&self, v: Value) -> RunResult<Option<i32>> {
        match v {
            Value::None => Ok(None),
            other => other
                .as_int()
                .map(Some)
                .ok_or_else(|| ExcType::type_error("slice indices must be integers or None")),
        }
    }

    /// `STORE_SUBSCR`: `TOS1[TOS] = TOS2`.
    pub(super) fn store_subscr(&mut self) -> RunResult<()> {
        let index = self.peek(0)?;
        let container = self.peek(1)?;
        let value = self.peek(2)?;
        let Value::Ref(id) = container else {
            return Err(ExcType::type_error(format!(
                "'{}' object does not support item assignment",
                container.type_of(&self.heap)
            )));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let i = self.index_arg(index, items.len(), Type::List)?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items[i] = value;
                }
            }
            HeapData::Bytearray(bytes) => {
                let i = self.index_arg(index, bytes.len(), Type::Bytearray)?;
                let byte = value
                    .as_int()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| ExcType::value_error("byte must be in range(0, 256)"))?;
                if let HeapData::Bytearray(bytes) = self.heap.get_mut(id) {
                    bytes[i] = byte;
                }
            }
            HeapData::Dict(_) => dict_set(&mut self.heap, id, index, value)?,
            other => {
                return Err(ExcType::type_error(format!(
                    "'{}' object does not support item assignment",
                    other.type_of()
                )));
            }
        }
        self.drop_n(3)
    }

    /// `DELETE_SUBSCR`: `del TOS1[TOS]`.
    pub(super) fn delete_subscr(&mut self) -> RunResult<()> {
        let index = self.peek(0)?;
        let container = self.peek(1)?;
        let Value::Ref(id) = container else {
            return Err(ExcType::type_error_not_sub(container.type_of(&self.heap)));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let i = self.index_arg(index, items.len(), Type::List)?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items.remove(i);
                }
                self.heap.refresh_size(id);
            }
            HeapData::Dict(_) => dict_delete(&mut self.heap, id, index)?,
            other => {
                return Err(ExcType::type_error(format!(
                    "'{}' object doesn't support item deletion",
                    other.type_of()
                )));
            }
        }
        self.drop_n(2)
    }

    /// `STORE_MAP`: stores TOS1 under key TOS in the dict at TOS2, leaving the dict.
    pub(super) fn store_map(&mut self) -> RunResult<()> {
        let key = self.peek(0)?;
        let value = self.peek(1)?;
        let dict = self.peek(2)?;
        let Value::Ref(id) = dict else {
            return Err(ExcType::system_error("STORE_MAP target is not a dict"));
        };
        dict_set(&mut self.heap, id, key, value)?;
        self.drop_n(2)
    }

    pub(super) fn build_sequence(&mut self, n: usize, list: bool) -> RunResult<()> {
        let items = self.peek_n(n)?;
        let id = if list {
            self.heap.alloc_list(items)?
        } else {
            self.heap.alloc_tuple(items)?
        };
        self.drop_n(n)?;
        self.push(Value::Ref(id))
    }

    /// `LIST_APPEND i`: appends TOS to the list `i` slots below it.
    pub(super) fn list_append(&mut self, depth: usize) -> RunResult<()> {
        let v = self.peek(0)?;
        let list = self.peek(depth)?;
        match list {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::List(_)) => self.heap.list_append(id, v)?,
            other => return Err(ExcType::system_error(format!("LIST_APPEND on {}", other.type_of(&self.heap)))),
        }
        self.pop()?;
        Ok(())
    }

    /// `UNPACK_SEQUENCE n`: replaces a tuple or list of length `n` with its items, first item on top.
    pub(super) fn unpack_sequence(&mut self, n: usize) -> RunResult<()> {
        let seq = self.peek(0)?;
        let items = match seq.heap_data(&self.heap) {
            Some(HeapData::Tuple(items) | HeapData::List(items)) => items.clone(),
            _ => return Err(ExcType::type_error_not_iterable(seq.type_of(&self.heap))),
        };
        if items.len() < n {
            return Err(ExcType::value_error(format!(
                "need more than {} values to unpack",
                items.len()
            )));
        }
        if items.len() > n {
            return Err(ExcType::value_error("too many values to unpack"));
        }
        self.pop()?;
        self.cur_mut()?.stack.extend(items.into_iter().rev());
        Ok(())
    }

    /// `GET_ITER`: replaces TOS with an iterator over it.
    pub(super) fn get_iter(&mut self) -> RunResult<()> {
        let seq = self.peek(0)?;
        let Value::Ref(id) = seq else {
            return Err(ExcType::type_error_not_iterable(seq.type_of(&self.heap)));
        };
        match self.heap.get(id) {
            HeapData::SeqIter(_) => return Ok(()),
            HeapData::Str(_) | HeapData::Tuple(_) | HeapData::List(_) | HeapData::Bytearray(_) | HeapData::Dict(_) => {}
            other => return Err(ExcType::type_error_not_iterable(other.type_of())),
        }
        let it = self.heap.allocate(HeapData::SeqIter(SeqIter { seq: id, index: 0 }))?;
        self.replace_top(Value::Ref(it))
    }

    /// `FOR_ITER` step: pushes the next element and returns true, or returns false when exhausted.
    pub(super) fn for_iter(&mut self) -> RunResult<bool> {
        let it = self.peek(0)?;
        let Some(it_id) = it.ref_id() else {
            return Err(ExcType::type_error(format!(
                "'{}' object is not an iterator",
                it.type_of(&self.heap)
            )));
        };
        match self.iter_next(it_id)? {
            Next::Done => Ok(false),
            Next::Value(v) => {
                self.push(v)?;
                Ok(true)
            }
            Next::Char(c) => {
                let s = self.heap.alloc_str(&[c])?;
                self.push(Value::Ref(s))?;
                Ok(true)
            }
        }
    }

    fn iter_next(&mut self, it: HeapId) -> RunResult<Next> {
        let (seq, index) = match self.heap.get(it) {
            HeapData::SeqIter(s) => (s.seq, s.index),
            other => {
                return Err(ExcType::type_error(format!(
                    "'{}' object is not an iterator",
                    other.type_of()
                )));
            }
        };
        let next = match self.heap.get(seq) {
            HeapData::Str(s) => s.get(index).map_or(Next::Done, |c| Next::Char(*c)),
            HeapData::Tuple(items) | HeapData::List(items) => items.get(index).map_or(Next::Done, |v| Next::Value(*v)),
            HeapData::Bytearray(bytes) => bytes
                .get(index)
                .map_or(Next::Done, |b| Next::Value(Value::Int(i32::from(*b)))),
            HeapData::Dict(d) => d.key_at(index).map_or(Next::Done, Next::Value),
            _ => Next::Done,
        };
        if !matches!(next, Next::Done)
            && let HeapData::SeqIter(s) = self.heap.get_mut(it)
        {
            s.index += 1;
        }
        Ok(next)
    }
}
