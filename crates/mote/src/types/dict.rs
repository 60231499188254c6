use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId, VALUE_SLOT_SIZE},
    object::compare,
    value::Value,
};

/// Accounted size of one key/value pair.
pub(crate) const DICT_ENTRY_SIZE: usize = 2 * VALUE_SLOT_SIZE;

/// A mapping with keys unique under [`compare`].
///
/// Lookup is a linear scan; dicts on the target hold a handful of entries and
/// order carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    #[must_use]
    pub fn key_at(&self, index: usize) -> Option<Value> {
        self.entries.get(index).map(|(k, _)| *k)
    }
}

fn dict_ref(heap: &Heap, dict: HeapId) -> RunResult<&Dict> {
    match heap.get(dict) {
        HeapData::Dict(d) => Ok(d),
        other => Err(ExcType::type_error(format!("expected dict, got {}", other.type_of()))),
    }
}

fn dict_mut(heap: &mut Heap, dict: HeapId) -> RunResult<&mut Dict> {
    match heap.get_mut(dict) {
        HeapData::Dict(d) => Ok(d),
        other => Err(ExcType::type_error(format!("expected dict, got {}", other.type_of()))),
    }
}

fn position(heap: &Heap, dict: HeapId, key: Value) -> RunResult<Option<usize>> {
    let key_type = key.type_of(heap);
    if !key_type.is_hashable() {
        return Err(ExcType::type_error_unhashable(key_type));
    }
    let d = dict_ref(heap, dict)?;
    Ok(d.entries.iter().position(|(k, _)| compare(heap, *k, key).is_same()))
}

/// Looks up `key`; `Ok(None)` when absent.
pub fn dict_get(heap: &Heap, dict: HeapId, key: Value) -> RunResult<Option<Value>> {
    let Some(i) = position(heap, dict, key)? else {
        return Ok(None);
    };
    Ok(dict_ref(heap, dict)?.entries.get(i).map(|(_, v)| *v))
}

/// Inserts or replaces. The caller keeps `key` and `value` reachable.
pub fn dict_set(heap: &mut Heap, dict: HeapId, key: Value, value: Value) -> RunResult<()> {
    if let Some(i) = position(heap, dict, key)? {
        dict_mut(heap, dict)?.entries[i].1 = value;
        return Ok(());
    }
    heap.reserve_growth(dict, DICT_ENTRY_SIZE, &[key, value])?;
    dict_mut(heap, dict)?.entries.push((key, value));
    Ok(())
}

/// Removes `key`, failing with KeyError when absent.
pub fn dict_delete(heap: &mut Heap, dict: HeapId, key: Value) -> RunResult<()> {
    let Some(i) = position(heap, dict, key)? else {
        return Err(ExcType::key_error(crate::object::display_value(heap, key)));
    };
    dict_mut(heap, dict)?.entries.swap_remove(i);
    heap.refresh_size(dict);
    Ok(())
}

/// Lookup by raw string key, without allocating a key object.
#[must_use]
pub fn dict_get_str(heap: &Heap, dict: HeapId, name: &[u8]) -> Option<Value> {
    let HeapData::Dict(d) = heap.get(dict) else {
        return None;
    };
    d.entries
        .iter()
        .find(|(k, _)| k.as_str_bytes(heap) == Some(name))
        .map(|(_, v)| *v)
}

/// Stores under a string key, allocating the key object if needed.
pub(crate) fn dict_set_str(heap: &mut Heap, dict: HeapId, name: &[u8], value: Value) -> RunResult<()> {
    let existing = match heap.get(dict) {
        HeapData::Dict(d) => d.entries.iter().position(|(k, _)| k.as_str_bytes(heap) == Some(name)),
        _ => None,
    };
    if let Some(i) = existing {
        dict_mut(heap, dict)?.entries[i].1 = value;
        return Ok(());
    }
    let mark = heap.temp_root_mark();
    heap.push_temp_root_value(value)?;
    heap.push_temp_root(dict)?;
    let result = heap.alloc_str(name).and_then(|key| dict_set(heap, dict, Value::Ref(key), value));
    heap.restore_temp_roots(mark);
    result
}
