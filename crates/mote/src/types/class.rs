use crate::{
    exception_private::ExcType,
    heap::{Heap, HeapData, HeapId},
    types::dict,
    value::Value,
};

/// A class object. Single inheritance only: `bases` holds at most one class
/// that participates in attribute lookup.
#[derive(Debug, Clone)]
pub struct Class {
    pub name: HeapId,
    pub attrs: HeapId,
    pub bases: Option<HeapId>,
    /// Set on the builtin exception classes.
    pub exc_kind: Option<ExcType>,
}

#[derive(Debug, Clone, Copy)]
pub struct Instance {
    pub class: HeapId,
    pub attrs: HeapId,
}

/// First base class of `class`, if any.
pub(crate) fn base_of(heap: &Heap, class: HeapId) -> Option<HeapId> {
    let HeapData::Class(cls) = heap.get(class) else {
        return None;
    };
    let bases = cls.bases?;
    let HeapData::Tuple(items) = heap.get(bases) else {
        return None;
    };
    items.iter().find_map(|v| match v {
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Class(_)) => Some(*id),
        _ => None,
    })
}

/// Looks `name` up in `class` and then its ancestors.
pub(crate) fn class_lookup(heap: &Heap, class: HeapId, name: &[u8]) -> Option<Value> {
    let mut current = Some(class);
    while let Some(id) = current {
        if let HeapData::Class(cls) = heap.get(id)
            && let Some(v) = dict::dict_get_str(heap, cls.attrs, name)
        {
            return Some(v);
        }
        current = base_of(heap, id);
    }
    None
}

/// Whether `class` is `ancestor` or derives from it.
pub(crate) fn is_subclass(heap: &Heap, class: HeapId, ancestor: HeapId) -> bool {
    let mut current = Some(class);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = base_of(heap, id);
    }
    false
}

/// Nearest builtin exception kind among `class` and its ancestors.
pub(crate) fn exc_kind_of(heap: &Heap, class: HeapId) -> Option<ExcType> {
    let mut current = Some(class);
    while let Some(id) = current {
        if let HeapData::Class(Class {
            exc_kind: Some(kind), ..
        }) = heap.get(id)
        {
            return Some(*kind);
        }
        current = base_of(heap, id);
    }
    None
}

pub(crate) fn class_name(heap: &Heap, class: HeapId) -> String {
    match heap.get(class) {
        HeapData::Class(cls) => Value::Ref(cls.name)
            .as_str_bytes(heap)
            .map_or_else(|| "?".to_owned(), |b| String::from_utf8_lossy(b).into_owned()),
        _ => "?".to_owned(),
    }
}
