use crate::{
    heap::{Heap, HeapData, HeapId},
    types::Type,
};

/// A runtime value.
///
/// Small immutable scalars are stored inline; everything else lives in the
/// heap and is referenced by handle. Equality here is identity: two `Ref`s are
/// equal only when they name the same heap slot. Language-level equality is
/// [`crate::object::compare`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i32),
    Float(f32),
    Ref(HeapId),
}

impl Value {
    /// Returns the type tag, looking through the handle for heap values.
    #[must_use]
    pub fn type_of(self, heap: &Heap) -> Type {
        match self {
            Self::None => Type::None,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Ref(id) => heap.get(id).type_of(),
        }
    }

    /// The heap handle, if this is a heap value.
    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// The heap payload, if this is a heap value.
    #[must_use]
    pub fn heap_data(self, heap: &Heap) -> Option<&HeapData> {
        self.ref_id().map(|id| heap.get(id))
    }

    /// The bytes of a string value.
    #[must_use]
    pub fn as_str_bytes(self, heap: &Heap) -> Option<&[u8]> {
        match self.heap_data(heap)? {
            HeapData::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view used by arithmetic and indexing; booleans count as 0 and 1.
    #[must_use]
    pub fn as_int(self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(i),
            Self::Bool(b) => Some(i32::from(b)),
            _ => None,
        }
    }

    /// Float view with int promotion.
    #[must_use]
    pub fn as_float(self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(f),
            other => other.as_int().map(|i| i as f32),
        }
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<HeapId> for Value {
    fn from(id: HeapId) -> Self {
        Self::Ref(id)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}
