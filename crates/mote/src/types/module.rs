use crate::heap::HeapId;

/// A module: a code object plus the dict that is both its attributes and its globals.
#[derive(Debug, Clone, Copy)]
pub struct Module {
    pub code: HeapId,
    pub attrs: HeapId,
}
