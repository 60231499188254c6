use crate::heap::HeapId;

/// Iterator over a string, tuple, list, bytearray or the keys of a dict.
///
/// Holds an index rather than a snapshot, so mutation of a list during
/// iteration is visible.
#[derive(Debug, Clone, Copy)]
pub struct SeqIter {
    pub seq: HeapId,
    pub index: usize,
}
