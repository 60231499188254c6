use crate::{
    heap::{Heap, HeapData, HeapId},
    memspace::MemRef,
};

/// Code-object flag bits as produced by the offline compiler.
pub mod code_flags {
    pub const OPTIMIZED: u8 = 0x01;
    pub const NEWLOCALS: u8 = 0x02;
    pub const VARARGS: u8 = 0x04;
    pub const VARKEYWORDS: u8 = 0x08;
    pub const NESTED: u8 = 0x10;
    pub const GENERATOR: u8 = 0x20;
    pub const NOFREE: u8 = 0x40;
}

/// An immutable compiled unit.
///
/// Names, constants and cell variables are heap tuples built by the image
/// loader. Bytecode and the debug tables stay in their memory space and are
/// reached through [`MemRef`] windows.
#[derive(Debug, Clone)]
pub struct Code {
    pub argcount: u8,
    pub flags: u8,
    pub stacksize: u8,
    pub nlocals: u8,
    pub nfreevars: u8,
    pub first_line: u16,
    pub names: HeapId,
    pub consts: HeapId,
    /// Tuple of local indices (or names) that are captured by inner functions.
    pub cellvars: Option<HeapId>,
    pub lnotab: MemRef,
    pub filename: MemRef,
    pub bytecode: MemRef,
    /// The whole image, from its type byte to the end of the bytecode.
    pub image: MemRef,
}

impl Code {
    /// Number of cell variables declared by this code object.
    #[must_use]
    pub fn ncellvars(&self, heap: &Heap) -> usize {
        self.cellvars.map_or(0, |id| match heap.get(id) {
            HeapData::Tuple(items) => items.len(),
            _ => 0,
        })
    }

    #[must_use]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A constant naming an entry of the native function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCode {
    pub argcount: u8,
    pub index: u16,
}

/// Display name of a code object: the last element of its names tuple.
pub(crate) fn code_name(heap: &Heap, names: HeapId) -> String {
    match heap.get(names) {
        HeapData::Tuple(items) => items
            .last()
            .and_then(|v| v.as_str_bytes(heap))
            .map_or_else(|| "?".to_owned(), |b| String::from_utf8_lossy(b).into_owned()),
        _ => "?".to_owned(),
    }
}
