use smallvec::SmallVec;

use crate::{heap::HeapId, value::Value};

/// Kind of an entry on a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    Except,
    Finally,
}

/// A `SETUP_*` entry: where to go when the block is left abnormally and how
/// deep the operand stack was when it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    pub level: usize,
}

/// What the caller receives when this frame returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameKind {
    /// A plain call; the return value is pushed.
    Call,
    /// Module body run by `IMPORT_NAME`; the module is pushed instead.
    Import(HeapId),
    /// `__init__` run while instantiating a class; the instance is pushed instead.
    Init(Value),
    /// Bottom frame of a thread or of a top-level run; nothing is pushed.
    Entry,
}

/// One bytecode activation record.
#[derive(Debug, Clone)]
pub struct Frame {
    pub back: Option<HeapId>,
    /// The executing `Function` or `Module`.
    pub func: HeapId,
    pub code: HeapId,
    pub globals: HeapId,
    /// Dict used by the `*_NAME` opcodes: the globals for module bodies, a
    /// fresh dict for class bodies, `None` for ordinary functions.
    pub names: Option<HeapId>,
    pub ip: usize,
    pub stack: Vec<Value>,
    /// `None` marks an unbound local.
    pub locals: Vec<Option<Value>>,
    /// Cells for the code's cell variables followed by its free variables.
    pub cells: Vec<HeapId>,
    pub blocks: SmallVec<[Block; 4]>,
    pub kind: FrameKind,
    /// Length of the chain ending at this frame.
    pub depth: usize,
}

/// The frame standing in for control inside a native function.
///
/// There is one per runtime. Its locals hold the call's arguments so that
/// they stay reachable while the native code allocates.
#[derive(Debug, Clone, Default)]
pub struct NativeFrame {
    pub func: Option<HeapId>,
    pub back: Option<HeapId>,
    pub locals: Vec<Value>,
}
