use crate::{heap::HeapId, value::Value};

/// A callable wrapping a code object (bytecode or native).
#[derive(Debug, Clone)]
pub struct Function {
    /// A `Code` or `NativeCode` object.
    pub code: HeapId,
    /// Globals of the defining module.
    pub globals: HeapId,
    /// Attribute dict, created on first attribute store.
    pub attrs: Option<HeapId>,
    /// Tuple of default argument values for the trailing parameters.
    pub defaults: Option<HeapId>,
    /// Tuple of cells for the code's free variables.
    pub closure: Option<HeapId>,
}

/// A function bound to the instance it was looked up on.
#[derive(Debug, Clone, Copy)]
pub struct Method {
    pub receiver: Value,
    pub function: HeapId,
}
