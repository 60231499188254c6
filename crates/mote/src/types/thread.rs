use crate::{heap::HeapId, value::Value};

/// A schedulable frame chain.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: u32,
    /// Innermost frame; `None` once the thread has finished.
    pub frame: Option<HeapId>,
    /// Class of the exception currently propagating or being handled.
    pub exc_type: Value,
    /// The raised object itself (an instance, or the class again for `raise C`).
    pub exc_value: Value,
}

impl Thread {
    #[must_use]
    pub fn new(id: u32, frame: HeapId) -> Self {
        Self {
            id,
            frame: Some(frame),
            exc_type: Value::None,
            exc_value: Value::None,
        }
    }
}
