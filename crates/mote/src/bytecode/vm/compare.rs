//! `COMPARE_OP`: rich comparisons, containment, identity and exception matching.

use std::cmp::Ordering;

use super::Vm;
use crate::{
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    io::PlatformIo,
    object::{self, compare, is_identical, is_in},
    tracer::VmTracer,
    types::class::is_subclass,
    value::Value,
};

/// `COMPARE_OP` argument values.
mod cmp_op {
    pub const LT: usize = 0;
    pub const LE: usize = 1;
    pub const EQ: usize = 2;
    pub const NE: usize = 3;
    pub const GT: usize = 4;
    pub const GE: usize = 5;
    pub const IN: usize = 6;
    pub const NOT_IN: usize = 7;
    pub const IS: usize = 8;
    pub const IS_NOT: usize = 9;
    pub const EXC_MATCH: usize = 10;
}

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    pub(super) fn compare_op(&mut self, arg: usize) -> RunResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match arg {
            cmp_op::LT..=cmp_op::GE => self.rich_compare(arg, lhs, rhs)?,
            cmp_op::IN => is_in(&self.heap, rhs, lhs)?,
            cmp_op::NOT_IN => !is_in(&self.heap, rhs, lhs)?,
            cmp_op::IS => is_identical(lhs, rhs),
            cmp_op::IS_NOT => !is_identical(lhs, rhs),
            cmp_op::EXC_MATCH => self.exception_matches(lhs, rhs),
            other => return Err(ExcType::system_error(format!("bad comparison operator {other}"))),
        };
        self.push(Value::Bool(result))
    }

    fn rich_compare(&self, op: usize, lhs: Value, rhs: Value) -> RunResult<bool> {
        // Float comparisons go through IEEE operators so NaN compares false everywhere.
        let has_float = matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_));
        if has_float && let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float())
        {
            return Ok(float_compare(op, a, b));
        }
        match op {
            cmp_op::EQ => Ok(self.values_equal(lhs, rhs)),
            cmp_op::NE => Ok(!self.values_equal(lhs, rhs)),
            _ => {
                let ordering = object::order(&self.heap, lhs, rhs)?;
                Ok(match op {
                    cmp_op::LT => ordering == Ordering::Less,
                    cmp_op::LE => ordering != Ordering::Greater,
                    cmp_op::GT => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
        }
    }

    /// `==`: numbers with promotion, everything else by [`compare`].
    fn values_equal(&self, lhs: Value, rhs: Value) -> bool {
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            return a == b;
        }
        compare(&self.heap, lhs, rhs).is_same()
    }

    /// Whether the raised class `exc` is caught by `handler`, a class or a tuple of classes.
    fn exception_matches(&self, exc: Value, handler: Value) -> bool {
        let Some(exc_class) = self.class_of_raised(exc) else {
            return false;
        };
        let Value::Ref(handler_id) = handler else {
            return false;
        };
        match self.heap.get(handler_id) {
            HeapData::Class(_) => is_subclass(&self.heap, exc_class, handler_id),
            HeapData::Tuple(items) => items.iter().any(|item| match item {
                Value::Ref(id) => {
                    matches!(self.heap.get(*id), HeapData::Class(_)) && is_subclass(&self.heap, exc_class, *id)
                }
                _ => false,
            }),
            _ => false,
        }
    }

    /// The class of a raised object: the object itself if it is a class, else its class.
    pub(super) fn class_of_raised(&self, v: Value) -> Option<HeapId> {
        let Value::Ref(id) = v else {
            return None;
        };
        match self.heap.get(id) {
            HeapData::Class(_) => Some(id),
            HeapData::Instance(inst) => Some(inst.class),
            _ => None,
        }
    }
}

#[expect(clippy::float_cmp, reason = "IEEE comparison is the language semantics")]
fn float_compare(op: usize, a: f32, b: f32) -> bool {
    match op {
        cmp_op::LT => a < b,
        cmp_op::LE => a <= b,
        cmp_op::EQ => a == b,
        cmp_op::NE => a != b,
        cmp_op::GT => a > b,
        _ => a >= b,
    }
}
