//! Unary, binary and in-place operators.
//!
//! Integers are 32-bit and every operation that would leave that range raises
//! OverflowError instead of wrapping. Mixed int/float operands promote to
//! float. Integer `/` floors, as classic division does for ints.

use super::Vm;
use crate::{
    bytecode::op::Opcode,
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId, VALUE_SLOT_SIZE},
    io::PlatformIo,
    tracer::VmTracer,
    types::Type,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    /// Classic `/`: floors for ints, true division for floats.
    Div,
    FloorDiv,
    TrueDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Xor,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div | Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "** or pow()",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::And => "&",
            Self::Xor => "^",
            Self::Or => "|",
        }
    }

    fn is_bitwise(self) -> bool {
        matches!(self, Self::LShift | Self::RShift | Self::And | Self::Xor | Self::Or)
    }
}

fn floor_div(a: i32, b: i32) -> RunResult<i32> {
    if b == 0 {
        return Err(ExcType::zero_division());
    }
    let q = a.checked_div(b).ok_or_else(ExcType::overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) { Ok(q - 1) } else { Ok(q) }
}

/// Integer arithmetic on two int operands.
pub(crate) fn int_op(op: BinOp, a: i32, b: i32) -> RunResult<Value> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(ExcType::overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(ExcType::overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(ExcType::overflow)?,
        BinOp::Div | BinOp::FloorDiv => floor_div(a, b)?,
        BinOp::TrueDiv => return float_op(op, a as f32, b as f32),
        BinOp::Mod => {
            if b == 0 {
                return Err(ExcType::zero_division());
            }
            let r = a.wrapping_rem(b);
            if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, a as f32, b as f32);
            }
            a.checked_pow(b.unsigned_abs()).ok_or_else(ExcType::overflow)?
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else {
                let shifted = a.checked_shl(b.unsigned_abs()).ok_or_else(ExcType::overflow)?;
                if shifted >> b != a {
                    return Err(ExcType::overflow());
                }
                shifted
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if b >= 32 { if a < 0 { -1 } else { 0 } } else { a >> b }
        }
        BinOp::And => a & b,
        BinOp::Xor => a ^ b,
        BinOp::Or => a | b,
    };
    Ok(Value::Int(v))
}

/// Float arithmetic; operands already promoted.
pub(crate) fn float_op(op: BinOp, a: f32, b: f32) -> RunResult<Value> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::TrueDiv => {
            if b == 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("float divmod()"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
        BinOp::LShift | BinOp::RShift | BinOp::And | BinOp::Xor | BinOp::Or => {
            return Err(ExcType::binary_type_error(op.symbol(), Type::Float, Type::Float));
        }
    };
    Ok(Value::Float(v))
}

/// The numeric result of `op`, or `None` when either operand is not a number.
pub(crate) fn numeric_op(op: BinOp, lhs: Value, rhs: Value) -> Option<RunResult<Value>> {
    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        return Some(int_op(op, a, b));
    }
    if op.is_bitwise() {
        return None;
    }
    match (lhs, rhs) {
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let (a, b) = (lhs.as_float()?, rhs.as_float()?);
            Some(float_op(op, a, b))
        }
        _ => None,
    }
}

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    pub(super) fn unary_op(&self, opcode: Opcode, v: Value) -> RunResult<Value> {
        match (opcode, v) {
            (Opcode::UnaryPositive, Value::Int(_) | Value::Float(_)) => Ok(v),
            (Opcode::UnaryPositive, Value::Bool(b)) => Ok(Value::Int(i32::from(b))),
            (Opcode::UnaryNegative, Value::Float(f)) => Ok(Value::Float(-f)),
            (Opcode::UnaryNegative, Value::Int(_) | Value::Bool(_)) => v
                .as_int()
                .and_then(i32::checked_neg)
                .map(Value::Int)
                .ok_or_else(ExcType::overflow),
            (Opcode::UnaryInvert, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(!v.as_int().unwrap_or(0))),
            _ => {
                let symbol = match opcode {
                    Opcode::UnaryPositive => "+",
                    Opcode::UnaryNegative => "-",
                    _ => "~",
                };
                Err(ExcType::unary_type_error(symbol, v.type_of(&self.heap)))
            }
        }
    }

    /// Executes a binary or in-place opcode on the top two stack values.
    ///
    /// Operands stay on the stack until the result exists, so they survive any
    /// collection the result's allocation triggers.
    pub(super) fn binary_opcode(&mut self, op: BinOp, opcode: Opcode) -> RunResult<()> {
        let rhs = self.peek(0)?;
        let lhs = self.peek(1)?;
        let in_place_list = matches!(opcode, Opcode::InplaceAdd)
            && matches!(lhs.heap_data(&self.heap), Some(HeapData::List(_)));
        let result = if in_place_list {
            let Value::Ref(list) = lhs else {
                return Err(ExcType::system_error("list operand is not a heap value"));
            };
            self.list_extend(list, rhs)?;
            lhs
        } else {
            self.binary_value(op, lhs, rhs)?
        };
        self.drop_n(2)?;
        self.push(result)
    }

    pub(crate) fn binary_value(&mut self, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        if let Some(result) = numeric_op(op, lhs, rhs) {
            return result;
        }
        let result = match op {
            BinOp::Add => self.concat(lhs, rhs)?,
            BinOp::Mul => match (lhs.as_int(), rhs.as_int()) {
                (_, Some(n)) => self.repeat(lhs, n)?,
                (Some(n), _) => self.repeat(rhs, n)?,
                _ => None,
            },
            _ => None,
        };
        result.ok_or_else(|| {
            ExcType::binary_type_error(op.symbol(), lhs.type_of(&self.heap), rhs.type_of(&self.heap))
        })
    }

    fn concat(&mut self, lhs: Value, rhs: Value) -> RunResult<Option<Value>> {
        let (Value::Ref(a), Value::Ref(b)) = (lhs, rhs) else {
            return Ok(None);
        };
        let data = match (self.heap.get(a), self.heap.get(b)) {
            (HeapData::Str(x), HeapData::Str(y)) => HeapData::Str([x.as_slice(), y].concat()),
            (HeapData::Tuple(x), HeapData::Tuple(y)) => HeapData::Tuple([x.as_slice(), y].concat()),
            (HeapData::List(x), HeapData::List(y)) => HeapData::List([x.as_slice(), y].concat()),
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.heap.allocate(data)?)))
    }

    fn repeat(&mut self, seq: Value, n: i32) -> RunResult<Option<Value>> {
        let Value::Ref(id) = seq else {
            return Ok(None);
        };
        let count = usize::try_from(n.max(0)).unwrap_or(0);
        let len = match self.heap.get(id) {
            HeapData::Str(s) => s.len(),
            HeapData::Tuple(items) | HeapData::List(items) => items.len() * VALUE_SLOT_SIZE,
            _ => return Ok(None),
        };
        if len.saturating_mul(count) > self.config.heap_size {
            return Err(ExcType::MemoryError.msg("repeated sequence does not fit the heap"));
        }
        let data = match self.heap.get(id) {
            HeapData::Str(s) => HeapData::Str(s.repeat(count)),
            HeapData::Tuple(items) => HeapData::Tuple(items.repeat(count)),
            HeapData::List(items) => HeapData::List(items.repeat(count)),
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.heap.allocate(data)?)))
    }

    /// `list += seq`: grows the list in place.
    fn list_extend(&mut self, list: HeapId, seq: Value) -> RunResult<()> {
        let items = match seq.heap_data(&self.heap) {
            Some(HeapData::List(items) | HeapData::Tuple(items)) => items.clone(),
            _ => return Err(ExcType::type_error_not_iterable(seq.type_of(&self.heap))),
        };
        self.heap.reserve_growth(list, items.len() * VALUE_SLOT_SIZE, &[seq])?;
        if let HeapData::List(dst) = self.heap.get_mut(list) {
            dst.extend(items);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn integer_division_floors_toward_negative_infinity() {
        assert_eq!(int_op(BinOp::Div, 7, 2).unwrap(), Value::Int(3));
        assert_eq!(int_op(BinOp::Div, -7, 2).unwrap(), Value::Int(-4));
        assert_eq!(int_op(BinOp::FloorDiv, 7, -2).unwrap(), Value::Int(-4));
        assert_eq!(int_op(BinOp::TrueDiv, 7, 2).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn modulo_takes_the_divisor_sign() {
        assert_eq!(int_op(BinOp::Mod, -7, 3).unwrap(), Value::Int(2));
        assert_eq!(int_op(BinOp::Mod, 7, -3).unwrap(), Value::Int(-2));
        assert_eq!(int_op(BinOp::Mod, i32::MIN, -1).unwrap(), Value::Int(0));
        assert_eq!(float_op(BinOp::Mod, -1.0, 4.0).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn zero_divisors_raise() {
        for op in [BinOp::Div, BinOp::FloorDiv, BinOp::Mod, BinOp::TrueDiv] {
            assert_eq!(int_op(op, 1, 0).unwrap_err().kind(), ExcType::ZeroDivisionError);
            assert_eq!(float_op(op, 1.0, 0.0).unwrap_err().kind(), ExcType::ZeroDivisionError);
        }
    }

    #[test]
    fn overflow_is_reported_not_wrapped() {
        assert_eq!(int_op(BinOp::Add, i32::MAX, 1).unwrap_err().kind(), ExcType::OverflowError);
        assert_eq!(int_op(BinOp::Mul, 1 << 20, 1 << 12).unwrap_err().kind(), ExcType::OverflowError);
        assert_eq!(int_op(BinOp::Div, i32::MIN, -1).unwrap_err().kind(), ExcType::OverflowError);
        assert_eq!(int_op(BinOp::Pow, 2, 31).unwrap_err().kind(), ExcType::OverflowError);
        assert_eq!(int_op(BinOp::LShift, 3, 30).unwrap_err().kind(), ExcType::OverflowError);
        assert_eq!(int_op(BinOp::LShift, 1, 30).unwrap(), Value::Int(1 << 30));
    }

    #[test]
    fn shifts() {
        assert_eq!(int_op(BinOp::RShift, -8, 1).unwrap(), Value::Int(-4));
        assert_eq!(int_op(BinOp::RShift, -8, 40).unwrap(), Value::Int(-1));
        assert_eq!(int_op(BinOp::RShift, 8, 40).unwrap(), Value::Int(0));
        assert_eq!(int_op(BinOp::LShift, 1, -1).unwrap_err().kind(), ExcType::ValueError);
    }

    #[test]
    fn negative_power_goes_to_float() {
        assert_eq!(int_op(BinOp::Pow, 2, -1).unwrap(), Value::Float(0.5));
        assert_eq!(int_op(BinOp::Pow, 3, 4).unwrap(), Value::Int(81));
    }

    #[test]
    fn mixed_operands_promote() {
        assert_eq!(
            numeric_op(BinOp::Add, Value::Int(1), Value::Float(0.5)).unwrap().unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            numeric_op(BinOp::Add, Value::Bool(true), Value::Int(1)).unwrap().unwrap(),
            Value::Int(2)
        );
        assert!(numeric_op(BinOp::And, Value::Float(1.0), Value::Int(1)).is_none());
        assert!(numeric_op(BinOp::Add, Value::None, Value::Int(1)).is_none());
    }
}
