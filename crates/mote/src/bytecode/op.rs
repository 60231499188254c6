//! Opcode numbering and instruction decoding.

use std::fmt;

use strum::{Display, FromRepr, IntoStaticStr};

use crate::{
    exception_private::{ExcType, RunResult},
    memspace::{MemRef, MemSpaces},
};

/// Opcodes at or above this value carry a two-byte little-endian argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// Bytecode opcodes.
///
/// Values missing from this table (gaps and anything above `MAP_ADD`) are
/// illegal and rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr, FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    StopCode = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryConvert = 13,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    #[strum(serialize = "SLICE+0")]
    Slice0 = 30,
    #[strum(serialize = "SLICE+1")]
    Slice1 = 31,
    #[strum(serialize = "SLICE+2")]
    Slice2 = 32,
    #[strum(serialize = "SLICE+3")]
    Slice3 = 33,
    #[strum(serialize = "STORE_SLICE+0")]
    StoreSlice0 = 40,
    #[strum(serialize = "STORE_SLICE+1")]
    StoreSlice1 = 41,
    #[strum(serialize = "STORE_SLICE+2")]
    StoreSlice2 = 42,
    #[strum(serialize = "STORE_SLICE+3")]
    StoreSlice3 = 43,
    #[strum(serialize = "DELETE_SLICE+0")]
    DeleteSlice0 = 50,
    #[strum(serialize = "DELETE_SLICE+1")]
    DeleteSlice1 = 51,
    #[strum(serialize = "DELETE_SLICE+2")]
    DeleteSlice2 = 52,
    #[strum(serialize = "DELETE_SLICE+3")]
    DeleteSlice3 = 53,
    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceDivide = 58,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    PrintExpr = 70,
    PrintItem = 71,
    PrintNewline = 72,
    PrintItemTo = 73,
    PrintNewlineTo = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    LoadLocals = 82,
    ReturnValue = 83,
    ImportStar = 84,
    ExecStmt = 85,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    BuildClass = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    ListAppend = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    DupTopx = 99,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 145,
    SetAdd = 146,
    MapAdd = 147,
}

impl Opcode {
    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Whether the interpreter implements this opcode.
    ///
    /// The rest are defined by the compiler but depend on features this
    /// runtime does not carry (generators, `with`, `exec`, sets, keyword and
    /// star-argument calls, extended slicing, `print >>f`).
    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            Self::UnaryConvert
                | Self::StoreSlice0
                | Self::StoreSlice1
                | Self::StoreSlice2
                | Self::StoreSlice3
                | Self::DeleteSlice0
                | Self::DeleteSlice1
                | Self::DeleteSlice2
                | Self::DeleteSlice3
                | Self::PrintItemTo
                | Self::PrintNewlineTo
                | Self::WithCleanup
                | Self::ImportStar
                | Self::ExecStmt
                | Self::YieldValue
                | Self::BuildSet
                | Self::BuildSlice
                | Self::CallFunctionVar
                | Self::CallFunctionKw
                | Self::CallFunctionVarKw
                | Self::SetupWith
                | Self::SetAdd
                | Self::MapAdd
        )
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode byte within the code's bytecode.
    pub offset: usize,
    pub opcode: Opcode,
    pub arg: Option<u16>,
}

impl Instruction {
    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.arg.is_some() { 3 } else { 1 }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The argument, or 0 for opcodes without one.
    #[must_use]
    pub fn arg(&self) -> u16 {
        self.arg.unwrap_or(0)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arg {
            Some(arg) => write!(f, "{:>5} {:<24}{arg}", self.offset, self.opcode.to_string()),
            None => write!(f, "{:>5} {}", self.offset, self.opcode),
        }
    }
}

/// Decodes the instruction at `offset` within `code`.
///
/// Reads go through the memory-space abstraction, so the result does not
/// depend on which space holds the bytecode.
pub fn decode_at(mem: &MemSpaces, code: &MemRef, offset: usize) -> RunResult<Instruction> {
    let mut addr = code.addr + offset;
    let byte = mem.read_byte(code.space, &mut addr);
    let opcode = Opcode::from_repr(byte).ok_or_else(|| ExcType::system_error(format!("illegal opcode {byte}")))?;
    let arg = opcode.has_arg().then(|| mem.read_u16(code.space, &mut addr));
    Ok(Instruction { offset, opcode, arg })
}

/// Decodes a whole code object, stopping after `STOP_CODE` or at the end of the bytecode.
pub fn disassemble(mem: &MemSpaces, code: &MemRef) -> RunResult<Vec<Instruction>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len {
        let ins = decode_at(mem, code, offset)?;
        offset += ins.len();
        out.push(ins);
        if ins.opcode == Opcode::StopCode {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::memspace::MemSpace;

    #[test]
    fn every_gap_is_illegal() {
        let gaps = [6u8, 7, 8, 14, 16, 17, 18, 34, 39, 44, 49, 69, 117, 118, 123, 127, 128, 129, 138, 139, 144];
        for b in gaps.into_iter().chain(148..=255) {
            assert!(Opcode::from_repr(b).is_none(), "{b} should be illegal");
        }
        assert_eq!(Opcode::from_repr(147), Some(Opcode::MapAdd));
    }

    #[test]
    fn names_match_compiler_spelling() {
        assert_eq!(Opcode::LoadConst.to_string(), "LOAD_CONST");
        assert_eq!(Opcode::Slice2.to_string(), "SLICE+2");
        assert_eq!(Opcode::PopJumpIfFalse.to_string(), "POP_JUMP_IF_FALSE");
    }

    #[test]
    fn argument_threshold() {
        assert!(!Opcode::BuildClass.has_arg());
        assert!(Opcode::StoreName.has_arg());
    }

    #[test]
    fn decode_reads_little_endian_argument() {
        let mem = MemSpaces::new().with_prog(vec![100, 0x34, 0x12, 83]);
        let code = MemRef::new(MemSpace::Prog, 0, 4);
        let ins = decode_at(&mem, &code, 0).unwrap();
        assert_eq!(ins.opcode, Opcode::LoadConst);
        assert_eq!(ins.arg, Some(0x1234));
        assert_eq!(ins.len(), 3);
        let ret = decode_at(&mem, &code, 3).unwrap();
        assert_eq!(ret.opcode, Opcode::ReturnValue);
        assert_eq!(ret.arg, None);
    }

    #[test]
    fn illegal_opcode_is_reported() {
        let mem = MemSpaces::new().with_ram(vec![200]);
        let err = decode_at(&mem, &MemRef::new(MemSpace::Ram, 0, 1), 0).unwrap_err();
        assert_eq!(err.kind(), ExcType::SystemError);
        assert_eq!(err.message(), Some("illegal opcode 200"));
    }

    #[test]
    fn disassembly_stops_at_stop_code() {
        let mem = MemSpaces::new().with_prog(vec![9, 0, 1, 1]);
        let listing = disassemble(&mem, &MemRef::new(MemSpace::Prog, 0, 4)).unwrap();
        assert_eq!(
            listing.iter().map(|i| i.opcode).collect::<Vec<_>>(),
            vec![Opcode::Nop, Opcode::StopCode]
        );
    }
}
