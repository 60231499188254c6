//! Payload structs for heap-allocated objects, plus the type tag shared by every value.

pub(crate) mod class;
pub(crate) mod code;
pub(crate) mod dict;
pub(crate) mod frame;
pub(crate) mod function;
pub(crate) mod iter;
pub(crate) mod module;
pub(crate) mod str;
pub(crate) mod thread;

use serde::Serialize;
use strum::{Display, IntoStaticStr};

pub use self::{
    class::{Class, Instance},
    code::{Code, NativeCode, code_flags},
    dict::Dict,
    frame::{Block, BlockKind, Frame, FrameKind, NativeFrame},
    function::{Function, Method},
    iter::SeqIter,
    module::Module,
    thread::Thread,
};

/// Type tag of a value.
///
/// The numeric tag is what the diagnostic form `<obj type 0xNN @ 0xADDR>` shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr, Serialize)]
#[repr(u8)]
pub enum Type {
    #[strum(serialize = "NoneType")]
    None = 0x00,
    #[strum(serialize = "int")]
    Int = 0x01,
    #[strum(serialize = "float")]
    Float = 0x02,
    #[strum(serialize = "str")]
    Str = 0x03,
    #[strum(serialize = "tuple")]
    Tuple = 0x04,
    #[strum(serialize = "code")]
    Code = 0x05,
    #[strum(serialize = "module")]
    Module = 0x06,
    #[strum(serialize = "classobj")]
    Class = 0x07,
    #[strum(serialize = "function")]
    Function = 0x08,
    #[strum(serialize = "instance")]
    Instance = 0x09,
    #[strum(serialize = "cell")]
    Cell = 0x0A,
    #[strum(serialize = "native")]
    NativeCode = 0x0C,
    #[strum(serialize = "thread")]
    Thread = 0x0D,
    #[strum(serialize = "bool")]
    Bool = 0x0F,
    #[strum(serialize = "instancemethod")]
    Method = 0x11,
    #[strum(serialize = "list")]
    List = 0x12,
    #[strum(serialize = "dict")]
    Dict = 0x13,
    #[strum(serialize = "bytearray")]
    Bytearray = 0x14,
    #[strum(serialize = "frame")]
    Frame = 0x15,
    #[strum(serialize = "iterator")]
    SeqIter = 0x19,
    #[strum(serialize = "nativeframe")]
    NativeFrame = 0x1A,
}

impl Type {
    /// Numeric tag byte.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether values of this type may be used as dict keys.
    #[must_use]
    pub fn is_hashable(self) -> bool {
        !matches!(self, Self::List | Self::Dict | Self::Bytearray)
    }
}
