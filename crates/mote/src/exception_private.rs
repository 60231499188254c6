use std::{
    fmt::{self, Display},
    panic::Location,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr, IntoStaticStr};

use crate::{exception_public::TraceFrame, types::Type};

/// Result type alias for operations that can produce a runtime error.
///
/// The "no result, try the next strategy" outcome used during lookups and
/// import resolution is expressed as `RunResult<Option<T>>` returning `Ok(None)`.
pub type RunResult<T> = Result<T, RunError>;

/// Base of the result-code range used for exception kinds.
pub const RESULT_CODE_BASE: u8 = 0xE0;

/// The closed set of exception kinds the interpreter can raise.
///
/// The discriminant order is part of the host interface: `code()` maps each kind
/// to `0xE0 + index`, the value reported to the platform error hook.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    FromRepr,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum ExcType {
    /// Base of every other kind, and the kind used for user classes with no builtin ancestor.
    Exception,
    SystemExit,
    #[strum(serialize = "IOError")]
    IoError,
    ZeroDivisionError,
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    MemoryError,
    NameError,
    SyntaxError,
    SystemError,
    TypeError,
    ValueError,
    StopIteration,
    Warning,
    OverflowError,
}

impl ExcType {
    /// Result code reported to the platform for this kind.
    #[must_use]
    pub fn code(self) -> u8 {
        RESULT_CODE_BASE + self as u8
    }

    /// Inverse of [`ExcType::code`].
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(RESULT_CODE_BASE).and_then(Self::from_repr)
    }

    /// Returns true if `self` would be caught by `except handler_type:`.
    ///
    /// The hierarchy is flat: every kind derives directly from `Exception`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        self == handler_type || handler_type == Self::Exception
    }

    /// Creates an error of this kind with no message.
    #[must_use]
    #[track_caller]
    pub fn bare(self) -> RunError {
        RunError::new(self, None)
    }

    /// Creates an error of this kind with a message.
    #[must_use]
    #[track_caller]
    pub fn msg(self, msg: impl Display) -> RunError {
        RunError::new(self, Some(msg.to_string()))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn type_error(msg: impl Display) -> RunError {
        Self::TypeError.msg(msg)
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn value_error(msg: impl Display) -> RunError {
        Self::ValueError.msg(msg)
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn system_error(msg: impl Display) -> RunError {
        Self::SystemError.msg(msg)
    }

    /// `TypeError: unsupported operand type(s) for +: 'int' and 'str'`
    #[must_use]
    #[track_caller]
    pub(crate) fn binary_type_error(op: &str, lhs: Type, rhs: Type) -> RunError {
        Self::TypeError.msg(format!("unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'"))
    }

    /// `TypeError: bad operand type for unary -: 'str'`
    #[must_use]
    #[track_caller]
    pub(crate) fn unary_type_error(op: &str, operand: Type) -> RunError {
        Self::TypeError.msg(format!("bad operand type for unary {op}: '{operand}'"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn type_error_not_callable(type_: Type) -> RunError {
        Self::TypeError.msg(format!("'{type_}' object is not callable"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn type_error_not_iterable(type_: Type) -> RunError {
        Self::TypeError.msg(format!("'{type_}' object is not iterable"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn type_error_not_sub(type_: Type) -> RunError {
        Self::TypeError.msg(format!("'{type_}' object is not subscriptable"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn type_error_unhashable(type_: Type) -> RunError {
        Self::TypeError.msg(format!("unhashable type: '{type_}'"))
    }

    /// `TypeError: f() takes exactly 2 arguments (1 given)`
    #[must_use]
    #[track_caller]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        let plural = if expected == 1 { "" } else { "s" };
        Self::TypeError.msg(format!(
            "{name}() takes exactly {expected} argument{plural} ({actual} given)"
        ))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn index_error(type_: Type) -> RunError {
        Self::IndexError.msg(format!("{type_} index out of range"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn key_error(key: impl Display) -> RunError {
        Self::KeyError.msg(key)
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.msg(format!("name '{name}' is not defined"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn attribute_error(type_: Type, attr: &str) -> RunError {
        Self::AttributeError.msg(format!("'{type_}' object has no attribute '{attr}'"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn import_error(name: &str) -> RunError {
        Self::ImportError.msg(format!("no module named {name}"))
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn zero_division() -> RunError {
        Self::ZeroDivisionError.msg("integer division or modulo by zero")
    }

    #[must_use]
    #[track_caller]
    pub(crate) fn overflow() -> RunError {
        Self::OverflowError.msg("integer overflow")
    }
}

/// A propagating exception.
///
/// Carries the kind, an optional message, the place in the interpreter that
/// detected the condition, and the frames it has unwound through so far.
#[derive(Debug, Clone, PartialEq)]
pub struct RunError {
    kind: ExcType,
    message: Option<String>,
    /// Class name when the raised object is a user class rather than a builtin kind.
    class_name: Option<String>,
    origin: &'static Location<'static>,
    traceback: Vec<TraceFrame>,
    /// Raised by a `raise` statement, so the thread already holds the raised class and value.
    user_raised: bool,
}

impl RunError {
    #[must_use]
    #[track_caller]
    pub fn new(kind: ExcType, message: Option<String>) -> Self {
        Self {
            kind,
            message,
            class_name: None,
            origin: Location::caller(),
            traceback: Vec::new(),
            user_raised: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ExcType {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The name shown to users: the user class name if one was raised, otherwise the kind.
    #[must_use]
    pub fn name(&self) -> &str {
        self.class_name.as_deref().unwrap_or_else(|| self.kind.into())
    }

    /// Source file (base name) and line of the interpreter code that detected the error.
    #[must_use]
    pub fn origin(&self) -> (&'static str, u32) {
        let file = self.origin.file();
        let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
        (base, self.origin.line())
    }

    /// Frames unwound so far, innermost first.
    #[must_use]
    pub fn traceback(&self) -> &[TraceFrame] {
        &self.traceback
    }

    /// Result code of this error's kind.
    #[must_use]
    pub fn code(&self) -> u8 {
        self.kind.code()
    }

    pub(crate) fn with_class_name(mut self, name: Option<String>) -> Self {
        self.class_name = name;
        self
    }

    pub(crate) fn into_user_raised(mut self) -> Self {
        self.user_raised = true;
        self
    }

    pub(crate) fn is_user_raised(&self) -> bool {
        self.user_raised
    }

    pub(crate) fn push_frame(&mut self, frame: TraceFrame) {
        self.traceback.push(frame);
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

impl std::error::Error for RunError {}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn codes_follow_declaration_order() {
        assert_eq!(ExcType::Exception.code(), 0xE0);
        assert_eq!(ExcType::OverflowError.code(), 0xF1);
        for kind in ExcType::iter() {
            assert_eq!(ExcType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ExcType::from_code(0x10), None);
    }

    #[test]
    fn io_error_keeps_its_historic_spelling() {
        assert_eq!(ExcType::IoError.to_string(), "IOError");
        assert_eq!(ExcType::from_str("IOError"), Ok(ExcType::IoError));
    }

    #[test]
    fn everything_is_an_exception() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::KeyError));
        assert!(!ExcType::KeyError.is_subclass_of(ExcType::IndexError));
    }

    #[test]
    fn display_names_the_user_class() {
        let err = ExcType::Exception.msg("boom").with_class_name(Some("MyError".to_owned()));
        assert_eq!(err.to_string(), "MyError: boom");
        assert_eq!(ExcType::StopIteration.bare().to_string(), "StopIteration");
        assert_eq!(err.origin().0, "exception_private.rs");
    }
}
