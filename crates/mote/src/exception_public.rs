use std::fmt::{self, Write};

use serde::Serialize;

use crate::exception_private::RunError;

/// One line of a traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TraceFrame {
    /// A bytecode frame.
    Code {
        filename: String,
        line: u32,
        /// Last entry of the code object's names tuple.
        name: String,
    },
    /// Control was inside a native function.
    Native { name: String },
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code { filename, line, name } => write!(f, "  File \"{filename}\", line {line}, in {name}"),
            Self::Native { name } => write!(f, "  {name}() __NATIVE__"),
        }
    }
}

/// Maps a bytecode offset to a source line by walking a line-number table.
///
/// The table is a run of `(address delta, line delta)` byte pairs. Line deltas
/// are accumulated onto `first_line` while the running address sum stays at or
/// below `offset`.
#[must_use]
pub fn line_for_offset(lnotab: &[u8], first_line: u16, offset: usize) -> u32 {
    let mut line = u32::from(first_line);
    let mut addr_sum = 0usize;
    for pair in lnotab.chunks_exact(2) {
        addr_sum += usize::from(pair[0]);
        if addr_sum > offset {
            break;
        }
        line += u32::from(pair[1]);
    }
    line
}

/// Renders the user-visible report for an unhandled error.
///
/// ```text
/// Traceback (most recent call first):
///   File "main.py", line 4, in f
///   File "main.py", line 9, in main
/// ZeroDivisionError: division by zero
/// ZeroDivisionError detected by binary.rs:88
/// ```
#[must_use]
pub fn format_report(err: &RunError) -> String {
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = write_report(&mut out, err);
    out
}

fn write_report(out: &mut String, err: &RunError) -> fmt::Result {
    if !err.traceback().is_empty() {
        writeln!(out, "Traceback (most recent call first):")?;
        for frame in err.traceback() {
            writeln!(out, "{frame}")?;
        }
    }
    if err.message().is_some() {
        writeln!(out, "{err}")?;
    }
    let (file, line) = err.origin();
    writeln!(out, "{} detected by {file}:{line}", err.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception_private::ExcType;

    #[test]
    fn line_walk_stops_past_offset() {
        // ipm module: first line 17, table "\t9\t\x0b"
        let lnotab = b"\t9\t\x0b";
        assert_eq!(line_for_offset(lnotab, 17, 0), 17);
        assert_eq!(line_for_offset(lnotab, 17, 9), 17 + 57);
        assert_eq!(line_for_offset(lnotab, 17, 17), 17 + 57);
        assert_eq!(line_for_offset(lnotab, 17, 18), 17 + 57 + 11);
    }

    #[test]
    fn report_lists_frames_then_origin() {
        let mut err = ExcType::ZeroDivisionError.msg("division by zero");
        err.push_frame(TraceFrame::Code {
            filename: "t.py".to_owned(),
            line: 3,
            name: "f".to_owned(),
        });
        err.push_frame(TraceFrame::Native { name: "sum".to_owned() });
        let report = format_report(&err);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "Traceback (most recent call first):");
        assert_eq!(lines[1], "  File \"t.py\", line 3, in f");
        assert_eq!(lines[2], "  sum() __NATIVE__");
        assert_eq!(lines[3], "ZeroDivisionError: division by zero");
        assert!(lines[4].starts_with("ZeroDivisionError detected by exception_public.rs:"));
    }
}
