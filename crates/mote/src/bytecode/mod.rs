//! Bytecode decoding and execution.
//!
//! - `op` - the opcode table and instruction decoder
//! - `vm` - the interpreter loop, calls, exceptions and thread scheduling

pub use op::{HAVE_ARGUMENT, Instruction, Opcode, decode_at, disassemble};
pub use vm::{RunOutcome, Vm};

pub mod op;
pub(crate) mod vm;
