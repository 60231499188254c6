//! Image assembler shared by the integration tests.
//!
//! Builds module tables in the compiler's image format from hand-written
//! bytecode, so tests can drive the interpreter without the offline compiler.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::HashMap;

use mote::{CollectIo, MemSpace, MemSpaces, Opcode, RunOutcome, RunResult, Vm, VmConfig};

/// Code flags for function bodies: optimized locals, fresh namespace.
pub const FUNCTION_FLAGS: u8 = 0x03;
/// Code flags for class bodies: names resolve through a dict.
pub const CLASS_FLAGS: u8 = 0x42;
/// Code flags for module bodies.
pub const MODULE_FLAGS: u8 = 0x40;

/// One object in the image stream.
#[derive(Debug, Clone)]
pub enum Obj {
    None,
    Int(i32),
    Float(f32),
    Str(Vec<u8>),
    Tuple(Vec<Obj>),
    Code(Box<CodeImage>),
    Native { argc: u8, index: u16 },
}

pub fn s(text: &str) -> Obj {
    Obj::Str(text.as_bytes().to_vec())
}

impl Obj {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::None => out.push(0),
            Self::Int(i) => {
                out.push(1);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Self::Float(f) => {
                out.push(2);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Self::Str(bytes) => {
                out.push(3);
                out.extend_from_slice(&u16::try_from(bytes.len()).unwrap().to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Self::Tuple(items) => {
                out.push(4);
                out.push(u8::try_from(items.len()).unwrap());
                for item in items {
                    item.encode(out);
                }
            }
            Self::Code(code) => code.encode(out),
            Self::Native { argc, index } => {
                out.push(11);
                out.push(*argc);
                out.extend_from_slice(&index.to_le_bytes());
            }
        }
    }
}

/// A code object ready to be encoded.
#[derive(Debug, Clone)]
pub struct CodeImage {
    /// Shown in tracebacks and used as the module table key.
    pub name: String,
    pub argcount: u8,
    pub flags: u8,
    pub stacksize: u8,
    pub nlocals: u8,
    pub nfreevars: u8,
    pub first_line: u16,
    /// Names referenced by index from the bytecode; `name` is appended on encode.
    pub names: Vec<String>,
    pub lnotab: Vec<u8>,
    pub filename: String,
    pub consts: Vec<Obj>,
    pub cellvars: Option<Vec<Obj>>,
    pub bytecode: Vec<u8>,
}

impl CodeImage {
    pub fn module(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            argcount: 0,
            flags: MODULE_FLAGS,
            stacksize: 8,
            nlocals: 0,
            nfreevars: 0,
            first_line: 1,
            names: Vec::new(),
            lnotab: Vec::new(),
            filename: format!("{name}.py"),
            consts: Vec::new(),
            cellvars: None,
            bytecode: Vec::new(),
        }
    }

    pub fn function(name: &str, argcount: u8, nlocals: u8) -> Self {
        Self {
            argcount,
            flags: FUNCTION_FLAGS,
            nlocals,
            ..Self::module(name)
        }
    }

    pub fn class_body(name: &str) -> Self {
        Self {
            flags: CLASS_FLAGS,
            ..Self::module(name)
        }
    }

    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    pub fn consts(mut self, consts: Vec<Obj>) -> Self {
        self.consts = consts;
        self
    }

    pub fn cellvars(mut self, cellvars: Vec<Obj>) -> Self {
        self.cellvars = Some(cellvars);
        self
    }

    pub fn code(mut self, bytecode: Vec<u8>) -> Self {
        self.bytecode = bytecode;
        self
    }

    pub fn lines(mut self, filename: &str, first_line: u16, lnotab: &[u8]) -> Self {
        self.filename = filename.to_owned();
        self.first_line = first_line;
        self.lnotab = lnotab.to_vec();
        self
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.push(10);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&[self.argcount, self.flags, self.stacksize, self.nlocals, self.nfreevars]);
        out.extend_from_slice(&self.first_line.to_le_bytes());
        let mut names: Vec<Obj> = self.names.iter().map(|n| s(n)).collect();
        names.push(s(&self.name));
        Obj::Tuple(names).encode(out);
        Obj::Str(self.lnotab.clone()).encode(out);
        let mut filename = self.filename.clone().into_bytes();
        filename.push(0);
        Obj::Str(filename).encode(out);
        Obj::Tuple(self.consts.clone()).encode(out);
        match &self.cellvars {
            Some(cells) => Obj::Tuple(cells.clone()).encode(out),
            None => Obj::None.encode(out),
        }
        out.extend_from_slice(&self.bytecode);
        let size = u16::try_from(out.len() - start).unwrap();
        out[start + 1..start + 3].copy_from_slice(&size.to_le_bytes());
    }

    pub fn into_const(self) -> Obj {
        Obj::Code(Box::new(self))
    }
}

/// A module table holding `modules`, terminated by the end marker.
pub fn table(modules: &[CodeImage]) -> Vec<u8> {
    let mut out = Vec::new();
    for m in modules {
        m.encode(&mut out);
    }
    out.push(0xFF);
    out
}

/// Bytecode assembler with symbolic jump targets.
#[derive(Debug, Default)]
pub struct Asm {
    code: Vec<u8>,
    labels: HashMap<&'static str, usize>,
    /// (argument offset, label, relative base)
    fixups: Vec<(usize, &'static str, Option<usize>)>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, opcode: Opcode) -> Self {
        assert!(!opcode.has_arg(), "{opcode} takes an argument");
        self.code.push(opcode as u8);
        self
    }

    pub fn arg(mut self, opcode: Opcode, arg: u16) -> Self {
        assert!(opcode.has_arg(), "{opcode} takes no argument");
        self.code.push(opcode as u8);
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    /// An opcode whose argument is the absolute offset of `label`.
    pub fn to(mut self, opcode: Opcode, label: &'static str) -> Self {
        self.code.push(opcode as u8);
        self.fixups.push((self.code.len(), label, None));
        self.code.extend_from_slice(&[0, 0]);
        self
    }

    /// An opcode whose argument is the distance from the next instruction to `label`.
    pub fn rel(mut self, opcode: Opcode, label: &'static str) -> Self {
        self.code.push(opcode as u8);
        let at = self.code.len();
        self.fixups.push((at, label, Some(at + 2)));
        self.code.extend_from_slice(&[0, 0]);
        self
    }

    pub fn label(mut self, name: &'static str) -> Self {
        self.labels.insert(name, self.code.len());
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Current offset, for building line-number tables.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn finish(mut self) -> Vec<u8> {
        for (at, label, base) in std::mem::take(&mut self.fixups) {
            let target = *self.labels.get(label).unwrap_or_else(|| panic!("undefined label {label}"));
            let value = match base {
                Some(base) => target - base,
                None => target,
            };
            self.code[at..at + 2].copy_from_slice(&u16::try_from(value).unwrap().to_le_bytes());
        }
        self.code
    }
}

/// A runtime with `modules` loaded from the program store and output captured.
pub fn vm_with(modules: &[CodeImage], config: VmConfig) -> Vm<CollectIo> {
    let mem = MemSpaces::new().with_prog(table(modules));
    let mut vm = Vm::new(config, mem, CollectIo::new()).unwrap();
    vm.load_module_table(MemSpace::Prog, 0).unwrap();
    vm
}

/// Runs `main` and returns the result with everything it printed.
pub fn run_main(modules: &[CodeImage]) -> (RunResult<RunOutcome>, String) {
    let mut vm = vm_with(modules, VmConfig::default());
    let result = vm.run_module("main");
    let output = vm.io().output_str();
    (result, output)
}

/// A `main` module whose body is `bytecode`.
pub fn main_module(names: &[&str], consts: Vec<Obj>, bytecode: Vec<u8>) -> CodeImage {
    CodeImage::module("main").names(names).consts(consts).code(bytecode)
}
