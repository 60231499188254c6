//! Image loading and in-place execution across memory spaces.

mod common;

use common::{Asm, CodeImage, Obj, main_module, run_main, s, table};
use mote::{
    CollectIo, ExcType, HeapData, HeapId, IMAGE_TABLE_END, Instruction, MemSpace, MemSpaces, Opcode as Op,
    RunOutcome, Value, Vm, VmConfig, code_flags, disassemble,
};
use pretty_assertions::assert_eq;

/// The interactive-prompt module as emitted by the image tool: a module
/// binding two natives and a function with a dict default.
const IPM: [u8; 286] = [
    0x0A, 0x1D, 0x01, 0x00, 0x40, 0x02, 0x00, 0x00, 0x11, 0x00, 0x04, 0x04, 0x03, 0x07, 0x00, 0x5F, 0x67, 0x65,
    0x74, 0x49, 0x6D, 0x67, 0x03, 0x03, 0x00, 0x78, 0x30, 0x34, 0x03, 0x03, 0x00, 0x69, 0x70, 0x6D, 0x03, 0x03,
    0x00, 0x69, 0x70, 0x6D, 0x03, 0x04, 0x00, 0x09, 0x39, 0x09, 0x0B, 0x03, 0x0E, 0x00, 0x2E, 0x2E, 0x2F, 0x6C,
    0x69, 0x62, 0x2F, 0x69, 0x70, 0x6D, 0x2E, 0x70, 0x79, 0x00, 0x04, 0x04, 0x0B, 0x00, 0x22, 0x00, 0x0B, 0x00,
    0x23, 0x00, 0x0A, 0xAE, 0x00, 0x01, 0x43, 0x03, 0x04, 0x00, 0x55, 0x00, 0x04, 0x07, 0x03, 0x07, 0x00, 0x5F,
    0x67, 0x65, 0x74, 0x49, 0x6D, 0x67, 0x03, 0x02, 0x00, 0x43, 0x6F, 0x03, 0x04, 0x00, 0x65, 0x76, 0x61, 0x6C,
    0x03, 0x03, 0x00, 0x78, 0x30, 0x34, 0x03, 0x05, 0x00, 0x46, 0x61, 0x6C, 0x73, 0x65, 0x03, 0x0E, 0x00, 0x41,
    0x73, 0x73, 0x65, 0x72, 0x74, 0x69, 0x6F, 0x6E, 0x45, 0x72, 0x72, 0x6F, 0x72, 0x03, 0x03, 0x00, 0x69, 0x70,
    0x6D, 0x03, 0x0C, 0x00, 0x00, 0x01, 0x03, 0x04, 0x09, 0x01, 0x0C, 0x01, 0x0F, 0x01, 0x0B, 0x04, 0x03, 0x0E,
    0x00, 0x2E, 0x2E, 0x2F, 0x6C, 0x69, 0x62, 0x2F, 0x69, 0x70, 0x6D, 0x2E, 0x70, 0x79, 0x00, 0x04, 0x01, 0x00,
    0x04, 0x00, 0x78, 0x2F, 0x00, 0x74, 0x00, 0x00, 0x83, 0x00, 0x00, 0x7D, 0x01, 0x00, 0x74, 0x01, 0x00, 0x7C,
    0x01, 0x00, 0x83, 0x01, 0x00, 0x7D, 0x02, 0x00, 0x74, 0x02, 0x00, 0x7C, 0x02, 0x00, 0x7C, 0x00, 0x00, 0x83,
    0x02, 0x00, 0x7D, 0x03, 0x00, 0x74, 0x03, 0x00, 0x83, 0x00, 0x00, 0x01, 0x71, 0x03, 0x00, 0x57, 0x74, 0x04,
    0x00, 0x73, 0x3E, 0x00, 0x74, 0x05, 0x00, 0x82, 0x01, 0x00, 0x64, 0x00, 0x00, 0x53, 0x00, 0x04, 0x00, 0x64,
    0x00, 0x00, 0x84, 0x00, 0x00, 0x5A, 0x00, 0x00, 0x64, 0x01, 0x00, 0x84, 0x00, 0x00, 0x5A, 0x01, 0x00, 0x69,
    0x00, 0x00, 0x64, 0x02, 0x00, 0x84, 0x01, 0x00, 0x5A, 0x02, 0x00, 0x64, 0x03, 0x00, 0x53, 0xFF,
];

fn ipm_vm(space: MemSpace) -> Vm<CollectIo> {
    let mem = match space {
        MemSpace::Ram => MemSpaces::new().with_ram(IPM.to_vec()),
        _ => MemSpaces::new().with_prog(IPM.to_vec()),
    };
    let mut vm = Vm::new(VmConfig::default(), mem, CollectIo::new()).unwrap();
    assert_eq!(vm.load_module_table(space, 0).unwrap(), 1);
    vm
}

fn code_of(vm: &Vm<CollectIo>, id: HeapId) -> mote::Code {
    match vm.heap().get(id) {
        HeapData::Code(code) => code.clone(),
        other => panic!("expected code, found {}", other.type_of()),
    }
}

fn ins(offset: usize, opcode: Op, arg: Option<u16>) -> Instruction {
    Instruction { offset, opcode, arg }
}

#[test]
fn ipm_header_fields() {
    let vm = ipm_vm(MemSpace::Prog);
    let entry = &vm.module_table()[0];
    assert_eq!(entry.name, b"ipm");
    let code = code_of(&vm, entry.code);
    assert_eq!(code.image.len, 285);
    assert_eq!(code.first_line, 17);
    assert_eq!(code.stacksize, 2);
    assert!(code.has_flag(code_flags::NOFREE));
    assert!(!code.has_flag(code_flags::OPTIMIZED));
    assert_eq!(code.filename.read_all(vm.mem()), b"../lib/ipm.py");
    assert_eq!(code.lnotab.read_all(vm.mem()), b"\t9\t\x0b");
    assert_eq!(IPM.len(), 286);
    assert_eq!(IPM[285], IMAGE_TABLE_END);
}

#[test]
fn ipm_module_disassembles() {
    let vm = ipm_vm(MemSpace::Prog);
    let code = code_of(&vm, vm.module_table()[0].code);
    assert_eq!(
        disassemble(vm.mem(), &code.bytecode).unwrap(),
        vec![
            ins(0, Op::LoadConst, Some(0)),
            ins(3, Op::MakeFunction, Some(0)),
            ins(6, Op::StoreName, Some(0)),
            ins(9, Op::LoadConst, Some(1)),
            ins(12, Op::MakeFunction, Some(0)),
            ins(15, Op::StoreName, Some(1)),
            ins(18, Op::BuildMap, Some(0)),
            ins(21, Op::LoadConst, Some(2)),
            ins(24, Op::MakeFunction, Some(1)),
            ins(27, Op::StoreName, Some(2)),
            ins(30, Op::LoadConst, Some(3)),
            ins(33, Op::ReturnValue, None),
        ]
    );
}

#[test]
fn ipm_nested_code_is_loaded_from_the_consts() {
    let vm = ipm_vm(MemSpace::Prog);
    let module = code_of(&vm, vm.module_table()[0].code);
    let HeapData::Tuple(consts) = vm.heap().get(module.consts) else {
        panic!("consts are a tuple");
    };
    assert_eq!(consts.len(), 4);
    assert!(matches!(consts[3], Value::None));
    for (slot, index) in [(0, 34), (1, 35)] {
        let id = consts[slot].ref_id().unwrap();
        let HeapData::NativeCode(native) = vm.heap().get(id) else {
            panic!("const {slot} is a native");
        };
        assert_eq!(native.index, index);
    }
    let nested = code_of(&vm, consts[2].ref_id().unwrap());
    assert_eq!(nested.image.len, 174);
    assert_eq!(nested.argcount, 1);
    assert_eq!(nested.nlocals, 4);
    assert_eq!(nested.first_line, 85);
    let first = disassemble(vm.mem(), &nested.bytecode).unwrap()[0];
    assert_eq!(first, ins(0, Op::SetupLoop, Some(47)));
}

#[test]
fn ipm_module_body_binds_its_names() {
    let mut vm = ipm_vm(MemSpace::Prog);
    let name = vm.heap_mut().alloc_str(b"ipm").unwrap();
    let module = vm.import_module(Value::Ref(name)).unwrap();
    vm.heap_mut().add_root(module);
    vm.spawn_module(module).unwrap();
    assert_eq!(vm.run(), Ok(RunOutcome::Completed));

    for global in ["_getImg", "x04", "ipm"] {
        assert!(vm.module_global(module, global).is_some(), "{global} is bound");
    }
    let ipm = vm.module_global(module, "ipm").and_then(|v| v.ref_id()).unwrap();
    let HeapData::Function(func) = vm.heap().get(ipm) else {
        panic!("ipm is a function");
    };
    let HeapData::Tuple(defaults) = vm.heap().get(func.defaults.unwrap()) else {
        panic!("defaults are a tuple");
    };
    assert_eq!(defaults.len(), 1);
    assert!(matches!(vm.heap().get(defaults[0].ref_id().unwrap()), HeapData::Dict(_)));
}

#[test]
fn ram_and_program_store_decode_the_same() {
    let ram = ipm_vm(MemSpace::Ram);
    let prog = ipm_vm(MemSpace::Prog);
    let (a, b) = (
        code_of(&ram, ram.module_table()[0].code),
        code_of(&prog, prog.module_table()[0].code),
    );
    assert_eq!(a.bytecode.space, MemSpace::Ram);
    assert_eq!(b.bytecode.space, MemSpace::Prog);
    assert_eq!(
        disassemble(ram.mem(), &a.bytecode).unwrap(),
        disassemble(prog.mem(), &b.bytecode).unwrap()
    );
    assert_eq!(a.filename.read_all(ram.mem()), b.filename.read_all(prog.mem()));
}

#[test]
fn module_attrs_are_its_globals() {
    // x = 5; g = globals()
    let main = main_module(
        &["x", "globals", "g"],
        vec![Obj::Int(5), Obj::None],
        Asm::new()
            .arg(Op::LoadConst, 0)
            .arg(Op::StoreName, 0)
            .arg(Op::LoadName, 1)
            .arg(Op::CallFunction, 0)
            .arg(Op::StoreName, 2)
            .arg(Op::LoadConst, 1)
            .op(Op::ReturnValue)
            .finish(),
    );
    let mut vm = common::vm_with(&[main], VmConfig::default());
    let name = vm.heap_mut().alloc_str(b"main").unwrap();
    let module = vm.import_module(Value::Ref(name)).unwrap();
    vm.heap_mut().add_root(module);
    vm.spawn_module(module).unwrap();
    assert_eq!(vm.run(), Ok(RunOutcome::Completed));

    let HeapData::Module(m) = vm.heap().get(module) else {
        panic!("module");
    };
    assert_eq!(vm.module_global(module, "x"), Some(Value::Int(5)));
    assert_eq!(vm.module_global(module, "g"), Some(Value::Ref(m.attrs)));
}

#[test]
fn every_table_entry_is_registered() {
    let a = CodeImage::module("a").consts(vec![Obj::None]).code(
        Asm::new().arg(Op::LoadConst, 0).op(Op::ReturnValue).finish(),
    );
    let b = CodeImage { name: "b".to_owned(), ..a.clone() };
    let vm = common::vm_with(&[a, b], VmConfig::default());
    let names: Vec<&[u8]> = vm.module_names().collect();
    assert_eq!(names, vec![&b"a"[..], &b"b"[..]]);
}

#[test]
fn table_without_end_marker_is_rejected() {
    let mut bytes = table(&[main_module(&[], vec![Obj::None], vec![Op::ReturnValue as u8])]);
    bytes.pop();
    let mut vm = Vm::new(VmConfig::default(), MemSpaces::new().with_prog(bytes), CollectIo::new()).unwrap();
    let err = vm.load_module_table(MemSpace::Prog, 0).unwrap_err();
    assert_eq!(err.kind(), ExcType::SystemError);
}

#[test]
fn illegal_opcode_is_a_system_error() {
    let (result, _) = run_main(&[main_module(&[], vec![], vec![200])]);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ExcType::SystemError);
    assert_eq!(err.message(), Some("illegal opcode 200"));
}

#[test]
fn unimplemented_opcode_is_a_system_error() {
    let code = Asm::new().arg(Op::LoadConst, 0).op(Op::YieldValue).finish();
    let (result, _) = run_main(&[main_module(&[], vec![Obj::None], code)]);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ExcType::SystemError);
    assert_eq!(err.message(), Some("unsupported opcode YIELD_VALUE"));
}

#[test]
fn strings_in_consts_run_in_place() {
    let code = Asm::new()
        .arg(Op::LoadConst, 0)
        .op(Op::PrintItem)
        .op(Op::PrintNewline)
        .arg(Op::LoadConst, 1)
        .op(Op::ReturnValue)
        .finish();
    let (result, out) = run_main(&[main_module(&[], vec![s("hello"), Obj::None], code)]);
    assert_eq!(result, Ok(RunOutcome::Completed));
    assert_eq!(out, "hello\n");
}
