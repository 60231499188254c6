//! Host native functions referenced from images.

mod common;

use common::{Asm, Obj, main_module, vm_with};
use mote::{BUILTIN_BASE, ExcType, NativeCall, Opcode as Op, RunOutcome, RunResult, TraceFrame, Value, VmConfig};
use pretty_assertions::assert_eq;

fn add_ints(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(2)?;
    let sum = call
        .int_arg(0)?
        .checked_add(call.int_arg(1)?)
        .ok_or_else(|| ExcType::OverflowError.msg("sum too large"))?;
    Ok(Value::Int(sum))
}

fn shout(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let text = call
        .arg(0)?
        .as_str_bytes(call.heap())
        .ok_or_else(|| ExcType::TypeError.msg("shout() needs a string"))?
        .to_ascii_uppercase();
    call.alloc_str(&text)
}

/// add_ints = <native 0>; print add_ints(<a>, <b>)
fn call_add(args: Vec<Obj>) -> mote::Vm<mote::CollectIo> {
    let argc = u16::try_from(args.len()).unwrap();
    let mut consts = vec![Obj::Native { argc: 2, index: 0 }, Obj::None];
    let mut asm = Asm::new()
        .arg(Op::LoadConst, 0)
        .arg(Op::MakeFunction, 0)
        .arg(Op::StoreName, 0)
        .arg(Op::LoadName, 0);
    for arg in args {
        consts.push(arg);
        asm = asm.arg(Op::LoadConst, u16::try_from(consts.len() - 1).unwrap());
    }
    let code = asm
        .arg(Op::CallFunction, argc)
        .op(Op::PrintItem)
        .op(Op::PrintNewline)
        .arg(Op::LoadConst, 1)
        .op(Op::ReturnValue)
        .finish();
    let mut vm = vm_with(&[main_module(&["add_ints"], consts, code)], VmConfig::default());
    vm.register_native(0, "add_ints", add_ints).unwrap();
    vm
}

#[test]
fn registered_native_is_callable() {
    let mut vm = call_add(vec![Obj::Int(2), Obj::Int(3)]);
    assert_eq!(vm.run_module("main"), Ok(RunOutcome::Completed));
    assert_eq!(vm.io().output_str(), "5\n");
}

#[test]
fn native_errors_show_a_native_frame() {
    let mut vm = call_add(vec![Obj::Int(2)]);
    let err = vm.run_module("main").unwrap_err();
    assert_eq!(err.kind(), ExcType::TypeError);
    assert_eq!(
        err.traceback()[0],
        TraceFrame::Native {
            name: "add_ints".to_owned()
        }
    );
    assert!(matches!(&err.traceback()[1], TraceFrame::Code { name, .. } if name == "main"));
    assert!(mote::format_report(&err).contains("  add_ints() __NATIVE__\n"));
}

#[test]
fn natives_can_allocate_results() {
    let code = Asm::new()
        .arg(Op::LoadConst, 0)
        .arg(Op::MakeFunction, 0)
        .arg(Op::StoreName, 0)
        .arg(Op::LoadName, 0)
        .arg(Op::LoadConst, 1)
        .arg(Op::CallFunction, 1)
        .op(Op::PrintItem)
        .op(Op::PrintNewline)
        .arg(Op::LoadConst, 2)
        .op(Op::ReturnValue)
        .finish();
    let main = main_module(
        &["shout"],
        vec![Obj::Native { argc: 1, index: 7 }, common::s("quiet"), Obj::None],
        code,
    );
    let mut vm = vm_with(&[main], VmConfig::default());
    vm.register_native(7, "shout", shout).unwrap();
    assert_eq!(vm.run_module("main"), Ok(RunOutcome::Completed));
    assert_eq!(vm.io().output_str(), "QUIET\n");
}

#[test]
fn registering_again_replaces_the_native() {
    let mut vm = call_add(vec![Obj::Int(1), Obj::Int(1)]);
    vm.register_native(0, "shout", shout).unwrap();
    let err = vm.run_module("main").unwrap_err();
    assert_eq!(err.kind(), ExcType::TypeError);
    assert_eq!(
        err.traceback()[0],
        TraceFrame::Native {
            name: "shout".to_owned()
        }
    );
}

#[test]
fn unregistered_native_is_a_system_error() {
    let code = Asm::new()
        .arg(Op::LoadConst, 0)
        .arg(Op::MakeFunction, 0)
        .arg(Op::CallFunction, 0)
        .op(Op::ReturnValue)
        .finish();
    let main = main_module(&[], vec![Obj::Native { argc: 0, index: 3 }], code);
    let mut vm = vm_with(&[main], VmConfig::default());
    let err = vm.run_module("main").unwrap_err();
    assert_eq!(err.kind(), ExcType::SystemError);
    assert_eq!(err.message(), Some("native function 3 is not registered"));
}

#[test]
fn builtin_range_is_reserved() {
    let mut vm = call_add(vec![]);
    let err = vm.register_native(BUILTIN_BASE, "clash", add_ints).unwrap_err();
    assert_eq!(err.kind(), ExcType::SystemError);
}
