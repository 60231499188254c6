//! Cooperative threads: creation, timeslice switching and failure isolation.

mod common;

use std::{cell::RefCell, sync::Arc};

use common::{Asm, CodeImage, Obj, main_module, s, vm_with};
use mote::{ExcType, NativeCall, Opcode as Op, Periodic, RunOutcome, RunResult, Value, VmConfig};
use pretty_assertions::assert_eq;

thread_local! {
    static PERIODIC: RefCell<Option<Arc<Periodic>>> = const { RefCell::new(None) };
}

/// `advance(ms)`: delivers timer ticks worth `ms` milliseconds.
fn advance(call: &mut NativeCall<'_>) -> RunResult<Value> {
    call.expect_args(1)?;
    let ms = u32::try_from(call.int_arg(0)?).unwrap_or(0);
    PERIODIC.with_borrow(|periodic| {
        if let Some(periodic) = periodic {
            periodic.tick(ms * 1000);
        }
    });
    Ok(Value::None)
}

/// def worker(): print "w"
fn worker(body: Vec<u8>, consts: Vec<Obj>) -> Obj {
    CodeImage::function("worker", 0, 0).consts(consts).code(body).into_const()
}

fn printing_worker() -> Obj {
    worker(
        Asm::new()
            .arg(Op::LoadConst, 1)
            .op(Op::PrintItem)
            .op(Op::PrintNewline)
            .arg(Op::LoadConst, 0)
            .op(Op::ReturnValue)
            .finish(),
        vec![Obj::None, s("w")],
    )
}

/// run_in_thread(worker); print "a"; advance(<ms>); print "b"
fn main_with_advance(worker: Obj, ms: i32) -> (RunResult<RunOutcome>, String) {
    let code = Asm::new()
        .arg(Op::LoadConst, 0)
        .arg(Op::MakeFunction, 0)
        .arg(Op::StoreName, 0)
        .arg(Op::LoadConst, 1)
        .arg(Op::MakeFunction, 0)
        .arg(Op::StoreName, 1)
        .arg(Op::LoadName, 2)
        .arg(Op::LoadName, 0)
        .arg(Op::CallFunction, 1)
        .op(Op::PopTop)
        .arg(Op::LoadConst, 2)
        .op(Op::PrintItem)
        .op(Op::PrintNewline)
        .arg(Op::LoadName, 1)
        .arg(Op::LoadConst, 3)
        .arg(Op::CallFunction, 1)
        .op(Op::PopTop)
        .arg(Op::LoadConst, 4)
        .op(Op::PrintItem)
        .op(Op::PrintNewline)
        .arg(Op::LoadConst, 5)
        .op(Op::ReturnValue)
        .finish();
    let main = main_module(
        &["worker", "advance", "run_in_thread"],
        vec![
            worker,
            Obj::Native { argc: 1, index: 0 },
            s("a"),
            Obj::Int(ms),
            s("b"),
            Obj::None,
        ],
        code,
    );
    let mut vm = vm_with(&[main], VmConfig::default());
    vm.register_native(0, "advance", advance).unwrap();
    PERIODIC.with_borrow_mut(|p| *p = Some(vm.periodic()));
    let result = vm.run_module("main");
    assert_eq!(vm.thread_count(), 0);
    (result, vm.io().output_str())
}

#[test]
fn new_thread_runs_after_main_yields_the_cpu() {
    let (result, out) = main_with_advance(printing_worker(), 0);
    assert_eq!(result, Ok(RunOutcome::Completed));
    assert_eq!(out, "a\nb\nw\n");
}

#[test]
fn expired_timeslice_switches_threads() {
    let (result, out) = main_with_advance(printing_worker(), 10);
    assert_eq!(result, Ok(RunOutcome::Completed));
    assert_eq!(out, "a\nw\nb\n");
}

#[test]
fn partial_timeslice_keeps_the_running_thread() {
    let (result, out) = main_with_advance(printing_worker(), 4);
    assert_eq!(result, Ok(RunOutcome::Completed));
    assert_eq!(out, "a\nb\nw\n");
}

#[test]
fn failing_thread_is_reported_and_the_run_continues() {
    let failing = worker(
        Asm::new()
            .arg(Op::LoadConst, 1)
            .arg(Op::LoadConst, 2)
            .op(Op::BinaryDivide)
            .op(Op::ReturnValue)
            .finish(),
        vec![Obj::None, Obj::Int(1), Obj::Int(0)],
    );
    let (result, out) = main_with_advance(failing, 0);
    assert_eq!(result, Ok(RunOutcome::Completed));
    assert!(out.starts_with("a\nb\n"), "{out}");
    assert!(out.contains("  File \"worker.py\", line 1, in worker\n"), "{out}");
    assert!(out.contains("ZeroDivisionError detected by "), "{out}");
}

#[test]
fn threads_need_bytecode_functions() {
    let code = Asm::new()
        .arg(Op::LoadName, 0)
        .arg(Op::LoadConst, 0)
        .arg(Op::CallFunction, 1)
        .op(Op::ReturnValue)
        .finish();
    let mut vm = vm_with(&[main_module(&["run_in_thread"], vec![Obj::Int(1)], code)], VmConfig::default());
    let err = vm.run_module("main").unwrap_err();
    assert_eq!(err.kind(), ExcType::TypeError);
}
