//! Hand-assembled bytecode programs exercising the concrete scenarios and
//! invariant properties named in spec.md §8.

use ember_runtime::error::{Error, Outcome};
use ember_runtime::gcref::GcRef;
use ember_runtime::interp::bytecode::op;
use ember_runtime::interp::run_closure;
use ember_runtime::kinds::closure::ClosureData;
use ember_runtime::kinds::collections::TupleData;
use ember_runtime::kinds::exception::ExceptionData;
use ember_runtime::kinds::primitives::int_value;
use ember_runtime::kinds::thread_kinds::ThreadGroupData;
use ember_runtime::kinds::typesys::TypeData;
use ember_runtime::runtime::Vm;
use ember_runtime::{DEFAULT_GC_THRESHOLD, DEFAULT_YIELD_INTERVAL};

/// Mirrors `ember_runtime::run_program`'s body, minus the GIL acquire:
/// these scenario programs never spawn a thread, so there's no need to
/// serialize against one, and skipping it keeps these tests independent
/// of each other (the GIL is a single process-wide lock, and the real
/// `run_program` never releases it — by design, a CLI invocation runs
/// exactly once per process).
fn run_bytecode(code: &[u8]) -> Result<GcRef, Error> {
    let mut vm = Vm::bootstrap(ember_runtime::DEFAULT_HEAP_MEM, DEFAULT_YIELD_INTERVAL, DEFAULT_GC_THRESHOLD);
    let bytecode = vm.make_bytes(code);
    let context = vm.globals;
    let closure_ty = vm.type_named("closure");
    let closure = vm
        .heap
        .alloc(vm.current_group(), Box::new(ClosureData { bytecode, context }), false)
        .expect("bootstrap heap has ample quota");
    closure.set_ty(closure_ty);
    let call_args = vm.empty_tuple;
    match run_closure(&mut vm, closure, call_args) {
        Outcome::Ok(v) => Ok(v),
        Outcome::Raised => {
            let exc = vm.take_pending_exception().unwrap_or(vm.none);
            Err(Error::Raised(exc))
        }
    }
}

fn leb_signed(v: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut more = true;
    let mut value = v;
    while more {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign_bit_set = byte & 0x40 != 0;
        if (value == 0 && !sign_bit_set) || (value == -1 && sign_bit_set) {
            more = false;
        } else {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

fn push_int(code: &mut Vec<u8>, v: i64) {
    code.push(op::INT);
    code.extend(leb_signed(v));
}

fn exception_kind(exc: ember_runtime::gcref::GcRef) -> String {
    exc.ty()
        .and_then(|t| t.downcast::<TypeData>())
        .map(|t| t.name.clone())
        .unwrap_or_default()
}

// Scenario 1: addition returns the expected value.
#[test]
fn scenario_addition_returns_five() {
    let mut code = Vec::new();
    push_int(&mut code, 2);
    push_int(&mut code, 3);
    code.push(op::ADD);
    code.push(op::RETURN);

    let result = run_bytecode(&code).expect("addition does not raise");
    assert_eq!(int_value(result), 5);
}

// Scenario 2: division by zero raises a catchable ZeroDivisionError and
// reaches the CLI boundary as Error::Raised.
#[test]
fn scenario_division_by_zero_raises_zero_division_error() {
    let mut code = Vec::new();
    push_int(&mut code, 1);
    push_int(&mut code, 0);
    code.push(op::DIV);
    code.push(op::RETURN);

    let err = run_bytecode(&code).expect_err("division by zero must raise");
    match err {
        Error::Raised(exc) => assert_eq!(exception_kind(exc), "ZeroDivisionError"),
        other => panic!("expected Error::Raised, got {other:?}"),
    }
}

// Scenario 3: a program that raises an uncaught TypeError surfaces the
// wrapped args via ExceptionData, matching the CLI's reporting path.
#[test]
fn scenario_uncaught_exception_carries_its_args() {
    let mut code = Vec::new();
    push_int(&mut code, 1);
    push_int(&mut code, 0);
    code.push(op::MOD);
    code.push(op::RETURN);

    let err = run_bytecode(&code).expect_err("mod by zero must raise");
    let Error::Raised(exc) = err else {
        panic!("expected Error::Raised");
    };
    assert_eq!(exception_kind(exc), "ZeroDivisionError");
    let args = exc.downcast::<ExceptionData>().expect("exception object").args;
    let tuple = args.downcast::<TupleData>().expect("args is a tuple");
    assert_eq!(tuple.items.len(), 1);
}

// GC soundness: an unreachable object is freed, a rooted one survives,
// and quota is refunded for the freed object (spec.md §8).
#[test]
fn gc_soundness_frees_unreachable_and_keeps_rooted() {
    let mut vm = Vm::bootstrap(ember_runtime::DEFAULT_HEAP_MEM, DEFAULT_YIELD_INTERVAL, DEFAULT_GC_THRESHOLD);
    let group = vm.current_group();

    let kept = vm.make_int(1);
    vm.heap.root(kept);
    let _discarded = vm.make_int(2);

    let gd = group.unwrap().downcast::<ThreadGroupData>().unwrap();
    let used_before = gd.mem_used.get();

    let stats = vm.heap.collect();
    assert!(stats.freed >= 1, "the unrooted int should be collected");
    assert!(gd.mem_used.get() < used_before, "quota must be refunded on free");
    assert_eq!(int_value(kept), 1, "the rooted int must survive collection");

    vm.heap.unroot(kept);
}

// Quota accounting: a thread group with a tight mem_limit rejects
// allocations past capacity and accepts ones within it.
#[test]
fn quota_accounting_rejects_allocation_past_limit() {
    let mut vm = Vm::bootstrap(ember_runtime::DEFAULT_HEAP_MEM, DEFAULT_YIELD_INTERVAL, DEFAULT_GC_THRESHOLD);
    let small_group = ember_runtime::thread::create_group(&mut vm, 64, DEFAULT_YIELD_INTERVAL);
    let Outcome::Ok(small_group) = small_group else {
        panic!("create_group should succeed with ample parent quota");
    };
    vm.set_current_group(small_group);

    // A handful of ints should fit inside a 64-byte quota, but a very
    // large run of allocations must eventually exhaust it and raise
    // MemoryError instead of panicking or silently succeeding forever.
    let mut raised = false;
    for _ in 0..300 {
        let group = vm.current_group();
        let before = vm.heap.object_count();
        let r = vm.heap.alloc(group, Box::new(ember_runtime::kinds::primitives::IntData(0)), false);
        if r.is_none() {
            raised = true;
            break;
        }
        assert!(vm.heap.object_count() > before);
    }
    assert!(raised, "allocation must eventually fail once the group's quota is exhausted");
}

// Donate: moving an object between groups transfers its quota billing.
#[test]
fn donate_transfers_quota_billing_between_groups() {
    let mut vm = Vm::bootstrap(ember_runtime::DEFAULT_HEAP_MEM, DEFAULT_YIELD_INTERVAL, DEFAULT_GC_THRESHOLD);
    let group_a = ember_runtime::thread::create_group(&mut vm, 4096, DEFAULT_YIELD_INTERVAL / 2);
    let Outcome::Ok(group_a) = group_a else { panic!("create_group a") };
    let group_b = ember_runtime::thread::create_group(&mut vm, 4096, DEFAULT_YIELD_INTERVAL / 2);
    let Outcome::Ok(group_b) = group_b else { panic!("create_group b") };

    vm.set_current_group(group_a);
    let obj = vm.make_int(42);

    let gd_a = group_a.downcast::<ThreadGroupData>().unwrap();
    let gd_b = group_b.downcast::<ThreadGroupData>().unwrap();
    let used_a_before = gd_a.mem_used.get();
    let used_b_before = gd_b.mem_used.get();
    assert!(used_a_before > 0);
    assert_eq!(used_b_before, 0);

    vm.heap.donate(obj, group_b).expect("donate within quota must succeed");

    assert!(gd_a.mem_used.get() < used_a_before, "source group must be refunded");
    assert!(gd_b.mem_used.get() > used_b_before, "destination group must be charged");
    assert_eq!(obj.group(), Some(group_b));
}

// Empty tuple sharing: every zero-length tuple is the identical object.
#[test]
fn empty_tuple_is_a_shared_singleton() {
    let mut vm = Vm::bootstrap(ember_runtime::DEFAULT_HEAP_MEM, DEFAULT_YIELD_INTERVAL, DEFAULT_GC_THRESHOLD);
    let a = vm.make_tuple(Vec::new());
    let b = vm.make_tuple(Vec::new());
    assert_eq!(a.addr(), b.addr());
    assert_eq!(a.addr(), vm.empty_tuple.addr());
}

// Cooperative cancellation: a spawned thread observes an injected
// exception at its next scheduling probe and ends up EXCEPTED.
#[test]
fn cooperative_cancellation_injects_within_one_yield_interval() {
    let mut vm = Vm::bootstrap(ember_runtime::DEFAULT_HEAP_MEM, 1, DEFAULT_GC_THRESHOLD);

    // Deliberately does not call `main_thread_acquire`: this test thread
    // never runs bytecode itself, only the spawned one does, so the GIL
    // is left for that thread to acquire and (on completion) release —
    // holding it here would starve the spawned thread forever, since
    // nothing else on the main thread would ever release it.

    // target: spin forever popping None, so every instruction hits the
    // between-instruction scheduler probe where an injected exception
    // is observed (the probe, not a blocked YIELD, is what notices it).
    let mut code = Vec::new();
    let loop_start = code.len();
    code.push(op::NONE);
    code.push(op::POP);
    code.push(op::JUMP);
    code.extend((loop_start as u32).to_ne_bytes());
    let bytecode = vm.make_bytes(&code);
    let closure_ty = vm.type_named("closure");
    let context = vm.globals;
    let closure = vm
        .heap
        .alloc(vm.current_group(), Box::new(ember_runtime::kinds::closure::ClosureData { bytecode, context }), false)
        .expect("bootstrap heap has ample quota");
    closure.set_ty(closure_ty);
    let no_args = vm.empty_tuple;

    let Outcome::Ok(thread) = ember_runtime::thread::spawn(&mut vm, closure, no_args) else {
        panic!("spawn must succeed");
    };

    // Let the spawned thread run for a while before injecting.
    std::thread::sleep(std::time::Duration::from_millis(20));

    let td = thread.downcast::<ember_runtime::kinds::thread_kinds::ThreadData>().unwrap();
    let cancel = vm.type_named("Cancellation");
    let exc = match vm.construct_exception(cancel, vm.empty_tuple) {
        Outcome::Ok(e) => e,
        Outcome::Raised => panic!("constructing Cancellation must not itself raise"),
    };
    td.injected.set(Some(exc));

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        if td.status.get() == ember_runtime::kinds::thread_kinds::ThreadStatus::Excepted {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "cancellation did not land in time");
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}
