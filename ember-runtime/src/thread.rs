//! The cooperative multithreading substrate (spec.md §5), grounded on
//! `thread.c`. The GIL is an explicit acquire/release pair rather than an
//! RAII guard, matching `gil_acquire`/`gil_release`; every real OS thread
//! must hold it before touching the heap or any `Vm` field.

use crate::error::Outcome;
use crate::gcref::GcRef;
use crate::kinds::collections::TupleData;
use crate::kinds::primitives::int_value;
use crate::kinds::thread_kinds::{ThreadData, ThreadGroupData, ThreadStatus};
use crate::object;
use crate::runtime::Vm;
use std::cell::Cell;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::Duration;

struct Gil {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl Gil {
    fn new() -> Self {
        Gil {
            locked: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.locked.lock().expect("gil mutex poisoned");
        while *held {
            held = self.cond.wait(held).expect("gil condvar poisoned");
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.locked.lock().expect("gil mutex poisoned");
        *held = false;
        self.cond.notify_one();
    }
}

static GIL: OnceLock<Gil> = OnceLock::new();

fn gil() -> &'static Gil {
    GIL.get_or_init(Gil::new)
}

thread_local! {
    /// Mirrors the original's `__thread ThreadObject *oly_thread`. `None`
    /// on the main (root) thread.
    static CURRENT_THREAD: Cell<Option<GcRef>> = const { Cell::new(None) };
    /// Mirrors `__thread unsigned int yield_probe_counter`.
    static YIELD_COUNTER: Cell<u32> = const { Cell::new(0) };
}

/// Must be called once, by the main thread, before running any bytecode —
/// matches `threads_init`'s initial `gil_acquire()`.
pub fn main_thread_acquire() {
    gil().acquire();
}

/// `gil_yield`: release, run `f`, reacquire.
fn gil_yield(f: impl FnOnce()) {
    gil().release();
    f();
    gil().acquire();
}

/// Releases the GIL for a very short sleep and reacquires it — the
/// `sleep_inner(0.0000001)` busy-wait idiom used throughout `thread.c` and
/// `builtins.c` for every cooperative spin (yield probe, `join`, `__next__`).
pub fn cooperative_sleep() {
    gil_yield(|| std::thread::sleep(Duration::from_nanos(100)));
}

pub fn sleep_seconds(seconds: f64) {
    let nanos = (seconds.max(0.0) * 1_000_000_000.0) as u64;
    gil_yield(|| std::thread::sleep(Duration::from_nanos(nanos)));
}

/// `gil_probe`: advance this thread's yield counter against the *current*
/// group's `yield_interval`; past it, sleep briefly. Then check for an
/// injected exception. `Some(exc)` tells the interpreter loop to abort
/// into its error-handling path exactly as any other opcode failure would.
pub fn scheduler_probe(vm: &mut Vm) -> Option<GcRef> {
    let interval = vm
        .current_group()
        .and_then(|g| g.downcast::<ThreadGroupData>())
        .map(|gd| gd.yield_interval.get())
        .unwrap_or(1000);
    let exceeded = YIELD_COUNTER.with(|c| {
        let n = c.get() + 1;
        if n as u64 > interval.max(1) {
            c.set(0);
            true
        } else {
            c.set(n);
            false
        }
    });
    if exceeded {
        cooperative_sleep();
    }
    CURRENT_THREAD.with(|c| {
        let t = c.get()?;
        let td = t.downcast::<ThreadData>()?;
        td.injected.take()
    })
}

/// A raw pointer to the `Vm`, sent into the spawned OS thread. Sound only
/// because every access is made under the GIL, which serializes the
/// entire call graph exactly as in the original (spec.md §5, §9).
struct VmPtr(*mut Vm);
unsafe impl Send for VmPtr {}

#[derive(Clone, Copy)]
struct ArgPtr(GcRef);
unsafe impl Send for ArgPtr {}

/// `SPAWN`: allocate a `thread` object, root it for the OS thread's
/// lifetime, and start running `target(args)` on a fresh OS thread under
/// the GIL. Grounded on `thread_raw`/`thread_target`.
pub fn spawn(vm: &mut Vm, target: GcRef, args: GcRef) -> Outcome<GcRef> {
    if args.kind_name() != "tuple" {
        vm.raise_msg("TypeError", "Argument 2: expected tuple");
        return Outcome::Raised;
    }

    let thread_ty = vm.type_named("thread");
    let payload = Box::new(ThreadData {
        target,
        args,
        status: Cell::new(ThreadStatus::Running),
        result: Cell::new(None),
        injected: Cell::new(None),
    });
    let group = vm.current_group();
    let thread = match vm.heap.alloc(group, payload, false) {
        Some(t) => t,
        None => {
            vm.raise_memory_error();
            return Outcome::Raised;
        }
    };
    thread.set_ty(thread_ty);
    vm.heap.root(thread);

    let vm_ptr = VmPtr(vm as *mut Vm);
    let target = ArgPtr(target);
    let args = ArgPtr(args);
    let thread_handle = ArgPtr(thread);

    std::thread::spawn(move || {
        let vm_ptr = vm_ptr;
        let thread = thread_handle.0;
        CURRENT_THREAD.with(|c| c.set(Some(thread)));
        gil().acquire();
        let vm: &mut Vm = unsafe { &mut *vm_ptr.0 };
        let outcome = object::call(vm, target.0, args.0);
        let td = thread
            .downcast::<ThreadData>()
            .expect("just allocated as a thread object");
        match outcome {
            Outcome::Ok(v) => {
                td.status.set(ThreadStatus::Returned);
                td.result.set(Some(v));
            }
            Outcome::Raised => {
                let exc = vm.take_pending_exception().unwrap_or(vm.none);
                td.status.set(ThreadStatus::Excepted);
                td.result.set(Some(exc));
            }
        }
        vm.heap.unroot(thread);
        gil().release();
    });

    Outcome::Ok(thread)
}

/// `YIELD`: suspend the current thread, handing `val` to whoever calls
/// `__next__`/`join` on it, and block until resumed or injected into.
/// Grounded on `thread_yield`.
pub fn thread_yield(vm: &mut Vm, val: GcRef) -> Outcome<()> {
    let Some(t) = CURRENT_THREAD.with(|c| c.get()) else {
        vm.raise_msg("RuntimeError", "Cannot yield from main thread");
        return Outcome::Raised;
    };
    let td = t
        .downcast::<ThreadData>()
        .expect("CURRENT_THREAD always points at a thread object");
    if let Some(exc) = td.injected.take() {
        vm.set_pending_exception(exc);
        return Outcome::Raised;
    }
    td.status.set(ThreadStatus::Yielded);
    td.result.set(Some(val));
    while td.status.get() == ThreadStatus::Yielded {
        cooperative_sleep();
    }
    Outcome::Ok(())
}

/// Carves `mem_limit`/`time_slice` out of the current group's remaining
/// budget and returns a new child `thread-group`. Grounded on
/// `threadgroup_raw`; the carve-out is refunded to the parent when the
/// child is collected (see `heap::Heap::collect`'s thread-group special case).
pub fn create_group(vm: &mut Vm, mem_limit: u64, time_slice: u64) -> Outcome<GcRef> {
    let current = vm
        .current_group()
        .expect("a current thread group is always set once bootstrap finishes");
    let cur_gd = current
        .downcast::<ThreadGroupData>()
        .expect("current group is always a thread-group object");
    if cur_gd.mem_limit.get() - cur_gd.mem_used.get() < mem_limit || cur_gd.yield_interval.get() < time_slice {
        vm.raise_memory_error();
        return Outcome::Raised;
    }

    let ty = vm.type_named("thread-group");
    let payload = Box::new(ThreadGroupData {
        mem_limit: Cell::new(mem_limit),
        mem_used: Cell::new(0),
        yield_interval: Cell::new(time_slice),
    });
    let result = match vm.heap.alloc(Some(current), payload, false) {
        Some(r) => r,
        None => {
            vm.raise_memory_error();
            return Outcome::Raised;
        }
    };
    result.set_ty(ty);

    cur_gd.mem_limit.set(cur_gd.mem_limit.get() - mem_limit);
    cur_gd.yield_interval.set(cur_gd.yield_interval.get() - time_slice);

    Outcome::Ok(result)
}

fn unpack_args(args: GcRef) -> Vec<GcRef> {
    args.downcast::<TupleData>().map(|t| t.items.clone()).unwrap_or_default()
}

/// `Constructor::Native` for the `thread` type: `Thread(target, args)`.
pub fn thread_constructor(vm: &mut Vm, _ty: GcRef, args: GcRef) -> Outcome<GcRef> {
    let items = unpack_args(args);
    if items.len() != 2 {
        vm.raise_msg("TypeError", "Expected 2 arguments");
        return Outcome::Raised;
    }
    spawn(vm, items[0], items[1])
}

/// `Constructor::Native` for the `thread-group` type: `ThreadGroup(mem, time)`.
pub fn group_constructor(vm: &mut Vm, _ty: GcRef, args: GcRef) -> Outcome<GcRef> {
    let items = unpack_args(args);
    if items.len() != 2 || items[0].kind_name() != "int" || items[1].kind_name() != "int" {
        vm.raise_msg("TypeError", "Expected 2 integer arguments");
        return Outcome::Raised;
    }
    create_group(vm, int_value(items[0]) as u64, int_value(items[1]) as u64)
}
