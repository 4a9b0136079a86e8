//! The object model, garbage collector, bytecode interpreter and
//! cooperative multithreading substrate for a small dynamic-object
//! language runtime (spec.md). Grounded on the original C implementation
//! under `examples/original_source/c_src/`.

pub mod builtins;
pub mod error;
pub mod gcref;
pub mod heap;
pub mod interp;
pub mod kinds;
pub mod object;
pub mod runtime;
pub mod thread;

use error::{Error, HostResult};
use gcref::GcRef;
use runtime::Vm;

/// Default heap quota for the root thread group, matching `threads_init`'s
/// `1073741824` (1 GiB) fallback when `HEAP_MEM` is unset.
pub const DEFAULT_HEAP_MEM: u64 = 1024 * 1024 * 1024;

/// Default per-thread-group yield interval (instructions between
/// scheduling probes), matching `gil_probe`'s fixed counter threshold.
pub const DEFAULT_YIELD_INTERVAL: u64 = 1000;

/// Default GC probe threshold (instructions between `gc_probe` checks).
pub const DEFAULT_GC_THRESHOLD: u32 = 1000;

/// Builds a fresh `Vm`, wraps `bytecode` and `args` into a top-level closure
/// whose context is the globals dict, and runs it to completion. Returns the
/// closure's result, or `Error::Raised` carrying the exception that reached
/// the top frame unhandled (spec.md §4.C, §8).
///
/// `args` are raw byte strings (the original's `argv`-as-bytes-tuple
/// convention); each is wrapped into a `bytes` object in the fresh `Vm`
/// before the program runs.
pub fn run_program(
    bytecode: &[u8],
    args: &[Vec<u8>],
    heap_mem: u64,
    yield_interval: u64,
    gc_threshold: u32,
) -> HostResult<GcRef> {
    thread::main_thread_acquire();

    let mut vm = Vm::bootstrap(heap_mem, yield_interval, gc_threshold);
    let code = vm.make_bytes(bytecode);
    let context = vm.globals;
    let closure_ty = vm.type_named("closure");
    let closure = vm
        .heap
        .alloc(
            vm.current_group(),
            Box::new(kinds::closure::ClosureData {
                bytecode: code,
                context,
            }),
            false,
        )
        .ok_or(Error::BadGroupConfig("heap_mem too small to bootstrap"))?;
    closure.set_ty(closure_ty);

    let arg_objs: Vec<GcRef> = args.iter().map(|a| vm.make_bytes(a)).collect();
    let call_args = vm.make_tuple(arg_objs);
    match interp::run_closure(&mut vm, closure, call_args) {
        error::Outcome::Ok(v) => Ok(v),
        error::Outcome::Raised => {
            let exc = vm.take_pending_exception().unwrap_or(vm.none);
            Err(Error::Raised(exc))
        }
    }
}
