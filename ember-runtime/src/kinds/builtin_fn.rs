//! `builtin-fn` — a native function exposed to bytecode, in place of the
//! original's raw `Object *(*func)(TupleObject *args)` pointer. Rust gives
//! us a plain `fn` item instead of a void-star cast, so no signature is
//! lost crossing the FFI boundary that the C version had to work around.

use crate::error::Outcome;
use crate::gcref::{GcRef, ObjectBehavior};
use crate::runtime::Vm;
use std::any::Any;
use std::mem::size_of;

/// `args` is always a `tuple` object.
pub type NativeFn = fn(vm: &mut Vm, args: GcRef) -> Outcome<GcRef>;

pub struct BuiltinFnData {
    pub name: &'static str,
    pub func: NativeFn,
}

impl ObjectBehavior for BuiltinFnData {
    fn kind_name(&self) -> &'static str {
        "builtin-fn"
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
