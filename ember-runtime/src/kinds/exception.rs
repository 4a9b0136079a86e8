//! `exception` — a raised value: a type (which exception kind) plus an
//! argument tuple, mirroring `ExceptionObject { args }` from the original
//! (the kind itself lives in the object header's type pointer, same as
//! every other object).

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::mem::size_of;

/// The nine built-in exception kinds named in the error taxonomy, plus
/// the two control-flow signals (`StopIteration`, `Cancellation`) raised
/// the same way. Registered as static type objects at startup
/// (`runtime::Vm::bootstrap_exception_types`).
pub const EXCEPTION_TYPE_NAMES: &[&str] = &[
    "AttributeError",
    "TypeError",
    "ValueError",
    "IndexError",
    "KeyError",
    "ZeroDivisionError",
    "RuntimeError",
    "MemoryError",
    "StopIteration",
    "Cancellation",
];

pub struct ExceptionData {
    pub args: GcRef,
}

impl ObjectBehavior for ExceptionData {
    fn kind_name(&self) -> &'static str {
        "exception"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        visitor(self.args)
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
