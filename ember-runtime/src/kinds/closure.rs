//! `closure` — a bytecode body paired with its captured context dict
//! (spec.md §4.A). Mirrors the original's `ClosureObject { bytecode,
//! context }` exactly; there is no separate "function" kind.

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::mem::size_of;

pub struct ClosureData {
    /// A `bytes` or `bytes-view` object holding the instruction stream.
    pub bytecode: GcRef,
    /// Enclosing-scope lookups (globals plus captured locals); a `dict`.
    pub context: GcRef,
}

impl ObjectBehavior for ClosureData {
    fn kind_name(&self) -> &'static str {
        "closure"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        visitor(self.bytecode) && visitor(self.context)
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
