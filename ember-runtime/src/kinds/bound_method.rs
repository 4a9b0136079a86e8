//! `bound-method` — a callable auto-wrapping an attribute lookup that
//! resolved to a function-like object on an instance (spec.md §4.A
//! "dunder-skips-own-lookup" note). Mirrors `BoundMethodObject { method,
//! self }`.

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::mem::size_of;

pub struct BoundMethodData {
    pub method: GcRef,
    pub receiver: GcRef,
}

impl ObjectBehavior for BoundMethodData {
    fn kind_name(&self) -> &'static str {
        "bound-method"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        visitor(self.method) && visitor(self.receiver)
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
