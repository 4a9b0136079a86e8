//! `tuple` (fixed, immutable), `list` (growable, mutable), `slice` and
//! `list-iterator`.

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::cell::RefCell;
use std::mem::size_of;

pub struct TupleData {
    pub items: Vec<GcRef>,
}

impl ObjectBehavior for TupleData {
    fn kind_name(&self) -> &'static str {
        "tuple"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        self.items.iter().all(|&r| visitor(r))
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.items.len() * size_of::<GcRef>()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct ListData {
    pub items: RefCell<Vec<GcRef>>,
}

impl ObjectBehavior for ListData {
    fn kind_name(&self) -> &'static str {
        "list"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        self.items.borrow().iter().all(|&r| visitor(r))
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.items.borrow().capacity() * size_of::<GcRef>()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct SliceData {
    pub start: GcRef,
    pub end: GcRef,
}

impl ObjectBehavior for SliceData {
    fn kind_name(&self) -> &'static str {
        "slice"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        visitor(self.start) && visitor(self.end)
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

/// Backs `for`-loop desugaring: `__next__` pops the front, raising
/// `StopIteration` once exhausted (spec.md §4.C `RAISE_IF_NOT_STOP`).
pub struct ListIteratorData {
    pub target: GcRef,
    pub pos: std::cell::Cell<usize>,
}

impl ObjectBehavior for ListIteratorData {
    fn kind_name(&self) -> &'static str {
        "list-iterator"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        visitor(self.target)
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
