//! `thread` and `thread-group` — the cooperative scheduling unit and the
//! memory-quota owner (spec.md §5). `ThreadGroupObject.mem_limit` and
//! `yield_interval` are subtracted from the parent group on creation and
//! refunded on teardown.

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::cell::Cell;
use std::mem::size_of;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadStatus {
    Running,
    Yielded,
    Returned,
    Excepted,
}

pub struct ThreadData {
    pub target: GcRef,
    pub args: GcRef,
    pub status: Cell<ThreadStatus>,
    pub result: Cell<Option<GcRef>>,
    /// Exception forced into this thread from outside, observed only at
    /// the next scheduling probe (spec.md §5 "injection").
    pub injected: Cell<Option<GcRef>>,
}

impl ObjectBehavior for ThreadData {
    fn kind_name(&self) -> &'static str {
        "thread"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        if !visitor(self.target) || !visitor(self.args) {
            return false;
        }
        if let Some(r) = self.result.get() {
            if !visitor(r) {
                return false;
            }
        }
        if let Some(e) = self.injected.get() {
            if !visitor(e) {
                return false;
            }
        }
        true
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

pub struct ThreadGroupData {
    pub mem_limit: Cell<u64>,
    pub mem_used: Cell<u64>,
    pub yield_interval: Cell<u64>,
}

impl ObjectBehavior for ThreadGroupData {
    fn kind_name(&self) -> &'static str {
        "thread-group"
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
