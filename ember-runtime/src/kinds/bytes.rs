//! `bytes` (immutable, owns storage), `bytes-view` (non-owning slice that
//! keeps its owner alive) and `bytearray` (mutable, growable).

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::mem::size_of;

pub struct BytesData {
    pub data: Vec<u8>,
}

impl ObjectBehavior for BytesData {
    fn kind_name(&self) -> &'static str {
        "bytes"
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.data.len()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A slice into bytecode or another bytes object's storage. `owner` is
/// `None` only for views into the bytecode blob itself (a `'static`-lived
/// immutable buffer owned by the closure, not by any GC object).
pub struct BytesViewData {
    pub ptr: *const u8,
    pub len: usize,
    pub owner: Option<GcRef>,
}

impl BytesViewData {
    /// # Safety
    /// `ptr`/`len` must describe a region that outlives this view — either
    /// bytecode owned by a rooted closure, or `owner`'s own storage.
    pub unsafe fn new(ptr: *const u8, len: usize, owner: Option<GcRef>) -> Self {
        BytesViewData { ptr, len, owner }
    }

    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl ObjectBehavior for BytesViewData {
    fn kind_name(&self) -> &'static str {
        "bytes-view"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        match self.owner {
            Some(o) => visitor(o),
            None => true,
        }
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

pub struct ByteArrayData {
    pub data: Vec<u8>,
}

impl ObjectBehavior for ByteArrayData {
    fn kind_name(&self) -> &'static str {
        "bytearray"
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.data.capacity()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Uniform read access across the three byte-bearing kinds, used by
/// builtins (`len`, `__getitem__`, `__hash__`, `__eq__`, `join`, ...).
pub fn as_byte_slice(r: GcRef) -> Option<&'static [u8]> {
    if let Some(b) = r.downcast::<BytesData>() {
        return Some(&b.data);
    }
    if let Some(v) = r.downcast::<BytesViewData>() {
        return Some(v.bytes());
    }
    if let Some(b) = r.downcast::<ByteArrayData>() {
        return Some(&b.data);
    }
    None
}
