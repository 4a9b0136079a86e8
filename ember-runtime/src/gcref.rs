//! The object header and the reference type every heap value is passed
//! around as.
//!
//! Every heap value carries the three-field header spec.md §3 describes: a
//! virtual table (here, Rust's own trait-object vtable for `dyn
//! ObjectBehavior` — this *is* the "record of function pointers" the spec
//! asks for), a pointer to its type, and a pointer to its owning thread
//! group. `GcRef` is the uniform, type-erased handle the interpreter and
//! object model push around; kind-specific code downcasts through
//! [`ObjectBehavior::as_any`].

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

/// Per-kind behavior table. One impl per kind in `crate::kinds`; this trait
/// object is the virtual table spec.md §4.A specifies.
pub trait ObjectBehavior: Any {
    fn kind_name(&self) -> &'static str;

    /// Visit every object directly referenced by `self`. Returns `false` if
    /// the visitor returned `false` for any of them (propagated so a mark
    /// pass can short-circuit, though ember's mark pass always visits all).
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        let _ = visitor;
        true
    }

    /// Release any non-GC-tracked storage. Most kinds own nothing outside
    /// the GC heap and use the default no-op.
    fn finalize(&mut self) {}

    /// Fixed or computed heap footprint, used for quota accounting.
    fn byte_size(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Header fields shared by every heap object.
pub struct Header {
    /// The object's type. `None` only for the bootstrap instant between
    /// allocating the `type`-of-`type` object and wiring its self-loop.
    pub ty: Cell<Option<GcRef>>,
    /// Owning thread group. `None` for static objects, which are never
    /// freed and never billed to a quota (spec.md §3).
    pub group: Cell<Option<GcRef>>,
    pub mark: Cell<bool>,
    pub is_static: bool,
}

/// A heap-allocated object: header plus its kind-specific behavior.
pub struct ObjBox {
    pub header: Header,
    pub payload: Box<dyn ObjectBehavior>,
}

/// A type-erased, `Copy` handle to a heap object.
///
/// Safety: every access to the pointee goes through code that holds the
/// single global interpreter lock (spec.md §5); `GcRef` is `Send` only
/// because the GIL serializes all real access to the data it points to,
/// exactly the justification spec.md §9 gives for keeping one coarse lock
/// instead of per-object fine-grained locking.
#[derive(Clone, Copy)]
pub struct GcRef(NonNull<ObjBox>);

unsafe impl Send for GcRef {}

impl GcRef {
    /// Wrap a raw pointer freshly produced by `Box::into_raw`.
    pub(crate) fn from_raw(ptr: NonNull<ObjBox>) -> Self {
        GcRef(ptr)
    }

    pub(crate) fn as_raw(self) -> NonNull<ObjBox> {
        self.0
    }

    pub fn header(self) -> &'static Header {
        unsafe { &self.0.as_ref().header }
    }

    pub fn payload(self) -> &'static dyn ObjectBehavior {
        unsafe { &*self.0.as_ref().payload }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn payload_mut(mut self) -> &'static mut dyn ObjectBehavior {
        unsafe { &mut *self.0.as_mut().payload }
    }

    pub fn downcast<T: 'static>(self) -> Option<&'static T> {
        self.payload().as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: 'static>(self) -> Option<&'static mut T> {
        self.payload_mut().as_any_mut().downcast_mut::<T>()
    }

    pub fn kind_name(self) -> &'static str {
        self.payload().kind_name()
    }

    pub fn ty(self) -> Option<GcRef> {
        self.header().ty.get()
    }

    pub fn set_ty(self, ty: GcRef) {
        self.header().ty.set(Some(ty));
    }

    pub fn group(self) -> Option<GcRef> {
        self.header().group.get()
    }

    pub fn is_static(self) -> bool {
        self.header().is_static
    }

    pub fn mark(self) -> bool {
        self.header().mark.get()
    }

    pub fn set_mark(self, value: bool) {
        self.header().mark.set(value);
    }

    /// Identity hash used by `object_hasher` (spec.md §4.A): the address
    /// itself, scrambled the way the original's `gc_hasher` does.
    pub fn identity_hash(self) -> u64 {
        let addr = self.0.as_ptr() as usize as u64;
        (addr.wrapping_mul(0x1337)) ^ (addr.wrapping_mul(0xbeef))
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl PartialEq for GcRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for GcRef {}

impl Hash for GcRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GcRef({} @ {:#x})",
            self.kind_name(),
            self.0.as_ptr() as usize
        )
    }
}
