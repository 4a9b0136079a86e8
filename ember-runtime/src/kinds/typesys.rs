//! `type` and `basic-object` — the class/instance pair. A `TypeObject` in
//! the original IS-A `BasicObject` (its own member dict) plus a base-class
//! pointer and a constructor; a plain instance is just the dict.

use crate::error::Outcome;
use crate::gcref::{GcRef, ObjectBehavior};
use crate::kinds::dict::PolyDict;
use crate::runtime::Vm;
use std::any::Any;
use std::cell::RefCell;
use std::mem::size_of;

/// Replaces the original's raw `Object *(*constructor)(Object*, TupleObject*)`
/// function-pointer field with an enum naming the handful of constructor
/// behaviors the built-in types actually use, plus an escape hatch for a
/// native one (used when the pack's other examples call for it).
#[derive(Clone, Copy)]
pub enum Constructor {
    /// Allocates a bare `basic-object` of this type and runs `__init__` if defined.
    Default,
    /// Builds an empty `dict`, ignoring arguments.
    Dict,
    /// Builds an `exception` from the argument tuple.
    Exception,
    /// Always fails with `TypeError` (abstract / primitive types).
    Abstract,
    Native(fn(&mut Vm, this: GcRef, args: GcRef) -> Outcome<GcRef>),
}

pub struct TypeData {
    pub name: String,
    pub base_class: Option<GcRef>,
    pub constructor: Constructor,
    pub members: RefCell<PolyDict>,
}

impl ObjectBehavior for TypeData {
    fn kind_name(&self) -> &'static str {
        "type"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        if let Some(base) = self.base_class {
            if !visitor(base) {
                return false;
            }
        }
        self.members.borrow().for_each(|k, v| visitor(k) && visitor(v))
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.members.borrow().capacity() * size_of::<(u64, GcRef, GcRef)>()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A plain instance: attributes only, same shape as `BasicObject { header_dict }`.
pub struct BasicObjectData {
    pub attrs: RefCell<PolyDict>,
}

impl ObjectBehavior for BasicObjectData {
    fn kind_name(&self) -> &'static str {
        "basic-object"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        self.attrs.borrow().for_each(|k, v| visitor(k) && visitor(v))
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.attrs.borrow().capacity() * size_of::<(u64, GcRef, GcRef)>()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
