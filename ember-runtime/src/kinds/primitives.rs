//! `none`, `bool`, `int`, `float` — the scalar kinds. `None`, `True` and
//! `False` are process-wide static singletons (spec.md §4.A).

use crate::gcref::{GcRef, ObjectBehavior};
use std::any::Any;
use std::mem::size_of;

/// Shared by `none`, `true` and `false`: a zero-field marker object, same
/// shape as the original's `EmptyObject`.
pub struct NoneData;
pub struct BoolData(pub bool);
pub struct IntData(pub i64);
pub struct FloatData(pub f64);

macro_rules! trivial_behavior {
    ($ty:ty, $name:literal) => {
        impl ObjectBehavior for $ty {
            fn kind_name(&self) -> &'static str {
                $name
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
    };
}

trivial_behavior!(NoneData, "none");
trivial_behavior!(BoolData, "bool");
trivial_behavior!(IntData, "int");
trivial_behavior!(FloatData, "float");

pub fn int_value(r: GcRef) -> i64 {
    r.downcast::<IntData>().map(|d| d.0).unwrap_or(0)
}

pub fn float_value(r: GcRef) -> f64 {
    r.downcast::<FloatData>().map(|d| d.0).unwrap_or(0.0)
}

pub fn bool_value(r: GcRef) -> bool {
    r.downcast::<BoolData>().map(|d| d.0).unwrap_or(false)
}
