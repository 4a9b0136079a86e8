//! One submodule per closed-set kind from spec.md §3. Each installs an
//! [`ObjectBehavior`](crate::gcref::ObjectBehavior) impl; together they are
//! the "uniform object header, per-kind virtual table" the object model
//! specifies.

pub mod bound_method;
pub mod builtin_fn;
pub mod bytes;
pub mod closure;
pub mod collections;
pub mod dict;
pub mod exception;
pub mod primitives;
pub mod thread_kinds;
pub mod typesys;
