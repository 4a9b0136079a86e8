//! The attribute/call/trace protocol shared by every kind (spec.md §4.A),
//! grounded on `object.c`'s `get_attr`/`set_attr`/`del_attr`/`call`/`trace`
//! free functions. Rust has no vtable slot to hold a per-kind `get_attr`
//! the way `ObjectTable` does, so the "own lookup" step below dispatches
//! on `kind_name` directly — the same style `kinds::bytes::as_byte_slice`
//! already uses for its three-kind cascade.

use crate::error::{Error, HostResult, Outcome};
use crate::gcref::GcRef;
use crate::interp;
use crate::kinds::bound_method::BoundMethodData;
use crate::kinds::builtin_fn::BuiltinFnData;
use crate::kinds::closure::ClosureData;
use crate::kinds::collections::TupleData;
use crate::kinds::dict::DictData;
use crate::kinds::exception::ExceptionData;
use crate::kinds::primitives::{bool_value, int_value, IntData};
use crate::kinds::typesys::{BasicObjectData, TypeData};
use crate::runtime::Vm;

fn name_str(name: GcRef) -> Option<&'static [u8]> {
    crate::kinds::bytes::as_byte_slice(name)
}

fn is_dunder(name: GcRef) -> bool {
    matches!(name_str(name), Some(b) if b.len() >= 2 && b[0] == b'_' && b[1] == b'_')
}

fn raise_attribute_error(vm: &mut Vm, name: GcRef) {
    log::trace!(
        "attribute lookup miss: {:?}",
        name_str(name).map(String::from_utf8_lossy)
    );
    vm.raise_exc_arg("AttributeError", name);
}

/// Per-kind attribute lookup that does not consult the type chain. `None`
/// means "not found here" (not a failure) — the caller falls through to
/// walking `type`/`base_class`.
fn own_get_attr(vm: &mut Vm, obj: GcRef, name: GcRef) -> Option<GcRef> {
    let n = name_str(name);
    match obj.kind_name() {
        "dict" => {
            if n == Some(b"len") {
                let d = obj.downcast::<DictData>()?;
                return Some(vm.make_int(d.core.len() as i64));
            }
            None
        }
        "tuple" => {
            if n == Some(b"len") {
                let t = obj.downcast::<TupleData>()?;
                return Some(vm.make_int(t.items.len() as i64));
            }
            None
        }
        "list" => {
            if n == Some(b"len") {
                let l = obj.downcast::<crate::kinds::collections::ListData>()?;
                return Some(vm.make_int(l.items.borrow().len() as i64));
            }
            None
        }
        "bytes" | "bytes-view" | "bytearray" => {
            if n == Some(b"len") {
                let len = crate::kinds::bytes::as_byte_slice(obj)?.len();
                return Some(vm.make_int(len as i64));
            }
            None
        }
        "closure" => {
            if n == Some(b"code") {
                let c = obj.downcast::<ClosureData>()?;
                return Some(c.bytecode);
            }
            None
        }
        "bound-method" => {
            let bm = obj.downcast::<BoundMethodData>()?;
            match n {
                Some(b"method") => Some(bm.method),
                Some(b"self") => Some(bm.receiver),
                _ => None,
            }
        }
        "exception" => {
            let e = obj.downcast::<ExceptionData>()?;
            if n == Some(b"args") {
                Some(e.args)
            } else {
                None
            }
        }
        "type" | "basic-object" => {
            let dict = match obj.kind_name() {
                "type" => &obj.downcast::<TypeData>()?.members,
                _ => &obj.downcast::<BasicObjectData>()?.attrs,
            };
            match dict.borrow_mut().get(vm, name) {
                Outcome::Ok(v) => v,
                Outcome::Raised => None,
            }
        }
        _ => None,
    }
}

/// spec.md §4.A: attribute names starting with `__` skip the instance's
/// own lookup and search the type chain directly (`get_attr` in
/// `object.c`, the `check_own` flag).
pub fn get_attr(vm: &mut Vm, obj: GcRef, name: GcRef) -> Outcome<GcRef> {
    if !is_dunder(name) {
        if let Some(found) = own_get_attr(vm, obj, name) {
            return Outcome::Ok(found);
        }
        if obj.kind_name() == "type" {
            let mut base = obj.downcast::<TypeData>().and_then(|t| t.base_class);
            while let Some(b) = base {
                if let Some(found) = own_get_attr(vm, b, name) {
                    return Outcome::Ok(found);
                }
                base = b.downcast::<TypeData>().and_then(|t| t.base_class);
            }
        }
    }

    let mut ty = obj.ty();
    while let Some(t) = ty {
        if let Some(found) = own_get_attr(vm, t, name) {
            let wrap = matches!(found.kind_name(), "builtin-fn" | "closure");
            return Outcome::Ok(if wrap { vm.make_bound_method(found, obj) } else { found });
        }
        ty = t.downcast::<TypeData>().and_then(|td| td.base_class);
    }

    raise_attribute_error(vm, name);
    Outcome::Raised
}

pub fn get_attr_by_str(vm: &mut Vm, obj: GcRef, name: &str) -> Outcome<GcRef> {
    let name_ref = vm.make_bytes(name.as_bytes());
    get_attr(vm, obj, name_ref)
}

pub fn set_attr(vm: &mut Vm, obj: GcRef, name: GcRef, value: GcRef) -> Outcome<()> {
    match obj.kind_name() {
        "type" | "basic-object" => {
            if let Some(cur) = obj.group() {
                let current_group = vm.current_group();
                let already_present = own_get_attr(vm, obj, name).is_some();
                if Some(cur) != current_group && !already_present {
                    vm.raise_msg("RuntimeError", "Cannot allocate space in another group");
                    return Outcome::Raised;
                }
            }
            let dict = match obj.kind_name() {
                "type" => &obj.downcast::<TypeData>().expect("checked kind").members,
                _ => &obj.downcast::<BasicObjectData>().expect("checked kind").attrs,
            };
            dict.borrow_mut().set(vm, name, value)
        }
        _ => {
            vm.raise_msg("RuntimeError", "object does not support attribute assignment");
            Outcome::Raised
        }
    }
}

pub fn del_attr(vm: &mut Vm, obj: GcRef, name: GcRef) -> Outcome<()> {
    match obj.kind_name() {
        "type" | "basic-object" => {
            let dict = match obj.kind_name() {
                "type" => &obj.downcast::<TypeData>().expect("checked kind").members,
                _ => &obj.downcast::<BasicObjectData>().expect("checked kind").attrs,
            };
            match dict.borrow_mut().remove(vm, name) {
                Outcome::Ok(Some(_)) => Outcome::Ok(()),
                Outcome::Ok(None) => {
                    raise_attribute_error(vm, name);
                    Outcome::Raised
                }
                Outcome::Raised => Outcome::Raised,
            }
        }
        _ => {
            vm.raise_msg("RuntimeError", "object does not support attribute deletion");
            Outcome::Raised
        }
    }
}

/// Shared call entry point used by the `CALL` opcode, bound-method
/// dispatch, and dunder invocation during hashing/equality.
pub fn call(vm: &mut Vm, target: GcRef, args: GcRef) -> Outcome<GcRef> {
    match target.kind_name() {
        "closure" => interp::run_closure(vm, target, args),
        "builtin-fn" => {
            let f = target.downcast::<BuiltinFnData>().expect("checked kind").func;
            f(vm, args)
        }
        "bound-method" => {
            let bm = target.downcast::<BoundMethodData>().expect("checked kind");
            let items = {
                let arg_tuple = args.downcast::<TupleData>().expect("call args is always a tuple");
                let mut v = Vec::with_capacity(arg_tuple.items.len() + 1);
                v.push(bm.receiver);
                v.extend_from_slice(&arg_tuple.items);
                v
            };
            let new_args = vm.make_tuple(items);
            call(vm, bm.method, new_args)
        }
        "type" => {
            let td = target.downcast::<TypeData>().expect("checked kind");
            match td.constructor {
                crate::kinds::typesys::Constructor::Native(f) => f(vm, target, args),
                crate::kinds::typesys::Constructor::Abstract => {
                    vm.raise_msg("RuntimeError", "Object cannot be constructed");
                    Outcome::Raised
                }
                crate::kinds::typesys::Constructor::Dict => Outcome::Ok(vm.make_dict()),
                crate::kinds::typesys::Constructor::Exception => vm.construct_exception(target, args),
                crate::kinds::typesys::Constructor::Default => vm.construct_basic_object(target, args),
            }
        }
        _ => match get_attr_by_str(vm, target, "__call__") {
            Outcome::Ok(method) => call(vm, method, args),
            Outcome::Raised => Outcome::Raised,
        },
    }
}

/// Visits `type`, `group` (unless static) and the kind's own referents —
/// the same three-tier walk `trace()` performs in `object.c`.
pub fn trace(obj: GcRef, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
    if let Some(ty) = obj.ty() {
        if !visitor(ty) {
            return false;
        }
    }
    if !obj.is_static() {
        if let Some(g) = obj.group() {
            if !visitor(g) {
                return false;
            }
        }
    }
    obj.payload().trace(visitor)
}

/// `__hash__` dispatch. Any failure (missing method, wrong return type,
/// or a raised exception) reports via `Outcome::Raised`.
pub fn object_hasher(vm: &mut Vm, obj: GcRef) -> Outcome<u64> {
    if let Some(t) = fast_identity_kind(obj) {
        return Outcome::Ok(t);
    }
    let method = match get_attr_by_str(vm, obj, "__hash__") {
        Outcome::Ok(m) => m,
        Outcome::Raised => return Outcome::Raised,
    };
    let empty_args = vm.make_tuple(Vec::new());
    let result = match call(vm, method, empty_args) {
        Outcome::Ok(r) => r,
        Outcome::Raised => return Outcome::Raised,
    };
    if result.kind_name() != "int" {
        vm.raise_msg("TypeError", "__hash__ did not return an int");
        return Outcome::Raised;
    }
    Outcome::Ok(int_value(result) as u64)
}

/// Scalars and the singleton `none`/`bool` kinds hash by identity/value
/// without a dunder round-trip, matching the bytes/int fast paths the
/// original wires directly into `type_get_attr`'s "hacks" branch.
fn fast_identity_kind(obj: GcRef) -> Option<u64> {
    match obj.kind_name() {
        "int" => Some(obj.downcast::<IntData>()?.0 as u64),
        "bool" => Some(if bool_value(obj) { 1 } else { 0 }),
        "none" => Some(0),
        "bytes" | "bytes-view" | "bytearray" => {
            let bytes = crate::kinds::bytes::as_byte_slice(obj)?;
            Some(fnv1a64(bytes))
        }
        _ => None,
    }
}

/// `fnv-1a-64`, matching `string_hasher` in `object.c`.
pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash: u64 = 14695981039346656037;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// `__eq__` dispatch, mirroring `object_equals`.
pub fn object_equals(vm: &mut Vm, a: GcRef, b: GcRef) -> Outcome<bool> {
    if let Some(fast) = fast_identity_eq(a, b) {
        return Outcome::Ok(fast);
    }
    let method = match get_attr_by_str(vm, a, "__eq__") {
        Outcome::Ok(m) => m,
        Outcome::Raised => return Outcome::Raised,
    };
    let args = vm.make_tuple(vec![b]);
    let result = match call(vm, method, args) {
        Outcome::Ok(r) => r,
        Outcome::Raised => return Outcome::Raised,
    };
    if result.kind_name() != "bool" {
        vm.raise_msg("TypeError", "__eq__ did not return a bool");
        return Outcome::Raised;
    }
    Outcome::Ok(bool_value(result))
}

fn fast_identity_eq(a: GcRef, b: GcRef) -> Option<bool> {
    match (a.kind_name(), b.kind_name()) {
        ("int", "int") => Some(int_value(a) == int_value(b)),
        ("bool", "bool") => Some(bool_value(a) == bool_value(b)),
        ("none", "none") => Some(true),
        (ka, kb) if matches!(ka, "bytes" | "bytes-view" | "bytearray") && matches!(kb, "bytes" | "bytes-view" | "bytearray") => {
            Some(crate::kinds::bytes::as_byte_slice(a) == crate::kinds::bytes::as_byte_slice(b))
        }
        _ if a == b => Some(true),
        _ => None,
    }
}

pub fn is_instance(vm: &Vm, obj: GcRef, of: GcRef) -> bool {
    let mut ty = obj.ty();
    while let Some(t) = ty {
        if t == of {
            return true;
        }
        ty = t.downcast::<TypeData>().and_then(|td| td.base_class);
    }
    let _ = vm;
    false
}

pub fn is_function_like(obj: GcRef) -> bool {
    matches!(obj.kind_name(), "builtin-fn" | "closure")
}

/// Bridges a host-level decode/config failure into the active exception
/// slot's `Error::Raised` carrier, for callers (the CLI) that need a
/// uniform `HostResult`.
pub fn unhandled(exc: GcRef) -> Error {
    Error::Raised(exc)
}

pub fn host_result<T>(o: Outcome<T>, pending: GcRef) -> HostResult<T> {
    match o {
        Outcome::Ok(v) => Ok(v),
        Outcome::Raised => Err(unhandled(pending)),
    }
}
