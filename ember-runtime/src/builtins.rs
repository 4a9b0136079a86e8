//! Native methods and free functions installed onto the built-in types at
//! bootstrap (spec.md §4.A "builtin-fn", grounded on `builtins.c`). Every
//! entry here is a `NativeFn`: `fn(&mut Vm, args: tuple) -> Outcome<GcRef>`,
//! with `self` (if any) arriving as `args`'s first element via the
//! bound-method wrapping `object::get_attr` already performs.

use crate::error::Outcome;
use crate::gcref::GcRef;
use crate::kinds::builtin_fn::BuiltinFnData;
use crate::kinds::bytes::{as_byte_slice, ByteArrayData, BytesViewData};
use crate::kinds::collections::{ListData, ListIteratorData, SliceData, TupleData};
use crate::kinds::dict::DictData;
use crate::kinds::exception::ExceptionData;
use crate::kinds::primitives::{bool_value, float_value, int_value};
use crate::kinds::thread_kinds::{ThreadData, ThreadStatus};
use crate::object;
use crate::runtime::Vm;

fn args_slice(args: GcRef) -> &'static [GcRef] {
    &args.downcast::<TupleData>().expect("native fn args is always a tuple").items
}

fn wrong_arity(vm: &mut Vm, n: usize) -> Outcome<GcRef> {
    vm.raise_msg("TypeError", &format!("Expected {n} argument{}", if n == 1 { "" } else { "s" }));
    Outcome::Raised
}

fn convert_index(len: i64, idx: i64) -> i64 {
    if idx < 0 {
        len + idx
    } else {
        idx
    }
}

/// Resolves a `slice` object's `start`/`end` (each int-or-none) into a
/// `[start, end)` range clamped to `0..=len`, per DESIGN.md's Open Question
/// decision (spec.md §9: "indices clamped with negative-from-end semantics").
fn slice_bounds(vm: &mut Vm, len: i64, slice_obj: GcRef) -> Outcome<(i64, i64)> {
    let s = slice_obj.downcast::<SliceData>().expect("checked kind");
    let start = match s.start.kind_name() {
        "int" => convert_index(len, int_value(s.start)).clamp(0, len),
        "nonetype" => 0,
        _ => {
            vm.raise_msg("TypeError", "Expected int or nonetype");
            return Outcome::Raised;
        }
    };
    let end = match s.end.kind_name() {
        "int" => convert_index(len, int_value(s.end)).clamp(0, len),
        "nonetype" => len,
        _ => {
            vm.raise_msg("TypeError", "Expected int or nonetype");
            return Outcome::Raised;
        }
    };
    Outcome::Ok((start, end.max(start)))
}

fn expect_kind(vm: &mut Vm, obj: GcRef, kind: &str, what: &str) -> Outcome<()> {
    if obj.kind_name() == kind {
        Outcome::Ok(())
    } else {
        vm.raise_msg("TypeError", &format!("Expected {what}"));
        Outcome::Raised
    }
}

fn register(vm: &mut Vm, type_name: &str, method_name: &'static str, f: crate::kinds::builtin_fn::NativeFn) {
    let ty = vm.type_named(type_name);
    let fn_ty = vm.type_named("builtin-fn");
    let name = vm.make_bytes(method_name.as_bytes());
    let payload = Box::new(BuiltinFnData { name: method_name, func: f });
    let r = vm
        .heap
        .alloc(Some(vm.root_group), payload, true)
        .expect("bootstrap allocation cannot fail");
    r.set_ty(fn_ty);
    if let Some(td) = ty.downcast::<crate::kinds::typesys::TypeData>() {
        let _ = td.members.borrow_mut().set(vm, name, r);
    }
}

fn register_free(vm: &mut Vm, name: &'static str, f: crate::kinds::builtin_fn::NativeFn) {
    let fn_ty = vm.type_named("builtin-fn");
    let key = vm.make_bytes(name.as_bytes());
    let payload = Box::new(BuiltinFnData { name, func: f });
    let r = vm
        .heap
        .alloc(Some(vm.root_group), payload, true)
        .expect("bootstrap allocation cannot fail");
    r.set_ty(fn_ty);
    vm.globals_set(key, r);
}

pub fn install(vm: &mut Vm) {
    install_object(vm);
    install_scalars(vm);
    install_bytes_like(vm);
    install_tuple(vm);
    install_list(vm);
    install_dict(vm);
    install_exception(vm);
    install_thread(vm);
    install_free_functions(vm);
}

// ---- object (base methods every kind inherits) ----

fn install_object(vm: &mut Vm) {
    register(vm, "object", "__eq__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        Outcome::Ok(vm.make_bool(a[0] == a[1]))
    });
    register(vm, "object", "__ne__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        let eq = object::get_attr_by_str(vm, a[0], "__eq__");
        let eq = match eq {
            Outcome::Ok(m) => m,
            Outcome::Raised => return Outcome::Raised,
        };
        let call_args = vm.make_tuple(vec![a[1]]);
        match object::call(vm, eq, call_args) {
            Outcome::Ok(r) if r.kind_name() == "bool" => Outcome::Ok(vm.make_bool(!bool_value(r))),
            Outcome::Ok(_) => {
                vm.raise_msg("TypeError", "__eq__ did not return a bool");
                Outcome::Raised
            }
            Outcome::Raised => Outcome::Raised,
        }
    });
    register(vm, "object", "__hash__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(vm.make_int(a[0].identity_hash() as i64))
    });
    register(vm, "object", "__bool__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(vm.true_)
    });
    register(vm, "object", "__not__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        let b = object::get_attr_by_str(vm, a[0], "__bool__");
        let b = match b {
            Outcome::Ok(m) => m,
            Outcome::Raised => return Outcome::Raised,
        };
        match object::call(vm, b, vm.empty_tuple) {
            Outcome::Ok(r) => Outcome::Ok(vm.make_bool(!bool_value(r))),
            Outcome::Raised => Outcome::Raised,
        }
    });
    register(vm, "object", "__str__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(vm.make_bytes(format!("<{}>", a[0].kind_name()).as_bytes()))
    });
    register(vm, "object", "__repr__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        let s = object::get_attr_by_str(vm, a[0], "__str__");
        let s = match s {
            Outcome::Ok(m) => m,
            Outcome::Raised => return Outcome::Raised,
        };
        object::call(vm, s, vm.empty_tuple)
    });
}

// ---- none / bool / int / float ----

fn install_scalars(vm: &mut Vm) {
    register(vm, "nonetype", "__str__", |vm, args| {
        let _ = args_slice(args);
        Outcome::Ok(vm.make_bytes(b"None"))
    });

    register(vm, "bool", "__not__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(vm.make_bool(!bool_value(a[0])))
    });
    register(vm, "bool", "__hash__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(vm.make_int(if bool_value(a[0]) { 1 } else { 0 }))
    });
    register(vm, "bool", "__bool__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(a[0])
    });
    register(vm, "bool", "__str__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 1 {
            return wrong_arity(vm, 1);
        }
        Outcome::Ok(vm.make_bytes(if bool_value(a[0]) { b"True" } else { b"False" }))
    });

    macro_rules! int_binop {
        ($name:literal, $op:expr) => {
            register(vm, "int", $name, |vm, args| {
                let a = args_slice(args);
                if a.len() != 2 {
                    return wrong_arity(vm, 2);
                }
                if a[0].kind_name() != "int" || a[1].kind_name() != "int" {
                    vm.raise_msg("TypeError", "Expected int");
                    return Outcome::Raised;
                }
                let x = int_value(a[0]);
                let y = int_value(a[1]);
                Outcome::Ok(vm.make_int($op(x, y)))
            });
        };
    }
    int_binop!("__add__", |x: i64, y: i64| x.wrapping_add(y));
    int_binop!("__sub__", |x: i64, y: i64| x.wrapping_sub(y));
    int_binop!("__mul__", |x: i64, y: i64| x.wrapping_mul(y));
    int_binop!("__and__", |x: i64, y: i64| x & y);
    int_binop!("__or__", |x: i64, y: i64| x | y);
    int_binop!("__xor__", |x: i64, y: i64| x ^ y);
    int_binop!("__shl__", |x: i64, y: i64| x.wrapping_shl(y as u32));
    int_binop!("__shr__", |x: i64, y: i64| x.wrapping_shr(y as u32));

    register(vm, "int", "__div__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if a[0].kind_name() != "int" || a[1].kind_name() != "int" {
            vm.raise_msg("TypeError", "Expected int");
            return Outcome::Raised;
        }
        let divisor = int_value(a[1]);
        if divisor == 0 {
            vm.raise_msg("ZeroDivisionError", "Division by zero");
            return Outcome::Raised;
        }
        Outcome::Ok(vm.make_int(int_value(a[0]) / divisor))
    });
    register(vm, "int", "__mod__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if a[0].kind_name() != "int" || a[1].kind_name() != "int" {
            vm.raise_msg("TypeError", "Expected int");
            return Outcome::Raised;
        }
        let divisor = int_value(a[1]);
        if divisor == 0 {
            vm.raise_msg("ZeroDivisionError", "Division by zero");
            return Outcome::Raised;
        }
        Outcome::Ok(vm.make_int(int_value(a[0]) % divisor))
    });
    register(vm, "int", "__inv__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_int(!int_value(a[0])))
    });
    register(vm, "int", "__neg__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_int(-int_value(a[0])))
    });
    register(vm, "int", "__eq__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if a[1].kind_name() != "int" {
            return Outcome::Ok(vm.false_);
        }
        Outcome::Ok(vm.make_bool(int_value(a[0]) == int_value(a[1])))
    });
    register(vm, "int", "__hash__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_int(int_value(a[0])))
    });
    macro_rules! int_cmp {
        ($name:literal, $op:tt) => {
            register(vm, "int", $name, |vm, args| {
                let a = args_slice(args);
                if a.len() != 2 {
                    return wrong_arity(vm, 2);
                }
                if a[1].kind_name() != "int" {
                    return Outcome::Ok(vm.false_);
                }
                Outcome::Ok(vm.make_bool(int_value(a[0]) $op int_value(a[1])))
            });
        };
    }
    int_cmp!("__gt__", >);
    int_cmp!("__lt__", <);
    int_cmp!("__ge__", >=);
    int_cmp!("__le__", <=);
    register(vm, "int", "__bool__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_bool(int_value(a[0]) != 0))
    });
    register(vm, "int", "__str__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_bytes(int_value(a[0]).to_string().as_bytes()))
    });

    register(vm, "float", "__add__", |vm, args| float_binop(vm, args, |x, y| x + y));
    register(vm, "float", "__sub__", |vm, args| float_binop(vm, args, |x, y| x - y));
    register(vm, "float", "__mul__", |vm, args| float_binop(vm, args, |x, y| x * y));
    register(vm, "float", "__div__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if a[0].kind_name() != "float" || a[1].kind_name() != "float" {
            vm.raise_msg("TypeError", "Expected float");
            return Outcome::Raised;
        }
        let divisor = float_value(a[1]);
        if divisor == 0.0 {
            vm.raise_msg("ZeroDivisionError", "Division by zero");
            return Outcome::Raised;
        }
        Outcome::Ok(vm.make_float(float_value(a[0]) / divisor))
    });
    register(vm, "float", "__neg__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_float(-float_value(a[0])))
    });
    register(vm, "float", "__eq__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if a[1].kind_name() != "float" {
            return Outcome::Ok(vm.false_);
        }
        Outcome::Ok(vm.make_bool(float_value(a[0]) == float_value(a[1])))
    });
    register(vm, "float", "__hash__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_int(float_value(a[0]).to_bits() as i64))
    });
    macro_rules! float_cmp {
        ($name:literal, $op:tt) => {
            register(vm, "float", $name, |vm, args| {
                let a = args_slice(args);
                if a.len() != 2 {
                    return wrong_arity(vm, 2);
                }
                if a[1].kind_name() != "float" {
                    return Outcome::Ok(vm.false_);
                }
                Outcome::Ok(vm.make_bool(float_value(a[0]) $op float_value(a[1])))
            });
        };
    }
    float_cmp!("__gt__", >);
    float_cmp!("__lt__", <);
    float_cmp!("__ge__", >=);
    float_cmp!("__le__", <=);
    register(vm, "float", "__bool__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_bool(float_value(a[0]) != 0.0))
    });
    register(vm, "float", "__str__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_bytes(float_value(a[0]).to_string().as_bytes()))
    });
}

fn float_binop(vm: &mut Vm, args: GcRef, op: impl Fn(f64, f64) -> f64) -> Outcome<GcRef> {
    let a = args_slice(args);
    if a.len() != 2 {
        return wrong_arity(vm, 2);
    }
    if a[0].kind_name() != "float" || a[1].kind_name() != "float" {
        vm.raise_msg("TypeError", "Expected float");
        return Outcome::Raised;
    }
    Outcome::Ok(vm.make_float(op(float_value(a[0]), float_value(a[1]))))
}

// ---- bytes / bytes-view / bytearray ----

fn install_bytes_like(vm: &mut Vm) {
    for ty in ["bytes", "bytearray"] {
        register(vm, ty, "__eq__", |vm, args| {
            let a = args_slice(args);
            let both_bytes = matches!(a[0].kind_name(), "bytes" | "bytes-view" | "bytearray")
                && matches!(a[1].kind_name(), "bytes" | "bytes-view" | "bytearray");
            if !both_bytes {
                return Outcome::Ok(vm.false_);
            }
            Outcome::Ok(vm.make_bool(as_byte_slice(a[0]) == as_byte_slice(a[1])))
        });
        register(vm, ty, "__hash__", |vm, args| {
            let a = args_slice(args);
            let bytes = as_byte_slice(a[0]).unwrap_or(&[]);
            Outcome::Ok(vm.make_int(object::fnv1a64(bytes) as i64))
        });
        register(vm, ty, "__getitem__", |vm, args| {
            let a = args_slice(args);
            if a.len() != 2 {
                return wrong_arity(vm, 2);
            }
            let bytes = as_byte_slice(a[0]).unwrap_or(&[]);
            let len = bytes.len() as i64;
            match a[1].kind_name() {
                "int" => {
                    let idx = int_value(a[1]);
                    let real = if idx < 0 { idx + len } else { idx };
                    if real < 0 || real >= len {
                        vm.raise_msg("IndexError", "bytes index out of range");
                        return Outcome::Raised;
                    }
                    Outcome::Ok(vm.make_int(bytes[real as usize] as i64))
                }
                "slice" => {
                    let (start, end) = match slice_bounds(vm, len, a[1]) {
                        Outcome::Ok(b) => b,
                        Outcome::Raised => return Outcome::Raised,
                    };
                    let piece = &bytes[start as usize..end as usize];
                    if a[0].kind_name() == "bytearray" {
                        let bty = vm.type_named("bytearray");
                        match vm.heap.alloc(vm.current_group(), Box::new(ByteArrayData { data: piece.to_vec() }), false) {
                            Some(r) => {
                                r.set_ty(bty);
                                Outcome::Ok(r)
                            }
                            None => {
                                vm.raise_memory_error();
                                Outcome::Raised
                            }
                        }
                    } else {
                        let bty = vm.type_named("bytes-view");
                        let payload = unsafe { BytesViewData::new(piece.as_ptr(), piece.len(), Some(a[0])) };
                        match vm.heap.alloc(vm.current_group(), Box::new(payload), false) {
                            Some(r) => {
                                r.set_ty(bty);
                                Outcome::Ok(r)
                            }
                            None => {
                                vm.raise_memory_error();
                                Outcome::Raised
                            }
                        }
                    }
                }
                _ => {
                    vm.raise_msg("TypeError", "Expected int or slice");
                    Outcome::Raised
                }
            }
        });
        register(vm, ty, "__bool__", |vm, args| {
            let a = args_slice(args);
            Outcome::Ok(vm.make_bool(!as_byte_slice(a[0]).unwrap_or(&[]).is_empty()))
        });
        register(vm, ty, "__str__", |_vm, args| {
            let a = args_slice(args);
            Outcome::Ok(a[0])
        });
        register(vm, ty, "__add__", |vm, args| {
            let a = args_slice(args);
            if a.len() != 2 {
                return wrong_arity(vm, 2);
            }
            let x = as_byte_slice(a[0]).unwrap_or(&[]);
            let y = as_byte_slice(a[1]).unwrap_or(&[]);
            let mut joined = Vec::with_capacity(x.len() + y.len());
            joined.extend_from_slice(x);
            joined.extend_from_slice(y);
            Outcome::Ok(vm.make_bytes(&joined))
        });
        register(vm, ty, "__mul__", |vm, args| {
            let a = args_slice(args);
            if a.len() != 2 || a[1].kind_name() != "int" {
                vm.raise_msg("TypeError", "Expected int");
                return Outcome::Raised;
            }
            let x = as_byte_slice(a[0]).unwrap_or(&[]);
            let n = int_value(a[1]).max(0) as usize;
            Outcome::Ok(vm.make_bytes(&x.repeat(n)))
        });
    }
    register(vm, "bytes", "join", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        let sep = as_byte_slice(a[0]).unwrap_or(&[]).to_vec();
        if a[1].kind_name() != "tuple" && a[1].kind_name() != "list" {
            vm.raise_msg("TypeError", "Expected tuple or list");
            return Outcome::Raised;
        }
        let parts: Vec<GcRef> = match a[1].kind_name() {
            "tuple" => a[1].downcast::<TupleData>().expect("checked kind").items.clone(),
            _ => a[1].downcast::<ListData>().expect("checked kind").items.borrow().clone(),
        };
        let mut out = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&sep);
            }
            match as_byte_slice(*part) {
                Some(b) => out.extend_from_slice(b),
                None => {
                    vm.raise_msg("TypeError", "join elements must be bytes-like");
                    return Outcome::Raised;
                }
            }
        }
        Outcome::Ok(vm.make_bytes(&out))
    });
}

// ---- tuple ----

fn install_tuple(vm: &mut Vm) {
    register(vm, "tuple", "__hash__", |vm, args| {
        let a = args_slice(args);
        let items = a[0].downcast::<TupleData>().expect("checked kind").items.clone();
        let mut hash: u64 = 14695981039346656037;
        for item in items {
            match object::object_hasher(vm, item) {
                Outcome::Ok(h) => {
                    hash ^= h;
                    hash = hash.wrapping_mul(1099511628211);
                }
                Outcome::Raised => return Outcome::Raised,
            }
        }
        Outcome::Ok(vm.make_int(hash as i64))
    });
    register(vm, "tuple", "__eq__", |vm, args| {
        let a = args_slice(args);
        if a[1].kind_name() != "tuple" {
            return Outcome::Ok(vm.false_);
        }
        let x = a[0].downcast::<TupleData>().expect("checked kind").items.clone();
        let y = a[1].downcast::<TupleData>().expect("checked kind").items.clone();
        if x.len() != y.len() {
            return Outcome::Ok(vm.false_);
        }
        for (xi, yi) in x.iter().zip(y.iter()) {
            match object::object_equals(vm, *xi, *yi) {
                Outcome::Ok(true) => continue,
                Outcome::Ok(false) => return Outcome::Ok(vm.false_),
                Outcome::Raised => return Outcome::Raised,
            }
        }
        Outcome::Ok(vm.true_)
    });
    register(vm, "tuple", "__getitem__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        let items = a[0].downcast::<TupleData>().expect("checked kind");
        let len = items.items.len() as i64;
        match a[1].kind_name() {
            "int" => {
                let idx = int_value(a[1]);
                let real = if idx < 0 { idx + len } else { idx };
                if real < 0 || real >= len {
                    vm.raise_msg("IndexError", "tuple index out of range");
                    return Outcome::Raised;
                }
                Outcome::Ok(items.items[real as usize])
            }
            "slice" => {
                let (start, end) = match slice_bounds(vm, len, a[1]) {
                    Outcome::Ok(b) => b,
                    Outcome::Raised => return Outcome::Raised,
                };
                Outcome::Ok(vm.make_tuple(items.items[start as usize..end as usize].to_vec()))
            }
            _ => {
                vm.raise_msg("TypeError", "Expected int or slice");
                Outcome::Raised
            }
        }
    });
    register(vm, "tuple", "__add__", |vm, args| {
        let a = args_slice(args);
        if a[1].kind_name() != "tuple" {
            vm.raise_msg("TypeError", "Expected tuple");
            return Outcome::Raised;
        }
        let mut items = a[0].downcast::<TupleData>().expect("checked kind").items.clone();
        items.extend_from_slice(&a[1].downcast::<TupleData>().expect("checked kind").items);
        Outcome::Ok(vm.make_tuple(items))
    });
    register(vm, "tuple", "__bool__", |vm, args| {
        let a = args_slice(args);
        Outcome::Ok(vm.make_bool(!a[0].downcast::<TupleData>().expect("checked kind").items.is_empty()))
    });
}

// ---- list ----

fn install_list(vm: &mut Vm) {
    register(vm, "list-iterator", "__next__", |vm, args| {
        let a = args_slice(args);
        let it = a[0].downcast::<ListIteratorData>().expect("checked kind");
        let target = it.target.downcast::<ListData>().expect("list-iterator always targets a list");
        let items = target.items.borrow();
        if it.pos.get() >= items.len() {
            vm.raise_msg("StopIteration", "");
            return Outcome::Raised;
        }
        let v = items[it.pos.get()];
        it.pos.set(it.pos.get() + 1);
        Outcome::Ok(v)
    });
    register(vm, "list-iterator", "__iter__", |_vm, args| {
        let a = args_slice(args);
        Outcome::Ok(a[0])
    });

    register(vm, "list", "__eq__", |vm, args| {
        let a = args_slice(args);
        if a[1].kind_name() != "list" {
            return Outcome::Ok(vm.false_);
        }
        let x = a[0].downcast::<ListData>().expect("checked kind").items.borrow().clone();
        let y = a[1].downcast::<ListData>().expect("checked kind").items.borrow().clone();
        if x.len() != y.len() {
            return Outcome::Ok(vm.false_);
        }
        for (xi, yi) in x.iter().zip(y.iter()) {
            match object::object_equals(vm, *xi, *yi) {
                Outcome::Ok(true) => continue,
                Outcome::Ok(false) => return Outcome::Ok(vm.false_),
                Outcome::Raised => return Outcome::Raised,
            }
        }
        Outcome::Ok(vm.true_)
    });
    register(vm, "list", "__hash__", |vm, _args| {
        vm.raise_msg("TypeError", "Unhashable");
        Outcome::Raised
    });
    register(vm, "list", "__getitem__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        let l = a[0].downcast::<ListData>().expect("checked kind");
        let items = l.items.borrow();
        let len = items.len() as i64;
        match a[1].kind_name() {
            "int" => {
                let idx = int_value(a[1]);
                let real = if idx < 0 { idx + len } else { idx };
                if real < 0 || real >= len {
                    vm.raise_msg("IndexError", "list index out of range");
                    return Outcome::Raised;
                }
                Outcome::Ok(items[real as usize])
            }
            "slice" => {
                let (start, end) = match slice_bounds(vm, len, a[1]) {
                    Outcome::Ok(b) => b,
                    Outcome::Raised => return Outcome::Raised,
                };
                let piece = items[start as usize..end as usize].to_vec();
                let lty = vm.type_named("list");
                drop(items);
                match vm.heap.alloc(vm.current_group(), Box::new(ListData { items: std::cell::RefCell::new(piece) }), false) {
                    Some(r) => {
                        r.set_ty(lty);
                        Outcome::Ok(r)
                    }
                    None => {
                        vm.raise_memory_error();
                        Outcome::Raised
                    }
                }
            }
            _ => {
                vm.raise_msg("TypeError", "Expected int or slice");
                Outcome::Raised
            }
        }
    });
    register(vm, "list", "__setitem__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 3 {
            return wrong_arity(vm, 3);
        }
        let l = a[0].downcast::<ListData>().expect("checked kind");
        if a[1].kind_name() != "int" {
            vm.raise_msg("TypeError", "Expected int");
            return Outcome::Raised;
        }
        let mut items = l.items.borrow_mut();
        let idx = int_value(a[1]);
        let len = items.len() as i64;
        let real = if idx < 0 { idx + len } else { idx };
        if real < 0 || real >= len {
            vm.raise_msg("IndexError", "list index out of range");
            return Outcome::Raised;
        }
        items[real as usize] = a[2];
        Outcome::Ok(vm.none)
    });
    register(vm, "list", "push", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if let Some(cur) = a[0].group() {
            if Some(cur) != vm.current_group() {
                vm.raise_msg("RuntimeError", "Cannot allocate space in another group");
                return Outcome::Raised;
            }
        }
        let l = a[0].downcast::<ListData>().expect("checked kind");
        l.items.borrow_mut().push(a[1]);
        Outcome::Ok(vm.none)
    });
    register(vm, "list", "pop", |vm, args| {
        let a = args_slice(args);
        let l = a[0].downcast::<ListData>().expect("checked kind");
        match l.items.borrow_mut().pop() {
            Some(v) => Outcome::Ok(v),
            None => {
                vm.raise_msg("IndexError", "pop from empty list");
                Outcome::Raised
            }
        }
    });
    register(vm, "list", "__bool__", |vm, args| {
        let a = args_slice(args);
        let l = a[0].downcast::<ListData>().expect("checked kind");
        Outcome::Ok(vm.make_bool(!l.items.borrow().is_empty()))
    });
    register(vm, "list", "__iter__", |vm, args| {
        let a = args_slice(args);
        let ty = vm.type_named("list-iterator");
        let payload = Box::new(ListIteratorData {
            target: a[0],
            pos: std::cell::Cell::new(0),
        });
        match vm.heap.alloc(vm.current_group(), payload, false) {
            Some(r) => {
                r.set_ty(ty);
                Outcome::Ok(r)
            }
            None => {
                vm.raise_memory_error();
                Outcome::Raised
            }
        }
    });
}

// ---- dict ----

fn install_dict(vm: &mut Vm) {
    register(vm, "dict", "__getitem__", |vm, args| {
        let a = args_slice(args);
        if let Outcome::Raised = expect_kind(vm, a[0], "dict", "dict") {
            return Outcome::Raised;
        }
        let d = a[0].downcast_mut::<DictData>().expect("checked kind");
        match d.core.get(vm, a[1]) {
            Outcome::Ok(Some(v)) => Outcome::Ok(v),
            Outcome::Ok(None) => {
                vm.raise_exc_arg("KeyError", a[1]);
                Outcome::Raised
            }
            Outcome::Raised => Outcome::Raised,
        }
    });
    register(vm, "dict", "__setitem__", |vm, args| {
        let a = args_slice(args);
        if a.len() != 3 {
            return wrong_arity(vm, 3);
        }
        if let Some(cur) = a[0].group() {
            let current_group = vm.current_group();
            let d = a[0].downcast_mut::<DictData>().expect("checked kind");
            let already_present = matches!(d.core.get(vm, a[1]), Outcome::Ok(Some(_)));
            if Some(cur) != current_group && !already_present {
                vm.raise_msg("RuntimeError", "Cannot allocate space in another group");
                return Outcome::Raised;
            }
        }
        let d = a[0].downcast_mut::<DictData>().expect("checked kind");
        match d.core.set(vm, a[1], a[2]) {
            Outcome::Ok(()) => Outcome::Ok(vm.none),
            Outcome::Raised => Outcome::Raised,
        }
    });
    register(vm, "dict", "pop", |vm, args| {
        let a = args_slice(args);
        let d = a[0].downcast_mut::<DictData>().expect("checked kind");
        match d.core.remove(vm, a[1]) {
            Outcome::Ok(Some(v)) => Outcome::Ok(v),
            Outcome::Ok(None) => {
                vm.raise_exc_arg("KeyError", a[1]);
                Outcome::Raised
            }
            Outcome::Raised => Outcome::Raised,
        }
    });
    register(vm, "dict", "__delitem__", |vm, args| {
        let a = args_slice(args);
        let d = a[0].downcast_mut::<DictData>().expect("checked kind");
        match d.core.remove(vm, a[1]) {
            Outcome::Ok(Some(_)) => Outcome::Ok(vm.none),
            Outcome::Ok(None) => {
                vm.raise_exc_arg("KeyError", a[1]);
                Outcome::Raised
            }
            Outcome::Raised => Outcome::Raised,
        }
    });
    register(vm, "dict", "__hash__", |vm, _args| {
        vm.raise_msg("TypeError", "Unhashable");
        Outcome::Raised
    });
    register(vm, "dict", "__bool__", |vm, args| {
        let a = args_slice(args);
        let d = a[0].downcast::<DictData>().expect("checked kind");
        Outcome::Ok(vm.make_bool(!d.core.is_empty()))
    });
}

// ---- exception ----

fn install_exception(vm: &mut Vm) {
    register(vm, "exception", "__str__", |vm, args| {
        let a = args_slice(args);
        let e = a[0].downcast::<ExceptionData>().expect("checked kind");
        let items = e.args.downcast::<TupleData>().map(|t| t.items.clone()).unwrap_or_default();
        let mut parts = Vec::new();
        for item in items {
            match as_byte_slice(item) {
                Some(b) => parts.push(String::from_utf8_lossy(b).into_owned()),
                None => parts.push(format!("<{}>", item.kind_name())),
            }
        }
        Outcome::Ok(vm.make_bytes(parts.join(", ").as_bytes()))
    });
}

// ---- thread / thread-group ----

fn install_thread(vm: &mut Vm) {
    register(vm, "thread", "__str__", |vm, _args| Outcome::Ok(vm.make_bytes(b"<Thread>")));
    register(vm, "thread", "__iter__", |_vm, args| {
        let a = args_slice(args);
        Outcome::Ok(a[0])
    });
    register(vm, "thread", "__next__", |vm, args| {
        let a = args_slice(args);
        if let Outcome::Raised = expect_kind(vm, a[0], "thread", "thread") {
            return Outcome::Raised;
        }
        let td = a[0].downcast::<ThreadData>().expect("checked kind");
        while td.status.get() == ThreadStatus::Running {
            crate::thread::cooperative_sleep();
        }
        match td.status.get() {
            ThreadStatus::Yielded => {
                td.status.set(ThreadStatus::Running);
                Outcome::Ok(td.result.get().unwrap_or(vm.none))
            }
            ThreadStatus::Returned => {
                vm.raise_msg("StopIteration", "");
                Outcome::Raised
            }
            ThreadStatus::Excepted => {
                vm.set_pending_exception(td.result.get().unwrap_or(vm.none));
                Outcome::Raised
            }
            ThreadStatus::Running => unreachable!("loop above only exits once status changes"),
        }
    });
    register(vm, "thread", "join", |vm, args| {
        let a = args_slice(args);
        let td = a[0].downcast::<ThreadData>().expect("checked kind");
        while !matches!(td.status.get(), ThreadStatus::Returned | ThreadStatus::Excepted) {
            crate::thread::cooperative_sleep();
        }
        Outcome::Ok(vm.none)
    });
    register(vm, "thread", "inject", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        if let Outcome::Raised = expect_kind(vm, a[0], "thread", "thread") {
            return Outcome::Raised;
        }
        let td = a[0].downcast::<ThreadData>().expect("checked kind");
        td.injected.set(Some(a[1]));
        Outcome::Ok(vm.none)
    });

    register(vm, "thread-group", "__str__", |vm, _args| Outcome::Ok(vm.make_bytes(b"<Threadgroup>")));
    register(vm, "thread-group", "donate", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        match vm.heap.donate(a[1], a[0]) {
            Ok(()) => Outcome::Ok(vm.none),
            Err(_) => {
                vm.raise_memory_error();
                Outcome::Raised
            }
        }
    });
}

// ---- free functions ----

fn install_free_functions(vm: &mut Vm) {
    register_free(vm, "print", |vm, args| {
        let parts = match format_args(vm, args) {
            Outcome::Ok(p) => p,
            Outcome::Raised => return Outcome::Raised,
        };
        let joined = parts.concat();
        println!("{}", String::from_utf8_lossy(&joined));
        Outcome::Ok(vm.none)
    });
    register_free(vm, "format", |vm, args| {
        let parts = match format_args(vm, args) {
            Outcome::Ok(p) => p,
            Outcome::Raised => return Outcome::Raised,
        };
        Outcome::Ok(vm.make_bytes(&parts.concat()))
    });
    register_free(vm, "hex", |vm, args| {
        let a = args_slice(args);
        if let Outcome::Raised = expect_kind(vm, a[0], "int", "int") {
            return Outcome::Raised;
        }
        let v = int_value(a[0]);
        let s = if v == 0 { "0x0".to_string() } else { format!("{v:#x}") };
        Outcome::Ok(vm.make_bytes(s.as_bytes()))
    });
    register_free(vm, "isinstance", |vm, args| {
        let a = args_slice(args);
        if a.len() != 2 {
            return wrong_arity(vm, 2);
        }
        Outcome::Ok(vm.make_bool(object::is_instance(vm, a[0], a[1])))
    });
    register_free(vm, "chr", |vm, args| {
        let a = args_slice(args);
        if let Outcome::Raised = expect_kind(vm, a[0], "int", "int") {
            return Outcome::Raised;
        }
        let v = int_value(a[0]);
        if !(0..=255).contains(&v) {
            vm.raise_msg("ValueError", "value out of range for chr()");
            return Outcome::Raised;
        }
        Outcome::Ok(vm.make_bytes(&[v as u8]))
    });
    register_free(vm, "sleep", |vm, args| {
        let a = args_slice(args);
        let seconds = match a[0].kind_name() {
            "int" => int_value(a[0]) as f64,
            "float" => float_value(a[0]),
            _ => {
                vm.raise_msg("TypeError", "Expected int or float");
                return Outcome::Raised;
            }
        };
        crate::thread::sleep_seconds(seconds);
        Outcome::Ok(vm.none)
    });
}

/// Converts every argument via `__str__` and concatenates with no
/// separator, matching `builtin_format`'s `bytes_join(empty_string, ...)`.
fn format_args(vm: &mut Vm, args: GcRef) -> Outcome<Vec<Vec<u8>>> {
    let a = args_slice(args).to_vec();
    let mut out = Vec::with_capacity(a.len());
    for item in a {
        let s = match object::get_attr_by_str(vm, item, "__str__") {
            Outcome::Ok(m) => m,
            Outcome::Raised => return Outcome::Raised,
        };
        let result = match object::call(vm, s, vm.empty_tuple) {
            Outcome::Ok(r) => r,
            Outcome::Raised => return Outcome::Raised,
        };
        out.push(as_byte_slice(result).unwrap_or(&[]).to_vec());
    }
    Outcome::Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_addition_matches_python_style_semantics() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let a = vm.make_int(2);
        let b = vm.make_int(3);
        let add = object::get_attr_by_str(&mut vm, a, "__add__");
        let add = match add {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("__add__ missing"),
        };
        let args = vm.make_tuple(vec![b]);
        match object::call(&mut vm, add, args) {
            Outcome::Ok(r) => assert_eq!(int_value(r), 5),
            Outcome::Raised => panic!("unexpected raise"),
        }
    }

    #[test]
    fn int_division_by_zero_raises_zero_division_error() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let a = vm.make_int(1);
        let b = vm.make_int(0);
        let div = object::get_attr_by_str(&mut vm, a, "__div__");
        let div = match div {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("__div__ missing"),
        };
        let args = vm.make_tuple(vec![b]);
        match object::call(&mut vm, div, args) {
            Outcome::Raised => {
                let exc = vm.take_pending_exception().expect("an exception should be pending");
                let zero_div_ty = vm.type_named("ZeroDivisionError");
                assert!(object::is_instance(&vm, exc, zero_div_ty));
            }
            Outcome::Ok(_) => panic!("expected ZeroDivisionError"),
        }
    }

    // Wrong arity on a binary dunder must raise TypeError, not panic on an
    // out-of-bounds `a[1]` index.
    #[test]
    fn int_eq_with_wrong_arity_raises_type_error_instead_of_panicking() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let a = vm.make_int(1);
        let eq = match object::get_attr_by_str(&mut vm, a, "__eq__") {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("__eq__ missing"),
        };
        let empty = vm.empty_tuple;
        match object::call(&mut vm, eq, empty) {
            Outcome::Raised => {
                let exc = vm.take_pending_exception().expect("an exception should be pending");
                let type_err = vm.type_named("TypeError");
                assert!(object::is_instance(&vm, exc, type_err));
            }
            Outcome::Ok(_) => panic!("expected TypeError"),
        }
    }

    #[test]
    fn bool_not_with_wrong_arity_raises_type_error_instead_of_panicking() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let b = vm.true_;
        let not_ = match object::get_attr_by_str(&mut vm, b, "__not__") {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("__not__ missing"),
        };
        let extra = vm.make_int(1);
        let args = vm.make_tuple(vec![extra]);
        match object::call(&mut vm, not_, args) {
            Outcome::Raised => {
                let exc = vm.take_pending_exception().expect("an exception should be pending");
                let type_err = vm.type_named("TypeError");
                assert!(object::is_instance(&vm, exc, type_err));
            }
            Outcome::Ok(_) => panic!("expected TypeError"),
        }
    }

    // §8 scenario 6: after donating an object to another group, mutating it
    // from the source group must raise RuntimeError.
    #[test]
    fn list_push_from_foreign_group_raises_runtime_error() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let group_a = match crate::thread::create_group(&mut vm, 4096, 500) {
            Outcome::Ok(g) => g,
            Outcome::Raised => panic!("create_group a"),
        };
        let group_b = match crate::thread::create_group(&mut vm, 4096, 500) {
            Outcome::Ok(g) => g,
            Outcome::Raised => panic!("create_group b"),
        };
        vm.set_current_group(group_a);
        let list_ty = vm.type_named("list");
        let list = vm
            .heap
            .alloc(Some(group_a), Box::new(ListData { items: std::cell::RefCell::new(Vec::new()) }), false)
            .expect("ample quota");
        list.set_ty(list_ty);
        vm.heap.donate(list, group_b).expect("donate within quota");

        let push = match object::get_attr_by_str(&mut vm, list, "push") {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("push missing"),
        };
        let one = vm.make_int(1);
        let args = vm.make_tuple(vec![one]);
        match object::call(&mut vm, push, args) {
            Outcome::Raised => {
                let exc = vm.take_pending_exception().expect("an exception should be pending");
                let runtime_err = vm.type_named("RuntimeError");
                assert!(object::is_instance(&vm, exc, runtime_err));
            }
            Outcome::Ok(_) => panic!("expected RuntimeError"),
        }
    }

    #[test]
    fn dict_setitem_from_foreign_group_raises_runtime_error_for_new_keys() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let group_a = match crate::thread::create_group(&mut vm, 4096, 500) {
            Outcome::Ok(g) => g,
            Outcome::Raised => panic!("create_group a"),
        };
        let group_b = match crate::thread::create_group(&mut vm, 4096, 500) {
            Outcome::Ok(g) => g,
            Outcome::Raised => panic!("create_group b"),
        };
        vm.set_current_group(group_a);
        let dict = vm.make_dict();
        vm.heap.donate(dict, group_b).expect("donate within quota");

        let setitem = match object::get_attr_by_str(&mut vm, dict, "__setitem__") {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("__setitem__ missing"),
        };
        let key = vm.make_int(1);
        let value = vm.make_int(2);
        let args = vm.make_tuple(vec![key, value]);
        match object::call(&mut vm, setitem, args) {
            Outcome::Raised => {
                let exc = vm.take_pending_exception().expect("an exception should be pending");
                let runtime_err = vm.type_named("RuntimeError");
                assert!(object::is_instance(&vm, exc, runtime_err));
            }
            Outcome::Ok(_) => panic!("expected RuntimeError"),
        }
    }

    #[test]
    fn list_slice_clamps_out_of_range_bounds() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let items: Vec<GcRef> = (0..5).map(|i| vm.make_int(i)).collect();
        let list_ty = vm.type_named("list");
        let list = vm
            .heap
            .alloc(vm.current_group(), Box::new(ListData { items: std::cell::RefCell::new(items) }), false)
            .expect("ample quota");
        list.set_ty(list_ty);

        let start = vm.make_int(-100);
        let end = vm.make_int(100);
        let slice_ty = vm.type_named("slice");
        let slice = vm
            .heap
            .alloc(vm.current_group(), Box::new(crate::kinds::collections::SliceData { start, end }), false)
            .expect("ample quota");
        slice.set_ty(slice_ty);

        let getitem = match object::get_attr_by_str(&mut vm, list, "__getitem__") {
            Outcome::Ok(m) => m,
            Outcome::Raised => panic!("__getitem__ missing"),
        };
        let args = vm.make_tuple(vec![slice]);
        let result = match object::call(&mut vm, getitem, args) {
            Outcome::Ok(r) => r,
            Outcome::Raised => panic!("slicing must not raise on out-of-range bounds"),
        };
        let sliced = result.downcast::<ListData>().expect("result is a list");
        assert_eq!(sliced.items.borrow().len(), 5);
    }

    #[test]
    fn bytes_len_pseudo_field_matches_byte_count() {
        let mut vm = Vm::bootstrap(1 << 20, 1000, 1000);
        let b = vm.make_bytes(b"hello");
        match object::get_attr_by_str(&mut vm, b, "len") {
            Outcome::Ok(len) => assert_eq!(int_value(len), 5),
            Outcome::Raised => panic!("bytes should expose a len pseudo-field"),
        }
    }
}
