//! The stack-based bytecode interpreter (spec.md §4.C), grounded on
//! `interpreter.c`'s `interpreter()` function. One call of
//! [`run_closure`] corresponds to one activation of that function; the
//! per-instruction scheduling probe and the try-stack are local to it.

pub mod bytecode;

use crate::error::Outcome;
use crate::gcref::GcRef;
use crate::kinds::closure::ClosureData;
use crate::kinds::dict::{DictData, PolyDict};
use crate::kinds::primitives::bool_value;
use crate::object;
use crate::runtime::Vm;
use bytecode::{op, Cursor};

/// Shallow-copies a dict, matching `dict_dup_inner` — used to build the
/// frame's local-variable dict from the closure's captured context.
fn dup_dict(vm: &mut Vm, source: GcRef) -> GcRef {
    let mut copy = PolyDict::new();
    let snapshot: Vec<(GcRef, GcRef)> = {
        let mut items = Vec::new();
        let d = source.downcast::<DictData>().expect("closure context is always a dict");
        d.core.for_each(|k, v| {
            items.push((k, v));
            true
        });
        items
    };
    for (k, v) in snapshot {
        if let Outcome::Ok(()) = copy.set(vm, k, v) {
            continue;
        }
    }
    let result = vm.make_dict();
    if let Some(d) = result.downcast_mut::<DictData>() {
        d.core = copy;
    }
    result
}

struct Frame {
    locals: GcRef,
    stack: Vec<GcRef>,
    trystack: Vec<usize>,
    temproot: Vec<GcRef>,
}

impl Frame {
    fn temp(&mut self, vm: &mut Vm, r: GcRef) -> GcRef {
        vm.heap.root(r);
        self.temproot.push(r);
        r
    }

    fn push(&mut self, vm: &mut Vm, r: GcRef) {
        vm.heap.root(r);
        self.stack.push(r);
    }

    fn pop(&mut self, vm: &mut Vm) -> Option<GcRef> {
        let r = self.stack.pop()?;
        vm.heap.unroot(r);
        Some(r)
    }

    fn clear_temproot(&mut self, vm: &mut Vm) {
        for r in self.temproot.drain(..) {
            vm.heap.unroot(r);
        }
    }

    fn drop_all(&mut self, vm: &mut Vm) {
        self.clear_temproot(vm);
        for r in self.stack.drain(..) {
            vm.heap.unroot(r);
        }
        vm.heap.unroot(self.locals);
    }
}

macro_rules! pop_or_underflow {
    ($label:lifetime, $frame:expr, $vm:expr, $opcode:expr) => {
        match $frame.pop($vm) {
            Some(v) => v,
            None => {
                $vm.raise_msg("RuntimeError", "stack underflow");
                let _ = $opcode;
                break $label false;
            }
        }
    };
}

macro_rules! check {
    ($label:lifetime, $frame:expr, $vm:expr, $outcome:expr) => {
        match $outcome {
            Outcome::Ok(v) => v,
            Outcome::Raised => break $label false,
        }
    };
}

/// Runs `closure` to completion (or to an unhandled raise), returning
/// the closure's result or propagating the exception via `Outcome`.
pub fn run_closure(vm: &mut Vm, closure_ref: GcRef, args: GcRef) -> Outcome<GcRef> {
    let (bytecode_obj, context) = {
        let c = closure_ref
            .downcast::<ClosureData>()
            .expect("run_closure requires a closure object");
        (c.bytecode, c.context)
    };
    let code = match crate::kinds::bytes::as_byte_slice(bytecode_obj) {
        Some(b) => b,
        None => {
            vm.raise_msg("TypeError", "closure bytecode must be a bytes-like object");
            return Outcome::Raised;
        }
    };

    let locals = dup_dict(vm, context);
    vm.heap.root(locals);

    let mut frame = Frame {
        locals,
        stack: Vec::new(),
        trystack: Vec::new(),
        temproot: Vec::new(),
    };

    let mut cur = Cursor::new(code);
    let mut result: Option<GcRef> = None;

    'running: loop {
        frame.clear_temproot(vm);

        vm.heap.probe();
        if let Some(injected) = crate::thread::scheduler_probe(vm) {
            vm.set_pending_exception(injected);
            match frame.trystack.pop() {
                None => break 'running,
                Some(target) => {
                    for r in frame.stack.drain(..) {
                        vm.heap.unroot(r);
                    }
                    let exc = vm
                        .take_pending_exception()
                        .expect("scheduler_probe set the pending exception above");
                    frame.push(vm, exc);
                    cur.pos = target;
                    continue 'running;
                }
            }
        }

        if cur.at_end() {
            result = Some(vm.none);
            break 'running;
        }

        let opcode = match cur.next_opcode() {
            Some(o) => o,
            None => {
                result = Some(vm.none);
                break 'running;
            }
        };

        #[allow(clippy::diverging_sub_expression)]
        let ok = 'opcode: {
            break 'opcode match opcode {
                op::SWAP => {
                    let a1 = pop_or_underflow!('opcode, frame, vm, opcode);
                    let a2 = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.push(vm, a1);
                    frame.push(vm, a2);
                    true
                }
                op::POP => {
                    pop_or_underflow!('opcode, frame, vm, opcode);
                    true
                }
                op::DUP => {
                    let a1 = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.push(vm, a1);
                    frame.push(vm, a1);
                    true
                }
                op::DUP2 => {
                    let a2 = pop_or_underflow!('opcode, frame, vm, opcode);
                    let a1 = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.push(vm, a1);
                    frame.push(vm, a2);
                    frame.push(vm, a1);
                    frame.push(vm, a2);
                    true
                }
                op::BYTES => {
                    let Some(view) = cur.next_bytes_view() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    let owner = Some(bytecode_obj);
                    let payload = unsafe { crate::kinds::bytes::BytesViewData::new(view.as_ptr(), view.len(), owner) };
                    let ty = vm.type_named("bytes-view");
                    let r = match vm.heap.alloc(vm.current_group(), Box::new(payload), false) {
                        Some(r) => r,
                        None => {
                            vm.raise_memory_error();
                            break 'opcode false;
                        }
                    };
                    r.set_ty(ty);
                    frame.push(vm, r);
                    true
                }
                op::INT => {
                    let Some(n) = cur.next_signed() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    let v = vm.make_int(n);
                    frame.push(vm, v);
                    true
                }
                op::FLOAT => {
                    let Some(n) = cur.next_float() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    let v = vm.make_float(n);
                    frame.push(vm, v);
                    true
                }
                op::SLICE => {
                    let end = pop_or_underflow!('opcode, frame, vm, opcode);
                    let start = pop_or_underflow!('opcode, frame, vm, opcode);
                    let ty = vm.type_named("slice");
                    let r = match vm.heap.alloc(
                        vm.current_group(),
                        Box::new(crate::kinds::collections::SliceData { start, end }),
                        false,
                    ) {
                        Some(r) => r,
                        None => {
                            vm.raise_memory_error();
                            break 'opcode false;
                        }
                    };
                    r.set_ty(ty);
                    frame.push(vm, r);
                    true
                }
                op::NONE => {
                    let v = vm.none;
                    frame.push(vm, v);
                    true
                }
                op::TRUE => {
                    let v = vm.true_;
                    frame.push(vm, v);
                    true
                }
                op::FALSE => {
                    let v = vm.false_;
                    frame.push(vm, v);
                    true
                }
                op::TUPLE_0 | op::TUPLE_1 | op::TUPLE_2 | op::TUPLE_3 | op::TUPLE_4 | op::TUPLE_N => {
                    let count = if opcode == op::TUPLE_N {
                        match cur.next_unsigned() {
                            Some(n) => n as usize,
                            None => {
                                vm.raise_msg("RuntimeError", "out of bounds");
                                break 'opcode false;
                            }
                        }
                    } else {
                        (opcode - op::TUPLE_0) as usize
                    };
                    if frame.stack.len() < count {
                        vm.raise_msg("RuntimeError", "stack underflow");
                        break 'opcode false;
                    }
                    let items: Vec<GcRef> = frame.stack[frame.stack.len() - count..].to_vec();
                    for _ in 0..count {
                        frame.pop(vm);
                    }
                    let t = vm.make_tuple(items);
                    frame.push(vm, t);
                    true
                }
                op::CLOSURE => {
                    let code_obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    if code_obj.kind_name() != "bytes" && code_obj.kind_name() != "bytes-view" {
                        vm.raise_msg("TypeError", "Expected bytes");
                        break 'opcode false;
                    }
                    let ty = vm.type_named("closure");
                    let r = match vm.heap.alloc(
                        vm.current_group(),
                        Box::new(ClosureData {
                            bytecode: code_obj,
                            context: frame.locals,
                        }),
                        false,
                    ) {
                        Some(r) => r,
                        None => {
                            vm.raise_memory_error();
                            break 'opcode false;
                        }
                    };
                    r.set_ty(ty);
                    frame.push(vm, r);
                    true
                }
                op::CLOSURE_BIND => {
                    let code_obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    let Some(num_idents) = cur.next_unsigned() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    if code_obj.kind_name() != "bytes" && code_obj.kind_name() != "bytes-view" {
                        vm.raise_msg("TypeError", "Expected bytes");
                        break 'opcode false;
                    }
                    let new_context = vm.make_dict();
                    frame.temp(vm, new_context);
                    for _ in 0..num_idents {
                        let Some(name_bytes) = cur.next_bytes_view() else {
                            vm.raise_msg("RuntimeError", "out of bounds");
                            break 'opcode false;
                        };
                        let name = vm.make_bytes(name_bytes);
                        frame.temp(vm, name);
                        let locals_dict = frame.locals.downcast_mut::<DictData>().expect("locals is a dict");
                        let value = match locals_dict.core.get(vm, name) {
                            Outcome::Ok(Some(v)) => v,
                            Outcome::Ok(None) => {
                                vm.raise_exc_arg("AttributeError", name);
                                break 'opcode false;
                            }
                            Outcome::Raised => break 'opcode false,
                        };
                        let new_context_dict = new_context.downcast_mut::<DictData>().expect("just allocated as dict");
                        check!('opcode, frame, vm, new_context_dict.core.set(vm, name, value));
                    }
                    let ty = vm.type_named("closure");
                    let r = match vm.heap.alloc(
                        vm.current_group(),
                        Box::new(ClosureData {
                            bytecode: code_obj,
                            context: new_context,
                        }),
                        false,
                    ) {
                        Some(r) => r,
                        None => {
                            vm.raise_memory_error();
                            break 'opcode false;
                        }
                    };
                    r.set_ty(ty);
                    frame.push(vm, r);
                    true
                }
                op::EMPTY_DICT => {
                    let d = vm.make_dict();
                    frame.push(vm, d);
                    true
                }
                op::CLASS => {
                    let members = pop_or_underflow!('opcode, frame, vm, opcode);
                    let base = pop_or_underflow!('opcode, frame, vm, opcode);
                    let result = check!('opcode, frame, vm, make_class(vm, base, members));
                    frame.push(vm, result);
                    true
                }
                op::GET_ATTR => {
                    let name = pop_or_underflow!('opcode, frame, vm, opcode);
                    let obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    let result = check!('opcode, frame, vm, object::get_attr(vm, obj, name));
                    frame.push(vm, result);
                    true
                }
                op::SET_ATTR => {
                    let value = pop_or_underflow!('opcode, frame, vm, opcode);
                    let name = pop_or_underflow!('opcode, frame, vm, opcode);
                    let obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    check!('opcode, frame, vm, object::set_attr(vm, obj, name, value));
                    true
                }
                op::DEL_ATTR => {
                    let name = pop_or_underflow!('opcode, frame, vm, opcode);
                    let obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    check!('opcode, frame, vm, object::del_attr(vm, obj, name));
                    true
                }
                op::GET_ITEM => {
                    let key = pop_or_underflow!('opcode, frame, vm, opcode);
                    let obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.temp(vm, obj);
                    let getattr = check!('opcode, frame, vm, object::get_attr_by_str(vm, obj, "__getitem__"));
                    let args = vm.make_tuple(vec![key]);
                    frame.temp(vm, args);
                    let result = check!('opcode, frame, vm, object::call(vm, getattr, args));
                    frame.push(vm, result);
                    true
                }
                op::SET_ITEM => {
                    let val = pop_or_underflow!('opcode, frame, vm, opcode);
                    let key = pop_or_underflow!('opcode, frame, vm, opcode);
                    let obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.temp(vm, obj);
                    let setattr = check!('opcode, frame, vm, object::get_attr_by_str(vm, obj, "__setitem__"));
                    let args = vm.make_tuple(vec![key, val]);
                    frame.temp(vm, args);
                    check!('opcode, frame, vm, object::call(vm, setattr, args));
                    true
                }
                op::DEL_ITEM => {
                    let key = pop_or_underflow!('opcode, frame, vm, opcode);
                    let obj = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.temp(vm, obj);
                    let delattr = check!('opcode, frame, vm, object::get_attr_by_str(vm, obj, "__delitem__"));
                    let args = vm.make_tuple(vec![key]);
                    frame.temp(vm, args);
                    check!('opcode, frame, vm, object::call(vm, delattr, args));
                    true
                }
                op::GET_LOCAL => {
                    let name = pop_or_underflow!('opcode, frame, vm, opcode);
                    let locals = frame.locals.downcast_mut::<DictData>().expect("locals is a dict");
                    let v = match locals.core.get(vm, name) {
                        Outcome::Ok(Some(v)) => v,
                        Outcome::Ok(None) => {
                            vm.raise_exc_arg("AttributeError", name);
                            break 'opcode false;
                        }
                        Outcome::Raised => break 'opcode false,
                    };
                    frame.push(vm, v);
                    true
                }
                op::SET_LOCAL => {
                    let val = pop_or_underflow!('opcode, frame, vm, opcode);
                    let name = pop_or_underflow!('opcode, frame, vm, opcode);
                    let locals = frame.locals.downcast_mut::<DictData>().expect("locals is a dict");
                    check!('opcode, frame, vm, locals.core.set(vm, name, val));
                    true
                }
                op::DEL_LOCAL => {
                    let name = pop_or_underflow!('opcode, frame, vm, opcode);
                    let locals = frame.locals.downcast_mut::<DictData>().expect("locals is a dict");
                    match locals.core.remove(vm, name) {
                        Outcome::Ok(Some(_)) => true,
                        Outcome::Ok(None) => {
                            vm.raise_exc_arg("AttributeError", name);
                            false
                        }
                        Outcome::Raised => false,
                    }
                }
                op::LOAD_ARGS => {
                    frame.push(vm, args);
                    true
                }
                op::JUMP => {
                    let Some(target) = cur.next_offset() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    if target > cur.code.len() {
                        vm.raise_msg("RuntimeError", "jump target out of bounds");
                        break 'opcode false;
                    }
                    cur.pos = target;
                    true
                }
                op::JUMP_IF => {
                    let Some(target) = cur.next_offset() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    let cond = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.temp(vm, cond);
                    let boolfn = check!('opcode, frame, vm, object::get_attr_by_str(vm, cond, "__bool__"));
                    let empty_args = vm.empty_tuple;
                    let evaluated = check!('opcode, frame, vm, object::call(vm, boolfn, empty_args));
                    if evaluated.kind_name() != "bool" {
                        vm.raise_msg("TypeError", "__bool__ did not return bool");
                        break 'opcode false;
                    }
                    if bool_value(evaluated) {
                        if target > cur.code.len() {
                            vm.raise_msg("RuntimeError", "jump target out of bounds");
                            break 'opcode false;
                        }
                        cur.pos = target;
                    }
                    true
                }
                op::TRY => {
                    let Some(target) = cur.next_offset() else {
                        vm.raise_msg("RuntimeError", "out of bounds");
                        break 'opcode false;
                    };
                    frame.trystack.push(target);
                    true
                }
                op::TRY_END => {
                    if frame.trystack.pop().is_none() {
                        vm.raise_msg("RuntimeError", "try stack underflow");
                        break 'opcode false;
                    }
                    true
                }
                op::CALL => {
                    let call_args = pop_or_underflow!('opcode, frame, vm, opcode);
                    let target = pop_or_underflow!('opcode, frame, vm, opcode);
                    if call_args.kind_name() != "tuple" {
                        vm.raise_msg("TypeError", "Expected tuple");
                        break 'opcode false;
                    }
                    frame.temp(vm, call_args);
                    frame.temp(vm, target);
                    let result = check!('opcode, frame, vm, object::call(vm, target, call_args));
                    frame.push(vm, result);
                    true
                }
                op::SPAWN => {
                    let call_args = pop_or_underflow!('opcode, frame, vm, opcode);
                    let target = pop_or_underflow!('opcode, frame, vm, opcode);
                    if call_args.kind_name() != "tuple" {
                        vm.raise_msg("TypeError", "Expected tuple");
                        break 'opcode false;
                    }
                    frame.temp(vm, call_args);
                    frame.temp(vm, target);
                    let thread = check!('opcode, frame, vm, crate::thread::spawn(vm, target, call_args));
                    frame.push(vm, thread);
                    true
                }
                op::RAISE => {
                    let exc = pop_or_underflow!('opcode, frame, vm, opcode);
                    vm.set_pending_exception(exc);
                    false
                }
                op::RETURN => {
                    let v = pop_or_underflow!('opcode, frame, vm, opcode);
                    result = Some(v);
                    break 'running;
                }
                op::YIELD => {
                    let val = pop_or_underflow!('opcode, frame, vm, opcode);
                    check!('opcode, frame, vm, crate::thread::thread_yield(vm, val));
                    true
                }
                op::RAISE_IF_NOT_STOP => {
                    let e = pop_or_underflow!('opcode, frame, vm, opcode);
                    let stop_ty = vm.type_named("StopIteration");
                    if object::is_instance(vm, e, stop_ty) {
                        true
                    } else {
                        vm.set_pending_exception(e);
                        false
                    }
                }
                op::ADD | op::SUB | op::MUL | op::DIV | op::MOD | op::AND | op::OR | op::XOR | op::EQ
                | op::NE | op::GT | op::LT | op::GE | op::LE | op::SHL | op::SHR => {
                    let arg2 = pop_or_underflow!('opcode, frame, vm, opcode);
                    let arg1 = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.temp(vm, arg1);
                    frame.temp(vm, arg2);
                    let method_name = binop_dunder(opcode);
                    let method = check!('opcode, frame, vm, object::get_attr_by_str(vm, arg1, method_name));
                    let call_args = vm.make_tuple(vec![arg2]);
                    frame.temp(vm, call_args);
                    let result = check!('opcode, frame, vm, object::call(vm, method, call_args));
                    frame.push(vm, result);
                    true
                }
                op::NEG | op::NOT | op::INV => {
                    let arg1 = pop_or_underflow!('opcode, frame, vm, opcode);
                    frame.temp(vm, arg1);
                    let method_name = unop_dunder(opcode);
                    let method = check!('opcode, frame, vm, object::get_attr_by_str(vm, arg1, method_name));
                    let result = check!('opcode, frame, vm, object::call(vm, method, vm.empty_tuple));
                    frame.push(vm, result);
                    true
                }
                _ => {
                    vm.raise_msg("RuntimeError", "Bad opcode");
                    false
                }
            };
        };

        if ok {
            continue 'running;
        }

        match frame.trystack.pop() {
            None => break 'running,
            Some(target) => {
                for r in frame.stack.drain(..) {
                    vm.heap.unroot(r);
                }
                let exc = match vm.take_pending_exception() {
                    Some(e) => e,
                    None => {
                        vm.raise_memory_error();
                        vm.take_pending_exception().expect("raise_memory_error always sets one")
                    }
                };
                frame.push(vm, exc);
                cur.pos = target;
            }
        }
    }

    frame.drop_all(vm);

    match result {
        Some(v) => Outcome::Ok(v),
        None => Outcome::Raised,
    }
}

fn binop_dunder(opcode: u8) -> &'static str {
    match opcode {
        op::ADD => "__add__",
        op::SUB => "__sub__",
        op::MUL => "__mul__",
        op::DIV => "__div__",
        op::MOD => "__mod__",
        op::AND => "__and__",
        op::OR => "__or__",
        op::XOR => "__xor__",
        op::EQ => "__eq__",
        op::NE => "__ne__",
        op::GT => "__gt__",
        op::LT => "__lt__",
        op::GE => "__ge__",
        op::LE => "__le__",
        op::SHL => "__shl__",
        op::SHR => "__shr__",
        _ => unreachable!("binop_dunder called with a non-binop opcode"),
    }
}

fn unop_dunder(opcode: u8) -> &'static str {
    match opcode {
        op::NEG => "__neg__",
        op::NOT => "__not__",
        op::INV => "__inv__",
        _ => unreachable!("unop_dunder called with a non-unop opcode"),
    }
}

/// `CLASS` opcode / `type_constructor`'s 2-argument form: derive a new
/// type from `base` copying every (name, value) pair out of `members`.
fn make_class(vm: &mut Vm, base: GcRef, members: GcRef) -> Outcome<GcRef> {
    use crate::kinds::typesys::TypeData;
    if base.kind_name() != "type" {
        vm.raise_msg("TypeError", "Argument 1: expected type");
        return Outcome::Raised;
    }
    if members.kind_name() != "dict" {
        vm.raise_msg("TypeError", "Argument 2: expected dict");
        return Outcome::Raised;
    }
    let base_td = base.downcast::<TypeData>().expect("checked kind");
    let constructor = base_td.constructor;
    let type_ty = vm.type_named("type");
    let payload = Box::new(TypeData {
        name: String::from("<class>"),
        base_class: Some(base),
        constructor,
        members: std::cell::RefCell::new(PolyDict::new()),
    });
    let result = match vm.heap.alloc(vm.current_group(), payload, false) {
        Some(r) => r,
        None => {
            vm.raise_memory_error();
            return Outcome::Raised;
        }
    };
    result.set_ty(type_ty);
    log::debug!("constructed new class deriving from {:?}", base_td.name);
    let snapshot: Vec<(GcRef, GcRef)> = {
        let mut items = Vec::new();
        let md = members.downcast::<DictData>().expect("checked kind");
        md.core.for_each(|k, v| {
            items.push((k, v));
            true
        });
        items
    };
    let td = result.downcast::<TypeData>().expect("just allocated as a type");
    for (k, v) in snapshot {
        if let Outcome::Raised = td.members.borrow_mut().set(vm, k, v) {
            return Outcome::Raised;
        }
    }
    Outcome::Ok(result)
}
