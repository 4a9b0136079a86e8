//! Process-wide state: the heap, the type registry, the singletons, and
//! the in-flight exception slot. Grounded on `thread.c`'s file-scope
//! globals (`root_threadgroup`, `oly_thread`, `error`) — gathered here
//! into one struct instead of C statics, since Rust has no equivalent of
//! a translation unit's private globals without reaching for `static`.

use crate::error::Outcome;
use crate::gcref::GcRef;
use crate::kinds::bound_method::BoundMethodData;
use crate::kinds::bytes::BytesData;
use crate::kinds::collections::TupleData;
use crate::kinds::dict::{DictData, PolyDict};
use crate::kinds::exception::{ExceptionData, EXCEPTION_TYPE_NAMES};
use crate::kinds::primitives::{BoolData, FloatData, IntData, NoneData};
use crate::kinds::thread_kinds::ThreadGroupData;
use crate::kinds::typesys::{BasicObjectData, Constructor, TypeData};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

pub struct Vm {
    pub heap: crate::heap::Heap,
    types: HashMap<&'static str, GcRef>,
    pub none: GcRef,
    pub true_: GcRef,
    pub false_: GcRef,
    pub empty_tuple: GcRef,
    /// Free functions (`print`, `format`, `sleep`, ...) live here rather
    /// than on any type's member dict, mirroring the original's flat
    /// builtin-function table (`builtins.c`'s `BUILTIN_FUNCTION` macro).
    pub globals: GcRef,
    pub root_group: GcRef,
    /// Set while a thread runs; `None` only before bootstrap finishes.
    current_group: Cell<Option<GcRef>>,
    /// The in-flight exception, mirroring the original's thread-local `error`.
    pending_exception: RefCell<Option<GcRef>>,
}

impl Vm {
    pub fn bootstrap(heap_mem: u64, yield_interval: u64, gc_threshold: u32) -> Self {
        let mut heap = crate::heap::Heap::new(gc_threshold);

        let root_group_payload = Box::new(ThreadGroupData {
            mem_limit: Cell::new(heap_mem),
            mem_used: Cell::new(0),
            yield_interval: Cell::new(yield_interval),
        });
        let root_group = heap
            .alloc(None, root_group_payload, true)
            .expect("bootstrap allocation cannot fail: no quota is charged yet");
        heap.root(root_group);

        let mut vm = Vm {
            heap,
            types: HashMap::new(),
            none: root_group,
            true_: root_group,
            false_: root_group,
            empty_tuple: root_group,
            globals: root_group,
            root_group,
            current_group: Cell::new(Some(root_group)),
            pending_exception: RefCell::new(None),
        };

        vm.bootstrap_types();
        vm
    }

    fn new_type(
        &mut self,
        name: &'static str,
        base: Option<GcRef>,
        constructor: Constructor,
    ) -> GcRef {
        let payload = Box::new(TypeData {
            name: name.to_string(),
            base_class: base,
            constructor,
            members: RefCell::new(PolyDict::new()),
        });
        let group = self.root_group;
        let t = self
            .heap
            .alloc(Some(group), payload, true)
            .expect("bootstrap type allocation cannot fail");
        self.heap.root(t);
        self.types.insert(name, t);
        t
    }

    fn bootstrap_types(&mut self) {
        let type_ty = self.new_type("type", None, Constructor::Abstract);
        let object_ty = self.new_type("object", None, Constructor::Default);
        for t in [type_ty, object_ty] {
            t.set_ty(type_ty);
        }

        macro_rules! builtin_type {
            ($name:literal, $ctor:expr) => {{
                let t = self.new_type($name, Some(object_ty), $ctor);
                t.set_ty(type_ty);
                t
            }};
        }

        let none_ty = builtin_type!("nonetype", Constructor::Abstract);
        let bool_ty = builtin_type!("bool", Constructor::Abstract);
        let int_ty = builtin_type!("int", Constructor::Abstract);
        let float_ty = builtin_type!("float", Constructor::Abstract);
        let bytes_ty = builtin_type!("bytes", Constructor::Abstract);
        let _bytes_view_ty = builtin_type!("bytes-view", Constructor::Abstract);
        let _bytearray_ty = builtin_type!("bytearray", Constructor::Abstract);
        let tuple_ty = builtin_type!("tuple", Constructor::Abstract);
        let _list_ty = builtin_type!("list", Constructor::Abstract);
        let _slice_ty = builtin_type!("slice", Constructor::Abstract);
        let _list_iterator_ty = builtin_type!("list-iterator", Constructor::Abstract);
        let dict_ty = builtin_type!("dict", Constructor::Dict);
        let _closure_ty = builtin_type!("closure", Constructor::Abstract);
        let _bound_method_ty = builtin_type!("bound-method", Constructor::Abstract);
        let _builtin_fn_ty = builtin_type!("builtin-fn", Constructor::Abstract);
        let exception_ty = builtin_type!("exception", Constructor::Exception);
        let _thread_ty = builtin_type!("thread", Constructor::Native(crate::thread::thread_constructor));
        let thread_group_ty =
            builtin_type!("thread-group", Constructor::Native(crate::thread::group_constructor));
        self.root_group.set_ty(thread_group_ty);

        for name in EXCEPTION_TYPE_NAMES {
            self.new_type(name, Some(exception_ty), Constructor::Exception)
                .set_ty(type_ty);
        }

        let none = self
            .heap
            .alloc(Some(self.root_group), Box::new(NoneData), true)
            .expect("bootstrap allocation cannot fail");
        none.set_ty(none_ty);
        self.heap.root(none);
        self.none = none;

        let true_ = self
            .heap
            .alloc(Some(self.root_group), Box::new(BoolData(true)), true)
            .expect("bootstrap allocation cannot fail");
        true_.set_ty(bool_ty);
        self.heap.root(true_);
        self.true_ = true_;

        let false_ = self
            .heap
            .alloc(Some(self.root_group), Box::new(BoolData(false)), true)
            .expect("bootstrap allocation cannot fail");
        false_.set_ty(bool_ty);
        self.heap.root(false_);
        self.false_ = false_;

        let empty_tuple = self
            .heap
            .alloc(
                Some(self.root_group),
                Box::new(TupleData { items: Vec::new() }),
                true,
            )
            .expect("bootstrap allocation cannot fail");
        empty_tuple.set_ty(tuple_ty);
        self.heap.root(empty_tuple);
        self.empty_tuple = empty_tuple;

        let _ = (int_ty, float_ty, bytes_ty, dict_ty);

        let globals = self.make_dict();
        self.heap.root(globals);
        self.globals = globals;

        crate::builtins::install(self);
    }

    pub fn type_named(&self, name: &str) -> GcRef {
        *self
            .types
            .get(name)
            .unwrap_or_else(|| panic!("unregistered built-in type {name}"))
    }

    pub fn current_group(&self) -> Option<GcRef> {
        self.current_group.get()
    }

    pub fn set_current_group(&self, group: GcRef) {
        self.current_group.set(Some(group));
    }

    pub fn take_pending_exception(&self) -> Option<GcRef> {
        self.pending_exception.borrow_mut().take()
    }

    pub fn set_pending_exception(&self, exc: GcRef) {
        *self.pending_exception.borrow_mut() = Some(exc);
    }

    // -- allocation helpers, all charged to the current thread group --

    fn alloc_current(&mut self, payload: Box<dyn crate::gcref::ObjectBehavior>) -> Outcome<GcRef> {
        let group = self.current_group();
        match self.heap.alloc(group, payload, false) {
            Some(r) => Outcome::Ok(r),
            None => {
                self.raise_memory_error();
                Outcome::Raised
            }
        }
    }

    pub fn make_int(&mut self, v: i64) -> GcRef {
        let ty = self.type_named("int");
        match self.alloc_current(Box::new(IntData(v))) {
            Outcome::Ok(r) => {
                r.set_ty(ty);
                r
            }
            Outcome::Raised => self.none,
        }
    }

    pub fn make_float(&mut self, v: f64) -> GcRef {
        let ty = self.type_named("float");
        match self.alloc_current(Box::new(FloatData(v))) {
            Outcome::Ok(r) => {
                r.set_ty(ty);
                r
            }
            Outcome::Raised => self.none,
        }
    }

    pub fn make_bool(&self, v: bool) -> GcRef {
        if v {
            self.true_
        } else {
            self.false_
        }
    }

    pub fn make_bytes(&mut self, data: &[u8]) -> GcRef {
        let ty = self.type_named("bytes");
        match self.alloc_current(Box::new(BytesData {
            data: data.to_vec(),
        })) {
            Outcome::Ok(r) => {
                r.set_ty(ty);
                r
            }
            Outcome::Raised => self.none,
        }
    }

    pub fn make_tuple(&mut self, items: Vec<GcRef>) -> GcRef {
        if items.is_empty() {
            return self.empty_tuple;
        }
        let ty = self.type_named("tuple");
        match self.alloc_current(Box::new(TupleData { items })) {
            Outcome::Ok(r) => {
                r.set_ty(ty);
                r
            }
            Outcome::Raised => self.none,
        }
    }

    /// Installs a free function (or any value) into the globals dict.
    pub fn globals_set(&mut self, key: GcRef, value: GcRef) {
        let d = self
            .globals
            .downcast_mut::<DictData>()
            .expect("globals is always a dict");
        let _ = d.core.set(self, key, value);
    }

    pub fn make_dict(&mut self) -> GcRef {
        let ty = self.type_named("dict");
        match self.alloc_current(Box::new(DictData {
            core: PolyDict::new(),
        })) {
            Outcome::Ok(r) => {
                r.set_ty(ty);
                r
            }
            Outcome::Raised => self.none,
        }
    }

    pub fn make_bound_method(&mut self, method: GcRef, receiver: GcRef) -> GcRef {
        let ty = self.type_named("bound-method");
        match self.alloc_current(Box::new(BoundMethodData { method, receiver })) {
            Outcome::Ok(r) => {
                r.set_ty(ty);
                r
            }
            Outcome::Raised => self.none,
        }
    }

    pub fn construct_basic_object(&mut self, class: GcRef, args: GcRef) -> Outcome<GcRef> {
        let group = self.current_group();
        let payload = Box::new(BasicObjectData {
            attrs: RefCell::new(PolyDict::new()),
        });
        let result = match self.heap.alloc(group, payload, false) {
            Some(r) => r,
            None => {
                self.raise_memory_error();
                return Outcome::Raised;
            }
        };
        result.set_ty(class);
        self.heap.root(result);
        let init = crate::object::get_attr_by_str(self, result, "__init__");
        let outcome = match init {
            Outcome::Ok(init_method) => crate::object::call(self, init_method, args).map(|_| result),
            Outcome::Raised => {
                self.take_pending_exception();
                Outcome::Ok(result)
            }
        };
        self.heap.unroot(result);
        outcome
    }

    pub fn construct_exception(&mut self, class: GcRef, args: GcRef) -> Outcome<GcRef> {
        let group = self.current_group();
        let payload = Box::new(ExceptionData { args });
        let result = match self.heap.alloc(group, payload, false) {
            Some(r) => r,
            None => {
                self.raise_memory_error();
                return Outcome::Raised;
            }
        };
        result.set_ty(class);
        Outcome::Ok(result)
    }

    // -- raising --

    pub fn raise_msg(&mut self, type_name: &str, msg: &str) {
        let ty = self.type_named(type_name);
        let msg_obj = self.make_bytes(msg.as_bytes());
        let args = self.make_tuple(vec![msg_obj]);
        match self.construct_exception(ty, args) {
            Outcome::Ok(exc) => self.set_pending_exception(exc),
            Outcome::Raised => {}
        }
    }

    pub fn raise_exc_arg(&mut self, type_name: &str, arg: GcRef) {
        let ty = self.type_named(type_name);
        let args = self.make_tuple(vec![arg]);
        match self.construct_exception(ty, args) {
            Outcome::Ok(exc) => self.set_pending_exception(exc),
            Outcome::Raised => {}
        }
    }

    /// Pre-allocated so it can be raised even when allocation just failed
    /// (spec.md §7). Built once at bootstrap and reused thereafter.
    pub fn raise_memory_error(&mut self) {
        if let Some(singleton) = unsafe { crate::heap::MEMORY_ERROR } {
            self.set_pending_exception(singleton);
            return;
        }
        let ty = self.type_named("MemoryError");
        let exc = crate::kinds::exception::ExceptionData {
            args: self.empty_tuple,
        };
        let r = self
            .heap
            .alloc(Some(self.root_group), Box::new(exc), true)
            .expect("the MemoryError singleton is allocated once, before any quota is exhausted");
        r.set_ty(ty);
        self.heap.root(r);
        unsafe {
            crate::heap::MEMORY_ERROR = Some(r);
        }
        self.set_pending_exception(r);
    }
}
