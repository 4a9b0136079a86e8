//! The open-addressed, chained hash map keyed by arbitrary objects
//! (spec.md §3 "Dict invariants"). Used both for the user-visible `dict`
//! kind and, internally, for a type's member table and a `basic-object`'s
//! instance attributes — exactly as the original's `BasicObject` is
//! literally a `DictObject` with extra behavior layered on top.

use crate::error::Outcome;
use crate::gcref::{GcRef, ObjectBehavior};
use crate::object;
use crate::runtime::Vm;
use std::any::Any;
use std::mem::size_of;

struct Node {
    hash: u64,
    key: GcRef,
    value: GcRef,
    next: Option<Box<Node>>,
}

/// Growth factor from the original's `dict_expand`: `2*cap + 3`.
fn grown_capacity(cap: usize) -> usize {
    cap * 2 + 3
}

pub struct PolyDict {
    buckets: Vec<Option<Box<Node>>>,
    len: usize,
    generation: u64,
}

impl PolyDict {
    pub fn new() -> Self {
        PolyDict {
            buckets: Vec::new(),
            len: 0,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Read-only structural walk; does not invoke any dunder. Used by the
    /// GC tracer and by `dict.items()`/`dict.keys()` builtins. Returns
    /// `false` (without finishing) if the generation changes mid-walk —
    /// the "iteration detects concurrent mutation" property (spec.md §8).
    pub fn for_each(&self, mut f: impl FnMut(GcRef, GcRef) -> bool) -> bool {
        let seen_generation = self.generation;
        for bucket in &self.buckets {
            let mut cur = bucket;
            while let Some(node) = cur {
                if self.generation != seen_generation {
                    return false;
                }
                if !f(node.key, node.value) {
                    return false;
                }
                cur = &node.next;
            }
        }
        true
    }

    fn find<'a>(
        vm: &mut Vm,
        mut bucket: &'a mut Option<Box<Node>>,
        key: GcRef,
    ) -> Outcome<Option<&'a mut Box<Node>>> {
        loop {
            match bucket {
                None => return Outcome::Ok(None),
                Some(node) => {
                    let node_key = node.key;
                    match object::object_equals(vm, key, node_key) {
                        Outcome::Raised => return Outcome::Raised,
                        Outcome::Ok(true) => return Outcome::Ok(Some(node)),
                        Outcome::Ok(false) => {
                            bucket = &mut node.next;
                        }
                    }
                }
            }
        }
    }

    pub fn get(&mut self, vm: &mut Vm, key: GcRef) -> Outcome<Option<GcRef>> {
        if self.buckets.is_empty() {
            return Outcome::Ok(None);
        }
        let hash = match object::object_hasher(vm, key) {
            Outcome::Ok(h) => h,
            Outcome::Raised => return Outcome::Raised,
        };
        let idx = (hash as usize) % self.buckets.len();
        match Self::find(vm, &mut self.buckets[idx], key) {
            Outcome::Ok(Some(node)) => Outcome::Ok(Some(node.value)),
            Outcome::Ok(None) => Outcome::Ok(None),
            Outcome::Raised => Outcome::Raised,
        }
    }

    fn rehash(&mut self) {
        let new_cap = grown_capacity(self.buckets.len());
        log::trace!("dict rehash: {} -> {} buckets", self.buckets.len(), new_cap);
        let mut new_buckets: Vec<Option<Box<Node>>> = (0..new_cap).map(|_| None).collect();
        for bucket in self.buckets.drain(..) {
            let mut cur = bucket;
            while let Some(mut node) = cur {
                cur = node.next.take();
                let idx = (node.hash as usize) % new_cap;
                node.next = new_buckets[idx].take();
                new_buckets[idx] = Some(node);
            }
        }
        self.buckets = new_buckets;
    }

    pub fn set(&mut self, vm: &mut Vm, key: GcRef, value: GcRef) -> Outcome<()> {
        if self.len >= self.buckets.len() {
            self.rehash();
        }
        let hash = match object::object_hasher(vm, key) {
            Outcome::Ok(h) => h,
            Outcome::Raised => return Outcome::Raised,
        };
        let idx = (hash as usize) % self.buckets.len();
        match Self::find(vm, &mut self.buckets[idx], key) {
            Outcome::Raised => return Outcome::Raised,
            Outcome::Ok(Some(node)) => {
                node.key = key;
                node.value = value;
                return Outcome::Ok(());
            }
            Outcome::Ok(None) => {}
        }
        let node = Box::new(Node {
            hash,
            key,
            value,
            next: self.buckets[idx].take(),
        });
        self.buckets[idx] = Some(node);
        self.len += 1;
        self.generation += 1;
        Outcome::Ok(())
    }

    pub fn remove(&mut self, vm: &mut Vm, key: GcRef) -> Outcome<Option<GcRef>> {
        if self.buckets.is_empty() {
            return Outcome::Ok(None);
        }
        let hash = match object::object_hasher(vm, key) {
            Outcome::Ok(h) => h,
            Outcome::Raised => return Outcome::Raised,
        };
        let idx = (hash as usize) % self.buckets.len();
        let mut cur = &mut self.buckets[idx];
        loop {
            let Some(node) = cur else {
                return Outcome::Ok(None);
            };
            match object::object_equals(vm, key, node.key) {
                Outcome::Raised => return Outcome::Raised,
                Outcome::Ok(true) => break,
                Outcome::Ok(false) => {
                    cur = &mut cur.as_mut().expect("checked Some above").next;
                }
            }
        }
        let mut node = cur.take().expect("checked Some above");
        *cur = node.next.take();
        self.len -= 1;
        self.generation += 1;
        Outcome::Ok(Some(node.value))
    }
}

impl Default for PolyDict {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DictData {
    pub core: PolyDict,
}

impl ObjectBehavior for DictData {
    fn kind_name(&self) -> &'static str {
        "dict"
    }
    fn trace(&self, visitor: &mut dyn FnMut(GcRef) -> bool) -> bool {
        self.core.for_each(|k, v| visitor(k) && visitor(v))
    }
    fn byte_size(&self) -> usize {
        size_of::<Self>() + self.core.capacity() * size_of::<(u64, GcRef, GcRef)>()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Vm;
    use proptest::prelude::*;

    proptest! {
        /// A structural mutation (a genuinely new key) always bumps the
        /// generation counter; overwriting an existing key's value never
        /// does, since no bucket chain is touched (spec.md §8 "dict
        /// mutation detection" — `for_each` trusts this counter to decide
        /// whether a walk it is mid-way through is still valid).
        #[test]
        fn generation_changes_iff_a_new_key_is_inserted(keys in proptest::collection::vec(any::<i64>(), 1..40)) {
            let mut vm = Vm::bootstrap(1024 * 1024, 1000, 1000);
            let mut dict = PolyDict::new();
            let mut seen = std::collections::HashSet::new();

            for k in keys {
                let key = vm.make_int(k);
                let value = vm.make_int(0);
                let gen_before = dict.generation();
                let is_new = seen.insert(k);
                let outcome = dict.set(&mut vm, key, value);
                prop_assert!(matches!(outcome, Outcome::Ok(())));
                if is_new {
                    prop_assert!(dict.generation() > gen_before);
                } else {
                    prop_assert_eq!(dict.generation(), gen_before);
                }
            }
            prop_assert_eq!(dict.len(), seen.len());
        }
    }

    #[test]
    fn for_each_visits_every_entry_when_undisturbed() {
        let mut vm = Vm::bootstrap(1024 * 1024, 1000, 1000);
        let mut dict = PolyDict::new();
        for k in 0..20i64 {
            let key = vm.make_int(k);
            let value = vm.make_int(k * 2);
            assert!(matches!(dict.set(&mut vm, key, value), Outcome::Ok(())));
        }
        let mut visited = 0;
        let completed = dict.for_each(|_, _| {
            visited += 1;
            true
        });
        assert!(completed);
        assert_eq!(visited, 20);
    }
}
