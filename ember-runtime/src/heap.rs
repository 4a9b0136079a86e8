//! The quota-checked allocator and the stop-the-world mark/sweep collector
//! (spec.md §4.B, grounded on `gc.c`).
//!
//! Unlike the original, root tracking here is refcounted: holding a
//! [`Root`] guard increments a per-object count instead of a boolean
//! membership test, so rooting the same object twice and dropping one
//! root leaves it correctly rooted (the original's own comment flags
//! this as a known bug — `gc_root`/`gc_unroot` in `gc.c`).

use crate::gcref::{GcRef, Header, ObjBox, ObjectBehavior};
use crate::kinds::thread_kinds::ThreadGroupData;
use std::collections::HashMap;
use std::ptr::NonNull;

pub struct GcStats {
    pub marked: usize,
    pub freed: usize,
    pub freed_bytes: usize,
}

pub struct Heap {
    all_objects: Vec<GcRef>,
    roots: HashMap<GcRef, u32>,
    probe_counter: u32,
    pub gc_threshold: u32,
}

/// A single `MemoryError` singleton the original pre-allocates so it can
/// be raised even when a fresh allocation is impossible (spec.md §7).
pub static mut MEMORY_ERROR: Option<GcRef> = None;

impl Heap {
    pub fn new(gc_threshold: u32) -> Self {
        Heap {
            all_objects: Vec::new(),
            roots: HashMap::new(),
            probe_counter: 0,
            gc_threshold,
        }
    }

    /// Allocate a new object in `group`, charging its `byte_size` to the
    /// group's quota. Returns `None` on quota exhaustion — the caller is
    /// responsible for raising `MemoryError` (heap.rs carries no notion of
    /// language-level exceptions).
    pub fn alloc(
        &mut self,
        group: Option<GcRef>,
        payload: Box<dyn ObjectBehavior>,
        is_static: bool,
    ) -> Option<GcRef> {
        let size = payload.byte_size() as u64;
        if let Some(g) = group {
            let gd = g
                .downcast::<ThreadGroupData>()
                .expect("allocation group must be a thread-group object");
            let used = gd.mem_used.get();
            if used + size > gd.mem_limit.get() {
                return None;
            }
            gd.mem_used.set(used + size);
        }
        let boxed = Box::new(ObjBox {
            header: Header {
                ty: std::cell::Cell::new(None),
                group: std::cell::Cell::new(group),
                mark: std::cell::Cell::new(false),
                is_static,
            },
            payload,
        });
        let ptr = NonNull::new(Box::into_raw(boxed)).expect("Box::into_raw is never null");
        let r = GcRef::from_raw(ptr);
        self.all_objects.push(r);
        Some(r)
    }

    pub fn root(&mut self, obj: GcRef) {
        *self.roots.entry(obj).or_insert(0) += 1;
    }

    pub fn unroot(&mut self, obj: GcRef) {
        if let Some(count) = self.roots.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                self.roots.remove(&obj);
            }
        }
    }

    /// Move `size` bytes of billing from `obj`'s current group to `dest`,
    /// then rewrite its header (spec.md §5 "donate").
    pub fn donate(&mut self, obj: GcRef, dest: GcRef) -> Result<(), &'static str> {
        let size = obj.payload().byte_size() as u64;
        let dest_group = dest
            .downcast::<ThreadGroupData>()
            .ok_or("donate target must be a thread-group")?;
        if dest_group.mem_used.get() + size > dest_group.mem_limit.get() {
            return Err("destination group has insufficient quota");
        }
        if let Some(src) = obj.group() {
            if let Some(src_group) = src.downcast::<ThreadGroupData>() {
                src_group.mem_used.set(src_group.mem_used.get() - size);
            }
        }
        dest_group.mem_used.set(dest_group.mem_used.get() + size);
        obj.header().group.set(Some(dest));
        Ok(())
    }

    /// Four-phase stop-the-world collection, in lockstep with `gc_collect`:
    /// unmark everything, mark reachable from roots, finalize the
    /// unmarked, then free them and refund their quota.
    pub fn collect(&mut self) -> GcStats {
        for obj in &self.all_objects {
            obj.set_mark(false);
        }

        let root_objs: Vec<GcRef> = self.roots.keys().copied().collect();
        for r in root_objs {
            mark_from(r);
        }

        let mut marked = 0;
        let mut freed = 0;
        let mut freed_bytes = 0;
        let mut retained = Vec::with_capacity(self.all_objects.len());
        for obj in self.all_objects.drain(..) {
            if obj.mark() || obj.is_static() {
                marked += 1;
                retained.push(obj);
            } else {
                obj.payload_mut().finalize();
                freed += 1;
                freed_bytes += obj.payload().byte_size();
                if let Some(g) = obj.group() {
                    if let Some(gd) = g.downcast::<ThreadGroupData>() {
                        gd.mem_used.set(gd.mem_used.get().saturating_sub(
                            obj.payload().byte_size() as u64,
                        ));
                    }
                }
                // `threadgroup_finalize`: a collected child thread-group
                // refunds the quota it carved out of its parent.
                if let (Some(child), Some(parent)) = (obj.downcast::<ThreadGroupData>(), obj.group()) {
                    if let Some(parent_gd) = parent.downcast::<ThreadGroupData>() {
                        parent_gd
                            .mem_limit
                            .set(parent_gd.mem_limit.get() + child.mem_limit.get());
                        parent_gd
                            .yield_interval
                            .set(parent_gd.yield_interval.get() + child.yield_interval.get());
                    }
                }
                unsafe {
                    drop(Box::from_raw(obj.as_raw().as_ptr()));
                }
            }
        }
        self.all_objects = retained;

        log::debug!(
            "gc collect: {} scanned, {} marked, {} freed, {} bytes reclaimed",
            marked + freed,
            marked,
            freed,
            freed_bytes
        );

        GcStats {
            marked,
            freed,
            freed_bytes,
        }
    }

    /// Increment the between-instruction probe counter; collects once it
    /// crosses `gc_threshold` (spec.md §5, mirroring `gc_probe`'s
    /// fixed-1000 counter but made configurable via `EMBER_GC_THRESHOLD`).
    pub fn probe(&mut self) -> Option<GcStats> {
        self.probe_counter += 1;
        if self.probe_counter >= self.gc_threshold {
            self.probe_counter = 0;
            Some(self.collect())
        } else {
            None
        }
    }

    pub fn object_count(&self) -> usize {
        self.all_objects.len()
    }
}

fn mark_from(obj: GcRef) {
    if obj.mark() {
        return;
    }
    obj.set_mark(true);
    if let Some(ty) = obj.ty() {
        mark_from(ty);
    }
    obj.payload().trace(&mut |child| {
        mark_from(child);
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::primitives::IntData;
    use proptest::prelude::*;

    fn make_group(heap: &mut Heap, mem_limit: u64) -> GcRef {
        let payload = Box::new(ThreadGroupData {
            mem_limit: std::cell::Cell::new(mem_limit),
            mem_used: std::cell::Cell::new(0),
            yield_interval: std::cell::Cell::new(1000),
        });
        heap.alloc(None, payload, true)
            .expect("a group itself is allocated unmetered (group: None)")
    }

    proptest! {
        /// No sequence of allocations against a fixed-quota group can ever
        /// push `mem_used` past `mem_limit` (spec.md §8 "quota accounting");
        /// `alloc` must reject rather than overdraw.
        #[test]
        fn mem_used_never_exceeds_mem_limit(limit in 32u64..2048, attempts in 0usize..300) {
            let mut heap = Heap::new(u32::MAX);
            let group = make_group(&mut heap, limit);
            for _ in 0..attempts {
                let _ = heap.alloc(Some(group), Box::new(IntData(0)), false);
                let gd = group.downcast::<ThreadGroupData>().expect("just allocated as a group");
                prop_assert!(gd.mem_used.get() <= gd.mem_limit.get());
            }
        }
    }

    #[test]
    fn alloc_fails_once_quota_is_exhausted() {
        let mut heap = Heap::new(u32::MAX);
        let group = make_group(&mut heap, 1);
        assert!(heap.alloc(Some(group), Box::new(IntData(0)), false).is_none());
    }
}
