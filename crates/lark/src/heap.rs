//! Reference-counted arena that backs all heap runtime values, plus the
//! mark-sweep pass that reclaims reference cycles.
//!
//! Uses a free list to reuse slots from freed values, keeping memory usage
//! flat for long-running loops that repeatedly allocate and free. When a
//! value is freed via `dec_ref`, its slot is added to the free list; new
//! allocations pop from it when possible.
//!
//! Slot ids are reused, so anything holding a heap id *weakly* (WeakMap and
//! WeakSet keys) must also hold the slot generation and validate it before
//! trusting the id. Strong references are counted and never dangle.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

use ahash::AHashSet;
use num_bigint::BigInt;

use crate::{
    env::EnvFrame,
    error::RunError,
    function::JsFunction,
    nativefn::BoundNative,
    gc::{ALLOC_BASE_COST, GcController, GcStats, HeapLimitBreach},
    generator::JsGenerator,
    object::{JsArray, JsObject},
    promise::JsPromise,
    types::{JsError, JsMap, JsRegex, JsSet, JsWeakMap, JsWeakSet, TypedArray},
    value::Value,
};

/// Index of a value in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Payload stored in one heap slot.
///
/// Every variant yields its outgoing strong edges through [`Self::trace`];
/// the same edges are the ones `dec_ref` releases, so the refcount tier and
/// the cycle tier always agree on ownership.
#[derive(Debug)]
pub(crate) enum HeapData {
    /// A string too long for the intern table, or built at runtime.
    String(Box<str>),
    /// Arbitrary-precision integer.
    BigInt(BigInt),
    /// Ordinary object: shaped slots or dictionary-mode ordered map.
    Object(JsObject),
    /// Dense array with `length` truncate/extend semantics.
    Array(JsArray),
    /// Scripted function: definition + captured environment.
    Function(JsFunction),
    /// Native function with pre-bound payload values.
    BoundNative(BoundNative),
    Promise(JsPromise),
    /// Paused generator body: frozen continuation + mailboxes.
    Generator(JsGenerator),
    Map(JsMap),
    Set(JsSet),
    /// Weak-keyed map: values traced, keys validated by generation.
    WeakMap(JsWeakMap),
    WeakSet(JsWeakSet),
    Error(JsError),
    TypedArray(TypedArray),
    Regex(JsRegex),
    /// Lexical binding frame. Heap-resident so closure capture cycles are
    /// collectable.
    Environment(EnvFrame),
}

impl HeapData {
    /// Variant name used by error messages and heap statistics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::BigInt(_) => "BigInt",
            Self::Object(_) => "Object",
            Self::Array(_) => "Array",
            Self::Function(_) => "Function",
            Self::BoundNative(_) => "Function",
            Self::Promise(_) => "Promise",
            Self::Generator(_) => "Generator",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::WeakMap(_) => "WeakMap",
            Self::WeakSet(_) => "WeakSet",
            Self::Error(_) => "Error",
            Self::TypedArray(_) => "TypedArray",
            Self::Regex(_) => "Regex",
            Self::Environment(_) => "Environment",
        }
    }

    /// Pushes every strong outgoing heap edge onto `out`.
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::String(_) | Self::BigInt(_) | Self::TypedArray(_) | Self::Regex(_) => {}
            Self::Object(obj) => obj.trace(out),
            Self::Array(arr) => arr.trace(out),
            Self::Function(f) => f.trace(out),
            Self::BoundNative(b) => b.trace(out),
            Self::Promise(p) => p.trace(out),
            Self::Generator(g) => g.trace(out),
            Self::Map(m) => m.trace(out),
            Self::Set(s) => s.trace(out),
            Self::WeakMap(wm) => wm.trace(out),
            Self::WeakSet(_) => {}
            Self::Error(e) => e.trace(out),
            Self::Environment(env) => env.trace(out),
        }
    }

    /// Approximate byte cost, used for GC accounting.
    pub fn estimate_size(&self) -> usize {
        ALLOC_BASE_COST
            + match self {
                Self::String(s) => s.len(),
                Self::BigInt(b) => b.bits() as usize / 8 + 8,
                Self::Object(obj) => obj.estimate_size(),
                Self::Array(arr) => arr.estimate_size(),
                Self::Function(f) => f.estimate_size(),
                Self::BoundNative(b) => b.estimate_size(),
                Self::Promise(p) => p.estimate_size(),
                Self::Generator(g) => g.estimate_size(),
                Self::Map(m) => m.estimate_size(),
                Self::Set(s) => s.estimate_size(),
                Self::WeakMap(wm) => wm.estimate_size(),
                Self::WeakSet(ws) => ws.estimate_size(),
                Self::Error(e) => e.estimate_size(),
                Self::TypedArray(ta) => ta.estimate_size(),
                Self::Regex(r) => r.estimate_size(),
                Self::Environment(env) => env.estimate_size(),
            }
    }
}

/// One arena slot: refcount + payload.
///
/// The payload is an `Option` to support temporary borrowing: callers that
/// need mutable access to both the data and the heap `take` the data out,
/// work, then restore it. The refcount stays accessible during the borrow.
#[derive(Debug)]
struct HeapValue {
    refcount: AtomicUsize,
    data: Option<HeapData>,
}

/// Snapshot of heap occupancy, for observability.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    /// Live objects on the heap.
    pub live_objects: usize,
    /// Recycled slots awaiting reuse.
    pub free_slots: usize,
    /// Total slots (live + free).
    pub total_slots: usize,
    /// Live objects broken down by kind name. `BTreeMap` keeps the order
    /// deterministic for display and comparison.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// The reference-counted arena.
#[derive(Debug)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapValue>>,
    /// Per-slot reuse counters validating weak references.
    generations: Vec<u32>,
    /// Freed slot ids available for reuse.
    free_list: Vec<HeapId>,
    /// Ids of live WeakMap/WeakSet values, visited after every mark phase.
    weak_containers: AHashSet<HeapId>,
    /// Allocation policy and statistics.
    gc: GcController,
}

impl From<HeapLimitBreach> for RunError {
    fn from(breach: HeapLimitBreach) -> Self {
        Self::Fatal(crate::error::FatalError::heap_limit(
            breach.current,
            breach.limit,
            breach.requested,
        ))
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            weak_containers: AHashSet::new(),
            gc: GcController::new(),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::new()
    }

    pub fn gc_mut(&mut self) -> &mut GcController {
        &mut self.gc
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc.stats()
    }

    /// Allocates a new heap value with an initial reference count of 1.
    ///
    /// Runs an automatic cycle-collection pass when one is due. A request
    /// that would cross the heap-limit ceiling forces a collection and is
    /// retried once; if the ceiling is still exceeded the breach is
    /// returned (and surfaces as a fatal, script-uncatchable error).
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, HeapLimitBreach> {
        if self.gc.should_collect() {
            self.collect_garbage();
        }
        let size = data.estimate_size();
        if let Err(_breach) = self.gc.on_allocate(size) {
            self.collect_garbage();
            self.gc.on_allocate(size)?;
        }
        let is_weak_container = matches!(data, HeapData::WeakMap(_) | HeapData::WeakSet(_));
        let new_entry = HeapValue {
            refcount: AtomicUsize::new(1),
            data: Some(data),
        };
        let id = if let Some(id) = self.free_list.pop() {
            let index = id.index();
            self.generations[index] = self.generations[index].wrapping_add(1);
            self.entries[index] = Some(new_entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.generations.push(0);
            self.entries.push(Some(new_entry));
            id
        };
        if is_weak_container {
            self.weak_containers.insert(id);
        }
        Ok(id)
    }

    /// Increments the reference count of a live heap value.
    ///
    /// Interior mutability on the count means shared heap access suffices,
    /// which avoids borrow conflicts during property and prototype walks.
    pub fn inc_ref(&self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: value already freed");
        value.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the reference count, freeing the value (and releasing its
    /// children) when the count reaches zero.
    pub fn dec_ref(&mut self, id: HeapId) {
        let value = {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: value already freed");
            let count = entry.refcount.load(Ordering::Relaxed);
            if count > 1 {
                entry.refcount.store(count - 1, Ordering::Relaxed);
                return;
            }
            slot.take().expect("Heap::dec_ref: value already freed")
        };

        self.weak_containers.remove(&id);
        self.free_list.push(id);

        if let Some(data) = value.data {
            self.gc.on_free(data.estimate_size());
            let mut children = Vec::new();
            data.trace(&mut children);
            drop(data);
            for child in children {
                self.dec_ref(child);
            }
        }
    }

    /// Current reference count; test/debug helper.
    #[cfg(test)]
    pub fn ref_count(&self, id: HeapId) -> usize {
        self.entries[id.index()]
            .as_ref()
            .map_or(0, |e| e.refcount.load(Ordering::Relaxed))
    }

    /// Returns the heap data stored at `id`.
    ///
    /// # Panics
    /// Panics when the id is stale or the data is currently taken.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: value already freed")
            .data
            .as_ref()
            .expect("Heap::get: data currently borrowed")
    }

    #[must_use]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: value already freed")
            .data
            .as_mut()
            .expect("Heap::get_mut: data currently borrowed")
    }

    /// Non-panicking variant of [`Self::get`].
    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index())?.as_ref()?.data.as_ref()
    }

    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(|slot| slot.is_some())
    }

    /// Slot generation for weak-reference validation.
    #[must_use]
    pub fn generation(&self, id: HeapId) -> u32 {
        self.generations[id.index()]
    }

    /// Takes the payload out of a slot for a heap-and-data mutable borrow.
    /// Must be paired with [`Self::restore_data`].
    pub fn take_data(&mut self, id: HeapId) -> HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::take_data: slot missing")
            .as_mut()
            .expect("Heap::take_data: value already freed")
            .data
            .take()
            .expect("Heap::take_data: data already borrowed")
    }

    pub fn restore_data(&mut self, id: HeapId, data: HeapData) {
        let slot = self
            .entries
            .get_mut(id.index())
            .expect("Heap::restore_data: slot missing")
            .as_mut()
            .expect("Heap::restore_data: value already freed");
        debug_assert!(slot.data.is_none(), "Heap::restore_data: data not taken");
        slot.data = Some(data);
    }

    /// Whether an automatic cycle-collection pass is due.
    pub fn should_collect(&self) -> bool {
        self.gc.should_collect()
    }

    /// Runs a mark-sweep pass over the arena.
    ///
    /// The root set is inferred from the reference counts: an object whose
    /// count exceeds the number of trace edges pointing at it from inside
    /// the heap is held externally (environment chain, evaluator value and
    /// frame stacks, microtask queue, reaction lists, parked tasks, host
    /// handles) and is a root. Everything reachable from a root through
    /// trace edges survives; everything else is freed. Weak-container
    /// entries whose key died are purged before the sweep.
    ///
    /// Returns the number of objects reclaimed.
    pub fn collect_garbage(&mut self) -> usize {
        if !self.gc.begin_collect() {
            return 0;
        }
        let started = Instant::now();

        // Root discovery: count internal (heap-to-heap) references per
        // slot. Counts above the internal total mean external holders.
        let mut incoming = vec![0usize; self.entries.len()];
        let mut edges = Vec::new();
        for slot in self.entries.iter().flatten() {
            if let Some(data) = slot.data.as_ref() {
                edges.clear();
                data.trace(&mut edges);
                for child in &edges {
                    incoming[child.index()] += 1;
                }
            }
        }
        let mut work_list: Vec<HeapId> = Vec::new();
        for (index, slot) in self.entries.iter().enumerate() {
            if let Some(entry) = slot {
                let count = entry.refcount.load(Ordering::Relaxed);
                if count > incoming[index] {
                    work_list.push(HeapId(index));
                }
            }
        }

        // Mark phase: worklist BFS from the roots. A plain bool-per-slot
        // bitmap avoids hashing on the hot path.
        let mut reachable = vec![false; self.entries.len()];
        while let Some(id) = work_list.pop() {
            let index = id.index();
            if index >= reachable.len() || reachable[index] {
                continue;
            }
            reachable[index] = true;
            if let Some(Some(entry)) = self.entries.get(index)
                && let Some(data) = entry.data.as_ref()
            {
                data.trace(&mut work_list);
            }
        }

        // Weak purge: drop entries whose key is gone or unreachable, before
        // any of the dead objects are freed.
        let weak_ids: Vec<HeapId> = self.weak_containers.iter().copied().collect();
        let mut dropped_values: Vec<Value> = Vec::new();
        for weak_id in weak_ids {
            if !self.is_live(weak_id) || !reachable[weak_id.index()] {
                continue;
            }
            let mut data = self.take_data(weak_id);
            match &mut data {
                HeapData::WeakMap(wm) => {
                    wm.purge(&self.generations, &reachable, &mut dropped_values);
                }
                HeapData::WeakSet(ws) => {
                    ws.purge(&self.generations, &reachable);
                }
                _ => {}
            }
            self.restore_data(weak_id, data);
        }
        for value in dropped_values {
            value.drop_with_heap(self);
        }
        // Re-run the liveness bitmap bounds: purging may have freed slots,
        // but freed slots are `None` and the sweep skips them.

        // Sweep phase: free every unmarked value. References swept objects
        // held into the surviving graph are released afterwards so survivor
        // counts stay exact.
        let mut cycles = 0;
        let mut swept = 0;
        let mut survivor_releases: Vec<HeapId> = Vec::new();
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if index < reachable.len() && reachable[index] {
                continue;
            }
            let Some(entry) = slot.take() else { continue };
            let id = HeapId(index);
            self.weak_containers.remove(&id);
            self.free_list.push(id);
            swept += 1;
            if entry.refcount.load(Ordering::Relaxed) > 0 {
                // Still referenced yet unreachable: a cycle member (or an
                // object owned only by cycle members).
                cycles += 1;
            }
            if let Some(data) = entry.data {
                self.gc.on_free(data.estimate_size());
                let mut children = Vec::new();
                data.trace(&mut children);
                for child in children {
                    if child.index() < reachable.len() && reachable[child.index()] {
                        survivor_releases.push(child);
                    }
                }
            }
        }
        for child in survivor_releases {
            if self.is_live(child) {
                self.dec_ref(child);
            }
        }

        self.gc.end_collect(cycles, started.elapsed());
        swept
    }

    /// Occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for slot in self.entries.iter().flatten() {
            if let Some(data) = slot.data.as_ref() {
                live_objects += 1;
                *objects_by_type.entry(data.type_name()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_zero_frees_immediately_and_reuses_the_slot() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::String("refcount target".into())).unwrap();
        assert!(heap.is_live(id));
        heap.inc_ref(id);
        heap.dec_ref(id);
        assert!(heap.is_live(id), "count 2 -> 1 must not free");
        heap.dec_ref(id);
        assert!(!heap.is_live(id), "count 1 -> 0 must free");

        let reused = heap.allocate(HeapData::String("slot reuse".into())).unwrap();
        assert_eq!(reused, id, "freed slot should be reused");
        assert_eq!(heap.generation(reused), 1, "reuse must bump the generation");
    }

    #[test]
    fn dec_ref_releases_children() {
        let mut heap = Heap::new();
        let child = heap.allocate(HeapData::String("child".into())).unwrap();
        let mut arr = JsArray::new();
        arr.push(Value::Ref(child)); // ownership of the count moves in
        let parent = heap.allocate(HeapData::Array(arr)).unwrap();
        heap.dec_ref(parent);
        assert!(!heap.is_live(child), "freeing the array must release the element");
    }

    #[test]
    fn mark_sweep_reclaims_unrooted_cycles_and_keeps_rooted_ones() {
        let mut heap = Heap::new();
        // a <-> b cycle, plus a rooted object.
        let a = heap.allocate(HeapData::Array(JsArray::new())).unwrap();
        let b = heap.allocate(HeapData::Array(JsArray::new())).unwrap();
        heap.inc_ref(b);
        match heap.get_mut(a) {
            HeapData::Array(arr) => arr.push(Value::Ref(b)),
            _ => unreachable!(),
        }
        heap.inc_ref(a);
        match heap.get_mut(b) {
            HeapData::Array(arr) => arr.push(Value::Ref(a)),
            _ => unreachable!(),
        }
        let rooted = heap.allocate(HeapData::String("rooted".into())).unwrap();
        // Drop the external counts on the cycle; the arena now holds a and b
        // only through each other, while `rooted` is still held by this test.
        heap.dec_ref(a);
        heap.dec_ref(b);
        assert!(heap.is_live(a) && heap.is_live(b), "cycle survives refcounting");

        let swept = heap.collect_garbage();
        assert!(swept >= 2, "cycle of 2 must be swept, got {swept}");
        assert!(!heap.is_live(a) && !heap.is_live(b));
        assert!(heap.is_live(rooted), "rooted object must survive the sweep");
        assert!(heap.gc_stats().cycles_detected >= 1);
        assert_eq!(heap.gc_stats().collections, 1);
    }
}
