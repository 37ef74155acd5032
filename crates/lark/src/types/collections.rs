//! Map, Set, and their weak-keyed counterparts.
//!
//! Strong collections keep entries in insertion order and compare keys with
//! SameValueZero. The weak collections hold keys as `(slot, generation)`
//! pairs that are never traced and never counted: an entry whose key slot
//! died or was reused is invisible on access and purged by the collector
//! after every mark phase. WeakMap values are ordinary strong references.

use crate::{
    heap::{Heap, HeapId},
    value::Value,
};

/// SameValueZero: strict equality except `NaN` equals `NaN`.
pub(crate) fn same_value_zero(a: &Value, b: &Value, heap: &Heap) -> bool {
    if let (Value::Number(x), Value::Number(y)) = (a, b)
        && x.is_nan()
        && y.is_nan()
    {
        return true;
    }
    a.strict_equals(b, heap)
}

/// An insertion-ordered map with arbitrary-value keys.
#[derive(Debug, Default)]
pub(crate) struct JsMap {
    entries: Vec<(Value, Value)>,
}

impl JsMap {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    fn find(&self, key: &Value, heap: &Heap) -> Option<usize> {
        self.entries.iter().position(|(k, _)| same_value_zero(k, key, heap))
    }

    #[must_use]
    pub fn get(&self, key: &Value, heap: &Heap) -> Option<&Value> {
        self.find(key, heap).map(|i| &self.entries[i].1)
    }

    #[must_use]
    pub fn has(&self, key: &Value, heap: &Heap) -> bool {
        self.find(key, heap).is_some()
    }

    /// Inserts or updates. Consumes `key`/`value`; returns displaced values
    /// for release.
    pub fn set(&mut self, key: Value, value: Value, heap: &Heap) -> Vec<Value> {
        match self.find(&key, heap) {
            Some(i) => {
                let old = std::mem::replace(&mut self.entries[i].1, value);
                vec![key, old]
            }
            None => {
                self.entries.push((key, value));
                Vec::new()
            }
        }
    }

    /// Removes an entry, returning its owned key and value for release.
    pub fn delete(&mut self, key: &Value, heap: &Heap) -> Option<(Value, Value)> {
        self.find(key, heap).map(|i| self.entries.remove(i))
    }

    /// Drains every entry, returning the owned values for release.
    pub fn clear(&mut self) -> Vec<Value> {
        self.entries.drain(..).flat_map(|(k, v)| [k, v]).collect()
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for (key, value) in &self.entries {
            if let Some(id) = key.ref_id() {
                out.push(id);
            }
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.entries.len() * 2 * std::mem::size_of::<Value>()
    }
}

/// An insertion-ordered set of unique values.
#[derive(Debug, Default)]
pub(crate) struct JsSet {
    entries: Vec<Value>,
}

impl JsSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    #[must_use]
    pub fn has(&self, value: &Value, heap: &Heap) -> bool {
        self.entries.iter().any(|v| same_value_zero(v, value, heap))
    }

    /// Adds a value; hands it back for release if already present.
    pub fn add(&mut self, value: Value, heap: &Heap) -> Option<Value> {
        if self.has(&value, heap) {
            Some(value)
        } else {
            self.entries.push(value);
            None
        }
    }

    pub fn delete(&mut self, value: &Value, heap: &Heap) -> Option<Value> {
        self.entries
            .iter()
            .position(|v| same_value_zero(v, value, heap))
            .map(|i| self.entries.remove(i))
    }

    pub fn clear(&mut self) -> Vec<Value> {
        self.entries.drain(..).collect()
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for value in &self.entries {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.entries.len() * std::mem::size_of::<Value>()
    }
}

/// A weak key: heap slot plus the generation observed at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WeakKey {
    pub id: HeapId,
    pub generation: u32,
}

impl WeakKey {
    pub fn of(id: HeapId, heap: &Heap) -> Self {
        Self {
            id,
            generation: heap.generation(id),
        }
    }

    /// The key still refers to the object it was created for.
    #[must_use]
    pub fn is_valid(&self, heap: &Heap) -> bool {
        heap.is_live(self.id) && heap.generation(self.id) == self.generation
    }

    fn survives(&self, generations: &[u32], reachable: &[bool]) -> bool {
        let index = self.id.index();
        index < reachable.len() && reachable[index] && generations[index] == self.generation
    }
}

/// Map with weakly held keys.
#[derive(Debug, Default)]
pub(crate) struct JsWeakMap {
    entries: Vec<(WeakKey, Value)>,
}

impl JsWeakMap {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: HeapId, heap: &Heap) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.is_valid(heap) && k.id == key)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn has(&self, key: HeapId, heap: &Heap) -> bool {
        self.get(key, heap).is_some()
    }

    /// Inserts or updates; returns a displaced value for release.
    pub fn set(&mut self, key: HeapId, value: Value, heap: &Heap) -> Option<Value> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.is_valid(heap) && k.id == key)
        {
            Some(std::mem::replace(&mut entry.1, value))
        } else {
            self.entries.push((WeakKey::of(key, heap), value));
            None
        }
    }

    pub fn delete(&mut self, key: HeapId, heap: &Heap) -> Option<Value> {
        self.entries
            .iter()
            .position(|(k, _)| k.is_valid(heap) && k.id == key)
            .map(|i| self.entries.remove(i).1)
    }

    /// Drops entries whose key did not survive the mark phase, pushing the
    /// orphaned values onto `dropped` for release after restore.
    pub fn purge(&mut self, generations: &[u32], reachable: &[bool], dropped: &mut Vec<Value>) {
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].0.survives(generations, reachable) {
                i += 1;
            } else {
                let (_, value) = self.entries.remove(i);
                dropped.push(value);
            }
        }
    }

    /// Trace yields values only; keys are weak by definition.
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for (_, value) in &self.entries {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.entries.len() * (std::mem::size_of::<WeakKey>() + std::mem::size_of::<Value>())
    }
}

/// Set with weakly held members.
#[derive(Debug, Default)]
pub(crate) struct JsWeakSet {
    entries: Vec<WeakKey>,
}

impl JsWeakSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has(&self, key: HeapId, heap: &Heap) -> bool {
        self.entries.iter().any(|k| k.is_valid(heap) && k.id == key)
    }

    pub fn add(&mut self, key: HeapId, heap: &Heap) {
        if !self.has(key, heap) {
            self.entries.push(WeakKey::of(key, heap));
        }
    }

    pub fn delete(&mut self, key: HeapId, heap: &Heap) -> bool {
        match self.entries.iter().position(|k| k.is_valid(heap) && k.id == key) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn purge(&mut self, generations: &[u32], reachable: &[bool]) {
        self.entries.retain(|k| k.survives(generations, reachable));
    }

    pub fn estimate_size(&self) -> usize {
        self.entries.len() * std::mem::size_of::<WeakKey>()
    }
}
