//! Hidden classes ("shapes") and polymorphic inline caches.
//!
//! Objects that add the same property names in the same order share a shape,
//! which enables flat slot storage and per-site caching of property offsets.
//! Shapes form a transition tree rooted at the empty-object shape: adding a
//! property to an object moves it to the child shape for that name, creating
//! the child on first use. A shape never loses properties; deletions push the
//! object into dictionary mode instead.
//!
//! Inline caches live in a side table indexed by cache slots assigned during
//! lowering, so the AST itself stays immutable and shareable.

use ahash::AHashMap;

use crate::intern::Istr;

/// Identity of a shape: an index into the interpreter's shape registry.
///
/// Shape ids are issued monotonically and never reused, so an id seen by an
/// inline cache always refers to the same property layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ShapeId(u64);

impl ShapeId {
    /// The root shape describing the empty object.
    pub const ROOT: Self = Self(0);

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Immutable node of the shape transition tree.
#[derive(Debug)]
pub(crate) struct Shape {
    /// Property names, in insertion order. Offset `i` stores `names[i]`.
    names: Vec<Istr>,
    /// Name -> slot offset, for misses that bypass the inline cache.
    offsets: AHashMap<Istr, u32>,
    /// Parent in the transition tree; `None` only for the root.
    parent: Option<ShapeId>,
    /// Added-property-name -> child shape.
    transitions: AHashMap<Istr, ShapeId>,
}

impl Shape {
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.names.len()
    }

    /// Slot offset of `name`, if the shape has it.
    #[must_use]
    pub fn offset_of(&self, name: Istr) -> Option<u32> {
        self.offsets.get(&name).copied()
    }

    /// Property names in insertion order.
    #[must_use]
    pub fn names(&self) -> &[Istr] {
        &self.names
    }

    #[must_use]
    pub fn parent(&self) -> Option<ShapeId> {
        self.parent
    }
}

/// Registry owning every shape created by one interpreter.
#[derive(Debug)]
pub(crate) struct Shapes {
    shapes: Vec<Shape>,
}

impl Shapes {
    pub fn new() -> Self {
        Self {
            shapes: vec![Shape {
                names: Vec::new(),
                offsets: AHashMap::new(),
                parent: None,
                transitions: AHashMap::new(),
            }],
        }
    }

    #[must_use]
    pub fn get(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.index()]
    }

    /// Transitions `shape` by adding `name`, returning the (possibly newly
    /// created) child shape. The new property's offset is the child's last
    /// slot.
    pub fn transition(&mut self, shape: ShapeId, name: Istr) -> ShapeId {
        if let Some(&child) = self.shapes[shape.index()].transitions.get(&name) {
            return child;
        }
        let child_id = ShapeId(self.shapes.len() as u64);
        let parent = &self.shapes[shape.index()];
        let mut names = parent.names.clone();
        let mut offsets = parent.offsets.clone();
        let offset = u32::try_from(names.len()).expect("shape exceeds u32 slots");
        names.push(name);
        offsets.insert(name, offset);
        let child = Shape {
            names,
            offsets,
            parent: Some(shape),
            transitions: AHashMap::new(),
        };
        self.shapes.push(child);
        self.shapes[shape.index()].transitions.insert(name, child_id);
        child_id
    }
}

/// Slot of a member-access site in the inline-cache side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub(crate) struct CacheId(u32);

impl CacheId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("cache table exceeds u32 slots"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maximum shapes one cache site remembers before it is effectively
/// megamorphic.
pub const MAX_CACHE_ENTRIES: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
struct CacheEntry {
    shape: Option<ShapeId>,
    offset: u32,
}

/// Polymorphic inline cache for one member-access site.
///
/// Holds up to four `(shape, offset)` pairs, most recently used first. Hits
/// move the entry to the front; updates insert at the front and evict the
/// oldest entry when full. A site seeing more than four shapes keeps
/// serving from whatever it holds: misses dominate, the cache does not grow.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PropertyCache {
    entries: [CacheEntry; MAX_CACHE_ENTRIES],
    len: usize,
    hits: u64,
    misses: u64,
}

impl PropertyCache {
    /// Looks up the offset cached for `shape`, recording a hit or miss.
    pub fn lookup(&mut self, shape: ShapeId) -> Option<u32> {
        for i in 0..self.len {
            if self.entries[i].shape == Some(shape) {
                self.hits += 1;
                let entry = self.entries[i];
                // Move to front: most recently used shape stays cheapest.
                self.entries.copy_within(0..i, 1);
                self.entries[0] = entry;
                return Some(entry.offset);
            }
        }
        self.misses += 1;
        None
    }

    /// Records `(shape, offset)` after a successful slow-path lookup.
    pub fn update(&mut self, shape: ShapeId, offset: u32) {
        for i in 0..self.len {
            if self.entries[i].shape == Some(shape) {
                self.entries[i].offset = offset;
                return;
            }
        }
        let keep = if self.len < MAX_CACHE_ENTRIES {
            self.len += 1;
            self.len - 1
        } else {
            MAX_CACHE_ENTRIES - 1
        };
        self.entries.copy_within(0..keep, 1);
        self.entries[0] = CacheEntry {
            shape: Some(shape),
            offset,
        };
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }

    /// True once the site oscillates past the cache's capacity.
    #[must_use]
    pub fn is_megamorphic(&self) -> bool {
        self.len >= MAX_CACHE_ENTRIES && self.misses > self.hits * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn same_insertion_order_shares_the_final_shape() {
        let mut shapes = Shapes::new();
        let (x, y, z) = (intern("x"), intern("y"), intern("z"));

        let mut a = ShapeId::ROOT;
        for name in [x, y, z] {
            a = shapes.transition(a, name);
        }
        let mut b = ShapeId::ROOT;
        for name in [x, y, z] {
            b = shapes.transition(b, name);
        }
        assert_eq!(a, b, "identical insertion order must share shapes");
        assert_eq!(shapes.get(a).names(), &[x, y, z]);
        assert_eq!(shapes.get(a).offset_of(y), Some(1));

        // Different order diverges.
        let mut c = ShapeId::ROOT;
        for name in [y, x] {
            c = shapes.transition(c, name);
        }
        assert_ne!(a, c);
    }

    #[test]
    fn shapes_never_lose_properties() {
        let mut shapes = Shapes::new();
        let a = shapes.transition(ShapeId::ROOT, intern("p"));
        let b = shapes.transition(a, intern("q"));
        assert_eq!(shapes.get(a).property_count(), 1);
        assert_eq!(shapes.get(b).property_count(), 2);
        assert_eq!(shapes.get(b).parent(), Some(a));
    }

    #[test]
    fn cache_hits_after_update_and_tracks_stats() {
        let mut shapes = Shapes::new();
        let s1 = shapes.transition(ShapeId::ROOT, intern("f"));
        let mut cache = PropertyCache::default();
        assert_eq!(cache.lookup(s1), None);
        cache.update(s1, 0);
        assert_eq!(cache.lookup(s1), Some(0));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
        assert!(!cache.is_megamorphic());
    }

    #[test]
    fn cache_evicts_oldest_beyond_four_shapes() {
        let mut shapes = Shapes::new();
        let mut cache = PropertyCache::default();
        let names: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|n| intern(n)).collect();
        let ids: Vec<ShapeId> = names.iter().map(|&n| shapes.transition(ShapeId::ROOT, n)).collect();
        for (i, &id) in ids.iter().enumerate() {
            cache.update(id, i as u32);
        }
        // "a" was the oldest entry and must have been evicted.
        assert_eq!(cache.lookup(ids[0]), None);
        for (i, &id) in ids.iter().enumerate().skip(1) {
            assert_eq!(cache.lookup(id), Some(i as u32), "shape {i} should still be cached");
        }
    }
}
