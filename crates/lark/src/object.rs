//! Objects and arrays: property storage, descriptors, and the
//! shaped/dictionary storage split.
//!
//! A fresh object is *shaped*: its property values live in a flat slot
//! vector indexed by offsets assigned by the object's shape, and property
//! adds walk the shape transition tree. Objects whose mutation pattern the
//! shape system cannot serve (deletes, accessor definitions, symbol keys)
//! fall back to *dictionary mode*: an insertion-ordered map of full property
//! descriptors. Enumeration order is insertion order in both modes, as the
//! language requires.
//!
//! Methods that displace values return them to the caller instead of
//! dropping them, because adjusting reference counts needs heap access the
//! object itself does not have.

use indexmap::IndexMap;

use crate::{
    heap::HeapId,
    intern::{Istr, SymbolId, symbol_description},
    shape::{ShapeId, Shapes},
    value::Value,
};

/// A property key: an interned string or a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PropKey {
    Str(Istr),
    Sym(SymbolId),
}

impl PropKey {
    /// Rendering for error messages (`Cannot read properties of ...`).
    pub fn describe(self) -> String {
        match self {
            Self::Str(s) => format!("'{s}'"),
            Self::Sym(sym) => match symbol_description(sym) {
                Some(desc) => format!("Symbol({desc})"),
                None => "Symbol()".to_owned(),
            },
        }
    }

    #[must_use]
    pub fn as_istr(self) -> Option<Istr> {
        match self {
            Self::Str(s) => Some(s),
            Self::Sym(_) => None,
        }
    }
}

/// writable/enumerable/configurable attribute triple.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PropAttrs {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Default for PropAttrs {
    fn default() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }
}

/// Full property descriptor, used in dictionary mode.
#[derive(Debug)]
pub(crate) enum Property {
    Data { value: Value, attrs: PropAttrs },
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
        attrs: PropAttrs,
    },
}

impl Property {
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attrs: PropAttrs::default(),
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Data { value, .. } => {
                if let Some(id) = value.ref_id() {
                    out.push(id);
                }
            }
            Self::Accessor { get, set, .. } => {
                for accessor in [get, set].into_iter().flatten() {
                    if let Some(id) = accessor.ref_id() {
                        out.push(id);
                    }
                }
            }
        }
    }

    /// Consumes the descriptor, handing its owned values to the caller.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Data { value, .. } => vec![value],
            Self::Accessor { get, set, .. } => get.into_iter().chain(set).collect(),
        }
    }
}

#[derive(Debug)]
enum Storage {
    Shaped { shape: ShapeId, slots: Vec<Value> },
    Dict(IndexMap<PropKey, Property>),
}

/// Result of an own-property read.
#[derive(Debug)]
pub(crate) enum OwnGet<'a> {
    Data(&'a Value),
    /// Accessor property; the getter (if any) must be invoked by the caller.
    Getter(Option<&'a Value>),
    Missing,
}

/// Result of an own-property write.
#[derive(Debug)]
pub(crate) enum SetSlot {
    /// Stored. Carries the displaced previous value, if any.
    Done(Option<Value>),
    /// Property is read-only; the value is handed back untouched.
    NotWritable(Value),
    /// Accessor property: the caller must invoke `setter` with `value`.
    /// `setter` is an unowned copy; increment before holding it.
    Setter { setter: Value, value: Value },
    /// Accessor with no setter; the value is handed back untouched.
    NoSetter(Value),
}

/// An ordinary object.
#[derive(Debug)]
pub(crate) struct JsObject {
    proto: Option<HeapId>,
    extensible: bool,
    storage: Storage,
}

impl JsObject {
    /// Creates an empty shaped object with the given prototype.
    ///
    /// The prototype edge is strong; the caller transfers one reference.
    pub fn new(proto: Option<HeapId>) -> Self {
        Self {
            proto,
            extensible: true,
            storage: Storage::Shaped {
                shape: ShapeId::ROOT,
                slots: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn proto(&self) -> Option<HeapId> {
        self.proto
    }

    /// Replaces the prototype, returning the previous edge for release.
    pub fn set_proto(&mut self, proto: Option<HeapId>) -> Option<HeapId> {
        std::mem::replace(&mut self.proto, proto)
    }

    /// The object's shape while in shaped mode.
    #[must_use]
    pub fn shape(&self) -> Option<ShapeId> {
        match &self.storage {
            Storage::Shaped { shape, .. } => Some(*shape),
            Storage::Dict(_) => None,
        }
    }

    #[must_use]
    pub fn is_dictionary(&self) -> bool {
        matches!(self.storage, Storage::Dict(_))
    }

    /// Direct slot read for inline-cache hits.
    #[must_use]
    pub fn slot(&self, offset: u32) -> &Value {
        match &self.storage {
            Storage::Shaped { slots, .. } => &slots[offset as usize],
            Storage::Dict(_) => unreachable!("slot read on dictionary object"),
        }
    }

    /// Reads an own property.
    pub fn get_own(&self, key: PropKey, shapes: &Shapes) -> OwnGet<'_> {
        match &self.storage {
            Storage::Shaped { shape, slots } => {
                let Some(name) = key.as_istr() else {
                    return OwnGet::Missing;
                };
                match shapes.get(*shape).offset_of(name) {
                    Some(offset) => OwnGet::Data(&slots[offset as usize]),
                    None => OwnGet::Missing,
                }
            }
            Storage::Dict(map) => match map.get(&key) {
                Some(Property::Data { value, .. }) => OwnGet::Data(value),
                Some(Property::Accessor { get, .. }) => OwnGet::Getter(get.as_ref()),
                None => OwnGet::Missing,
            },
        }
    }

    /// Writes an own property, adding it if absent.
    ///
    /// Shaped adds transition the shape; symbol keys force dictionary mode
    /// first. Non-extensible objects refuse additions.
    pub fn set_own(&mut self, key: PropKey, value: Value, shapes: &mut Shapes) -> SetSlot {
        if let Storage::Shaped { shape, slots } = &mut self.storage {
            if let Some(name) = key.as_istr() {
                if let Some(offset) = shapes.get(*shape).offset_of(name) {
                    let old = std::mem::replace(&mut slots[offset as usize], value);
                    return SetSlot::Done(Some(old));
                }
                if !self.extensible {
                    return SetSlot::NotWritable(value);
                }
                *shape = shapes.transition(*shape, name);
                slots.push(value);
                return SetSlot::Done(None);
            }
            // Symbol key on a shaped object: shapes only index strings.
            self.to_dictionary(shapes);
        }
        let Storage::Dict(map) = &mut self.storage else {
            unreachable!("storage converted above");
        };
        match map.get_mut(&key) {
            Some(Property::Data { value: slot, attrs }) => {
                if attrs.writable {
                    SetSlot::Done(Some(std::mem::replace(slot, value)))
                } else {
                    SetSlot::NotWritable(value)
                }
            }
            Some(Property::Accessor { set, .. }) => match set {
                Some(setter) => SetSlot::Setter {
                    setter: setter.shallow_copy(),
                    value,
                },
                None => SetSlot::NoSetter(value),
            },
            None => {
                if !self.extensible {
                    return SetSlot::NotWritable(value);
                }
                map.insert(key, Property::data(value));
                SetSlot::Done(None)
            }
        }
    }

    /// Installs a full descriptor (accessors included), forcing dictionary
    /// mode. Returns the replaced descriptor's values for release.
    pub fn define_own(&mut self, key: PropKey, property: Property, shapes: &Shapes) -> Vec<Value> {
        self.to_dictionary(shapes);
        let Storage::Dict(map) = &mut self.storage else {
            unreachable!("storage converted above");
        };
        match map.insert(key, property) {
            Some(old) => old.into_values(),
            None => Vec::new(),
        }
    }

    /// Deletes an own property, transitioning to dictionary mode if needed.
    /// Returns the removed values for release, or `None` if absent.
    pub fn delete(&mut self, key: PropKey, shapes: &Shapes) -> Option<Vec<Value>> {
        if matches!(self.storage, Storage::Shaped { .. }) {
            let has = matches!(self.get_own(key, shapes), OwnGet::Data(_));
            if !has {
                return None;
            }
            self.to_dictionary(shapes);
        }
        let Storage::Dict(map) = &mut self.storage else {
            unreachable!("storage converted above");
        };
        // shift_remove preserves the insertion order of the survivors.
        map.shift_remove(&key).map(Property::into_values)
    }

    pub fn has_own(&self, key: PropKey, shapes: &Shapes) -> bool {
        !matches!(self.get_own(key, shapes), OwnGet::Missing)
    }

    /// The setter half of an accessor property, if `key` is one.
    #[must_use]
    pub fn setter_of(&self, key: PropKey, _shapes: &Shapes) -> Option<&Value> {
        match &self.storage {
            Storage::Shaped { .. } => None,
            Storage::Dict(map) => match map.get(&key) {
                Some(Property::Accessor { set, .. }) => set.as_ref(),
                _ => None,
            },
        }
    }

    /// Own keys in insertion order.
    #[must_use]
    pub fn own_keys(&self, shapes: &Shapes) -> Vec<PropKey> {
        match &self.storage {
            Storage::Shaped { shape, .. } => {
                shapes.get(*shape).names().iter().map(|&n| PropKey::Str(n)).collect()
            }
            Storage::Dict(map) => map.keys().copied().collect(),
        }
    }

    /// Own enumerable string keys in insertion order (`for...in` order).
    #[must_use]
    pub fn enumerable_string_keys(&self, shapes: &Shapes) -> Vec<Istr> {
        match &self.storage {
            Storage::Shaped { shape, .. } => shapes.get(*shape).names().to_vec(),
            Storage::Dict(map) => map
                .iter()
                .filter_map(|(key, prop)| {
                    let enumerable = match prop {
                        Property::Data { attrs, .. } | Property::Accessor { attrs, .. } => attrs.enumerable,
                    };
                    if enumerable { key.as_istr() } else { None }
                })
                .collect(),
        }
    }

    /// Converts to dictionary mode. Shaped slots become plain writable
    /// data properties; caches over this object miss from here on.
    pub fn to_dictionary(&mut self, shapes: &Shapes) {
        if let Storage::Shaped { shape, slots } = &mut self.storage {
            let names = shapes.get(*shape).names().to_vec();
            let mut map = IndexMap::with_capacity(slots.len());
            for (name, value) in names.into_iter().zip(slots.drain(..)) {
                map.insert(PropKey::Str(name), Property::data(value));
            }
            self.storage = Storage::Dict(map);
        }
    }

    /// Display helper: own enumerable entries as `(name, unowned value)`.
    #[must_use]
    pub fn display_entries(&self, shapes: &Shapes) -> Vec<(String, Value)> {
        match &self.storage {
            Storage::Shaped { shape, slots } => shapes
                .get(*shape)
                .names()
                .iter()
                .zip(slots)
                .map(|(name, value)| (name.to_string(), value.shallow_copy()))
                .collect(),
            Storage::Dict(map) => map
                .iter()
                .filter_map(|(key, prop)| match prop {
                    Property::Data { value, attrs } if attrs.enumerable => {
                        Some((key.describe_bare(), value.shallow_copy()))
                    }
                    Property::Accessor { attrs, .. } if attrs.enumerable => {
                        Some((key.describe_bare(), Value::Undefined))
                    }
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        if let Some(proto) = self.proto {
            out.push(proto);
        }
        match &self.storage {
            Storage::Shaped { slots, .. } => {
                for value in slots {
                    if let Some(id) = value.ref_id() {
                        out.push(id);
                    }
                }
            }
            Storage::Dict(map) => {
                for prop in map.values() {
                    prop.trace(out);
                }
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        match &self.storage {
            Storage::Shaped { slots, .. } => slots.len() * std::mem::size_of::<Value>(),
            Storage::Dict(map) => map.len() * (std::mem::size_of::<Property>() + std::mem::size_of::<PropKey>()),
        }
    }
}

impl PropKey {
    /// Key text without quoting, for object display.
    fn describe_bare(self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Sym(sym) => match symbol_description(sym) {
                Some(desc) => format!("[Symbol({desc})]"),
                None => "[Symbol()]".to_owned(),
            },
        }
    }
}

/// A dense array.
///
/// Exposes a virtual `length` with set-length truncate/extend semantics.
/// Sparse writes fill the gap with `undefined`.
#[derive(Debug, Default)]
pub(crate) struct JsArray {
    elements: Vec<Value>,
}

impl JsArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements(elements: Vec<Value>) -> Self {
        Self { elements }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut Vec<Value> {
        &mut self.elements
    }

    pub fn push(&mut self, value: Value) {
        self.elements.push(value);
    }

    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    /// Writes `index`, growing with `undefined` holes as needed. Returns the
    /// displaced value.
    pub fn set_index(&mut self, index: usize, value: Value) -> Option<Value> {
        if index < self.elements.len() {
            Some(std::mem::replace(&mut self.elements[index], value))
        } else {
            while self.elements.len() < index {
                self.elements.push(Value::Undefined);
            }
            self.elements.push(value);
            None
        }
    }

    /// `arr.length = n`: truncates or extends. Returns the truncated-off
    /// values for release.
    pub fn set_length(&mut self, new_len: usize) -> Vec<Value> {
        if new_len < self.elements.len() {
            self.elements.split_off(new_len)
        } else {
            self.elements.resize_with(new_len, || Value::Undefined);
            Vec::new()
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for value in &self.elements {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.elements.len() * std::mem::size_of::<Value>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn shaped_objects_share_shapes_and_read_back() {
        let mut shapes = Shapes::new();
        let (x, y) = (PropKey::Str(intern("x")), PropKey::Str(intern("y")));
        let mut a = JsObject::new(None);
        let mut b = JsObject::new(None);
        for obj in [&mut a, &mut b] {
            assert!(matches!(obj.set_own(x, Value::Number(1.0), &mut shapes), SetSlot::Done(None)));
            assert!(matches!(obj.set_own(y, Value::Number(2.0), &mut shapes), SetSlot::Done(None)));
        }
        assert_eq!(a.shape(), b.shape(), "same insertion order must share the shape");
        match a.get_own(y, &shapes) {
            OwnGet::Data(Value::Number(n)) => assert_eq!(*n, 2.0),
            other => panic!("expected data property, got {other:?}"),
        }
    }

    #[test]
    fn delete_transitions_to_dictionary_and_preserves_order() {
        let mut shapes = Shapes::new();
        let keys: Vec<PropKey> = ["a", "b", "c"].iter().map(|n| PropKey::Str(intern(n))).collect();
        let mut obj = JsObject::new(None);
        for (i, &key) in keys.iter().enumerate() {
            obj.set_own(key, Value::Number(i as f64), &mut shapes);
        }
        assert!(!obj.is_dictionary());
        let removed = obj.delete(keys[1], &shapes).expect("b exists");
        assert_eq!(removed.len(), 1);
        assert!(obj.is_dictionary(), "delete must force dictionary mode");
        let names: Vec<Istr> = obj.enumerable_string_keys(&shapes);
        assert_eq!(names, vec![intern("a"), intern("c")], "survivors keep insertion order");
    }

    #[test]
    fn array_length_truncates_and_extends() {
        let mut arr = JsArray::with_elements(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        let cut = arr.set_length(1);
        assert_eq!(cut.len(), 2);
        assert_eq!(arr.len(), 1);
        arr.set_length(4);
        assert_eq!(arr.len(), 4);
        assert!(matches!(arr.get_index(3), Some(Value::Undefined)));
    }
}
