//! Host-callable native functions.
//!
//! Natives are plain function pointers taking the interpreter, a `this`
//! value, and an owned argument vector. They are registered once per
//! interpreter and referenced from values as compact [`NativeId`] handles,
//! so native values stay immediate (no heap allocation, no tracing).

use crate::{error::RunResult, heap::HeapId, interp::Interpreter, intern::Istr, value::Value};

/// Index into the interpreter's native-function registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct NativeId(u32);

impl NativeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A host callable. Owns `this` and `args`; anything not returned must be
/// released against the heap before returning.
pub(crate) type NativeFn = fn(&mut Interpreter, Value, Vec<Value>) -> RunResult<Value>;

#[derive(Debug)]
struct NativeEntry {
    name: Istr,
    func: NativeFn,
}

/// Registry of native functions for one interpreter.
#[derive(Debug, Default)]
pub(crate) struct NativeRegistry {
    entries: Vec<NativeEntry>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: Istr, func: NativeFn) -> NativeId {
        let id = NativeId(u32::try_from(self.entries.len()).expect("native registry full"));
        self.entries.push(NativeEntry { name, func });
        id
    }

    #[must_use]
    pub fn func(&self, id: NativeId) -> NativeFn {
        self.entries[id.index()].func
    }

    /// Registered display name, available to host tooling.
    #[expect(dead_code)]
    #[must_use]
    pub fn name(&self, id: NativeId) -> Istr {
        self.entries[id.index()].name
    }
}

/// A native function with pre-bound payload values.
///
/// Heap-resident so the payload participates in tracing and reference
/// counting. When called, the interpreter prepends owned copies of the
/// payload to the caller's arguments; the engine's promise machinery uses
/// this for executor resolve/reject functions and combinator reactions.
#[derive(Debug)]
pub(crate) struct BoundNative {
    pub func: NativeId,
    pub payload: Vec<Value>,
}

impl BoundNative {
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for value in &self.payload {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.len() * std::mem::size_of::<Value>()
    }
}
