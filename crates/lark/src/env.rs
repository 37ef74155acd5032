//! Lexically nested binding frames.
//!
//! Frames live on the heap ([`crate::heap::HeapData::Environment`]) because
//! closures capture them: a function holding its defining frame, stored in a
//! binding of that same frame, is a reference cycle, and only heap-resident
//! frames let the cycle collector see it.
//!
//! `let`/`const` bindings are block-scoped and temporal-dead-zone checked:
//! the lowered program defines them uninitialized at block entry and reads
//! before initialization fail with a ReferenceError. `var` bindings are
//! hoisted by the evaluator to the enclosing function frame on entry.

use indexmap::IndexMap;

use crate::{
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Istr,
    value::Value,
};

/// Binding kind, determining rebinding and TDZ behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BindingKind {
    /// Function-scoped, hoisted, initialized to `undefined`.
    Var,
    /// Block-scoped, TDZ-checked.
    Let,
    /// Block-scoped, TDZ-checked, immutable after initialization.
    Const,
}

/// One name slot in a frame.
#[derive(Debug)]
pub(crate) struct Binding {
    pub value: Value,
    pub kind: BindingKind,
    /// False while the binding is in its temporal dead zone.
    pub initialized: bool,
}

/// A binding frame: parent pointer plus name -> binding map.
#[derive(Debug)]
pub(crate) struct EnvFrame {
    parent: Option<HeapId>,
    bindings: IndexMap<Istr, Binding>,
}

impl EnvFrame {
    /// Creates a root frame (no parent).
    pub fn root() -> Self {
        Self {
            parent: None,
            bindings: IndexMap::new(),
        }
    }

    /// Creates a frame chained to `parent`. The parent edge is strong; the
    /// caller transfers one reference.
    pub fn child_of(parent: HeapId) -> Self {
        Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<HeapId> {
        self.parent
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        if let Some(parent) = self.parent {
            out.push(parent);
        }
        for binding in self.bindings.values() {
            if let Some(id) = binding.value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.bindings.len() * (std::mem::size_of::<Binding>() + std::mem::size_of::<Istr>())
    }
}

/// Allocates a child frame of `parent` on the heap.
pub(crate) fn create_child(heap: &mut Heap, parent: HeapId) -> RunResult<HeapId> {
    heap.inc_ref(parent);
    let id = heap.allocate(HeapData::Environment(EnvFrame::child_of(parent)))?;
    Ok(id)
}

fn frame(heap: &Heap, env: HeapId) -> &EnvFrame {
    match heap.get(env) {
        HeapData::Environment(frame) => frame,
        other => unreachable!("environment id holds {kind}", kind = other.type_name()),
    }
}

fn frame_mut(heap: &mut Heap, env: HeapId) -> &mut EnvFrame {
    match heap.get_mut(env) {
        HeapData::Environment(frame) => frame,
        other => unreachable!("environment id holds {kind}", kind = other.type_name()),
    }
}

/// Defines (or re-declares) `name` in `env` itself.
///
/// An initialized definition consumes `value`; a TDZ placeholder passes
/// `initialized = false` with `Value::Undefined`. Redefinition replaces the
/// old binding and releases its value (`var` re-declaration, REPL-style
/// redefinition at top level).
pub(crate) fn define(
    heap: &mut Heap,
    env: HeapId,
    name: Istr,
    value: Value,
    kind: BindingKind,
    initialized: bool,
) {
    let old = frame_mut(heap, env).bindings.insert(
        name,
        Binding {
            value,
            kind,
            initialized,
        },
    );
    if let Some(binding) = old {
        binding.value.drop_with_heap(heap);
    }
}

/// Reads `name`, walking the parent chain. Returns an owned (ref-counted)
/// value, or `None` when the name is unresolved.
///
/// A TDZ hit is an error, not a miss: the binding exists but may not be
/// observed yet.
pub(crate) fn get(heap: &Heap, env: HeapId, name: Istr) -> RunResult<Option<Value>> {
    let mut current = Some(env);
    while let Some(id) = current {
        let f = frame(heap, id);
        if let Some(binding) = f.bindings.get(&name) {
            if !binding.initialized {
                return Err(RunError::simple(
                    ErrorKind::ReferenceError,
                    format!("Cannot access '{name}' before initialization"),
                ));
            }
            return Ok(Some(binding.value.clone_with_heap(heap)));
        }
        current = f.parent();
    }
    Ok(None)
}

/// True when `name` resolves anywhere on the chain (TDZ bindings included).
pub(crate) fn has(heap: &Heap, env: HeapId, name: Istr) -> bool {
    let mut current = Some(env);
    while let Some(id) = current {
        let f = frame(heap, id);
        if f.bindings.contains_key(&name) {
            return true;
        }
        current = f.parent();
    }
    false
}

/// Outcome of an assignment attempt.
pub(crate) enum AssignOutcome {
    Done,
    /// Const rebinding: refused without mutating the frame.
    Const,
    /// No binding anywhere on the chain.
    Unresolved,
}

/// Assigns `name`, walking the parent chain. Consumes `value` on success;
/// returns it for release on failure.
pub(crate) fn assign(heap: &mut Heap, env: HeapId, name: Istr, value: Value) -> RunResult<(AssignOutcome, Option<Value>)> {
    let mut current = Some(env);
    while let Some(id) = current {
        let found = {
            let f = frame(heap, id);
            f.bindings.get(&name).map(|b| (b.kind, b.initialized))
        };
        match found {
            Some((BindingKind::Const, true)) => return Ok((AssignOutcome::Const, Some(value))),
            Some((kind, initialized)) => {
                if !initialized && kind != BindingKind::Var {
                    return Err(RunError::simple(
                        ErrorKind::ReferenceError,
                        format!("Cannot access '{name}' before initialization"),
                    ));
                }
                let binding = frame_mut(heap, id).bindings.get_mut(&name).expect("binding vanished");
                let old = std::mem::replace(&mut binding.value, value);
                binding.initialized = true;
                old.drop_with_heap(heap);
                return Ok((AssignOutcome::Done, None));
            }
            None => current = frame(heap, id).parent(),
        }
    }
    Ok((AssignOutcome::Unresolved, Some(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    fn root_env(heap: &mut Heap) -> HeapId {
        heap.allocate(HeapData::Environment(EnvFrame::root())).unwrap()
    }

    #[test]
    fn child_lookup_shadows_parent() {
        let mut heap = Heap::for_tests();
        let name = intern("shadowed");
        let parent = root_env(&mut heap);
        define(&mut heap, parent, name, Value::Number(1.0), BindingKind::Let, true);
        let child = create_child(&mut heap, parent).unwrap();
        assert!(matches!(get(&heap, child, name), Ok(Some(Value::Number(n))) if n == 1.0));
        define(&mut heap, child, name, Value::Number(2.0), BindingKind::Let, true);
        assert!(matches!(get(&heap, child, name), Ok(Some(Value::Number(n))) if n == 2.0));
        assert!(matches!(get(&heap, parent, name), Ok(Some(Value::Number(n))) if n == 1.0));
    }

    #[test]
    fn const_rebinding_fails_without_mutation() {
        let mut heap = Heap::for_tests();
        let name = intern("frozen");
        let env = root_env(&mut heap);
        define(&mut heap, env, name, Value::Number(7.0), BindingKind::Const, true);
        let (outcome, returned) = assign(&mut heap, env, name, Value::Number(8.0)).unwrap();
        assert!(matches!(outcome, AssignOutcome::Const));
        returned.unwrap().drop_with_heap(&mut heap);
        assert!(matches!(get(&heap, env, name), Ok(Some(Value::Number(n))) if n == 7.0));
    }

    #[test]
    fn tdz_read_is_a_reference_error() {
        let mut heap = Heap::for_tests();
        let name = intern("tdz-binding");
        let env = root_env(&mut heap);
        define(&mut heap, env, name, Value::Undefined, BindingKind::Let, false);
        assert!(get(&heap, env, name).is_err(), "TDZ read must fail");
        // The declaration statement re-defines the binding as initialized.
        define(&mut heap, env, name, Value::Bool(true), BindingKind::Let, true);
        assert!(matches!(get(&heap, env, name), Ok(Some(Value::Bool(true)))));
    }

    #[test]
    fn unresolved_assignment_reports_unresolved() {
        let mut heap = Heap::for_tests();
        let env = root_env(&mut heap);
        let (outcome, returned) = assign(&mut heap, env, intern("missing"), Value::Null).unwrap();
        assert!(matches!(outcome, AssignOutcome::Unresolved));
        returned.unwrap().drop_with_heap(&mut heap);
    }
}
