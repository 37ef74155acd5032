//! Member access: property reads and writes through shapes and the inline
//! caches, prototype-chain walks, and the per-kind built-in surfaces.
//!
//! The fast path for `obj.name` is a cache probe: the member site's cache
//! maps the receiver's shape id to a slot offset, hitting in O(1) without a
//! name lookup. Misses fall back to the shape's offset table (and record
//! the result), then the prototype chain. Dictionary-mode objects always
//! miss, by design.

use crate::{
    ast::{ExprKind, MemberProp},
    env,
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{Istr, SymbolId, intern, intern_unbounded, symbol_description, well_known},
    interp::{FrameKind, Interpreter, StepFlow, TaskState},
    object::{JsObject, OwnGet, PropKey, SetSlot},
    value::{Value, array_index, number_to_string},
};

impl Interpreter {
    // ========================================================================
    // Member expression evaluation
    // ========================================================================

    /// First visit of a member expression.
    pub(crate) fn member_start(&mut self, task: &mut TaskState, expr_id: crate::ast::ExprId) -> RunResult<StepFlow> {
        if task.chain_short {
            task.values.push(Value::Undefined);
            return Ok(StepFlow::Continue);
        }
        let program = task.program.clone();
        let ExprKind::Member { object, prop, .. } = &program.expr(expr_id).kind else {
            unreachable!("member start on a non-member");
        };
        if matches!(program.expr(*object).kind, ExprKind::SuperBase) {
            let value = match prop {
                MemberProp::Ident(name) => self.super_get(task, PropKey::Str(*name))?,
                MemberProp::Computed(_) => {
                    return Err(RunError::syntax_error("computed super access is not supported"));
                }
            };
            task.values.push(value);
            return Ok(StepFlow::Continue);
        }
        task.push_frame(FrameKind::Cont {
            expr: expr_id,
            phase: 1,
            aux: 0,
        });
        task.push_frame(FrameKind::Eval(*object));
        Ok(StepFlow::Continue)
    }

    /// Member continuations: phase 1 = object ready, phase 2 = computed key
    /// ready (object below it).
    pub(crate) fn member_cont(&mut self, task: &mut TaskState, expr_id: crate::ast::ExprId, phase: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Member {
            prop, optional, cache, ..
        } = &program.expr(expr_id).kind
        else {
            unreachable!("member continuation on a non-member");
        };
        match phase {
            1 => {
                if task.chain_short {
                    let stale = task.values.pop().expect("shorted member object expected");
                    stale.drop_with_heap(&mut self.heap);
                    task.values.push(Value::Undefined);
                    return Ok(StepFlow::Continue);
                }
                let object = task.values.pop().expect("member object expected");
                if object.is_nullish() {
                    if *optional {
                        object.drop_with_heap(&mut self.heap);
                        task.chain_short = true;
                        task.values.push(Value::Undefined);
                        return Ok(StepFlow::Continue);
                    }
                    let base = object.type_of(&self.heap);
                    object.drop_with_heap(&mut self.heap);
                    let what = match prop {
                        MemberProp::Ident(name) => format!(" (reading '{name}')"),
                        MemberProp::Computed(_) => String::new(),
                    };
                    return Err(RunError::type_error(format!(
                        "Cannot read properties of {base}{what}"
                    )));
                }
                match prop {
                    MemberProp::Ident(name) => {
                        let slot = Some(task.cache_base + cache.index());
                        let value = self.get_property_cached(&object, PropKey::Str(*name), slot)?;
                        object.drop_with_heap(&mut self.heap);
                        task.values.push(value);
                        Ok(StepFlow::Continue)
                    }
                    MemberProp::Computed(key_expr) => {
                        task.values.push(object);
                        task.push_frame(FrameKind::Cont {
                            expr: expr_id,
                            phase: 2,
                            aux: 0,
                        });
                        task.push_frame(FrameKind::Eval(*key_expr));
                        Ok(StepFlow::Continue)
                    }
                }
            }
            2 => {
                let key_value = task.values.pop().expect("member key expected");
                let object = task.values.pop().expect("member object expected");
                let key = match key_value.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        key_value.drop_with_heap(&mut self.heap);
                        object.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                key_value.drop_with_heap(&mut self.heap);
                let value = self.get_property(&object, key)?;
                object.drop_with_heap(&mut self.heap);
                task.values.push(value);
                Ok(StepFlow::Continue)
            }
            other => unreachable!("member phase {other}"),
        }
    }

    /// `super.name` in a method body.
    pub(crate) fn super_get(&mut self, task: &mut TaskState, key: PropKey) -> RunResult<Value> {
        let Some(home) = task.home else {
            return Err(RunError::syntax_error("'super' keyword is only valid inside methods"));
        };
        let proto = match self.heap.get(home) {
            HeapData::Object(obj) => obj.proto(),
            _ => None,
        };
        let Some(proto) = proto else {
            return Ok(Value::Undefined);
        };
        let this = env::get(&self.heap, task.env(), intern("this"))?.unwrap_or(Value::Undefined);
        let start = Value::Ref(proto);
        let result = self.get_with_receiver(&start, key, &this);
        this.drop_with_heap(&mut self.heap);
        result
    }

    // ========================================================================
    // Property reads
    // ========================================================================

    /// Property read with no inline cache site.
    pub(crate) fn get_property(&mut self, object: &Value, key: PropKey) -> RunResult<Value> {
        self.get_property_cached(object, key, None)
    }

    /// Property read through a member site's inline cache.
    pub(crate) fn get_property_cached(
        &mut self,
        object: &Value,
        key: PropKey,
        cache_slot: Option<usize>,
    ) -> RunResult<Value> {
        // Cache probe: shaped receivers hit in O(1).
        if let (Some(slot), Value::Ref(id), PropKey::Str(_)) = (cache_slot, object, key)
            && let HeapData::Object(obj) = self.heap.get(*id)
            && let Some(shape) = obj.shape()
            && let Some(offset) = self.caches[slot].lookup(shape)
        {
            return Ok(obj.slot(offset).clone_with_heap(&self.heap));
        }
        let value = self.get_with_receiver_slow(object, key, object, cache_slot)?;
        // Namespace objects hold live module bindings; reads resolve them.
        if let Value::ModuleBinding(module, export) = value {
            return self.resolve_module_binding(module, export);
        }
        Ok(value)
    }

    /// Property read with an explicit receiver (used by `super.x`).
    pub(crate) fn get_with_receiver(&mut self, start: &Value, key: PropKey, receiver: &Value) -> RunResult<Value> {
        self.get_with_receiver_slow(start, key, receiver, None)
    }

    fn get_with_receiver_slow(
        &mut self,
        start: &Value,
        key: PropKey,
        receiver: &Value,
        cache_slot: Option<usize>,
    ) -> RunResult<Value> {
        match start {
            Value::Undefined | Value::Null => Err(RunError::type_error(format!(
                "Cannot read properties of {base} (reading {key})",
                base = start.type_of(&self.heap),
                key = key.describe()
            ))),
            Value::Str(s) => self.string_property(s.as_str(), key),
            Value::Symbol(sym) => Ok(self.symbol_property(*sym, key)),
            Value::Number(_) | Value::Bool(_) | Value::Native(_) => Ok(Value::Undefined),
            Value::Builtin(builtin) => Ok(self.builtin_member(*builtin, key)),
            Value::ModuleBinding(module, export) => {
                let resolved = self.resolve_module_binding(*module, *export)?;
                let result = self.get_with_receiver_slow(&resolved, key, receiver, cache_slot);
                resolved.drop_with_heap(&mut self.heap);
                result
            }
            Value::Ref(id) => self.heap_property(*id, key, receiver, cache_slot),
        }
    }

    fn heap_property(
        &mut self,
        id: HeapId,
        key: PropKey,
        receiver: &Value,
        cache_slot: Option<usize>,
    ) -> RunResult<Value> {
        match self.heap.get(id) {
            HeapData::String(s) => {
                let text = s.to_string();
                self.string_property(&text, key)
            }
            HeapData::BigInt(_) => Ok(Value::Undefined),
            HeapData::Object(_) => self.object_chain_get(id, key, receiver, cache_slot),
            HeapData::Array(arr) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::LENGTH {
                        return Ok(Value::Number(arr.len() as f64));
                    }
                    if let Some(index) = parse_index(name) {
                        return Ok(arr
                            .get_index(index)
                            .map(|v| v.clone_with_heap(&self.heap))
                            .unwrap_or(Value::Undefined));
                    }
                }
                match self.array_proto {
                    Some(proto) => self.object_chain_get(proto, key, receiver, None),
                    None => Ok(Value::Undefined),
                }
            }
            HeapData::Function(f) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::PROTOTYPE {
                        return self.ensure_function_prototype(id);
                    }
                    if name == *well_known::NAME {
                        return Ok(Value::Str(f.name()));
                    }
                    if name == *well_known::LENGTH {
                        let arity = f.program().func(f.func_id()).params.len();
                        return Ok(Value::Number(arity as f64));
                    }
                    // Static class members live on the constructor.
                    if let Some(value) = f.get_static(name) {
                        return Ok(value.clone_with_heap(&self.heap));
                    }
                }
                Ok(Value::Undefined)
            }
            HeapData::BoundNative(_) => Ok(Value::Undefined),
            HeapData::Promise(_) => Ok(self.promise_member(key)),
            HeapData::Generator(_) => Ok(self.generator_member(key)),
            HeapData::Map(m) => {
                if let PropKey::Str(name) = key
                    && name == intern("size")
                {
                    return Ok(Value::Number(m.len() as f64));
                }
                Ok(self.map_member(key))
            }
            HeapData::Set(s) => {
                if let PropKey::Str(name) = key
                    && name == intern("size")
                {
                    return Ok(Value::Number(s.len() as f64));
                }
                Ok(self.set_member(key))
            }
            HeapData::WeakMap(_) | HeapData::WeakSet(_) => Ok(self.weak_member(key)),
            HeapData::Error(err) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::NAME {
                        return Ok(Value::Str(err.name()));
                    }
                    if name == *well_known::MESSAGE {
                        let message = err.message().to_owned();
                        return Value::of_owned_string(message, &mut self.heap);
                    }
                    if name == *well_known::STACK {
                        let stack = err.stack_string();
                        return Value::of_owned_string(stack, &mut self.heap);
                    }
                    if name == *well_known::CAUSE {
                        return Ok(err
                            .cause()
                            .map(|v| v.clone_with_heap(&self.heap))
                            .unwrap_or(Value::Undefined));
                    }
                    if let Some(value) = err.extra().get(&name) {
                        return Ok(value.clone_with_heap(&self.heap));
                    }
                }
                match self.object_proto {
                    Some(proto) => self.object_chain_get(proto, key, receiver, None),
                    None => Ok(Value::Undefined),
                }
            }
            HeapData::TypedArray(ta) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::LENGTH {
                        return Ok(Value::Number(ta.len() as f64));
                    }
                    if name == intern("byteLength") {
                        return Ok(Value::Number(ta.byte_len() as f64));
                    }
                    if let Some(index) = parse_index(name) {
                        let value = match self.heap.take_data(id) {
                            HeapData::TypedArray(ta) => {
                                let value = ta.get(index, &mut self.heap);
                                self.heap.restore_data(id, HeapData::TypedArray(ta));
                                value?
                            }
                            other => {
                                self.heap.restore_data(id, other);
                                Value::Undefined
                            }
                        };
                        return Ok(value);
                    }
                }
                Ok(Value::Undefined)
            }
            HeapData::Regex(r) => {
                if let PropKey::Str(name) = key {
                    if name == intern("source") {
                        let source = r.source().to_owned();
                        return Value::of_owned_string(source, &mut self.heap);
                    }
                    if name == intern("flags") {
                        let flags = r.flags().to_owned();
                        return Value::of_owned_string(flags, &mut self.heap);
                    }
                }
                Ok(Value::Undefined)
            }
            HeapData::Environment(_) => Ok(Value::Undefined),
        }
    }

    /// Own-then-prototype walk over ordinary objects, with getter support.
    fn object_chain_get(
        &mut self,
        start: HeapId,
        key: PropKey,
        receiver: &Value,
        cache_slot: Option<usize>,
    ) -> RunResult<Value> {
        let mut current = start;
        let mut first = true;
        loop {
            let (outcome, next) = {
                let HeapData::Object(obj) = self.heap.get(current) else {
                    // Prototype chains may pass through non-plain objects
                    // (e.g. a function's prototype slot); stop there.
                    return Ok(Value::Undefined);
                };
                match obj.get_own(key, &self.shapes) {
                    OwnGet::Data(value) => (Some(Ok(value.clone_with_heap(&self.heap))), None),
                    OwnGet::Getter(Some(getter)) => {
                        (Some(Err(getter.clone_with_heap(&self.heap))), None)
                    }
                    OwnGet::Getter(None) => (Some(Ok(Value::Undefined)), None),
                    OwnGet::Missing => (None, obj.proto()),
                }
            };
            match outcome {
                Some(Ok(value)) => {
                    // Record a first-level shaped data hit in the cache.
                    if first
                        && let (Some(slot), PropKey::Str(name)) = (cache_slot, key)
                        && let HeapData::Object(obj) = self.heap.get(current)
                        && let Some(shape) = obj.shape()
                        && let Some(offset) = self.shapes.get(shape).offset_of(name)
                    {
                        self.caches[slot].update(shape, offset);
                    }
                    return Ok(value);
                }
                Some(Err(getter)) => {
                    let this = receiver.clone_with_heap(&self.heap);
                    return self.call_value_sync(getter, this, Vec::new());
                }
                None => match next {
                    Some(proto) => {
                        current = proto;
                        first = false;
                    }
                    None => return Ok(Value::Undefined),
                },
            }
        }
    }

    fn string_property(&mut self, text: &str, key: PropKey) -> RunResult<Value> {
        if let PropKey::Str(name) = key {
            if name == *well_known::LENGTH {
                return Ok(Value::Number(text.chars().count() as f64));
            }
            if let Some(index) = parse_index(name) {
                return match text.chars().nth(index) {
                    Some(c) => Value::of_owned_string(c.to_string(), &mut self.heap),
                    None => Ok(Value::Undefined),
                };
            }
        }
        Ok(Value::Undefined)
    }

    fn symbol_property(&mut self, sym: SymbolId, key: PropKey) -> Value {
        if let PropKey::Str(name) = key
            && name == intern("description")
        {
            return match symbol_description(sym) {
                Some(desc) => Value::of_owned_string(desc, &mut self.heap).unwrap_or(Value::Undefined),
                None => Value::Undefined,
            };
        }
        Value::Undefined
    }

    /// Lazily creates a function's `.prototype` object (with its
    /// `constructor` back-reference).
    pub(crate) fn ensure_function_prototype(&mut self, func_id: HeapId) -> RunResult<Value> {
        if let HeapData::Function(f) = self.heap.get(func_id)
            && let Some(proto) = f.prototype()
        {
            self.heap.inc_ref(proto);
            return Ok(Value::Ref(proto));
        }
        let parent = self.object_proto;
        if let Some(parent) = parent {
            self.heap.inc_ref(parent);
        }
        let proto = self.alloc(HeapData::Object(JsObject::new(parent)))?;
        // prototype.constructor -> function (a deliberate cycle).
        self.heap.inc_ref(func_id);
        self.object_set_raw(proto, PropKey::Str(*well_known::CONSTRUCTOR), Value::Ref(func_id));
        match self.heap.get_mut(func_id) {
            HeapData::Function(f) => {
                // One reference stays with the function; the caller gets a
                // second.
                if let Some(old) = f.set_prototype(proto) {
                    self.heap.dec_ref(old);
                }
            }
            other => unreachable!("function id holds {kind}", kind = other.type_name()),
        }
        self.heap.inc_ref(proto);
        Ok(Value::Ref(proto))
    }

    // ========================================================================
    // Property writes
    // ========================================================================

    /// Property write. Consumes `value`. Read-only misses are silent
    /// (sloppy-mode semantics); accessor setters run synchronously.
    pub(crate) fn set_property(&mut self, object: &Value, key: PropKey, value: Value) -> RunResult<()> {
        match object {
            Value::Undefined | Value::Null => {
                value.drop_with_heap(&mut self.heap);
                Err(RunError::type_error(format!(
                    "Cannot set properties of {base} (setting {key})",
                    base = object.type_of(&self.heap),
                    key = key.describe()
                )))
            }
            Value::Ref(id) => self.set_heap_property(*id, key, value),
            _ => {
                // Writes to primitives are silently dropped.
                value.drop_with_heap(&mut self.heap);
                Ok(())
            }
        }
    }

    fn set_heap_property(&mut self, id: HeapId, key: PropKey, value: Value) -> RunResult<()> {
        enum Outcome {
            Done,
            CallSetter(Value, Value),
        }
        let outcome = match self.heap.get(id) {
            HeapData::Object(_) => {
                // Walk the prototype chain for an accessor before storing an
                // own property.
                if let Some(setter) = self.find_setter(id, key) {
                    Outcome::CallSetter(setter, value)
                } else {
                    let mut data = self.heap.take_data(id);
                    let result = if let HeapData::Object(obj) = &mut data {
                        obj.set_own(key, value, &mut self.shapes)
                    } else {
                        unreachable!("object kind changed during write")
                    };
                    self.heap.restore_data(id, data);
                    match result {
                        SetSlot::Done(old) => {
                            if let Some(old) = old {
                                old.drop_with_heap(&mut self.heap);
                            }
                            Outcome::Done
                        }
                        SetSlot::NotWritable(value) | SetSlot::NoSetter(value) => {
                            value.drop_with_heap(&mut self.heap);
                            Outcome::Done
                        }
                        SetSlot::Setter { setter, value } => {
                            let setter = setter.clone_with_heap(&self.heap);
                            Outcome::CallSetter(setter, value)
                        }
                    }
                }
            }
            HeapData::Array(_) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::LENGTH {
                        let new_len = value.to_number(&self.heap)?;
                        value.drop_with_heap(&mut self.heap);
                        let Some(new_len) = array_index(new_len) else {
                            return Err(RunError::range_error("Invalid array length"));
                        };
                        let truncated = match self.heap.get_mut(id) {
                            HeapData::Array(arr) => arr.set_length(new_len),
                            _ => unreachable!("array kind changed during write"),
                        };
                        for cut in truncated {
                            cut.drop_with_heap(&mut self.heap);
                        }
                        return Ok(());
                    }
                    if let Some(index) = parse_index(name) {
                        let old = match self.heap.get_mut(id) {
                            HeapData::Array(arr) => arr.set_index(index, value),
                            _ => unreachable!("array kind changed during write"),
                        };
                        if let Some(old) = old {
                            old.drop_with_heap(&mut self.heap);
                        }
                        return Ok(());
                    }
                }
                value.drop_with_heap(&mut self.heap);
                Outcome::Done
            }
            HeapData::Error(_) => {
                if let PropKey::Str(name) = key {
                    let old = match self.heap.get_mut(id) {
                        HeapData::Error(err) => err.set_extra(name, value),
                        _ => unreachable!("error kind changed during write"),
                    };
                    if let Some(old) = old {
                        old.drop_with_heap(&mut self.heap);
                    }
                } else {
                    value.drop_with_heap(&mut self.heap);
                }
                Outcome::Done
            }
            HeapData::TypedArray(_) => {
                if let PropKey::Str(name) = key
                    && let Some(index) = parse_index(name)
                {
                    let mut data = self.heap.take_data(id);
                    let result = if let HeapData::TypedArray(ta) = &mut data {
                        ta.set(index, value, &mut self.heap)
                    } else {
                        unreachable!("typed array kind changed during write")
                    };
                    self.heap.restore_data(id, data);
                    result?;
                    return Ok(());
                }
                value.drop_with_heap(&mut self.heap);
                Outcome::Done
            }
            HeapData::Function(_) => {
                if let PropKey::Str(name) = key
                    && name == *well_known::PROTOTYPE
                    && let Value::Ref(proto) = value
                {
                    let old = match self.heap.get_mut(id) {
                        HeapData::Function(f) => f.set_prototype(proto),
                        _ => unreachable!("function kind changed during write"),
                    };
                    if let Some(old) = old {
                        self.heap.dec_ref(old);
                    }
                    return Ok(());
                }
                value.drop_with_heap(&mut self.heap);
                Outcome::Done
            }
            _ => {
                value.drop_with_heap(&mut self.heap);
                Outcome::Done
            }
        };
        match outcome {
            Outcome::Done => Ok(()),
            Outcome::CallSetter(setter, value) => {
                self.heap.inc_ref(id);
                let result = self.call_value_sync(setter, Value::Ref(id), vec![value])?;
                result.drop_with_heap(&mut self.heap);
                Ok(())
            }
        }
    }

    /// Finds an accessor setter for `key` along the prototype chain
    /// (receiver's own accessors are handled by `set_own`).
    fn find_setter(&self, id: HeapId, key: PropKey) -> Option<Value> {
        let mut current = {
            let HeapData::Object(obj) = self.heap.get(id) else {
                return None;
            };
            if obj.has_own(key, &self.shapes) {
                // Own property (data or accessor): set_own handles it.
                return None;
            }
            obj.proto()?
        };
        loop {
            let HeapData::Object(obj) = self.heap.get(current) else {
                return None;
            };
            match obj.get_own(key, &self.shapes) {
                OwnGet::Data(_) => return None,
                OwnGet::Getter(_) => {
                    // Re-read as a full descriptor to find the setter half.
                    return obj.setter_of(key, &self.shapes).map(|s| s.clone_with_heap(&self.heap));
                }
                OwnGet::Missing => match obj.proto() {
                    Some(proto) => current = proto,
                    None => return None,
                },
            }
        }
    }

    // ========================================================================
    // delete / has
    // ========================================================================

    /// `delete obj[key]`; shaped receivers transition to dictionary mode.
    pub(crate) fn delete_property(&mut self, object: &Value, key: PropKey) -> RunResult<bool> {
        match object {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Object(_) => {
                    let mut data = self.heap.take_data(*id);
                    let removed = if let HeapData::Object(obj) = &mut data {
                        obj.delete(key, &self.shapes)
                    } else {
                        None
                    };
                    self.heap.restore_data(*id, data);
                    if let Some(values) = removed {
                        for value in values {
                            value.drop_with_heap(&mut self.heap);
                        }
                    }
                    Ok(true)
                }
                HeapData::Array(_) => {
                    if let PropKey::Str(name) = key
                        && let Some(index) = parse_index(name)
                    {
                        let old = match self.heap.get_mut(*id) {
                            HeapData::Array(arr) if index < arr.len() => arr.set_index(index, Value::Undefined),
                            _ => None,
                        };
                        if let Some(old) = old {
                            old.drop_with_heap(&mut self.heap);
                        }
                    }
                    Ok(true)
                }
                HeapData::Error(_) => {
                    if let PropKey::Str(name) = key {
                        let old = match self.heap.get_mut(*id) {
                            HeapData::Error(err) => err.extra_remove(name),
                            _ => None,
                        };
                        if let Some(old) = old {
                            old.drop_with_heap(&mut self.heap);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(true),
            },
            Value::Undefined | Value::Null => Err(RunError::type_error(format!(
                "Cannot convert {base} to object",
                base = object.type_of(&self.heap)
            ))),
            _ => Ok(true),
        }
    }

    /// `key in object`: own-or-inherited, no getter invocation.
    pub(crate) fn has_property(&self, object: &Value, key: PropKey) -> RunResult<bool> {
        let Value::Ref(id) = object else {
            return Err(RunError::type_error(
                "Cannot use 'in' operator to search in a non-object",
            ));
        };
        match self.heap.get(*id) {
            HeapData::Object(_) => {
                let mut current = *id;
                loop {
                    let HeapData::Object(obj) = self.heap.get(current) else {
                        return Ok(false);
                    };
                    if obj.has_own(key, &self.shapes) {
                        return Ok(true);
                    }
                    match obj.proto() {
                        Some(proto) => current = proto,
                        None => return Ok(false),
                    }
                }
            }
            HeapData::Array(arr) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::LENGTH {
                        return Ok(true);
                    }
                    if let Some(index) = parse_index(name) {
                        return Ok(index < arr.len());
                    }
                }
                Ok(false)
            }
            HeapData::Error(err) => {
                if let PropKey::Str(name) = key {
                    if name == *well_known::NAME || name == *well_known::MESSAGE || name == *well_known::STACK {
                        return Ok(true);
                    }
                    return Ok(err.extra().contains_key(&name));
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

/// Parses a property name as an array index.
pub(crate) fn parse_index(name: Istr) -> Option<usize> {
    let text = name.as_str();
    if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
        return None;
    }
    text.parse().ok()
}

/// Canonical property key for a numeric index.
pub(crate) fn index_key(index: f64) -> PropKey {
    PropKey::Str(intern_unbounded(&number_to_string(index)))
}
