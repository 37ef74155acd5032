//! The host-exposed global surface: `console.log`, `queueMicrotask`, the
//! `Promise` machinery, error constructors, collections, `Symbol`, and the
//! prototype objects the engine itself consults.
//!
//! Everything here is a registry of native functions plus the wiring that
//! installs them into a fresh global environment. Hosts extend the surface
//! with `define_global`; the built-in *method libraries* (Math, JSON, Date,
//! the full String/Array surfaces) live outside the engine.

use num_bigint::BigInt;
use smallvec::SmallVec;

use crate::{
    builtins::Builtin,
    env::{self, BindingKind},
    error::{ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{SymbolId, intern, well_known},
    interp::Interpreter,
    nativefn::{BoundNative, NativeId},
    object::{JsObject, PropKey},
    promise::{Handler, Reaction},
    types::{ElementKind, JsError, JsMap, JsSet, JsWeakMap, JsWeakSet, TypedArray},
    value::Value,
};

/// Native-function ids the engine dispatches to directly.
#[derive(Debug, Default)]
pub(crate) struct Hooks {
    // Promise prototype & statics.
    pub promise_then: Option<NativeId>,
    pub promise_catch: Option<NativeId>,
    pub promise_finally: Option<NativeId>,
    pub promise_resolve: Option<NativeId>,
    pub promise_reject: Option<NativeId>,
    pub promise_all: Option<NativeId>,
    pub promise_race: Option<NativeId>,
    pub promise_all_settled: Option<NativeId>,
    pub promise_any: Option<NativeId>,
    // Bound-native helpers behind the promise machinery.
    pub resolver: Option<NativeId>,
    pub rejecter: Option<NativeId>,
    pub resolve_with: Option<NativeId>,
    pub reject_with: Option<NativeId>,
    pub finally_fulfill: Option<NativeId>,
    pub finally_reject: Option<NativeId>,
    pub all_element: Option<NativeId>,
    pub settled_fulfill: Option<NativeId>,
    pub settled_reject: Option<NativeId>,
    pub any_element: Option<NativeId>,
    // Generator protocol.
    pub gen_next: Option<NativeId>,
    pub gen_return: Option<NativeId>,
    pub gen_throw: Option<NativeId>,
    pub gen_self: Option<NativeId>,
    // Collections.
    pub map_get: Option<NativeId>,
    pub map_set: Option<NativeId>,
    pub map_has: Option<NativeId>,
    pub map_delete: Option<NativeId>,
    pub map_clear: Option<NativeId>,
    pub set_add: Option<NativeId>,
    pub set_has: Option<NativeId>,
    pub set_delete: Option<NativeId>,
    pub set_clear: Option<NativeId>,
    pub weak_get: Option<NativeId>,
    pub weak_set: Option<NativeId>,
    pub weak_has: Option<NativeId>,
    pub weak_delete: Option<NativeId>,
    pub weak_add: Option<NativeId>,
    // Arrays.
    pub array_push: Option<NativeId>,
    pub array_pop: Option<NativeId>,
}

fn native_or_undefined(id: Option<NativeId>) -> Value {
    id.map_or(Value::Undefined, Value::Native)
}

/// Populates a fresh interpreter's global environment and intrinsics.
pub(crate) fn install(interp: &mut Interpreter) {
    let mut hooks = Hooks::default();
    hooks.promise_then = Some(interp.natives.register(intern("then"), n_promise_then));
    hooks.promise_catch = Some(interp.natives.register(intern("catch"), n_promise_catch));
    hooks.promise_finally = Some(interp.natives.register(intern("finally"), n_promise_finally));
    hooks.promise_resolve = Some(interp.natives.register(intern("resolve"), n_promise_resolve));
    hooks.promise_reject = Some(interp.natives.register(intern("reject"), n_promise_reject));
    hooks.promise_all = Some(interp.natives.register(intern("all"), n_promise_all));
    hooks.promise_race = Some(interp.natives.register(intern("race"), n_promise_race));
    hooks.promise_all_settled = Some(interp.natives.register(intern("allSettled"), n_promise_all_settled));
    hooks.promise_any = Some(interp.natives.register(intern("any"), n_promise_any));
    hooks.resolver = Some(interp.natives.register(intern("resolve"), n_resolver));
    hooks.rejecter = Some(interp.natives.register(intern("reject"), n_rejecter));
    hooks.resolve_with = Some(interp.natives.register(intern("resolveWith"), n_resolve_with));
    hooks.reject_with = Some(interp.natives.register(intern("rejectWith"), n_reject_with));
    hooks.finally_fulfill = Some(interp.natives.register(intern("onFinally"), n_finally_fulfill));
    hooks.finally_reject = Some(interp.natives.register(intern("onFinally"), n_finally_reject));
    hooks.all_element = Some(interp.natives.register(intern("allElement"), n_all_element));
    hooks.settled_fulfill = Some(interp.natives.register(intern("settledElement"), n_settled_fulfill));
    hooks.settled_reject = Some(interp.natives.register(intern("settledElement"), n_settled_reject));
    hooks.any_element = Some(interp.natives.register(intern("anyElement"), n_any_element));
    hooks.gen_next = Some(interp.natives.register(intern("next"), n_gen_next));
    hooks.gen_return = Some(interp.natives.register(intern("return"), n_gen_return));
    hooks.gen_throw = Some(interp.natives.register(intern("throw"), n_gen_throw));
    hooks.gen_self = Some(interp.natives.register(intern("[Symbol.iterator]"), n_gen_self));
    hooks.map_get = Some(interp.natives.register(intern("get"), n_map_get));
    hooks.map_set = Some(interp.natives.register(intern("set"), n_map_set));
    hooks.map_has = Some(interp.natives.register(intern("has"), n_map_has));
    hooks.map_delete = Some(interp.natives.register(intern("delete"), n_map_delete));
    hooks.map_clear = Some(interp.natives.register(intern("clear"), n_map_clear));
    hooks.set_add = Some(interp.natives.register(intern("add"), n_set_add));
    hooks.set_has = Some(interp.natives.register(intern("has"), n_set_has));
    hooks.set_delete = Some(interp.natives.register(intern("delete"), n_set_delete));
    hooks.set_clear = Some(interp.natives.register(intern("clear"), n_set_clear));
    hooks.weak_get = Some(interp.natives.register(intern("get"), n_weak_get));
    hooks.weak_set = Some(interp.natives.register(intern("set"), n_weak_set));
    hooks.weak_has = Some(interp.natives.register(intern("has"), n_weak_has));
    hooks.weak_delete = Some(interp.natives.register(intern("delete"), n_weak_delete));
    hooks.weak_add = Some(interp.natives.register(intern("add"), n_weak_add));
    hooks.array_push = Some(interp.natives.register(intern("push"), n_array_push));
    hooks.array_pop = Some(interp.natives.register(intern("pop"), n_array_pop));
    let console_log = interp.natives.register(intern("log"), n_console_log);
    let queue_microtask = interp.natives.register(intern("queueMicrotask"), n_queue_microtask);
    let has_own = interp.natives.register(intern("hasOwnProperty"), n_has_own_property);
    interp.hooks = hooks;

    // Object.prototype-equivalent, shared by object literals.
    let object_proto = interp
        .heap
        .allocate(HeapData::Object(JsObject::new(None)))
        .expect("fresh heap cannot be over its ceiling");
    interp.object_set_raw(object_proto, PropKey::Str(intern("hasOwnProperty")), Value::Native(has_own));
    interp.object_proto = Some(object_proto);

    // Array.prototype-equivalent.
    interp.heap.inc_ref(object_proto);
    let array_proto = interp
        .heap
        .allocate(HeapData::Object(JsObject::new(Some(object_proto))))
        .expect("fresh heap cannot be over its ceiling");
    interp.object_set_raw(
        array_proto,
        PropKey::Str(intern("push")),
        native_or_undefined(interp.hooks.array_push),
    );
    interp.object_set_raw(
        array_proto,
        PropKey::Str(intern("pop")),
        native_or_undefined(interp.hooks.array_pop),
    );
    interp.array_proto = Some(array_proto);

    // console object.
    interp.heap.inc_ref(object_proto);
    let console = interp
        .heap
        .allocate(HeapData::Object(JsObject::new(Some(object_proto))))
        .expect("fresh heap cannot be over its ceiling");
    interp.object_set_raw(console, PropKey::Str(intern("log")), Value::Native(console_log));
    interp.object_set_raw(console, PropKey::Str(intern("error")), Value::Native(console_log));

    let global = interp.global_env;
    let mut define = |interp: &mut Interpreter, name: &str, value: Value| {
        env::define(&mut interp.heap, global, intern(name), value, BindingKind::Const, true);
    };
    define(interp, "console", Value::Ref(console));
    define(interp, "undefined", Value::Undefined);
    define(interp, "NaN", Value::Number(f64::NAN));
    define(interp, "Infinity", Value::Number(f64::INFINITY));
    define(interp, "queueMicrotask", Value::Native(queue_microtask));
    define(interp, "Promise", Value::Builtin(Builtin::Promise));
    define(interp, "Symbol", Value::Builtin(Builtin::Symbol));
    define(interp, "Map", Value::Builtin(Builtin::Map));
    define(interp, "Set", Value::Builtin(Builtin::Set));
    define(interp, "WeakMap", Value::Builtin(Builtin::WeakMap));
    define(interp, "WeakSet", Value::Builtin(Builtin::WeakSet));
    for kind in [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
        ErrorKind::URIError,
        ErrorKind::EvalError,
    ] {
        define(interp, kind.into(), Value::Builtin(Builtin::Error(kind)));
    }
    for kind in [
        ElementKind::Int8,
        ElementKind::Uint8,
        ElementKind::Uint8Clamped,
        ElementKind::Int16,
        ElementKind::Uint16,
        ElementKind::Int32,
        ElementKind::Uint32,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::BigInt64,
        ElementKind::BigUint64,
    ] {
        define(interp, kind.type_name(), Value::Builtin(Builtin::TypedArray(kind)));
    }
}

impl Interpreter {
    // ========================================================================
    // Member tables for built-in kinds
    // ========================================================================

    pub(crate) fn promise_member(&self, key: PropKey) -> Value {
        let PropKey::Str(name) = key else {
            return Value::Undefined;
        };
        if name == *well_known::THEN {
            native_or_undefined(self.hooks.promise_then)
        } else if name == intern("catch") {
            native_or_undefined(self.hooks.promise_catch)
        } else if name == intern("finally") {
            native_or_undefined(self.hooks.promise_finally)
        } else {
            Value::Undefined
        }
    }

    pub(crate) fn generator_member(&self, key: PropKey) -> Value {
        match key {
            PropKey::Sym(sym) if sym == SymbolId::ITERATOR => native_or_undefined(self.hooks.gen_self),
            PropKey::Sym(sym) if sym == SymbolId::ASYNC_ITERATOR => native_or_undefined(self.hooks.gen_self),
            PropKey::Str(name) if name == *well_known::NEXT => native_or_undefined(self.hooks.gen_next),
            PropKey::Str(name) if name == intern("return") => native_or_undefined(self.hooks.gen_return),
            PropKey::Str(name) if name == intern("throw") => native_or_undefined(self.hooks.gen_throw),
            _ => Value::Undefined,
        }
    }

    pub(crate) fn map_member(&self, key: PropKey) -> Value {
        let PropKey::Str(name) = key else {
            return Value::Undefined;
        };
        if name == intern("get") {
            native_or_undefined(self.hooks.map_get)
        } else if name == intern("set") {
            native_or_undefined(self.hooks.map_set)
        } else if name == intern("has") {
            native_or_undefined(self.hooks.map_has)
        } else if name == intern("delete") {
            native_or_undefined(self.hooks.map_delete)
        } else if name == intern("clear") {
            native_or_undefined(self.hooks.map_clear)
        } else {
            Value::Undefined
        }
    }

    pub(crate) fn set_member(&self, key: PropKey) -> Value {
        let PropKey::Str(name) = key else {
            return Value::Undefined;
        };
        if name == intern("add") {
            native_or_undefined(self.hooks.set_add)
        } else if name == intern("has") {
            native_or_undefined(self.hooks.set_has)
        } else if name == intern("delete") {
            native_or_undefined(self.hooks.set_delete)
        } else if name == intern("clear") {
            native_or_undefined(self.hooks.set_clear)
        } else {
            Value::Undefined
        }
    }

    pub(crate) fn weak_member(&self, key: PropKey) -> Value {
        let PropKey::Str(name) = key else {
            return Value::Undefined;
        };
        if name == intern("get") {
            native_or_undefined(self.hooks.weak_get)
        } else if name == intern("set") {
            native_or_undefined(self.hooks.weak_set)
        } else if name == intern("has") {
            native_or_undefined(self.hooks.weak_has)
        } else if name == intern("delete") {
            native_or_undefined(self.hooks.weak_delete)
        } else if name == intern("add") {
            native_or_undefined(self.hooks.weak_add)
        } else {
            Value::Undefined
        }
    }

    pub(crate) fn builtin_member(&self, builtin: Builtin, key: PropKey) -> Value {
        match builtin {
            Builtin::Promise => {
                let PropKey::Str(name) = key else {
                    return Value::Undefined;
                };
                if name == intern("resolve") {
                    native_or_undefined(self.hooks.promise_resolve)
                } else if name == intern("reject") {
                    native_or_undefined(self.hooks.promise_reject)
                } else if name == intern("all") {
                    native_or_undefined(self.hooks.promise_all)
                } else if name == intern("race") {
                    native_or_undefined(self.hooks.promise_race)
                } else if name == intern("allSettled") {
                    native_or_undefined(self.hooks.promise_all_settled)
                } else if name == intern("any") {
                    native_or_undefined(self.hooks.promise_any)
                } else {
                    Value::Undefined
                }
            }
            Builtin::Symbol => {
                let PropKey::Str(name) = key else {
                    return Value::Undefined;
                };
                if name == intern("iterator") {
                    Value::Symbol(SymbolId::ITERATOR)
                } else if name == intern("asyncIterator") {
                    Value::Symbol(SymbolId::ASYNC_ITERATOR)
                } else {
                    Value::Undefined
                }
            }
            _ => {
                if let PropKey::Str(name) = key
                    && name == *well_known::NAME
                {
                    return Value::Str(intern(builtin.name()));
                }
                Value::Undefined
            }
        }
    }

    // ========================================================================
    // Built-in call/construct dispatch
    // ========================================================================

    /// Calls a built-in as a plain function.
    pub(crate) fn call_builtin(&mut self, builtin: Builtin, this: Value, args: Vec<Value>) -> RunResult<Value> {
        this.drop_with_heap(&mut self.heap);
        match builtin {
            // The error classes behave identically called or constructed.
            Builtin::Error(kind) => self.construct_error(kind, args),
            Builtin::Symbol => {
                let mut args = args.into_iter();
                let description = match args.next() {
                    Some(value) => {
                        let text = value.to_js_string(&self.heap);
                        value.drop_with_heap(&mut self.heap);
                        Some(text?)
                    }
                    None => None,
                };
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Ok(Value::Symbol(crate::intern::new_symbol(description.as_deref())))
            }
            other => {
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Err(RunError::type_error(format!(
                    "Constructor {name} requires 'new'",
                    name = other.name()
                )))
            }
        }
    }

    /// Constructs a built-in (`new Promise(...)`, `new Map()`, ...).
    pub(crate) fn construct_builtin(&mut self, builtin: Builtin, mut args: Vec<Value>) -> RunResult<Value> {
        match builtin {
            Builtin::Promise => {
                if args.is_empty() || !args[0].is_callable(&self.heap) {
                    for arg in args {
                        arg.drop_with_heap(&mut self.heap);
                    }
                    return Err(RunError::type_error("Promise resolver is not a function"));
                }
                let executor = args.remove(0);
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                let promise = self.new_promise()?;
                let resolve = self.bound_native(
                    self.hooks.resolver.expect("promise hooks installed"),
                    vec![self.promise_ref(promise)],
                )?;
                let reject = self.bound_native(
                    self.hooks.rejecter.expect("promise hooks installed"),
                    vec![self.promise_ref(promise)],
                )?;
                match self.call_value_sync(executor, Value::Undefined, vec![resolve, reject]) {
                    Ok(result) => result.drop_with_heap(&mut self.heap),
                    Err(RunError::Throw(thrown)) => {
                        let reason = self.throwable_to_value(thrown)?;
                        self.reject_promise(promise, reason);
                    }
                    Err(fatal) => {
                        self.heap.dec_ref(promise);
                        return Err(fatal);
                    }
                }
                Ok(Value::Ref(promise))
            }
            Builtin::Error(kind) => self.construct_error(kind, args),
            Builtin::Map => {
                let init = args.drain(..).next();
                let id = self.alloc(HeapData::Map(JsMap::new()))?;
                if let Some(init) = init {
                    if let Value::Ref(src) = &init
                        && matches!(self.heap.get(*src), HeapData::Array(_))
                    {
                        let len = match self.heap.get(*src) {
                            HeapData::Array(arr) => arr.len(),
                            _ => 0,
                        };
                        for index in 0..len {
                            let pair = match self.heap.get(*src) {
                                HeapData::Array(arr) => {
                                    arr.get_index(index).map(|p| p.clone_with_heap(&self.heap))
                                }
                                _ => None,
                            };
                            if let Some(pair) = pair {
                                let key = self.get_property(&pair, PropKey::Str(intern("0")))?;
                                let value = self.get_property(&pair, PropKey::Str(intern("1")))?;
                                pair.drop_with_heap(&mut self.heap);
                                let mut data = self.heap.take_data(id);
                                let displaced = match &mut data {
                                    HeapData::Map(map) => map.set(key, value, &self.heap),
                                    _ => unreachable!("just allocated a map"),
                                };
                                self.heap.restore_data(id, data);
                                for old in displaced {
                                    old.drop_with_heap(&mut self.heap);
                                }
                            }
                        }
                    }
                    init.drop_with_heap(&mut self.heap);
                }
                Ok(Value::Ref(id))
            }
            Builtin::Set => {
                let init = args.drain(..).next();
                let id = self.alloc(HeapData::Set(JsSet::new()))?;
                if let Some(init) = init {
                    if let Value::Ref(src) = &init
                        && matches!(self.heap.get(*src), HeapData::Array(_))
                    {
                        let len = match self.heap.get(*src) {
                            HeapData::Array(arr) => arr.len(),
                            _ => 0,
                        };
                        for index in 0..len {
                            let element = match self.heap.get(*src) {
                                HeapData::Array(arr) => {
                                    arr.get_index(index).map(|p| p.clone_with_heap(&self.heap))
                                }
                                _ => None,
                            };
                            if let Some(element) = element {
                                let mut data = self.heap.take_data(id);
                                let displaced = match &mut data {
                                    HeapData::Set(set) => set.add(element, &self.heap),
                                    _ => unreachable!("just allocated a set"),
                                };
                                self.heap.restore_data(id, data);
                                if let Some(old) = displaced {
                                    old.drop_with_heap(&mut self.heap);
                                }
                            }
                        }
                    }
                    init.drop_with_heap(&mut self.heap);
                }
                Ok(Value::Ref(id))
            }
            Builtin::WeakMap => {
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                let id = self.alloc(HeapData::WeakMap(JsWeakMap::new()))?;
                Ok(Value::Ref(id))
            }
            Builtin::WeakSet => {
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                let id = self.alloc(HeapData::WeakSet(JsWeakSet::new()))?;
                Ok(Value::Ref(id))
            }
            Builtin::TypedArray(kind) => {
                let len = match args.drain(..).next() {
                    Some(value) => {
                        let n = value.to_number(&self.heap);
                        value.drop_with_heap(&mut self.heap);
                        let n = n?;
                        crate::value::array_index(n)
                            .ok_or_else(|| RunError::range_error("Invalid typed array length"))?
                    }
                    None => 0,
                };
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                let id = self.alloc(HeapData::TypedArray(TypedArray::new(kind, len)))?;
                Ok(Value::Ref(id))
            }
            Builtin::Symbol => {
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Err(RunError::type_error("Symbol is not a constructor"))
            }
        }
    }

    fn construct_error(&mut self, kind: ErrorKind, args: Vec<Value>) -> RunResult<Value> {
        let mut args = args.into_iter();
        let message = match args.next() {
            Some(value) if !value.is_undefined() => {
                let text = value.to_js_string(&self.heap);
                value.drop_with_heap(&mut self.heap);
                text?
            }
            Some(value) => {
                value.drop_with_heap(&mut self.heap);
                String::new()
            }
            None => String::new(),
        };
        let cause = match args.next() {
            Some(options) => {
                let cause = self.get_property(&options, PropKey::Str(*well_known::CAUSE))?;
                options.drop_with_heap(&mut self.heap);
                if cause.is_undefined() {
                    cause.drop_with_heap(&mut self.heap);
                    None
                } else {
                    Some(cause)
                }
            }
            None => None,
        };
        for arg in args {
            arg.drop_with_heap(&mut self.heap);
        }
        let mut error = JsError::new(intern(kind.into()), message);
        error.set_frames(self.call_stack.capture());
        if let Some(cause) = cause {
            error = error.with_cause(cause);
        }
        let id = self.alloc(HeapData::Error(error))?;
        Ok(Value::Ref(id))
    }

    // ========================================================================
    // Bound-native plumbing
    // ========================================================================

    /// Allocates a bound native; the payload transfers in.
    pub(crate) fn bound_native(&mut self, func: NativeId, payload: Vec<Value>) -> RunResult<Value> {
        let id = self.alloc(HeapData::BoundNative(BoundNative { func, payload }))?;
        Ok(Value::Ref(id))
    }

    /// An owned `Value` handle to a promise id.
    fn promise_ref(&self, promise: HeapId) -> Value {
        self.heap.inc_ref(promise);
        Value::Ref(promise)
    }

    /// Collects an iterable argument into promise handles, wrapping plain
    /// values via resolution.
    fn collect_promises(&mut self, iterable: Value) -> RunResult<Vec<HeapId>> {
        let mut iter = self.get_iterator(iterable)?;
        let mut promises = Vec::new();
        loop {
            match self.iter_next(&mut iter) {
                Ok(Some(value)) => {
                    if let Value::Ref(id) = &value
                        && matches!(self.heap.get(*id), HeapData::Promise(_))
                    {
                        // The iteration's reference becomes the vec's.
                        promises.push(*id);
                        continue;
                    }
                    let promise = self.new_promise()?;
                    self.resolve_promise(promise, value)?;
                    promises.push(promise);
                }
                Ok(None) => break,
                Err(err) => {
                    self.iter_close(iter);
                    for promise in promises {
                        self.heap.dec_ref(promise);
                    }
                    return Err(err);
                }
            }
        }
        self.iter_close(iter);
        Ok(promises)
    }
}

// ============================================================================
// Native implementations
// ============================================================================

fn n_console_log(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let mut parts: SmallVec<[String; 4]> = SmallVec::new();
    for arg in &args {
        parts.push(arg.to_display_string(&interp.heap, &interp.shapes));
    }
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    interp.print.print(&parts.join(" "));
    Ok(Value::Undefined)
}

fn n_queue_microtask(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let callback = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    if !callback.is_callable(&interp.heap) {
        callback.drop_with_heap(&mut interp.heap);
        return Err(RunError::type_error("The callback provided to queueMicrotask must be a function"));
    }
    interp.enqueue_microtask_callback(callback);
    Ok(Value::Undefined)
}

fn n_has_own_property(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let key_value = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let key = match key_value.to_property_key(&interp.heap) {
        Ok(key) => key,
        Err(err) => {
            key_value.drop_with_heap(&mut interp.heap);
            this.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    key_value.drop_with_heap(&mut interp.heap);
    let result = match &this {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Object(obj) => obj.has_own(key, &interp.shapes),
            _ => false,
        },
        _ => false,
    };
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(result))
}

// ---- Promise prototype -----------------------------------------------------

fn promise_of(interp: &mut Interpreter, this: &Value) -> RunResult<HeapId> {
    if let Value::Ref(id) = this
        && matches!(interp.heap.get(*id), HeapData::Promise(_))
    {
        return Ok(*id);
    }
    Err(RunError::type_error("Receiver is not a Promise"))
}

fn n_promise_then(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let promise = match promise_of(interp, &this) {
        Ok(promise) => promise,
        Err(err) => {
            this.drop_with_heap(&mut interp.heap);
            for arg in args {
                arg.drop_with_heap(&mut interp.heap);
            }
            return Err(err);
        }
    };
    let on_fulfilled = if args.is_empty() { None } else { Some(args.remove(0)) };
    let on_rejected = if args.is_empty() { None } else { Some(args.remove(0)) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let derived = interp.promise_then(promise, on_fulfilled, on_rejected)?;
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Ref(derived))
}

fn n_promise_catch(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let on_rejected = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    n_promise_then(interp, this, vec![Value::Undefined, on_rejected])
}

fn n_promise_finally(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let promise = match promise_of(interp, &this) {
        Ok(promise) => promise,
        Err(err) => {
            this.drop_with_heap(&mut interp.heap);
            for arg in args {
                arg.drop_with_heap(&mut interp.heap);
            }
            return Err(err);
        }
    };
    let callback = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    if !callback.is_callable(&interp.heap) {
        // Per the protocol, a non-callable finally argument passes through.
        let result = interp.promise_then(promise, None, None)?;
        callback.drop_with_heap(&mut interp.heap);
        this.drop_with_heap(&mut interp.heap);
        return Ok(Value::Ref(result));
    }
    let derived = interp.new_promise()?;
    interp.heap.inc_ref(derived);
    let fulfill_cb = callback.clone_with_heap(&interp.heap);
    let on_fulfilled = interp.bound_native(
        interp.hooks.finally_fulfill.expect("promise hooks installed"),
        vec![fulfill_cb],
    )?;
    let on_rejected = interp.bound_native(
        interp.hooks.finally_reject.expect("promise hooks installed"),
        vec![callback],
    )?;
    interp.attach_reaction(
        promise,
        Reaction {
            on_fulfilled: Handler::Call(on_fulfilled),
            on_rejected: Handler::Call(on_rejected),
            capability: Some(derived),
        },
    );
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Ref(derived))
}

// ---- Promise executor / combinator helpers ---------------------------------

fn two_args(interp: &mut Interpreter, mut args: Vec<Value>) -> (Value, Value) {
    let first = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    let second = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    (first, second)
}

fn n_resolver(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let (promise, value) = two_args(interp, args);
    if let Value::Ref(id) = &promise {
        let id = *id;
        interp.resolve_promise(id, value)?;
    } else {
        value.drop_with_heap(&mut interp.heap);
    }
    promise.drop_with_heap(&mut interp.heap);
    Ok(Value::Undefined)
}

fn n_rejecter(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let (promise, reason) = two_args(interp, args);
    if let Value::Ref(id) = &promise {
        let id = *id;
        interp.reject_promise(id, reason);
    } else {
        reason.drop_with_heap(&mut interp.heap);
    }
    promise.drop_with_heap(&mut interp.heap);
    Ok(Value::Undefined)
}

fn n_resolve_with(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    n_resolver(interp, this, args)
}

fn n_reject_with(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    n_rejecter(interp, this, args)
}

fn n_finally_fulfill(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let (callback, value) = two_args(interp, args);
    let result = interp.call_value_sync(callback, Value::Undefined, Vec::new())?;
    result.drop_with_heap(&mut interp.heap);
    Ok(value)
}

fn n_finally_reject(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let (callback, reason) = two_args(interp, args);
    let result = interp.call_value_sync(callback, Value::Undefined, Vec::new())?;
    result.drop_with_heap(&mut interp.heap);
    Err(RunError::Throw(crate::error::Throwable::Value(reason)))
}

// ---- Promise statics -------------------------------------------------------

fn n_promise_resolve(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let value = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let promise = interp.new_promise()?;
    interp.resolve_promise(promise, value)?;
    Ok(Value::Ref(promise))
}

fn n_promise_reject(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let reason = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let promise = interp.new_promise()?;
    interp.reject_promise(promise, reason);
    Ok(Value::Ref(promise))
}

/// Shared combinator head: the iterable argument as promise handles plus a
/// fresh result promise.
fn combinator_head(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<(Vec<HeapId>, HeapId)> {
    this.drop_with_heap(&mut interp.heap);
    let iterable = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let promises = interp.collect_promises(iterable)?;
    let result = interp.new_promise()?;
    Ok((promises, result))
}

/// A `[remaining, results]` state array shared by a combinator's element
/// reactions.
fn combinator_state(interp: &mut Interpreter, count: usize) -> RunResult<HeapId> {
    let mut slots = Vec::new();
    slots.resize_with(count, || Value::Undefined);
    let results = interp.alloc(HeapData::Array(crate::object::JsArray::with_elements(slots)))?;
    let state = interp.alloc(HeapData::Array(crate::object::JsArray::with_elements(vec![
        Value::Number(count as f64),
        Value::Ref(results),
    ])))?;
    Ok(state)
}

fn n_promise_all(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let (promises, result) = combinator_head(interp, this, args)?;
    if promises.is_empty() {
        let empty = interp.alloc(HeapData::Array(crate::object::JsArray::new()))?;
        interp.resolve_promise(result, Value::Ref(empty))?;
        return Ok(Value::Ref(result));
    }
    let state = combinator_state(interp, promises.len())?;
    for (index, promise) in promises.iter().enumerate() {
        interp.heap.inc_ref(state);
        interp.heap.inc_ref(result);
        let on_fulfilled = interp.bound_native(
            interp.hooks.all_element.expect("promise hooks installed"),
            vec![Value::Ref(state), Value::Ref(result), Value::Number(index as f64)],
        )?;
        interp.heap.inc_ref(result);
        let on_rejected = interp.bound_native(
            interp.hooks.reject_with.expect("promise hooks installed"),
            vec![Value::Ref(result)],
        )?;
        interp.attach_reaction(
            *promise,
            Reaction {
                on_fulfilled: Handler::Call(on_fulfilled),
                on_rejected: Handler::Call(on_rejected),
                capability: None,
            },
        );
    }
    interp.heap.dec_ref(state);
    for promise in promises {
        interp.heap.dec_ref(promise);
    }
    Ok(Value::Ref(result))
}

/// One fulfilled element of `Promise.all`: record the value, resolve the
/// result once every slot is filled.
fn n_all_element(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let mut args = args.into_iter();
    let state = args.next().unwrap_or(Value::Undefined);
    let result = args.next().unwrap_or(Value::Undefined);
    let index = args.next().unwrap_or(Value::Undefined);
    let value = args.next().unwrap_or(Value::Undefined);
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let index = index.to_number(&interp.heap)? as usize;
    let (remaining, results_id) = {
        let Value::Ref(state_id) = &state else {
            unreachable!("combinator state is an array");
        };
        let HeapData::Array(arr) = interp.heap.get_mut(*state_id) else {
            unreachable!("combinator state is an array");
        };
        let remaining = match arr.get_index(0) {
            Some(Value::Number(n)) => *n - 1.0,
            _ => 0.0,
        };
        if let Some(old) = arr.set_index(0, Value::Number(remaining)) {
            debug_assert!(matches!(old, Value::Number(_)));
        }
        let results_id = match arr.get_index(1) {
            Some(Value::Ref(id)) => *id,
            _ => unreachable!("combinator results is an array"),
        };
        (remaining, results_id)
    };
    let old = match interp.heap.get_mut(results_id) {
        HeapData::Array(arr) => arr.set_index(index, value),
        _ => unreachable!("combinator results is an array"),
    };
    if let Some(old) = old {
        old.drop_with_heap(&mut interp.heap);
    }
    if remaining <= 0.0 {
        interp.heap.inc_ref(results_id);
        if let Value::Ref(result_id) = &result {
            let result_id = *result_id;
            interp.resolve_promise(result_id, Value::Ref(results_id))?;
        } else {
            interp.heap.dec_ref(results_id);
        }
    }
    state.drop_with_heap(&mut interp.heap);
    result.drop_with_heap(&mut interp.heap);
    Ok(Value::Undefined)
}

fn n_promise_race(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let (promises, result) = combinator_head(interp, this, args)?;
    for promise in &promises {
        interp.heap.inc_ref(result);
        let on_fulfilled = interp.bound_native(
            interp.hooks.resolve_with.expect("promise hooks installed"),
            vec![Value::Ref(result)],
        )?;
        interp.heap.inc_ref(result);
        let on_rejected = interp.bound_native(
            interp.hooks.reject_with.expect("promise hooks installed"),
            vec![Value::Ref(result)],
        )?;
        interp.attach_reaction(
            *promise,
            Reaction {
                on_fulfilled: Handler::Call(on_fulfilled),
                on_rejected: Handler::Call(on_rejected),
                capability: None,
            },
        );
    }
    for promise in promises {
        interp.heap.dec_ref(promise);
    }
    Ok(Value::Ref(result))
}

fn n_promise_all_settled(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let (promises, result) = combinator_head(interp, this, args)?;
    if promises.is_empty() {
        let empty = interp.alloc(HeapData::Array(crate::object::JsArray::new()))?;
        interp.resolve_promise(result, Value::Ref(empty))?;
        return Ok(Value::Ref(result));
    }
    let state = combinator_state(interp, promises.len())?;
    for (index, promise) in promises.iter().enumerate() {
        interp.heap.inc_ref(state);
        interp.heap.inc_ref(result);
        let on_fulfilled = interp.bound_native(
            interp.hooks.settled_fulfill.expect("promise hooks installed"),
            vec![Value::Ref(state), Value::Ref(result), Value::Number(index as f64)],
        )?;
        interp.heap.inc_ref(state);
        interp.heap.inc_ref(result);
        let on_rejected = interp.bound_native(
            interp.hooks.settled_reject.expect("promise hooks installed"),
            vec![Value::Ref(state), Value::Ref(result), Value::Number(index as f64)],
        )?;
        interp.attach_reaction(
            *promise,
            Reaction {
                on_fulfilled: Handler::Call(on_fulfilled),
                on_rejected: Handler::Call(on_rejected),
                capability: None,
            },
        );
    }
    interp.heap.dec_ref(state);
    for promise in promises {
        interp.heap.dec_ref(promise);
    }
    Ok(Value::Ref(result))
}

fn settled_element(interp: &mut Interpreter, args: Vec<Value>, rejected: bool) -> RunResult<Value> {
    let mut args = args.into_iter();
    let state = args.next().unwrap_or(Value::Undefined);
    let result = args.next().unwrap_or(Value::Undefined);
    let index = args.next().unwrap_or(Value::Undefined);
    let outcome = args.next().unwrap_or(Value::Undefined);
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    // Build the {status, value|reason} record.
    let proto = interp.object_proto;
    if let Some(proto) = proto {
        interp.heap.inc_ref(proto);
    }
    let record = interp.alloc(HeapData::Object(JsObject::new(proto)))?;
    let status = if rejected { *well_known::REJECTED } else { *well_known::FULFILLED };
    interp.object_set_raw(record, PropKey::Str(*well_known::STATUS), Value::Str(status));
    let slot = if rejected { *well_known::REASON } else { *well_known::VALUE };
    interp.object_set_raw(record, PropKey::Str(slot), outcome);
    // Reuse the all-element bookkeeping with the record as the value.
    n_all_element(interp, Value::Undefined, vec![state, result, index, Value::Ref(record)])
}

fn n_settled_fulfill(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    settled_element(interp, args, false)
}

fn n_settled_reject(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    settled_element(interp, args, true)
}

fn n_promise_any(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let (promises, result) = combinator_head(interp, this, args)?;
    if promises.is_empty() {
        let reason = interp.make_error_value(ErrorKind::Error, "All promises were rejected")?;
        interp.reject_promise(result, reason);
        return Ok(Value::Ref(result));
    }
    let state = combinator_state(interp, promises.len())?;
    for (index, promise) in promises.iter().enumerate() {
        interp.heap.inc_ref(result);
        let on_fulfilled = interp.bound_native(
            interp.hooks.resolve_with.expect("promise hooks installed"),
            vec![Value::Ref(result)],
        )?;
        interp.heap.inc_ref(state);
        interp.heap.inc_ref(result);
        let on_rejected = interp.bound_native(
            interp.hooks.any_element.expect("promise hooks installed"),
            vec![Value::Ref(state), Value::Ref(result), Value::Number(index as f64)],
        )?;
        interp.attach_reaction(
            *promise,
            Reaction {
                on_fulfilled: Handler::Call(on_fulfilled),
                on_rejected: Handler::Call(on_rejected),
                capability: None,
            },
        );
    }
    interp.heap.dec_ref(state);
    for promise in promises {
        interp.heap.dec_ref(promise);
    }
    Ok(Value::Ref(result))
}

/// One rejected element of `Promise.any`: when every promise has rejected,
/// reject the result.
fn n_any_element(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let mut args = args.into_iter();
    let state = args.next().unwrap_or(Value::Undefined);
    let result = args.next().unwrap_or(Value::Undefined);
    let _index = args.next().unwrap_or(Value::Undefined);
    let reason = args.next().unwrap_or(Value::Undefined);
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    reason.drop_with_heap(&mut interp.heap);
    let remaining = {
        let Value::Ref(state_id) = &state else {
            unreachable!("combinator state is an array");
        };
        let HeapData::Array(arr) = interp.heap.get_mut(*state_id) else {
            unreachable!("combinator state is an array");
        };
        let remaining = match arr.get_index(0) {
            Some(Value::Number(n)) => *n - 1.0,
            _ => 0.0,
        };
        let _ = arr.set_index(0, Value::Number(remaining));
        remaining
    };
    if remaining <= 0.0
        && let Value::Ref(result_id) = &result
    {
        let result_id = *result_id;
        let error = interp.make_error_value(ErrorKind::Error, "All promises were rejected")?;
        interp.reject_promise(result_id, error);
    }
    state.drop_with_heap(&mut interp.heap);
    result.drop_with_heap(&mut interp.heap);
    Ok(Value::Undefined)
}

// ---- Generator protocol ----------------------------------------------------

fn generator_of(interp: &Interpreter, this: &Value) -> RunResult<(HeapId, bool)> {
    if let Value::Ref(id) = this
        && let HeapData::Generator(gen_) = interp.heap.get(*id)
    {
        return Ok((*id, gen_.is_async()));
    }
    Err(RunError::type_error("Receiver is not a generator"))
}

fn n_gen_next(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let sent = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let (id, is_async) = match generator_of(interp, &this) {
        Ok(found) => found,
        Err(err) => {
            this.drop_with_heap(&mut interp.heap);
            sent.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    this.drop_with_heap(&mut interp.heap);
    if is_async {
        return interp.async_generator_step(id, crate::interp::ResumeInput::Value(sent));
    }
    let step = interp.generator_next(id, sent)?;
    interp.make_iter_result(step.value, step.done)
}

fn n_gen_return(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let sent = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let (id, is_async) = match generator_of(interp, &this) {
        Ok(found) => found,
        Err(err) => {
            this.drop_with_heap(&mut interp.heap);
            sent.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    this.drop_with_heap(&mut interp.heap);
    if is_async {
        return interp.async_generator_step(id, crate::interp::ResumeInput::ReturnInto(sent));
    }
    let step = interp.generator_return(id, sent)?;
    interp.make_iter_result(step.value, step.done)
}

fn n_gen_throw(interp: &mut Interpreter, this: Value, mut args: Vec<Value>) -> RunResult<Value> {
    let reason = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let (id, is_async) = match generator_of(interp, &this) {
        Ok(found) => found,
        Err(err) => {
            this.drop_with_heap(&mut interp.heap);
            reason.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    this.drop_with_heap(&mut interp.heap);
    if is_async {
        return interp.async_generator_step(id, crate::interp::ResumeInput::Throw(reason));
    }
    let step = interp.generator_throw(id, reason)?;
    interp.make_iter_result(step.value, step.done)
}

fn n_gen_self(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    // Generators are their own iterators.
    Ok(this)
}

// ---- Map / Set / weak collections ------------------------------------------

fn one_arg(interp: &mut Interpreter, mut args: Vec<Value>) -> Value {
    let first = if args.is_empty() { Value::Undefined } else { args.remove(0) };
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    first
}

fn n_map_get(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let key = one_arg(interp, args);
    let found = match &this {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Map(map) => Some(map.get(&key, &interp.heap).map(Value::shallow_copy)),
            _ => None,
        },
        _ => None,
    };
    let Some(found) = found else {
        key.drop_with_heap(&mut interp.heap);
        this.drop_with_heap(&mut interp.heap);
        return Err(RunError::type_error("Receiver is not a Map"));
    };
    let result = match found {
        Some(value) => value.clone_with_heap(&interp.heap),
        None => Value::Undefined,
    };
    key.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(result)
}

fn n_map_set(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let mut args = args.into_iter();
    let key = args.next().unwrap_or(Value::Undefined);
    let value = args.next().unwrap_or(Value::Undefined);
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let Value::Ref(id) = &this else {
        key.drop_with_heap(&mut interp.heap);
        value.drop_with_heap(&mut interp.heap);
        this.drop_with_heap(&mut interp.heap);
        return Err(RunError::type_error("Receiver is not a Map"));
    };
    let id = *id;
    let mut data = interp.heap.take_data(id);
    let displaced = match &mut data {
        HeapData::Map(map) => map.set(key, value, &interp.heap),
        _ => {
            interp.heap.restore_data(id, data);
            key.drop_with_heap(&mut interp.heap);
            value.drop_with_heap(&mut interp.heap);
            this.drop_with_heap(&mut interp.heap);
            return Err(RunError::type_error("Receiver is not a Map"));
        }
    };
    interp.heap.restore_data(id, data);
    for old in displaced {
        old.drop_with_heap(&mut interp.heap);
    }
    // Chainable: returns the map.
    Ok(this)
}

fn n_map_has(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let key = one_arg(interp, args);
    let result = match &this {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Map(map) => map.has(&key, &interp.heap),
            _ => false,
        },
        _ => false,
    };
    key.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(result))
}

fn n_map_delete(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let key = one_arg(interp, args);
    let removed = match &this {
        Value::Ref(id) => {
            let id = *id;
            let mut data = interp.heap.take_data(id);
            let removed = match &mut data {
                HeapData::Map(map) => map.delete(&key, &interp.heap),
                _ => None,
            };
            interp.heap.restore_data(id, data);
            removed
        }
        _ => None,
    };
    let found = removed.is_some();
    if let Some((k, v)) = removed {
        k.drop_with_heap(&mut interp.heap);
        v.drop_with_heap(&mut interp.heap);
    }
    key.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(found))
}

fn n_map_clear(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    if let Value::Ref(id) = &this {
        let id = *id;
        let values = match interp.heap.get_mut(id) {
            HeapData::Map(map) => map.clear(),
            HeapData::Set(set) => set.clear(),
            _ => Vec::new(),
        };
        for value in values {
            value.drop_with_heap(&mut interp.heap);
        }
    }
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Undefined)
}

fn n_set_add(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let value = one_arg(interp, args);
    let Value::Ref(id) = &this else {
        value.drop_with_heap(&mut interp.heap);
        this.drop_with_heap(&mut interp.heap);
        return Err(RunError::type_error("Receiver is not a Set"));
    };
    let id = *id;
    let mut data = interp.heap.take_data(id);
    let displaced = match &mut data {
        HeapData::Set(set) => set.add(value, &interp.heap),
        _ => {
            interp.heap.restore_data(id, data);
            value.drop_with_heap(&mut interp.heap);
            this.drop_with_heap(&mut interp.heap);
            return Err(RunError::type_error("Receiver is not a Set"));
        }
    };
    interp.heap.restore_data(id, data);
    if let Some(old) = displaced {
        old.drop_with_heap(&mut interp.heap);
    }
    Ok(this)
}

fn n_set_has(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let value = one_arg(interp, args);
    let result = match &this {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Set(set) => set.has(&value, &interp.heap),
            _ => false,
        },
        _ => false,
    };
    value.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(result))
}

fn n_set_delete(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let value = one_arg(interp, args);
    let removed = match &this {
        Value::Ref(id) => {
            let id = *id;
            let mut data = interp.heap.take_data(id);
            let removed = match &mut data {
                HeapData::Set(set) => set.delete(&value, &interp.heap),
                _ => None,
            };
            interp.heap.restore_data(id, data);
            removed
        }
        _ => None,
    };
    let found = removed.is_some();
    if let Some(old) = removed {
        old.drop_with_heap(&mut interp.heap);
    }
    value.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(found))
}

fn n_set_clear(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    n_map_clear(interp, this, args)
}

fn weak_key_of(interp: &mut Interpreter, value: &Value) -> RunResult<HeapId> {
    match value {
        Value::Ref(id) if value.is_object_like(&interp.heap) => Ok(*id),
        _ => Err(RunError::type_error("Invalid value used as weak map key")),
    }
}

fn n_weak_get(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let key = one_arg(interp, args);
    let result = match (&this, weak_key_of(interp, &key)) {
        (Value::Ref(id), Ok(key_id)) => match interp.heap.get(*id) {
            HeapData::WeakMap(wm) => wm.get(key_id, &interp.heap).map(|v| v.shallow_copy()),
            _ => None,
        },
        _ => None,
    };
    let result = match result {
        Some(value) => value.clone_with_heap(&interp.heap),
        None => Value::Undefined,
    };
    key.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(result)
}

fn n_weak_set(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let mut args = args.into_iter();
    let key = args.next().unwrap_or(Value::Undefined);
    let value = args.next().unwrap_or(Value::Undefined);
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let key_id = match weak_key_of(interp, &key) {
        Ok(key_id) => key_id,
        Err(err) => {
            key.drop_with_heap(&mut interp.heap);
            value.drop_with_heap(&mut interp.heap);
            this.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    if let Value::Ref(id) = &this {
        let id = *id;
        let mut data = interp.heap.take_data(id);
        let displaced = match &mut data {
            HeapData::WeakMap(wm) => wm.set(key_id, value, &interp.heap),
            _ => Some(value),
        };
        interp.heap.restore_data(id, data);
        if let Some(old) = displaced {
            old.drop_with_heap(&mut interp.heap);
        }
    } else {
        value.drop_with_heap(&mut interp.heap);
    }
    key.drop_with_heap(&mut interp.heap);
    Ok(this)
}

fn n_weak_has(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let key = one_arg(interp, args);
    let result = match (&this, weak_key_of(interp, &key)) {
        (Value::Ref(id), Ok(key_id)) => match interp.heap.get(*id) {
            HeapData::WeakMap(wm) => wm.has(key_id, &interp.heap),
            HeapData::WeakSet(ws) => ws.has(key_id, &interp.heap),
            _ => false,
        },
        _ => false,
    };
    key.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(result))
}

fn n_weak_delete(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let key = one_arg(interp, args);
    let mut found = false;
    if let (Value::Ref(id), Ok(key_id)) = (&this, weak_key_of(interp, &key)) {
        let id = *id;
        let mut data = interp.heap.take_data(id);
        let removed = match &mut data {
            HeapData::WeakMap(wm) => wm.delete(key_id, &interp.heap),
            HeapData::WeakSet(ws) => {
                found = ws.delete(key_id, &interp.heap);
                None
            }
            _ => None,
        };
        interp.heap.restore_data(id, data);
        if let Some(old) = removed {
            found = true;
            old.drop_with_heap(&mut interp.heap);
        }
    }
    key.drop_with_heap(&mut interp.heap);
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Bool(found))
}

fn n_weak_add(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let value = one_arg(interp, args);
    let key_id = match weak_key_of(interp, &value) {
        Ok(key_id) => key_id,
        Err(err) => {
            value.drop_with_heap(&mut interp.heap);
            this.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    if let Value::Ref(id) = &this {
        let id = *id;
        let mut data = interp.heap.take_data(id);
        if let HeapData::WeakSet(ws) = &mut data {
            ws.add(key_id, &interp.heap);
        }
        interp.heap.restore_data(id, data);
    }
    value.drop_with_heap(&mut interp.heap);
    Ok(this)
}

// ---- Arrays ----------------------------------------------------------------

fn n_array_push(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    let Value::Ref(id) = &this else {
        for arg in args {
            arg.drop_with_heap(&mut interp.heap);
        }
        this.drop_with_heap(&mut interp.heap);
        return Err(RunError::type_error("Receiver is not an Array"));
    };
    let id = *id;
    let len = match interp.heap.get_mut(id) {
        HeapData::Array(arr) => {
            for arg in args {
                arr.push(arg);
            }
            arr.len()
        }
        _ => {
            for arg in args {
                arg.drop_with_heap(&mut interp.heap);
            }
            this.drop_with_heap(&mut interp.heap);
            return Err(RunError::type_error("Receiver is not an Array"));
        }
    };
    this.drop_with_heap(&mut interp.heap);
    Ok(Value::Number(len as f64))
}

fn n_array_pop(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    for arg in args {
        arg.drop_with_heap(&mut interp.heap);
    }
    let result = match &this {
        Value::Ref(id) => match interp.heap.get_mut(*id) {
            HeapData::Array(arr) => arr.elements_mut().pop().unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        },
        _ => Value::Undefined,
    };
    this.drop_with_heap(&mut interp.heap);
    Ok(result)
}

/// BigInt constructor-style conversion is left to the host; the engine only
/// needs the literal form. Kept here so the symbol is one grep away if a
/// host wants to install it.
#[expect(dead_code)]
fn n_bigint(interp: &mut Interpreter, this: Value, args: Vec<Value>) -> RunResult<Value> {
    this.drop_with_heap(&mut interp.heap);
    let value = one_arg(interp, args);
    let big: BigInt = match value.to_bigint_value(&interp.heap) {
        Ok(big) => big,
        Err(err) => {
            value.drop_with_heap(&mut interp.heap);
            return Err(err);
        }
    };
    value.drop_with_heap(&mut interp.heap);
    Value::of_bigint(big, &mut interp.heap)
}
