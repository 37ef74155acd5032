//! The iteration protocol: iterator acquisition, `next`, closing, `yield*`
//! delegation, and `for...in` key collection.
//!
//! Built-in iterables (arrays, strings by code point, Map, Set) step
//! without allocating an iterator object. Generators resume their own
//! nested task. Everything else goes through `[Symbol.iterator]()` and a
//! `next` method, called synchronously.

use ahash::AHashSet;

use crate::{
    error::{RunError, RunResult, Throwable},
    heap::{HeapData, HeapId},
    intern::{Istr, SymbolId, intern, intern_unbounded, well_known},
    interp::{
        Frame, FrameKind, Interpreter, ResumeInput, StepFlow, TaskState,
        frame::{IterHandle, TaskFlow, UnwindKind},
    },
    object::{JsArray, PropKey},
    value::Value,
};

impl Interpreter {
    /// Acquires an iteration handle for `value`. Consumes `value`.
    pub(crate) fn get_iterator(&mut self, value: Value) -> RunResult<IterHandle> {
        match &value {
            Value::Str(_) => return Ok(IterHandle::Str {
                string: value,
                byte_index: 0,
            }),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::String(_) => {
                    return Ok(IterHandle::Str {
                        string: value,
                        byte_index: 0,
                    });
                }
                HeapData::Array(_) => return Ok(IterHandle::Array { array: value, index: 0 }),
                HeapData::Map(_) => return Ok(IterHandle::MapEntries { map: value, index: 0 }),
                HeapData::Set(_) => return Ok(IterHandle::SetValues { set: value, index: 0 }),
                HeapData::Generator(_) => return Ok(IterHandle::Generator { generator: value }),
                HeapData::Object(_) => {}
                _ => {
                    let message = format!(
                        "{kind} is not iterable",
                        kind = self.heap.get(*id).type_name()
                    );
                    value.drop_with_heap(&mut self.heap);
                    return Err(RunError::type_error(message));
                }
            },
            _ => {
                let message = format!(
                    "{shown} is not iterable",
                    shown = value.to_display_string(&self.heap, &self.shapes)
                );
                value.drop_with_heap(&mut self.heap);
                return Err(RunError::type_error(message));
            }
        }
        // Protocol path: call `[Symbol.iterator]()`, keep its `next`.
        let method = self.get_property(&value, PropKey::Sym(SymbolId::ITERATOR))?;
        if !method.is_callable(&self.heap) {
            method.drop_with_heap(&mut self.heap);
            value.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error("value is not iterable"));
        }
        let this = value.clone_with_heap(&self.heap);
        let iterator = self.call_value_sync(method, this, Vec::new())?;
        value.drop_with_heap(&mut self.heap);
        // A generator returned from a custom `[Symbol.iterator]` steps
        // directly.
        if let Value::Ref(id) = &iterator
            && matches!(self.heap.get(*id), HeapData::Generator(_))
        {
            return Ok(IterHandle::Generator { generator: iterator });
        }
        let next_fn = self.get_property(&iterator, PropKey::Str(*well_known::NEXT))?;
        if !next_fn.is_callable(&self.heap) {
            next_fn.drop_with_heap(&mut self.heap);
            iterator.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error("iterator has no callable next method"));
        }
        Ok(IterHandle::Protocol { iterator, next_fn })
    }

    /// Pulls the next element; `None` means the source is exhausted.
    pub(crate) fn iter_next(&mut self, iter: &mut IterHandle) -> RunResult<Option<Value>> {
        match iter {
            IterHandle::Array { array, index } => {
                let Value::Ref(id) = array else {
                    unreachable!("array handle holds a non-ref");
                };
                let HeapData::Array(arr) = self.heap.get(*id) else {
                    return Ok(None);
                };
                match arr.get_index(*index) {
                    Some(value) => {
                        let value = value.clone_with_heap(&self.heap);
                        *index += 1;
                        Ok(Some(value))
                    }
                    None => Ok(None),
                }
            }
            IterHandle::Str { string, byte_index } => {
                let Some(text) = string.as_str(&self.heap) else {
                    return Ok(None);
                };
                let Some(c) = text[*byte_index..].chars().next() else {
                    return Ok(None);
                };
                *byte_index += c.len_utf8();
                let out = c.to_string();
                Ok(Some(Value::of_owned_string(out, &mut self.heap)?))
            }
            IterHandle::MapEntries { map, index } => {
                let Value::Ref(id) = map else {
                    unreachable!("map handle holds a non-ref");
                };
                let pair = {
                    let HeapData::Map(m) = self.heap.get(*id) else {
                        return Ok(None);
                    };
                    m.entries().get(*index).map(|(k, v)| {
                        (k.clone_with_heap(&self.heap), v.clone_with_heap(&self.heap))
                    })
                };
                match pair {
                    Some((key, value)) => {
                        *index += 1;
                        let id = self.alloc(HeapData::Array(JsArray::with_elements(vec![key, value])))?;
                        Ok(Some(Value::Ref(id)))
                    }
                    None => Ok(None),
                }
            }
            IterHandle::SetValues { set, index } => {
                let Value::Ref(id) = set else {
                    unreachable!("set handle holds a non-ref");
                };
                let HeapData::Set(s) = self.heap.get(*id) else {
                    return Ok(None);
                };
                match s.entries().get(*index) {
                    Some(value) => {
                        let value = value.clone_with_heap(&self.heap);
                        *index += 1;
                        Ok(Some(value))
                    }
                    None => Ok(None),
                }
            }
            IterHandle::Generator { generator } => {
                let Value::Ref(id) = generator else {
                    unreachable!("generator handle holds a non-ref");
                };
                let id = *id;
                let step = self.generator_next(id, Value::Undefined)?;
                if step.done {
                    step.value.drop_with_heap(&mut self.heap);
                    Ok(None)
                } else {
                    Ok(Some(step.value))
                }
            }
            IterHandle::Protocol { iterator, next_fn } => {
                let this = iterator.clone_with_heap(&self.heap);
                let func = next_fn.clone_with_heap(&self.heap);
                let result = self.call_value_sync(func, this, Vec::new())?;
                let done = self.get_property(&result, PropKey::Str(*well_known::DONE))?;
                let finished = done.to_boolean(&self.heap);
                done.drop_with_heap(&mut self.heap);
                if finished {
                    result.drop_with_heap(&mut self.heap);
                    return Ok(None);
                }
                let value = self.get_property(&result, PropKey::Str(*well_known::VALUE))?;
                result.drop_with_heap(&mut self.heap);
                Ok(Some(value))
            }
        }
    }

    /// Closes an abandoned iterator (early `break`, throw, or abrupt
    /// unwind): generators run their `finally` blocks via `return()`.
    pub(crate) fn iter_close(&mut self, iter: IterHandle) {
        match iter {
            IterHandle::Generator { generator } => {
                if let Value::Ref(id) = &generator {
                    let id = *id;
                    match self.generator_return(id, Value::Undefined) {
                        Ok(step) => step.value.drop_with_heap(&mut self.heap),
                        Err(RunError::Throw(thrown)) => self.discard_throwable(thrown),
                        Err(RunError::Fatal(fatal)) => {
                            self.host_errors
                                .push(crate::error::Error::from_fatal(&fatal, Vec::new()));
                        }
                    }
                }
                generator.drop_with_heap(&mut self.heap);
            }
            IterHandle::Protocol { iterator, next_fn } => {
                next_fn.drop_with_heap(&mut self.heap);
                match self.get_property(&iterator, PropKey::Str(intern("return"))) {
                    Ok(ret) if ret.is_callable(&self.heap) => {
                        let this = iterator.clone_with_heap(&self.heap);
                        match self.call_value_sync(ret, this, Vec::new()) {
                            Ok(result) => result.drop_with_heap(&mut self.heap),
                            Err(RunError::Throw(thrown)) => self.discard_throwable(thrown),
                            Err(RunError::Fatal(fatal)) => {
                                self.host_errors
                                    .push(crate::error::Error::from_fatal(&fatal, Vec::new()));
                            }
                        }
                    }
                    Ok(ret) => ret.drop_with_heap(&mut self.heap),
                    Err(RunError::Throw(thrown)) => self.discard_throwable(thrown),
                    Err(RunError::Fatal(fatal)) => {
                        self.host_errors
                            .push(crate::error::Error::from_fatal(&fatal, Vec::new()));
                    }
                }
                iterator.drop_with_heap(&mut self.heap);
            }
            other => {
                let mut values = Vec::new();
                other.take_values(&mut values);
                for value in values {
                    value.drop_with_heap(&mut self.heap);
                }
            }
        }
    }

    fn discard_throwable(&mut self, thrown: Throwable) {
        if let Throwable::Value(value) = thrown {
            value.drop_with_heap(&mut self.heap);
        }
    }

    /// Own-and-inherited enumerable string keys, insertion order, first
    /// occurrence wins (`for...in` order for shaped objects).
    pub(crate) fn for_in_keys(&mut self, value: &Value) -> Vec<Istr> {
        let mut keys = Vec::new();
        let mut seen = AHashSet::new();
        let Value::Ref(id) = value else {
            return keys;
        };
        match self.heap.get(*id) {
            HeapData::Array(arr) => {
                for index in 0..arr.len() {
                    keys.push(intern_unbounded(&index.to_string()));
                }
            }
            HeapData::Object(_) => {
                let mut current = Some(*id);
                while let Some(obj_id) = current {
                    let HeapData::Object(obj) = self.heap.get(obj_id) else {
                        break;
                    };
                    for key in obj.enumerable_string_keys(&self.shapes) {
                        if seen.insert(key) {
                            keys.push(key);
                        }
                    }
                    current = obj.proto();
                }
            }
            HeapData::Error(err) => {
                for key in err.extra().keys() {
                    if seen.insert(*key) {
                        keys.push(*key);
                    }
                }
            }
            _ => {}
        }
        keys
    }

    // ========================================================================
    // yield* delegation
    // ========================================================================

    /// Normal `Delegate` frame visit (or a `next(sent)` forwarded by
    /// [`Self::delegate_feed`]): pull the next element, yield it or finish.
    pub(crate) fn delegate_step(
        &mut self,
        task: &mut TaskState,
        mut iter: IterHandle,
        sent: Option<Value>,
    ) -> RunResult<StepFlow> {
        let step = match (&mut iter, sent) {
            (IterHandle::Generator { generator }, sent) => {
                let Value::Ref(id) = generator else {
                    unreachable!("generator handle holds a non-ref");
                };
                let id = *id;
                let sent = sent.unwrap_or(Value::Undefined);
                let step = self.generator_next(id, sent)?;
                if step.done { Err(step.value) } else { Ok(step.value) }
            }
            (_, sent) => {
                if let Some(sent) = sent {
                    sent.drop_with_heap(&mut self.heap);
                }
                match self.iter_next(&mut iter)? {
                    Some(value) => Ok(value),
                    None => Err(Value::Undefined),
                }
            }
        };
        match step {
            Ok(value) => {
                task.push_frame(FrameKind::Delegate { iter });
                Ok(StepFlow::Suspend(TaskFlow::Yield(value)))
            }
            Err(completion) => {
                // The inner iterator finished: its completion value is the
                // value of the `yield*` expression.
                let mut leftovers = Vec::new();
                iter.take_values(&mut leftovers);
                for value in leftovers {
                    value.drop_with_heap(&mut self.heap);
                }
                task.values.push(completion);
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Routes a resume input arriving at a `Delegate` suspension:
    /// `next`/`throw`/`return` forward to the inner iterator.
    pub(crate) fn delegate_feed(
        &mut self,
        task: &mut TaskState,
        frame: Frame,
        input: ResumeInput,
    ) -> RunResult<Option<TaskFlow>> {
        let FrameKind::Delegate { iter } = frame.kind else {
            unreachable!("delegate feed on a non-delegate frame");
        };
        match input {
            ResumeInput::Start => unreachable!("delegation cannot be the first frame"),
            ResumeInput::Value(value) => match self.delegate_step(task, iter, Some(value))? {
                StepFlow::Suspend(flow) => Ok(Some(flow)),
                _ => Ok(None),
            },
            ResumeInput::Throw(reason) => {
                if let IterHandle::Generator { generator } = &iter {
                    let Value::Ref(id) = generator else {
                        unreachable!("generator handle holds a non-ref");
                    };
                    let id = *id;
                    match self.generator_throw(id, reason) {
                        Ok(step) => {
                            if step.done {
                                let mut leftovers = Vec::new();
                                iter.take_values(&mut leftovers);
                                for value in leftovers {
                                    value.drop_with_heap(&mut self.heap);
                                }
                                task.values.push(step.value);
                                Ok(None)
                            } else {
                                task.push_frame(FrameKind::Delegate { iter });
                                Ok(Some(TaskFlow::Yield(step.value)))
                            }
                        }
                        Err(err) => {
                            let mut leftovers = Vec::new();
                            iter.take_values(&mut leftovers);
                            for value in leftovers {
                                value.drop_with_heap(&mut self.heap);
                            }
                            match err {
                                RunError::Throw(thrown) => {
                                    match self.unwind(task, UnwindKind::Throw(thrown))? {
                                        StepFlow::Finished(value) => Ok(Some(TaskFlow::Done(value))),
                                        StepFlow::Suspend(flow) => Ok(Some(flow)),
                                        StepFlow::Continue => Ok(None),
                                    }
                                }
                                fatal => Err(fatal),
                            }
                        }
                    }
                } else {
                    // Non-generator iterators have no throw path: close the
                    // iterator and rethrow in the delegating body.
                    self.iter_close(iter);
                    match self.unwind(task, UnwindKind::Throw(Throwable::Value(reason)))? {
                        StepFlow::Finished(value) => Ok(Some(TaskFlow::Done(value))),
                        StepFlow::Suspend(flow) => Ok(Some(flow)),
                        StepFlow::Continue => Ok(None),
                    }
                }
            }
            ResumeInput::ReturnInto(value) => {
                if let IterHandle::Generator { generator } = &iter {
                    let Value::Ref(id) = generator else {
                        unreachable!("generator handle holds a non-ref");
                    };
                    let id = *id;
                    match self.generator_return(id, value) {
                        Ok(step) => {
                            if step.done {
                                let mut leftovers = Vec::new();
                                iter.take_values(&mut leftovers);
                                for leftover in leftovers {
                                    leftover.drop_with_heap(&mut self.heap);
                                }
                                match self.unwind(task, UnwindKind::Return(step.value))? {
                                    StepFlow::Finished(done) => Ok(Some(TaskFlow::Done(done))),
                                    StepFlow::Suspend(flow) => Ok(Some(flow)),
                                    StepFlow::Continue => Ok(None),
                                }
                            } else {
                                task.push_frame(FrameKind::Delegate { iter });
                                Ok(Some(TaskFlow::Yield(step.value)))
                            }
                        }
                        Err(err) => {
                            let mut leftovers = Vec::new();
                            iter.take_values(&mut leftovers);
                            for leftover in leftovers {
                                leftover.drop_with_heap(&mut self.heap);
                            }
                            Err(err)
                        }
                    }
                } else {
                    self.iter_close(iter);
                    match self.unwind(task, UnwindKind::Return(value))? {
                        StepFlow::Finished(done) => Ok(Some(TaskFlow::Done(done))),
                        StepFlow::Suspend(flow) => Ok(Some(flow)),
                        StepFlow::Continue => Ok(None),
                    }
                }
            }
        }
    }
}
