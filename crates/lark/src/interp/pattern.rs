//! Destructuring: the recursive binding operation executed at declaration,
//! parameter, and assignment sites.
//!
//! A `Destructure` frame consumes the value on top of the operand stack and
//! binds it into the pattern. Array patterns pull eagerly from the
//! iteration protocol; object patterns walk property by property so
//! computed keys and nested defaults evaluate in source order; member
//! leaves (assignment sites like `[a.b] = xs`) evaluate their object parts
//! through ordinary frames.

use crate::{
    ast::{ExprKind, MemberProp, PatId, Pattern, PatternKey},
    env::{self, BindingKind},
    error::{RunError, RunResult},
    intern::Istr,
    interp::{BindMode, FrameKind, Interpreter, StepFlow, TaskState},
    object::{JsArray, JsObject, PropKey},
    value::Value,
};

impl Interpreter {
    /// Binds the stack-top value into `pat`.
    pub(crate) fn destructure_step(&mut self, task: &mut TaskState, pat: PatId, mode: BindMode) -> RunResult<StepFlow> {
        let program = task.program.clone();
        match program.pat(pat) {
            Pattern::Ident(name) => {
                let value = task.values.pop().expect("destructure value expected");
                self.bind_name(task, *name, value, mode)?;
                Ok(StepFlow::Continue)
            }
            Pattern::Default { inner, default } => {
                let is_undefined = task
                    .values
                    .last()
                    .expect("destructure value expected")
                    .is_undefined();
                if is_undefined {
                    let stale = task.values.pop().expect("value just observed");
                    stale.drop_with_heap(&mut self.heap);
                    task.push_frame(FrameKind::Destructure { pat: *inner, mode });
                    task.push_frame(FrameKind::Eval(*default));
                } else {
                    task.push_frame(FrameKind::Destructure { pat: *inner, mode });
                }
                Ok(StepFlow::Continue)
            }
            Pattern::Member(member) => {
                task.push_frame(FrameKind::MemberStore {
                    member: *member,
                    phase: 0,
                });
                Ok(StepFlow::Continue)
            }
            Pattern::Array { elements, rest } => {
                let source = task.values.pop().expect("destructure value expected");
                let mut iter = self.get_iterator(source)?;
                let mut bindings: Vec<(Value, PatId)> = Vec::new();
                let mut result = Ok(());
                for element in elements {
                    let next = match self.iter_next(&mut iter) {
                        Ok(next) => next.unwrap_or(Value::Undefined),
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    };
                    match element {
                        Some(sub) => bindings.push((next, *sub)),
                        None => next.drop_with_heap(&mut self.heap),
                    }
                }
                if result.is_ok()
                    && let Some(rest_pat) = rest
                {
                    let mut remainder = Vec::new();
                    loop {
                        match self.iter_next(&mut iter) {
                            Ok(Some(value)) => remainder.push(value),
                            Ok(None) => break,
                            Err(err) => {
                                result = Err(err);
                                break;
                            }
                        }
                    }
                    if result.is_ok() {
                        match self.alloc(crate::heap::HeapData::Array(JsArray::with_elements(remainder))) {
                            Ok(id) => bindings.push((Value::Ref(id), *rest_pat)),
                            Err(err) => result = Err(err),
                        }
                    } else {
                        for value in remainder {
                            value.drop_with_heap(&mut self.heap);
                        }
                    }
                }
                self.iter_close(iter);
                if let Err(err) = result {
                    for (value, _) in bindings {
                        value.drop_with_heap(&mut self.heap);
                    }
                    return Err(err);
                }
                // Reverse push order: the first element's frame must run
                // first (stack tops line up pairwise).
                for (value, sub) in bindings.into_iter().rev() {
                    task.values.push(value);
                    task.push_frame(FrameKind::Destructure { pat: sub, mode });
                }
                Ok(StepFlow::Continue)
            }
            Pattern::Object { .. } => {
                let source = task.values.pop().expect("destructure value expected");
                if source.is_nullish() {
                    let base = source.type_of(&self.heap);
                    source.drop_with_heap(&mut self.heap);
                    return Err(RunError::type_error(format!("Cannot destructure '{base}'")));
                }
                task.push_frame(FrameKind::ObjectPattern {
                    pat,
                    prop: 0,
                    mode,
                    key_ready: false,
                    source,
                    taken: Vec::new(),
                });
                Ok(StepFlow::Continue)
            }
        }
    }

    /// One object-pattern property step.
    pub(crate) fn object_pattern_step(
        &mut self,
        task: &mut TaskState,
        pat: PatId,
        prop: u32,
        mode: BindMode,
        key_ready: bool,
        source: Value,
        mut taken: Vec<Istr>,
    ) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let Pattern::Object { props, rest } = program.pat(pat) else {
            unreachable!("object pattern step on a non-object pattern");
        };
        let index = prop as usize;
        if index >= props.len() {
            // Rest element: fresh object with the unclaimed own properties.
            if let Some(rest_pat) = rest {
                let rest_obj = self.build_rest_object(&source, &taken)?;
                source.drop_with_heap(&mut self.heap);
                task.values.push(rest_obj);
                task.push_frame(FrameKind::Destructure { pat: *rest_pat, mode });
            } else {
                source.drop_with_heap(&mut self.heap);
            }
            return Ok(StepFlow::Continue);
        }
        let entry = &props[index];
        if key_ready {
            let key_value = task.values.pop().expect("pattern key expected");
            let key = match key_value.to_property_key(&self.heap) {
                Ok(key) => key,
                Err(err) => {
                    key_value.drop_with_heap(&mut self.heap);
                    source.drop_with_heap(&mut self.heap);
                    return Err(err);
                }
            };
            key_value.drop_with_heap(&mut self.heap);
            if let PropKey::Str(name) = key {
                taken.push(name);
            }
            let value = match self.get_property(&source, key) {
                Ok(value) => value,
                Err(err) => {
                    source.drop_with_heap(&mut self.heap);
                    return Err(err);
                }
            };
            let sub = entry.value;
            task.push_frame(FrameKind::ObjectPattern {
                pat,
                prop: prop + 1,
                mode,
                key_ready: false,
                source,
                taken,
            });
            task.values.push(value);
            task.push_frame(FrameKind::Destructure { pat: sub, mode });
            return Ok(StepFlow::Continue);
        }
        match &entry.key {
            PatternKey::Named(name) => {
                taken.push(*name);
                let value = match self.get_property(&source, PropKey::Str(*name)) {
                    Ok(value) => value,
                    Err(err) => {
                        source.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                let sub = entry.value;
                task.push_frame(FrameKind::ObjectPattern {
                    pat,
                    prop: prop + 1,
                    mode,
                    key_ready: false,
                    source,
                    taken,
                });
                task.values.push(value);
                task.push_frame(FrameKind::Destructure { pat: sub, mode });
                Ok(StepFlow::Continue)
            }
            PatternKey::Computed(key_expr) => {
                let key_expr = *key_expr;
                task.push_frame(FrameKind::ObjectPattern {
                    pat,
                    prop,
                    mode,
                    key_ready: true,
                    source,
                    taken,
                });
                task.push_frame(FrameKind::Eval(key_expr));
                Ok(StepFlow::Continue)
            }
        }
    }

    /// `MemberStore` frames: `[..., value]` on entry; evaluate the member
    /// parts, then store the value through them.
    pub(crate) fn member_store_step(&mut self, task: &mut TaskState, member: crate::ast::ExprId, phase: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Member { object, prop, .. } = &program.expr(member).kind else {
            unreachable!("member store on a non-member");
        };
        match phase {
            0 => {
                task.push_frame(FrameKind::MemberStore { member, phase: 1 });
                task.push_frame(FrameKind::Eval(*object));
                Ok(StepFlow::Continue)
            }
            1 => match prop {
                MemberProp::Computed(key_expr) => {
                    task.push_frame(FrameKind::MemberStore { member, phase: 2 });
                    task.push_frame(FrameKind::Eval(*key_expr));
                    Ok(StepFlow::Continue)
                }
                MemberProp::Ident(name) => {
                    let object = task.values.pop().expect("member store object expected");
                    let value = task.values.pop().expect("member store value expected");
                    self.set_property(&object, PropKey::Str(*name), value)?;
                    object.drop_with_heap(&mut self.heap);
                    Ok(StepFlow::Continue)
                }
            },
            2 => {
                let key_value = task.values.pop().expect("member store key expected");
                let object = task.values.pop().expect("member store object expected");
                let value = task.values.pop().expect("member store value expected");
                let key = match key_value.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        key_value.drop_with_heap(&mut self.heap);
                        object.drop_with_heap(&mut self.heap);
                        value.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                key_value.drop_with_heap(&mut self.heap);
                self.set_property(&object, key, value)?;
                object.drop_with_heap(&mut self.heap);
                Ok(StepFlow::Continue)
            }
            other => unreachable!("member store phase {other}"),
        }
    }

    /// Binds a single name per the pattern's mode.
    fn bind_name(&mut self, task: &mut TaskState, name: Istr, value: Value, mode: BindMode) -> RunResult<()> {
        match mode {
            BindMode::Declare(BindingKind::Var) => {
                // `var` was hoisted to the function frame; assignment finds
                // it through the chain.
                match env::assign(&mut self.heap, task.env(), name, value)? {
                    (env::AssignOutcome::Done, _) => Ok(()),
                    (_, returned) => {
                        let value = returned.expect("failed assignment returns its value");
                        env::define(&mut self.heap, task.env(), name, value, BindingKind::Var, true);
                        Ok(())
                    }
                }
            }
            BindMode::Declare(kind) => {
                env::define(&mut self.heap, task.env(), name, value, kind, true);
                Ok(())
            }
            BindMode::Assign => self.assign_ident(task, name, value),
        }
    }

    /// Builds the rest object of an object pattern: own enumerable string
    /// properties of `source`, minus the keys already taken.
    fn build_rest_object(&mut self, source: &Value, taken: &[Istr]) -> RunResult<Value> {
        let proto = self.object_proto;
        if let Some(proto) = proto {
            self.heap.inc_ref(proto);
        }
        let rest = self.alloc(crate::heap::HeapData::Object(JsObject::new(proto)))?;
        if let Value::Ref(id) = source
            && let crate::heap::HeapData::Object(obj) = self.heap.get(*id)
        {
            let keys: Vec<Istr> = obj
                .enumerable_string_keys(&self.shapes)
                .into_iter()
                .filter(|key| !taken.contains(key))
                .collect();
            for key in keys {
                let value = self.get_property(source, PropKey::Str(key))?;
                self.object_set_raw(rest, PropKey::Str(key), value);
            }
        }
        Ok(Value::Ref(rest))
    }
}
