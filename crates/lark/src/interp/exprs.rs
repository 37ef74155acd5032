//! Expression evaluation: the `Eval` dispatch and the per-node `Cont`
//! continuations.
//!
//! Conventions: every expression leaves exactly one value on the task's
//! operand stack. A node needing sub-results pushes a `Cont` frame recording
//! its phase, then `Eval` frames for the children it wants next; the `Cont`
//! handler picks the partial results back off the stack. Phase numbers are
//! node-specific and documented at each handler.

use crate::{
    ast::{
        ArrayElement, AssignOp, AssignTarget, ExprId, ExprKind, Literal, LogicalOp, MemberProp, ObjectProp,
        PropName, UnaryOp, UpdateOp,
    },
    env::{self, BindingKind},
    error::{ErrorKind, RunError, RunResult},
    heap::HeapData,
    intern::{Istr, intern, intern_unbounded},
    interp::{BindMode, FrameKind, Interpreter, StepFlow, TaskState, frame::TaskFlow},
    object::{JsArray, JsObject, PropKey, Property},
    types::JsRegex,
    value::Value,
};

/// Phase bases for call-like continuations.
const ARGS_BASE: u32 = 3;

/// Phase bases for assignment continuations.
const ASSIGN_IDENT_SIMPLE: u32 = 10;
const ASSIGN_IDENT_LOGICAL: u32 = 11;
const ASSIGN_IDENT_COMPOUND: u32 = 12;
const ASSIGN_MEMBER_NAMED: u32 = 20;
const ASSIGN_MEMBER_COMPUTED: u32 = 21;
const ASSIGN_MEMBER_NAMED_COMPOUND: u32 = 22;
const ASSIGN_MEMBER_COMPUTED_COMPOUND: u32 = 23;
const ASSIGN_PATTERN: u32 = 30;

impl Interpreter {
    /// First visit of an expression node.
    pub(crate) fn eval_expr(&mut self, task: &mut TaskState, expr_id: ExprId) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let expr = program.expr(expr_id);
        match &expr.kind {
            ExprKind::Literal(literal) => {
                let value = self.eval_literal(literal)?;
                task.values.push(value);
                Ok(StepFlow::Continue)
            }
            ExprKind::Ident(name) => {
                let value = self.read_ident(task, *name)?;
                task.values.push(value);
                Ok(StepFlow::Continue)
            }
            ExprKind::This => {
                let value = env::get(&self.heap, task.env(), intern("this"))?
                    .unwrap_or(Value::Undefined);
                task.values.push(value);
                Ok(StepFlow::Continue)
            }
            ExprKind::SuperBase => Err(RunError::syntax_error("'super' keyword unexpected here")),
            ExprKind::Function(func) | ExprKind::Arrow(func) => {
                let closure = self.make_closure(task, *func, None)?;
                task.values.push(closure);
                Ok(StepFlow::Continue)
            }
            ExprKind::Array(_) => self.array_cont(task, expr_id, 0, 0),
            ExprKind::Object(_) => {
                let proto = self.object_proto;
                if let Some(proto) = proto {
                    self.heap.inc_ref(proto);
                }
                let obj = self.alloc(HeapData::Object(JsObject::new(proto)))?;
                task.values.push(Value::Ref(obj));
                self.object_cont(task, expr_id, 0, 0)
            }
            ExprKind::Class(_) => self.class_start(task, expr_id),
            ExprKind::Template { quasis, exprs } => {
                if exprs.is_empty() {
                    let value = Value::of_string(&quasis[0], &mut self.heap)?;
                    task.values.push(value);
                    Ok(StepFlow::Continue)
                } else {
                    self.template_cont(task, expr_id, 0, 0)
                }
            }
            ExprKind::Unary { op, expr: arg } => match op {
                UnaryOp::Typeof => {
                    // `typeof x` on an unresolved identifier answers
                    // "undefined" instead of throwing.
                    if let ExprKind::Ident(name) = &program.expr(*arg).kind {
                        if !env::has(&self.heap, task.env(), *name) {
                            task.values.push(Value::Str(intern("undefined")));
                            return Ok(StepFlow::Continue);
                        }
                    }
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: 1,
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(*arg));
                    Ok(StepFlow::Continue)
                }
                UnaryOp::Delete => self.delete_start(task, expr_id, *arg),
                _ => {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: 1,
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(*arg));
                    Ok(StepFlow::Continue)
                }
            },
            ExprKind::Update { target, .. } => self.update_start(task, expr_id, *target),
            ExprKind::Binary { left, .. } => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*left));
                Ok(StepFlow::Continue)
            }
            ExprKind::Logical { left, .. } => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*left));
                Ok(StepFlow::Continue)
            }
            ExprKind::Assign { .. } => self.assign_start(task, expr_id),
            ExprKind::Conditional { test, .. } => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*test));
                Ok(StepFlow::Continue)
            }
            ExprKind::Call { .. } => self.call_start(task, expr_id),
            ExprKind::New { callee, .. } => {
                if task.chain_short {
                    task.values.push(Value::Undefined);
                    return Ok(StepFlow::Continue);
                }
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: ARGS_BASE,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*callee));
                Ok(StepFlow::Continue)
            }
            ExprKind::Member { .. } => self.member_start(task, expr_id),
            ExprKind::Sequence(exprs) => {
                debug_assert!(!exprs.is_empty(), "empty sequence expression");
                if exprs.len() > 1 {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: 1,
                        aux: 0,
                    });
                }
                task.push_frame(FrameKind::Eval(exprs[0]));
                Ok(StepFlow::Continue)
            }
            ExprKind::Await(arg) => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*arg));
                Ok(StepFlow::Continue)
            }
            ExprKind::Yield { arg, .. } => match arg {
                Some(arg) => {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: 1,
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(*arg));
                    Ok(StepFlow::Continue)
                }
                None => {
                    task.values.push(Value::Undefined);
                    self.eval_cont(task, expr_id, 1, 0)
                }
            },
            ExprKind::Chain(inner) => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*inner));
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Expression continuation dispatch.
    pub(crate) fn eval_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32, aux: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let expr = program.expr(expr_id);
        match &expr.kind {
            ExprKind::Unary { op, expr: arg } => match (op, phase) {
                (UnaryOp::Delete, _) => self.delete_cont(task, expr_id, *arg, phase),
                (UnaryOp::Typeof, _) => {
                    let value = task.values.pop().expect("typeof operand expected");
                    let name = value.type_of(&self.heap);
                    value.drop_with_heap(&mut self.heap);
                    task.values.push(Value::Str(intern(name)));
                    Ok(StepFlow::Continue)
                }
                _ => {
                    let value = task.values.pop().expect("unary operand expected");
                    let result = self.apply_unary(*op, value)?;
                    task.values.push(result);
                    Ok(StepFlow::Continue)
                }
            },
            ExprKind::Binary { op, right, .. } => {
                if phase == 1 {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: 2,
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(*right));
                    Ok(StepFlow::Continue)
                } else {
                    let rhs = task.values.pop().expect("binary rhs expected");
                    let lhs = task.values.pop().expect("binary lhs expected");
                    let result = self.apply_binary(*op, lhs, rhs)?;
                    task.values.push(result);
                    Ok(StepFlow::Continue)
                }
            }
            ExprKind::Logical { op, right, .. } => {
                let left = task.values.pop().expect("logical lhs expected");
                let take_right = match op {
                    LogicalOp::And => left.to_boolean(&self.heap),
                    LogicalOp::Or => !left.to_boolean(&self.heap),
                    LogicalOp::Nullish => left.is_nullish(),
                };
                if take_right {
                    left.drop_with_heap(&mut self.heap);
                    task.push_frame(FrameKind::Eval(*right));
                } else {
                    task.values.push(left);
                }
                Ok(StepFlow::Continue)
            }
            ExprKind::Conditional {
                consequent, alternate, ..
            } => {
                let test = task.values.pop().expect("conditional test expected");
                let truthy = test.to_boolean(&self.heap);
                test.drop_with_heap(&mut self.heap);
                task.push_frame(FrameKind::Eval(if truthy { *consequent } else { *alternate }));
                Ok(StepFlow::Continue)
            }
            ExprKind::Sequence(exprs) => {
                // phase = index of the expression whose value is on the
                // stack; it was not the last, so discard and evaluate on.
                let value = task.values.pop().expect("sequence value expected");
                value.drop_with_heap(&mut self.heap);
                let index = phase as usize;
                if index + 1 < exprs.len() {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: phase + 1,
                        aux: 0,
                    });
                }
                task.push_frame(FrameKind::Eval(exprs[index]));
                Ok(StepFlow::Continue)
            }
            ExprKind::Await(_) => {
                let value = task.values.pop().expect("await operand expected");
                Ok(StepFlow::Suspend(TaskFlow::Await(value)))
            }
            ExprKind::Yield { delegate, .. } => {
                let value = task.values.pop().expect("yield operand expected");
                if *delegate {
                    let iter = self.get_iterator(value)?;
                    // The step loop visits the delegate frame next and
                    // pulls the first value from the inner iterator.
                    task.push_frame(FrameKind::Delegate { iter });
                    Ok(StepFlow::Continue)
                } else {
                    Ok(StepFlow::Suspend(TaskFlow::Yield(value)))
                }
            }
            ExprKind::Chain(_) => {
                task.chain_short = false;
                Ok(StepFlow::Continue)
            }
            ExprKind::Template { .. } => self.template_cont(task, expr_id, phase, aux),
            ExprKind::Array(_) => self.array_cont(task, expr_id, phase, aux),
            ExprKind::Object(_) => self.object_cont(task, expr_id, phase, aux),
            ExprKind::Class(_) => self.class_cont(task, expr_id, phase),
            ExprKind::Member { .. } => self.member_cont(task, expr_id, phase),
            ExprKind::Call { .. } => self.call_cont(task, expr_id, phase, aux),
            ExprKind::New { .. } => self.new_cont(task, expr_id, phase, aux),
            ExprKind::Assign { .. } => self.assign_cont(task, expr_id, phase),
            ExprKind::Update { .. } => self.update_cont(task, expr_id, phase),
            ExprKind::Literal(_) | ExprKind::Ident(_) => {
                unreachable!("no continuation for simple expressions")
            }
            other => unreachable!("unexpected continuation for {other:?}"),
        }
    }

    // ========================================================================
    // Identifiers & literals
    // ========================================================================

    fn read_ident(&mut self, task: &mut TaskState, name: Istr) -> RunResult<Value> {
        match env::get(&self.heap, task.env(), name)? {
            Some(Value::ModuleBinding(module, export)) => self.resolve_module_binding(module, export),
            Some(value) => Ok(value),
            None => Err(RunError::simple(
                ErrorKind::ReferenceError,
                format!("{name} is not defined"),
            )),
        }
    }

    fn eval_literal(&mut self, literal: &Literal) -> RunResult<Value> {
        Ok(match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::Str(s) => Value::of_string(s, &mut self.heap)?,
            Literal::BigInt(b) => Value::of_bigint(b.clone(), &mut self.heap)?,
            Literal::Regex { pattern, flags } => {
                let regex = JsRegex::new(pattern, flags)?;
                Value::Ref(self.alloc(HeapData::Regex(regex))?)
            }
        })
    }

    // ========================================================================
    // Array literals
    // ========================================================================

    /// `phase` = element index to process next; `aux` = values accumulated
    /// on the stack so far. Spread elements expand on finalize.
    fn array_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32, aux: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Array(elements) = &program.expr(expr_id).kind else {
            unreachable!("array continuation on a non-array");
        };
        let mut index = phase as usize;
        let mut count = aux;
        // Finalize the element just evaluated.
        if index > 0 {
            match &elements[index - 1] {
                ArrayElement::Item(_) => count += 1,
                ArrayElement::Spread(_) => {
                    let source = task.values.pop().expect("spread source expected");
                    let mut iter = self.get_iterator(source)?;
                    while let Some(value) = self.iter_next(&mut iter)? {
                        task.values.push(value);
                        count += 1;
                    }
                    self.iter_close(iter);
                }
                ArrayElement::Hole => unreachable!("holes are filled eagerly"),
            }
        }
        // Fill holes and schedule the next evaluating element.
        while let Some(element) = elements.get(index) {
            match element {
                ArrayElement::Hole => {
                    task.values.push(Value::Undefined);
                    count += 1;
                    index += 1;
                }
                ArrayElement::Item(expr) | ArrayElement::Spread(expr) => {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: u32::try_from(index).expect("array too long") + 1,
                        aux: count,
                    });
                    task.push_frame(FrameKind::Eval(*expr));
                    return Ok(StepFlow::Continue);
                }
            }
        }
        // All elements done: collect them into the array.
        let start = task.values.len() - count as usize;
        let elements: Vec<Value> = task.values.drain(start..).collect();
        let id = self.alloc(HeapData::Array(JsArray::with_elements(elements)))?;
        task.values.push(Value::Ref(id));
        Ok(StepFlow::Continue)
    }

    // ========================================================================
    // Object literals
    // ========================================================================

    /// `phase` = property index; `aux` = sub-state: 0 start, 1 value ready
    /// (named key), 2 computed key ready, 3 computed key + value ready,
    /// 4 spread source ready, 5 computed key ready for a method/accessor.
    fn object_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32, aux: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Object(props) = &program.expr(expr_id).kind else {
            unreachable!("object continuation on a non-object");
        };
        let index = phase as usize;
        let advance = |task: &mut TaskState| {
            task.push_frame(FrameKind::Cont {
                expr: expr_id,
                phase: phase + 1,
                aux: 0,
            });
        };
        match aux {
            0 => {
                let Some(prop) = props.get(index) else {
                    // Done: the object value is already on the stack.
                    return Ok(StepFlow::Continue);
                };
                match prop {
                    ObjectProp::KeyValue { key, value } => match key {
                        PropName::Ident(_) => {
                            task.push_frame(FrameKind::Cont {
                                expr: expr_id,
                                phase,
                                aux: 1,
                            });
                            task.push_frame(FrameKind::Eval(*value));
                        }
                        PropName::Computed(key_expr) => {
                            task.push_frame(FrameKind::Cont {
                                expr: expr_id,
                                phase,
                                aux: 2,
                            });
                            task.push_frame(FrameKind::Eval(*key_expr));
                        }
                    },
                    ObjectProp::Method { key, func }
                    | ObjectProp::Getter { key, func }
                    | ObjectProp::Setter { key, func } => match key {
                        PropName::Ident(name) => {
                            let obj = object_on_stack(task);
                            let closure = self.make_closure_with_home(task, *func, Some(obj))?;
                            self.define_literal_member(task, props, index, PropKey::Str(*name), closure)?;
                            advance(task);
                        }
                        PropName::Computed(key_expr) => {
                            task.push_frame(FrameKind::Cont {
                                expr: expr_id,
                                phase,
                                aux: 5,
                            });
                            task.push_frame(FrameKind::Eval(*key_expr));
                        }
                    },
                    ObjectProp::Spread(inner) => {
                        task.push_frame(FrameKind::Cont {
                            expr: expr_id,
                            phase,
                            aux: 4,
                        });
                        task.push_frame(FrameKind::Eval(*inner));
                    }
                }
                Ok(StepFlow::Continue)
            }
            1 => {
                let value = task.values.pop().expect("property value expected");
                let ObjectProp::KeyValue {
                    key: PropName::Ident(name),
                    ..
                } = &props[index]
                else {
                    unreachable!("aux 1 is only used for named key-value properties");
                };
                let obj = object_on_stack(task);
                self.object_set_raw(obj, PropKey::Str(*name), value);
                advance(task);
                Ok(StepFlow::Continue)
            }
            2 => {
                // Computed key evaluated; now evaluate the value.
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase,
                    aux: 3,
                });
                let ObjectProp::KeyValue { value, .. } = &props[index] else {
                    unreachable!("aux 2 is only used for computed key-value properties");
                };
                task.push_frame(FrameKind::Eval(*value));
                Ok(StepFlow::Continue)
            }
            3 => {
                let value = task.values.pop().expect("property value expected");
                let key_value = task.values.pop().expect("property key expected");
                let key = match key_value.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        key_value.drop_with_heap(&mut self.heap);
                        value.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                key_value.drop_with_heap(&mut self.heap);
                let obj = object_on_stack(task);
                self.object_set_raw(obj, key, value);
                advance(task);
                Ok(StepFlow::Continue)
            }
            4 => {
                let source = task.values.pop().expect("spread source expected");
                let obj = object_on_stack(task);
                self.copy_own_enumerable(&source, obj)?;
                source.drop_with_heap(&mut self.heap);
                advance(task);
                Ok(StepFlow::Continue)
            }
            5 => {
                let key_value = task.values.pop().expect("method key expected");
                let key = key_value.to_property_key(&self.heap)?;
                key_value.drop_with_heap(&mut self.heap);
                let (ObjectProp::Method { func, .. }
                | ObjectProp::Getter { func, .. }
                | ObjectProp::Setter { func, .. }) = &props[index]
                else {
                    unreachable!("aux 5 is only used for computed-key members");
                };
                let obj = object_on_stack(task);
                let closure = self.make_closure_with_home(task, *func, Some(obj))?;
                self.define_literal_member(task, props, index, key, closure)?;
                advance(task);
                Ok(StepFlow::Continue)
            }
            other => unreachable!("object literal sub-state {other}"),
        }
    }

    /// Defines one object-literal member: methods become plain data
    /// properties, getter/setter halves merge into an accessor descriptor.
    fn define_literal_member(
        &mut self,
        task: &mut TaskState,
        props: &[ObjectProp],
        index: usize,
        key: PropKey,
        closure: Value,
    ) -> RunResult<()> {
        let obj = object_on_stack(task);
        match &props[index] {
            ObjectProp::Method { .. } => {
                self.object_set_raw(obj, key, closure);
            }
            ObjectProp::Getter { .. } | ObjectProp::Setter { .. } => {
                let is_getter = matches!(&props[index], ObjectProp::Getter { .. });
                self.define_accessor(obj, key, closure, is_getter);
            }
            _ => unreachable!("not an object-literal member"),
        }
        Ok(())
    }

    /// Installs one half of an accessor pair, merging with an existing
    /// accessor under the same key.
    pub(crate) fn define_accessor(&mut self, obj: crate::heap::HeapId, key: PropKey, func: Value, is_getter: bool) {
        let mut data = self.heap.take_data(obj);
        let mut displaced = Vec::new();
        if let HeapData::Object(object) = &mut data {
            object.to_dictionary(&self.shapes);
            let existing = object.delete(key, &self.shapes);
            let (mut get, mut set) = (None, None);
            if let Some(mut old_values) = existing {
                // A previous accessor contributes its other half; data
                // properties are simply replaced.
                if old_values.len() == 2 {
                    set = Some(old_values.pop().expect("two accessor halves"));
                    get = Some(old_values.pop().expect("two accessor halves"));
                } else {
                    displaced.extend(old_values);
                }
            }
            if is_getter {
                if let Some(old) = get.replace(func) {
                    displaced.push(old);
                }
            } else if let Some(old) = set.replace(func) {
                displaced.push(old);
            }
            displaced.extend(object.define_own(
                key,
                Property::Accessor {
                    get,
                    set,
                    attrs: crate::object::PropAttrs::default(),
                },
                &self.shapes,
            ));
        } else {
            displaced.push(func);
        }
        self.heap.restore_data(obj, data);
        for value in displaced {
            value.drop_with_heap(&mut self.heap);
        }
    }

    /// Copies `source`'s own enumerable properties onto `target`
    /// (object-literal spread).
    fn copy_own_enumerable(&mut self, source: &Value, target: crate::heap::HeapId) -> RunResult<()> {
        match source {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Object(_) => {
                    let keys = match self.heap.get(*id) {
                        HeapData::Object(obj) => obj.own_keys(&self.shapes),
                        _ => unreachable!(),
                    };
                    for key in keys {
                        let value = self.get_property(source, key)?;
                        self.object_set_raw(target, key, value);
                    }
                    Ok(())
                }
                HeapData::Array(arr) => {
                    let len = arr.len();
                    for i in 0..len {
                        let value = match self.heap.get(*id) {
                            HeapData::Array(arr) => arr
                                .get_index(i)
                                .map(|v| v.clone_with_heap(&self.heap))
                                .unwrap_or(Value::Undefined),
                            _ => unreachable!(),
                        };
                        let key = PropKey::Str(intern_unbounded(&i.to_string()));
                        self.object_set_raw(target, key, value);
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            // Primitive spreads contribute nothing (strings aside, which
            // spread their indices; rare enough to skip the fast path).
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Template literals
    // ========================================================================

    /// `phase` = substitutions already converted to strings on the stack.
    fn template_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32, _aux: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Template { quasis, exprs } = &program.expr(expr_id).kind else {
            unreachable!("template continuation on a non-template");
        };
        let index = phase as usize;
        if index > 0 {
            // Coerce the substitution just evaluated to a string in place.
            let value = task.values.pop().expect("template substitution expected");
            let primitive = self.to_primitive_string(value)?;
            let text = primitive.to_js_string(&self.heap)?;
            primitive.drop_with_heap(&mut self.heap);
            let value = Value::of_owned_string(text, &mut self.heap)?;
            task.values.push(value);
        }
        if index < exprs.len() {
            task.push_frame(FrameKind::Cont {
                expr: expr_id,
                phase: phase + 1,
                aux: 0,
            });
            task.push_frame(FrameKind::Eval(exprs[index]));
            return Ok(StepFlow::Continue);
        }
        // Weave quasis and substitutions.
        let start = task.values.len() - exprs.len();
        let parts: Vec<Value> = task.values.drain(start..).collect();
        let mut text = String::new();
        for (i, quasi) in quasis.iter().enumerate() {
            text.push_str(quasi);
            if let Some(part) = parts.get(i) {
                text.push_str(part.as_str(&self.heap).unwrap_or_default());
            }
        }
        for part in parts {
            part.drop_with_heap(&mut self.heap);
        }
        let value = Value::of_owned_string(text, &mut self.heap)?;
        task.values.push(value);
        Ok(StepFlow::Continue)
    }

    // ========================================================================
    // Assignments
    // ========================================================================

    fn assign_start(&mut self, task: &mut TaskState, expr_id: ExprId) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Assign { op, target, value } = &program.expr(expr_id).kind else {
            unreachable!("assign start on a non-assignment");
        };
        match target {
            AssignTarget::Ident(name) => match op {
                AssignOp::Assign => {
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: ASSIGN_IDENT_SIMPLE,
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(*value));
                    Ok(StepFlow::Continue)
                }
                AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::NullishAssign => {
                    let current = self.read_ident(task, *name)?;
                    let assign_rhs = match op {
                        AssignOp::AndAssign => current.to_boolean(&self.heap),
                        AssignOp::OrAssign => !current.to_boolean(&self.heap),
                        AssignOp::NullishAssign => current.is_nullish(),
                        _ => unreachable!(),
                    };
                    if assign_rhs {
                        current.drop_with_heap(&mut self.heap);
                        task.push_frame(FrameKind::Cont {
                            expr: expr_id,
                            phase: ASSIGN_IDENT_LOGICAL,
                            aux: 0,
                        });
                        task.push_frame(FrameKind::Eval(*value));
                    } else {
                        task.values.push(current);
                    }
                    Ok(StepFlow::Continue)
                }
                _ => {
                    let current = self.read_ident(task, *name)?;
                    task.values.push(current);
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: ASSIGN_IDENT_COMPOUND,
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(*value));
                    Ok(StepFlow::Continue)
                }
            },
            AssignTarget::Member(member) => {
                let ExprKind::Member { object, .. } = &program.expr(*member).kind else {
                    unreachable!("member assignment target is not a member");
                };
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*object));
                Ok(StepFlow::Continue)
            }
            AssignTarget::Pattern(_) => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: ASSIGN_PATTERN,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*value));
                Ok(StepFlow::Continue)
            }
        }
    }

    fn assign_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Assign { op, target, value } = &program.expr(expr_id).kind else {
            unreachable!("assign continuation on a non-assignment");
        };
        match phase {
            ASSIGN_IDENT_SIMPLE | ASSIGN_IDENT_LOGICAL => {
                let AssignTarget::Ident(name) = target else {
                    unreachable!("ident phase on a non-ident target");
                };
                let new_value = task.values.pop().expect("assignment value expected");
                let result = new_value.clone_with_heap(&self.heap);
                self.assign_ident(task, *name, new_value)?;
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
            ASSIGN_IDENT_COMPOUND => {
                let AssignTarget::Ident(name) = target else {
                    unreachable!("ident phase on a non-ident target");
                };
                let rhs = task.values.pop().expect("assignment value expected");
                let current = task.values.pop().expect("assignment current value expected");
                let binop = op.binary_op().expect("compound assignment has a binary op");
                let new_value = self.apply_binary(binop, current, rhs)?;
                let result = new_value.clone_with_heap(&self.heap);
                self.assign_ident(task, *name, new_value)?;
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
            // Member target: the object is evaluated; route on key shape
            // and operator.
            1 => {
                let AssignTarget::Member(member) = target else {
                    unreachable!("member phase on a non-member target");
                };
                let ExprKind::Member { prop, .. } = &program.expr(*member).kind else {
                    unreachable!("member assignment target is not a member");
                };
                match prop {
                    MemberProp::Computed(key_expr) => {
                        task.push_frame(FrameKind::Cont {
                            expr: expr_id,
                            phase: 2,
                            aux: 0,
                        });
                        task.push_frame(FrameKind::Eval(*key_expr));
                        Ok(StepFlow::Continue)
                    }
                    MemberProp::Ident(name) => {
                        self.assign_member_route(task, expr_id, *op, *value, Some(*name), false)
                    }
                }
            }
            2 => self.assign_member_route(task, expr_id, *op, *value, None, true),
            ASSIGN_MEMBER_NAMED | ASSIGN_MEMBER_COMPUTED => {
                let computed = phase == ASSIGN_MEMBER_COMPUTED;
                let new_value = task.values.pop().expect("assignment value expected");
                let key = if computed {
                    let key_value = task.values.pop().expect("member key expected");
                    let key = key_value.to_property_key(&self.heap)?;
                    key_value.drop_with_heap(&mut self.heap);
                    Some(key)
                } else {
                    None
                };
                let object = task.values.pop().expect("member object expected");
                let key = match key {
                    Some(key) => key,
                    None => self.named_key_of(&program, target),
                };
                let result = new_value.clone_with_heap(&self.heap);
                self.set_property(&object, key, new_value)?;
                object.drop_with_heap(&mut self.heap);
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
            ASSIGN_MEMBER_NAMED_COMPOUND | ASSIGN_MEMBER_COMPUTED_COMPOUND => {
                let computed = phase == ASSIGN_MEMBER_COMPUTED_COMPOUND;
                let rhs = task.values.pop().expect("assignment value expected");
                let current = task.values.pop().expect("current member value expected");
                let key = if computed {
                    let key_value = task.values.pop().expect("member key expected");
                    let key = key_value.to_property_key(&self.heap)?;
                    key_value.drop_with_heap(&mut self.heap);
                    Some(key)
                } else {
                    None
                };
                let object = task.values.pop().expect("member object expected");
                let key = match key {
                    Some(key) => key,
                    None => self.named_key_of(&program, target),
                };
                let binop = op.binary_op().expect("compound assignment has a binary op");
                let new_value = self.apply_binary(binop, current, rhs)?;
                let result = new_value.clone_with_heap(&self.heap);
                self.set_property(&object, key, new_value)?;
                object.drop_with_heap(&mut self.heap);
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
            ASSIGN_PATTERN => {
                let AssignTarget::Pattern(pat) = target else {
                    unreachable!("pattern phase on a non-pattern target");
                };
                let new_value = task.values.pop().expect("assignment value expected");
                let result = new_value.clone_with_heap(&self.heap);
                task.values.push(result);
                task.values.push(new_value);
                task.push_frame(FrameKind::Destructure {
                    pat: *pat,
                    mode: BindMode::Assign,
                });
                Ok(StepFlow::Continue)
            }
            other => unreachable!("assignment phase {other}"),
        }
    }

    /// After the member parts of an assignment target are on the stack,
    /// decide whether a current-value read is needed and schedule the rhs.
    fn assign_member_route(
        &mut self,
        task: &mut TaskState,
        expr_id: ExprId,
        op: AssignOp,
        value: ExprId,
        named: Option<Istr>,
        computed: bool,
    ) -> RunResult<StepFlow> {
        match op {
            AssignOp::Assign => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: if computed { ASSIGN_MEMBER_COMPUTED } else { ASSIGN_MEMBER_NAMED },
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(value));
                Ok(StepFlow::Continue)
            }
            AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::NullishAssign => {
                // Read the current value without consuming the parts.
                let current = self.read_member_parts(task, named, computed)?;
                let assign_rhs = match op {
                    AssignOp::AndAssign => current.to_boolean(&self.heap),
                    AssignOp::OrAssign => !current.to_boolean(&self.heap),
                    AssignOp::NullishAssign => current.is_nullish(),
                    _ => unreachable!(),
                };
                if assign_rhs {
                    current.drop_with_heap(&mut self.heap);
                    task.push_frame(FrameKind::Cont {
                        expr: expr_id,
                        phase: if computed { ASSIGN_MEMBER_COMPUTED } else { ASSIGN_MEMBER_NAMED },
                        aux: 0,
                    });
                    task.push_frame(FrameKind::Eval(value));
                } else {
                    // Short-circuit: discard the parts, the current value is
                    // the expression result.
                    let parts = if computed { 2 } else { 1 };
                    for _ in 0..parts {
                        let part = task.values.pop().expect("member part expected");
                        part.drop_with_heap(&mut self.heap);
                    }
                    task.values.push(current);
                }
                Ok(StepFlow::Continue)
            }
            _ => {
                let current = self.read_member_parts(task, named, computed)?;
                task.values.push(current);
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: if computed {
                        ASSIGN_MEMBER_COMPUTED_COMPOUND
                    } else {
                        ASSIGN_MEMBER_NAMED_COMPOUND
                    },
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(value));
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Reads `obj[key]`/`obj.name` with the parts still on the stack.
    fn read_member_parts(&mut self, task: &mut TaskState, named: Option<Istr>, computed: bool) -> RunResult<Value> {
        if computed {
            let key_value = task.values.last().expect("member key expected");
            let key = key_value.to_property_key(&self.heap)?;
            let object = task.values[task.values.len() - 2].shallow_copy();
            self.get_property(&object, key)
        } else {
            let name = named.expect("named member access");
            let object = task.values.last().expect("member object expected").shallow_copy();
            self.get_property(&object, PropKey::Str(name))
        }
    }

    /// Static key of a named member assignment target.
    fn named_key_of(&self, program: &crate::ast::Program, target: &AssignTarget) -> PropKey {
        let AssignTarget::Member(member) = target else {
            unreachable!("named key of a non-member target");
        };
        let ExprKind::Member {
            prop: MemberProp::Ident(name),
            ..
        } = &program.expr(*member).kind
        else {
            unreachable!("named key of a computed member");
        };
        PropKey::Str(*name)
    }

    pub(super) fn assign_ident(&mut self, task: &mut TaskState, name: Istr, value: Value) -> RunResult<()> {
        match env::assign(&mut self.heap, task.env(), name, value)? {
            (env::AssignOutcome::Done, _) => Ok(()),
            (env::AssignOutcome::Const, returned) => {
                if let Some(returned) = returned {
                    returned.drop_with_heap(&mut self.heap);
                }
                Err(RunError::type_error("Assignment to constant variable."))
            }
            (env::AssignOutcome::Unresolved, returned) => {
                // Sloppy-mode implicit global.
                let value = returned.expect("unresolved assignment returns its value");
                env::define(&mut self.heap, self.global_env, name, value, BindingKind::Var, true);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Update expressions (++/--)
    // ========================================================================

    fn update_start(&mut self, task: &mut TaskState, expr_id: ExprId, target: ExprId) -> RunResult<StepFlow> {
        let program = task.program.clone();
        match &program.expr(target).kind {
            ExprKind::Ident(name) => {
                let ExprKind::Update { op, prefix, .. } = &program.expr(expr_id).kind else {
                    unreachable!("update start on a non-update");
                };
                let current = self.read_ident(task, *name)?;
                let old = self.to_numeric(current)?;
                let new = self.numeric_step(&old, *op)?;
                let result = if *prefix {
                    new.clone_with_heap(&self.heap)
                } else {
                    old.clone_with_heap(&self.heap)
                };
                old.drop_with_heap(&mut self.heap);
                self.assign_ident(task, *name, new)?;
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
            ExprKind::Member { object, .. } => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*object));
                Ok(StepFlow::Continue)
            }
            _ => Err(RunError::syntax_error("Invalid update expression target")),
        }
    }

    fn update_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Update { op, prefix, target } = &program.expr(expr_id).kind else {
            unreachable!("update continuation on a non-update");
        };
        let ExprKind::Member { prop, .. } = &program.expr(*target).kind else {
            unreachable!("update member target is not a member");
        };
        match (phase, prop) {
            (1, MemberProp::Computed(key_expr)) => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 2,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*key_expr));
                Ok(StepFlow::Continue)
            }
            (1, MemberProp::Ident(name)) => {
                let object = task.values.pop().expect("update object expected");
                let key = PropKey::Str(*name);
                self.finish_update(task, object, key, *op, *prefix)
            }
            (2, _) => {
                let key_value = task.values.pop().expect("update key expected");
                let object = task.values.pop().expect("update object expected");
                let key = match key_value.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        key_value.drop_with_heap(&mut self.heap);
                        object.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                key_value.drop_with_heap(&mut self.heap);
                self.finish_update(task, object, key, *op, *prefix)
            }
            other => unreachable!("update phase {other:?}"),
        }
    }

    fn finish_update(
        &mut self,
        task: &mut TaskState,
        object: Value,
        key: PropKey,
        op: UpdateOp,
        prefix: bool,
    ) -> RunResult<StepFlow> {
        let current = self.get_property(&object, key)?;
        let old = self.to_numeric(current)?;
        let new = self.numeric_step(&old, op)?;
        let result = if prefix {
            new.clone_with_heap(&self.heap)
        } else {
            old.clone_with_heap(&self.heap)
        };
        old.drop_with_heap(&mut self.heap);
        self.set_property(&object, key, new)?;
        object.drop_with_heap(&mut self.heap);
        task.values.push(result);
        Ok(StepFlow::Continue)
    }

    // ========================================================================
    // delete
    // ========================================================================

    fn delete_start(&mut self, task: &mut TaskState, expr_id: ExprId, arg: ExprId) -> RunResult<StepFlow> {
        let program = task.program.clone();
        match &program.expr(arg).kind {
            ExprKind::Member { object, .. } => {
                // Reuse the unary continuation with a marker phase: evaluate
                // the object (and key), then delete.
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 100,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*object));
                Ok(StepFlow::Continue)
            }
            _ => {
                // `delete` of anything but a member reference is true.
                task.values.push(Value::Bool(true));
                Ok(StepFlow::Continue)
            }
        }
    }

    /// `delete obj.p` continuations. Phase 100: object evaluated; phase
    /// 101: computed key evaluated.
    fn delete_cont(&mut self, task: &mut TaskState, expr_id: ExprId, arg: ExprId, phase: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Member { prop, .. } = &program.expr(arg).kind else {
            unreachable!("delete target is not a member");
        };
        match (phase, prop) {
            (100, MemberProp::Computed(key_expr)) => {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 101,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*key_expr));
                Ok(StepFlow::Continue)
            }
            (100, MemberProp::Ident(name)) => {
                let object = task.values.pop().expect("delete object expected");
                let deleted = self.delete_property(&object, PropKey::Str(*name))?;
                object.drop_with_heap(&mut self.heap);
                task.values.push(Value::Bool(deleted));
                Ok(StepFlow::Continue)
            }
            (101, _) => {
                let key_value = task.values.pop().expect("delete key expected");
                let object = task.values.pop().expect("delete object expected");
                let key = match key_value.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        key_value.drop_with_heap(&mut self.heap);
                        object.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                key_value.drop_with_heap(&mut self.heap);
                let deleted = self.delete_property(&object, key)?;
                object.drop_with_heap(&mut self.heap);
                task.values.push(Value::Bool(deleted));
                Ok(StepFlow::Continue)
            }
            other => unreachable!("delete phase {other:?}"),
        }
    }
}

/// The object literal under construction sits directly beneath the scratch
/// a continuation just consumed.
fn object_on_stack(task: &TaskState) -> crate::heap::HeapId {
    match task.values.last().expect("object literal on stack") {
        Value::Ref(id) => *id,
        other => unreachable!("object literal slot holds {other:?}"),
    }
}
