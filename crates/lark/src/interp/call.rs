//! Calls, construction, closures, classes, parameter binding, and the
//! async-task registry.
//!
//! A scripted call runs as a nested machine: the callee gets its own
//! [`TaskState`] (environment, parameter-binding frames, body frames) which
//! runs to completion before the caller's step continues. Async function
//! calls build the same task but hand it to the async driver: the body runs
//! until its first `await`, then parks; the returned promise settles when
//! the body finishes. Generator calls build the task and freeze it inside a
//! generator object without running anything.

use crate::{
    ast::{Argument, ExprId, ExprKind, FuncId, FunctionBody, MemberProp, MethodKind, PropName},
    env::{self, BindingKind},
    error::{RunError, RunResult},
    function::JsFunction,
    generator::JsGenerator,
    heap::{HeapData, HeapId},
    intern::{Istr, intern, well_known},
    interp::{
        BindMode, FrameKind, Interpreter, ResumeInput, StepFlow, TaskFlow, TaskId, TaskState,
    },
    object::{JsObject, PropKey},
    value::Value,
};

/// Phase base shared by call/new argument evaluation.
const ARGS_BASE: u32 = 3;

/// What settles when a parked async task completes.
#[derive(Debug)]
pub(crate) enum TaskTarget {
    /// An async function call: resolve/reject this promise. Owned.
    Promise(HeapId),
    /// One async-generator `next()` step: settle `promise` with an
    /// iterator result, parking the task back in `generator` on yield.
    /// Both ids are owned.
    AsyncGenStep { promise: HeapId, generator: HeapId },
}

/// A parked async body awaiting a value.
#[derive(Debug)]
pub(crate) struct AsyncTask {
    pub task: Option<TaskState>,
    pub target: TaskTarget,
}

impl Interpreter {
    // ========================================================================
    // Call expression evaluation
    // ========================================================================

    /// First visit of a call expression: arrange `[receiver, callee]` on
    /// the stack, then fall into argument evaluation.
    pub(crate) fn call_start(&mut self, task: &mut TaskState, expr_id: ExprId) -> RunResult<StepFlow> {
        if task.chain_short {
            task.values.push(Value::Undefined);
            return Ok(StepFlow::Continue);
        }
        let program = task.program.clone();
        let ExprKind::Call { callee, .. } = &program.expr(expr_id).kind else {
            unreachable!("call start on a non-call");
        };
        match &program.expr(*callee).kind {
            ExprKind::Member { object, prop, .. }
                if matches!(program.expr(*object).kind, ExprKind::SuperBase) =>
            {
                let MemberProp::Ident(name) = prop else {
                    return Err(RunError::syntax_error("computed super access is not supported"));
                };
                let method = self.super_get(task, PropKey::Str(*name))?;
                let this = env::get(&self.heap, task.env(), intern("this"))?.unwrap_or(Value::Undefined);
                task.values.push(this);
                task.values.push(method);
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: ARGS_BASE,
                    aux: 0,
                });
                Ok(StepFlow::Continue)
            }
            ExprKind::Member { object, .. } => {
                let object = *object;
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 1,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(object));
                Ok(StepFlow::Continue)
            }
            ExprKind::SuperBase => {
                let Some(parent) = task.parent_ctor else {
                    return Err(RunError::syntax_error(
                        "'super' keyword is only valid inside a derived constructor",
                    ));
                };
                let this = env::get(&self.heap, task.env(), intern("this"))?.unwrap_or(Value::Undefined);
                self.heap.inc_ref(parent);
                task.values.push(this);
                task.values.push(Value::Ref(parent));
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: ARGS_BASE,
                    aux: 0,
                });
                Ok(StepFlow::Continue)
            }
            _ => {
                let callee = *callee;
                task.values.push(Value::Undefined);
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: ARGS_BASE,
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(callee));
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Call continuations: phase 1/2 resolve a member callee with its
    /// receiver; phases from `ARGS_BASE` evaluate arguments.
    pub(crate) fn call_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32, aux: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Call { callee, args, optional } = &program.expr(expr_id).kind else {
            unreachable!("call continuation on a non-call");
        };
        match phase {
            1 => {
                if task.chain_short {
                    let stale = task.values.pop().expect("shorted callee object expected");
                    stale.drop_with_heap(&mut self.heap);
                    task.values.push(Value::Undefined);
                    return Ok(StepFlow::Continue);
                }
                let ExprKind::Member {
                    prop,
                    optional: member_optional,
                    cache,
                    ..
                } = &program.expr(*callee).kind
                else {
                    unreachable!("phase 1 is only used for member callees");
                };
                let object = task.values.pop().expect("callee object expected");
                if object.is_nullish() {
                    if *member_optional {
                        object.drop_with_heap(&mut self.heap);
                        task.chain_short = true;
                        task.values.push(Value::Undefined);
                        return Ok(StepFlow::Continue);
                    }
                    let base = object.type_of(&self.heap);
                    object.drop_with_heap(&mut self.heap);
                    return Err(RunError::type_error(format!(
                        "Cannot read properties of {base}"
                    )));
                }
                match prop {
                    MemberProp::Ident(name) => {
                        let slot = Some(task.cache_base + cache.index());
                        let method = self.get_property_cached(&object, PropKey::Str(*name), slot)?;
                        task.values.push(object);
                        task.values.push(method);
                        task.push_frame(FrameKind::Cont {
                            expr: expr_id,
                            phase: ARGS_BASE,
                            aux: 0,
                        });
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
                let key_value = task.values.pop().expect("callee key expected");
                let object = task.values.pop().expect("callee object expected");
                let key = match key_value.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        key_value.drop_with_heap(&mut self.heap);
                        object.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                key_value.drop_with_heap(&mut self.heap);
                let method = self.get_property(&object, key)?;
                task.values.push(object);
                task.values.push(method);
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: ARGS_BASE,
                    aux: 0,
                });
                Ok(StepFlow::Continue)
            }
            _ => self.args_step(task, expr_id, args, phase, aux, CallFinish::Call { optional: *optional }),
        }
    }

    /// `new` continuations: callee on the stack, then arguments.
    pub(crate) fn new_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32, aux: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::New { args, .. } = &program.expr(expr_id).kind else {
            unreachable!("new continuation on a non-new");
        };
        self.args_step(task, expr_id, args, phase, aux, CallFinish::New)
    }

    /// Argument evaluation shared by calls and construction. `phase -
    /// ARGS_BASE` is the next argument index; `aux` counts values pushed so
    /// far (spreads push several).
    fn args_step(
        &mut self,
        task: &mut TaskState,
        expr_id: ExprId,
        args: &[Argument],
        phase: u32,
        aux: u32,
        finish: CallFinish,
    ) -> RunResult<StepFlow> {
        let index = (phase - ARGS_BASE) as usize;
        let mut count = aux as usize;
        if index > 0 {
            match &args[index - 1] {
                Argument::Expr(_) => count += 1,
                Argument::Spread(_) => {
                    let source = task.values.pop().expect("spread argument expected");
                    let mut iter = self.get_iterator(source)?;
                    while let Some(value) = self.iter_next(&mut iter)? {
                        task.values.push(value);
                        count += 1;
                    }
                    self.iter_close(iter);
                }
            }
        }
        if let Some(arg) = args.get(index) {
            let expr = match arg {
                Argument::Expr(expr) | Argument::Spread(expr) => *expr,
            };
            task.push_frame(FrameKind::Cont {
                expr: expr_id,
                phase: phase + 1,
                aux: u32::try_from(count).expect("argument count exceeds u32"),
            });
            task.push_frame(FrameKind::Eval(expr));
            return Ok(StepFlow::Continue);
        }
        // Dispatch.
        let start = task.values.len() - count;
        let call_args: Vec<Value> = task.values.drain(start..).collect();
        let func = task.values.pop().expect("callee expected");
        match finish {
            CallFinish::Call { optional } => {
                let receiver = task.values.pop().expect("receiver expected");
                if optional && func.is_nullish() {
                    func.drop_with_heap(&mut self.heap);
                    receiver.drop_with_heap(&mut self.heap);
                    for arg in call_args {
                        arg.drop_with_heap(&mut self.heap);
                    }
                    task.chain_short = true;
                    task.values.push(Value::Undefined);
                    return Ok(StepFlow::Continue);
                }
                let result = self.call_value_sync(func, receiver, call_args)?;
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
            CallFinish::New => {
                let result = self.construct(func, call_args)?;
                task.values.push(result);
                Ok(StepFlow::Continue)
            }
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Calls any callable value to completion. Consumes `func`, `this`,
    /// and `args`.
    pub(crate) fn call_value_sync(&mut self, func: Value, this: Value, args: Vec<Value>) -> RunResult<Value> {
        enum Callee {
            Native(crate::nativefn::NativeId),
            Builtin(crate::builtins::Builtin),
            Scripted(HeapId),
            Bound(crate::nativefn::NativeId, Vec<Value>),
            NotCallable(String),
        }
        let callee = match &func {
            Value::Native(id) => Callee::Native(*id),
            Value::Builtin(builtin) => Callee::Builtin(*builtin),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(_) => Callee::Scripted(*id),
                HeapData::BoundNative(bound) => {
                    let payload: Vec<Value> =
                        bound.payload.iter().map(|v| v.clone_with_heap(&self.heap)).collect();
                    Callee::Bound(bound.func, payload)
                }
                other => Callee::NotCallable(format!("{kind} is not a function", kind = other.type_name())),
            },
            other => Callee::NotCallable(format!(
                "{value} is not a function",
                value = other.to_display_string(&self.heap, &self.shapes)
            )),
        };
        match callee {
            Callee::Native(id) => {
                func.drop_with_heap(&mut self.heap);
                let native = self.natives.func(id);
                native(self, this, args)
            }
            Callee::Builtin(builtin) => {
                func.drop_with_heap(&mut self.heap);
                self.call_builtin(builtin, this, args)
            }
            Callee::Scripted(id) => {
                let result = self.call_function(id, this, args);
                func.drop_with_heap(&mut self.heap);
                result
            }
            Callee::Bound(id, mut payload) => {
                func.drop_with_heap(&mut self.heap);
                payload.extend(args);
                let native = self.natives.func(id);
                native(self, this, payload)
            }
            Callee::NotCallable(message) => {
                func.drop_with_heap(&mut self.heap);
                this.drop_with_heap(&mut self.heap);
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Err(RunError::type_error(message))
            }
        }
    }

    /// Calls a scripted function value (plain, generator, or async).
    fn call_function(&mut self, func_id: HeapId, this: Value, args: Vec<Value>) -> RunResult<Value> {
        let flags = match self.heap.get(func_id) {
            HeapData::Function(f) => f.flags(),
            other => unreachable!("function id holds {kind}", kind = other.type_name()),
        };
        if flags.is_generator {
            let task = self.build_call_task(func_id, this, args)?;
            let generator = JsGenerator::new(task, flags.is_async);
            let id = self.alloc(HeapData::Generator(generator))?;
            return Ok(Value::Ref(id));
        }
        if flags.is_async {
            return self.call_async_function(func_id, this, args);
        }
        let (name, file, pos) = self.call_site_of(func_id);
        if let Err(err) = self.push_stack_frame(name, file, pos.line, pos.column) {
            this.drop_with_heap(&mut self.heap);
            for arg in args {
                arg.drop_with_heap(&mut self.heap);
            }
            return Err(err);
        }
        let mut task = self.build_call_task(func_id, this, args)?;
        let outcome = self.run_task(&mut task, ResumeInput::Start);
        task.dispose(&mut self.heap);
        self.pop_stack_frame();
        match outcome {
            Ok(TaskFlow::Done(value)) => Ok(value),
            Ok(TaskFlow::Await(value) | TaskFlow::Yield(value)) => {
                value.drop_with_heap(&mut self.heap);
                Err(RunError::syntax_error("await/yield outside an async or generator body"))
            }
            Err(err) => Err(err),
        }
    }

    /// Builds the task for a scripted call: function environment, `this`
    /// binding, parameter-binding frames, hoisting, body.
    fn build_call_task(&mut self, func_id: HeapId, this: Value, args: Vec<Value>) -> RunResult<TaskState> {
        let (program, func, captured, flags, home, parent_ctor) = match self.heap.get(func_id) {
            HeapData::Function(f) => (
                f.program().clone(),
                f.func_id(),
                f.env(),
                f.flags(),
                f.home(),
                f.parent_ctor(),
            ),
            other => unreachable!("function id holds {kind}", kind = other.type_name()),
        };
        let fn_env = env::create_child(&mut self.heap, captured)?;
        if flags.is_arrow {
            // Arrows see the enclosing `this` through the scope chain.
            this.drop_with_heap(&mut self.heap);
        } else {
            env::define(&mut self.heap, fn_env, intern("this"), this, BindingKind::Const, true);
        }
        let cache_base = self.ensure_caches(&program);
        let mut task = TaskState::for_call(program, func, cache_base, fn_env, Value::Undefined, args);
        if let Some(home) = home {
            self.heap.inc_ref(home);
            task.home = Some(home);
        }
        if let Some(parent) = parent_ctor {
            self.heap.inc_ref(parent);
            task.parent_ctor = Some(parent);
        }
        Ok(task)
    }

    fn call_site_of(&self, func_id: HeapId) -> (Istr, Istr, crate::ast::Pos) {
        match self.heap.get(func_id) {
            HeapData::Function(f) => {
                let def = f.program().func(f.func_id());
                (f.name(), f.program().file, def.pos)
            }
            other => unreachable!("function id holds {kind}", kind = other.type_name()),
        }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// `new F(args)`: allocate with `F.prototype`, run `F` with the new
    /// object as `this`, keep an explicitly returned object over it.
    pub(crate) fn construct(&mut self, func: Value, args: Vec<Value>) -> RunResult<Value> {
        match func {
            Value::Builtin(builtin) => self.construct_builtin(builtin, args),
            Value::Native(id) => {
                // Native constructors build their own result object.
                let native = self.natives.func(id);
                native(self, Value::Undefined, args)
            }
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Function(_)) => {
                let proto_value = self.ensure_function_prototype(id)?;
                let proto = match proto_value {
                    Value::Ref(proto) => Some(proto),
                    other => {
                        other.drop_with_heap(&mut self.heap);
                        self.object_proto.inspect(|p| self.heap.inc_ref(*p))
                    }
                };
                let obj = self.alloc(HeapData::Object(JsObject::new(proto)))?;

                // A synthesized default constructor of a derived class just
                // forwards its arguments to the parent constructor.
                let (is_empty_ctor, parent) = match self.heap.get(id) {
                    HeapData::Function(f) => {
                        let def = f.program().func(f.func_id());
                        let empty = matches!(&def.body, FunctionBody::Block(stmts) if stmts.is_empty())
                            && def.params.is_empty();
                        (f.is_class_constructor() && empty, f.parent_ctor())
                    }
                    _ => unreachable!("checked above"),
                };
                if is_empty_ctor && let Some(parent) = parent {
                    self.heap.inc_ref(parent);
                    self.heap.inc_ref(obj);
                    let result = self.call_function(parent, Value::Ref(obj), args);
                    self.heap.dec_ref(parent);
                    self.heap.dec_ref(id);
                    let value = match result {
                        Ok(value) => value,
                        Err(err) => {
                            self.heap.dec_ref(obj);
                            return Err(err);
                        }
                    };
                    value.drop_with_heap(&mut self.heap);
                    return Ok(Value::Ref(obj));
                }

                self.heap.inc_ref(obj);
                let result = self.call_function(id, Value::Ref(obj), args);
                self.heap.dec_ref(id);
                let value = result.inspect_err(|_| self.heap.dec_ref(obj))?;
                if value.is_object_like(&self.heap) {
                    self.heap.dec_ref(obj);
                    Ok(value)
                } else {
                    value.drop_with_heap(&mut self.heap);
                    Ok(Value::Ref(obj))
                }
            }
            other => {
                let message = format!(
                    "{value} is not a constructor",
                    value = other.to_display_string(&self.heap, &self.shapes)
                );
                other.drop_with_heap(&mut self.heap);
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Err(RunError::type_error(message))
            }
        }
    }

    // ========================================================================
    // Closures
    // ========================================================================

    /// Creates a closure over the task's current environment.
    pub(crate) fn make_closure(&mut self, task: &mut TaskState, func: FuncId, name: Option<Istr>) -> RunResult<Value> {
        self.make_closure_inner(task, func, name, None)
    }

    /// Creates a method closure carrying a `[[HomeObject]]`.
    pub(crate) fn make_closure_with_home(
        &mut self,
        task: &mut TaskState,
        func: FuncId,
        home: Option<HeapId>,
    ) -> RunResult<Value> {
        self.make_closure_inner(task, func, None, home)
    }

    fn make_closure_inner(
        &mut self,
        task: &mut TaskState,
        func: FuncId,
        name: Option<Istr>,
        home: Option<HeapId>,
    ) -> RunResult<Value> {
        let program = task.program.clone();
        let captured = task.env();
        self.heap.inc_ref(captured);
        let mut f = JsFunction::new(program, func, captured);
        if let Some(name) = name {
            f = f.with_name(name);
        }
        let flags = f.flags();
        let home = match home {
            Some(home) => Some(home),
            // Arrows inherit the enclosing method's home object so
            // `super.x` keeps working through them.
            None if flags.is_arrow => task.home,
            None => None,
        };
        if let Some(home) = home {
            self.heap.inc_ref(home);
            f = f.with_home(home);
        }
        let id = self.alloc(HeapData::Function(f))?;
        Ok(Value::Ref(id))
    }

    // ========================================================================
    // Classes
    // ========================================================================

    /// First visit of a class expression.
    pub(crate) fn class_start(&mut self, task: &mut TaskState, expr_id: ExprId) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Class(class_id) = &program.expr(expr_id).kind else {
            unreachable!("class start on a non-class");
        };
        if let Some(parent) = program.class(*class_id).parent {
            task.push_frame(FrameKind::Cont {
                expr: expr_id,
                phase: 1,
                aux: 0,
            });
            task.push_frame(FrameKind::Eval(parent));
            Ok(StepFlow::Continue)
        } else {
            self.class_build(task, expr_id, None)
        }
    }

    /// Class continuations: phase 1 = parent evaluated; phases `10 + i`
    /// define the computed-key member `i` (the key is on the stack, the
    /// constructor below it).
    pub(crate) fn class_cont(&mut self, task: &mut TaskState, expr_id: ExprId, phase: u32) -> RunResult<StepFlow> {
        if phase == 1 {
            let parent = task.values.pop().expect("class parent expected");
            return self.class_build(task, expr_id, Some(parent));
        }
        let program = task.program.clone();
        let ExprKind::Class(class_id) = &program.expr(expr_id).kind else {
            unreachable!("class continuation on a non-class");
        };
        let def = program.class(*class_id);
        let member = (phase - 10) as usize;
        let key_value = task.values.pop().expect("class member key expected");
        let key = key_value.to_property_key(&self.heap)?;
        key_value.drop_with_heap(&mut self.heap);
        let ctor = match task.values.last().expect("class constructor expected") {
            Value::Ref(id) => *id,
            other => unreachable!("class slot holds {other:?}"),
        };
        self.class_define_member(task, ctor, &def.methods[member], key)?;
        self.class_schedule_computed(task, expr_id, def, member + 1)
    }

    fn class_build(&mut self, task: &mut TaskState, expr_id: ExprId, parent: Option<Value>) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let ExprKind::Class(class_id) = &program.expr(expr_id).kind else {
            unreachable!("class build on a non-class");
        };
        let def = program.class(*class_id);

        // Resolve the parent constructor and the prototype's parent.
        let (parent_ctor, proto_parent) = match &parent {
            None => (None, self.object_proto),
            Some(Value::Null) => (None, None),
            Some(Value::Ref(id)) if matches!(self.heap.get(*id), HeapData::Function(_)) => {
                let proto_value = self.ensure_function_prototype(*id)?;
                let proto = match proto_value {
                    Value::Ref(proto) => {
                        // The prototype edge is borrowed below; release the
                        // read's count once wired in.
                        Some(proto)
                    }
                    other => {
                        other.drop_with_heap(&mut self.heap);
                        None
                    }
                };
                (Some(*id), proto)
            }
            Some(other) => {
                let message = format!(
                    "Class extends value {value} is not a constructor",
                    value = other.to_display_string(&self.heap, &self.shapes)
                );
                if let Some(parent) = parent {
                    parent.drop_with_heap(&mut self.heap);
                }
                return Err(RunError::type_error(message));
            }
        };

        // prototype object (its parent reference transfers in).
        if parent.is_none() && let Some(p) = proto_parent {
            self.heap.inc_ref(p);
        }
        let proto = self.alloc(HeapData::Object(JsObject::new(proto_parent)))?;

        // Constructor function: home = prototype, marked as a class
        // constructor with its parent wired for `super(...)`.
        let ctor_value = self.make_closure_inner(task, def.constructor, def.name, Some(proto))?;
        let Value::Ref(ctor) = &ctor_value else {
            unreachable!("closure is always heap-resident");
        };
        let ctor = *ctor;
        if let Some(parent_id) = parent_ctor {
            self.heap.inc_ref(parent_id);
        }
        self.heap.inc_ref(proto);
        let old_proto = match self.heap.get_mut(ctor) {
            HeapData::Function(f) => {
                f.mark_class_constructor(parent_ctor);
                f.set_prototype(proto)
            }
            _ => unreachable!("constructor is a function"),
        };
        if let Some(old) = old_proto {
            self.heap.dec_ref(old);
        }
        // prototype.constructor back-reference.
        self.heap.inc_ref(ctor);
        self.object_set_raw(proto, PropKey::Str(*well_known::CONSTRUCTOR), Value::Ref(ctor));
        // The parent value's count is no longer needed; the ctor owns its
        // own references now.
        if let Some(parent) = parent {
            parent.drop_with_heap(&mut self.heap);
        }
        // The proto reference created at allocation is owned by the ctor's
        // prototype slot; the home reference was added by make_closure.
        self.heap.dec_ref(proto);

        // Named members first; computed keys evaluate in order afterwards.
        for method in &def.methods {
            if let PropName::Ident(name) = &method.key {
                self.class_define_member(task, ctor, method, PropKey::Str(*name))?;
            }
        }
        task.values.push(ctor_value);
        self.class_schedule_computed(task, expr_id, def, 0)
    }

    /// Schedules the next computed-key member at or after `from`.
    fn class_schedule_computed(
        &mut self,
        task: &mut TaskState,
        expr_id: ExprId,
        def: &crate::ast::ClassDef,
        from: usize,
    ) -> RunResult<StepFlow> {
        for (index, method) in def.methods.iter().enumerate().skip(from) {
            if let PropName::Computed(key_expr) = &method.key {
                task.push_frame(FrameKind::Cont {
                    expr: expr_id,
                    phase: 10 + u32::try_from(index).expect("class too large"),
                    aux: 0,
                });
                task.push_frame(FrameKind::Eval(*key_expr));
                return Ok(StepFlow::Continue);
            }
        }
        Ok(StepFlow::Continue)
    }

    /// Defines one class member on the prototype (or the constructor, for
    /// statics).
    fn class_define_member(
        &mut self,
        task: &mut TaskState,
        ctor: HeapId,
        method: &crate::ast::MethodDef,
        key: PropKey,
    ) -> RunResult<()> {
        let proto = match self.heap.get(ctor) {
            HeapData::Function(f) => f.prototype().expect("class constructor has a prototype"),
            _ => unreachable!("constructor is a function"),
        };
        if method.is_static {
            let closure = self.make_closure_with_home(task, method.func, None)?;
            if let PropKey::Str(name) = key {
                let old = match self.heap.get_mut(ctor) {
                    HeapData::Function(f) => f.set_static(name, closure),
                    _ => unreachable!("constructor is a function"),
                };
                if let Some(old) = old {
                    old.drop_with_heap(&mut self.heap);
                }
            } else {
                closure.drop_with_heap(&mut self.heap);
            }
            return Ok(());
        }
        let closure = self.make_closure_with_home(task, method.func, Some(proto))?;
        match method.kind {
            MethodKind::Method => self.object_set_raw(proto, key, closure),
            MethodKind::Getter => self.define_accessor(proto, key, closure, true),
            MethodKind::Setter => self.define_accessor(proto, key, closure, false),
        }
        Ok(())
    }

    // ========================================================================
    // Parameter binding
    // ========================================================================

    /// Binds parameter `index` from the task's argument vector, then the
    /// rest parameter once all positionals are bound.
    pub(crate) fn bind_params_step(&mut self, task: &mut TaskState, func: FuncId, index: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let def = program.func(func);
        let position = index as usize;
        if position >= def.params.len() {
            if let Some(rest) = def.rest {
                let remaining: Vec<Value> = task.args.drain(position.min(task.args.len())..).collect();
                let id = self.alloc(HeapData::Array(crate::object::JsArray::with_elements(remaining)))?;
                task.values.push(Value::Ref(id));
                task.push_frame(FrameKind::Destructure {
                    pat: rest,
                    mode: BindMode::Declare(BindingKind::Let),
                });
            }
            return Ok(StepFlow::Continue);
        }
        let param = &def.params[position];
        task.push_frame(FrameKind::BindParams {
            func,
            index: index + 1,
        });
        let arg = if position < task.args.len() {
            std::mem::take(&mut task.args[position])
        } else {
            Value::Undefined
        };
        task.push_frame(FrameKind::Destructure {
            pat: param.pattern,
            mode: BindMode::Declare(BindingKind::Let),
        });
        if arg.is_undefined() && let Some(default) = param.default {
            task.push_frame(FrameKind::Eval(default));
        } else {
            task.values.push(arg);
        }
        Ok(StepFlow::Continue)
    }

    // ========================================================================
    // Async driver integration
    // ========================================================================

    /// Calls an async function: builds the body task, runs it to its first
    /// suspension, and returns the promise.
    fn call_async_function(&mut self, func_id: HeapId, this: Value, args: Vec<Value>) -> RunResult<Value> {
        let promise = self.new_promise()?;
        let task = self.build_call_task(func_id, this, args)?;
        self.heap.inc_ref(promise);
        self.drive_async(task, TaskTarget::Promise(promise), ResumeInput::Start);
        Ok(Value::Ref(promise))
    }

    /// Runs (or resumes) an async body and routes its outcome: park on
    /// `await`, settle the target on completion or throw.
    pub(crate) fn drive_async(&mut self, mut task: TaskState, target: TaskTarget, input: ResumeInput) {
        let outcome = self.run_task(&mut task, input);
        match outcome {
            Ok(TaskFlow::Await(value)) => {
                let id = self.park_async(AsyncTask {
                    task: Some(task),
                    target,
                });
                if let Err(err) = self.await_value(id, value) {
                    self.fail_parked(id, err);
                }
            }
            Ok(TaskFlow::Done(value)) => {
                task.dispose(&mut self.heap);
                match target {
                    TaskTarget::Promise(promise) => {
                        if let Err(err) = self.resolve_promise(promise, value) {
                            self.record_host_error(err);
                        }
                        self.heap.dec_ref(promise);
                    }
                    TaskTarget::AsyncGenStep { promise, generator } => {
                        self.finish_async_generator(generator, promise, value, true);
                    }
                }
            }
            Ok(TaskFlow::Yield(value)) => match target {
                TaskTarget::AsyncGenStep { promise, generator } => {
                    self.yield_async_generator(generator, promise, task, value);
                }
                TaskTarget::Promise(promise) => {
                    value.drop_with_heap(&mut self.heap);
                    task.dispose(&mut self.heap);
                    let err = RunError::syntax_error("yield is not valid in an async function");
                    let reason = match self.throwable_from(err) {
                        Ok(reason) => reason,
                        Err(fatal) => {
                            self.record_host_error(fatal);
                            self.heap.dec_ref(promise);
                            return;
                        }
                    };
                    self.reject_promise(promise, reason);
                    self.heap.dec_ref(promise);
                }
            },
            Err(err) => {
                task.dispose(&mut self.heap);
                match target {
                    TaskTarget::Promise(promise) => {
                        match self.throwable_from(err) {
                            Ok(reason) => self.reject_promise(promise, reason),
                            Err(fatal) => self.record_host_error(fatal),
                        }
                        self.heap.dec_ref(promise);
                    }
                    TaskTarget::AsyncGenStep { promise, generator } => {
                        self.mark_generator_done(generator);
                        match self.throwable_from(err) {
                            Ok(reason) => self.reject_promise(promise, reason),
                            Err(fatal) => self.record_host_error(fatal),
                        }
                        self.heap.dec_ref(promise);
                        self.heap.dec_ref(generator);
                    }
                }
            }
        }
    }

    /// Resumes a parked async task from a settled awaited promise.
    pub(crate) fn resume_async_task(&mut self, id: TaskId, value: Value, is_throw: bool) {
        let slot = id.0 as usize;
        let Some(entry) = self.async_tasks.get_mut(slot).and_then(Option::take) else {
            value.drop_with_heap(&mut self.heap);
            return;
        };
        self.free_async_slot(slot);
        let AsyncTask { task, target } = entry;
        let Some(task) = task else {
            value.drop_with_heap(&mut self.heap);
            return;
        };
        let input = if is_throw {
            ResumeInput::Throw(value)
        } else {
            ResumeInput::Value(value)
        };
        self.drive_async(task, target, input);
    }

    fn park_async(&mut self, entry: AsyncTask) -> TaskId {
        let slot = match self.take_async_slot() {
            Some(slot) => {
                self.async_tasks[slot] = Some(entry);
                slot
            }
            None => {
                self.async_tasks.push(Some(entry));
                self.async_tasks.len() - 1
            }
        };
        TaskId(u32::try_from(slot).expect("async task table exceeds u32"))
    }

    /// A parking failure (fatal error while attaching the await reaction).
    fn fail_parked(&mut self, id: TaskId, err: RunError) {
        let slot = id.0 as usize;
        if let Some(entry) = self.async_tasks.get_mut(slot).and_then(Option::take) {
            self.free_async_slot(slot);
            if let Some(task) = entry.task {
                task.dispose(&mut self.heap);
            }
            match entry.target {
                TaskTarget::Promise(promise) => self.heap.dec_ref(promise),
                TaskTarget::AsyncGenStep { promise, generator } => {
                    self.heap.dec_ref(promise);
                    self.heap.dec_ref(generator);
                }
            }
        }
        self.record_host_error(err);
    }

    /// Converts an engine error into a rejection reason value.
    fn throwable_from(&mut self, err: RunError) -> Result<Value, RunError> {
        match err {
            RunError::Throw(thrown) => self.throwable_to_value(thrown),
            fatal @ RunError::Fatal(_) => Err(fatal),
        }
    }
}

/// How an argument-evaluation sequence finishes.
enum CallFinish {
    Call { optional: bool },
    New,
}
