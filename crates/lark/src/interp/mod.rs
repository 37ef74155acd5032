//! The evaluator: a cooperative, suspendable tree-walk over the arena AST.
//!
//! Execution is an explicit state machine (`frame.rs`): the step loop pops
//! one frame, does a bounded piece of work, and pushes continuation frames.
//! Because the machine's whole state is data, a task can stop at any
//! `await`/`yield` and resume later — the async and generator drivers hold
//! the frozen [`TaskState`] and feed it values when they arrive.
//!
//! Function calls do not suspend across frames: only a task's *own* body
//! contains its `await`/`yield`, so calls run as nested machines to
//! completion (an async callee returns its promise immediately, a generator
//! callee returns its generator object). Recursion depth is therefore
//! bounded by the call-stack cap, as in any tree-walking engine.
//!
//! Control flow (`return`/`break`/`continue`/throw) travels as an unwind
//! signal that pops frames until a loop, barrier, or `try` region consumes
//! it; `finally` blocks run on every exit path and re-raise the pending
//! signal unless they complete abruptly themselves.

mod binary;
mod call;
mod exprs;
pub(crate) mod frame;
mod iter;
mod pattern;
mod property;

use std::{collections::VecDeque, sync::Arc};

pub(crate) use call::{AsyncTask, TaskTarget};
pub(crate) use frame::{
    BindMode, BodyList, Frame, FrameKind, IterHandle, LoopFrame, LoopState, ResumeInput, TaskFlow, TaskState,
    TryFrame, TryState, UnwindKind,
};

use ahash::AHashMap;

use crate::{
    ast::{DeclKind, ForInit, ForTarget, FunctionBody, Program, StmtId, StmtKind},
    env::{self, BindingKind, EnvFrame},
    error::{
        CallStack, DEFAULT_MAX_CALL_DEPTH, Error, ErrorKind, RunError, RunResult, SimpleError, StackFrame,
        Throwable,
    },
    gc::GcStats,
    heap::{Heap, HeapData, HeapId, HeapStats},
    host::HostValue,
    intern::{Istr, intern},
    io::{PrintWriter, StdPrint},
    module::ModuleRegistry,
    nativefn::NativeRegistry,
    object::PropKey,
    parse::Script,
    promise::Microtask,
    shape::{PropertyCache, Shapes},
    types::JsError,
    value::Value,
};

/// Identity of a parked async computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(pub(crate) u32);

/// A top-level evaluation handle.
///
/// Top-level code cannot `await` or `yield`, so the task is always complete
/// when handed to the host; suspension lives behind the async and generator
/// drivers. The handle preserves the done/resume surface hosts loop on.
#[derive(Debug)]
pub struct Task {
    outcome: Option<Result<HostValue, Error>>,
}

impl Task {
    pub(crate) fn completed(outcome: Result<HostValue, Error>) -> Self {
        Self {
            outcome: Some(outcome),
        }
    }

    /// Whether the task has a final result.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    /// Advances a suspended task; completed tasks are left untouched.
    pub fn resume(&mut self) {}

    /// Takes the final result.
    pub fn into_result(self) -> Result<HostValue, Error> {
        self.outcome.expect("task polled before completion")
    }

    /// Borrows the final result.
    #[must_use]
    pub fn result(&self) -> Option<&Result<HostValue, Error>> {
        self.outcome.as_ref()
    }
}

/// Outcome of one machine step.
pub(crate) enum StepFlow {
    Continue,
    Suspend(TaskFlow),
    Finished(Value),
}

/// The interpreter: one engine instance with its heap, shapes, global
/// environment, microtask queue, and drivers.
pub struct Interpreter {
    pub(crate) heap: Heap,
    pub(crate) shapes: Shapes,
    /// Inline-cache side table; programs get disjoint slot ranges.
    pub(crate) caches: Vec<PropertyCache>,
    /// Keeps registered programs alive so their pointer keys stay unique.
    cache_bases: AHashMap<*const Program, (usize, Arc<Program>)>,
    pub(crate) natives: NativeRegistry,
    pub(crate) microtasks: VecDeque<Microtask>,
    pub(crate) call_stack: CallStack,
    pub(crate) global_env: HeapId,
    /// Prototypes and intrinsics installed by `create_global`.
    pub(crate) object_proto: Option<HeapId>,
    pub(crate) array_proto: Option<HeapId>,
    pub(crate) hooks: crate::globals::Hooks,
    /// Parked async bodies (async function calls and async generator
    /// steps awaiting a value).
    pub(crate) async_tasks: Vec<Option<AsyncTask>>,
    async_free: Vec<usize>,
    /// Rejected promises with no reaction yet; checked at drain end.
    pub(crate) maybe_unhandled: Vec<HeapId>,
    pub(crate) on_unhandled_rejection: Option<Box<dyn FnMut(String)>>,
    pub(crate) modules: ModuleRegistry,
    pub(crate) print: Box<dyn PrintWriter>,
    /// Last top-level error, for the `has_error`/`take_error` surface.
    last_error: Option<Error>,
    /// Errors raised by microtask callbacks with nowhere else to land.
    pub(crate) host_errors: Vec<Error>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("heap", &self.heap)
            .field("microtasks", &self.microtasks.len())
            .field("async_tasks", &self.async_tasks.len())
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Creates an interpreter with a fresh global environment populated
    /// with the engine's built-ins.
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let global_env = heap
            .allocate(HeapData::Environment(EnvFrame::root()))
            .expect("fresh heap cannot be over its ceiling");
        let mut interp = Self {
            heap,
            shapes: Shapes::new(),
            caches: Vec::new(),
            cache_bases: AHashMap::new(),
            natives: NativeRegistry::new(),
            microtasks: VecDeque::new(),
            call_stack: CallStack::new(DEFAULT_MAX_CALL_DEPTH),
            global_env,
            object_proto: None,
            array_proto: None,
            hooks: crate::globals::Hooks::default(),
            async_tasks: Vec::new(),
            async_free: Vec::new(),
            maybe_unhandled: Vec::new(),
            on_unhandled_rejection: None,
            modules: ModuleRegistry::new(),
            print: Box::new(StdPrint),
            last_error: None,
            host_errors: Vec::new(),
        };
        crate::globals::install(&mut interp);
        interp
    }

    /// Replaces the console output sink.
    pub fn set_print(&mut self, print: Box<dyn PrintWriter>) {
        self.print = print;
    }

    /// Installs the unhandled-rejection callback, invoked at microtask
    /// drain end with the formatted rejection reason.
    pub fn set_unhandled_rejection_callback(&mut self, callback: Box<dyn FnMut(String)>) {
        self.on_unhandled_rejection = Some(callback);
    }

    /// Configures the maximum call depth.
    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.call_stack = CallStack::new(depth);
    }

    // ========================================================================
    // Host API: evaluation
    // ========================================================================

    /// Parses and evaluates `source`, drains microtasks, and returns the
    /// value of the trailing expression.
    pub fn run(&mut self, source: &str, file: &str) -> Result<HostValue, Error> {
        let script = Script::parse(source, file)?;
        let result = self.evaluate(&script).into_result();
        self.drain_microtasks();
        result
    }

    /// Evaluates a parsed script. The result value is the completion value
    /// of the last top-level expression statement.
    pub fn evaluate(&mut self, script: &Script) -> Task {
        let program = script.program();
        let cache_base = self.ensure_caches(program);
        self.heap.inc_ref(self.global_env);
        let mut task = TaskState::for_program(program.clone(), cache_base, self.global_env);
        let outcome = match self.run_task(&mut task, ResumeInput::Start) {
            Ok(TaskFlow::Done(value)) => {
                let host = self.to_host_value(&value);
                value.drop_with_heap(&mut self.heap);
                Ok(host)
            }
            Ok(TaskFlow::Await(value) | TaskFlow::Yield(value)) => {
                value.drop_with_heap(&mut self.heap);
                Err(Error::new(
                    "SyntaxError",
                    "await and yield are only valid inside functions",
                    Vec::new(),
                ))
            }
            Err(err) => Err(self.error_from_run_error(err)),
        };
        task.dispose(&mut self.heap);
        if let Err(err) = &outcome {
            self.last_error = Some(err.clone());
        }
        Task::completed(outcome)
    }

    /// Whether the last top-level evaluation ended in an error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    /// The last top-level error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Takes the last top-level error.
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Errors raised by detached microtasks (e.g. `queueMicrotask`
    /// callbacks that threw) since the last call.
    pub fn take_host_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.host_errors)
    }

    /// Defines a global binding from a host value.
    pub fn define_global(&mut self, name: &str, value: HostValue) -> Result<(), Error> {
        let value = self
            .from_host_value(&value)
            .map_err(|err| self.error_from_run_error(err))?;
        env::define(
            &mut self.heap,
            self.global_env,
            intern(name),
            value,
            BindingKind::Var,
            true,
        );
        Ok(())
    }

    /// Reads a global binding as a host value.
    pub fn global(&mut self, name: &str) -> Option<HostValue> {
        match env::get(&self.heap, self.global_env, intern(name)) {
            Ok(Some(value)) => {
                let host = self.to_host_value(&value);
                value.drop_with_heap(&mut self.heap);
                Some(host)
            }
            _ => None,
        }
    }

    // ========================================================================
    // Host API: GC & observability
    // ========================================================================

    /// Forces a full cycle-collection pass.
    pub fn collect(&mut self) {
        self.heap.collect_garbage();
    }

    /// Runs a pass only if the automatic policy says one is due.
    pub fn collect_if_needed(&mut self) {
        if self.heap.should_collect() {
            self.heap.collect_garbage();
        }
    }

    #[must_use]
    pub fn gc_stats(&self) -> GcStats {
        self.heap.gc_stats()
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn set_heap_limit(&mut self, bytes: usize) {
        self.heap.gc_mut().set_heap_limit(bytes);
    }

    pub fn set_gc_threshold(&mut self, bytes: usize) {
        self.heap.gc_mut().set_threshold(bytes);
    }

    pub fn set_auto_collect(&mut self, enabled: bool) {
        self.heap.gc_mut().set_auto_collect(enabled);
    }

    /// Aggregate hit/miss counters over every property-cache site.
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        self.caches
            .iter()
            .fold((0, 0), |(h, m), c| (h + c.hits(), m + c.misses()))
    }

    /// Number of member sites that have gone effectively megamorphic.
    #[must_use]
    pub fn megamorphic_sites(&self) -> usize {
        self.caches.iter().filter(|c| c.is_megamorphic()).count()
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocates heap data, running the GC policy (threshold pass, ceiling
    /// collect-and-retry) as needed.
    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        Ok(self.heap.allocate(data)?)
    }

    /// Registers a program's inline-cache slots, returning their base
    /// offset in the side table.
    pub(crate) fn ensure_caches(&mut self, program: &Arc<Program>) -> usize {
        let key = Arc::as_ptr(program);
        if let Some((base, _)) = self.cache_bases.get(&key) {
            return *base;
        }
        let base = self.caches.len();
        self.caches
            .resize_with(base + program.cache_count, PropertyCache::default);
        self.cache_bases.insert(key, (base, program.clone()));
        base
    }

    // ========================================================================
    // The step loop
    // ========================================================================

    /// Runs a task until it completes, suspends, or throws out.
    pub(crate) fn run_task(&mut self, task: &mut TaskState, input: ResumeInput) -> RunResult<TaskFlow> {
        // Feed the resume input to the suspension point.
        match input {
            ResumeInput::Start => {}
            ResumeInput::Value(value) => {
                if matches!(task.frames.last().map(|f| &f.kind), Some(FrameKind::Delegate { .. })) {
                    let frame = task.frames.pop().expect("delegate frame just observed");
                    if let Some(flow) = self.delegate_feed(task, frame, ResumeInput::Value(value))? {
                        return Ok(flow);
                    }
                } else {
                    task.values.push(value);
                }
            }
            ResumeInput::Throw(reason) => {
                if matches!(task.frames.last().map(|f| &f.kind), Some(FrameKind::Delegate { .. })) {
                    let frame = task.frames.pop().expect("delegate frame just observed");
                    if let Some(flow) = self.delegate_feed(task, frame, ResumeInput::Throw(reason))? {
                        return Ok(flow);
                    }
                } else {
                    match self.unwind(task, UnwindKind::Throw(Throwable::Value(reason)))? {
                        StepFlow::Finished(value) => return Ok(TaskFlow::Done(value)),
                        StepFlow::Suspend(flow) => return Ok(flow),
                        StepFlow::Continue => {}
                    }
                }
            }
            ResumeInput::ReturnInto(value) => {
                if matches!(task.frames.last().map(|f| &f.kind), Some(FrameKind::Delegate { .. })) {
                    let frame = task.frames.pop().expect("delegate frame just observed");
                    if let Some(flow) = self.delegate_feed(task, frame, ResumeInput::ReturnInto(value))? {
                        return Ok(flow);
                    }
                } else {
                    match self.unwind(task, UnwindKind::Return(value))? {
                        StepFlow::Finished(value) => return Ok(TaskFlow::Done(value)),
                        StepFlow::Suspend(flow) => return Ok(flow),
                        StepFlow::Continue => {}
                    }
                }
            }
        }

        loop {
            let Some(frame) = task.frames.pop() else {
                // Fell off the end: top-level code completes with the value
                // of its last expression statement, functions with
                // `undefined` (an explicit `return` finishes via unwind).
                let value = if task.func.is_none() {
                    std::mem::take(&mut task.completion)
                } else {
                    Value::Undefined
                };
                return Ok(TaskFlow::Done(value));
            };
            let flow = self.step(task, frame);
            match flow {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Suspend(flow)) => return Ok(flow),
                Ok(StepFlow::Finished(value)) => return Ok(TaskFlow::Done(value)),
                Err(RunError::Throw(mut thrown)) => {
                    if let Throwable::Simple(simple) = &mut thrown
                        && simple.frames.is_empty()
                    {
                        simple.frames = self.call_stack.capture();
                    }
                    match self.unwind(task, UnwindKind::Throw(thrown))? {
                        StepFlow::Finished(value) => return Ok(TaskFlow::Done(value)),
                        StepFlow::Suspend(flow) => return Ok(flow),
                        StepFlow::Continue => {}
                    }
                }
                Err(fatal @ RunError::Fatal(_)) => return Err(fatal),
            }
        }
    }

    fn step(&mut self, task: &mut TaskState, frame: Frame) -> RunResult<StepFlow> {
        match frame.kind {
            FrameKind::Eval(expr) => self.eval_expr(task, expr),
            FrameKind::Cont { expr, phase, aux } => self.eval_cont(task, expr, phase, aux),
            FrameKind::Exec(stmt) => self.exec_stmt(task, stmt),
            FrameKind::StmtCont { stmt, phase } => self.stmt_cont(task, stmt, phase),
            FrameKind::Body { list, index } => self.body_step(task, list, index),
            FrameKind::ExprStmtEnd { to_completion } => {
                let value = task.values.pop().expect("expression statement left no value");
                if to_completion {
                    let old = std::mem::replace(&mut task.completion, value);
                    old.drop_with_heap(&mut self.heap);
                } else {
                    value.drop_with_heap(&mut self.heap);
                }
                Ok(StepFlow::Continue)
            }
            FrameKind::PopEnv => {
                let env = task.envs.pop().expect("PopEnv with empty environment stack");
                self.heap.dec_ref(env);
                Ok(StepFlow::Continue)
            }
            FrameKind::Hoist(func) => self.hoist(task, func),
            FrameKind::BindParams { func, index } => self.bind_params_step(task, func, index),
            FrameKind::Loop(lf) => self.loop_step(task, *lf),
            FrameKind::Try(tf) => self.try_completed(task, *tf),
            FrameKind::BreakBarrier { .. } => Ok(StepFlow::Continue),
            FrameKind::Destructure { pat, mode } => self.destructure_step(task, pat, mode),
            FrameKind::ObjectPattern {
                pat,
                prop,
                mode,
                key_ready,
                source,
                taken,
            } => self.object_pattern_step(task, pat, prop, mode, key_ready, source, taken),
            FrameKind::MemberStore { member, phase } => self.member_store_step(task, member, phase),
            FrameKind::Delegate { iter } => self.delegate_step(task, iter, None),
        }
    }

    // ========================================================================
    // Unwinding
    // ========================================================================

    /// Releases values and environments down to a frame's recorded depths.
    fn truncate_to(&mut self, task: &mut TaskState, stack_len: u32, env_depth: u32) {
        while task.values.len() > stack_len as usize {
            let value = task.values.pop().expect("stack length just checked");
            value.drop_with_heap(&mut self.heap);
        }
        while task.envs.len() > env_depth as usize {
            let env = task.envs.pop().expect("env depth just checked");
            self.heap.dec_ref(env);
        }
    }

    /// Propagates a control-flow signal: pops frames until one consumes it.
    ///
    /// `finally` blocks encountered on the way run before the signal
    /// continues; a signal raised inside a `finally` replaces the pending
    /// one. An unconsumed `Return` finishes the task; an unconsumed throw
    /// is re-raised to the caller.
    pub(crate) fn unwind(&mut self, task: &mut TaskState, mut kind: UnwindKind) -> RunResult<StepFlow> {
        loop {
            let Some(frame) = task.frames.pop() else {
                return match kind {
                    UnwindKind::Return(value) => Ok(StepFlow::Finished(value)),
                    UnwindKind::Throw(thrown) => Err(RunError::Throw(thrown)),
                    UnwindKind::Break(_) | UnwindKind::Continue(_) => {
                        // Unmatched labels are rejected at parse time; an
                        // unconsumed signal here is an engine bug.
                        unreachable!("break/continue escaped every frame")
                    }
                };
            };
            let Frame {
                kind: frame_kind,
                stack_len,
                env_depth,
            } = frame;
            self.truncate_to(task, stack_len, env_depth);

            match frame_kind {
                FrameKind::PopEnv => {
                    // Depth truncation above already released the scope.
                }
                FrameKind::BreakBarrier { label } => {
                    if let UnwindKind::Break(wanted) = &kind {
                        let matches = match (wanted, label) {
                            (None, _) => true,
                            (Some(w), Some(l)) => *w == l,
                            (Some(_), None) => false,
                        };
                        if matches {
                            return Ok(StepFlow::Continue);
                        }
                    }
                }
                FrameKind::Loop(lf) => {
                    let consumed = self.loop_unwind(task, *lf, &mut kind)?;
                    if consumed {
                        return Ok(StepFlow::Continue);
                    }
                }
                FrameKind::Try(tf) => {
                    if let Some(flow) = self.try_unwind(task, *tf, &mut kind)? {
                        return Ok(flow);
                    }
                }
                FrameKind::Delegate { iter } => {
                    // Leaving a `yield*` abnormally closes the inner
                    // iterator (its finally blocks run).
                    self.iter_close(iter);
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
    }

    /// Break/continue arriving at a loop frame.
    fn loop_unwind(&mut self, task: &mut TaskState, lf: LoopFrame, kind: &mut UnwindKind) -> RunResult<bool> {
        let label_matches = |wanted: &Option<Istr>| match wanted {
            None => true,
            Some(w) => lf.label == Some(*w),
        };
        match kind {
            UnwindKind::Break(wanted) if label_matches(wanted) => {
                if let LoopState::ForOf { iter } = lf.state {
                    self.iter_close(iter);
                }
                Ok(true)
            }
            UnwindKind::Continue(wanted) if label_matches(wanted) => {
                match lf.state {
                    LoopState::ForOf { .. } | LoopState::ForIn { .. } => {
                        // Iterator loops continue by pulling the next
                        // element; the state moves back in as-is.
                        task.push_frame(FrameKind::Loop(Box::new(lf)));
                    }
                    _ => {
                        let state = lf.continue_state().expect("non-iterator loop has a continue state");
                        task.push_frame(FrameKind::Loop(Box::new(LoopFrame { state, ..lf })));
                    }
                }
                Ok(true)
            }
            _ => {
                if let LoopState::ForOf { iter } = lf.state {
                    self.iter_close(iter);
                }
                Ok(false)
            }
        }
    }

    /// A signal arriving at a `try` region barrier.
    fn try_unwind(
        &mut self,
        task: &mut TaskState,
        tf: TryFrame,
        kind: &mut UnwindKind,
    ) -> RunResult<Option<StepFlow>> {
        let program = task.program.clone();
        let StmtKind::Try {
            param,
            handler,
            finalizer,
            ..
        } = &program.stmt(tf.stmt).kind
        else {
            unreachable!("try frame points at a non-try statement");
        };
        match tf.state {
            TryState::InBlock => {
                if let UnwindKind::Throw(_) = kind
                    && let Some(handler_body) = handler
                {
                    let UnwindKind::Throw(thrown) = std::mem::replace(kind, UnwindKind::Break(None)) else {
                        unreachable!("just matched a throw");
                    };
                    let error_value = self.throwable_to_value(thrown)?;
                    task.push_frame(FrameKind::Try(Box::new(TryFrame {
                        stmt: tf.stmt,
                        state: TryState::InHandler,
                    })));
                    let catch_env = env::create_child(&mut self.heap, task.env())?;
                    task.envs.push(catch_env);
                    task.push_frame(FrameKind::PopEnv);
                    task.push_frame(FrameKind::Exec(*handler_body));
                    if let Some(param) = param {
                        task.values.push(error_value);
                        task.push_frame(FrameKind::Destructure {
                            pat: *param,
                            mode: BindMode::Declare(BindingKind::Let),
                        });
                    } else {
                        error_value.drop_with_heap(&mut self.heap);
                    }
                    return Ok(Some(StepFlow::Continue));
                }
                if let Some(finalizer_body) = finalizer {
                    let pending = std::mem::replace(kind, UnwindKind::Break(None));
                    task.push_frame(FrameKind::Try(Box::new(TryFrame {
                        stmt: tf.stmt,
                        state: TryState::InFinally(Some(pending)),
                    })));
                    task.push_frame(FrameKind::Exec(*finalizer_body));
                    return Ok(Some(StepFlow::Continue));
                }
                Ok(None)
            }
            TryState::InHandler => {
                if let Some(finalizer_body) = finalizer {
                    let pending = std::mem::replace(kind, UnwindKind::Break(None));
                    task.push_frame(FrameKind::Try(Box::new(TryFrame {
                        stmt: tf.stmt,
                        state: TryState::InFinally(Some(pending)),
                    })));
                    task.push_frame(FrameKind::Exec(*finalizer_body));
                    return Ok(Some(StepFlow::Continue));
                }
                Ok(None)
            }
            TryState::InFinally(pending) => {
                // The finalizer itself completed abruptly: its signal wins
                // over whatever was pending.
                if let Some(pending) = pending {
                    let mut values = Vec::new();
                    pending.take_values(&mut values);
                    for value in values {
                        value.drop_with_heap(&mut self.heap);
                    }
                }
                Ok(None)
            }
        }
    }

    /// Normal completion reaching a `try` barrier.
    fn try_completed(&mut self, task: &mut TaskState, tf: TryFrame) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let StmtKind::Try { finalizer, .. } = &program.stmt(tf.stmt).kind else {
            unreachable!("try frame points at a non-try statement");
        };
        match tf.state {
            TryState::InBlock | TryState::InHandler => {
                if let Some(finalizer_body) = finalizer {
                    task.push_frame(FrameKind::Try(Box::new(TryFrame {
                        stmt: tf.stmt,
                        state: TryState::InFinally(None),
                    })));
                    task.push_frame(FrameKind::Exec(*finalizer_body));
                }
                Ok(StepFlow::Continue)
            }
            TryState::InFinally(None) => Ok(StepFlow::Continue),
            TryState::InFinally(Some(pending)) => self.unwind(task, pending),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_stmt(&mut self, task: &mut TaskState, stmt_id: StmtId) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let stmt = program.stmt(stmt_id);
        match &stmt.kind {
            StmtKind::Empty | StmtKind::FunctionDecl { .. } => Ok(StepFlow::Continue),
            StmtKind::Expr(expr) => {
                task.push_frame(FrameKind::ExprStmtEnd {
                    to_completion: task.func.is_none(),
                });
                task.push_frame(FrameKind::Eval(*expr));
                Ok(StepFlow::Continue)
            }
            StmtKind::VarDecl { .. } => self.stmt_cont(task, stmt_id, 0),
            StmtKind::ClassDecl { expr, .. } => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*expr));
                Ok(StepFlow::Continue)
            }
            StmtKind::Return(expr) => match expr {
                Some(expr) => {
                    task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                    task.push_frame(FrameKind::Eval(*expr));
                    Ok(StepFlow::Continue)
                }
                None => self.unwind(task, UnwindKind::Return(Value::Undefined)),
            },
            StmtKind::If { test, .. } => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*test));
                Ok(StepFlow::Continue)
            }
            StmtKind::Block(stmts) => {
                let block_env = env::create_child(&mut self.heap, task.env())?;
                task.push_frame(FrameKind::PopEnv);
                task.envs.push(block_env);
                task.push_frame(FrameKind::Body {
                    list: BodyList::Block(stmt_id),
                    index: 0,
                });
                self.declare_lexical(task, stmts)?;
                Ok(StepFlow::Continue)
            }
            StmtKind::While { .. } => {
                let label = self.take_pending_label(task);
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::WhileTest,
                    per_iteration: Vec::new(),
                })));
                Ok(StepFlow::Continue)
            }
            StmtKind::DoWhile { .. } => {
                let label = self.take_pending_label(task);
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::DoBody,
                    per_iteration: Vec::new(),
                })));
                Ok(StepFlow::Continue)
            }
            StmtKind::For { init, .. } => {
                let label = self.take_pending_label(task);
                // A let/const head gets its own scope, copied per
                // iteration so closures capture per-iteration bindings.
                let mut per_iteration = Vec::new();
                if let Some(ForInit::VarDecl(decl_stmt)) = init
                    && let StmtKind::VarDecl { kind, decls } = &program.stmt(*decl_stmt).kind
                    && matches!(kind, DeclKind::Let | DeclKind::Const)
                {
                    for decl in decls {
                        collect_pattern_names(&program, decl.pattern, &mut per_iteration);
                    }
                    let head_env = env::create_child(&mut self.heap, task.env())?;
                    task.push_frame(FrameKind::PopEnv);
                    task.envs.push(head_env);
                    for &name in &per_iteration {
                        env::define(
                            &mut self.heap,
                            head_env,
                            name,
                            Value::Undefined,
                            BindingKind::Let,
                            false,
                        );
                    }
                }
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::ForTest,
                    per_iteration,
                })));
                match init {
                    Some(ForInit::VarDecl(decl_stmt)) => {
                        task.push_frame(FrameKind::Exec(*decl_stmt));
                    }
                    Some(ForInit::Expr(expr)) => {
                        task.push_frame(FrameKind::ExprStmtEnd { to_completion: false });
                        task.push_frame(FrameKind::Eval(*expr));
                    }
                    None => {}
                }
                Ok(StepFlow::Continue)
            }
            StmtKind::ForIn { object, .. } => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*object));
                Ok(StepFlow::Continue)
            }
            StmtKind::ForOf { iterable, .. } => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*iterable));
                Ok(StepFlow::Continue)
            }
            StmtKind::Break(label) => self.unwind(task, UnwindKind::Break(*label)),
            StmtKind::Continue(label) => self.unwind(task, UnwindKind::Continue(*label)),
            StmtKind::Throw(expr) => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*expr));
                Ok(StepFlow::Continue)
            }
            StmtKind::Try { block, .. } => {
                task.push_frame(FrameKind::Try(Box::new(TryFrame {
                    stmt: stmt_id,
                    state: TryState::InBlock,
                })));
                task.push_frame(FrameKind::Exec(*block));
                Ok(StepFlow::Continue)
            }
            StmtKind::Labeled { label, body } => {
                let body_stmt = program.stmt(*body);
                if matches!(
                    body_stmt.kind,
                    StmtKind::While { .. }
                        | StmtKind::DoWhile { .. }
                        | StmtKind::For { .. }
                        | StmtKind::ForIn { .. }
                        | StmtKind::ForOf { .. }
                ) {
                    task.pending_label = Some(*label);
                    self.exec_stmt(task, *body)
                } else {
                    task.push_frame(FrameKind::BreakBarrier { label: Some(*label) });
                    task.push_frame(FrameKind::Exec(*body));
                    Ok(StepFlow::Continue)
                }
            }
            StmtKind::Switch { discriminant, .. } => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*discriminant));
                Ok(StepFlow::Continue)
            }
            StmtKind::ExportDefault(expr) => {
                task.push_frame(FrameKind::StmtCont { stmt: stmt_id, phase: 1 });
                task.push_frame(FrameKind::Eval(*expr));
                Ok(StepFlow::Continue)
            }
        }
    }

    fn stmt_cont(&mut self, task: &mut TaskState, stmt_id: StmtId, phase: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let stmt = program.stmt(stmt_id);
        match &stmt.kind {
            StmtKind::VarDecl { kind, decls } => {
                let index = phase as usize;
                let Some(decl) = decls.get(index) else {
                    return Ok(StepFlow::Continue);
                };
                let mode = BindMode::Declare(match kind {
                    DeclKind::Var => BindingKind::Var,
                    DeclKind::Let => BindingKind::Let,
                    DeclKind::Const => BindingKind::Const,
                });
                task.push_frame(FrameKind::StmtCont {
                    stmt: stmt_id,
                    phase: phase + 1,
                });
                task.push_frame(FrameKind::Destructure {
                    pat: decl.pattern,
                    mode,
                });
                match decl.init {
                    Some(init) => task.push_frame(FrameKind::Eval(init)),
                    None => task.values.push(Value::Undefined),
                }
                Ok(StepFlow::Continue)
            }
            StmtKind::ClassDecl { name, .. } => {
                let value = task.values.pop().expect("class value expected");
                env::define(&mut self.heap, task.env(), *name, value, BindingKind::Let, true);
                Ok(StepFlow::Continue)
            }
            StmtKind::Return(_) => {
                let value = task.values.pop().expect("return value expected");
                self.unwind(task, UnwindKind::Return(value))
            }
            StmtKind::If {
                consequent, alternate, ..
            } => {
                let test = task.values.pop().expect("if test value expected");
                let truthy = test.to_boolean(&self.heap);
                test.drop_with_heap(&mut self.heap);
                if truthy {
                    task.push_frame(FrameKind::Exec(*consequent));
                } else if let Some(alternate) = alternate {
                    task.push_frame(FrameKind::Exec(*alternate));
                }
                Ok(StepFlow::Continue)
            }
            StmtKind::ForIn { .. } => {
                let object = task.values.pop().expect("for-in object expected");
                if object.is_nullish() {
                    return Ok(StepFlow::Continue);
                }
                let keys = self.for_in_keys(&object);
                object.drop_with_heap(&mut self.heap);
                let label = self.take_pending_label(task);
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::ForIn { keys, index: 0 },
                    per_iteration: Vec::new(),
                })));
                Ok(StepFlow::Continue)
            }
            StmtKind::ForOf { .. } => {
                let iterable = task.values.pop().expect("for-of iterable expected");
                let iter = self.get_iterator(iterable)?;
                let label = self.take_pending_label(task);
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::ForOf { iter },
                    per_iteration: Vec::new(),
                })));
                Ok(StepFlow::Continue)
            }
            StmtKind::Throw(_) => {
                let value = task.values.pop().expect("throw value expected");
                self.stamp_error_frames(&value);
                Err(RunError::Throw(Throwable::Value(value)))
            }
            StmtKind::Switch { cases, .. } => {
                // phase 1: discriminant on the stack, start testing case 0.
                // phase 2 + k: case k's test value is on the stack.
                if phase >= 2 {
                    let case_index = (phase - 2) as usize;
                    let test = task.values.pop().expect("case test value expected");
                    let disc = task.values.last().expect("switch discriminant expected");
                    let matched = disc.strict_equals(&test, &self.heap);
                    test.drop_with_heap(&mut self.heap);
                    if matched {
                        let disc = task.values.pop().expect("switch discriminant expected");
                        disc.drop_with_heap(&mut self.heap);
                        task.push_frame(FrameKind::BreakBarrier { label: None });
                        task.push_frame(FrameKind::Body {
                            list: BodyList::Case {
                                stmt: stmt_id,
                                case: case_index as u32,
                            },
                            index: 0,
                        });
                        return Ok(StepFlow::Continue);
                    }
                }
                // Find the next case with a test expression.
                let start = if phase == 1 { 0 } else { (phase - 2) as usize + 1 };
                for (offset, case) in cases.iter().enumerate().skip(start) {
                    if let Some(test) = case.test {
                        task.push_frame(FrameKind::StmtCont {
                            stmt: stmt_id,
                            phase: 2 + offset as u32,
                        });
                        task.push_frame(FrameKind::Eval(test));
                        return Ok(StepFlow::Continue);
                    }
                }
                // No test matched: run the default clause if present.
                let disc = task.values.pop().expect("switch discriminant expected");
                disc.drop_with_heap(&mut self.heap);
                if let Some(default_index) = cases.iter().position(|case| case.test.is_none()) {
                    task.push_frame(FrameKind::BreakBarrier { label: None });
                    task.push_frame(FrameKind::Body {
                        list: BodyList::Case {
                            stmt: stmt_id,
                            case: default_index as u32,
                        },
                        index: 0,
                    });
                }
                Ok(StepFlow::Continue)
            }
            StmtKind::ExportDefault(_) => {
                let value = task.values.pop().expect("export default value expected");
                let name = crate::module::default_export_name();
                env::define(&mut self.heap, task.envs[0], name, value, BindingKind::Const, true);
                Ok(StepFlow::Continue)
            }
            other => unreachable!("no continuation for statement {other:?}"),
        }
    }

    /// Walks a statement list.
    fn body_step(&mut self, task: &mut TaskState, list: BodyList, index: u32) -> RunResult<StepFlow> {
        let program = task.program.clone();
        match list {
            BodyList::Program => {
                if let Some(&stmt) = program.body.get(index as usize) {
                    task.push_frame(FrameKind::Body {
                        list,
                        index: index + 1,
                    });
                    task.push_frame(FrameKind::Exec(stmt));
                }
                Ok(StepFlow::Continue)
            }
            BodyList::Func(func) => match &program.func(func).body {
                FunctionBody::Block(stmts) => {
                    if let Some(&stmt) = stmts.get(index as usize) {
                        task.push_frame(FrameKind::Body {
                            list,
                            index: index + 1,
                        });
                        task.push_frame(FrameKind::Exec(stmt));
                    }
                    Ok(StepFlow::Continue)
                }
                FunctionBody::Expr(expr) => {
                    if index == 0 {
                        task.push_frame(FrameKind::Body { list, index: 1 });
                        task.push_frame(FrameKind::Eval(*expr));
                        Ok(StepFlow::Continue)
                    } else {
                        let value = task.values.pop().expect("concise body left no value");
                        self.unwind(task, UnwindKind::Return(value))
                    }
                }
            },
            BodyList::Block(stmt) => {
                let StmtKind::Block(stmts) = &program.stmt(stmt).kind else {
                    unreachable!("block body frame points at a non-block");
                };
                if let Some(&stmt) = stmts.get(index as usize) {
                    task.push_frame(FrameKind::Body {
                        list,
                        index: index + 1,
                    });
                    task.push_frame(FrameKind::Exec(stmt));
                }
                Ok(StepFlow::Continue)
            }
            BodyList::Case { stmt, case } => {
                let StmtKind::Switch { cases, .. } = &program.stmt(stmt).kind else {
                    unreachable!("case body frame points at a non-switch");
                };
                let body = &cases[case as usize].body;
                if let Some(&body_stmt) = body.get(index as usize) {
                    task.push_frame(FrameKind::Body {
                        list,
                        index: index + 1,
                    });
                    task.push_frame(FrameKind::Exec(body_stmt));
                } else if (case as usize) + 1 < cases.len() {
                    // Fall through into the next case's body.
                    task.push_frame(FrameKind::Body {
                        list: BodyList::Case { stmt, case: case + 1 },
                        index: 0,
                    });
                }
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Runs `var` and function-declaration hoisting into the current frame.
    fn hoist(&mut self, task: &mut TaskState, func: Option<crate::ast::FuncId>) -> RunResult<StepFlow> {
        let program = task.program.clone();
        let hoisted = match func {
            Some(func) => &program.func(func).hoisted,
            None => &program.hoisted,
        };
        let env = task.env();
        for &name in &hoisted.vars {
            if !env::has(&self.heap, env, name) {
                env::define(&mut self.heap, env, name, Value::Undefined, BindingKind::Var, true);
            }
        }
        for &(name, func_id) in &hoisted.funcs {
            let closure = self.make_closure(task, func_id, None)?;
            env::define(&mut self.heap, env, name, closure, BindingKind::Var, true);
        }
        Ok(StepFlow::Continue)
    }

    /// Declares a block's lexical bindings (TDZ placeholders and
    /// block-level function declarations) at block entry.
    fn declare_lexical(&mut self, task: &mut TaskState, stmts: &[StmtId]) -> RunResult<()> {
        let program = task.program.clone();
        let env = task.env();
        for &stmt_id in stmts {
            match &program.stmt(stmt_id).kind {
                StmtKind::VarDecl { kind, decls } if !matches!(kind, DeclKind::Var) => {
                    let binding = match kind {
                        DeclKind::Let => BindingKind::Let,
                        DeclKind::Const => BindingKind::Const,
                        DeclKind::Var => unreachable!("var filtered above"),
                    };
                    let mut names = Vec::new();
                    for decl in decls {
                        collect_pattern_names(&program, decl.pattern, &mut names);
                    }
                    for name in names {
                        env::define(&mut self.heap, env, name, Value::Undefined, binding, false);
                    }
                }
                StmtKind::ClassDecl { name, .. } => {
                    env::define(&mut self.heap, env, *name, Value::Undefined, BindingKind::Let, false);
                }
                StmtKind::FunctionDecl { name, func } => {
                    let closure = self.make_closure(task, *func, None)?;
                    env::define(&mut self.heap, env, *name, closure, BindingKind::Let, true);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Drives one loop controller step.
    fn loop_step(&mut self, task: &mut TaskState, lf: LoopFrame) -> RunResult<StepFlow> {
        let LoopFrame {
            stmt: stmt_id,
            label,
            state,
            per_iteration,
        } = lf;
        let program = task.program.clone();
        let stmt = program.stmt(stmt_id);
        let reframe = |state: LoopState| {
            FrameKind::Loop(Box::new(LoopFrame {
                stmt: stmt_id,
                label,
                state,
                per_iteration: Vec::new(),
            }))
        };
        match state {
            LoopState::WhileTest => {
                let StmtKind::While { test, .. } = &stmt.kind else {
                    unreachable!("while frame on a non-while");
                };
                task.push_frame(reframe(LoopState::WhileBody));
                task.push_frame(FrameKind::Eval(*test));
                Ok(StepFlow::Continue)
            }
            LoopState::WhileBody => {
                let StmtKind::While { body, .. } = &stmt.kind else {
                    unreachable!("while frame on a non-while");
                };
                let test = task.values.pop().expect("while test value expected");
                let truthy = test.to_boolean(&self.heap);
                test.drop_with_heap(&mut self.heap);
                if truthy {
                    task.push_frame(reframe(LoopState::WhileTest));
                    task.push_frame(FrameKind::Exec(*body));
                }
                Ok(StepFlow::Continue)
            }
            LoopState::DoBody => {
                let StmtKind::DoWhile { body, .. } = &stmt.kind else {
                    unreachable!("do-while frame on a non-do-while");
                };
                task.push_frame(reframe(LoopState::DoTest));
                task.push_frame(FrameKind::Exec(*body));
                Ok(StepFlow::Continue)
            }
            LoopState::DoTest => {
                let StmtKind::DoWhile { test, .. } = &stmt.kind else {
                    unreachable!("do-while frame on a non-do-while");
                };
                task.push_frame(reframe(LoopState::DoDecide));
                task.push_frame(FrameKind::Eval(*test));
                Ok(StepFlow::Continue)
            }
            LoopState::DoDecide => {
                let test = task.values.pop().expect("do-while test value expected");
                let truthy = test.to_boolean(&self.heap);
                test.drop_with_heap(&mut self.heap);
                if truthy {
                    task.push_frame(reframe(LoopState::DoBody));
                }
                Ok(StepFlow::Continue)
            }
            LoopState::ForTest => {
                let StmtKind::For { test, body, .. } = &stmt.kind else {
                    unreachable!("for frame on a non-for");
                };
                let next = FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: if test.is_some() { LoopState::ForBody } else { LoopState::ForUpdate },
                    per_iteration,
                }));
                task.push_frame(next);
                match test {
                    Some(test) => task.push_frame(FrameKind::Eval(*test)),
                    None => task.push_frame(FrameKind::Exec(*body)),
                }
                Ok(StepFlow::Continue)
            }
            LoopState::ForBody => {
                let StmtKind::For { body, .. } = &stmt.kind else {
                    unreachable!("for frame on a non-for");
                };
                let test = task.values.pop().expect("for test value expected");
                let truthy = test.to_boolean(&self.heap);
                test.drop_with_heap(&mut self.heap);
                if truthy {
                    task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                        stmt: stmt_id,
                        label,
                        state: LoopState::ForUpdate,
                        per_iteration,
                    })));
                    task.push_frame(FrameKind::Exec(*body));
                }
                Ok(StepFlow::Continue)
            }
            LoopState::ForUpdate => {
                let StmtKind::For { update, .. } = &stmt.kind else {
                    unreachable!("for frame on a non-for");
                };
                // Copy the head bindings into a fresh per-iteration scope
                // before the update runs, so closures made in the body just
                // finished keep the values they saw.
                if !per_iteration.is_empty() {
                    self.clone_iteration_env(task, &per_iteration)?;
                }
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::ForTest,
                    per_iteration,
                })));
                if let Some(update) = update {
                    task.push_frame(FrameKind::ExprStmtEnd { to_completion: false });
                    task.push_frame(FrameKind::Eval(*update));
                }
                Ok(StepFlow::Continue)
            }
            LoopState::ForOf { mut iter } => {
                let StmtKind::ForOf { left, body, .. } = &stmt.kind else {
                    unreachable!("for-of frame on a non-for-of");
                };
                match self.iter_next(&mut iter)? {
                    None => {
                        self.iter_close(iter);
                        Ok(StepFlow::Continue)
                    }
                    Some(element) => {
                        task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                            stmt: stmt_id,
                            label,
                            state: LoopState::ForOf { iter },
                            per_iteration: Vec::new(),
                        })));
                        self.push_iteration_binding(task, left, element, *body)?;
                        Ok(StepFlow::Continue)
                    }
                }
            }
            LoopState::ForIn { keys, index } => {
                let StmtKind::ForIn { left, body, .. } = &stmt.kind else {
                    unreachable!("for-in frame on a non-for-in");
                };
                let Some(&key) = keys.get(index) else {
                    return Ok(StepFlow::Continue);
                };
                let element = Value::Str(key);
                task.push_frame(FrameKind::Loop(Box::new(LoopFrame {
                    stmt: stmt_id,
                    label,
                    state: LoopState::ForIn {
                        keys,
                        index: index + 1,
                    },
                    per_iteration: Vec::new(),
                })));
                self.push_iteration_binding(task, left, element, *body)?;
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Pushes the per-iteration frames of a `for...in`/`for...of` loop
    /// (the advanced loop controller is already in place): scope, body,
    /// and the binding of `element` to the loop target.
    fn push_iteration_binding(
        &mut self,
        task: &mut TaskState,
        left: &ForTarget,
        element: Value,
        body: StmtId,
    ) -> RunResult<()> {
        let (pat, mode) = match left {
            ForTarget::Decl { kind, pattern } => {
                let iter_env = env::create_child(&mut self.heap, task.env())?;
                task.push_frame(FrameKind::PopEnv);
                task.envs.push(iter_env);
                let binding = match kind {
                    DeclKind::Var => BindingKind::Var,
                    DeclKind::Let => BindingKind::Let,
                    DeclKind::Const => BindingKind::Const,
                };
                (*pattern, BindMode::Declare(binding))
            }
            ForTarget::Pattern(pattern) => (*pattern, BindMode::Assign),
        };
        task.push_frame(FrameKind::Exec(body));
        task.values.push(element);
        task.push_frame(FrameKind::Destructure { pat, mode });
        Ok(())
    }

    /// Replaces the top environment with a fresh frame holding copies of
    /// the named bindings (per-iteration `let` semantics of classic `for`).
    fn clone_iteration_env(&mut self, task: &mut TaskState, names: &[Istr]) -> RunResult<()> {
        let old_env = task.env();
        let parent = match self.heap.get(old_env) {
            HeapData::Environment(frame) => frame.parent(),
            other => unreachable!("environment id holds {kind}", kind = other.type_name()),
        };
        let new_env = match parent {
            Some(parent) => env::create_child(&mut self.heap, parent)?,
            None => self.alloc(HeapData::Environment(EnvFrame::root()))?,
        };
        for &name in names {
            let value = env::get(&self.heap, old_env, name)?.unwrap_or(Value::Undefined);
            env::define(&mut self.heap, new_env, name, value, BindingKind::Let, true);
        }
        let top = task.envs.last_mut().expect("loop has an environment");
        let old = std::mem::replace(top, new_env);
        self.heap.dec_ref(old);
        Ok(())
    }

    fn take_pending_label(&mut self, task: &mut TaskState) -> Option<Istr> {
        task.pending_label.take()
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Builds a heap Error object from an engine-raised error.
    pub(crate) fn materialize_error(&mut self, simple: SimpleError) -> RunResult<Value> {
        let mut error = JsError::new(intern(<&'static str>::from(simple.kind)), simple.message);
        error.set_frames(simple.frames);
        let id = self.alloc(HeapData::Error(error))?;
        Ok(Value::Ref(id))
    }

    /// Creates a script-visible Error value with the current stack.
    pub(crate) fn make_error_value(&mut self, kind: ErrorKind, message: impl Into<String>) -> RunResult<Value> {
        let mut simple = SimpleError::new(kind, message);
        simple.frames = self.call_stack.capture();
        self.materialize_error(simple)
    }

    /// Attaches the current stack to an Error object that has none yet.
    pub(crate) fn stamp_error_frames(&mut self, value: &Value) {
        if let Value::Ref(id) = value
            && let HeapData::Error(err) = self.heap.get_mut(*id)
            && err.frames().is_empty()
        {
            let frames = self.call_stack.capture();
            match self.heap.get_mut(*id) {
                HeapData::Error(err) => err.set_frames(frames),
                _ => unreachable!("error value changed kind"),
            }
        }
    }

    /// Converts an engine error into the host-facing error type.
    pub(crate) fn error_from_run_error(&mut self, err: RunError) -> Error {
        match err {
            RunError::Fatal(fatal) => Error::from_fatal(&fatal, self.call_stack.capture()),
            RunError::Throw(Throwable::Simple(simple)) => Error::from_simple(&simple),
            RunError::Throw(Throwable::Value(value)) => {
                let error = match &value {
                    Value::Ref(id) => match self.heap.get(*id) {
                        HeapData::Error(err) => Some(Error::new(
                            err.name().to_string(),
                            err.message().to_owned(),
                            err.frames().to_vec(),
                        )),
                        _ => None,
                    },
                    _ => None,
                };
                let error = error.unwrap_or_else(|| {
                    Error::new(
                        "Error",
                        format!(
                            "Uncaught {value}",
                            value = value.to_display_string(&self.heap, &self.shapes)
                        ),
                        self.call_stack.capture(),
                    )
                });
                value.drop_with_heap(&mut self.heap);
                error
            }
        }
    }

    /// Records an error raised by a detached microtask.
    pub(crate) fn record_host_error(&mut self, err: RunError) {
        let error = self.error_from_run_error(err);
        self.host_errors.push(error);
    }

    // ========================================================================
    // Misc shared helpers
    // ========================================================================

    /// Allocates an iterator-result object `{value, done}`.
    pub(crate) fn make_iter_result(&mut self, value: Value, done: bool) -> RunResult<Value> {
        use crate::intern::well_known;
        let proto = self.object_proto;
        if let Some(proto) = proto {
            self.heap.inc_ref(proto);
        }
        let obj_id = self.alloc(HeapData::Object(crate::object::JsObject::new(proto)))?;
        self.object_set_raw(obj_id, PropKey::Str(*well_known::VALUE), value);
        self.object_set_raw(obj_id, PropKey::Str(*well_known::DONE), Value::Bool(done));
        Ok(Value::Ref(obj_id))
    }

    /// Infallible own-property store used by engine-constructed objects.
    pub(crate) fn object_set_raw(&mut self, obj: HeapId, key: PropKey, value: Value) {
        let mut data = self.heap.take_data(obj);
        if let HeapData::Object(object) = &mut data {
            match object.set_own(key, value, &mut self.shapes) {
                crate::object::SetSlot::Done(old) => {
                    self.heap.restore_data(obj, data);
                    if let Some(old) = old {
                        old.drop_with_heap(&mut self.heap);
                    }
                }
                crate::object::SetSlot::NotWritable(value)
                | crate::object::SetSlot::NoSetter(value)
                | crate::object::SetSlot::Setter { value, .. } => {
                    self.heap.restore_data(obj, data);
                    value.drop_with_heap(&mut self.heap);
                }
            }
        } else {
            self.heap.restore_data(obj, data);
            value.drop_with_heap(&mut self.heap);
        }
    }

    pub(crate) fn take_async_slot(&mut self) -> Option<usize> {
        self.async_free.pop()
    }

    pub(crate) fn free_async_slot(&mut self, slot: usize) {
        self.async_free.push(slot);
    }

    /// Pushes a call-stack frame for a scripted call.
    pub(crate) fn push_stack_frame(&mut self, function: Istr, file: Istr, line: u32, column: u32) -> RunResult<()> {
        self.call_stack.push(StackFrame::new(function, file, line, column))
    }

    /// Pops the innermost call-stack frame.
    pub(crate) fn pop_stack_frame(&mut self) {
        self.call_stack.pop();
    }

    /// Host-installed native callables can bracket their work with a stack
    /// frame so engine errors raised inside them carry a useful trace.
    pub fn host_push_stack_frame(&mut self, function: &str, file: &str, line: u32, column: u32) -> Result<(), Error> {
        self.call_stack
            .push(StackFrame::new(intern(function), intern(file), line, column))
            .map_err(|err| self.error_from_run_error(err))
    }

    /// Pops a frame pushed by [`Self::host_push_stack_frame`].
    pub fn host_pop_stack_frame(&mut self) {
        self.call_stack.pop();
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects the identifier names a pattern binds.
pub(crate) fn collect_pattern_names(program: &Program, pat: crate::ast::PatId, out: &mut Vec<Istr>) {
    use crate::ast::Pattern;
    match program.pat(pat) {
        Pattern::Ident(name) => out.push(*name),
        Pattern::Member(_) => {}
        Pattern::Array { elements, rest } => {
            for element in elements.iter().flatten() {
                collect_pattern_names(program, *element, out);
            }
            if let Some(rest) = rest {
                collect_pattern_names(program, *rest, out);
            }
        }
        Pattern::Object { props, rest } => {
            for prop in props {
                collect_pattern_names(program, prop.value, out);
            }
            if let Some(rest) = rest {
                collect_pattern_names(program, *rest, out);
            }
        }
        Pattern::Default { inner, .. } => collect_pattern_names(program, *inner, out),
    }
}
