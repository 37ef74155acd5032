//! Evaluator frames: the defunctionalized continuations of the tree walk.
//!
//! A [`TaskState`] is one suspendable computation: the body of the program,
//! of one async function call, or of one generator. Its frame stack replaces
//! the host call stack the original's stackful coroutines relied on — every
//! partially evaluated node is a [`Frame`] with explicit phase and scratch,
//! so suspending is just returning, and resuming is pushing a value and
//! re-entering the step loop.
//!
//! Frames own reference-counted values (loop iterators, pending
//! completions, destructuring sources); [`FrameKind::take_values`] releases
//! them on unwind and [`FrameKind::trace`] exposes them to the collector.

use std::sync::Arc;

use crate::{
    ast::{ExprId, FuncId, PatId, Program, StmtId},
    env::BindingKind,
    error::Throwable,
    heap::{Heap, HeapId},
    intern::Istr,
    value::Value,
};

/// A control-flow signal traveling up the frame stack.
#[derive(Debug)]
pub(crate) enum UnwindKind {
    Throw(Throwable),
    Return(Value),
    Break(Option<Istr>),
    Continue(Option<Istr>),
}

impl UnwindKind {
    pub fn take_values(self, out: &mut Vec<Value>) {
        match self {
            Self::Throw(Throwable::Value(value)) | Self::Return(value) => out.push(value),
            Self::Throw(Throwable::Simple(_)) | Self::Break(_) | Self::Continue(_) => {}
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Throw(Throwable::Value(value)) | Self::Return(value) => {
                if let Some(id) = value.ref_id() {
                    out.push(id);
                }
            }
            _ => {}
        }
    }
}

/// How a destructuring pattern binds its leaves.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BindMode {
    /// Declare in the current environment.
    Declare(BindingKind),
    /// Assign through the scope chain (or member leaves).
    Assign,
}

/// A live iteration source for `for...of`, spread, and delegation.
///
/// All `next` calls are synchronous from the consuming task's point of
/// view: built-in sources step directly, generators run their own nested
/// task until they yield, and protocol objects call their `next` method to
/// completion.
#[derive(Debug)]
pub(crate) enum IterHandle {
    Array { array: Value, index: usize },
    /// Strings iterate code-point-wise.
    Str { string: Value, byte_index: usize },
    /// Map iteration yields `[key, value]` pair arrays.
    MapEntries { map: Value, index: usize },
    SetValues { set: Value, index: usize },
    Generator { generator: Value },
    /// Anything else implementing the iterator protocol.
    Protocol { iterator: Value, next_fn: Value },
}

impl IterHandle {
    pub fn take_values(self, out: &mut Vec<Value>) {
        match self {
            Self::Array { array, .. } => out.push(array),
            Self::Str { string, .. } => out.push(string),
            Self::MapEntries { map, .. } => out.push(map),
            Self::SetValues { set, .. } => out.push(set),
            Self::Generator { generator } => out.push(generator),
            Self::Protocol { iterator, next_fn } => {
                out.push(iterator);
                out.push(next_fn);
            }
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        let values: &[&Value] = match self {
            Self::Array { array, .. } => &[array],
            Self::Str { string, .. } => &[string],
            Self::MapEntries { map, .. } => &[map],
            Self::SetValues { set, .. } => &[set],
            Self::Generator { generator } => &[generator],
            Self::Protocol { iterator, next_fn } => &[iterator, next_fn],
        };
        for value in values {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }
}

/// Which statement list a [`FrameKind::Body`] frame walks.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BodyList {
    /// The program's top-level body.
    Program,
    /// A function body.
    Func(FuncId),
    /// A block statement's body.
    Block(StmtId),
    /// One switch case's body (falls through to the next case).
    Case { stmt: StmtId, case: u32 },
}

/// Loop progress, kept in the loop's own frame so `break`/`continue` can
/// find their target during unwind.
#[derive(Debug)]
pub(crate) enum LoopState {
    /// About to evaluate the `while` test.
    WhileTest,
    /// Test value is on the stack; decide and run the body.
    WhileBody,
    /// `do..while`: run the body (first or repeat).
    DoBody,
    /// `do..while`: about to evaluate the test.
    DoTest,
    /// `do..while`: test value is on the stack; decide whether to repeat.
    DoDecide,
    /// Classic `for`: evaluate the test (or run the body if there is none).
    ForTest,
    /// Test value is on the stack; decide and run the body.
    ForBody,
    /// Run the update expression, then loop back to the test.
    ForUpdate,
    /// `for...of`: pull the next element and run the body.
    ForOf { iter: IterHandle },
    /// `for...in`: keys snapshotted at entry, walked by index.
    ForIn { keys: Vec<Istr>, index: usize },
}

#[derive(Debug)]
pub(crate) struct LoopFrame {
    pub stmt: StmtId,
    pub label: Option<Istr>,
    pub state: LoopState,
    /// `let`/`const` names of a classic `for` head, copied into a fresh
    /// environment each iteration so closures capture per-iteration
    /// bindings.
    pub per_iteration: Vec<Istr>,
}

impl LoopFrame {
    /// The state `continue` advances this loop to.
    pub fn continue_state(&self) -> Option<LoopState> {
        match &self.state {
            LoopState::WhileTest | LoopState::WhileBody => Some(LoopState::WhileTest),
            LoopState::DoBody | LoopState::DoTest | LoopState::DoDecide => Some(LoopState::DoTest),
            LoopState::ForTest | LoopState::ForBody | LoopState::ForUpdate => Some(LoopState::ForUpdate),
            // Iterator-driven loops re-enter the same pulling state; the
            // handle moves out, so the caller rebuilds the frame.
            LoopState::ForOf { .. } | LoopState::ForIn { .. } => None,
        }
    }
}

/// `try` progress.
#[derive(Debug)]
pub(crate) enum TryState {
    InBlock,
    InHandler,
    /// The finalizer is running; holds the completion to resume afterwards
    /// (`None` for normal completion).
    InFinally(Option<UnwindKind>),
}

#[derive(Debug)]
pub(crate) struct TryFrame {
    pub stmt: StmtId,
    pub state: TryState,
}

/// One continuation frame.
#[derive(Debug)]
pub(crate) enum FrameKind {
    /// Evaluate an expression (first visit). Pushes exactly one value.
    Eval(ExprId),
    /// Node-specific expression continuation; `phase`/`aux` meanings are
    /// documented at each node's handler.
    Cont { expr: ExprId, phase: u32, aux: u32 },
    /// Execute a statement (first visit). Pushes nothing.
    Exec(StmtId),
    /// Node-specific statement continuation.
    StmtCont { stmt: StmtId, phase: u32 },
    /// Walk a statement list.
    Body { list: BodyList, index: u32 },
    /// Consume an expression statement's value.
    ExprStmtEnd { to_completion: bool },
    /// Pop the innermost environment on the normal path.
    PopEnv,
    /// Run hoisted `var` and function declarations into the current frame.
    Hoist(Option<FuncId>),
    /// Bind the next parameter from the task's argument vector.
    BindParams { func: FuncId, index: u32 },
    /// A loop controller.
    Loop(Box<LoopFrame>),
    /// A `try` region barrier.
    Try(Box<TryFrame>),
    /// Consumes `break` for switch statements and labeled blocks.
    BreakBarrier { label: Option<Istr> },
    /// Destructure the value on top of the stack into `pat`.
    Destructure { pat: PatId, mode: BindMode },
    /// Object-pattern walker: binds `pat`'s properties one at a time so
    /// computed keys and nested defaults can evaluate in order.
    ObjectPattern {
        pat: PatId,
        prop: u32,
        mode: BindMode,
        /// A computed key for property `prop` is on the stack.
        key_ready: bool,
        /// The source value being destructured.
        source: Value,
        /// Keys already consumed, excluded from a rest element.
        taken: Vec<Istr>,
    },
    /// Store the value below the evaluated member parts into a member
    /// expression (destructuring leaf `[obj.x] = ...`).
    MemberStore { member: ExprId, phase: u32 },
    /// `yield*` delegation to a live iterator.
    Delegate { iter: IterHandle },
}

impl FrameKind {
    /// Moves any owned values out, for release when the frame is discarded.
    pub fn take_values(self, out: &mut Vec<Value>) {
        match self {
            Self::Loop(lf) => match lf.state {
                LoopState::ForOf { iter } => iter.take_values(out),
                _ => {}
            },
            Self::Try(tf) => {
                if let TryState::InFinally(Some(pending)) = tf.state {
                    pending.take_values(out);
                }
            }
            Self::ObjectPattern { source, .. } => out.push(source),
            Self::Delegate { iter } => iter.take_values(out),
            _ => {}
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Loop(lf) => {
                if let LoopState::ForOf { iter } = &lf.state {
                    iter.trace(out);
                }
            }
            Self::Try(tf) => {
                if let TryState::InFinally(Some(pending)) = &tf.state {
                    pending.trace(out);
                }
            }
            Self::ObjectPattern { source, .. } => {
                if let Some(id) = source.ref_id() {
                    out.push(id);
                }
            }
            Self::Delegate { iter } => iter.trace(out),
            _ => {}
        }
    }
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub kind: FrameKind,
    /// Value-stack height when this frame was pushed; unwinding truncates
    /// back to it.
    pub stack_len: u32,
    /// Environment-stack depth when this frame was pushed.
    pub env_depth: u32,
}

/// One suspendable computation: the evaluator's unit of work.
#[derive(Debug)]
pub(crate) struct TaskState {
    pub program: Arc<Program>,
    /// The function whose body this task runs; `None` for top-level code.
    pub func: Option<FuncId>,
    /// Offset of this program's inline-cache slots in the interpreter's
    /// cache table.
    pub cache_base: usize,
    pub frames: Vec<Frame>,
    /// Scratch operand stack. Every entry is owned.
    pub values: Vec<Value>,
    /// Environment stack; every entry is owned. `envs[0]` is the function
    /// (or global) frame.
    pub envs: Vec<HeapId>,
    /// Call arguments, consumed by `BindParams`.
    pub args: Vec<Value>,
    /// Receiver; `undefined` outside method calls.
    pub this: Value,
    /// `[[HomeObject]]` of the running method, for `super.x`. Owned.
    pub home: Option<HeapId>,
    /// Parent class constructor, for `super(...)`. Owned.
    pub parent_ctor: Option<HeapId>,
    /// Top-level completion value (the value of the last expression
    /// statement).
    pub completion: Value,
    /// Set when an optional-chain link short-circuited; cleared at the
    /// chain boundary.
    pub chain_short: bool,
    /// Label waiting to attach to the next loop statement.
    pub pending_label: Option<Istr>,
}

impl TaskState {
    /// Builds a task for a function body: parameters bind first, then
    /// hoisted declarations, then the body runs.
    pub fn for_call(
        program: Arc<Program>,
        func: FuncId,
        cache_base: usize,
        env: HeapId,
        this: Value,
        args: Vec<Value>,
    ) -> Self {
        let mut task = Self {
            program,
            func: Some(func),
            cache_base,
            frames: Vec::with_capacity(8),
            values: Vec::with_capacity(8),
            envs: vec![env],
            args,
            this,
            home: None,
            parent_ctor: None,
            completion: Value::Undefined,
            chain_short: false,
            pending_label: None,
        };
        task.push_frame(FrameKind::Body {
            list: BodyList::Func(func),
            index: 0,
        });
        task.push_frame(FrameKind::Hoist(Some(func)));
        task.push_frame(FrameKind::BindParams { func, index: 0 });
        task
    }

    /// Builds a task for top-level program code.
    pub fn for_program(program: Arc<Program>, cache_base: usize, env: HeapId) -> Self {
        let mut task = Self {
            program,
            func: None,
            cache_base,
            frames: Vec::with_capacity(8),
            values: Vec::with_capacity(8),
            envs: vec![env],
            args: Vec::new(),
            this: Value::Undefined,
            home: None,
            parent_ctor: None,
            completion: Value::Undefined,
            chain_short: false,
            pending_label: None,
        };
        task.push_frame(FrameKind::Body {
            list: BodyList::Program,
            index: 0,
        });
        task.push_frame(FrameKind::Hoist(None));
        task
    }

    /// Pushes a frame recording the current stack and environment depths.
    pub fn push_frame(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            stack_len: u32::try_from(self.values.len()).expect("value stack exceeds u32"),
            env_depth: u32::try_from(self.envs.len()).expect("env stack exceeds u32"),
        });
    }

    /// The environment the next step executes in.
    #[must_use]
    pub fn env(&self) -> HeapId {
        *self.envs.last().expect("task has no environment")
    }

    /// Yields every heap edge the task holds, for GC rooting of parked
    /// generator and async continuations.
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for value in self.values.iter().chain(&self.args) {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
        for &env in &self.envs {
            out.push(env);
        }
        if let Some(id) = self.this.ref_id() {
            out.push(id);
        }
        out.extend(self.home);
        out.extend(self.parent_ctor);
        if let Some(id) = self.completion.ref_id() {
            out.push(id);
        }
        for frame in &self.frames {
            frame.kind.trace(out);
        }
    }

    /// Releases everything the task owns.
    pub fn dispose(self, heap: &mut Heap) {
        let mut values = self.values;
        values.extend(self.args);
        values.push(self.this);
        values.push(self.completion);
        for frame in self.frames {
            frame.kind.take_values(&mut values);
        }
        for value in values {
            value.drop_with_heap(heap);
        }
        for env in self.envs {
            heap.dec_ref(env);
        }
        for id in self.home.into_iter().chain(self.parent_ctor) {
            heap.dec_ref(id);
        }
    }

    /// Byte estimate for GC accounting when the task is heap-resident
    /// (inside a generator).
    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.frames.len() * std::mem::size_of::<Frame>()
            + self.values.len() * std::mem::size_of::<Value>()
    }
}

/// What a stepped task handed back to its driver.
#[derive(Debug)]
pub(crate) enum TaskFlow {
    /// Ran to completion with this value.
    Done(Value),
    /// Suspended on `await` of this value.
    Await(Value),
    /// Suspended on `yield` with this value.
    Yield(Value),
}

/// What to feed a task when resuming it.
#[derive(Debug)]
pub(crate) enum ResumeInput {
    /// First entry; nothing pending.
    Start,
    /// The suspended expression evaluates to this value.
    Value(Value),
    /// Throw this value at the suspension point.
    Throw(Value),
    /// Force a `return` completion at the suspension point.
    ReturnInto(Value),
}
