//! The generator driver: suspendable iterator protocol over a frozen task.
//!
//! Calling a `function*` builds the body's [`TaskState`] without running
//! it. Each `next(v)` moves the task out of the heap, runs it until the
//! next `yield`/`return`/throw, and moves it back. The completion flag is a
//! latch: once a generator finishes (or throws), it stays finished and
//! every later `next` reports `{value: undefined, done: true}`.
//!
//! Async generators share the machinery: their `next` returns a Promise,
//! and an internal `await` parks the task with the async driver until the
//! awaited value settles, resuming toward the next `yield` afterwards.

use crate::{
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    interp::{Interpreter, ResumeInput, TaskFlow, TaskState, TaskTarget},
    value::Value,
};

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeneratorState {
    /// Parked at the start or at a `yield`; the frozen task is stored.
    Suspended,
    /// Currently executing (or parked on an internal `await`). Guards
    /// against reentrant resumption.
    Running,
    /// Finished. Latched: never cleared.
    Done,
}

/// A generator object: paused evaluator context plus state latch.
#[derive(Debug)]
pub(crate) struct JsGenerator {
    state: GeneratorState,
    is_async: bool,
    /// Set once the body has been entered; the value sent by the first
    /// `next` is dropped, later ones feed the pending `yield`.
    started: bool,
    /// The frozen continuation; `None` while running or after completion.
    task: Option<Box<TaskState>>,
}

impl JsGenerator {
    pub fn new(task: TaskState, is_async: bool) -> Self {
        Self {
            state: GeneratorState::Suspended,
            is_async,
            started: false,
            task: Some(Box::new(task)),
        }
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == GeneratorState::Done
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        if let Some(task) = &self.task {
            task.trace(out);
        }
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.task.as_ref().map_or(0, |t| t.estimate_size())
    }
}

/// Outcome of one generator resumption.
#[derive(Debug)]
pub(crate) struct GeneratorStep {
    pub value: Value,
    pub done: bool,
}

impl Interpreter {
    fn generator_mut(&mut self, id: HeapId) -> &mut JsGenerator {
        match self.heap.get_mut(id) {
            HeapData::Generator(g) => g,
            other => unreachable!("generator id holds {kind}", kind = other.type_name()),
        }
    }

    /// Core resumption for synchronous generators: `next`, `return`, and
    /// `throw` all funnel through here with the matching [`ResumeInput`].
    pub(crate) fn generator_resume(&mut self, id: HeapId, input: ResumeInput) -> RunResult<GeneratorStep> {
        let gen_ = self.generator_mut(id);
        match gen_.state {
            GeneratorState::Running => {
                return Err(RunError::type_error("Generator is already running"));
            }
            GeneratorState::Done => {
                // Completion is a latch; only the input kind matters now.
                return match input {
                    ResumeInput::Throw(reason) => Err(RunError::Throw(crate::error::Throwable::Value(reason))),
                    ResumeInput::ReturnInto(value) => Ok(GeneratorStep { value, done: true }),
                    _ => Ok(GeneratorStep {
                        value: Value::Undefined,
                        done: true,
                    }),
                };
            }
            GeneratorState::Suspended => {}
        }
        let mut task = gen_.task.take().expect("suspended generator lost its task");
        gen_.state = GeneratorState::Running;
        gen_.started = true;

        // `return()` before the first resume, or at a yield, unwinds the
        // body as if `return value` executed there (finally blocks run).
        match self.run_task(&mut task, input) {
            Ok(TaskFlow::Yield(value)) => {
                let gen_ = self.generator_mut(id);
                gen_.task = Some(task);
                gen_.state = GeneratorState::Suspended;
                Ok(GeneratorStep { value, done: false })
            }
            Ok(TaskFlow::Done(value)) => {
                self.generator_mut(id).state = GeneratorState::Done;
                task.dispose(&mut self.heap);
                Ok(GeneratorStep { value, done: true })
            }
            Ok(TaskFlow::Await(value)) => {
                // `await` only parses inside async bodies; a sync generator
                // can never produce it.
                value.drop_with_heap(&mut self.heap);
                task.dispose(&mut self.heap);
                self.generator_mut(id).state = GeneratorState::Done;
                Err(RunError::type_error("await is not valid in a synchronous generator"))
            }
            Err(err) => {
                self.generator_mut(id).state = GeneratorState::Done;
                task.dispose(&mut self.heap);
                Err(err)
            }
        }
    }

    /// `gen.next(value)`.
    pub(crate) fn generator_next(&mut self, id: HeapId, value: Value) -> RunResult<GeneratorStep> {
        let started = match self.heap.get(id) {
            HeapData::Generator(g) => g.started,
            other => unreachable!("generator id holds {kind}", kind = other.type_name()),
        };
        let input = if started {
            ResumeInput::Value(value)
        } else {
            // The body has not reached a yield yet; the sent value has
            // nothing to receive it.
            value.drop_with_heap(&mut self.heap);
            ResumeInput::Start
        };
        self.generator_resume(id, input)
    }

    /// `gen.return(value)`.
    pub(crate) fn generator_return(&mut self, id: HeapId, value: Value) -> RunResult<GeneratorStep> {
        self.generator_resume(id, ResumeInput::ReturnInto(value))
    }

    /// `gen.throw(error)`.
    pub(crate) fn generator_throw(&mut self, id: HeapId, error: Value) -> RunResult<GeneratorStep> {
        self.generator_resume(id, ResumeInput::Throw(error))
    }

    // ========================================================================
    // Async generators
    // ========================================================================

    /// One async-generator step: returns a promise of `{value, done}`.
    ///
    /// The body may `await` internally; the step's promise then settles
    /// only once the body reaches its next `yield` (or completes).
    pub(crate) fn async_generator_step(&mut self, id: HeapId, input: ResumeInput) -> RunResult<Value> {
        let promise = self.new_promise()?;
        let (state, started) = match self.heap.get(id) {
            HeapData::Generator(g) => (g.state, g.started),
            other => unreachable!("generator id holds {kind}", kind = other.type_name()),
        };
        match state {
            GeneratorState::Running => {
                let reason = self.make_error_value(
                    crate::error::ErrorKind::TypeError,
                    "Generator is already running",
                )?;
                self.reject_promise(promise, reason);
                Ok(Value::Ref(promise))
            }
            GeneratorState::Done => {
                if let ResumeInput::Throw(reason) = input {
                    self.reject_promise(promise, reason);
                } else {
                    let value = match input {
                        ResumeInput::ReturnInto(value) => value,
                        _ => Value::Undefined,
                    };
                    let result = self.make_iter_result(value, true)?;
                    self.resolve_promise(promise, result)?;
                }
                Ok(Value::Ref(promise))
            }
            GeneratorState::Suspended => {
                // The value sent by the first `next` has no yield to land
                // in; the body simply starts.
                let input = match input {
                    ResumeInput::Value(value) if !started => {
                        value.drop_with_heap(&mut self.heap);
                        ResumeInput::Start
                    }
                    other => other,
                };
                let task = {
                    let gen_ = self.generator_mut(id);
                    gen_.state = GeneratorState::Running;
                    gen_.started = true;
                    gen_.task.take().expect("suspended generator lost its task")
                };
                self.heap.inc_ref(promise);
                self.heap.inc_ref(id);
                self.drive_async(
                    *task,
                    TaskTarget::AsyncGenStep {
                        promise,
                        generator: id,
                    },
                    input,
                );
                Ok(Value::Ref(promise))
            }
        }
    }

    /// An async-generator body reached `yield`: park the task back in the
    /// generator and settle the step promise. Consumes the target's
    /// references.
    pub(crate) fn yield_async_generator(&mut self, generator: HeapId, promise: HeapId, task: TaskState, value: Value) {
        {
            let gen_ = self.generator_mut(generator);
            gen_.task = Some(Box::new(task));
            gen_.state = GeneratorState::Suspended;
        }
        match self.make_iter_result(value, false) {
            Ok(result) => {
                if let Err(err) = self.resolve_promise(promise, result) {
                    self.record_host_error(err);
                }
            }
            Err(err) => self.record_host_error(err),
        }
        self.heap.dec_ref(promise);
        self.heap.dec_ref(generator);
    }

    /// An async-generator body completed: latch done and settle the step
    /// promise with the final iterator result. Consumes the target's
    /// references and `value`.
    pub(crate) fn finish_async_generator(&mut self, generator: HeapId, promise: HeapId, value: Value, done: bool) {
        self.mark_generator_done(generator);
        match self.make_iter_result(value, done) {
            Ok(result) => {
                if let Err(err) = self.resolve_promise(promise, result) {
                    self.record_host_error(err);
                }
            }
            Err(err) => self.record_host_error(err),
        }
        self.heap.dec_ref(promise);
        self.heap.dec_ref(generator);
    }

    /// Latches a generator's completion flag.
    pub(crate) fn mark_generator_done(&mut self, generator: HeapId) {
        if let HeapData::Generator(gen_) = self.heap.get_mut(generator) {
            gen_.state = GeneratorState::Done;
            if let Some(task) = gen_.task.take() {
                task.dispose(&mut self.heap);
            }
        }
    }
}
