//! The async driver: Promise state machine, reactions, and the microtask
//! queue.
//!
//! A promise settles exactly once; `Pending -> Fulfilled | Rejected` is
//! one-way. Settling never runs script synchronously: each attached reaction
//! becomes a microtask, and the host drains the queue between turns via
//! [`crate::interp::Interpreter::drain_microtasks`]. Reactions added during
//! a drain run in the same drain.
//!
//! `await` suspends its task and attaches a resume reaction pair to the
//! awaited promise; the microtask that fires later re-enters the parked
//! task machine with the settled value (or rethrows the rejection reason
//! inside it).

use crate::{
    error::{RunError, RunResult, Throwable},
    heap::{HeapData, HeapId},
    interp::{Interpreter, TaskId},
    value::Value,
};

/// Observable promise state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// What to run when a promise settles.
#[derive(Debug)]
pub(crate) enum Handler {
    /// Pass the value through to the capability.
    Identity,
    /// Reject the capability with the value.
    Thrower,
    /// Invoke a callable with the settled value.
    Call(Value),
    /// Resume a parked async task with the settled value.
    Resume(TaskId),
    /// Resume a parked async task by throwing the settled value into it.
    ResumeThrow(TaskId),
}

impl Handler {
    fn trace(&self, out: &mut Vec<HeapId>) {
        if let Self::Call(value) = self
            && let Some(id) = value.ref_id()
        {
            out.push(id);
        }
    }
}

/// A fulfillment/rejection continuation pair attached to a promise.
#[derive(Debug)]
pub(crate) struct Reaction {
    pub on_fulfilled: Handler,
    pub on_rejected: Handler,
    /// Derived promise settled with the handler's outcome.
    pub capability: Option<HeapId>,
}

impl Reaction {
    fn trace(&self, out: &mut Vec<HeapId>) {
        self.on_fulfilled.trace(out);
        self.on_rejected.trace(out);
        out.extend(self.capability);
    }
}

/// Promise heap data.
#[derive(Debug)]
pub(crate) struct JsPromise {
    state: PromiseState,
    /// The settled value (fulfillment value or rejection reason);
    /// `undefined` while pending.
    value: Value,
    reactions: Vec<Reaction>,
    /// Whether any reaction was ever attached; drives unhandled-rejection
    /// reporting.
    handled: bool,
}

impl JsPromise {
    pub fn new() -> Self {
        Self {
            state: PromiseState::Pending,
            value: Value::Undefined,
            reactions: Vec::new(),
            handled: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> PromiseState {
        self.state
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state != PromiseState::Pending
    }

    #[must_use]
    pub fn result(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        if let Some(id) = self.value.ref_id() {
            out.push(id);
        }
        for reaction in &self.reactions {
            reaction.trace(out);
        }
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.reactions.len() * std::mem::size_of::<Reaction>()
    }
}

/// One queued microtask.
#[derive(Debug)]
pub(crate) enum Microtask {
    /// A promise reaction with its settled argument.
    Reaction {
        handler: Handler,
        argument: Value,
        capability: Option<HeapId>,
        rejected: bool,
    },
    /// A `queueMicrotask` callback.
    Callback(Value),
}

impl Interpreter {
    /// Allocates a fresh pending promise.
    pub(crate) fn new_promise(&mut self) -> RunResult<HeapId> {
        Ok(self.alloc(HeapData::Promise(JsPromise::new()))?)
    }

    fn promise_mut(&mut self, id: HeapId) -> &mut JsPromise {
        match self.heap.get_mut(id) {
            HeapData::Promise(p) => p,
            other => unreachable!("promise id holds {kind}", kind = other.type_name()),
        }
    }

    pub(crate) fn promise(&self, id: HeapId) -> &JsPromise {
        match self.heap.get(id) {
            HeapData::Promise(p) => p,
            other => unreachable!("promise id holds {kind}", kind = other.type_name()),
        }
    }

    /// Resolves `promise` with `value`, adopting the state of `value` when
    /// it is itself a promise. Consumes `value`.
    ///
    /// Adoption is an ordinary reaction, so a promise resolved with itself
    /// (or any resolution cycle) simply stays pending forever.
    pub(crate) fn resolve_promise(&mut self, promise: HeapId, value: Value) -> RunResult<()> {
        if self.promise(promise).is_settled() {
            value.drop_with_heap(&mut self.heap);
            return Ok(());
        }
        if let Value::Ref(inner) = &value
            && matches!(self.heap.get(*inner), HeapData::Promise(_))
        {
            let inner = *inner;
            self.heap.inc_ref(promise);
            self.attach_reaction(
                inner,
                Reaction {
                    on_fulfilled: Handler::Identity,
                    on_rejected: Handler::Thrower,
                    capability: Some(promise),
                },
            );
            value.drop_with_heap(&mut self.heap);
            return Ok(());
        }
        self.fulfill_promise(promise, value);
        Ok(())
    }

    /// Fulfills `promise` with a plain value. Consumes `value`.
    pub(crate) fn fulfill_promise(&mut self, promise: HeapId, value: Value) {
        {
            let p = self.promise_mut(promise);
            if p.is_settled() {
                value.drop_with_heap(&mut self.heap);
                return;
            }
            p.state = PromiseState::Fulfilled;
            p.value = value;
        }
        self.flush_reactions(promise);
    }

    /// Rejects `promise` with `reason`. Consumes `reason`.
    pub(crate) fn reject_promise(&mut self, promise: HeapId, reason: Value) {
        {
            let p = self.promise_mut(promise);
            if p.is_settled() {
                reason.drop_with_heap(&mut self.heap);
                return;
            }
            p.state = PromiseState::Rejected;
            p.value = reason;
        }
        self.flush_reactions(promise);
        // Rejected with nothing attached: a candidate for the
        // unhandled-rejection report at drain end. Keep it alive until then.
        if !self.promise(promise).is_handled() {
            self.heap.inc_ref(promise);
            self.maybe_unhandled.push(promise);
        }
    }

    /// Attaches a reaction, enqueuing it immediately when already settled.
    /// Reactions run in attachment order within a single settle.
    pub(crate) fn attach_reaction(&mut self, promise: HeapId, reaction: Reaction) {
        let state = {
            let p = self.promise_mut(promise);
            p.handled = true;
            match p.state {
                PromiseState::Pending => {
                    p.reactions.push(reaction);
                    return;
                }
                state => state,
            }
        };
        let argument = self.promise(promise).value.clone_with_heap(&self.heap);
        let rejected = state == PromiseState::Rejected;
        let Reaction {
            on_fulfilled,
            on_rejected,
            capability,
        } = reaction;
        let (handler, unused) = if rejected {
            (on_rejected, on_fulfilled)
        } else {
            (on_fulfilled, on_rejected)
        };
        self.discard_handler(unused);
        self.microtasks.push_back(Microtask::Reaction {
            handler,
            argument,
            capability,
            rejected,
        });
    }

    /// Moves a settled promise's queued reactions onto the microtask queue,
    /// in attachment order.
    fn flush_reactions(&mut self, promise: HeapId) {
        let (state, reactions) = {
            let p = self.promise_mut(promise);
            let reactions = std::mem::take(&mut p.reactions);
            (p.state, reactions)
        };
        let rejected = state == PromiseState::Rejected;
        for reaction in reactions {
            let argument = self.promise(promise).result().clone_with_heap(&self.heap);
            let Reaction {
                on_fulfilled,
                on_rejected,
                capability,
            } = reaction;
            let (handler, unused) = if rejected {
                (on_rejected, on_fulfilled)
            } else {
                (on_fulfilled, on_rejected)
            };
            self.discard_handler(unused);
            self.microtasks.push_back(Microtask::Reaction {
                handler,
                argument,
                capability,
                rejected,
            });
        }
    }

    fn discard_handler(&mut self, handler: Handler) {
        if let Handler::Call(value) = handler {
            value.drop_with_heap(&mut self.heap);
        }
    }

    /// `.then(onFulfilled, onRejected)`: derives a new promise. The handler
    /// values are consumed.
    pub(crate) fn promise_then(
        &mut self,
        promise: HeapId,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
    ) -> RunResult<HeapId> {
        let derived = self.new_promise()?;
        self.heap.inc_ref(derived);
        let fulfilled = match on_fulfilled {
            Some(f) if f.is_callable(&self.heap) => Handler::Call(f),
            Some(other) => {
                other.drop_with_heap(&mut self.heap);
                Handler::Identity
            }
            None => Handler::Identity,
        };
        let rejected = match on_rejected {
            Some(f) if f.is_callable(&self.heap) => Handler::Call(f),
            Some(other) => {
                other.drop_with_heap(&mut self.heap);
                Handler::Thrower
            }
            None => Handler::Thrower,
        };
        self.attach_reaction(
            promise,
            Reaction {
                on_fulfilled: fulfilled,
                on_rejected: rejected,
                capability: Some(derived),
            },
        );
        Ok(derived)
    }

    /// `await` suspension protocol: wrap `value` in a promise if needed and
    /// attach the task-resume reaction pair. Consumes `value`.
    pub(crate) fn await_value(&mut self, task: TaskId, value: Value) -> RunResult<()> {
        let awaited = if let Value::Ref(id) = &value
            && matches!(self.heap.get(*id), HeapData::Promise(_))
        {
            let id = *id;
            self.heap.inc_ref(id);
            value.drop_with_heap(&mut self.heap);
            id
        } else {
            let p = self.new_promise()?;
            self.resolve_promise(p, value)?;
            p
        };
        self.attach_reaction(
            awaited,
            Reaction {
                on_fulfilled: Handler::Resume(task),
                on_rejected: Handler::ResumeThrow(task),
                capability: None,
            },
        );
        self.heap.dec_ref(awaited);
        Ok(())
    }

    /// Enqueues a `queueMicrotask` callback. Consumes `callback`.
    pub(crate) fn enqueue_microtask_callback(&mut self, callback: Value) {
        self.microtasks.push_back(Microtask::Callback(callback));
    }

    /// Drains the microtask queue to empty, including tasks enqueued while
    /// draining, then reports unhandled rejections.
    pub fn drain_microtasks(&mut self) {
        while let Some(task) = self.microtasks.pop_front() {
            self.run_microtask(task);
        }
        self.report_unhandled_rejections();
    }

    fn run_microtask(&mut self, task: Microtask) {
        match task {
            Microtask::Callback(callback) => {
                match self.call_value_sync(callback, Value::Undefined, Vec::new()) {
                    Ok(result) => result.drop_with_heap(&mut self.heap),
                    Err(err) => self.record_host_error(err),
                }
            }
            Microtask::Reaction {
                handler,
                argument,
                capability,
                rejected,
            } => {
                match handler {
                    Handler::Identity => {
                        if let Some(cap) = capability {
                            if rejected {
                                self.reject_promise(cap, argument);
                            } else if let Err(err) = self.resolve_promise(cap, argument) {
                                self.record_host_error(err);
                            }
                            self.heap.dec_ref(cap);
                        } else {
                            argument.drop_with_heap(&mut self.heap);
                        }
                        return;
                    }
                    Handler::Thrower => {
                        if let Some(cap) = capability {
                            self.reject_promise(cap, argument);
                            self.heap.dec_ref(cap);
                        } else {
                            argument.drop_with_heap(&mut self.heap);
                        }
                        return;
                    }
                    Handler::Resume(task_id) => {
                        debug_assert!(capability.is_none(), "await reactions carry no capability");
                        self.resume_async_task(task_id, argument, false);
                        return;
                    }
                    Handler::ResumeThrow(task_id) => {
                        debug_assert!(capability.is_none(), "await reactions carry no capability");
                        self.resume_async_task(task_id, argument, true);
                        return;
                    }
                    Handler::Call(callable) => {
                        let outcome = self.call_value_sync(callable, Value::Undefined, vec![argument]);
                        match (outcome, capability) {
                            (Ok(result), Some(cap)) => {
                                if let Err(err) = self.resolve_promise(cap, result) {
                                    self.record_host_error(err);
                                }
                                self.heap.dec_ref(cap);
                            }
                            (Ok(result), None) => result.drop_with_heap(&mut self.heap),
                            (Err(RunError::Throw(thrown)), Some(cap)) => {
                                match self.throwable_to_value(thrown) {
                                    Ok(reason) => self.reject_promise(cap, reason),
                                    Err(err) => self.record_host_error(err),
                                }
                                self.heap.dec_ref(cap);
                            }
                            (Err(err), cap) => {
                                if let Some(cap) = cap {
                                    self.heap.dec_ref(cap);
                                }
                                self.record_host_error(err);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Fires the host's unhandled-rejection callback for every promise that
    /// is still rejected-and-unobserved at drain end.
    fn report_unhandled_rejections(&mut self) {
        let candidates = std::mem::take(&mut self.maybe_unhandled);
        for promise in candidates {
            let report = match self.heap.get_if_live(promise) {
                Some(HeapData::Promise(p)) if p.state() == PromiseState::Rejected && !p.is_handled() => {
                    Some(p.result().to_display_string(&self.heap, &self.shapes))
                }
                _ => None,
            };
            if let Some(reason) = report
                && let Some(callback) = self.on_unhandled_rejection.as_mut()
            {
                callback(reason);
            }
            self.heap.dec_ref(promise);
        }
    }
}

/// Rejection reason formatting needs a materialized value; re-exported here
/// so the driver can turn an engine throw into one.
impl Interpreter {
    pub(crate) fn throwable_to_value(&mut self, thrown: Throwable) -> RunResult<Value> {
        match thrown {
            Throwable::Value(value) => Ok(value),
            Throwable::Simple(simple) => self.materialize_error(simple),
        }
    }
}
