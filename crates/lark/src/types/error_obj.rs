//! Error heap objects.
//!
//! A thrown `Error` snapshots the call stack at throw time. `name`,
//! `message`, and `stack` read as properties through the member protocol;
//! any other property script code sets lands in the overflow map.

use std::fmt::Write;

use indexmap::IndexMap;

use crate::{
    error::StackFrame,
    heap::HeapId,
    intern::Istr,
    value::Value,
};

#[derive(Debug)]
pub(crate) struct JsError {
    /// Error-class name: one of the built-in kinds, or whatever `name` a
    /// subclass carries.
    name: Istr,
    message: String,
    /// Stack captured at throw (or construction) time, innermost first.
    frames: Vec<StackFrame>,
    /// `cause` option, when provided.
    cause: Option<Value>,
    /// Script-assigned extra properties.
    extra: IndexMap<Istr, Value>,
}

impl JsError {
    pub fn new(name: Istr, message: String) -> Self {
        Self {
            name,
            message,
            frames: Vec::new(),
            cause: None,
            extra: IndexMap::new(),
        }
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Attaches the stack snapshot captured at throw time.
    pub fn set_frames(&mut self, frames: Vec<StackFrame>) {
        self.frames = frames;
    }

    #[must_use]
    pub fn name(&self) -> Istr {
        self.name
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Value> {
        self.cause.as_ref()
    }

    #[must_use]
    pub fn extra(&self) -> &IndexMap<Istr, Value> {
        &self.extra
    }

    /// Stores a script-assigned property; returns the displaced value.
    pub fn set_extra(&mut self, name: Istr, value: Value) -> Option<Value> {
        self.extra.insert(name, value)
    }

    /// Removes a script-assigned property; returns the removed value.
    pub fn extra_remove(&mut self, name: Istr) -> Option<Value> {
        self.extra.shift_remove(&name)
    }

    /// `Name: message` (or just `Name` when the message is empty).
    #[must_use]
    pub fn header(&self) -> String {
        if self.message.is_empty() {
            self.name.to_string()
        } else {
            format!("{name}: {message}", name = self.name, message = self.message)
        }
    }

    /// The `stack` property text: header plus one `at` line per frame.
    #[must_use]
    pub fn stack_string(&self) -> String {
        let mut out = self.header();
        for frame in &self.frames {
            let _ = write!(out, "\n  {frame}");
        }
        out
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        if let Some(cause) = &self.cause
            && let Some(id) = cause.ref_id()
        {
            out.push(id);
        }
        for value in self.extra.values() {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    /// Consumes the error, handing its owned values to the caller.
    pub fn into_values(self) -> Vec<Value> {
        self.cause.into_iter().chain(self.extra.into_values()).collect()
    }

    pub fn estimate_size(&self) -> usize {
        self.message.len() + self.frames.len() * std::mem::size_of::<StackFrame>()
    }
}
