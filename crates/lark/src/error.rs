//! Error taxonomy, the internal throw channel, and stack-trace management.
//!
//! Script errors are values: inside the engine they travel as a
//! [`RunError::Throw`] carried through `Result`, unwinding evaluator frames
//! until a `try`/`catch` consumes them or they reach the host. Engine-raised
//! errors start life as a [`SimpleError`] (kind + message + frame snapshot)
//! and are only materialized as heap `Error` objects when script code can
//! observe them, so the hot path never allocates.
//!
//! Heap-limit and stack-overflow failures use the separate
//! [`RunError::Fatal`] channel which bypasses script `try`/`catch` entirely.

use std::fmt::{self, Write};

use strum::{Display, EnumString, IntoStaticStr};

use crate::{intern::Istr, value::Value};

/// Result alias for engine operations that can throw.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Built-in error constructors the engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
    URIError,
    EvalError,
}

/// One entry of a captured call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StackFrame {
    /// Function name, or `<anonymous>` / `<module>`.
    pub function: Istr,
    /// Source file the call site lives in.
    pub file: Istr,
    /// 1-indexed line of the call site.
    pub line: u32,
    /// 1-indexed column of the call site.
    pub column: u32,
}

impl StackFrame {
    pub(crate) fn new(function: Istr, file: Istr, line: u32, column: u32) -> Self {
        Self {
            function,
            file,
            line,
            column,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {function} ({file}:{line}:{column})",
            function = self.function,
            file = self.file,
            line = self.line,
            column = self.column
        )
    }
}

/// Call-stack manager.
///
/// Every function call pushes a frame on entry and pops on exit; the
/// evaluator's unwind paths pop through it as well, so the stack is accurate
/// at any throw point. Depth is capped: exceeding it is a fatal
/// stack-overflow, not a script-catchable error.
#[derive(Debug)]
pub(crate) struct CallStack {
    frames: Vec<StackFrame>,
    max_depth: usize,
}

/// Default maximum call depth before a stack-overflow error.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
        }
    }

    /// Pushes a frame, failing with a fatal overflow at the depth cap.
    pub fn push(&mut self, frame: StackFrame) -> RunResult<()> {
        if self.frames.len() >= self.max_depth {
            return Err(RunError::Fatal(FatalError::stack_overflow(self.max_depth)));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Snapshot of the current stack, innermost frame first.
    #[must_use]
    pub fn capture(&self) -> Vec<StackFrame> {
        let mut frames = self.frames.clone();
        frames.reverse();
        frames
    }
}

/// An engine-raised error that has not yet been materialized on the heap.
#[derive(Debug, Clone)]
pub(crate) struct SimpleError {
    pub kind: ErrorKind,
    pub message: String,
    /// Stack snapshot taken at raise time, innermost first. Empty until the
    /// evaluator attaches its stack.
    pub frames: Vec<StackFrame>,
}

impl SimpleError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            frames: Vec::new(),
        }
    }
}

/// A thrown error traveling through the evaluator.
#[derive(Debug)]
pub(crate) enum Throwable {
    /// Engine-raised, not yet on the heap.
    Simple(SimpleError),
    /// An arbitrary script value (`throw expr`). Owns one reference.
    Value(Value),
}

/// Non-catchable failure kinds that unwind straight to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FatalKind {
    /// The GC heap-limit ceiling was exceeded even after a collection.
    HeapLimitExceeded,
    /// The call stack exceeded its configured depth.
    StackOverflow,
}

/// A fatal error: reported to the host, never visible to script `catch`.
#[derive(Debug, Clone)]
pub struct FatalError {
    pub kind: FatalKind,
    pub message: String,
}

impl FatalError {
    pub(crate) fn heap_limit(current: usize, limit: usize, requested: usize) -> Self {
        Self {
            kind: FatalKind::HeapLimitExceeded,
            message: format!(
                "heap out of memory: {current} bytes in use, {requested} requested, limit {limit}"
            ),
        }
    }

    pub(crate) fn stack_overflow(limit: usize) -> Self {
        Self {
            kind: FatalKind::StackOverflow,
            message: format!("maximum call stack size exceeded (limit {limit})"),
        }
    }

    /// The error-name both fatal kinds surface under.
    #[must_use]
    pub fn error_name(&self) -> ErrorKind {
        ErrorKind::RangeError
    }
}

/// Engine-internal error channel.
#[derive(Debug)]
pub(crate) enum RunError {
    /// Script-visible throw; consumed by the nearest `try`/`catch`.
    Throw(Throwable),
    /// Unwinds to the host; the evaluator becomes quiescent.
    Fatal(FatalError),
}

impl RunError {
    pub fn simple(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Throw(Throwable::Simple(SimpleError::new(kind, message)))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::RangeError, message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::ReferenceError, message)
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::SyntaxError, message)
    }
}

impl From<FatalError> for RunError {
    fn from(err: FatalError) -> Self {
        Self::Fatal(err)
    }
}

/// Error type crossing the host boundary.
///
/// Carries the formatted name/message, the stack captured at throw time, and
/// whether the failure was fatal (uncatchable in script).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Error {
    /// Error-class name (`TypeError`, `RangeError`, ...). Arbitrary thrown
    /// values surface under `Error`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Captured stack, innermost frame first.
    pub frames: Vec<StackFrame>,
    /// True for heap-limit / stack-overflow failures.
    pub fatal: bool,
}

impl Error {
    pub(crate) fn new(name: impl Into<String>, message: impl Into<String>, frames: Vec<StackFrame>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            frames,
            fatal: false,
        }
    }

    pub(crate) fn from_simple(err: &SimpleError) -> Self {
        Self::new(<&'static str>::from(err.kind), err.message.clone(), err.frames.clone())
    }

    pub(crate) fn from_fatal(err: &FatalError, frames: Vec<StackFrame>) -> Self {
        Self {
            name: <&'static str>::from(err.error_name()).to_owned(),
            message: err.message.clone(),
            frames,
            fatal: true,
        }
    }

    /// Renders `Name: message` followed by one `at ...` line per frame.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{name}", name = self.name);
        if !self.message.is_empty() {
            let _ = write!(out, ": {message}", message = self.message);
        }
        for frame in &self.frames {
            let _ = write!(out, "\n  {frame}");
        }
        out
    }

    /// Renders [`Self::format`] plus a source-context window around the
    /// innermost frame, when the host supplies the source text.
    #[must_use]
    pub fn format_with_source(&self, source: &str) -> String {
        let mut out = self.format();
        if let Some(frame) = self.frames.first()
            && let Some(window) = source_context(source, frame.line, frame.column)
        {
            out.push_str("\n\n");
            out.push_str(&window);
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl std::error::Error for Error {}

/// Number of context lines shown before and after the error line.
const CONTEXT_LINES: u32 = 2;

/// Builds the `>`-marked context window with a caret under the error column.
fn source_context(source: &str, line: u32, column: u32) -> Option<String> {
    if line == 0 {
        return None;
    }
    let lines: Vec<&str> = source.lines().collect();
    let total = u32::try_from(lines.len()).ok()?;
    if line > total {
        return None;
    }
    let first = line.saturating_sub(CONTEXT_LINES).max(1);
    let last = (line + CONTEXT_LINES).min(total);
    let width = last.to_string().len();

    let mut out = String::new();
    for num in first..=last {
        let text = lines[(num - 1) as usize];
        let marker = if num == line { ">" } else { " " };
        let _ = writeln!(out, "{marker} {num:>width$} | {text}");
        if num == line && column > 0 {
            let pad = " ".repeat((column - 1) as usize);
            let _ = writeln!(out, "  {blank:>width$} | {pad}^", blank = "");
        }
    }
    // Drop the trailing newline for clean embedding.
    out.pop();
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn error_kind_round_trips_through_strum() {
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!("RangeError".parse::<ErrorKind>().unwrap(), ErrorKind::RangeError);
    }

    #[test]
    fn format_lists_frames_innermost_first() {
        let file = intern("script.js");
        let err = Error::new(
            "ReferenceError",
            "undef is not defined",
            vec![
                StackFrame::new(intern("inner"), file, 3, 10),
                StackFrame::new(intern("outer"), file, 1, 1),
            ],
        );
        let text = err.format();
        assert!(text.starts_with("ReferenceError: undef is not defined"));
        let inner_pos = text.find("at inner").expect("inner frame missing");
        let outer_pos = text.find("at outer").expect("outer frame missing");
        assert!(inner_pos < outer_pos, "frames must render innermost first");
    }

    #[test]
    fn source_context_marks_the_error_line() {
        let source = "let a = 1;\nlet b = c;\nlet d = 3;";
        let window = source_context(source, 2, 9).expect("context window");
        assert!(window.contains("> 2 | let b = c;"));
        assert!(window.contains('^'));
        assert!(window.contains("  1 | let a = 1;"));
    }

    #[test]
    fn call_stack_depth_is_capped() {
        let file = intern("t.js");
        let mut stack = CallStack::new(2);
        stack.push(StackFrame::new(intern("a"), file, 1, 1)).unwrap();
        stack.push(StackFrame::new(intern("b"), file, 2, 1)).unwrap();
        let err = stack.push(StackFrame::new(intern("c"), file, 3, 1));
        assert!(matches!(
            err,
            Err(RunError::Fatal(FatalError {
                kind: FatalKind::StackOverflow,
                ..
            }))
        ));
    }
}
