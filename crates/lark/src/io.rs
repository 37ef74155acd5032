//! Output sinks for `console.log`.
//!
//! The host chooses where console output goes by installing a
//! [`PrintWriter`]. The default writes to stdout; tests collect into a
//! string.

use std::fmt::Write;

/// Sink for script-produced console output.
pub trait PrintWriter: std::fmt::Debug {
    /// Emits one already-formatted line (no trailing newline included).
    fn print(&mut self, line: &str);
}

/// Writes lines to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print(&mut self, _line: &str) {}
}

/// Collects output into a string, one line per `print`.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    buffer: String,
}

impl CollectStringPrint {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected output so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.buffer
    }

    /// Takes the collected output, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

impl PrintWriter for CollectStringPrint {
    fn print(&mut self, line: &str) {
        let _ = writeln!(self.buffer, "{line}");
    }
}
