//! The Regex heap kind.
//!
//! Stores the literal's pattern and flags and eagerly compiles through the
//! `regex` crate where the pattern is expressible there. The matching method
//! surface belongs to the external built-in library; the engine only needs
//! the value kind, its display form, and a validity check at construction.

use crate::error::{RunError, RunResult};

#[derive(Debug)]
pub(crate) struct JsRegex {
    source: Box<str>,
    flags: Box<str>,
    compiled: Option<regex::Regex>,
}

impl JsRegex {
    /// Builds a regex value, validating the flags.
    pub fn new(source: &str, flags: &str) -> RunResult<Self> {
        for flag in flags.chars() {
            if !matches!(flag, 'g' | 'i' | 'm' | 's' | 'u' | 'y' | 'd') {
                return Err(RunError::syntax_error(format!(
                    "Invalid regular expression flags: '{flags}'"
                )));
            }
        }
        let mut builder = regex::RegexBuilder::new(source);
        builder
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'));
        // Patterns using features the regex crate lacks (backreferences,
        // lookaround) still construct; they just carry no compiled form.
        let compiled = builder.build().ok();
        Ok(Self {
            source: source.into(),
            flags: flags.into(),
            compiled,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn flags(&self) -> &str {
        &self.flags
    }

    #[must_use]
    pub fn compiled(&self) -> Option<&regex::Regex> {
        self.compiled.as_ref()
    }

    pub fn estimate_size(&self) -> usize {
        self.source.len() + self.flags.len()
    }
}
