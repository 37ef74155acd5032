//! lark: an embeddable JavaScript (ES2020-family) interpreter core.
//!
//! The engine is a cooperatively-scheduled tree-walking evaluator with a
//! hybrid reference-counting + cycle-collecting garbage collector,
//! hidden-class property storage with per-site inline caches, a
//! Promise/microtask async driver, suspendable generators, and live-binding
//! ES modules. Parsing is delegated to the oxc parser; the built-in method
//! libraries, module file I/O, and everything network-shaped belong to the
//! host.
//!
//! # Example
//!
//! ```
//! use lark::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let result = interp.run("let x = 40 + 2; x;", "demo.js").unwrap();
//! assert_eq!(result.as_number(), Some(42.0));
//! ```

#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at the sites")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts mirror the language's integer ops")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors ToInt32")]
#![expect(clippy::must_use_candidate, reason = "builder-style APIs read better unannotated")]
#![expect(clippy::missing_panics_doc, reason = "internal invariant panics are documented inline")]
#![expect(clippy::return_self_not_must_use, reason = "with_* builders are always consumed")]

mod ast;
mod builtins;
mod env;
mod error;
mod function;
mod gc;
mod generator;
mod globals;
mod heap;
mod host;
mod intern;
mod interp;
mod io;
mod module;
mod nativefn;
mod object;
mod parse;
mod promise;
mod shape;
mod types;
mod value;

pub use crate::{
    env::BindingKind,
    error::{DEFAULT_MAX_CALL_DEPTH, Error, ErrorKind, FatalError, FatalKind, StackFrame},
    gc::{
        DEFAULT_GC_THRESHOLD, DEFAULT_HEAP_LIMIT, EXTENDED_HEAP_LIMIT, GcStats, default_heap_limit,
        system_memory,
    },
    heap::HeapStats,
    host::HostValue,
    intern::{INTERN_THRESHOLD, InternStats, SymbolId, intern, intern_stats, new_symbol, reset_intern_stats,
        symbol_description},
    interp::{Interpreter, Task},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    module::{Module, ModuleLoader, ModuleState},
    parse::Script,
    promise::PromiseState,
    shape::{MAX_CACHE_ENTRIES, ShapeId},
};
