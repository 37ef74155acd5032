//! Built-in constructor values.
//!
//! Engine-level constructors (`Promise`, the Error classes, the
//! collections, `Symbol`, the typed arrays) are immediates: a copyable
//! enum variant on `Value` rather than heap objects. Their properties and
//! call/construct behavior are dispatched by matching, which keeps them
//! allocation-free and lets error messages name them precisely.

use strum::IntoStaticStr;

use crate::{error::ErrorKind, types::ElementKind};

/// A built-in constructor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub(crate) enum Builtin {
    Promise,
    /// One of the error classes (`Error`, `TypeError`, ...).
    #[strum(serialize = "Error")]
    Error(ErrorKind),
    Map,
    Set,
    WeakMap,
    WeakSet,
    Symbol,
    /// A typed-array constructor.
    #[strum(serialize = "TypedArray")]
    TypedArray(ElementKind),
}

impl Builtin {
    /// The constructor's `name`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Error(kind) => kind.into(),
            Self::TypedArray(kind) => kind.type_name(),
            other => other.into(),
        }
    }
}
