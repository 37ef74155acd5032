//! Primary value type representing JavaScript values at runtime.
//!
//! The enum uses a hybrid design: primitives and short interned strings are
//! stored inline, while heap-allocated data (long strings, BigInts, objects,
//! arrays, functions, promises, generators, ...) is stored in the arena and
//! referenced via `Ref(HeapId)`.
//!
//! NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` so the
//! reference count on heap values stays correct, and release owned values
//! with `drop_with_heap()`. Direct cloning would bypass reference counting
//! and leak.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Zero};

use crate::{
    builtins::Builtin,
    error::{RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{self, INTERN_THRESHOLD, Istr, SymbolId, intern_unbounded, symbol_description},
    module::ModuleId,
    nativefn::NativeId,
    promise::PromiseState,
    shape::Shapes,
};

/// A JavaScript value.
#[derive(Debug, Default)]
pub(crate) enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    /// IEEE-754 double; the only Number representation.
    Number(f64),
    /// A short string, deduplicated in the global intern table.
    Str(Istr),
    /// A symbol: pure identity plus an optional description held in the
    /// process-wide registry.
    Symbol(SymbolId),
    /// Late-bound view into another module's export slot. Resolved against
    /// the exporting module's environment on every read.
    ModuleBinding(ModuleId, Istr),
    /// A host-provided native callable, indexed into the interpreter's
    /// native-function registry.
    Native(NativeId),
    /// An engine built-in constructor (`Promise`, `TypeError`, `Map`, ...).
    Builtin(Builtin),
    /// Heap-allocated data (stored in the arena).
    Ref(HeapId),
}

impl Value {
    /// Wraps a string, interning short content and heap-allocating the rest.
    pub fn of_string(s: &str, heap: &mut Heap) -> RunResult<Self> {
        if s.len() <= INTERN_THRESHOLD {
            Ok(Self::Str(intern::intern(s)))
        } else {
            let id = heap.allocate(HeapData::String(s.into()))?;
            Ok(Self::Ref(id))
        }
    }

    /// Wraps an owned string without re-copying long content.
    pub fn of_owned_string(s: String, heap: &mut Heap) -> RunResult<Self> {
        if s.len() <= INTERN_THRESHOLD {
            Ok(Self::Str(intern::intern(&s)))
        } else {
            let id = heap.allocate(HeapData::String(s.into_boxed_str()))?;
            Ok(Self::Ref(id))
        }
    }

    /// Wraps a BigInt on the heap.
    pub fn of_bigint(value: BigInt, heap: &mut Heap) -> RunResult<Self> {
        let id = heap.allocate(HeapData::BigInt(value))?;
        Ok(Self::Ref(id))
    }

    /// Clones the value, incrementing the reference count of heap values.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(*id);
        }
        self.shallow_copy()
    }

    /// Releases the value, decrementing the reference count of heap values.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Bit-copies the enum without touching reference counts.
    ///
    /// Only for use where ownership is transferred or the copy is balanced by
    /// a manual `inc_ref`.
    #[must_use]
    pub(crate) fn shallow_copy(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Number(n) => Self::Number(*n),
            Self::Str(s) => Self::Str(*s),
            Self::Symbol(s) => Self::Symbol(*s),
            Self::ModuleBinding(m, n) => Self::ModuleBinding(*m, *n),
            Self::Native(n) => Self::Native(*n),
            Self::Builtin(b) => Self::Builtin(*b),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// The heap id behind a `Ref`, if any.
    #[inline]
    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    // ========================================================================
    // Kind predicates
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[inline]
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn is_string(&self, heap: &Heap) -> bool {
        match self {
            Self::Str(_) => true,
            Self::Ref(id) => matches!(heap.get(*id), HeapData::String(_)),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_bigint(&self, heap: &Heap) -> bool {
        matches!(self, Self::Ref(id) if matches!(heap.get(*id), HeapData::BigInt(_)))
    }

    #[must_use]
    pub fn is_callable(&self, heap: &Heap) -> bool {
        match self {
            Self::Native(_) | Self::Builtin(_) => true,
            Self::Ref(id) => matches!(heap.get(*id), HeapData::Function(_) | HeapData::BoundNative(_)),
            _ => false,
        }
    }

    /// True for values `typeof` reports as `"object"` (excluding `null`).
    #[must_use]
    pub fn is_object_like(&self, heap: &Heap) -> bool {
        match self {
            Self::Ref(id) => !matches!(
                heap.get(*id),
                HeapData::String(_) | HeapData::BigInt(_) | HeapData::Function(_) | HeapData::BoundNative(_)
            ),
            _ => false,
        }
    }

    /// Borrows the text of a string value.
    #[must_use]
    pub fn as_str<'a>(&'a self, heap: &'a Heap) -> Option<&'a str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::String(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Borrows the BigInt behind a bigint value.
    #[must_use]
    pub fn as_bigint<'a>(&self, heap: &'a Heap) -> Option<&'a BigInt> {
        match self {
            Self::Ref(id) => match heap.get(*id) {
                HeapData::BigInt(b) => Some(b),
                _ => None,
            },
            _ => None,
        }
    }

    // ========================================================================
    // Coercions
    // ========================================================================

    /// `ToBoolean`: `undefined | null | false | 0 | NaN | "" | 0n` are falsy.
    #[must_use]
    pub fn to_boolean(&self, heap: &Heap) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Symbol(_) | Self::Native(_) | Self::Builtin(_) => true,
            Self::ModuleBinding(..) => true,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::String(s) => !s.is_empty(),
                HeapData::BigInt(b) => !b.is_zero(),
                _ => true,
            },
        }
    }

    /// `ToNumber`; BigInt operands are rejected with a TypeError.
    pub fn to_number(&self, heap: &Heap) -> RunResult<f64> {
        match self {
            Self::Undefined => Ok(f64::NAN),
            Self::Null => Ok(0.0),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Ok(*n),
            Self::Str(s) => Ok(string_to_number(s.as_str())),
            Self::Symbol(_) => Err(RunError::type_error("Cannot convert a Symbol value to a number")),
            Self::Native(_) | Self::Builtin(_) | Self::ModuleBinding(..) => Ok(f64::NAN),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::String(s) => Ok(string_to_number(s)),
                HeapData::BigInt(_) => Err(RunError::type_error("Cannot convert a BigInt value to a number")),
                HeapData::Array(arr) if arr.elements().is_empty() => Ok(0.0),
                _ => Ok(f64::NAN),
            },
        }
    }

    /// `ToBigInt`: from BigInt, bool, integral double, or parseable string.
    pub fn to_bigint_value(&self, heap: &Heap) -> RunResult<BigInt> {
        match self {
            Self::Bool(b) => Ok(BigInt::from(i32::from(*b))),
            Self::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 {
                    BigInt::from_f64(*n).ok_or_else(|| RunError::range_error("number cannot be converted to BigInt"))
                } else {
                    Err(RunError::range_error(format!(
                        "the number {n} cannot be converted to a BigInt because it is not an integer",
                        n = number_to_string(*n)
                    )))
                }
            }
            Self::Str(s) => parse_bigint(s.as_str()),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::BigInt(b) => Ok(b.clone()),
                HeapData::String(s) => parse_bigint(s),
                _ => Err(RunError::type_error("Cannot convert value to a BigInt")),
            },
            _ => Err(RunError::type_error("Cannot convert value to a BigInt")),
        }
    }

    /// `ToString` for primitives and default object renderings.
    ///
    /// User `toString`/`valueOf` methods are invoked by the evaluator's
    /// to-primitive step before this is reached; here objects render their
    /// default forms.
    pub fn to_js_string(&self, heap: &Heap) -> RunResult<String> {
        match self {
            Self::Undefined => Ok("undefined".to_owned()),
            Self::Null => Ok("null".to_owned()),
            Self::Bool(b) => Ok(b.to_string()),
            Self::Number(n) => Ok(number_to_string(*n)),
            Self::Str(s) => Ok(s.as_str().to_owned()),
            Self::Symbol(_) => Err(RunError::type_error("Cannot convert a Symbol value to a string")),
            Self::Native(_) => Ok("function () { [native code] }".to_owned()),
            Self::Builtin(b) => Ok(format!("function {name}() {{ [native code] }}", name = b.name())),
            Self::ModuleBinding(..) => Ok("undefined".to_owned()),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::String(s) => Ok(s.to_string()),
                // BigInt's ToString has no `n` suffix; only display adds it.
                HeapData::BigInt(b) => Ok(b.to_string()),
                HeapData::Array(arr) => {
                    let mut parts = Vec::with_capacity(arr.elements().len());
                    for element in arr.elements() {
                        if element.is_nullish() {
                            parts.push(String::new());
                        } else {
                            parts.push(element.to_js_string(heap)?);
                        }
                    }
                    Ok(parts.join(","))
                }
                HeapData::Function(f) => Ok(format!("function {name}() {{ ... }}", name = f.name())),
                HeapData::BoundNative(_) => Ok("function () { [native code] }".to_owned()),
                HeapData::Error(e) => Ok(e.header()),
                _ => Ok("[object Object]".to_owned()),
            },
        }
    }

    /// Display form used by `console.log` and the host: strings unquoted at
    /// top level, BigInts with a trailing `n`, containers rendered inline.
    #[must_use]
    pub fn to_display_string(&self, heap: &Heap, shapes: &Shapes) -> String {
        match self {
            Self::Str(s) => s.as_str().to_owned(),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::String(s) => s.to_string(),
                _ => {
                    let mut seen = Vec::new();
                    display_value(self, heap, shapes, &mut seen)
                }
            },
            _ => {
                let mut seen = Vec::new();
                display_value(self, heap, shapes, &mut seen)
            }
        }
    }

    // ========================================================================
    // Equality & typeof
    // ========================================================================

    /// `===`: no coercion. `NaN !== NaN`, `-0 === +0`; heap handles compare
    /// by identity except strings and BigInts, which compare by content.
    #[must_use]
    pub fn strict_equals(&self, other: &Self, heap: &Heap) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Native(a), Self::Native(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Str(a), Self::Ref(id)) | (Self::Ref(id), Self::Str(a)) => match heap.get(*id) {
                HeapData::String(s) => a.as_str() == &**s,
                _ => false,
            },
            (Self::Ref(a), Self::Ref(b)) => {
                if a == b {
                    return true;
                }
                match (heap.get(*a), heap.get(*b)) {
                    (HeapData::String(x), HeapData::String(y)) => x == y,
                    (HeapData::BigInt(x), HeapData::BigInt(y)) => x == y,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// `typeof`, per the ES table. `null` reports `"object"`.
    #[must_use]
    pub fn type_of(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Native(_) | Self::Builtin(_) => "function",
            Self::ModuleBinding(..) => "undefined",
            Self::Ref(id) => match heap.get(*id) {
                HeapData::String(_) => "string",
                HeapData::BigInt(_) => "bigint",
                HeapData::Function(_) | HeapData::BoundNative(_) => "function",
                _ => "object",
            },
        }
    }

    /// Canonical property key for this value (`obj[expr]` paths).
    pub fn to_property_key(&self, heap: &Heap) -> RunResult<crate::object::PropKey> {
        match self {
            Self::Symbol(s) => Ok(crate::object::PropKey::Sym(*s)),
            _ => {
                let s = self.to_js_string(heap)?;
                Ok(crate::object::PropKey::Str(intern_unbounded(&s)))
            }
        }
    }
}

// ============================================================================
// Number & BigInt text conversions
// ============================================================================

/// ECMAScript `Number::toString` (shortest round-trip form).
#[must_use]
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
    } else {
        let mut buffer = ryu_js::Buffer::new();
        buffer.format_finite(n).to_owned()
    }
}

/// ECMAScript `ToNumber` applied to a string.
#[must_use]
pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c: char| c.is_whitespace());
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(rest) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u128::from_str_radix(rest, 16).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(rest) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        return u128::from_str_radix(rest, 8).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(rest) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        return u128::from_str_radix(rest, 2).map_or(f64::NAN, |v| v as f64);
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `StringToBigInt`, honoring the `0x`/`0o`/`0b` prefixes.
fn parse_bigint(s: &str) -> RunResult<BigInt> {
    let trimmed = s.trim_matches(|c: char| c.is_whitespace());
    if trimmed.is_empty() {
        return Ok(BigInt::zero());
    }
    let parsed = if let Some(rest) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        BigInt::parse_bytes(rest.as_bytes(), 16)
    } else if let Some(rest) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        BigInt::parse_bytes(rest.as_bytes(), 8)
    } else if let Some(rest) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        BigInt::parse_bytes(rest.as_bytes(), 2)
    } else {
        BigInt::parse_bytes(trimmed.as_bytes(), 10)
    };
    parsed.ok_or_else(|| RunError::syntax_error(format!("Cannot convert {trimmed} to a BigInt")))
}

/// Converts an f64 index candidate to a usize array index, if it is one.
#[must_use]
pub(crate) fn array_index(n: f64) -> Option<usize> {
    if n.fract() == 0.0 && n >= 0.0 && n < 2f64.powi(53) {
        Some(n as usize)
    } else {
        None
    }
}

// ============================================================================
// Display rendering
// ============================================================================

/// Depth-limited, cycle-guarded display rendering.
fn display_value(value: &Value, heap: &Heap, shapes: &Shapes, seen: &mut Vec<HeapId>) -> String {
    match value {
        Value::Undefined => "undefined".to_owned(),
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::Str(s) => format!("'{s}'"),
        Value::Symbol(sym) => match symbol_description(*sym) {
            Some(desc) => format!("Symbol({desc})"),
            None => "Symbol()".to_owned(),
        },
        Value::ModuleBinding(..) => "undefined".to_owned(),
        Value::Native(_) => "[Function (native)]".to_owned(),
        Value::Builtin(b) => format!("[Function: {name}]", name = b.name()),
        Value::Ref(id) => {
            if seen.contains(id) {
                return "[Circular]".to_owned();
            }
            seen.push(*id);
            let rendered = display_heap(*id, heap, shapes, seen);
            seen.pop();
            rendered
        }
    }
}

fn display_heap(id: HeapId, heap: &Heap, shapes: &Shapes, seen: &mut Vec<HeapId>) -> String {
    match heap.get(id) {
        HeapData::String(s) => format!("'{s}'"),
        HeapData::BigInt(b) => format!("{b}n"),
        HeapData::Array(arr) => {
            let parts: Vec<String> = arr.elements().iter().map(|e| display_value(e, heap, shapes, seen)).collect();
            format!("[ {} ]", parts.join(", "))
        }
        HeapData::Object(obj) => {
            let mut parts = Vec::new();
            for (key, value) in obj.display_entries(shapes) {
                parts.push(format!("{key}: {}", display_value(&value, heap, shapes, seen)));
            }
            if parts.is_empty() {
                "{}".to_owned()
            } else {
                format!("{{ {} }}", parts.join(", "))
            }
        }
        HeapData::Function(f) => format!("[Function: {name}]", name = f.name()),
        HeapData::BoundNative(_) => "[Function (native)]".to_owned(),
        HeapData::Promise(p) => match p.state() {
            PromiseState::Pending => "Promise { <pending> }".to_owned(),
            PromiseState::Fulfilled => format!("Promise {{ {} }}", display_value(p.result(), heap, shapes, seen)),
            PromiseState::Rejected => {
                format!("Promise {{ <rejected> {} }}", display_value(p.result(), heap, shapes, seen))
            }
        },
        HeapData::Generator(_) => "Object [Generator] {}".to_owned(),
        HeapData::Map(m) => format!("Map({})", m.len()),
        HeapData::Set(s) => format!("Set({})", s.len()),
        HeapData::WeakMap(_) => "WeakMap { <items unknown> }".to_owned(),
        HeapData::WeakSet(_) => "WeakSet { <items unknown> }".to_owned(),
        HeapData::Error(e) => e.header(),
        HeapData::TypedArray(ta) => format!("{}({})", ta.kind().type_name(), ta.len()),
        HeapData::Regex(r) => format!("/{}/{}", r.source(), r.flags()),
        HeapData::Environment(_) => "[Environment]".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting_matches_js() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.5), "-0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(4_999_950_000.0), "4999950000");
    }

    #[test]
    fn string_to_number_handles_prefixes_and_blanks() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("  12  "), 12.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("0b101"), 5.0);
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn nan_is_not_strictly_equal_to_itself() {
        let heap = Heap::for_tests();
        let a = Value::Number(f64::NAN);
        assert!(!a.strict_equals(&Value::Number(f64::NAN), &heap));
        assert!(Value::Number(0.0).strict_equals(&Value::Number(-0.0), &heap));
    }

    #[test]
    fn booleans_follow_the_falsy_table() {
        let heap = Heap::for_tests();
        assert!(!Value::Undefined.to_boolean(&heap));
        assert!(!Value::Null.to_boolean(&heap));
        assert!(!Value::Number(f64::NAN).to_boolean(&heap));
        assert!(!Value::Str(crate::intern::intern("")).to_boolean(&heap));
        assert!(Value::Number(-1.0).to_boolean(&heap));
    }

    #[test]
    fn bigint_conversion_rejects_fractions() {
        let heap = Heap::for_tests();
        assert!(Value::Number(1.5).to_bigint_value(&heap).is_err());
        assert_eq!(Value::Number(7.0).to_bigint_value(&heap).unwrap(), BigInt::from(7));
        assert_eq!(
            Value::Str(crate::intern::intern("0x10")).to_bigint_value(&heap).unwrap(),
            BigInt::from(16)
        );
    }
}
