//! The host value boundary.
//!
//! [`HostValue`] is the public-facing value type: it owns all its data and
//! can be freely cloned, compared, serialized, or stored without a heap.
//! Engine values convert out with `to_host_value` (deep copy, cycle-safe)
//! and in with `from_host_value`.
//!
//! # Input vs output variants
//!
//! Most variants round-trip. `Promise` and `Repr` are output-only: they
//! describe engine state (a promise snapshot, a rendering of a value with
//! no host shape) and cannot be turned back into engine values.
//!
//! # JSON
//!
//! `to_json`/`from_json` use the natural mappings (`Undefined` serializes
//! as `null`); parse-then-stringify over JSON-compatible values is
//! structure-preserving.

use num_bigint::BigInt;

use crate::{
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    interp::Interpreter,
    intern::intern_unbounded,
    object::PropKey,
    promise::PromiseState,
    value::{Value, number_to_string},
};

/// A JavaScript value that can cross the host boundary.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(BigInt),
    String(String),
    Array(Vec<HostValue>),
    /// Insertion-ordered string-keyed properties.
    Object(Vec<(String, HostValue)>),
    /// Output-only: a promise's state snapshot at conversion time.
    Promise {
        state: PromiseState,
        /// The settled value; `None` while pending.
        value: Option<Box<HostValue>>,
    },
    /// Output-only: values with no host shape (functions, symbols, ...).
    Repr(String),
}

impl HostValue {
    /// True for `Undefined` and `Null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// The f64 behind a `Number`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text behind a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Serializes to JSON text. Output-only variants render as their
    /// display strings.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_json_value())
    }

    fn to_json_value(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::BigInt(b) => serde_json::Value::String(b.to_string()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json_value).collect())
            }
            Self::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json_value());
                }
                serde_json::Value::Object(map)
            }
            Self::Promise { .. } | Self::Repr(_) => serde_json::Value::Null,
        }
    }

    /// Parses JSON text into the natural host-value shape.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::from_json_value(&value))
    }

    fn from_json_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json_value).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_json_value(value)))
                    .collect(),
            ),
        }
    }
}

/// Depth cap for engine-to-host conversion of nested structures.
const MAX_CONVERT_DEPTH: usize = 64;

impl Interpreter {
    /// Deep-copies an engine value into the host shape. Cycles and
    /// over-deep nesting degrade to `Repr`.
    pub(crate) fn to_host_value(&self, value: &Value) -> HostValue {
        let mut seen = Vec::new();
        self.to_host_inner(value, &mut seen)
    }

    fn to_host_inner(&self, value: &Value, seen: &mut Vec<HeapId>) -> HostValue {
        match value {
            Value::Undefined => HostValue::Undefined,
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(n) => HostValue::Number(*n),
            Value::Str(s) => HostValue::String(s.as_str().to_owned()),
            Value::Symbol(_) | Value::Native(_) | Value::Builtin(_) | Value::ModuleBinding(..) => {
                HostValue::Repr(value.to_display_string(&self.heap, &self.shapes))
            }
            Value::Ref(id) => {
                if seen.len() >= MAX_CONVERT_DEPTH || seen.contains(id) {
                    return HostValue::Repr("[Circular]".to_owned());
                }
                seen.push(*id);
                let out = match self.heap.get(*id) {
                    HeapData::String(s) => HostValue::String(s.to_string()),
                    HeapData::BigInt(b) => HostValue::BigInt(b.clone()),
                    HeapData::Array(arr) => HostValue::Array(
                        arr.elements().iter().map(|e| self.to_host_inner(e, seen)).collect(),
                    ),
                    HeapData::Object(obj) => HostValue::Object(
                        obj.display_entries(&self.shapes)
                            .into_iter()
                            .map(|(key, value)| (key, self.to_host_inner(&value, seen)))
                            .collect(),
                    ),
                    HeapData::Promise(p) => HostValue::Promise {
                        state: p.state(),
                        value: if p.is_settled() {
                            Some(Box::new(self.to_host_inner(p.result(), seen)))
                        } else {
                            None
                        },
                    },
                    _ => HostValue::Repr(value.to_display_string(&self.heap, &self.shapes)),
                };
                seen.pop();
                out
            }
        }
    }

    /// Builds an engine value from a host value. Output-only variants are
    /// rejected with a TypeError.
    pub(crate) fn from_host_value(&mut self, value: &HostValue) -> RunResult<Value> {
        match value {
            HostValue::Undefined => Ok(Value::Undefined),
            HostValue::Null => Ok(Value::Null),
            HostValue::Bool(b) => Ok(Value::Bool(*b)),
            HostValue::Number(n) => Ok(Value::Number(*n)),
            HostValue::BigInt(b) => Value::of_bigint(b.clone(), &mut self.heap),
            HostValue::String(s) => Value::of_string(s, &mut self.heap),
            HostValue::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    match self.from_host_value(item) {
                        Ok(value) => elements.push(value),
                        Err(err) => {
                            for built in elements {
                                built.drop_with_heap(&mut self.heap);
                            }
                            return Err(err);
                        }
                    }
                }
                let id = self.alloc(HeapData::Array(crate::object::JsArray::with_elements(elements)))?;
                Ok(Value::Ref(id))
            }
            HostValue::Object(entries) => {
                let proto = self.object_proto;
                if let Some(proto) = proto {
                    self.heap.inc_ref(proto);
                }
                let id = self.alloc(HeapData::Object(crate::object::JsObject::new(proto)))?;
                for (key, entry) in entries {
                    let value = match self.from_host_value(entry) {
                        Ok(value) => value,
                        Err(err) => {
                            self.heap.dec_ref(id);
                            return Err(err);
                        }
                    };
                    self.object_set_raw(id, PropKey::Str(intern_unbounded(key)), value);
                }
                Ok(Value::Ref(id))
            }
            HostValue::Promise { .. } | HostValue::Repr(_) => Err(RunError::type_error(
                "output-only host values cannot convert back into engine values",
            )),
        }
    }
}

impl std::fmt::Display for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&number_to_string(*n)),
            Self::BigInt(b) => write!(f, "{b}n"),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(entries) => {
                f.write_str("{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Promise { state, value } => match (state, value) {
                (PromiseState::Pending, _) => f.write_str("Promise { <pending> }"),
                (PromiseState::Fulfilled, Some(value)) => write!(f, "Promise {{ {value} }}"),
                (PromiseState::Rejected, Some(value)) => write!(f, "Promise {{ <rejected> {value} }}"),
                (_, None) => f.write_str("Promise { }"),
            },
            Self::Repr(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_round_trip_is_structure_preserving() {
        let original = HostValue::Object(vec![
            ("name".to_owned(), HostValue::String("lark".to_owned())),
            ("count".to_owned(), HostValue::Number(3.0)),
            (
                "tags".to_owned(),
                HostValue::Array(vec![HostValue::Bool(true), HostValue::Null]),
            ),
        ]);
        let text = original.to_json().expect("serializes");
        let round_tripped = HostValue::from_json(&text).expect("parses");
        assert_eq!(round_tripped, original);
    }

    #[test]
    fn display_renders_nested_values() {
        let value = HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::String("two".to_owned()),
            HostValue::BigInt(num_bigint::BigInt::from(3)),
        ]);
        assert_eq!(value.to_string(), "[1, two, 3n]");
    }
}
