//! Typed arrays over a raw byte buffer.
//!
//! Each typed array owns its buffer directly. Element reads and writes go
//! through [`ElementKind`], which fixes the element width and the
//! number-vs-BigInt lane: the 64-bit integer kinds accept and produce
//! BigInt values, everything else works in Numbers.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::{
    error::{RunError, RunResult},
    heap::Heap,
    value::Value,
};

/// Element type of a typed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub(crate) enum ElementKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl ElementKind {
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    /// Constructor name, used by display and error messages.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
        }
    }

    /// Whether reads/writes use the BigInt lane.
    #[must_use]
    pub fn is_bigint(self) -> bool {
        matches!(self, Self::BigInt64 | Self::BigUint64)
    }
}

/// A typed array: element kind + owned byte buffer.
#[derive(Debug)]
pub(crate) struct TypedArray {
    kind: ElementKind,
    buffer: Vec<u8>,
}

impl TypedArray {
    /// Creates a zero-filled array of `len` elements.
    pub fn new(kind: ElementKind, len: usize) -> Self {
        Self {
            kind,
            buffer: vec![0; len * kind.element_size()],
        }
    }

    #[must_use]
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len() / self.kind.element_size()
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// Reads element `index`. BigInt kinds allocate the result on the heap.
    /// Out-of-bounds reads produce `undefined`, as the language requires.
    pub fn get(&self, index: usize, heap: &mut Heap) -> RunResult<Value> {
        if index >= self.len() {
            return Ok(Value::Undefined);
        }
        let offset = index * self.kind.element_size();
        let b = &self.buffer;
        Ok(match self.kind {
            ElementKind::Int8 => Value::Number(f64::from(b[offset] as i8)),
            ElementKind::Uint8 | ElementKind::Uint8Clamped => Value::Number(f64::from(b[offset])),
            ElementKind::Int16 => {
                Value::Number(f64::from(i16::from_le_bytes([b[offset], b[offset + 1]])))
            }
            ElementKind::Uint16 => {
                Value::Number(f64::from(u16::from_le_bytes([b[offset], b[offset + 1]])))
            }
            ElementKind::Int32 => Value::Number(f64::from(i32::from_le_bytes(
                b[offset..offset + 4].try_into().expect("slice is 4 bytes"),
            ))),
            ElementKind::Uint32 => Value::Number(f64::from(u32::from_le_bytes(
                b[offset..offset + 4].try_into().expect("slice is 4 bytes"),
            ))),
            ElementKind::Float32 => Value::Number(f64::from(f32::from_le_bytes(
                b[offset..offset + 4].try_into().expect("slice is 4 bytes"),
            ))),
            ElementKind::Float64 => Value::Number(f64::from_le_bytes(
                b[offset..offset + 8].try_into().expect("slice is 8 bytes"),
            )),
            ElementKind::BigInt64 => {
                let raw = i64::from_le_bytes(b[offset..offset + 8].try_into().expect("slice is 8 bytes"));
                Value::of_bigint(BigInt::from(raw), heap)?
            }
            ElementKind::BigUint64 => {
                let raw = u64::from_le_bytes(b[offset..offset + 8].try_into().expect("slice is 8 bytes"));
                Value::of_bigint(BigInt::from(raw), heap)?
            }
        })
    }

    /// Writes element `index`, coercing through the Number or BigInt lane.
    /// Out-of-bounds writes are silently ignored. Consumes `value`.
    pub fn set(&mut self, index: usize, value: Value, heap: &mut Heap) -> RunResult<()> {
        if index >= self.len() {
            value.drop_with_heap(heap);
            return Ok(());
        }
        let offset = index * self.kind.element_size();
        if self.kind.is_bigint() {
            // The 64-bit lanes accept BigInt values only; Numbers must be
            // converted explicitly by the writer.
            let Some(big) = value.as_bigint(heap).cloned() else {
                value.drop_with_heap(heap);
                return Err(RunError::type_error("Cannot convert a non-BigInt value to a BigInt"));
            };
            value.drop_with_heap(heap);
            let raw: u64 = match self.kind {
                ElementKind::BigInt64 => wrap_i64(&big) as u64,
                _ => wrap_u64(&big),
            };
            self.buffer[offset..offset + 8].copy_from_slice(&raw.to_le_bytes());
            return Ok(());
        }
        let n = match value.to_number(heap) {
            Ok(n) => n,
            Err(err) => {
                value.drop_with_heap(heap);
                return Err(err);
            }
        };
        value.drop_with_heap(heap);
        match self.kind {
            ElementKind::Int8 => self.buffer[offset] = (to_int32(n) as i8) as u8,
            ElementKind::Uint8 => self.buffer[offset] = to_int32(n) as u8,
            ElementKind::Uint8Clamped => self.buffer[offset] = clamp_u8(n),
            ElementKind::Int16 => {
                self.buffer[offset..offset + 2].copy_from_slice(&(to_int32(n) as i16).to_le_bytes());
            }
            ElementKind::Uint16 => {
                self.buffer[offset..offset + 2].copy_from_slice(&(to_int32(n) as u16).to_le_bytes());
            }
            ElementKind::Int32 => {
                self.buffer[offset..offset + 4].copy_from_slice(&to_int32(n).to_le_bytes());
            }
            ElementKind::Uint32 => {
                self.buffer[offset..offset + 4].copy_from_slice(&(to_int32(n) as u32).to_le_bytes());
            }
            ElementKind::Float32 => {
                self.buffer[offset..offset + 4].copy_from_slice(&(n as f32).to_le_bytes());
            }
            ElementKind::Float64 => {
                self.buffer[offset..offset + 8].copy_from_slice(&n.to_le_bytes());
            }
            ElementKind::BigInt64 | ElementKind::BigUint64 => unreachable!("bigint lane handled above"),
        }
        Ok(())
    }

    pub fn estimate_size(&self) -> usize {
        self.buffer.len()
    }
}

/// ES `ToInt32`: modular wrap of the integral part.
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let m = n.trunc() % 4_294_967_296.0;
    let m = if m < 0.0 { m + 4_294_967_296.0 } else { m };
    if m >= 2_147_483_648.0 { (m - 4_294_967_296.0) as i32 } else { m as i32 }
}

fn clamp_u8(n: f64) -> u8 {
    if n.is_nan() {
        0
    } else {
        n.round_ties_even().clamp(0.0, 255.0) as u8
    }
}

fn wrap_i64(big: &BigInt) -> i64 {
    let mask = BigInt::from(u64::MAX) + 1u8;
    let rem = ((big % &mask) + &mask) % &mask;
    rem.to_u64().expect("masked to 64 bits") as i64
}

fn wrap_u64(big: &BigInt) -> u64 {
    let mask = BigInt::from(u64::MAX) + 1u8;
    let rem = ((big % &mask) + &mask) % &mask;
    rem.to_u64().expect("masked to 64 bits")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_wrapping_matches_the_language() {
        assert_eq!(to_int32(4_294_967_296.0), 0);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(2_147_483_648.0), -2_147_483_648);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn bigint_lane_round_trips() {
        let mut heap = Heap::for_tests();
        let mut ta = TypedArray::new(ElementKind::BigInt64, 2);
        let v = Value::of_bigint(BigInt::from(-5i64), &mut heap).unwrap();
        ta.set(0, v, &mut heap).unwrap();
        let out = ta.get(0, &mut heap).unwrap();
        assert_eq!(out.as_bigint(&heap), Some(&BigInt::from(-5)));
        out.drop_with_heap(&mut heap);
    }

    #[test]
    fn out_of_bounds_reads_are_undefined() {
        let mut heap = Heap::for_tests();
        let ta = TypedArray::new(ElementKind::Uint8, 1);
        assert!(matches!(ta.get(5, &mut heap), Ok(Value::Undefined)));
    }
}
