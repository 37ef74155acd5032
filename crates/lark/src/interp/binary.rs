//! Binary and unary operator semantics: `+` with string concatenation,
//! BigInt arithmetic (never mixed with Number), abstract and strict
//! equality, relational comparison, bit operations, `in`, and
//! `instanceof`.
//!
//! The to-primitive step may invoke user `valueOf`/`toString` methods;
//! objects without either fall back to the engine's default renderings.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    ast::{BinaryOp, UnaryOp, UpdateOp},
    error::{RunError, RunResult},
    heap::HeapData,
    intern::intern,
    interp::Interpreter,
    object::PropKey,
    types::to_int32,
    value::Value,
};

/// Preferred type of a to-primitive conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrimitiveHint {
    Default,
    Number,
    Str,
}

impl Interpreter {
    /// Applies a binary operator. Consumes both operands.
    pub(crate) fn apply_binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        match op {
            BinaryOp::Add => self.op_add(lhs, rhs),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Exp => {
                self.op_arith(op, lhs, rhs)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => self.op_compare(op, lhs, rhs),
            BinaryOp::Eq => {
                let equal = self.loose_equals(lhs, rhs)?;
                Ok(Value::Bool(equal))
            }
            BinaryOp::Ne => {
                let equal = self.loose_equals(lhs, rhs)?;
                Ok(Value::Bool(!equal))
            }
            BinaryOp::StrictEq => {
                let equal = lhs.strict_equals(&rhs, &self.heap);
                lhs.drop_with_heap(&mut self.heap);
                rhs.drop_with_heap(&mut self.heap);
                Ok(Value::Bool(equal))
            }
            BinaryOp::StrictNe => {
                let equal = lhs.strict_equals(&rhs, &self.heap);
                lhs.drop_with_heap(&mut self.heap);
                rhs.drop_with_heap(&mut self.heap);
                Ok(Value::Bool(!equal))
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => {
                self.op_bitwise(op, lhs, rhs)
            }
            BinaryOp::In => {
                let key = match lhs.to_property_key(&self.heap) {
                    Ok(key) => key,
                    Err(err) => {
                        lhs.drop_with_heap(&mut self.heap);
                        rhs.drop_with_heap(&mut self.heap);
                        return Err(err);
                    }
                };
                lhs.drop_with_heap(&mut self.heap);
                let result = self.has_property(&rhs, key);
                rhs.drop_with_heap(&mut self.heap);
                Ok(Value::Bool(result?))
            }
            BinaryOp::Instanceof => self.op_instanceof(lhs, rhs),
        }
    }

    /// Applies a (non-typeof, non-delete) unary operator. Consumes the
    /// operand.
    pub(crate) fn apply_unary(&mut self, op: UnaryOp, value: Value) -> RunResult<Value> {
        match op {
            UnaryOp::Minus => {
                if let Some(big) = value.as_bigint(&self.heap) {
                    let negated = -big.clone();
                    value.drop_with_heap(&mut self.heap);
                    return Value::of_bigint(negated, &mut self.heap);
                }
                let n = value.to_number(&self.heap);
                value.drop_with_heap(&mut self.heap);
                Ok(Value::Number(-n?))
            }
            UnaryOp::Plus => {
                // Unary plus is ToNumber, which rejects BigInt.
                let n = value.to_number(&self.heap);
                value.drop_with_heap(&mut self.heap);
                Ok(Value::Number(n?))
            }
            UnaryOp::Not => {
                let truthy = value.to_boolean(&self.heap);
                value.drop_with_heap(&mut self.heap);
                Ok(Value::Bool(!truthy))
            }
            UnaryOp::BitNot => {
                if let Some(big) = value.as_bigint(&self.heap) {
                    let result = -(big.clone() + 1i32);
                    value.drop_with_heap(&mut self.heap);
                    return Value::of_bigint(result, &mut self.heap);
                }
                let n = value.to_number(&self.heap);
                value.drop_with_heap(&mut self.heap);
                Ok(Value::Number(f64::from(!to_int32(n?))))
            }
            UnaryOp::Void => {
                value.drop_with_heap(&mut self.heap);
                Ok(Value::Undefined)
            }
            UnaryOp::Typeof | UnaryOp::Delete => unreachable!("handled at their evaluation sites"),
        }
    }

    /// `+`: string concatenation wins if either primitive is a string;
    /// BigInt stays BigInt; BigInt + Number throws.
    fn op_add(&mut self, lhs: Value, rhs: Value) -> RunResult<Value> {
        let lp = self.to_primitive(lhs, PrimitiveHint::Default)?;
        let rp = match self.to_primitive(rhs, PrimitiveHint::Default) {
            Ok(rp) => rp,
            Err(err) => {
                lp.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        if lp.is_string(&self.heap) || rp.is_string(&self.heap) {
            let result = (|| -> RunResult<String> {
                let mut text = lp.to_js_string(&self.heap)?;
                text.push_str(&rp.to_js_string(&self.heap)?);
                Ok(text)
            })();
            lp.drop_with_heap(&mut self.heap);
            rp.drop_with_heap(&mut self.heap);
            return Value::of_owned_string(result?, &mut self.heap);
        }
        let l_big = lp.is_bigint(&self.heap);
        let r_big = rp.is_bigint(&self.heap);
        match (l_big, r_big) {
            (true, true) => {
                let result = lp.as_bigint(&self.heap).expect("checked bigint").clone()
                    + rp.as_bigint(&self.heap).expect("checked bigint");
                lp.drop_with_heap(&mut self.heap);
                rp.drop_with_heap(&mut self.heap);
                Value::of_bigint(result, &mut self.heap)
            }
            (false, false) => {
                let result = (|| -> RunResult<f64> { Ok(lp.to_number(&self.heap)? + rp.to_number(&self.heap)?) })();
                lp.drop_with_heap(&mut self.heap);
                rp.drop_with_heap(&mut self.heap);
                Ok(Value::Number(result?))
            }
            _ => {
                lp.drop_with_heap(&mut self.heap);
                rp.drop_with_heap(&mut self.heap);
                Err(RunError::type_error("Cannot mix BigInt and other types, use explicit conversions"))
            }
        }
    }

    /// `- * / % **` over Numbers or BigInts (never mixed).
    fn op_arith(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        let l_big = lhs.is_bigint(&self.heap);
        let r_big = rhs.is_bigint(&self.heap);
        if l_big && r_big {
            let a = lhs.as_bigint(&self.heap).expect("checked bigint").clone();
            let b = rhs.as_bigint(&self.heap).expect("checked bigint").clone();
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            let result = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b.is_zero() {
                        return Err(RunError::range_error("Division by zero"));
                    }
                    a / b
                }
                BinaryOp::Mod => {
                    if b.is_zero() {
                        return Err(RunError::range_error("Division by zero"));
                    }
                    a % b
                }
                BinaryOp::Exp => {
                    if b.is_negative() {
                        return Err(RunError::range_error("Exponent must be non-negative"));
                    }
                    let exp = b.to_u32().ok_or_else(|| RunError::range_error("BigInt exponent too large"))?;
                    a.pow(exp)
                }
                _ => unreachable!("not an arithmetic operator"),
            };
            return Value::of_bigint(result, &mut self.heap);
        }
        if l_big || r_big {
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error("Cannot mix BigInt and other types, use explicit conversions"));
        }
        let result = (|| -> RunResult<f64> {
            let a = lhs.to_number(&self.heap)?;
            let b = rhs.to_number(&self.heap)?;
            Ok(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => {
                    // IEEE remainder with the sign of the dividend, as the
                    // language requires (not Euclidean).
                    a % b
                }
                BinaryOp::Exp => a.powf(b),
                _ => unreachable!("not an arithmetic operator"),
            })
        })();
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        Ok(Value::Number(result?))
    }

    /// `< <= > >=`, including string-vs-string and BigInt-vs-Number
    /// comparisons (comparisons may mix, unlike arithmetic).
    fn op_compare(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        let lp = self.to_primitive(lhs, PrimitiveHint::Number)?;
        let rp = match self.to_primitive(rhs, PrimitiveHint::Number) {
            Ok(rp) => rp,
            Err(err) => {
                lp.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        let result = if lp.is_string(&self.heap) && rp.is_string(&self.heap) {
            let a = lp.as_str(&self.heap).expect("checked string");
            let b = rp.as_str(&self.heap).expect("checked string");
            Some(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::Ge => a >= b,
                _ => unreachable!("not a comparison"),
            })
        } else {
            let a = self.comparable_number(&lp)?;
            let b = self.comparable_number(&rp)?;
            if a.is_nan() || b.is_nan() {
                Some(false)
            } else {
                Some(match op {
                    BinaryOp::Lt => a < b,
                    BinaryOp::Le => a <= b,
                    BinaryOp::Gt => a > b,
                    BinaryOp::Ge => a >= b,
                    _ => unreachable!("not a comparison"),
                })
            }
        };
        lp.drop_with_heap(&mut self.heap);
        rp.drop_with_heap(&mut self.heap);
        Ok(Value::Bool(result.expect("comparison always computes")))
    }

    /// Numeric view of a primitive for relational comparison; BigInts
    /// participate through their f64 approximation.
    fn comparable_number(&self, value: &Value) -> RunResult<f64> {
        if let Some(big) = value.as_bigint(&self.heap) {
            return Ok(big.to_f64().unwrap_or(f64::NAN));
        }
        value.to_number(&self.heap)
    }

    /// Bit operations: BigInt lane when both sides are BigInt, 32-bit
    /// integer lane otherwise.
    fn op_bitwise(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        let l_big = lhs.is_bigint(&self.heap);
        let r_big = rhs.is_bigint(&self.heap);
        if l_big && r_big {
            let a = lhs.as_bigint(&self.heap).expect("checked bigint").clone();
            let b = rhs.as_bigint(&self.heap).expect("checked bigint").clone();
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            let result = match op {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::Shl => {
                    let shift = b.to_u64().ok_or_else(|| RunError::range_error("BigInt shift out of range"))?;
                    a << shift
                }
                BinaryOp::Shr => {
                    let shift = b.to_u64().ok_or_else(|| RunError::range_error("BigInt shift out of range"))?;
                    a >> shift
                }
                BinaryOp::UShr => {
                    return Err(RunError::type_error("BigInts have no unsigned right shift"));
                }
                _ => unreachable!("not a bit operator"),
            };
            return Value::of_bigint(result, &mut self.heap);
        }
        if l_big || r_big {
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error("Cannot mix BigInt and other types, use explicit conversions"));
        }
        let result = (|| -> RunResult<f64> {
            let a = lhs.to_number(&self.heap)?;
            let b = rhs.to_number(&self.heap)?;
            let shift = (to_int32(b) as u32) & 31;
            Ok(match op {
                BinaryOp::BitAnd => f64::from(to_int32(a) & to_int32(b)),
                BinaryOp::BitOr => f64::from(to_int32(a) | to_int32(b)),
                BinaryOp::BitXor => f64::from(to_int32(a) ^ to_int32(b)),
                BinaryOp::Shl => f64::from(to_int32(a) << shift),
                BinaryOp::Shr => f64::from(to_int32(a) >> shift),
                BinaryOp::UShr => f64::from((to_int32(a) as u32) >> shift),
                _ => unreachable!("not a bit operator"),
            })
        })();
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        Ok(Value::Number(result?))
    }

    /// `instanceof`: walks the prototype chain against
    /// `constructor.prototype`.
    fn op_instanceof(&mut self, value: Value, ctor: Value) -> RunResult<Value> {
        let Value::Ref(ctor_id) = &ctor else {
            let message = "Right-hand side of 'instanceof' is not callable";
            value.drop_with_heap(&mut self.heap);
            ctor.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error(message));
        };
        let ctor_id = *ctor_id;
        if !matches!(self.heap.get(ctor_id), HeapData::Function(_)) {
            value.drop_with_heap(&mut self.heap);
            ctor.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error("Right-hand side of 'instanceof' is not callable"));
        }
        let target = match self.heap.get(ctor_id) {
            HeapData::Function(f) => f.prototype(),
            _ => unreachable!("checked above"),
        };
        let mut result = false;
        if let (Some(target), Value::Ref(id)) = (target, &value) {
            let mut current = match self.heap.get(*id) {
                HeapData::Object(obj) => obj.proto(),
                HeapData::Array(_) => self.array_proto,
                HeapData::Error(_) => self.object_proto,
                _ => None,
            };
            while let Some(proto) = current {
                if proto == target {
                    result = true;
                    break;
                }
                current = match self.heap.get(proto) {
                    HeapData::Object(obj) => obj.proto(),
                    _ => None,
                };
            }
        }
        value.drop_with_heap(&mut self.heap);
        ctor.drop_with_heap(&mut self.heap);
        Ok(Value::Bool(result))
    }

    /// `==` with the abstract-equality coercion ladder. Consumes both.
    pub(crate) fn loose_equals(&mut self, lhs: Value, rhs: Value) -> RunResult<bool> {
        // Identical shapes short-circuit to strict equality.
        let both_nullish = lhs.is_nullish() && rhs.is_nullish();
        if both_nullish {
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            return Ok(true);
        }
        if lhs.is_nullish() || rhs.is_nullish() {
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            return Ok(false);
        }
        let l_obj = lhs.is_object_like(&self.heap);
        let r_obj = rhs.is_object_like(&self.heap);
        match (l_obj, r_obj) {
            (true, true) => {
                let equal = lhs.strict_equals(&rhs, &self.heap);
                lhs.drop_with_heap(&mut self.heap);
                rhs.drop_with_heap(&mut self.heap);
                Ok(equal)
            }
            (true, false) => {
                let lp = self.to_primitive(lhs, PrimitiveHint::Default)?;
                self.loose_equals(lp, rhs)
            }
            (false, true) => {
                let rp = self.to_primitive(rhs, PrimitiveHint::Default)?;
                self.loose_equals(lhs, rp)
            }
            (false, false) => self.loose_equals_primitive(lhs, rhs),
        }
    }

    fn loose_equals_primitive(&mut self, lhs: Value, rhs: Value) -> RunResult<bool> {
        let result = (|| -> RunResult<bool> {
            // Booleans coerce to numbers first.
            if matches!(lhs, Value::Bool(_)) {
                let n = lhs.to_number(&self.heap)?;
                return self.loose_equals_primitive_ref(&Value::Number(n), &rhs);
            }
            if matches!(rhs, Value::Bool(_)) {
                let n = rhs.to_number(&self.heap)?;
                return self.loose_equals_primitive_ref(&lhs, &Value::Number(n));
            }
            self.loose_equals_primitive_ref(&lhs, &rhs)
        })();
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        result
    }

    fn loose_equals_primitive_ref(&self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        let l_big = lhs.is_bigint(&self.heap);
        let r_big = rhs.is_bigint(&self.heap);
        let l_str = lhs.is_string(&self.heap);
        let r_str = rhs.is_string(&self.heap);
        match (l_big, r_big) {
            (true, true) => {
                return Ok(lhs.as_bigint(&self.heap) == rhs.as_bigint(&self.heap));
            }
            (true, false) | (false, true) => {
                let (big, other) = if l_big { (lhs, rhs) } else { (rhs, lhs) };
                let big = big.as_bigint(&self.heap).expect("checked bigint");
                if other.is_string(&self.heap) {
                    let text = other.as_str(&self.heap).expect("checked string");
                    return Ok(text.trim().parse::<BigInt>().is_ok_and(|parsed| parsed == *big));
                }
                let n = other.to_number(&self.heap)?;
                return Ok(n.fract() == 0.0 && big.to_f64().is_some_and(|b| b == n));
            }
            (false, false) => {}
        }
        if l_str && r_str {
            return Ok(lhs.as_str(&self.heap) == rhs.as_str(&self.heap));
        }
        // number vs string (or number vs number): numeric comparison.
        let a = lhs.to_number(&self.heap)?;
        let b = rhs.to_number(&self.heap)?;
        Ok(a == b)
    }

    // ========================================================================
    // Coercion helpers
    // ========================================================================

    /// `ToPrimitive`: objects try `valueOf`/`toString` (order by hint),
    /// falling back to the engine's default rendering. Consumes `value`.
    pub(crate) fn to_primitive(&mut self, value: Value, hint: PrimitiveHint) -> RunResult<Value> {
        if !value.is_object_like(&self.heap) {
            return Ok(value);
        }
        let methods: [crate::intern::Istr; 2] = match hint {
            PrimitiveHint::Str => [intern("toString"), intern("valueOf")],
            PrimitiveHint::Number | PrimitiveHint::Default => [intern("valueOf"), intern("toString")],
        };
        for name in methods {
            let method = self.get_property(&value, PropKey::Str(name))?;
            if method.is_callable(&self.heap) {
                let this = value.clone_with_heap(&self.heap);
                let result = self.call_value_sync(method, this, Vec::new())?;
                if !result.is_object_like(&self.heap) {
                    value.drop_with_heap(&mut self.heap);
                    return Ok(result);
                }
                result.drop_with_heap(&mut self.heap);
            } else {
                method.drop_with_heap(&mut self.heap);
            }
        }
        // Default rendering keeps plain objects usable without a built-in
        // method library.
        let text = value.to_js_string(&self.heap)?;
        value.drop_with_heap(&mut self.heap);
        Value::of_owned_string(text, &mut self.heap)
    }

    /// String-preferring to-primitive, for template substitution.
    pub(crate) fn to_primitive_string(&mut self, value: Value) -> RunResult<Value> {
        self.to_primitive(value, PrimitiveHint::Str)
    }

    /// `ToNumeric`: BigInts pass through, everything else becomes Number.
    /// Consumes `value`.
    pub(crate) fn to_numeric(&mut self, value: Value) -> RunResult<Value> {
        if value.is_bigint(&self.heap) {
            return Ok(value);
        }
        let n = value.to_number(&self.heap);
        value.drop_with_heap(&mut self.heap);
        Ok(Value::Number(n?))
    }

    /// `old ± 1` preserving the Number/BigInt lane of `old`.
    pub(crate) fn numeric_step(&mut self, old: &Value, op: UpdateOp) -> RunResult<Value> {
        let delta: i8 = match op {
            UpdateOp::Increment => 1,
            UpdateOp::Decrement => -1,
        };
        if let Some(big) = old.as_bigint(&self.heap) {
            let result = big + BigInt::from(delta);
            return Value::of_bigint(result, &mut self.heap);
        }
        let n = old.to_number(&self.heap)?;
        Ok(Value::Number(n + f64::from(delta)))
    }
}
