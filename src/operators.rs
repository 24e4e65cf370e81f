// Built-in operator semantics
// Type-indexed tables; anything not listed fails with OperatorError

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::GenericError;
use crate::number::Number;
use crate::path::{self, Path};
use crate::raw::Raw;
use crate::value::Value;

type OpResult = Result<Value, GenericError>;

/// Apply a binary operator to two concrete operands.
///
/// Neither operand is modified; results that share structure with an operand
/// are built over a copy.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> OpResult {
    match op {
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Subtract => numeric(op, lhs, rhs, |a, b| Some(a.sub(b))),
        BinaryOp::Multiply => numeric(op, lhs, rhs, |a, b| Some(a.mul(b))),
        BinaryOp::Power => numeric(op, lhs, rhs, |a, b| Some(a.pow(b))),
        BinaryOp::Divide => divide(lhs, rhs),
        BinaryOp::Modulo => modulo(lhs, rhs),
        BinaryOp::Equal => equals(lhs, rhs).map(Value::Bool),
        BinaryOp::NotEqual => equals(lhs, rhs)
            .map(|eq| Value::Bool(!eq))
            .map_err(|_| mismatch(op, lhs, rhs)),
        BinaryOp::LessThan => compare(op, lhs, rhs, |o| o == Ordering::Less),
        BinaryOp::LessThanOrEqual => compare(op, lhs, rhs, |o| o != Ordering::Greater),
        BinaryOp::GreaterThan => compare(op, lhs, rhs, |o| o == Ordering::Greater),
        BinaryOp::GreaterThanOrEqual => compare(op, lhs, rhs, |o| o != Ordering::Less),
        BinaryOp::And => logical(op, lhs, rhs, |a, b| a && b),
        BinaryOp::Or => logical(op, lhs, rhs, |a, b| a || b),
    }
}

/// Apply a unary operator to a concrete operand.
pub fn unary(op: UnaryOp, operand: &Value) -> OpResult {
    match (op, operand) {
        (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(n.neg())),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        _ => Err(GenericError::unary_operator(
            op.symbol(),
            operand.type_name(),
        )),
    }
}

fn mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> GenericError {
    GenericError::operator(op.symbol(), lhs.type_name(), rhs.type_name())
}

fn numeric(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    f: impl Fn(Number, Number) -> Option<Number>,
) -> OpResult {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => f(*a, *b)
            .map(Value::Number)
            .ok_or_else(|| zero_divisor(op)),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

fn zero_divisor(op: BinaryOp) -> GenericError {
    GenericError::operator(op.symbol(), "Number", "Number")
        .with_code("ZERO_DIVISOR")
        .with_location(format!("operator '{}'", op.symbol()))
}

// ── + ────────────────────────────────────────────────────────────────────────

fn add(lhs: &Value, rhs: &Value) -> OpResult {
    match (lhs, rhs) {
        (Value::Empty, other) | (other, Value::Empty) => Ok(other.clone()),
        (Value::String(a), Value::String(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::from(s))
        }
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a.add(*b))),
        (Value::Array(arr), item) => {
            let mut out = Vec::with_capacity(arr.len() + 1);
            out.extend(arr.iter().cloned());
            out.push(item.clone());
            Ok(Value::array(out))
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut merged: IndexMap<String, Value> = a.as_ref().clone();
            for (key, value) in b.iter() {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::object(merged))
        }
        (Value::Raw(a), Value::Raw(b)) => Ok(Value::Raw(a.concat(b.as_bytes()))),
        (Value::Raw(a), scalar) => match scalar_bytes(scalar) {
            Some(bytes) => Ok(Value::Raw(a.concat(&bytes))),
            None => Err(mismatch(BinaryOp::Add, lhs, rhs)),
        },
        (scalar, Value::Raw(b)) => match scalar_bytes(scalar) {
            Some(bytes) => Ok(Value::Raw(Raw::new(bytes).concat(b.as_bytes()))),
            None => Err(mismatch(BinaryOp::Add, lhs, rhs)),
        },
        _ => Err(mismatch(BinaryOp::Add, lhs, rhs)),
    }
}

/// UTF-8 bytes of a scalar, for mixing with Raw.
pub fn scalar_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Number(n) => Some(n.to_string().into_bytes()),
        Value::Bool(b) => Some(b.to_string().into_bytes()),
        Value::Null => Some(b"null".to_vec()),
        _ => None,
    }
}

// ── / and % ──────────────────────────────────────────────────────────────────

fn divide(lhs: &Value, rhs: &Value) -> OpResult {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => numeric(BinaryOp::Divide, lhs, rhs, |a, b| a.div(b)),
        (Value::Array(a), Value::Array(b)) => Ok(Value::array(intersection(a, b))),
        (Value::Object(_), _) => match path_list(rhs) {
            Some(paths) => Ok(path::retain(lhs, &paths)),
            None => Err(mismatch(BinaryOp::Divide, lhs, rhs)),
        },
        (Value::Array(a), scalar) if scalar.is_scalar() => Ok(Value::array(
            a.iter().filter(|v| loose_eq(v, scalar)).cloned().collect(),
        )),
        (scalar, Value::Array(b)) if scalar.is_scalar() => {
            Ok(Value::Bool(b.iter().any(|v| loose_eq(scalar, v))))
        }
        _ => Err(mismatch(BinaryOp::Divide, lhs, rhs)),
    }
}

fn modulo(lhs: &Value, rhs: &Value) -> OpResult {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => numeric(BinaryOp::Modulo, lhs, rhs, |a, b| a.rem(b)),
        (Value::Array(a), Value::Array(b)) => Ok(Value::array(symmetric_difference(a, b))),
        (Value::Object(_), _) => match path_list(rhs) {
            Some(paths) => Ok(path::reclude(lhs, &paths)),
            None => Err(mismatch(BinaryOp::Modulo, lhs, rhs)),
        },
        (Value::Array(a), scalar) if scalar.is_scalar() => Ok(Value::array(
            a.iter().filter(|v| !loose_eq(v, scalar)).cloned().collect(),
        )),
        (scalar, Value::Array(b)) if scalar.is_scalar() => {
            Ok(Value::Bool(!b.iter().any(|v| loose_eq(scalar, v))))
        }
        _ => Err(mismatch(BinaryOp::Modulo, lhs, rhs)),
    }
}

/// A single Path or an Array made only of Paths.
pub fn path_list(value: &Value) -> Option<Vec<Path>> {
    match value {
        Value::Path(p) => Some(vec![p.as_ref().clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_path().cloned())
            .collect(),
        _ => None,
    }
}

/// Pair each element of `a` with the first unused equal element of `b`.
fn pair_up(a: &[Value], b: &[Value]) -> (Vec<bool>, Vec<bool>) {
    let mut used = vec![false; b.len()];
    let mut matched = vec![false; a.len()];
    for (i, left) in a.iter().enumerate() {
        let hit = b
            .iter()
            .enumerate()
            .position(|(j, right)| !used[j] && loose_eq(left, right));
        if let Some(j) = hit {
            used[j] = true;
            matched[i] = true;
        }
    }
    (matched, used)
}

fn intersection(a: &[Value], b: &[Value]) -> Vec<Value> {
    let (matched, _) = pair_up(a, b);
    a.iter()
        .zip(matched)
        .filter(|(_, m)| *m)
        .map(|(v, _)| v.clone())
        .collect()
}

fn symmetric_difference(a: &[Value], b: &[Value]) -> Vec<Value> {
    let (matched, used) = pair_up(a, b);
    let left = a.iter().zip(matched).filter(|(_, m)| !*m).map(|(v, _)| v.clone());
    let right = b.iter().zip(used).filter(|(_, u)| !*u).map(|(v, _)| v.clone());
    left.chain(right).collect()
}

// ── Equality and ordering ────────────────────────────────────────────────────

/// `=` semantics. Cross-kind pairs fail unless one side is Empty or Null.
pub fn equals(lhs: &Value, rhs: &Value) -> Result<bool, GenericError> {
    match (lhs, rhs) {
        (Value::Empty, Value::Empty) | (Value::Null, Value::Null) => Ok(true),
        (Value::Empty | Value::Null, _) | (_, Value::Empty | Value::Null) => Ok(false),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Number(a), Value::Number(b)) => Ok(a.numeric_eq(b)),
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Raw(a), Value::Raw(b)) => Ok(a == b),
        (Value::Array(a), Value::Array(b)) => {
            Ok(a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| loose_eq(x, y)))
        }
        (Value::Object(a), Value::Object(b)) => Ok(a.len() == b.len()
            && a.iter()
                .all(|(k, v)| b.get(k).map(|w| loose_eq(v, w)).unwrap_or(false))),
        (Value::Error(a), Value::Error(b)) => Ok(a == b),
        (Value::Path(a), Value::Path(b)) => Ok(a == b),
        (Value::Stream(a), Value::Stream(b)) => Ok(a == b),
        (Value::Lambda(a), Value::Lambda(b)) => Ok(a == b),
        _ => Err(mismatch(BinaryOp::Equal, lhs, rhs)),
    }
}

/// Equality where "not comparable" counts as "not equal".
pub fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    equals(lhs, rhs).unwrap_or(false)
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value, test: impl Fn(Ordering) -> bool) -> OpResult {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.numeric_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    Ok(Value::Bool(ordering.map(test).unwrap_or(false)))
}

fn logical(op: BinaryOp, lhs: &Value, rhs: &Value, f: impl Fn(bool, bool) -> bool) -> OpResult {
    match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(f(*a, *b))),
        _ => Err(mismatch(op, lhs, rhs)),
    }
}

/// Truthiness used by conditionals and filters.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Empty | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.value() != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Raw(r) => !r.is_empty(),
        Value::Error(_) => false,
        Value::Path(_) | Value::Stream(_) | Value::Lambda(_) => true,
    }
}
