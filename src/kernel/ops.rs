//! Operator semantics: arithmetic, comparison, indexing and iteration.

use std::cmp::Ordering;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::fault::{Fault, FaultKind};
use super::value::{check_depth, try_equal, Dict, Num, Value};

/// Upper bound on the length of sequences built by repetition or `range`.
pub const MAX_SEQUENCE: usize = 1 << 26;

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, Fault> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!value.truthy()));
    }
    let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
    match (op, value.as_num()) {
        (UnaryOp::Neg, Some(Num::Int(i))) => i.checked_neg().map(Value::Int).ok_or_else(Fault::overflow),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (_, Some(Num::Int(i))) => Ok(Value::Int(i)),
        (_, Some(Num::Float(f))) => Ok(Value::Float(f)),
        _ => Err(Fault::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            value.type_name()
        ))),
    }
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, Fault> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return numeric(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let count = repeat_count(s.len(), *n)?;
            Ok(Value::Str(s.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            let items = items.borrow();
            let count = repeat_count(items.len(), *n)?;
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => Err(Fault::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// How many copies to make; an empty unit needs none, whatever `n` is.
fn repeat_count(unit: usize, n: i64) -> Result<usize, Fault> {
    if unit == 0 {
        return Ok(0);
    }
    let count = usize::try_from(n.max(0)).unwrap_or(0);
    if unit.saturating_mul(count) > MAX_SEQUENCE {
        return Err(Fault::new(FaultKind::MemoryError, "repeated sequence is too large"));
    }
    Ok(count)
}

fn numeric(op: BinOp, x: Num, y: Num) -> Result<Value, Fault> {
    match (x, y) {
        (Num::Int(a), Num::Int(b)) => int_op(op, a, b),
        _ => float_op(op, x.as_f64(), y.as_f64()),
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, Fault> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or_else(Fault::overflow);
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mul => checked(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(Fault::zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(Fault::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(Fault::overflow)?;
            let adjust = (a % b != 0) && ((a < 0) != (b < 0));
            Ok(Value::Int(if adjust { q - 1 } else { q }))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Fault::zero_division("integer modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(Fault::overflow)?;
            let adjust = r != 0 && ((r < 0) != (b < 0));
            Ok(Value::Int(if adjust { r + b } else { r }))
        }
        BinOp::Pow => {
            if b >= 0 {
                let exp = u32::try_from(b).map_err(|_| Fault::overflow())?;
                checked(a.checked_pow(exp))
            } else if a == 0 {
                Err(Fault::zero_division(
                    "0.0 cannot be raised to a negative power",
                ))
            } else {
                Ok(Value::Float((a as f64).powf(b as f64)))
            }
        }
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, Fault> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Fault::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(Fault::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Fault::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(Fault::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(result))
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, Fault> {
    match op {
        CmpOp::Eq => try_equal(a, b),
        CmpOp::Ne => Ok(!try_equal(a, b)?),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => Ok(!contains(b, a)?),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = match (a.as_num(), b.as_num()) {
                // NaN compares false against everything
                (Some(x), Some(y)) => match num_cmp(x, y) {
                    Some(ord) => ord,
                    None => return Ok(false),
                },
                _ => ordering_for(op.symbol(), a, b)?,
            };
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

fn num_cmp(x: Num, y: Num) -> Option<Ordering> {
    match (x, y) {
        (Num::Int(i), Num::Int(j)) => Some(i.cmp(&j)),
        _ => x.as_f64().partial_cmp(&y.as_f64()),
    }
}

/// Total-ish ordering used by `sorted`, `min` and `max`.
pub fn ordering(a: &Value, b: &Value) -> Result<Ordering, Fault> {
    ordering_for("<", a, b)
}

fn ordering_for(symbol: &str, a: &Value, b: &Value) -> Result<Ordering, Fault> {
    ordering_at(symbol, a, b, 0)
}

fn ordering_at(symbol: &str, a: &Value, b: &Value, depth: usize) -> Result<Ordering, Fault> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return Ok(num_cmp(x, y).unwrap_or(Ordering::Equal));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            check_depth(depth)?;
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            for (p, q) in x.iter().zip(y.iter()) {
                if !try_equal(p, q)? {
                    return ordering_at(symbol, p, q, depth + 1);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(Fault::type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, Fault> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(Fault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            for x in items.borrow().iter() {
                if try_equal(x, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(dict) => {
            check_hashable(item)?;
            Ok(dict.borrow().contains_key(item))
        }
        other => Err(Fault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn check_hashable(key: &Value) -> Result<(), Fault> {
    match key {
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => Ok(()),
        other => Err(Fault::type_error(format!(
            "unhashable type: '{}'",
            other.type_name()
        ))),
    }
}

/// Resolves a possibly negative index against `len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { index + len } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

fn int_index(container: &str, index: &Value) -> Result<i64, Fault> {
    match index {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(Fault::type_error(format!(
            "{container} indices must be integers, not {}",
            other.type_name()
        ))),
    }
}

pub fn get_item(target: &Value, index: &Value) -> Result<Value, Fault> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let i = int_index("list", index)?;
            resolve_index(i, items.len())
                .map(|idx| items[idx].clone())
                .ok_or_else(|| Fault::index_error("list index out of range"))
        }
        Value::Str(s) => {
            let i = int_index("string", index)?;
            let len = s.chars().count();
            resolve_index(i, len)
                .and_then(|idx| s.chars().nth(idx))
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| Fault::index_error("string index out of range"))
        }
        Value::Dict(dict) => {
            check_hashable(index)?;
            dict.borrow()
                .get(index)
                .ok_or_else(|| Fault::new(FaultKind::KeyError, index.repr()))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(target: &Value, index: Value, value: Value) -> Result<(), Fault> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = int_index("list", &index)?;
            let idx = resolve_index(i, items.len())
                .ok_or_else(|| Fault::index_error("list assignment index out of range"))?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            check_hashable(&index)?;
            dict.borrow_mut().insert(index, value);
            Ok(())
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bound(bound: Option<&Value>, len: usize, default: usize) -> Result<usize, Fault> {
    let raw = match bound {
        None | Some(Value::None) => return Ok(default),
        Some(Value::Int(i)) => *i,
        Some(Value::Bool(b)) => i64::from(*b),
        Some(_) => {
            return Err(Fault::type_error(
                "slice indices must be integers or None",
            ))
        }
    };
    let len = len as i64;
    let idx = if raw < 0 { raw + len } else { raw };
    Ok(idx.clamp(0, len) as usize)
}

pub fn slice(target: &Value, start: Option<&Value>, end: Option<&Value>) -> Result<Value, Fault> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let from = slice_bound(start, items.len(), 0)?;
            let to = slice_bound(end, items.len(), items.len())?;
            let picked = if from < to { items[from..to].to_vec() } else { Vec::new() };
            Ok(Value::list(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let from = slice_bound(start, chars.len(), 0)?;
            let to = slice_bound(end, chars.len(), chars.len())?;
            let picked: String = if from < to {
                chars[from..to].iter().collect()
            } else {
                String::new()
            };
            Ok(Value::Str(picked))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Snapshot of the items a `for` loop (or `list()`, `sorted()`...) visits.
pub fn iterate(value: &Value) -> Result<Vec<Value>, Fault> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(dict) => Ok(dict.borrow().keys()),
        other => Err(Fault::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

pub fn dict_from_pairs(pairs: Vec<(Value, Value)>) -> Result<Value, Fault> {
    let mut dict = Dict::default();
    for (key, value) in pairs {
        check_hashable(&key)?;
        dict.insert(key, value);
    }
    Ok(Value::dict(dict))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(binary(BinOp::Add, &int(2), &int(2)).unwrap(), int(4));
        assert_eq!(binary(BinOp::Div, &int(7), &int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(binary(BinOp::Mod, &int(-7), &int(3)).unwrap(), int(2));
        assert_eq!(binary(BinOp::Pow, &int(2), &int(10)).unwrap(), int(1024));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.kind, FaultKind::ZeroDivisionError);
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn test_overflow_is_a_fault() {
        let err = binary(BinOp::Mul, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind, FaultKind::OverflowError);
    }

    #[test]
    fn test_mixed_type_error_message() {
        let err = binary(BinOp::Add, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn test_sequence_ops() {
        assert_eq!(
            binary(BinOp::Mul, &Value::str("ab"), &int(3)).unwrap(),
            Value::str("ababab")
        );
        let joined = binary(
            BinOp::Add,
            &Value::list(vec![int(1)]),
            &Value::list(vec![int(2)]),
        )
        .unwrap();
        assert_eq!(joined.repr(), "[1, 2]");
    }

    #[test]
    fn test_repeating_empty_sequences_is_immediate() {
        let huge = int(1_000_000_000_000_000_000);
        assert_eq!(
            binary(BinOp::Mul, &Value::list(vec![]), &huge).unwrap().repr(),
            "[]"
        );
        assert_eq!(binary(BinOp::Mul, &huge, &Value::str("")).unwrap(), Value::str(""));
        let err = binary(BinOp::Mul, &Value::list(vec![int(1)]), &huge).unwrap_err();
        assert_eq!(err.kind, FaultKind::MemoryError);
    }

    #[test]
    fn test_deep_list_comparison_fails_cleanly() {
        let nest = |levels: usize| {
            let mut value = Value::list(vec![]);
            for _ in 0..levels {
                value = Value::list(vec![value]);
            }
            value
        };
        let (a, b) = (nest(600), nest(600));
        assert_eq!(
            compare(CmpOp::Eq, &a, &b).unwrap_err().kind,
            FaultKind::RecursionError
        );
        assert_eq!(
            compare(CmpOp::Lt, &a, &b).unwrap_err().kind,
            FaultKind::RecursionError
        );
        assert!(compare(CmpOp::Eq, &nest(5), &nest(5)).unwrap());
        assert!(compare(CmpOp::Lt, &nest(5), &nest(6)).unwrap());
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(CmpOp::Lt, &int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &int(1)).unwrap());
        let err = compare(CmpOp::Lt, &Value::str("a"), &int(1)).unwrap_err();
        assert!(err.message.contains("'<' not supported"));
    }

    #[test]
    fn test_indexing() {
        let xs = Value::list(vec![int(10), int(20), int(30)]);
        assert_eq!(get_item(&xs, &int(-1)).unwrap(), int(30));
        assert_eq!(
            get_item(&xs, &int(3)).unwrap_err().kind,
            FaultKind::IndexError
        );
        assert_eq!(get_item(&Value::str("héllo"), &int(1)).unwrap(), Value::str("é"));
        set_item(&xs, int(0), int(11)).unwrap();
        assert_eq!(xs.repr(), "[11, 20, 30]");
    }

    #[test]
    fn test_missing_key_is_key_error() {
        let d = dict_from_pairs(vec![(Value::str("a"), int(1))]).unwrap();
        let err = get_item(&d, &Value::str("b")).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'b'");
    }

    #[test]
    fn test_slicing_clamps() {
        let s = Value::str("hello");
        assert_eq!(slice(&s, Some(&int(1)), Some(&int(100))).unwrap(), Value::str("ello"));
        assert_eq!(slice(&s, Some(&int(-3)), None).unwrap(), Value::str("llo"));
        assert_eq!(slice(&s, Some(&int(4)), Some(&int(1))).unwrap(), Value::str(""));
    }

    #[test]
    fn test_unhashable_key() {
        let err = dict_from_pairs(vec![(Value::list(vec![]), int(1))]).unwrap_err();
        assert_eq!(err.message, "unhashable type: 'list'");
    }
}
