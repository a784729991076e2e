//! Runtime values of the kernel language.
//!
//! Lists and dicts are shared, mutable references (`Rc<RefCell<..>>`), so
//! `b = a; b.append(1)` is visible through `a`. The kernel runs on a single
//! worker thread, which is why `Rc` is sufficient.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use super::ast::FunctionDef;
use super::builtins::{Builtin, BoundMethod};
use super::fault::{Fault, FaultKind};

/// Containers nested deeper than this are elided by `repr`, have no JSON
/// form, and cannot be compared.
pub const MAX_DEPTH: usize = 500;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Dict>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Function(Rc<FunctionDef>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
}

/// Numeric view of a value (`bool` counts as an integer).
#[derive(Debug, Clone, Copy)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) => true,
        }
    }

    /// Textual form used by `str()` and `print`.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Default textual representation (`repr()`), also used for auto-print
    /// and variable summaries.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    fn write_repr(&self, out: &mut String, seen: &mut Vec<*const ()>) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.len() >= MAX_DEPTH || seen.contains(&ptr) {
                    out.push_str("[...]");
                    return;
                }
                seen.push(ptr);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, seen);
                }
                out.push(']');
                seen.pop();
            }
            Value::Dict(dict) => {
                let ptr = Rc::as_ptr(dict) as *const ();
                if seen.len() >= MAX_DEPTH || seen.contains(&ptr) {
                    out.push_str("{...}");
                    return;
                }
                seen.push(ptr);
                out.push('{');
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, seen);
                    out.push_str(": ");
                    value.write_repr(out, seen);
                }
                out.push('}');
                seen.pop();
            }
            Value::Function(def) => out.push_str(&format!("<function {}>", def.name)),
            Value::Builtin(builtin) => {
                out.push_str(&format!("<built-in function {}>", builtin.name))
            }
            Value::Method(method) => out.push_str(&format!(
                "<bound method {}.{}>",
                method.receiver.type_name(),
                method.name
            )),
        }
    }

    /// Lossless JSON encoding. `None` when the value (or anything inside
    /// it) has no JSON form: callables, non-finite floats, cycles, nesting
    /// past [`MAX_DEPTH`].
    pub fn to_json(&self) -> Option<Json> {
        self.to_json_inner(&mut Vec::new())
    }

    fn to_json_inner(&self, seen: &mut Vec<*const ()>) -> Option<Json> {
        match self {
            Value::None => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Int(i) => Some(Json::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number),
            Value::Str(s) => Some(Json::String(s.clone())),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.len() >= MAX_DEPTH || seen.contains(&ptr) {
                    return None;
                }
                seen.push(ptr);
                let encoded = items
                    .borrow()
                    .iter()
                    .map(|item| item.to_json_inner(seen))
                    .collect::<Option<Vec<_>>>();
                seen.pop();
                encoded.map(Json::Array)
            }
            Value::Dict(dict) => {
                let ptr = Rc::as_ptr(dict) as *const ();
                if seen.len() >= MAX_DEPTH || seen.contains(&ptr) {
                    return None;
                }
                seen.push(ptr);
                let mut map = serde_json::Map::new();
                let mut ok = true;
                for (key, value) in dict.borrow().iter() {
                    match (json_key(key), value.to_json_inner(seen)) {
                        (Some(k), Some(v)) => {
                            map.insert(k, v);
                        }
                        _ => {
                            ok = false;
                            break;
                        }
                    }
                }
                seen.pop();
                ok.then_some(Json::Object(map))
            }
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) => None,
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut dict = Dict::default();
                for (key, value) in map {
                    dict.insert(Value::Str(key.clone()), Value::from_json(value));
                }
                Value::dict(dict)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

/// Dict keys as JSON object keys, the way JSON encoders stringify scalars.
fn json_key(key: &Value) -> Option<String> {
    match key {
        Value::Str(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() => Some(format_float(*f)),
        Value::Bool(b) => Some(b.to_string()),
        Value::None => Some("null".to_string()),
        _ => None,
    }
}

/// Equality for contexts that cannot fail, such as dict key lookup.
/// Comparisons too deep to finish count as unequal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    try_equal(a, b).unwrap_or(false)
}

/// Structural equality, failing with `RecursionError` when both sides nest
/// past [`MAX_DEPTH`].
pub fn try_equal(a: &Value, b: &Value) -> Result<bool, Fault> {
    equal_at(a, b, 0)
}

fn equal_at(a: &Value, b: &Value, depth: usize) -> Result<bool, Fault> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return Ok(match (x, y) {
            (Num::Int(i), Num::Int(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        });
    }
    match (a, b) {
        (Value::None, Value::None) => Ok(true),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            check_depth(depth)?;
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (p, q) in x.iter().zip(y.iter()) {
                if !equal_at(p, q, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            check_depth(depth)?;
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                match y.get(k) {
                    Some(other) if equal_at(v, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Function(x), Value::Function(y)) => Ok(Rc::ptr_eq(x, y)),
        (Value::Builtin(x), Value::Builtin(y)) => Ok(x.name == y.name),
        _ => Ok(false),
    }
}

pub fn check_depth(depth: usize) -> Result<(), Fault> {
    if depth >= MAX_DEPTH {
        return Err(Fault::new(
            FaultKind::RecursionError,
            "maximum recursion depth exceeded in comparison",
        ));
    }
    Ok(())
}

/// Drops `value` without recursing into nested containers.
///
/// Plain `drop` of a list nested a million levels deep recurses once per
/// level. This unpacks every container whose last reference is being
/// released onto a worklist instead.
pub fn dispose(value: Value) {
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        match value {
            Value::List(items) => {
                if let Ok(cell) = Rc::try_unwrap(items) {
                    pending.extend(cell.into_inner());
                }
            }
            Value::Dict(dict) => {
                if let Ok(cell) = Rc::try_unwrap(dict) {
                    for (key, value) in cell.into_inner().entries {
                        pending.push(key);
                        pending.push(value);
                    }
                }
            }
            Value::Method(method) => {
                if let Ok(method) = Rc::try_unwrap(method) {
                    pending.push(method.receiver);
                }
            }
            _ => {}
        }
    }
}

/// Python-style float formatting: shortest round-trip digits, always with
/// a decimal point or exponent.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{f:e}");
        if let Some((mantissa, exp)) = sci.split_once('e') {
            if let Ok(exp) = exp.parse::<i32>() {
                let sign = if exp < 0 { '-' } else { '+' };
                return format!("{mantissa}e{sign}{:02}", exp.abs());
            }
        }
        return sci;
    }
    let plain = format!("{f}");
    if plain.contains('.') {
        plain
    } else {
        format!("{plain}.0")
    }
}

/// Quotes a string the way `repr()` does.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let code = c as u32;
                if code <= 0xff {
                    out.push_str(&format!("\\x{code:02x}"));
                } else {
                    out.push_str(&format!("\\u{code:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Insertion-ordered dictionary with scalar keys.
///
/// Lookups are linear; kernel dicts are small and ordering is observable.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| values_equal(k, key))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.position(key).map(|idx| self.entries[idx].1.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    /// Replaces in place when the key exists, otherwise appends.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}
