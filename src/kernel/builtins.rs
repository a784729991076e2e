//! Builtin functions and the methods of `list`, `dict` and `str`.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::ast::BinOp;
use super::fault::{Fault, FaultKind};
use super::interp::Interpreter;
use super::ops::{self, MAX_SEQUENCE};
use super::value::{Num, Value};

pub type BuiltinFn = fn(&mut Interpreter<'_>, Vec<Value>) -> Result<Value, Fault>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// A method looked up on a value, e.g. `xs.append`.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// Default wait for `http_post` when the caller gives none.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

const BUILTINS: &[Builtin] = &[
    Builtin { name: "print", func: print },
    Builtin { name: "len", func: len },
    Builtin { name: "str", func: str_ },
    Builtin { name: "repr", func: repr },
    Builtin { name: "int", func: int },
    Builtin { name: "float", func: float },
    Builtin { name: "bool", func: bool_ },
    Builtin { name: "type", func: type_ },
    Builtin { name: "range", func: range },
    Builtin { name: "list", func: list },
    Builtin { name: "sorted", func: sorted },
    Builtin { name: "sum", func: sum },
    Builtin { name: "min", func: min },
    Builtin { name: "max", func: max },
    Builtin { name: "abs", func: abs },
    Builtin { name: "http_post", func: http_post },
];

const LIST_METHODS: &[&str] = &["append", "pop", "extend"];
const DICT_METHODS: &[&str] = &["keys", "values", "items", "get"];
const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "split",
    "join",
    "startswith",
    "endswith",
    "replace",
];

pub fn lookup(name: &str) -> Option<Builtin> {
    BUILTINS.iter().find(|b| b.name == name).copied()
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Fault> {
    let given = args.len();
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else if given < min {
        format!("at least {min}")
    } else {
        format!("at most {max}")
    };
    let noun = if min == max && min == 1 { "argument" } else { "arguments" };
    Err(Fault::type_error(format!(
        "{name}() takes {expected} {noun} ({given} given)"
    )))
}

fn single(name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    arity(name, &args, 1, 1)?;
    Ok(args.into_iter().next().unwrap_or(Value::None))
}

fn expect_str<'v>(what: &str, value: &'v Value) -> Result<&'v str, Fault> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Fault::type_error(format!(
            "{what} must be str, not {}",
            other.type_name()
        ))),
    }
}

// ── Functions ───────────────────────────────────────

fn print(interp: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    let mut line = args
        .iter()
        .map(Value::to_text)
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    interp.write(&line);
    Ok(Value::None)
}

fn len(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    let value = single("len", args)?;
    let n = match &value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Dict(dict) => dict.borrow().len(),
        other => {
            return Err(Fault::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn str_(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("str", &args, 0, 1)?;
    Ok(Value::Str(args.first().map(Value::to_text).unwrap_or_default()))
}

fn repr(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(Value::Str(single("repr", args)?.repr()))
}

fn int(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("int", &args, 0, 1)?;
    let Some(value) = args.into_iter().next() else {
        return Ok(Value::Int(0));
    };
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => float_to_int(f),
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                Fault::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    Value::Str(s.clone()).repr()
                ))
            }),
        other => Err(Fault::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Result<Value, Fault> {
    if f.is_nan() {
        return Err(Fault::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Fault::new(
            FaultKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(Fault::overflow());
    }
    Ok(Value::Int(truncated as i64))
}

fn float(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("float", &args, 0, 1)?;
    let Some(value) = args.into_iter().next() else {
        return Ok(Value::Float(0.0));
    };
    if let Some(num) = value.as_num() {
        return Ok(Value::Float(num.as_f64()));
    }
    match &value {
        Value::Str(s) => parse_float(s.trim()).map(Value::Float).ok_or_else(|| {
            Fault::value_error(format!(
                "could not convert string to float: {}",
                value.repr()
            ))
        }),
        other => Err(Fault::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_float(text: &str) -> Option<f64> {
    match text.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        lowered => lowered.parse::<f64>().ok(),
    }
}

fn bool_(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("bool", &args, 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
}

fn type_(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(Value::str(single("type", args)?.type_name()))
}

fn range(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("range", &args, 1, 3)?;
    let mut bounds = Vec::with_capacity(args.len());
    for arg in &args {
        match arg {
            Value::Int(i) => bounds.push(*i),
            Value::Bool(b) => bounds.push(i64::from(*b)),
            other => {
                return Err(Fault::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    other.type_name()
                )))
            }
        }
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(Fault::type_error("range expected at most 3 arguments")),
    };
    if step == 0 {
        return Err(Fault::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        (stop as i128 - start as i128 + step as i128 - 1) / step as i128
    } else {
        (start as i128 - stop as i128 - step as i128 - 1) / -(step as i128)
    };
    let count = span.max(0);
    if count > MAX_SEQUENCE as i128 {
        return Err(Fault::new(FaultKind::MemoryError, "range is too large"));
    }
    // every element lies between start and stop, so it fits an i64
    let items = (0..count)
        .map(|k| {
            i64::try_from(start as i128 + k * step as i128)
                .map(Value::Int)
                .map_err(|_| Fault::overflow())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::list(items))
}

fn list(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("list", &args, 0, 1)?;
    match args.first() {
        Some(value) => Ok(Value::list(ops::iterate(value)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn sort_values(mut items: Vec<Value>) -> Result<Vec<Value>, Fault> {
    let mut failure = None;
    items.sort_by(|a, b| match ops::ordering(a, b) {
        Ok(ord) => ord,
        Err(fault) => {
            failure.get_or_insert(fault);
            Ordering::Equal
        }
    });
    match failure {
        Some(fault) => Err(fault),
        None => Ok(items),
    }
}

fn sorted(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    let value = single("sorted", args)?;
    Ok(Value::list(sort_values(ops::iterate(&value)?)?))
}

fn sum(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("sum", &args, 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(Fault::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in ops::iterate(&args[0])? {
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn extreme(name: &str, args: Vec<Value>, want: Ordering) -> Result<Value, Fault> {
    if args.is_empty() {
        return Err(Fault::type_error(format!(
            "{name} expected at least 1 argument, got 0"
        )));
    }
    let candidates = if args.len() == 1 {
        ops::iterate(&args[0])?
    } else {
        args
    };
    let mut iter = candidates.into_iter();
    let Some(mut best) = iter.next() else {
        return Err(Fault::value_error(format!("{name}() arg is an empty sequence")));
    };
    for item in iter {
        if ops::ordering(&item, &best)? == want {
            best = item;
        }
    }
    Ok(best)
}

fn min(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    extreme("min", args, Ordering::Less)
}

fn max(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    extreme("max", args, Ordering::Greater)
}

fn abs(_: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    let value = single("abs", args)?;
    match value.as_num() {
        Some(Num::Int(i)) => i.checked_abs().map(Value::Int).ok_or_else(Fault::overflow),
        Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(Fault::type_error(format!(
            "bad operand type for abs(): '{}'",
            value.type_name()
        ))),
    }
}

/// `http_post(url, body[, timeout_secs])`
fn http_post(interp: &mut Interpreter<'_>, args: Vec<Value>) -> Result<Value, Fault> {
    arity("http_post", &args, 2, 3)?;
    let url = expect_str("http_post() url", &args[0])?;
    let body = args[1].to_json().ok_or_else(|| {
        Fault::type_error(format!(
            "Object of type {} is not JSON serializable",
            args[1].type_name()
        ))
    })?;
    let timeout = match args.get(2) {
        None | Some(Value::None) => DEFAULT_HTTP_TIMEOUT,
        Some(value) => match value.as_num().map(Num::as_f64) {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map_err(|_| Fault::value_error("timeout is too large"))?,
            _ => return Err(Fault::value_error("timeout must be a positive number")),
        },
    };
    interp.net().post_json(url, &body, timeout)
}

// ── Methods ─────────────────────────────────────────

pub fn bind_method(receiver: &Value, name: &str) -> Result<Value, Fault> {
    let table: &[&'static str] = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Str(_) => STR_METHODS,
        _ => &[],
    };
    match table.iter().find(|m| **m == name) {
        Some(method) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            name: *method,
        }))),
        None => Err(Fault::new(
            FaultKind::AttributeError,
            format!(
                "'{}' object has no attribute '{name}'",
                receiver.type_name()
            ),
        )),
    }
}

pub fn call_method(method: &BoundMethod, args: Vec<Value>) -> Result<Value, Fault> {
    let qualified = format!("{}.{}", method.receiver.type_name(), method.name);
    match &method.receiver {
        Value::List(items) => match method.name {
            "append" => {
                let item = single(&qualified, args)?;
                items.borrow_mut().push(item);
                Ok(Value::None)
            }
            "pop" => {
                arity(&qualified, &args, 0, 1)?;
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    return Err(Fault::index_error("pop from empty list"));
                }
                let len = items.len() as i64;
                let raw = match args.first() {
                    None => -1,
                    Some(Value::Int(i)) => *i,
                    Some(other) => {
                        return Err(Fault::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            other.type_name()
                        )))
                    }
                };
                let idx = if raw < 0 { raw + len } else { raw };
                if !(0..len).contains(&idx) {
                    return Err(Fault::index_error("pop index out of range"));
                }
                Ok(items.remove(idx as usize))
            }
            "extend" => {
                let source = single(&qualified, args)?;
                // snapshot first: `xs.extend(xs)` must not alias the borrow
                let extra = ops::iterate(&source)?;
                items.borrow_mut().extend(extra);
                Ok(Value::None)
            }
            _ => Err(no_attribute(method)),
        },
        Value::Dict(dict) => match method.name {
            "keys" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::list(dict.borrow().keys()))
            }
            "values" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::list(dict.borrow().values()))
            }
            "items" => {
                arity(&qualified, &args, 0, 0)?;
                let pairs = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::list(vec![k.clone(), v.clone()]))
                    .collect();
                Ok(Value::list(pairs))
            }
            "get" => {
                arity(&qualified, &args, 1, 2)?;
                ops::check_hashable(&args[0])?;
                let found = dict.borrow().get(&args[0]);
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
            }
            _ => Err(no_attribute(method)),
        },
        Value::Str(s) => str_method(&qualified, s, method, args),
        _ => Err(no_attribute(method)),
    }
}

fn str_method(
    qualified: &str,
    s: &str,
    method: &BoundMethod,
    args: Vec<Value>,
) -> Result<Value, Fault> {
    match method.name {
        "upper" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "strip" => {
            arity(qualified, &args, 0, 0)?;
            Ok(Value::str(s.trim()))
        }
        "split" => {
            arity(qualified, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = expect_str("separator", sep)?;
                    if sep.is_empty() {
                        return Err(Fault::value_error("empty separator"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            let source = single(qualified, args)?;
            let mut pieces = Vec::new();
            for (i, item) in ops::iterate(&source)?.into_iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece),
                    other => {
                        return Err(Fault::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::Str(pieces.join(s)))
        }
        "startswith" | "endswith" => {
            let affix = single(qualified, args)?;
            let affix = expect_str(qualified, &affix)?;
            let hit = if method.name == "startswith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            };
            Ok(Value::Bool(hit))
        }
        "replace" => {
            arity(qualified, &args, 2, 2)?;
            let old = expect_str("replace() old", &args[0])?;
            let new = expect_str("replace() new", &args[1])?;
            Ok(Value::Str(s.replace(old, new)))
        }
        _ => Err(no_attribute(method)),
    }
}

fn no_attribute(method: &BoundMethod) -> Fault {
    Fault::new(
        FaultKind::AttributeError,
        format!(
            "'{}' object has no attribute '{}'",
            method.receiver.type_name(),
            method.name
        ),
    )
}
