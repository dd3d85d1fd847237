use super::args::Args;
use super::error::{ErrorKind, EvalError, EvalResult};
use super::value::{py_cmp, Callable, Key, ModuleKind, Value};
use super::Interpreter;
use crate::frame::round_float;
use crate::syntax::BinOp;
use indexmap::{IndexMap, IndexSet};
use std::cmp::Ordering;

/// Builtins the interpreter knows how to run; the policy decides which are visible
pub const BUILTINS: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "dict",
    "enumerate",
    "filter",
    "float",
    "int",
    "isinstance",
    "len",
    "list",
    "map",
    "max",
    "min",
    "print",
    "range",
    "reversed",
    "round",
    "set",
    "sorted",
    "str",
    "sum",
    "tuple",
    "type",
    "zip",
];

const TYPE_NAMES: &[&str] = &["bool", "dict", "float", "int", "list", "set", "str", "tuple"];

pub fn resolve(name: &str) -> Option<Value> {
    if let Some(ty) = TYPE_NAMES.iter().find(|t| **t == name) {
        return Some(Value::Type(*ty));
    }
    BUILTINS
        .iter()
        .find(|b| **b == name)
        .map(|b| Value::Callable(Callable::Builtin(*b)))
}

pub fn call(interp: &mut Interpreter, name: &str, args: Args) -> EvalResult<Value> {
    match name {
        "abs" => abs(interp, args),
        "all" | "any" => {
            let items = interp.iterate(args.required(0, "iterable", name)?)?;
            let want = name == "any";
            for item in items {
                if item.truthy()? == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        "bool" => Ok(Value::Bool(match args.get(0, "x") {
            Some(v) => v.truthy()?,
            None => false,
        })),
        "dict" => dict(interp, args),
        "enumerate" => {
            let items = interp.iterate(args.required(0, "iterable", name)?)?;
            let start = args.int(1, "start", 0)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start.saturating_add(i as i64)), v]))
                    .collect(),
            ))
        }
        "filter" => {
            let func = args.required(0, "function", name)?.clone();
            let items = interp.iterate(args.required(1, "iterable", name)?)?;
            let mut out = Vec::new();
            for item in items {
                interp.tick()?;
                let keep = match &func {
                    Value::None => item.truthy()?,
                    f => interp.call1(f, item.clone())?.truthy()?,
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        "float" => to_float(args.get(0, "x")),
        "int" => to_int(args.get(0, "x"), args.get(1, "base")),
        "isinstance" => {
            let value = args.required(0, "obj", name)?;
            let class = args.required(1, "class_or_tuple", name)?;
            Ok(Value::Bool(isinstance(value, class)?))
        }
        "len" => Ok(Value::Int(len(args.required(0, "obj", name)?)? as i64)),
        "list" => Ok(Value::list(match args.get(0, "iterable") {
            Some(v) => interp.iterate(v)?,
            None => Vec::new(),
        })),
        "map" => {
            let func = args.required(0, "function", name)?.clone();
            if args.len() < 2 {
                return Err(EvalError::type_error("map() must have at least two arguments."));
            }
            let columns = args.positional[1..]
                .iter()
                .map(|v| interp.iterate(v))
                .collect::<EvalResult<Vec<_>>>()?;
            let n = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                interp.tick()?;
                let call_args = columns.iter().map(|c| c[i].clone()).collect();
                out.push(interp.call_value(&func, Args::positional(call_args))?);
            }
            Ok(Value::list(out))
        }
        "max" | "min" => extreme(interp, name, args),
        "print" => {
            let sep = args.string(usize::MAX, "sep")?.unwrap_or_else(|| " ".to_string());
            let end = args.string(usize::MAX, "end")?.unwrap_or_else(|| "\n".to_string());
            let line = args
                .positional
                .iter()
                .map(Value::str_of)
                .collect::<Vec<_>>()
                .join(&sep);
            interp.print(&format!("{}{}", line, end));
            Ok(Value::None)
        }
        "range" => range(args),
        "reversed" => {
            let mut items = interp.iterate(args.required(0, "sequence", name)?)?;
            items.reverse();
            Ok(Value::list(items))
        }
        "round" => round(interp, args),
        "set" => {
            let items = match args.get(0, "iterable") {
                Some(v) => interp.iterate(v)?,
                None => Vec::new(),
            };
            Ok(Value::set(
                items
                    .into_iter()
                    .map(Key::new)
                    .collect::<EvalResult<IndexSet<Key>>>()?,
            ))
        }
        "sorted" => {
            let items = interp.iterate(args.required(0, "iterable", name)?)?;
            let key = args.given(usize::MAX, "key").cloned();
            let reverse = args.kw_flag("reverse", false)?;
            Ok(Value::list(sort_values(interp, items, key.as_ref(), reverse)?))
        }
        "str" => Ok(Value::Str(match args.get(0, "object") {
            Some(v) => v.str_of(),
            None => String::new(),
        })),
        "sum" => sum(interp, args),
        "tuple" => Ok(Value::tuple(match args.get(0, "iterable") {
            Some(v) => interp.iterate(v)?,
            None => Vec::new(),
        })),
        "type" => {
            if args.len() != 1 {
                return Err(EvalError::unsupported("type() with more than one argument"));
            }
            Ok(Value::Type(args.positional[0].type_name()))
        }
        "zip" => {
            let columns = args
                .positional
                .iter()
                .map(|v| interp.iterate(v))
                .collect::<EvalResult<Vec<_>>>()?;
            let n = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..n)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        other => Err(EvalError::type_error(format!(
            "cannot create '{}' instances",
            other
        ))),
    }
}

fn abs(interp: &mut Interpreter, args: Args) -> EvalResult<Value> {
    let value = args.required(0, "x", "abs")?;
    match value {
        Value::Int(i) => Ok(i
            .checked_abs()
            .map(Value::Int)
            .unwrap_or(Value::Float((*i as f64).abs()))),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        Value::Series(_) | Value::Frame(_) => interp.call_method(value, "abs", Args::default()),
        other => Err(EvalError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn dict(interp: &mut Interpreter, args: Args) -> EvalResult<Value> {
    let mut map: IndexMap<Key, Value> = IndexMap::new();
    match args.positional.first() {
        None => {}
        Some(Value::Dict(d)) => {
            for (k, v) in d.borrow().iter() {
                map.insert(k.clone(), v.clone());
            }
        }
        Some(Value::Series(s)) => {
            for (label, value) in s.items() {
                map.insert(Key::new(Value::from_cell(&label))?, Value::from_cell(&value));
            }
        }
        Some(iterable) => {
            for (i, item) in interp.iterate(iterable)?.into_iter().enumerate() {
                let pair = interp.iterate(&item)?;
                if pair.len() != 2 {
                    return Err(EvalError::value_error(format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        i,
                        pair.len()
                    )));
                }
                let mut pair = pair.into_iter();
                if let (Some(k), Some(v)) = (pair.next(), pair.next()) {
                    map.insert(Key::new(k)?, v);
                }
            }
        }
    }
    for (k, v) in args.keywords {
        map.insert(Key::new(Value::Str(k))?, v);
    }
    interp.check_len(map.len())?;
    Ok(Value::dict(map))
}

pub fn to_float(value: Option<&Value>) -> EvalResult<Value> {
    match value {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let text = s.trim().replace('_', "");
            text.parse::<f64>().map(Value::Float).map_err(|_| {
                EvalError::value_error(format!(
                    "could not convert string to float: {}",
                    Value::Str(s.clone()).repr()
                ))
            })
        }
        Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
            EvalError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

pub fn to_int(value: Option<&Value>, base: Option<&Value>) -> EvalResult<Value> {
    match value {
        None => Ok(Value::Int(0)),
        Some(Value::Str(s)) => {
            let radix = match base {
                Some(b) => b.as_int()? as u32,
                None => 10,
            };
            if !(2..=36).contains(&radix) {
                return Err(EvalError::value_error("int() base must be >= 2 and <= 36, or 0"));
            }
            let text = s.trim().replace('_', "");
            i64::from_str_radix(&text, radix).map(Value::Int).map_err(|_| {
                EvalError::value_error(format!(
                    "invalid literal for int() with base {}: {}",
                    radix,
                    Value::Str(s.clone()).repr()
                ))
            })
        }
        Some(Value::Float(x)) => {
            if x.is_nan() {
                return Err(EvalError::value_error("cannot convert float NaN to integer"));
            }
            if x.is_infinite() {
                return Err(EvalError::new(
                    ErrorKind::ValueError,
                    "cannot convert float infinity to integer",
                ));
            }
            let t = x.trunc();
            if t.abs() >= 9.2e18 {
                return Err(EvalError::value_error("integer is too large"));
            }
            Ok(Value::Int(t as i64))
        }
        Some(v @ (Value::Int(_) | Value::Bool(_))) => Ok(Value::Int(v.as_int()?)),
        Some(v) => Err(EvalError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            v.type_name()
        ))),
    }
}

fn isinstance(value: &Value, class: &Value) -> EvalResult<bool> {
    match class {
        Value::Tuple(classes) => {
            for c in classes.iter() {
                if isinstance(value, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Type(name) => Ok(value.type_name() == *name
            || (*name == "int" && matches!(value, Value::Bool(_)))),
        Value::Callable(Callable::Library(ModuleKind::Pandas, "DataFrame")) => {
            Ok(matches!(value, Value::Frame(_)))
        }
        Value::Callable(Callable::Library(ModuleKind::Pandas, "Series")) => {
            Ok(matches!(value, Value::Series(_)))
        }
        _ => Err(EvalError::type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

pub fn len(value: &Value) -> EvalResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        Value::Dict(d) => d.borrow().len(),
        Value::Set(s) => s.borrow().len(),
        Value::Range { .. } => super::value::range_len(value)?,
        Value::Frame(df) => df.borrow().n_rows(),
        Value::Series(s) => s.len(),
        Value::Index(labels) => labels.len(),
        Value::GroupBy(g) => g.ngroups()?,
        other => {
            return Err(EvalError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

fn extreme(interp: &mut Interpreter, name: &str, args: Args) -> EvalResult<Value> {
    let items = match args.positional.as_slice() {
        [] => {
            return Err(EvalError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        [single @ (Value::Series(_) | Value::Frame(_))] => {
            return interp.call_method(single, name, Args::default())
        }
        [single] => interp.iterate(single)?,
        many => many.to_vec(),
    };
    let key = args.given(usize::MAX, "key").cloned();
    if items.is_empty() {
        return args.kw("default").cloned().ok_or_else(|| {
            EvalError::value_error(format!("{}() arg is an empty sequence", name))
        });
    }
    let want = if name == "max" {
        Ordering::Greater
    } else {
        Ordering::Less
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => {
                interp.tick()?;
                interp.call1(f, item.clone())?
            }
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => py_cmp(&k, best_key)? == want,
        };
        if replace {
            best = Some((k, item));
        }
    }
    Ok(best.map(|(_, v)| v).unwrap_or(Value::None))
}

fn range(args: Args) -> EvalResult<Value> {
    let ints = args
        .positional
        .iter()
        .map(Value::as_int)
        .collect::<EvalResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(EvalError::type_error(format!(
                "range expected at most 3 arguments, got {}",
                ints.len()
            )))
        }
    };
    if step == 0 {
        return Err(EvalError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range { start, stop, step })
}

fn round(interp: &mut Interpreter, args: Args) -> EvalResult<Value> {
    let value = args.required(0, "number", "round")?;
    let digits = args.given(1, "ndigits");
    match value {
        Value::Series(_) | Value::Frame(_) => {
            let rest = Args::positional(digits.cloned().into_iter().collect());
            interp.call_method(value, "round", rest)
        }
        Value::Int(_) | Value::Bool(_) => {
            let n = value.as_int()?;
            match digits {
                Some(d) if d.as_int()? < 0 => {
                    let factor = 10f64.powi(-d.as_int()? as i32);
                    Ok(Value::Int((round_float(n as f64 / factor, 0) * factor) as i64))
                }
                _ => Ok(Value::Int(n)),
            }
        }
        Value::Float(x) => match digits {
            Some(d) => Ok(Value::Float(round_float(*x, d.as_int()? as i32))),
            None => to_int(Some(&Value::Float(round_float(*x, 0))), None),
        },
        other => Err(EvalError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn sum(interp: &mut Interpreter, args: Args) -> EvalResult<Value> {
    let iterable = args.required(0, "iterable", "sum")?;
    if matches!(iterable, Value::Series(_) | Value::Frame(_)) {
        return interp.call_method(iterable, "sum", Args::default());
    }
    let mut acc = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    if matches!(acc, Value::Str(_)) {
        return Err(EvalError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in interp.iterate(iterable)? {
        acc = interp.binary(acc, BinOp::Add, item)?;
    }
    Ok(acc)
}

/// Stable sort with an optional key function
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> EvalResult<Vec<Value>> {
    let keys = match key {
        Some(f) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                interp.tick()?;
                keys.push(interp.call1(f, item.clone())?);
            }
            keys
        }
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match py_cmp(&keys[a], &keys[b]) {
        Ok(ord) if reverse => ord.reverse(),
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert!(matches!(to_int(Some(&Value::str(" 42 ")), None).unwrap(), Value::Int(42)));
        assert!(matches!(to_int(Some(&Value::Float(-3.9)), None).unwrap(), Value::Int(-3)));
        assert!(to_int(Some(&Value::str("4.5")), None).is_err());
        assert!(to_int(Some(&Value::Float(f64::NAN)), None).is_err());
        assert!(matches!(to_float(Some(&Value::str("1e3"))).unwrap(), Value::Float(x) if x == 1000.0));
        assert!(to_float(Some(&Value::str("abc"))).is_err());
    }

    #[test]
    fn test_isinstance() {
        let int = Value::Type("int");
        assert!(isinstance(&Value::Bool(true), &int).unwrap());
        assert!(!isinstance(&Value::Float(1.0), &int).unwrap());
        let either = Value::tuple(vec![Value::Type("int"), Value::Type("float")]);
        assert!(isinstance(&Value::Float(1.0), &either).unwrap());
        assert!(isinstance(&Value::Int(1), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_resolve() {
        assert!(matches!(resolve("int"), Some(Value::Type("int"))));
        assert!(matches!(resolve("len"), Some(Value::Callable(Callable::Builtin("len")))));
        assert!(resolve("open").is_none());
    }

    #[test]
    fn test_len() {
        assert_eq!(len(&Value::str("héllo")).unwrap(), 5);
        assert!(len(&Value::Int(3)).is_err());
    }
}
