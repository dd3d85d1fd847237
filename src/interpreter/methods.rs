//! Methods of the builtin value types

use super::args::Args;
use super::builtins::sort_values;
use super::error::{ErrorKind, EvalError, EvalResult};
use super::format::str_format;
use super::normalize_index;
use super::value::{py_eq, Key, Value};
use super::Interpreter;
use indexmap::IndexSet;

const STR_METHODS: &[&str] = &[
    "capitalize",
    "casefold",
    "center",
    "count",
    "endswith",
    "find",
    "format",
    "index",
    "isalnum",
    "isalpha",
    "isdecimal",
    "isdigit",
    "islower",
    "isnumeric",
    "isspace",
    "isupper",
    "join",
    "ljust",
    "lower",
    "lstrip",
    "removeprefix",
    "removesuffix",
    "replace",
    "rfind",
    "rjust",
    "rsplit",
    "rstrip",
    "split",
    "splitlines",
    "startswith",
    "strip",
    "title",
    "upper",
    "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];

const SET_METHODS: &[&str] = &[
    "add",
    "clear",
    "copy",
    "difference",
    "discard",
    "intersection",
    "isdisjoint",
    "issubset",
    "issuperset",
    "remove",
    "union",
    "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

pub fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Float(_) => &["is_integer"],
        _ => &[],
    };
    table.contains(&name)
}

pub fn call(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> EvalResult<Value> {
    if !has_method(receiver, name) {
        return Err(EvalError::attribute(receiver.type_name(), name));
    }
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Dict(_) => dict_method(interp, receiver, name, args),
        Value::Set(_) => set_method(interp, receiver, name, args),
        Value::Tuple(items) => sequence_query(items, name, &args, "tuple"),
        Value::Float(x) => Ok(Value::Bool(x.is_finite() && x.fract() == 0.0)),
        other => Err(EvalError::attribute(other.type_name(), name)),
    }
}

fn text_arg(args: &Args, pos: usize, name: &str, method: &str) -> EvalResult<String> {
    match args.required(pos, name, method)? {
        Value::Str(s) => Ok(s.clone()),
        other => Err(EvalError::type_error(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn affixes(value: &Value, method: &str) -> EvalResult<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::Tuple(items) => items
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.clone()),
                other => Err(EvalError::type_error(format!(
                    "tuple for {} must only contain str, not {}",
                    method,
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(EvalError::type_error(format!(
            "{} first arg must be str or a tuple of str, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn strip_chars(s: &str, chars: Option<String>, left: bool, right: bool) -> String {
    let matches = |c: char| match &chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    out.to_string()
}

pub(super) fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}

fn split(s: &str, sep: Option<&str>, maxsplit: i64, from_right: bool) -> Vec<String> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize };
    match sep {
        Some(sep) => {
            let parts: Vec<String> = if from_right {
                let mut parts: Vec<String> = s
                    .rsplitn(limit.saturating_add(1), sep)
                    .map(str::to_string)
                    .collect();
                parts.reverse();
                parts
            } else {
                s.splitn(limit.saturating_add(1), sep)
                    .map(str::to_string)
                    .collect()
            };
            parts
        }
        None => {
            let spans = word_spans(s);
            if spans.len() <= limit.saturating_add(1) {
                return spans.iter().map(|&(a, b)| s[a..b].to_string()).collect();
            }
            if from_right {
                let cut = spans.len() - limit;
                let mut out = vec![s[..spans[cut - 1].1].to_string()];
                out.extend(spans[cut..].iter().map(|&(a, b)| s[a..b].to_string()));
                out
            } else {
                let mut out: Vec<String> =
                    spans[..limit].iter().map(|&(a, b)| s[a..b].to_string()).collect();
                out.push(s[spans[limit].0..].to_string());
                out
            }
        }
    }
}

/// Byte ranges of whitespace-separated words
fn word_spans(s: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in s.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(a)) => {
                spans.push((a, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(a) = start {
        spans.push((a, s.len()));
    }
    spans
}

fn pad_to(s: &str, width: usize, fill: char, align: char) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.to_string();
    }
    let gap = width - len;
    let fills = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match align {
        '<' => format!("{}{}", s, fills(gap)),
        '>' => format!("{}{}", fills(gap), s),
        _ => {
            let left = gap / 2 + (gap & width & 1);
            format!("{}{}{}", fills(left), s, fills(gap - left))
        }
    }
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: Args) -> EvalResult<Value> {
    let text = |v: String| Ok(Value::Str(v));
    let all_chars = |pred: fn(char) -> bool| Ok(Value::Bool(!s.is_empty() && s.chars().all(pred)));
    match name {
        "lower" | "casefold" => text(s.to_lowercase()),
        "upper" => text(s.to_uppercase()),
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.string(0, "chars")?;
            text(strip_chars(s, chars, name != "rstrip", name != "lstrip"))
        }
        "split" | "rsplit" => {
            let sep = args.string(0, "sep")?;
            if sep.as_deref() == Some("") {
                return Err(EvalError::value_error("empty separator"));
            }
            let maxsplit = args.int(1, "maxsplit", -1)?;
            let parts = split(s, sep.as_deref(), maxsplit, name == "rsplit");
            interp.check_len(parts.len())?;
            Ok(Value::list(parts.into_iter().map(Value::Str).collect()))
        }
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "join" => {
            let items = interp.iterate(args.required(0, "iterable", name)?)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.as_str()),
                    other => {
                        return Err(EvalError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            let joined = parts.join(s);
            interp.check_len(joined.len())?;
            text(joined)
        }
        "replace" => {
            let old = text_arg(&args, 0, "old", name)?;
            let new = text_arg(&args, 1, "new", name)?;
            let count = args.int(2, "count", -1)?;
            let out = if count < 0 {
                s.replace(&old, &new)
            } else {
                s.replacen(&old, &new, count as usize)
            };
            interp.check_len(out.len())?;
            text(out)
        }
        "startswith" | "endswith" => {
            let candidates = affixes(args.required(0, "prefix", name)?, name)?;
            let hit = candidates.iter().any(|c| {
                if name == "startswith" {
                    s.starts_with(c.as_str())
                } else {
                    s.ends_with(c.as_str())
                }
            });
            Ok(Value::Bool(hit))
        }
        "removeprefix" => {
            let prefix = text_arg(&args, 0, "prefix", name)?;
            text(s.strip_prefix(prefix.as_str()).unwrap_or(s).to_string())
        }
        "removesuffix" => {
            let suffix = text_arg(&args, 0, "suffix", name)?;
            text(s.strip_suffix(suffix.as_str()).unwrap_or(s).to_string())
        }
        "find" | "rfind" | "index" => {
            let sub = text_arg(&args, 0, "sub", name)?;
            let found = if name == "rfind" { s.rfind(&sub) } else { s.find(&sub) };
            match found {
                Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
                None if name == "index" => Err(EvalError::value_error("substring not found")),
                None => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            let sub = text_arg(&args, 0, "sub", name)?;
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub.as_str()).count()
            };
            Ok(Value::Int(n as i64))
        }
        "title" => text(title_case(s)),
        "capitalize" => {
            let mut chars = s.chars();
            text(match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            })
        }
        "isdigit" | "isdecimal" => all_chars(|c| c.is_ascii_digit()),
        "isnumeric" => all_chars(char::is_numeric),
        "isalpha" => all_chars(char::is_alphabetic),
        "isalnum" => all_chars(char::is_alphanumeric),
        "isspace" => all_chars(char::is_whitespace),
        "isupper" | "islower" => {
            let cased: Vec<char> = s.chars().filter(|c| c.is_alphabetic()).collect();
            let upper = name == "isupper";
            Ok(Value::Bool(
                !cased.is_empty()
                    && cased
                        .iter()
                        .all(|c| if upper { !c.is_lowercase() } else { !c.is_uppercase() }),
            ))
        }
        "zfill" => {
            let width = args.int(0, "width", 0)?.max(0) as usize;
            interp.check_len(width)?;
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            let len = s.chars().count();
            let zeros = "0".repeat(width.saturating_sub(len));
            text(format!("{}{}{}", sign, zeros, digits))
        }
        "center" | "ljust" | "rjust" => {
            let width = args.int(0, "width", 0)?.max(0) as usize;
            interp.check_len(width)?;
            let fill = match args.string(1, "fillchar")? {
                Some(f) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
                Some(_) => {
                    return Err(EvalError::type_error(
                        "The fill character must be exactly one character long",
                    ))
                }
                None => ' ',
            };
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            text(pad_to(s, width, fill, align))
        }
        "format" => {
            let out = str_format(s, &args, interp.limits.max_collection_len)?;
            interp.check_len(out.len())?;
            text(out)
        }
        _ => Err(EvalError::attribute("str", name)),
    }
}

fn sequence_query(items: &[Value], name: &str, args: &Args, kind: &str) -> EvalResult<Value> {
    let needle = args.required(0, "value", name)?;
    match name {
        "count" => {
            let mut n = 0;
            for v in items {
                if py_eq(v, needle)? {
                    n += 1;
                }
            }
            Ok(Value::Int(n))
        }
        _ => position_of(items, needle)?
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| {
                EvalError::value_error(format!("{}.index(x): x not in {}", kind, kind))
            }),
    }
}

fn position_of(items: &[Value], needle: &Value) -> EvalResult<Option<usize>> {
    for (i, v) in items.iter().enumerate() {
        if py_eq(v, needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn list_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> EvalResult<Value> {
    let Value::List(list) = receiver else {
        return Err(EvalError::attribute(receiver.type_name(), name));
    };
    match name {
        "append" => {
            let item = args.required(0, "object", name)?.clone();
            let len = list.borrow().len();
            interp.check_len(len + 1)?;
            list.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            let extra = interp.iterate(args.required(0, "iterable", name)?)?;
            let len = list.borrow().len();
            interp.check_len(len + extra.len())?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let index = args.required(0, "index", name)?.as_int()?;
            let item = args.required(1, "object", name)?.clone();
            let len = list.borrow().len();
            interp.check_len(len + 1)?;
            let n = len as i64;
            let pos = if index < 0 { (index + n).max(0) } else { index.min(n) };
            list.borrow_mut().insert(pos as usize, item);
            Ok(Value::None)
        }
        "pop" => {
            let len = list.borrow().len();
            if len == 0 {
                return Err(EvalError::new(ErrorKind::IndexError, "pop from empty list"));
            }
            let pos = normalize_index(args.int(0, "index", -1)?, len, "pop")?;
            Ok(list.borrow_mut().remove(pos))
        }
        "remove" => {
            let needle = args.required(0, "value", name)?;
            let pos = position_of(&list.borrow(), needle)?;
            match pos {
                Some(pos) => {
                    list.borrow_mut().remove(pos);
                    Ok(Value::None)
                }
                None => Err(EvalError::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => {
            let items = list.borrow().clone();
            sequence_query(&items, name, &args, "list")
        }
        "sort" => {
            let items = list.borrow().clone();
            let key = args.given(usize::MAX, "key").cloned();
            let reverse = args.kw_flag("reverse", false)?;
            let sorted = sort_values(interp, items, key.as_ref(), reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(list.borrow().clone())),
        "clear" => {
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(EvalError::attribute("list", name)),
    }
}

fn dict_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> EvalResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(EvalError::attribute(receiver.type_name(), name));
    };
    match name {
        "get" => {
            let key = Key::new(args.required(0, "key", name)?.clone())?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            Ok(dict.borrow().get(&key).cloned().unwrap_or(default))
        }
        "keys" => Ok(Value::list(
            dict.borrow().keys().map(|k| k.value().clone()).collect(),
        )),
        "values" => Ok(Value::list(dict.borrow().values().cloned().collect())),
        "items" => Ok(Value::list(
            dict.borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.value().clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            let raw = args.required(0, "key", name)?;
            let key = Key::new(raw.clone())?;
            let removed = dict.borrow_mut().shift_remove(&key);
            match (removed, args.get(1, "default")) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(EvalError::new(ErrorKind::KeyError, raw.repr())),
            }
        }
        "setdefault" => {
            let key = Key::new(args.required(0, "key", name)?.clone())?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            let len = dict.borrow().len();
            interp.check_len(len + 1)?;
            Ok(dict.borrow_mut().entry(key).or_insert(default).clone())
        }
        "update" => {
            let mut pairs = Vec::new();
            match args.positional.first() {
                Some(Value::Dict(other)) => {
                    pairs.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(iterable) => {
                    for item in interp.iterate(iterable)? {
                        let pair = interp.iterate(&item)?;
                        let [k, v] = <[Value; 2]>::try_from(pair).map_err(|_| {
                            EvalError::value_error("dictionary update sequence element has wrong length")
                        })?;
                        pairs.push((Key::new(k)?, v));
                    }
                }
                None => {}
            }
            for (k, v) in &args.keywords {
                pairs.push((Key::new(Value::Str(k.clone()))?, v.clone()));
            }
            let len = dict.borrow().len();
            interp.check_len(len + pairs.len())?;
            dict.borrow_mut().extend(pairs);
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(dict.borrow().clone())),
        "clear" => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(EvalError::attribute("dict", name)),
    }
}

fn key_set(interp: &mut Interpreter, value: &Value) -> EvalResult<IndexSet<Key>> {
    match value {
        Value::Set(s) => Ok(s.borrow().clone()),
        other => interp.iterate(other)?.into_iter().map(Key::new).collect(),
    }
}

fn set_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> EvalResult<Value> {
    let Value::Set(set) = receiver else {
        return Err(EvalError::attribute(receiver.type_name(), name));
    };
    match name {
        "add" => {
            let key = Key::new(args.required(0, "object", name)?.clone())?;
            let len = set.borrow().len();
            interp.check_len(len + 1)?;
            set.borrow_mut().insert(key);
            Ok(Value::None)
        }
        "remove" | "discard" => {
            let raw = args.required(0, "object", name)?;
            let removed = set.borrow_mut().shift_remove(&Key::new(raw.clone())?);
            if !removed && name == "remove" {
                return Err(EvalError::new(ErrorKind::KeyError, raw.repr()));
            }
            Ok(Value::None)
        }
        "update" => {
            for other in &args.positional {
                let extra = key_set(interp, other)?;
                set.borrow_mut().extend(extra);
            }
            let len = set.borrow().len();
            interp.check_len(len)?;
            Ok(Value::None)
        }
        "union" | "intersection" | "difference" => {
            let mut out = set.borrow().clone();
            for other in &args.positional {
                let other = key_set(interp, other)?;
                out = match name {
                    "union" => out.union(&other).cloned().collect(),
                    "intersection" => out.intersection(&other).cloned().collect(),
                    _ => out.difference(&other).cloned().collect(),
                };
            }
            Ok(Value::set(out))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            let other = key_set(interp, args.required(0, "other", name)?)?;
            let mine = set.borrow();
            Ok(Value::Bool(match name {
                "issubset" => mine.is_subset(&other),
                "issuperset" => mine.is_superset(&other),
                _ => mine.is_disjoint(&other),
            }))
        }
        "copy" => Ok(Value::set(set.borrow().clone())),
        "clear" => {
            set.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(EvalError::attribute("set", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_variants() {
        assert_eq!(split("a,b,,c", Some(","), -1, false), vec!["a", "b", "", "c"]);
        assert_eq!(split("  a  b c ", None, -1, false), vec!["a", "b", "c"]);
        assert_eq!(split("a b c", None, 1, false), vec!["a", "b c"]);
        assert_eq!(split("a-b-c", Some("-"), 1, true), vec!["a-b", "c"]);
    }

    #[test]
    fn test_text_helpers() {
        assert_eq!(title_case("north WEST-region"), "North West-Region");
        assert_eq!(strip_chars("xxhixx", Some("x".into()), true, false), "hixx");
        assert_eq!(pad_to("ab", 5, '*', '>'), "***ab");
        assert_eq!(pad_to("ab", 6, ' ', '^'), "  ab  ");
    }

    #[test]
    fn test_method_tables() {
        assert!(has_method(&Value::str("x"), "upper"));
        assert!(has_method(&Value::list(vec![]), "append"));
        assert!(!has_method(&Value::list(vec![]), "upper"));
        assert!(has_method(&Value::Float(1.0), "is_integer"));
        assert!(!has_method(&Value::Int(1), "is_integer"));
    }
}
