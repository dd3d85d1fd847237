use super::error::{ErrorKind, EvalError, EvalResult};
use crate::frame::{format_float, quote_str, Cell, DataFrame, GroupBy, Series};
use rustpython_parser::ast::Expr;
use indexmap::{IndexMap, IndexSet};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<IndexMap<Key, Value>>>;
pub type SetRef = Rc<RefCell<IndexSet<Key>>>;
pub type FrameRef = Rc<RefCell<DataFrame>>;

const MAX_REPR_DEPTH: usize = 16;
const MAX_COMPARE_DEPTH: usize = 200;

/// Library handles exposed to snippets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Pandas,
    Numpy,
}

impl ModuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Pandas => "pandas",
            ModuleKind::Numpy => "numpy",
        }
    }
}

/// A lambda with the local bindings visible where it was created
#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<(String, Option<Value>)>,
    pub body: Rc<Expr>,
    pub captured: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum Callable {
    Builtin(&'static str),
    Library(ModuleKind, &'static str),
    Method { receiver: Box<Value>, name: String },
    Lambda(Rc<Lambda>),
}

/// Runtime value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(DictRef),
    Set(SetRef),
    Range { start: i64, stop: i64, step: i64 },
    Slice(Rc<[Value; 3]>),
    Frame(FrameRef),
    Series(Rc<Series>),
    GroupBy(Rc<GroupBy>),
    /// `.loc` / `.iloc` on a frame or series
    Indexer { target: Box<Value>, positional: bool },
    /// `.str` accessor of a series
    StrAccessor(Rc<Series>),
    /// Column or row labels
    Index(Rc<Vec<Cell>>),
    Module(ModuleKind),
    Callable(Callable),
    Type(&'static str),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(map: IndexMap<Key, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn set(items: IndexSet<Key>) -> Self {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    pub fn frame(df: DataFrame) -> Self {
        Value::Frame(Rc::new(RefCell::new(df)))
    }

    pub fn series(s: Series) -> Self {
        Value::Series(Rc::new(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range { .. } => "range",
            Value::Slice(_) => "slice",
            Value::Frame(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(g) => {
                if g.is_single() {
                    "SeriesGroupBy"
                } else {
                    "DataFrameGroupBy"
                }
            }
            Value::Indexer { positional: true, .. } => "_iLocIndexer",
            Value::Indexer { .. } => "_LocIndexer",
            Value::StrAccessor(_) => "StringMethods",
            Value::Index(_) => "Index",
            Value::Module(_) => "module",
            Value::Callable(Callable::Lambda(_)) => "function",
            Value::Callable(Callable::Method { .. }) => "method",
            Value::Callable(_) => "builtin_function_or_method",
            Value::Type(_) => "type",
        }
    }

    pub fn truthy(&self) -> EvalResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Range { start, stop, step } => range_count(*start, *stop, *step) > 0,
            Value::Index(labels) => !labels.is_empty(),
            Value::Frame(_) | Value::Series(_) => {
                return Err(EvalError::value_error(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    pub fn from_cell(cell: &Cell) -> Self {
        match cell {
            Cell::Null => Value::Float(f64::NAN),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => Value::Int(*i),
            Cell::Float(x) => Value::Float(*x),
            Cell::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn to_cell(&self) -> EvalResult<Cell> {
        match self {
            Value::None => Ok(Cell::Null),
            Value::Bool(b) => Ok(Cell::Bool(*b)),
            Value::Int(i) => Ok(Cell::Int(*i)),
            Value::Float(x) => Ok(Cell::from_f64(*x)),
            Value::Str(s) => Ok(Cell::Str(s.clone())),
            other => Err(EvalError::type_error(format!(
                "cannot store a '{}' in a table cell",
                other.type_name()
            ))),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Integer view used for indexing and counts
    pub fn as_int(&self) -> EvalResult<i64> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Int(i) => Ok(*i),
            other => Err(EvalError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Python `str()`
    pub fn str_of(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Frame(df) => df.borrow().to_string(),
            Value::Series(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// Python `repr()`; containers already being printed show as `[...]`
    pub fn repr(&self) -> String {
        self.repr_in(&mut Vec::new())
    }

    fn repr_in(&self, active: &mut Vec<*const ()>) -> String {
        if active.len() > MAX_REPR_DEPTH {
            return "...".to_string();
        }
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => format_float(*x),
            Value::Str(s) => quote_str(s),
            Value::List(l) => nested(active, Rc::as_ptr(l) as *const (), "[...]", |active| {
                format!("[{}]", join(l.borrow().iter().map(|v| v.repr_in(active))))
            }),
            Value::Tuple(t) => nested(active, Rc::as_ptr(t) as *const (), "(...)", |active| {
                if t.len() == 1 {
                    format!("({},)", t[0].repr_in(active))
                } else {
                    format!("({})", join(t.iter().map(|v| v.repr_in(active))))
                }
            }),
            Value::Dict(d) => nested(active, Rc::as_ptr(d) as *const (), "{...}", |active| {
                let items = d.borrow().iter().map(|(k, v)| {
                    let key = k.value().repr_in(active);
                    format!("{}: {}", key, v.repr_in(active))
                }).collect::<Vec<_>>();
                format!("{{{}}}", items.join(", "))
            }),
            Value::Set(s) if s.borrow().is_empty() => "set()".to_string(),
            Value::Set(s) => format!(
                "{{{}}}",
                join(s.borrow().iter().map(|k| k.value().repr_in(active)))
            ),
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            Value::Slice(parts) => format!(
                "slice({}, {}, {})",
                parts[0].repr_in(active),
                parts[1].repr_in(active),
                parts[2].repr_in(active)
            ),
            Value::Frame(df) => df.borrow().to_string(),
            Value::Series(s) => s.to_string(),
            Value::GroupBy(_) => format!("<pandas.core.groupby.{} object>", self.type_name()),
            Value::Indexer { .. } => format!("<pandas.core.indexing.{} object>", self.type_name()),
            Value::StrAccessor(_) => "<pandas.core.strings.accessor.StringMethods object>".to_string(),
            Value::Index(labels) => {
                let dtype = crate::frame::DType::infer(labels);
                format!(
                    "Index([{}], dtype='{}')",
                    join(labels.iter().map(Cell::repr)),
                    dtype
                )
            }
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Callable(Callable::Builtin(name)) => format!("<built-in function {}>", name),
            Value::Callable(Callable::Library(m, name)) => {
                format!("<function {}.{}>", m.name(), name)
            }
            Value::Callable(Callable::Method { receiver, name }) => {
                format!("<bound method {}.{}>", receiver.type_name(), name)
            }
            Value::Callable(Callable::Lambda(_)) => "<function <lambda>>".to_string(),
            Value::Type(name) => format!("<class '{}'>", name),
        }
    }
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

fn nested(
    active: &mut Vec<*const ()>,
    ptr: *const (),
    marker: &str,
    body: impl FnOnce(&mut Vec<*const ()>) -> String,
) -> String {
    if active.contains(&ptr) {
        return marker.to_string();
    }
    active.push(ptr);
    let out = body(active);
    active.pop();
    out
}

/// Number of items in a range, without materializing it
pub fn range_count(start: i64, stop: i64, step: i64) -> i128 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / (-step)
    } else {
        0
    }
}

/// Python `len()` of a range
pub fn range_len(v: &Value) -> EvalResult<usize> {
    let Value::Range { start, stop, step } = v else {
        return Ok(0);
    };
    i64::try_from(range_count(*start, *stop, *step))
        .map(|n| n as usize)
        .map_err(|_| {
            EvalError::new(
                ErrorKind::OverflowError,
                "Python int too large to convert to C ssize_t",
            )
        })
}

/// Item `i` of a range
pub fn range_item(start: i64, step: i64, i: usize) -> i64 {
    (start as i128 + step as i128 * i as i128) as i64
}

fn range_eq(a: (i64, i64, i64), b: (i64, i64, i64)) -> bool {
    let len = range_count(a.0, a.1, a.2);
    len == range_count(b.0, b.1, b.2) && (len == 0 || (a.0 == b.0 && (len == 1 || a.2 == b.2)))
}

fn too_deep(what: &str) -> EvalError {
    EvalError::new(
        ErrorKind::RecursionError,
        format!("maximum recursion depth exceeded {}", what),
    )
}

/// Python `==`
pub fn py_eq(a: &Value, b: &Value) -> EvalResult<bool> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> EvalResult<bool> {
    if depth > MAX_COMPARE_DEPTH {
        return Err(too_deep("in comparison"));
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (x, y) if x.is_number() && y.is_number() => match (x, y) {
            (Value::Int(i), Value::Int(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y) || seq_eq(x, y, depth)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                match y.get(k) {
                    Some(w) if eq_at(v, w, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().all(|k| y.contains(k))
        }
        (
            Value::Range { start, stop, step },
            Value::Range {
                start: s2,
                stop: e2,
                step: t2,
            },
        ) => range_eq((*start, *stop, *step), (*s2, *e2, *t2)),
        (Value::Index(x), Value::Index(y)) => x == y,
        (Value::Frame(x), Value::Frame(y)) => Rc::ptr_eq(x, y),
        (Value::Series(x), Value::Series(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::Callable(Callable::Builtin(x)), Value::Callable(Callable::Builtin(y))) => x == y,
        _ => false,
    })
}

fn seq_eq(x: &[Value], y: &[Value], depth: usize) -> EvalResult<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    for (a, b) in x.iter().zip(y) {
        if !eq_at(a, b, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Python ordering for `<`, `sorted`, `min` and `max`
pub fn py_cmp(a: &Value, b: &Value) -> EvalResult<Ordering> {
    cmp_at(a, b, 0)
}

fn cmp_at(a: &Value, b: &Value, depth: usize) -> EvalResult<Ordering> {
    if depth > MAX_COMPARE_DEPTH {
        return Err(too_deep("in comparison"));
    }
    match (a, b) {
        (Value::Int(i), Value::Int(j)) => Ok(i.cmp(j)),
        (x, y) if x.is_number() && y.is_number() => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) if Rc::ptr_eq(x, y) => Ok(Ordering::Equal),
        (Value::List(x), Value::List(y)) => seq_cmp(&x.borrow(), &y.borrow(), depth),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y, depth),
        _ => Err(EvalError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(x: &[Value], y: &[Value], depth: usize) -> EvalResult<Ordering> {
    for (a, b) in x.iter().zip(y) {
        if eq_at(a, b, depth + 1)? {
            continue;
        }
        return cmp_at(a, b, depth + 1);
    }
    Ok(x.len().cmp(&y.len()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NormKey {
    None,
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<NormKey>),
    Type(&'static str),
}

/// A hashable value usable as a dict key or set member
#[derive(Debug, Clone)]
pub struct Key {
    value: Value,
    norm: NormKey,
}

impl Key {
    pub fn new(value: Value) -> EvalResult<Self> {
        let norm = normalize(&value, 0)?;
        Ok(Self { value, norm })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

fn normalize(value: &Value, depth: usize) -> EvalResult<NormKey> {
    if depth > MAX_COMPARE_DEPTH {
        return Err(too_deep("while hashing"));
    }
    Ok(match value {
        Value::None => NormKey::None,
        Value::Bool(b) => NormKey::Int(*b as i64),
        Value::Int(i) => NormKey::Int(*i),
        Value::Float(x) => {
            if x.fract() == 0.0 && x.abs() < 9.0e15 {
                NormKey::Int(*x as i64)
            } else if x.is_nan() {
                NormKey::Float(f64::NAN.to_bits())
            } else {
                NormKey::Float(x.to_bits())
            }
        }
        Value::Str(s) => NormKey::Str(s.clone()),
        Value::Tuple(items) => NormKey::Tuple(
            items
                .iter()
                .map(|item| normalize(item, depth + 1))
                .collect::<EvalResult<_>>()?,
        ),
        Value::Type(name) => NormKey::Type(name),
        other => {
            return Err(EvalError::new(
                ErrorKind::TypeError,
                format!("unhashable type: '{}'", other.type_name()),
            ))
        }
    })
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        let v = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.0)]);
        assert_eq!(v.repr(), "[1, 'a', 2.0]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::set(IndexSet::new()).repr(), "set()");
        assert_eq!(Value::None.str_of(), "None");
        assert_eq!(Value::str("x").str_of(), "x");
    }

    #[test]
    fn test_numeric_keys_unify() {
        let a = Key::new(Value::Int(1)).unwrap();
        let b = Key::new(Value::Float(1.0)).unwrap();
        let c = Key::new(Value::Bool(true)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(Key::new(Value::list(vec![])).is_err());
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(py_eq(&Value::Int(2), &Value::Float(2.0)).unwrap());
        assert!(!py_eq(&Value::str("2"), &Value::Int(2)).unwrap());
        assert_eq!(
            py_cmp(
                &Value::tuple(vec![Value::Int(1), Value::str("b")]),
                &Value::tuple(vec![Value::Int(1), Value::str("a")])
            )
            .unwrap(),
            Ordering::Greater
        );
        assert!(py_cmp(&Value::Int(1), &Value::str("a")).is_err());
    }

    #[test]
    fn test_range_len() {
        let r = |start, stop, step| Value::Range { start, stop, step };
        assert_eq!(range_len(&r(0, 10, 3)).unwrap(), 4);
        assert_eq!(range_len(&r(10, 0, -2)).unwrap(), 5);
        assert_eq!(range_len(&r(5, 0, 1)).unwrap(), 0);
        let err = range_len(&r(-i64::MAX, i64::MAX, 1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
        assert!(r(-i64::MAX, i64::MAX, 1).truthy().unwrap());
    }

    #[test]
    fn test_ranges_compare_without_materializing() {
        let r = |start, stop, step| Value::Range { start, stop, step };
        let huge = 1_000_000_000_000_000_000;
        assert!(py_eq(&r(0, huge, 1), &r(0, huge, 1)).unwrap());
        assert!(!py_eq(&r(0, huge, 1), &r(0, huge, 2)).unwrap());
        assert!(py_eq(&r(0, 1, 1), &r(0, 5, 10)).unwrap());
        assert!(py_eq(&r(5, 0, 1), &r(9, 2, 3)).unwrap());
        assert!(!py_eq(&r(0, 3, 1), &r(1, 4, 1)).unwrap());
    }

    #[test]
    fn test_cyclic_containers() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(l) = &list {
            l.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        assert!(py_eq(&list, &list).unwrap());

        let dict = Value::dict(IndexMap::new());
        if let Value::Dict(d) = &dict {
            d.borrow_mut()
                .insert(Key::new(Value::str("a")).unwrap(), dict.clone());
        }
        assert_eq!(dict.repr(), "{'a': {...}}");
        let copy = Value::dict(IndexMap::from([(
            Key::new(Value::str("a")).unwrap(),
            dict.clone(),
        )]));
        assert!(py_eq(&dict, &copy).unwrap());

        let other = Value::list(vec![Value::Int(1)]);
        if let Value::List(l) = &other {
            l.borrow_mut().push(other.clone());
        }
        let err = py_eq(&list, &other).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
    }

    #[test]
    fn test_frame_truthiness_is_an_error() {
        let v = Value::series(Series::new(None, vec![]));
        assert_eq!(v.truthy().unwrap_err().kind, ErrorKind::ValueError);
    }
}
