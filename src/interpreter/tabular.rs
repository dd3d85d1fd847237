//! Operators, attributes and indexing for frames, series and group-bys

use super::args::{cells_of, labels_of, Args};
use super::error::{ErrorKind, EvalError, EvalResult};
use super::value::{range_item, range_len, Callable, FrameRef, Value};
use super::{arith_op, frame_methods, normalize_index, series_methods, slice_bounds, Interpreter};
use crate::frame::{
    mask_positions, slice_indices, Aggregated, Cell, CmpKind, DataFrame, FrameResult, GroupBy,
    Index, Series,
};
use crate::syntax::{BinOp, CmpOp, UnaryOp};
use std::rc::Rc;

pub fn is_tabular(value: &Value) -> bool {
    matches!(
        value,
        Value::Frame(_)
            | Value::Series(_)
            | Value::GroupBy(_)
            | Value::StrAccessor(_)
            | Value::Index(_)
            | Value::Indexer { .. }
    )
}

/// Values that broadcast through operators
pub fn is_vector(value: &Value) -> bool {
    matches!(value, Value::Frame(_) | Value::Series(_))
}

fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Frame(_) => frame_methods::FRAME_METHODS,
        Value::GroupBy(_) => frame_methods::GROUPBY_METHODS,
        Value::Series(_) => series_methods::SERIES_METHODS,
        Value::StrAccessor(_) => series_methods::STR_METHODS,
        Value::Index(_) => series_methods::INDEX_METHODS,
        _ => &[],
    };
    table.contains(&name)
}

/// Convert a group-by result into a value
pub(crate) fn aggregated(result: Aggregated) -> Value {
    match result {
        Aggregated::Frame(df) => Value::frame(df),
        Aggregated::Series(s) => Value::series(s),
    }
}

/// Rebuild a frame by transforming every column
pub(crate) fn map_columns(
    df: &DataFrame,
    mut f: impl FnMut(&Series) -> EvalResult<Series>,
) -> EvalResult<DataFrame> {
    let mut columns = Vec::with_capacity(df.n_cols());
    for name in df.column_names() {
        let out = f(&df.column(&name)?)?;
        columns.push((name, out.values()));
    }
    Ok(DataFrame::with_index(df.index.clone(), columns)?)
}

/// Lists and tuples become series sharing `index`
fn as_series(value: &Value, index: &Index) -> EvalResult<Option<Series>> {
    match value {
        Value::Series(s) => Ok(Some((**s).clone())),
        Value::List(_) | Value::Tuple(_) => {
            let cells = cells_of(value)?;
            if cells.len() != index.len() {
                return Err(EvalError::value_error(format!(
                    "Lengths must match to compare ({} vs {})",
                    index.len(),
                    cells.len()
                )));
            }
            Ok(Some(Series::with_index(None, index.clone(), cells)))
        }
        _ => Ok(None),
    }
}

fn index_of(value: &Value) -> Option<Index> {
    match value {
        Value::Series(s) => Some(s.index.clone()),
        Value::Frame(df) => Some(df.borrow().index.clone()),
        _ => None,
    }
}

pub fn binary(interp: &mut Interpreter, left: &Value, op: BinOp, right: &Value) -> EvalResult<Value> {
    if let Value::Frame(df) = left {
        let df = df.borrow().clone();
        return frame_binary(interp, &df, op, right, false);
    }
    if let Value::Frame(df) = right {
        let df = df.borrow().clone();
        return frame_binary(interp, &df, op, left, true);
    }
    let (series, other, reflected) = match (left, right) {
        (Value::Series(s), other) => (s.clone(), other, false),
        (other, Value::Series(s)) => (s.clone(), other, true),
        _ => return Err(EvalError::type_error("expected a Series operand")),
    };
    let out = series_binary(interp, &series, op, other, reflected)?;
    Ok(Value::series(out))
}

fn series_binary(
    interp: &mut Interpreter,
    series: &Series,
    op: BinOp,
    other: &Value,
    reflected: bool,
) -> EvalResult<Series> {
    let vector = as_series(other, &series.index)?;
    if matches!(op, BinOp::BitAnd | BinOp::BitOr) {
        let rhs = match vector {
            Some(v) => v,
            None => Series::with_index(
                None,
                series.index.clone(),
                vec![other.to_cell()?; series.len()],
            ),
        };
        return Ok(series.logical(&rhs, op == BinOp::BitAnd)?);
    }
    let Some(arith) = arith_op(op) else {
        return Err(EvalError::type_error(format!(
            "unsupported operand type(s) for {}: 'Series' and '{}'",
            op.symbol(),
            other.type_name()
        )));
    };
    let mut warnings = Vec::new();
    let out = match vector {
        Some(v) if reflected => v.arith(arith, series, &mut warnings)?,
        Some(v) => series.arith(arith, &v, &mut warnings)?,
        None => series.arith_scalar(arith, &other.to_cell()?, reflected, &mut warnings)?,
    };
    interp.warn_all(warnings);
    Ok(out)
}

fn frame_binary(
    interp: &mut Interpreter,
    df: &DataFrame,
    op: BinOp,
    other: &Value,
    reflected: bool,
) -> EvalResult<Value> {
    let out = match other {
        Value::Frame(rhs) => {
            let rhs = rhs.borrow().clone();
            map_columns(df, |col| {
                let name = col.name.clone().unwrap_or_default();
                let other_col = rhs.column(&name)?;
                let (l, r) = if reflected { (&other_col, col) } else { (col, &other_col) };
                series_binary(interp, l, op, &Value::series(r.clone()), false)
            })?
        }
        Value::Series(_) => {
            return Err(EvalError::unsupported(
                "arithmetic between a DataFrame and a Series",
            ))
        }
        scalar => map_columns(df, |col| series_binary(interp, col, op, scalar, reflected))?,
    };
    Ok(Value::frame(out))
}

pub fn unary(op: UnaryOp, value: &Value) -> EvalResult<Value> {
    let apply = |s: &Series| -> EvalResult<Series> {
        Ok(match op {
            UnaryOp::Neg => s.negate()?,
            UnaryOp::Invert => s.invert()?,
            _ => s.clone(),
        })
    };
    match value {
        Value::Series(s) => Ok(Value::series(apply(s)?)),
        Value::Frame(df) => {
            let df = df.borrow().clone();
            Ok(Value::frame(map_columns(&df, apply)?))
        }
        other => Err(EvalError::type_error(format!(
            "bad operand type for unary operator: '{}'",
            other.type_name()
        ))),
    }
}

fn cmp_kind(op: CmpOp, reflected: bool) -> EvalResult<CmpKind> {
    let kind = match op {
        CmpOp::Eq => CmpKind::Eq,
        CmpOp::NotEq => CmpKind::Ne,
        CmpOp::Lt => CmpKind::Lt,
        CmpOp::LtE => CmpKind::Le,
        CmpOp::Gt => CmpKind::Gt,
        CmpOp::GtE => CmpKind::Ge,
        other => {
            return Err(EvalError::type_error(format!(
                "'{}' is not an element-wise comparison",
                other
            )))
        }
    };
    if !reflected {
        return Ok(kind);
    }
    Ok(match kind {
        CmpKind::Lt => CmpKind::Gt,
        CmpKind::Le => CmpKind::Ge,
        CmpKind::Gt => CmpKind::Lt,
        CmpKind::Ge => CmpKind::Le,
        same => same,
    })
}

fn series_compare(series: &Series, kind: CmpKind, other: &Value) -> EvalResult<Series> {
    match as_series(other, &series.index)? {
        Some(rhs) => Ok(series.compare(kind, &rhs)?),
        None => Ok(series.compare_scalar(kind, &other.to_cell()?)?),
    }
}

pub fn compare(left: &Value, op: CmpOp, right: &Value) -> EvalResult<Value> {
    let (vector, other, reflected) = if is_vector(left) {
        (left, right, false)
    } else {
        (right, left, true)
    };
    let kind = cmp_kind(op, reflected)?;
    match vector {
        Value::Series(s) => Ok(Value::series(series_compare(s, kind, other)?)),
        Value::Frame(df) => {
            if is_vector(other) {
                return Err(EvalError::unsupported("comparison between a DataFrame and a vector"));
            }
            let df = df.borrow().clone();
            Ok(Value::frame(map_columns(&df, |col| series_compare(col, kind, other))?))
        }
        _ => Err(EvalError::type_error("expected a DataFrame or Series operand")),
    }
}

fn bound(value: &Value, name: &str) -> Value {
    Value::Callable(Callable::Method {
        receiver: Box::new(value.clone()),
        name: name.to_string(),
    })
}

fn labels_value(index: &Index) -> Value {
    Value::Index(Rc::new(index.labels()))
}

fn indexer(value: &Value, positional: bool) -> Value {
    Value::Indexer {
        target: Box::new(value.clone()),
        positional,
    }
}

pub fn attr(_interp: &mut Interpreter, value: &Value, name: &str) -> EvalResult<Value> {
    match value {
        Value::Frame(df) => {
            let frame = df.borrow();
            match name {
                "shape" => {
                    let (rows, cols) = frame.shape();
                    return Ok(Value::tuple(vec![
                        Value::Int(rows as i64),
                        Value::Int(cols as i64),
                    ]));
                }
                "columns" => {
                    return Ok(Value::Index(Rc::new(
                        frame.column_names().into_iter().map(Cell::Str).collect(),
                    )))
                }
                "index" => return Ok(labels_value(&frame.index)),
                "values" => {
                    let columns = frame.columns();
                    let rows = (0..frame.n_rows())
                        .map(|i| {
                            Value::list(
                                columns.iter().map(|(_, col)| Value::from_cell(&col[i])).collect(),
                            )
                        })
                        .collect();
                    return Ok(Value::list(rows));
                }
                "dtypes" => {
                    let (labels, kinds): (Vec<Cell>, Vec<Cell>) = frame
                        .dtypes()
                        .into_iter()
                        .map(|(n, d)| (Cell::Str(n), Cell::Str(d.as_str().to_string())))
                        .unzip();
                    return Ok(Value::series(Series::with_index(
                        None,
                        Index::new(None, labels),
                        kinds,
                    )));
                }
                "empty" => return Ok(Value::Bool(frame.is_empty())),
                "size" => return Ok(Value::Int((frame.n_rows() * frame.n_cols()) as i64)),
                "ndim" => return Ok(Value::Int(2)),
                "loc" => return Ok(indexer(value, false)),
                "iloc" => return Ok(indexer(value, true)),
                _ => {}
            }
            if has_method(value, name) {
                return Ok(bound(value, name));
            }
            if frame.has_column(name) {
                return Ok(Value::series(frame.column(name)?));
            }
            Err(EvalError::attribute("DataFrame", name))
        }
        Value::Series(s) => match name {
            "shape" => Ok(Value::tuple(vec![Value::Int(s.len() as i64)])),
            "index" => Ok(labels_value(&s.index)),
            "values" => Ok(Value::list(s.values().iter().map(Value::from_cell).collect())),
            "dtype" => Ok(Value::str(s.dtype().as_str())),
            "name" => Ok(s.name.clone().map(Value::Str).unwrap_or(Value::None)),
            "empty" => Ok(Value::Bool(s.is_empty())),
            "size" => Ok(Value::Int(s.len() as i64)),
            "ndim" => Ok(Value::Int(1)),
            "loc" => Ok(indexer(value, false)),
            "iloc" => Ok(indexer(value, true)),
            "str" => Ok(Value::StrAccessor(s.clone())),
            _ if has_method(value, name) => Ok(bound(value, name)),
            _ => Err(EvalError::attribute("Series", name)),
        },
        Value::GroupBy(g) => match name {
            "ngroups" => Ok(Value::Int(g.ngroups()? as i64)),
            _ if has_method(value, name) => Ok(bound(value, name)),
            _ => match g.select(vec![name.to_string()], true) {
                Ok(selected) => Ok(Value::GroupBy(Rc::new(selected))),
                Err(_) => Err(EvalError::attribute(value.type_name(), name)),
            },
        },
        Value::Index(labels) => match name {
            "values" => Ok(Value::list(labels.iter().map(Value::from_cell).collect())),
            "size" => Ok(Value::Int(labels.len() as i64)),
            "shape" => Ok(Value::tuple(vec![Value::Int(labels.len() as i64)])),
            _ if has_method(value, name) => Ok(bound(value, name)),
            _ => Err(EvalError::attribute("Index", name)),
        },
        _ if has_method(value, name) => Ok(bound(value, name)),
        other => Err(EvalError::attribute(other.type_name(), name)),
    }
}

pub fn call_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Args) -> EvalResult<Value> {
    if !has_method(receiver, name) {
        let property = attr(interp, receiver, name)?;
        return interp.call_value(&property, args);
    }
    match receiver {
        Value::Frame(df) => frame_methods::call_frame(df, name, args),
        Value::GroupBy(g) => frame_methods::call_groupby(g, name, args),
        Value::Series(s) => series_methods::call_series(interp, s, name, args),
        Value::StrAccessor(s) => series_methods::call_str(s, name, args),
        Value::Index(labels) => series_methods::call_index(labels, name, args),
        other => Err(EvalError::attribute(other.type_name(), name)),
    }
}

/// Row selection resolved against an index
enum Rows {
    One(usize),
    Many(Vec<usize>),
}

impl Rows {
    fn positions(self) -> Vec<usize> {
        match self {
            Rows::One(p) => vec![p],
            Rows::Many(ps) => ps,
        }
    }
}

fn label_position(index: &Index, key: &Value) -> EvalResult<usize> {
    index
        .position(&key.to_cell()?)
        .ok_or_else(|| EvalError::new(ErrorKind::KeyError, key.repr()))
}

fn out_of_bounds() -> EvalError {
    EvalError::new(
        ErrorKind::IndexError,
        "single positional indexer is out-of-bounds",
    )
}

fn select_rows(index: &Index, key: &Value, positional: bool) -> EvalResult<Rows> {
    let len = index.len();
    match key {
        Value::Slice(parts) if positional => {
            let (start, stop, step) = slice_bounds(parts)?;
            Ok(Rows::Many(slice_indices(len, start, stop, step)?))
        }
        Value::Slice(parts) => {
            let start = match &parts[0] {
                Value::None => 0,
                v => label_position(index, v)?,
            };
            let stop = match &parts[1] {
                Value::None => len,
                v => label_position(index, v)? + 1,
            };
            Ok(Rows::Many((start..stop.max(start)).collect()))
        }
        Value::Series(mask) => Ok(Rows::Many(mask_positions(len, index, mask)?)),
        Value::List(_) | Value::Tuple(_) => {
            let items = match key {
                Value::List(l) => l.borrow().clone(),
                Value::Tuple(t) => t.to_vec(),
                _ => Vec::new(),
            };
            if !items.is_empty() && items.iter().all(|v| matches!(v, Value::Bool(_))) {
                let mask = Series::with_index(None, index.clone(), cells_of(key)?);
                return Ok(Rows::Many(mask_positions(len, index, &mask)?));
            }
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(if positional {
                    normalize_index(item.as_int()?, len, "positional").map_err(|_| out_of_bounds())?
                } else {
                    label_position(index, item)?
                });
            }
            Ok(Rows::Many(out))
        }
        scalar if positional => Ok(Rows::One(
            normalize_index(scalar.as_int()?, len, "positional").map_err(|_| out_of_bounds())?,
        )),
        scalar => Ok(Rows::One(label_position(index, scalar)?)),
    }
}

enum Cols {
    One(String),
    Many(Vec<String>),
}

fn select_cols(df: &DataFrame, key: &Value, positional: bool) -> EvalResult<Cols> {
    let names = df.column_names();
    let by_position = |v: &Value| -> EvalResult<String> {
        let pos = normalize_index(v.as_int()?, names.len(), "column").map_err(|_| out_of_bounds())?;
        Ok(names[pos].clone())
    };
    match key {
        Value::Slice(parts) => {
            let picked = if positional {
                let (start, stop, step) = slice_bounds(parts)?;
                slice_indices(names.len(), start, stop, step)?
            } else {
                let find = |v: &Value, default: usize, offset: usize| -> EvalResult<usize> {
                    match v {
                        Value::None => Ok(default),
                        Value::Str(n) => names
                            .iter()
                            .position(|c| c == n)
                            .map(|p| p + offset)
                            .ok_or_else(|| EvalError::new(ErrorKind::KeyError, v.repr())),
                        other => Err(EvalError::new(ErrorKind::KeyError, other.repr())),
                    }
                };
                let start = find(&parts[0], 0, 0)?;
                let stop = find(&parts[1], names.len(), 1)?;
                (start..stop.max(start)).collect()
            };
            Ok(Cols::Many(picked.into_iter().map(|p| names[p].clone()).collect()))
        }
        Value::List(_) | Value::Tuple(_) | Value::Index(_) if positional => {
            let items = cells_of(key)?;
            let picked = items
                .iter()
                .map(|c| by_position(&Value::from_cell(c)))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Cols::Many(picked))
        }
        Value::List(_) | Value::Tuple(_) | Value::Index(_) => Ok(Cols::Many(labels_of(key)?)),
        scalar if positional => Ok(Cols::One(by_position(scalar)?)),
        Value::Str(name) => Ok(Cols::One(name.clone())),
        other => Err(EvalError::new(ErrorKind::KeyError, other.repr())),
    }
}

fn split_key(key: &Value) -> EvalResult<(&Value, Option<&Value>)> {
    match key {
        Value::Tuple(parts) if parts.len() == 2 => Ok((&parts[0], Some(&parts[1]))),
        Value::Tuple(parts) if parts.len() > 2 => {
            Err(EvalError::new(ErrorKind::IndexError, "Too many indexers"))
        }
        other => Ok((other, None)),
    }
}

fn frame_lookup(df: &DataFrame, key: &Value, positional: bool) -> EvalResult<Value> {
    let (row_key, col_key) = split_key(key)?;
    let rows = select_rows(&df.index, row_key, positional)?;
    let Some(col_key) = col_key else {
        return Ok(match rows {
            Rows::One(p) => Value::series(df.row(p)?),
            Rows::Many(ps) => Value::frame(df.take(&ps)?),
        });
    };
    Ok(match (rows, select_cols(df, col_key, positional)?) {
        (Rows::One(p), Cols::One(c)) => Value::from_cell(&df.column_values(&c)?[p]),
        (Rows::One(p), Cols::Many(cs)) => Value::series(df.select(&cs)?.row(p)?),
        (Rows::Many(ps), Cols::One(c)) => Value::series(df.column(&c)?.take(&ps)?),
        (Rows::Many(ps), Cols::Many(cs)) => Value::frame(df.select(&cs)?.take(&ps)?),
    })
}

fn series_lookup(s: &Series, key: &Value, positional: bool) -> EvalResult<Value> {
    Ok(match select_rows(&s.index, key, positional)? {
        Rows::One(p) => Value::from_cell(&s.value_at(p)),
        Rows::Many(ps) => Value::series(s.take(&ps)?),
    })
}

fn all_int_labels(index: &Index) -> bool {
    index.labels().iter().all(|c| matches!(c, Cell::Int(_)))
}

pub fn get_item(interp: &mut Interpreter, container: &Value, key: &Value) -> EvalResult<Value> {
    match container {
        Value::Frame(df) => {
            let df = df.borrow();
            match key {
                Value::Str(name) => Ok(Value::series(df.column(name)?)),
                Value::Series(mask) => Ok(Value::frame(df.filter(mask)?)),
                Value::Slice(_) => frame_lookup(&df, key, true),
                Value::List(items)
                    if !items.borrow().is_empty()
                        && items.borrow().iter().all(|v| matches!(v, Value::Bool(_))) =>
                {
                    frame_lookup(&df, key, false)
                }
                Value::List(_) | Value::Tuple(_) | Value::Index(_) => {
                    Ok(Value::frame(df.select(&labels_of(key)?)?))
                }
                other => Err(EvalError::new(ErrorKind::KeyError, other.repr())),
            }
        }
        Value::Series(s) => match key {
            Value::Slice(_) => series_lookup(s, key, true),
            Value::Int(_) if !all_int_labels(&s.index) && s.index.position(&key.to_cell()?).is_none() => {
                series_lookup(s, key, true)
            }
            _ => series_lookup(s, key, false),
        },
        Value::GroupBy(g) => {
            let selected = match key {
                Value::Str(name) => g.select(vec![name.clone()], true)?,
                other => g.select(labels_of(other)?, false)?,
            };
            Ok(Value::GroupBy(Rc::new(selected)))
        }
        Value::StrAccessor(s) => {
            let picked = match key {
                Value::Slice(parts) => {
                    let (start, stop, step) = slice_bounds(parts)?;
                    s.try_map(|c| -> EvalResult<Cell> {
                        Ok(match c {
                            Cell::Str(text) => {
                                let chars: Vec<char> = text.chars().collect();
                                let idx = slice_indices(chars.len(), start, stop, step)?;
                                Cell::Str(idx.into_iter().map(|i| chars[i]).collect())
                            }
                            _ => Cell::Null,
                        })
                    })?
                }
                other => {
                    let i = other.as_int()?;
                    s.str_map(|text| {
                        let chars: Vec<char> = text.chars().collect();
                        normalize_index(i, chars.len(), "string")
                            .map(|p| Cell::Str(chars[p].to_string()))
                            .unwrap_or(Cell::Null)
                    })
                }
            };
            interp.check_len(picked.len())?;
            Ok(Value::series(picked))
        }
        Value::Index(labels) => match key {
            Value::Slice(parts) => {
                let (start, stop, step) = slice_bounds(parts)?;
                let picked = slice_indices(labels.len(), start, stop, step)?;
                Ok(Value::Index(Rc::new(
                    picked.into_iter().map(|i| labels[i].clone()).collect(),
                )))
            }
            other => {
                let pos = normalize_index(other.as_int()?, labels.len(), "index")?;
                Ok(Value::from_cell(&labels[pos]))
            }
        },
        Value::Indexer { target, positional } => match target.as_ref() {
            Value::Frame(df) => frame_lookup(&df.borrow(), key, *positional),
            Value::Series(s) => series_lookup(s, key, *positional),
            other => Err(EvalError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        },
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Cells for `positions` taken from a scalar, a sequence or an aligned series
fn assigned_cells(df: &DataFrame, positions: &[usize], value: &Value) -> EvalResult<Vec<Cell>> {
    match value {
        Value::Series(s) => Ok(positions
            .iter()
            .map(|&p| s.get(&df.index.label(p)).unwrap_or(Cell::Null))
            .collect()),
        Value::List(_) | Value::Tuple(_) => {
            let cells = cells_of(value)?;
            if cells.len() != positions.len() {
                return Err(EvalError::value_error(format!(
                    "Must have equal len keys and value when setting with an iterable ({} vs {})",
                    positions.len(),
                    cells.len()
                )));
            }
            Ok(cells)
        }
        scalar => Ok(vec![scalar.to_cell()?; positions.len()]),
    }
}

fn indexer_assign(df: &FrameRef, key: &Value, positional: bool, value: &Value) -> EvalResult<()> {
    let mut frame = df.borrow_mut();
    let (row_key, col_key) = split_key(key)?;
    let rows = select_rows(&frame.index, row_key, positional)?.positions();
    let targets = match col_key {
        None => frame.column_names(),
        Some(ck) => match select_cols(&frame, ck, positional)? {
            Cols::One(c) => vec![c],
            Cols::Many(cs) => cs,
        },
    };
    let cells = assigned_cells(&frame, &rows, value)?;
    let n = frame.n_rows();
    for name in targets {
        let mut column = frame
            .column_values(&name)
            .unwrap_or_else(|_| vec![Cell::Null; n]);
        for (&p, cell) in rows.iter().zip(&cells) {
            column[p] = cell.clone();
        }
        frame.set_column(&name, column)?;
    }
    Ok(())
}

fn assign_column(interp: &Interpreter, df: &FrameRef, name: &str, value: &Value) -> EvalResult<()> {
    let result: FrameResult<()> = match value {
        Value::Series(s) => df.borrow_mut().set_series(name, s),
        Value::List(_) | Value::Tuple(_) | Value::Index(_) | Value::Range { .. } => {
            let cells = match value {
                Value::Range { start, step, .. } => {
                    let n = range_len(value)?;
                    interp.check_len(n)?;
                    (0..n).map(|i| Cell::Int(range_item(*start, *step, i))).collect()
                }
                other => cells_of(other)?,
            };
            df.borrow_mut().set_column(name, cells)
        }
        Value::Frame(other) => {
            let other = other.borrow().clone();
            if other.n_cols() != 1 {
                return Err(EvalError::value_error(
                    "Cannot set a DataFrame with multiple columns to the single column",
                ));
            }
            let first = other.column_names().remove(0);
            let column = other.column(&first)?;
            df.borrow_mut().set_series(name, &column)
        }
        scalar => {
            let cell = scalar.to_cell()?;
            let n = df.borrow().n_rows();
            df.borrow_mut().set_column(name, vec![cell; n])
        }
    };
    Ok(result?)
}

pub fn set_item(interp: &mut Interpreter, container: &Value, key: Value, value: Value) -> EvalResult<()> {
    match container {
        Value::Frame(df) => match &key {
            Value::Str(name) => assign_column(interp, df, name, &value),
            Value::List(_) | Value::Tuple(_) => {
                let names = labels_of(&key)?;
                let Value::Frame(source) = &value else {
                    return Err(EvalError::unsupported("assigning a non-frame to several columns"));
                };
                let source = source.borrow().clone();
                let source_names = source.column_names();
                if source_names.len() != names.len() {
                    return Err(EvalError::value_error("Columns must be same length as key"));
                }
                for (name, from) in names.iter().zip(&source_names) {
                    df.borrow_mut().set_series(name, &source.column(from)?)?;
                }
                Ok(())
            }
            Value::Series(mask) => {
                let positions = {
                    let frame = df.borrow();
                    mask_positions(frame.n_rows(), &frame.index, mask)?
                };
                let mut frame = df.borrow_mut();
                let cell = value.to_cell()?;
                for name in frame.column_names() {
                    let mut column = frame.column_values(&name)?;
                    for &p in &positions {
                        column[p] = cell.clone();
                    }
                    frame.set_column(&name, column)?;
                }
                Ok(())
            }
            other => Err(EvalError::new(ErrorKind::KeyError, other.repr())),
        },
        Value::Indexer { target, positional } => match target.as_ref() {
            Value::Frame(df) => indexer_assign(df, &key, *positional, &value),
            _ => Err(EvalError::unsupported(
                "assignment into a Series; assign a new column instead",
            )),
        },
        Value::Series(_) => Err(EvalError::unsupported(
            "assignment into a Series; assign a new column instead",
        )),
        other => Err(EvalError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `(key, group)` pairs yielded by iterating a group-by
pub fn group_items(g: &Rc<GroupBy>) -> EvalResult<Vec<Value>> {
    let groups = g.groups()?;
    let mut out = Vec::with_capacity(groups.len());
    for (key, frame) in groups {
        let key_value = if key.len() == 1 {
            Value::from_cell(&key[0])
        } else {
            Value::tuple(key.iter().map(Value::from_cell).collect())
        };
        let group = match g.selection() {
            Some(cols) if g.is_single() => Value::series(frame.column(&cols[0])?),
            Some(cols) => Value::frame(frame.select(cols)?),
            None => Value::frame(frame),
        };
        out.push(Value::tuple(vec![key_value, group]));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::Limits;
    use super::*;
    use crate::syntax::parse;
    use crate::policy::SafetyPolicy;

    fn eval(code: &str) -> EvalResult<Value> {
        let df = DataFrame::new(vec![
            (
                "Region".to_string(),
                vec!["West".into(), "East".into(), "West".into(), "North".into()],
            ),
            (
                "Sales".to_string(),
                vec![Cell::Int(100), Cell::Int(250), Cell::Int(50), Cell::Null],
            ),
            (
                "Units".to_string(),
                vec![Cell::Int(1), Cell::Int(5), Cell::Int(2), Cell::Int(4)],
            ),
        ])
        .unwrap();
        let mut interp = Interpreter::new(SafetyPolicy::standard(), Limits::default(), "result");
        interp.bind("df", Value::frame(df));
        interp.run(&parse(code).unwrap())?;
        Ok(interp.get("result").cloned().unwrap_or(Value::None))
    }

    #[test]
    fn test_mask_filter_and_column_select() {
        let v = eval("result = df[df['Sales'] > 60]['Region'].tolist()").unwrap();
        assert_eq!(v.repr(), "['West', 'East']");
        let v = eval("result = df[(df.Units >= 2) & (df.Region != 'East')].shape").unwrap();
        assert_eq!(v.repr(), "(2, 3)");
    }

    #[test]
    fn test_series_arithmetic_aligns_and_warns() {
        let v = eval("result = (df['Sales'] / df['Units']).tolist()").unwrap();
        assert_eq!(v.repr(), "[100.0, 50.0, 25.0, nan]");
        let v = eval("result = (10 - df['Units']).tolist()").unwrap();
        assert_eq!(v.repr(), "[9, 5, 8, 6]");
    }

    #[test]
    fn test_loc_and_iloc() {
        assert_eq!(eval("result = df.iloc[1, 1]").unwrap().repr(), "250.0");
        assert_eq!(eval("result = df.iloc[1, 2]").unwrap().repr(), "5");
        assert_eq!(eval("result = df.loc[2, 'Region']").unwrap().repr(), "'West'");
        let v = eval("result = df.loc[df['Units'] > 1, ['Region', 'Units']].shape").unwrap();
        assert_eq!(v.repr(), "(3, 2)");
        let v = eval("result = df.iloc[-2:]['Units'].tolist()").unwrap();
        assert_eq!(v.repr(), "[2, 4]");
        let err = eval("result = df.iloc[10]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexError);
    }

    #[test]
    fn test_column_assignment() {
        let v = eval("df['Total'] = df['Sales'] * 2\ndf['Flag'] = 1\nresult = df.columns.tolist()").unwrap();
        assert_eq!(v.repr(), "['Region', 'Sales', 'Units', 'Total', 'Flag']");
        let v = eval("df.loc[df['Region'] == 'West', 'Units'] = 0\nresult = df['Units'].tolist()").unwrap();
        assert_eq!(v.repr(), "[0, 5, 0, 4]");
        let err = eval("df['Bad'] = [1, 2]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let err = eval("result = df['Nope']").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyError);
        let err = eval("result = df.Nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_groupby_iteration() {
        let v = eval("result = [(k, len(g)) for k, g in df.groupby('Region')]").unwrap();
        assert_eq!(v.repr(), "[('East', 1), ('North', 1), ('West', 2)]");
    }

    #[test]
    fn test_frame_truthiness_is_ambiguous() {
        let err = eval("result = 1 if df['Sales'] > 1 else 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }
}
