//! DataFrame and group-by methods

use super::args::{cells_of, labels_of, Args};
use super::error::{ErrorKind, EvalError, EvalResult};
use super::tabular::aggregated;
use super::value::{Callable, FrameRef, Key, ModuleKind, Value};
use crate::frame::{reduce, AggFunc, Cell, DType, DataFrame, GroupBy, Series};
use indexmap::IndexMap;
use std::rc::Rc;

pub const FRAME_METHODS: &[&str] = &[
    "copy",
    "count",
    "drop",
    "drop_duplicates",
    "dropna",
    "fillna",
    "groupby",
    "head",
    "max",
    "mean",
    "median",
    "min",
    "nlargest",
    "nsmallest",
    "nunique",
    "rename",
    "reset_index",
    "sort_values",
    "std",
    "sum",
    "tail",
    "to_dict",
    "var",
];

pub const GROUPBY_METHODS: &[&str] = &[
    "agg",
    "aggregate",
    "count",
    "max",
    "mean",
    "median",
    "min",
    "nunique",
    "size",
    "std",
    "sum",
    "var",
];

fn agg_func(name: &str) -> EvalResult<AggFunc> {
    AggFunc::from_name(name).ok_or_else(|| {
        EvalError::new(
            ErrorKind::AttributeError,
            format!("'{}' is not a valid function for aggregation", name),
        )
    })
}

/// Reduction named by a string, a builtin or a numpy function
fn func_name(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Callable(Callable::Builtin(b)) => match *b {
            "sum" | "max" | "min" => Some(b.to_string()),
            "len" => Some("size".to_string()),
            _ => None,
        },
        Value::Callable(Callable::Library(ModuleKind::Numpy, f)) => Some(f.to_string()),
        _ => None,
    }
}

fn by_columns(args: &Args, pos: usize, name: &str, method: &str) -> EvalResult<Vec<String>> {
    labels_of(args.required(pos, name, method)?)
}

fn ascending_flags(args: &Args, pos: usize) -> EvalResult<Vec<bool>> {
    match args.given(pos, "ascending") {
        None => Ok(vec![true]),
        Some(Value::List(items)) => items.borrow().iter().map(Value::truthy).collect(),
        Some(Value::Tuple(items)) => items.iter().map(Value::truthy).collect(),
        Some(flag) => Ok(vec![flag.truthy()?]),
    }
}

fn keep_last(args: &Args) -> EvalResult<bool> {
    match args.get(usize::MAX, "keep") {
        None => Ok(false),
        Some(Value::Str(s)) if s == "first" => Ok(false),
        Some(Value::Str(s)) if s == "last" => Ok(true),
        Some(_) => Err(EvalError::unsupported("keep other than 'first' or 'last'")),
    }
}

fn subset(args: &Args, pos: usize) -> EvalResult<Option<Vec<String>>> {
    args.given(pos, "subset").map(labels_of).transpose()
}

/// Replace the frame for `inplace=True`, otherwise return the new one
fn finish(df: &FrameRef, out: DataFrame, args: &Args) -> EvalResult<Value> {
    if args.kw_flag("inplace", false)? {
        *df.borrow_mut() = out;
        return Ok(Value::None);
    }
    Ok(Value::frame(out))
}

fn is_column_axis(args: &Args, pos: usize) -> EvalResult<bool> {
    match args.given(pos, "axis") {
        None => Ok(false),
        Some(Value::Str(s)) => Ok(s == "columns"),
        Some(v) => Ok(v.as_int()? == 1),
    }
}

/// Row-wise reduction across the columns a reduction applies to
fn reduce_rows(frame: &DataFrame, func: AggFunc) -> EvalResult<Series> {
    let numeric_only = func.numeric_only() || func == AggFunc::Sum;
    let columns: Vec<Vec<Cell>> = frame
        .columns()
        .into_iter()
        .filter(|(_, col)| !numeric_only || DType::infer(col).is_numeric())
        .map(|(_, col)| col)
        .collect();
    let mut values = Vec::with_capacity(frame.n_rows());
    for row in 0..frame.n_rows() {
        let cells: Vec<Cell> = columns.iter().map(|c| c[row].clone()).collect();
        values.push(reduce(&cells, func)?);
    }
    Ok(Series::with_index(None, frame.index.clone(), values))
}

fn cell_key(cell: &Cell) -> EvalResult<Key> {
    Key::new(Value::from_cell(cell))
}

fn to_dict(frame: &DataFrame, orient: &str) -> EvalResult<Value> {
    let labels = frame.index.labels();
    let columns = frame.columns();
    let column_map = |col: &[Cell]| -> EvalResult<Value> {
        let mut map = IndexMap::with_capacity(col.len());
        for (label, cell) in labels.iter().zip(col) {
            map.insert(cell_key(label)?, Value::from_cell(cell));
        }
        Ok(Value::dict(map))
    };
    let row_map = |row: usize| -> EvalResult<Value> {
        let mut map = IndexMap::with_capacity(columns.len());
        for (name, col) in &columns {
            map.insert(Key::new(Value::Str(name.clone()))?, Value::from_cell(&col[row]));
        }
        Ok(Value::dict(map))
    };
    match orient {
        "dict" | "series" | "list" => {
            let mut out = IndexMap::with_capacity(columns.len());
            for (name, col) in &columns {
                let value = if orient == "list" {
                    Value::list(col.iter().map(Value::from_cell).collect())
                } else {
                    column_map(col)?
                };
                out.insert(Key::new(Value::Str(name.clone()))?, value);
            }
            Ok(Value::dict(out))
        }
        "records" => Ok(Value::list(
            (0..frame.n_rows()).map(row_map).collect::<EvalResult<_>>()?,
        )),
        "index" => {
            let mut out = IndexMap::with_capacity(frame.n_rows());
            for (i, label) in labels.iter().enumerate() {
                out.insert(cell_key(label)?, row_map(i)?);
            }
            Ok(Value::dict(out))
        }
        other => Err(EvalError::value_error(format!(
            "orient '{}' not understood",
            other
        ))),
    }
}

fn drop(frame: &DataFrame, args: &Args) -> EvalResult<DataFrame> {
    if let Some(columns) = args.given(usize::MAX, "columns") {
        return Ok(frame.drop_columns(&labels_of(columns)?)?);
    }
    let labels = args.required(0, "labels", "drop")?;
    if is_column_axis(args, 1)? {
        return Ok(frame.drop_columns(&labels_of(labels)?)?);
    }
    let targets = cells_of(labels)?;
    let mut keep = Vec::with_capacity(frame.n_rows());
    let mut found = vec![false; targets.len()];
    for i in 0..frame.n_rows() {
        let label = frame.index.label(i);
        match targets.iter().position(|t| t.loose_eq(&label) || *t == label) {
            Some(t) => found[t] = true,
            None => keep.push(i),
        }
    }
    if let Some(missing) = found.iter().position(|f| !f) {
        return Err(EvalError::new(
            ErrorKind::KeyError,
            format!("\"[{}] not found in axis\"", targets[missing].repr()),
        ));
    }
    Ok(frame.take(&keep)?)
}

fn dropna(frame: &DataFrame, args: &Args) -> EvalResult<DataFrame> {
    let all = matches!(args.get(usize::MAX, "how"), Some(Value::Str(h)) if h == "all");
    if !is_column_axis(args, 0)? {
        let subset = subset(args, usize::MAX)?;
        return Ok(frame.dropna(subset.as_deref(), all)?);
    }
    let keep: Vec<String> = frame
        .columns()
        .into_iter()
        .filter(|(_, col)| {
            if all {
                !col.iter().all(Cell::is_null)
            } else {
                !col.iter().any(Cell::is_null)
            }
        })
        .map(|(name, _)| name)
        .collect();
    Ok(frame.select(&keep)?)
}

fn fillna(frame: &DataFrame, args: &Args) -> EvalResult<DataFrame> {
    match args.required(0, "value", "fillna")? {
        Value::Dict(map) => {
            let mut out = frame.clone();
            for (key, value) in map.borrow().iter() {
                let name = key.value().str_of();
                if let Ok(series) = frame.column(&name) {
                    out.set_column(&name, series.fillna(&value.to_cell()?).values())?;
                }
            }
            Ok(out)
        }
        scalar => Ok(frame.fillna(&scalar.to_cell()?)?),
    }
}

fn rename(frame: &DataFrame, args: &Args) -> EvalResult<DataFrame> {
    let mapping = match (args.given(usize::MAX, "columns"), args.given(0, "mapper")) {
        (Some(m), _) => m,
        (None, Some(m)) if is_column_axis(args, usize::MAX)? => m,
        _ => return Ok(frame.clone()),
    };
    let Value::Dict(map) = mapping else {
        return Err(EvalError::unsupported("rename with a function"));
    };
    let pairs = map
        .borrow()
        .iter()
        .map(|(k, v)| (k.value().str_of(), v.str_of()))
        .collect::<Vec<_>>();
    Ok(frame.rename(&pairs)?)
}

pub fn call_frame(df: &FrameRef, name: &str, args: Args) -> EvalResult<Value> {
    let frame = df.borrow().clone();
    match name {
        "head" => Ok(Value::frame(frame.head(args.int(0, "n", 5)?))),
        "tail" => Ok(Value::frame(frame.tail(args.int(0, "n", 5)?))),
        "copy" => Ok(Value::frame(frame)),
        "sort_values" => {
            let by = by_columns(&args, 0, "by", name)?;
            let out = frame.sort_values(&by, &ascending_flags(&args, 2)?)?;
            finish(df, out, &args)
        }
        "nlargest" | "nsmallest" => {
            let n = args.required(0, "n", name)?.as_int()?.max(0) as usize;
            let by = by_columns(&args, 1, "columns", name)?;
            Ok(Value::frame(frame.nlargest(n, &by, name == "nlargest")?))
        }
        "groupby" => {
            let keys = by_columns(&args, 0, "by", name)?;
            let as_index = args.kw_flag("as_index", true)?;
            Ok(Value::GroupBy(Rc::new(frame.groupby(keys, as_index)?)))
        }
        "drop_duplicates" => {
            let subset = subset(&args, 0)?;
            let out = frame.drop_duplicates(subset.as_deref(), keep_last(&args)?)?;
            finish(df, out, &args)
        }
        "dropna" => {
            let out = dropna(&frame, &args)?;
            finish(df, out, &args)
        }
        "fillna" => {
            let out = fillna(&frame, &args)?;
            finish(df, out, &args)
        }
        "rename" => {
            let out = rename(&frame, &args)?;
            finish(df, out, &args)
        }
        "drop" => {
            let out = drop(&frame, &args)?;
            finish(df, out, &args)
        }
        "reset_index" => {
            let out = frame.reset_index(args.kw_flag("drop", false)?)?;
            finish(df, out, &args)
        }
        "sum" | "mean" | "median" | "min" | "max" | "count" | "std" | "var" | "nunique" => {
            let func = agg_func(name)?;
            if is_column_axis(&args, 0)? {
                return Ok(Value::series(reduce_rows(&frame, func)?));
            }
            Ok(Value::series(frame.reduce_columns(func)?))
        }
        "to_dict" => {
            let orient = args.string(0, "orient")?.unwrap_or_else(|| "dict".to_string());
            to_dict(&frame, &orient)
        }
        _ => Err(EvalError::attribute("DataFrame", name)),
    }
}

fn named_agg(g: &GroupBy, keywords: &[(String, Value)]) -> EvalResult<Value> {
    let mut specs = Vec::with_capacity(keywords.len());
    for (out, spec) in keywords {
        let (source, func) = match spec {
            Value::Tuple(parts) if parts.len() == 2 => {
                let func = func_name(&parts[1])
                    .ok_or_else(|| EvalError::type_error("named aggregation needs a function name"))?;
                (parts[0].str_of(), func)
            }
            other => {
                let source = g.selection().and_then(|s| s.first().cloned()).ok_or_else(|| {
                    EvalError::type_error("Must provide 'func' or tuples of '(column, aggfunc).")
                })?;
                let func = func_name(other)
                    .ok_or_else(|| EvalError::type_error("named aggregation needs a function name"))?;
                (source, func)
            }
        };
        specs.push((out.clone(), source, agg_func(&func)?));
    }
    Ok(aggregated(g.aggregate_named(&specs)?))
}

fn group_agg(g: &GroupBy, args: &Args) -> EvalResult<Value> {
    if !args.keywords.is_empty() && args.positional.is_empty() {
        return named_agg(g, &args.keywords);
    }
    let spec = args.required(0, "func", "agg")?;
    if let Some(name) = func_name(spec) {
        return Ok(aggregated(g.aggregate(agg_func(&name)?)?));
    }
    match spec {
        Value::List(_) | Value::Tuple(_) => {
            let source = match g.selection() {
                Some([only]) => only.clone(),
                _ => {
                    return Err(EvalError::unsupported(
                        "a list of functions on several columns; select one column first",
                    ))
                }
            };
            let mut specs = Vec::new();
            for name in labels_of(spec)? {
                specs.push((name.clone(), source.clone(), agg_func(&name)?));
            }
            Ok(aggregated(g.aggregate_named(&specs)?))
        }
        Value::Dict(map) => {
            let entries: Vec<(String, Value)> = map
                .borrow()
                .iter()
                .map(|(k, v)| (k.value().str_of(), v.clone()))
                .collect();
            let single_column = entries.len() == 1;
            let mut specs = Vec::new();
            for (column, func) in entries {
                match func_name(&func) {
                    Some(name) => specs.push((column.clone(), column, agg_func(&name)?)),
                    None if single_column => {
                        for name in labels_of(&func)? {
                            specs.push((name.clone(), column.clone(), agg_func(&name)?));
                        }
                    }
                    None => {
                        return Err(EvalError::unsupported(
                            "lists of functions for several columns",
                        ))
                    }
                }
            }
            Ok(aggregated(g.aggregate_named(&specs)?))
        }
        Value::Callable(_) => Err(EvalError::unsupported("aggregating with a custom function")),
        other => Err(EvalError::type_error(format!(
            "cannot aggregate with '{}'",
            other.type_name()
        ))),
    }
}

pub fn call_groupby(g: &Rc<GroupBy>, name: &str, args: Args) -> EvalResult<Value> {
    match name {
        "size" => Ok(aggregated(g.size()?)),
        "agg" | "aggregate" => group_agg(g, &args),
        _ => Ok(aggregated(g.aggregate(agg_func(name)?)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Interpreter, Limits};
    use super::*;
    use crate::policy::SafetyPolicy;
    use crate::syntax::parse;

    fn eval(code: &str) -> EvalResult<Value> {
        let df = DataFrame::new(vec![
            (
                "Region".to_string(),
                vec!["West".into(), "East".into(), "West".into(), "East".into()],
            ),
            (
                "Product".to_string(),
                vec!["A".into(), "A".into(), "B".into(), "B".into()],
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
        interp.bind("np", Value::Module(ModuleKind::Numpy));
        interp.run(&parse(code).unwrap())?;
        Ok(interp.get("result").cloned().unwrap_or(Value::None))
    }

    #[test]
    fn test_groupby_sum_and_named_agg() {
        let v = eval("result = df.groupby('Region')['Units'].sum().to_dict()").unwrap();
        assert_eq!(v.repr(), "{'East': 9, 'West': 3}");
        let v = eval(
            "g = df.groupby('Region', as_index=False).agg(total=('Units', 'sum'), n=('Sales', 'count'))\nresult = g.to_dict('records')",
        )
        .unwrap();
        assert_eq!(
            v.repr(),
            "[{'Region': 'East', 'total': 9, 'n': 1}, {'Region': 'West', 'total': 3, 'n': 2}]"
        );
    }

    #[test]
    fn test_groupby_agg_forms() {
        let v = eval("result = df.groupby('Product').agg({'Units': 'max'})['Units'].tolist()").unwrap();
        assert_eq!(v.repr(), "[5, 4]");
        let v = eval("result = df.groupby('Product')['Sales'].agg(np.mean).tolist()").unwrap();
        assert_eq!(v.repr(), "[175.0, 50.0]");
        let v = eval("result = df.groupby('Product')['Units'].agg(['min', 'max']).to_dict('list')").unwrap();
        assert_eq!(v.repr(), "{'min': [1, 2], 'max': [5, 4]}");
        let v = eval("result = df.groupby('Region').size().tolist()").unwrap();
        assert_eq!(v.repr(), "[2, 2]");
        let err = eval("result = df.groupby('Region')['Units'].agg(lambda s: s.max())").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotImplementedError);
    }

    #[test]
    fn test_sorting_and_top_n() {
        let v = eval("result = df.sort_values('Sales', ascending=False)['Sales'].tolist()").unwrap();
        assert_eq!(v.repr(), "[250.0, 100.0, 50.0, nan]");
        let v = eval("result = df.nlargest(2, 'Sales')['Region'].tolist()").unwrap();
        assert_eq!(v.repr(), "['East', 'West']");
        let v = eval("result = df.nsmallest(1, 'Units')['Product'].tolist()").unwrap();
        assert_eq!(v.repr(), "['A']");
    }

    #[test]
    fn test_inplace_and_cleanup() {
        let v = eval("df.dropna(inplace=True)\nresult = len(df)").unwrap();
        assert!(matches!(v, Value::Int(3)));
        let v = eval("result = df.fillna(0)['Sales'].sum()").unwrap();
        assert_eq!(v.repr(), "400.0");
        let v = eval("result = df.drop(columns=['Product']).rename(columns={'Sales': 'S'}).columns.tolist()").unwrap();
        assert_eq!(v.repr(), "['Region', 'S', 'Units']");
        let v = eval("result = df.drop_duplicates(subset=['Region'], keep='last')['Product'].tolist()").unwrap();
        assert_eq!(v.repr(), "['B', 'B']");
        let v = eval("result = df.dropna(axis=1).columns.tolist()").unwrap();
        assert_eq!(v.repr(), "['Region', 'Product', 'Units']");
    }

    #[test]
    fn test_to_dict_orients() {
        let v = eval("result = df.head(1).to_dict('list')").unwrap();
        assert_eq!(
            v.repr(),
            "{'Region': ['West'], 'Product': ['A'], 'Sales': [100.0], 'Units': [1]}"
        );
        let v = eval("result = df[['Units']].tail(1).to_dict()").unwrap();
        assert_eq!(v.repr(), "{'Units': {3: 4}}");
        let err = eval("result = df.to_dict('split')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn test_column_reductions() {
        let v = eval("result = df.mean().tolist()").unwrap();
        assert_eq!(v.repr(), format!("[{}, 3.0]", Value::Float(400.0 / 3.0).repr()));
        let v = eval("result = df.count().tolist()").unwrap();
        assert_eq!(v.repr(), "[4, 4, 3, 4]");
        let v = eval("result = df[['Units']].sum(axis=1).tolist()").unwrap();
        assert_eq!(v.repr(), "[1, 5, 2, 4]");
        let err = eval("result = df.groupby('Nope')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyError);
    }
}
