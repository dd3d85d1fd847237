//! The `pd` and `np` handles
//!
//! Only the functions listed here exist on the handles; anything else is an
//! `AttributeError`, the same as a missing attribute on a real module.

use super::args::{cells_of, Args};
use super::error::{ErrorKind, EvalError, EvalResult};
use super::value::{Callable, ModuleKind, Value};
use super::Interpreter;
use crate::frame::{numeric_values, reduce, round_float, AggFunc, Cell, DataFrame, Index, Series};

const PANDAS_FUNCTIONS: &[&str] = &[
    "DataFrame",
    "Series",
    "isna",
    "isnull",
    "notna",
    "notnull",
    "to_numeric",
];

const NUMPY_FUNCTIONS: &[&str] = &[
    "abs", "exp", "log", "max", "mean", "median", "min", "round", "sqrt", "std", "sum",
];

fn functions(module: ModuleKind) -> &'static [&'static str] {
    match module {
        ModuleKind::Pandas => PANDAS_FUNCTIONS,
        ModuleKind::Numpy => NUMPY_FUNCTIONS,
    }
}

fn no_attribute(module: ModuleKind, name: &str) -> EvalError {
    EvalError::new(
        ErrorKind::AttributeError,
        format!("module '{}' has no attribute '{}'", module.name(), name),
    )
}

pub fn attr(module: ModuleKind, name: &str) -> EvalResult<Value> {
    if let Some(func) = functions(module).iter().find(|f| **f == name) {
        return Ok(Value::Callable(Callable::Library(module, *func)));
    }
    let constant = match (module, name) {
        (ModuleKind::Numpy, "nan" | "NaN") => Value::Float(f64::NAN),
        (ModuleKind::Numpy, "inf") => Value::Float(f64::INFINITY),
        (ModuleKind::Numpy, "pi") => Value::Float(std::f64::consts::PI),
        (ModuleKind::Numpy, "int64" | "int32") => Value::Type("int"),
        (ModuleKind::Numpy, "float64" | "float32") => Value::Type("float"),
        (ModuleKind::Pandas, "NA") => Value::None,
        _ => return Err(no_attribute(module, name)),
    };
    Ok(constant)
}

pub fn call(interp: &mut Interpreter, module: ModuleKind, name: &str, args: Args) -> EvalResult<Value> {
    match module {
        ModuleKind::Pandas => pandas(interp, name, args),
        ModuleKind::Numpy => numpy(interp, name, args),
    }
}

fn pandas(interp: &mut Interpreter, name: &str, args: Args) -> EvalResult<Value> {
    match name {
        "DataFrame" => Ok(Value::frame(build_frame(interp, &args)?)),
        "Series" => build_series(interp, &args),
        "to_numeric" => to_numeric(&args),
        "isna" | "isnull" | "notna" | "notnull" => {
            let missing = name.starts_with("is");
            let flag = move |c: &Cell| Cell::Bool(c.is_null() == missing);
            match args.required(0, "obj", name)? {
                Value::Series(s) => Ok(Value::series(s.map_values(flag))),
                Value::Frame(df) => Ok(Value::frame(df.borrow().map_cells(flag)?)),
                Value::List(_) | Value::Tuple(_) => {
                    let cells = cells_of(args.required(0, "obj", name)?)?;
                    Ok(Value::list(
                        cells.iter().map(|c| Value::from_cell(&flag(c))).collect(),
                    ))
                }
                scalar => {
                    let cell = scalar.to_cell().unwrap_or(Cell::Str(String::new()));
                    Ok(Value::Bool(cell.is_null() == missing))
                }
            }
        }
        _ => Err(no_attribute(ModuleKind::Pandas, name)),
    }
}

fn column_of(interp: &mut Interpreter, value: &Value) -> EvalResult<Option<Vec<Cell>>> {
    match value {
        Value::List(_) | Value::Tuple(_) | Value::Series(_) | Value::Index(_) => {
            Ok(Some(cells_of(value)?))
        }
        Value::Range { .. } => {
            let items = interp.iterate(value)?;
            Ok(Some(items.iter().map(Value::to_cell).collect::<EvalResult<_>>()?))
        }
        _ => Ok(None),
    }
}

fn build_frame(interp: &mut Interpreter, args: &Args) -> EvalResult<DataFrame> {
    let frame = match args.given(0, "data") {
        None => DataFrame::default(),
        Some(Value::Dict(map)) => {
            let entries: Vec<(String, Value)> = map
                .borrow()
                .iter()
                .map(|(k, v)| (k.value().str_of(), v.clone()))
                .collect();
            let mut columns = Vec::with_capacity(entries.len());
            for (name, value) in entries {
                let cells = column_of(interp, &value)?;
                columns.push((name, cells));
            }
            let rows = columns
                .iter()
                .filter_map(|(_, c)| c.as_ref().map(Vec::len))
                .max();
            let Some(rows) = rows else {
                return Err(EvalError::value_error(
                    "If using all scalar values, you must pass an index",
                ));
            };
            let mut built = Vec::with_capacity(columns.len());
            let dict = map.borrow();
            for (name, cells) in columns {
                let cells = match cells {
                    Some(cells) => cells,
                    None => {
                        let key = super::value::Key::new(Value::Str(name.clone()))?;
                        let fill = dict.get(&key).map(Value::to_cell).transpose()?;
                        vec![fill.unwrap_or(Cell::Null); rows]
                    }
                };
                interp.check_len(cells.len())?;
                built.push((name, cells));
            }
            DataFrame::new(built)?
        }
        Some(Value::List(rows)) => {
            let rows = rows.borrow().clone();
            interp.check_len(rows.len())?;
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let Value::Dict(map) = row else {
                    return Err(EvalError::unsupported("DataFrame from a list of non-dict rows"));
                };
                let record = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| Ok((k.value().str_of(), v.to_cell()?)))
                    .collect::<EvalResult<Vec<_>>>()?;
                records.push(record);
            }
            DataFrame::from_records(records)?
        }
        Some(Value::Frame(df)) => df.borrow().clone(),
        Some(other) => {
            return Err(EvalError::type_error(format!(
                "DataFrame constructor not properly called with '{}'",
                other.type_name()
            )))
        }
    };
    match args.given(usize::MAX, "columns") {
        Some(columns) => Ok(frame.select(&super::args::labels_of(columns)?)?),
        None => Ok(frame),
    }
}

fn build_series(interp: &mut Interpreter, args: &Args) -> EvalResult<Value> {
    let name = args.given(usize::MAX, "name").map(Value::str_of);
    let series = match args.given(0, "data") {
        None => Series::new(name, Vec::new()),
        Some(Value::Dict(map)) => {
            let (labels, values): (Vec<Cell>, Vec<Cell>) = map
                .borrow()
                .iter()
                .map(|(k, v)| Ok((k.value().to_cell()?, v.to_cell()?)))
                .collect::<EvalResult<Vec<_>>>()?
                .into_iter()
                .unzip();
            Series::with_index(name, Index::new(None, labels), values)
        }
        Some(Value::Series(s)) => Series::clone(s).rename(name.or_else(|| s.name.clone())),
        Some(value) => match column_of(interp, value)? {
            Some(cells) => Series::new(name, cells),
            None => Series::new(name, vec![value.to_cell()?]),
        },
    };
    let series = match args.given(1, "index") {
        Some(index) => {
            let labels = cells_of(index)?;
            if labels.len() != series.len() {
                return Err(EvalError::value_error(format!(
                    "Length of values ({}) does not match length of index ({})",
                    series.len(),
                    labels.len()
                )));
            }
            Series::with_index(series.name.clone(), Index::new(None, labels), series.values())
        }
        None => series,
    };
    interp.check_len(series.len())?;
    Ok(Value::series(series))
}

fn parse_number(text: &str) -> Option<Cell> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Cell::Int(i));
    }
    text.parse::<f64>().ok().map(Cell::from_f64)
}

fn to_numeric(args: &Args) -> EvalResult<Value> {
    let errors = args.string(1, "errors")?.unwrap_or_else(|| "raise".to_string());
    let convert = |c: &Cell| -> EvalResult<Cell> {
        match c {
            Cell::Str(s) => match parse_number(s) {
                Some(n) => Ok(n),
                None => match errors.as_str() {
                    "coerce" => Ok(Cell::Null),
                    "ignore" => Ok(c.clone()),
                    _ => Err(EvalError::value_error(format!(
                        "Unable to parse string \"{}\"",
                        s
                    ))),
                },
            },
            Cell::Bool(b) => Ok(Cell::Int(*b as i64)),
            other => Ok(other.clone()),
        }
    };
    match args.required(0, "arg", "to_numeric")? {
        Value::Series(s) => Ok(Value::series(s.try_map(convert)?)),
        value @ (Value::List(_) | Value::Tuple(_)) => Ok(Value::list(
            cells_of(value)?
                .iter()
                .map(|c| convert(c).map(|c| Value::from_cell(&c)))
                .collect::<EvalResult<_>>()?,
        )),
        scalar => Ok(Value::from_cell(&convert(&scalar.to_cell()?)?)),
    }
}

/// Float result of an elementwise function plus the warning it raises
fn unary_math(name: &str, x: f64) -> (f64, Option<&'static str>) {
    match name {
        "sqrt" if x < 0.0 => (f64::NAN, Some("invalid value encountered in sqrt")),
        "sqrt" => (x.sqrt(), None),
        "log" if x == 0.0 => (f64::NEG_INFINITY, Some("divide by zero encountered in log")),
        "log" if x < 0.0 => (f64::NAN, Some("invalid value encountered in log")),
        "log" => (x.ln(), None),
        "exp" => (x.exp(), None),
        _ => (x, None),
    }
}

fn elementwise(interp: &mut Interpreter, name: &str, args: &Args) -> EvalResult<Value> {
    let decimals = args.int(1, "decimals", 0)? as i32;
    let mut warnings = Vec::new();
    let mut apply = |c: &Cell| -> EvalResult<Cell> {
        if c.is_null() {
            return Ok(Cell::Null);
        }
        let x = c.as_f64().ok_or_else(|| {
            EvalError::type_error(format!(
                "ufunc '{}' not supported for the input types ('{}')",
                name,
                c.type_name()
            ))
        })?;
        let out = match name {
            "abs" => match c {
                Cell::Int(i) => Cell::Int(i.saturating_abs()),
                _ => Cell::Float(x.abs()),
            },
            "round" => match c {
                Cell::Int(_) if decimals >= 0 => c.clone(),
                _ => Cell::from_f64(round_float(x, decimals)),
            },
            _ => {
                let (y, warning) = unary_math(name, x);
                if let Some(w) = warning {
                    warnings.push(format!("RuntimeWarning: {}", w));
                }
                Cell::from_f64(y)
            }
        };
        Ok(out)
    };
    let out = match args.required(0, "x", name)? {
        Value::Series(s) => Value::series(s.try_map(&mut apply)?),
        value @ (Value::List(_) | Value::Tuple(_)) => Value::list(
            cells_of(value)?
                .iter()
                .map(|c| apply(c).map(|c| Value::from_cell(&c)))
                .collect::<EvalResult<_>>()?,
        ),
        scalar => {
            let cell = apply(&scalar.to_cell()?)?;
            match cell {
                Cell::Null => Value::Float(f64::NAN),
                other => Value::from_cell(&other),
            }
        }
    };
    interp.warn_all(warnings);
    Ok(out)
}

/// Values a reduction runs over; list input keeps NaN so it propagates
fn reduction_input(value: &Value) -> EvalResult<(Vec<Cell>, bool)> {
    match value {
        Value::Series(s) => Ok((s.values(), true)),
        Value::Frame(df) => Ok((
            df.borrow().columns().into_iter().flat_map(|(_, c)| c).collect(),
            true,
        )),
        other => Ok((cells_of(other)?, false)),
    }
}

fn reduction(interp: &mut Interpreter, name: &str, args: &Args) -> EvalResult<Value> {
    let (cells, skip_na) = reduction_input(args.required(0, "a", name)?)?;
    if !skip_na && cells.iter().any(Cell::is_null) {
        return Ok(Value::Float(f64::NAN));
    }
    let present: Vec<Cell> = cells.into_iter().filter(|c| !c.is_null()).collect();
    if present.is_empty() {
        return match name {
            "sum" => Ok(Value::Int(0)),
            "min" | "max" => Err(EvalError::value_error(format!(
                "zero-size array to reduction operation {} which has no identity",
                if name == "min" { "minimum" } else { "maximum" }
            ))),
            _ => {
                interp.warn("RuntimeWarning: Mean of empty slice");
                Ok(Value::Float(f64::NAN))
            }
        };
    }
    if name == "std" {
        let nums = numeric_values(&present, "std")?;
        let mean = nums.iter().sum::<f64>() / nums.len() as f64;
        let var = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / nums.len() as f64;
        return Ok(Value::Float(var.sqrt()));
    }
    let func = AggFunc::from_name(name).ok_or_else(|| no_attribute(ModuleKind::Numpy, name))?;
    Ok(Value::from_cell(&reduce(&present, func)?))
}

fn numpy(interp: &mut Interpreter, name: &str, args: Args) -> EvalResult<Value> {
    match name {
        "mean" | "sum" | "min" | "max" | "median" | "std" => reduction(interp, name, &args),
        "sqrt" | "log" | "exp" | "abs" | "round" => elementwise(interp, name, &args),
        _ => Err(no_attribute(ModuleKind::Numpy, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Limits;
    use super::*;
    use crate::syntax::parse;
    use crate::policy::SafetyPolicy;

    fn run(code: &str) -> EvalResult<Interpreter> {
        let df = DataFrame::new(vec![(
            "Sales".to_string(),
            vec![Cell::Int(4), Cell::Int(16), Cell::Null],
        )])
        .unwrap();
        let mut interp = Interpreter::new(SafetyPolicy::standard(), Limits::default(), "result");
        interp.bind("df", Value::frame(df));
        interp.bind("pd", Value::Module(ModuleKind::Pandas));
        interp.bind("np", Value::Module(ModuleKind::Numpy));
        interp.run(&parse(code).unwrap())?;
        Ok(interp)
    }

    fn result(code: &str) -> Value {
        run(code).unwrap().get("result").cloned().unwrap()
    }

    #[test]
    fn test_numpy_reductions() {
        assert_eq!(result("result = np.mean(df['Sales'])").repr(), "10.0");
        assert_eq!(result("result = np.mean([1, 2, np.nan])").repr(), "nan");
        assert_eq!(result("result = np.std([2, 4, 4, 4, 5, 5, 7, 9])").repr(), "2.0");
        assert_eq!(result("result = np.median(df)").repr(), "10.0");
    }

    #[test]
    fn test_elementwise_and_warnings() {
        assert_eq!(result("result = np.sqrt(df['Sales']).tolist()").repr(), "[2.0, 4.0, nan]");
        let interp = run("result = np.log(0)").unwrap();
        assert_eq!(interp.get("result").unwrap().repr(), "-inf");
        assert!(interp.stderr().contains("divide by zero encountered in log"));
        let interp = run("result = np.mean([])").unwrap();
        assert!(interp.stderr().contains("Mean of empty slice"));
        assert_eq!(result("result = np.round(np.pi, 2)").repr(), "3.14");
    }

    #[test]
    fn test_pandas_constructors() {
        let v = result("result = pd.DataFrame({'a': [1, 2], 'b': 'x'}).shape");
        assert_eq!(v.repr(), "(2, 2)");
        let v = result("result = pd.DataFrame([{'a': 1}, {'a': 2, 'b': 3}])['b'].tolist()");
        assert_eq!(v.repr(), "[nan, 3.0]");
        let v = result("result = pd.Series([3, 1], name='n').sort_values().tolist()");
        assert_eq!(v.repr(), "[1, 3]");
        let v = result("result = pd.to_numeric(pd.Series(['1', 'x', '2.5']), errors='coerce').tolist()");
        assert_eq!(v.repr(), "[1.0, nan, 2.5]");
        let err = run("result = pd.to_numeric('abc')").err().unwrap();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert!(matches!(result("result = pd.isna(np.nan)"), Value::Bool(true)));
    }

    #[test]
    fn test_unknown_attribute() {
        let err = run("result = np.linalg").err().unwrap();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }
}
