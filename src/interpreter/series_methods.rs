//! Series, `.str` accessor and index methods

use super::args::{cells_of, Args};
use super::error::{ErrorKind, EvalError, EvalResult};
use super::value::{Key, Value};
use super::Interpreter;
use crate::frame::{AggFunc, Cell, Index, Series};
use indexmap::IndexMap;
use regex::RegexBuilder;
use std::rc::Rc;

pub const SERIES_METHODS: &[&str] = &[
    "abs",
    "apply",
    "astype",
    "between",
    "count",
    "cumsum",
    "dropna",
    "fillna",
    "head",
    "idxmax",
    "idxmin",
    "isin",
    "isna",
    "isnull",
    "map",
    "max",
    "mean",
    "median",
    "min",
    "nlargest",
    "notna",
    "notnull",
    "nsmallest",
    "nunique",
    "quantile",
    "round",
    "sort_values",
    "std",
    "sum",
    "tail",
    "to_dict",
    "to_list",
    "tolist",
    "unique",
    "value_counts",
    "var",
];

pub const STR_METHODS: &[&str] = &[
    "contains",
    "endswith",
    "len",
    "lower",
    "replace",
    "startswith",
    "strip",
    "upper",
];

pub const INDEX_METHODS: &[&str] = &["to_list", "tolist", "unique"];

fn scalar(cell: Cell) -> Value {
    Value::from_cell(&cell)
}

fn cell_list(cells: &[Cell]) -> Value {
    Value::list(cells.iter().map(Value::from_cell).collect())
}

fn top_n(args: &Args) -> EvalResult<usize> {
    Ok(args.int(0, "n", 5)?.max(0) as usize)
}

/// `'int64'`, `int`, `float` and `str` all name a dtype
fn dtype_name(value: &Value) -> EvalResult<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Type(t) => Ok(t.to_string()),
        other => Err(EvalError::type_error(format!(
            "data type '{}' not understood",
            other.str_of()
        ))),
    }
}

fn lookup_table(map: &IndexMap<Key, Value>, cell: &Cell) -> EvalResult<Option<Cell>> {
    let key = Key::new(Value::from_cell(cell))?;
    map.get(&key).map(Value::to_cell).transpose()
}

/// `map` / `apply` with a callable or a lookup dict
fn map_series(interp: &mut Interpreter, s: &Series, func: &Value) -> EvalResult<Series> {
    if let Value::Dict(map) = func {
        let map = map.borrow();
        return s.try_map(|c| Ok(lookup_table(&map, c)?.unwrap_or(Cell::Null)));
    }
    s.try_map(|c| {
        interp.tick()?;
        let out = interp.call1(func, Value::from_cell(c))?;
        out.to_cell()
            .map_err(|_| EvalError::unsupported("a mapped function returning a non-scalar value"))
    })
}

fn quantile(s: &Series, args: &Args) -> EvalResult<Value> {
    match args.given(0, "q") {
        Some(q @ (Value::List(_) | Value::Tuple(_))) => {
            let qs = cells_of(q)?;
            let mut values = Vec::with_capacity(qs.len());
            for q in &qs {
                let q = q
                    .as_f64()
                    .ok_or_else(|| EvalError::type_error("quantile must be a number"))?;
                values.push(s.quantile(q)?);
            }
            Ok(Value::series(Series::with_index(
                s.name.clone(),
                Index::new(None, qs),
                values,
            )))
        }
        _ => {
            let q = args.float(0, "q", 0.5)?;
            if !(0.0..=1.0).contains(&q) {
                return Err(EvalError::value_error(
                    "percentiles should all be in the interval [0, 1]",
                ));
            }
            Ok(scalar(s.quantile(q)?))
        }
    }
}

fn to_dict(s: &Series) -> EvalResult<Value> {
    let mut map = IndexMap::with_capacity(s.len());
    for (label, value) in s.items() {
        map.insert(Key::new(Value::from_cell(&label))?, Value::from_cell(&value));
    }
    Ok(Value::dict(map))
}

pub fn call_series(
    interp: &mut Interpreter,
    s: &Rc<Series>,
    name: &str,
    args: Args,
) -> EvalResult<Value> {
    let series = |out: Series| -> EvalResult<Value> { Ok(Value::series(out)) };
    match name {
        "sum" | "mean" | "median" | "min" | "max" | "count" | "std" | "var" | "nunique" => {
            let func = AggFunc::from_name(name)
                .ok_or_else(|| EvalError::attribute("Series", name))?;
            Ok(scalar(s.reduce(func)?))
        }
        "unique" => Ok(Value::Index(Rc::new(s.unique()))),
        "value_counts" => series(s.value_counts(
            args.kw_flag("normalize", false)?,
            args.kw_flag("ascending", false)?,
        )),
        "quantile" => quantile(s, &args),
        "idxmax" => Ok(scalar(s.idxmax()?)),
        "idxmin" => Ok(scalar(s.idxmin()?)),
        "head" => series(s.head(args.int(0, "n", 5)?)),
        "tail" => series(s.tail(args.int(0, "n", 5)?)),
        "sort_values" => series(s.sort_values(args.flag(1, "ascending", true)?)?),
        "nlargest" => series(s.nlargest(top_n(&args)?, true)?),
        "nsmallest" => series(s.nlargest(top_n(&args)?, false)?),
        "tolist" | "to_list" => {
            interp.check_len(s.len())?;
            Ok(cell_list(&s.values()))
        }
        "to_dict" => to_dict(s),
        "astype" => series(s.astype(&dtype_name(args.required(0, "dtype", name)?)?)?),
        "round" => series(s.round(args.int(0, "decimals", 0)? as i32)),
        "abs" => series(s.abs()?),
        "isna" | "isnull" => series(s.isna()),
        "notna" | "notnull" => series(s.notna()),
        "fillna" => series(s.fillna(&args.required(0, "value", name)?.to_cell()?)),
        "dropna" => series(s.dropna()?),
        "apply" | "map" => {
            let func = args.required(0, "func", name)?.clone();
            series(map_series(interp, s, &func)?)
        }
        "between" => {
            let low = args.required(0, "left", name)?.to_cell()?;
            let high = args.required(1, "right", name)?.to_cell()?;
            series(s.between(&low, &high)?)
        }
        "isin" => series(s.isin(&cells_of(args.required(0, "values", name)?)?)),
        "cumsum" => series(s.cumsum()?),
        _ => Err(EvalError::attribute("Series", name)),
    }
}

fn pattern_arg(args: &Args, name: &str, method: &str) -> EvalResult<String> {
    match args.required(0, name, method)? {
        Value::Str(s) => Ok(s.clone()),
        other => Err(EvalError::type_error(format!(
            "{}() expects a string pattern, not '{}'",
            method,
            other.type_name()
        ))),
    }
}

fn contains(s: &Series, args: &Args) -> EvalResult<Series> {
    let pat = pattern_arg(args, "pat", "contains")?;
    let case = args.flag(1, "case", true)?;
    let na = match args.given(usize::MAX, "na") {
        Some(v) => v.to_cell()?,
        None => Cell::Null,
    };
    let matcher: Box<dyn Fn(&str) -> bool> = if args.flag(usize::MAX, "regex", true)? {
        let re = RegexBuilder::new(&pat)
            .case_insensitive(!case)
            .build()
            .map_err(|e| EvalError::value_error(format!("invalid pattern: {}", e)))?;
        Box::new(move |text| re.is_match(text))
    } else if case {
        Box::new(move |text| text.contains(pat.as_str()))
    } else {
        let pat = pat.to_lowercase();
        Box::new(move |text| text.to_lowercase().contains(pat.as_str()))
    };
    Ok(s.map_values(|c| match c {
        Cell::Str(text) => Cell::Bool(matcher(text)),
        _ => na.clone(),
    }))
}

fn str_replace(s: &Series, args: &Args) -> EvalResult<Series> {
    let pat = pattern_arg(args, "pat", "replace")?;
    let repl = match args.required(1, "repl", "replace")? {
        Value::Str(r) => r.clone(),
        other => other.str_of(),
    };
    if args.flag(usize::MAX, "regex", false)? {
        let re = RegexBuilder::new(&pat)
            .build()
            .map_err(|e| EvalError::value_error(format!("invalid pattern: {}", e)))?;
        return Ok(s.str_map(|text| Cell::Str(re.replace_all(text, repl.as_str()).into_owned())));
    }
    Ok(s.str_map(|text| Cell::Str(text.replace(pat.as_str(), &repl))))
}

fn strip(s: &Series, args: &Args) -> EvalResult<Series> {
    let chars: Option<Vec<char>> = args.string(0, "to_strip")?.map(|c| c.chars().collect());
    Ok(s.str_map(|text| {
        let trimmed = text.trim_matches(|ch: char| match &chars {
            Some(set) => set.contains(&ch),
            None => ch.is_whitespace(),
        });
        Cell::Str(trimmed.to_string())
    }))
}

/// Vectorized string methods behind `series.str`
pub fn call_str(s: &Rc<Series>, name: &str, args: Args) -> EvalResult<Value> {
    let out = match name {
        "lower" => s.str_map(|t| Cell::Str(t.to_lowercase())),
        "upper" => s.str_map(|t| Cell::Str(t.to_uppercase())),
        "strip" => strip(s, &args)?,
        "len" => s.str_map(|t| Cell::Int(t.chars().count() as i64)),
        "contains" => contains(s, &args)?,
        "startswith" | "endswith" => {
            let pat = pattern_arg(&args, "pat", name)?;
            let start = name == "startswith";
            s.str_map(|t| Cell::Bool(if start { t.starts_with(&pat) } else { t.ends_with(&pat) }))
        }
        "replace" => str_replace(s, &args)?,
        _ => return Err(EvalError::attribute("StringMethods", name)),
    };
    Ok(Value::series(out))
}

pub fn call_index(labels: &Rc<Vec<Cell>>, name: &str, _args: Args) -> EvalResult<Value> {
    match name {
        "tolist" | "to_list" => Ok(cell_list(labels)),
        "unique" => {
            let mut seen = std::collections::HashSet::new();
            let unique: Vec<Cell> = labels.iter().filter(|c| seen.insert((*c).clone())).cloned().collect();
            Ok(Value::Index(Rc::new(unique)))
        }
        _ => Err(EvalError::attribute("Index", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Limits;
    use super::*;
    use crate::frame::DataFrame;
    use crate::policy::SafetyPolicy;
    use crate::syntax::parse;

    fn eval(code: &str) -> EvalResult<Value> {
        let df = DataFrame::new(vec![
            (
                "Name".to_string(),
                vec![" alice ".into(), "Bob".into(), "carol".into(), Cell::Null],
            ),
            (
                "Score".to_string(),
                vec![Cell::Float(90.5), Cell::Int(70), Cell::Int(85), Cell::Int(70)],
            ),
            (
                "Units".to_string(),
                vec![Cell::Int(3), Cell::Int(-1), Cell::Int(4), Cell::Int(2)],
            ),
        ])
        .unwrap();
        let mut interp = Interpreter::new(SafetyPolicy::standard(), Limits::default(), "result");
        interp.bind("df", Value::frame(df));
        interp.run(&parse(code).unwrap())?;
        Ok(interp.get("result").cloned().unwrap_or(Value::None))
    }

    #[test]
    fn test_reductions_and_counts() {
        assert_eq!(eval("result = df['Score'].max()").unwrap().repr(), "90.5");
        assert_eq!(eval("result = df['Score'].nunique()").unwrap().repr(), "3");
        let v = eval("result = df['Score'].value_counts().to_dict()").unwrap();
        assert_eq!(v.repr(), "{70.0: 2, 90.5: 1, 85.0: 1}");
        assert_eq!(eval("result = df['Name'].count()").unwrap().repr(), "3");
        let v = eval("result = df['Score'].quantile(0.5)").unwrap();
        assert_eq!(v.repr(), "77.5");
        assert_eq!(eval("result = df['Units'].idxmin()").unwrap().repr(), "1");
        let err = eval("result = df['Score'].quantile(2)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn test_str_accessor() {
        let v = eval("result = df['Name'].str.strip().str.upper().tolist()").unwrap();
        assert_eq!(v.repr(), "['ALICE', 'BOB', 'CAROL', nan]");
        let v = eval("result = df[df['Name'].str.contains('o', na=False)]['Score'].tolist()").unwrap();
        assert_eq!(v.repr(), "[70.0, 85.0]");
        let v = eval("result = df['Name'].str.contains('B', case=False, na=False).sum()").unwrap();
        assert_eq!(v.repr(), "1");
        let err = eval("result = df['Name'].str.contains('(', na=False)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        let err = eval("result = df['Name'].str.title()").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_map_apply_and_ordering() {
        let v = eval("result = df['Score'].apply(lambda x: x > 80).tolist()").unwrap();
        assert_eq!(v.repr(), "[True, False, True, False]");
        let v = eval("result = df['Score'].map({70: 'C'}).fillna('?').tolist()").unwrap();
        assert_eq!(v.repr(), "['?', 'C', '?', 'C']");
        let v = eval("result = df['Units'].sort_values(ascending=False).tolist()").unwrap();
        assert_eq!(v.repr(), "[4, 3, 2, -1]");
        let v = eval("result = df['Units'].nsmallest(2).to_dict()").unwrap();
        assert_eq!(v.repr(), "{1: -1, 3: 2}");
        let v = eval("result = df['Units'].abs().cumsum().tolist()").unwrap();
        assert_eq!(v.repr(), "[3, 4, 8, 10]");
    }

    #[test]
    fn test_conversions() {
        let v = eval("result = df['Score'].astype(int).tolist()").unwrap();
        assert_eq!(v.repr(), "[90, 70, 85, 70]");
        let v = eval("result = df['Score'].unique().tolist()").unwrap();
        assert_eq!(v.repr(), "[90.5, 70.0, 85.0]");
        let v = eval("result = df['Units'].between(0, 3).tolist()").unwrap();
        assert_eq!(v.repr(), "[True, False, False, True]");
        let err = eval("result = df['Score'].explode()").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }
}
