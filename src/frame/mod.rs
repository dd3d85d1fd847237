//! In-memory tabular library
//!
//! Columns are stored as `polars` series inside a `polars` frame; row labels
//! live in a cell-based [`Index`] beside them. Element-wise arithmetic and
//! reductions work on [`Cell`]s so that results follow dataframe semantics
//! (nulls skipped, integer results kept exact), while row selection,
//! ordering, null masks and group-by aggregation run through polars.

mod cell;
mod column;
mod dataframe;
mod display;
mod groupby;
mod index;
mod series;

pub use cell::{format_float, quote_str, Cell};
pub use dataframe::DataFrame;
pub use groupby::{Aggregated, GroupBy};
pub use index::Index;
pub use series::{arith_cells, compare_cells, round_float, ArithOp, CmpKind, Series};
pub(crate) use series::mask_positions;

use polars::prelude as pl;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Errors raised by frame operations, named after the exception they mirror
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("{0}")]
    Key(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Value(String),
    #[error("{0}")]
    Index(String),
    #[error("{0}")]
    ZeroDivision(String),
}

impl FrameError {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::Key(_) => "KeyError",
            FrameError::Type(_) => "TypeError",
            FrameError::Value(_) => "ValueError",
            FrameError::Index(_) => "IndexError",
            FrameError::ZeroDivision(_) => "ZeroDivisionError",
        }
    }

    pub fn missing_column(name: &str) -> Self {
        FrameError::Key(quote_str(name))
    }
}

impl From<pl::PolarsError> for FrameError {
    fn from(e: pl::PolarsError) -> Self {
        match e {
            pl::PolarsError::ColumnNotFound(name) => FrameError::Key(quote_str(&name.to_string())),
            pl::PolarsError::Duplicate(msg) => FrameError::Value(msg.to_string()),
            other => FrameError::Value(other.to_string()),
        }
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Column data type as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int64,
    Float64,
    Bool,
    Object,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Object => "object",
        }
    }

    /// Infer the dtype of a column from its cells
    pub fn infer(values: &[Cell]) -> Self {
        if values.is_empty() {
            return DType::Object;
        }
        let mut has_null = false;
        let (mut ints, mut floats, mut bools, mut others) = (0usize, 0usize, 0usize, 0usize);
        for v in values {
            match v {
                Cell::Null => has_null = true,
                Cell::Float(x) if x.is_nan() => has_null = true,
                Cell::Int(_) => ints += 1,
                Cell::Float(_) => floats += 1,
                Cell::Bool(_) => bools += 1,
                Cell::Str(_) => others += 1,
            }
        }
        if others > 0 {
            DType::Object
        } else if bools > 0 {
            if ints + floats > 0 {
                DType::Object
            } else {
                DType::Bool
            }
        } else if floats > 0 || has_null {
            DType::Float64
        } else if ints > 0 {
            DType::Int64
        } else {
            DType::Object
        }
    }

    /// The dtype a stored column reports
    pub fn of(dtype: &pl::DataType) -> Self {
        match dtype {
            pl::DataType::Boolean => DType::Bool,
            pl::DataType::Int64 => DType::Int64,
            pl::DataType::Float64 | pl::DataType::Null => DType::Float64,
            _ => DType::Object,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int64 | DType::Float64 | DType::Bool)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reductions shared by series, frames and group-bys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Size,
    Nunique,
    Std,
    Var,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "sum" => AggFunc::Sum,
            "mean" | "average" => AggFunc::Mean,
            "median" => AggFunc::Median,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "count" => AggFunc::Count,
            "size" => AggFunc::Size,
            "nunique" => AggFunc::Nunique,
            "std" => AggFunc::Std,
            "var" => AggFunc::Var,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Median => "median",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Count => "count",
            AggFunc::Size => "size",
            AggFunc::Nunique => "nunique",
            AggFunc::Std => "std",
            AggFunc::Var => "var",
        }
    }

    /// Whether the reduction only makes sense for numeric columns
    pub fn numeric_only(&self) -> bool {
        matches!(
            self,
            AggFunc::Mean | AggFunc::Median | AggFunc::Std | AggFunc::Var
        )
    }
}

fn non_null(values: &[Cell]) -> impl Iterator<Item = &Cell> {
    values.iter().filter(|c| !c.is_null())
}

/// Numeric values with nulls skipped; strings are a type error
pub fn numeric_values(values: &[Cell], op: &str) -> FrameResult<Vec<f64>> {
    non_null(values)
        .map(|c| {
            c.as_f64().ok_or_else(|| {
                FrameError::Type(format!(
                    "Could not convert {} to numeric for '{}'",
                    c.repr(),
                    op
                ))
            })
        })
        .collect()
}

/// Apply a reduction to a column of cells
pub fn reduce(values: &[Cell], func: AggFunc) -> FrameResult<Cell> {
    match func {
        AggFunc::Count => Ok(Cell::Int(non_null(values).count() as i64)),
        AggFunc::Size => Ok(Cell::Int(values.len() as i64)),
        AggFunc::Nunique => {
            let distinct: HashSet<&Cell> = non_null(values).collect();
            Ok(Cell::Int(distinct.len() as i64))
        }
        AggFunc::Sum => sum_cells(values),
        AggFunc::Mean => {
            let nums = numeric_values(values, "mean")?;
            if nums.is_empty() {
                return Ok(Cell::Null);
            }
            Ok(Cell::from_f64(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        AggFunc::Median => {
            let nums = numeric_values(values, "median")?;
            Ok(quantile_of(nums, 0.5).map(Cell::from_f64).unwrap_or(Cell::Null))
        }
        AggFunc::Std | AggFunc::Var => {
            let nums = numeric_values(values, func.name())?;
            let Some(var) = sample_variance(&nums) else {
                return Ok(Cell::Null);
            };
            let out = if func == AggFunc::Std { var.sqrt() } else { var };
            Ok(Cell::from_f64(out))
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<&Cell> = None;
            for cell in non_null(values) {
                best = match best {
                    None => Some(cell),
                    Some(current) => {
                        let ord = cell.compare(current).ok_or_else(|| {
                            FrameError::Type(format!(
                                "'<' not supported between instances of '{}' and '{}'",
                                cell.type_name(),
                                current.type_name()
                            ))
                        })?;
                        let better = if func == AggFunc::Min {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        };
                        Some(if better { cell } else { current })
                    }
                };
            }
            Ok(best.cloned().unwrap_or(Cell::Null))
        }
    }
}

fn sum_cells(values: &[Cell]) -> FrameResult<Cell> {
    let cells: Vec<&Cell> = non_null(values).collect();
    if !cells.is_empty() && cells.iter().all(|c| matches!(c, Cell::Str(_))) {
        let joined: String = cells.iter().filter_map(|c| c.as_str()).collect();
        return Ok(Cell::Str(joined));
    }
    let mut int_acc: Option<i64> = Some(0);
    let mut float_acc = 0.0;
    for cell in cells {
        match cell {
            Cell::Int(i) => int_acc = int_acc.and_then(|acc| acc.checked_add(*i)),
            Cell::Bool(b) => int_acc = int_acc.and_then(|acc| acc.checked_add(*b as i64)),
            Cell::Float(_) => int_acc = None,
            other => {
                return Err(FrameError::Type(format!(
                    "unsupported operand type(s) for +: 'int' and '{}'",
                    other.type_name()
                )))
            }
        }
        float_acc += cell.as_f64().unwrap_or(0.0);
    }
    Ok(match int_acc {
        Some(i) => Cell::Int(i),
        None => Cell::from_f64(float_acc),
    })
}

pub fn sample_variance(nums: &[f64]) -> Option<f64> {
    if nums.len() < 2 {
        return None;
    }
    let n = nums.len() as f64;
    let mean = nums.iter().sum::<f64>() / n;
    Some(nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

/// Linear-interpolated quantile; `None` for an empty input
pub fn quantile_of(mut nums: Vec<f64>, q: f64) -> Option<f64> {
    if nums.is_empty() {
        return None;
    }
    nums.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (nums.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(nums[lo] + (nums[hi] - nums[lo]) * frac)
}

/// Resolve Python slice bounds against a sequence length
pub fn slice_indices(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> FrameResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(FrameError::Value("slice step cannot be zero".to_string()));
    }
    let n = len as i64;
    let norm = |v: i64, lo: i64, hi: i64| {
        let v = if v < 0 { v.saturating_add(n) } else { v };
        v.clamp(lo, hi)
    };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map(|s| norm(s, 0, n)).unwrap_or(0);
        let stop = stop.map(|s| norm(s, 0, n)).unwrap_or(n);
        while i < stop {
            out.push(i as usize);
            i = i.saturating_add(step);
        }
    } else {
        let mut i = start.map(|s| norm(s, -1, n - 1)).unwrap_or(n - 1);
        let stop = stop.map(|s| norm(s, -1, n - 1)).unwrap_or(-1);
        while i > stop {
            out.push(i as usize);
            i = i.saturating_add(step);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Vec<Cell> {
        v.iter().map(|i| Cell::Int(*i)).collect()
    }

    #[test]
    fn test_dtype_inference() {
        assert_eq!(DType::infer(&ints(&[1, 2])), DType::Int64);
        assert_eq!(DType::infer(&[Cell::Int(1), Cell::Null]), DType::Float64);
        assert_eq!(DType::infer(&[Cell::Int(1), Cell::Float(2.5)]), DType::Float64);
        assert_eq!(DType::infer(&[Cell::Bool(true), Cell::Null]), DType::Bool);
        assert_eq!(DType::infer(&[Cell::from("a"), Cell::Int(1)]), DType::Object);
        assert_eq!(DType::infer(&[]), DType::Object);
    }

    #[test]
    fn test_dtype_of_storage() {
        assert_eq!(DType::of(&pl::DataType::Int64), DType::Int64);
        assert_eq!(DType::of(&pl::DataType::Float64), DType::Float64);
        assert_eq!(DType::of(&pl::DataType::Boolean), DType::Bool);
        assert_eq!(DType::of(&pl::DataType::String), DType::Object);
    }

    #[test]
    fn test_reduce() {
        let v = vec![Cell::Int(1), Cell::Null, Cell::Int(4), Cell::Int(7)];
        assert_eq!(reduce(&v, AggFunc::Sum).unwrap(), Cell::Int(12));
        assert_eq!(reduce(&v, AggFunc::Mean).unwrap(), Cell::Float(4.0));
        assert_eq!(reduce(&v, AggFunc::Median).unwrap(), Cell::Float(4.0));
        assert_eq!(reduce(&v, AggFunc::Count).unwrap(), Cell::Int(3));
        assert_eq!(reduce(&v, AggFunc::Size).unwrap(), Cell::Int(4));
        assert_eq!(reduce(&v, AggFunc::Max).unwrap(), Cell::Int(7));
        assert_eq!(reduce(&v, AggFunc::Var).unwrap(), Cell::Float(9.0));
        assert_eq!(reduce(&[], AggFunc::Mean).unwrap(), Cell::Null);
        assert_eq!(reduce(&[], AggFunc::Sum).unwrap(), Cell::Int(0));
    }

    #[test]
    fn test_reduce_strings() {
        let v = vec![Cell::from("b"), Cell::from("a")];
        assert_eq!(reduce(&v, AggFunc::Min).unwrap(), Cell::from("a"));
        assert_eq!(reduce(&v, AggFunc::Sum).unwrap(), Cell::from("ba"));
        assert_eq!(reduce(&v, AggFunc::Mean).unwrap_err().kind(), "TypeError");
    }

    #[test]
    fn test_sum_overflow_falls_back_to_float() {
        let v = ints(&[i64::MAX, 1]);
        assert_eq!(reduce(&v, AggFunc::Sum).unwrap(), Cell::Float(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(5, None, None, None).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_indices(5, Some(1), Some(100), Some(2)).unwrap(), vec![1, 3]);
        assert_eq!(slice_indices(5, Some(i64::MIN), None, Some(i64::MAX)).unwrap(), vec![0]);
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_quantile() {
        assert_eq!(quantile_of(vec![1.0, 2.0, 3.0, 4.0], 0.5), Some(2.5));
        assert_eq!(quantile_of(vec![], 0.5), None);
    }
}
