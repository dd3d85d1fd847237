use super::column::{cell_at, cells_of_column, column_from_cells, mask_ca, positions_ca};
use super::{
    numeric_values, quantile_of, reduce, AggFunc, Cell, DType, FrameError, FrameResult, Index,
};
use polars::prelude as pl;
use polars::prelude::IntoSeries;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Element-wise arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::FloorDiv => "//",
            ArithOp::Mod => "%",
            ArithOp::Pow => "**",
        }
    }
}

/// Element-wise comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpKind::Eq => "==",
            CmpKind::Ne => "!=",
            CmpKind::Lt => "<",
            CmpKind::Le => "<=",
            CmpKind::Gt => ">",
            CmpKind::Ge => ">=",
        }
    }
}

const DIVIDE_BY_ZERO: &str = "RuntimeWarning: divide by zero encountered in divide";
const INVALID_DIVIDE: &str = "RuntimeWarning: invalid value encountered in divide";

/// Arithmetic on two cells.
///
/// With `warnings` present, division by zero follows float semantics and
/// records a warning; without it, division by zero is an error.
pub fn arith_cells(
    a: &Cell,
    op: ArithOp,
    b: &Cell,
    warnings: Option<&mut Vec<String>>,
) -> FrameResult<Cell> {
    if a.is_null() || b.is_null() {
        return Ok(Cell::Null);
    }
    match (a, b) {
        (Cell::Str(x), Cell::Str(y)) if op == ArithOp::Add => return Ok(Cell::Str(format!("{x}{y}"))),
        (Cell::Str(s), Cell::Int(n)) | (Cell::Int(n), Cell::Str(s)) if op == ArithOp::Mul => {
            return Ok(Cell::Str(s.repeat((*n).max(0) as usize)))
        }
        (Cell::Str(_), _) | (_, Cell::Str(_)) => {
            return Err(FrameError::Type(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            )))
        }
        _ => {}
    }

    let as_int = |c: &Cell| match c {
        Cell::Int(i) => Some(*i),
        Cell::Bool(b) => Some(*b as i64),
        _ => None,
    };
    if let (Some(x), Some(y)) = (as_int(a), as_int(b)) {
        if let Some(result) = int_arith(x, op, y, warnings.is_none())? {
            return Ok(result);
        }
    }

    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    if y == 0.0 && matches!(op, ArithOp::Div | ArithOp::FloorDiv | ArithOp::Mod) {
        match warnings {
            None => {
                let msg = match op {
                    ArithOp::Div => "float division by zero",
                    ArithOp::FloorDiv => "float floor division by zero",
                    _ => "float modulo",
                };
                return Err(FrameError::ZeroDivision(msg.to_string()));
            }
            Some(w) => {
                let msg = if x == 0.0 || op == ArithOp::Mod {
                    INVALID_DIVIDE
                } else {
                    DIVIDE_BY_ZERO
                };
                w.push(msg.to_string());
            }
        }
    }
    let out = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::FloorDiv => (x / y).floor(),
        ArithOp::Mod => {
            if y == 0.0 {
                f64::NAN
            } else {
                let r = x % y;
                if r != 0.0 && (r < 0.0) != (y < 0.0) {
                    r + y
                } else {
                    r
                }
            }
        }
        ArithOp::Pow => x.powf(y),
    };
    Ok(Cell::from_f64(out))
}

/// Integer arithmetic; `Ok(None)` falls back to floats
fn int_arith(x: i64, op: ArithOp, y: i64, strict: bool) -> FrameResult<Option<Cell>> {
    let out = match op {
        ArithOp::Add => x.checked_add(y),
        ArithOp::Sub => x.checked_sub(y),
        ArithOp::Mul => x.checked_mul(y),
        ArithOp::Div => {
            if y == 0 && strict {
                return Err(FrameError::ZeroDivision("division by zero".to_string()));
            }
            return Ok(None);
        }
        ArithOp::FloorDiv | ArithOp::Mod => {
            if y == 0 {
                if strict {
                    return Err(FrameError::ZeroDivision(
                        "integer division or modulo by zero".to_string(),
                    ));
                }
                return Ok(None);
            }
            // only i64::MIN / -1 overflows; its remainder is zero
            let (Some(q), Some(r)) = (x.checked_div(y), x.checked_rem(y)) else {
                return Ok((op == ArithOp::Mod).then_some(Cell::Int(0)));
            };
            let adjust = r != 0 && ((r < 0) != (y < 0));
            if op == ArithOp::FloorDiv {
                Some(if adjust { q - 1 } else { q })
            } else {
                Some(if adjust { r + y } else { r })
            }
        }
        ArithOp::Pow => {
            if y < 0 {
                return Ok(None);
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
    };
    Ok(out.map(Cell::Int))
}

/// Comparison of two cells with null-aware semantics
pub fn compare_cells(a: &Cell, op: CmpKind, b: &Cell) -> FrameResult<bool> {
    if a.is_null() || b.is_null() {
        return Ok(op == CmpKind::Ne);
    }
    match a.compare(b) {
        Some(ord) => Ok(match op {
            CmpKind::Eq => ord == Ordering::Equal,
            CmpKind::Ne => ord != Ordering::Equal,
            CmpKind::Lt => ord == Ordering::Less,
            CmpKind::Le => ord != Ordering::Greater,
            CmpKind::Gt => ord == Ordering::Greater,
            CmpKind::Ge => ord != Ordering::Less,
        }),
        None => match op {
            CmpKind::Eq => Ok(false),
            CmpKind::Ne => Ok(true),
            _ => Err(FrameError::Type(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

/// A labelled one-dimensional column
#[derive(Debug, Clone)]
pub struct Series {
    pub name: Option<String>,
    pub index: Index,
    data: pl::Series,
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.index == other.index
            && self.dtype() == other.dtype()
            && self.values() == other.values()
    }
}

impl Series {
    pub fn new(name: Option<String>, values: Vec<Cell>) -> Self {
        let index = Index::range(values.len());
        Self::with_index(name, index, values)
    }

    pub fn with_index(name: Option<String>, index: Index, values: Vec<Cell>) -> Self {
        let data = column_from_cells(name.as_deref().unwrap_or(""), &values);
        Self { name, index, data }
    }

    /// Wrap a stored column; the index must have the column's length
    pub(crate) fn from_column(name: Option<String>, index: Index, data: pl::Series) -> Self {
        Self { name, index, data }
    }

    pub(crate) fn data(&self) -> &pl::Series {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        DType::of(self.data.dtype())
    }

    pub fn values(&self) -> Vec<Cell> {
        cells_of_column(&self.data)
    }

    pub fn value_at(&self, position: usize) -> Cell {
        cell_at(&self.data, position)
    }

    pub fn rename(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Value at a row label
    pub fn get(&self, label: &Cell) -> Option<Cell> {
        self.index.position(label).map(|p| self.value_at(p))
    }

    pub fn take(&self, positions: &[usize]) -> FrameResult<Series> {
        Ok(Series {
            name: self.name.clone(),
            index: self.index.take(positions),
            data: self.data.take(&positions_ca(positions))?,
        })
    }

    fn slice_rows(&self, start: usize, end: usize) -> Series {
        let len = end.saturating_sub(start);
        Series {
            name: self.name.clone(),
            index: self.index.slice(start, len),
            data: self.data.slice(start as i64, len),
        }
    }

    /// Keep rows where the mask is true
    pub fn filter(&self, mask: &Series) -> FrameResult<Series> {
        let keep = mask_positions(self.len(), &self.index, mask)?;
        self.take(&keep)
    }

    pub fn head(&self, n: i64) -> Series {
        let (start, end) = head_bounds(self.len(), n);
        self.slice_rows(start, end)
    }

    pub fn tail(&self, n: i64) -> Series {
        let (start, end) = tail_bounds(self.len(), n);
        self.slice_rows(start, end)
    }

    /// Stable sort with nulls last in either direction
    pub fn sort_values(&self, ascending: bool) -> FrameResult<Series> {
        let order = self.data.arg_sort(pl::SortOptions {
            descending: !ascending,
            nulls_last: true,
            maintain_order: true,
            ..Default::default()
        });
        let positions: Vec<usize> = order.into_iter().flatten().map(|p| p as usize).collect();
        self.take(&positions)
    }

    pub fn reduce(&self, func: AggFunc) -> FrameResult<Cell> {
        reduce(&self.values(), func)
    }

    pub fn quantile(&self, q: f64) -> FrameResult<Cell> {
        let nums = numeric_values(&self.values(), "quantile")?;
        Ok(quantile_of(nums, q)
            .map(Cell::from_f64)
            .unwrap_or(Cell::Null))
    }

    /// Distinct values in order of first appearance
    pub fn unique(&self) -> Vec<Cell> {
        let mut seen = HashSet::new();
        self.values()
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Counts of each non-null value, most frequent first
    pub fn value_counts(&self, normalize: bool, ascending: bool) -> Series {
        let mut order: Vec<Cell> = Vec::new();
        let mut counts: HashMap<Cell, i64> = HashMap::new();
        for v in self.values().into_iter().filter(|v| !v.is_null()) {
            let entry = counts.entry(v.clone()).or_insert_with(|| {
                order.push(v);
                0
            });
            *entry += 1;
        }
        let mut pairs: Vec<(Cell, i64)> = order
            .into_iter()
            .map(|k| {
                let c = counts.get(&k).copied().unwrap_or(0);
                (k, c)
            })
            .collect();
        if ascending {
            pairs.sort_by(|a, b| a.1.cmp(&b.1));
        } else {
            pairs.sort_by(|a, b| b.1.cmp(&a.1));
        }
        let total: i64 = pairs.iter().map(|(_, c)| c).sum();
        let (labels, values): (Vec<Cell>, Vec<Cell>) = pairs
            .into_iter()
            .map(|(k, c)| {
                let v = if normalize {
                    Cell::from_f64(c as f64 / total as f64)
                } else {
                    Cell::Int(c)
                };
                (k, v)
            })
            .unzip();
        let name = if normalize { "proportion" } else { "count" };
        Series::with_index(
            Some(name.to_string()),
            Index::new(self.name.clone(), labels),
            values,
        )
    }

    fn arg_extreme(&self, want: Ordering, what: &str) -> FrameResult<Cell> {
        let values = self.values();
        let mut best: Option<usize> = None;
        for (i, v) in values.iter().enumerate() {
            if v.is_null() {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) => match v.compare(&values[b]) {
                    Some(ord) if ord == want => Some(i),
                    Some(_) => Some(b),
                    None => {
                        return Err(FrameError::Type(format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            if want == Ordering::Greater { ">" } else { "<" },
                            v.type_name(),
                            values[b].type_name()
                        )))
                    }
                },
            };
        }
        best.map(|p| self.index.label(p)).ok_or_else(|| {
            FrameError::Value(format!("attempt to get {} of an empty sequence", what))
        })
    }

    pub fn idxmax(&self) -> FrameResult<Cell> {
        self.arg_extreme(Ordering::Greater, "argmax")
    }

    pub fn idxmin(&self) -> FrameResult<Cell> {
        self.arg_extreme(Ordering::Less, "argmin")
    }

    /// The `n` largest (or smallest) non-null values
    pub fn nlargest(&self, n: usize, largest: bool) -> FrameResult<Series> {
        let values = self.values();
        let mut order: Vec<usize> = (0..values.len())
            .filter(|&i| !values[i].is_null())
            .collect();
        order.sort_by(|&a, &b| {
            let ord = values[a].sort_cmp(&values[b]);
            if largest {
                ord.reverse()
            } else {
                ord
            }
        });
        order.truncate(n);
        self.take(&order)
    }

    pub fn map_values(&self, f: impl Fn(&Cell) -> Cell) -> Series {
        let values = self.values().iter().map(f).collect();
        Series::with_index(self.name.clone(), self.index.clone(), values)
    }

    pub fn try_map<E>(&self, mut f: impl FnMut(&Cell) -> Result<Cell, E>) -> Result<Series, E> {
        let cells = self.values();
        let mut values = Vec::with_capacity(cells.len());
        for v in &cells {
            values.push(f(v)?);
        }
        Ok(Series::with_index(self.name.clone(), self.index.clone(), values))
    }

    /// Apply a string function to string cells; other cells become null
    pub fn str_map(&self, f: impl Fn(&str) -> Cell) -> Series {
        self.map_values(|c| match c {
            Cell::Str(s) => f(s),
            _ => Cell::Null,
        })
    }

    pub fn round(&self, decimals: i32) -> Series {
        self.map_values(|c| match c {
            Cell::Float(x) => Cell::from_f64(round_float(*x, decimals)),
            other => other.clone(),
        })
    }

    pub fn abs(&self) -> FrameResult<Series> {
        self.try_map(|c| match c {
            Cell::Int(i) => Ok(i
                .checked_abs()
                .map(Cell::Int)
                .unwrap_or_else(|| Cell::Float((*i as f64).abs()))),
            Cell::Float(x) => Ok(Cell::Float(x.abs())),
            Cell::Bool(b) => Ok(Cell::Int(*b as i64)),
            Cell::Null => Ok(Cell::Null),
            Cell::Str(_) => Err(FrameError::Type(
                "bad operand type for abs(): 'str'".to_string(),
            )),
        })
    }

    fn with_data(&self, data: pl::Series) -> Series {
        Series::from_column(self.name.clone(), self.index.clone(), data)
    }

    pub fn isna(&self) -> Series {
        self.with_data(self.data.is_null().into_series())
    }

    pub fn notna(&self) -> Series {
        self.with_data(self.data.is_not_null().into_series())
    }

    pub fn fillna(&self, value: &Cell) -> Series {
        self.map_values(|c| if c.is_null() { value.clone() } else { c.clone() })
    }

    pub fn dropna(&self) -> FrameResult<Series> {
        let mask = self.data.is_not_null();
        let data = self.data.filter(&mask)?;
        let keep: Vec<usize> = mask
            .into_iter()
            .enumerate()
            .filter(|(_, v)| v.unwrap_or(false))
            .map(|(i, _)| i)
            .collect();
        Ok(Series {
            name: self.name.clone(),
            index: self.index.take(&keep),
            data,
        })
    }

    pub fn astype(&self, dtype: &str) -> FrameResult<Series> {
        let target = dtype.trim().to_ascii_lowercase();
        self.try_map(|c| cast_cell(c, &target))
    }

    pub fn between(&self, low: &Cell, high: &Cell) -> FrameResult<Series> {
        self.try_map(|c| {
            Ok(Cell::Bool(
                compare_cells(c, CmpKind::Ge, low)? && compare_cells(c, CmpKind::Le, high)?,
            ))
        })
    }

    pub fn isin(&self, values: &[Cell]) -> Series {
        self.map_values(|c| Cell::Bool(values.iter().any(|v| v == c || v.loose_eq(c))))
    }

    pub fn cumsum(&self) -> FrameResult<Series> {
        let mut acc = Cell::Int(0);
        self.try_map(|c| {
            if c.is_null() {
                return Ok(Cell::Null);
            }
            acc = arith_cells(&acc, ArithOp::Add, c, None)?;
            Ok(acc.clone())
        })
    }

    /// Values of `other` lined up with this series' rows
    pub fn align(&self, other: &Series) -> Vec<Cell> {
        if self.index.same_labels(&other.index) {
            return other.values();
        }
        (0..self.len())
            .map(|i| other.get(&self.index.label(i)).unwrap_or(Cell::Null))
            .collect()
    }

    pub fn arith(&self, op: ArithOp, other: &Series, warnings: &mut Vec<String>) -> FrameResult<Series> {
        let rhs = self.align(other);
        let mut values = Vec::with_capacity(self.len());
        for (a, b) in self.values().iter().zip(&rhs) {
            values.push(arith_cells(a, op, b, Some(&mut *warnings))?);
        }
        let name = if self.name == other.name {
            self.name.clone()
        } else {
            None
        };
        Ok(Series::with_index(name, self.index.clone(), values))
    }

    /// Arithmetic against a scalar; `reflected` puts the scalar on the left
    pub fn arith_scalar(
        &self,
        op: ArithOp,
        scalar: &Cell,
        reflected: bool,
        warnings: &mut Vec<String>,
    ) -> FrameResult<Series> {
        self.try_map(|v| {
            if reflected {
                arith_cells(scalar, op, v, Some(&mut *warnings))
            } else {
                arith_cells(v, op, scalar, Some(&mut *warnings))
            }
        })
    }

    pub fn compare(&self, op: CmpKind, other: &Series) -> FrameResult<Series> {
        if self.len() != other.len() {
            return Err(FrameError::Value(
                "Can only compare identically-labeled Series objects".to_string(),
            ));
        }
        let mut values = Vec::with_capacity(self.len());
        for (a, b) in self.values().iter().zip(&other.values()) {
            values.push(Cell::Bool(compare_cells(a, op, b)?));
        }
        Ok(Series::with_index(self.name.clone(), self.index.clone(), values))
    }

    pub fn compare_scalar(&self, op: CmpKind, scalar: &Cell) -> FrameResult<Series> {
        self.try_map(|c| Ok(Cell::Bool(compare_cells(c, op, scalar)?)))
    }

    /// Element-wise `&` / `|`
    pub fn logical(&self, other: &Series, and: bool) -> FrameResult<Series> {
        if self.len() != other.len() {
            return Err(FrameError::Value(format!(
                "operands could not be broadcast together with shapes ({},) ({},)",
                self.len(),
                other.len()
            )));
        }
        let values = self
            .values()
            .iter()
            .zip(&other.values())
            .map(|(a, b)| {
                Cell::Bool(if and {
                    a.truthy() && b.truthy()
                } else {
                    a.truthy() || b.truthy()
                })
            })
            .collect();
        Ok(Series::with_index(self.name.clone(), self.index.clone(), values))
    }

    /// Element-wise `~`
    pub fn invert(&self) -> FrameResult<Series> {
        self.try_map(|c| match c {
            Cell::Bool(b) => Ok(Cell::Bool(!b)),
            Cell::Int(i) => Ok(Cell::Int(!i)),
            Cell::Null => Ok(Cell::Null),
            other => Err(FrameError::Type(format!(
                "bad operand type for unary ~: '{}'",
                other.type_name()
            ))),
        })
    }

    pub fn negate(&self) -> FrameResult<Series> {
        self.try_map(|c| match c {
            Cell::Int(i) => Ok(i
                .checked_neg()
                .map(Cell::Int)
                .unwrap_or_else(|| Cell::Float(-(*i as f64)))),
            Cell::Float(x) => Ok(Cell::Float(-x)),
            Cell::Bool(b) => Ok(Cell::Int(-(*b as i64))),
            Cell::Null => Ok(Cell::Null),
            Cell::Str(_) => Err(FrameError::Type(
                "bad operand type for unary -: 'str'".to_string(),
            )),
        })
    }

    /// (label, value) pairs
    pub fn items(&self) -> Vec<(Cell, Cell)> {
        self.index.labels().into_iter().zip(self.values()).collect()
    }

    pub fn estimated_size(&self) -> usize {
        self.data.estimated_size() + self.index.estimated_size()
    }
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

/// Round a float to `decimals` places with banker's rounding
pub fn round_float(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    round_half_even(x * factor) / factor
}

fn cast_cell(c: &Cell, target: &str) -> FrameResult<Cell> {
    if c.is_null() {
        return match target {
            "str" | "string" => Ok(Cell::Str("nan".to_string())),
            "int" | "int64" | "int32" => Err(FrameError::Value(
                "Cannot convert non-finite values (NA or inf) to integer".to_string(),
            )),
            _ => Ok(Cell::Null),
        };
    }
    match target {
        "str" | "string" | "object" => match c {
            Cell::Str(_) => Ok(c.clone()),
            other if target == "object" => Ok(other.clone()),
            other => Ok(Cell::Str(other.to_string())),
        },
        "float" | "float64" | "float32" => match c {
            Cell::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Cell::from_f64)
                .map_err(|_| {
                    FrameError::Value(format!("could not convert string to float: {}", c.repr()))
                }),
            other => Ok(Cell::from_f64(other.as_f64().unwrap_or(f64::NAN))),
        },
        "int" | "int64" | "int32" => match c {
            Cell::Str(s) => s.trim().parse::<i64>().map(Cell::Int).map_err(|_| {
                FrameError::Value(format!(
                    "invalid literal for int() with base 10: {}",
                    c.repr()
                ))
            }),
            Cell::Float(x) if x.is_infinite() => Err(FrameError::Value(
                "Cannot convert non-finite values (NA or inf) to integer".to_string(),
            )),
            Cell::Float(x) => Ok(Cell::Int(x.trunc() as i64)),
            other => Ok(Cell::Int(other.as_f64().unwrap_or(0.0) as i64)),
        },
        "bool" => Ok(Cell::Bool(c.truthy())),
        other => Err(FrameError::Type(format!("data type '{}' not understood", other))),
    }
}

/// Row range kept by `head(n)`; a negative `n` drops rows from the end
pub(crate) fn head_bounds(len: usize, n: i64) -> (usize, usize) {
    let end = if n >= 0 {
        (n as usize).min(len)
    } else {
        len.saturating_sub(n.unsigned_abs() as usize)
    };
    (0, end)
}

/// Row range kept by `tail(n)`; a negative `n` drops rows from the start
pub(crate) fn tail_bounds(len: usize, n: i64) -> (usize, usize) {
    let start = if n >= 0 {
        len.saturating_sub(n as usize)
    } else {
        (n.unsigned_abs() as usize).min(len)
    };
    (start, len)
}

pub(crate) fn directional_cmp(a: &Cell, b: &Cell, ascending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (false, false) if !ascending => a.sort_cmp(b).reverse(),
        _ => a.sort_cmp(b),
    }
}

/// Row positions selected by a boolean mask
pub(crate) fn mask_positions(len: usize, index: &Index, mask: &Series) -> FrameResult<Vec<usize>> {
    let values = if mask.index.same_labels(index) || mask.len() == len {
        if mask.len() != len {
            return Err(FrameError::Value(format!(
                "Item wrong length {} instead of {}.",
                mask.len(),
                len
            )));
        }
        mask.values()
    } else {
        (0..len)
            .map(|i| mask.get(&index.label(i)).unwrap_or(Cell::Null))
            .collect()
    };
    if let Some(bad) = values.iter().find(|v| matches!(v, Cell::Str(_))) {
        return Err(FrameError::Key(format!(
            "mask must be boolean, found {}",
            bad.repr()
        )));
    }
    Ok((0..len).filter(|&i| values[i].truthy()).collect())
}

/// Polars mask for rows kept by `keep`
pub(crate) fn keep_mask(len: usize, keep: &[usize]) -> pl::BooleanChunked {
    let mut flags = vec![false; len];
    for &p in keep {
        flags[p] = true;
    }
    mask_ca(&flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: Vec<Cell>) -> Series {
        Series::new(Some("s".into()), values)
    }

    fn ints(v: &[i64]) -> Vec<Cell> {
        v.iter().map(|i| Cell::Int(*i)).collect()
    }

    #[test]
    fn test_arith_cells() {
        assert_eq!(
            arith_cells(&Cell::Int(7), ArithOp::FloorDiv, &Cell::Int(-2), None).unwrap(),
            Cell::Int(-4)
        );
        assert_eq!(
            arith_cells(&Cell::Int(-7), ArithOp::Mod, &Cell::Int(3), None).unwrap(),
            Cell::Int(2)
        );
        assert_eq!(
            arith_cells(&Cell::Int(7), ArithOp::Div, &Cell::Int(2), None).unwrap(),
            Cell::Float(3.5)
        );
        assert_eq!(
            arith_cells(&Cell::Int(1), ArithOp::Div, &Cell::Int(0), None)
                .unwrap_err()
                .kind(),
            "ZeroDivisionError"
        );
        let mut warnings = Vec::new();
        let out = arith_cells(&Cell::Int(1), ArithOp::Div, &Cell::Int(0), Some(&mut warnings)).unwrap();
        assert_eq!(out, Cell::Float(f64::INFINITY));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_min_int_division_does_not_overflow() {
        let min = Cell::Int(i64::MIN);
        assert_eq!(
            arith_cells(&min, ArithOp::FloorDiv, &Cell::Int(-1), None).unwrap(),
            Cell::Float(9.223372036854776e18)
        );
        assert_eq!(
            arith_cells(&min, ArithOp::Mod, &Cell::Int(-1), None).unwrap(),
            Cell::Int(0)
        );
        assert_eq!(
            series(vec![min]).negate().unwrap().values(),
            vec![Cell::Float(9.223372036854776e18)]
        );
    }

    #[test]
    fn test_value_counts_order() {
        let s = series(vec![
            Cell::from("b"),
            Cell::from("a"),
            Cell::from("b"),
            Cell::Null,
            Cell::from("c"),
        ]);
        let vc = s.value_counts(false, false);
        assert_eq!(vc.index.labels(), vec![Cell::from("b"), Cell::from("a"), Cell::from("c")]);
        assert_eq!(vc.values(), ints(&[2, 1, 1]));
        assert_eq!(vc.name.as_deref(), Some("count"));
    }

    #[test]
    fn test_sort_and_nlargest() {
        let s = series(vec![Cell::Int(3), Cell::Null, Cell::Int(9), Cell::Int(1)]);
        let sorted = s.sort_values(false).unwrap();
        assert_eq!(
            sorted.values(),
            vec![Cell::Float(9.0), Cell::Float(3.0), Cell::Float(1.0), Cell::Null]
        );
        assert_eq!(sorted.index.labels(), ints(&[2, 0, 3, 1]));
        let top = s.nlargest(2, true).unwrap();
        assert_eq!(top.values(), vec![Cell::Float(9.0), Cell::Float(3.0)]);
        assert_eq!(top.index.labels(), ints(&[2, 0]));
    }

    #[test]
    fn test_idxmax_empty() {
        let s = series(vec![]);
        assert_eq!(s.idxmax().unwrap_err().kind(), "ValueError");
        let s = series(ints(&[4, 8, 8]));
        assert_eq!(s.idxmax().unwrap(), Cell::Int(1));
    }

    #[test]
    fn test_mask_and_compare() {
        let s = series(ints(&[5, 150, 90, 300]));
        let mask = s.compare_scalar(CmpKind::Gt, &Cell::Int(100)).unwrap();
        assert_eq!(mask.dtype(), DType::Bool);
        let filtered = s.filter(&mask).unwrap();
        assert_eq!(filtered.values(), ints(&[150, 300]));
        assert_eq!(filtered.index.labels(), ints(&[1, 3]));
    }

    #[test]
    fn test_label_alignment() {
        let a = Series::with_index(None, Index::new(None, ints(&[0, 1, 2])), ints(&[1, 2, 3]));
        let b = Series::with_index(None, Index::new(None, ints(&[2, 0])), ints(&[30, 10]));
        let mut w = Vec::new();
        let sum = a.arith(ArithOp::Add, &b, &mut w).unwrap();
        assert_eq!(sum.values(), vec![Cell::Float(11.0), Cell::Null, Cell::Float(33.0)]);
    }

    #[test]
    fn test_astype_and_round() {
        let s = series(vec![Cell::from("1.5"), Cell::from("2.25")]);
        let f = s.astype("float").unwrap();
        assert_eq!(f.values(), vec![Cell::Float(1.5), Cell::Float(2.25)]);
        assert_eq!(f.round(1).values(), vec![Cell::Float(1.5), Cell::Float(2.2)]);
        assert!(series(vec![Cell::from("x")]).astype("int").is_err());
    }

    #[test]
    fn test_cumsum_and_between() {
        let s = series(ints(&[1, 2, 3]));
        assert_eq!(s.cumsum().unwrap().values(), ints(&[1, 3, 6]));
        let b = s.between(&Cell::Int(2), &Cell::Int(3)).unwrap();
        assert_eq!(b.values(), vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(true)]);
    }

    #[test]
    fn test_null_masks_and_dropna() {
        let s = series(vec![Cell::Float(1.5), Cell::Null, Cell::Float(2.0)]);
        assert_eq!(
            s.isna().values(),
            vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(false)]
        );
        let kept = s.dropna().unwrap();
        assert_eq!(kept.index.labels(), ints(&[0, 2]));
        assert_eq!(kept.dtype(), DType::Float64);
    }

    #[test]
    fn test_head_tail_keep_dtype() {
        let s = series(vec![Cell::Float(1.0), Cell::Float(2.0), Cell::Float(3.0)]);
        assert_eq!(s.head(-1).dtype(), DType::Float64);
        assert_eq!(s.head(-1).len(), 2);
        assert_eq!(s.tail(0).dtype(), DType::Float64);
        assert_eq!(head_bounds(5, -2), (0, 3));
        assert_eq!(tail_bounds(5, 2), (3, 5));
        assert_eq!(tail_bounds(5, -3), (3, 5));
    }
}
