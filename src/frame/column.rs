//! Conversion between cells and polars columns.
//!
//! Stored columns are always one of four polars dtypes: `Int64`, `Float64`,
//! `Boolean` or `String`. Object columns keep non-string cells as their
//! display text.

use super::{Cell, DType, FrameResult};
use polars::prelude as pl;
use polars::prelude::{NamedFrom, NewChunkedArray};

pub(crate) fn column_from_cells(name: &str, cells: &[Cell]) -> pl::Series {
    match DType::infer(cells) {
        DType::Int64 => {
            let values: Vec<Option<i64>> = cells
                .iter()
                .map(|c| match c {
                    Cell::Int(i) => Some(*i),
                    _ => None,
                })
                .collect();
            pl::Series::new(name, values)
        }
        DType::Float64 => {
            let values: Vec<Option<f64>> = cells.iter().map(Cell::as_f64).collect();
            pl::Series::new(name, values)
        }
        DType::Bool => {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|c| match c {
                    Cell::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            pl::Series::new(name, values)
        }
        DType::Object => {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|c| match c {
                    Cell::Str(s) => Some(s.clone()),
                    c if c.is_null() => None,
                    other => Some(other.to_string()),
                })
                .collect();
            pl::Series::new(name, values)
        }
    }
}

fn collect<T>(iter: impl Iterator<Item = Option<T>>, f: impl Fn(T) -> Cell) -> Vec<Cell> {
    iter.map(|v| v.map(&f).unwrap_or(Cell::Null)).collect()
}

/// Cells of a stored column
pub(crate) fn cells_of_column(s: &pl::Series) -> Vec<Cell> {
    let cells = match s.dtype() {
        pl::DataType::Boolean => s.bool().map(|ca| collect(ca.into_iter(), Cell::Bool)),
        pl::DataType::Int64 => s.i64().map(|ca| collect(ca.into_iter(), Cell::Int)),
        pl::DataType::Float64 => s.f64().map(|ca| collect(ca.into_iter(), Cell::from_f64)),
        pl::DataType::String => s.str().map(|ca| collect(ca.into_iter(), Cell::from)),
        _ => Ok(vec![Cell::Null; s.len()]),
    };
    cells.unwrap_or_else(|_| vec![Cell::Null; s.len()])
}

pub(crate) fn cell_at(s: &pl::Series, position: usize) -> Cell {
    cells_of_column(&s.slice(position as i64, 1))
        .into_iter()
        .next()
        .unwrap_or(Cell::Null)
}

/// Cast a polars result column to one of the stored dtypes
pub(crate) fn normalize(s: pl::Series) -> FrameResult<pl::Series> {
    let target = match s.dtype() {
        pl::DataType::Boolean
        | pl::DataType::Int64
        | pl::DataType::Float64
        | pl::DataType::String => return Ok(s),
        pl::DataType::Float32 | pl::DataType::Null => pl::DataType::Float64,
        d if d.is_integer() => pl::DataType::Int64,
        _ => pl::DataType::String,
    };
    Ok(s.cast(&target)?)
}

pub(crate) fn positions_ca(positions: &[usize]) -> pl::IdxCa {
    let idx: Vec<pl::IdxSize> = positions.iter().map(|&p| p as pl::IdxSize).collect();
    pl::IdxCa::from_vec("", idx)
}

pub(crate) fn mask_ca(keep: &[bool]) -> pl::BooleanChunked {
    pl::BooleanChunked::from_slice("", keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_are_typed() {
        let ints = column_from_cells("a", &[Cell::Int(1), Cell::Int(2)]);
        assert_eq!(ints.dtype(), &pl::DataType::Int64);
        let floats = column_from_cells("b", &[Cell::Int(1), Cell::Null]);
        assert_eq!(floats.dtype(), &pl::DataType::Float64);
        assert_eq!(cells_of_column(&floats), vec![Cell::Float(1.0), Cell::Null]);
        let text = column_from_cells("c", &[Cell::from("x"), Cell::Null]);
        assert_eq!(cells_of_column(&text), vec![Cell::from("x"), Cell::Null]);
    }

    #[test]
    fn test_mixed_object_column_keeps_text() {
        let mixed = column_from_cells("m", &[Cell::from("x"), Cell::Int(3)]);
        assert_eq!(cells_of_column(&mixed), vec![Cell::from("x"), Cell::from("3")]);
    }

    #[test]
    fn test_normalize_widens_counts() {
        let counts = pl::Series::new("n", &[1u32, 2u32]);
        let out = normalize(counts).unwrap();
        assert_eq!(cells_of_column(&out), vec![Cell::Int(1), Cell::Int(2)]);
        assert_eq!(cell_at(&out, 1), Cell::Int(2));
    }
}
