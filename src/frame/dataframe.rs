use super::column::{cell_at, cells_of_column, column_from_cells, positions_ca};
use super::groupby::GroupBy;
use super::series::{directional_cmp, head_bounds, keep_mask, mask_positions, tail_bounds};
use super::{quote_str, reduce, AggFunc, Cell, DType, FrameError, FrameResult, Index, Series};
use polars::prelude as pl;
use serde_json::{Map, Value as Json};
use std::collections::HashSet;

/// A two-dimensional table: named columns sharing one row index
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub index: Index,
    data: pl::DataFrame,
}

impl Default for DataFrame {
    fn default() -> Self {
        Self {
            index: Index::range(0),
            data: pl::DataFrame::default(),
        }
    }
}

impl PartialEq for DataFrame {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.dtypes() == other.dtypes()
            && self.columns() == other.columns()
    }
}

impl DataFrame {
    /// Build from named columns of equal length
    pub fn new(columns: Vec<(String, Vec<Cell>)>) -> FrameResult<Self> {
        let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        Self::with_index(Index::range(rows), columns)
    }

    pub fn with_index(index: Index, columns: Vec<(String, Vec<Cell>)>) -> FrameResult<Self> {
        let mut series = Vec::with_capacity(columns.len());
        for (name, values) in &columns {
            if values.len() != index.len() {
                return Err(FrameError::Value(
                    "All arrays must be of the same length".to_string(),
                ));
            }
            series.push(column_from_cells(name, values));
        }
        Ok(Self {
            index,
            data: pl::DataFrame::new(series)?,
        })
    }

    /// Wrap stored columns; every column must have the index's length
    pub(crate) fn from_parts(index: Index, data: pl::DataFrame) -> Self {
        Self { index, data }
    }

    /// Build from row records; columns appear in first-seen order
    pub fn from_records(rows: Vec<Vec<(String, Cell)>>) -> FrameResult<Self> {
        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for row in &rows {
            for (name, _) in row {
                if seen.insert(name.clone()) {
                    names.push(name.clone());
                }
            }
        }
        let columns = names
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .find(|(n, _)| *n == name)
                            .map(|(_, v)| v.clone())
                            .unwrap_or(Cell::Null)
                    })
                    .collect();
                (name, values)
            })
            .collect();
        Self::with_index(Index::range(rows.len()), columns)
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.data.width()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.n_cols())
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0 || self.n_cols() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.data
            .get_columns()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data.column(name).is_ok()
    }

    pub fn dtypes(&self) -> Vec<(String, DType)> {
        self.data
            .get_columns()
            .iter()
            .map(|s| (s.name().to_string(), DType::of(s.dtype())))
            .collect()
    }

    fn stored(&self, name: &str) -> FrameResult<&pl::Series> {
        self.data
            .column(name)
            .map_err(|_| FrameError::missing_column(name))
    }

    pub fn column_values(&self, name: &str) -> FrameResult<Vec<Cell>> {
        Ok(cells_of_column(self.stored(name)?))
    }

    pub fn column(&self, name: &str) -> FrameResult<Series> {
        let data = self.stored(name)?.clone();
        Ok(Series::from_column(
            Some(name.to_string()),
            self.index.clone(),
            data,
        ))
    }

    /// Each column's name and cells, in column order
    pub fn columns(&self) -> Vec<(String, Vec<Cell>)> {
        self.data
            .get_columns()
            .iter()
            .map(|s| (s.name().to_string(), cells_of_column(s)))
            .collect()
    }

    pub fn select(&self, names: &[String]) -> FrameResult<DataFrame> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .map(|n| quote_str(n))
            .collect();
        if !missing.is_empty() {
            return Err(FrameError::Key(format!(
                "\"None of [{}] are in the columns\"",
                missing.join(", ")
            )));
        }
        let columns = names
            .iter()
            .map(|n| self.stored(n).cloned())
            .collect::<FrameResult<Vec<_>>>()?;
        Ok(DataFrame {
            index: self.index.clone(),
            data: pl::DataFrame::new(columns)?,
        })
    }

    pub fn take(&self, positions: &[usize]) -> FrameResult<DataFrame> {
        Ok(DataFrame {
            index: self.index.take(positions),
            data: self.data.take(&positions_ca(positions))?,
        })
    }

    fn slice_rows(&self, start: usize, end: usize) -> DataFrame {
        let len = end.saturating_sub(start);
        DataFrame {
            index: self.index.slice(start, len),
            data: self.data.slice(start as i64, len),
        }
    }

    pub fn filter(&self, mask: &Series) -> FrameResult<DataFrame> {
        let keep = mask_positions(self.n_rows(), &self.index, mask)?;
        Ok(DataFrame {
            index: self.index.take(&keep),
            data: self.data.filter(&keep_mask(self.n_rows(), &keep))?,
        })
    }

    pub fn head(&self, n: i64) -> DataFrame {
        let (start, end) = head_bounds(self.n_rows(), n);
        self.slice_rows(start, end)
    }

    pub fn tail(&self, n: i64) -> DataFrame {
        let (start, end) = tail_bounds(self.n_rows(), n);
        self.slice_rows(start, end)
    }

    /// Single row as a series indexed by column name
    pub fn row(&self, position: usize) -> FrameResult<Series> {
        if position >= self.n_rows() {
            return Err(FrameError::Index(
                "single positional indexer is out-of-bounds".to_string(),
            ));
        }
        let label = self.index.label(position);
        let (names, values): (Vec<Cell>, Vec<Cell>) = self
            .data
            .get_columns()
            .iter()
            .map(|s| (Cell::Str(s.name().to_string()), cell_at(s, position)))
            .unzip();
        Ok(Series::with_index(
            Some(label.to_string()),
            Index::new(None, names),
            values,
        ))
    }

    fn is_blank(&self) -> bool {
        self.n_cols() == 0 && self.n_rows() == 0
    }

    /// Insert or replace a column; values must match the row count
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> FrameResult<()> {
        if self.is_blank() {
            self.index = Index::range(values.len());
        } else if values.len() != self.n_rows() {
            return Err(FrameError::Value(format!(
                "Length of values ({}) does not match length of index ({})",
                values.len(),
                self.n_rows()
            )));
        }
        self.data.with_column(column_from_cells(name, &values))?;
        Ok(())
    }

    /// Insert a series, aligning on row labels
    pub fn set_series(&mut self, name: &str, series: &Series) -> FrameResult<()> {
        if self.is_blank() {
            self.index = series.index.clone();
            let mut data = series.data().clone();
            data.rename(name);
            self.data.with_column(data)?;
            return Ok(());
        }
        let values = if series.index.same_labels(&self.index) {
            series.values()
        } else {
            (0..self.n_rows())
                .map(|i| series.get(&self.index.label(i)).unwrap_or(Cell::Null))
                .collect()
        };
        self.set_column(name, values)
    }

    pub fn sort_values(&self, by: &[String], ascending: &[bool]) -> FrameResult<DataFrame> {
        let keys: Vec<Vec<Cell>> = by
            .iter()
            .map(|name| self.column_values(name))
            .collect::<FrameResult<_>>()?;
        let mut order: Vec<usize> = (0..self.n_rows()).collect();
        order.sort_by(|&a, &b| {
            for (k, values) in keys.iter().enumerate() {
                let asc = ascending.get(k).or(ascending.first()).copied().unwrap_or(true);
                let ord = directional_cmp(&values[a], &values[b], asc);
                if ord.is_ne() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        self.take(&order)
    }

    /// Top `n` rows by the given columns
    pub fn nlargest(&self, n: usize, by: &[String], largest: bool) -> FrameResult<DataFrame> {
        let ascending = vec![!largest; by.len()];
        let Some(first) = by.first() else {
            return Ok(self.head(n as i64));
        };
        let sorted = self.sort_values(by, &ascending)?;
        let key = sorted.column_values(first)?;
        let keep: Vec<usize> = (0..sorted.n_rows())
            .filter(|&i| !key[i].is_null())
            .take(n)
            .collect();
        sorted.take(&keep)
    }

    fn subset_columns(&self, subset: Option<&[String]>) -> FrameResult<Vec<Vec<Cell>>> {
        match subset {
            Some(names) => names.iter().map(|n| self.column_values(n)).collect(),
            None => Ok(self.columns().into_iter().map(|(_, v)| v).collect()),
        }
    }

    pub fn drop_duplicates(&self, subset: Option<&[String]>, keep_last: bool) -> FrameResult<DataFrame> {
        let cols = self.subset_columns(subset)?;
        let mut seen = HashSet::new();
        let mut order: Vec<usize> = (0..self.n_rows()).collect();
        if keep_last {
            order.reverse();
        }
        let mut keep: Vec<usize> = order
            .into_iter()
            .filter(|&i| {
                let key: Vec<Cell> = cols.iter().map(|c| c[i].clone()).collect();
                seen.insert(key)
            })
            .collect();
        keep.sort_unstable();
        self.take(&keep)
    }

    /// Drop rows with nulls; `all` drops only fully-null rows
    pub fn dropna(&self, subset: Option<&[String]>, all: bool) -> FrameResult<DataFrame> {
        let cols = self.subset_columns(subset)?;
        let keep: Vec<usize> = (0..self.n_rows())
            .filter(|&i| {
                let mut nulls = cols.iter().map(|c| c[i].is_null());
                if all {
                    !nulls.all(|n| n) || cols.is_empty()
                } else {
                    !nulls.any(|n| n)
                }
            })
            .collect();
        Ok(DataFrame {
            index: self.index.take(&keep),
            data: self.data.filter(&keep_mask(self.n_rows(), &keep))?,
        })
    }

    pub fn fillna(&self, value: &Cell) -> FrameResult<DataFrame> {
        self.map_cells(|c| if c.is_null() { value.clone() } else { c.clone() })
    }

    pub fn map_cells(&self, f: impl Fn(&Cell) -> Cell) -> FrameResult<DataFrame> {
        let columns = self
            .columns()
            .into_iter()
            .map(|(name, values)| (name, values.iter().map(&f).collect()))
            .collect();
        Self::with_index(self.index.clone(), columns)
    }

    pub fn rename(&self, mapping: &[(String, String)]) -> FrameResult<DataFrame> {
        let columns = self
            .data
            .get_columns()
            .iter()
            .map(|s| {
                let mut s = s.clone();
                if let Some((_, to)) = mapping.iter().find(|(from, _)| from == s.name()) {
                    s.rename(to);
                }
                s
            })
            .collect();
        Ok(DataFrame {
            index: self.index.clone(),
            data: pl::DataFrame::new(columns)?,
        })
    }

    pub fn drop_columns(&self, names: &[String]) -> FrameResult<DataFrame> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .map(|n| quote_str(n))
            .collect();
        if !missing.is_empty() {
            return Err(FrameError::Key(format!(
                "\"[{}] not found in axis\"",
                missing.join(", ")
            )));
        }
        let mut data = self.data.clone();
        for name in names {
            data = data.drop(name)?;
        }
        Ok(DataFrame {
            index: self.index.clone(),
            data,
        })
    }

    /// Move the row index into columns and replace it with a range index
    pub fn reset_index(&self, drop: bool) -> FrameResult<DataFrame> {
        let mut columns: Vec<pl::Series> = Vec::new();
        if !drop {
            for (name, values) in self.index.to_columns() {
                if self.has_column(&name) {
                    return Err(FrameError::Value(format!(
                        "cannot insert {}, already exists",
                        name
                    )));
                }
                columns.push(column_from_cells(&name, &values));
            }
        }
        columns.extend(self.data.get_columns().iter().cloned());
        Ok(DataFrame {
            index: Index::range(self.n_rows()),
            data: pl::DataFrame::new(columns)?,
        })
    }

    /// Reduce each column to one value, skipping non-numeric columns for numeric reductions
    pub fn reduce_columns(&self, func: AggFunc) -> FrameResult<Series> {
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for s in self.data.get_columns() {
            let numeric = DType::of(s.dtype()).is_numeric();
            if (func.numeric_only() || func == AggFunc::Sum) && !numeric {
                continue;
            }
            labels.push(Cell::Str(s.name().to_string()));
            values.push(reduce(&cells_of_column(s), func)?);
        }
        Ok(Series::with_index(None, Index::new(None, labels), values))
    }

    pub fn groupby(&self, keys: Vec<String>, as_index: bool) -> FrameResult<GroupBy> {
        GroupBy::new(self.clone(), keys, as_index)
    }

    pub(crate) fn data(&self) -> &pl::DataFrame {
        &self.data
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<Json> {
        let columns = self.columns();
        (0..self.n_rows())
            .map(|i| {
                let mut row = Map::new();
                for (name, values) in &columns {
                    row.insert(name.clone(), values[i].to_json());
                }
                Json::Object(row)
            })
            .collect()
    }

    pub fn estimated_size(&self) -> usize {
        self.data.estimated_size() + self.index.estimated_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        DataFrame::new(vec![
            (
                "Region".to_string(),
                vec!["East".into(), "West".into(), "East".into(), "North".into()],
            ),
            (
                "Sales".to_string(),
                vec![Cell::Int(100), Cell::Int(250), Cell::Int(50), Cell::Null],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_shape_and_dtypes() {
        let df = sample();
        assert_eq!(df.shape(), (4, 2));
        assert_eq!(
            df.dtypes(),
            vec![
                ("Region".to_string(), DType::Object),
                ("Sales".to_string(), DType::Float64)
            ]
        );
        assert!(DataFrame::new(vec![
            ("a".to_string(), vec![Cell::Int(1)]),
            ("b".to_string(), vec![])
        ])
        .is_err());
    }

    #[test]
    fn test_duplicate_column_names_rejected() {
        let err = DataFrame::new(vec![
            ("a".to_string(), vec![Cell::Int(1)]),
            ("a".to_string(), vec![Cell::Int(2)]),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), "ValueError");
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let err = sample().column("Profit").unwrap_err();
        assert_eq!(err.kind(), "KeyError");
        assert_eq!(err.to_string(), "'Profit'");
    }

    #[test]
    fn test_sort_values_descending() {
        let df = sample()
            .sort_values(&["Sales".to_string()], &[false])
            .unwrap();
        assert_eq!(
            df.column_values("Sales").unwrap(),
            vec![Cell::Float(250.0), Cell::Float(100.0), Cell::Float(50.0), Cell::Null]
        );
        assert_eq!(df.index.labels(), vec![Cell::Int(1), Cell::Int(0), Cell::Int(2), Cell::Int(3)]);
    }

    #[test]
    fn test_nlargest_skips_nulls() {
        let df = sample().nlargest(10, &["Sales".to_string()], false).unwrap();
        assert_eq!(df.n_rows(), 3);
        assert_eq!(df.column_values("Sales").unwrap()[0], Cell::Float(50.0));
    }

    #[test]
    fn test_drop_duplicates_and_dropna() {
        let df = sample();
        let dedup = df.drop_duplicates(Some(&["Region".to_string()]), false).unwrap();
        assert_eq!(dedup.n_rows(), 3);
        let clean = df.dropna(None, false).unwrap();
        assert_eq!(clean.n_rows(), 3);
        assert_eq!(clean.index.labels(), vec![Cell::Int(0), Cell::Int(1), Cell::Int(2)]);
    }

    #[test]
    fn test_row_slices_keep_dtypes() {
        let df = sample();
        let empty = df.take(&[]).unwrap();
        assert_eq!(empty.dtypes(), df.dtypes());
        assert_eq!(df.head(-1).dtypes(), df.dtypes());
        assert_eq!(df.tail(2).column_values("Region").unwrap(), vec![Cell::from("East"), Cell::from("North")]);
    }

    #[test]
    fn test_set_column_length_mismatch() {
        let mut df = sample();
        assert!(df.set_column("x", vec![Cell::Int(1)]).is_err());
        df.set_column("x", vec![Cell::Int(1); 4]).unwrap();
        assert_eq!(df.n_cols(), 3);
        let mut blank = DataFrame::default();
        blank.set_column("y", vec![Cell::Int(1), Cell::Int(2)]).unwrap();
        assert_eq!(blank.shape(), (2, 1));
    }

    #[test]
    fn test_reset_index_inserts_index_column() {
        let df = sample().head(2);
        let back = df.reset_index(false).unwrap();
        assert_eq!(
            back.column_names(),
            vec!["index".to_string(), "Region".to_string(), "Sales".to_string()]
        );
        assert!(back.reset_index(false).is_err());
        assert_eq!(back.reset_index(true).unwrap().n_cols(), 3);
    }

    #[test]
    fn test_rename_and_drop() {
        let renamed = sample()
            .rename(&[("Sales".to_string(), "Revenue".to_string())])
            .unwrap();
        assert_eq!(renamed.column_names(), vec!["Region".to_string(), "Revenue".to_string()]);
        let dropped = renamed.drop_columns(&["Region".to_string()]).unwrap();
        assert_eq!(dropped.column_names(), vec!["Revenue".to_string()]);
        assert_eq!(
            renamed.drop_columns(&["Nope".to_string()]).unwrap_err().kind(),
            "KeyError"
        );
    }

    #[test]
    fn test_reduce_columns_skips_text() {
        let means = sample().reduce_columns(AggFunc::Mean).unwrap();
        assert_eq!(means.len(), 1);
        assert_eq!(means.values()[0], Cell::Float(400.0 / 3.0));
        let counts = sample().reduce_columns(AggFunc::Count).unwrap();
        assert_eq!(counts.values(), vec![Cell::Int(4), Cell::Int(3)]);
    }

    #[test]
    fn test_records() {
        let records = sample().head(1).to_records();
        assert_eq!(records[0], serde_json::json!({"Region": "East", "Sales": 100.0}));
    }
}
