use super::{DataFrame, Series};
use std::fmt;

const MAX_DISPLAY_ROWS: usize = 60;
const EDGE_ROWS: usize = 5;

/// Row positions to render, with `None` standing for the elided middle
fn visible_rows(n: usize) -> Vec<Option<usize>> {
    if n <= MAX_DISPLAY_ROWS {
        return (0..n).map(Some).collect();
    }
    let mut rows: Vec<Option<usize>> = (0..EDGE_ROWS).map(Some).collect();
    rows.push(None);
    rows.extend((n - EDGE_ROWS..n).map(Some));
    rows
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.n_cols() == 0 {
            return write!(f, "Empty DataFrame\nColumns: []\nIndex: []");
        }
        let rows = visible_rows(self.n_rows());
        let index_cells: Vec<String> = rows
            .iter()
            .map(|r| match r {
                Some(i) => self.index.label(*i).to_string(),
                None => "...".to_string(),
            })
            .collect();
        let index_width = index_cells.iter().map(|s| s.chars().count()).max().unwrap_or(0);

        let mut columns: Vec<(String, Vec<String>, usize)> = Vec::new();
        for (name, values) in self.columns() {
            let cells: Vec<String> = rows
                .iter()
                .map(|r| match r {
                    Some(i) => values[*i].to_string(),
                    None => "...".to_string(),
                })
                .collect();
            let width = cells
                .iter()
                .map(|s| s.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0);
            columns.push((name, cells, width));
        }

        write!(f, "{:width$}", "", width = index_width)?;
        for (name, _, width) in &columns {
            write!(f, "  {:>width$}", name, width = *width)?;
        }
        for (row, label) in index_cells.iter().enumerate() {
            write!(f, "\n{:<width$}", label, width = index_width)?;
            for (_, cells, width) in &columns {
                write!(f, "  {:>width$}", cells[row], width = *width)?;
            }
        }
        if self.n_rows() > MAX_DISPLAY_ROWS {
            write!(
                f,
                "\n\n[{} rows x {} columns]",
                self.n_rows(),
                self.n_cols()
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = visible_rows(self.len());
        let cells = self.values();
        let labels: Vec<String> = rows
            .iter()
            .map(|r| match r {
                Some(i) => self.index.label(*i).to_string(),
                None => "..".to_string(),
            })
            .collect();
        let values: Vec<String> = rows
            .iter()
            .map(|r| match r {
                Some(i) => cells[*i].to_string(),
                None => "...".to_string(),
            })
            .collect();
        let label_width = labels.iter().map(|s| s.chars().count()).max().unwrap_or(0);
        let value_width = values.iter().map(|s| s.chars().count()).max().unwrap_or(0);

        if let Some(name) = self.index.name() {
            writeln!(f, "{}", name)?;
        }
        for (label, value) in labels.iter().zip(&values) {
            writeln!(
                f,
                "{:<lw$}    {:>vw$}",
                label,
                value,
                lw = label_width,
                vw = value_width
            )?;
        }
        if self.len() > MAX_DISPLAY_ROWS {
            write!(f, "Length: {}, ", self.len())?;
        }
        match &self.name {
            Some(name) => write!(f, "Name: {}, dtype: {}", name, self.dtype()),
            None => write!(f, "dtype: {}", self.dtype()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Cell;
    use super::*;

    #[test]
    fn test_series_display() {
        let s = Series::new(Some("Sales".into()), vec![Cell::Int(100), Cell::Int(5)]);
        assert_eq!(s.to_string(), "0    100\n1      5\nName: Sales, dtype: int64");
    }

    #[test]
    fn test_frame_display() {
        let df = DataFrame::new(vec![
            ("a".to_string(), vec![Cell::Int(1), Cell::Int(22)]),
            ("name".to_string(), vec![Cell::from("x"), Cell::from("yy")]),
        ])
        .unwrap();
        assert_eq!(df.to_string(), "    a  name\n0   1     x\n1  22    yy");
    }

    #[test]
    fn test_float_column_prints_floats() {
        let s = Series::new(Some("Sales".into()), vec![Cell::Int(2), Cell::Null]);
        assert_eq!(s.to_string(), "0    2.0\n1    NaN\nName: Sales, dtype: float64");
    }

    #[test]
    fn test_long_frame_is_elided() {
        let values: Vec<Cell> = (0..100).map(Cell::Int).collect();
        let df = DataFrame::new(vec![("v".to_string(), values)]).unwrap();
        let text = df.to_string();
        assert!(text.contains("..."));
        assert!(text.ends_with("[100 rows x 1 columns]"));
    }
}
