use super::column::{cells_of_column, column_from_cells, normalize, positions_ca};
use super::{AggFunc, Cell, DType, DataFrame, FrameError, FrameResult, Index, Series};
use polars::prelude as pl;
use polars::prelude::IntoLazy;
use std::collections::HashMap;

/// Result of a group-by reduction
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated {
    Frame(DataFrame),
    Series(Series),
}

/// Rows of a frame partitioned by key columns
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    frame: DataFrame,
    keys: Vec<String>,
    selection: Option<Vec<String>>,
    single: bool,
    as_index: bool,
}

/// Aggregated columns with each group's key cells, ordered by key
struct Grouped {
    keys: Vec<Vec<Cell>>,
    columns: Vec<pl::Series>,
}

impl GroupBy {
    pub fn new(frame: DataFrame, keys: Vec<String>, as_index: bool) -> FrameResult<Self> {
        if keys.is_empty() {
            return Err(FrameError::Value("No group keys passed!".to_string()));
        }
        for k in &keys {
            frame.column_values(k)?;
        }
        Ok(Self {
            frame,
            keys,
            selection: None,
            single: false,
            as_index,
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Restrict the value columns; `single` yields series results
    pub fn select(&self, columns: Vec<String>, single: bool) -> FrameResult<GroupBy> {
        for c in &columns {
            self.frame.column_values(c)?;
        }
        Ok(GroupBy {
            selection: Some(columns),
            single,
            ..self.clone()
        })
    }

    pub fn selection(&self) -> Option<&[String]> {
        self.selection.as_deref()
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    fn value_columns(&self) -> Vec<String> {
        match &self.selection {
            Some(cols) => cols.clone(),
            None => self
                .frame
                .column_names()
                .into_iter()
                .filter(|c| !self.keys.contains(c))
                .collect(),
        }
    }

    fn dtype_of(&self, column: &str) -> FrameResult<DType> {
        Ok(self.frame.column(column)?.dtype())
    }

    fn expr(&self, source: &str, func: AggFunc, alias: &str) -> FrameResult<pl::Expr> {
        let dtype = self.dtype_of(source)?;
        if !dtype.is_numeric() && (func.numeric_only() || func == AggFunc::Sum) {
            return Err(FrameError::Type(format!(
                "agg function failed [how->{},dtype->{}]",
                func.name(),
                dtype
            )));
        }
        let c = pl::col(source);
        let e = match func {
            AggFunc::Sum => c.sum(),
            AggFunc::Mean => c.mean(),
            AggFunc::Median => c.median(),
            AggFunc::Min => c.min(),
            AggFunc::Max => c.max(),
            AggFunc::Count => c.count(),
            AggFunc::Size => c.len(),
            AggFunc::Nunique => c.drop_nulls().n_unique(),
            AggFunc::Std => c.std(1),
            AggFunc::Var => c.var(1),
        };
        Ok(e.alias(alias))
    }

    /// Run the aggregations through polars and order groups by key
    fn run(&self, exprs: Vec<pl::Expr>, aliases: &[String]) -> FrameResult<Grouped> {
        let mut lazy = self.frame.data().clone().lazy();
        for k in &self.keys {
            lazy = lazy.filter(pl::col(k).is_not_null());
        }
        let by: Vec<pl::Expr> = self.keys.iter().map(|k| pl::col(k)).collect();
        let out = lazy.group_by(by).agg(exprs).collect()?;

        let key_cells: Vec<Vec<Cell>> = self
            .keys
            .iter()
            .map(|k| Ok(cells_of_column(out.column(k)?)))
            .collect::<FrameResult<_>>()?;
        let mut order: Vec<usize> = (0..out.height()).collect();
        order.sort_by(|&a, &b| {
            key_cells
                .iter()
                .map(|col| col[a].sort_cmp(&col[b]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let take = positions_ca(&order);
        let keys = key_cells
            .iter()
            .map(|col| order.iter().map(|&p| col[p].clone()).collect())
            .collect();
        let columns = aliases
            .iter()
            .map(|a| normalize(out.column(a)?.take(&take)?))
            .collect::<FrameResult<_>>()?;
        Ok(Grouped { keys, columns })
    }

    fn key_index(&self, keys: Vec<Vec<Cell>>) -> Index {
        if self.keys.len() == 1 {
            let labels = keys.into_iter().next().unwrap_or_default();
            Index::new(Some(self.keys[0].clone()), labels)
        } else {
            Index::multi(self.keys.clone(), keys)
        }
    }

    fn finish(&self, grouped: Grouped, names: Vec<String>, series: bool) -> FrameResult<Aggregated> {
        let named: Vec<pl::Series> = grouped
            .columns
            .into_iter()
            .zip(&names)
            .map(|(mut s, name)| {
                s.rename(name);
                s
            })
            .collect();
        if !self.as_index {
            let rows = grouped.keys.first().map(Vec::len).unwrap_or(0);
            let mut all: Vec<pl::Series> = self
                .keys
                .iter()
                .zip(&grouped.keys)
                .map(|(name, cells)| column_from_cells(name, cells))
                .collect();
            all.extend(named);
            return Ok(Aggregated::Frame(DataFrame::from_parts(
                Index::range(rows),
                pl::DataFrame::new(all)?,
            )));
        }
        let index = self.key_index(grouped.keys);
        if series {
            return Ok(Aggregated::Series(match named.into_iter().next() {
                Some(data) => {
                    let name = data.name().to_string();
                    Series::from_column(Some(name), index, data)
                }
                None => Series::with_index(None, index, Vec::new()),
            }));
        }
        Ok(Aggregated::Frame(DataFrame::from_parts(
            index,
            pl::DataFrame::new(named)?,
        )))
    }

    /// Apply one reduction to every value column
    pub fn aggregate(&self, func: AggFunc) -> FrameResult<Aggregated> {
        if func == AggFunc::Size {
            return self.size();
        }
        let mut names = Vec::new();
        for name in self.value_columns() {
            let skip = self.selection.is_none()
                && (func.numeric_only() || func == AggFunc::Sum)
                && !self.dtype_of(&name)?.is_numeric();
            if !skip {
                names.push(name);
            }
        }
        let aliases = internal_aliases(names.len());
        let exprs = names
            .iter()
            .zip(&aliases)
            .map(|(name, alias)| self.expr(name, func, alias))
            .collect::<FrameResult<_>>()?;
        let grouped = self.run(exprs, &aliases)?;
        self.finish(grouped, names, self.single)
    }

    /// Named reductions: (output column, source column, function)
    pub fn aggregate_named(&self, specs: &[(String, String, AggFunc)]) -> FrameResult<Aggregated> {
        let aliases = internal_aliases(specs.len());
        let exprs = specs
            .iter()
            .zip(&aliases)
            .map(|((_, source, func), alias)| self.expr(source, *func, alias))
            .collect::<FrameResult<_>>()?;
        let grouped = self.run(exprs, &aliases)?;
        let names = specs.iter().map(|(out, _, _)| out.clone()).collect();
        self.finish(grouped, names, false)
    }

    /// Row count per group
    pub fn size(&self) -> FrameResult<Aggregated> {
        let aliases = internal_aliases(1);
        let exprs = vec![pl::col(&self.keys[0]).len().alias(&aliases[0])];
        let grouped = self.run(exprs, &aliases)?;
        if !self.as_index {
            return self.finish(grouped, vec!["size".to_string()], false);
        }
        let index = self.key_index(grouped.keys);
        let counts = grouped
            .columns
            .into_iter()
            .next()
            .map(|s| cells_of_column(&s))
            .unwrap_or_default();
        Ok(Aggregated::Series(Series::with_index(None, index, counts)))
    }

    /// Each group's key values with its rows, ordered by key
    pub fn groups(&self) -> FrameResult<Vec<(Vec<Cell>, DataFrame)>> {
        let key_cols: Vec<Vec<Cell>> = self
            .keys
            .iter()
            .map(|k| self.frame.column_values(k))
            .collect::<FrameResult<_>>()?;
        let mut slots: HashMap<Vec<Cell>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Cell>, Vec<usize>)> = Vec::new();
        for row in 0..self.frame.n_rows() {
            let key: Vec<Cell> = key_cols.iter().map(|c| c[row].clone()).collect();
            if key.iter().any(Cell::is_null) {
                continue;
            }
            match slots.get(&key) {
                Some(&slot) => groups[slot].1.push(row),
                None => {
                    slots.insert(key.clone(), groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }
        groups.sort_by(|a, b| {
            a.0.iter()
                .zip(&b.0)
                .map(|(x, y)| x.sort_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        groups
            .into_iter()
            .map(|(key, rows)| Ok((key, self.frame.take(&rows)?)))
            .collect()
    }

    pub fn ngroups(&self) -> FrameResult<usize> {
        Ok(self.groups()?.len())
    }
}

fn internal_aliases(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("__agg_{}", i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> DataFrame {
        DataFrame::new(vec![
            (
                "Region".to_string(),
                vec!["West".into(), "East".into(), "West".into(), Cell::Null],
            ),
            (
                "Product".to_string(),
                vec!["A".into(), "B".into(), "B".into(), "A".into()],
            ),
            (
                "Sales".to_string(),
                vec![Cell::Int(10), Cell::Int(20), Cell::Int(30), Cell::Int(40)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_single_column_sum_is_series() {
        let gb = sales()
            .groupby(vec!["Region".into()], true)
            .unwrap()
            .select(vec!["Sales".into()], true)
            .unwrap();
        let Aggregated::Series(s) = gb.aggregate(AggFunc::Sum).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(s.index.labels(), vec![Cell::from("East"), Cell::from("West")]);
        assert_eq!(s.values(), vec![Cell::Int(20), Cell::Int(40)]);
        assert_eq!(s.index.name(), Some("Region"));
        assert_eq!(s.name.as_deref(), Some("Sales"));
    }

    #[test]
    fn test_frame_mean_skips_text_columns() {
        let gb = sales().groupby(vec!["Region".into()], true).unwrap();
        let Aggregated::Frame(df) = gb.aggregate(AggFunc::Mean).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(df.column_names(), vec!["Sales".to_string()]);
        assert_eq!(
            df.column_values("Sales").unwrap(),
            vec![Cell::Float(20.0), Cell::Float(20.0)]
        );
    }

    #[test]
    fn test_selected_text_column_mean_is_type_error() {
        let gb = sales()
            .groupby(vec!["Region".into()], true)
            .unwrap()
            .select(vec!["Product".into()], true)
            .unwrap();
        assert_eq!(gb.aggregate(AggFunc::Mean).unwrap_err().kind(), "TypeError");
        let Aggregated::Series(s) = gb.aggregate(AggFunc::Nunique).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(s.values(), vec![Cell::Int(1), Cell::Int(2)]);
    }

    #[test]
    fn test_as_index_false_and_multi_key() {
        let gb = sales()
            .groupby(vec!["Region".into(), "Product".into()], false)
            .unwrap();
        let Aggregated::Frame(df) = gb.size().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(
            df.column_names(),
            vec!["Region".to_string(), "Product".to_string(), "size".to_string()]
        );
        assert_eq!(df.n_rows(), 3);
        assert_eq!(df.column_values("size").unwrap(), vec![Cell::Int(1); 3]);
    }

    #[test]
    fn test_named_aggregation() {
        let gb = sales().groupby(vec!["Product".into()], true).unwrap();
        let specs = vec![
            ("total".to_string(), "Sales".to_string(), AggFunc::Sum),
            ("n".to_string(), "Sales".to_string(), AggFunc::Count),
        ];
        let Aggregated::Frame(df) = gb.aggregate_named(&specs).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(df.column_values("total").unwrap(), vec![Cell::Int(50), Cell::Int(50)]);
        assert_eq!(df.column_values("n").unwrap(), vec![Cell::Int(2), Cell::Int(2)]);
        assert_eq!(df.reset_index(false).unwrap().column_names()[0], "Product");
    }

    #[test]
    fn test_groups_drop_null_keys() {
        let gb = sales().groupby(vec!["Region".into()], true).unwrap();
        let groups = gb.groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].0, vec![Cell::from("West")]);
        assert_eq!(groups[1].1.n_rows(), 2);
    }

    #[test]
    fn test_unknown_key() {
        assert_eq!(
            sales().groupby(vec!["Nope".into()], true).unwrap_err().kind(),
            "KeyError"
        );
    }
}
