use super::Cell;
use serde_json::Value as Json;

/// Row labels, one or more levels
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    names: Vec<Option<String>>,
    levels: Vec<Vec<Cell>>,
}

impl Index {
    pub fn range(n: usize) -> Self {
        Self::new(None, (0..n as i64).map(Cell::Int).collect())
    }

    pub fn new(name: Option<String>, labels: Vec<Cell>) -> Self {
        Self {
            names: vec![name],
            levels: vec![labels],
        }
    }

    /// Multi-level index; a single level collapses to a plain index
    pub fn multi(names: Vec<String>, levels: Vec<Vec<Cell>>) -> Self {
        if levels.is_empty() {
            return Self::range(0);
        }
        Self {
            names: names.into_iter().map(Some).collect(),
            levels,
        }
    }

    pub fn len(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_multi(&self) -> bool {
        self.levels.len() > 1
    }

    pub fn name(&self) -> Option<&str> {
        self.names.first().and_then(|n| n.as_deref())
    }

    pub fn label(&self, i: usize) -> Cell {
        if self.is_multi() {
            let parts: Vec<String> = self.levels.iter().map(|l| l[i].repr()).collect();
            Cell::Str(format!("({})", parts.join(", ")))
        } else {
            self.levels[0][i].clone()
        }
    }

    pub fn label_json(&self, i: usize) -> Json {
        if self.is_multi() {
            Json::Array(self.levels.iter().map(|l| l[i].to_json()).collect())
        } else {
            self.levels[0][i].to_json()
        }
    }

    pub fn labels(&self) -> Vec<Cell> {
        (0..self.len()).map(|i| self.label(i)).collect()
    }

    pub fn take(&self, positions: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            levels: self
                .levels
                .iter()
                .map(|level| positions.iter().map(|&p| level[p].clone()).collect())
                .collect(),
        }
    }

    /// Contiguous rows `[offset, offset + len)`
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self {
            names: self.names.clone(),
            levels: self
                .levels
                .iter()
                .map(|level| level[offset..offset + len].to_vec())
                .collect(),
        }
    }

    pub fn same_labels(&self, other: &Index) -> bool {
        self.levels == other.levels
    }

    pub fn position(&self, label: &Cell) -> Option<usize> {
        (0..self.len()).find(|&i| {
            let own = self.label(i);
            own == *label || own.loose_eq(label)
        })
    }

    /// Levels as named columns, as `reset_index` inserts them
    pub fn to_columns(&self) -> Vec<(String, Vec<Cell>)> {
        let multi = self.is_multi();
        self.names
            .iter()
            .zip(&self.levels)
            .enumerate()
            .map(|(i, (name, level))| {
                let name = match name {
                    Some(n) => n.clone(),
                    None if multi => format!("level_{}", i),
                    None => "index".to_string(),
                };
                (name, level.clone())
            })
            .collect()
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        if !self.is_multi() {
            self.names = vec![name];
        }
        self
    }

    pub fn estimated_size(&self) -> usize {
        self.levels
            .iter()
            .flatten()
            .map(Cell::estimated_size)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_to_columns() {
        let idx = Index::multi(
            vec!["a".into(), "b".into()],
            vec![
                vec![Cell::Int(1), Cell::Int(2)],
                vec![Cell::from("x"), Cell::from("y")],
            ],
        );
        assert!(idx.is_multi());
        assert_eq!(idx.label(0), Cell::from("(1, 'x')"));
        assert_eq!(idx.to_columns()[1].0, "b");
        assert_eq!(Index::range(2).to_columns()[0].0, "index");
    }

    #[test]
    fn test_slice_keeps_names() {
        let idx = Index::new(Some("k".into()), vec![Cell::Int(7), Cell::Int(8), Cell::Int(9)]);
        let part = idx.slice(1, 2);
        assert_eq!(part.labels(), vec![Cell::Int(8), Cell::Int(9)]);
        assert_eq!(part.name(), Some("k"));
    }
}
