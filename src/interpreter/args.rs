use super::error::{EvalError, EvalResult};
use super::value::Value;
use crate::frame::Cell;

/// Evaluated call arguments
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self::new(values, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn kw(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Argument by position, falling back to its keyword name
    pub fn get(&self, pos: usize, name: &str) -> Option<&Value> {
        self.positional.get(pos).or_else(|| self.kw(name))
    }

    pub fn required(&self, pos: usize, name: &str, func: &str) -> EvalResult<&Value> {
        self.get(pos, name).ok_or_else(|| {
            EvalError::type_error(format!(
                "{}() missing 1 required positional argument: '{}'",
                func, name
            ))
        })
    }

    pub fn at_most(&self, n: usize, func: &str) -> EvalResult<()> {
        if self.positional.len() > n {
            return Err(EvalError::type_error(format!(
                "{}() takes at most {} positional argument{} ({} given)",
                func,
                n,
                if n == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        Ok(())
    }

    /// Present and not `None`
    pub fn given(&self, pos: usize, name: &str) -> Option<&Value> {
        self.get(pos, name).filter(|v| !matches!(v, Value::None))
    }

    pub fn flag(&self, pos: usize, name: &str, default: bool) -> EvalResult<bool> {
        match self.given(pos, name) {
            Some(v) => v.truthy(),
            None => Ok(default),
        }
    }

    pub fn kw_flag(&self, name: &str, default: bool) -> EvalResult<bool> {
        self.flag(usize::MAX, name, default)
    }

    pub fn int(&self, pos: usize, name: &str, default: i64) -> EvalResult<i64> {
        match self.given(pos, name) {
            Some(v) => v.as_int(),
            None => Ok(default),
        }
    }

    pub fn float(&self, pos: usize, name: &str, default: f64) -> EvalResult<f64> {
        match self.given(pos, name) {
            Some(v) => v.as_f64().ok_or_else(|| {
                EvalError::type_error(format!(
                    "'{}' must be a number, not '{}'",
                    name,
                    v.type_name()
                ))
            }),
            None => Ok(default),
        }
    }

    pub fn string(&self, pos: usize, name: &str) -> EvalResult<Option<String>> {
        match self.given(pos, name) {
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(EvalError::type_error(format!(
                "'{}' must be a string, not '{}'",
                name,
                other.type_name()
            ))),
            None => Ok(None),
        }
    }
}

/// Column names from a string, list, tuple or index
pub fn labels_of(value: &Value) -> EvalResult<Vec<String>> {
    let as_name = |v: &Value| match v {
        Value::Str(s) => Ok(s.clone()),
        other => Ok(other.str_of()),
    };
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(items) => items.borrow().iter().map(as_name).collect(),
        Value::Tuple(items) => items.iter().map(as_name).collect(),
        Value::Index(labels) => Ok(labels.iter().map(|c| c.to_string()).collect()),
        other => Err(EvalError::type_error(format!(
            "expected a column name or list of names, not '{}'",
            other.type_name()
        ))),
    }
}

/// Cells from a scalar or a sequence of scalars
pub fn cells_of(value: &Value) -> EvalResult<Vec<Cell>> {
    match value {
        Value::List(items) => items.borrow().iter().map(Value::to_cell).collect(),
        Value::Tuple(items) => items.iter().map(Value::to_cell).collect(),
        Value::Set(items) => items.borrow().iter().map(|k| k.value().to_cell()).collect(),
        Value::Series(s) => Ok(s.values()),
        Value::Index(labels) => Ok(labels.to_vec()),
        other => Ok(vec![other.to_cell()?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_then_keyword() {
        let args = Args::new(
            vec![Value::Int(3)],
            vec![("ascending".to_string(), Value::Bool(false))],
        );
        assert_eq!(args.int(0, "n", 5).unwrap(), 3);
        assert!(!args.flag(1, "ascending", true).unwrap());
        assert!(args.kw_flag("dropna", true).unwrap());
        assert!(args.required(2, "by", "sort_values").is_err());
    }

    #[test]
    fn test_labels_of() {
        let v = Value::list(vec![Value::str("a"), Value::str("b")]);
        assert_eq!(labels_of(&v).unwrap(), vec!["a", "b"]);
        assert_eq!(labels_of(&Value::str("x")).unwrap(), vec!["x"]);
        assert!(labels_of(&Value::None).is_err());
    }
}
