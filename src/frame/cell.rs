use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single typed value stored in a column or index
#[derive(Debug, Clone)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    /// Float constructor that folds NaN into `Null`
    pub fn from_f64(x: f64) -> Self {
        if x.is_nan() {
            Cell::Null
        } else {
            Cell::Float(x)
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Float(x) => x.is_nan(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Bool(_) | Cell::Int(_) | Cell::Float(_))
    }

    /// Numeric view, `None` for nulls and strings
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(x) if !x.is_nan() => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness as used by boolean masks; nulls are false
    pub fn truthy(&self) -> bool {
        match self {
            Cell::Null => false,
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i != 0,
            Cell::Float(x) => *x != 0.0 && !x.is_nan(),
            Cell::Str(s) => !s.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "NoneType",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Str(_) => "str",
        }
    }

    /// Compare two non-null cells; `None` when the types are not comparable
    pub fn compare(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Int(a), Cell::Int(b)) => Some(a.cmp(b)),
            (Cell::Str(a), Cell::Str(b)) => Some(a.cmp(b)),
            (Cell::Bool(a), Cell::Bool(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Ordering for sorting: nulls last, incomparable values keep their order
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.compare(other).unwrap_or_else(|| {
                // numbers before strings when a column is mixed
                self.is_numeric().cmp(&other.is_numeric()).reverse()
            }),
        }
    }

    /// Equality with numeric coercion (`1 == 1.0 == True`)
    pub fn loose_eq(&self, other: &Cell) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.compare(other) == Some(Ordering::Equal)
    }

    pub fn to_json(&self) -> Json {
        match self {
            Cell::Null => Json::Null,
            Cell::Bool(b) => Json::Bool(*b),
            Cell::Int(i) => Json::from(*i),
            Cell::Float(x) => serde_json::Number::from_f64(*x)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Cell::Str(s) => Json::String(s.clone()),
        }
    }

    /// Python-style repr (strings quoted)
    pub fn repr(&self) -> String {
        match self {
            Cell::Str(s) => quote_str(s),
            other => other.to_string(),
        }
    }

    pub fn estimated_size(&self) -> usize {
        match self {
            Cell::Str(s) => 24 + s.len(),
            _ => 8,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => float_bits(*a) == float_bits(*b),
            (Cell::Str(a), Cell::Str(b)) => a == b,
            (Cell::Null, Cell::Float(x)) | (Cell::Float(x), Cell::Null) => x.is_nan(),
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Cell::Float(x) if x.is_nan() => 0u8.hash(state),
            Cell::Null => 0u8.hash(state),
            Cell::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Cell::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Cell::Float(x) => {
                3u8.hash(state);
                float_bits(*x).hash(state);
            }
            Cell::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
        }
    }
}

fn float_bits(x: f64) -> u64 {
    if x.is_nan() {
        f64::NAN.to_bits()
    } else if x == 0.0 {
        0.0f64.to_bits()
    } else {
        x.to_bits()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NaN"),
            Cell::Bool(true) => write!(f, "True"),
            Cell::Bool(false) => write!(f, "False"),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", format_float(*x)),
            Cell::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

impl From<i64> for Cell {
    fn from(i: i64) -> Self {
        Cell::Int(i)
    }
}

impl From<f64> for Cell {
    fn from(x: f64) -> Self {
        Cell::from_f64(x)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Str(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Str(s)
    }
}

/// Render a float the way Python's `repr` does
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let exponent = x.abs().log10().floor();
    if !(-4.0..16.0).contains(&exponent) {
        let formatted = format!("{:e}", x);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => formatted,
        };
    }
    let s = format!("{}", x);
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Quote a string with Python's repr rules
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(4.0), "4.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_nan_is_null() {
        assert!(Cell::from_f64(f64::NAN).is_null());
        assert_eq!(Cell::Float(f64::NAN), Cell::Null);
        assert!(!Cell::Null.loose_eq(&Cell::Null));
    }

    #[test]
    fn test_sort_cmp_nulls_last() {
        let mut cells = vec![Cell::Int(3), Cell::Null, Cell::Float(1.5), Cell::Int(2)];
        cells.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            cells,
            vec![Cell::Float(1.5), Cell::Int(2), Cell::Int(3), Cell::Null]
        );
    }

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(Cell::from("x").repr(), "'x'");
    }

    #[test]
    fn test_json() {
        assert_eq!(Cell::Float(f64::INFINITY).to_json(), Json::Null);
        assert_eq!(Cell::Int(3).to_json(), serde_json::json!(3));
    }
}
