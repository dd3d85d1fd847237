//! Format specifications for f-strings, `str.format` and `%`

use super::args::Args;
use super::error::{ErrorKind, EvalError, EvalResult};
use super::value::Value;
use crate::frame::format_float;

#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str, limit: usize) -> EvalResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        out.sign = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '#' {
        out.alternate = true;
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        if out.fill.is_none() {
            out.fill = Some('0');
            out.align.get_or_insert('=');
        }
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid(spec))?;
    }
    if i < chars.len() && matches!(chars[i], ',' | '_') {
        out.grouping = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(EvalError::value_error("Format specifier missing precision"));
        }
        out.precision = Some(
            chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| invalid(spec))?,
        );
    }
    if i < chars.len() {
        out.kind = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid(spec));
    }
    check_size("width", out.width, limit)?;
    check_size("precision", out.precision.unwrap_or(0), limit)?;
    Ok(out)
}

/// Widths and precisions are bounded by the collection limit
fn check_size(what: &str, n: usize, limit: usize) -> EvalResult<()> {
    if n > limit {
        return Err(EvalError::new(
            ErrorKind::ResourceLimitError,
            format!("format {} of {} exceeds the limit of {}", what, n, limit),
        ));
    }
    Ok(())
}

fn invalid(spec: &str) -> EvalError {
    EvalError::value_error(format!("Invalid format specifier '{}'", spec))
}

fn unknown_code(kind: char, value: &Value) -> EvalError {
    EvalError::value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        kind,
        value.type_name()
    ))
}

/// Apply a format spec to a value, as `format(value, spec)` does
pub fn format_value(value: &Value, spec: &str, limit: usize) -> EvalResult<String> {
    if spec.is_empty() {
        return Ok(value.str_of());
    }
    let spec = parse_spec(spec, limit)?;
    let (sign, body) = match value {
        Value::Str(s) => {
            if let Some(k) = spec.kind.filter(|k| *k != 's') {
                return Err(unknown_code(k, value));
            }
            let body = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            };
            return Ok(pad(&spec, String::new(), body, '<'));
        }
        Value::Int(_) | Value::Bool(_) if matches!(spec.kind, None | Some('d' | 'n')) && spec.precision.is_none() => {
            let n = value.as_int()?;
            let digits = group(&n.unsigned_abs().to_string(), spec.grouping);
            (sign_of(n < 0, spec.sign), digits)
        }
        Value::Int(_) | Value::Bool(_) if matches!(spec.kind, Some('x' | 'X' | 'o' | 'b')) => {
            let n = value.as_int()?;
            let magnitude = n.unsigned_abs();
            let (digits, prefix) = match spec.kind {
                Some('x') => (format!("{:x}", magnitude), "0x"),
                Some('X') => (format!("{:X}", magnitude), "0X"),
                Some('o') => (format!("{:o}", magnitude), "0o"),
                _ => (format!("{:b}", magnitude), "0b"),
            };
            let mut sign = sign_of(n < 0, spec.sign);
            if spec.alternate {
                sign.push_str(prefix);
            }
            (sign, digits)
        }
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => {
            let x = value.as_f64().unwrap_or(f64::NAN);
            if matches!(spec.kind, Some('d' | 'x' | 'X' | 'o' | 'b' | 'c')) {
                return Err(unknown_code(spec.kind.unwrap_or('d'), value));
            }
            let body = format_float_spec(x.abs(), &spec)?;
            (sign_of(x.is_sign_negative() && !x.is_nan(), spec.sign), body)
        }
        Value::None if spec.kind.is_none() => (String::new(), "None".to_string()),
        other => {
            if spec.kind.is_some() || spec.precision.is_some() {
                return Err(EvalError::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )));
            }
            (String::new(), other.str_of())
        }
    };
    Ok(pad(&spec, sign, body, '>'))
}

fn sign_of(negative: bool, flag: Option<char>) -> String {
    match (negative, flag) {
        (true, _) => "-".to_string(),
        (false, Some('+')) => "+".to_string(),
        (false, Some(' ')) => " ".to_string(),
        _ => String::new(),
    }
}

fn format_float_spec(x: f64, spec: &Spec) -> EvalResult<String> {
    if x.is_nan() {
        return Ok(if matches!(spec.kind, Some('F' | 'E' | 'G')) { "NAN" } else { "nan" }.to_string());
    }
    if x.is_infinite() {
        return Ok(if matches!(spec.kind, Some('F' | 'E' | 'G')) { "INF" } else { "inf" }.to_string());
    }
    let body = match spec.kind {
        Some('f' | 'F') => {
            let p = spec.precision.unwrap_or(6);
            group_fixed(&format!("{:.*}", p, x), spec.grouping)
        }
        Some('%') => {
            let p = spec.precision.unwrap_or(6);
            format!("{}%", group_fixed(&format!("{:.*}", p, x * 100.0), spec.grouping))
        }
        Some('e' | 'E') => {
            let s = scientific(x, spec.precision.unwrap_or(6));
            if spec.kind == Some('E') {
                s.to_uppercase()
            } else {
                s
            }
        }
        Some('g' | 'G' | 'n') => {
            let s = general(x, spec.precision.unwrap_or(6), spec.alternate);
            let s = if spec.kind == Some('G') { s.to_uppercase() } else { s };
            group_fixed(&s, spec.grouping)
        }
        None => match spec.precision {
            Some(p) => {
                let s = general(x, p.max(1), false);
                if s.contains(['.', 'e']) {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            None => group_fixed(&format_float(x), spec.grouping),
        },
        Some(other) => {
            return Err(EvalError::value_error(format!(
                "Unknown format code '{}' for object of type 'float'",
                other
            )))
        }
    };
    Ok(body)
}

/// `{:e}` with a two-digit signed exponent
fn scientific(x: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, x);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((&raw, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    format!(
        "{}e{}{:02}",
        mantissa,
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    )
}

/// `{:g}`: fixed or scientific depending on the exponent
fn general(x: f64, precision: usize, keep_zeros: bool) -> String {
    let p = precision.max(1);
    if x == 0.0 {
        return if keep_zeros {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let raw = format!("{:.*e}", p - 1, x);
    let exp: i32 = raw
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let trim = |s: String| {
        if keep_zeros || !s.contains('.') {
            s
        } else {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    };
    if exp >= -4 && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        trim(format!("{:.*}", decimals, x))
    } else {
        let s = scientific(x, p - 1);
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "+00"));
        format!("{}e{}", trim(mantissa.to_string()), exp)
    }
}

fn group(digits: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn group_fixed(s: &str, sep: Option<char>) -> String {
    if sep.is_none() || s.contains('e') {
        return s.to_string();
    }
    match s.split_once('.') {
        Some((int, frac)) => format!("{}.{}", group(int, sep), frac),
        None => group(s, sep),
    }
}

fn pad(spec: &Spec, sign: String, body: String, default_align: char) -> String {
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{}{}", sign, body);
    }
    let fill = spec.fill.unwrap_or(' ');
    let gap = spec.width - len;
    let fills = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}{}", sign, body, fills(gap)),
        '^' => format!("{}{}{}{}", fills(gap / 2), sign, body, fills(gap - gap / 2)),
        '=' => format!("{}{}{}", sign, fills(gap), body),
        _ => format!("{}{}{}", fills(gap), sign, body),
    }
}

/// `str.format` with positional, numbered and named fields
pub fn str_format(template: &str, args: &Args, limit: usize) -> EvalResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut auto = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => {
                return Err(EvalError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == '}')
                    .map(|p| p + i)
                    .ok_or_else(|| {
                        EvalError::value_error("Single '{' encountered in format string")
                    })?;
                let field: String = chars[i + 1..close].iter().collect();
                let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((n, c)) => (n, c.chars().next()),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let v = args.positional.get(auto).cloned();
                    auto += 1;
                    v.ok_or_else(|| {
                        EvalError::new(
                            ErrorKind::IndexError,
                            format!("Replacement index {} out of range for positional args tuple", auto - 1),
                        )
                    })?
                } else if let Ok(pos) = name.parse::<usize>() {
                    args.positional.get(pos).cloned().ok_or_else(|| {
                        EvalError::new(
                            ErrorKind::IndexError,
                            format!("Replacement index {} out of range for positional args tuple", pos),
                        )
                    })?
                } else {
                    args.kw(name).cloned().ok_or_else(|| {
                        EvalError::new(ErrorKind::KeyError, format!("'{}'", name))
                    })?
                };
                out.push_str(&convert_and_format(&value, conversion, spec, limit)?);
                i = close + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Apply an optional `!r` / `!s` conversion then a format spec
pub fn convert_and_format(
    value: &Value,
    conversion: Option<char>,
    spec: &str,
    limit: usize,
) -> EvalResult<String> {
    match conversion {
        Some('r') | Some('a') => format_value(&Value::Str(value.repr()), spec, limit),
        Some('s') => format_value(&Value::Str(value.str_of()), spec, limit),
        Some(other) => Err(EvalError::value_error(format!(
            "Unknown conversion specifier {}",
            other
        ))),
        None => format_value(value, spec, limit),
    }
}

/// printf-style `template % values`
pub fn percent_format(template: &str, values: &Value, limit: usize) -> EvalResult<String> {
    let items: Vec<Value> = match values {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut next = items.iter();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | '-' | '+' | ' ' | '0')) {
            i += 1;
        }
        let Some(&kind) = chars.get(i) else {
            return Err(EvalError::value_error("incomplete format"));
        };
        i += 1;
        if kind == '%' {
            out.push('%');
            continue;
        }
        let flags: String = chars[start..i - 1].iter().collect();
        let value = next.next().ok_or_else(|| {
            EvalError::type_error("not enough arguments for format string")
        })?;
        let left = flags.starts_with('-');
        let flags = flags.trim_start_matches('-');
        let align = if left { "<" } else { "" };
        match kind {
            's' => push_padded(&mut out, &value.str_of(), flags, left, limit)?,
            'r' => push_padded(&mut out, &value.repr(), flags, left, limit)?,
            'd' | 'i' => {
                let n = match value {
                    Value::Float(x) => x.trunc() as i64,
                    other => other.as_int().map_err(|_| {
                        EvalError::type_error(format!(
                            "%{} format: a real number is required, not {}",
                            kind,
                            other.type_name()
                        ))
                    })?,
                };
                out.push_str(&format_value(&Value::Int(n), &format!("{}{}d", align, flags), limit)?);
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                if !value.is_number() {
                    return Err(EvalError::type_error(format!(
                        "must be real number, not {}",
                        value.type_name()
                    )));
                }
                let precision = if flags.contains('.') { "" } else { ".6" };
                let spec = format!("{}{}{}{}", align, flags, precision, kind);
                out.push_str(&format_value(value, &spec, limit)?);
            }
            other => {
                return Err(EvalError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        }
    }
    if next.next().is_some() {
        return Err(EvalError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn push_padded(
    out: &mut String,
    text: &str,
    flags: &str,
    left: bool,
    limit: usize,
) -> EvalResult<()> {
    let width: usize = flags.trim_start_matches('0').parse().unwrap_or(0);
    check_size("width", width, limit)?;
    let gap = " ".repeat(width.saturating_sub(text.chars().count()));
    if left {
        out.push_str(text);
        out.push_str(&gap);
    } else {
        out.push_str(&gap);
        out.push_str(text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1_000_000;

    fn fmt(v: Value, spec: &str) -> String {
        format_value(&v, spec, LIMIT).unwrap()
    }

    #[test]
    fn test_fixed_and_grouping() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(1234.5), ",.2f"), "1,234.50");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Int(5), "03d"), "005");
        assert_eq!(fmt(Value::Float(-2.5), "+.1f"), "-2.5");
    }

    #[test]
    fn test_alignment() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
        assert_eq!(fmt(Value::Int(7), "3"), "  7");
    }

    #[test]
    fn test_general_and_scientific() {
        assert_eq!(fmt(Value::Float(12345.678), ".3g"), "1.23e+04");
        assert_eq!(fmt(Value::Float(0.5), "g"), "0.5");
        assert_eq!(fmt(Value::Float(1500.0), "e"), "1.500000e+03");
        assert_eq!(fmt(Value::Float(2.0), ""), "2.0");
    }

    #[test]
    fn test_bad_codes() {
        assert!(format_value(&Value::Float(1.5), "d", LIMIT).is_err());
        assert!(format_value(&Value::str("x"), ".2f", LIMIT).is_err());
    }

    #[test]
    fn test_huge_width_and_precision_are_refused() {
        let err = format_value(&Value::Int(1), ">100000000000", LIMIT).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        let err = format_value(&Value::Float(3.14159), ".1000000000f", LIMIT).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        let err = percent_format("%100000000000s", &Value::str("x"), LIMIT).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceLimitError);
        assert_eq!(fmt(Value::Int(1), ">4"), "   1");
    }

    #[test]
    fn test_str_format() {
        let args = Args::new(
            vec![Value::str("West"), Value::Float(12.345)],
            vec![("n".to_string(), Value::Int(3))],
        );
        assert_eq!(
            str_format("{} sold {:.1f} ({n} rows) {{ok}}", &args, LIMIT).unwrap(),
            "West sold 12.3 (3 rows) {ok}"
        );
        assert_eq!(str_format("{1}-{0}", &args, LIMIT).unwrap(), "12.345-West");
        assert!(str_format("{missing}", &args, LIMIT).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("a"), Value::Float(2.5), Value::Int(3)]);
        assert_eq!(percent_format("%s=%.2f (%d%%)", &args, LIMIT).unwrap(), "a=2.50 (3%)");
        assert_eq!(percent_format("%5s|", &Value::str("x"), LIMIT).unwrap(), "    x|");
        assert!(percent_format("%s %s", &Value::str("x"), LIMIT).is_err());
    }
}
