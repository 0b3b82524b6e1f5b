//! A small typed-literal parser for instrument configuration values.
//!
//! The on-disk grammar is a line-oriented `Key=Value` format. Most values are a self-describing
//! literal: a boolean, an integer, a real, `None`, a bracketed list, or a braced mapping. This
//! module probes the raw remainder of a line for each of those shapes in turn and refuses
//! anything else, rather than evaluating the text as code.

use std::fmt;

use anyhow::{anyhow, bail, Result};

/// A parsed configuration literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// An ordered mapping; order is preserved because register maps rely on declaration order.
    Map(Vec<(String, Value)>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

/// Parses the remainder of a `Key=Value` line (everything after `=`) into a [Value].
///
/// Probes, in order: `None`, booleans (`True`/`False`), a bracketed list, a braced mapping, an
/// integer, a real. A bare unquoted string with none of these shapes is rejected: this grammar
/// has exactly three string-typed keys (`Instrument Name`, `Communication Type`,
/// `Output Directory`), and those are read with [parse_raw_string] instead of this function.
pub fn parse_value(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "None" {
        return Ok(Value::None);
    }
    if trimmed == "True" {
        return Ok(Value::Bool(true));
    }
    if trimmed == "False" {
        return Ok(Value::Bool(false));
    }
    if let Some(inner) = strip_wrapping(trimmed, '[', ']') {
        return Ok(Value::List(
            split_top_level(inner)
                .iter()
                .map(|part| parse_value(part))
                .collect::<Result<_>>()?,
        ));
    }
    if let Some(inner) = strip_wrapping(trimmed, '{', '}') {
        let mut entries = Vec::new();
        for part in split_top_level(inner) {
            let (key, val) = part
                .split_once(':')
                .ok_or_else(|| anyhow!("malformed mapping entry: {part}"))?;
            let key = unquote(key.trim());
            entries.push((key, parse_value(val.trim())?));
        }
        return Ok(Value::Map(entries));
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    // Quoted strings are accepted for mapping keys/values and list elements, but never as a
    // top-level value outside the three raw-string keys.
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Ok(Value::Str(unquote(trimmed)));
    }
    bail!("unrecognized configuration literal: {trimmed}")
}

/// Parses the remainder of a line for one of the three raw-string-typed keys: the value is the
/// line's content verbatim, with no quoting or literal probing.
pub fn parse_raw_string(raw: &str) -> String {
    raw.to_string()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn strip_wrapping(s: &str, open: char, close: char) -> Option<&str> {
    let s = s.trim();
    if s.starts_with(open) && s.ends_with(close) && s.len() >= 2 {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Splits `s` on top-level commas, respecting nested `[]`/`{}` and quoted strings.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '"' | '\'' => match in_quote {
                Some(q) if q == c => in_quote = None,
                None => in_quote = Some(c),
                _ => {}
            },
            '[' | '{' if in_quote.is_none() => depth += 1,
            ']' | '}' if in_quote.is_none() => depth -= 1,
            ',' if depth == 0 && in_quote.is_none() => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = s[start..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bool() {
        assert_eq!(parse_value("True").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("False").unwrap(), Value::Bool(false));
    }

    #[test]
    fn parses_none() {
        assert_eq!(parse_value("None").unwrap(), Value::None);
        assert_eq!(parse_value("").unwrap(), Value::None);
    }

    #[test]
    fn parses_numbers() {
        assert_eq!(parse_value("42").unwrap(), Value::Int(42));
        assert_eq!(parse_value("-3").unwrap(), Value::Int(-3));
        assert_eq!(parse_value("1.5").unwrap(), Value::Float(1.5));
    }

    #[test]
    fn parses_list() {
        let v = parse_value("[1, 2, 3]").unwrap();
        assert_eq!(
            v,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn parses_nested_mapping() {
        let v = parse_value("{'P': 100, 'T': 102}").unwrap();
        let map = v.as_map().unwrap();
        assert_eq!(map[0], ("P".to_string(), Value::Int(100)));
        assert_eq!(map[1], ("T".to_string(), Value::Int(102)));
    }

    #[test]
    fn rejects_bare_identifier() {
        assert!(parse_value("not_a_literal").is_err());
    }

    #[test]
    fn preserves_mapping_order() {
        let v = parse_value("{'z': 1, 'a': 2, 'm': 3}").unwrap();
        let keys: Vec<_> = v.as_map().unwrap().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
