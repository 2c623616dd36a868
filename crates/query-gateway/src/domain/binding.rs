//! Parameter binding.
//!
//! Two styles are accepted, never mixed in one request:
//!
//! - positional: keys `"1"`, `"2"`, ... (or `"$1"`) matching `$n` placeholders
//! - named: identifier keys matching `:name` placeholders, which are rewritten
//!   to `$n` in order of first appearance
//!
//! Values travel to the store as typed bind parameters. Query text is never
//! assembled from parameter values.

use crate::domain::types::QueryParameters;
use serde_json::Value;
use std::collections::BTreeMap;

/// A bind value, typed from its JSON representation
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
}

impl From<&Value> for SqlParam {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                match strings {
                    Some(strings) => Self::TextArray(strings),
                    None => Self::Json(value.clone()),
                }
            }
            Value::Object(_) => Self::Json(value.clone()),
        }
    }
}

/// SQL text with `$n` placeholders and the values for them, in order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("positional and named parameters cannot be mixed")]
    MixedStyles,

    #[error("positional parameters must be numbered 1..={expected} without gaps")]
    NonContiguous { expected: usize },

    #[error("'{0}' is not a valid parameter name")]
    InvalidName(String),

    #[error("parameter '{0}' is referenced by the query but not supplied")]
    Missing(String),

    #[error("parameter '{0}' is not referenced by the query")]
    Unused(String),
}

/// Bind `parameters` to `sql`.
pub fn bind(sql: &str, parameters: &QueryParameters) -> Result<BoundQuery, BindingError> {
    if parameters.is_empty() {
        return Ok(BoundQuery {
            sql: sql.to_string(),
            params: Vec::new(),
        });
    }

    let positions: Vec<Option<usize>> = parameters.keys().map(|k| positional_index(k)).collect();

    if positions.iter().all(Option::is_some) {
        bind_positional(sql, parameters)
    } else if positions.iter().any(Option::is_some) {
        Err(BindingError::MixedStyles)
    } else {
        bind_named(sql, parameters)
    }
}

fn positional_index(key: &str) -> Option<usize> {
    let digits = key.strip_prefix('$').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn bind_positional(sql: &str, parameters: &QueryParameters) -> Result<BoundQuery, BindingError> {
    let mut ordered: BTreeMap<usize, &Value> = BTreeMap::new();
    for (key, value) in parameters {
        if let Some(idx) = positional_index(key) {
            ordered.insert(idx, value);
        }
    }

    // BTreeMap keys are unique and sorted, so contiguity is a bounds check
    let expected = parameters.len();
    let contiguous = ordered.len() == expected
        && ordered.keys().next() == Some(&1)
        && ordered.keys().next_back() == Some(&expected);
    if !contiguous {
        return Err(BindingError::NonContiguous { expected });
    }

    Ok(BoundQuery {
        sql: sql.to_string(),
        params: ordered.values().map(|v| SqlParam::from(*v)).collect(),
    })
}

fn bind_named(sql: &str, parameters: &QueryParameters) -> Result<BoundQuery, BindingError> {
    if let Some(bad) = parameters.keys().find(|k| !is_identifier(k)) {
        return Err(BindingError::InvalidName(bad.clone()));
    }

    let mut order: Vec<String> = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                out.push(ch);
            }
            ':' if chars.peek() == Some(&':') => {
                // type cast
                out.push(':');
                out.push(':');
                chars.next();
            }
            ':' if chars
                .peek()
                .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') =>
            {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if !parameters.contains_key(&name) {
                    return Err(BindingError::Missing(name));
                }
                let idx = match order.iter().position(|n| *n == name) {
                    Some(existing) => existing + 1,
                    None => {
                        order.push(name);
                        order.len()
                    }
                };
                out.push('$');
                out.push_str(&idx.to_string());
            }
            _ => out.push(ch),
        }
    }

    if let Some(unused) = parameters.keys().find(|k| !order.contains(k)) {
        return Err(BindingError::Unused(unused.clone()));
    }

    let params = order
        .iter()
        .filter_map(|name| parameters.get(name))
        .map(SqlParam::from)
        .collect();

    Ok(BoundQuery { sql: out, params })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
