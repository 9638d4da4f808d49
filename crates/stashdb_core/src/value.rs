//! Identifier and scalar codec for the SQLite boundary.
//!
//! # Responsibility
//! - Quote table/column identifiers for generated SQL.
//! - Normalize Rust scalars into engine values on the way in.
//!
//! # Invariants
//! - Tokens containing `(` or `)` are expressions and pass through unquoted.
//! - Dotted tokens are quoted part by part so `t.col` joins stay valid.
//! - `Option::None` and NaN reals always travel as SQL NULL.

use rusqlite::types::Value;
use std::collections::HashMap;

/// A fetched row as a column-name to value map.
pub type SqlRow = HashMap<String, Value>;

/// Quotes an identifier for inclusion in generated SQL.
///
/// # Contract
/// - `COUNT(*)` and other expressions (anything containing parentheses)
///   are returned unchanged.
/// - `a.b` becomes `"a"."b"`.
/// - Plain tokens are double-quoted.
pub fn escape_column(token: &str) -> String {
    if token.contains('(') || token.contains(')') {
        return token.to_string();
    }
    if token.contains('.') {
        return token
            .split('.')
            .map(|part| format!("\"{part}\""))
            .collect::<Vec<_>>()
            .join(".");
    }
    format!("\"{token}\"")
}

/// Collapses engine null markers before a value is bound.
///
/// SQLite cannot store NaN; a NaN real degrades to NULL at bind time,
/// so we collapse it eagerly to keep cache keys and logs honest.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Real(real) if real.is_nan() => Value::Null,
        other => other,
    }
}

/// Renders a bound value for the query log.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => format!("'{t}'"),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

/// Conversion into an engine value, with `Option` collapsing to NULL.
///
/// Kept as a local trait so callers can hand plain Rust scalars to the
/// query builder and the convenience wrappers.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        normalize(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        normalize(Value::Real(self))
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Blob(self)
    }
}

macro_rules! impl_into_value_int {
    ($($int:ty),*) => {
        $(
            impl IntoValue for $int {
                fn into_value(self) -> Value {
                    Value::Integer(i64::from(self))
                }
            }
        )*
    };
}

impl_into_value_int!(i8, i16, i32, i64, u8, u16, u32);

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(inner) => inner.into_value(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{display_value, escape_column, normalize, IntoValue};
    use rusqlite::types::Value;

    #[test]
    fn escape_plain_token_quotes_whole_token() {
        assert_eq!(escape_column("name"), "\"name\"");
    }

    #[test]
    fn escape_dotted_token_quotes_each_part() {
        assert_eq!(escape_column("a.b"), "\"a\".\"b\"");
        assert_eq!(escape_column("games.tags.id"), "\"games\".\"tags\".\"id\"");
    }

    #[test]
    fn escape_expression_passes_through() {
        assert_eq!(escape_column("COUNT(*)"), "COUNT(*)");
        assert_eq!(escape_column("MAX(added)"), "MAX(added)");
    }

    #[test]
    fn normalize_collapses_nan_to_null() {
        assert_eq!(normalize(Value::Real(f64::NAN)), Value::Null);
        assert_eq!(normalize(Value::Real(1.5)), Value::Real(1.5));
        assert_eq!(normalize(Value::Null), Value::Null);
    }

    #[test]
    fn option_none_collapses_to_null() {
        let none: Option<i64> = None;
        assert_eq!(none.into_value(), Value::Null);
        assert_eq!(Some(7i64).into_value(), Value::Integer(7));
    }

    #[test]
    fn display_value_is_stable() {
        assert_eq!(display_value(&Value::Null), "NULL");
        assert_eq!(display_value(&Value::Integer(3)), "3");
        assert_eq!(display_value(&Value::Text("x".into())), "'x'");
    }
}
