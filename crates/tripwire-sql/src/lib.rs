//! SQL AST and rendering.
//!
//! Build SQL as a typed AST, then render to a string with automatic
//! parameter numbering. Rendered statements can have their bound values
//! inlined as escaped literals, which is what trigger bodies need since a
//! plpgsql function cannot carry bind parameters.

use strid::braid;

mod expr;
pub use expr::*;

mod inline;
pub use inline::*;

mod names;
pub use names::*;

mod render;
pub use render::*;

mod stmt;
pub use stmt::*;

/// Result of rendering SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    /// The SQL string with $1, $2, etc. placeholders.
    pub sql: String,

    /// Bound values in order (maps to $1, $2, etc.).
    pub values: Vec<SqlValue>,
}

/// The name of a table (or table alias).
#[braid]
pub struct TableName;

/// The name of a column (or column alias).
#[braid]
pub struct ColumnName;

/// A value bound to a positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Int(n)
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        SqlValue::Float(n)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

/// A string literal. Displays quoted, with embedded quotes doubled.
///
/// ```
/// use tripwire_sql::Lit;
/// assert_eq!(Lit("it's").to_string(), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.0.as_ref().replace('\'', "''"))
    }
}

/// An identifier. Always quoted, so reserved words like `order` and
/// `group` are safe as table and column names.
///
/// ```
/// use tripwire_sql::Ident;
/// assert_eq!(Ident("order").to_string(), "\"order\"");
/// assert_eq!(Ident("we\"ird").to_string(), "\"we\"\"ird\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.0.as_ref().replace('"', "\"\""))
    }
}

pub fn quote_ident(name: &str) -> String {
    Ident(name).to_string()
}
