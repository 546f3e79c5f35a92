//! Inline bound values into rendered SQL.
//!
//! A trigger function body is plpgsql text stored in the catalog, so the
//! predicate it evaluates cannot carry bind parameters. [`inline`] replaces
//! each `$n` placeholder with the escaped literal of the n-th value, leaving
//! string literals, quoted identifiers and dollar-quoted bodies untouched.

use crate::{Lit, RenderedSql, SqlValue};

/// Errors raised while inlining values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InlineError {
    /// A placeholder refers to a value that was never bound.
    #[error("placeholder ${index} has no bound value")]
    MissingParam { index: usize },

    /// NaN and infinities have no portable literal form.
    #[error("cannot inline non-finite float {value}")]
    NonFinite { value: f64 },
}

impl SqlValue {
    /// Render this value as a SQL literal.
    pub fn to_literal(&self) -> Result<String, InlineError> {
        Ok(match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(x) if x.is_finite() => format!("{x:?}"),
            SqlValue::Float(x) => return Err(InlineError::NonFinite { value: *x }),
            SqlValue::Text(s) => Lit(s).to_string(),
        })
    }
}

impl RenderedSql {
    /// Returns the SQL with all bound values inlined as literals.
    pub fn inline(&self) -> Result<String, InlineError> {
        inline(self)
    }
}

/// Replace `$n` placeholders in `rendered.sql` with literal values.
pub fn inline(rendered: &RenderedSql) -> Result<String, InlineError> {
    let sql = rendered.sql.as_str();
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i = skip_quoted(bytes, i, quote);
            }
            b'$' => {
                let digits_end = scan_digits(bytes, i + 1);
                if digits_end > i + 1 {
                    let index: usize = sql[i + 1..digits_end]
                        .parse()
                        .map_err(|_| InlineError::MissingParam { index: usize::MAX })?;
                    let value = index
                        .checked_sub(1)
                        .and_then(|idx| rendered.values.get(idx))
                        .ok_or(InlineError::MissingParam { index })?;
                    out.push_str(&sql[copied..i]);
                    out.push_str(&value.to_literal()?);
                    i = digits_end;
                    copied = i;
                } else if let Some(tag_end) = scan_dollar_tag(bytes, i) {
                    let tag = &sql[i..=tag_end];
                    i = match sql[tag_end + 1..].find(tag) {
                        Some(pos) => tag_end + 1 + pos + tag.len(),
                        None => bytes.len(),
                    };
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    Ok(out)
}

/// Skip a quoted run starting at `start`, honoring doubled quotes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn scan_digits(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    i
}

/// If a dollar-quote tag (`$$` or `$name$`) opens at `start`, returns the
/// index of its closing `$`.
fn scan_dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'$' {
            return Some(i);
        }
        let valid = b == b'_' || b.is_ascii_alphabetic() || (i > start + 1 && b.is_ascii_digit());
        if !valid {
            return None;
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(sql: &str, values: Vec<SqlValue>) -> RenderedSql {
        RenderedSql {
            sql: sql.to_string(),
            values,
        }
    }

    #[test]
    fn test_replaces_placeholders() {
        let r = rendered(
            r#"SELECT 1 FROM "t" WHERE "name" = $1 AND "age" > $2 AND "ok" = $3"#,
            vec!["it's".into(), SqlValue::Int(-4), SqlValue::Bool(true)],
        );
        assert_eq!(
            inline(&r).unwrap(),
            r#"SELECT 1 FROM "t" WHERE "name" = 'it''s' AND "age" > -4 AND "ok" = TRUE"#
        );
    }

    #[test]
    fn test_two_digit_placeholders() {
        let values: Vec<SqlValue> = (1..=11).map(SqlValue::Int).collect();
        let r = rendered("$1, $10, $11", values);
        assert_eq!(r.inline().unwrap(), "1, 10, 11");
    }

    #[test]
    fn test_leaves_quoted_text_alone() {
        let r = rendered(
            r#"SELECT '$1', "$1", $$ $1 $$, $fn$ $1 $fn$, $1"#,
            vec![SqlValue::Null],
        );
        assert_eq!(
            inline(&r).unwrap(),
            r#"SELECT '$1', "$1", $$ $1 $$, $fn$ $1 $fn$, NULL"#
        );
    }

    #[test]
    fn test_missing_param() {
        let r = rendered("SELECT $2", vec![SqlValue::Null]);
        assert_eq!(inline(&r), Err(InlineError::MissingParam { index: 2 }));

        let r = rendered("SELECT $0", vec![SqlValue::Null]);
        assert_eq!(inline(&r), Err(InlineError::MissingParam { index: 0 }));
    }

    #[test]
    fn test_floats() {
        let r = rendered("$1", vec![SqlValue::Float(1.5)]);
        assert_eq!(inline(&r).unwrap(), "1.5");

        let r = rendered("$1", vec![SqlValue::Float(f64::NAN)]);
        assert!(matches!(inline(&r), Err(InlineError::NonFinite { .. })));
    }

    #[test]
    fn test_no_placeholders() {
        let r = rendered("NEW.age > 3", vec![]);
        assert_eq!(inline(&r).unwrap(), "NEW.age > 3");
    }
}
