//! Render the SQL AST to text with positional parameters.
//!
//! Every [`Expr::Value`] becomes the next `$n` placeholder and its value is
//! collected alongside the text. Subqueries render through the same
//! context, so numbering is global to the statement.

use std::cell::RefCell;
use std::fmt::{self, Display, Formatter};

use crate::expr::{BinOp, ColumnRef, Expr};
use crate::stmt::{Join, OrderBy, SelectColumn, SelectStmt, TableRef};
use crate::{Ident, Lit, RenderedSql, SqlValue};

/// Collects bound values while a statement renders.
///
/// [`Render::render`] takes `&self` so it can run inside `Display`, hence
/// the `RefCell`.
#[derive(Default)]
pub struct RenderContext {
    values: RefCell<Vec<SqlValue>>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`, returning its 1-based placeholder number.
    fn bind(&self, value: &SqlValue) -> usize {
        let mut values = self.values.borrow_mut();
        values.push(value.clone());
        values.len()
    }
}

/// Something that renders to SQL.
pub trait Render {
    fn render(&self, ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result;
}

/// Adapts a [`Render`] value to `Display` so it can sit in `write!` args.
pub struct Fmt<'a, T: Render + ?Sized>(&'a RenderContext, &'a T);

impl<T: Render + ?Sized> Display for Fmt<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.1.render(self.0, f)
    }
}

/// Comma-separated items.
struct List<'a, T: Render>(&'a RenderContext, &'a [T]);

impl<T: Render> Display for List<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let List(ctx, items) = self;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            item.render(ctx, f)?;
        }
        Ok(())
    }
}

/// Render `stmt` (or a bare expression), collecting its bound values.
pub fn render(stmt: &impl Render) -> RenderedSql {
    let ctx = RenderContext::new();
    let sql = Fmt(&ctx, stmt).to_string();
    RenderedSql {
        sql,
        values: ctx.values.into_inner(),
    }
}

impl Render for Expr {
    fn render(&self, ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(value) => write!(f, "${}", ctx.bind(value)),
            Expr::Column(col) => col.render(ctx, f),
            Expr::String(s) => write!(f, "{}", Lit(s)),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Bool(true) => f.write_str("TRUE"),
            Expr::Bool(false) => f.write_str("FALSE"),
            Expr::Null => f.write_str("NULL"),
            Expr::BinOp { left, op, right } => {
                operand(ctx, *op, left, f)?;
                write!(f, " {} ", op.as_str())?;
                operand(ctx, *op, right, f)
            }
            Expr::Not(inner) => write!(f, "NOT ({})", Fmt(ctx, inner.as_ref())),
            Expr::IsNull { expr, negated } => write!(
                f,
                "{} IS {}NULL",
                Fmt(ctx, expr.as_ref()),
                if *negated { "NOT " } else { "" }
            ),
            Expr::Like {
                expr,
                pattern,
                case_insensitive,
            } => write!(
                f,
                "{} {} {}",
                Fmt(ctx, expr.as_ref()),
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                Fmt(ctx, pattern.as_ref())
            ),
            Expr::InList { expr, list } => {
                write!(f, "{} IN ({})", Fmt(ctx, expr.as_ref()), List(ctx, list))
            }
            Expr::InSubquery { expr, query } => write!(
                f,
                "{} IN ({})",
                Fmt(ctx, expr.as_ref()),
                Fmt(ctx, query.as_ref())
            ),
            Expr::Exists(query) => write!(f, "EXISTS ({})", Fmt(ctx, query.as_ref())),
            Expr::Subquery(query) => write!(f, "({})", Fmt(ctx, query.as_ref())),
            Expr::FnCall { name, args } => write!(f, "{name}({})", List(ctx, args)),
            Expr::Raw(sql) => f.write_str(sql),
        }
    }
}

/// One side of a binary operator. A nested AND/OR of the other kind is
/// parenthesized: `a AND (b OR c)`.
fn operand(ctx: &RenderContext, parent: BinOp, expr: &Expr, f: &mut Formatter<'_>) -> fmt::Result {
    match expr {
        Expr::BinOp { op, .. } if parent.is_logical() && op.is_logical() && *op != parent => {
            write!(f, "({})", Fmt(ctx, expr))
        }
        _ => expr.render(ctx, f),
    }
}

impl Render for ColumnRef {
    fn render(&self, _ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{}.", Ident(table.as_str()))?;
        }
        write!(f, "{}", Ident(self.column.as_str()))
    }
}

impl Render for SelectColumn {
    fn render(&self, ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SelectColumn::Expr { expr, alias: None } => expr.render(ctx, f),
            SelectColumn::Expr {
                expr,
                alias: Some(alias),
            } => write!(f, "{} AS {}", Fmt(ctx, expr), Ident(alias.as_str())),
            SelectColumn::AllFrom(table) => write!(f, "{}.*", Ident(table.as_str())),
        }
    }
}

impl Render for TableRef {
    fn render(&self, _ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ident(self.name.as_str()))?;
        match &self.alias {
            Some(alias) => write!(f, " {}", Ident(alias.as_str())),
            None => Ok(()),
        }
    }
}

impl Render for Join {
    fn render(&self, ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ON {}",
            self.kind.as_str(),
            Fmt(ctx, &self.table),
            Fmt(ctx, &self.on)
        )
    }
}

impl Render for OrderBy {
    fn render(&self, ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        let dir = if self.desc { "DESC" } else { "ASC" };
        write!(f, "{} {dir}", Fmt(ctx, &self.expr))
    }
}

/// Clauses go on their own lines, in the order Postgres expects them.
impl Render for SelectStmt {
    fn render(&self, ctx: &RenderContext, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(if self.distinct { "SELECT DISTINCT " } else { "SELECT " })?;
        if self.columns.is_empty() {
            f.write_str("*")?;
        } else {
            write!(f, "{}", List(ctx, &self.columns))?;
        }

        if let Some(from) = &self.from {
            write!(f, "\nFROM {}", Fmt(ctx, from))?;
        }
        for join in &self.joins {
            write!(f, "\n{}", Fmt(ctx, join))?;
        }
        if let Some(cond) = &self.where_ {
            write!(f, "\nWHERE {}", Fmt(ctx, cond))?;
        }
        if !self.group_by.is_empty() {
            write!(f, "\nGROUP BY {}", List(ctx, &self.group_by))?;
        }
        if let Some(cond) = &self.having {
            write!(f, "\nHAVING {}", Fmt(ctx, cond))?;
        }
        if !self.order_by.is_empty() {
            write!(f, "\nORDER BY {}", List(ctx, &self.order_by))?;
        }
        if let Some(n) = self.limit {
            write!(f, "\nLIMIT {n}")?;
        }
        if let Some(n) = self.offset {
            write!(f, "\nOFFSET {n}")?;
        }
        Ok(())
    }
}
