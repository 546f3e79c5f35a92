//! SELECT statements.
//!
//! A compiled constraint is always a single SELECT, possibly nesting more
//! SELECTs as subqueries, so this is the only statement kind modelled here.

use crate::expr::Expr;
use crate::{ColumnName, TableName};

/// A SELECT statement. Build it with the chained methods below, or fill in
/// the fields directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectStmt {
    pub distinct: bool,
    /// Empty renders as `*`.
    pub columns: Vec<SelectColumn>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    /// Slicing bounds are known when the query is compiled, so they are
    /// rendered as literals rather than bound.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Expr {
        expr: Expr,
        alias: Option<ColumnName>,
    },
    /// `"table".*`
    AllFrom(TableName),
}

impl SelectColumn {
    pub fn expr(expr: Expr) -> Self {
        SelectColumn::Expr { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: ColumnName) -> Self {
        SelectColumn::Expr {
            expr,
            alias: Some(alias),
        }
    }

    pub fn all_from(table: TableName) -> Self {
        SelectColumn::AllFrom(table)
    }
}

/// A table in a FROM or JOIN, with an optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: TableName,
    pub alias: Option<TableName>,
}

impl TableRef {
    pub fn table(name: TableName) -> Self {
        Self { name, alias: None }
    }

    pub fn aliased(name: TableName, alias: TableName) -> Self {
        Self {
            name,
            alias: Some(alias),
        }
    }
}

/// Foreign keys are followed with INNER joins, nullable ones with LEFT joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expr,
}

impl Join {
    pub fn inner(table: TableRef, on: Expr) -> Self {
        Self {
            kind: JoinKind::Inner,
            table,
            on,
        }
    }

    pub fn left(table: TableRef, on: Expr) -> Self {
        Self {
            kind: JoinKind::Left,
            table,
            on,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }
}

impl SelectStmt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn column(mut self, col: SelectColumn) -> Self {
        self.columns.push(col);
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = SelectColumn>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Replace the WHERE condition.
    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    /// AND `expr` onto the WHERE condition.
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = conjoin(self.where_.take(), expr);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// AND `expr` onto the HAVING condition.
    pub fn and_having(mut self, expr: Expr) -> Self {
        self.having = conjoin(self.having.take(), expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }
}

fn conjoin(existing: Option<Expr>, expr: Expr) -> Option<Expr> {
    Some(match existing {
        Some(existing) => existing.and(expr),
        None => expr,
    })
}
