//! SQL expressions.

use crate::stmt::SelectStmt;
use crate::{ColumnName, SqlValue, TableName};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Rendered as the next `$n` placeholder.
    Value(SqlValue),
    Column(ColumnRef),
    /// Rendered inline as a quoted literal.
    String(String),
    Int(i64),
    Bool(bool),
    Null,
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        case_insensitive: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
    },
    InSubquery {
        expr: Box<Expr>,
        query: Box<SelectStmt>,
    },
    Exists(Box<SelectStmt>),
    /// A scalar subquery.
    Subquery(Box<SelectStmt>),
    /// `COUNT(..)`, `SUM(..)` and friends.
    FnCall {
        name: String,
        args: Vec<Expr>,
    },
    /// Copied into the output verbatim.
    Raw(String),
}

/// `"column"` or `"table"."column"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<TableName>,
    pub column: ColumnName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl Expr {
    pub fn value(value: impl Into<SqlValue>) -> Self {
        Expr::Value(value.into())
    }

    pub fn column(column: ColumnName) -> Self {
        Expr::Column(ColumnRef {
            table: None,
            column,
        })
    }

    pub fn qualified_column(table: TableName, column: ColumnName) -> Self {
        Expr::Column(ColumnRef {
            table: Some(table),
            column,
        })
    }

    pub fn binop(self, op: BinOp, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Self {
        self.binop(BinOp::Eq, other)
    }

    pub fn and(self, other: Expr) -> Self {
        self.binop(BinOp::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        self.binop(BinOp::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        self.null_check(false)
    }

    pub fn is_not_null(self) -> Self {
        self.null_check(true)
    }

    fn null_check(self, negated: bool) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated,
        }
    }

    pub fn like(self, pattern: Expr) -> Self {
        self.pattern_match(pattern, false)
    }

    pub fn ilike(self, pattern: Expr) -> Self {
        self.pattern_match(pattern, true)
    }

    fn pattern_match(self, pattern: Expr, case_insensitive: bool) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern),
            case_insensitive,
        }
    }

    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Expr::InList {
            expr: Box::new(self),
            list,
        }
    }

    pub fn in_subquery(self, query: SelectStmt) -> Self {
        Expr::InSubquery {
            expr: Box::new(self),
            query: Box::new(query),
        }
    }

    pub fn exists(query: SelectStmt) -> Self {
        Expr::Exists(Box::new(query))
    }

    /// AND every expression together; `None` when there are none.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// OR every expression together; `None` when there are none.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::or)
    }
}
