//! QuerySet to SQL AST compilation.

use indexmap::IndexMap;
use tripwire_sql::{BinOp, Expr, Join, OrderBy, SelectColumn, SelectStmt, TableRef};

use super::{Aggregate, Annotation, Lookup, Object, Q, QuerySet};
use crate::replay::Arg;
use crate::state::{Field, ModelState, ProjectState};
use crate::{Error, Result};

/// What a compiled `SELECT` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectMode {
    /// Whole rows (or `values` columns) plus annotations.
    Rows,
    /// A single column, for `IN (SELECT ..)` and scalar subqueries.
    Pk,
    /// `SELECT 1`, for `EXISTS (..)`.
    One,
}

/// Compiles one query level. Subqueries get a nested compiler with their
/// own alias namespace.
pub(crate) struct Compiler<'a> {
    state: &'a ProjectState,
    model: &'a ModelState,
    depth: usize,
    qualify: bool,
    base_alias: String,
    aliases: Vec<String>,
    joins: Vec<Join>,
    join_paths: IndexMap<String, String>,
    annotations: IndexMap<String, Annotation>,
}

fn subquery_alias(depth: usize, n: usize) -> String {
    const PREFIXES: [char; 6] = ['U', 'V', 'W', 'X', 'Y', 'Z'];
    match PREFIXES.get(depth.saturating_sub(1)) {
        Some(prefix) => format!("{prefix}{n}"),
        None => format!("S{depth}_{n}"),
    }
}

fn get_field<'m>(model: &'m ModelState, name: &str) -> Result<&'m Field> {
    let field = if name == "pk" {
        model.pk()
    } else {
        model.get_field(name)
    };
    field.ok_or_else(|| Error::FieldNotFound {
        model: model.key().to_string(),
        field: name.to_string(),
    })
}

fn parse_lookup(path: &str, rest: &[&str]) -> Result<Lookup> {
    match rest {
        [] => Ok(Lookup::Exact),
        [name] => Lookup::parse(name).ok_or_else(|| Error::UnsupportedLookup {
            field: path.to_string(),
            lookup: name.to_string(),
        }),
        _ => Err(Error::UnsupportedLookup {
            field: path.to_string(),
            lookup: rest.join("__"),
        }),
    }
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(state: &'a ProjectState, model: &'a ModelState) -> Self {
        Self::build(state, model, 0, true, model.db_table())
    }

    /// Compiler for `CHECK` expressions: bare column names, no joins.
    pub(crate) fn unqualified(state: &'a ProjectState, model: &'a ModelState) -> Self {
        Self::build(state, model, 0, false, model.db_table())
    }

    fn build(
        state: &'a ProjectState,
        model: &'a ModelState,
        depth: usize,
        qualify: bool,
        base_alias: String,
    ) -> Self {
        Self {
            state,
            model,
            depth,
            qualify,
            aliases: vec![base_alias.clone()],
            base_alias,
            joins: Vec::new(),
            join_paths: IndexMap::new(),
            annotations: IndexMap::new(),
        }
    }

    pub(crate) fn select(mut self, qs: &QuerySet, mode: SelectMode) -> Result<SelectStmt> {
        self.annotations = qs.annotations.clone();
        let mut stmt = SelectStmt::new();

        let mut where_parts = Vec::new();
        let mut having_parts = Vec::new();
        for q in &qs.filters {
            let aggregated = self.uses_aggregate(q);
            if let Some(expr) = self.q_expr(q)? {
                if aggregated {
                    having_parts.push(expr);
                } else {
                    where_parts.push(expr);
                }
            }
        }

        match mode {
            SelectMode::Rows => {
                if qs.values.is_empty() {
                    stmt = stmt.column(SelectColumn::all_from(self.base_alias.as_str().into()));
                } else {
                    for path in &qs.values {
                        stmt = stmt.column(SelectColumn::expr(self.field_column(path)?));
                    }
                }
                for (alias, annotation) in &qs.annotations {
                    let expr = self.annotation_expr(annotation)?;
                    stmt = stmt.column(SelectColumn::aliased(expr, alias.as_str().into()));
                }
            }
            SelectMode::Pk => {
                let expr = match qs.values.as_slice() {
                    [] => self.pk_column()?,
                    [path] => self.field_column(path)?,
                    _ => {
                        return Err(Error::Replay(
                            "subquery must select exactly one column".into(),
                        ));
                    }
                };
                stmt = stmt.column(SelectColumn::expr(expr));
            }
            SelectMode::One => {
                stmt = stmt.column(SelectColumn::expr(Expr::Int(1)));
            }
        }

        let aggregating = qs
            .annotations
            .values()
            .any(|a| matches!(a, Annotation::Aggregate(_)));
        if aggregating {
            match &qs.group_by {
                Some(fields) => {
                    for path in fields {
                        stmt = stmt.group_by(self.field_column(path)?);
                    }
                }
                None => stmt = stmt.group_by(self.pk_column()?),
            }
        }

        for field in &qs.order_by {
            let (desc, path) = match field.strip_prefix('-') {
                Some(path) => (true, path),
                None => (false, field.as_str()),
            };
            if path == "?" {
                return Err(Error::Replay("random ordering is not supported".into()));
            }
            let expr = match self.annotations.get(path).cloned() {
                Some(annotation) => self.annotation_expr(&annotation)?,
                None => self.field_column(path)?,
            };
            stmt = stmt.order_by(if desc {
                OrderBy::desc(expr)
            } else {
                OrderBy::asc(expr)
            });
        }

        if qs.distinct {
            stmt = stmt.distinct();
        }
        if let Some(limit) = qs.limit {
            stmt = stmt.limit(limit);
        }
        if let Some(offset) = qs.offset {
            stmt = stmt.offset(offset);
        }

        let table = self.model.db_table();
        stmt.from = Some(if self.depth == 0 {
            TableRef::table(table.into())
        } else {
            TableRef::aliased(table.into(), self.base_alias.as_str().into())
        });
        stmt.joins = std::mem::take(&mut self.joins);
        stmt.where_ = Expr::all(where_parts);
        stmt.having = Expr::all(having_parts);
        Ok(stmt)
    }

    /// Compile a `Q` tree. An empty `Q()` yields no condition.
    pub(crate) fn q_expr(&mut self, q: &Q) -> Result<Option<Expr>> {
        Ok(match q {
            Q::Lookup { path, value } => Some(self.lookup_expr(path, value)?),
            Q::And(children) => {
                let parts = self.q_children(children)?;
                Expr::all(parts)
            }
            Q::Or(children) => {
                let parts = self.q_children(children)?;
                Expr::any(parts)
            }
            Q::Not(inner) => self.q_expr(inner)?.map(Expr::not),
        })
    }

    fn q_children(&mut self, children: &[Q]) -> Result<Vec<Expr>> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            if let Some(expr) = self.q_expr(child)? {
                parts.push(expr);
            }
        }
        Ok(parts)
    }

    fn uses_aggregate(&self, q: &Q) -> bool {
        match q {
            Q::Lookup { path, value } => {
                let head = path.split("__").next().unwrap_or_default();
                matches!(self.annotations.get(head), Some(Annotation::Aggregate(_)))
                    || matches!(value, Arg::Object(Object::Aggregate(_)))
            }
            Q::And(children) | Q::Or(children) => children.iter().any(|c| self.uses_aggregate(c)),
            Q::Not(inner) => self.uses_aggregate(inner),
        }
    }

    fn lookup_expr(&mut self, path: &str, value: &Arg<Object>) -> Result<Expr> {
        let segments: Vec<&str> = path.split("__").collect();
        if let Some(annotation) = self.annotations.get(segments[0]).cloned() {
            let lookup = parse_lookup(path, &segments[1..])?;
            let lhs = self.annotation_expr(&annotation)?;
            return self.apply_lookup(path, lhs, lookup, value);
        }
        let (lhs, rest) = self.walk(&segments)?;
        let lookup = parse_lookup(path, rest)?;
        self.apply_lookup(path, lhs, lookup, value)
    }

    fn apply_lookup(
        &mut self,
        path: &str,
        lhs: Expr,
        lookup: Lookup,
        value: &Arg<Object>,
    ) -> Result<Expr> {
        Ok(match lookup {
            Lookup::Exact => match value {
                Arg::Null => lhs.is_null(),
                value => lhs.eq(self.operand(value)?),
            },
            Lookup::Gt => lhs.binop(BinOp::Gt, self.operand(value)?),
            Lookup::Gte => lhs.binop(BinOp::Ge, self.operand(value)?),
            Lookup::Lt => lhs.binop(BinOp::Lt, self.operand(value)?),
            Lookup::Lte => lhs.binop(BinOp::Le, self.operand(value)?),
            Lookup::In => match value {
                // Nothing can be IN an empty list.
                Arg::List(items) if items.is_empty() => Expr::Bool(false),
                Arg::List(items) => {
                    let mut list = Vec::with_capacity(items.len());
                    for item in items {
                        list.push(self.operand(item)?);
                    }
                    lhs.in_list(list)
                }
                Arg::Object(obj @ (Object::QuerySet(_) | Object::Manager(_))) => {
                    let qs = obj.clone().into_queryset()?;
                    lhs.in_subquery(self.subquery(&qs, SelectMode::Pk)?)
                }
                other => return Err(Error::invalid_type("list or queryset", other.kind())),
            },
            Lookup::IsNull => match value {
                Arg::Bool(true) => lhs.is_null(),
                Arg::Bool(false) => lhs.is_not_null(),
                other => return Err(Error::invalid_type("bool", other.kind())),
            },
            Lookup::Contains | Lookup::IContains | Lookup::StartsWith | Lookup::EndsWith => {
                let pattern = match value {
                    Arg::Str(s) => lookup.like_pattern(s),
                    other => return Err(Error::invalid_type("string", other.kind())),
                };
                let pattern = pattern.ok_or_else(|| Error::UnsupportedLookup {
                    field: path.to_string(),
                    lookup: format!("{lookup:?}"),
                })?;
                if lookup == Lookup::IContains {
                    lhs.ilike(Expr::value(pattern))
                } else {
                    lhs.like(Expr::value(pattern))
                }
            }
            Lookup::Range => match value {
                Arg::List(bounds) if bounds.len() == 2 => {
                    let low = self.operand(&bounds[0])?;
                    let high = self.operand(&bounds[1])?;
                    lhs.clone()
                        .binop(BinOp::Ge, low)
                        .and(lhs.binop(BinOp::Le, high))
                }
                other => return Err(Error::invalid_type("two-element list", other.kind())),
            },
        })
    }

    /// Right-hand side of a comparison.
    fn operand(&mut self, value: &Arg<Object>) -> Result<Expr> {
        Ok(match value {
            Arg::Null => Expr::Null,
            Arg::Bool(b) => Expr::value(*b),
            Arg::Int(n) => Expr::value(*n),
            Arg::Str(s) => Expr::value(s.as_str()),
            Arg::List(_) => return Err(Error::invalid_type("scalar", "list")),
            Arg::Object(obj) => self.object_expr(obj)?,
        })
    }

    fn object_expr(&mut self, obj: &Object) -> Result<Expr> {
        Ok(match obj {
            Object::F(path) => match self.annotations.get(path.as_str()).cloned() {
                Some(annotation) => self.annotation_expr(&annotation)?,
                None => self.field_column(path)?,
            },
            Object::Raw(sql) => Expr::Raw(sql.clone()),
            Object::Aggregate(agg) => self.aggregate_expr(agg)?,
            Object::Exists(qs) => Expr::exists(self.subquery(qs, SelectMode::One)?),
            Object::QuerySet(_) | Object::Manager(_) => {
                let qs = obj.clone().into_queryset()?;
                Expr::Subquery(Box::new(self.subquery(&qs, SelectMode::Pk)?))
            }
            other => return Err(Error::invalid_type("expression", other.kind())),
        })
    }

    fn annotation_expr(&mut self, annotation: &Annotation) -> Result<Expr> {
        Ok(match annotation {
            Annotation::Aggregate(agg) => self.aggregate_expr(agg)?,
            Annotation::Exists(qs) => Expr::exists(self.subquery(qs, SelectMode::One)?),
            Annotation::F(path) => self.field_column(path)?,
            Annotation::Raw(sql) => Expr::Raw(sql.clone()),
        })
    }

    fn aggregate_expr(&mut self, agg: &Aggregate) -> Result<Expr> {
        Ok(Expr::FnCall {
            name: agg.func.sql_name().to_string(),
            args: vec![self.field_column(&agg.field)?],
        })
    }

    fn subquery(&self, qs: &QuerySet, mode: SelectMode) -> Result<SelectStmt> {
        let model = self
            .state
            .get(&qs.model)
            .ok_or_else(|| Error::model_not_found(&qs.model.app_label, &qs.model.model_name))?;
        let depth = self.depth + 1;
        let nested = Self::build(self.state, model, depth, true, subquery_alias(depth, 0));
        nested.select(qs, mode)
    }

    fn col(&self, alias: &str, column: String) -> Expr {
        if self.qualify {
            Expr::qualified_column(alias.into(), column.into())
        } else {
            Expr::column(column.into())
        }
    }

    fn pk_column(&self) -> Result<Expr> {
        let pk = self.model.pk().ok_or_else(|| {
            Error::Replay(format!("model {} has no primary key", self.model.key()))
        })?;
        Ok(self.col(&self.base_alias, pk.column()))
    }

    /// Column of a field path with no lookup suffix.
    fn field_column(&mut self, path: &str) -> Result<Expr> {
        let segments: Vec<&str> = path.split("__").collect();
        let (expr, rest) = self.walk(&segments)?;
        if !rest.is_empty() {
            return Err(Error::FieldNotFound {
                model: self.model.key().to_string(),
                field: path.to_string(),
            });
        }
        Ok(expr)
    }

    /// Follow a field path through foreign keys, joining as needed. Returns
    /// the terminal column and the unconsumed segments.
    fn walk<'s, 't>(&mut self, segments: &'s [&'t str]) -> Result<(Expr, &'s [&'t str])> {
        let mut model = self.model;
        let mut alias = self.base_alias.clone();
        let mut path = String::new();
        let mut i = 0;

        loop {
            let name = segments.get(i).copied().unwrap_or_default();
            let field = get_field(model, name)?;
            i += 1;
            let rest = &segments[i..];

            if let (Some(target_key), Some(next)) = (&field.relation, rest.first()) {
                let target = self.state.get(target_key).ok_or_else(|| {
                    Error::model_not_found(&target_key.app_label, &target_key.model_name)
                })?;
                let is_target_pk = *next == "pk" || target.pk().is_some_and(|pk| pk.name == *next);
                let ends_here = rest.len() == 1 || Lookup::parse(rest[1]).is_some();

                // `author__id` reads the local foreign key column.
                if is_target_pk && ends_here {
                    return Ok((self.col(&alias, field.column()), &rest[1..]));
                }
                if *next == "pk" || target.get_field(next).is_some() {
                    if !path.is_empty() {
                        path.push_str("__");
                    }
                    path.push_str(name);
                    alias = self.join(&path, &alias, field, target)?;
                    model = target;
                    continue;
                }
            }

            return Ok((self.col(&alias, field.column()), rest));
        }
    }

    fn join(
        &mut self,
        path: &str,
        from_alias: &str,
        field: &Field,
        target: &ModelState,
    ) -> Result<String> {
        if let Some(alias) = self.join_paths.get(path) {
            return Ok(alias.clone());
        }
        if !self.qualify {
            return Err(Error::Replay(format!(
                "joined field references are not allowed here: {path}"
            )));
        }
        let pk = target.pk().ok_or_else(|| {
            Error::Replay(format!("model {} has no primary key", target.key()))
        })?;

        let table = target.db_table();
        let alias = if self.depth > 0 {
            subquery_alias(self.depth, self.aliases.len())
        } else if self.aliases.contains(&table) {
            format!("T{}", self.aliases.len() + 1)
        } else {
            table.clone()
        };

        let on = self
            .col(from_alias, field.column())
            .eq(self.col(&alias, pk.column()));
        let target = if alias == table {
            TableRef::table(table.into())
        } else {
            TableRef::aliased(table.into(), alias.as_str().into())
        };
        self.joins.push(if field.nullable {
            Join::left(target, on)
        } else {
            Join::inner(target, on)
        });
        self.aliases.push(alias.clone());
        self.join_paths.insert(path.to_string(), alias.clone());
        Ok(alias)
    }
}
