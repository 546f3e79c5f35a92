//! Lazily built queries.

use indexmap::IndexMap;

use super::{Aggregate, Object, Q};
use crate::chain::SliceSpec;
use crate::replay::{Arg, Key};
use crate::state::ModelKey;
use crate::{Error, Result};

/// Methods shared by managers and querysets.
pub(crate) const METHODS: &[&str] = &[
    "all", "filter", "exclude", "values", "annotate", "order_by", "distinct",
];

/// An annotation added with `annotate`.
#[derive(Debug, Clone)]
pub enum Annotation {
    Aggregate(Aggregate),
    Exists(Box<QuerySet>),
    F(String),
    Raw(String),
}

/// A query against one model. Nothing is compiled until the host is asked
/// to.
#[derive(Debug, Clone)]
pub struct QuerySet {
    pub(crate) model: ModelKey,
    pub(crate) filters: Vec<Q>,
    pub(crate) values: Vec<String>,
    pub(crate) annotations: IndexMap<String, Annotation>,
    /// Fields grouped by when aggregating, fixed by `values` before
    /// `annotate`.
    pub(crate) group_by: Option<Vec<String>>,
    pub(crate) order_by: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
}

impl QuerySet {
    pub fn new(model: ModelKey) -> Self {
        Self {
            model,
            filters: Vec::new(),
            values: Vec::new(),
            annotations: IndexMap::new(),
            group_by: None,
            order_by: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
        }
    }

    pub fn model(&self) -> &ModelKey {
        &self.model
    }

    fn is_sliced(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    pub(crate) fn apply(
        mut self,
        method: &str,
        args: Vec<Arg<Object>>,
        kwargs: IndexMap<String, Arg<Object>>,
    ) -> Result<QuerySet> {
        match method {
            "all" => {
                no_arguments(method, &args, &kwargs)?;
            }
            "filter" | "exclude" => {
                if self.is_sliced() {
                    return Err(Error::Replay(
                        "cannot filter a query once a slice has been taken".into(),
                    ));
                }
                let q = Q::from_call(args, kwargs)?;
                self.filters.push(if method == "exclude" { q.negate() } else { q });
            }
            "values" => {
                if !kwargs.is_empty() {
                    return Err(Error::Replay("values() takes field names only".into()));
                }
                self.values = field_names(method, args)?;
            }
            "annotate" => {
                for arg in args {
                    match arg {
                        Arg::Object(Object::Aggregate(agg)) => {
                            let alias = agg.default_alias();
                            self.annotate(alias, Annotation::Aggregate(agg))?;
                        }
                        other => {
                            return Err(Error::Replay(format!(
                                "positional annotation must be an aggregate, got {}",
                                other.kind()
                            )));
                        }
                    }
                }
                for (alias, arg) in kwargs {
                    let annotation = match arg {
                        Arg::Object(Object::Aggregate(agg)) => Annotation::Aggregate(agg),
                        Arg::Object(Object::Exists(qs)) => Annotation::Exists(qs),
                        Arg::Object(Object::F(path)) => Annotation::F(path),
                        Arg::Object(Object::Raw(sql)) => Annotation::Raw(sql),
                        other => {
                            return Err(Error::invalid_type("expression", other.kind()));
                        }
                    };
                    self.annotate(alias, annotation)?;
                }
            }
            "order_by" => {
                if !kwargs.is_empty() {
                    return Err(Error::Replay("order_by() takes field names only".into()));
                }
                self.order_by = field_names(method, args)?;
            }
            "distinct" => {
                no_arguments(method, &args, &kwargs)?;
                self.distinct = true;
            }
            other => {
                return Err(Error::Replay(format!("queryset has no method {other:?}")));
            }
        }
        Ok(self)
    }

    fn annotate(&mut self, alias: String, annotation: Annotation) -> Result<()> {
        if self.annotations.contains_key(&alias) {
            return Err(Error::Replay(format!(
                "the annotation {alias:?} conflicts with an existing annotation"
            )));
        }
        if self.group_by.is_none() && !self.values.is_empty() {
            self.group_by = Some(self.values.clone());
        }
        self.annotations.insert(alias, annotation);
        Ok(())
    }

    pub(crate) fn index(mut self, key: Key<Object>) -> Result<QuerySet> {
        match key {
            Key::Value(Arg::Int(n)) => {
                if n < 0 {
                    return Err(Error::Replay("negative indexing is not supported".into()));
                }
                self.set_limits(Some(n), Some(shift(n, 1)?))?;
            }
            Key::Value(other) => {
                return Err(Error::invalid_type("integer or slice", other.kind()));
            }
            Key::Slice(SliceSpec { step: Some(_), .. }) => {
                return Err(Error::Replay("slice steps are not supported".into()));
            }
            Key::Slice(SliceSpec { start, stop, .. }) => {
                if start.is_some_and(|n| n < 0) || stop.is_some_and(|n| n < 0) {
                    return Err(Error::Replay("negative indexing is not supported".into()));
                }
                self.set_limits(start, stop)?;
            }
        }
        Ok(self)
    }

    /// Narrow the current window. Bounds are relative to the current offset.
    fn set_limits(&mut self, start: Option<i64>, stop: Option<i64>) -> Result<()> {
        let low = self.offset.unwrap_or(0);
        let high = self.limit.map(|limit| shift(low, limit)).transpose()?;
        let clamp = |n: i64| -> Result<i64> {
            let bound = shift(low, n)?;
            Ok(high.map_or(bound, |h| h.min(bound)))
        };

        let new_high = stop.map(clamp).transpose()?.or(high);
        let new_low = start.map(clamp).transpose()?.unwrap_or(low);

        self.offset = (new_low > 0).then_some(new_low);
        self.limit = new_high.map(|h| (h - new_low).max(0));
        Ok(())
    }
}

fn shift(base: i64, by: i64) -> Result<i64> {
    base.checked_add(by)
        .ok_or_else(|| Error::Replay("index out of range".into()))
}

fn no_arguments(
    method: &str,
    args: &[Arg<Object>],
    kwargs: &IndexMap<String, Arg<Object>>,
) -> Result<()> {
    if args.is_empty() && kwargs.is_empty() {
        Ok(())
    } else {
        Err(Error::Replay(format!("{method}() takes no arguments")))
    }
}

fn field_names(method: &str, args: Vec<Arg<Object>>) -> Result<Vec<String>> {
    args.into_iter()
        .map(|arg| match arg {
            Arg::Str(s) => Ok(s),
            other => Err(Error::Replay(format!(
                "{method}() expects field names, got {}",
                other.kind()
            ))),
        })
        .collect()
}
