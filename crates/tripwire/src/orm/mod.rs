//! Built-in query-builder host.
//!
//! [`Orm`] replays expression chains over a [`ProjectState`]: `objects`
//! yields a manager, manager and queryset methods build a [`QuerySet`], and
//! compilation turns it into a `SELECT` with positional parameters.
//!
//! ```
//! use tripwire::orm::Orm;
//! use tripwire::{Field, M, ModelRef, ModelState, PgType, ProjectState};
//!
//! let state = ProjectState::default()
//!     .with_model(
//!         ModelState::new("test_app", "Author")
//!             .with_field(Field::auto("id"))
//!             .with_field(Field::new("name", PgType::Text)),
//!     )
//!     .unwrap();
//!
//! let chain = M::model("Author").objects().filter([("pk", 1)]).finish();
//! let sql = chain
//!     .compile(&Orm::new(&state), ModelRef::new("test_app", "Author"))
//!     .unwrap();
//! assert_eq!(
//!     sql.sql,
//!     "SELECT \"test_app_author\".*\nFROM \"test_app_author\"\nWHERE \"test_app_author\".\"id\" = $1"
//! );
//! ```

use indexmap::IndexMap;
use tripwire_sql::{RenderedSql, render};

use crate::chain::{Value, constructors};
use crate::replay::{self, Arg, Key, ModelRef, QueryHost};
use crate::state::{ModelKey, ModelState, ProjectState};
use crate::{Error, Result};

mod compile;
mod lookup;
mod queryset;

pub use lookup::Lookup;
pub use queryset::{Annotation, QuerySet};

use compile::{Compiler, SelectMode};

/// Objects produced while replaying a chain.
#[derive(Debug, Clone)]
pub enum Object {
    Model(ModelKey),
    Manager(ModelKey),
    QuerySet(QuerySet),
    /// A method looked up but not called yet.
    Method {
        receiver: Box<Object>,
        name: String,
    },
    Q(Q),
    F(String),
    Aggregate(Aggregate),
    Raw(String),
    Exists(Box<QuerySet>),
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Model(_) => "model",
            Object::Manager(_) => "manager",
            Object::QuerySet(_) => "queryset",
            Object::Method { .. } => "method",
            Object::Q(_) => "Q",
            Object::F(_) => "F",
            Object::Aggregate(_) => "aggregate",
            Object::Raw(_) => "RawSQL",
            Object::Exists(_) => "Exists",
        }
    }

    /// The queryset a manager or queryset stands for.
    pub fn into_queryset(self) -> Result<QuerySet> {
        match self {
            Object::Manager(model) => Ok(QuerySet::new(model)),
            Object::QuerySet(qs) => Ok(qs),
            other => Err(Error::invalid_type("queryset", other.kind())),
        }
    }
}

/// A boolean combination of lookups.
#[derive(Debug, Clone)]
pub enum Q {
    Lookup { path: String, value: Arg<Object> },
    And(Vec<Q>),
    Or(Vec<Q>),
    Not(Box<Q>),
}

impl Q {
    /// `Q(*args, **kwargs)`: positional `Q`s and keyword lookups, ANDed.
    /// Keyword lookups are sorted by name so argument order never matters.
    pub(crate) fn from_call(
        args: Vec<Arg<Object>>,
        kwargs: IndexMap<String, Arg<Object>>,
    ) -> Result<Q> {
        let mut children = Vec::with_capacity(args.len() + kwargs.len());
        for arg in args {
            match arg {
                Arg::Object(Object::Q(q)) => children.push(q),
                other => return Err(Error::invalid_type("Q", other.kind())),
            }
        }
        let mut lookups: Vec<_> = kwargs.into_iter().collect();
        lookups.sort_by(|a, b| a.0.cmp(&b.0));
        children.extend(
            lookups
                .into_iter()
                .map(|(path, value)| Q::Lookup { path, value }),
        );
        Ok(match children.len() {
            1 => children.remove(0),
            _ => Q::And(children),
        })
    }

    pub fn negate(self) -> Q {
        Q::Not(Box::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFn {
    pub fn sql_name(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// An aggregate over a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub func: AggregateFn,
    pub field: String,
}

impl Aggregate {
    pub fn new(func: AggregateFn, field: impl Into<String>) -> Self {
        Self {
            func,
            field: field.into(),
        }
    }

    /// Alias used for a positional annotation: `topping__count`.
    pub fn default_alias(&self) -> String {
        format!(
            "{}__{}",
            self.field,
            self.func.sql_name().to_ascii_lowercase()
        )
    }
}

/// Query-builder host over a schema snapshot.
pub struct Orm<'a> {
    state: &'a ProjectState,
}

impl<'a> Orm<'a> {
    pub fn new(state: &'a ProjectState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &'a ProjectState {
        self.state
    }

    /// Compile a `Q` combinator into an unqualified boolean expression over
    /// one model's columns, with values inlined, for a `CHECK` constraint.
    pub fn compile_check(&self, model: &ModelState, check: &Value) -> Result<String> {
        let default = ModelRef::new(&model.app_label, &model.name);
        let q = match replay::resolve_value(self, check, default)? {
            Arg::Object(Object::Q(q)) => q,
            other => return Err(Error::invalid_type("Q", other.kind())),
        };
        let mut compiler = Compiler::unqualified(self.state, model);
        let expr = compiler
            .q_expr(&q)?
            .ok_or_else(|| Error::Replay("check constraint has no condition".into()))?;
        Ok(render(&expr).inline()?)
    }
}

fn args_of<const N: usize>(
    constructor: &str,
    args: Vec<Arg<Object>>,
    kwargs: &IndexMap<String, Arg<Object>>,
) -> Result<[Arg<Object>; N]> {
    if !kwargs.is_empty() {
        return Err(Error::Replay(format!(
            "{constructor}() takes no keyword arguments"
        )));
    }
    let found = args.len();
    args.try_into().map_err(|_| {
        Error::Replay(format!(
            "{constructor}() takes {N} argument(s), {found} given"
        ))
    })
}

fn string_arg(constructor: &str, arg: Arg<Object>) -> Result<String> {
    match arg {
        Arg::Str(s) => Ok(s),
        other => Err(Error::Replay(format!(
            "{constructor}() expects a string, got {}",
            other.kind()
        ))),
    }
}

fn aggregate(
    constructor: &str,
    func: AggregateFn,
    args: Vec<Arg<Object>>,
    kwargs: &IndexMap<String, Arg<Object>>,
) -> Result<Object> {
    let [field] = args_of(constructor, args, kwargs)?;
    Ok(Object::Aggregate(Aggregate::new(
        func,
        string_arg(constructor, field)?,
    )))
}

fn q_arg(arg: Arg<Object>) -> Result<Q> {
    match arg {
        Arg::Object(Object::Q(q)) => Ok(q),
        other => Err(Error::invalid_type("Q", other.kind())),
    }
}

impl QueryHost for Orm<'_> {
    type Object = Object;

    fn root(&self, model: ModelRef<'_>) -> Result<Object> {
        let model = self.state.model(model.app_label, model.model_name)?;
        Ok(Object::Model(model.key()))
    }

    fn get_attr(&self, target: Object, name: &str) -> Result<Object> {
        match target {
            Object::Model(key) if name == "objects" || name == "_default_manager" => {
                Ok(Object::Manager(key))
            }
            receiver @ (Object::Manager(_) | Object::QuerySet(_))
                if queryset::METHODS.contains(&name) =>
            {
                Ok(Object::Method {
                    receiver: Box::new(receiver),
                    name: name.to_string(),
                })
            }
            other => Err(Error::Replay(format!(
                "{} has no attribute {name:?}",
                other.kind()
            ))),
        }
    }

    fn call(
        &self,
        target: Object,
        args: Vec<Arg<Object>>,
        kwargs: IndexMap<String, Arg<Object>>,
    ) -> Result<Object> {
        match target {
            Object::Method { receiver, name } => {
                let qs = receiver.into_queryset()?.apply(&name, args, kwargs)?;
                Ok(Object::QuerySet(qs))
            }
            other => Err(Error::Replay(format!("{} is not callable", other.kind()))),
        }
    }

    fn index(&self, target: Object, key: Key<Object>) -> Result<Object> {
        match target {
            Object::Manager(_) | Object::QuerySet(_) => {
                Ok(Object::QuerySet(target.into_queryset()?.index(key)?))
            }
            other => Err(Error::Replay(format!(
                "{} is not subscriptable",
                other.kind()
            ))),
        }
    }

    fn construct(
        &self,
        constructor: &str,
        args: Vec<Arg<Object>>,
        kwargs: IndexMap<String, Arg<Object>>,
    ) -> Result<Object> {
        match constructor {
            constructors::Q => Ok(Object::Q(Q::from_call(args, kwargs)?)),
            constructors::Q_AND | constructors::Q_OR => {
                let [left, right] = args_of(constructor, args, &kwargs)?;
                let children = vec![q_arg(left)?, q_arg(right)?];
                Ok(Object::Q(if constructor == constructors::Q_AND {
                    Q::And(children)
                } else {
                    Q::Or(children)
                }))
            }
            constructors::Q_NOT => {
                let [inner] = args_of(constructor, args, &kwargs)?;
                Ok(Object::Q(q_arg(inner)?.negate()))
            }
            constructors::F => {
                let [field] = args_of(constructor, args, &kwargs)?;
                Ok(Object::F(string_arg(constructor, field)?))
            }
            constructors::COUNT => aggregate(constructor, AggregateFn::Count, args, &kwargs),
            constructors::SUM => aggregate(constructor, AggregateFn::Sum, args, &kwargs),
            constructors::MIN => aggregate(constructor, AggregateFn::Min, args, &kwargs),
            constructors::MAX => aggregate(constructor, AggregateFn::Max, args, &kwargs),
            constructors::RAW_SQL => {
                let [sql] = args_of(constructor, args, &kwargs)?;
                Ok(Object::Raw(string_arg(constructor, sql)?))
            }
            constructors::EXISTS => {
                let [query] = args_of(constructor, args, &kwargs)?;
                match query {
                    Arg::Object(obj) => Ok(Object::Exists(Box::new(obj.into_queryset()?))),
                    other => Err(Error::invalid_type("queryset", other.kind())),
                }
            }
            other => Err(Error::Replay(format!("unknown constructor {other:?}"))),
        }
    }

    fn compile(&self, object: &Object) -> Result<RenderedSql> {
        let qs = object.clone().into_queryset()?;
        let model = self
            .state
            .get(&qs.model)
            .ok_or_else(|| Error::model_not_found(&qs.model.app_label, &qs.model.model_name))?;
        let stmt = Compiler::new(self.state, model).select(&qs, SelectMode::Rows)?;
        Ok(render(&stmt))
    }
}

#[cfg(test)]
mod tests;
