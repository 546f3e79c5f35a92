//! Deferred expression chains.
//!
//! A constraint is declared before the model it queries can be built, so the
//! query is recorded instead of executed: [`M`] appends one [`Operation`] per
//! attribute access, call or subscript, and [`M::finish`] seals the recording
//! into an [`ExpressionChain`] that can be stored in a migration and replayed
//! later against a live [`QueryHost`](crate::QueryHost).
//!
//! ```
//! use tripwire::{M, q};
//!
//! let chain = M::model("Pizza")
//!     .objects()
//!     .filter([("name", "Hawaii")])
//!     .filter_q(q([("size__gt", 30)]) | q([("size__lt", 10)]))
//!     .finish();
//!
//! assert_eq!(chain.operations().len(), 5);
//! assert_eq!(
//!     chain.to_string(),
//!     r#"M("Pizza").objects.filter(name="Hawaii").filter(Q.or(Q(size__gt=30), Q(size__lt=10)))"#
//! );
//! ```

use std::fmt;

use indexmap::IndexMap;

use crate::{Error, Result};

/// Keyword arguments of a recorded call.
pub type Kwargs = IndexMap<String, Value>;

/// Identifiers of the deferred constructors understood by the built-in host.
pub mod constructors {
    pub const Q: &str = "Q";
    pub const Q_AND: &str = "Q.and";
    pub const Q_OR: &str = "Q.or";
    pub const Q_NOT: &str = "Q.not";
    pub const F: &str = "F";
    pub const COUNT: &str = "Count";
    pub const SUM: &str = "Sum";
    pub const MIN: &str = "Min";
    pub const MAX: &str = "Max";
    pub const RAW_SQL: &str = "RawSQL";
    pub const EXISTS: &str = "Exists";
}

/// An argument recorded in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    /// A nested chain, replayed before being passed on (subqueries).
    Chain(Box<ExpressionChain>),
    /// A value that can only be built once a host is available.
    Deferred(Box<Deferred>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Chain(_) => "expression chain",
            Value::Deferred(_) => "deferred constructor",
        }
    }

    pub fn as_chain(&self) -> Option<&ExpressionChain> {
        match self {
            Value::Chain(chain) => Some(chain),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<ExpressionChain> for Value {
    fn from(chain: ExpressionChain) -> Self {
        Value::Chain(Box::new(chain))
    }
}

impl From<M> for Value {
    fn from(m: M) -> Self {
        Value::Chain(Box::new(m.finish()))
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Value::Deferred(Box::new(d))
    }
}

/// A (constructor, args, kwargs) triple standing in for a value the host
/// builds at replay time. Two deferred values are equal when their
/// constructor and arguments are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    pub constructor: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Deferred {
    pub fn new(constructor: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            constructor: constructor.into(),
            args,
            kwargs,
        }
    }
}

/// One recorded step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetAttribute { name: String },
    Call { args: Vec<Value>, kwargs: Kwargs },
    Index { key: IndexKey },
}

impl Operation {
    /// Tag used in the deconstructed form.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::GetAttribute { .. } => "getattr",
            Operation::Call { .. } => "call",
            Operation::Index { .. } => "index",
        }
    }
}

/// Subscript key: a plain value or a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Value(Value),
    Slice(SliceSpec),
}

/// Slice bounds, kept as data so they can be replayed later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// A recorded sequence of operations against a model's query builder.
///
/// A chain without a model name is relative: it resolves against the model
/// its constraint is attached to.
#[derive(Debug, Clone)]
pub struct ExpressionChain {
    model_name: Option<String>,
    app_label: Option<String>,
    operations: Vec<Operation>,
    finalized: bool,
}

impl ExpressionChain {
    /// Start an empty chain that still accepts operations.
    pub fn new(model_name: Option<String>, app_label: Option<String>) -> Self {
        Self {
            model_name,
            app_label,
            operations: Vec::new(),
            finalized: false,
        }
    }

    /// Build a sealed chain from previously recorded operations.
    pub fn from_operations(
        model_name: Option<String>,
        app_label: Option<String>,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            model_name,
            app_label,
            operations,
            finalized: true,
        }
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn app_label(&self) -> Option<&str> {
        self.app_label.as_deref()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Seal the chain. Later access replays instead of recording.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Append an operation to a chain that is still recording.
    pub fn try_record(&mut self, op: Operation) -> Result<()> {
        if self.finalized {
            return Err(Error::ChainFinalized);
        }
        self.operations.push(op);
        Ok(())
    }
}

// Equality ignores the recording state.
impl PartialEq for ExpressionChain {
    fn eq(&self, other: &Self) -> bool {
        self.model_name == other.model_name
            && self.app_label == other.app_label
            && self.operations == other.operations
    }
}

impl Eq for ExpressionChain {}

/// Fluent recorder for expression chains.
#[derive(Debug, Clone)]
pub struct M {
    chain: ExpressionChain,
}

impl Default for M {
    fn default() -> Self {
        Self::new()
    }
}

impl M {
    /// A chain relative to the model its constraint is attached to.
    pub fn new() -> Self {
        Self {
            chain: ExpressionChain::new(None, None),
        }
    }

    /// A chain rooted at a named model.
    pub fn model(name: impl Into<String>) -> Self {
        Self {
            chain: ExpressionChain::new(Some(name.into()), None),
        }
    }

    /// Pin the app label of the root model.
    pub fn app_label(mut self, app_label: impl Into<String>) -> Self {
        self.chain.app_label = Some(app_label.into());
        self
    }

    fn push(mut self, op: Operation) -> Self {
        self.chain.operations.push(op);
        self
    }

    pub fn attr(self, name: impl Into<String>) -> Self {
        self.push(Operation::GetAttribute { name: name.into() })
    }

    pub fn call(self, args: Vec<Value>, kwargs: Kwargs) -> Self {
        self.push(Operation::Call { args, kwargs })
    }

    pub fn index(self, key: impl Into<Value>) -> Self {
        self.push(Operation::Index {
            key: IndexKey::Value(key.into()),
        })
    }

    pub fn slice(self, spec: SliceSpec) -> Self {
        self.push(Operation::Index {
            key: IndexKey::Slice(spec),
        })
    }

    /// Attribute access followed by a call.
    pub fn method(self, name: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        self.attr(name).call(args, kwargs)
    }

    pub fn objects(self) -> Self {
        self.attr("objects")
    }

    pub fn all(self) -> Self {
        self.method("all", Vec::new(), Kwargs::new())
    }

    pub fn filter<K: Into<String>, V: Into<Value>>(
        self,
        lookups: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.method("filter", Vec::new(), kwargs(lookups))
    }

    /// `filter` with a positional `Q` expression.
    pub fn filter_q(self, q: Value) -> Self {
        self.method("filter", vec![q], Kwargs::new())
    }

    pub fn exclude<K: Into<String>, V: Into<Value>>(
        self,
        lookups: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.method("exclude", Vec::new(), kwargs(lookups))
    }

    pub fn values<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        let args = fields.into_iter().map(|f| Value::Str(f.into())).collect();
        self.method("values", args, Kwargs::new())
    }

    pub fn annotate<K: Into<String>, V: Into<Value>>(
        self,
        annotations: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.method("annotate", Vec::new(), kwargs(annotations))
    }

    pub fn order_by<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        let args = fields.into_iter().map(|f| Value::Str(f.into())).collect();
        self.method("order_by", args, Kwargs::new())
    }

    pub fn distinct(self) -> Self {
        self.method("distinct", Vec::new(), Kwargs::new())
    }

    /// Seal the recording.
    pub fn finish(mut self) -> ExpressionChain {
        self.chain.finalize();
        self.chain
    }
}

/// Collect keyword arguments.
pub fn kwargs<K: Into<String>, V: Into<Value>>(items: impl IntoIterator<Item = (K, V)>) -> Kwargs {
    items
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn deferred(constructor: &str, args: Vec<Value>, kwargs: Kwargs) -> Value {
    Value::Deferred(Box::new(Deferred::new(constructor, args, kwargs)))
}

/// `Q(**lookups)`. Combine with `&`, `|` and `!`.
pub fn q<K: Into<String>, V: Into<Value>>(lookups: impl IntoIterator<Item = (K, V)>) -> Value {
    deferred(constructors::Q, Vec::new(), kwargs(lookups))
}

/// `F(field)`: a reference to another column of the same row.
pub fn f(field: &str) -> Value {
    deferred(constructors::F, vec![field.into()], Kwargs::new())
}

pub fn count(field: &str) -> Value {
    deferred(constructors::COUNT, vec![field.into()], Kwargs::new())
}

pub fn sum(field: &str) -> Value {
    deferred(constructors::SUM, vec![field.into()], Kwargs::new())
}

pub fn min(field: &str) -> Value {
    deferred(constructors::MIN, vec![field.into()], Kwargs::new())
}

pub fn max(field: &str) -> Value {
    deferred(constructors::MAX, vec![field.into()], Kwargs::new())
}

/// Raw SQL, e.g. `NEW.age` inside a trigger.
pub fn raw_sql(sql: &str) -> Value {
    deferred(constructors::RAW_SQL, vec![sql.into()], Kwargs::new())
}

/// `EXISTS (subquery)`.
pub fn exists(query: impl Into<Value>) -> Value {
    deferred(constructors::EXISTS, vec![query.into()], Kwargs::new())
}

impl std::ops::BitAnd for Value {
    type Output = Value;

    fn bitand(self, rhs: Value) -> Value {
        deferred(constructors::Q_AND, vec![self, rhs], Kwargs::new())
    }
}

impl std::ops::BitOr for Value {
    type Output = Value;

    fn bitor(self, rhs: Value) -> Value {
        deferred(constructors::Q_OR, vec![self, rhs], Kwargs::new())
    }
}

impl std::ops::Not for Value {
    type Output = Value;

    fn not(self) -> Value {
        deferred(constructors::Q_NOT, vec![self], Kwargs::new())
    }
}

// ============================================================================
// Display
// ============================================================================

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Value], kwargs: &Kwargs) -> fmt::Result {
    let mut first = true;
    for arg in args {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{arg}")?;
    }
    for (key, value) in kwargs {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{key}={value}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                write_args(f, items, &Kwargs::new())?;
                write!(f, "]")
            }
            Value::Chain(chain) => write!(f, "{chain}"),
            Value::Deferred(d) => {
                write!(f, "{}(", d.constructor)?;
                write_args(f, &d.args, &d.kwargs)?;
                write!(f, ")")
            }
        }
    }
}

fn write_bound(f: &mut fmt::Formatter<'_>, bound: Option<i64>) -> fmt::Result {
    match bound {
        Some(n) => write!(f, "{n}"),
        None => Ok(()),
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::GetAttribute { name } => write!(f, ".{name}"),
            Operation::Call { args, kwargs } => {
                write!(f, "(")?;
                write_args(f, args, kwargs)?;
                write!(f, ")")
            }
            Operation::Index {
                key: IndexKey::Value(v),
            } => write!(f, "[{v}]"),
            Operation::Index {
                key: IndexKey::Slice(s),
            } => {
                write!(f, "[")?;
                write_bound(f, s.start)?;
                write!(f, ":")?;
                write_bound(f, s.stop)?;
                if let Some(step) = s.step {
                    write!(f, ":{step}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for ExpressionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M(")?;
        if let Some(model) = &self.model_name {
            write!(f, "{model:?}")?;
        }
        if let Some(app) = &self.app_label {
            if self.model_name.is_some() {
                write!(f, ", ")?;
            }
            write!(f, "app_label={app:?}")?;
        }
        write!(f, ")")?;
        for op in &self.operations {
            write!(f, "{op}")?;
        }
        Ok(())
    }
}
