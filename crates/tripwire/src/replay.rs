//! Replaying recorded chains against a query-builder host.

use indexmap::IndexMap;
use tracing::debug;
use tripwire_sql::RenderedSql;

use crate::chain::{ExpressionChain, IndexKey, Operation, SliceSpec, Value};
use crate::Result;

/// An argument handed to a host, with nested chains and deferred
/// constructors already turned into host objects.
#[derive(Debug, Clone)]
pub enum Arg<O> {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Arg<O>>),
    Object(O),
}

impl<O> Arg<O> {
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Null => "null",
            Arg::Bool(_) => "bool",
            Arg::Int(_) => "int",
            Arg::Str(_) => "string",
            Arg::List(_) => "list",
            Arg::Object(_) => "object",
        }
    }
}

/// A resolved subscript key.
#[derive(Debug, Clone)]
pub enum Key<O> {
    Value(Arg<O>),
    Slice(SliceSpec),
}

/// The model a relative chain resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRef<'a> {
    pub app_label: &'a str,
    pub model_name: &'a str,
}

impl<'a> ModelRef<'a> {
    pub fn new(app_label: &'a str, model_name: &'a str) -> Self {
        Self {
            app_label,
            model_name,
        }
    }
}

/// A query builder that recorded chains can be replayed against.
///
/// The host provides the model registry lookup ([`root`](Self::root)) and the
/// query compiler ([`compile`](Self::compile)); the remaining methods are the
/// concrete counterparts of the three recorded operations.
pub trait QueryHost {
    type Object: Clone + std::fmt::Debug;

    /// The query-builder root object of a model.
    fn root(&self, model: ModelRef<'_>) -> Result<Self::Object>;

    fn get_attr(&self, target: Self::Object, name: &str) -> Result<Self::Object>;

    fn call(
        &self,
        target: Self::Object,
        args: Vec<Arg<Self::Object>>,
        kwargs: IndexMap<String, Arg<Self::Object>>,
    ) -> Result<Self::Object>;

    fn index(&self, target: Self::Object, key: Key<Self::Object>) -> Result<Self::Object>;

    /// Build the value a deferred constructor stands for.
    fn construct(
        &self,
        constructor: &str,
        args: Vec<Arg<Self::Object>>,
        kwargs: IndexMap<String, Arg<Self::Object>>,
    ) -> Result<Self::Object>;

    /// Compile a query object into SQL text and bound parameters.
    fn compile(&self, object: &Self::Object) -> Result<RenderedSql>;
}

impl ExpressionChain {
    /// Look up the root model and replay every recorded operation against it.
    ///
    /// A chain without a model name resolves against `default`, and so do
    /// relative chains nested in its arguments.
    pub fn resolve<H: QueryHost>(&self, host: &H, default: ModelRef<'_>) -> Result<H::Object> {
        let root = ModelRef {
            app_label: self.app_label().unwrap_or(default.app_label),
            model_name: self.model_name().unwrap_or(default.model_name),
        };
        let mut current = host.root(root)?;
        for op in self.operations() {
            debug!(model = root.model_name, op = %op, "replaying operation");
            current = apply(host, current, op, default)?;
        }
        Ok(current)
    }

    /// Resolve the chain, then apply `op` to the resolved object.
    pub fn forward<H: QueryHost>(
        &self,
        host: &H,
        default: ModelRef<'_>,
        op: &Operation,
    ) -> Result<H::Object> {
        let resolved = self.resolve(host, default)?;
        apply(host, resolved, op, default)
    }

    /// Resolve the chain and compile the resulting query.
    pub fn compile<H: QueryHost>(&self, host: &H, default: ModelRef<'_>) -> Result<RenderedSql> {
        let resolved = self.resolve(host, default)?;
        host.compile(&resolved)
    }
}

fn apply<H: QueryHost>(
    host: &H,
    target: H::Object,
    op: &Operation,
    default: ModelRef<'_>,
) -> Result<H::Object> {
    match op {
        Operation::GetAttribute { name } => host.get_attr(target, name),
        Operation::Call { args, kwargs } => {
            let args = resolve_args(host, args, default)?;
            let kwargs = resolve_kwargs(host, kwargs, default)?;
            host.call(target, args, kwargs)
        }
        Operation::Index { key } => {
            let key = match key {
                IndexKey::Value(v) => Key::Value(resolve_value(host, v, default)?),
                IndexKey::Slice(spec) => Key::Slice(*spec),
            };
            host.index(target, key)
        }
    }
}

/// Turn a recorded value into a host argument, innermost values first.
pub(crate) fn resolve_value<H: QueryHost>(
    host: &H,
    value: &Value,
    default: ModelRef<'_>,
) -> Result<Arg<H::Object>> {
    Ok(match value {
        Value::Null => Arg::Null,
        Value::Bool(b) => Arg::Bool(*b),
        Value::Int(n) => Arg::Int(*n),
        Value::Str(s) => Arg::Str(s.clone()),
        Value::List(items) => Arg::List(resolve_args(host, items, default)?),
        Value::Chain(chain) => Arg::Object(chain.resolve(host, default)?),
        Value::Deferred(d) => {
            let args = resolve_args(host, &d.args, default)?;
            let kwargs = resolve_kwargs(host, &d.kwargs, default)?;
            debug!(constructor = %d.constructor, "constructing deferred value");
            Arg::Object(host.construct(&d.constructor, args, kwargs)?)
        }
    })
}

fn resolve_args<H: QueryHost>(
    host: &H,
    args: &[Value],
    default: ModelRef<'_>,
) -> Result<Vec<Arg<H::Object>>> {
    args.iter()
        .map(|v| resolve_value(host, v, default))
        .collect()
}

fn resolve_kwargs<H: QueryHost>(
    host: &H,
    kwargs: &IndexMap<String, Value>,
    default: ModelRef<'_>,
) -> Result<IndexMap<String, Arg<H::Object>>> {
    kwargs
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(host, v, default)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{M, SliceSpec, q};
    use crate::Error;

    /// Host that spells out every step it is asked to perform.
    struct Echo;

    impl QueryHost for Echo {
        type Object = String;

        fn root(&self, model: ModelRef<'_>) -> Result<String> {
            if model.model_name == "Missing" {
                return Err(Error::ModelNotFound {
                    app_label: model.app_label.to_string(),
                    model_name: model.model_name.to_string(),
                });
            }
            Ok(format!("{}.{}", model.app_label, model.model_name))
        }

        fn get_attr(&self, target: String, name: &str) -> Result<String> {
            Ok(format!("{target}.{name}"))
        }

        fn call(
            &self,
            target: String,
            args: Vec<Arg<String>>,
            kwargs: IndexMap<String, Arg<String>>,
        ) -> Result<String> {
            let mut parts: Vec<String> = args.iter().map(show).collect();
            parts.extend(kwargs.iter().map(|(k, v)| format!("{k}={}", show(v))));
            Ok(format!("{target}({})", parts.join(", ")))
        }

        fn index(&self, target: String, key: Key<String>) -> Result<String> {
            Ok(match key {
                Key::Value(v) => format!("{target}[{}]", show(&v)),
                Key::Slice(s) => format!("{target}[{:?}:{:?}]", s.start, s.stop),
            })
        }

        fn construct(
            &self,
            constructor: &str,
            args: Vec<Arg<String>>,
            kwargs: IndexMap<String, Arg<String>>,
        ) -> Result<String> {
            self.call(format!("new {constructor}"), args, kwargs)
        }

        fn compile(&self, object: &String) -> Result<RenderedSql> {
            Ok(RenderedSql {
                sql: object.clone(),
                values: vec![],
            })
        }
    }

    fn show(arg: &Arg<String>) -> String {
        match arg {
            Arg::Null => "null".into(),
            Arg::Bool(b) => b.to_string(),
            Arg::Int(n) => n.to_string(),
            Arg::Str(s) => format!("{s:?}"),
            Arg::List(items) => {
                let items: Vec<_> = items.iter().map(show).collect();
                format!("[{}]", items.join(", "))
            }
            Arg::Object(o) => format!("<{o}>"),
        }
    }

    const HERE: ModelRef<'static> = ModelRef {
        app_label: "shop",
        model_name: "Pizza",
    };

    #[test]
    fn relative_chain_uses_default_model() {
        let chain = M::new().objects().filter([("pk", 1)]).finish();
        let resolved = chain.resolve(&Echo, HERE).unwrap();
        assert_eq!(resolved, "shop.Pizza.objects.filter(pk=1)");
    }

    #[test]
    fn named_chain_keeps_default_app() {
        let chain = M::model("Topping").objects().all().finish();
        assert_eq!(
            chain.resolve(&Echo, HERE).unwrap(),
            "shop.Topping.objects.all()"
        );

        let chain = M::model("Topping").app_label("pantry").objects().finish();
        assert_eq!(chain.resolve(&Echo, HERE).unwrap(), "pantry.Topping.objects");
    }

    #[test]
    fn nested_values_resolve_bottom_up() {
        let chain = M::new()
            .objects()
            .filter_q(q([("topping__in", M::model("Topping").objects().all())]) | q([("size", 1)]))
            .slice(SliceSpec {
                start: Some(1),
                ..Default::default()
            })
            .finish();
        assert_eq!(
            chain.resolve(&Echo, HERE).unwrap(),
            "shop.Pizza.objects.filter(<new Q.or(<new Q(topping__in=<shop.Topping.objects.all()>)>, <new Q(size=1)>)>)[Some(1):None]"
        );
    }

    #[test]
    fn forward_applies_trigger_operation_to_resolved_object() {
        let chain = M::new().objects().finish();
        let forwarded = chain
            .forward(&Echo, HERE, &Operation::GetAttribute {
                name: "query".into(),
            })
            .unwrap();
        assert_eq!(forwarded, "shop.Pizza.objects.query");
    }

    #[test]
    fn replay_is_repeatable() {
        let chain = M::new().objects().exclude([("size__gt", 30)]).finish();
        let first = chain.compile(&Echo, HERE).unwrap();
        let second = chain.compile(&Echo, HERE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_model_fails() {
        let chain = M::model("Missing").objects().finish();
        let err = chain.resolve(&Echo, HERE).unwrap_err();
        assert!(matches!(err, Error::ModelNotFound { .. }));
    }
}
