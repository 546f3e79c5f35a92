//! Flattening values into `(path, args, kwargs)` trees and back.
//!
//! Migration files store operations in deconstructed form: every value is
//! reduced to primitives, lists, maps and constructor calls. Loading a
//! migration reconstructs the originals from that tree.

use indexmap::IndexMap;

use crate::chain::{Deferred, ExpressionChain, IndexKey, Kwargs, Operation, SliceSpec, Value};
use crate::constraint::{CheckConstraint, Constraint, QuerysetConstraint};
use crate::state::{Field, ModelKey, ModelOptions, ModelState, PgType};
use crate::{Error, Result};

/// Constructor path of a deconstructed expression chain.
pub const CHAIN_PATH: &str = "tripwire.M";

/// A deconstructed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Node>),
    Map(IndexMap<String, Node>),
    Call {
        path: String,
        args: Vec<Node>,
        kwargs: IndexMap<String, Node>,
    },
}

impl Node {
    pub fn call<'k>(
        path: impl Into<String>,
        args: Vec<Node>,
        kwargs: impl IntoIterator<Item = (&'k str, Node)>,
    ) -> Node {
        Node::Call {
            path: path.into(),
            args,
            kwargs: kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    pub fn map<'k>(entries: impl IntoIterator<Item = (&'k str, Node)>) -> Node {
        Node::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Int(_) => "int",
            Node::Str(_) => "string",
            Node::List(_) => "list",
            Node::Map(_) => "map",
            Node::Call { .. } => "call",
        }
    }

    pub(crate) fn as_str(&self) -> Result<&str> {
        match self {
            Node::Str(s) => Ok(s),
            other => Err(Error::deconstruct(format!(
                "expected string, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn as_opt_str(&self) -> Result<Option<&str>> {
        match self {
            Node::Null => Ok(None),
            other => other.as_str().map(Some),
        }
    }

    pub(crate) fn as_bool(&self) -> Result<bool> {
        match self {
            Node::Bool(b) => Ok(*b),
            other => Err(Error::deconstruct(format!(
                "expected bool, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn as_opt_int(&self) -> Result<Option<i64>> {
        match self {
            Node::Null => Ok(None),
            Node::Int(n) => Ok(Some(*n)),
            other => Err(Error::deconstruct(format!(
                "expected int or null, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn as_list(&self) -> Result<&[Node]> {
        match self {
            Node::List(items) => Ok(items),
            other => Err(Error::deconstruct(format!(
                "expected list, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn as_map(&self) -> Result<Fields<'_>> {
        match self {
            Node::Map(map) => Ok(Fields { what: "map", map }),
            other => Err(Error::deconstruct(format!(
                "expected map, found {}",
                other.kind()
            ))),
        }
    }

    /// The keyword arguments of a call to `path`.
    pub(crate) fn call_to<'a>(&'a self, path: &'a str) -> Result<Fields<'a>> {
        match self {
            Node::Call {
                path: found,
                kwargs,
                ..
            } if found == path => Ok(Fields { what: path, map: kwargs }),
            Node::Call { path: found, .. } => Err(Error::deconstruct(format!(
                "expected a call to {path}, found {found}"
            ))),
            other => Err(Error::deconstruct(format!(
                "expected a call to {path}, found {}",
                other.kind()
            ))),
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Str(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Str(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Int(n)
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(v: Option<T>) -> Self {
        v.map_or(Node::Null, Into::into)
    }
}

/// Named entries of a map or of a call's kwargs.
pub(crate) struct Fields<'a> {
    what: &'a str,
    map: &'a IndexMap<String, Node>,
}

impl<'a> Fields<'a> {
    pub(crate) fn get(&self, key: &str) -> Result<&'a Node> {
        self.map
            .get(key)
            .ok_or_else(|| Error::deconstruct(format!("{} is missing {key:?}", self.what)))
    }

    /// Missing keys read as null.
    pub(crate) fn get_or_null(&self, key: &str) -> &'a Node {
        static NULL: Node = Node::Null;
        self.map.get(key).unwrap_or(&NULL)
    }

    pub(crate) fn str(&self, key: &str) -> Result<String> {
        Ok(self.get(key)?.as_str()?.to_string())
    }

    pub(crate) fn opt_str(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_or_null(key).as_opt_str()?.map(str::to_string))
    }
}

pub trait Deconstruct {
    fn deconstruct(&self) -> Node;
}

pub trait Reconstruct: Sized {
    fn reconstruct(node: &Node) -> Result<Self>;
}

impl Deconstruct for Value {
    fn deconstruct(&self) -> Node {
        match self {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Int(n) => Node::Int(*n),
            Value::Str(s) => Node::Str(s.clone()),
            Value::List(items) => Node::List(items.iter().map(Deconstruct::deconstruct).collect()),
            Value::Chain(chain) => chain.deconstruct(),
            Value::Deferred(d) => Node::Call {
                path: d.constructor.clone(),
                args: d.args.iter().map(Deconstruct::deconstruct).collect(),
                kwargs: deconstruct_kwargs(&d.kwargs),
            },
        }
    }
}

impl Reconstruct for Value {
    fn reconstruct(node: &Node) -> Result<Self> {
        Ok(match node {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(n) => Value::Int(*n),
            Node::Str(s) => Value::Str(s.clone()),
            Node::List(items) => Value::List(
                items
                    .iter()
                    .map(Value::reconstruct)
                    .collect::<Result<_>>()?,
            ),
            Node::Call { path, .. } if path == CHAIN_PATH => {
                Value::Chain(Box::new(ExpressionChain::reconstruct(node)?))
            }
            Node::Call { path, args, kwargs } => Value::Deferred(Box::new(Deferred::new(
                path.clone(),
                args.iter().map(Value::reconstruct).collect::<Result<_>>()?,
                reconstruct_kwargs(kwargs)?,
            ))),
            Node::Map(_) => return Err(Error::deconstruct("a map is not a value")),
        })
    }
}

fn deconstruct_kwargs(kwargs: &Kwargs) -> IndexMap<String, Node> {
    kwargs
        .iter()
        .map(|(k, v)| (k.clone(), v.deconstruct()))
        .collect()
}

fn reconstruct_kwargs(kwargs: &IndexMap<String, Node>) -> Result<Kwargs> {
    kwargs
        .iter()
        .map(|(k, v)| Ok((k.clone(), Value::reconstruct(v)?)))
        .collect()
}

impl Deconstruct for SliceSpec {
    fn deconstruct(&self) -> Node {
        Node::map([
            ("start", self.start.into()),
            ("stop", self.stop.into()),
            ("step", self.step.into()),
        ])
    }
}

impl Reconstruct for SliceSpec {
    fn reconstruct(node: &Node) -> Result<Self> {
        let map = node.as_map()?;
        Ok(SliceSpec {
            start: map.get_or_null("start").as_opt_int()?,
            stop: map.get_or_null("stop").as_opt_int()?,
            step: map.get_or_null("step").as_opt_int()?,
        })
    }
}

impl Deconstruct for Operation {
    fn deconstruct(&self) -> Node {
        let op = ("op", Node::from(self.tag()));
        match self {
            Operation::GetAttribute { name } => Node::map([op, ("name", name.as_str().into())]),
            Operation::Call { args, kwargs } => Node::map([
                op,
                (
                    "args",
                    Node::List(args.iter().map(Deconstruct::deconstruct).collect()),
                ),
                ("kwargs", Node::Map(deconstruct_kwargs(kwargs))),
            ]),
            Operation::Index {
                key: IndexKey::Value(key),
            } => Node::map([op, ("key", key.deconstruct())]),
            Operation::Index {
                key: IndexKey::Slice(slice),
            } => Node::map([op, ("slice", slice.deconstruct())]),
        }
    }
}

impl Reconstruct for Operation {
    fn reconstruct(node: &Node) -> Result<Self> {
        let map = node.as_map()?;
        let tag = map.str("op")?;
        match tag.as_str() {
            "getattr" => Ok(Operation::GetAttribute {
                name: map.str("name")?,
            }),
            "call" => {
                let args = match map.get_or_null("args") {
                    Node::Null => &[][..],
                    other => other.as_list()?,
                };
                let kwargs = match map.get_or_null("kwargs") {
                    Node::Null => Kwargs::new(),
                    Node::Map(kwargs) => reconstruct_kwargs(kwargs)?,
                    other => {
                        return Err(Error::deconstruct(format!(
                            "expected kwargs map, found {}",
                            other.kind()
                        )));
                    }
                };
                Ok(Operation::Call {
                    args: args.iter().map(Value::reconstruct).collect::<Result<_>>()?,
                    kwargs,
                })
            }
            "index" => {
                let key = match (map.map.get("key"), map.map.get("slice")) {
                    (_, Some(slice)) => IndexKey::Slice(SliceSpec::reconstruct(slice)?),
                    (Some(key), None) => IndexKey::Value(Value::reconstruct(key)?),
                    (None, None) => return Err(Error::deconstruct("index without a key")),
                };
                Ok(Operation::Index { key })
            }
            _ => Err(Error::UnknownOperation(tag)),
        }
    }
}

impl Deconstruct for ExpressionChain {
    fn deconstruct(&self) -> Node {
        Node::call(
            CHAIN_PATH,
            Vec::new(),
            [
                ("model_name", self.model_name().into()),
                ("app_label", self.app_label().into()),
                (
                    "operations",
                    Node::List(
                        self.operations()
                            .iter()
                            .map(Deconstruct::deconstruct)
                            .collect(),
                    ),
                ),
            ],
        )
    }
}

impl Reconstruct for ExpressionChain {
    fn reconstruct(node: &Node) -> Result<Self> {
        let call = node.call_to(CHAIN_PATH)?;
        let operations = call
            .get("operations")?
            .as_list()?
            .iter()
            .map(Operation::reconstruct)
            .collect::<Result<_>>()?;
        Ok(ExpressionChain::from_operations(
            call.opt_str("model_name")?,
            call.opt_str("app_label")?,
            operations,
        ))
    }
}

impl Deconstruct for PgType {
    fn deconstruct(&self) -> Node {
        Node::Str(self.to_string())
    }
}

impl Reconstruct for PgType {
    fn reconstruct(node: &Node) -> Result<Self> {
        let name = node.as_str()?;
        if let Some(len) = name
            .strip_prefix("VARCHAR(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let len = len
                .parse()
                .map_err(|_| Error::deconstruct(format!("bad varchar length in {name:?}")))?;
            return Ok(PgType::Varchar(len));
        }
        Ok(match name {
            "SMALLINT" => PgType::SmallInt,
            "INTEGER" => PgType::Integer,
            "BIGINT" => PgType::BigInt,
            "SERIAL" => PgType::Serial,
            "BIGSERIAL" => PgType::BigSerial,
            "REAL" => PgType::Real,
            "DOUBLE PRECISION" => PgType::DoublePrecision,
            "BOOLEAN" => PgType::Boolean,
            "TEXT" => PgType::Text,
            "TIMESTAMPTZ" => PgType::Timestamptz,
            "DATE" => PgType::Date,
            "UUID" => PgType::Uuid,
            other => return Err(Error::deconstruct(format!("unknown column type {other:?}"))),
        })
    }
}

impl Deconstruct for Field {
    fn deconstruct(&self) -> Node {
        Node::call(
            "tripwire.Field",
            Vec::new(),
            [
                ("name", self.name.as_str().into()),
                ("type", self.pg_type.deconstruct()),
                ("nullable", self.nullable.into()),
                ("primary_key", self.primary_key.into()),
                ("unique", self.unique.into()),
                ("default", self.default.as_deref().into()),
                ("relation", self.relation.as_ref().map(|k| k.to_string()).into()),
            ],
        )
    }
}

impl Reconstruct for Field {
    fn reconstruct(node: &Node) -> Result<Self> {
        let call = node.call_to("tripwire.Field")?;
        let relation = match call.opt_str("relation")? {
            Some(key) => {
                let (app_label, model_name) = key.split_once('.').ok_or_else(|| {
                    Error::deconstruct(format!("relation {key:?} is not app.model"))
                })?;
                Some(ModelKey::new(app_label, model_name))
            }
            None => None,
        };
        Ok(Field {
            name: call.str("name")?,
            pg_type: PgType::reconstruct(call.get("type")?)?,
            nullable: call.get("nullable")?.as_bool()?,
            primary_key: call.get("primary_key")?.as_bool()?,
            unique: call.get("unique")?.as_bool()?,
            default: call.opt_str("default")?,
            relation,
        })
    }
}

impl Deconstruct for ModelOptions {
    fn deconstruct(&self) -> Node {
        Node::map([
            ("db_table", self.db_table.as_deref().into()),
            ("managed", self.managed.into()),
            (
                "constraints",
                Node::Map(
                    self.constraints
                        .iter()
                        .map(|(option, list)| {
                            (
                                option.clone(),
                                Node::List(list.iter().map(Deconstruct::deconstruct).collect()),
                            )
                        })
                        .collect(),
                ),
            ),
        ])
    }
}

impl Reconstruct for ModelOptions {
    fn reconstruct(node: &Node) -> Result<Self> {
        let map = node.as_map()?;
        let mut constraints = IndexMap::new();
        if let Node::Map(lists) = map.get_or_null("constraints") {
            for (option, list) in lists {
                let list = list
                    .as_list()?
                    .iter()
                    .map(Constraint::reconstruct)
                    .collect::<Result<Vec<_>>>()?;
                constraints.insert(option.clone(), list);
            }
        }
        Ok(ModelOptions {
            db_table: map.opt_str("db_table")?,
            managed: match map.get_or_null("managed") {
                Node::Null => true,
                other => other.as_bool()?,
            },
            constraints,
        })
    }
}

impl Deconstruct for ModelState {
    fn deconstruct(&self) -> Node {
        Node::call(
            "tripwire.ModelState",
            Vec::new(),
            [
                ("app_label", self.app_label.as_str().into()),
                ("name", self.name.as_str().into()),
                (
                    "fields",
                    Node::List(self.fields.iter().map(Deconstruct::deconstruct).collect()),
                ),
                ("options", self.options.deconstruct()),
            ],
        )
    }
}

impl Reconstruct for ModelState {
    fn reconstruct(node: &Node) -> Result<Self> {
        let call = node.call_to("tripwire.ModelState")?;
        Ok(ModelState {
            app_label: call.str("app_label")?,
            name: call.str("name")?,
            fields: call
                .get("fields")?
                .as_list()?
                .iter()
                .map(Field::reconstruct)
                .collect::<Result<_>>()?,
            options: ModelOptions::reconstruct(call.get("options")?)?,
        })
    }
}

impl Deconstruct for Constraint {
    fn deconstruct(&self) -> Node {
        match self {
            Constraint::Queryset(c) => Node::call(
                QuerysetConstraint::PATH,
                Vec::new(),
                [
                    ("query", c.query().deconstruct()),
                    ("name", c.name().into()),
                ],
            ),
            Constraint::Check(c) => Node::call(
                CheckConstraint::PATH,
                Vec::new(),
                [("check", c.check().deconstruct()), ("name", c.name().into())],
            ),
        }
    }
}

impl Reconstruct for Constraint {
    fn reconstruct(node: &Node) -> Result<Self> {
        match node {
            Node::Call { path, .. } if path == QuerysetConstraint::PATH => {
                let call = node.call_to(QuerysetConstraint::PATH)?;
                Ok(Constraint::Queryset(QuerysetConstraint::from_chain(
                    ExpressionChain::reconstruct(call.get("query")?)?,
                    call.str("name")?,
                )))
            }
            Node::Call { path, .. } if path == CheckConstraint::PATH => {
                let call = node.call_to(CheckConstraint::PATH)?;
                Ok(Constraint::Check(CheckConstraint::new(
                    Value::reconstruct(call.get("check")?)?,
                    call.str("name")?,
                )?))
            }
            Node::Call { path, .. } => Err(Error::deconstruct(format!(
                "unknown constraint type {path}"
            ))),
            other => Err(Error::deconstruct(format!(
                "expected a constraint, found {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{M, count, f, q};

    fn rebuilt(chain: &ExpressionChain) -> ExpressionChain {
        ExpressionChain::reconstruct(&chain.deconstruct()).unwrap()
    }

    #[test]
    fn chain_survives_deconstruction() {
        let chain = M::new()
            .objects()
            .values(["pizza"])
            .annotate([("n", count("topping"))])
            .filter([("n__gt", 5)])
            .slice(SliceSpec {
                start: Some(1),
                ..Default::default()
            })
            .finish();
        assert_eq!(rebuilt(&chain), chain);
        assert!(rebuilt(&chain).is_finalized());
    }

    #[test]
    fn nested_chains_and_deferred_values() {
        let inner = M::model("Topping").app_label("shop").objects().filter([("name", "x")]);
        let chain = M::new()
            .objects()
            .filter_q(q([("toppings__in", Value::from(inner))]) | !q([("size", f("base"))]))
            .finish();
        assert_eq!(rebuilt(&chain), chain);
    }

    #[test]
    fn deconstructed_shape() {
        let chain = M::model("Author").objects().filter([("pk", 1)]).finish();
        let Node::Call { path, kwargs, .. } = chain.deconstruct() else {
            panic!("chains deconstruct to calls");
        };
        assert_eq!(path, CHAIN_PATH);
        assert_eq!(kwargs["model_name"], Node::from("Author"));
        assert_eq!(kwargs["app_label"], Node::Null);
        assert_eq!(
            kwargs["operations"].as_list().unwrap()[0],
            Node::map([("op", "getattr".into()), ("name", "objects".into())])
        );
    }

    #[test]
    fn unknown_operation_tag() {
        let node = Node::call(
            CHAIN_PATH,
            Vec::new(),
            [(
                "operations",
                Node::List(vec![Node::map([("op", "setattr".into())])]),
            )],
        );
        let err = ExpressionChain::reconstruct(&node).unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(tag) if tag == "setattr"));
    }

    #[test]
    fn model_state_round_trip() {
        let model = ModelState::new("shop", "Topping")
            .with_field(Field::auto("id"))
            .with_field(Field::new("name", PgType::Varchar(80)).unique())
            .with_field(Field::new("note", PgType::Text).nullable().default("''"))
            .with_field(Field::foreign_key("pizza", ModelKey::new("shop", "Pizza")))
            .with_table("toppings")
            .with_constraint(
                Constraint::queryset(M::new().objects().filter([("pk", 1)]), "1").unwrap(),
            )
            .with_constraint(
                Constraint::check(!q([("name", "Anchovies")]), "no_anchovies").unwrap(),
            );
        assert_eq!(ModelState::reconstruct(&model.deconstruct()).unwrap(), model);
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(matches!(
            Field::reconstruct(&Node::from("id")),
            Err(Error::Deconstruct(_))
        ));
        assert!(matches!(
            PgType::reconstruct(&Node::from("VARCHAR(x)")),
            Err(Error::Deconstruct(_))
        ));
        assert!(matches!(
            Value::reconstruct(&Node::map([])),
            Err(Error::Deconstruct(_))
        ));
    }
}
