//! Named constraints attached to models.

use tripwire_sql::quote_ident;

use crate::chain::{ExpressionChain, Value, constructors};
use crate::executor::{SchemaExecutor, run};
use crate::install::{self, TriggerOptions};
use crate::orm::Orm;
use crate::replay::ModelRef;
use crate::state::{ModelState, ProjectState};
use crate::{Error, Result};

/// A constraint declared on a model.
///
/// Identity is structural: two constraints are the same only if both the
/// name and the body match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Queryset(QuerysetConstraint),
    Check(CheckConstraint),
}

impl Constraint {
    /// A constraint violated whenever `query` returns a row.
    pub fn queryset(query: impl Into<Value>, name: impl Into<String>) -> Result<Self> {
        QuerysetConstraint::new(query, name).map(Constraint::Queryset)
    }

    /// A table `CHECK` built from a `Q` combinator.
    pub fn check(check: Value, name: impl Into<String>) -> Result<Self> {
        CheckConstraint::new(check, name).map(Constraint::Check)
    }

    pub fn name(&self) -> &str {
        match self {
            Constraint::Queryset(c) => c.name(),
            Constraint::Check(c) => c.name(),
        }
    }

    pub fn install_sql(&self, state: &ProjectState, model: &ModelState) -> Result<Vec<String>> {
        match self {
            Constraint::Queryset(c) => c.install_sql(state, model),
            Constraint::Check(c) => Ok(vec![c.add_sql(state, model)?]),
        }
    }

    pub fn uninstall_sql(&self, state: &ProjectState, model: &ModelState) -> Vec<String> {
        match self {
            Constraint::Queryset(c) => c.uninstall_sql(state, model),
            Constraint::Check(c) => vec![c.drop_sql(model)],
        }
    }

    pub async fn install(
        &self,
        executor: &dyn SchemaExecutor,
        state: &ProjectState,
        model: &ModelState,
    ) -> Result<()> {
        match self {
            Constraint::Queryset(c) => c.install(executor, state, model).await,
            Constraint::Check(c) => run(executor, &c.add_sql(state, model)?).await,
        }
    }

    pub async fn uninstall(
        &self,
        executor: &dyn SchemaExecutor,
        state: &ProjectState,
        model: &ModelState,
    ) -> Result<()> {
        match self {
            Constraint::Queryset(c) => c.uninstall(executor, state, model).await,
            Constraint::Check(c) => run(executor, &c.drop_sql(model)).await,
        }
    }
}

/// A constraint forbidding any row matched by a recorded query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerysetConstraint {
    name: String,
    query: ExpressionChain,
}

impl QuerysetConstraint {
    pub const PATH: &'static str = "tripwire.QuerysetConstraint";

    /// Fails with [`Error::InvalidExpressionType`] unless `query` is a
    /// recorded chain.
    pub fn new(query: impl Into<Value>, name: impl Into<String>) -> Result<Self> {
        match query.into() {
            Value::Chain(chain) => Ok(Self::from_chain(*chain, name)),
            other => Err(Error::invalid_type("expression chain", other.kind())),
        }
    }

    pub fn from_chain(mut query: ExpressionChain, name: impl Into<String>) -> Self {
        query.finalize();
        Self {
            name: name.into(),
            query,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &ExpressionChain {
        &self.query
    }

    /// Inline table constraint SQL. Always empty: enforcement lives in a
    /// trigger.
    pub fn constraint_sql(&self) -> String {
        String::new()
    }

    /// The query compiled against `model`, with parameters inlined.
    pub fn predicate_sql(&self, state: &ProjectState, model: &ModelState) -> Result<String> {
        let rendered = self.query.compile(
            &Orm::new(state),
            ModelRef::new(&model.app_label, &model.name),
        )?;
        Ok(rendered.inline()?)
    }

    pub fn install_sql(&self, state: &ProjectState, model: &ModelState) -> Result<Vec<String>> {
        Ok(install::install_sql(
            &self.name,
            &self.predicate_sql(state, model)?,
            &model.db_table(),
            &TriggerOptions::from_config(state.config()),
        ))
    }

    pub fn uninstall_sql(&self, state: &ProjectState, model: &ModelState) -> Vec<String> {
        install::uninstall_sql(
            &self.name,
            &model.db_table(),
            &TriggerOptions::from_config(state.config()),
        )
    }

    pub async fn install(
        &self,
        executor: &dyn SchemaExecutor,
        state: &ProjectState,
        model: &ModelState,
    ) -> Result<()> {
        let predicate = self.predicate_sql(state, model)?;
        install::install(
            executor,
            &self.name,
            &predicate,
            &model.db_table(),
            &TriggerOptions::from_config(state.config()),
        )
        .await
    }

    pub async fn uninstall(
        &self,
        executor: &dyn SchemaExecutor,
        state: &ProjectState,
        model: &ModelState,
    ) -> Result<()> {
        install::uninstall(
            executor,
            &self.name,
            &model.db_table(),
            &TriggerOptions::from_config(state.config()),
        )
        .await
    }
}

/// A plain `CHECK` constraint over one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConstraint {
    name: String,
    check: Value,
}

impl CheckConstraint {
    pub const PATH: &'static str = "tripwire.CheckConstraint";

    pub fn new(check: Value, name: impl Into<String>) -> Result<Self> {
        let is_q = check.as_deferred().is_some_and(|d| {
            matches!(
                d.constructor.as_str(),
                constructors::Q | constructors::Q_AND | constructors::Q_OR | constructors::Q_NOT
            )
        });
        if !is_q {
            return Err(Error::invalid_type("Q", check.kind()));
        }
        Ok(Self {
            name: name.into(),
            check,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self) -> &Value {
        &self.check
    }

    pub fn add_sql(&self, state: &ProjectState, model: &ModelState) -> Result<String> {
        let condition = Orm::new(state).compile_check(model, &self.check)?;
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({condition});",
            quote_ident(&model.db_table()),
            quote_ident(&self.name)
        ))
    }

    pub fn drop_sql(&self, model: &ModelState) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {};",
            quote_ident(&model.db_table()),
            quote_ident(&self.name)
        )
    }
}
