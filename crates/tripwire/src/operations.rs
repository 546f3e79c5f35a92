//! Migration operations.
//!
//! Each operation knows how to advance a [`ProjectState`] and how to apply
//! or revert itself against a database. Database methods take the states
//! on either side of the operation: `from` before it and `to` after it when
//! going forwards, and the reverse when going backwards.

use tracing::{info, warn};
use tripwire_sql::quote_ident;

use crate::constraint::Constraint;
use crate::deconstruct::{Deconstruct, Node, Reconstruct};
use crate::executor::{SchemaExecutor, run};
use crate::install::TriggerOptions;
use crate::schema::{create_table_sql, drop_table_sql, rename_table_sql};
use crate::state::{ModelState, ProjectState};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    CreateModel {
        model: ModelState,
    },
    DeleteModel {
        name: String,
    },
    RenameModel {
        old_name: String,
        new_name: String,
    },
    AddConstraint {
        /// Lowercased model name.
        model_name: String,
        constraint: Constraint,
    },
    RemoveConstraint {
        model_name: String,
        name: String,
    },
}

impl MigrationOperation {
    pub fn create_model(model: ModelState) -> Self {
        MigrationOperation::CreateModel { model }
    }

    pub fn delete_model(name: impl Into<String>) -> Self {
        MigrationOperation::DeleteModel { name: name.into() }
    }

    pub fn rename_model(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        MigrationOperation::RenameModel {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    pub fn add_constraint(model_name: &str, constraint: Constraint) -> Self {
        MigrationOperation::AddConstraint {
            model_name: model_name.to_lowercase(),
            constraint,
        }
    }

    pub fn remove_constraint(model_name: &str, name: impl Into<String>) -> Self {
        MigrationOperation::RemoveConstraint {
            model_name: model_name.to_lowercase(),
            name: name.into(),
        }
    }

    /// Human-readable summary.
    pub fn describe(&self) -> String {
        match self {
            MigrationOperation::CreateModel { model } => format!("Create model {}", model.name),
            MigrationOperation::DeleteModel { name } => format!("Delete model {name}"),
            MigrationOperation::RenameModel { old_name, new_name } => {
                format!("Rename model {old_name} to {new_name}")
            }
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } => format!(
                "Create constraint {} on model {model_name}",
                constraint.name()
            ),
            MigrationOperation::RemoveConstraint { model_name, name } => {
                format!("Remove constraint {name} from model {model_name}")
            }
        }
    }

    /// Suffix for an auto-generated migration name.
    pub fn migration_name_fragment(&self) -> String {
        match self {
            MigrationOperation::CreateModel { model } => model.name_lower(),
            MigrationOperation::DeleteModel { name } => format!("delete_{}", name.to_lowercase()),
            MigrationOperation::RenameModel { old_name, new_name } => format!(
                "rename_{}_{}",
                old_name.to_lowercase(),
                new_name.to_lowercase()
            ),
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } => format!("{model_name}_{}", sanitize(constraint.name())),
            MigrationOperation::RemoveConstraint { model_name, name } => {
                format!("remove_{model_name}_{}", sanitize(name))
            }
        }
    }

    pub fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
        match self {
            MigrationOperation::CreateModel { model } => state.add_model(model.clone()),
            MigrationOperation::DeleteModel { name } => {
                state.remove_model(app_label, name).map(drop)
            }
            MigrationOperation::RenameModel { old_name, new_name } => {
                state.rename_model(app_label, old_name, new_name)
            }
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } => {
                let model = state.model(app_label, model_name)?;
                if model.constraint(constraint.name()).is_some() {
                    return Err(Error::DuplicateConstraint {
                        model: model.key().to_string(),
                        name: constraint.name().to_string(),
                    });
                }
                state
                    .constraints_mut(app_label, model_name)?
                    .push(constraint.clone());
                state.reload_model(app_label, model_name)
            }
            MigrationOperation::RemoveConstraint { model_name, name } => {
                state.remove_constraint(app_label, model_name, name)?;
                state.reload_model(app_label, model_name)
            }
        }
    }

    pub async fn database_forwards(
        &self,
        app_label: &str,
        executor: &dyn SchemaExecutor,
        from: &ProjectState,
        to: &ProjectState,
    ) -> Result<()> {
        match self {
            MigrationOperation::CreateModel { model } => {
                let model = to.model(&model.app_label, &model.name)?;
                create_model(executor, to, model).await
            }
            MigrationOperation::DeleteModel { name } => {
                delete_model(executor, from, from.model(app_label, name)?).await
            }
            MigrationOperation::RenameModel { old_name, new_name } => {
                rename_model(
                    executor,
                    (from, from.model(app_label, old_name)?),
                    (to, to.model(app_label, new_name)?),
                )
                .await
            }
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } => {
                let model = to.model(app_label, model_name)?;
                if allow_migrate(model) {
                    constraint.install(executor, to, model).await?;
                }
                Ok(())
            }
            MigrationOperation::RemoveConstraint { model_name, name } => {
                let model = from.model(app_label, model_name)?;
                if allow_migrate(model) {
                    declared(model, name)?.uninstall(executor, from, model).await?;
                }
                Ok(())
            }
        }
    }

    /// Revert the operation. `from` is the state with the operation
    /// applied, `to` the state without it.
    pub async fn database_backwards(
        &self,
        app_label: &str,
        executor: &dyn SchemaExecutor,
        from: &ProjectState,
        to: &ProjectState,
    ) -> Result<()> {
        match self {
            MigrationOperation::CreateModel { model } => {
                let model = from.model(&model.app_label, &model.name)?;
                delete_model(executor, from, model).await
            }
            MigrationOperation::DeleteModel { name } => {
                create_model(executor, to, to.model(app_label, name)?).await
            }
            MigrationOperation::RenameModel { old_name, new_name } => {
                rename_model(
                    executor,
                    (from, from.model(app_label, new_name)?),
                    (to, to.model(app_label, old_name)?),
                )
                .await
            }
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } => {
                let model = from.model(app_label, model_name)?;
                if allow_migrate(model) {
                    constraint.uninstall(executor, from, model).await?;
                }
                Ok(())
            }
            MigrationOperation::RemoveConstraint { model_name, name } => {
                let model = to.model(app_label, model_name)?;
                if allow_migrate(model) {
                    declared(model, name)?.install(executor, to, model).await?;
                }
                Ok(())
            }
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '_') => c,
            _ => '_',
        })
        .collect()
}

/// Unmanaged models exist in snapshots only.
fn allow_migrate(model: &ModelState) -> bool {
    if !model.options.managed {
        warn!(model = %model.key(), "skipping unmanaged model");
    }
    model.options.managed
}

fn declared<'a>(model: &'a ModelState, name: &str) -> Result<&'a Constraint> {
    model.constraint(name).ok_or_else(|| Error::UnknownConstraint {
        model: model.key().to_string(),
        name: name.to_string(),
    })
}

async fn create_model(
    executor: &dyn SchemaExecutor,
    state: &ProjectState,
    model: &ModelState,
) -> Result<()> {
    if !allow_migrate(model) {
        return Ok(());
    }
    run(executor, &create_table_sql(state, model)?).await?;
    info!(model = %model.key(), table = %model.db_table(), "created table");
    for constraint in model.constraints() {
        constraint.install(executor, state, model).await?;
    }
    Ok(())
}

/// Drop the table; its triggers go with it, their functions need an
/// explicit drop.
async fn delete_model(
    executor: &dyn SchemaExecutor,
    state: &ProjectState,
    model: &ModelState,
) -> Result<()> {
    if !allow_migrate(model) {
        return Ok(());
    }
    run(executor, &drop_table_sql(model)).await?;
    info!(model = %model.key(), table = %model.db_table(), "dropped table");

    let options = TriggerOptions::from_config(state.config());
    let table = model.db_table();
    for constraint in model.constraints() {
        if let Constraint::Queryset(c) = constraint {
            let names = options.names(c.name(), &table);
            run(
                executor,
                &format!("DROP FUNCTION IF EXISTS {}();", quote_ident(&names.function)),
            )
            .await?;
        }
    }
    Ok(())
}

/// Trigger names derive from the table name, so queryset constraints are
/// reinstalled around the rename.
async fn rename_model(
    executor: &dyn SchemaExecutor,
    (from_state, old): (&ProjectState, &ModelState),
    (to_state, new): (&ProjectState, &ModelState),
) -> Result<()> {
    if !allow_migrate(new) {
        return Ok(());
    }
    let (old_table, new_table) = (old.db_table(), new.db_table());
    if old_table == new_table {
        return Ok(());
    }

    for constraint in old.constraints() {
        if let Constraint::Queryset(c) = constraint {
            c.uninstall(executor, from_state, old).await?;
        }
    }
    run(executor, &rename_table_sql(&old_table, &new_table)).await?;
    info!(from = %old_table, to = %new_table, "renamed table");
    for constraint in new.constraints() {
        if let Constraint::Queryset(c) = constraint {
            c.install(executor, to_state, new).await?;
        }
    }
    Ok(())
}

impl Deconstruct for MigrationOperation {
    fn deconstruct(&self) -> Node {
        match self {
            MigrationOperation::CreateModel { model } => Node::call(
                "tripwire.CreateModel",
                Vec::new(),
                [("model", model.deconstruct())],
            ),
            MigrationOperation::DeleteModel { name } => Node::call(
                "tripwire.DeleteModel",
                Vec::new(),
                [("name", name.as_str().into())],
            ),
            MigrationOperation::RenameModel { old_name, new_name } => Node::call(
                "tripwire.RenameModel",
                Vec::new(),
                [
                    ("old_name", old_name.as_str().into()),
                    ("new_name", new_name.as_str().into()),
                ],
            ),
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } => Node::call(
                "tripwire.AddConstraint",
                Vec::new(),
                [
                    ("model_name", model_name.as_str().into()),
                    ("constraint", constraint.deconstruct()),
                ],
            ),
            MigrationOperation::RemoveConstraint { model_name, name } => Node::call(
                "tripwire.RemoveConstraint",
                Vec::new(),
                [
                    ("model_name", model_name.as_str().into()),
                    ("name", name.as_str().into()),
                ],
            ),
        }
    }
}

impl Reconstruct for MigrationOperation {
    fn reconstruct(node: &Node) -> Result<Self> {
        let Node::Call { path, .. } = node else {
            return Err(Error::deconstruct("an operation must be a call"));
        };
        let call = node.call_to(path)?;
        Ok(match path.as_str() {
            "tripwire.CreateModel" => MigrationOperation::CreateModel {
                model: ModelState::reconstruct(call.get("model")?)?,
            },
            "tripwire.DeleteModel" => MigrationOperation::DeleteModel {
                name: call.str("name")?,
            },
            "tripwire.RenameModel" => MigrationOperation::RenameModel {
                old_name: call.str("old_name")?,
                new_name: call.str("new_name")?,
            },
            "tripwire.AddConstraint" => MigrationOperation::AddConstraint {
                model_name: call.str("model_name")?,
                constraint: Constraint::reconstruct(call.get("constraint")?)?,
            },
            "tripwire.RemoveConstraint" => MigrationOperation::RemoveConstraint {
                model_name: call.str("model_name")?,
                name: call.str("name")?,
            },
            other => {
                return Err(Error::deconstruct(format!("unknown operation {other}")));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::M;
    use crate::state::Field;

    fn pk_is(n: i64, name: &str) -> Constraint {
        Constraint::queryset(M::new().objects().filter([("pk", n)]), name).unwrap()
    }

    #[test]
    fn descriptions_and_fragments() {
        let add = MigrationOperation::add_constraint("Author", pk_is(1, "1"));
        assert_eq!(add.describe(), "Create constraint 1 on model author");
        assert_eq!(add.migration_name_fragment(), "author_1");

        let remove = MigrationOperation::remove_constraint("Author", "id cannot be 1");
        assert_eq!(
            remove.describe(),
            "Remove constraint id cannot be 1 from model author"
        );
        assert_eq!(
            remove.migration_name_fragment(),
            "remove_author_id_cannot_be_1"
        );

        let rename = MigrationOperation::rename_model("Author", "Writer");
        assert_eq!(rename.describe(), "Rename model Author to Writer");
        assert_eq!(rename.migration_name_fragment(), "rename_author_writer");
    }

    #[test]
    fn state_forwards_adds_and_removes() {
        let mut state = ProjectState::default();
        MigrationOperation::create_model(
            ModelState::new("test_app", "Author").with_field(Field::auto("id")),
        )
        .state_forwards("test_app", &mut state)
        .unwrap();
        MigrationOperation::add_constraint("author", pk_is(1, "1"))
            .state_forwards("test_app", &mut state)
            .unwrap();
        assert_eq!(
            state.model("test_app", "Author").unwrap().constraints().count(),
            1
        );

        let err = MigrationOperation::add_constraint("author", pk_is(2, "1"))
            .state_forwards("test_app", &mut state)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateConstraint { .. }));
        let author = state.model("test_app", "Author").unwrap();
        assert_eq!(author.constraints().count(), 1);
        assert_eq!(
            author.constraint("1"),
            Some(&pk_is(1, "1")),
            "the rejected constraint must not replace the original"
        );
    }

    #[test]
    fn reconstructs_every_operation() {
        let ops = [
            MigrationOperation::create_model(
                ModelState::new("test_app", "Author").with_field(Field::auto("id")),
            ),
            MigrationOperation::delete_model("Author"),
            MigrationOperation::rename_model("Author", "Writer"),
            MigrationOperation::add_constraint("author", pk_is(1, "1")),
            MigrationOperation::remove_constraint("author", "1"),
        ];
        for op in ops {
            assert_eq!(MigrationOperation::reconstruct(&op.deconstruct()).unwrap(), op);
        }

        let err = MigrationOperation::reconstruct(&Node::call("tripwire.Truncate", vec![], []))
            .unwrap_err();
        assert!(matches!(err, Error::Deconstruct(_)));
    }
}
