//! Migrations: named, ordered groups of operations for one app.

use tracing::{Instrument, info, info_span};

use crate::{Error, Result};
use crate::executor::SchemaExecutor;
use crate::operations::MigrationOperation;
use crate::state::ProjectState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub app_label: String,
    /// `0001_initial`, `0002_author_1`, ...
    pub name: String,
    /// `(app_label, migration name)` pairs that must be applied first.
    pub dependencies: Vec<(String, String)>,
    pub operations: Vec<MigrationOperation>,
    pub initial: bool,
}

impl Migration {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            dependencies: Vec::new(),
            operations: Vec::new(),
            initial: false,
        }
    }

    pub fn with_dependency(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies.push((app_label.into(), name.into()));
        self
    }

    pub fn with_operation(mut self, operation: MigrationOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_operations(mut self, operations: impl IntoIterator<Item = MigrationOperation>) -> Self {
        self.operations.extend(operations);
        self
    }

    pub fn initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }

    /// Advance `state` through every operation without touching a database.
    pub fn mutate_state(&self, state: &mut ProjectState) -> Result<()> {
        for op in &self.operations {
            op.state_forwards(&self.app_label, state)?;
        }
        Ok(())
    }

    /// Apply every operation in order, advancing `state` as it goes.
    ///
    /// Statements run one at a time. The first failure stops the migration
    /// and is returned unchanged; rolling back is up to the caller's
    /// transaction.
    pub async fn apply(&self, executor: &dyn SchemaExecutor, state: &mut ProjectState) -> Result<()> {
        let span = info_span!("migration.apply", app = %self.app_label, name = %self.name);
        async {
            for op in &self.operations {
                let from = state.clone();
                op.state_forwards(&self.app_label, state)?;
                op.database_forwards(&self.app_label, executor, &from, state)
                    .await?;
                info!(operation = %op.describe(), "applied");
            }
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await
    }

    /// Revert every operation in reverse order. `state` is the state the
    /// migration was applied on top of, and is left unchanged.
    pub async fn unapply(&self, executor: &dyn SchemaExecutor, state: &ProjectState) -> Result<()> {
        let span = info_span!("migration.unapply", app = %self.app_label, name = %self.name);
        async {
            let mut steps = Vec::with_capacity(self.operations.len());
            let mut before = state.clone();
            for op in &self.operations {
                let mut after = before.clone();
                op.state_forwards(&self.app_label, &mut after)?;
                steps.push((op, before));
                before = after;
            }

            // `before` now holds the fully migrated state
            let mut after = before;
            for (op, before) in steps.into_iter().rev() {
                op.database_backwards(&self.app_label, executor, &after, &before)
                    .await?;
                info!(operation = %op.describe(), "reverted");
                after = before;
            }
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await
    }
}
