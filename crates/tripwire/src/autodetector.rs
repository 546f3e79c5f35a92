//! Snapshot diffing.
//!
//! The [`Autodetector`] compares two [`ProjectState`]s and produces the
//! operations that turn one into the other, grouped per app. Model-level
//! changes (create, delete, rename) are detected first; [`DiffPass`]es then
//! contribute operations for created and kept models.
//!
//! ## Constraint identity
//!
//! Constraints are compared structurally: a constraint whose query changed
//! under the same name is removed and added again, and a renamed constraint
//! is removed under the old name and added under the new one. For a kept
//! model, removals come before additions so a trigger is never created
//! while an old one with the same name still exists.
//!
//! ## Rename detection
//!
//! Opt-in (`detect_renames` in the config). A deleted and a created model of
//! the same app are paired when their similarity reaches 0.6:
//! - **Name similarity (30%)**: plural/singular pairs like `ponies`/`pony`
//! - **Field overlap (70%)**: Jaccard similarity of the column sets
//!
//! Best matches are assigned greedily.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::migration::Migration;
use crate::operations::MigrationOperation;
use crate::state::{ModelKey, ModelState, ProjectState};

/// A contributor of operations for created and kept models.
pub trait DiffPass {
    /// Operations following the `CreateModel` of `model`.
    fn created_model(&self, model: &ModelState, ops: &mut Vec<MigrationOperation>);

    /// Operations for a model present on both sides. `old` carries the
    /// previous name if the model was renamed.
    fn kept_model(&self, old: &ModelState, new: &ModelState, ops: &mut Vec<MigrationOperation>);
}

/// Adds and removes constraints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstraintPass;

impl DiffPass for ConstraintPass {
    fn created_model(&self, model: &ModelState, ops: &mut Vec<MigrationOperation>) {
        for constraint in model.constraints() {
            ops.push(MigrationOperation::add_constraint(
                &model.name,
                constraint.clone(),
            ));
        }
    }

    fn kept_model(&self, old: &ModelState, new: &ModelState, ops: &mut Vec<MigrationOperation>) {
        let before: Vec<_> = old.constraints().collect();
        let after: Vec<_> = new.constraints().collect();

        for removed in &before {
            if !after.contains(removed) {
                ops.push(MigrationOperation::remove_constraint(
                    &new.name,
                    removed.name(),
                ));
            }
        }
        for added in &after {
            if !before.contains(added) {
                ops.push(MigrationOperation::add_constraint(
                    &new.name,
                    (*added).clone(),
                ));
            }
        }
    }
}

/// Detected operations, per app label.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Changes {
    pub apps: BTreeMap<String, Vec<MigrationOperation>>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.apps.values().all(Vec::is_empty)
    }

    pub fn operations(&self, app_label: &str) -> &[MigrationOperation] {
        self.apps
            .get(app_label)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All operations, app by app.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MigrationOperation)> {
        self.apps
            .iter()
            .flat_map(|(app, ops)| ops.iter().map(move |op| (app.as_str(), op)))
    }

    /// Turn the changes into one migration per app.
    ///
    /// `leaves` maps app labels to their latest migration name. Migrations
    /// are numbered after the leaf and named `initial`, after their only
    /// operation, or `auto`. Each migration depends on its app's leaf and on
    /// the apps whose models its new foreign keys point to.
    pub fn arrange(self, leaves: &IndexMap<String, String>) -> Vec<Migration> {
        let mut names = BTreeMap::new();
        for (app, ops) in &self.apps {
            if ops.is_empty() {
                continue;
            }
            let leaf = leaves.get(app);
            let number = leaf.map_or(0, |leaf| migration_number(leaf)) + 1;
            let suffix = match (leaf, ops.as_slice()) {
                (None, _) => "initial".to_string(),
                (Some(_), [op]) => op.migration_name_fragment(),
                (Some(_), _) => "auto".to_string(),
            };
            names.insert(app.clone(), format!("{number:04}_{suffix}"));
        }

        let mut migrations = Vec::new();
        for (app, ops) in self.apps {
            let Some(name) = names.get(&app) else {
                continue;
            };
            let mut migration = Migration::new(&app, name).initial(!leaves.contains_key(&app));
            if let Some(leaf) = leaves.get(&app) {
                migration = migration.with_dependency(&app, leaf);
            }

            let mut other_apps = BTreeSet::new();
            for op in &ops {
                if let MigrationOperation::CreateModel { model } = op {
                    for target in model.fields.iter().filter_map(|f| f.relation.as_ref()) {
                        if target.app_label != app {
                            other_apps.insert(target.app_label.clone());
                        }
                    }
                }
            }
            for other in other_apps {
                if let Some(dep) = names.get(&other).or_else(|| leaves.get(&other)) {
                    migration = migration.with_dependency(&other, dep);
                }
            }

            migrations.push(migration.with_operations(ops));
        }
        migrations
    }
}

/// Leading number of a migration name: 3 for `0003_auto`.
fn migration_number(name: &str) -> u32 {
    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Diffs two snapshots.
pub struct Autodetector<'a> {
    from: &'a ProjectState,
    to: &'a ProjectState,
    passes: Vec<Box<dyn DiffPass + 'a>>,
    detect_renames: bool,
}

impl<'a> Autodetector<'a> {
    /// A detector running the constraint pass, with rename detection as
    /// configured in `to`.
    pub fn new(from: &'a ProjectState, to: &'a ProjectState) -> Self {
        Self {
            from,
            to,
            passes: vec![Box::new(ConstraintPass)],
            detect_renames: to.config().detect_renames(),
        }
    }

    /// Register an additional pass. Passes run in registration order.
    pub fn with_pass(mut self, pass: impl DiffPass + 'a) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn detect_renames(mut self, enabled: bool) -> Self {
        self.detect_renames = enabled;
        self
    }

    pub fn changes(&self) -> Changes {
        let mut apps: BTreeSet<&str> = BTreeSet::new();
        apps.extend(self.from.models().map(|m| m.app_label.as_str()));
        apps.extend(self.to.models().map(|m| m.app_label.as_str()));

        let mut changes = Changes::default();
        for app in apps {
            let ops = self.app_changes(app);
            for op in &ops {
                info!(app, operation = %op.describe(), "detected change");
            }
            if !ops.is_empty() {
                changes.apps.insert(app.to_string(), ops);
            }
        }
        changes
    }

    fn app_changes(&self, app: &str) -> Vec<MigrationOperation> {
        let models = |state: &'a ProjectState| -> BTreeMap<ModelKey, &'a ModelState> {
            state
                .models()
                .filter(|m| m.app_label == app)
                .map(|m| (m.key(), m))
                .collect()
        };
        let before = models(self.from);
        let after = models(self.to);

        let mut deleted: Vec<&ModelState> = before
            .iter()
            .filter(|(key, _)| !after.contains_key(key))
            .map(|(_, m)| *m)
            .collect();
        let mut created: Vec<&ModelState> = after
            .iter()
            .filter(|(key, _)| !before.contains_key(key))
            .map(|(_, m)| *m)
            .collect();
        let mut kept: Vec<(&ModelState, &ModelState)> = after
            .iter()
            .filter_map(|(key, new)| before.get(key).map(|old| (*old, *new)))
            .collect();

        let mut ops = Vec::new();

        if self.detect_renames {
            for (old, new) in detect_renames(&deleted, &created) {
                debug!(from = %old.key(), to = %new.key(), "detected model rename");
                ops.push(MigrationOperation::rename_model(&old.name, &new.name));
                deleted.retain(|m| m.key() != old.key());
                created.retain(|m| m.key() != new.key());
                kept.push((old, new));
            }
            kept.sort_by_key(|(_, new)| new.key());
        }

        for model in creation_order(&created) {
            ops.push(MigrationOperation::create_model(model.without_constraints()));
            for pass in &self.passes {
                pass.created_model(model, &mut ops);
            }
        }

        for (old, new) in kept {
            for pass in &self.passes {
                pass.kept_model(old, new, &mut ops);
            }
        }

        // Referencing models go first
        for model in creation_order(&deleted).into_iter().rev() {
            ops.push(MigrationOperation::delete_model(&model.name));
        }

        ops
    }
}

/// Order models so foreign key targets precede the models pointing at
/// them. Independent models keep their (sorted) input order.
fn creation_order<'m>(models: &[&'m ModelState]) -> Vec<&'m ModelState> {
    let keys: HashSet<ModelKey> = models.iter().map(|m| m.key()).collect();
    let mut placed: HashSet<ModelKey> = HashSet::new();
    let mut ordered = Vec::with_capacity(models.len());

    while ordered.len() < models.len() {
        let ready = models.iter().find(|m| {
            !placed.contains(&m.key())
                && m.fields
                    .iter()
                    .filter_map(|f| f.relation.as_ref())
                    .all(|target| {
                        !keys.contains(target) || placed.contains(target) || *target == m.key()
                    })
        });
        // A cycle: fall back to input order for what remains
        let next = match ready {
            Some(model) => *model,
            None => match models.iter().find(|m| !placed.contains(&m.key())) {
                Some(model) => *model,
                None => break,
            },
        };
        placed.insert(next.key());
        ordered.push(next);
    }
    ordered
}

/// Whether two names are plural/singular variants of each other:
/// `authors`/`author`, `ponies`/`pony`, `pizza_toppings`/`pizza_topping`.
///
/// Irregular plurals (`people`/`person`) are not detected.
fn is_plural_singular_pair(a: &str, b: &str) -> bool {
    // The longer one is the likely plural
    let (plural, singular) = if a.len() > b.len() { (a, b) } else { (b, a) };

    if plural == format!("{singular}s") {
        return true;
    }

    // "ponies" -> "pony"
    if let (Some(plural_stem), Some(singular_stem)) =
        (plural.strip_suffix("ies"), singular.strip_suffix('y'))
        && plural_stem == singular_stem
    {
        return true;
    }

    false
}

/// Similarity between two models (0.0 to 1.0).
fn model_similarity(a: &ModelState, b: &ModelState) -> f64 {
    let mut score = 0.0;

    if is_plural_singular_pair(&a.name_lower(), &b.name_lower()) {
        score += 0.3;
    }

    let a_cols: HashSet<String> = a.fields.iter().map(|f| f.column()).collect();
    let b_cols: HashSet<String> = b.fields.iter().map(|f| f.column()).collect();
    let union = a_cols.union(&b_cols).count();
    if union > 0 {
        let jaccard = a_cols.intersection(&b_cols).count() as f64 / union as f64;
        score += 0.7 * jaccard;
    }

    score
}

/// Pair deleted and created models that are likely renames.
fn detect_renames<'m>(
    deleted: &[&'m ModelState],
    created: &[&'m ModelState],
) -> Vec<(&'m ModelState, &'m ModelState)> {
    const RENAME_THRESHOLD: f64 = 0.6;

    let mut candidates = Vec::new();
    for (i, old) in deleted.iter().enumerate() {
        for (j, new) in created.iter().enumerate() {
            let sim = model_similarity(old, new);
            if sim >= RENAME_THRESHOLD {
                candidates.push((sim, i, j));
            }
        }
    }
    // Stable sort keeps ties in snapshot order
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut used_old = HashSet::new();
    let mut used_new = HashSet::new();
    let mut renames = Vec::new();
    for (_, i, j) in candidates {
        if !used_old.contains(&i) && !used_new.contains(&j) {
            used_old.insert(i);
            used_new.insert(j);
            renames.push((deleted[i], created[j]));
        }
    }
    renames
}
