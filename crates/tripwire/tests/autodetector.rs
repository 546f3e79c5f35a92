//! Snapshot diffing, end to end: from declared models to arranged migrations.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use proptest::prelude::*;
use tripwire::{
    Autodetector, Constraint, Deconstruct, Deferred, ExpressionChain, Field, IndexKey, Kwargs, M,
    Migration, MigrationOperation, ModelKey, ModelState, Operation, PgType, ProjectState,
    Reconstruct, SliceSpec, Value, constructors,
};

fn author() -> ModelState {
    ModelState::new("test_app", "Author")
        .with_field(Field::auto("id"))
        .with_field(Field::new("name", PgType::Text))
}

fn pk_is(pk: i64, name: &str) -> Constraint {
    Constraint::queryset(M::new().objects().filter([("pk", pk)]), name).unwrap()
}

fn state(models: impl IntoIterator<Item = ModelState>) -> ProjectState {
    let mut state = ProjectState::default();
    for model in models {
        state.add_model(model).unwrap();
    }
    state
}

fn leaves(items: &[(&str, &str)]) -> IndexMap<String, String> {
    items
        .iter()
        .map(|(app, name)| (app.to_string(), name.to_string()))
        .collect()
}

#[test]
fn test_add_constraint() {
    let from = state([author()]);
    let to = state([author().with_constraint(pk_is(1, "1"))]);

    let changes = Autodetector::new(&from, &to).changes();
    assert_eq!(
        changes.operations("test_app"),
        [MigrationOperation::add_constraint("author", pk_is(1, "1"))]
    );

    let migrations = changes.arrange(&leaves(&[("test_app", "0001_initial")]));
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0].name, "0002_author_1");
    assert!(!migrations[0].initial);
    assert_eq!(
        migrations[0].dependencies,
        [("test_app".to_string(), "0001_initial".to_string())]
    );
}

#[test]
fn test_rename_constraint() {
    let from = state([author().with_constraint(pk_is(1, "id cannot be 1"))]);
    let to = state([author().with_constraint(pk_is(1, "1"))]);

    let changes = Autodetector::new(&from, &to).changes();
    assert_eq!(
        changes.operations("test_app"),
        [
            MigrationOperation::remove_constraint("author", "id cannot be 1"),
            MigrationOperation::add_constraint("author", pk_is(1, "1")),
        ]
    );
}

#[test]
fn test_change_constraint_query() {
    let from = state([author().with_constraint(pk_is(1, "1"))]);
    let to = state([author().with_constraint(pk_is(2, "1"))]);

    let ops = Autodetector::new(&from, &to).changes().apps["test_app"].clone();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0], MigrationOperation::remove_constraint("author", "1"));
    let MigrationOperation::AddConstraint { constraint, .. } = &ops[1] else {
        panic!("expected AddConstraint, got {:?}", ops[1]);
    };
    assert_eq!(constraint, &pk_is(2, "1"));
    assert_ne!(constraint, &pk_is(1, "1"));

    let migrations = Autodetector::new(&from, &to)
        .changes()
        .arrange(&leaves(&[("test_app", "0002_author_1")]));
    assert_eq!(migrations[0].name, "0003_auto");
}

#[test]
fn test_new_model_with_constraint() {
    let to = state([author().with_constraint(pk_is(1, "1"))]);

    let migrations = Autodetector::new(&ProjectState::default(), &to)
        .changes()
        .arrange(&IndexMap::new());
    assert_eq!(migrations.len(), 1);

    let migration = &migrations[0];
    assert_eq!(migration.name, "0001_initial");
    assert!(migration.initial);
    assert!(migration.dependencies.is_empty());
    assert_eq!(
        migration.operations,
        [
            MigrationOperation::create_model(author()),
            MigrationOperation::add_constraint("Author", pk_is(1, "1")),
        ]
    );

    // Applying it reproduces the target snapshot
    let mut applied = ProjectState::default();
    migration.mutate_state(&mut applied).unwrap();
    assert_eq!(applied, to);
}

#[test]
fn test_unchanged_models_produce_nothing() {
    let snapshot = state([author().with_constraint(pk_is(1, "1"))]);
    let changes = Autodetector::new(&snapshot, &snapshot.clone()).changes();
    assert!(changes.is_empty());
    assert!(changes.arrange(&IndexMap::new()).is_empty());
}

#[test]
fn test_deleted_model() {
    let from = state([author().with_constraint(pk_is(1, "1"))]);
    let to = ProjectState::default();

    let changes = Autodetector::new(&from, &to).changes();
    assert_eq!(
        changes.operations("test_app"),
        [MigrationOperation::delete_model("Author")]
    );
    let migrations = changes.arrange(&leaves(&[("test_app", "0001_initial")]));
    assert_eq!(migrations[0].name, "0002_delete_author");
}

#[test]
fn test_models_created_before_their_dependents() {
    let book = ModelState::new("test_app", "Book")
        .with_field(Field::auto("id"))
        .with_field(Field::foreign_key("author", ModelKey::new("test_app", "Author")));
    let to = state([book.clone(), author()]);

    let ops = Autodetector::new(&ProjectState::default(), &to)
        .changes()
        .apps["test_app"]
        .clone();
    assert_eq!(
        ops,
        [
            MigrationOperation::create_model(author()),
            MigrationOperation::create_model(book),
        ]
    );

    let deleted = Autodetector::new(&to, &ProjectState::default())
        .changes()
        .apps["test_app"]
        .clone();
    assert_eq!(
        deleted,
        [
            MigrationOperation::delete_model("Book"),
            MigrationOperation::delete_model("Author"),
        ]
    );
}

#[test]
fn test_cross_app_dependencies() {
    let review = ModelState::new("reviews", "Review")
        .with_field(Field::auto("id"))
        .with_field(Field::foreign_key("author", ModelKey::new("test_app", "Author")));
    let to = state([author(), review]);

    let migrations = Autodetector::new(&ProjectState::default(), &to)
        .changes()
        .arrange(&IndexMap::new());
    let by_app: BTreeMap<&str, &Migration> = migrations
        .iter()
        .map(|m| (m.app_label.as_str(), m))
        .collect();

    assert_eq!(
        by_app["reviews"].dependencies,
        [("test_app".to_string(), "0001_initial".to_string())]
    );
    assert!(by_app["test_app"].dependencies.is_empty());
}

#[test]
fn test_rename_detection() {
    let horse = |name: &str| {
        ModelState::new("test_app", name)
            .with_field(Field::auto("id"))
            .with_field(Field::new("name", PgType::Text))
            .with_constraint(pk_is(1, "1"))
    };
    let from = state([horse("Horse")]);
    let to = state([horse("Horses")]);

    let detected = Autodetector::new(&from, &to).detect_renames(true).changes();
    assert_eq!(
        detected.operations("test_app"),
        [MigrationOperation::rename_model("Horse", "Horses")]
    );

    // Off by default
    let plain = Autodetector::new(&from, &to).changes();
    assert_eq!(
        plain.operations("test_app"),
        [
            MigrationOperation::create_model(horse("Horses").without_constraints()),
            MigrationOperation::add_constraint("Horses", pk_is(1, "1")),
            MigrationOperation::delete_model("Horse"),
        ]
    );
}

#[test]
fn test_dissimilar_models_are_not_renamed() {
    let from = state([author()]);
    let to = state([ModelState::new("test_app", "Invoice")
        .with_field(Field::auto("id"))
        .with_field(Field::new("total", PgType::BigInt))
        .with_field(Field::new("issued", PgType::Text))]);

    let ops = Autodetector::new(&from, &to)
        .detect_renames(true)
        .changes()
        .apps["test_app"]
        .clone();
    assert!(matches!(ops[0], MigrationOperation::CreateModel { .. }));
    assert_eq!(ops[1], MigrationOperation::delete_model("Author"));
}

/// Constraints on the author model, keyed by name, each forbidding one pk.
fn constraint_sets() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-z]{1,6}", 0i64..4, 0..5)
}

fn with_constraints(constraints: &BTreeMap<String, i64>) -> ProjectState {
    let mut model = author();
    for (name, pk) in constraints {
        model = model.with_constraint(pk_is(*pk, name));
    }
    state([model])
}

/// `(model, constraint name)` of every added constraint, or of every removed
/// one when `added` is false.
fn constraint_ops(ops: &[MigrationOperation], added: bool) -> BTreeSet<(String, String)> {
    ops.iter()
        .filter_map(|op| match op {
            MigrationOperation::AddConstraint {
                model_name,
                constraint,
            } if added => Some((model_name.clone(), constraint.name().to_string())),
            MigrationOperation::RemoveConstraint { model_name, name } if !added => {
                Some((model_name.clone(), name.clone()))
            }
            _ => None,
        })
        .collect()
}

fn recorded_values() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z_]{0,8}".prop_map(Value::Str),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        let inner = inner.boxed();
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Value::List),
            (
                prop::sample::select(vec![
                    constructors::Q,
                    constructors::Q_AND,
                    constructors::Q_OR,
                    constructors::Q_NOT,
                    constructors::F,
                    constructors::COUNT,
                    constructors::RAW_SQL,
                    constructors::EXISTS,
                ]),
                prop::collection::vec(inner.clone(), 0..3),
                recorded_kwargs(inner.clone()),
            )
                .prop_map(|(constructor, args, kwargs)| {
                    Value::from(Deferred::new(constructor, args, kwargs))
                }),
            recorded_chains(inner).prop_map(Value::from),
        ]
    })
}

fn recorded_kwargs(values: BoxedStrategy<Value>) -> impl Strategy<Value = Kwargs> {
    prop::collection::vec(("[a-z_]{1,10}", values), 0..3)
        .prop_map(|pairs| pairs.into_iter().collect::<Kwargs>())
}

fn recorded_operations(values: BoxedStrategy<Value>) -> impl Strategy<Value = Operation> {
    let slices = (
        proptest::option::of(any::<i64>()),
        proptest::option::of(any::<i64>()),
        proptest::option::of(any::<i64>()),
    )
        .prop_map(|(start, stop, step)| IndexKey::Slice(SliceSpec { start, stop, step }));
    prop_oneof![
        "[a-z_]{1,10}".prop_map(|name| Operation::GetAttribute { name }),
        (
            prop::collection::vec(values.clone(), 0..3),
            recorded_kwargs(values.clone()),
        )
            .prop_map(|(args, kwargs)| Operation::Call { args, kwargs }),
        values.prop_map(|key| Operation::Index {
            key: IndexKey::Value(key),
        }),
        slices.prop_map(|key| Operation::Index { key }),
    ]
}

fn recorded_chains(values: BoxedStrategy<Value>) -> impl Strategy<Value = ExpressionChain> {
    (
        proptest::option::of("[A-Z][a-z]{0,8}"),
        proptest::option::of("[a-z_]{1,8}"),
        prop::collection::vec(recorded_operations(values), 0..6),
    )
        .prop_map(|(model_name, app_label, operations)| {
            ExpressionChain::from_operations(model_name, app_label, operations)
        })
}

proptest! {
    #[test]
    fn prop_diff_of_a_snapshot_with_itself_is_empty(constraints in constraint_sets()) {
        let snapshot = with_constraints(&constraints);
        prop_assert!(Autodetector::new(&snapshot, &snapshot).changes().is_empty());
    }

    #[test]
    fn prop_applying_changes_reaches_target(
        before in constraint_sets(),
        after in constraint_sets(),
    ) {
        let from = with_constraints(&before);
        let to = with_constraints(&after);

        let ops = Autodetector::new(&from, &to).changes().operations("test_app").to_vec();
        let mut applied = from.clone();
        Migration::new("test_app", "0002_auto")
            .with_operations(ops)
            .mutate_state(&mut applied)
            .unwrap();

        prop_assert!(Autodetector::new(&applied, &to).changes().is_empty());
    }

    #[test]
    fn prop_additions_mirror_removals(
        before in constraint_sets(),
        after in constraint_sets(),
    ) {
        let a = with_constraints(&before);
        let b = with_constraints(&after);

        let forwards = Autodetector::new(&a, &b).changes();
        let backwards = Autodetector::new(&b, &a).changes();
        prop_assert_eq!(
            constraint_ops(forwards.operations("test_app"), true),
            constraint_ops(backwards.operations("test_app"), false)
        );
        prop_assert_eq!(
            constraint_ops(forwards.operations("test_app"), false),
            constraint_ops(backwards.operations("test_app"), true)
        );
    }

    #[test]
    fn prop_recorded_chains_survive_deconstruction(
        chain in recorded_chains(recorded_values().boxed()),
        name in "[a-z0-9 ]{1,12}",
    ) {
        let rebuilt = ExpressionChain::reconstruct(&chain.deconstruct()).unwrap();
        prop_assert_eq!(&rebuilt, &chain);
        prop_assert_eq!(rebuilt.deconstruct(), chain.deconstruct());

        let constraint = Constraint::queryset(chain, name).unwrap();
        prop_assert_eq!(
            Constraint::reconstruct(&constraint.deconstruct()).unwrap(),
            constraint
        );
    }

    #[test]
    fn prop_constraints_survive_deconstruction(name in "[a-zA-Z0-9' ]{1,20}", value in ".{0,20}") {
        let snapshot = state([author()]);
        let model = snapshot.model("test_app", "Author").unwrap();
        let constraint = Constraint::queryset(
            M::new().objects().filter([("name", value.as_str())]).exclude([("pk", 1)]),
            name,
        )
        .unwrap();

        let rebuilt = Constraint::reconstruct(&constraint.deconstruct()).unwrap();
        prop_assert_eq!(&rebuilt, &constraint);
        prop_assert_eq!(
            rebuilt.install_sql(&snapshot, model).unwrap(),
            constraint.install_sql(&snapshot, model).unwrap()
        );
    }
}
