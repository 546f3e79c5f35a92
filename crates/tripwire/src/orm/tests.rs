use super::*;
use crate::chain::{ExpressionChain, M, count, exists, f, q, raw_sql};
use crate::state::{Field, PgType};
use tripwire_sql::SqlValue;

fn shop() -> ProjectState {
    let topping = ModelState::new("shop", "Topping")
        .with_field(Field::auto("id"))
        .with_field(Field::new("name", PgType::Varchar(100)));
    let pizza = ModelState::new("shop", "Pizza")
        .with_field(Field::auto("id"))
        .with_field(Field::new("name", PgType::Varchar(100)))
        .with_field(Field::new("size", PgType::Integer));
    let pizza_topping = ModelState::new("shop", "PizzaTopping")
        .with_field(Field::auto("id"))
        .with_field(Field::foreign_key("pizza", ModelKey::new("shop", "Pizza")))
        .with_field(Field::foreign_key("topping", ModelKey::new("shop", "Topping")));
    let swap = ModelState::new("shop", "Swap")
        .with_field(Field::auto("id"))
        .with_field(Field::foreign_key("from_topping", ModelKey::new("shop", "Topping")))
        .with_field(Field::foreign_key("to_topping", ModelKey::new("shop", "Topping")));
    let age = ModelState::new("app", "Age")
        .with_field(Field::auto("id"))
        .with_field(Field::new("age", PgType::Integer))
        .with_field(Field::new("nickname", PgType::Text).nullable());

    let mut state = ProjectState::default();
    for model in [topping, pizza, pizza_topping, swap, age] {
        state.add_model(model).unwrap();
    }
    state
}

fn compile_on(state: &ProjectState, model: &str, chain: ExpressionChain) -> Result<RenderedSql> {
    let app = if model == "Age" { "app" } else { "shop" };
    chain.compile(&Orm::new(state), ModelRef::new(app, model))
}

fn compile(model: &str, chain: ExpressionChain) -> RenderedSql {
    compile_on(&shop(), model, chain).unwrap()
}

#[test]
fn test_filter_by_pk() {
    let sql = compile("Pizza", M::new().objects().filter([("pk", 1)]).finish());
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_pizza".*
    FROM "shop_pizza"
    WHERE "shop_pizza"."id" = $1
    "#);
    assert_eq!(sql.values, vec![SqlValue::Int(1)]);
}

#[test]
fn test_at_most_five_toppings() {
    let chain = M::model("PizzaTopping")
        .objects()
        .values(["pizza"])
        .annotate([("num_toppings", count("topping"))])
        .filter([("num_toppings__gt", 5)])
        .finish();

    let sql = compile("Pizza", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_pizzatopping"."pizza_id", COUNT("shop_pizzatopping"."topping_id") AS "num_toppings"
    FROM "shop_pizzatopping"
    GROUP BY "shop_pizzatopping"."pizza_id"
    HAVING COUNT("shop_pizzatopping"."topping_id") > $1
    "#);
    assert_eq!(sql.values, vec![SqlValue::Int(5)]);
}

#[test]
fn test_no_pineapple_joins_topping() {
    let chain = M::model("PizzaTopping")
        .objects()
        .filter([("topping__name", "Pineapple")])
        .finish();

    let sql = compile("Pizza", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_pizzatopping".*
    FROM "shop_pizzatopping"
    INNER JOIN "shop_topping" ON "shop_pizzatopping"."topping_id" = "shop_topping"."id"
    WHERE "shop_topping"."name" = $1
    "#);
}

#[test]
fn test_foreign_key_pk_reads_local_column() {
    let by_id = compile(
        "PizzaTopping",
        M::new().objects().filter([("pizza__id", 3)]).finish(),
    );
    let by_fk = compile(
        "PizzaTopping",
        M::new().objects().filter([("pizza", 3)]).finish(),
    );
    let expected = "SELECT \"shop_pizzatopping\".*\nFROM \"shop_pizzatopping\"\nWHERE \"shop_pizzatopping\".\"pizza_id\" = $1";
    assert_eq!(by_id.sql, expected);
    assert_eq!(by_fk.sql, expected);
}

#[test]
fn test_second_join_to_same_table_is_aliased() {
    let chain = M::new()
        .objects()
        .filter([("to_topping__name", "b"), ("from_topping__name", "a")])
        .finish();

    let sql = compile("Swap", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_swap".*
    FROM "shop_swap"
    INNER JOIN "shop_topping" ON "shop_swap"."from_topping_id" = "shop_topping"."id"
    INNER JOIN "shop_topping" "T3" ON "shop_swap"."to_topping_id" = "T3"."id"
    WHERE "shop_topping"."name" = $1 AND "T3"."name" = $2
    "#);
    assert_eq!(
        sql.values,
        vec![SqlValue::Text("a".into()), SqlValue::Text("b".into())]
    );
}

#[test]
fn test_q_combinators() {
    let chain = M::new()
        .objects()
        .filter_q(q([("size__gt", 30)]) | !q([("name", "Hawaii")]))
        .finish();
    let sql = compile("Pizza", chain);
    assert_eq!(
        sql.sql,
        "SELECT \"shop_pizza\".*\nFROM \"shop_pizza\"\nWHERE \"shop_pizza\".\"size\" > $1 OR NOT (\"shop_pizza\".\"name\" = $2)"
    );
}

#[test]
fn test_exclude_negates_sorted_lookups() {
    let chain = M::new()
        .objects()
        .exclude([("size", 1)])
        .exclude([("size", 2), ("name", "x")])
        .finish();
    let sql = compile("Pizza", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_pizza".*
    FROM "shop_pizza"
    WHERE NOT ("shop_pizza"."size" = $1) AND NOT ("shop_pizza"."name" = $2 AND "shop_pizza"."size" = $3)
    "#);
}

#[test]
fn test_in_subquery_gets_own_aliases() {
    let pineapple_pizzas = M::model("PizzaTopping")
        .objects()
        .filter([("topping__name", "Pineapple")])
        .values(["pizza"]);
    let chain = M::new()
        .objects()
        .filter([("id__in", pineapple_pizzas)])
        .finish();

    let sql = compile("Pizza", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_pizza".*
    FROM "shop_pizza"
    WHERE "shop_pizza"."id" IN (SELECT "U0"."pizza_id"
    FROM "shop_pizzatopping" "U0"
    INNER JOIN "shop_topping" "U1" ON "U0"."topping_id" = "U1"."id"
    WHERE "U1"."name" = $1)
    "#);
}

#[test]
fn test_exists_annotation_with_raw_sql() {
    let chain = M::new()
        .objects()
        .annotate([(
            "collision",
            exists(M::new().objects().filter([("age", raw_sql("NEW.age"))])),
        )])
        .filter([("collision", true)])
        .finish();

    let sql = compile("Age", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "app_age".*, EXISTS (SELECT 1
    FROM "app_age" "U0"
    WHERE "U0"."age" = NEW.age) AS "collision"
    FROM "app_age"
    WHERE EXISTS (SELECT 1
    FROM "app_age" "U0"
    WHERE "U0"."age" = NEW.age) = $1
    "#);
    assert_eq!(sql.values, vec![SqlValue::Bool(true)]);
}

#[test]
fn test_range_in_and_null_lookups() {
    let chain = M::new()
        .objects()
        .filter_q(q([("age__range", vec![1, 10])]) | q([("age__in", vec![20, 30])]))
        .filter([("nickname__isnull", false)])
        .finish();

    let sql = compile("Age", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "app_age".*
    FROM "app_age"
    WHERE (("app_age"."age" >= $1 AND "app_age"."age" <= $2) OR "app_age"."age" IN ($3, $4)) AND "app_age"."nickname" IS NOT NULL
    "#);
    assert_eq!(sql.values.len(), 4);
}

#[test]
fn test_empty_in_list_matches_nothing() {
    let empty: Vec<i64> = Vec::new();
    let sql = compile("Age", M::new().objects().filter([("age__in", empty)]).finish());
    assert!(sql.sql.ends_with("WHERE FALSE"));
}

#[test]
fn test_f_expression_and_pattern_lookups() {
    let chain = M::new()
        .objects()
        .filter([("size__lt", f("id"))])
        .filter([("name__icontains", "ham")])
        .finish();
    let sql = compile("Pizza", chain);
    assert_eq!(
        sql.sql,
        "SELECT \"shop_pizza\".*\nFROM \"shop_pizza\"\nWHERE \"shop_pizza\".\"size\" < \"shop_pizza\".\"id\" AND \"shop_pizza\".\"name\" ILIKE $1"
    );
    assert_eq!(sql.values, vec![SqlValue::Text("%ham%".into())]);
}

#[test]
fn test_slicing_and_ordering() {
    let sql = compile(
        "Pizza",
        M::new()
            .objects()
            .order_by(["-size", "name"])
            .distinct()
            .slice(crate::chain::SliceSpec {
                start: Some(1),
                ..Default::default()
            })
            .finish(),
    );
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT DISTINCT "shop_pizza".*
    FROM "shop_pizza"
    ORDER BY "shop_pizza"."size" DESC, "shop_pizza"."name" ASC
    OFFSET 1
    "#);

    let first = compile("Pizza", M::new().objects().all().index(0).finish());
    assert!(first.sql.ends_with("\nLIMIT 1"));
}

#[test]
fn test_values_with_aggregate_groups_by_pk() {
    let chain = M::model("Pizza")
        .objects()
        .annotate([("biggest", crate::chain::max("size"))])
        .finish();
    let sql = compile("Pizza", chain);
    insta::assert_snapshot!(sql.sql, @r#"
    SELECT "shop_pizza".*, MAX("shop_pizza"."size") AS "biggest"
    FROM "shop_pizza"
    GROUP BY "shop_pizza"."id"
    "#);
}

#[test]
fn test_check_compiles_unqualified() {
    let state = shop();
    let pizza = state.model("shop", "Pizza").unwrap();
    let orm = Orm::new(&state);

    let check = orm
        .compile_check(pizza, &!q([("name", "Anchovies")]))
        .unwrap();
    assert_eq!(check, r#"NOT ("name" = 'Anchovies')"#);

    let check = orm
        .compile_check(pizza, &(q([("size__gte", 20)]) & q([("size__lte", 50)])))
        .unwrap();
    assert_eq!(check, r#""size" >= 20 AND "size" <= 50"#);
}

#[test]
fn test_check_rejects_joins_and_non_q() {
    let state = shop();
    let orm = Orm::new(&state);
    let pt = state.model("shop", "PizzaTopping").unwrap();

    let err = orm
        .compile_check(pt, &q([("topping__name", "Anchovies")]))
        .unwrap_err();
    assert!(matches!(err, Error::Replay(_)));

    let err = orm.compile_check(pt, &Value::Int(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidExpressionType { .. }));
}

#[test]
fn test_replay_errors() {
    let state = shop();

    let err = compile_on(
        &state,
        "Pizza",
        M::new().objects().filter([("colour", "red")]).finish(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::FieldNotFound { .. }));

    let err = compile_on(
        &state,
        "Pizza",
        M::new().objects().filter([("size__regex", "1+")]).finish(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedLookup { .. }));

    let err = compile_on(&state, "Pizza", M::new().attr("manager").finish()).unwrap_err();
    assert!(matches!(err, Error::Replay(_)));

    let err = compile_on(&state, "Calzone", M::new().objects().finish()).unwrap_err();
    assert!(matches!(err, Error::ModelNotFound { .. }));

    let err = compile_on(&state, "Pizza", M::new().finish()).unwrap_err();
    assert!(matches!(err, Error::InvalidExpressionType { .. }));
}

#[test]
fn test_manager_compiles_as_all() {
    let manager = compile("Pizza", M::new().objects().finish());
    let all = compile("Pizza", M::new().objects().all().finish());
    assert_eq!(manager, all);
}
