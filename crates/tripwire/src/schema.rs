//! Table DDL for model operations.

use tripwire_sql::quote_ident;

use crate::state::{ModelState, ProjectState};
use crate::{Error, Result};

/// Generate a CREATE TABLE statement for a model.
///
/// Foreign keys reference the target's primary key and take its type;
/// the target must be part of `state`.
pub fn create_table_sql(state: &ProjectState, model: &ModelState) -> Result<String> {
    let mut sql = format!("CREATE TABLE {} (\n", quote_ident(&model.db_table()));

    let pk_columns: Vec<String> = model
        .fields
        .iter()
        .filter(|f| f.primary_key)
        .map(|f| f.column())
        .collect();

    // More than one PK column needs a table constraint
    let use_table_pk_constraint = pk_columns.len() > 1;

    let mut parts = Vec::with_capacity(model.fields.len() + 1);
    for field in &model.fields {
        let mut pg_type = field.pg_type;
        let mut references = None;
        if let Some(target_key) = &field.relation {
            let target = state.get(target_key).ok_or_else(|| {
                Error::model_not_found(&target_key.app_label, &target_key.model_name)
            })?;
            let target_pk = target.pk().ok_or_else(|| {
                Error::Replay(format!("model {target_key} has no primary key"))
            })?;
            pg_type = target_pk.pg_type.referenced_as();
            references = Some(format!(
                " REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
                quote_ident(&target.db_table()),
                quote_ident(&target_pk.column())
            ));
        }

        let mut def = format!("    {} {}", quote_ident(&field.column()), pg_type);

        if field.primary_key && !use_table_pk_constraint {
            def.push_str(" PRIMARY KEY");
        }

        // PK columns are implicitly NOT NULL, except in a composite key
        if !field.nullable && (!field.primary_key || use_table_pk_constraint) {
            def.push_str(" NOT NULL");
        }

        if field.unique && !field.primary_key {
            def.push_str(" UNIQUE");
        }

        if let Some(default) = &field.default {
            def.push_str(&format!(" DEFAULT {default}"));
        }

        if let Some(references) = references {
            def.push_str(&references);
        }

        parts.push(def);
    }

    if use_table_pk_constraint {
        let quoted: Vec<_> = pk_columns.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("    PRIMARY KEY ({})", quoted.join(", ")));
    }

    sql.push_str(&parts.join(",\n"));
    sql.push_str("\n);");
    Ok(sql)
}

/// Drop a model's table, along with anything depending on it.
pub fn drop_table_sql(model: &ModelState) -> String {
    format!("DROP TABLE {} CASCADE;", quote_ident(&model.db_table()))
}

pub fn rename_table_sql(from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {};",
        quote_ident(from),
        quote_ident(to)
    )
}
