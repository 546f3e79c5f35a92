//! Trigger and function DDL for queryset constraints.

use tracing::info;
use tripwire_config::Config;
use tripwire_sql::{Lit, TriggerNames, quote_ident, trigger_names};

use crate::Result;
use crate::executor::{SchemaExecutor, run_all};

/// How triggers are generated. Built from the schema [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOptions {
    pub error_message: String,
    /// `CREATE CONSTRAINT TRIGGER .. DEFERRABLE INITIALLY DEFERRED` when
    /// set, a plain row trigger otherwise.
    pub deferrable: bool,
    pub name_prefix: String,
}

impl TriggerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            error_message: config.error_message().to_string(),
            deferrable: config.deferrable(),
            name_prefix: config.name_prefix().to_string(),
        }
    }

    pub fn names(&self, constraint_name: &str, table: &str) -> TriggerNames {
        trigger_names(&self.name_prefix, constraint_name, table)
    }
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Choose a dollar-quote tag that does not occur in the body.
fn dollar_tag(body: &str) -> String {
    ["$$".to_string(), "$tw$".to_string()]
        .into_iter()
        .chain((1u32..).map(|n| format!("$tw{n}$")))
        .find(|tag| !body.contains(tag.as_str()))
        .unwrap_or_default()
}

/// Statements installing a trigger that raises when `predicate_sql`
/// returns any row.
pub fn install_sql(
    constraint_name: &str,
    predicate_sql: &str,
    table: &str,
    options: &TriggerOptions,
) -> Vec<String> {
    let names = options.names(constraint_name, table);
    let predicate = predicate_sql
        .lines()
        .map(|line| format!("        {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    // RAISE treats % as a placeholder
    let message = Lit(options.error_message.replace('%', "%%")).to_string();
    let tag = dollar_tag(&format!("{predicate}\n{message}"));

    let function = format!(
        "CREATE FUNCTION {function}() RETURNS TRIGGER AS {tag}\n\
         BEGIN\n    \
             IF EXISTS (\n\
         {predicate}\n    \
             ) THEN\n        \
                 RAISE EXCEPTION {message} USING ERRCODE = 'check_violation';\n    \
             END IF;\n    \
             RETURN NULL;\n\
         END\n\
         {tag} LANGUAGE plpgsql;",
        function = quote_ident(&names.function),
    );

    let trigger = if options.deferrable {
        format!(
            "CREATE CONSTRAINT TRIGGER {} AFTER INSERT OR UPDATE ON {} DEFERRABLE INITIALLY DEFERRED FOR EACH ROW EXECUTE PROCEDURE {}();",
            quote_ident(&names.trigger),
            quote_ident(table),
            quote_ident(&names.function),
        )
    } else {
        format!(
            "CREATE TRIGGER {} AFTER INSERT OR UPDATE ON {} FOR EACH ROW EXECUTE PROCEDURE {}();",
            quote_ident(&names.trigger),
            quote_ident(table),
            quote_ident(&names.function),
        )
    };

    vec![function, trigger]
}

/// Statements removing what [`install_sql`] created.
pub fn uninstall_sql(constraint_name: &str, table: &str, options: &TriggerOptions) -> Vec<String> {
    let names = options.names(constraint_name, table);
    vec![
        format!(
            "DROP TRIGGER {} ON {};",
            quote_ident(&names.trigger),
            quote_ident(table)
        ),
        format!("DROP FUNCTION {}();", quote_ident(&names.function)),
    ]
}

/// Install the trigger for a constraint. DDL errors propagate unchanged.
pub async fn install(
    executor: &dyn SchemaExecutor,
    constraint_name: &str,
    predicate_sql: &str,
    table: &str,
    options: &TriggerOptions,
) -> Result<()> {
    run_all(executor, &install_sql(constraint_name, predicate_sql, table, options)).await?;
    info!(constraint = constraint_name, table, "installed constraint trigger");
    Ok(())
}

pub async fn uninstall(
    executor: &dyn SchemaExecutor,
    constraint_name: &str,
    table: &str,
    options: &TriggerOptions,
) -> Result<()> {
    run_all(executor, &uninstall_sql(constraint_name, table, options)).await?;
    info!(constraint = constraint_name, table, "removed constraint trigger");
    Ok(())
}
