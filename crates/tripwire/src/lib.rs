//! Database-enforced invariants for Postgres, expressed as deferred queries.
//!
//! A constraint names a query that must never return a row. It is recorded
//! as an [`ExpressionChain`] while the schema is being declared, stored in a
//! migration in deconstructed form, and at apply time replayed against the
//! live schema, compiled to SQL and installed as a row-level trigger:
//!
//! ```
//! use tripwire::{Constraint, M, ModelState, Field, PgType};
//!
//! let author = ModelState::new("library", "Author")
//!     .with_field(Field::auto("id"))
//!     .with_field(Field::new("name", PgType::Text))
//!     .with_constraint(Constraint::queryset(
//!         M::new().objects().filter([("name", "Anonymous")]),
//!         "no anonymous authors",
//!     ).unwrap());
//!
//! assert_eq!(author.constraints().count(), 1);
//! ```
//!
//! # Migrations
//!
//! The [`Autodetector`] diffs two [`ProjectState`] snapshots into
//! [`MigrationOperation`]s. Adding a constraint produces an `AddConstraint`
//! whose forward direction runs:
//!
//! ```sql
//! CREATE FUNCTION "tw_fn_…"() RETURNS TRIGGER AS $$ … $$ LANGUAGE plpgsql;
//! CREATE CONSTRAINT TRIGGER "tw_tg_…" AFTER INSERT OR UPDATE ON "library_author"
//!     DEFERRABLE INITIALLY DEFERRED FOR EACH ROW EXECUTE PROCEDURE "tw_fn_…"();
//! ```
//!
//! and whose backward direction drops both objects again. Generated names are
//! derived from the constraint and table names with [`trigger_names`], so
//! both directions always target the same objects.

mod autodetector;
mod chain;
mod constraint;
mod deconstruct;
mod error;
mod executor;
mod install;
mod migration;
mod operations;
pub mod orm;
mod replay;
mod schema;
mod state;
mod traced;
mod writer;

pub use autodetector::{Autodetector, Changes, ConstraintPass, DiffPass};
pub use chain::{
    Deferred, ExpressionChain, IndexKey, Kwargs, M, Operation, SliceSpec, Value, constructors,
    count, exists, f, kwargs, max, min, q, raw_sql, sum,
};
pub use constraint::{CheckConstraint, Constraint, QuerysetConstraint};
pub use deconstruct::{Deconstruct, Node, Reconstruct};
pub use error::{BoxError, Error};
pub use executor::{BoxFuture, RecordingExecutor, SchemaExecutor};
pub use install::{TriggerOptions, install, install_sql, uninstall, uninstall_sql};
pub use migration::Migration;
pub use operations::MigrationOperation;
pub use replay::{Arg, Key, ModelRef, QueryHost};
pub use schema::{create_table_sql, drop_table_sql, rename_table_sql};
pub use state::{Field, ModelKey, ModelOptions, ModelState, PgType, ProjectState};
pub use traced::{Connection, ConnectionExt, TracedConn};
pub use writer::MigrationWriter;

pub use tripwire_config::Config;
pub use tripwire_sql::{RenderedSql, TriggerNames, derive_names, trigger_names};

pub type Result<T> = std::result::Result<T, Error>;
