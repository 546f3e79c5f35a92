//! Running migrations against Postgres, with every statement traced.

use tokio_postgres::Error;
use tracing::{Instrument, warn};

use crate::error::BoxError;
use crate::executor::{BoxFuture, SchemaExecutor};

/// Postgres connections DDL can be sent to.
///
/// Implemented for `tokio_postgres::Client`, `tokio_postgres::Transaction`
/// and pooled `deadpool_postgres::Object`s. Run a migration on a
/// transaction to make it all-or-nothing.
pub trait Connection: Send + Sync {
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), Error>>;
}

impl Connection for tokio_postgres::Client {
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }
}

impl Connection for tokio_postgres::Transaction<'_> {
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(tokio_postgres::Transaction::batch_execute(self, sql))
    }
}

impl Connection for deadpool_postgres::Object {
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        // Through the client, not back into this impl
        let client: &tokio_postgres::Client = self;
        Box::pin(client.batch_execute(sql))
    }
}

/// A [`SchemaExecutor`] over a borrowed connection. Each statement runs in
/// a `db.ddl` debug span; failures are logged with their SQLSTATE.
///
/// ```ignore
/// use tripwire::ConnectionExt;
///
/// let tx = client.transaction().await?;
/// migration.apply(&tx.traced(), &mut state).await?;
/// tx.commit().await?;
/// ```
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<(), Error> {
        let span = tracing::debug_span!("db.ddl", sql = %sql);
        let result = self.conn.batch_execute(sql).instrument(span).await;
        if let Err(err) = &result {
            let code = err.code().map(|c| c.code()).unwrap_or("none");
            warn!(sqlstate = code, error = %err, "statement failed");
        }
        result
    }
}

impl<C: Connection> SchemaExecutor for TracedConn<'_, C> {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move { Ok(self.batch_execute(sql).await?) })
    }
}

/// `.traced()` on any [`Connection`].
pub trait ConnectionExt: Connection + Sized {
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection> ConnectionExt for C {}
