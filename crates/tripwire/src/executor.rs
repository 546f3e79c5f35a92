//! Schema executors: where generated DDL goes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::BoxError;
use crate::{Error, Result};

/// A boxed future, as returned by [`SchemaExecutor::execute`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes schema-changing SQL.
///
/// Implemented for traced Postgres connections ([`TracedConn`](crate::TracedConn))
/// and by [`RecordingExecutor`] for dry runs and tests.
pub trait SchemaExecutor: Send + Sync {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, std::result::Result<(), BoxError>>;
}

/// Run one statement, wrapping a failure with the statement that caused it.
pub(crate) async fn run(executor: &dyn SchemaExecutor, sql: &str) -> Result<()> {
    executor.execute(sql).await.map_err(|source| Error::Ddl {
        sql: sql.to_string(),
        source,
    })
}

/// Run statements in order, stopping at the first failure.
pub(crate) async fn run_all(executor: &dyn SchemaExecutor, statements: &[String]) -> Result<()> {
    for sql in statements {
        run(executor, sql).await?;
    }
    Ok(())
}

/// Collects statements instead of executing them.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any statement containing `needle` (after recording it).
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            statements: Mutex::default(),
            fail_on: Some(needle.into()),
        }
    }

    /// Everything executed so far.
    pub fn statements(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Drain the recorded statements.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.statements.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SchemaExecutor for RecordingExecutor {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, std::result::Result<(), BoxError>> {
        Box::pin(async move {
            self.lock().push(sql.to_string());
            match &self.fail_on {
                Some(needle) if sql.contains(needle.as_str()) => {
                    Err(format!("statement rejected: {needle}").into())
                }
                _ => Ok(()),
            }
        })
    }
}
