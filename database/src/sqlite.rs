use std::path::Path;
use std::path::PathBuf;

use diesel::Connection as _;
use diesel::SqliteConnection;
use diesel::connection::SimpleConnection as _;
use tokio::task::JoinError;

use crate::tracing_instrumentation::TracingInstrumentation;

#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    #[error("could not open the SQLite database: '{0}'")]
    Connection(#[from] diesel::ConnectionError),
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
    #[error("SQLite operation panicked or was cancelled: '{0}'")]
    Blocking(#[from] JoinError),
}

/// A SQLite database file
///
/// SQLite connections are blocking and cheap to open: every operation opens its own
/// connection on tokio's blocking pool and drops it when done, whatever the outcome.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
}

impl SqliteDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn establish(&self) -> Result<SqliteConnection, SqliteError> {
        let mut conn = SqliteConnection::establish(&self.path.to_string_lossy())?;
        conn.set_instrumentation(TracingInstrumentation);
        // foreign keys are disabled by default in SQLite, cascades need them
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }

    /// Runs `operation` against a fresh connection on the blocking thread pool
    pub async fn run<R, E, F>(&self, operation: F) -> Result<R, E>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<SqliteError> + Send + 'static,
    {
        let database = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = database.establish()?;
            operation(&mut conn)
        })
        .await
        .map_err(|e| E::from(SqliteError::from(e)))?
    }

    pub async fn ping(&self) -> Result<(), SqliteError> {
        self.run(|conn| {
            conn.batch_execute("SELECT 1")?;
            Ok::<_, SqliteError>(())
        })
        .await
    }

    pub async fn provision_schema(&self, schema: &'static str) -> Result<(), SqliteError> {
        self.run(move |conn| {
            conn.batch_execute(schema)?;
            Ok::<_, SqliteError>(())
        })
        .await?;
        tracing::trace!(path = %self.path.display(), "SQLite schema provisioned");
        Ok(())
    }
}
