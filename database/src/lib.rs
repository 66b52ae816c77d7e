pub mod db_connection_pool;
pub mod sqlite;
pub mod tables;
mod tracing_instrumentation;

pub use db_connection_pool::DbConnection;
pub use db_connection_pool::DbConnectionPool;
pub use sqlite::SqliteDatabase;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct DatabaseError(#[from] pub diesel::result::Error);

/// Idempotent DDL provisioning the pallet, placement and key/value tables on PostgreSQL
pub const POSTGRES_SCHEMA: &str = include_str!("../sql/postgres.sql");

/// Idempotent DDL provisioning the pallet, placement and key/value tables on SQLite
pub const SQLITE_SCHEMA: &str = include_str!("../sql/sqlite.sql");

/// The statement creating a key/value table named `table` on a PostgreSQL backed service
///
/// Remote key/value services can't provision tables themselves, so this is what an
/// operator has to run by hand.
pub fn key_value_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS public.{table} (k TEXT PRIMARY KEY, v JSONB NOT NULL, updated_at TIMESTAMPTZ NOT NULL DEFAULT now());"
    )
}
