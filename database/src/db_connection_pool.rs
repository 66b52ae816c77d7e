use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;

use diesel::ConnectionError;
use diesel::ConnectionResult;
use diesel::sql_query;
use diesel_async::AsyncConnection;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use diesel_async::SimpleAsyncConnection as _;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::scoped_futures::ScopedBoxFuture;
use futures::future::BoxFuture;
use futures_util::FutureExt as _;
use openssl::ssl::SslConnector;
use openssl::ssl::SslMethod;
use openssl::ssl::SslVerifyMode;
use tokio::sync::OwnedRwLockWriteGuard;
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::DatabaseError;
use crate::tracing_instrumentation::TracingInstrumentation;

pub type DbConnectionConfig = AsyncDieselConnectionManager<AsyncPgConnection>;

#[derive(Clone)]
pub struct DbConnection {
    inner: Arc<RwLock<Object<AsyncPgConnection>>>,
}

pub struct WriteHandle {
    guard: OwnedRwLockWriteGuard<Object<AsyncPgConnection>>,
}

impl DbConnection {
    pub fn new(inner: Arc<RwLock<Object<AsyncPgConnection>>>) -> Self {
        Self { inner }
    }

    pub async fn write(&self) -> WriteHandle {
        WriteHandle {
            guard: self.inner.clone().write_owned().await,
        }
    }

    // Implementation of this function is taking a strong inspiration from
    // https://docs.rs/diesel/2.1.6/src/diesel/connection/transaction_manager.rs.html#50-71
    // Sadly, this function is private so we can't use it.
    //
    // :WARNING: If you ever need to modify this function, please take a look at the
    // original `diesel` function, they probably do it right more than us.
    pub async fn transaction<'a, R, E, F>(&self, callback: F) -> std::result::Result<R, E>
    where
        F: FnOnce(Self) -> ScopedBoxFuture<'a, 'a, std::result::Result<R, E>> + Send + 'a,
        E: From<DatabaseError> + Send + 'a,
        R: Send + 'a,
    {
        use diesel_async::TransactionManager as _;

        type TxManager = <AsyncPgConnection as AsyncConnection>::TransactionManager;

        {
            let mut handle = self.write().await;
            TxManager::begin_transaction(handle.deref_mut())
                .await
                .map_err(DatabaseError)?;
        }

        match callback(self.clone()).await {
            Ok(result) => {
                let mut handle = self.write().await;
                TxManager::commit_transaction(handle.deref_mut())
                    .await
                    .map_err(DatabaseError)?;
                Ok(result)
            }
            Err(callback_error) => {
                let mut handle = self.write().await;
                match TxManager::rollback_transaction(handle.deref_mut()).await {
                    Ok(()) | Err(diesel::result::Error::BrokenTransactionManager) => {
                        Err(callback_error)
                    }
                    Err(rollback_error) => Err(E::from(DatabaseError(rollback_error))),
                }
            }
        }
    }
}

impl Deref for WriteHandle {
    type Target = AsyncPgConnection;

    fn deref(&self) -> &Self::Target {
        self.guard.deref()
    }
}

impl DerefMut for WriteHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.deref_mut()
    }
}

/// A pool of PostgreSQL connections
///
/// Connections are handed out wrapped in a [DbConnection] and go back to the pool
/// once every clone of it is dropped.
#[derive(Clone)]
pub struct DbConnectionPool {
    pool: Arc<Pool<AsyncPgConnection>>,
}

#[derive(Debug, thiserror::Error)]
#[error("an error occurred while building the database pool: '{0}'")]
pub struct DatabasePoolBuildError(#[from] diesel_async::pooled_connection::deadpool::BuildError);

#[derive(Debug, thiserror::Error)]
#[error("an error occurred while getting a connection from the database pool: '{0}'")]
pub struct DatabasePoolError(#[from] diesel_async::pooled_connection::deadpool::PoolError);

impl DbConnectionPool {
    /// Creates a connection pool with the given settings
    ///
    /// No connection is opened until the first call to [DbConnectionPool::get].
    pub fn try_initialize(url: Url, max_size: usize) -> Result<Self, DatabasePoolBuildError> {
        let pool = create_connection_pool(url, max_size)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    pub async fn get(&self) -> Result<DbConnection, DatabasePoolError> {
        let mut connection = self.pool.get().await?;
        connection.set_instrumentation(TracingInstrumentation);
        Ok(DbConnection::new(Arc::new(RwLock::new(connection))))
    }

    /// Closes the pool, idle connections are dropped and further [DbConnectionPool::get] fail
    pub fn close(&self) {
        let status = self.pool.status();
        trace!(size = status.size, available = status.available, "closing database pool");
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Returns a pool connected to the database named by `PALLETMAP_TEST_DATABASE_URL`, if set
    #[cfg(test)]
    pub fn for_tests() -> Option<Self> {
        let url = std::env::var("PALLETMAP_TEST_DATABASE_URL").ok()?;
        let url = Url::parse(&url).expect("PALLETMAP_TEST_DATABASE_URL should be a valid URL");
        Some(Self::try_initialize(url, 2).expect("test database pool should build"))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("could not ping the database: '{0}'")]
pub struct PingError(#[from] diesel::result::Error);

pub async fn ping_database(conn: &mut DbConnection) -> Result<(), PingError> {
    sql_query("SELECT 1")
        .execute(conn.write().await.deref_mut())
        .await?;
    trace!("Database ping successful");
    Ok(())
}

/// Runs a batch of idempotent DDL statements
pub async fn provision_schema(conn: &mut DbConnection, schema: &str) -> Result<(), DatabaseError> {
    conn.write().await.batch_execute(schema).await?;
    trace!("Database schema provisioned");
    Ok(())
}

fn create_connection_pool(
    url: Url,
    max_size: usize,
) -> Result<Pool<AsyncPgConnection>, DatabasePoolBuildError> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup = Box::new(establish_connection);
    let manager = DbConnectionConfig::new_with_config(url, manager_config);
    Ok(Pool::builder(manager).max_size(max_size).build()?)
}

fn establish_connection(config: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let mut connector_builder = SslConnector::builder(SslMethod::tls())
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        connector_builder.set_verify(SslVerifyMode::NONE);
        let tls = postgres_openssl::MakeTlsConnector::new(connector_builder.build());
        let (client, conn) = tokio_postgres::connect(config, tls)
            .await
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        // The connection object performs the actual communication with the database,
        // so spawn it off to run on its own.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::error!("connection error: {}", e);
            }
        });
        AsyncPgConnection::try_from(client).await
    };
    fut.boxed()
}
