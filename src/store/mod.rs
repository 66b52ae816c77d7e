//! Persistence of layout documents and pallets
//!
//! A single [Store] is selected at startup. Every backend stores JSON documents by key
//! ([DocumentStore]). The relational ones (SQLite and PostgreSQL) also store pallets and
//! their article placements ([PalletStore]).

mod file;
mod postgres;
mod sqlite;
mod supabase;

use std::collections::HashMap;
use std::path::PathBuf;

use axum::http::StatusCode;
use database::DatabaseError;
use database::db_connection_pool::DatabasePoolBuildError;
use database::db_connection_pool::DatabasePoolError;
use database::db_connection_pool::PingError;
use database::sqlite::SqliteError;
use diesel::prelude::*;
use itertools::Itertools as _;
use serde_json::Value;
use serde_json::json;
use url::Url;

pub use file::FileStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

use crate::error::PalletmapError;
use crate::models::Pallet;
use crate::models::PalletGeometry;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display, serde::Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Sqlite,
    Postgres,
    Supabase,
}

#[derive(Debug, Clone)]
pub enum Config {
    File {
        data_dir: PathBuf,
    },
    Sqlite {
        path: PathBuf,
    },
    Postgres {
        database_url: Url,
        pool_size: usize,
    },
    Supabase {
        url: Url,
        service_key: String,
        table: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("The '{kind}' store does not support pallets, use a relational store")]
    Unsupported { kind: StoreKind },
    #[error("{message}")]
    Unavailable { message: String },
    #[error("Invalid document key '{key}'")]
    InvalidKey { key: String },
    #[error("Remote store answered with status {status}: {body}")]
    Remote { status: u16, body: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    DatabasePool(#[from] DatabasePoolError),
    #[error(transparent)]
    DatabasePoolBuild(#[from] DatabasePoolBuildError),
    #[error(transparent)]
    DatabasePing(#[from] PingError),
    #[error(transparent)]
    Sqlite(#[from] SqliteError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Database(DatabaseError(e))
    }
}

impl PalletmapError for StoreError {
    fn get_status(&self) -> StatusCode {
        match self {
            Self::Unsupported { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn get_type(&self) -> &str {
        match self {
            Self::Unsupported { .. } => "store:Unsupported",
            Self::Unavailable { .. }
            | Self::DatabasePool(_)
            | Self::DatabasePoolBuild(_)
            | Self::DatabasePing(_)
            | Self::Sqlite(SqliteError::Connection(_)) => "store:Unavailable",
            Self::InvalidKey { .. } => "store:InvalidKey",
            Self::Remote { .. } | Self::Http(_) => "store:RemoteError",
            Self::Io(_) => "store:IoError",
            Self::Serialization(_) => "store:SerializationError",
            Self::Database(_) | Self::Sqlite(_) => "store:DatabaseError",
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::Unsupported { kind } => [("store".to_owned(), json!(kind))].into(),
            Self::Remote { status, .. } => [("status".to_owned(), json!(status))].into(),
            _ => Default::default(),
        }
    }
}

/// Key/value storage of JSON documents
pub trait DocumentStore {
    /// Returns the document stored under `key`, `None` when there is none yet
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the document stored under `key`
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

/// Record-level storage of pallets and their article placements
pub trait PalletStore {
    /// All pallets ordered by id, with their articles sorted
    async fn list_pallets(&self) -> Result<Vec<Pallet>, StoreError>;

    /// Inserts a new pallet named after the current pallet count
    ///
    /// The count and the insertion are not atomic: concurrent creations may get the same name.
    async fn create_pallet(&self, geometry: PalletGeometry) -> Result<Pallet, StoreError>;

    /// Deletes a pallet and its placements, returns `false` if it did not exist
    async fn delete_pallet(&self, id: i64) -> Result<bool, StoreError>;

    /// Replaces the articles of a pallet, returns `None` if it does not exist
    ///
    /// `articles` is expected to be normalized already.
    async fn set_articles(
        &self,
        id: i64,
        articles: Vec<String>,
    ) -> Result<Option<Vec<String>>, StoreError>;

    /// Pallets holding `article`, ordered by id
    async fn find_by_article(&self, article: &str) -> Result<Vec<Pallet>, StoreError>;
}

/// The backing store of the application
///
/// Connections and clients are created on first use and released by [Store::close].
pub enum Store {
    File(FileStore),
    Sqlite(SqliteStore),
    Postgres(PostgresStore),
    Supabase(SupabaseStore),
}

/// A store able to persist pallets
pub enum RelationalStore<'a> {
    Sqlite(&'a SqliteStore),
    Postgres(&'a PostgresStore),
}

impl Store {
    pub fn new(config: Config) -> Self {
        match config {
            Config::File { data_dir } => Self::File(FileStore::new(data_dir)),
            Config::Sqlite { path } => Self::Sqlite(SqliteStore::new(path)),
            Config::Postgres {
                database_url,
                pool_size,
            } => Self::Postgres(PostgresStore::new(database_url, pool_size)),
            Config::Supabase {
                url,
                service_key,
                table,
            } => Self::Supabase(SupabaseStore::new(url, service_key, table)),
        }
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            Self::File(_) => StoreKind::File,
            Self::Sqlite(_) => StoreKind::Sqlite,
            Self::Postgres(_) => StoreKind::Postgres,
            Self::Supabase(_) => StoreKind::Supabase,
        }
    }

    /// The pallet capability of the store, if it has one
    pub fn pallets(&self) -> Result<RelationalStore<'_>, StoreError> {
        match self {
            Self::Sqlite(store) => Ok(RelationalStore::Sqlite(store)),
            Self::Postgres(store) => Ok(RelationalStore::Postgres(store)),
            Self::File(_) | Self::Supabase(_) => Err(StoreError::Unsupported { kind: self.kind() }),
        }
    }

    #[tracing::instrument(skip(self), fields(store = %self.kind()), err)]
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::File(store) => store.ping().await,
            Self::Sqlite(store) => store.ping().await,
            Self::Postgres(store) => store.ping().await,
            Self::Supabase(store) => store.ping().await,
        }
    }

    /// Releases the connections held by the store
    pub async fn close(&self) {
        match self {
            Self::File(_) | Self::Sqlite(_) => {}
            Self::Postgres(store) => store.close(),
            Self::Supabase(store) => store.close().await,
        }
        tracing::info!(store = %self.kind(), "store closed");
    }
}

impl DocumentStore for Store {
    #[tracing::instrument(skip(self), fields(store = %self.kind()), err)]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self {
            Self::File(store) => store.get(key).await,
            Self::Sqlite(store) => store.get(key).await,
            Self::Postgres(store) => store.get(key).await,
            Self::Supabase(store) => store.get(key).await,
        }
    }

    #[tracing::instrument(skip(self, value), fields(store = %self.kind()), err)]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        match self {
            Self::File(store) => store.set(key, value).await,
            Self::Sqlite(store) => store.set(key, value).await,
            Self::Postgres(store) => store.set(key, value).await,
            Self::Supabase(store) => store.set(key, value).await,
        }
    }
}

impl PalletStore for RelationalStore<'_> {
    async fn list_pallets(&self) -> Result<Vec<Pallet>, StoreError> {
        match self {
            Self::Sqlite(store) => store.list_pallets().await,
            Self::Postgres(store) => store.list_pallets().await,
        }
    }

    async fn create_pallet(&self, geometry: PalletGeometry) -> Result<Pallet, StoreError> {
        match self {
            Self::Sqlite(store) => store.create_pallet(geometry).await,
            Self::Postgres(store) => store.create_pallet(geometry).await,
        }
    }

    async fn delete_pallet(&self, id: i64) -> Result<bool, StoreError> {
        match self {
            Self::Sqlite(store) => store.delete_pallet(id).await,
            Self::Postgres(store) => store.delete_pallet(id).await,
        }
    }

    async fn set_articles(
        &self,
        id: i64,
        articles: Vec<String>,
    ) -> Result<Option<Vec<String>>, StoreError> {
        match self {
            Self::Sqlite(store) => store.set_articles(id, articles).await,
            Self::Postgres(store) => store.set_articles(id, articles).await,
        }
    }

    async fn find_by_article(&self, article: &str) -> Result<Vec<Pallet>, StoreError> {
        match self {
            Self::Sqlite(store) => store.find_by_article(article).await,
            Self::Postgres(store) => store.find_by_article(article).await,
        }
    }
}

/// Returns the document stored under `key`, persisting and returning `default()` if absent
pub async fn load_or_initialize(
    store: &Store,
    key: &str,
    default: impl FnOnce() -> Value,
) -> Result<Value, StoreError> {
    if let Some(document) = store.get(key).await? {
        return Ok(document);
    }
    let document = default();
    tracing::info!(key, "initializing document");
    store.set(key, &document).await?;
    Ok(document)
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = database::tables::pallets)]
pub(crate) struct PalletRow {
    id: i64,
    name: String,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

/// Joins pallet rows with their `(pallet_id, article)` placements
///
/// Placements are expected sorted by article.
pub(crate) fn assemble_pallets(rows: Vec<PalletRow>, placements: Vec<(i64, String)>) -> Vec<Pallet> {
    let mut articles = placements.into_iter().into_group_map();
    rows.into_iter()
        .map(|PalletRow { id, name, x, y, w, h }| Pallet {
            id,
            name,
            x,
            y,
            w,
            h,
            articles: articles.remove(&id).unwrap_or_default(),
        })
        .collect()
}

/// Key names end up in file names and URLs
fn check_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: key.to_owned(),
        })
    }
}
