use std::path::PathBuf;

use database::SQLITE_SCHEMA;
use database::SqliteDatabase;
use database::tables::pallets;
use database::tables::placements;
use database::tables::sqlite::kv_store;
use diesel::prelude::*;
use serde_json::Value;
use tokio::sync::OnceCell;

use super::DocumentStore;
use super::PalletRow;
use super::PalletStore;
use super::StoreError;
use super::assemble_pallets;
use super::check_key;
use crate::models::Pallet;
use crate::models::PalletGeometry;
use crate::models::pallet::pallet_name;

/// Pallets, placements and documents in a local SQLite file
///
/// The schema is created on first access.
pub struct SqliteStore {
    database: SqliteDatabase,
    schema: OnceCell<()>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            database: SqliteDatabase::new(path),
            schema: OnceCell::new(),
        }
    }

    async fn database(&self) -> Result<&SqliteDatabase, StoreError> {
        self.schema
            .get_or_try_init(|| async {
                if let Some(parent) = self.database.path().parent()
                    && !parent.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(parent).await?;
                }
                self.database.provision_schema(SQLITE_SCHEMA).await?;
                tracing::info!(path = %self.database.path().display(), "SQLite store ready");
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(&self.database)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.database().await?.ping().await?)
    }
}

fn load_pallets(conn: &mut SqliteConnection, ids: Option<&[i64]>) -> Result<Vec<Pallet>, StoreError> {
    let mut rows = pallets::table
        .select(PalletRow::as_select())
        .order(pallets::id)
        .into_boxed();
    let mut articles = placements::table
        .select((placements::pallet_id, placements::article))
        .order((placements::pallet_id, placements::article))
        .into_boxed();
    if let Some(ids) = ids {
        rows = rows.filter(pallets::id.eq_any(ids));
        articles = articles.filter(placements::pallet_id.eq_any(ids));
    }
    let rows = rows.load(conn)?;
    let articles = articles.load::<(i64, String)>(conn)?;
    Ok(assemble_pallets(rows, articles))
}

impl PalletStore for SqliteStore {
    #[tracing::instrument(skip(self), err)]
    async fn list_pallets(&self) -> Result<Vec<Pallet>, StoreError> {
        self.database()
            .await?
            .run(|conn| load_pallets(conn, None))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn create_pallet(&self, geometry: PalletGeometry) -> Result<Pallet, StoreError> {
        let PalletGeometry { x, y, w, h } = geometry;
        self.database()
            .await?
            .run(move |conn| {
                let count: i64 = pallets::table.count().get_result(conn)?;
                let name = pallet_name(count);
                let id = diesel::insert_into(pallets::table)
                    .values((
                        pallets::name.eq(&name),
                        pallets::x.eq(x),
                        pallets::y.eq(y),
                        pallets::w.eq(w),
                        pallets::h.eq(h),
                    ))
                    .returning(pallets::id)
                    .get_result::<i64>(conn)?;
                tracing::info!(id, %name, "pallet created");
                Ok(Pallet {
                    id,
                    name,
                    x,
                    y,
                    w,
                    h,
                    articles: Vec::new(),
                })
            })
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_pallet(&self, id: i64) -> Result<bool, StoreError> {
        self.database()
            .await?
            .run(move |conn| {
                conn.transaction(|conn| {
                    diesel::delete(placements::table.filter(placements::pallet_id.eq(id)))
                        .execute(conn)?;
                    let deleted = diesel::delete(pallets::table.find(id)).execute(conn)?;
                    Ok::<_, StoreError>(deleted > 0)
                })
            })
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn set_articles(
        &self,
        id: i64,
        articles: Vec<String>,
    ) -> Result<Option<Vec<String>>, StoreError> {
        self.database()
            .await?
            .run(move |conn| {
                conn.transaction(|conn| {
                    let exists = pallets::table
                        .find(id)
                        .select(pallets::id)
                        .first::<i64>(conn)
                        .optional()?
                        .is_some();
                    if !exists {
                        return Ok(None);
                    }
                    diesel::delete(placements::table.filter(placements::pallet_id.eq(id)))
                        .execute(conn)?;
                    for article in &articles {
                        diesel::insert_or_ignore_into(placements::table)
                            .values((
                                placements::pallet_id.eq(id),
                                placements::article.eq(article),
                            ))
                            .execute(conn)?;
                    }
                    Ok::<_, StoreError>(Some(articles))
                })
            })
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn find_by_article(&self, article: &str) -> Result<Vec<Pallet>, StoreError> {
        let article = article.to_owned();
        self.database()
            .await?
            .run(move |conn| {
                let ids = placements::table
                    .filter(placements::article.eq(&article))
                    .select(placements::pallet_id)
                    .load::<i64>(conn)?;
                load_pallets(conn, Some(&ids))
            })
            .await
    }
}

impl DocumentStore for SqliteStore {
    #[tracing::instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        check_key(key)?;
        let key = key.to_owned();
        let stored = self
            .database()
            .await?
            .run(move |conn| {
                kv_store::table
                    .find(&key)
                    .select(kv_store::v)
                    .first::<String>(conn)
                    .optional()
                    .map_err(StoreError::from)
            })
            .await?;
        let Some(stored) = stored else {
            return Ok(None);
        };
        match serde_json::from_str(&stored) {
            Ok(document) => Ok(Some(document)),
            Err(error) => {
                tracing::warn!(%error, "unreadable document, it will be reinitialized");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        check_key(key)?;
        let key = key.to_owned();
        let value = serde_json::to_string(value)?;
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.database()
            .await?
            .run(move |conn| {
                diesel::replace_into(kv_store::table)
                    .values((
                        kv_store::k.eq(&key),
                        kv_store::v.eq(&value),
                        kv_store::updated_at.eq(&updated_at),
                    ))
                    .execute(conn)?;
                Ok::<_, StoreError>(())
            })
            .await
    }
}
