use std::ops::DerefMut;

use chrono::Utc;
use database::DbConnection;
use database::DbConnectionPool;
use database::POSTGRES_SCHEMA;
use database::db_connection_pool::ping_database;
use database::db_connection_pool::provision_schema;
use database::tables::kv_store;
use database::tables::pallets;
use database::tables::placements;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use super::DocumentStore;
use super::PalletRow;
use super::PalletStore;
use super::StoreError;
use super::assemble_pallets;
use super::check_key;
use crate::models::Pallet;
use crate::models::PalletGeometry;
use crate::models::pallet::pallet_name;

/// Pallets, placements and documents in a remote PostgreSQL database
pub struct PostgresStore {
    database_url: Url,
    pool_size: usize,
    pool: OnceCell<DbConnectionPool>,
}

impl PostgresStore {
    pub fn new(database_url: Url, pool_size: usize) -> Self {
        Self {
            database_url,
            pool_size,
            pool: OnceCell::new(),
        }
    }

    /// Builds the pool and provisions the schema on first call
    async fn connection(&self) -> Result<DbConnection, StoreError> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                let pool =
                    DbConnectionPool::try_initialize(self.database_url.clone(), self.pool_size)?;
                let mut conn = pool.get().await?;
                provision_schema(&mut conn, POSTGRES_SCHEMA).await?;
                tracing::info!(
                    host = ?self.database_url.host_str(),
                    pool_size = self.pool_size,
                    "PostgreSQL store ready"
                );
                Ok::<_, StoreError>(pool)
            })
            .await?;
        Ok(pool.get().await?)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        ping_database(&mut conn).await?;
        Ok(())
    }

    pub fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close();
        }
    }
}

async fn load_pallets(
    conn: &DbConnection,
    ids: Option<&[i64]>,
) -> Result<Vec<Pallet>, StoreError> {
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
    let rows = rows.load(conn.write().await.deref_mut()).await?;
    let articles = articles
        .load::<(i64, String)>(conn.write().await.deref_mut())
        .await?;
    Ok(assemble_pallets(rows, articles))
}

impl PalletStore for PostgresStore {
    #[tracing::instrument(skip(self), err)]
    async fn list_pallets(&self) -> Result<Vec<Pallet>, StoreError> {
        let conn = self.connection().await?;
        load_pallets(&conn, None).await
    }

    #[tracing::instrument(skip(self), err)]
    async fn create_pallet(&self, geometry: PalletGeometry) -> Result<Pallet, StoreError> {
        let PalletGeometry { x, y, w, h } = geometry;
        let conn = self.connection().await?;
        let count: i64 = pallets::table
            .count()
            .get_result(conn.write().await.deref_mut())
            .await?;
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
            .get_result::<i64>(conn.write().await.deref_mut())
            .await?;
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
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_pallet(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.connection().await?;
        conn.transaction(|conn| {
            async move {
                diesel::delete(placements::table.filter(placements::pallet_id.eq(id)))
                    .execute(conn.write().await.deref_mut())
                    .await?;
                let deleted = diesel::delete(pallets::table.find(id))
                    .execute(conn.write().await.deref_mut())
                    .await?;
                Ok::<_, StoreError>(deleted > 0)
            }
            .scope_boxed()
        })
        .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn set_articles(
        &self,
        id: i64,
        articles: Vec<String>,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let conn = self.connection().await?;
        conn.transaction(|conn| {
            async move {
                let exists = pallets::table
                    .find(id)
                    .select(pallets::id)
                    .first::<i64>(conn.write().await.deref_mut())
                    .await
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(None);
                }
                diesel::delete(placements::table.filter(placements::pallet_id.eq(id)))
                    .execute(conn.write().await.deref_mut())
                    .await?;
                if !articles.is_empty() {
                    let rows = articles
                        .iter()
                        .map(|article| {
                            (
                                placements::pallet_id.eq(id),
                                placements::article.eq(article),
                            )
                        })
                        .collect::<Vec<_>>();
                    diesel::insert_into(placements::table)
                        .values(rows)
                        .on_conflict_do_nothing()
                        .execute(conn.write().await.deref_mut())
                        .await?;
                }
                Ok::<_, StoreError>(Some(articles))
            }
            .scope_boxed()
        })
        .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn find_by_article(&self, article: &str) -> Result<Vec<Pallet>, StoreError> {
        let conn = self.connection().await?;
        let ids = placements::table
            .filter(placements::article.eq(article))
            .select(placements::pallet_id)
            .load::<i64>(conn.write().await.deref_mut())
            .await?;
        load_pallets(&conn, Some(&ids)).await
    }
}

impl DocumentStore for PostgresStore {
    #[tracing::instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        check_key(key)?;
        let conn = self.connection().await?;
        let document = kv_store::table
            .find(key)
            .select(kv_store::v)
            .first::<Value>(conn.write().await.deref_mut())
            .await
            .optional()?;
        Ok(document)
    }

    #[tracing::instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        check_key(key)?;
        let conn = self.connection().await?;
        diesel::insert_into(kv_store::table)
            .values((
                kv_store::k.eq(key),
                kv_store::v.eq(value),
                kv_store::updated_at.eq(Utc::now()),
            ))
            .on_conflict(kv_store::k)
            .do_update()
            .set((
                kv_store::v.eq(excluded(kv_store::v)),
                kv_store::updated_at.eq(excluded(kv_store::updated_at)),
            ))
            .execute(conn.write().await.deref_mut())
            .await?;
        Ok(())
    }
}
