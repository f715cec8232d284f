//! PostgreSQL series store
//!
//! Documents are stored as JSONB next to their key columns. Bulk writes
//! run in one transaction with a savepoint per operation, so a failing
//! operation is rolled back on its own and the rest of the batch commits.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{BulkOutcome, BulkWriteResult, SeriesStore, SeriesWrite};
use crate::error::{StoreError, StoreResult};
use crate::models::{Category, Dataset, Provider, RevisionArchiveEntry, StoredSeries};

#[derive(Debug, Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Connect and apply pending migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        info!("Series store ready");
        Ok(Self { db })
    }

    pub fn db(&self) -> &PgPool {
        &self.db
    }

    async fn savepoint(tx: &mut Transaction<'_, Postgres>, statement: &str) -> StoreResult<()> {
        sqlx::query(statement).execute(&mut **tx).await?;
        Ok(())
    }

    async fn write_one(tx: &mut Transaction<'_, Postgres>, op: &SeriesWrite) -> Result<(), sqlx::Error> {
        let series = op.series();
        match op {
            SeriesWrite::Insert(_) => {
                sqlx::query(
                    r#"
                    INSERT INTO series (id, provider_name, dataset_code, key, version, doc)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(series.id)
                .bind(&series.provider_name)
                .bind(&series.dataset_code)
                .bind(&series.key)
                .bind(series.version as i32)
                .bind(Json(series))
                .execute(&mut **tx)
                .await?;
            },
            SeriesWrite::Replace(_) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE series SET key = $2, version = $3, doc = $4
                    WHERE id = $1
                    "#,
                )
                .bind(series.id)
                .bind(&series.key)
                .bind(series.version as i32)
                .bind(Json(series))
                .execute(&mut **tx)
                .await?;
                if updated.rows_affected() == 0 {
                    return Err(sqlx::Error::RowNotFound);
                }
            },
        }
        Ok(())
    }
}

#[async_trait]
impl SeriesStore for PgStore {
    async fn find_provider(&self, name: &str) -> StoreResult<Option<Provider>> {
        let row: Option<(Json<Provider>,)> = sqlx::query_as("SELECT doc FROM providers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn upsert_provider(&self, provider: &Provider) -> StoreResult<Provider> {
        let mut stored = provider.clone();
        if let Some(existing) = self.find_provider(&provider.name).await? {
            stored.enable = existing.enable;
            stored.lock = existing.lock;
        }
        sqlx::query(
            r#"
            INSERT INTO providers (name, doc) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(&stored.name)
        .bind(Json(&stored))
        .execute(&self.db)
        .await?;
        Ok(stored)
    }

    async fn replace_categories(&self, provider_name: &str, categories: &[Category]) -> StoreResult<usize> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM categories WHERE provider_name = $1")
            .bind(provider_name)
            .execute(&mut *tx)
            .await?;
        for category in categories {
            sqlx::query(
                r#"
                INSERT INTO categories (provider_name, category_code, parent, doc)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(provider_name)
            .bind(&category.category_code)
            .bind(&category.parent)
            .bind(Json(category))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(provider = %provider_name, categories = categories.len(), "Categories replaced");
        Ok(categories.len())
    }

    async fn categories(&self, provider_name: &str) -> StoreResult<Vec<Category>> {
        let rows: Vec<(Json<Category>,)> = sqlx::query_as(
            "SELECT doc FROM categories WHERE provider_name = $1 ORDER BY category_code",
        )
        .bind(provider_name)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    async fn find_dataset(&self, provider_name: &str, dataset_code: &str) -> StoreResult<Option<Dataset>> {
        let row: Option<(Json<Dataset>,)> = sqlx::query_as(
            "SELECT doc FROM datasets WHERE provider_name = $1 AND dataset_code = $2",
        )
        .bind(provider_name)
        .bind(dataset_code)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn replace_dataset(&self, dataset: &Dataset) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO datasets (provider_name, dataset_code, enable, lock, doc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider_name, dataset_code) DO UPDATE
            SET enable = EXCLUDED.enable, lock = EXCLUDED.lock, doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(&dataset.provider_name)
        .bind(&dataset.dataset_code)
        .bind(dataset.enable)
        .bind(dataset.lock)
        .bind(Json(dataset))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_dataset_status(&self, dataset: &Dataset) -> StoreResult<()> {
        let status = serde_json::json!({
            "enable": dataset.enable,
            "disable_reason": dataset.disable_reason,
            "last_run": dataset.last_run,
            "download_first": dataset.download_first,
            "download_last": dataset.download_last,
            "last_update": dataset.last_update,
        });
        let updated = sqlx::query(
            r#"
            UPDATE datasets SET enable = $3, doc = doc || $4, updated_at = NOW()
            WHERE provider_name = $1 AND dataset_code = $2
            "#,
        )
        .bind(&dataset.provider_name)
        .bind(&dataset.dataset_code)
        .bind(dataset.enable)
        .bind(Json(status))
        .execute(&self.db)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(dataset.slug.clone()));
        }
        Ok(())
    }

    async fn disable_dataset(&self, provider_name: &str, dataset_code: &str, reason: &str) -> StoreResult<()> {
        let mut dataset = self
            .find_dataset(provider_name, dataset_code)
            .await?
            .unwrap_or_else(|| Dataset::new(provider_name, dataset_code));
        dataset.enable = false;
        dataset.disable_reason = Some(reason.to_string());
        self.replace_dataset(&dataset).await
    }

    async fn find_series(
        &self,
        provider_name: &str,
        dataset_code: &str,
        keys: &[String],
    ) -> StoreResult<Vec<StoredSeries>> {
        let rows: Vec<(Json<StoredSeries>,)> = sqlx::query_as(
            r#"
            SELECT doc FROM series
            WHERE provider_name = $1 AND dataset_code = $2 AND key = ANY($3)
            "#,
        )
        .bind(provider_name)
        .bind(dataset_code)
        .bind(keys)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    async fn find_one_series(
        &self,
        provider_name: &str,
        dataset_code: &str,
        key: &str,
    ) -> StoreResult<Option<StoredSeries>> {
        let row: Option<(Json<StoredSeries>,)> = sqlx::query_as(
            "SELECT doc FROM series WHERE provider_name = $1 AND dataset_code = $2 AND key = $3",
        )
        .bind(provider_name)
        .bind(dataset_code)
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(doc,)| doc.0))
    }

    async fn count_series(&self, provider_name: &str, dataset_code: &str) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM series WHERE provider_name = $1 AND dataset_code = $2",
        )
        .bind(provider_name)
        .bind(dataset_code)
        .fetch_one(&self.db)
        .await?;
        Ok(count as usize)
    }

    async fn bulk_write_series(&self, ops: &[SeriesWrite]) -> StoreResult<BulkWriteResult> {
        let mut tx = self.db.begin().await?;
        let mut outcome = BulkOutcome::new("series", ops.len());

        for (index, op) in ops.iter().enumerate() {
            Self::savepoint(&mut tx, "SAVEPOINT series_op").await?;
            match Self::write_one(&mut tx, op).await {
                Ok(()) => {
                    Self::savepoint(&mut tx, "RELEASE SAVEPOINT series_op").await?;
                    match op {
                        SeriesWrite::Insert(_) => outcome.inserted(),
                        SeriesWrite::Replace(_) => outcome.replaced(),
                    }
                },
                Err(e) => {
                    Self::savepoint(&mut tx, "ROLLBACK TO SAVEPOINT series_op").await?;
                    outcome.fail(index, op.kind(), &op.series().key, e.to_string());
                },
            }
        }

        tx.commit().await?;
        outcome.finish()
    }

    async fn bulk_insert_revisions(&self, entries: &[RevisionArchiveEntry]) -> StoreResult<BulkWriteResult> {
        let mut tx = self.db.begin().await?;
        let mut outcome = BulkOutcome::new("series_revisions", entries.len());

        for (index, entry) in entries.iter().enumerate() {
            Self::savepoint(&mut tx, "SAVEPOINT revision_op").await?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO series_revisions
                    (id, series_id, provider_name, dataset_code, key, version, archived_at, doc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry.id)
            .bind(entry.series_id)
            .bind(&entry.provider_name)
            .bind(&entry.dataset_code)
            .bind(&entry.key)
            .bind(entry.version as i32)
            .bind(entry.archived_at)
            .bind(Json(&entry.document))
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {
                    Self::savepoint(&mut tx, "RELEASE SAVEPOINT revision_op").await?;
                    outcome.inserted();
                },
                Err(e) => {
                    Self::savepoint(&mut tx, "ROLLBACK TO SAVEPOINT revision_op").await?;
                    outcome.fail(index, "insert", &entry.key, e.to_string());
                },
            }
        }

        tx.commit().await?;
        outcome.finish()
    }

    async fn revisions(&self, series_id: Uuid) -> StoreResult<Vec<RevisionArchiveEntry>> {
        let rows: Vec<(Uuid, Uuid, String, String, String, i32, chrono::DateTime<chrono::Utc>, Json<StoredSeries>)> =
            sqlx::query_as(
                r#"
                SELECT id, series_id, provider_name, dataset_code, key, version, archived_at, doc
                FROM series_revisions
                WHERE series_id = $1
                ORDER BY version
                "#,
            )
            .bind(series_id)
            .fetch_all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, series_id, provider_name, dataset_code, key, version, archived_at, doc)| {
                    RevisionArchiveEntry {
                        id,
                        series_id,
                        provider_name,
                        dataset_code,
                        key,
                        version: version as u32,
                        archived_at,
                        document: doc.0,
                    }
                },
            )
            .collect())
    }
}
