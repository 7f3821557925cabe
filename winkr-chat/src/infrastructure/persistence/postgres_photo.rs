use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use winkr_core::PostgresInstanceConfig;

use crate::domain::model::{AssetLocator, EphemeralPhoto, EphemeralPhotoView, PhotoStats};
use crate::domain::repository::{EphemeralPhotoStore, PhotoViewLog};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const PHOTO_COLUMNS: &str = "id, owner_id, photo_url, photo_key, thumbnail_url, thumbnail_key, \
     access_key, created_at, expires_at, max_views, view_count, is_viewed, is_expired, deleted_at";

/// 活跃照片谓词，`$1` 为当前时间
const ACTIVE_PREDICATE: &str = "deleted_at IS NULL AND NOT is_expired \
     AND expires_at > $1 AND view_count < max_views";

#[derive(Debug, FromRow)]
struct PhotoRow {
    id: String,
    owner_id: String,
    photo_url: String,
    photo_key: String,
    thumbnail_url: String,
    thumbnail_key: String,
    access_key: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    max_views: i32,
    view_count: i32,
    is_viewed: bool,
    is_expired: bool,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<PhotoRow> for EphemeralPhoto {
    fn from(row: PhotoRow) -> Self {
        EphemeralPhoto {
            id: row.id,
            owner_id: row.owner_id,
            photo: AssetLocator::new(row.photo_url, row.photo_key),
            thumbnail: AssetLocator::new(row.thumbnail_url, row.thumbnail_key),
            access_key: row.access_key,
            created_at: row.created_at,
            expires_at: row.expires_at,
            max_views: row.max_views,
            view_count: row.view_count,
            is_viewed: row.is_viewed,
            is_expired: row.is_expired,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ViewRow {
    id: String,
    photo_id: String,
    owner_id: String,
    viewer_id: Option<String>,
    ip_address: String,
    user_agent: String,
    duration_seconds: i32,
    viewed_at: DateTime<Utc>,
}

impl From<ViewRow> for EphemeralPhotoView {
    fn from(row: ViewRow) -> Self {
        EphemeralPhotoView {
            id: row.id,
            photo_id: row.photo_id,
            owner_id: row.owner_id,
            viewer_id: row.viewer_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            duration_seconds: row.duration_seconds,
            viewed_at: row.viewed_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_photos: i64,
    active_photos: i64,
    viewed_photos: i64,
    expired_photos: i64,
    deleted_photos: i64,
    total_views: i64,
}

impl From<StatsRow> for PhotoStats {
    fn from(row: StatsRow) -> Self {
        PhotoStats {
            total_photos: row.total_photos,
            active_photos: row.active_photos,
            viewed_photos: row.viewed_photos,
            expired_photos: row.expired_photos,
            deleted_photos: row.deleted_photos,
            total_views: row.total_views,
        }
    }
}

/// 基于 PostgreSQL 的照片存储与查看日志
#[derive(Clone)]
pub struct PostgresEphemeralPhotoStore {
    pool: Arc<PgPool>,
}

impl PostgresEphemeralPhotoStore {
    pub async fn new(config: &PostgresInstanceConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .min_connections(config.min_connections.unwrap_or(0))
            .connect(&config.url)
            .await
            .context("failed to connect to postgres")?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ephemeral_photos (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                photo_url TEXT NOT NULL,
                photo_key TEXT NOT NULL,
                thumbnail_url TEXT NOT NULL,
                thumbnail_key TEXT NOT NULL,
                access_key TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                max_views INTEGER NOT NULL,
                view_count INTEGER NOT NULL DEFAULT 0,
                is_viewed BOOLEAN NOT NULL DEFAULT FALSE,
                is_expired BOOLEAN NOT NULL DEFAULT FALSE,
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(self.pool())
        .await
        .context("failed to create ephemeral_photos table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ephemeral_photos_owner ON ephemeral_photos (owner_id, created_at DESC)",
        )
        .execute(self.pool())
        .await
        .context("failed to create ephemeral_photos owner index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ephemeral_photos_cleanup ON ephemeral_photos (created_at) WHERE deleted_at IS NULL",
        )
        .execute(self.pool())
        .await
        .context("failed to create ephemeral_photos cleanup index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ephemeral_photo_views (
                id TEXT PRIMARY KEY,
                photo_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                viewer_id TEXT,
                ip_address TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                viewed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.pool())
        .await
        .context("failed to create ephemeral_photo_views table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_ephemeral_photo_views_photo ON ephemeral_photo_views (photo_id, viewed_at DESC)",
        )
        .execute(self.pool())
        .await
        .context("failed to create ephemeral_photo_views index")?;

        Ok(())
    }

    async fn fetch_one_photo(&self, column: &str, value: &str) -> Result<Option<EphemeralPhoto>> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM ephemeral_photos WHERE {column} = $1");
        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(value)
            .fetch_optional(self.pool())
            .await
            .with_context(|| format!("failed to load ephemeral photo by {column}"))?;
        Ok(row.map(Into::into))
    }

    async fn aggregate(&self, owner: Option<&str>, now: DateTime<Utc>) -> Result<PhotoStats> {
        let sql = format!(
            r#"
            SELECT
                COUNT(*) AS total_photos,
                COUNT(*) FILTER (WHERE {ACTIVE_PREDICATE}) AS active_photos,
                COUNT(*) FILTER (WHERE deleted_at IS NULL AND is_viewed) AS viewed_photos,
                COUNT(*) FILTER (WHERE deleted_at IS NULL AND NOT ({ACTIVE_PREDICATE})) AS expired_photos,
                COUNT(*) FILTER (WHERE deleted_at IS NOT NULL) AS deleted_photos,
                COALESCE(SUM(view_count), 0)::BIGINT AS total_views
            FROM ephemeral_photos
            WHERE ($2::TEXT IS NULL OR owner_id = $2)
            "#
        );
        let row = sqlx::query_as::<_, StatsRow>(&sql)
            .bind(now)
            .bind(owner)
            .fetch_one(self.pool())
            .await
            .context("failed to aggregate ephemeral photo stats")?;
        Ok(row.into())
    }
}

#[async_trait]
impl EphemeralPhotoStore for PostgresEphemeralPhotoStore {
    async fn create(&self, photo: &EphemeralPhoto) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ephemeral_photos (
                id,
                owner_id,
                photo_url,
                photo_key,
                thumbnail_url,
                thumbnail_key,
                access_key,
                created_at,
                expires_at,
                max_views,
                view_count,
                is_viewed,
                is_expired,
                deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&photo.id)
        .bind(&photo.owner_id)
        .bind(&photo.photo.url)
        .bind(&photo.photo.storage_key)
        .bind(&photo.thumbnail.url)
        .bind(&photo.thumbnail.storage_key)
        .bind(&photo.access_key)
        .bind(photo.created_at)
        .bind(photo.expires_at)
        .bind(photo.max_views)
        .bind(photo.view_count)
        .bind(photo.is_viewed)
        .bind(photo.is_expired)
        .bind(photo.deleted_at)
        .execute(self.pool())
        .await
        .context("failed to insert ephemeral photo")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_by_id(&self, photo_id: &str) -> Result<Option<EphemeralPhoto>> {
        self.fetch_one_photo("id", photo_id).await
    }

    async fn get_by_access_key(&self, access_key: &str) -> Result<Option<EphemeralPhoto>> {
        self.fetch_one_photo("access_key", access_key).await
    }

    async fn user_has_photo(&self, user_id: &str, photo_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ephemeral_photos WHERE id = $1 AND owner_id = $2)",
        )
        .bind(photo_id)
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .context("failed to check photo ownership")?;
        Ok(exists)
    }

    async fn increment_view_count(&self, photo_id: &str) -> Result<Option<i32>> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE ephemeral_photos
            SET view_count = view_count + 1,
                is_viewed = TRUE,
                is_expired = (view_count + 1 >= max_views)
            WHERE id = $1
              AND deleted_at IS NULL
              AND NOT is_expired
              AND view_count < max_views
            RETURNING view_count
            "#,
        )
        .bind(photo_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to increment view count")?;
        Ok(count)
    }

    async fn mark_viewed(&self, photo_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ephemeral_photos SET is_viewed = TRUE WHERE id = $1 AND NOT is_viewed AND deleted_at IS NULL",
        )
        .bind(photo_id)
        .execute(self.pool())
        .await
        .context("failed to mark photo viewed")?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_expired(&self, photo_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ephemeral_photos SET is_expired = TRUE WHERE id = $1 AND NOT is_expired AND deleted_at IS NULL",
        )
        .bind(photo_id)
        .execute(self.pool())
        .await
        .context("failed to mark photo expired")?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_view_count(&self, photo_id: &str) -> Result<Option<i32>> {
        let count: Option<i32> =
            sqlx::query_scalar("SELECT view_count FROM ephemeral_photos WHERE id = $1")
                .bind(photo_id)
                .fetch_optional(self.pool())
                .await
                .context("failed to load view count")?;
        Ok(count)
    }

    async fn list_user_photos(
        &self,
        user_id: &str,
        include_expired: bool,
    ) -> Result<Vec<EphemeralPhoto>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM ephemeral_photos \
             WHERE owner_id = $1 AND deleted_at IS NULL AND ($2 OR NOT is_expired) \
             ORDER BY created_at DESC, id"
        );
        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(user_id)
            .bind(include_expired)
            .fetch_all(self.pool())
            .await
            .context("failed to list user photos")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_user_active(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<EphemeralPhoto>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM ephemeral_photos \
             WHERE {ACTIVE_PREDICATE} AND owner_id = $2 \
             ORDER BY created_at DESC, id"
        );
        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(now)
            .bind(user_id)
            .fetch_all(self.pool())
            .await
            .context("failed to list active user photos")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EphemeralPhoto>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM ephemeral_photos \
             WHERE {ACTIVE_PREDICATE} \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(now)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .context("failed to list active photos")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_expired(&self, limit: i64, offset: i64) -> Result<Vec<EphemeralPhoto>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM ephemeral_photos \
             WHERE is_expired AND deleted_at IS NULL \
             ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .context("failed to list expired photos")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_expiring_soon(
        &self,
        now: DateTime<Utc>,
        within: Duration,
        limit: i64,
    ) -> Result<Vec<EphemeralPhoto>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM ephemeral_photos \
             WHERE {ACTIVE_PREDICATE} AND expires_at <= $2 \
             ORDER BY expires_at ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(now)
            .bind(now + within)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .context("failed to list photos expiring soon")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_photos_for_cleanup(
        &self,
        older_than: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<EphemeralPhoto>> {
        let sql = format!(
            "SELECT {PHOTO_COLUMNS} FROM ephemeral_photos \
             WHERE deleted_at IS NULL \
               AND (expires_at < $1 OR ((is_expired OR is_viewed) AND created_at < $1)) \
             ORDER BY created_at ASC, id LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(older_than)
            .bind(batch_size)
            .fetch_all(self.pool())
            .await
            .context("failed to load cleanup candidates")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn batch_soft_delete(&self, photo_ids: &[String], at: DateTime<Utc>) -> Result<u64> {
        if photo_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE ephemeral_photos SET deleted_at = $2 WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(photo_ids)
        .bind(at)
        .execute(self.pool())
        .await
        .context("failed to soft delete photos")?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<PhotoStats> {
        self.aggregate(None, now).await
    }

    async fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<PhotoStats> {
        self.aggregate(Some(user_id), now).await
    }
}

#[async_trait]
impl PhotoViewLog for PostgresEphemeralPhotoStore {
    async fn append_view(&self, view: &EphemeralPhotoView) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ephemeral_photo_views (
                id, photo_id, owner_id, viewer_id, ip_address, user_agent, duration_seconds, viewed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&view.id)
        .bind(&view.photo_id)
        .bind(&view.owner_id)
        .bind(&view.viewer_id)
        .bind(&view.ip_address)
        .bind(&view.user_agent)
        .bind(view.duration_seconds)
        .bind(view.viewed_at)
        .execute(self.pool())
        .await
        .context("failed to append photo view")?;
        Ok(())
    }

    async fn recent_views(&self, photo_id: &str, limit: i64) -> Result<Vec<EphemeralPhotoView>> {
        let rows = sqlx::query_as::<_, ViewRow>(
            r#"
            SELECT id, photo_id, owner_id, viewer_id, ip_address, user_agent, duration_seconds, viewed_at
            FROM ephemeral_photo_views
            WHERE photo_id = $1
            ORDER BY viewed_at DESC
            LIMIT $2
            "#,
        )
        .bind(photo_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .context("failed to load recent photo views")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_views_since(&self, photo_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ephemeral_photo_views WHERE photo_id = $1 AND viewed_at >= $2",
        )
        .bind(photo_id)
        .bind(since)
        .fetch_one(self.pool())
        .await
        .context("failed to count photo views")?;
        Ok(count)
    }
}
