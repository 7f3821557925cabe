//! 进程内照片存储
//!
//! 所有写操作持有同一把写锁，单个照片上的状态转换天然串行。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::model::{EphemeralPhoto, EphemeralPhotoView, PhotoStats};
use crate::domain::repository::{EphemeralPhotoStore, PhotoViewLog};

#[derive(Default)]
struct PhotoTables {
    photos: HashMap<String, EphemeralPhoto>,
    access_keys: HashMap<String, String>,
    views: Vec<EphemeralPhotoView>,
}

#[derive(Clone, Default)]
pub struct MemoryEphemeralPhotoStore {
    tables: Arc<RwLock<PhotoTables>>,
}

impl MemoryEphemeralPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn view_records(&self, photo_id: &str) -> Vec<EphemeralPhotoView> {
        self.tables
            .read()
            .await
            .views
            .iter()
            .filter(|view| view.photo_id == photo_id)
            .cloned()
            .collect()
    }
}

fn is_active(photo: &EphemeralPhoto, now: DateTime<Utc>) -> bool {
    !photo.is_deleted()
        && !photo.is_expired
        && photo.expires_at > now
        && photo.view_count < photo.max_views
}

fn page(mut photos: Vec<EphemeralPhoto>, limit: i64, offset: i64) -> Vec<EphemeralPhoto> {
    photos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    photos
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn aggregate<'a>(photos: impl Iterator<Item = &'a EphemeralPhoto>, now: DateTime<Utc>) -> PhotoStats {
    let mut stats = PhotoStats::default();
    for photo in photos {
        stats.total_photos += 1;
        stats.total_views += photo.view_count as i64;
        if photo.is_deleted() {
            stats.deleted_photos += 1;
            continue;
        }
        if photo.is_viewed {
            stats.viewed_photos += 1;
        }
        if is_active(photo, now) {
            stats.active_photos += 1;
        } else {
            stats.expired_photos += 1;
        }
    }
    stats
}

#[async_trait]
impl EphemeralPhotoStore for MemoryEphemeralPhotoStore {
    async fn create(&self, photo: &EphemeralPhoto) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.photos.contains_key(&photo.id) || tables.access_keys.contains_key(&photo.access_key)
        {
            return Ok(false);
        }
        tables
            .access_keys
            .insert(photo.access_key.clone(), photo.id.clone());
        tables.photos.insert(photo.id.clone(), photo.clone());
        Ok(true)
    }

    async fn get_by_id(&self, photo_id: &str) -> Result<Option<EphemeralPhoto>> {
        Ok(self.tables.read().await.photos.get(photo_id).cloned())
    }

    async fn get_by_access_key(&self, access_key: &str) -> Result<Option<EphemeralPhoto>> {
        let tables = self.tables.read().await;
        Ok(tables
            .access_keys
            .get(access_key)
            .and_then(|id| tables.photos.get(id))
            .cloned())
    }

    async fn user_has_photo(&self, user_id: &str, photo_id: &str) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .await
            .photos
            .get(photo_id)
            .map(|photo| photo.owner_id == user_id)
            .unwrap_or(false))
    }

    async fn increment_view_count(&self, photo_id: &str) -> Result<Option<i32>> {
        let mut tables = self.tables.write().await;
        let Some(photo) = tables.photos.get_mut(photo_id) else {
            return Ok(None);
        };
        if photo.is_deleted() || photo.is_expired || photo.view_count >= photo.max_views {
            return Ok(None);
        }
        photo.view_count += 1;
        photo.is_viewed = true;
        if photo.view_count >= photo.max_views {
            photo.is_expired = true;
        }
        Ok(Some(photo.view_count))
    }

    async fn mark_viewed(&self, photo_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.photos.get_mut(photo_id) {
            Some(photo) if !photo.is_viewed && !photo.is_deleted() => {
                photo.is_viewed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_expired(&self, photo_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.photos.get_mut(photo_id) {
            Some(photo) if !photo.is_expired && !photo.is_deleted() => {
                photo.is_expired = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_view_count(&self, photo_id: &str) -> Result<Option<i32>> {
        Ok(self
            .tables
            .read()
            .await
            .photos
            .get(photo_id)
            .map(|photo| photo.view_count))
    }

    async fn list_user_photos(
        &self,
        user_id: &str,
        include_expired: bool,
    ) -> Result<Vec<EphemeralPhoto>> {
        let tables = self.tables.read().await;
        let photos = tables
            .photos
            .values()
            .filter(|photo| photo.owner_id == user_id && !photo.is_deleted())
            .filter(|photo| include_expired || !photo.is_expired)
            .cloned()
            .collect();
        Ok(page(photos, i64::MAX, 0))
    }

    async fn list_user_active(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<EphemeralPhoto>> {
        let tables = self.tables.read().await;
        let photos = tables
            .photos
            .values()
            .filter(|photo| photo.owner_id == user_id && is_active(photo, now))
            .cloned()
            .collect();
        Ok(page(photos, i64::MAX, 0))
    }

    async fn list_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EphemeralPhoto>> {
        let tables = self.tables.read().await;
        let photos = tables
            .photos
            .values()
            .filter(|photo| is_active(photo, now))
            .cloned()
            .collect();
        Ok(page(photos, limit, offset))
    }

    async fn list_expired(&self, limit: i64, offset: i64) -> Result<Vec<EphemeralPhoto>> {
        let tables = self.tables.read().await;
        let photos = tables
            .photos
            .values()
            .filter(|photo| photo.is_expired && !photo.is_deleted())
            .cloned()
            .collect();
        Ok(page(photos, limit, offset))
    }

    async fn list_expiring_soon(
        &self,
        now: DateTime<Utc>,
        within: Duration,
        limit: i64,
    ) -> Result<Vec<EphemeralPhoto>> {
        let horizon = now + within;
        let tables = self.tables.read().await;
        let mut photos: Vec<EphemeralPhoto> = tables
            .photos
            .values()
            .filter(|photo| is_active(photo, now) && photo.expires_at <= horizon)
            .cloned()
            .collect();
        photos.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        photos.truncate(limit.max(0) as usize);
        Ok(photos)
    }

    async fn get_photos_for_cleanup(
        &self,
        older_than: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<EphemeralPhoto>> {
        let tables = self.tables.read().await;
        let mut photos: Vec<EphemeralPhoto> = tables
            .photos
            .values()
            .filter(|photo| !photo.is_deleted())
            .filter(|photo| {
                photo.expires_at < older_than
                    || ((photo.is_expired || photo.is_viewed) && photo.created_at < older_than)
            })
            .cloned()
            .collect();
        photos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        photos.truncate(batch_size.max(0) as usize);
        Ok(photos)
    }

    async fn batch_soft_delete(&self, photo_ids: &[String], at: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut deleted = 0;
        for photo_id in photo_ids {
            if let Some(photo) = tables.photos.get_mut(photo_id) {
                if photo.deleted_at.is_none() {
                    photo.deleted_at = Some(at);
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<PhotoStats> {
        let tables = self.tables.read().await;
        Ok(aggregate(tables.photos.values(), now))
    }

    async fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<PhotoStats> {
        let tables = self.tables.read().await;
        Ok(aggregate(
            tables.photos.values().filter(|photo| photo.owner_id == user_id),
            now,
        ))
    }
}

#[async_trait]
impl PhotoViewLog for MemoryEphemeralPhotoStore {
    async fn append_view(&self, view: &EphemeralPhotoView) -> Result<()> {
        self.tables.write().await.views.push(view.clone());
        Ok(())
    }

    async fn recent_views(&self, photo_id: &str, limit: i64) -> Result<Vec<EphemeralPhotoView>> {
        let tables = self.tables.read().await;
        let mut views: Vec<EphemeralPhotoView> = tables
            .views
            .iter()
            .filter(|view| view.photo_id == photo_id)
            .cloned()
            .collect();
        views.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        views.truncate(limit.max(0) as usize);
        Ok(views)
    }

    async fn count_views_since(&self, photo_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .views
            .iter()
            .filter(|view| view.photo_id == photo_id && view.viewed_at >= since)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::AssetLocator;

    fn photo(id: &str, key: &str, now: DateTime<Utc>, max_views: i32) -> EphemeralPhoto {
        EphemeralPhoto {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            photo: AssetLocator::new(format!("https://cdn/{id}.jpg"), format!("{id}.jpg")),
            thumbnail: AssetLocator::new(format!("https://cdn/{id}_t.jpg"), format!("{id}_t.jpg")),
            access_key: key.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(60),
            max_views,
            view_count: 0,
            is_viewed: false,
            is_expired: false,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id_and_access_key() {
        let store = MemoryEphemeralPhotoStore::new();
        let now = Utc::now();
        assert!(store.create(&photo("p1", "k1", now, 1)).await.unwrap());
        assert!(!store.create(&photo("p1", "k2", now, 1)).await.unwrap());
        assert!(!store.create(&photo("p2", "k1", now, 1)).await.unwrap());
        assert_eq!(
            store.get_by_access_key("k1").await.unwrap().map(|p| p.id),
            Some("p1".to_string())
        );
    }

    #[tokio::test]
    async fn test_increment_is_conditional_and_expires_at_cap() {
        let store = MemoryEphemeralPhotoStore::new();
        store.create(&photo("p1", "k1", Utc::now(), 2)).await.unwrap();

        assert_eq!(store.increment_view_count("p1").await.unwrap(), Some(1));
        assert_eq!(store.increment_view_count("p1").await.unwrap(), Some(2));
        assert_eq!(store.increment_view_count("p1").await.unwrap(), None);

        let stored = store.get_by_id("p1").await.unwrap().unwrap();
        assert!(stored.is_expired);
        assert!(stored.is_viewed);
        assert_eq!(stored.view_count, 2);
        assert_eq!(store.increment_view_count("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_sets_viewed_in_same_write() {
        let store = MemoryEphemeralPhotoStore::new();
        store.create(&photo("p1", "k1", Utc::now(), 3)).await.unwrap();

        assert_eq!(store.increment_view_count("p1").await.unwrap(), Some(1));
        let stored = store.get_by_id("p1").await.unwrap().unwrap();
        assert!(stored.is_viewed);
        assert!(!stored.is_expired);
        // 已由自增置位，单独标记不再产生变化
        assert!(!store.mark_viewed("p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_flags_are_idempotent() {
        let store = MemoryEphemeralPhotoStore::new();
        store.create(&photo("p1", "k1", Utc::now(), 1)).await.unwrap();
        assert!(store.mark_viewed("p1").await.unwrap());
        assert!(!store.mark_viewed("p1").await.unwrap());
        assert!(store.mark_expired("p1").await.unwrap());
        assert!(!store.mark_expired("p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_candidates_and_soft_delete() {
        let store = MemoryEphemeralPhotoStore::new();
        let now = Utc::now();
        let old = now - Duration::days(2);
        store.create(&photo("old", "k1", old, 1)).await.unwrap();
        store.create(&photo("fresh", "k2", now, 1)).await.unwrap();

        let cutoff = now - Duration::days(1);
        let candidates = store.get_photos_for_cleanup(cutoff, 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "old");

        let ids = vec!["old".to_string()];
        assert_eq!(store.batch_soft_delete(&ids, now).await.unwrap(), 1);
        assert_eq!(store.batch_soft_delete(&ids, now).await.unwrap(), 0);
        assert!(store.get_photos_for_cleanup(cutoff, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_partition_photos() {
        let store = MemoryEphemeralPhotoStore::new();
        let now = Utc::now();
        store.create(&photo("p1", "k1", now, 1)).await.unwrap();
        store.create(&photo("p2", "k2", now, 3)).await.unwrap();
        store.create(&photo("p3", "k3", now, 1)).await.unwrap();
        store.increment_view_count("p1").await.unwrap();
        store.mark_viewed("p1").await.unwrap();
        store.batch_soft_delete(&["p3".to_string()], now).await.unwrap();

        let stats = store.stats(now).await.unwrap();
        assert_eq!(stats.total_photos, 3);
        assert_eq!(stats.active_photos, 1);
        assert_eq!(stats.expired_photos, 1);
        assert_eq!(stats.viewed_photos, 1);
        assert_eq!(stats.deleted_photos, 1);
        assert_eq!(stats.total_views, 1);
    }
}
