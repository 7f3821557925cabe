//! 阅后即焚照片领域服务
//!
//! 负责照片的上传、查看准入、所有者操作、统计与回收批次。
//! 存储错误向调用方传播；查看记录写入、缓存、推送失败只记录日志。

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use winkr_core::RequestContext;

use super::notification_service::NotificationFanout;
use super::photo_lock::PhotoLocks;
use crate::config::ChatConfig;
use crate::domain::clock::ClockRef;
use crate::domain::model::{
    DEFAULT_MAX_VIEWS, DEFAULT_PHOTO_TTL_SECONDS, DEFAULT_VIEW_STATS_WINDOW, EphemeralPhoto,
    EphemeralPhotoView, PhotoEvent, PhotoStats, PhotoViewStats, UploadPhotoRequest,
    UserPhotoOverview, ViewerInfo,
};
use crate::domain::repository::{
    AccessKeyGeneratorRef, PhotoStoreRef, PhotoViewLogRef, UserRepositoryRef,
};
use crate::error::{EphemeralError, EphemeralResult};
use crate::infrastructure::cache::ChatCache;

/// 访问密钥冲突时的最大生成次数
pub const MAX_KEYGEN_ATTEMPTS: usize = 3;
/// 列表接口的分页上限
pub const MAX_PAGE_SIZE: i64 = 100;
/// 概览中“即将过期”的时间范围
const OVERVIEW_EXPIRING_WITHIN_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct PhotoServiceSettings {
    pub default_ttl_seconds: i64,
    pub default_max_views: i32,
    pub view_stats_window: i64,
}

impl Default for PhotoServiceSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_PHOTO_TTL_SECONDS,
            default_max_views: DEFAULT_MAX_VIEWS,
            view_stats_window: DEFAULT_VIEW_STATS_WINDOW,
        }
    }
}

impl From<&ChatConfig> for PhotoServiceSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            default_ttl_seconds: config.default_photo_ttl_seconds,
            default_max_views: config.default_max_views,
            view_stats_window: config.view_stats_window,
        }
    }
}

/// 一次回收批次的结果
#[derive(Debug, Clone, Default)]
pub struct CleanupBatch {
    pub candidates: Vec<EphemeralPhoto>,
    pub deleted: u64,
}

pub struct EphemeralPhotoService {
    store: PhotoStoreRef,
    view_log: PhotoViewLogRef,
    users: UserRepositoryRef,
    keygen: AccessKeyGeneratorRef,
    cache: Option<ChatCache>,
    notifier: NotificationFanout,
    clock: ClockRef,
    settings: PhotoServiceSettings,
    locks: PhotoLocks,
}

impl EphemeralPhotoService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: PhotoStoreRef,
        view_log: PhotoViewLogRef,
        users: UserRepositoryRef,
        keygen: AccessKeyGeneratorRef,
        cache: Option<ChatCache>,
        notifier: NotificationFanout,
        clock: ClockRef,
        settings: PhotoServiceSettings,
    ) -> Self {
        Self {
            store,
            view_log,
            users,
            keygen,
            cache,
            notifier,
            clock,
            settings,
            locks: PhotoLocks::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[instrument(skip(self, ctx, request), fields(request_id = %ctx.request_id(), owner_id = %request.owner_id))]
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        request: UploadPhotoRequest,
    ) -> EphemeralResult<EphemeralPhoto> {
        ctx.ensure_active()?;
        if request.owner_id.is_empty() {
            return Err(EphemeralError::InvalidArgument("owner id is empty".to_string()));
        }

        if !ctx.run(self.users.exists_by_id(&request.owner_id)).await?? {
            return Err(EphemeralError::UserNotFound(request.owner_id));
        }

        let max_views = request
            .max_views
            .filter(|views| *views > 0)
            .unwrap_or(self.settings.default_max_views);
        let ttl_seconds = request
            .ttl_seconds
            .filter(|ttl| *ttl > 0)
            .unwrap_or(self.settings.default_ttl_seconds);

        for attempt in 1..=MAX_KEYGEN_ATTEMPTS {
            let access_key = self
                .keygen
                .generate()
                .map_err(|err| EphemeralError::KeygenFailed(format!("{err:#}")))?;
            let now = self.clock.now();
            let photo = EphemeralPhoto {
                id: Uuid::new_v4().to_string(),
                owner_id: request.owner_id.clone(),
                photo: request.photo.clone(),
                thumbnail: request.thumbnail.clone(),
                access_key,
                created_at: now,
                expires_at: now + Duration::seconds(ttl_seconds),
                max_views,
                view_count: 0,
                is_viewed: false,
                is_expired: false,
                deleted_at: None,
            };

            if ctx.run(self.store.create(&photo)).await?? {
                info!(photo_id = %photo.id, max_views, ttl_seconds, "ephemeral photo uploaded");
                self.write_through(ctx, &photo).await;
                return Ok(photo);
            }
            warn!(attempt, "access key or photo id collision, regenerating");
        }

        Err(EphemeralError::KeygenFailed(format!(
            "no unique access key after {MAX_KEYGEN_ATTEMPTS} attempts"
        )))
    }

    /// 按ID读取，优先读缓存
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn get(&self, ctx: &RequestContext, photo_id: &str) -> EphemeralResult<EphemeralPhoto> {
        ctx.ensure_active()?;
        if let Some(cache) = &self.cache {
            match ctx.run(cache.get_cached_photo(photo_id)).await? {
                Ok(Some(photo)) => return Ok(photo),
                Ok(None) => {}
                Err(err) => warn!(photo_id, error = %err, "photo cache read failed"),
            }
        }

        // 回填与状态转换互斥，避免把转换前的旧记录写回缓存
        let _guard = ctx.run(self.locks.lock(photo_id)).await?;
        let photo = self.load(ctx, photo_id).await?;
        self.write_through(ctx, &photo).await;
        Ok(photo)
    }

    #[instrument(skip(self, ctx, access_key), fields(request_id = %ctx.request_id()))]
    pub async fn get_by_access_key(
        &self,
        ctx: &RequestContext,
        access_key: &str,
    ) -> EphemeralResult<EphemeralPhoto> {
        ctx.ensure_active()?;
        ctx.run(self.store.get_by_access_key(access_key))
            .await??
            .ok_or_else(|| EphemeralError::NotFound("access key".to_string()))
    }

    /// 查看准入
    ///
    /// 同一照片的准入在临界区内串行；被拒绝的查看不会增加计数。
    /// 返回查看后的最新记录（刷新失败时返回本地推算的快照）。
    #[instrument(skip(self, ctx, access_key, viewer), fields(
        request_id = %ctx.request_id(),
        viewer_id = viewer.viewer_id.as_deref().unwrap_or("anonymous"),
    ))]
    pub async fn view(
        &self,
        ctx: &RequestContext,
        access_key: &str,
        viewer: &ViewerInfo,
    ) -> EphemeralResult<EphemeralPhoto> {
        let resolved = self.get_by_access_key(ctx, access_key).await?;
        let _guard = ctx.run(self.locks.lock(&resolved.id)).await?;

        // 拿到锁之后重新读取，前一个查看者可能已经改变了状态
        let photo = self.load(ctx, &resolved.id).await?;
        let now = self.clock.now();

        if photo.is_deleted() {
            return Err(EphemeralError::Gone(photo.id));
        }
        if photo.is_expired {
            return Err(if photo.views_exhausted() {
                EphemeralError::ViewsExhausted(photo.id)
            } else {
                EphemeralError::Expired(photo.id)
            });
        }
        if photo.is_time_expired(now) {
            self.expire_best_effort(ctx, &photo, now).await;
            return Err(EphemeralError::Expired(photo.id));
        }
        if photo.views_exhausted() {
            self.expire_best_effort(ctx, &photo, now).await;
            return Err(EphemeralError::ViewsExhausted(photo.id));
        }

        let record = EphemeralPhotoView {
            id: Uuid::new_v4().to_string(),
            photo_id: photo.id.clone(),
            owner_id: photo.owner_id.clone(),
            viewer_id: viewer.viewer_id.clone(),
            ip_address: viewer.ip_address.clone(),
            user_agent: viewer.user_agent.clone(),
            duration_seconds: 0,
            viewed_at: now,
        };
        match ctx.run(self.view_log.append_view(&record)).await? {
            Ok(()) => {}
            Err(err) => warn!(photo_id = %photo.id, error = %err, "failed to append view record"),
        }

        // 自增在同一次写入中置 is_viewed
        let Some(view_count) = ctx.run(self.store.increment_view_count(&photo.id)).await?? else {
            // 条件自增未命中：其他节点已将照片推进到终态
            let current = self.load(ctx, &photo.id).await?;
            self.invalidate_cached(ctx, &photo.id).await;
            return Err(if current.is_deleted() {
                EphemeralError::Gone(current.id)
            } else if current.views_exhausted() {
                EphemeralError::ViewsExhausted(current.id)
            } else {
                EphemeralError::Expired(current.id)
            });
        };

        // 从这里开始查看已提交，后续失败只记录日志
        let exhausted = view_count >= photo.max_views;
        if exhausted {
            // 自增已在同一次写入中置位，这里只是确认
            match ctx.run(self.store.mark_expired(&photo.id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(photo_id = %photo.id, error = %err, "failed to confirm expiry after view")
                }
                Err(err) => debug!(photo_id = %photo.id, error = %err, "skip expiry confirmation"),
            }
        }
        self.invalidate_cached(ctx, &photo.id).await;
        if exhausted {
            info!(photo_id = %photo.id, view_count, "photo reached view limit");
            self.notifier
                .publish(ctx, &PhotoEvent::expired(&photo.id, &photo.owner_id, now))
                .await;
        }

        match ctx.run(self.store.get_by_id(&photo.id)).await {
            Ok(Ok(Some(refreshed))) => Ok(refreshed),
            refreshed => {
                if let Ok(Err(err)) = &refreshed {
                    warn!(photo_id = %photo.id, error = %err, "failed to refresh photo after view");
                }
                let mut snapshot = photo;
                snapshot.view_count = view_count;
                snapshot.is_viewed = true;
                snapshot.is_expired = exhausted;
                Ok(snapshot)
            }
        }
    }

    /// 所有者删除（软删除，幂等）
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        owner_id: &str,
        photo_id: &str,
    ) -> EphemeralResult<()> {
        ctx.ensure_active()?;
        let _guard = ctx.run(self.locks.lock(photo_id)).await?;
        let photo = self.load_owned(ctx, owner_id, photo_id).await?;
        if photo.is_deleted() {
            return Ok(());
        }

        let now = self.clock.now();
        let deleted = ctx
            .run(self.store.batch_soft_delete(&[photo.id.clone()], now))
            .await??;
        self.invalidate_cached(ctx, &photo.id).await;
        if deleted > 0 {
            info!(photo_id = %photo.id, "ephemeral photo deleted by owner");
            self.notifier
                .publish(ctx, &PhotoEvent::deleted(&photo.id, &photo.owner_id, now))
                .await;
        }
        Ok(())
    }

    /// 所有者手动过期（幂等）
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn expire(
        &self,
        ctx: &RequestContext,
        owner_id: &str,
        photo_id: &str,
    ) -> EphemeralResult<()> {
        ctx.ensure_active()?;
        let _guard = ctx.run(self.locks.lock(photo_id)).await?;
        let photo = self.load_owned(ctx, owner_id, photo_id).await?;
        if photo.is_deleted() || photo.is_expired {
            return Ok(());
        }

        let now = self.clock.now();
        if ctx.run(self.store.mark_expired(&photo.id)).await?? {
            self.invalidate_cached(ctx, &photo.id).await;
            info!(photo_id = %photo.id, "ephemeral photo expired by owner");
            self.notifier
                .publish(ctx, &PhotoEvent::expired(&photo.id, &photo.owner_id, now))
                .await;
        }
        Ok(())
    }

    /// 追加一条查看记录（客户端上报最终查看时长）
    #[instrument(skip(self, ctx, viewer), fields(request_id = %ctx.request_id()))]
    pub async fn track_view(
        &self,
        ctx: &RequestContext,
        photo_id: &str,
        owner_id: &str,
        viewer: &ViewerInfo,
        duration_seconds: i32,
    ) -> EphemeralResult<EphemeralPhotoView> {
        ctx.ensure_active()?;
        let photo = self.load_owned(ctx, owner_id, photo_id).await?;
        if photo.is_deleted() {
            return Err(EphemeralError::Gone(photo.id));
        }

        let record = EphemeralPhotoView {
            id: Uuid::new_v4().to_string(),
            photo_id: photo.id,
            owner_id: photo.owner_id,
            viewer_id: viewer.viewer_id.clone(),
            ip_address: viewer.ip_address.clone(),
            user_agent: viewer.user_agent.clone(),
            duration_seconds: duration_seconds.max(0),
            viewed_at: self.clock.now(),
        };
        ctx.run(self.view_log.append_view(&record)).await??;
        Ok(record)
    }

    /// 查看统计
    ///
    /// 去重查看者与平均时长只基于最近 `view_stats_window` 条记录；
    /// 按天分桶的计数是精确值。
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn get_photo_view_stats(
        &self,
        ctx: &RequestContext,
        photo_id: &str,
    ) -> EphemeralResult<PhotoViewStats> {
        ctx.ensure_active()?;
        let now = self.clock.now();
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let window = self.settings.view_stats_window.max(1);

        let (total_views, recent, views_today, views_last_7_days, views_last_30_days) = ctx
            .run(async {
                tokio::try_join!(
                    self.store.get_view_count(photo_id),
                    self.view_log.recent_views(photo_id, window),
                    self.view_log.count_views_since(photo_id, start_of_day),
                    self.view_log.count_views_since(photo_id, now - Duration::days(7)),
                    self.view_log.count_views_since(photo_id, now - Duration::days(30)),
                )
            })
            .await??;

        let Some(total_views) = total_views else {
            return Err(EphemeralError::NotFound(photo_id.to_string()));
        };

        let unique_viewers = recent
            .iter()
            .filter_map(|view| view.viewer_id.as_deref())
            .collect::<HashSet<_>>()
            .len() as i64;
        let average_view_duration = if recent.is_empty() {
            0.0
        } else {
            recent
                .iter()
                .map(|view| view.duration_seconds as f64)
                .sum::<f64>()
                / recent.len() as f64
        };

        Ok(PhotoViewStats {
            photo_id: photo_id.to_string(),
            total_views: total_views as i64,
            unique_viewers,
            average_view_duration,
            views_today,
            views_last_7_days,
            views_last_30_days,
            window_size: window,
        })
    }

    pub async fn get_user_photos(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        include_expired: bool,
    ) -> EphemeralResult<Vec<EphemeralPhoto>> {
        Ok(ctx
            .run(self.store.list_user_photos(user_id, include_expired))
            .await??)
    }

    pub async fn get_user_active_photos(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> EphemeralResult<Vec<EphemeralPhoto>> {
        Ok(ctx
            .run(self.store.list_user_active(user_id, self.clock.now()))
            .await??)
    }

    pub async fn list_active(
        &self,
        ctx: &RequestContext,
        limit: i64,
        offset: i64,
    ) -> EphemeralResult<Vec<EphemeralPhoto>> {
        Ok(ctx
            .run(self.store.list_active(
                self.clock.now(),
                clamp_limit(limit),
                offset.max(0),
            ))
            .await??)
    }

    pub async fn list_expired(
        &self,
        ctx: &RequestContext,
        limit: i64,
        offset: i64,
    ) -> EphemeralResult<Vec<EphemeralPhoto>> {
        Ok(ctx
            .run(self.store.list_expired(clamp_limit(limit), offset.max(0)))
            .await??)
    }

    pub async fn get_expiring_soon(
        &self,
        ctx: &RequestContext,
        within: Duration,
        limit: i64,
    ) -> EphemeralResult<Vec<EphemeralPhoto>> {
        if within <= Duration::zero() {
            return Err(EphemeralError::InvalidArgument(
                "expiring-soon window must be positive".to_string(),
            ));
        }
        Ok(ctx
            .run(
                self.store
                    .list_expiring_soon(self.clock.now(), within, clamp_limit(limit)),
            )
            .await??)
    }

    pub async fn get_stats(&self, ctx: &RequestContext) -> EphemeralResult<PhotoStats> {
        Ok(ctx.run(self.store.stats(self.clock.now())).await??)
    }

    pub async fn get_user_stats(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> EphemeralResult<PhotoStats> {
        Ok(ctx
            .run(self.store.user_stats(user_id, self.clock.now()))
            .await??)
    }

    /// 用户概览：并行读取统计与活跃照片
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn get_user_overview(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> EphemeralResult<UserPhotoOverview> {
        ctx.ensure_active()?;
        let now = self.clock.now();
        let (stats, active_photos) = ctx
            .run(async {
                tokio::try_join!(
                    self.store.user_stats(user_id, now),
                    self.store.list_user_active(user_id, now),
                )
            })
            .await??;

        let horizon = now + Duration::minutes(OVERVIEW_EXPIRING_WITHIN_MINUTES);
        let mut expiring_soon: Vec<EphemeralPhoto> = active_photos
            .iter()
            .filter(|photo| photo.expires_at <= horizon)
            .cloned()
            .collect();
        expiring_soon.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));

        Ok(UserPhotoOverview {
            user_id: user_id.to_string(),
            stats,
            active_photos,
            expiring_soon,
        })
    }

    /// 一个回收批次：查询候选并软删除
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn cleanup_photos(
        &self,
        ctx: &RequestContext,
        older_than: DateTime<Utc>,
        batch_size: i64,
    ) -> EphemeralResult<CleanupBatch> {
        ctx.ensure_active()?;
        let candidates = ctx
            .run(self.store.get_photos_for_cleanup(older_than, batch_size.max(1)))
            .await??;
        if candidates.is_empty() {
            return Ok(CleanupBatch::default());
        }

        let ids: Vec<String> = candidates.iter().map(|photo| photo.id.clone()).collect();
        let deleted = ctx
            .run(self.store.batch_soft_delete(&ids, self.clock.now()))
            .await??;
        // 等待进行中的回填结束后再失效
        join_all(ids.iter().map(|id| async move {
            if let Ok(_guard) = ctx.run(self.locks.lock(id)).await {
                self.invalidate_cached(ctx, id).await;
            }
        }))
        .await;
        debug!(candidates = ids.len(), deleted, "cleanup batch applied");

        Ok(CleanupBatch {
            candidates,
            deleted,
        })
    }

    async fn load(&self, ctx: &RequestContext, photo_id: &str) -> EphemeralResult<EphemeralPhoto> {
        ctx.run(self.store.get_by_id(photo_id))
            .await??
            .ok_or_else(|| EphemeralError::NotFound(photo_id.to_string()))
    }

    async fn load_owned(
        &self,
        ctx: &RequestContext,
        owner_id: &str,
        photo_id: &str,
    ) -> EphemeralResult<EphemeralPhoto> {
        let photo = self.load(ctx, photo_id).await?;
        if !photo.is_owned_by(owner_id) {
            return Err(EphemeralError::OwnerMismatch {
                user_id: owner_id.to_string(),
                photo_id: photo_id.to_string(),
            });
        }
        Ok(photo)
    }

    /// 尽力置过期标记，状态确实变化时通知所有者
    async fn expire_best_effort(&self, ctx: &RequestContext, photo: &EphemeralPhoto, now: DateTime<Utc>) {
        match ctx.run(self.store.mark_expired(&photo.id)).await {
            Ok(Ok(true)) => {
                self.invalidate_cached(ctx, &photo.id).await;
                self.notifier
                    .publish(ctx, &PhotoEvent::expired(&photo.id, &photo.owner_id, now))
                    .await;
            }
            Ok(Ok(false)) => {}
            Ok(Err(err)) => warn!(photo_id = %photo.id, error = %err, "failed to mark photo expired"),
            Err(err) => debug!(photo_id = %photo.id, error = %err, "skip mark expired"),
        }
    }

    async fn write_through(&self, ctx: &RequestContext, photo: &EphemeralPhoto) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Ok(Err(err)) = ctx.run(cache.cache_photo(photo)).await {
            warn!(photo_id = %photo.id, error = %err, "failed to cache photo");
        }
    }

    async fn invalidate_cached(&self, ctx: &RequestContext, photo_id: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Ok(Err(err)) = ctx.run(cache.invalidate_photo(photo_id)).await {
            warn!(photo_id, error = %err, "failed to invalidate photo cache");
        }
    }
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::model::{AssetLocator, PhotoStats};
    use crate::domain::repository::{AccessKeyGenerator, EphemeralPhotoStore, PhotoViewLog};
    use crate::infrastructure::cache::MemoryKeyValueCache;
    use crate::infrastructure::keygen::RandomAccessKeyGenerator;
    use crate::infrastructure::persistence::{MemoryEphemeralPhotoStore, MemoryUserRepository};
    use crate::infrastructure::push::LocalPushChannel;

    struct FailingViewLog;

    #[async_trait]
    impl PhotoViewLog for FailingViewLog {
        async fn append_view(&self, _view: &EphemeralPhotoView) -> Result<()> {
            Err(anyhow!("analytics table locked"))
        }

        async fn recent_views(&self, _photo_id: &str, _limit: i64) -> Result<Vec<EphemeralPhotoView>> {
            Ok(Vec::new())
        }

        async fn count_views_since(&self, _photo_id: &str, _since: DateTime<Utc>) -> Result<i64> {
            Ok(0)
        }
    }

    /// 写入后挂起，模拟卡住的分析表
    struct StalledViewLog {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl PhotoViewLog for StalledViewLog {
        async fn append_view(&self, _view: &EphemeralPhotoView) -> Result<()> {
            self.entered.notify_one();
            futures::future::pending().await
        }

        async fn recent_views(&self, _photo_id: &str, _limit: i64) -> Result<Vec<EphemeralPhotoView>> {
            Ok(Vec::new())
        }

        async fn count_views_since(&self, _photo_id: &str, _since: DateTime<Utc>) -> Result<i64> {
            Ok(0)
        }
    }

    /// 过期确认总是失败，其余操作委托给内存存储
    struct FlakyExpireStore {
        inner: MemoryEphemeralPhotoStore,
    }

    #[async_trait]
    impl EphemeralPhotoStore for FlakyExpireStore {
        async fn create(&self, photo: &EphemeralPhoto) -> Result<bool> {
            self.inner.create(photo).await
        }

        async fn get_by_id(&self, photo_id: &str) -> Result<Option<EphemeralPhoto>> {
            self.inner.get_by_id(photo_id).await
        }

        async fn get_by_access_key(&self, access_key: &str) -> Result<Option<EphemeralPhoto>> {
            self.inner.get_by_access_key(access_key).await
        }

        async fn user_has_photo(&self, user_id: &str, photo_id: &str) -> Result<bool> {
            self.inner.user_has_photo(user_id, photo_id).await
        }

        async fn increment_view_count(&self, photo_id: &str) -> Result<Option<i32>> {
            self.inner.increment_view_count(photo_id).await
        }

        async fn mark_viewed(&self, photo_id: &str) -> Result<bool> {
            self.inner.mark_viewed(photo_id).await
        }

        async fn mark_expired(&self, _photo_id: &str) -> Result<bool> {
            Err(anyhow!("replica lagging"))
        }

        async fn get_view_count(&self, photo_id: &str) -> Result<Option<i32>> {
            self.inner.get_view_count(photo_id).await
        }

        async fn list_user_photos(
            &self,
            user_id: &str,
            include_expired: bool,
        ) -> Result<Vec<EphemeralPhoto>> {
            self.inner.list_user_photos(user_id, include_expired).await
        }

        async fn list_user_active(
            &self,
            user_id: &str,
            now: DateTime<Utc>,
        ) -> Result<Vec<EphemeralPhoto>> {
            self.inner.list_user_active(user_id, now).await
        }

        async fn list_active(
            &self,
            now: DateTime<Utc>,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<EphemeralPhoto>> {
            self.inner.list_active(now, limit, offset).await
        }

        async fn list_expired(&self, limit: i64, offset: i64) -> Result<Vec<EphemeralPhoto>> {
            self.inner.list_expired(limit, offset).await
        }

        async fn list_expiring_soon(
            &self,
            now: DateTime<Utc>,
            within: Duration,
            limit: i64,
        ) -> Result<Vec<EphemeralPhoto>> {
            self.inner.list_expiring_soon(now, within, limit).await
        }

        async fn get_photos_for_cleanup(
            &self,
            older_than: DateTime<Utc>,
            batch_size: i64,
        ) -> Result<Vec<EphemeralPhoto>> {
            self.inner.get_photos_for_cleanup(older_than, batch_size).await
        }

        async fn batch_soft_delete(&self, photo_ids: &[String], at: DateTime<Utc>) -> Result<u64> {
            self.inner.batch_soft_delete(photo_ids, at).await
        }

        async fn stats(&self, now: DateTime<Utc>) -> Result<PhotoStats> {
            self.inner.stats(now).await
        }

        async fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<PhotoStats> {
            self.inner.user_stats(user_id, now).await
        }
    }

    /// 按顺序返回预设密钥
    struct ScriptedKeygen {
        keys: Mutex<Vec<&'static str>>,
    }

    impl AccessKeyGenerator for ScriptedKeygen {
        fn generate(&self) -> Result<String> {
            let mut keys = self.keys.lock().unwrap();
            if keys.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            Ok(keys.remove(0).to_string())
        }
    }

    struct Fixture {
        service: EphemeralPhotoService,
        store: MemoryEphemeralPhotoStore,
        clock: ManualClock,
        push: LocalPushChannel,
    }

    fn fixture_with(view_log: Option<PhotoViewLogRef>, keygen: AccessKeyGeneratorRef) -> Fixture {
        fixture_over(None, view_log, keygen)
    }

    /// `photo_store` 为空时直接使用内存存储
    fn fixture_over(
        photo_store: Option<PhotoStoreRef>,
        view_log: Option<PhotoViewLogRef>,
        keygen: AccessKeyGeneratorRef,
    ) -> Fixture {
        let store = MemoryEphemeralPhotoStore::new();
        let clock = ManualClock::default();
        let push = LocalPushChannel::new();
        let service = EphemeralPhotoService::new(
            photo_store.unwrap_or_else(|| Arc::new(store.clone()) as PhotoStoreRef),
            view_log.unwrap_or_else(|| Arc::new(store.clone()) as PhotoViewLogRef),
            Arc::new(MemoryUserRepository::with_users(["u1", "u2"])),
            keygen,
            Some(ChatCache::new(Arc::new(MemoryKeyValueCache::new()))),
            NotificationFanout::new(Arc::new(push.clone())),
            Arc::new(clock.clone()),
            PhotoServiceSettings::default(),
        );
        Fixture {
            service,
            store,
            clock,
            push,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None, Arc::new(RandomAccessKeyGenerator))
    }

    fn upload_request(owner: &str, max_views: Option<i32>, ttl: Option<i64>) -> UploadPhotoRequest {
        UploadPhotoRequest {
            owner_id: owner.to_string(),
            photo: AssetLocator::new("https://cdn/p.jpg", "photos/p.jpg"),
            thumbnail: AssetLocator::new("https://cdn/p_t.jpg", "photos/p_t.jpg"),
            max_views,
            ttl_seconds: ttl,
        }
    }

    fn viewer(id: &str) -> ViewerInfo {
        ViewerInfo::new(Some(id.to_string()), "10.0.0.1", "test-agent")
    }

    #[tokio::test]
    async fn test_upload_applies_defaults() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(0), None))
            .await
            .unwrap();

        assert_eq!(photo.max_views, 1);
        assert_eq!(photo.expires_at - photo.created_at, Duration::seconds(30));
        assert_eq!(photo.access_key.len(), 64);
        assert_eq!(f.service.get(&ctx, &photo.id).await.unwrap(), photo);
    }

    #[tokio::test]
    async fn test_upload_rejects_unknown_owner() {
        let f = fixture();
        let err = f
            .service
            .upload(&RequestContext::background(), upload_request("ghost", None, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_upload_retries_on_access_key_collision() {
        let keygen = Arc::new(ScriptedKeygen {
            keys: Mutex::new(vec!["k1", "k1", "k1", "k2"]),
        });
        let f = fixture_with(None, keygen);
        let ctx = RequestContext::background();

        let first = f.service.upload(&ctx, upload_request("u1", None, None)).await.unwrap();
        let second = f.service.upload(&ctx, upload_request("u1", None, None)).await.unwrap();
        assert_eq!(first.access_key, "k1");
        assert_eq!(second.access_key, "k2");
    }

    #[tokio::test]
    async fn test_upload_fails_after_bounded_retries() {
        let keygen = Arc::new(ScriptedKeygen {
            keys: Mutex::new(vec!["k1", "k1", "k1", "k1"]),
        });
        let f = fixture_with(None, keygen);
        let ctx = RequestContext::background();

        f.service.upload(&ctx, upload_request("u1", None, None)).await.unwrap();
        let err = f
            .service
            .upload(&ctx, upload_request("u1", None, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "KEYGEN_FAILED");
    }

    #[tokio::test]
    async fn test_view_survives_view_log_failure() {
        let f = fixture_with(Some(Arc::new(FailingViewLog)), Arc::new(RandomAccessKeyGenerator));
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(2), Some(60)))
            .await
            .unwrap();

        let viewed = f.service.view(&ctx, &photo.access_key, &viewer("u2")).await.unwrap();
        assert_eq!(viewed.view_count, 1);
        assert!(viewed.is_viewed);
        assert!(!viewed.is_expired);
    }

    #[tokio::test]
    async fn test_view_invalidates_cached_photo() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(1), Some(60)))
            .await
            .unwrap();

        // 预热缓存
        f.service.get(&ctx, &photo.id).await.unwrap();
        f.service.view(&ctx, &photo.access_key, &viewer("u2")).await.unwrap();

        let fresh = f.service.get(&ctx, &photo.id).await.unwrap();
        assert!(fresh.is_expired);
        assert_eq!(fresh.view_count, 1);
    }

    #[tokio::test]
    async fn test_view_cap_emits_expired_event_to_owner() {
        let f = fixture();
        let mut rx = f.push.subscribe("u1").await;
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(1), Some(60)))
            .await
            .unwrap();

        f.service.view(&ctx, &photo.access_key, &viewer("u2")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event["type"], "ephemeral_photo_expired");
        assert_eq!(event["photo_id"], photo.id.as_str());
    }

    #[tokio::test]
    async fn test_view_unknown_access_key() {
        let f = fixture();
        let err = f
            .service
            .view(&RequestContext::background(), "missing", &viewer("u2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_cancelled_context_does_not_mutate() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(3), Some(60)))
            .await
            .unwrap();

        let cancelled = RequestContext::background();
        cancelled.cancel();
        let err = f
            .service
            .view(&cancelled, &photo.access_key, &viewer("u2"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(f.store.get_view_count(&photo.id).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_expire_requires_ownership_and_is_idempotent() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(3), Some(60)))
            .await
            .unwrap();

        let err = f.service.expire(&ctx, "u2", &photo.id).await.unwrap_err();
        assert_eq!(err.code(), "OWNER_MISMATCH");

        f.service.expire(&ctx, "u1", &photo.id).await.unwrap();
        f.service.expire(&ctx, "u1", &photo.id).await.unwrap();

        let err = f
            .service
            .view(&ctx, &photo.access_key, &viewer("u2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXPIRED");
    }

    #[tokio::test]
    async fn test_view_stats_buckets_and_window() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(10), Some(3600)))
            .await
            .unwrap();

        f.service.view(&ctx, &photo.access_key, &viewer("u2")).await.unwrap();
        f.service.view(&ctx, &photo.access_key, &viewer("u2")).await.unwrap();
        f.service
            .view(&ctx, &photo.access_key, &ViewerInfo::new(None, "10.0.0.2", "anon"))
            .await
            .unwrap();
        f.service
            .track_view(&ctx, &photo.id, "u1", &viewer("u3"), 8)
            .await
            .unwrap();

        let stats = f.service.get_photo_view_stats(&ctx, &photo.id).await.unwrap();
        assert_eq!(stats.total_views, 3);
        assert_eq!(stats.unique_viewers, 2);
        assert_eq!(stats.views_last_7_days, 4);
        assert_eq!(stats.views_last_30_days, 4);
        assert!((stats.average_view_duration - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.window_size, 100);

        f.clock.advance(Duration::days(8));
        let later = f.service.get_photo_view_stats(&ctx, &photo.id).await.unwrap();
        assert_eq!(later.views_today, 0);
        assert_eq!(later.views_last_7_days, 0);
        assert_eq!(later.views_last_30_days, 4);
    }

    #[tokio::test]
    async fn test_view_stats_unknown_photo() {
        let f = fixture();
        let err = f
            .service
            .get_photo_view_stats(&RequestContext::background(), "missing")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_listing_and_overview() {
        let f = fixture();
        let ctx = RequestContext::background();
        let soon = f
            .service
            .upload(&ctx, upload_request("u1", Some(2), Some(600)))
            .await
            .unwrap();
        let later = f
            .service
            .upload(&ctx, upload_request("u1", Some(2), Some(7200)))
            .await
            .unwrap();
        let gone = f
            .service
            .upload(&ctx, upload_request("u1", Some(1), Some(600)))
            .await
            .unwrap();
        f.service.view(&ctx, &gone.access_key, &viewer("u2")).await.unwrap();

        assert_eq!(f.service.list_active(&ctx, 0, -5).await.unwrap().len(), 1);
        assert_eq!(f.service.list_active(&ctx, 500, 0).await.unwrap().len(), 2);
        assert_eq!(f.service.list_expired(&ctx, 10, 0).await.unwrap().len(), 1);
        assert_eq!(f.service.get_user_photos(&ctx, "u1", false).await.unwrap().len(), 2);
        assert_eq!(f.service.get_user_photos(&ctx, "u1", true).await.unwrap().len(), 3);

        let expiring = f
            .service
            .get_expiring_soon(&ctx, Duration::minutes(30), 10)
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].id, soon.id);

        let overview = f.service.get_user_overview(&ctx, "u1").await.unwrap();
        assert_eq!(overview.stats.total_photos, 3);
        assert_eq!(overview.stats.active_photos, 2);
        assert_eq!(overview.active_photos.len(), 2);
        assert_eq!(overview.expiring_soon.len(), 1);
        assert_eq!(overview.expiring_soon[0].id, soon.id);
        assert!(overview.active_photos.iter().any(|photo| photo.id == later.id));

        let stats = f.service.get_stats(&ctx).await.unwrap();
        assert_eq!(stats.expired_photos, 1);
        assert_eq!(stats.total_views, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_wait_honours_request_deadline() {
        let entered = Arc::new(Notify::new());
        let view_log = Arc::new(StalledViewLog {
            entered: entered.clone(),
        });
        let f = fixture_with(Some(view_log), Arc::new(RandomAccessKeyGenerator));
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(3), Some(60)))
            .await
            .unwrap();

        // 第一次查看在持有照片锁时卡在查看日志上
        let holder_viewer = viewer("u2");
        let holder = f.service.view(&ctx, &photo.access_key, &holder_viewer);
        tokio::pin!(holder);
        tokio::select! {
            _ = &mut holder => panic!("stalled view completed"),
            _ = entered.notified() => {}
        }

        let short = RequestContext::background().with_timeout(StdDuration::from_millis(100));
        let outcome = tokio::time::timeout(
            StdDuration::from_secs(2),
            f.service.view(&short, &photo.access_key, &viewer("u2")),
        )
        .await
        .expect("view must give up at the request deadline");
        assert_eq!(outcome.unwrap_err().code(), "TIMEOUT");

        let short = RequestContext::background().with_timeout(StdDuration::from_millis(100));
        let err = f.service.delete(&short, "u1", &photo.id).await.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        let short = RequestContext::background().with_timeout(StdDuration::from_millis(100));
        let err = f.service.expire(&short, "u1", &photo.id).await.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");

        let stored = f.store.get_by_id(&photo.id).await.unwrap().unwrap();
        assert!(!stored.is_deleted());
        assert!(!stored.is_expired);
    }

    #[tokio::test]
    async fn test_view_commits_when_expiry_confirmation_fails() {
        let memory = MemoryEphemeralPhotoStore::new();
        let flaky = Arc::new(FlakyExpireStore {
            inner: memory.clone(),
        });
        let f = fixture_over(
            Some(flaky),
            Some(Arc::new(memory.clone())),
            Arc::new(RandomAccessKeyGenerator),
        );
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(1), Some(60)))
            .await
            .unwrap();

        let viewed = f.service.view(&ctx, &photo.access_key, &viewer("u2")).await.unwrap();
        assert_eq!(viewed.view_count, 1);
        assert!(viewed.is_viewed);
        assert!(viewed.is_expired);

        let stored = memory.get_by_id(&photo.id).await.unwrap().unwrap();
        assert_eq!(stored.view_count, 1);
        assert!(stored.is_viewed);
        assert!(stored.is_expired);
        assert_eq!(memory.view_records(&photo.id).await.len(), 1);

        let err = f
            .service
            .view(&ctx, &photo.access_key, &viewer("u2"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VIEWS_EXHAUSTED");
    }

    #[tokio::test]
    async fn test_track_view_requires_live_owned_photo() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(3), Some(60)))
            .await
            .unwrap();

        let err = f
            .service
            .track_view(&ctx, "missing", "u1", &viewer("u2"), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = f
            .service
            .track_view(&ctx, &photo.id, "u2", &viewer("u2"), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OWNER_MISMATCH");

        f.service.delete(&ctx, "u1", &photo.id).await.unwrap();
        let err = f
            .service
            .track_view(&ctx, &photo.id, "u1", &viewer("u2"), 4)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GONE");

        assert!(f.store.view_records(&photo.id).await.is_empty());
        assert!(f.store.view_records("missing").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_fill_waits_for_state_transition() {
        let f = fixture();
        let ctx = RequestContext::background();
        let photo = f
            .service
            .upload(&ctx, upload_request("u1", Some(3), Some(60)))
            .await
            .unwrap();
        f.service.invalidate_cached(&ctx, &photo.id).await;

        let guard = f.service.locks.lock(&photo.id).await;
        let short = RequestContext::background().with_timeout(StdDuration::from_millis(50));
        let err = f.service.get(&short, &photo.id).await.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        drop(guard);

        f.service.delete(&ctx, "u1", &photo.id).await.unwrap();
        let fresh = f.service.get(&ctx, &photo.id).await.unwrap();
        assert!(fresh.is_deleted());
        // 回填写入的是删除后的记录
        let cached = f.service.get(&ctx, &photo.id).await.unwrap();
        assert!(cached.is_deleted());
    }
}
