//! 回收任务
//!
//! 周期性软删除超过保留期的照片。按批次 LIMIT 扫描，不持有全局锁；
//! 对已软删除的记录重复执行是无操作。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use winkr_core::RequestContext;

use crate::config::ChatConfig;
use crate::domain::service::EphemeralPhotoService;
use crate::error::EphemeralResult;

#[derive(Debug, Clone)]
pub struct ReclamationConfig {
    /// 执行间隔
    pub interval: Duration,
    /// 保留期：早于 `now - retention` 的照片成为候选
    pub retention: chrono::Duration,
    /// 每批最多处理的照片数
    pub batch_size: i64,
    /// 单个批次的超时
    pub batch_timeout: Duration,
}

impl Default for ReclamationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention: chrono::Duration::days(1),
            batch_size: 100,
            batch_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&ChatConfig> for ReclamationConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            interval: config.cleanup_interval,
            retention: chrono::Duration::seconds(config.cleanup_retention_seconds),
            batch_size: config.cleanup_batch_size,
            batch_timeout: config.operation_timeout,
        }
    }
}

/// 一次回收的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclamationReport {
    pub scanned: u64,
    /// 已过期或已过截止时间
    pub expired_cohort: u64,
    /// 已查看且创建早于截止时间
    pub viewed_cohort: u64,
    pub deleted: u64,
}

pub struct ReclamationWorker {
    photos: Arc<EphemeralPhotoService>,
    config: ReclamationConfig,
}

impl ReclamationWorker {
    pub fn new(photos: Arc<EphemeralPhotoService>, config: ReclamationConfig) -> Self {
        Self { photos, config }
    }

    /// 按配置间隔循环执行，直到 `shutdown` 被取消
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval.as_secs(),
            retention_secs = self.config.retention.num_seconds(),
            batch_size = self.config.batch_size,
            "reclamation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let ctx = RequestContext::background().with_cancellation(shutdown.child_token());
            if let Err(err) = self.run_once(&ctx).await {
                error!(error = %err, code = err.code(), "reclamation run failed");
            }
        }

        info!("reclamation worker stopped");
    }

    /// 执行一次完整回收：逐批处理直到出现不满批
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn run_once(&self, ctx: &RequestContext) -> EphemeralResult<ReclamationReport> {
        let cutoff = self.photos.now() - self.config.retention;
        let batch_size = self.config.batch_size.max(1);
        let mut report = ReclamationReport::default();

        loop {
            let batch_ctx = ctx.child().with_timeout(self.config.batch_timeout);
            let batch = self
                .photos
                .cleanup_photos(&batch_ctx, cutoff, batch_size)
                .await?;
            let fetched = batch.candidates.len();

            for photo in &batch.candidates {
                if photo.is_expired || photo.expires_at < cutoff {
                    report.expired_cohort += 1;
                } else {
                    report.viewed_cohort += 1;
                }
            }
            report.scanned += fetched as u64;
            report.deleted += batch.deleted;

            // 不满批说明已扫完；整批都未删除时停止，避免重复扫描同一批
            if (fetched as i64) < batch_size || batch.deleted == 0 {
                break;
            }
        }

        info!(
            scanned = report.scanned,
            expired_cohort = report.expired_cohort,
            viewed_cohort = report.viewed_cohort,
            deleted = report.deleted,
            cutoff = %cutoff,
            "reclamation run completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::model::{AssetLocator, UploadPhotoRequest, ViewerInfo};
    use crate::domain::repository::EphemeralPhotoStore;
    use crate::domain::service::{NotificationFanout, PhotoServiceSettings};
    use crate::infrastructure::keygen::RandomAccessKeyGenerator;
    use crate::infrastructure::persistence::{MemoryEphemeralPhotoStore, MemoryUserRepository};
    use crate::infrastructure::push::LocalPushChannel;

    fn service(store: &MemoryEphemeralPhotoStore, clock: &ManualClock) -> Arc<EphemeralPhotoService> {
        Arc::new(EphemeralPhotoService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(MemoryUserRepository::with_users(["u1"])),
            Arc::new(RandomAccessKeyGenerator),
            None,
            NotificationFanout::new(Arc::new(LocalPushChannel::new())),
            Arc::new(clock.clone()),
            PhotoServiceSettings::default(),
        ))
    }

    fn request(ttl_seconds: i64, max_views: i32) -> UploadPhotoRequest {
        UploadPhotoRequest {
            owner_id: "u1".to_string(),
            photo: AssetLocator::new("https://cdn/p.jpg", "p.jpg"),
            thumbnail: AssetLocator::new("https://cdn/t.jpg", "t.jpg"),
            max_views: Some(max_views),
            ttl_seconds: Some(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn test_run_once_partitions_and_soft_deletes() {
        let store = MemoryEphemeralPhotoStore::new();
        let clock = ManualClock::new(Utc::now());
        let photos = service(&store, &clock);
        let ctx = RequestContext::background();

        // 过期的照片
        let expired = photos.upload(&ctx, request(30, 1)).await.unwrap();
        // 已查看但仍在有效期内（长 TTL）
        let viewed = photos.upload(&ctx, request(30 * 86_400, 5)).await.unwrap();
        photos
            .view(&ctx, &viewed.access_key, &ViewerInfo::new(None, "1.1.1.1", "ua"))
            .await
            .unwrap();
        // 未查看、长 TTL：不是候选
        let untouched = photos.upload(&ctx, request(30 * 86_400, 5)).await.unwrap();

        clock.advance(chrono::Duration::days(2));

        let worker = ReclamationWorker::new(
            photos.clone(),
            ReclamationConfig {
                batch_size: 1,
                ..Default::default()
            },
        );
        let report = worker.run_once(&ctx).await.unwrap();
        assert_eq!(
            report,
            ReclamationReport {
                scanned: 2,
                expired_cohort: 1,
                viewed_cohort: 1,
                deleted: 2,
            }
        );

        assert!(store.get_by_id(&expired.id).await.unwrap().unwrap().is_deleted());
        assert!(store.get_by_id(&viewed.id).await.unwrap().unwrap().is_deleted());
        assert!(!store.get_by_id(&untouched.id).await.unwrap().unwrap().is_deleted());

        let again = worker.run_once(&ctx).await.unwrap();
        assert_eq!(again, ReclamationReport::default());
    }

    #[tokio::test]
    async fn test_run_once_respects_retention() {
        let store = MemoryEphemeralPhotoStore::new();
        let clock = ManualClock::new(Utc::now());
        let photos = service(&store, &clock);
        let ctx = RequestContext::background();
        photos.upload(&ctx, request(30, 1)).await.unwrap();

        clock.advance(chrono::Duration::hours(1));
        let worker = ReclamationWorker::new(photos, ReclamationConfig::default());
        assert_eq!(worker.run_once(&ctx).await.unwrap().scanned, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = MemoryEphemeralPhotoStore::new();
        let clock = ManualClock::new(Utc::now());
        let worker = Arc::new(ReclamationWorker::new(
            service(&store, &clock),
            ReclamationConfig {
                interval: Duration::from_secs(10),
                ..Default::default()
            },
        ));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
