use std::time::Duration;

use winkr_core::{PostgresInstanceConfig, RedisPoolConfig, WinkrAppConfig};

use crate::domain::model::{DEFAULT_MAX_VIEWS, DEFAULT_PHOTO_TTL_SECONDS, DEFAULT_VIEW_STATS_WINDOW};

/// 默认查看时长（聊天内标记已查看时使用）
pub const DEFAULT_VIEW_DURATION_SECONDS: i32 = 5;

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub cache_redis: Option<RedisPoolConfig>,
    pub photo_store: Option<PostgresInstanceConfig>,
    pub user_store: Option<PostgresInstanceConfig>,
    pub push_redis: Option<RedisPoolConfig>,
    pub default_photo_ttl_seconds: i64,
    pub default_max_views: i32,
    pub view_stats_window: i64,
    pub default_view_duration_seconds: i32,
    pub cleanup_interval: Duration,
    pub cleanup_retention_seconds: i64,
    pub cleanup_batch_size: i64,
    pub operation_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            cache_redis: None,
            photo_store: None,
            user_store: None,
            push_redis: None,
            default_photo_ttl_seconds: DEFAULT_PHOTO_TTL_SECONDS,
            default_max_views: DEFAULT_MAX_VIEWS,
            view_stats_window: DEFAULT_VIEW_STATS_WINDOW,
            default_view_duration_seconds: DEFAULT_VIEW_DURATION_SECONDS,
            cleanup_interval: Duration::from_secs(3600),
            cleanup_retention_seconds: 86_400,
            cleanup_batch_size: 100,
            operation_timeout: Duration::from_millis(5000),
        }
    }
}

impl ChatConfig {
    pub fn from_app_config(app: &WinkrAppConfig) -> Self {
        let service = app.chat_service();
        let defaults = Self::default();

        let cache_redis = service
            .cache
            .as_deref()
            .and_then(|name| app.redis_profile(name))
            .cloned();

        let photo_store = service
            .photo_store
            .as_deref()
            .and_then(|name| app.postgres_profile(name))
            .cloned();

        // 未单独配置时与照片存储共用同一个库
        let user_store = service
            .user_store
            .as_deref()
            .and_then(|name| app.postgres_profile(name))
            .cloned()
            .or_else(|| photo_store.clone());

        let push_redis = service
            .push
            .as_deref()
            .and_then(|name| app.redis_profile(name))
            .cloned();

        Self {
            cache_redis,
            photo_store,
            user_store,
            push_redis,
            default_photo_ttl_seconds: service
                .default_photo_ttl_seconds
                .filter(|ttl| *ttl > 0)
                .unwrap_or(defaults.default_photo_ttl_seconds),
            default_max_views: service
                .default_max_views
                .filter(|views| *views > 0)
                .unwrap_or(defaults.default_max_views),
            view_stats_window: service
                .view_stats_window
                .unwrap_or(defaults.view_stats_window)
                .max(1),
            default_view_duration_seconds: service
                .default_view_duration_seconds
                .unwrap_or(defaults.default_view_duration_seconds)
                .max(0),
            cleanup_interval: service
                .cleanup_interval_seconds
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(defaults.cleanup_interval),
            cleanup_retention_seconds: service
                .cleanup_retention_seconds
                .unwrap_or(defaults.cleanup_retention_seconds)
                .max(0),
            cleanup_batch_size: service
                .cleanup_batch_size
                .unwrap_or(defaults.cleanup_batch_size)
                .max(1),
            operation_timeout: service
                .operation_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.operation_timeout),
        }
    }

    pub fn cache_url(&self) -> Option<&str> {
        self.cache_redis.as_ref().map(|cfg| cfg.url.as_str())
    }

    pub fn push_url(&self) -> Option<&str> {
        self.push_redis.as_ref().map(|cfg| cfg.url.as_str())
    }
}
