use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::model::{
    ChatMessage, EphemeralPhoto, EphemeralPhotoView, PhotoStats, SendMessageRequest, SentMessage,
};

/// 阅后即焚照片持久化存储
///
/// 所有写操作在单个照片ID上必须可串行化（行锁或条件更新）。
#[async_trait::async_trait]
pub trait EphemeralPhotoStore: Send + Sync {
    /// 插入新记录；id 或 access_key 冲突时返回 `false`
    async fn create(&self, photo: &EphemeralPhoto) -> Result<bool>;
    async fn get_by_id(&self, photo_id: &str) -> Result<Option<EphemeralPhoto>>;
    async fn get_by_access_key(&self, access_key: &str) -> Result<Option<EphemeralPhoto>>;
    async fn user_has_photo(&self, user_id: &str, photo_id: &str) -> Result<bool>;
    /// 条件自增：仅当未过期、未删除且 `view_count < max_views` 时 +1，
    /// 同一次写入中置 `is_viewed`，达到上限时置 `is_expired`。条件不满足时返回 `None`。
    async fn increment_view_count(&self, photo_id: &str) -> Result<Option<i32>>;
    /// 幂等；返回是否发生了状态变化
    async fn mark_viewed(&self, photo_id: &str) -> Result<bool>;
    /// 幂等；返回是否发生了状态变化
    async fn mark_expired(&self, photo_id: &str) -> Result<bool>;
    async fn get_view_count(&self, photo_id: &str) -> Result<Option<i32>>;
    async fn list_user_photos(
        &self,
        user_id: &str,
        include_expired: bool,
    ) -> Result<Vec<EphemeralPhoto>>;
    async fn list_user_active(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<EphemeralPhoto>>;
    async fn list_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EphemeralPhoto>>;
    async fn list_expired(&self, limit: i64, offset: i64) -> Result<Vec<EphemeralPhoto>>;
    async fn list_expiring_soon(
        &self,
        now: DateTime<Utc>,
        within: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<EphemeralPhoto>>;
    /// 回收候选：未删除，且已过截止时间，或（已过期 / 已查看）且创建早于截止时间
    async fn get_photos_for_cleanup(
        &self,
        older_than: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<EphemeralPhoto>>;
    /// 设置 deleted_at；已删除的记录不受影响。返回实际删除的条数
    async fn batch_soft_delete(&self, photo_ids: &[String], at: DateTime<Utc>) -> Result<u64>;
    async fn stats(&self, now: DateTime<Utc>) -> Result<PhotoStats>;
    async fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<PhotoStats>;
}

/// 查看记录日志（只追加）
#[async_trait::async_trait]
pub trait PhotoViewLog: Send + Sync {
    async fn append_view(&self, view: &EphemeralPhotoView) -> Result<()>;
    /// 最近的查看记录，按时间倒序
    async fn recent_views(&self, photo_id: &str, limit: i64) -> Result<Vec<EphemeralPhotoView>>;
    async fn count_views_since(&self, photo_id: &str, since: DateTime<Utc>) -> Result<i64>;
}

/// 通用键值缓存
#[async_trait::async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// 按 glob 模式删除，返回删除数量
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn info(&self) -> Result<HashMap<String, String>>;
}

/// 面向用户的推送通道
#[async_trait::async_trait]
pub trait PushChannel: Send + Sync {
    async fn broadcast_to_user(&self, user_id: &str, payload: &Value) -> Result<()>;
}

/// 外部消息服务
#[async_trait::async_trait]
pub trait MessageService: Send + Sync {
    async fn send_message(&self, request: SendMessageRequest) -> Result<SentMessage>;
    async fn get_message(&self, message_id: &str) -> Result<Option<ChatMessage>>;
}

/// 用户仓储
#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    async fn exists_by_id(&self, user_id: &str) -> Result<bool>;
}

/// 访问密钥生成器
pub trait AccessKeyGenerator: Send + Sync {
    fn generate(&self) -> Result<String>;
}

pub type PhotoStoreRef = Arc<dyn EphemeralPhotoStore>;
pub type PhotoViewLogRef = Arc<dyn PhotoViewLog>;
pub type KeyValueCacheRef = Arc<dyn KeyValueCache>;
pub type PushChannelRef = Arc<dyn PushChannel>;
pub type MessageServiceRef = Arc<dyn MessageService>;
pub type UserRepositoryRef = Arc<dyn UserRepository>;
pub type AccessKeyGeneratorRef = Arc<dyn AccessKeyGenerator>;
