//! 聊天缓存
//!
//! 通用键值缓存之上的类型化封装。缓存只做加速，不是数据源：
//! 未命中与被淘汰无法区分，计数类读改写允许丢失更新。

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::keys::{CacheTtl, ChatCacheKeys};
use crate::domain::model::{ChatMessage, ChatStats, EphemeralPhoto, TypingUsers};
use crate::domain::repository::KeyValueCacheRef;

/// 每个会话缓存的最近消息上限
pub const MAX_CACHED_MESSAGES: usize = 100;

#[derive(Clone)]
pub struct ChatCache {
    cache: KeyValueCacheRef,
}

impl ChatCache {
    pub fn new(cache: KeyValueCacheRef) -> Self {
        Self { cache }
    }

    async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: CacheTtl) -> Result<()> {
        let payload = serde_json::to_string(value)
            .with_context(|| format!("failed to encode cache value for {key}"))?;
        self.cache.set(key, &payload, ttl.duration()).await
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.get(key).await? {
            Some(payload) => {
                let value = serde_json::from_str(&payload)
                    .with_context(|| format!("failed to decode cache value for {key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ---- 在线状态 ----

    pub async fn set_user_online(&self, user_id: &str, online: bool) -> Result<()> {
        self.put(&ChatCacheKeys::user_online(user_id), &online, CacheTtl::Medium)
            .await
    }

    pub async fn get_user_online(&self, user_id: &str) -> Result<Option<bool>> {
        self.fetch(&ChatCacheKeys::user_online(user_id)).await
    }

    pub async fn invalidate_user_online(&self, user_id: &str) -> Result<()> {
        self.cache.delete(&ChatCacheKeys::user_online(user_id)).await
    }

    // ---- 输入状态 ----

    pub async fn set_user_typing(
        &self,
        user_id: &str,
        conversation_id: &str,
        typing: bool,
    ) -> Result<()> {
        self.put(
            &ChatCacheKeys::user_typing(user_id, conversation_id),
            &typing,
            CacheTtl::Short,
        )
        .await
    }

    pub async fn get_user_typing(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<bool>> {
        self.fetch(&ChatCacheKeys::user_typing(user_id, conversation_id))
            .await
    }

    pub async fn invalidate_user_typing(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.cache
            .delete(&ChatCacheKeys::user_typing(user_id, conversation_id))
            .await
    }

    // ---- 未读数 ----

    pub async fn set_unread_count(
        &self,
        user_id: &str,
        conversation_id: &str,
        count: i64,
    ) -> Result<()> {
        self.put(
            &ChatCacheKeys::user_unread(user_id, conversation_id),
            &count,
            CacheTtl::Long,
        )
        .await
    }

    pub async fn get_unread_count(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<i64>> {
        self.fetch(&ChatCacheKeys::user_unread(user_id, conversation_id))
            .await
    }

    /// 读改写自增，并发下可能丢失更新（由外部对账任务重建）
    pub async fn increment_unread(&self, user_id: &str, conversation_id: &str) -> Result<i64> {
        let current = self
            .get_unread_count(user_id, conversation_id)
            .await?
            .unwrap_or(0);
        let next = current + 1;
        self.set_unread_count(user_id, conversation_id, next).await?;
        Ok(next)
    }

    pub async fn reset_unread(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.cache
            .delete(&ChatCacheKeys::user_unread(user_id, conversation_id))
            .await
    }

    // ---- 会话消息 ----

    pub async fn cache_messages(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<()> {
        let start = messages.len().saturating_sub(MAX_CACHED_MESSAGES);
        self.put(
            &ChatCacheKeys::conversation_messages(conversation_id),
            &messages[start..],
            CacheTtl::Medium,
        )
        .await
    }

    pub async fn get_messages(&self, conversation_id: &str) -> Result<Option<Vec<ChatMessage>>> {
        self.fetch(&ChatCacheKeys::conversation_messages(conversation_id))
            .await
    }

    /// 追加到最近消息序列，超出上限时丢弃最旧的消息
    pub async fn add_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<()> {
        let mut messages = self.get_messages(conversation_id).await?.unwrap_or_default();
        messages.push(message.clone());
        if messages.len() > MAX_CACHED_MESSAGES {
            let overflow = messages.len() - MAX_CACHED_MESSAGES;
            messages.drain(..overflow);
        }
        self.cache_messages(conversation_id, &messages).await
    }

    // ---- 会话成员 ----

    pub async fn cache_participants(
        &self,
        conversation_id: &str,
        participants: &[String],
    ) -> Result<()> {
        let mut unique: Vec<&String> = Vec::with_capacity(participants.len());
        for participant in participants {
            if !unique.contains(&participant) {
                unique.push(participant);
            }
        }
        self.put(
            &ChatCacheKeys::conversation_participants(conversation_id),
            &unique,
            CacheTtl::Long,
        )
        .await
    }

    pub async fn get_participants(&self, conversation_id: &str) -> Result<Option<Vec<String>>> {
        self.fetch(&ChatCacheKeys::conversation_participants(conversation_id))
            .await
    }

    // ---- 最后一条消息 ----

    pub async fn cache_last_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        self.put(
            &ChatCacheKeys::conversation_last_message(conversation_id),
            message,
            CacheTtl::Medium,
        )
        .await
    }

    pub async fn get_last_message(&self, conversation_id: &str) -> Result<Option<ChatMessage>> {
        self.fetch(&ChatCacheKeys::conversation_last_message(conversation_id))
            .await
    }

    // ---- 会话内输入用户 ----

    pub async fn cache_typing_users(
        &self,
        conversation_id: &str,
        typing_users: &TypingUsers,
    ) -> Result<()> {
        self.put(
            &ChatCacheKeys::conversation_typing_users(conversation_id),
            typing_users,
            CacheTtl::Short,
        )
        .await
    }

    pub async fn get_typing_users(&self, conversation_id: &str) -> Result<Option<TypingUsers>> {
        self.fetch(&ChatCacheKeys::conversation_typing_users(conversation_id))
            .await
    }

    /// 记录用户最近一次输入时间（读改写）
    pub async fn set_user_typing_in_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut typing_users = self
            .get_typing_users(conversation_id)
            .await?
            .unwrap_or_default();
        typing_users.insert(user_id.to_string(), at);
        self.cache_typing_users(conversation_id, &typing_users).await
    }

    pub async fn remove_typing_user(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let Some(mut typing_users) = self.get_typing_users(conversation_id).await? else {
            return Ok(());
        };
        if typing_users.remove(user_id).is_some() {
            self.cache_typing_users(conversation_id, &typing_users).await?;
        }
        Ok(())
    }

    /// `within` 时间内输入过的用户，按用户ID排序
    pub async fn get_active_typing_users(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
        within: Duration,
    ) -> Result<Vec<String>> {
        let typing_users = self
            .get_typing_users(conversation_id)
            .await?
            .unwrap_or_default();
        let mut active: Vec<String> = typing_users
            .into_iter()
            .filter(|(_, at)| now - *at <= within)
            .map(|(user_id, _)| user_id)
            .collect();
        active.sort();
        Ok(active)
    }

    // ---- 全局在线用户 ----

    pub async fn cache_online_users(&self, user_ids: &[String]) -> Result<()> {
        self.put(ChatCacheKeys::online_users(), user_ids, CacheTtl::Short)
            .await
    }

    pub async fn get_online_users(&self) -> Result<Option<Vec<String>>> {
        self.fetch(ChatCacheKeys::online_users()).await
    }

    /// 乐观读改写；重复添加会去重
    pub async fn add_online_user(&self, user_id: &str) -> Result<()> {
        let mut users = self.get_online_users().await?.unwrap_or_default();
        if users.iter().any(|existing| existing == user_id) {
            return Ok(());
        }
        users.push(user_id.to_string());
        self.cache_online_users(&users).await
    }

    /// 不存在时忽略
    pub async fn remove_online_user(&self, user_id: &str) -> Result<()> {
        let Some(mut users) = self.get_online_users().await? else {
            return Ok(());
        };
        let before = users.len();
        users.retain(|existing| existing != user_id);
        if users.len() != before {
            self.cache_online_users(&users).await?;
        }
        Ok(())
    }

    // ---- 单条消息 / 统计 / 照片 ----

    pub async fn cache_message(&self, message: &ChatMessage) -> Result<()> {
        self.put(&ChatCacheKeys::message(&message.id), message, CacheTtl::Medium)
            .await
    }

    pub async fn get_cached_message(&self, message_id: &str) -> Result<Option<ChatMessage>> {
        self.fetch(&ChatCacheKeys::message(message_id)).await
    }

    pub async fn cache_chat_stats(&self, stats: &ChatStats) -> Result<()> {
        self.put(ChatCacheKeys::chat_stats(), stats, CacheTtl::Short)
            .await
    }

    pub async fn get_chat_stats(&self) -> Result<Option<ChatStats>> {
        self.fetch(ChatCacheKeys::chat_stats()).await
    }

    pub async fn cache_photo(&self, photo: &EphemeralPhoto) -> Result<()> {
        self.put(&ChatCacheKeys::ephemeral_photo(&photo.id), photo, CacheTtl::Medium)
            .await
    }

    pub async fn get_cached_photo(&self, photo_id: &str) -> Result<Option<EphemeralPhoto>> {
        self.fetch(&ChatCacheKeys::ephemeral_photo(photo_id)).await
    }

    pub async fn invalidate_photo(&self, photo_id: &str) -> Result<()> {
        self.cache
            .delete(&ChatCacheKeys::ephemeral_photo(photo_id))
            .await
    }

    // ---- 批量失效 ----

    /// 删除会话的消息、成员、最后消息和输入用户四个键
    pub async fn invalidate_conversation(&self, conversation_id: &str) -> Result<()> {
        for key in ChatCacheKeys::conversation_keys(conversation_id) {
            self.cache.delete(&key).await?;
        }
        Ok(())
    }

    /// 删除所有内嵌该用户ID的键
    pub async fn invalidate_user(&self, user_id: &str) -> Result<u64> {
        let mut removed = 0;
        for pattern in ChatCacheKeys::user_patterns(user_id) {
            removed += self.cache.delete_by_pattern(&pattern).await?;
        }
        debug!(user_id, removed, "invalidated user cache entries");
        Ok(removed)
    }

    pub async fn cache_info(&self) -> Result<HashMap<String, String>> {
        self.cache.info().await
    }
}
