//! 进程内键值缓存
//!
//! 与 Redis 适配器语义一致：条目按 TTL 过期，模式支持 `*` 与 `?`。
//! 用于本地运行和测试。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::glob_match;
use crate::domain::repository::KeyValueCache;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Default)]
pub struct MemoryKeyValueCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryKeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理过期条目
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "cleaned up expired cache entries");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }
}

#[async_trait]
impl KeyValueCache for MemoryKeyValueCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut removed = 0u64;
        entries.retain(|key, entry| {
            if entry.is_expired(now) {
                return false;
            }
            if glob_match(pattern, key) {
                removed += 1;
                return false;
            }
            true
        });
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn info(&self) -> Result<HashMap<String, String>> {
        let mut info = HashMap::new();
        info.insert("backend".to_string(), "memory".to_string());
        info.insert("keys".to_string(), self.len().await.to_string());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryKeyValueCache::new();
        cache.set("a", "1", Duration::from_secs(30)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));

        cache.delete("a").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = MemoryKeyValueCache::new();
        cache.set("a", "1", Duration::from_secs(1)).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(cache.get("a").await.unwrap().is_none());
        assert_eq!(cache.cleanup_expired().await, 1);
    }

    #[tokio::test]
    async fn test_pattern_operations() {
        let cache = MemoryKeyValueCache::new();
        let ttl = Duration::from_secs(30);
        cache.set("user:online:u1", "true", ttl).await.unwrap();
        cache.set("user:unread:u1:c1", "3", ttl).await.unwrap();
        cache.set("user:unread:u2:c1", "1", ttl).await.unwrap();

        assert_eq!(
            cache.keys("user:unread:*").await.unwrap(),
            vec!["user:unread:u1:c1".to_string(), "user:unread:u2:c1".to_string()]
        );
        assert_eq!(cache.delete_by_pattern("*:u1*").await.unwrap(), 2);
        assert_eq!(cache.keys("*").await.unwrap(), vec!["user:unread:u2:c1".to_string()]);
        assert_eq!(cache.info().await.unwrap().get("keys").map(String::as_str), Some("1"));
    }
}
