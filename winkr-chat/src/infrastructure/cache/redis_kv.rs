use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::domain::repository::KeyValueCache;

const SCAN_COUNT: usize = 200;

/// Redis 键值缓存
///
/// 键按原样写入，不追加命名空间前缀（聊天缓存键格式对运维可见）。
#[derive(Clone)]
pub struct RedisKeyValueCache {
    connection: ConnectionManager,
}

impl RedisKeyValueCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let connection = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { connection })
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl KeyValueCache for RedisKeyValueCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection();
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("failed to set cache key {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("failed to get cache key {key}"))?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn
            .del(key)
            .await
            .with_context(|| format!("failed to delete cache key {key}"))?;
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        let removed: u64 = conn
            .del(&keys)
            .await
            .with_context(|| format!("failed to delete cache keys matching {pattern}"))?;
        Ok(removed)
    }

    /// 使用 SCAN 游标遍历，避免 KEYS 阻塞实例
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("failed to scan cache keys matching {pattern}"))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn info(&self) -> Result<HashMap<String, String>> {
        let mut conn = self.connection();
        let raw: String = redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .context("failed to query redis info")?;
        Ok(parse_info(&raw))
    }
}

/// 解析 `INFO` 输出（`key:value` 行，忽略注释和空行）
fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
