use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;
use winkr_core::PostgresInstanceConfig;

use crate::domain::repository::UserRepository;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// 读取账号服务维护的 `users` 表
#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: Arc<PgPool>,
}

impl PostgresUserRepository {
    pub async fn new(config: &PostgresInstanceConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .connect(&config.url)
            .await
            .context("failed to connect to postgres")?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn exists_by_id(&self, user_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await
        .context("failed to check user existence")?;
        Ok(exists)
    }
}

#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<RwLock<HashSet<String>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: Arc::new(RwLock::new(users.into_iter().map(Into::into).collect())),
        }
    }

    pub async fn insert(&self, user_id: impl Into<String>) {
        self.users.write().await.insert(user_id.into());
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn exists_by_id(&self, user_id: &str) -> Result<bool> {
        Ok(self.users.read().await.contains(user_id))
    }
}
