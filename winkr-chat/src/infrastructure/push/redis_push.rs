use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::domain::repository::PushChannel;

const DEFAULT_NAMESPACE: &str = "winkr";

/// 通过 Redis Pub/Sub 推送，网关订阅 `<namespace>:push:user:<userId>`
#[derive(Clone)]
pub struct RedisPushChannel {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisPushChannel {
    pub async fn new(redis_url: &str, namespace: Option<&str>) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let connection = client
            .get_connection_manager()
            .await
            .context("failed to open redis connection")?;
        Ok(Self {
            connection,
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
        })
    }

    fn user_channel(&self, user_id: &str) -> String {
        user_channel(&self.namespace, user_id)
    }
}

fn user_channel(namespace: &str, user_id: &str) -> String {
    format!("{namespace}:push:user:{user_id}")
}

#[async_trait]
impl PushChannel for RedisPushChannel {
    async fn broadcast_to_user(&self, user_id: &str, payload: &Value) -> Result<()> {
        let mut conn = self.connection.clone();
        let channel = self.user_channel(user_id);
        let _: i64 = conn
            .publish(&channel, payload.to_string())
            .await
            .with_context(|| format!("failed to publish to {channel}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_channel_format() {
        assert_eq!(user_channel("winkr", "u1"), "winkr:push:user:u1");
    }
}
