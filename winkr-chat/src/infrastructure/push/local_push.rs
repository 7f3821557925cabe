//! 进程内推送通道
//!
//! 每个用户一个 broadcast 通道；没有订阅者时事件被丢弃。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tracing::trace;

use crate::domain::repository::PushChannel;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Default)]
pub struct LocalPushChannel {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
}

impl LocalPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Value> {
        let mut channels = self.channels.write().await;
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl PushChannel for LocalPushChannel {
    async fn broadcast_to_user(&self, user_id: &str, payload: &Value) -> Result<()> {
        let channels = self.channels.read().await;
        match channels.get(user_id) {
            Some(sender) => {
                // 所有订阅者都已断开时 send 返回错误，按无人在线处理
                let receivers = sender.send(payload.clone()).unwrap_or(0);
                trace!(user_id, receivers, "local push delivered");
            }
            None => trace!(user_id, "no local subscribers"),
        }
        Ok(())
    }
}
