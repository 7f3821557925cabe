use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::clock::{ClockRef, SystemClock};
use crate::domain::model::{ChatMessage, SendMessageRequest, SentMessage};
use crate::domain::repository::MessageService;

/// 进程内消息服务，供本地运行和测试使用
#[derive(Clone)]
pub struct MemoryMessageService {
    messages: Arc<RwLock<HashMap<String, ChatMessage>>>,
    clock: ClockRef,
}

impl MemoryMessageService {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            messages: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// 直接写入一条消息（如模拟其他服务发出的消息）
    pub async fn insert(&self, message: ChatMessage) {
        self.messages
            .write()
            .await
            .insert(message.id.clone(), message);
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryMessageService {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl MessageService for MemoryMessageService {
    async fn send_message(&self, request: SendMessageRequest) -> Result<SentMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: request.conversation_id,
            sender_id: request.sender_id,
            content: request.content,
            message_type: request.message_type,
            created_at: self.clock.now(),
        };
        let sent = SentMessage {
            message_id: message.id.clone(),
            delivered_at: message.created_at,
        };
        self.insert(message).await;
        Ok(sent)
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<ChatMessage>> {
        Ok(self.messages.read().await.get(message_id).cloned())
    }
}
