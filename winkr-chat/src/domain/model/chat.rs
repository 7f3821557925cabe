use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::photo::EphemeralPhoto;

/// 阅后即焚照片消息类型标记
pub const EPHEMERAL_PHOTO_MESSAGE_TYPE: &str = "ephemeral_photo";

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    EphemeralPhoto,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::File => "file",
            MessageType::EphemeralPhoto => EPHEMERAL_PHOTO_MESSAGE_TYPE,
            MessageType::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "video" => Ok(MessageType::Video),
            "audio" => Ok(MessageType::Audio),
            "file" => Ok(MessageType::File),
            EPHEMERAL_PHOTO_MESSAGE_TYPE => Ok(MessageType::EphemeralPhoto),
            "system" => Ok(MessageType::System),
            _ => Err(()),
        }
    }
}

/// 聊天消息（由外部消息服务持有）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// 消息体（阅后即焚照片为 JSON 文本）
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// 发送消息请求
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub delivered_at: DateTime<Utc>,
}

/// 阅后即焚照片消息体（线上格式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralPhotoMessageBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub photo_id: String,
    pub access_key: String,
    pub thumbnail_url: String,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

impl EphemeralPhotoMessageBody {
    pub fn from_photo(photo: &EphemeralPhoto, message: impl Into<String>) -> Self {
        Self {
            kind: EPHEMERAL_PHOTO_MESSAGE_TYPE.to_string(),
            photo_id: photo.id.clone(),
            access_key: photo.access_key.clone(),
            thumbnail_url: photo.thumbnail.url.clone(),
            expires_at: photo.expires_at,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// 会话内正在输入的用户 -> 最近一次输入时间
pub type TypingUsers = HashMap<String, DateTime<Utc>>;

/// 聊天系统统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStats {
    pub online_users: u64,
    pub active_conversations: u64,
    pub messages_sent: u64,
    pub ephemeral_photos_sent: u64,
}
