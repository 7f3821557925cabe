use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// 照片生命周期事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoEventType {
    Viewed,
    Expired,
    Deleted,
}

impl PhotoEventType {
    /// 推送负载中的 `type` 字段
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoEventType::Viewed => "ephemeral_photo_viewed",
            PhotoEventType::Expired => "ephemeral_photo_expired",
            PhotoEventType::Deleted => "ephemeral_photo_deleted",
        }
    }

    /// 事件时间字段名
    pub fn instant_field(&self) -> &'static str {
        match self {
            PhotoEventType::Viewed => "viewed_at",
            PhotoEventType::Expired => "expired_at",
            PhotoEventType::Deleted => "deleted_at",
        }
    }
}

/// 照片生命周期事件（发送给照片所有者）
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoEvent {
    pub event_type: PhotoEventType,
    pub photo_id: String,
    pub owner_id: String,
    pub viewer_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PhotoEvent {
    pub fn viewed(
        photo_id: impl Into<String>,
        owner_id: impl Into<String>,
        viewer_id: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: PhotoEventType::Viewed,
            photo_id: photo_id.into(),
            owner_id: owner_id.into(),
            viewer_id,
            occurred_at,
        }
    }

    pub fn expired(
        photo_id: impl Into<String>,
        owner_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: PhotoEventType::Expired,
            photo_id: photo_id.into(),
            owner_id: owner_id.into(),
            viewer_id: None,
            occurred_at,
        }
    }

    pub fn deleted(
        photo_id: impl Into<String>,
        owner_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: PhotoEventType::Deleted,
            photo_id: photo_id.into(),
            owner_id: owner_id.into(),
            viewer_id: None,
            occurred_at,
        }
    }

    /// 线上负载：`{type, photo_id, owner_id, viewer_id?, <event>_at}`
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("type".into(), Value::from(self.event_type.as_str()));
        payload.insert("photo_id".into(), Value::from(self.photo_id.clone()));
        payload.insert("owner_id".into(), Value::from(self.owner_id.clone()));
        if let Some(viewer_id) = &self.viewer_id {
            payload.insert("viewer_id".into(), Value::from(viewer_id.clone()));
        }
        payload.insert(
            self.event_type.instant_field().into(),
            Value::from(self.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(payload)
    }
}
