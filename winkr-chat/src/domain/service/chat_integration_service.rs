//! 聊天集成
//!
//! 在会话中发送、解析和查看阅后即焚照片消息，并向照片所有者推送生命周期事件。

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use winkr_core::RequestContext;

use super::ephemeral_photo_service::EphemeralPhotoService;
use super::notification_service::NotificationFanout;
use crate::domain::clock::ClockRef;
use crate::domain::model::{
    ChatMessage, EphemeralPhoto, EphemeralPhotoMessageBody, EphemeralPhotoView, MessageType,
    PhotoEvent, SendMessageRequest, SentMessage, ViewerInfo,
};
use crate::domain::repository::MessageServiceRef;
use crate::error::{EphemeralError, EphemeralResult};
use crate::infrastructure::cache::ChatCache;

/// 解析后的阅后即焚照片消息
#[derive(Debug, Clone)]
pub struct EphemeralPhotoMessage {
    pub message: ChatMessage,
    pub body: EphemeralPhotoMessageBody,
}

pub struct ChatIntegrationService {
    photos: Arc<EphemeralPhotoService>,
    messages: MessageServiceRef,
    cache: Option<ChatCache>,
    notifier: NotificationFanout,
    clock: ClockRef,
    default_view_duration_seconds: i32,
}

impl ChatIntegrationService {
    pub fn new(
        photos: Arc<EphemeralPhotoService>,
        messages: MessageServiceRef,
        cache: Option<ChatCache>,
        notifier: NotificationFanout,
        clock: ClockRef,
        default_view_duration_seconds: i32,
    ) -> Self {
        Self {
            photos,
            messages,
            cache,
            notifier,
            clock,
            default_view_duration_seconds,
        }
    }

    /// 发送照片消息；发送者必须是照片所有者
    #[instrument(skip(self, ctx, text), fields(request_id = %ctx.request_id()))]
    pub async fn send_ephemeral_photo_message(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        sender_id: &str,
        photo_id: &str,
        text: &str,
    ) -> EphemeralResult<SentMessage> {
        let photo = self.photos.get(ctx, photo_id).await?;
        if !photo.is_owned_by(sender_id) {
            return Err(EphemeralError::OwnerMismatch {
                user_id: sender_id.to_string(),
                photo_id: photo_id.to_string(),
            });
        }
        if photo.is_deleted() {
            return Err(EphemeralError::Gone(photo.id));
        }

        let body = EphemeralPhotoMessageBody::from_photo(&photo, text);
        let content = body.to_json().map_err(anyhow::Error::from)?;
        let request = SendMessageRequest {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.clone(),
            message_type: MessageType::EphemeralPhoto,
        };
        let sent = ctx.run(self.messages.send_message(request)).await??;
        info!(message_id = %sent.message_id, photo_id, "ephemeral photo message sent");

        let message = ChatMessage {
            id: sent.message_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content,
            message_type: MessageType::EphemeralPhoto,
            created_at: sent.delivered_at,
        };
        self.cache_sent_message(ctx, &message).await;

        Ok(sent)
    }

    /// 读取照片消息；消息类型不是阅后即焚照片时返回 WRONG_TYPE
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id()))]
    pub async fn get_ephemeral_photo_message(
        &self,
        ctx: &RequestContext,
        message_id: &str,
    ) -> EphemeralResult<EphemeralPhotoMessage> {
        if message_id.is_empty() {
            return Err(EphemeralError::InvalidArgument("message id is empty".to_string()));
        }
        ctx.ensure_active()?;

        let message = match self.cached_message(ctx, message_id).await {
            Some(message) => message,
            None => ctx
                .run(self.messages.get_message(message_id))
                .await??
                .ok_or_else(|| EphemeralError::NotFound(message_id.to_string()))?,
        };

        if message.message_type != MessageType::EphemeralPhoto {
            return Err(EphemeralError::WrongType(message_id.to_string()));
        }
        let body = EphemeralPhotoMessageBody::from_json(&message.content).map_err(|err| {
            warn!(message_id, error = %err, "malformed ephemeral photo message body");
            EphemeralError::WrongType(message_id.to_string())
        })?;

        Ok(EphemeralPhotoMessage { message, body })
    }

    /// 记录聊天内的一次查看（默认时长）并使照片缓存失效
    #[instrument(skip(self, ctx, viewer), fields(request_id = %ctx.request_id()))]
    pub async fn mark_photo_as_viewed_in_chat(
        &self,
        ctx: &RequestContext,
        message_id: &str,
        photo_id: &str,
        viewer: &ViewerInfo,
    ) -> EphemeralResult<EphemeralPhotoView> {
        let photo = self.photos.get(ctx, photo_id).await?;
        let record = self
            .photos
            .track_view(
                ctx,
                &photo.id,
                &photo.owner_id,
                viewer,
                self.default_view_duration_seconds,
            )
            .await?;
        self.invalidate_photo(ctx, &photo.id).await;
        debug!(message_id, photo_id, "photo marked as viewed in chat");
        Ok(record)
    }

    /// 在聊天中查看照片：解析消息、执行查看准入、通知所有者
    #[instrument(skip(self, ctx, viewer), fields(request_id = %ctx.request_id()))]
    pub async fn view_ephemeral_photo_in_chat(
        &self,
        ctx: &RequestContext,
        message_id: &str,
        viewer: &ViewerInfo,
    ) -> EphemeralResult<EphemeralPhoto> {
        let message = self.get_ephemeral_photo_message(ctx, message_id).await?;
        let photo = self
            .photos
            .view(ctx, &message.body.access_key, viewer)
            .await
            .inspect_err(|err| {
                if err.is_view_rejection() {
                    debug!(message_id, code = err.code(), "photo view rejected in chat");
                }
            })?;
        let event = PhotoEvent::viewed(
            &photo.id,
            &photo.owner_id,
            viewer.viewer_id.clone(),
            self.clock.now(),
        );
        self.notifier.publish(ctx, &event).await;
        Ok(photo)
    }

    pub async fn notify_photo_viewed(
        &self,
        ctx: &RequestContext,
        photo_id: &str,
        viewer_id: Option<String>,
    ) -> EphemeralResult<bool> {
        let photo = self.photos.get(ctx, photo_id).await?;
        let event = PhotoEvent::viewed(&photo.id, &photo.owner_id, viewer_id, self.clock.now());
        Ok(self.notifier.publish(ctx, &event).await)
    }

    pub async fn notify_photo_expired(
        &self,
        ctx: &RequestContext,
        photo_id: &str,
    ) -> EphemeralResult<bool> {
        let photo = self.photos.get(ctx, photo_id).await?;
        let event = PhotoEvent::expired(&photo.id, &photo.owner_id, self.clock.now());
        Ok(self.notifier.publish(ctx, &event).await)
    }

    pub async fn notify_photo_deleted(
        &self,
        ctx: &RequestContext,
        photo_id: &str,
    ) -> EphemeralResult<bool> {
        let photo = self.photos.get(ctx, photo_id).await?;
        let event = PhotoEvent::deleted(&photo.id, &photo.owner_id, self.clock.now());
        Ok(self.notifier.publish(ctx, &event).await)
    }

    async fn cached_message(&self, ctx: &RequestContext, message_id: &str) -> Option<ChatMessage> {
        let cache = self.cache.as_ref()?;
        match ctx.run(cache.get_cached_message(message_id)).await {
            Ok(Ok(message)) => message,
            Ok(Err(err)) => {
                warn!(message_id, error = %err, "message cache read failed");
                None
            }
            Err(_) => None,
        }
    }

    async fn cache_sent_message(&self, ctx: &RequestContext, message: &ChatMessage) {
        let Some(cache) = &self.cache else {
            return;
        };
        let writes = ctx
            .run(async {
                cache.cache_message(message).await?;
                cache.add_message(&message.conversation_id, message).await?;
                cache
                    .cache_last_message(&message.conversation_id, message)
                    .await
            })
            .await;
        if let Ok(Err(err)) = writes {
            warn!(message_id = %message.id, error = %err, "failed to cache sent message");
        }
    }

    async fn invalidate_photo(&self, ctx: &RequestContext, photo_id: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Ok(Err(err)) = ctx.run(cache.invalidate_photo(photo_id)).await {
            warn!(photo_id, error = %err, "failed to invalidate photo cache");
        }
    }
}
