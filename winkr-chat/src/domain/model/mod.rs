//! 领域模型

pub mod chat;
pub mod event;
pub mod photo;

pub use chat::{
    ChatMessage, ChatStats, EPHEMERAL_PHOTO_MESSAGE_TYPE, EphemeralPhotoMessageBody, MessageType,
    SendMessageRequest, SentMessage, TypingUsers,
};
pub use event::{PhotoEvent, PhotoEventType};
pub use photo::{
    AssetLocator, DEFAULT_MAX_VIEWS, DEFAULT_PHOTO_TTL_SECONDS, DEFAULT_VIEW_STATS_WINDOW,
    EphemeralPhoto, EphemeralPhotoView, PhotoState, PhotoStats, PhotoViewStats, UploadPhotoRequest,
    UserPhotoOverview, ViewerInfo,
};
