pub mod chat_integration_service;
pub mod ephemeral_photo_service;
pub mod notification_service;
pub mod photo_lock;

pub use chat_integration_service::{ChatIntegrationService, EphemeralPhotoMessage};
pub use ephemeral_photo_service::{
    CleanupBatch, EphemeralPhotoService, MAX_KEYGEN_ATTEMPTS, MAX_PAGE_SIZE, PhotoServiceSettings,
};
pub use notification_service::NotificationFanout;
