// 集成测试公共装配：全部使用内存适配器与手动时钟
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use winkr_chat::config::ChatConfig;
use winkr_chat::domain::clock::ManualClock;
use winkr_chat::domain::model::{AssetLocator, UploadPhotoRequest, ViewerInfo};
use winkr_chat::infrastructure::cache::MemoryKeyValueCache;
use winkr_chat::infrastructure::messaging::MemoryMessageService;
use winkr_chat::infrastructure::persistence::{MemoryEphemeralPhotoStore, MemoryUserRepository};
use winkr_chat::infrastructure::push::LocalPushChannel;
use winkr_chat::{ApplicationBootstrap, ApplicationContext};

pub struct Harness {
    pub app: ApplicationContext,
    pub store: MemoryEphemeralPhotoStore,
    pub messages: MemoryMessageService,
    pub push: LocalPushChannel,
    pub users: MemoryUserRepository,
    pub clock: ManualClock,
}

pub fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let clock = ManualClock::new(Utc::now());
    let store = MemoryEphemeralPhotoStore::new();
    let messages = MemoryMessageService::new(Arc::new(clock.clone()));
    let push = LocalPushChannel::new();
    let users = MemoryUserRepository::with_users(["u1", "u2", "u3"]);

    let app = ApplicationBootstrap::assemble(
        ChatConfig::default(),
        Arc::new(MemoryKeyValueCache::new()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(users.clone()),
        Arc::new(push.clone()),
        Arc::new(messages.clone()),
        Arc::new(clock.clone()),
    );

    Harness {
        app,
        store,
        messages,
        push,
        users,
        clock,
    }
}

pub fn upload_request(owner: &str, max_views: i32, ttl_seconds: i64) -> UploadPhotoRequest {
    UploadPhotoRequest {
        owner_id: owner.to_string(),
        photo: AssetLocator::new("https://cdn.winkr.test/p/1.jpg", "photos/1.jpg"),
        thumbnail: AssetLocator::new("https://cdn.winkr.test/p/1_t.jpg", "photos/1_t.jpg"),
        max_views: Some(max_views),
        ttl_seconds: Some(ttl_seconds),
    }
}

pub fn viewer(id: &str) -> ViewerInfo {
    ViewerInfo::new(Some(id.to_string()), "203.0.113.7", "winkr-ios/3.2")
}
