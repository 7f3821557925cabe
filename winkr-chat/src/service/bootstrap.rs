//! 应用启动器 - 负责依赖注入和服务启动
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use winkr_core::WinkrAppConfig;

use crate::application::{ReclamationConfig, ReclamationWorker};
use crate::config::ChatConfig;
use crate::domain::clock::{ClockRef, SystemClock};
use crate::domain::repository::{
    KeyValueCacheRef, MessageServiceRef, PhotoStoreRef, PhotoViewLogRef, PushChannelRef,
    UserRepositoryRef,
};
use crate::domain::service::{
    ChatIntegrationService, EphemeralPhotoService, NotificationFanout, PhotoServiceSettings,
};
use crate::infrastructure::cache::{ChatCache, MemoryKeyValueCache, RedisKeyValueCache};
use crate::infrastructure::keygen::RandomAccessKeyGenerator;
use crate::infrastructure::messaging::MemoryMessageService;
use crate::infrastructure::persistence::{
    MemoryEphemeralPhotoStore, MemoryUserRepository, PostgresEphemeralPhotoStore,
    PostgresUserRepository,
};
use crate::infrastructure::push::{LocalPushChannel, RedisPushChannel};

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub config: ChatConfig,
    pub chat_cache: ChatCache,
    pub notifier: NotificationFanout,
    pub photo_service: Arc<EphemeralPhotoService>,
    pub chat_integration: Arc<ChatIntegrationService>,
    pub reclamation: Arc<ReclamationWorker>,
}

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(config: &'static WinkrAppConfig) -> Result<()> {
        let context = Self::create_context(config).await?;
        Self::start(context).await
    }

    /// 创建应用上下文
    pub async fn create_context(config: &WinkrAppConfig) -> Result<ApplicationContext> {
        let chat_config = ChatConfig::from_app_config(config);
        let clock: ClockRef = Arc::new(SystemClock);

        let kv_cache = Self::build_cache(&chat_config).await?;
        let (photo_store, view_log) = Self::build_photo_store(&chat_config).await?;
        let users = Self::build_user_repository(&chat_config).await?;
        let push = Self::build_push_channel(&chat_config).await?;
        // 消息服务由外部系统提供，本服务内置内存实现用于本地运行
        let messages: MessageServiceRef = Arc::new(MemoryMessageService::new(clock.clone()));

        Ok(Self::assemble(
            chat_config,
            kv_cache,
            photo_store,
            view_log,
            users,
            push,
            messages,
            clock,
        ))
    }

    /// 用给定的适配器组装服务（测试与嵌入场景使用）
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config: ChatConfig,
        kv_cache: KeyValueCacheRef,
        photo_store: PhotoStoreRef,
        view_log: PhotoViewLogRef,
        users: UserRepositoryRef,
        push: PushChannelRef,
        messages: MessageServiceRef,
        clock: ClockRef,
    ) -> ApplicationContext {
        let chat_cache = ChatCache::new(kv_cache);
        let notifier = NotificationFanout::new(push);

        let photo_service = Arc::new(EphemeralPhotoService::new(
            photo_store,
            view_log,
            users,
            Arc::new(RandomAccessKeyGenerator),
            Some(chat_cache.clone()),
            notifier.clone(),
            clock.clone(),
            PhotoServiceSettings::from(&config),
        ));

        let chat_integration = Arc::new(ChatIntegrationService::new(
            photo_service.clone(),
            messages,
            Some(chat_cache.clone()),
            notifier.clone(),
            clock,
            config.default_view_duration_seconds,
        ));

        let reclamation = Arc::new(ReclamationWorker::new(
            photo_service.clone(),
            ReclamationConfig::from(&config),
        ));

        ApplicationContext {
            config,
            chat_cache,
            notifier,
            photo_service,
            chat_integration,
            reclamation,
        }
    }

    async fn build_cache(config: &ChatConfig) -> Result<KeyValueCacheRef> {
        match config.cache_url() {
            Some(url) => {
                info!("using redis chat cache");
                Ok(Arc::new(RedisKeyValueCache::new(url).await?))
            }
            None => {
                warn!("no chat cache profile configured, using in-memory cache");
                Ok(Arc::new(MemoryKeyValueCache::new()))
            }
        }
    }

    async fn build_photo_store(config: &ChatConfig) -> Result<(PhotoStoreRef, PhotoViewLogRef)> {
        match config.photo_store.as_ref() {
            Some(postgres) => {
                let store = PostgresEphemeralPhotoStore::new(postgres).await?;
                info!("using postgres photo store");
                Ok((Arc::new(store.clone()), Arc::new(store)))
            }
            None => {
                warn!("no photo store profile configured, using in-memory store");
                let store = MemoryEphemeralPhotoStore::new();
                Ok((Arc::new(store.clone()), Arc::new(store)))
            }
        }
    }

    async fn build_user_repository(config: &ChatConfig) -> Result<UserRepositoryRef> {
        match config.user_store.as_ref() {
            Some(postgres) => Ok(Arc::new(PostgresUserRepository::new(postgres).await?)),
            None => {
                warn!("no user store profile configured, using empty in-memory user repository");
                Ok(Arc::new(MemoryUserRepository::new()))
            }
        }
    }

    async fn build_push_channel(config: &ChatConfig) -> Result<PushChannelRef> {
        match config.push_redis.as_ref() {
            Some(redis) => Ok(Arc::new(
                RedisPushChannel::new(&redis.url, redis.namespace.as_deref()).await?,
            )),
            None => {
                warn!("no push profile configured, notifications stay in-process");
                Ok(Arc::new(LocalPushChannel::new()))
            }
        }
    }

    /// 启动后台任务并等待停止信号
    pub async fn start(context: ApplicationContext) -> Result<()> {
        let shutdown = CancellationToken::new();
        let worker = context.reclamation.clone();
        let worker_handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        info!("winkr chat service running");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");

        shutdown.cancel();
        if let Err(err) = worker_handle.await {
            warn!(error = %err, "reclamation worker terminated abnormally");
        }

        info!("winkr chat service stopped");
        Ok(())
    }
}
