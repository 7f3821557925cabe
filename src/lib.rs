//! Winkr Core 公共库
//!
//! 提供统一的配置加载、日志初始化和请求上下文

pub mod config;
pub mod tracing;
pub mod utils;

pub use config::{
    ChatServiceConfig, ConfigManager, LoggingConfig, PostgresInstanceConfig, RedisPoolConfig,
    WinkrAppConfig, app_config, load_config, load_config_from_path,
};
pub use utils::context::{ContextError, RequestContext};
