//! Winkr Core 配置模块
//!
//! 该模块提供了应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或分片目录）
//! - 环境特定配置覆盖
//! - Redis / PostgreSQL 等基础设施配置
//! - 聊天服务配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<WinkrAppConfig> = OnceLock::new();

/// Redis 连接配置
///
/// 数据库编号写在 url 中；缓存 TTL 由键档位决定，不在此配置。
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Redis 服务器地址
    pub url: String,
    /// 推送频道前缀，缓存键不使用
    #[serde(default)]
    pub namespace: Option<String>,
}

/// PostgreSQL 数据库实例配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostgresInstanceConfig {
    /// 数据库连接 URL
    pub url: String,
    /// 最大连接数
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// 最小连接数
    #[serde(default)]
    pub min_connections: Option<u32>,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default = "default_true")]
    pub with_thread_ids: bool,
    #[serde(default = "default_true")]
    pub with_file: bool,
    #[serde(default = "default_true")]
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// 服务标识
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "winkr".to_string(),
            version: None,
        }
    }
}

/// 聊天服务配置（阅后即焚照片 / 聊天缓存 / 推送）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChatServiceConfig {
    /// 聊天缓存使用的 Redis 配置名称
    #[serde(default)]
    pub cache: Option<String>,
    /// 照片存储使用的 PostgreSQL 配置名称
    #[serde(default)]
    pub photo_store: Option<String>,
    /// 用户仓储使用的 PostgreSQL 配置名称（缺省与 photo_store 相同）
    #[serde(default)]
    pub user_store: Option<String>,
    /// 推送通道使用的 Redis 配置名称
    #[serde(default)]
    pub push: Option<String>,
    /// 照片默认存活时间（秒）
    #[serde(default)]
    pub default_photo_ttl_seconds: Option<i64>,
    /// 照片默认最大查看次数
    #[serde(default)]
    pub default_max_views: Option<i32>,
    /// 查看统计使用的最近记录窗口大小
    #[serde(default)]
    pub view_stats_window: Option<i64>,
    /// 在聊天中查看照片时记录的默认时长（秒）
    #[serde(default)]
    pub default_view_duration_seconds: Option<i32>,
    /// 回收任务执行间隔（秒）
    #[serde(default)]
    pub cleanup_interval_seconds: Option<u64>,
    /// 回收保留期（秒）
    #[serde(default)]
    pub cleanup_retention_seconds: Option<i64>,
    /// 回收批大小
    #[serde(default)]
    pub cleanup_batch_size: Option<i64>,
    /// 单次操作超时（毫秒）
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

/// 服务配置集合
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    /// 聊天服务配置
    #[serde(default)]
    pub chat: Option<ChatServiceConfig>,
}

/// Winkr 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WinkrAppConfig {
    /// 服务标识
    #[serde(default)]
    pub service: ServiceIdentity,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis 配置映射
    #[serde(default)]
    pub redis: HashMap<String, RedisPoolConfig>,
    /// PostgreSQL 配置映射
    #[serde(default)]
    pub postgres: HashMap<String, PostgresInstanceConfig>,
    /// 服务配置
    #[serde(default)]
    pub services: ServicesConfig,
}

impl WinkrAppConfig {
    /// 获取 Redis 配置
    pub fn redis_profile(&self, name: &str) -> Option<&RedisPoolConfig> {
        self.redis.get(name)
    }

    /// 获取 PostgreSQL 配置
    pub fn postgres_profile(&self, name: &str) -> Option<&PostgresInstanceConfig> {
        self.postgres.get(name)
    }

    /// 获取聊天服务配置
    pub fn chat_service(&self) -> ChatServiceConfig {
        self.services.chat.clone().unwrap_or_default()
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.service.name.is_empty() {
            self.service.name = "winkr".to_string();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
    }
}

/// 加载配置（进程内只加载一次）
pub fn load_config(path: Option<&str>) -> &'static WinkrAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
            warn!("failed to load environment config: {}", e);
        }
        cfg
    })
}

/// 获取应用配置
pub fn app_config() -> Option<&'static WinkrAppConfig> {
    APP_CONFIG.get()
}

/// 从文件或目录加载配置（不写入全局实例）
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<WinkrAppConfig> {
    let mut cfg = load_config_from_source(path.as_ref())?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> WinkrAppConfig {
    for path in candidates {
        match load_config_from_path(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    WinkrAppConfig::default()
}

/// 从源加载配置
fn load_config_from_source(path: &Path) -> Result<WinkrAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<WinkrAppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let cfg: WinkrAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(cfg)
}

/// 从目录加载配置
fn load_config_from_directory(path: &Path) -> Result<WinkrAppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: WinkrAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值：表递归合并，标量覆盖
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
