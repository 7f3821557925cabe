//! 配置管理器 - 负责处理不同环境下的配置选择和覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 加载环境特定配置
//! - 合并 Redis / PostgreSQL 配置

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use toml::Value;

use super::WinkrAppConfig;

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 WINKR_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("WINKR_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的 redis / postgres 配置，
    /// 并将其合并到基础配置中
    pub fn load_environment_config(base_config: &mut WinkrAppConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);

        if Path::new(&env_config_path).exists() {
            let env_config_content = fs::read_to_string(&env_config_path)
                .with_context(|| format!("unable to read environment config: {}", env_config_path))?;
            let env_config: Value = toml::from_str(&env_config_content)
                .with_context(|| format!("invalid environment config: {}", env_config_path))?;

            Self::apply_environment_overlay(base_config, &env_config)?;
        }

        Ok(())
    }

    /// 将环境配置中的 redis / postgres 配置覆盖到基础配置
    pub fn apply_environment_overlay(
        base_config: &mut WinkrAppConfig,
        env_config: &Value,
    ) -> Result<()> {
        Self::merge_profiles(&mut base_config.redis, env_config.get("redis"))
            .context("invalid redis profiles in environment config")?;
        Self::merge_profiles(&mut base_config.postgres, env_config.get("postgres"))
            .context("invalid postgres profiles in environment config")?;
        Ok(())
    }

    fn merge_profiles<T: DeserializeOwned>(
        profiles: &mut HashMap<String, T>,
        overlay: Option<&Value>,
    ) -> Result<()> {
        let Some(tables) = overlay.and_then(|value| value.as_table()) else {
            return Ok(());
        };

        for (key, value) in tables {
            // 只有包含 url 的配置才会被覆盖
            if value.get("url").and_then(|v| v.as_str()).is_none() {
                continue;
            }
            let profile: T = value.clone().try_into()?;
            profiles.insert(key.clone(), profile);
        }

        Ok(())
    }
}
