use anyhow::Result;
use winkr_chat::ApplicationBootstrap;
use winkr_core::load_config;
use winkr_core::tracing::init_tracing_from_config;

const CONFIG_PATH_ENV: &str = "WINKR_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config".to_string());
    let app_config = load_config(Some(config_path.as_str()));

    init_tracing_from_config(Some(&app_config.logging));

    ApplicationBootstrap::run(app_config).await
}
