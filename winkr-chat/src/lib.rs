//! Winkr 聊天服务
//!
//! 阅后即焚照片生命周期、聊天缓存、通知扇出、聊天集成与回收任务。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;

pub use config::ChatConfig;
pub use error::{EphemeralError, EphemeralResult};
pub use service::{ApplicationBootstrap, ApplicationContext};
