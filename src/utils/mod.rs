//! 工具函数模块
//!
//! 提供请求上下文（取消 / 超时）等通用工具

pub mod context;

pub use context::{ContextError, RequestContext};
