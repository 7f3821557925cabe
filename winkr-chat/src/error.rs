//! 统一异常处理模块

use thiserror::Error;
use winkr_core::ContextError;

/// 聊天 / 阅后即焚照片服务错误类型
#[derive(Debug, Error)]
pub enum EphemeralError {
    /// 照片 / 访问密钥 / 消息不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 照片已被软删除
    #[error("photo is gone: {0}")]
    Gone(String),

    /// 照片已过期
    #[error("photo has expired: {0}")]
    Expired(String),

    /// 查看次数已用完
    #[error("photo view limit reached: {0}")]
    ViewsExhausted(String),

    /// 调用方不是照片所有者
    #[error("user {user_id} does not own photo {photo_id}")]
    OwnerMismatch { user_id: String, photo_id: String },

    /// 上传者不存在
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// 消息类型不是阅后即焚照片
    #[error("message {0} is not an ephemeral photo message")]
    WrongType(String),

    /// 参数非法
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 持久化存储失败
    #[error("store operation failed: {0:#}")]
    StoreFailed(#[source] anyhow::Error),

    /// 访问密钥生成失败
    #[error("access key generation failed: {0}")]
    KeygenFailed(String),

    /// 超过截止时间
    #[error("operation timed out")]
    Timeout,

    /// 调用方已取消
    #[error("operation cancelled")]
    Cancelled,
}

impl EphemeralError {
    /// 稳定的错误码
    pub fn code(&self) -> &'static str {
        match self {
            EphemeralError::NotFound(_) => "NOT_FOUND",
            EphemeralError::Gone(_) => "GONE",
            EphemeralError::Expired(_) => "EXPIRED",
            EphemeralError::ViewsExhausted(_) => "VIEWS_EXHAUSTED",
            EphemeralError::OwnerMismatch { .. } => "OWNER_MISMATCH",
            EphemeralError::UserNotFound(_) => "USER_NOT_FOUND",
            EphemeralError::WrongType(_) => "WRONG_TYPE",
            EphemeralError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EphemeralError::StoreFailed(_) => "STORE_FAILED",
            EphemeralError::KeygenFailed(_) => "KEYGEN_FAILED",
            EphemeralError::Timeout => "TIMEOUT",
            EphemeralError::Cancelled => "CANCELLED",
        }
    }

    /// 查看被拒绝（照片已不可见）
    pub fn is_view_rejection(&self) -> bool {
        matches!(
            self,
            EphemeralError::Gone(_) | EphemeralError::Expired(_) | EphemeralError::ViewsExhausted(_)
        )
    }
}

impl From<ContextError> for EphemeralError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => EphemeralError::Cancelled,
            ContextError::Timeout => EphemeralError::Timeout,
        }
    }
}

impl From<anyhow::Error> for EphemeralError {
    fn from(err: anyhow::Error) -> Self {
        EphemeralError::StoreFailed(err)
    }
}

/// 服务结果类型
pub type EphemeralResult<T> = Result<T, EphemeralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(EphemeralError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(EphemeralError::Gone("x".into()).code(), "GONE");
        assert_eq!(
            EphemeralError::OwnerMismatch {
                user_id: "u2".into(),
                photo_id: "p1".into()
            }
            .code(),
            "OWNER_MISMATCH"
        );
        assert_eq!(EphemeralError::from(ContextError::Timeout).code(), "TIMEOUT");
        assert_eq!(EphemeralError::from(ContextError::Cancelled).code(), "CANCELLED");
        assert_eq!(
            EphemeralError::from(anyhow::anyhow!("connection reset")).code(),
            "STORE_FAILED"
        );
    }

    #[test]
    fn test_view_rejection_kinds() {
        assert!(EphemeralError::Expired("p".into()).is_view_rejection());
        assert!(EphemeralError::ViewsExhausted("p".into()).is_view_rejection());
        assert!(!EphemeralError::NotFound("p".into()).is_view_rejection());
    }
}
