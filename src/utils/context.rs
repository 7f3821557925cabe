//! 请求上下文
//!
//! 每个对外操作都携带一个 `RequestContext`：请求ID、取消令牌和可选截止时间。
//! 在发起任何 I/O 之前调用 `ensure_active`，对 I/O future 使用 `run` 包裹。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 上下文失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// 调用方已取消
    #[error("operation cancelled")]
    Cancelled,
    /// 超过截止时间
    #[error("operation timed out")]
    Timeout,
}

/// 请求上下文
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 无截止时间的后台上下文（随机请求ID）
    pub fn background() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// 设置相对超时；已有更早的截止时间时保留更早者
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// 绑定外部取消令牌（例如服务停机令牌）
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 派生子上下文：父取消会传递给子，反之不会
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 检查上下文是否仍然有效
    pub fn ensure_active(&self) -> Result<(), ContextError> {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ContextError::Timeout);
            }
        }
        Ok(())
    }

    /// 在取消与截止时间约束下执行 future
    ///
    /// 上下文已失效时不会轮询 `fut`。
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        self.ensure_active()?;

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
                    res = tokio::time::timeout_at(deadline, fut) => {
                        res.map_err(|_| ContextError::Timeout)
                    }
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ContextError::Cancelled),
                    out = fut => Ok(out),
                }
            }
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
