use thiserror::Error;

use crate::{Unrecoverable, engine::state::order::OrderId};

/// 网关调用失败。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 网络或连接故障，可重试
    #[error("gateway network error: {0}")]
    Network(String),

    /// 网关明确拒绝请求，不可重试
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    /// 网关限流，可重试
    #[error("gateway rate limited: {0}")]
    RateLimited(String),

    /// 订单在网关侧不存在
    #[error("order not found on gateway")]
    OrderNotFound,
}

impl GatewayError {
    /// 该错误是否值得重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_))
    }
}

/// 执行层错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// 网关调用失败
    #[error("GatewayError: {0}")]
    Gateway(#[from] GatewayError),

    /// 重试预算耗尽，订单结果仍未知
    #[error("retries exhausted for order {0}, outcome unknown")]
    RetriesExhausted(OrderId),

    /// 响应通道已关闭
    #[error("execution response channel terminated")]
    ResponseChannelTerminated,
}

impl Unrecoverable for ExecutionError {
    fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::ResponseChannelTerminated)
    }
}
