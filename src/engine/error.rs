use thiserror::Error;

use crate::{Unrecoverable, engine::state::balance::BalanceError, error::IndexError};

/// 引擎处理事件时产生的错误。
///
/// Recoverable 错误只影响当前事件或订单，处理继续；Unrecoverable 错误意味着分区
/// 无法继续安全运行。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// 可恢复错误
    #[error("recoverable EngineError: {0}")]
    Recoverable(#[from] RecoverableEngineError),

    /// 不可恢复错误
    #[error("unrecoverable EngineError: {0}")]
    Unrecoverable(#[from] UnrecoverableEngineError),
}

impl Unrecoverable for EngineError {
    fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// 只影响当前事件或订单的错误，处理继续。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoverableEngineError {
    /// 余额操作失败（余额不足等）
    #[error("BalanceError: {0}")]
    Balance(#[from] BalanceError),
}

/// 分区无法继续安全运行的错误。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnrecoverableEngineError {
    /// 执行请求通道已关闭
    #[error("execution channel terminated: {0}")]
    ExecutionChannelTerminated(String),

    /// 索引查找失败
    #[error("IndexError: {0}")]
    Index(#[from] IndexError),
}
