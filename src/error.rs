use thiserror::Error;

use crate::{engine::error::EngineError, strategy::InvalidStrategyConfig};

/// Parlay 顶层错误。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParlayError {
    /// 索引查找失败
    #[error("IndexError: {0}")]
    Index(#[from] IndexError),

    /// 引擎错误
    #[error("EngineError: {0}")]
    Engine(#[from] EngineError),

    /// 策略配置非法
    #[error("invalid strategy config: {0}")]
    StrategyConfig(#[from] InvalidStrategyConfig),

    /// 系统配置非法
    #[error("invalid system config: {0}")]
    Config(String),
}

/// 索引查找失败。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// 交易对索引缺失
    #[error("InstrumentIndex: {0}")]
    InstrumentIndex(String),

    /// 账户索引缺失
    #[error("AccountIndex: {0}")]
    AccountIndex(String),
}
