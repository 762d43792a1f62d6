use serde::{Deserialize, Serialize};
use tracing::info;

/// 算法订单生成的开关状态。
///
/// Disabled 时引擎继续处理市场与账户事件、维护状态，但不调用策略生成新订单。
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum TradingState {
    /// 策略可以生成新订单
    Enabled,
    /// 暂停生成新订单，事件处理照常进行
    Disabled,
}

impl TradingState {
    /// 更新交易状态，返回本次更新的审计信息。
    pub fn update(&mut self, update: TradingState) -> TradingStateUpdateAudit {
        let prev = *self;
        let next = match (*self, update) {
            (TradingState::Enabled, TradingState::Disabled) => {
                info!("TradingState transitioned: Enabled -> Disabled");
                TradingState::Disabled
            }
            (TradingState::Disabled, TradingState::Enabled) => {
                info!("TradingState transitioned: Disabled -> Enabled");
                TradingState::Enabled
            }
            (prev, _) => prev,
        };

        *self = next;

        TradingStateUpdateAudit {
            prev,
            current: next,
        }
    }
}

impl Default for TradingState {
    fn default() -> Self {
        Self::Disabled
    }
}

/// [`TradingState::update`] 的审计信息。
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TradingStateUpdateAudit {
    /// 更新前的状态
    pub prev: TradingState,
    /// 更新后的状态
    pub current: TradingState,
}

impl TradingStateUpdateAudit {
    /// 本次更新是否从 Enabled 切换到了 Disabled。
    pub fn transitioned_to_disabled(&self) -> bool {
        self.prev == TradingState::Enabled && self.current == TradingState::Disabled
    }
}
