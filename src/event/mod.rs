use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::hash::{Hash, Hasher};

use crate::{
    engine::state::{
        balance::AssetBalance,
        market::OrderBookL2,
        order::{GatewayOrderId, OrderId},
    },
    instrument::{AccountIndex, GatewayId, InstrumentIndex, Side},
    snapshot::Snapshot,
};

/// 只追加的事件日志。
pub mod journal;

/// 事件的稳定去重标识符。
///
/// 网关提供序列号时直接使用；否则由事件内容派生（内容哈希），保证重复投递产生相同的 ID。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, From,
    derive_more::Display,
)]
pub struct EventId(SmolStr);

impl EventId {
    /// 从网关提供的序列号创建 [`EventId`]。
    pub fn from_gateway_sequence(gateway: &GatewayId, sequence: u64) -> Self {
        Self(SmolStr::new(format!("{gateway}:{sequence}")))
    }

    /// 从事件内容派生 [`EventId`]（网关未提供序列号时的兜底）。
    pub fn from_content<T>(gateway: &GatewayId, content: &T) -> Self
    where
        T: Hash,
    {
        let mut hasher = fnv::FnvHasher::default();
        gateway.hash(&mut hasher);
        content.hash(&mut hasher);
        Self(SmolStr::new(format!("{gateway}:h{:016x}", hasher.finish())))
    }

    /// 从已有字符串创建 [`EventId`]。
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// 规范化的网关事件信封，Dispatcher 的接入单元。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct GatewayEvent {
    /// 稳定去重标识符
    pub id: EventId,
    /// 事件来源网关
    pub gateway: GatewayId,
    /// 事件被系统接收的时间
    pub time_received: DateTime<Utc>,
    /// 事件内容
    pub kind: GatewayEventKind,
}

/// 网关事件的类别。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum GatewayEventKind {
    /// 市场事件（逐笔成交、订单簿、概率更新）
    Market(MarketEvent),
    /// 账户/订单事件（余额、确认、成交、拒绝）
    Account(AccountEvent),
}

/// 规范化的市场事件。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct MarketEvent<Kind = MarketEventKind> {
    /// 关联的交易对
    pub instrument: InstrumentIndex,
    /// 网关报告的事件发生时间
    pub time_gateway: DateTime<Utc>,
    /// 事件内容
    pub kind: Kind,
}

/// 市场事件的内容。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum MarketEventKind {
    /// 公开逐笔成交
    Trade(PublicTrade),
    /// L2 订单簿快照
    BookL2(Snapshot<OrderBookL2>),
    /// 结果概率更新（预测市场），取值范围 [0, 1]
    Probability(Decimal),
}

/// 公开逐笔成交。
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct PublicTrade {
    /// 成交价格
    pub price: Decimal,
    /// 成交数量
    pub quantity: Decimal,
    /// 主动方方向
    pub side: Side,
}

/// 规范化的账户/订单事件。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AccountEvent {
    /// 关联的账户
    pub account: AccountIndex,
    /// 事件内容
    pub kind: AccountEventKind,
}

/// 账户事件的内容。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum AccountEventKind {
    /// 单一资产余额的权威快照
    BalanceSnapshot(Snapshot<AssetBalance>),
    /// 网关已接受订单
    OrderAccepted(OrderAccepted),
    /// 网关已拒绝订单
    OrderRejected(OrderRejected),
    /// 订单（部分）成交
    Fill(FillEvent),
    /// 网关已确认撤销
    CancelAccepted(CancelAccepted),
}

/// 网关对订单提交的确认。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderAccepted {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 网关分配的订单标识符，只允许设置一次
    pub gateway_order_id: GatewayOrderId,
}

/// 网关对订单提交的拒绝。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderRejected {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 拒绝原因
    pub reason: SmolStr,
    /// 是否需要人工审核（执行层重试耗尽后升级）
    pub manual_review: bool,
}

/// 订单成交通知。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct FillEvent {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 本次成交数量（增量）
    pub quantity: Decimal,
    /// 本次成交价格
    pub price: Decimal,
    /// 网关报告的成交时间
    pub time_gateway: DateTime<Utc>,
}

/// 网关对撤销请求的确认。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct CancelAccepted {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_from_content_is_stable() {
        let gateway = GatewayId::new("polymarket");
        let a = EventId::from_content(&gateway, &("fill", "order-1", "40"));
        let b = EventId::from_content(&gateway, &("fill", "order-1", "40"));
        let c = EventId::from_content(&gateway, &("fill", "order-1", "60"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_event_id_namespaced_by_gateway() {
        let a = EventId::from_gateway_sequence(&GatewayId::new("polymarket"), 42);
        let b = EventId::from_gateway_sequence(&GatewayId::new("binance"), 42);
        assert_ne!(a, b);
    }
}
