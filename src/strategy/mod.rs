use derive_more::{Constructor, Display, From};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
    engine::state::{balance::Balance, market::MarketView, order::OrderKind},
    instrument::{AccountIndex, AssetName, Instrument, InstrumentIndex, Side},
    risk::LiquiditySnapshot,
};

/// 概率阈值策略。
pub mod probability;

/// 预测市场价差策略。
pub mod prediction;

/// 策略标识符。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct StrategyId(SmolStr);

impl StrategyId {
    /// 创建一个新的 [`StrategyId`]。
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// 策略生成的订单意图，进入前置检查与预留流程前的纯数据。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderIntent {
    /// 下单账户
    pub account: AccountIndex,
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 买卖方向
    pub side: Side,
    /// 订单类型
    pub kind: OrderKind,
    /// 数量
    pub quantity: Decimal,
    /// 限价（市价单为 None）
    pub price: Option<Decimal>,
}

/// 建议信号的类别。
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, Deserialize, Serialize)]
pub enum AdvisorySignal {
    /// 信号落在谨慎区间，只观察不动作
    Cautious,
    /// 条件不满足，持有不动作
    Hold,
}

/// 策略不生成订单时对外报告的建议信号。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct StrategyAdvisory {
    /// 发出建议的策略
    pub strategy: StrategyId,
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 信号类别
    pub signal: AdvisorySignal,
    /// 建议理由
    pub reason: SmolStr,
}

/// 一次策略评估的完整结论：订单意图与建议信号。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrategyDecision {
    /// 生成的订单意图
    pub intents: Vec<OrderIntent>,
    /// 不动作时的建议信号
    pub advisories: Vec<StrategyAdvisory>,
}

impl StrategyDecision {
    /// 既无意图也无建议。
    pub fn none() -> Self {
        Self::default()
    }

    /// 单个订单意图。
    pub fn intent(intent: OrderIntent) -> Self {
        Self {
            intents: vec![intent],
            advisories: Vec::new(),
        }
    }

    /// 单个建议信号。
    pub fn advise(advisory: StrategyAdvisory) -> Self {
        Self {
            intents: Vec::new(),
            advisories: vec![advisory],
        }
    }

    /// 合并另一次评估的结论。
    pub fn merge(&mut self, other: Self) {
        self.intents.extend(other.intents);
        self.advisories.extend(other.advisories);
    }
}

/// 策略评估时可见的账户余额快照。
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct AccountSnapshot {
    /// 账户
    pub account: AccountIndex,
    /// 资产 → 余额
    pub balances: FnvHashMap<AssetName, Balance>,
}

impl AccountSnapshot {
    /// 指定资产的可用余额，缺失视为零。
    pub fn available(&self, asset: &AssetName) -> Decimal {
        self.balances
            .get(asset)
            .map(|balance| balance.available)
            .unwrap_or(Decimal::ZERO)
    }

    /// 指定资产的总余额，缺失视为零。
    pub fn total(&self, asset: &AssetName) -> Decimal {
        self.balances
            .get(asset)
            .map(|balance| balance.total)
            .unwrap_or(Decimal::ZERO)
    }
}

/// 策略配置非法时返回的错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStrategyConfig {
    /// 概率阈值必须落在 [0, 1]
    #[error("probability threshold outside [0, 1]: {0}")]
    ThresholdOutOfRange(Decimal),

    /// 下限阈值必须不大于上限阈值
    #[error("minimum threshold {minimum} exceeds safe threshold {safe}")]
    ThresholdOrder {
        /// 下限阈值
        minimum: Decimal,
        /// 上限阈值
        safe: Decimal,
    },

    /// 参数必须为正
    #[error("{name} must be positive: {value}")]
    NonPositive {
        /// 参数名称
        name: &'static str,
        /// 非法取值
        value: Decimal,
    },
}

/// 在不可变快照上生成订单意图的策略接口。
///
/// 策略只消费快照，不持有引擎状态的引用。同一交易对的评估在其分区内串行执行，
/// 实现可以安全地维护内部状态（如滞回基准）。
pub trait Strategy
where
    Self: std::fmt::Debug + Send,
{
    /// 策略标识符。
    fn id(&self) -> StrategyId;

    /// 在市场视图、流动性评估与账户快照上评估，返回订单意图与建议信号。
    fn evaluate(
        &mut self,
        instrument: &Instrument,
        market: &MarketView,
        liquidity: &LiquiditySnapshot,
        account: &AccountSnapshot,
    ) -> StrategyDecision;
}

/// 从不生成订单的默认策略。
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl Strategy for DefaultStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::new("default")
    }

    fn evaluate(
        &mut self,
        _: &Instrument,
        _: &MarketView,
        _: &LiquiditySnapshot,
        _: &AccountSnapshot,
    ) -> StrategyDecision {
        StrategyDecision::none()
    }
}

/// 将价格对齐到交易对价格网格（向下取整）。
pub(crate) fn quantize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return price;
    }
    (price / tick_size).floor() * tick_size
}
