use chrono::{DateTime, TimeDelta, Utc};
use derive_more::Constructor;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::VecDeque;

use crate::{
    engine::state::market::MarketView,
    instrument::{Instrument, InstrumentIndex, Side},
    strategy::OrderIntent,
};

/// 大额订单监控。
pub mod large_order;

/// 流动性评级，越高表示订单簿越能吸收目标订单。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
pub enum LiquidityRating {
    /// 深度不足订单的 1.5 倍
    Low,
    /// 深度不低于订单的 1.5 倍
    Medium,
    /// 深度不低于订单的 5 倍
    High,
}

/// 评估结论的置信度。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
pub enum Confidence {
    /// 数据缺失或严重过期
    Low,
    /// 数据存在但样本不足或已过期
    Medium,
    /// 数据充分且新鲜
    High,
}

impl Confidence {
    /// 降一级（数据过期时调用）。
    pub fn downgrade(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }
}

/// 一次流动性评估的结果。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LiquiditySnapshot {
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 评估时间
    pub time: DateTime<Utc>,
    /// 评估的订单方向
    pub side: Side,
    /// 评估的订单数量
    pub order_size: Decimal,
    /// 流动性评级
    pub rating: LiquidityRating,
    /// 预期滑点比例（相对最优价）
    pub slippage: Decimal,
    /// 置信度
    pub confidence: Confidence,
    /// 评估备注（数据缺失原因等）
    pub detail: Option<SmolStr>,
}

/// 一笔真实成交相对下单时报价的偏差记录。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct ExecutionRecord {
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 成交时间
    pub time: DateTime<Utc>,
    /// 下单时的报价
    pub api_price: Decimal,
    /// 实际成交价
    pub executed_price: Decimal,
    /// 成交数量
    pub size: Decimal,
}

impl ExecutionRecord {
    /// 实际成交价相对报价的偏差（绝对价差）。
    pub fn slippage(&self) -> Decimal {
        self.executed_price - self.api_price
    }
}

/// 执行风险等级。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
pub enum ExecutionRisk {
    /// 流动性充分
    Low,
    /// 可执行但需关注滑点
    Medium,
    /// 流动性不足，滑点风险高
    High,
}

/// 执行可行性检查的结论。
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFeasibility {
    /// 是否建议执行
    pub feasible: bool,
    /// 估计的实际成交价（报价加滑点溢价）
    pub estimated_execution_price: Decimal,
    /// 执行风险等级
    pub risk: ExecutionRisk,
    /// 支撑结论的流动性评估
    pub snapshot: LiquiditySnapshot,
}

/// 流动性评估与订单前置检查的参数。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RiskConfig {
    /// High 评级所需的深度倍数
    pub high_depth_multiple: Decimal,
    /// Medium 评级所需的深度倍数
    pub medium_depth_multiple: Decimal,
    /// 市场视图的新鲜度上限（秒），超过后置信度降一级
    pub max_view_age_secs: i64,
    /// High 置信度所需的最少成交样本数
    pub min_data_points: usize,
    /// 无法估计时使用的保守滑点上限
    pub max_slippage_estimate: Decimal,
    /// 保留的评估快照数量
    pub snapshot_capacity: usize,
    /// 每个交易对保留的执行偏差记录数量
    pub max_history_per_instrument: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_depth_multiple: Decimal::from(5),
            medium_depth_multiple: Decimal::new(15, 1),
            max_view_age_secs: 30,
            min_data_points: 10,
            max_slippage_estimate: Decimal::ONE,
            snapshot_capacity: 1000,
            max_history_per_instrument: 10_000,
        }
    }
}

/// 流动性与执行风险分析器。
///
/// 对给定 (交易对, 订单数量) 评估订单簿深度、滑点与数据可信度。数据缺失时返回
/// 保守默认值（Low 评级、保守滑点上限、Low 置信度），绝不拒绝评估。
#[derive(Debug)]
pub struct LiquidityAnalyzer {
    config: RiskConfig,
    snapshots: Mutex<VecDeque<LiquiditySnapshot>>,
    executions: Mutex<FnvHashMap<InstrumentIndex, VecDeque<ExecutionRecord>>>,
}

impl LiquidityAnalyzer {
    /// 以给定配置创建分析器。
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            snapshots: Mutex::new(VecDeque::new()),
            executions: Mutex::new(FnvHashMap::default()),
        }
    }

    /// 评估指定订单对市场的冲击，并记录评估快照。
    pub fn evaluate(
        &self,
        view: &MarketView,
        side: Side,
        order_size: Decimal,
        time: DateTime<Utc>,
    ) -> LiquiditySnapshot {
        let snapshot = self.evaluate_inner(view, side, order_size, time);
        let mut snapshots = self.snapshots.lock();
        if snapshots.len() >= self.config.snapshot_capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot.clone());
        snapshot
    }

    fn evaluate_inner(
        &self,
        view: &MarketView,
        side: Side,
        order_size: Decimal,
        time: DateTime<Utc>,
    ) -> LiquiditySnapshot {
        let Some(book) = &view.book else {
            return LiquiditySnapshot {
                instrument: view.instrument,
                time,
                side,
                order_size,
                rating: LiquidityRating::Low,
                slippage: self.config.max_slippage_estimate,
                confidence: Confidence::Low,
                detail: Some(SmolStr::new_static("no order book data")),
            };
        };

        let depth = book.value.consumable_depth(side);
        let rating = if order_size <= Decimal::ZERO {
            LiquidityRating::High
        } else if depth >= order_size * self.config.high_depth_multiple {
            LiquidityRating::High
        } else if depth >= order_size * self.config.medium_depth_multiple {
            LiquidityRating::Medium
        } else {
            LiquidityRating::Low
        };

        let (slippage, detail) = match book.value.walk_slippage(side, order_size) {
            Some(slippage) => (slippage, None),
            None => (
                self.config.max_slippage_estimate,
                Some(SmolStr::new_static("visible depth below order size")),
            ),
        };

        let mut confidence = if view.trade_count() >= self.config.min_data_points {
            Confidence::High
        } else {
            Confidence::Medium
        };

        let age = time.signed_duration_since(view.time_last_update);
        if age > TimeDelta::seconds(self.config.max_view_age_secs) {
            confidence = confidence.downgrade();
        }

        LiquiditySnapshot {
            instrument: view.instrument,
            time,
            side,
            order_size,
            rating,
            slippage,
            confidence,
            detail,
        }
    }

    /// 登记一笔真实成交的执行偏差，历史按交易对有界保留。
    pub fn record_execution(&self, record: ExecutionRecord) {
        let mut executions = self.executions.lock();
        let history = executions.entry(record.instrument).or_default();
        if history.len() >= self.config.max_history_per_instrument {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// 指定交易对的执行偏差历史（按记录顺序）。
    pub fn execution_history(&self, instrument: InstrumentIndex) -> Vec<ExecutionRecord> {
        self.executions
            .lock()
            .get(&instrument)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 检查指定订单的执行可行性：流动性评级结合估计成交价。
    ///
    /// 滑点溢价优先取执行历史的均值加两倍平均绝对偏差；无历史时退回订单簿
    /// 逐档估计。Low 评级视为不可执行。
    pub fn check_execution_feasibility(
        &self,
        view: &MarketView,
        side: Side,
        api_price: Decimal,
        order_size: Decimal,
        time: DateTime<Utc>,
    ) -> ExecutionFeasibility {
        let snapshot = self.evaluate(view, side, order_size, time);
        let premium = self
            .historical_premium(view.instrument)
            .unwrap_or(api_price * snapshot.slippage);

        let estimated_execution_price = match side {
            Side::Buy => api_price + premium,
            Side::Sell => (api_price - premium).max(Decimal::ZERO),
        };

        let (feasible, risk) = match snapshot.rating {
            LiquidityRating::Low => (false, ExecutionRisk::High),
            LiquidityRating::Medium => (true, ExecutionRisk::Medium),
            LiquidityRating::High => (true, ExecutionRisk::Low),
        };

        ExecutionFeasibility {
            feasible,
            estimated_execution_price,
            risk,
            snapshot,
        }
    }

    fn historical_premium(&self, instrument: InstrumentIndex) -> Option<Decimal> {
        let executions = self.executions.lock();
        let history = executions.get(&instrument)?;
        if history.is_empty() {
            return None;
        }

        let count = Decimal::from(history.len());
        let mean = history.iter().map(ExecutionRecord::slippage).sum::<Decimal>() / count;
        let deviation = history
            .iter()
            .map(|record| (record.slippage() - mean).abs())
            .sum::<Decimal>()
            / count;
        Some((mean + Decimal::TWO * deviation).abs())
    }

    /// 最近 `n` 条评估快照，供运维视图使用。
    pub fn recent_snapshots(&self, n: usize) -> Vec<LiquiditySnapshot> {
        let snapshots = self.snapshots.lock();
        snapshots
            .iter()
            .skip(snapshots.len().saturating_sub(n))
            .cloned()
            .collect()
    }
}

/// 通过前置检查的订单意图。
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Constructor)]
pub struct RiskApproved<T>(pub T);

impl<T> RiskApproved<T> {
    /// 消费并取出内部值。
    pub fn into_item(self) -> T {
        self.0
    }
}

/// 未通过前置检查的订单意图及其原因。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct RiskRefused<T> {
    /// 被拒绝的意图
    pub item: T,
    /// 拒绝原因
    pub reason: RefuseReason,
}

/// 订单前置检查的拒绝原因（参数校验故障）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Deserialize, Serialize)]
pub enum RefuseReason {
    /// 数量非正
    #[error("quantity must be positive: {0}")]
    NonPositiveQuantity(Decimal),

    /// 数量低于交易对最小订单量
    #[error("quantity {quantity} below instrument minimum {minimum}")]
    BelowMinimumSize {
        /// 意图数量
        quantity: Decimal,
        /// 交易对最小订单量
        minimum: Decimal,
    },

    /// 限价单缺少价格
    #[error("limit order requires a price")]
    MissingLimitPrice,

    /// 价格不在交易对价格网格上
    #[error("price {price} not aligned to tick size {tick_size}")]
    PriceOffTickGrid {
        /// 意图价格
        price: Decimal,
        /// 交易对最小价格变动单位
        tick_size: Decimal,
    },

    /// 价格非正
    #[error("price must be positive: {0}")]
    NonPositivePrice(Decimal),

    /// 交易对处于管理性暂停
    #[error("instrument halted by administrative action")]
    InstrumentHalted,
}

/// 对订单意图执行前置参数校验。
///
/// 只做无副作用的校验；余额预留与订单创建由引擎原子地执行。
pub fn pre_trade_check(
    instrument: &Instrument,
    intent: OrderIntent,
) -> Result<RiskApproved<OrderIntent>, RiskRefused<OrderIntent>> {
    if instrument.halted {
        return Err(RiskRefused::new(intent, RefuseReason::InstrumentHalted));
    }

    if intent.quantity <= Decimal::ZERO {
        let reason = RefuseReason::NonPositiveQuantity(intent.quantity);
        return Err(RiskRefused::new(intent, reason));
    }

    if intent.quantity < instrument.min_order_size {
        let reason = RefuseReason::BelowMinimumSize {
            quantity: intent.quantity,
            minimum: instrument.min_order_size,
        };
        return Err(RiskRefused::new(intent, reason));
    }

    match (intent.kind, intent.price) {
        (crate::engine::state::order::OrderKind::Limit, None) => {
            Err(RiskRefused::new(intent, RefuseReason::MissingLimitPrice))
        }
        (_, Some(price)) if price <= Decimal::ZERO => {
            let reason = RefuseReason::NonPositivePrice(price);
            Err(RiskRefused::new(intent, reason))
        }
        (_, Some(price))
            if instrument.tick_size > Decimal::ZERO
                && (price % instrument.tick_size) != Decimal::ZERO =>
        {
            let reason = RefuseReason::PriceOffTickGrid {
                price,
                tick_size: instrument.tick_size,
            };
            Err(RiskRefused::new(intent, reason))
        }
        _ => Ok(RiskApproved::new(intent)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::state::order::OrderKind,
        test_utils::{self, level, time_plus_secs},
    };
    use rust_decimal_macros::dec;

    fn analyzer() -> LiquidityAnalyzer {
        LiquidityAnalyzer::new(RiskConfig::default())
    }

    fn view_with_ask_depth(depth: f64, time: chrono::DateTime<Utc>) -> MarketView {
        test_utils::market_view_with_book(
            test_utils::instrument_index(),
            vec![level(0.39, depth)],
            vec![level(0.41, depth)],
            time,
        )
    }

    #[test]
    fn test_rating_tiers() {
        let time = Utc::now();
        let analyzer = analyzer();

        // 深度 / 订单 = 5 → High
        let snapshot = analyzer.evaluate(&view_with_ask_depth(500.0, time), Side::Buy, dec!(100), time);
        assert_eq!(snapshot.rating, LiquidityRating::High);

        // 深度 / 订单 = 2 → Medium
        let snapshot = analyzer.evaluate(&view_with_ask_depth(200.0, time), Side::Buy, dec!(100), time);
        assert_eq!(snapshot.rating, LiquidityRating::Medium);

        // 深度 / 订单 = 1.2 → Low
        let snapshot = analyzer.evaluate(&view_with_ask_depth(120.0, time), Side::Buy, dec!(100), time);
        assert_eq!(snapshot.rating, LiquidityRating::Low);
    }

    #[test]
    fn test_rating_monotonic_in_depth() {
        let time = Utc::now();
        let analyzer = analyzer();

        let mut prev = LiquidityRating::Low;
        for depth in [50.0, 100.0, 149.0, 150.0, 300.0, 499.0, 500.0, 1000.0] {
            let snapshot =
                analyzer.evaluate(&view_with_ask_depth(depth, time), Side::Buy, dec!(100), time);
            assert!(snapshot.rating >= prev, "rating regressed at depth {depth}");
            prev = snapshot.rating;
        }
    }

    #[test]
    fn test_missing_book_returns_conservative_defaults() {
        let time = Utc::now();
        let analyzer = analyzer();
        let view = crate::engine::state::market::MarketView::new(test_utils::instrument_index());

        let snapshot = analyzer.evaluate(&view, Side::Buy, dec!(100), time);
        assert_eq!(snapshot.rating, LiquidityRating::Low);
        assert_eq!(snapshot.confidence, Confidence::Low);
        assert_eq!(snapshot.slippage, dec!(1));
    }

    #[test]
    fn test_thin_book_low_rating_with_nonzero_slippage_estimate() {
        let time = Utc::now();
        let analyzer = analyzer();
        // 深度 10 对订单 100：Low 评级，滑点取保守上限
        let snapshot =
            analyzer.evaluate(&view_with_ask_depth(10.0, time), Side::Buy, dec!(100), time);
        assert_eq!(snapshot.rating, LiquidityRating::Low);
        assert!(snapshot.slippage > dec!(0));
    }

    #[test]
    fn test_stale_view_downgrades_confidence() {
        let base_time = Utc::now();
        let analyzer = analyzer();
        let view = view_with_ask_depth(500.0, base_time);

        let fresh = analyzer.evaluate(&view, Side::Buy, dec!(100), base_time);
        let stale = analyzer.evaluate(&view, Side::Buy, dec!(100), time_plus_secs(base_time, 60));
        assert!(stale.confidence < fresh.confidence);
    }

    #[test]
    fn test_execution_history_bounded_per_instrument() {
        let analyzer = LiquidityAnalyzer::new(RiskConfig {
            max_history_per_instrument: 3,
            ..RiskConfig::default()
        });
        let instrument = test_utils::instrument_index();

        for i in 0..5u32 {
            analyzer.record_execution(ExecutionRecord::new(
                instrument,
                Utc::now(),
                dec!(0.40),
                dec!(0.40) + Decimal::from(i) * dec!(0.001),
                dec!(10),
            ));
        }

        let history = analyzer.execution_history(instrument);
        assert_eq!(history.len(), 3);
        // 最旧的两条已被淘汰
        assert_eq!(history[0].executed_price, dec!(0.402));
    }

    #[test]
    fn test_feasibility_uses_execution_history_premium() {
        let time = Utc::now();
        let analyzer = analyzer();
        let instrument = test_utils::instrument_index();

        // 稳定的历史偏差 +0.01：估计成交价 = 报价 + 0.01
        for _ in 0..10 {
            analyzer.record_execution(ExecutionRecord::new(
                instrument,
                time,
                dec!(0.40),
                dec!(0.41),
                dec!(10),
            ));
        }

        let feasibility = analyzer.check_execution_feasibility(
            &view_with_ask_depth(500.0, time),
            Side::Buy,
            dec!(0.40),
            dec!(100),
            time,
        );
        assert!(feasibility.feasible);
        assert_eq!(feasibility.risk, ExecutionRisk::Low);
        assert_eq!(feasibility.estimated_execution_price, dec!(0.41));
    }

    #[test]
    fn test_feasibility_rejected_on_low_rating() {
        let time = Utc::now();
        let analyzer = analyzer();

        let feasibility = analyzer.check_execution_feasibility(
            &view_with_ask_depth(10.0, time),
            Side::Buy,
            dec!(0.40),
            dec!(100),
            time,
        );
        assert!(!feasibility.feasible);
        assert_eq!(feasibility.risk, ExecutionRisk::High);
        assert!(feasibility.estimated_execution_price > dec!(0.40));
    }

    #[test]
    fn test_pre_trade_check_validation_faults() {
        let instrument = test_utils::instrument("market_a_yes");
        let intent = |quantity, price| OrderIntent {
            account: test_utils::account_index(),
            instrument: test_utils::instrument_index(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            quantity,
            price,
        };

        assert!(pre_trade_check(&instrument, intent(dec!(10), Some(dec!(0.40)))).is_ok());

        assert!(matches!(
            pre_trade_check(&instrument, intent(dec!(0), Some(dec!(0.40)))),
            Err(RiskRefused {
                reason: RefuseReason::NonPositiveQuantity(_),
                ..
            })
        ));
        assert!(matches!(
            pre_trade_check(&instrument, intent(dec!(0.5), Some(dec!(0.40)))),
            Err(RiskRefused {
                reason: RefuseReason::BelowMinimumSize { .. },
                ..
            })
        ));
        assert!(matches!(
            pre_trade_check(&instrument, intent(dec!(10), None)),
            Err(RiskRefused {
                reason: RefuseReason::MissingLimitPrice,
                ..
            })
        ));
        assert!(matches!(
            pre_trade_check(&instrument, intent(dec!(10), Some(dec!(0.405)))),
            Err(RiskRefused {
                reason: RefuseReason::PriceOffTickGrid { .. },
                ..
            })
        ));

        let halted = Instrument {
            halted: true,
            ..instrument
        };
        assert!(matches!(
            pre_trade_check(&halted, intent(dec!(10), Some(dec!(0.40)))),
            Err(RiskRefused {
                reason: RefuseReason::InstrumentHalted,
                ..
            })
        ));
    }
}
