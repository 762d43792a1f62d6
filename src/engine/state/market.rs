use chrono::{DateTime, Utc};
use derive_more::Constructor;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::{
    Timed,
    event::{MarketEvent, MarketEventKind, PublicTrade},
    instrument::{InstrumentIndex, Side},
};

/// 默认的每交易对成交历史容量。
pub const DEFAULT_TRADE_CAPACITY: usize = 10_000;

/// 订单簿中的一个价格档位。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Constructor,
)]
pub struct Level {
    /// 档位价格
    pub price: Decimal,
    /// 档位数量
    pub quantity: Decimal,
}

/// L2 订单簿快照，买档/卖档均按最优价优先排序。
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize, Constructor)]
pub struct OrderBookL2 {
    /// 买档，价格从高到低
    pub bids: Vec<Level>,
    /// 卖档，价格从低到高
    pub asks: Vec<Level>,
}

impl OrderBookL2 {
    /// 最优买价档位。
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    /// 最优卖价档位。
    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// 买卖价差（需要双边报价）。
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// 中间价（需要双边报价）。
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// 指定方向的订单会消耗的对手档位。
    pub fn consumable_levels(&self, side: Side) -> &[Level] {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    /// 指定方向可消耗的总深度（对手档位数量之和）。
    pub fn consumable_depth(&self, side: Side) -> Decimal {
        self.consumable_levels(side)
            .iter()
            .map(|level| level.quantity)
            .sum()
    }

    /// 模拟用指定数量吃穿订单簿，估计相对最优价的滑点比例。
    ///
    /// 返回 `(vwap - best) / best`（买入）或 `(best - vwap) / best`（卖出）。
    /// 可见深度不足以容纳订单时返回 `None`。
    pub fn walk_slippage(&self, side: Side, quantity: Decimal) -> Option<Decimal> {
        if quantity <= Decimal::ZERO {
            return None;
        }

        let levels = self.consumable_levels(side);
        let best = levels.first()?.price;
        if best <= Decimal::ZERO {
            return None;
        }

        let mut remaining = quantity;
        let mut notional = Decimal::ZERO;
        for level in levels {
            let taken = remaining.min(level.quantity);
            notional += taken * level.price;
            remaining -= taken;
            if remaining <= Decimal::ZERO {
                break;
            }
        }

        if remaining > Decimal::ZERO {
            return None;
        }

        let vwap = notional / quantity;
        let slippage = match side {
            Side::Buy => (vwap - best) / best,
            Side::Sell => (best - vwap) / best,
        };
        Some(slippage.max(Decimal::ZERO))
    }
}

/// 单一交易对的市场视图：最新订单簿、滚动成交窗口与结果概率。
///
/// 视图归处理该交易对的分区独占，无需加锁。
#[derive(Debug, Clone, PartialEq)]
pub struct MarketView {
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 最新的 L2 订单簿
    pub book: Option<Timed<OrderBookL2>>,
    /// 最近成交的滚动窗口，容量有界
    pub trades: VecDeque<Timed<PublicTrade>>,
    /// 最新的结果概率（预测市场）
    pub probability: Option<Timed<Decimal>>,
    /// 任意市场数据的最后更新时间，用于新鲜度判断
    pub time_last_update: DateTime<Utc>,
    trade_capacity: usize,
}

impl MarketView {
    /// 创建一个空的 [`MarketView`]。
    pub fn new(instrument: InstrumentIndex) -> Self {
        Self::with_trade_capacity(instrument, DEFAULT_TRADE_CAPACITY)
    }

    /// 创建一个指定成交窗口容量的 [`MarketView`]。
    pub fn with_trade_capacity(instrument: InstrumentIndex, trade_capacity: usize) -> Self {
        Self {
            instrument,
            book: None,
            trades: VecDeque::new(),
            probability: None,
            time_last_update: DateTime::<Utc>::MIN_UTC,
            trade_capacity,
        }
    }

    /// 应用一个市场事件。
    pub fn process(&mut self, event: &MarketEvent) {
        match &event.kind {
            MarketEventKind::Trade(trade) => {
                if self.trades.len() >= self.trade_capacity {
                    self.trades.pop_front();
                }
                self.trades.push_back(Timed::new(*trade, event.time_gateway));
            }
            MarketEventKind::BookL2(snapshot) => {
                if let Some(existing) = &self.book {
                    if event.time_gateway < existing.time {
                        debug!(
                            instrument = %event.instrument,
                            "stale book snapshot ignored"
                        );
                        return;
                    }
                }
                self.book = Some(Timed::new(snapshot.value().clone(), event.time_gateway));
            }
            MarketEventKind::Probability(probability) => {
                if *probability < Decimal::ZERO || *probability > Decimal::ONE {
                    warn!(
                        instrument = %event.instrument,
                        %probability,
                        "probability outside [0, 1] ignored"
                    );
                    return;
                }
                self.probability = Some(Timed::new(*probability, event.time_gateway));
            }
        }

        if event.time_gateway > self.time_last_update {
            self.time_last_update = event.time_gateway;
        }
    }

    /// 滚动窗口中的成交数量。
    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }
}

/// 分区持有的交易对 → 市场视图集合。
#[derive(Debug, Clone, Default)]
pub struct MarketStates {
    views: IndexMap<InstrumentIndex, MarketView>,
}

impl MarketStates {
    /// 为给定交易对集合构建空视图。
    pub fn new<Iter>(instruments: Iter) -> Self
    where
        Iter: IntoIterator<Item = InstrumentIndex>,
    {
        Self {
            views: instruments
                .into_iter()
                .map(|instrument| (instrument, MarketView::new(instrument)))
                .collect(),
        }
    }

    /// 获取指定交易对的视图。
    ///
    /// # Panics
    ///
    /// 分区只接收自己交易对的事件，缺失即为路由缺陷，此时 panic。
    pub fn view(&self, instrument: InstrumentIndex) -> &MarketView {
        self.views
            .get(&instrument)
            .unwrap_or_else(|| panic!("MarketStates does not contain: {instrument}"))
    }

    /// 获取指定交易对的可变视图。
    ///
    /// # Panics
    ///
    /// 分区只接收自己交易对的事件，缺失即为路由缺陷，此时 panic。
    pub fn view_mut(&mut self, instrument: InstrumentIndex) -> &mut MarketView {
        self.views
            .get_mut(&instrument)
            .unwrap_or_else(|| panic!("MarketStates does not contain: {instrument}"))
    }

    /// 迭代所有视图。
    pub fn views(&self) -> impl Iterator<Item = &MarketView> {
        self.views.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{snapshot::Snapshot, test_utils::{self, level, time_plus_secs}};
    use rust_decimal_macros::dec;

    fn book() -> OrderBookL2 {
        OrderBookL2 {
            bids: vec![level(0.39, 50.0), level(0.38, 100.0)],
            asks: vec![level(0.41, 60.0), level(0.42, 80.0)],
        }
    }

    #[test]
    fn test_best_and_spread() {
        let book = book();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.39));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.41));
        assert_eq!(book.spread().unwrap(), dec!(0.02));
        assert_eq!(book.mid_price().unwrap(), dec!(0.40));
    }

    #[test]
    fn test_walk_slippage_single_level_is_zero() {
        let book = book();
        assert_eq!(book.walk_slippage(Side::Buy, dec!(60)), Some(dec!(0)));
    }

    #[test]
    fn test_walk_slippage_across_levels_positive() {
        let book = book();
        // 买入 100：60 @ 0.41 + 40 @ 0.42，vwap = 0.414
        let slippage = book.walk_slippage(Side::Buy, dec!(100)).unwrap();
        assert!(slippage > dec!(0));
        let expected = (dec!(0.414) - dec!(0.41)) / dec!(0.41);
        assert_eq!(slippage, expected);
    }

    #[test]
    fn test_walk_slippage_insufficient_depth() {
        let book = book();
        assert_eq!(book.walk_slippage(Side::Buy, dec!(1000)), None);
    }

    #[test]
    fn test_view_ignores_stale_book() {
        let time = Utc::now();
        let mut view = MarketView::new(test_utils::instrument_index());

        view.process(&MarketEvent::new(
            test_utils::instrument_index(),
            time,
            MarketEventKind::BookL2(Snapshot(book())),
        ));
        view.process(&MarketEvent::new(
            test_utils::instrument_index(),
            time_plus_secs(time, -5),
            MarketEventKind::BookL2(Snapshot(OrderBookL2::default())),
        ));

        assert_eq!(view.book.as_ref().unwrap().value, book());
        assert_eq!(view.time_last_update, time);
    }

    #[test]
    fn test_view_trade_window_bounded() {
        let time = Utc::now();
        let mut view =
            MarketView::with_trade_capacity(test_utils::instrument_index(), 2);

        for i in 0..3 {
            view.process(&MarketEvent::new(
                test_utils::instrument_index(),
                time_plus_secs(time, i),
                MarketEventKind::Trade(PublicTrade::new(dec!(0.40), dec!(10), Side::Buy)),
            ));
        }

        assert_eq!(view.trade_count(), 2);
    }

    #[test]
    fn test_view_rejects_out_of_range_probability() {
        let time = Utc::now();
        let mut view = MarketView::new(test_utils::instrument_index());

        view.process(&MarketEvent::new(
            test_utils::instrument_index(),
            time,
            MarketEventKind::Probability(dec!(1.2)),
        ));
        assert_eq!(view.probability, None);

        view.process(&MarketEvent::new(
            test_utils::instrument_index(),
            time,
            MarketEventKind::Probability(dec!(0.85)),
        ));
        assert_eq!(view.probability.unwrap().value, dec!(0.85));
    }
}
