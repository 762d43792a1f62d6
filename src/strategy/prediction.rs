use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    engine::state::{market::MarketView, order::OrderKind},
    instrument::{Instrument, Side},
    risk::{Confidence, LiquidityRating, LiquiditySnapshot},
    strategy::{
        AccountSnapshot, AdvisorySignal, InvalidStrategyConfig, OrderIntent, Strategy,
        StrategyAdvisory, StrategyDecision, StrategyId, quantize_price,
    },
};
use smol_str::SmolStr;

/// [`PredictionMarketStrategy`] 的配置。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredictionConfig {
    /// 动作所需的最小买卖价差
    pub min_price_difference: Decimal,
    /// 单次订单数量上限
    pub max_order_size: Decimal,
    /// 单一交易对的最大持仓（基础资产计）
    pub max_position_size: Decimal,
    /// 滑点缩放上限：预期滑点达到该值时订单数量缩到零
    pub slippage_ceiling: Decimal,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            min_price_difference: Decimal::new(1, 2),
            max_order_size: Decimal::from(100),
            max_position_size: Decimal::from(1000),
            slippage_ceiling: Decimal::new(1, 1),
        }
    }
}

/// 预测市场价差策略。
///
/// 价差足够宽时吃入卖档，订单数量随预期滑点线性收缩，并受持仓上限约束。
/// 流动性评级或置信度为 Low 时抑制动作。
#[derive(Debug)]
pub struct PredictionMarketStrategy {
    config: PredictionConfig,
}

impl PredictionMarketStrategy {
    /// 以给定配置创建策略，配置非法时返回错误。
    pub fn new(config: PredictionConfig) -> Result<Self, InvalidStrategyConfig> {
        for (name, value) in [
            ("min_price_difference", config.min_price_difference),
            ("max_order_size", config.max_order_size),
            ("max_position_size", config.max_position_size),
            ("slippage_ceiling", config.slippage_ceiling),
        ] {
            if value <= Decimal::ZERO {
                return Err(InvalidStrategyConfig::NonPositive { name, value });
            }
        }
        Ok(Self { config })
    }
}

impl Strategy for PredictionMarketStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::new("prediction-market")
    }

    fn evaluate(
        &mut self,
        instrument: &Instrument,
        market: &MarketView,
        liquidity: &LiquiditySnapshot,
        account: &AccountSnapshot,
    ) -> StrategyDecision {
        let Some(book) = &market.book else {
            return StrategyDecision::none();
        };

        let Some(spread) = book.value.spread() else {
            return StrategyDecision::none();
        };
        if spread < self.config.min_price_difference {
            return StrategyDecision::none();
        }

        if liquidity.rating == LiquidityRating::Low || liquidity.confidence == Confidence::Low {
            debug!(
                instrument = %market.instrument,
                rating = %liquidity.rating,
                confidence = %liquidity.confidence,
                "signal suppressed by liquidity assessment"
            );
            return StrategyDecision::advise(StrategyAdvisory::new(
                self.id(),
                market.instrument,
                AdvisorySignal::Hold,
                SmolStr::new(format!(
                    "liquidity {} / confidence {} insufficient for execution",
                    liquidity.rating, liquidity.confidence
                )),
            ));
        }

        // 数量随预期滑点线性收缩
        let scale = (Decimal::ONE - liquidity.slippage / self.config.slippage_ceiling)
            .clamp(Decimal::ZERO, Decimal::ONE);
        let mut quantity = self.config.max_order_size * scale;

        let held = account.total(&instrument.underlying.base);
        let capacity = self.config.max_position_size - held;
        quantity = quantity.min(capacity);

        let Some(ask) = book.value.best_ask() else {
            return StrategyDecision::none();
        };
        let price = quantize_price(ask.price, instrument.tick_size);

        let budget = account.available(&instrument.underlying.quote);
        if price > Decimal::ZERO {
            quantity = quantity.min(budget / price);
        }

        if quantity < instrument.min_order_size || price <= Decimal::ZERO {
            return StrategyDecision::none();
        }

        StrategyDecision::intent(OrderIntent::new(
            account.account,
            market.instrument,
            Side::Buy,
            OrderKind::Limit,
            quantity,
            Some(price),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instrument::AssetName,
        test_utils::{self, level},
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn strategy() -> PredictionMarketStrategy {
        PredictionMarketStrategy::new(PredictionConfig::default()).unwrap()
    }

    fn view() -> MarketView {
        test_utils::market_view_with_book(
            test_utils::instrument_index(),
            vec![level(0.38, 500.0)],
            vec![level(0.41, 500.0)],
            Utc::now(),
        )
    }

    fn liquidity(rating: LiquidityRating, confidence: Confidence, slippage: Decimal) -> LiquiditySnapshot {
        LiquiditySnapshot {
            instrument: test_utils::instrument_index(),
            time: Utc::now(),
            side: Side::Buy,
            order_size: dec!(100),
            rating,
            slippage,
            confidence,
            detail: None,
        }
    }

    fn account_snapshot(usdc: f64, shares: f64) -> AccountSnapshot {
        AccountSnapshot::new(
            test_utils::account_index(),
            [
                (AssetName::new("usdc"), test_utils::balance(usdc)),
                (AssetName::new("market_a_yes"), test_utils::balance(shares)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_wide_spread_generates_intent() {
        let mut strategy = strategy();
        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view(),
            &liquidity(LiquidityRating::High, Confidence::High, dec!(0)),
            &account_snapshot(1000.0, 0.0),
        );
        assert_eq!(decision.intents.len(), 1);
        assert_eq!(decision.intents[0].quantity, dec!(100));
        assert_eq!(decision.intents[0].price, Some(dec!(0.41)));
    }

    #[test]
    fn test_low_liquidity_suppresses_with_hold_advisory() {
        let mut strategy = strategy();
        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view(),
            &liquidity(LiquidityRating::Low, Confidence::High, dec!(0)),
            &account_snapshot(1000.0, 0.0),
        );
        assert!(decision.intents.is_empty());
        assert_eq!(decision.advisories.len(), 1);
        assert_eq!(decision.advisories[0].signal, AdvisorySignal::Hold);

        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view(),
            &liquidity(LiquidityRating::High, Confidence::Low, dec!(0)),
            &account_snapshot(1000.0, 0.0),
        );
        assert!(decision.intents.is_empty());
        assert_eq!(decision.advisories.len(), 1);
    }

    #[test]
    fn test_slippage_scales_quantity_down() {
        let mut strategy = strategy();
        // 滑点 0.05，上限 0.1 → 数量减半
        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view(),
            &liquidity(LiquidityRating::Medium, Confidence::High, dec!(0.05)),
            &account_snapshot(1000.0, 0.0),
        );
        assert_eq!(decision.intents.len(), 1);
        assert_eq!(decision.intents[0].quantity, dec!(50));
    }

    #[test]
    fn test_position_cap_bounds_quantity() {
        let mut strategy = strategy();
        // 已持有 950，持仓上限 1000 → 最多再买 50
        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view(),
            &liquidity(LiquidityRating::High, Confidence::High, dec!(0)),
            &account_snapshot(1000.0, 950.0),
        );
        assert_eq!(decision.intents.len(), 1);
        assert_eq!(decision.intents[0].quantity, dec!(50));

        // 持仓已满：无动作
        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view(),
            &liquidity(LiquidityRating::High, Confidence::High, dec!(0)),
            &account_snapshot(1000.0, 1000.0),
        );
        assert!(decision.intents.is_empty());
    }

    #[test]
    fn test_narrow_spread_no_action() {
        let mut strategy = strategy();
        let view = test_utils::market_view_with_book(
            test_utils::instrument_index(),
            vec![level(0.40, 500.0)],
            vec![level(0.405, 500.0)],
            Utc::now(),
        );
        let decision = strategy.evaluate(
            &test_utils::instrument("market_a_yes"),
            &view,
            &liquidity(LiquidityRating::High, Confidence::High, dec!(0)),
            &account_snapshot(1000.0, 0.0),
        );
        assert!(decision.intents.is_empty());
        assert!(decision.advisories.is_empty());
    }
}
