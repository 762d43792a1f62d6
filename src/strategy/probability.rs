use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    engine::state::{market::MarketView, order::OrderKind},
    instrument::{Instrument, InstrumentIndex, Side},
    risk::LiquiditySnapshot,
    strategy::{
        AccountSnapshot, AdvisorySignal, InvalidStrategyConfig, OrderIntent, Strategy,
        StrategyAdvisory, StrategyDecision, StrategyId, quantize_price,
    },
};
use smol_str::SmolStr;

/// [`ProbabilityStrategy`] 的配置。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProbabilityConfig {
    /// 进入观察区间的概率下限
    pub min_total_probability: Decimal,
    /// 生成订单的概率上限阈值
    pub safe_total_probability: Decimal,
    /// 滞回死区：相对上次触发概率的变化小于该值时不再触发
    pub dead_band: Decimal,
    /// 单次订单数量上限
    pub max_order_size: Decimal,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            min_total_probability: Decimal::new(90, 2),
            safe_total_probability: Decimal::new(97, 2),
            dead_band: Decimal::new(2, 2),
            max_order_size: Decimal::from(100),
        }
    }
}

/// 概率阈值策略。
///
/// 结果概率超过安全阈值时买入对应份额；落在下限与安全阈值之间只观察不动作。
/// 滞回死区避免概率在阈值附近微小抖动时反复触发。
#[derive(Debug)]
pub struct ProbabilityStrategy {
    config: ProbabilityConfig,
    last_triggered: FnvHashMap<InstrumentIndex, Decimal>,
}

impl ProbabilityStrategy {
    /// 以给定配置创建策略，配置非法时返回错误。
    pub fn new(config: ProbabilityConfig) -> Result<Self, InvalidStrategyConfig> {
        for threshold in [config.min_total_probability, config.safe_total_probability] {
            if threshold < Decimal::ZERO || threshold > Decimal::ONE {
                return Err(InvalidStrategyConfig::ThresholdOutOfRange(threshold));
            }
        }
        if config.min_total_probability > config.safe_total_probability {
            return Err(InvalidStrategyConfig::ThresholdOrder {
                minimum: config.min_total_probability,
                safe: config.safe_total_probability,
            });
        }
        if config.dead_band < Decimal::ZERO {
            return Err(InvalidStrategyConfig::NonPositive {
                name: "dead_band",
                value: config.dead_band,
            });
        }
        if config.max_order_size <= Decimal::ZERO {
            return Err(InvalidStrategyConfig::NonPositive {
                name: "max_order_size",
                value: config.max_order_size,
            });
        }

        Ok(Self {
            config,
            last_triggered: FnvHashMap::default(),
        })
    }
}

impl Strategy for ProbabilityStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::new("probability")
    }

    fn evaluate(
        &mut self,
        instrument: &Instrument,
        market: &MarketView,
        _: &LiquiditySnapshot,
        account: &AccountSnapshot,
    ) -> StrategyDecision {
        let Some(probability) = &market.probability else {
            return StrategyDecision::none();
        };
        let probability = probability.value;

        if probability < self.config.min_total_probability {
            return StrategyDecision::none();
        }

        if probability < self.config.safe_total_probability {
            debug!(
                instrument = %market.instrument,
                %probability,
                "probability in cautious band, observing only"
            );
            return StrategyDecision::advise(StrategyAdvisory::new(
                self.id(),
                market.instrument,
                AdvisorySignal::Cautious,
                SmolStr::new(format!("probability {probability} in cautious band")),
            ));
        }

        if let Some(last) = self.last_triggered.get(&market.instrument) {
            if (probability - last).abs() < self.config.dead_band {
                debug!(
                    instrument = %market.instrument,
                    %probability, %last,
                    "probability change within dead band, suppressed"
                );
                return StrategyDecision::none();
            }
        }

        // 概率即预测市场的公允价，无订单簿时作为价格代理
        let raw_price = market
            .book
            .as_ref()
            .and_then(|book| book.value.best_ask())
            .map(|ask| ask.price)
            .unwrap_or(probability);
        let price = quantize_price(raw_price, instrument.tick_size);
        if price <= Decimal::ZERO {
            return StrategyDecision::none();
        }

        let budget = account.available(&instrument.underlying.quote);
        let affordable = budget / price;
        let quantity = self.config.max_order_size.min(affordable);
        if quantity < instrument.min_order_size {
            debug!(
                instrument = %market.instrument,
                %quantity,
                "insufficient budget for minimum order size"
            );
            return StrategyDecision::none();
        }

        self.last_triggered.insert(market.instrument, probability);

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
