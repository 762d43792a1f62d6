use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    engine::state::balance::{Balance, BalanceLedger},
    error::ParlayError,
    execution::manager::RetryPolicy,
    instrument::{
        Account, AccountId, AssetName, GatewayId, Instrument, InstrumentSymbol, Registry,
        Underlying,
    },
    risk::{RiskConfig, large_order::LargeOrderConfig},
    strategy::{prediction::PredictionConfig, probability::ProbabilityConfig},
};

/// 完整的系统配置。
///
/// 所有策略与风险参数集中于此，运行前通过 [`SystemConfig::validate`] 校验。
///
/// # 使用示例
///
/// ```rust
/// use parlay::system::SystemConfig;
///
/// let config: SystemConfig = serde_json::from_str(
///     r#"{
///         "instruments": [
///             { "symbol": "market_a_yes", "base": "market_a_yes", "quote": "usdc", "gateway": "polymarket" }
///         ],
///         "accounts": [
///             { "id": "acct_1", "gateway": "polymarket", "initial_balances": { "usdc": "1000" } }
///         ]
///     }"#,
/// )
/// .unwrap();
///
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SystemConfig {
    /// 交易对
    pub instruments: Vec<InstrumentConfig>,
    /// 账户
    pub accounts: Vec<AccountConfig>,
    /// 流动性评估与前置检查参数
    #[serde(default)]
    pub risk: RiskConfig,
    /// 大额订单监控参数
    #[serde(default)]
    pub large_orders: LargeOrderConfig,
    /// 概率策略参数
    #[serde(default)]
    pub probability: ProbabilityConfig,
    /// 预测市场策略参数
    #[serde(default)]
    pub prediction: PredictionConfig,
    /// 执行层参数
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// 事件日志容量
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
    /// 每个分区队列的容量
    #[serde(default = "default_partition_queue_capacity")]
    pub partition_queue_capacity: usize,
    /// 市价买单预留时假设的最坏单价
    #[serde(default = "default_market_reserve_price")]
    pub market_reserve_price: Decimal,
}

fn default_journal_capacity() -> usize {
    100_000
}

fn default_partition_queue_capacity() -> usize {
    1024
}

fn default_market_reserve_price() -> Decimal {
    Decimal::ONE
}

/// 单个交易对的配置。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstrumentConfig {
    /// 交易对符号
    pub symbol: InstrumentSymbol,
    /// 基础资产
    pub base: AssetName,
    /// 报价资产
    pub quote: AssetName,
    /// 最小订单数量
    #[serde(default = "default_min_order_size")]
    pub min_order_size: Decimal,
    /// 价格最小变动单位
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// 所属网关
    pub gateway: GatewayId,
    /// 管理性暂停标志
    #[serde(default)]
    pub halted: bool,
}

fn default_min_order_size() -> Decimal {
    Decimal::ONE
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}

impl From<InstrumentConfig> for Instrument {
    fn from(config: InstrumentConfig) -> Self {
        Self {
            symbol: config.symbol,
            underlying: Underlying::new(config.base, config.quote),
            min_order_size: config.min_order_size,
            tick_size: config.tick_size,
            gateway: config.gateway,
            halted: config.halted,
        }
    }
}

/// 单个账户的配置。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountConfig {
    /// 账户标识符
    pub id: AccountId,
    /// 所属网关
    pub gateway: GatewayId,
    /// 初始余额（资产 → 总额）
    #[serde(default)]
    pub initial_balances: IndexMap<AssetName, Decimal>,
}

/// 执行层配置。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// 单次网关调用的超时（毫秒）
    pub request_timeout_ms: u64,
    /// 提交的最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次重试前的退避（毫秒）
    pub initial_backoff_ms: u64,
    /// 退避倍增系数
    pub backoff_multiplier: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2,
        }
    }
}

impl ExecutionConfig {
    /// 单次网关调用的超时。
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// 对应的重试参数。
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

impl SystemConfig {
    /// 校验配置的结构性约束。
    pub fn validate(&self) -> Result<(), ParlayError> {
        if self.instruments.is_empty() {
            return Err(ParlayError::Config("no instruments configured".to_string()));
        }
        if self.accounts.is_empty() {
            return Err(ParlayError::Config("no accounts configured".to_string()));
        }

        let mut symbols = std::collections::HashSet::new();
        for instrument in &self.instruments {
            if !symbols.insert(&instrument.symbol) {
                return Err(ParlayError::Config(format!(
                    "duplicate instrument symbol: {}",
                    instrument.symbol
                )));
            }
            if instrument.min_order_size <= Decimal::ZERO {
                return Err(ParlayError::Config(format!(
                    "non-positive min_order_size for {}",
                    instrument.symbol
                )));
            }
            if instrument.tick_size <= Decimal::ZERO {
                return Err(ParlayError::Config(format!(
                    "non-positive tick_size for {}",
                    instrument.symbol
                )));
            }
        }

        if self.market_reserve_price <= Decimal::ZERO {
            return Err(ParlayError::Config(
                "non-positive market_reserve_price".to_string(),
            ));
        }

        Ok(())
    }

    /// 从配置构建交易对与账户注册表。
    pub fn registry(&self) -> Registry {
        Registry::new(
            self.instruments
                .iter()
                .cloned()
                .map(Instrument::from)
                .collect(),
            self.accounts
                .iter()
                .map(|account| Account::new(account.id.clone(), account.gateway.clone()))
                .collect(),
        )
    }

    /// 从配置构建余额账本。
    ///
    /// 每个账户对其网关上所有交易对的基础/报价资产持有一条记录，未在初始余额中
    /// 列出的资产从零开始。
    pub fn ledger(&self, registry: &Registry, time: DateTime<Utc>) -> BalanceLedger {
        let mut balances = Vec::new();

        for account in registry.accounts() {
            let config = &self.accounts[account.key.index()];

            for instrument in registry.instruments() {
                if instrument.value.gateway != config.gateway {
                    continue;
                }
                for asset in [
                    &instrument.value.underlying.base,
                    &instrument.value.underlying.quote,
                ] {
                    let total = config
                        .initial_balances
                        .get(asset)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    balances.push(((account.key, asset.clone()), Balance::unreserved(total)));
                }
            }
        }

        balances.sort_by(|(a, _), (b, _)| a.cmp(b));
        balances.dedup_by(|(a, _), (b, _)| a == b);
        BalanceLedger::new(balances, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config_json() -> &'static str {
        r#"{
            "instruments": [
                {
                    "symbol": "market_a_yes",
                    "base": "market_a_yes",
                    "quote": "usdc",
                    "gateway": "polymarket"
                }
            ],
            "accounts": [
                {
                    "id": "acct_1",
                    "gateway": "polymarket",
                    "initial_balances": { "usdc": "1000" }
                }
            ]
        }"#
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SystemConfig = serde_json::from_str(config_json()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.instruments[0].min_order_size, dec!(1));
        assert_eq!(config.instruments[0].tick_size, dec!(0.01));
        assert_eq!(config.execution.max_attempts, 3);
        assert_eq!(config.market_reserve_price, dec!(1));
        assert_eq!(config.probability.safe_total_probability, dec!(0.97));
        assert_eq!(config.prediction.min_price_difference, dec!(0.01));
        assert_eq!(config.large_orders.absolute_threshold, dec!(100));
    }

    #[test]
    fn test_registry_and_ledger_built_from_config() {
        let config: SystemConfig = serde_json::from_str(config_json()).unwrap();
        let registry = config.registry();
        let ledger = config.ledger(&registry, Utc::now());

        let account = registry
            .find_account_index(&AccountId::new("acct_1"))
            .unwrap();

        let usdc = ledger.balance(account, &AssetName::new("usdc")).unwrap();
        assert_eq!(usdc.value.total, dec!(1000));
        assert_eq!(usdc.value.available, dec!(1000));

        let shares = ledger
            .balance(account, &AssetName::new("market_a_yes"))
            .unwrap();
        assert_eq!(shares.value.total, dec!(0));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let mut config: SystemConfig = serde_json::from_str(config_json()).unwrap();
        config.instruments.push(config.instruments[0].clone());
        assert!(config.validate().is_err());

        let mut config: SystemConfig = serde_json::from_str(config_json()).unwrap();
        config.instruments.clear();
        assert!(config.validate().is_err());
    }
}
