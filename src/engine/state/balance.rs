use chrono::{DateTime, Utc};
use derive_more::Constructor;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Timed, instrument::{AccountIndex, AssetName}, snapshot::Snapshot};

/// 单一 (账户, 资产) 的余额。
///
/// 不变量：`available + reserved <= total`。余额只通过预留/释放/结算事务变更，
/// 以及网关权威快照对 `total` 的校正。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize, Constructor,
)]
pub struct Balance {
    /// 总余额
    pub total: Decimal,
    /// 可用余额（未被在途订单占用）
    pub available: Decimal,
    /// 被在途订单预留的余额
    pub reserved: Decimal,
}

impl Balance {
    /// 创建一个全部可用的余额。
    pub fn unreserved(total: Decimal) -> Self {
        Self {
            total,
            available: total,
            reserved: Decimal::ZERO,
        }
    }

    /// 校验余额不变量。
    pub fn is_consistent(&self) -> bool {
        self.available + self.reserved <= self.total
            && self.available >= Decimal::ZERO
            && self.reserved >= Decimal::ZERO
    }
}

/// 关联资产名称与网关时间戳的余额。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AssetBalance {
    /// 资产名称
    pub asset: AssetName,
    /// 余额
    pub balance: Balance,
    /// 网关报告此余额的时间
    pub time_gateway: DateTime<Utc>,
}

/// 账本键：(账户, 资产)。
pub type BalanceKey = (AccountIndex, AssetName);

/// 与 [`BalanceLedger`] 交互时可能产生的错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    /// 账本中不存在该 (账户, 资产) 记录
    #[error("no balance record for account {0} asset {1}")]
    Unknown(AccountIndex, AssetName),

    /// 可用余额不足以覆盖预留
    #[error("insufficient balance: required {required}, available {available}")]
    Insufficient {
        /// 需要预留的金额
        required: Decimal,
        /// 当前可用金额
        available: Decimal,
    },
}

/// (账户, 资产) → 余额的权威账本。
///
/// 每条记录独立加锁，不同分区可以并发操作互不相关的记录。记录集合在初始化时从配置构建，
/// 运行期间只读（变更的是记录内的余额，不是记录集合本身）。
#[derive(Debug, Default)]
pub struct BalanceLedger {
    records: FnvHashMap<BalanceKey, Arc<Mutex<Timed<Balance>>>>,
}

impl BalanceLedger {
    /// 从初始余额集合构建账本。
    pub fn new<Iter>(balances: Iter, time: DateTime<Utc>) -> Self
    where
        Iter: IntoIterator<Item = (BalanceKey, Balance)>,
    {
        Self {
            records: balances
                .into_iter()
                .map(|(key, balance)| (key, Arc::new(Mutex::new(Timed::new(balance, time)))))
                .collect(),
        }
    }

    fn record(
        &self,
        account: AccountIndex,
        asset: &AssetName,
    ) -> Result<&Arc<Mutex<Timed<Balance>>>, BalanceError> {
        self.records
            .get(&(account, asset.clone()))
            .ok_or_else(|| BalanceError::Unknown(account, asset.clone()))
    }

    /// 读取当前余额的克隆。
    pub fn balance(&self, account: AccountIndex, asset: &AssetName) -> Option<Timed<Balance>> {
        self.records
            .get(&(account, asset.clone()))
            .map(|record| *record.lock())
    }

    /// 读取某账户全部资产余额的克隆，供策略快照使用。
    pub fn balances_for_account(&self, account: AccountIndex) -> FnvHashMap<AssetName, Balance> {
        self.records
            .iter()
            .filter(|((key_account, _), _)| *key_account == account)
            .map(|((_, asset), record)| (asset.clone(), record.lock().value))
            .collect()
    }

    /// 应用网关的权威余额快照。
    ///
    /// 快照校正 `total`；`reserved` 归引擎所有，保持不变，`available` 重新推导。
    /// 比当前状态更旧的快照被忽略。
    pub fn update_from_gateway(&self, account: AccountIndex, snapshot: Snapshot<AssetBalance>) {
        let AssetBalance {
            asset,
            balance,
            time_gateway,
        } = snapshot.0;

        let Ok(record) = self.record(account, &asset) else {
            warn!(%account, %asset, "balance snapshot for unconfigured asset ignored");
            return;
        };

        let mut current = record.lock();
        if time_gateway < current.time {
            debug!(%account, %asset, "stale balance snapshot ignored");
            return;
        }

        let total = balance.total;
        let reserved = current.value.reserved;
        let available = if total >= reserved {
            total - reserved
        } else {
            warn!(
                %account, %asset, %total, %reserved,
                "gateway total below engine reservations"
            );
            Decimal::ZERO
        };

        *current = Timed::new(
            Balance {
                total,
                available,
                reserved,
            },
            time_gateway,
        );
    }

    /// 预留指定金额，失败时账本保持不变。
    pub fn reserve(
        &self,
        account: AccountIndex,
        asset: &AssetName,
        amount: Decimal,
        time: DateTime<Utc>,
    ) -> Result<(), BalanceError> {
        let record = self.record(account, asset)?;
        let mut current = record.lock();

        if amount > current.value.available {
            return Err(BalanceError::Insufficient {
                required: amount,
                available: current.value.available,
            });
        }

        current.value.available -= amount;
        current.value.reserved += amount;
        current.time = time;
        debug_assert!(current.value.is_consistent());
        Ok(())
    }

    /// 释放预留（订单终结时未消耗的部分回到可用）。
    pub fn release(
        &self,
        account: AccountIndex,
        asset: &AssetName,
        amount: Decimal,
        time: DateTime<Utc>,
    ) -> Result<(), BalanceError> {
        let record = self.record(account, asset)?;
        let mut current = record.lock();

        let released = if amount > current.value.reserved {
            warn!(
                %account, %asset, %amount, reserved = %current.value.reserved,
                "release exceeds outstanding reservation, capping"
            );
            current.value.reserved
        } else {
            amount
        };

        current.value.reserved -= released;
        current.value.available += released;
        current.time = time;
        debug_assert!(current.value.is_consistent());
        Ok(())
    }

    /// 结算一笔成交：支付侧消耗预留与总额，接收侧增加总额与可用。
    pub fn settle(
        &self,
        account: AccountIndex,
        pay: (&AssetName, Decimal),
        receive: (&AssetName, Decimal),
        time: DateTime<Utc>,
    ) -> Result<(), BalanceError> {
        let (pay_asset, pay_amount) = pay;
        let (receive_asset, receive_amount) = receive;

        {
            let record = self.record(account, pay_asset)?;
            let mut current = record.lock();

            let consumed = if pay_amount > current.value.reserved {
                warn!(
                    %account, asset = %pay_asset, %pay_amount,
                    reserved = %current.value.reserved,
                    "settlement exceeds outstanding reservation, capping"
                );
                current.value.reserved
            } else {
                pay_amount
            };

            current.value.reserved -= consumed;
            current.value.total = (current.value.total - pay_amount).max(Decimal::ZERO);
            if !current.value.is_consistent() {
                current.value.available =
                    (current.value.total - current.value.reserved).max(Decimal::ZERO);
            }
            current.time = time;
        }

        let record = self.record(account, receive_asset)?;
        let mut current = record.lock();
        current.value.total += receive_amount;
        current.value.available += receive_amount;
        current.time = time;
        debug_assert!(current.value.is_consistent());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, time_plus_secs};
    use rust_decimal_macros::dec;

    fn usdc() -> AssetName {
        AssetName::new("usdc")
    }

    fn shares() -> AssetName {
        AssetName::new("market_a_yes")
    }

    fn ledger(usdc_total: f64) -> BalanceLedger {
        let account = test_utils::account_index();
        BalanceLedger::new(
            [
                ((account, usdc()), test_utils::balance(usdc_total)),
                ((account, shares()), test_utils::balance(0.0)),
            ],
            Utc::now(),
        )
    }

    #[test]
    fn test_reserve_moves_available_to_reserved() {
        let ledger = ledger(100.0);
        let account = test_utils::account_index();

        ledger
            .reserve(account, &usdc(), dec!(40), Utc::now())
            .unwrap();

        let balance = ledger.balance(account, &usdc()).unwrap().value;
        assert_eq!(balance.total, dec!(100));
        assert_eq!(balance.available, dec!(60));
        assert_eq!(balance.reserved, dec!(40));
        assert!(balance.is_consistent());
    }

    #[test]
    fn test_reserve_insufficient_leaves_ledger_unchanged() {
        let ledger = ledger(10.0);
        let account = test_utils::account_index();

        let result = ledger.reserve(account, &usdc(), dec!(40), Utc::now());
        assert_eq!(
            result,
            Err(BalanceError::Insufficient {
                required: dec!(40),
                available: dec!(10),
            })
        );

        let balance = ledger.balance(account, &usdc()).unwrap().value;
        assert_eq!(balance.available, dec!(10));
        assert_eq!(balance.reserved, dec!(0));
    }

    #[test]
    fn test_release_returns_reservation_to_available() {
        let ledger = ledger(100.0);
        let account = test_utils::account_index();

        ledger
            .reserve(account, &usdc(), dec!(40), Utc::now())
            .unwrap();
        ledger
            .release(account, &usdc(), dec!(40), Utc::now())
            .unwrap();

        let balance = ledger.balance(account, &usdc()).unwrap().value;
        assert_eq!(balance.available, dec!(100));
        assert_eq!(balance.reserved, dec!(0));
    }

    #[test]
    fn test_settle_fill_consumes_reservation_and_credits_receive_side() {
        let ledger = ledger(100.0);
        let account = test_utils::account_index();

        // 买入 100 份，价格 0.40，预留 40 usdc
        ledger
            .reserve(account, &usdc(), dec!(40), Utc::now())
            .unwrap();
        // 成交 40 份，消耗 16 usdc 预留，收到 40 份额
        ledger
            .settle(account, (&usdc(), dec!(16)), (&shares(), dec!(40)), Utc::now())
            .unwrap();

        let quote = ledger.balance(account, &usdc()).unwrap().value;
        assert_eq!(quote.total, dec!(84));
        assert_eq!(quote.reserved, dec!(24));
        assert_eq!(quote.available, dec!(60));
        assert!(quote.is_consistent());

        let base = ledger.balance(account, &shares()).unwrap().value;
        assert_eq!(base.total, dec!(40));
        assert_eq!(base.available, dec!(40));
    }

    #[test]
    fn test_stale_gateway_snapshot_ignored() {
        let base_time = Utc::now();
        let account = test_utils::account_index();
        let ledger = BalanceLedger::new(
            [((account, usdc()), test_utils::balance(100.0))],
            base_time,
        );

        ledger.update_from_gateway(
            account,
            Snapshot(AssetBalance::new(
                usdc(),
                Balance::unreserved(dec!(5)),
                time_plus_secs(base_time, -10),
            )),
        );

        assert_eq!(
            ledger.balance(account, &usdc()).unwrap().value.total,
            dec!(100)
        );
    }

    #[test]
    fn test_gateway_snapshot_corrects_total_and_preserves_reservation() {
        let base_time = Utc::now();
        let account = test_utils::account_index();
        let ledger = BalanceLedger::new(
            [((account, usdc()), test_utils::balance(100.0))],
            base_time,
        );

        ledger.reserve(account, &usdc(), dec!(30), base_time).unwrap();
        ledger.update_from_gateway(
            account,
            Snapshot(AssetBalance::new(
                usdc(),
                Balance::unreserved(dec!(80)),
                time_plus_secs(base_time, 10),
            )),
        );

        let balance = ledger.balance(account, &usdc()).unwrap().value;
        assert_eq!(balance.total, dec!(80));
        assert_eq!(balance.reserved, dec!(30));
        assert_eq!(balance.available, dec!(50));
    }
}
