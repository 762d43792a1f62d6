use derive_more::{Constructor, Display, From};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::IndexError;

/// 订单买卖方向。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize,
)]
pub enum Side {
    /// 买入
    #[serde(alias = "buy", alias = "BUY", alias = "b")]
    Buy,
    /// 卖出
    #[serde(alias = "sell", alias = "SELL", alias = "s")]
    Sell,
}

/// 资产名称，例如 "usdc" 或某个结果份额代币。
///
/// 构造时统一转换为小写，保证跨网关的命名一致性。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct AssetName(SmolStr);

impl AssetName {
    /// 创建一个新的 [`AssetName`]，统一转换为小写。
    pub fn new<S>(name: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(name.as_ref().to_lowercase()))
    }

    /// 获取资产名称的字符串引用。
    pub fn name(&self) -> &SmolStr {
        &self.0
    }
}

/// 交易对符号，在单个网关内唯一标识一个可交易市场。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct InstrumentSymbol(SmolStr);

impl InstrumentSymbol {
    /// 创建一个新的 [`InstrumentSymbol`]，统一转换为小写。
    pub fn new<S>(symbol: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(symbol.as_ref().to_lowercase()))
    }
}

/// 网关标识符，例如 "polymarket" 或 "binance"。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct GatewayId(SmolStr);

impl GatewayId {
    /// 创建一个新的 [`GatewayId`]。
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// 账户标识符。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct AccountId(SmolStr);

impl AccountId {
    /// 创建一个新的 [`AccountId`]。
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// 交易对在 [`Registry`] 中的稳定索引。
///
/// 内部状态集合均以索引寻址，避免在热路径上做字符串哈希。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct InstrumentIndex(pub usize);

impl InstrumentIndex {
    /// 获取索引值。
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for InstrumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InstrumentIndex({})", self.0)
    }
}

/// 账户在 [`Registry`] 中的稳定索引。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct AccountIndex(pub usize);

impl AccountIndex {
    /// 获取索引值。
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for AccountIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountIndex({})", self.0)
    }
}

/// 将某个值与其键关联。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Keyed<Key, Value> {
    /// 键
    pub key: Key,
    /// 值
    pub value: Value,
}

impl<Key, Value> AsRef<Value> for Keyed<Key, Value> {
    fn as_ref(&self) -> &Value {
        &self.value
    }
}

/// 交易对的基础资产与报价资产。
///
/// 对预测市场而言，base 是结果份额代币，quote 是结算货币（通常为 usdc）。
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor)]
pub struct Underlying<AssetKey> {
    /// 基础资产
    pub base: AssetKey,
    /// 报价资产
    pub quote: AssetKey,
}

/// 可交易市场的静态参考数据。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Instrument {
    /// 交易对符号
    pub symbol: InstrumentSymbol,
    /// 基础/报价资产
    pub underlying: Underlying<AssetName>,
    /// 最小订单数量
    pub min_order_size: Decimal,
    /// 价格最小变动单位，限价单价格必须落在此网格上
    pub tick_size: Decimal,
    /// 该交易对所属的网关
    pub gateway: GatewayId,
    /// 管理性暂停标志，暂停期间拒绝新订单
    pub halted: bool,
}

/// 交易账户的静态参考数据。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Account {
    /// 账户标识符
    pub id: AccountId,
    /// 账户所属的网关
    pub gateway: GatewayId,
}

/// 交易对与账户的注册表，提供符号 → 索引的查找。
///
/// 注册表在系统初始化时从配置构建。交易对属性（暂停标志、最小订单量等）可在运行时通过
/// 管理接口更新，索引保持稳定。
#[derive(Debug, Clone)]
pub struct Registry {
    instruments: Vec<Keyed<InstrumentIndex, Instrument>>,
    accounts: Vec<Keyed<AccountIndex, Account>>,
    instrument_lookup: FnvHashMap<InstrumentSymbol, InstrumentIndex>,
    account_lookup: FnvHashMap<AccountId, AccountIndex>,
}

impl Registry {
    /// 从交易对与账户列表构建 [`Registry`]。
    pub fn new(instruments: Vec<Instrument>, accounts: Vec<Account>) -> Self {
        let instruments: Vec<_> = instruments
            .into_iter()
            .enumerate()
            .map(|(index, instrument)| Keyed::new(InstrumentIndex(index), instrument))
            .collect();

        let accounts: Vec<_> = accounts
            .into_iter()
            .enumerate()
            .map(|(index, account)| Keyed::new(AccountIndex(index), account))
            .collect();

        let instrument_lookup = instruments
            .iter()
            .map(|keyed| (keyed.value.symbol.clone(), keyed.key))
            .collect();

        let account_lookup = accounts
            .iter()
            .map(|keyed| (keyed.value.id.clone(), keyed.key))
            .collect();

        Self {
            instruments,
            accounts,
            instrument_lookup,
            account_lookup,
        }
    }

    /// 通过符号查找交易对索引。
    pub fn find_instrument_index(
        &self,
        symbol: &InstrumentSymbol,
    ) -> Result<InstrumentIndex, IndexError> {
        self.instrument_lookup
            .get(symbol)
            .copied()
            .ok_or_else(|| IndexError::InstrumentIndex(format!("unrecognised symbol: {symbol}")))
    }

    /// 通过标识符查找账户索引。
    pub fn find_account_index(&self, id: &AccountId) -> Result<AccountIndex, IndexError> {
        self.account_lookup
            .get(id)
            .copied()
            .ok_or_else(|| IndexError::AccountIndex(format!("unrecognised account: {id}")))
    }

    /// 获取指定索引的交易对。
    ///
    /// # Panics
    ///
    /// 索引均在初始化时构建，不存在即为实现缺陷，此时 panic。
    pub fn instrument(&self, index: InstrumentIndex) -> &Instrument {
        self.instruments
            .get(index.index())
            .map(|keyed| &keyed.value)
            .unwrap_or_else(|| panic!("Registry does not contain: {index}"))
    }

    /// 获取指定索引的账户。
    ///
    /// # Panics
    ///
    /// 索引均在初始化时构建，不存在即为实现缺陷，此时 panic。
    pub fn account(&self, index: AccountIndex) -> &Account {
        self.accounts
            .get(index.index())
            .map(|keyed| &keyed.value)
            .unwrap_or_else(|| panic!("Registry does not contain: {index}"))
    }

    /// 迭代所有交易对。
    pub fn instruments(&self) -> impl Iterator<Item = &Keyed<InstrumentIndex, Instrument>> {
        self.instruments.iter()
    }

    /// 迭代所有账户。
    pub fn accounts(&self) -> impl Iterator<Item = &Keyed<AccountIndex, Account>> {
        self.accounts.iter()
    }

    /// 更新指定交易对的暂停标志（管理操作）。
    pub fn set_halted(&mut self, index: InstrumentIndex, halted: bool) {
        if let Some(keyed) = self.instruments.get_mut(index.index()) {
            keyed.value.halted = halted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn test_registry_lookup_by_symbol() {
        let registry = Registry::new(
            vec![
                test_utils::instrument("market_a_yes"),
                test_utils::instrument("market_b_yes"),
            ],
            vec![test_utils::account("acct_1")],
        );

        assert_eq!(
            registry
                .find_instrument_index(&InstrumentSymbol::new("market_b_yes"))
                .unwrap(),
            InstrumentIndex(1)
        );
        assert_eq!(
            registry
                .find_account_index(&AccountId::new("acct_1"))
                .unwrap(),
            AccountIndex(0)
        );
        assert!(
            registry
                .find_instrument_index(&InstrumentSymbol::new("unknown"))
                .is_err()
        );
    }

    #[test]
    fn test_asset_name_normalised_lowercase() {
        assert_eq!(AssetName::new("USDC"), AssetName::new("usdc"));
    }
}
