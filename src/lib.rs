#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Parlay
//! Parlay 是一个事件驱动的订单生命周期与执行风险评估引擎，用于协调跨多个交易网关的自动化交易。
//! * **一致**：将多来源、乱序、可能重复投递的网关事件流转换为一致的账户状态。
//! * **安全**：严格的订单状态机（永不回退、永不重复应用成交），余额账本只通过预留/结算事务变更。
//! * **可分区并发**：按交易对/账户分区串行处理，跨分区并行，无全局锁。
//! * **可定制**：即插即用的 Strategy 组件在不可变快照上做决策，消除决策与执行上下文之间的竞争。
//!
//! ## 概述
//! 从高层次来看，它提供了几个主要组件：
//! * Event Dispatcher：去重、先持久化后路由的分区化事件主干（参见 [`dispatcher`]）。
//! * Balance Ledger：(账户, 资产) → 余额的权威映射，仅通过预留/结算事务变更（参见 [`engine::state::balance`]）。
//! * Order State Machine：引擎提交的每个订单的完整生命周期（参见 [`engine::state::order`]）。
//! * Liquidity & Risk Analyzer：流动性评级、滑点估计与大额订单监控（参见 [`risk`]）。
//! * Strategy 接口：概率策略与预测市场策略等具体实现（参见 [`strategy`]）。
//! * Execution Manager：网关提交边界，超时视为"结果未知"并通过状态轮询对账（参见 [`execution`]）。

use crate::{
    engine::{command::Command, state::trading::TradingState},
    event::{AccountEvent, MarketEvent},
};
use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use serde::{Deserialize, Serialize};
use shutdown::Shutdown;

/// 事件驱动的订单生命周期 Engine（引擎），以及处理输入事件的入口点。
pub mod engine;

/// 定义 Parlay 中所有可能的顶层错误。
pub mod error;

/// 网关提交边界：GatewayClient 接口、ExecutionRequest 路由与 ExecutionManager。
pub mod execution;

/// 提供 Parlay 的默认 Tracing 日志初始化器。
pub mod logging;

/// 流动性评级、滑点估计、订单前置检查与大额订单监控。
pub mod risk;

/// Strategy 接口，在不可变的市场/账户快照上生成订单意图（OrderIntent）。
pub mod strategy;

/// 交易对与账户的静态参考数据及其索引注册表。
pub mod instrument;

/// 规范化网关事件、稳定去重标识符与只追加的事件日志。
pub mod event;

/// 分区化事件接入主干：去重、先持久化、按键有序路由。
pub mod dispatcher;

/// 系统配置：交易对、账户与所有策略/风险/执行参数。
pub mod system;

/// 与组件关闭相关的 Trait 和类型。
pub mod shutdown;

/// 不同通道类型的发送端抽象。
pub mod channel;

/// 不可变的时间点快照包装类型。
pub mod snapshot;

/// 带时间戳的值。
///
/// 用于将任意值与 UTC 时间戳关联，常用于记录事件发生时间或数据更新时间。
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Constructor,
)]
pub struct Timed<T> {
    /// 存储的值
    pub value: T,
    /// UTC 时间戳
    pub time: DateTime<Utc>,
}

/// 默认的 [`Engine`](engine::Engine) 事件，包含市场事件、账户/订单事件和 Engine 命令。
///
/// EngineEvent 是分区消费者处理的所有事件类型的统一枚举。Dispatcher 将规范化的网关事件
/// 映射为此类型后按分区路由（参见 [`dispatcher`]）。
///
/// # 变体
///
/// - `Shutdown`: 关闭事件，用于优雅地关闭分区消费者
/// - `Command`: 外部命令（提交订单、撤销订单）
/// - `TradingStateUpdate`: 开启/关闭算法订单生成
/// - `Account`: 账户/订单事件（余额快照、网关确认、成交、拒绝、撤销确认）
/// - `Market`: 市场事件（逐笔成交、订单簿、概率更新）
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum EngineEvent {
    /// 关闭事件，用于优雅地关闭分区消费者
    Shutdown(Shutdown),
    /// 外部命令（提交订单、撤销订单）
    Command(Command),
    /// 交易状态更新，用于开启/关闭算法订单生成
    TradingStateUpdate(TradingState),
    /// 账户/订单事件
    Account(AccountEvent),
    /// 市场事件
    Market(MarketEvent),
}

impl Terminal for EngineEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

impl EngineEvent {
    /// 创建一个关闭事件。
    pub fn shutdown() -> Self {
        Self::Shutdown(Shutdown)
    }
}

/// 单调递增的事件序列号。
///
/// 每个被处理的事件都会分配一个唯一的、单调递增的序列号，用于审计追踪与顺序验证。
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct Sequence(pub u64);

impl Sequence {
    /// 获取序列号的当前值。
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 获取当前序列号并递增。
    pub fn fetch_add(&mut self) -> Sequence {
        let sequence = *self;
        self.0 += 1;
        sequence
    }
}

/// 确定某物是否被认为是"不可恢复的"，例如不可恢复的错误。
///
/// 注意，[`Unrecoverable`] 的含义可能因上下文而异：对订单而言意味着被冻结等待人工对账，
/// 而非整个进程终止。
pub trait Unrecoverable {
    /// 检查是否不可恢复。
    fn is_unrecoverable(&self) -> bool;
}

/// Trait，用于表示某物是否是终端的（例如，需要关闭分区消费者）。
pub trait Terminal {
    /// 检查是否是终端状态。
    fn is_terminal(&self) -> bool;
}

/// Parlay 测试工具。
pub mod test_utils {
    use crate::{
        Timed,
        engine::state::{
            balance::Balance,
            market::{Level, MarketView, OrderBookL2},
        },
        instrument::{
            Account, AccountId, AccountIndex, AssetName, GatewayId, Instrument, InstrumentIndex,
            InstrumentSymbol, Underlying,
        },
    };
    use chrono::{DateTime, TimeDelta, Utc};
    use rust_decimal::Decimal;

    /// 在基础时间上增加指定的秒数。
    ///
    /// # Panics
    ///
    /// 如果时间溢出，此函数会 panic。
    pub fn time_plus_secs(base: DateTime<Utc>, plus: i64) -> DateTime<Utc> {
        base.checked_add_signed(TimeDelta::seconds(plus)).unwrap()
    }

    /// 在基础时间上增加指定的毫秒数。
    ///
    /// # Panics
    ///
    /// 如果时间溢出，此函数会 panic。
    pub fn time_plus_millis(base: DateTime<Utc>, plus: i64) -> DateTime<Utc> {
        base.checked_add_signed(TimeDelta::milliseconds(plus))
            .unwrap()
    }

    /// 创建一个测试用的预测市场 Instrument（基础资产为结果份额，报价资产为 usdc）。
    pub fn instrument(symbol: &str) -> Instrument {
        Instrument {
            symbol: InstrumentSymbol::new(symbol),
            underlying: Underlying::new(AssetName::new(symbol), AssetName::new("usdc")),
            min_order_size: Decimal::ONE,
            tick_size: Decimal::new(1, 2),
            gateway: GatewayId::new("mock"),
            halted: false,
        }
    }

    /// 创建一个测试用的 Account。
    pub fn account(id: &str) -> Account {
        Account {
            id: AccountId::new(id),
            gateway: GatewayId::new("mock"),
        }
    }

    /// 创建一个测试用的 Balance（total 与 available 相同，reserved 为零）。
    pub fn balance(total: f64) -> Balance {
        let total = Decimal::try_from(total).unwrap();
        Balance {
            total,
            available: total,
            reserved: Decimal::ZERO,
        }
    }

    /// 创建一个测试用的订单簿档位。
    pub fn level(price: f64, quantity: f64) -> Level {
        Level {
            price: Decimal::try_from(price).unwrap(),
            quantity: Decimal::try_from(quantity).unwrap(),
        }
    }

    /// 创建一个测试用的 MarketView，带有给定的订单簿（买档/卖档按最优价优先排序）。
    pub fn market_view_with_book(
        instrument: InstrumentIndex,
        bids: Vec<Level>,
        asks: Vec<Level>,
        time: DateTime<Utc>,
    ) -> MarketView {
        let mut view = MarketView::new(instrument);
        view.book = Some(Timed::new(OrderBookL2 { bids, asks }, time));
        view.time_last_update = time;
        view
    }

    /// 测试常用的账户索引。
    pub fn account_index() -> AccountIndex {
        AccountIndex(0)
    }

    /// 测试常用的交易对索引。
    pub fn instrument_index() -> InstrumentIndex {
        InstrumentIndex(0)
    }
}
