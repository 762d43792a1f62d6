use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};
use tracing::info;

use crate::{
    engine::state::order::OrderId,
    instrument::{InstrumentIndex, Side},
};

/// 大额订单监控的参数。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LargeOrderConfig {
    /// 绝对数量阈值
    pub absolute_threshold: Decimal,
    /// 相对滚动平均成交量的倍数阈值
    pub relative_multiple: Decimal,
    /// 滚动平均（EWMA）的平滑系数，取值 (0, 1]
    pub ewma_alpha: Decimal,
    /// 保留的大额订单记录数量
    pub max_records: usize,
}

impl Default for LargeOrderConfig {
    fn default() -> Self {
        Self {
            absolute_threshold: Decimal::from(100),
            relative_multiple: Decimal::from(10),
            ewma_alpha: Decimal::new(1, 1),
            max_records: 1000,
        }
    }
}

/// 大额订单的来源。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum LargeOrderOrigin {
    /// 引擎自己提交的订单
    Engine(OrderId),
    /// 市场上观测到的公开成交
    Market,
}

/// 触发记录的阈值类型。
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum LargeOrderTrigger {
    /// 超过绝对数量阈值
    Absolute,
    /// 超过滚动平均成交量的倍数阈值
    RelativeToAverage {
        /// 触发时的滚动平均成交量
        average: Decimal,
    },
}

/// 一条大额订单记录。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LargeOrderRecord {
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 观测时间
    pub time: DateTime<Utc>,
    /// 方向
    pub side: Side,
    /// 数量
    pub quantity: Decimal,
    /// 价格（如可得）
    pub price: Option<Decimal>,
    /// 来源
    pub origin: LargeOrderOrigin,
    /// 触发的阈值类型
    pub trigger: LargeOrderTrigger,
}

/// 大额订单监控器。
///
/// 观测引擎自有订单与市场公开成交，数量超过绝对阈值或滚动平均的倍数时落档记录。
/// 滚动平均按交易对独立维护，归分区独占；记录集合共享，供运维视图聚合。
#[derive(Debug)]
pub struct LargeOrderMonitor {
    config: LargeOrderConfig,
    averages: FnvHashMap<InstrumentIndex, Decimal>,
    records: Arc<Mutex<VecDeque<LargeOrderRecord>>>,
}

impl LargeOrderMonitor {
    /// 以给定配置创建监控器。
    pub fn new(config: LargeOrderConfig) -> Self {
        Self {
            config,
            averages: FnvHashMap::default(),
            records: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// 观测一笔订单/成交，数量越限时返回写入的记录。
    ///
    /// 阈值检查先于平均值更新，避免首笔大单抬高自己的基准。
    pub fn observe(
        &mut self,
        instrument: InstrumentIndex,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
        origin: LargeOrderOrigin,
        time: DateTime<Utc>,
    ) -> Option<LargeOrderRecord> {
        let average = self.averages.get(&instrument).copied();

        let trigger = if quantity >= self.config.absolute_threshold {
            Some(LargeOrderTrigger::Absolute)
        } else {
            average.and_then(|average| {
                (average > Decimal::ZERO && quantity >= average * self.config.relative_multiple)
                    .then_some(LargeOrderTrigger::RelativeToAverage { average })
            })
        };

        let next_average = match average {
            Some(average) => {
                self.config.ewma_alpha * quantity + (Decimal::ONE - self.config.ewma_alpha) * average
            }
            None => quantity,
        };
        self.averages.insert(instrument, next_average);

        let trigger = trigger?;
        let record = LargeOrderRecord {
            instrument,
            time,
            side,
            quantity,
            price,
            origin,
            trigger,
        };

        info!(
            %instrument, %side, %quantity,
            trigger = ?record.trigger,
            "large order recorded"
        );

        let mut records = self.records.lock();
        if records.len() >= self.config.max_records {
            records.pop_front();
        }
        records.push_back(record.clone());
        Some(record)
    }

    /// 最近 `n` 条记录，供运维视图使用。
    pub fn recent_records(&self, n: usize) -> Vec<LargeOrderRecord> {
        let records = self.records.lock();
        records
            .iter()
            .skip(records.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    /// 共享记录集合的句柄，供跨分区的运维视图聚合。
    pub fn records_handle(&self) -> Arc<Mutex<VecDeque<LargeOrderRecord>>> {
        Arc::clone(&self.records)
    }
}
