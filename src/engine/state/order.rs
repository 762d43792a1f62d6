use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::warn;

use crate::instrument::{AccountIndex, InstrumentIndex, Side};

/// 引擎侧订单标识符，在订单创建时分配。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct OrderId(SmolStr);

impl OrderId {
    /// 创建一个新的 [`OrderId`]。
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// 网关分配的订单标识符，确认后只允许设置一次。
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize, From,
)]
pub struct GatewayOrderId(SmolStr);

impl GatewayOrderId {
    /// 创建一个新的 [`GatewayOrderId`]。
    pub fn new<S>(id: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// 订单类型。
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, Deserialize, Serialize)]
pub enum OrderKind {
    /// 市价单，以当前市场价立即成交
    Market,
    /// 限价单，只在指定价格或更优价格成交
    Limit,
}

/// 订单生命周期状态。
///
/// 合法迁移：
/// `Pending -> PartiallyFilled | Filled | Rejected | Cancelled`，
/// `PartiallyFilled -> PartiallyFilled | Filled | Cancelled`。
/// `Filled`、`Rejected`、`Cancelled` 为终态，任何后续迁移尝试都会被拒绝。
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, Deserialize, Serialize)]
pub enum OrderStatus {
    /// 已提交，尚无成交
    Pending,
    /// 部分成交
    PartiallyFilled,
    /// 完全成交（终态）
    Filled,
    /// 被拒绝（终态）
    Rejected,
    /// 已撤销（终态），已成交部分保留
    Cancelled,
}

impl OrderStatus {
    /// 是否为终态。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled)
    }
}

/// 订单状态机拒绝迁移时返回的错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// 订单已处于终态
    #[error("order {order_id} already terminal ({status}), transition discarded")]
    Terminal {
        /// 订单标识符
        order_id: OrderId,
        /// 当前终态
        status: OrderStatus,
    },

    /// 订单已被冻结等待人工对账
    #[error("order {order_id} frozen pending manual reconciliation")]
    Frozen {
        /// 订单标识符
        order_id: OrderId,
    },

    /// 成交增量非正
    #[error("order {order_id} fill quantity must be positive: {quantity}")]
    NonPositiveFill {
        /// 订单标识符
        order_id: OrderId,
        /// 非法的成交增量
        quantity: Decimal,
    },

    /// 拒绝到达时订单已有成交，属一致性异常
    #[error("order {order_id} has {filled_quantity} filled, rejection is a consistency anomaly")]
    RejectWithFills {
        /// 订单标识符
        order_id: OrderId,
        /// 已入账的成交数量
        filled_quantity: Decimal,
    },

    /// 网关订单标识符已设置且不一致
    #[error("order {order_id} gateway id conflict: have {existing}, received {received}")]
    GatewayIdConflict {
        /// 订单标识符
        order_id: OrderId,
        /// 已设置的网关标识符
        existing: GatewayOrderId,
        /// 本次收到的网关标识符
        received: GatewayOrderId,
    },
}

/// 引擎提交的订单及其当前生命周期状态。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Order {
    /// 引擎侧订单标识符
    pub id: OrderId,
    /// 下单账户
    pub account: AccountIndex,
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 买卖方向
    pub side: Side,
    /// 订单类型
    pub kind: OrderKind,
    /// 订单数量
    pub quantity: Decimal,
    /// 限价（市价单为 None）
    pub price: Option<Decimal>,
    /// 当前状态
    pub status: OrderStatus,
    /// 累计成交数量，单调不减
    pub filled_quantity: Decimal,
    /// 下单时预留的金额（支付资产计）
    pub reserved: Decimal,
    /// 网关分配的订单标识符
    pub gateway_order_id: Option<GatewayOrderId>,
    /// 是否已冻结等待人工对账（超额成交等一致性故障）
    pub frozen: bool,
    /// 订单创建时间
    pub time_created: DateTime<Utc>,
}

/// 成功应用成交后的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFill {
    /// 实际入账的成交数量（超额部分被截断）
    pub settled_quantity: Decimal,
    /// 被截断的超额数量（一致性故障）
    pub over_fill: Option<Decimal>,
    /// 应用后的订单状态
    pub status: OrderStatus,
}

impl Order {
    /// 创建一个新的 Pending 订单。
    pub fn new(
        id: OrderId,
        account: AccountIndex,
        instrument: InstrumentIndex,
        side: Side,
        kind: OrderKind,
        quantity: Decimal,
        price: Option<Decimal>,
        reserved: Decimal,
        time_created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account,
            instrument,
            side,
            kind,
            quantity,
            price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            reserved,
            gateway_order_id: None,
            frozen: false,
            time_created,
        }
    }

    /// 未成交的剩余数量。
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    fn guard_active(&self) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::Terminal {
                order_id: self.id.clone(),
                status: self.status,
            });
        }
        if self.frozen {
            return Err(OrderError::Frozen {
                order_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// 记录网关确认，设置网关订单标识符。
    ///
    /// 标识符只允许设置一次：重复确认携带相同标识符为无操作，不同标识符为一致性故障。
    pub fn ack_gateway(&mut self, gateway_order_id: GatewayOrderId) -> Result<(), OrderError> {
        self.guard_active()?;
        match &self.gateway_order_id {
            None => {
                self.gateway_order_id = Some(gateway_order_id);
                Ok(())
            }
            Some(existing) if *existing == gateway_order_id => Ok(()),
            Some(existing) => Err(OrderError::GatewayIdConflict {
                order_id: self.id.clone(),
                existing: existing.clone(),
                received: gateway_order_id,
            }),
        }
    }

    /// 应用一笔成交增量。
    ///
    /// 累计成交超过订单数量时，入账数量被截断到订单数量，订单被冻结等待人工对账，
    /// 超额部分通过 [`AppliedFill::over_fill`] 上报为一致性故障。
    pub fn apply_fill(&mut self, quantity: Decimal) -> Result<AppliedFill, OrderError> {
        self.guard_active()?;

        if quantity <= Decimal::ZERO {
            return Err(OrderError::NonPositiveFill {
                order_id: self.id.clone(),
                quantity,
            });
        }

        let remaining = self.remaining_quantity();
        let (settled, over_fill) = if quantity > remaining {
            (remaining, Some(quantity - remaining))
        } else {
            (quantity, None)
        };

        self.filled_quantity += settled;
        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        if over_fill.is_some() {
            self.frozen = true;
        }

        Ok(AppliedFill {
            settled_quantity: settled,
            over_fill,
            status: self.status,
        })
    }

    /// 迁移到 Rejected 终态。
    ///
    /// 只允许从 Pending 迁移：已有成交的订单被拒绝是一致性异常，
    /// 通过 [`OrderError::RejectWithFills`] 上报。
    pub fn reject(&mut self) -> Result<(), OrderError> {
        self.guard_active()?;
        if self.status != OrderStatus::Pending {
            return Err(OrderError::RejectWithFills {
                order_id: self.id.clone(),
                filled_quantity: self.filled_quantity,
            });
        }
        self.status = OrderStatus::Rejected;
        Ok(())
    }

    /// 迁移到 Cancelled 终态，返回未成交的剩余数量。
    pub fn cancel(&mut self) -> Result<Decimal, OrderError> {
        self.guard_active()?;
        let remaining = self.remaining_quantity();
        self.status = OrderStatus::Cancelled;
        Ok(remaining)
    }

    /// 冻结订单等待人工对账。
    pub fn freeze(&mut self) {
        self.frozen = true;
    }
}

/// 每次状态迁移写入的历史记录。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderHistoryRecord {
    /// 订单标识符
    pub order_id: OrderId,
    /// 迁移时间
    pub time: DateTime<Utc>,
    /// 迁移后的状态
    pub status: OrderStatus,
    /// 迁移后的累计成交数量
    pub filled_quantity: Decimal,
    /// 迁移详情（成交价格、拒绝原因等）
    pub detail: Option<SmolStr>,
}

/// 订单竞技场：OrderId → 订单记录的共享映射，外加只追加的迁移历史。
///
/// 每条订单记录独立加锁。订单从不删除，终态订单留在映射中作为归档。
#[derive(Debug, Default)]
pub struct OrderArena {
    orders: RwLock<FnvHashMap<OrderId, Arc<Mutex<Order>>>>,
    history: Mutex<Vec<OrderHistoryRecord>>,
}

impl OrderArena {
    /// 创建一个空的 [`OrderArena`]。
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一个新订单，返回其共享记录。
    pub fn insert(&self, order: Order) -> Arc<Mutex<Order>> {
        let id = order.id.clone();
        let record = Arc::new(Mutex::new(order));
        let mut orders = self.orders.write();
        if orders.contains_key(&id) {
            warn!(order_id = %id, "duplicate order insert, keeping existing record");
            return Arc::clone(orders.get(&id).unwrap_or(&record));
        }
        orders.insert(id, Arc::clone(&record));
        record
    }

    /// 获取指定订单的共享记录。
    pub fn get(&self, id: &OrderId) -> Option<Arc<Mutex<Order>>> {
        self.orders.read().get(id).map(Arc::clone)
    }

    /// 追加一条迁移历史记录。
    pub fn record(&self, record: OrderHistoryRecord) {
        self.history.lock().push(record);
    }

    /// 获取指定订单的完整迁移历史（按写入顺序）。
    pub fn history_for(&self, id: &OrderId) -> Vec<OrderHistoryRecord> {
        self.history
            .lock()
            .iter()
            .filter(|record| &record.order_id == id)
            .cloned()
            .collect()
    }

    /// 读取指定状态的所有订单的克隆，供运维视图使用。
    pub fn orders_with_status(&self, status: OrderStatus) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .map(|record| record.lock().clone())
            .filter(|order| order.status == status)
            .collect()
    }

    /// 读取所有未终结订单的克隆，按创建时间排序。
    pub fn open_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .map(|record| record.lock().clone())
            .filter(|order| !order.status.is_terminal())
            .sorted_by(|a, b| a.time_created.cmp(&b.time_created).then(a.id.cmp(&b.id)))
            .collect()
    }
}
