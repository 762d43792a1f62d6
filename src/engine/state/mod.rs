use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    event::{AccountEvent, AccountEventKind, FillEvent, MarketEvent},
    instrument::{AssetName, InstrumentIndex, Registry, Side},
};

use self::{
    balance::BalanceLedger,
    market::MarketStates,
    order::{Order, OrderArena, OrderError, OrderHistoryRecord, OrderId, OrderStatus},
    trading::TradingState,
};

/// (账户, 资产) → 余额的权威账本。
pub mod balance;

/// 每个交易对的市场视图：订单簿、成交窗口与概率。
pub mod market;

/// 订单生命周期状态机与订单竞技场。
pub mod order;

/// 算法订单生成的开关状态。
pub mod trading;

/// 分区引擎的完整状态。
///
/// 账本与订单竞技场是按键加锁的共享竞技场（跨分区可见），市场视图归分区独占。
#[derive(Debug)]
pub struct EngineState {
    /// 算法订单生成的开关
    pub trading: TradingState,
    /// 交易对与账户参考数据
    pub registry: Arc<Registry>,
    /// 余额账本
    pub ledger: Arc<BalanceLedger>,
    /// 订单竞技场
    pub orders: Arc<OrderArena>,
    /// 本分区交易对的市场视图
    pub markets: MarketStates,
}

/// 应用账户事件后的结果，供审计与告警使用。
#[derive(Debug, Clone, PartialEq)]
pub enum AccountUpdateOutcome {
    /// 余额快照已应用
    BalanceUpdated,
    /// 订单已获网关确认
    OrderAcknowledged(OrderId),
    /// 成交已入账
    FillApplied {
        /// 订单标识符
        order_id: OrderId,
        /// 实际入账的成交数量
        settled_quantity: Decimal,
        /// 成交价格
        price: Decimal,
        /// 应用后的订单状态
        status: OrderStatus,
        /// 被截断的超额数量（一致性故障）
        over_fill: Option<Decimal>,
    },
    /// 订单被网关拒绝
    OrderRejected {
        /// 订单标识符
        order_id: OrderId,
        /// 是否需要人工审核
        manual_review: bool,
    },
    /// 订单撤销已确认
    OrderCancelled {
        /// 订单标识符
        order_id: OrderId,
        /// 未成交的剩余数量
        remaining: Decimal,
    },
    /// 事件被丢弃（未知订单、终态订单等），系统其余部分不受影响
    Discarded {
        /// 关联的订单（如有）
        order_id: Option<OrderId>,
        /// 丢弃原因
        reason: SmolStr,
    },
    /// 一致性故障，需要人工对账
    ConsistencyFault {
        /// 关联的订单
        order_id: OrderId,
        /// 故障详情
        detail: SmolStr,
    },
}

impl EngineState {
    /// 为给定交易对集合构建分区状态。
    pub fn new(
        registry: Arc<Registry>,
        ledger: Arc<BalanceLedger>,
        orders: Arc<OrderArena>,
        instruments: impl IntoIterator<Item = InstrumentIndex>,
        trading: TradingState,
    ) -> Self {
        Self {
            trading,
            registry,
            ledger,
            orders,
            markets: MarketStates::new(instruments),
        }
    }

    /// 应用一个市场事件到对应的市场视图。
    pub fn update_from_market(&mut self, event: &MarketEvent) {
        self.markets.view_mut(event.instrument).process(event);
    }

    /// 应用一个账户事件：余额校正或订单状态迁移（含余额结算）。
    pub fn update_from_account(
        &mut self,
        event: &AccountEvent,
        time_engine: DateTime<Utc>,
    ) -> AccountUpdateOutcome {
        match &event.kind {
            AccountEventKind::BalanceSnapshot(snapshot) => {
                self.ledger.update_from_gateway(event.account, snapshot.clone());
                AccountUpdateOutcome::BalanceUpdated
            }
            AccountEventKind::OrderAccepted(accepted) => {
                let Some(record) = self.orders.get(&accepted.order_id) else {
                    return discard_unknown(&accepted.order_id, "OrderAccepted");
                };

                let mut order = record.lock();
                match order.ack_gateway(accepted.gateway_order_id.clone()) {
                    Ok(()) => {
                        info!(
                            order_id = %accepted.order_id,
                            gateway_order_id = %accepted.gateway_order_id,
                            "order acknowledged by gateway"
                        );
                        AccountUpdateOutcome::OrderAcknowledged(accepted.order_id.clone())
                    }
                    Err(OrderError::GatewayIdConflict {
                        existing, received, ..
                    }) => {
                        order.freeze();
                        error!(
                            order_id = %accepted.order_id,
                            %existing, %received,
                            "gateway order id conflict, order frozen"
                        );
                        AccountUpdateOutcome::ConsistencyFault {
                            order_id: accepted.order_id.clone(),
                            detail: SmolStr::new(format!(
                                "gateway id conflict: have {existing}, received {received}"
                            )),
                        }
                    }
                    Err(err) => discard_error(&accepted.order_id, err),
                }
            }
            AccountEventKind::Fill(fill) => self.apply_fill(event, fill, time_engine),
            AccountEventKind::OrderRejected(rejected) => {
                let Some(record) = self.orders.get(&rejected.order_id) else {
                    return discard_unknown(&rejected.order_id, "OrderRejected");
                };

                let mut order = record.lock();
                if rejected.manual_review {
                    // 升级事件不受冻结守卫影响：重试耗尽的订单必须终结
                    order.frozen = false;
                }
                match order.reject() {
                    Ok(()) => {
                        self.release_remaining_reservation(&mut order, time_engine);
                        self.orders.record(OrderHistoryRecord::new(
                            rejected.order_id.clone(),
                            time_engine,
                            OrderStatus::Rejected,
                            order.filled_quantity,
                            Some(rejected.reason.clone()),
                        ));
                        if rejected.manual_review {
                            order.freeze();
                            warn!(
                                order_id = %rejected.order_id,
                                reason = %rejected.reason,
                                "order rejected after retry exhaustion, flagged for manual review"
                            );
                        }
                        AccountUpdateOutcome::OrderRejected {
                            order_id: rejected.order_id.clone(),
                            manual_review: rejected.manual_review,
                        }
                    }
                    Err(OrderError::RejectWithFills {
                        filled_quantity, ..
                    }) => {
                        // 已有成交的订单不可被拒绝终结，冻结等待人工对账
                        order.freeze();
                        error!(
                            order_id = %rejected.order_id,
                            %filled_quantity,
                            reason = %rejected.reason,
                            "rejection for order with fills, frozen for reconciliation"
                        );
                        AccountUpdateOutcome::ConsistencyFault {
                            order_id: rejected.order_id.clone(),
                            detail: SmolStr::new(format!(
                                "rejection after {filled_quantity} filled"
                            )),
                        }
                    }
                    Err(err) => discard_error(&rejected.order_id, err),
                }
            }
            AccountEventKind::CancelAccepted(cancelled) => {
                let Some(record) = self.orders.get(&cancelled.order_id) else {
                    return discard_unknown(&cancelled.order_id, "CancelAccepted");
                };

                let mut order = record.lock();
                match order.cancel() {
                    Ok(remaining) => {
                        self.release_remaining_reservation(&mut order, time_engine);
                        self.orders.record(OrderHistoryRecord::new(
                            cancelled.order_id.clone(),
                            time_engine,
                            OrderStatus::Cancelled,
                            order.filled_quantity,
                            None,
                        ));
                        AccountUpdateOutcome::OrderCancelled {
                            order_id: cancelled.order_id.clone(),
                            remaining,
                        }
                    }
                    Err(err) => discard_error(&cancelled.order_id, err),
                }
            }
        }
    }

    fn apply_fill(
        &mut self,
        event: &AccountEvent,
        fill: &FillEvent,
        time_engine: DateTime<Utc>,
    ) -> AccountUpdateOutcome {
        let Some(record) = self.orders.get(&fill.order_id) else {
            return discard_unknown(&fill.order_id, "Fill");
        };

        let mut order = record.lock();

        // 预留按剩余数量均摊，成交消耗对应份额
        let remaining_before = order.remaining_quantity();
        let reserve_per_unit = if remaining_before > Decimal::ZERO {
            order.reserved / remaining_before
        } else {
            Decimal::ZERO
        };

        let applied = match order.apply_fill(fill.quantity) {
            Ok(applied) => applied,
            Err(err) => return discard_error(&fill.order_id, err),
        };

        let settled = applied.settled_quantity;
        let instrument = self.registry.instrument(order.instrument);
        let (base, quote) = (
            instrument.underlying.base.clone(),
            instrument.underlying.quote.clone(),
        );

        let reserved_consumed = (settled * reserve_per_unit).min(order.reserved);
        let (pay, receive): ((&AssetName, Decimal), (&AssetName, Decimal)) = match order.side {
            Side::Buy => ((&quote, settled * fill.price), (&base, settled)),
            Side::Sell => ((&base, settled), (&quote, settled * fill.price)),
        };

        // 限价改善时实际支付低于预留份额，差额先行释放回可用
        if reserved_consumed > pay.1 {
            if let Err(err) = self.ledger.release(
                event.account,
                pay.0,
                reserved_consumed - pay.1,
                time_engine,
            ) {
                warn!(order_id = %fill.order_id, %err, "price improvement release failed");
            }
        }

        if let Err(err) = self
            .ledger
            .settle(event.account, pay, receive, time_engine)
        {
            error!(order_id = %fill.order_id, %err, "fill settlement failed");
        }

        order.reserved -= reserved_consumed;

        self.orders.record(OrderHistoryRecord::new(
            fill.order_id.clone(),
            time_engine,
            applied.status,
            order.filled_quantity,
            Some(SmolStr::new(format!(
                "fill {settled} @ {}",
                fill.price
            ))),
        ));

        if applied.status.is_terminal() {
            self.release_remaining_reservation(&mut order, time_engine);
        }

        if let Some(over_fill) = applied.over_fill {
            error!(
                order_id = %fill.order_id,
                %over_fill,
                "fill exceeds order quantity, capped and frozen for reconciliation"
            );
        }

        AccountUpdateOutcome::FillApplied {
            order_id: fill.order_id.clone(),
            settled_quantity: settled,
            price: fill.price,
            status: applied.status,
            over_fill: applied.over_fill,
        }
    }

    fn release_remaining_reservation(&self, order: &mut Order, time_engine: DateTime<Utc>) {
        if order.reserved <= Decimal::ZERO {
            return;
        }

        let instrument = self.registry.instrument(order.instrument);
        let asset = match order.side {
            Side::Buy => &instrument.underlying.quote,
            Side::Sell => &instrument.underlying.base,
        };

        if let Err(err) = self
            .ledger
            .release(order.account, asset, order.reserved, time_engine)
        {
            warn!(order_id = %order.id, %err, "terminal reservation release failed");
        }
        order.reserved = Decimal::ZERO;
    }
}

fn discard_unknown(order_id: &OrderId, kind: &str) -> AccountUpdateOutcome {
    warn!(%order_id, event = kind, "event references unknown order, discarded");
    AccountUpdateOutcome::Discarded {
        order_id: Some(order_id.clone()),
        reason: SmolStr::new(format!("{kind} for unknown order")),
    }
}

fn discard_error(order_id: &OrderId, err: OrderError) -> AccountUpdateOutcome {
    warn!(%order_id, %err, "order transition discarded");
    AccountUpdateOutcome::Discarded {
        order_id: Some(order_id.clone()),
        reason: SmolStr::new(err.to_string()),
    }
}
