use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    EngineEvent, Sequence, Terminal,
    channel::Tx,
    engine::{
        audit::{AuditTick, EngineAudit},
        clock::EngineClock,
        command::Command,
        state::{
            AccountUpdateOutcome, EngineState,
            order::{Order, OrderHistoryRecord, OrderId, OrderStatus},
            trading::{TradingState, TradingStateUpdateAudit},
        },
    },
    event::{AccountEvent, MarketEvent, MarketEventKind},
    event::journal::EventJournal,
    execution::request::{CancelRequest, ExecutionRequest, OpenRequest},
    instrument::{AccountIndex, InstrumentIndex, Side},
    risk::{
        ExecutionRecord, LiquidityAnalyzer, RiskRefused,
        large_order::{LargeOrderMonitor, LargeOrderOrigin, LargeOrderRecord},
        pre_trade_check,
    },
    strategy::{AccountSnapshot, OrderIntent, Strategy, StrategyAdvisory, StrategyDecision},
};

/// 审计记录类型。
pub mod audit;

/// 引擎时间源。
pub mod clock;

/// 外部命令。
pub mod command;

/// 引擎错误分类。
pub mod error;

/// 引擎状态：交易开关、账本、订单竞技场与市场视图。
pub mod state;

/// 处理输入事件并产生审计的组件。
pub trait Processor<Event> {
    /// 处理事件产生的审计类型。
    type Audit;

    /// 处理一个事件。
    fn process(&mut self, event: Event) -> Self::Audit;
}

/// 引擎的运行元数据。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMeta {
    /// 引擎启动时间
    pub time_start: DateTime<Utc>,
    /// 单调递增的事件序列号
    pub sequence: Sequence,
}

/// 订单创建的策略无关参数。
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPolicy {
    /// 市价买单预留时假设的最坏单价（预测市场份额价格上限为 1）
    pub market_reserve_price: Decimal,
    /// 流动性评估使用的名义订单数量
    pub assessment_order_size: Decimal,
    /// 引擎侧订单标识符前缀，各分区唯一
    pub id_prefix: SmolStr,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            market_reserve_price: Decimal::ONE,
            assessment_order_size: Decimal::from(100),
            id_prefix: SmolStr::new_static("ord"),
        }
    }
}

/// 引擎处理单个事件产生的输出。
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// 交易开关已更新
    TradingState(TradingStateUpdateAudit),
    /// 账户事件已应用
    AccountUpdate(AccountUpdateOutcome),
    /// 订单意图已通过检查并发往执行层
    IntentGenerated {
        /// 分配的订单标识符
        order_id: OrderId,
    },
    /// 订单意图未通过前置检查
    IntentRefused(RiskRefused<OrderIntent>),
    /// 订单意图被放弃（余额不足、执行通道关闭）
    IntentAbandoned {
        /// 被放弃的意图
        intent: OrderIntent,
        /// 放弃原因
        reason: SmolStr,
    },
    /// 策略发出建议信号但不动作
    Advisory(StrategyAdvisory),
    /// 观测到大额订单
    LargeOrder(LargeOrderRecord),
    /// 撤销请求已发往执行层
    CancelRequested(OrderId),
    /// 命令被拒绝
    CommandRejected {
        /// 拒绝原因
        reason: SmolStr,
    },
}

/// 事件驱动的订单生命周期引擎，每个分区一个实例。
///
/// 单个事件内的处理顺序固定：状态更新 → 大额订单监控 → 流动性评估 → 策略评估 →
/// 前置检查与预留 → 提交执行层。预留与订单创建、提交是一个工作单元，任何一步失败
/// 都会回滚已完成的部分。
#[derive(Debug)]
pub struct Engine<Clock, ExecutionTxs> {
    /// 时间源
    pub clock: Clock,
    /// 运行元数据
    pub meta: EngineMeta,
    /// 分区状态
    pub state: EngineState,
    /// 执行请求通道
    pub execution_tx: ExecutionTxs,
    /// 本分区启用的策略
    pub strategies: Vec<Box<dyn Strategy>>,
    /// 流动性分析器
    pub analyzer: LiquidityAnalyzer,
    /// 大额订单监控器
    pub monitor: LargeOrderMonitor,
    /// 事件日志（运维告警出口）
    pub journal: Arc<dyn EventJournal>,
    /// 订单创建参数
    pub policy: OrderPolicy,
    /// 本分区交易的账户
    pub account: AccountIndex,
    order_counter: u64,
}

impl<Clock, ExecutionTxs> Engine<Clock, ExecutionTxs>
where
    Clock: EngineClock,
    ExecutionTxs: Tx<Item = ExecutionRequest>,
{
    /// 创建引擎实例。
    pub fn new(
        clock: Clock,
        state: EngineState,
        execution_tx: ExecutionTxs,
        strategies: Vec<Box<dyn Strategy>>,
        analyzer: LiquidityAnalyzer,
        monitor: LargeOrderMonitor,
        journal: Arc<dyn EventJournal>,
        policy: OrderPolicy,
        account: AccountIndex,
    ) -> Self {
        let time_start = clock.time();
        Self {
            clock,
            meta: EngineMeta {
                time_start,
                sequence: Sequence(0),
            },
            state,
            execution_tx,
            strategies,
            analyzer,
            monitor,
            journal,
            policy,
            account,
            order_counter: 0,
        }
    }

    fn next_order_id(&mut self) -> OrderId {
        let n = self.order_counter;
        self.order_counter += 1;
        OrderId::new(format!("{}-{n}", self.policy.id_prefix))
    }

    fn process_account(
        &mut self,
        event: &AccountEvent,
        time_engine: DateTime<Utc>,
    ) -> Vec<EngineOutput> {
        let outcome = self.state.update_from_account(event, time_engine);

        match &outcome {
            AccountUpdateOutcome::ConsistencyFault { order_id, detail } => {
                self.journal.alert(
                    "consistency_fault",
                    json!({ "order_id": order_id.to_string(), "detail": detail.as_str() }),
                    time_engine,
                );
            }
            AccountUpdateOutcome::FillApplied {
                order_id,
                settled_quantity,
                price,
                over_fill,
                ..
            } => {
                if let Some(over_fill) = over_fill {
                    self.journal.alert(
                        "over_fill",
                        json!({ "order_id": order_id.to_string(), "excess": over_fill.to_string() }),
                        time_engine,
                    );
                }
                // 成交偏差喂给流动性分析器的执行历史
                if let Some(record) = self.state.orders.get(order_id) {
                    let order = record.lock();
                    if let Some(api_price) = order.price {
                        self.analyzer.record_execution(ExecutionRecord::new(
                            order.instrument,
                            time_engine,
                            api_price,
                            *price,
                            *settled_quantity,
                        ));
                    }
                }
            }
            AccountUpdateOutcome::OrderRejected {
                order_id,
                manual_review: true,
            } => {
                self.journal.alert(
                    "manual_review",
                    json!({ "order_id": order_id.to_string() }),
                    time_engine,
                );
            }
            _ => {}
        }

        let mut outputs = vec![EngineOutput::AccountUpdate(outcome)];

        // 账户事件可能释放预算，交易开启时对分区内全部交易对重新评估
        if self.state.trading == TradingState::Enabled {
            let instruments: Vec<InstrumentIndex> = self
                .state
                .markets
                .views()
                .map(|view| view.instrument)
                .collect();
            for instrument in instruments {
                let decision = self.evaluate_strategies(instrument, time_engine);
                self.apply_decision(decision, time_engine, &mut outputs);
            }
        }

        outputs
    }

    fn process_market(
        &mut self,
        event: &MarketEvent,
        time_engine: DateTime<Utc>,
    ) -> Vec<EngineOutput> {
        let mut outputs = Vec::new();

        self.state.update_from_market(event);

        if let MarketEventKind::Trade(trade) = &event.kind {
            if let Some(record) = self.monitor.observe(
                event.instrument,
                trade.side,
                trade.quantity,
                Some(trade.price),
                LargeOrderOrigin::Market,
                time_engine,
            ) {
                outputs.push(EngineOutput::LargeOrder(record));
            }
        }

        if self.state.trading == TradingState::Enabled {
            let decision = self.evaluate_strategies(event.instrument, time_engine);
            self.apply_decision(decision, time_engine, &mut outputs);
        }

        outputs
    }

    fn apply_decision(
        &mut self,
        decision: StrategyDecision,
        time_engine: DateTime<Utc>,
        outputs: &mut Vec<EngineOutput>,
    ) {
        for advisory in decision.advisories {
            debug!(
                strategy = %advisory.strategy,
                instrument = %advisory.instrument,
                signal = %advisory.signal,
                reason = %advisory.reason,
                "strategy advisory"
            );
            outputs.push(EngineOutput::Advisory(advisory));
        }
        for intent in decision.intents {
            self.accept_intent(intent, time_engine, outputs);
        }
    }

    fn evaluate_strategies(
        &mut self,
        instrument: InstrumentIndex,
        time_engine: DateTime<Utc>,
    ) -> StrategyDecision {
        let instrument_data = self.state.registry.instrument(instrument).clone();
        let view = self.state.markets.view(instrument);
        let liquidity = self.analyzer.evaluate(
            view,
            Side::Buy,
            self.policy.assessment_order_size,
            time_engine,
        );
        let account_snapshot = AccountSnapshot::new(
            self.account,
            self.state.ledger.balances_for_account(self.account),
        );

        let view = view.clone();
        let mut decision = StrategyDecision::none();
        for strategy in &mut self.strategies {
            decision.merge(strategy.evaluate(&instrument_data, &view, &liquidity, &account_snapshot));
        }
        decision
    }

    fn accept_intent(
        &mut self,
        intent: OrderIntent,
        time_engine: DateTime<Utc>,
        outputs: &mut Vec<EngineOutput>,
    ) {
        let instrument = self.state.registry.instrument(intent.instrument).clone();

        let approved = match pre_trade_check(&instrument, intent) {
            Ok(approved) => approved,
            Err(refused) => {
                warn!(reason = %refused.reason, "order intent refused by pre-trade check");
                outputs.push(EngineOutput::IntentRefused(refused));
                return;
            }
        };
        let intent = approved.into_item();

        // 预留与订单创建、提交是一个工作单元
        let (reserve_asset, reserve_amount) = match intent.side {
            Side::Buy => (
                instrument.underlying.quote.clone(),
                intent.quantity
                    * intent.price.unwrap_or(self.policy.market_reserve_price),
            ),
            Side::Sell => (instrument.underlying.base.clone(), intent.quantity),
        };

        if let Err(err) = self.state.ledger.reserve(
            intent.account,
            &reserve_asset,
            reserve_amount,
            time_engine,
        ) {
            debug!(%err, "order intent abandoned, reservation failed");
            outputs.push(EngineOutput::IntentAbandoned {
                reason: SmolStr::new(err.to_string()),
                intent,
            });
            return;
        }

        let order_id = self.next_order_id();
        self.state.orders.insert(Order::new(
            order_id.clone(),
            intent.account,
            intent.instrument,
            intent.side,
            intent.kind,
            intent.quantity,
            intent.price,
            reserve_amount,
            time_engine,
        ));
        self.state.orders.record(OrderHistoryRecord::new(
            order_id.clone(),
            time_engine,
            OrderStatus::Pending,
            Decimal::ZERO,
            None,
        ));

        if let Some(record) = self.monitor.observe(
            intent.instrument,
            intent.side,
            intent.quantity,
            intent.price,
            LargeOrderOrigin::Engine(order_id.clone()),
            time_engine,
        ) {
            outputs.push(EngineOutput::LargeOrder(record));
        }

        let request = OpenRequest::new(
            order_id.clone(),
            intent.account,
            intent.instrument,
            instrument.symbol.clone(),
            instrument.gateway.clone(),
            intent.side,
            intent.kind,
            intent.quantity,
            intent.price,
        );

        if self
            .execution_tx
            .send(ExecutionRequest::Open(request))
            .is_err()
        {
            // 提交失败：回滚预留并终结订单，保持工作单元原子性
            error!(%order_id, "execution channel terminated, rolling back reservation");
            if let Err(err) = self.state.ledger.release(
                intent.account,
                &reserve_asset,
                reserve_amount,
                time_engine,
            ) {
                error!(%order_id, %err, "rollback release failed");
            }
            if let Some(record) = self.state.orders.get(&order_id) {
                let mut order = record.lock();
                if order.reject().is_ok() {
                    order.reserved = Decimal::ZERO;
                }
            }
            self.state.orders.record(OrderHistoryRecord::new(
                order_id,
                time_engine,
                OrderStatus::Rejected,
                Decimal::ZERO,
                Some(SmolStr::new_static("execution channel terminated")),
            ));
            outputs.push(EngineOutput::IntentAbandoned {
                reason: SmolStr::new_static("execution channel terminated"),
                intent,
            });
            return;
        }

        info!(%order_id, "order intent accepted and submitted");
        outputs.push(EngineOutput::IntentGenerated { order_id });
    }

    fn process_command(
        &mut self,
        command: Command,
        time_engine: DateTime<Utc>,
    ) -> Vec<EngineOutput> {
        match command {
            Command::SubmitOrder(intent) => {
                let mut outputs = Vec::new();
                self.accept_intent(intent, time_engine, &mut outputs);
                outputs
            }
            Command::CancelOrder(order_id) => {
                let Some(record) = self.state.orders.get(&order_id) else {
                    return vec![EngineOutput::CommandRejected {
                        reason: SmolStr::new(format!("unknown order: {order_id}")),
                    }];
                };

                let (instrument_index, gateway_order_id, terminal) = {
                    let order = record.lock();
                    (
                        order.instrument,
                        order.gateway_order_id.clone(),
                        order.status.is_terminal(),
                    )
                };

                if terminal {
                    return vec![EngineOutput::CommandRejected {
                        reason: SmolStr::new(format!("order already terminal: {order_id}")),
                    }];
                }

                let instrument = self.state.registry.instrument(instrument_index);
                let request = CancelRequest::new(
                    order_id.clone(),
                    self.account,
                    instrument.gateway.clone(),
                    instrument.symbol.clone(),
                    gateway_order_id,
                );

                if self
                    .execution_tx
                    .send(ExecutionRequest::Cancel(request))
                    .is_err()
                {
                    error!(%order_id, "execution channel terminated, cancel not sent");
                    return vec![EngineOutput::CommandRejected {
                        reason: SmolStr::new_static("execution channel terminated"),
                    }];
                }

                vec![EngineOutput::CancelRequested(order_id)]
            }
        }
    }
}

impl<Clock, ExecutionTxs> Processor<EngineEvent> for Engine<Clock, ExecutionTxs>
where
    Clock: EngineClock,
    ExecutionTxs: Tx<Item = ExecutionRequest>,
{
    type Audit = AuditTick<EngineAudit<EngineEvent, EngineOutput>>;

    fn process(&mut self, event: EngineEvent) -> Self::Audit {
        let time_engine = self.clock.time();

        let outputs = match &event {
            EngineEvent::Shutdown(_) => {
                info!("engine partition received shutdown");
                Vec::new()
            }
            EngineEvent::Command(command) => self.process_command(command.clone(), time_engine),
            EngineEvent::TradingStateUpdate(update) => {
                vec![EngineOutput::TradingState(self.state.trading.update(*update))]
            }
            EngineEvent::Account(account_event) => self.process_account(account_event, time_engine),
            EngineEvent::Market(market_event) => self.process_market(market_event, time_engine),
        };

        let terminal = event.is_terminal();
        AuditTick::new(
            self.meta.sequence.fetch_add(),
            time_engine,
            EngineAudit::from_process(event, outputs, terminal),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{UnboundedTx, mpsc_unbounded},
        engine::{
            clock::LiveClock,
            state::{
                balance::BalanceLedger,
                order::{OrderArena, OrderKind},
            },
        },
        event::{AccountEventKind, FillEvent, journal::InMemoryJournal},
        instrument::{AssetName, Registry},
        risk::{RefuseReason, RiskConfig},
        snapshot::Snapshot,
        strategy::{
            AdvisorySignal,
            probability::{ProbabilityConfig, ProbabilityStrategy},
        },
        test_utils,
    };
    use crate::engine::state::balance::{AssetBalance, Balance};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc::UnboundedReceiver;

    type TestEngine = Engine<LiveClock, UnboundedTx<ExecutionRequest>>;

    fn engine(
        strategies: Vec<Box<dyn Strategy>>,
        trading: TradingState,
    ) -> (TestEngine, UnboundedReceiver<ExecutionRequest>) {
        engine_with_usdc(strategies, trading, 1000.0)
    }

    fn engine_with_usdc(
        strategies: Vec<Box<dyn Strategy>>,
        trading: TradingState,
        usdc: f64,
    ) -> (TestEngine, UnboundedReceiver<ExecutionRequest>) {
        let registry = Arc::new(Registry::new(
            vec![test_utils::instrument("market_a_yes")],
            vec![test_utils::account("acct_1")],
        ));
        let account = test_utils::account_index();
        let ledger = Arc::new(BalanceLedger::new(
            [
                ((account, AssetName::new("usdc")), test_utils::balance(usdc)),
                (
                    (account, AssetName::new("market_a_yes")),
                    test_utils::balance(0.0),
                ),
            ],
            Utc::now(),
        ));
        let state = EngineState::new(
            registry,
            ledger,
            Arc::new(OrderArena::new()),
            [test_utils::instrument_index()],
            trading,
        );

        let (execution_tx, execution_rx) = mpsc_unbounded();
        let engine = Engine::new(
            LiveClock,
            state,
            execution_tx,
            strategies,
            LiquidityAnalyzer::new(RiskConfig::default()),
            LargeOrderMonitor::new(Default::default()),
            Arc::new(InMemoryJournal::new(100)),
            OrderPolicy::default(),
            account,
        );
        (engine, execution_rx)
    }

    fn submit_intent(quantity: Decimal, price: Decimal) -> EngineEvent {
        EngineEvent::Command(Command::SubmitOrder(OrderIntent::new(
            test_utils::account_index(),
            test_utils::instrument_index(),
            Side::Buy,
            OrderKind::Limit,
            quantity,
            Some(price),
        )))
    }

    #[test]
    fn test_submit_order_reserves_and_sends_request() {
        let (mut engine, mut execution_rx) = engine(Vec::new(), TradingState::Enabled);

        let audit = engine.process(submit_intent(dec!(100), dec!(0.40)));
        let outputs = &audit.kind.as_process().outputs;
        assert!(
            outputs
                .iter()
                .any(|output| matches!(output, EngineOutput::IntentGenerated { .. }))
        );
        // 数量达到绝对阈值，大额订单监控同时落档
        assert!(
            outputs
                .iter()
                .any(|output| matches!(output, EngineOutput::LargeOrder(_)))
        );

        let balance = engine
            .state
            .ledger
            .balance(test_utils::account_index(), &AssetName::new("usdc"))
            .unwrap()
            .value;
        assert_eq!(balance.reserved, dec!(40));
        assert_eq!(balance.available, dec!(960));

        let request = execution_rx.try_recv().unwrap();
        assert!(matches!(
            request,
            ExecutionRequest::Open(OpenRequest { quantity, .. }) if quantity == dec!(100)
        ));

        assert_eq!(engine.state.orders.open_orders().len(), 1);
    }

    #[test]
    fn test_submit_then_fill_completes_lifecycle() {
        let (mut engine, _execution_rx) = engine(Vec::new(), TradingState::Enabled);

        engine.process(submit_intent(dec!(100), dec!(0.40)));
        let order_id = engine.state.orders.open_orders()[0].id.clone();

        let audit = engine.process(EngineEvent::Account(AccountEvent::new(
            test_utils::account_index(),
            AccountEventKind::Fill(FillEvent::new(
                order_id.clone(),
                dec!(100),
                dec!(0.40),
                Utc::now(),
            )),
        )));

        assert!(matches!(
            audit.kind.as_process().outputs.as_slice(),
            [EngineOutput::AccountUpdate(AccountUpdateOutcome::FillApplied {
                status: OrderStatus::Filled,
                ..
            })]
        ));

        let history = engine.state.orders.history_for(&order_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, OrderStatus::Pending);
        assert_eq!(history[1].status, OrderStatus::Filled);

        let balance = engine
            .state
            .ledger
            .balance(test_utils::account_index(), &AssetName::new("usdc"))
            .unwrap()
            .value;
        assert_eq!(balance.total, dec!(960));
        assert_eq!(balance.reserved, dec!(0));

        // 成交偏差进入分析器的执行历史
        let history = engine
            .analyzer
            .execution_history(test_utils::instrument_index());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].api_price, dec!(0.40));
        assert_eq!(history[0].executed_price, dec!(0.40));
    }

    #[test]
    fn test_insufficient_balance_abandons_intent() {
        let (mut engine, mut execution_rx) = engine(Vec::new(), TradingState::Enabled);

        // 5000 × 0.40 = 2000 > 可用 1000
        let audit = engine.process(submit_intent(dec!(5000), dec!(0.40)));
        assert!(matches!(
            audit.kind.as_process().outputs.as_slice(),
            [EngineOutput::IntentAbandoned { .. }]
        ));

        assert!(execution_rx.try_recv().is_err());
        assert!(engine.state.orders.open_orders().is_empty());

        let balance = engine
            .state
            .ledger
            .balance(test_utils::account_index(), &AssetName::new("usdc"))
            .unwrap()
            .value;
        assert_eq!(balance.available, dec!(1000));
        assert_eq!(balance.reserved, dec!(0));
    }

    #[test]
    fn test_validation_fault_refuses_intent() {
        let (mut engine, mut execution_rx) = engine(Vec::new(), TradingState::Enabled);

        let audit = engine.process(submit_intent(dec!(0), dec!(0.40)));
        assert!(matches!(
            audit.kind.as_process().outputs.as_slice(),
            [EngineOutput::IntentRefused(RiskRefused {
                reason: RefuseReason::NonPositiveQuantity(_),
                ..
            })]
        ));
        assert!(execution_rx.try_recv().is_err());
    }

    #[test]
    fn test_trading_disabled_suppresses_strategy_orders() {
        let strategy = ProbabilityStrategy::new(ProbabilityConfig {
            min_total_probability: dec!(0.5),
            safe_total_probability: dec!(0.8),
            ..ProbabilityConfig::default()
        })
        .unwrap();

        let probability_event = EngineEvent::Market(MarketEvent::new(
            test_utils::instrument_index(),
            Utc::now(),
            MarketEventKind::Probability(dec!(0.9)),
        ));

        // Disabled：状态更新但不生成订单
        let (mut engine, mut execution_rx) =
            engine(vec![Box::new(strategy)], TradingState::Disabled);
        engine.process(probability_event.clone());
        assert!(execution_rx.try_recv().is_err());

        // Enabled：同一事件生成订单
        engine.process(EngineEvent::TradingStateUpdate(TradingState::Enabled));
        engine.process(probability_event);
        assert!(matches!(
            execution_rx.try_recv().unwrap(),
            ExecutionRequest::Open(_)
        ));
    }

    #[test]
    fn test_account_event_triggers_strategy_reevaluation() {
        let strategy = ProbabilityStrategy::new(ProbabilityConfig {
            min_total_probability: dec!(0.5),
            safe_total_probability: dec!(0.8),
            ..ProbabilityConfig::default()
        })
        .unwrap();

        // 初始预算不足最小订单量，市场事件不触发下单
        let (mut engine, mut execution_rx) =
            engine_with_usdc(vec![Box::new(strategy)], TradingState::Enabled, 0.5);
        engine.process(EngineEvent::Market(MarketEvent::new(
            test_utils::instrument_index(),
            Utc::now(),
            MarketEventKind::Probability(dec!(0.9)),
        )));
        assert!(execution_rx.try_recv().is_err());

        // 余额快照补足预算：账户事件同样路由策略评估，订单随即生成
        engine.process(EngineEvent::Account(AccountEvent::new(
            test_utils::account_index(),
            AccountEventKind::BalanceSnapshot(Snapshot(AssetBalance::new(
                AssetName::new("usdc"),
                Balance::unreserved(dec!(1000)),
                test_utils::time_plus_secs(Utc::now(), 10),
            ))),
        )));
        assert!(matches!(
            execution_rx.try_recv().unwrap(),
            ExecutionRequest::Open(_)
        ));
    }

    #[test]
    fn test_cautious_probability_surfaces_advisory() {
        let strategy = ProbabilityStrategy::new(ProbabilityConfig {
            min_total_probability: dec!(0.5),
            safe_total_probability: dec!(0.8),
            ..ProbabilityConfig::default()
        })
        .unwrap();

        let (mut engine, mut execution_rx) =
            engine(vec![Box::new(strategy)], TradingState::Enabled);
        let audit = engine.process(EngineEvent::Market(MarketEvent::new(
            test_utils::instrument_index(),
            Utc::now(),
            MarketEventKind::Probability(dec!(0.7)),
        )));

        assert!(audit.kind.as_process().outputs.iter().any(|output| matches!(
            output,
            EngineOutput::Advisory(advisory) if advisory.signal == AdvisorySignal::Cautious
        )));
        assert!(execution_rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_command_routes_to_execution() {
        let (mut engine, mut execution_rx) = engine(Vec::new(), TradingState::Enabled);

        engine.process(submit_intent(dec!(100), dec!(0.40)));
        let order_id = engine.state.orders.open_orders()[0].id.clone();
        execution_rx.try_recv().unwrap();

        let audit = engine.process(EngineEvent::Command(Command::CancelOrder(order_id.clone())));
        assert!(matches!(
            audit.kind.as_process().outputs.as_slice(),
            [EngineOutput::CancelRequested(id)] if *id == order_id
        ));
        assert!(matches!(
            execution_rx.try_recv().unwrap(),
            ExecutionRequest::Cancel(CancelRequest { .. })
        ));

        let audit = engine.process(EngineEvent::Command(Command::CancelOrder(OrderId::new(
            "missing",
        ))));
        assert!(matches!(
            audit.kind.as_process().outputs.as_slice(),
            [EngineOutput::CommandRejected { .. }]
        ));
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let (mut engine, _execution_rx) = engine(Vec::new(), TradingState::Enabled);
        let audit = engine.process(EngineEvent::shutdown());
        assert!(audit.kind.is_terminal());
    }

    #[test]
    fn test_sequence_increments_per_event() {
        let (mut engine, _execution_rx) = engine(Vec::new(), TradingState::Enabled);
        let first = engine.process(EngineEvent::TradingStateUpdate(TradingState::Enabled));
        let second = engine.process(EngineEvent::TradingStateUpdate(TradingState::Enabled));
        assert_eq!(first.sequence.value() + 1, second.sequence.value());
    }
}
