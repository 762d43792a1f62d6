use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    EngineEvent, Terminal,
    engine::Processor,
    event::{
        EventId, GatewayEvent, GatewayEventKind,
        journal::{EventJournal, EventRecord},
    },
    instrument::{AccountIndex, InstrumentIndex},
};

/// 事件的串行化分区键。
///
/// 市场事件按交易对分区，账户/订单事件按账户分区。同一分区内事件严格按接收顺序
/// 串行处理，不同分区并行。
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PartitionKey {
    /// 按交易对分区
    Instrument(InstrumentIndex),
    /// 按账户分区
    Account(AccountIndex),
}

/// 容量有界的去重登记表，超出容量后淘汰最旧的标识符。
#[derive(Debug)]
struct DedupRegistry {
    seen: FnvHashSet<EventId>,
    order: VecDeque<EventId>,
    capacity: usize,
}

impl DedupRegistry {
    fn new(capacity: usize) -> Self {
        Self {
            seen: FnvHashSet::default(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    /// 登记标识符，容量满时淘汰最旧的。
    fn register(&mut self, id: EventId) {
        if self.seen.contains(&id) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
    }
}

/// [`EventDispatcher::ingest`] 的结果。
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IngestOutcome {
    /// 事件已持久化并路由到分区
    Routed(PartitionKey),
    /// 重复投递，整体无操作
    Duplicate,
    /// 事件已持久化但无法路由，已标记为降级
    Unroutable,
}

/// 分区化事件接入主干。
///
/// 每个事件的处理顺序固定：去重 → 持久化 → 路由。持久化先于路由完成，确保日志是
/// 事后分析的事实来源；路由失败不回滚持久化，事件被标记为降级。
///
/// 分区队列有界，队列满时 `ingest` 挂起，把背压传导给事件源。
#[derive(Debug)]
pub struct EventDispatcher {
    journal: Arc<dyn EventJournal>,
    dedup: Mutex<DedupRegistry>,
    partitions: FnvHashMap<PartitionKey, mpsc::Sender<EngineEvent>>,
}

impl EventDispatcher {
    /// 创建 Dispatcher。
    pub fn new(journal: Arc<dyn EventJournal>, dedup_capacity: usize) -> Self {
        Self {
            journal,
            dedup: Mutex::new(DedupRegistry::new(dedup_capacity)),
            partitions: FnvHashMap::default(),
        }
    }

    /// 注册一个分区及其消费引擎，返回消费任务的句柄。
    ///
    /// 消费任务串行处理队列中的事件，遇到终端事件后返回引擎（携带最终状态）。
    pub fn add_partition<E>(
        &mut self,
        key: PartitionKey,
        queue_capacity: usize,
        mut engine: E,
    ) -> JoinHandle<E>
    where
        E: Processor<EngineEvent> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(queue_capacity);
        self.partitions.insert(key, tx);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                let _audit = engine.process(event);
                if terminal {
                    break;
                }
            }
            engine
        })
    }

    /// 接入一个规范化网关事件：去重 → 持久化 → 按分区键路由。
    ///
    /// 标识符在路由成功后才登记去重：首次投递未能应用（无分区、消费者已退出）的
    /// 事件重投时仍会被路由。
    pub async fn ingest(&self, event: GatewayEvent) -> IngestOutcome {
        if self.dedup.lock().contains(&event.id) {
            debug!(id = %event.id, "duplicate event ignored");
            return IngestOutcome::Duplicate;
        }

        self.journal.append(EventRecord::from_gateway_event(&event));

        let GatewayEvent { id, kind, .. } = event;
        let (key, engine_event) = match kind {
            GatewayEventKind::Market(market) => (
                PartitionKey::Instrument(market.instrument),
                EngineEvent::Market(market),
            ),
            GatewayEventKind::Account(account) => (
                PartitionKey::Account(account.account),
                EngineEvent::Account(account),
            ),
        };

        let Some(tx) = self.partitions.get(&key) else {
            warn!(%id, ?key, "no partition registered for event, marked degraded");
            self.journal.mark_degraded(&id);
            return IngestOutcome::Unroutable;
        };

        if tx.send(engine_event).await.is_err() {
            warn!(%id, ?key, "partition consumer terminated, marked degraded");
            self.journal.mark_degraded(&id);
            return IngestOutcome::Unroutable;
        }

        self.dedup.lock().register(id);
        IngestOutcome::Routed(key)
    }

    /// 向指定分区投递一个引擎事件（命令、交易开关等）。
    pub async fn send(&self, key: PartitionKey, event: EngineEvent) -> bool {
        match self.partitions.get(&key) {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// 向所有分区广播一个引擎事件。
    pub async fn broadcast(&self, event: EngineEvent) {
        for tx in self.partitions.values() {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// 向所有分区广播关闭事件。
    pub async fn shutdown(&self) {
        self.broadcast(EngineEvent::shutdown()).await;
    }
}
