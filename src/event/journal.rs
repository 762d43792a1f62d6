use chrono::{DateTime, Utc};
use derive_more::Constructor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::VecDeque;
use tracing::warn;

use super::{EventId, GatewayEvent};

/// 只追加的事件日志中的一条记录。
///
/// 记录写入后不再修改，唯一的例外是 `degraded` 标记：当事件因下游阶段失败未被完整处理时，
/// 该事件被标记为降级，供人工对账使用。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct EventRecord {
    /// 事件的稳定去重标识符
    pub id: EventId,
    /// 事件名称
    pub name: SmolStr,
    /// 事件被记录的时间
    pub time: DateTime<Utc>,
    /// 事件内容（结构化负载）
    pub payload: serde_json::Value,
    /// 事件是否未被完整处理
    pub degraded: bool,
}

impl EventRecord {
    /// 从规范化网关事件构造日志记录。
    pub fn from_gateway_event(event: &GatewayEvent) -> Self {
        let name = match &event.kind {
            super::GatewayEventKind::Market(_) => SmolStr::new_static("market"),
            super::GatewayEventKind::Account(_) => SmolStr::new_static("account"),
        };

        // 序列化失败只可能来自非字符串 map 键，事件类型不含这类结构
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);

        Self {
            id: event.id.clone(),
            name,
            time: event.time_received,
            payload,
            degraded: false,
        }
    }
}

/// 只追加事件日志的抽象。
///
/// Dispatcher 在路由任何事件之前必须先完成日志写入，日志是事后分析的事实来源。
pub trait EventJournal
where
    Self: std::fmt::Debug + Send + Sync,
{
    /// 追加一条记录。
    fn append(&self, record: EventRecord);

    /// 将指定事件标记为降级（未被完整处理）。
    fn mark_degraded(&self, id: &EventId);

    /// 写入一条运维告警记录（一致性故障、人工审核升级等）。
    fn alert(&self, name: &str, payload: serde_json::Value, time: DateTime<Utc>);
}

/// 内存实现的事件日志，容量有界，超出后淘汰最旧的记录。
#[derive(Debug)]
pub struct InMemoryJournal {
    records: RwLock<VecDeque<EventRecord>>,
    capacity: usize,
}

impl InMemoryJournal {
    /// 创建一个容量有界的 [`InMemoryJournal`]。
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// 获取最近 `n` 条记录的克隆（最旧在前）。
    pub fn recent(&self, n: usize) -> Vec<EventRecord> {
        let records = self.records.read();
        records
            .iter()
            .skip(records.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    /// 当前记录数量。
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// 日志是否为空。
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl EventJournal for InMemoryJournal {
    fn append(&self, record: EventRecord) {
        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn mark_degraded(&self, id: &EventId) {
        let mut records = self.records.write();
        match records.iter_mut().rev().find(|record| &record.id == id) {
            Some(record) => record.degraded = true,
            None => warn!(%id, "cannot mark degraded: event not present in journal"),
        }
    }

    fn alert(&self, name: &str, payload: serde_json::Value, time: DateTime<Utc>) {
        warn!(alert = %name, ?payload, "operator alert raised");
        self.append(EventRecord {
            id: EventId::new(format!("alert:{name}:{}", time.timestamp_nanos_opt().unwrap_or(0))),
            name: SmolStr::new(format!("alert.{name}")),
            time,
            payload,
            degraded: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str) -> EventRecord {
        EventRecord {
            id: EventId::new(id),
            name: SmolStr::new_static("market"),
            time: Utc::now(),
            payload: serde_json::Value::Null,
            degraded: false,
        }
    }

    #[test]
    fn test_journal_append_and_recent() {
        let journal = InMemoryJournal::new(10);
        journal.append(record("a"));
        journal.append(record("b"));

        let recent = journal.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, EventId::new("a"));
        assert_eq!(recent[1].id, EventId::new("b"));
    }

    #[test]
    fn test_journal_capacity_evicts_oldest() {
        let journal = InMemoryJournal::new(2);
        journal.append(record("a"));
        journal.append(record("b"));
        journal.append(record("c"));

        let recent = journal.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, EventId::new("b"));
    }

    #[test]
    fn test_journal_mark_degraded() {
        let journal = InMemoryJournal::new(10);
        journal.append(record("a"));
        journal.mark_degraded(&EventId::new("a"));
        assert!(journal.recent(1)[0].degraded);
    }
}
