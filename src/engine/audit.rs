use chrono::{DateTime, Utc};
use derive_more::Constructor;

use crate::{Sequence, Terminal};

/// 带引擎上下文（序列号与时间）的审计记录。
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Constructor)]
pub struct AuditTick<Kind> {
    /// 处理该事件时的引擎序列号
    pub sequence: Sequence,
    /// 处理该事件时的引擎时间
    pub time_engine: DateTime<Utc>,
    /// 审计内容
    pub kind: Kind,
}

/// 引擎处理一个事件产生的审计。
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAudit<Event, Output> {
    /// 事件已处理
    Process(ProcessAudit<Event, Output>),
    /// 事件已处理且为终端事件，分区消费者应当退出
    Terminated(ProcessAudit<Event, Output>),
}

impl<Event, Output> EngineAudit<Event, Output> {
    /// 从处理结果构造审计，根据 `terminal` 决定变体。
    pub fn from_process(event: Event, outputs: Vec<Output>, terminal: bool) -> Self {
        let audit = ProcessAudit { event, outputs };
        if terminal {
            Self::Terminated(audit)
        } else {
            Self::Process(audit)
        }
    }

    /// 处理结果的引用。
    pub fn as_process(&self) -> &ProcessAudit<Event, Output> {
        match self {
            Self::Process(audit) | Self::Terminated(audit) => audit,
        }
    }
}

impl<Event, Output> Terminal for EngineAudit<Event, Output> {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// 单个事件的处理结果。
#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct ProcessAudit<Event, Output> {
    /// 被处理的事件
    pub event: Event,
    /// 处理产生的输出
    pub outputs: Vec<Output>,
}
