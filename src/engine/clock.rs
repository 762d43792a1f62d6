use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// 为引擎提供时间的抽象，使实时运行与确定性回放共用同一套处理逻辑。
pub trait EngineClock
where
    Self: std::fmt::Debug + Send,
{
    /// 当前引擎时间。
    fn time(&self) -> DateTime<Utc>;
}

/// 实时时钟。
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveClock;

impl EngineClock for LiveClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 回放时钟，时间随处理的事件推进。
#[derive(Debug, Clone)]
pub struct HistoricalClock {
    time: Arc<RwLock<DateTime<Utc>>>,
}

impl HistoricalClock {
    /// 以给定起始时间创建回放时钟。
    pub fn new(time_start: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(RwLock::new(time_start)),
        }
    }

    /// 用事件时间推进时钟，时间只前进不后退。
    pub fn advance(&self, time: DateTime<Utc>) {
        let mut current = self.time.write();
        if time > *current {
            *current = time;
        }
    }
}

impl EngineClock for HistoricalClock {
    fn time(&self) -> DateTime<Utc> {
        *self.time.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::time_plus_secs;

    #[test]
    fn test_historical_clock_never_goes_backwards() {
        let start = Utc::now();
        let clock = HistoricalClock::new(start);

        clock.advance(time_plus_secs(start, 10));
        assert_eq!(clock.time(), time_plus_secs(start, 10));

        clock.advance(time_plus_secs(start, 5));
        assert_eq!(clock.time(), time_plus_secs(start, 10));
    }
}
