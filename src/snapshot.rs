use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// 表示某个类型 `T` 在某一时刻的不可变快照。
///
/// 策略与风险组件只消费快照，不持有可变状态的引用，以消除决策与执行上下文之间的竞争。
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Constructor,
)]
pub struct Snapshot<T>(pub T);

impl<T> Snapshot<T> {
    /// 获取快照内部值的引用。
    pub fn value(&self) -> &T {
        &self.0
    }

    /// 从 `Snapshot<T>` 构造 `Snapshot<&T>`。
    pub fn as_ref(&self) -> Snapshot<&T> {
        Snapshot(&self.0)
    }

    /// 消费快照，映射内部值。
    pub fn map<F, O>(self, op: F) -> Snapshot<O>
    where
        F: FnOnce(T) -> O,
    {
        Snapshot(op(self.0))
    }
}

impl<T> From<T> for Snapshot<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}
