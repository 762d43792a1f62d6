use crate::Terminal;
use serde::{Deserialize, Serialize};

/// 表示组件应当优雅关闭的信号。
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize,
)]
pub struct Shutdown;

impl Terminal for Shutdown {
    fn is_terminal(&self) -> bool {
        true
    }
}

/// 表示某个异步组件已完成关闭，携带关闭的最终结果。
#[derive(Debug)]
pub struct ShutdownComplete<Error> {
    /// 关闭的最终结果。
    pub result: Result<(), Error>,
}
