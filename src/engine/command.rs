use serde::{Deserialize, Serialize};

use crate::{engine::state::order::OrderId, strategy::OrderIntent};

/// 外部进程向引擎发送的命令。
///
/// 命令走与网关事件相同的分区队列，与该分区的其它事件保持串行。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Command {
    /// 提交一个订单意图，经历与策略生成订单相同的前置检查与预留流程
    SubmitOrder(OrderIntent),
    /// 请求撤销一个在途订单
    CancelOrder(OrderId),
}
