use derive_more::{Constructor, From};
use pin_project::pin_project;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Timeout, timeout};

use crate::{
    engine::state::order::{GatewayOrderId, OrderId, OrderKind},
    instrument::{AccountIndex, GatewayId, InstrumentIndex, InstrumentSymbol, Side},
};

/// 引擎发往执行层的请求。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum ExecutionRequest {
    /// 向网关提交新订单
    Open(OpenRequest),
    /// 请求撤销在途订单
    Cancel(CancelRequest),
    /// 显式查询订单状态（对账）
    StatusPoll(StatusPollRequest),
}

/// 新订单提交请求。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OpenRequest {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 下单账户
    pub account: AccountIndex,
    /// 交易对
    pub instrument: InstrumentIndex,
    /// 网关侧交易对符号
    pub symbol: InstrumentSymbol,
    /// 目标网关
    pub gateway: GatewayId,
    /// 买卖方向
    pub side: Side,
    /// 订单类型
    pub kind: OrderKind,
    /// 数量
    pub quantity: Decimal,
    /// 限价（市价单为 None）
    pub price: Option<Decimal>,
}

/// 撤销请求。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct CancelRequest {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 下单账户
    pub account: AccountIndex,
    /// 目标网关
    pub gateway: GatewayId,
    /// 网关侧交易对符号
    pub symbol: InstrumentSymbol,
    /// 网关分配的订单标识符（尚未确认时为 None）
    pub gateway_order_id: Option<GatewayOrderId>,
}

/// 订单状态查询请求。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct StatusPollRequest {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 下单账户
    pub account: AccountIndex,
    /// 目标网关
    pub gateway: GatewayId,
    /// 网关侧交易对符号
    pub symbol: InstrumentSymbol,
    /// 网关分配的订单标识符（尚未确认时为 None）
    pub gateway_order_id: Option<GatewayOrderId>,
}

impl ExecutionRequest {
    /// 关联的引擎侧订单标识符。
    pub fn order_id(&self) -> &OrderId {
        match self {
            Self::Open(request) => &request.order_id,
            Self::Cancel(request) => &request.order_id,
            Self::StatusPoll(request) => &request.order_id,
        }
    }
}

/// 为网关调用附加超时的 Future。
///
/// 超时不代表失败：提交可能已被网关接受。因此超时返回原始请求本身，
/// 由调用方进入"结果未知"的对账流程。
#[pin_project]
#[derive(Debug)]
pub struct RequestFuture<F, Request> {
    #[pin]
    future: Timeout<F>,
    request: Option<Request>,
}

impl<F, Request> RequestFuture<F, Request>
where
    F: Future,
{
    /// 包装网关调用，附加超时。
    pub fn new(future: F, duration: Duration, request: Request) -> Self {
        Self {
            future: timeout(duration, future),
            request: Some(request),
        }
    }
}

impl<F, Request> Future for RequestFuture<F, Request>
where
    F: Future,
{
    type Output = Result<F::Output, Request>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.future.poll(cx) {
            Poll::Ready(Ok(output)) => Poll::Ready(Ok(output)),
            Poll::Ready(Err(_elapsed)) => Poll::Ready(Err(this
                .request
                .take()
                .expect("RequestFuture polled after completion"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_request_future_returns_output_before_timeout() {
        let future = RequestFuture::new(
            async { 7u64 },
            Duration::from_secs(1),
            "request",
        );
        assert_eq!(future.await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_future_returns_request_on_timeout() {
        let future = RequestFuture::new(
            std::future::pending::<u64>(),
            Duration::from_secs(1),
            "request",
        );
        assert_eq!(future.await, Err("request"));
    }
}
