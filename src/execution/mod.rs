use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    engine::state::order::{GatewayOrderId, OrderId},
    event::{CancelAccepted, OrderAccepted},
    instrument::GatewayId,
};

use self::{
    error::GatewayError,
    request::{CancelRequest, OpenRequest, StatusPollRequest},
};

/// 执行层错误。
pub mod error;

/// 执行层的异步运行循环。
pub mod manager;

/// 引擎发往执行层的请求类型。
pub mod request;

/// 状态查询返回的订单视图。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderStatusReport {
    /// 引擎侧订单标识符
    pub order_id: OrderId,
    /// 网关分配的订单标识符
    pub gateway_order_id: GatewayOrderId,
    /// 网关报告的累计成交数量
    pub filled_quantity: Decimal,
    /// 订单是否仍在网关侧工作
    pub open: bool,
}

/// 单一网关的提交接口。
///
/// 每个网关一个实现，负责协议细节；重试、超时与对账由 [`manager::ExecutionManager`] 统一处理。
pub trait GatewayClient
where
    Self: Debug + Clone + Send + Sync + 'static,
{
    /// 该实现服务的网关。
    fn gateway(&self) -> &GatewayId;

    /// 提交新订单。
    fn submit_order(
        &self,
        request: &OpenRequest,
    ) -> impl Future<Output = Result<OrderAccepted, GatewayError>> + Send;

    /// 撤销在途订单。
    fn cancel_order(
        &self,
        request: &CancelRequest,
    ) -> impl Future<Output = Result<CancelAccepted, GatewayError>> + Send;

    /// 查询订单状态（超时后的对账路径）。
    fn order_status(
        &self,
        request: &StatusPollRequest,
    ) -> impl Future<Output = Result<OrderStatusReport, GatewayError>> + Send;
}

/// 测试与演练用的脚本化网关行为。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehaviour {
    /// 接受所有请求
    AcceptAll,
    /// 拒绝所有请求
    RejectAll,
    /// 永不响应（触发超时路径），状态查询报告订单已被接受
    SilentThenFound,
    /// 永不响应，状态查询也查无此单（触发重试与升级路径）
    SilentAndLost,
}

/// 脚本化的 [`GatewayClient`] 实现。
#[derive(Debug, Clone)]
pub struct MockGatewayClient {
    gateway: GatewayId,
    behaviour: MockBehaviour,
    counter: Arc<AtomicU64>,
}

impl MockGatewayClient {
    /// 以给定行为创建脚本化网关。
    pub fn new(gateway: GatewayId, behaviour: MockBehaviour) -> Self {
        Self {
            gateway,
            behaviour,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_gateway_order_id(&self) -> GatewayOrderId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        GatewayOrderId::new(format!("{}-gw-{n}", self.gateway))
    }
}

impl GatewayClient for MockGatewayClient {
    fn gateway(&self) -> &GatewayId {
        &self.gateway
    }

    async fn submit_order(&self, request: &OpenRequest) -> Result<OrderAccepted, GatewayError> {
        match self.behaviour {
            MockBehaviour::AcceptAll => Ok(OrderAccepted::new(
                request.order_id.clone(),
                self.next_gateway_order_id(),
            )),
            MockBehaviour::RejectAll => {
                Err(GatewayError::Rejected("scripted rejection".to_string()))
            }
            MockBehaviour::SilentThenFound | MockBehaviour::SilentAndLost => {
                std::future::pending().await
            }
        }
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<CancelAccepted, GatewayError> {
        match self.behaviour {
            MockBehaviour::AcceptAll => Ok(CancelAccepted::new(request.order_id.clone())),
            MockBehaviour::RejectAll => {
                Err(GatewayError::Rejected("scripted rejection".to_string()))
            }
            MockBehaviour::SilentThenFound | MockBehaviour::SilentAndLost => {
                std::future::pending().await
            }
        }
    }

    async fn order_status(
        &self,
        request: &StatusPollRequest,
    ) -> Result<OrderStatusReport, GatewayError> {
        match self.behaviour {
            MockBehaviour::AcceptAll | MockBehaviour::SilentThenFound => Ok(OrderStatusReport {
                order_id: request.order_id.clone(),
                gateway_order_id: request
                    .gateway_order_id
                    .clone()
                    .unwrap_or_else(|| self.next_gateway_order_id()),
                filled_quantity: Decimal::ZERO,
                open: true,
            }),
            MockBehaviour::RejectAll | MockBehaviour::SilentAndLost => {
                Err(GatewayError::OrderNotFound)
            }
        }
    }
}
