use chrono::Utc;
use futures::{StreamExt, stream::FuturesUnordered};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{future::Future, pin::Pin, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    channel::{Tx, UnboundedTx},
    event::{AccountEvent, AccountEventKind, EventId, GatewayEvent, OrderAccepted, OrderRejected},
    execution::{
        GatewayClient, OrderStatusReport,
        error::GatewayError,
        request::{CancelRequest, ExecutionRequest, OpenRequest, RequestFuture, StatusPollRequest},
    },
};

/// 提交重试的参数。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次提交）
    pub max_attempts: u32,
    /// 首次重试前的退避时长
    pub initial_backoff: Duration,
    /// 每次重试退避的倍增系数
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次尝试后的退避时长（指数退避）。
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * self.backoff_multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

/// 执行层运行循环。
///
/// 消费引擎的 [`ExecutionRequest`]，并发地向网关提交，把网关响应转换为规范化的
/// [`GatewayEvent`] 回流到 Dispatcher。
///
/// ## 超时语义
/// 提交超时不视为失败：结果未知，进入状态查询对账。查询确认订单未落地才重试提交，
/// 重试预算耗尽后升级为带人工审核标记的拒绝事件。
#[derive(Debug)]
pub struct ExecutionManager<Client> {
    client: Client,
    request_rx: mpsc::UnboundedReceiver<ExecutionRequest>,
    response_tx: UnboundedTx<GatewayEvent>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

type WorkFuture = Pin<Box<dyn Future<Output = Vec<GatewayEvent>> + Send>>;

impl<Client> ExecutionManager<Client>
where
    Client: GatewayClient,
{
    /// 创建执行管理器。
    pub fn new(
        client: Client,
        request_rx: mpsc::UnboundedReceiver<ExecutionRequest>,
        response_tx: UnboundedTx<GatewayEvent>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            request_rx,
            response_tx,
            request_timeout,
            retry,
        }
    }

    /// 运行直到请求通道关闭且所有在途请求完成。
    pub async fn run(mut self) {
        let mut in_flight: FuturesUnordered<WorkFuture> = FuturesUnordered::new();

        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(request) => in_flight.push(self.work(request)),
                    None => break,
                },
                Some(events) = in_flight.next() => self.emit(events),
            }
        }

        // 通道已关闭，排干在途请求
        while let Some(events) = in_flight.next().await {
            self.emit(events);
        }

        info!("ExecutionManager shutdown complete");
    }

    fn work(&self, request: ExecutionRequest) -> WorkFuture {
        let client = self.client.clone();
        let timeout = self.request_timeout;
        let retry = self.retry.clone();
        match request {
            ExecutionRequest::Open(request) => {
                Box::pin(Self::execute_open(client, request, timeout, retry))
            }
            ExecutionRequest::Cancel(request) => {
                Box::pin(Self::execute_cancel(client, request, timeout, retry))
            }
            ExecutionRequest::StatusPoll(request) => {
                Box::pin(Self::execute_status_poll(client, request, timeout))
            }
        }
    }

    fn emit(&self, events: Vec<GatewayEvent>) {
        for event in events {
            if self.response_tx.send(event).is_err() {
                error!("execution response channel terminated, event dropped");
            }
        }
    }

    async fn execute_open(
        client: Client,
        request: OpenRequest,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Vec<GatewayEvent> {
        let mut attempt = 1u32;
        loop {
            let submit =
                RequestFuture::new(client.submit_order(&request), timeout, &request).await;

            match submit {
                Ok(Ok(accepted)) => {
                    return vec![ack_event(client.gateway(), request.account, accepted)];
                }
                Ok(Err(err)) if !err.is_retryable() => {
                    warn!(order_id = %request.order_id, %err, "gateway rejected submission");
                    return vec![reject_event(
                        client.gateway(),
                        request.account,
                        request.order_id.clone(),
                        err.to_string(),
                        false,
                    )];
                }
                Ok(Err(err)) => {
                    warn!(order_id = %request.order_id, %err, attempt, "transient submission failure");
                }
                Err(timed_out) => {
                    // 结果未知：提交可能已落地，先查询再决定是否重试
                    warn!(
                        order_id = %timed_out.order_id,
                        attempt,
                        "submission timed out, outcome unknown, reconciling via status poll"
                    );
                    let poll = StatusPollRequest::new(
                        request.order_id.clone(),
                        request.account,
                        request.gateway.clone(),
                        request.symbol.clone(),
                        None,
                    );
                    match RequestFuture::new(client.order_status(&poll), timeout, &poll).await {
                        Ok(Ok(report)) => {
                            info!(order_id = %request.order_id, "status poll confirmed submission");
                            return vec![ack_event_from_report(
                                client.gateway(),
                                request.account,
                                report,
                            )];
                        }
                        Ok(Err(GatewayError::OrderNotFound)) => {
                            info!(order_id = %request.order_id, "status poll confirmed order absent, retrying");
                        }
                        Ok(Err(err)) => {
                            warn!(order_id = %request.order_id, %err, "status poll failed, outcome still unknown");
                        }
                        Err(_) => {
                            warn!(order_id = %request.order_id, "status poll timed out, outcome still unknown");
                        }
                    }
                }
            }

            if attempt >= retry.max_attempts {
                error!(
                    order_id = %request.order_id,
                    attempts = attempt,
                    "retry budget exhausted, escalating to rejection with manual review"
                );
                return vec![reject_event(
                    client.gateway(),
                    request.account,
                    request.order_id.clone(),
                    format!("submission outcome unknown after {attempt} attempts"),
                    true,
                )];
            }

            tokio::time::sleep(retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    async fn execute_cancel(
        client: Client,
        request: CancelRequest,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Vec<GatewayEvent> {
        let mut attempt = 1u32;
        loop {
            match RequestFuture::new(client.cancel_order(&request), timeout, &request).await {
                Ok(Ok(accepted)) => {
                    let event = GatewayEvent::new(
                        EventId::from_content(
                            client.gateway(),
                            &("cancel", accepted.order_id.to_string()),
                        ),
                        client.gateway().clone(),
                        Utc::now(),
                        crate::event::GatewayEventKind::Account(AccountEvent::new(
                            request.account,
                            AccountEventKind::CancelAccepted(accepted),
                        )),
                    );
                    return vec![event];
                }
                Ok(Err(err)) if !err.is_retryable() => {
                    error!(order_id = %request.order_id, %err, "cancel rejected by gateway, order remains working");
                    return Vec::new();
                }
                Ok(Err(err)) => {
                    warn!(order_id = %request.order_id, %err, attempt, "transient cancel failure");
                }
                Err(_) => {
                    warn!(order_id = %request.order_id, attempt, "cancel timed out");
                }
            }

            if attempt >= retry.max_attempts {
                error!(
                    order_id = %request.order_id,
                    attempts = attempt,
                    "cancel retry budget exhausted, order remains working"
                );
                return Vec::new();
            }

            tokio::time::sleep(retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    async fn execute_status_poll(
        client: Client,
        request: StatusPollRequest,
        timeout: Duration,
    ) -> Vec<GatewayEvent> {
        match RequestFuture::new(client.order_status(&request), timeout, &request).await {
            Ok(Ok(report)) => vec![ack_event_from_report(
                client.gateway(),
                request.account,
                report,
            )],
            Ok(Err(err)) => {
                warn!(order_id = %request.order_id, %err, "status poll failed");
                Vec::new()
            }
            Err(_) => {
                warn!(order_id = %request.order_id, "status poll timed out");
                Vec::new()
            }
        }
    }
}

fn ack_event(
    gateway: &crate::instrument::GatewayId,
    account: crate::instrument::AccountIndex,
    accepted: OrderAccepted,
) -> GatewayEvent {
    GatewayEvent::new(
        EventId::from_content(
            gateway,
            &("ack", accepted.order_id.to_string(), accepted.gateway_order_id.to_string()),
        ),
        gateway.clone(),
        Utc::now(),
        crate::event::GatewayEventKind::Account(AccountEvent::new(
            account,
            AccountEventKind::OrderAccepted(accepted),
        )),
    )
}

fn ack_event_from_report(
    gateway: &crate::instrument::GatewayId,
    account: crate::instrument::AccountIndex,
    report: OrderStatusReport,
) -> GatewayEvent {
    ack_event(
        gateway,
        account,
        OrderAccepted::new(report.order_id, report.gateway_order_id),
    )
}

fn reject_event(
    gateway: &crate::instrument::GatewayId,
    account: crate::instrument::AccountIndex,
    order_id: crate::engine::state::order::OrderId,
    reason: String,
    manual_review: bool,
) -> GatewayEvent {
    GatewayEvent::new(
        EventId::from_content(gateway, &("reject", order_id.to_string(), manual_review)),
        gateway.clone(),
        Utc::now(),
        crate::event::GatewayEventKind::Account(AccountEvent::new(
            account,
            AccountEventKind::OrderRejected(OrderRejected::new(
                order_id,
                SmolStr::new(reason),
                manual_review,
            )),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::mpsc_unbounded,
        engine::state::order::{OrderId, OrderKind},
        execution::{MockBehaviour, MockGatewayClient},
        instrument::{GatewayId, InstrumentSymbol, Side},
        test_utils,
    };
    use rust_decimal_macros::dec;

    fn open_request() -> OpenRequest {
        OpenRequest::new(
            OrderId::new("order-1"),
            test_utils::account_index(),
            test_utils::instrument_index(),
            InstrumentSymbol::new("market_a_yes"),
            GatewayId::new("mock"),
            Side::Buy,
            OrderKind::Limit,
            dec!(100),
            Some(dec!(0.40)),
        )
    }

    fn manager(
        behaviour: MockBehaviour,
    ) -> (
        mpsc::UnboundedSender<ExecutionRequest>,
        mpsc::UnboundedReceiver<GatewayEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let client = MockGatewayClient::new(GatewayId::new("mock"), behaviour);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc_unbounded();
        let manager = ExecutionManager::new(
            client,
            request_rx,
            response_tx,
            Duration::from_millis(100),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(10),
                backoff_multiplier: 2,
            },
        );
        let handle = tokio::spawn(manager.run());
        (request_tx, response_rx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_submission_emits_ack() {
        let (request_tx, mut response_rx, handle) = manager(MockBehaviour::AcceptAll);

        request_tx
            .send(ExecutionRequest::Open(open_request()))
            .unwrap();
        let event = response_rx.recv().await.unwrap();

        assert!(matches!(
            event.kind,
            crate::event::GatewayEventKind::Account(AccountEvent {
                kind: AccountEventKind::OrderAccepted(_),
                ..
            })
        ));

        drop(request_tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_rejection_emits_reject_without_manual_review() {
        let (request_tx, mut response_rx, handle) = manager(MockBehaviour::RejectAll);

        request_tx
            .send(ExecutionRequest::Open(open_request()))
            .unwrap();
        let event = response_rx.recv().await.unwrap();

        assert!(matches!(
            event.kind,
            crate::event::GatewayEventKind::Account(AccountEvent {
                kind: AccountEventKind::OrderRejected(OrderRejected {
                    manual_review: false,
                    ..
                }),
                ..
            })
        ));

        drop(request_tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reconciled_via_status_poll() {
        let (request_tx, mut response_rx, handle) = manager(MockBehaviour::SilentThenFound);

        request_tx
            .send(ExecutionRequest::Open(open_request()))
            .unwrap();
        let event = response_rx.recv().await.unwrap();

        // 提交超时，但状态查询发现订单已落地
        assert!(matches!(
            event.kind,
            crate::event::GatewayEventKind::Account(AccountEvent {
                kind: AccountEventKind::OrderAccepted(_),
                ..
            })
        ));

        drop(request_tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_escalates_with_manual_review() {
        let (request_tx, mut response_rx, handle) = manager(MockBehaviour::SilentAndLost);

        request_tx
            .send(ExecutionRequest::Open(open_request()))
            .unwrap();
        let event = response_rx.recv().await.unwrap();

        assert!(matches!(
            event.kind,
            crate::event::GatewayEventKind::Account(AccountEvent {
                kind: AccountEventKind::OrderRejected(OrderRejected {
                    manual_review: true,
                    ..
                }),
                ..
            })
        ));

        drop(request_tx);
        handle.await.unwrap();
    }

    #[test]
    fn test_retry_policy_exponential_backoff() {
        let retry = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }
}
