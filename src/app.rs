//! 门户应用层
//!
//! [`HelpdeskClient`] 在调用处组合各个弹性控制器：
//! 创建工单经过审计和熔断，工单预取走批量合并，工单列表刷新按用户去重。

use std::sync::Arc;
use std::time::Duration;

use portal_config::ResilienceConfig;
use portal_core::{
    AuditContext, AuditFilter, AuditLog, BatchCoalescer, CircuitBreaker, CircuitState,
    Deduplicator, NotificationSink, PortalError, PortalResult, RequestResult,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::helpdesk::{HelpdeskBackend, NewTicket, Ticket};

/// 工单服务客户端
pub struct HelpdeskClient {
    backend: Arc<dyn HelpdeskBackend>,
    breaker: CircuitBreaker,
    prefetch: BatchCoalescer<Ticket>,
    listings: Deduplicator<Vec<Ticket>>,
    audit: AuditLog,
}

impl HelpdeskClient {
    /// 使用默认通知输出（tracing）创建客户端
    pub fn new(backend: Arc<dyn HelpdeskBackend>, config: &ResilienceConfig) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::with_config("helpdesk", config.circuit_breaker.clone()),
            prefetch: BatchCoalescer::new(config.batch.clone()),
            listings: Deduplicator::new(config.dedupe.clone()),
            audit: AuditLog::new(config.audit.clone()),
        }
    }

    /// 所有控制器共用同一个通知输出
    pub fn with_sink(
        backend: Arc<dyn HelpdeskBackend>,
        config: &ResilienceConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::with_config("helpdesk", config.circuit_breaker.clone())
                .with_sink(Arc::clone(&sink)),
            prefetch: BatchCoalescer::new(config.batch.clone()).with_sink(Arc::clone(&sink)),
            listings: Deduplicator::new(config.dedupe.clone()).with_sink(Arc::clone(&sink)),
            audit: AuditLog::new(config.audit.clone()).with_sink(sink),
        }
    }

    /// 创建工单
    ///
    /// 审计包在熔断之外，因此熔断拒绝也会留下一条失败记录。
    pub async fn create_ticket(&self, request: NewTicket) -> PortalResult<Ticket> {
        let context = AuditContext::new("create", "ticket", "new", request.user_id.clone())
            .with_detail("subject", request.subject.clone());
        let backend = Arc::clone(&self.backend);

        self.audit
            .log(context, || {
                self.breaker
                    .call(move || async move { backend.create_ticket(request).await })
            })
            .await
    }

    /// 将工单加入预取队列，结果通过 [`cached_ticket`](Self::cached_ticket) 读取
    pub async fn prefetch_ticket(&self, ticket_id: &str) {
        let backend = Arc::clone(&self.backend);
        let id = ticket_id.to_string();
        self.prefetch
            .add_to_queue(move || async move { backend.get_ticket(&id).await }, ticket_id)
            .await;
    }

    pub async fn cached_ticket(&self, ticket_id: &str) -> RequestResult<Ticket> {
        self.prefetch.get_result(ticket_id).await
    }

    /// 请求刷新用户的工单列表，窗口内的重复请求只执行最后一次
    pub async fn refresh_ticket_list(&self, user_id: &str) {
        let backend = Arc::clone(&self.backend);
        let user = user_id.to_string();
        self.listings
            .add_request(
                move || async move { backend.list_tickets(&user).await },
                Self::listing_key(user_id),
            )
            .await;
    }

    pub async fn ticket_list(&self, user_id: &str) -> RequestResult<Vec<Ticket>> {
        self.listings.get_result(&Self::listing_key(user_id)).await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// 等待已排队的预取和列表刷新全部落地所需的时间
    pub fn settle_time(&self) -> Duration {
        self.prefetch.config().batch_delay + self.listings.config().dedupe_window * 2
    }

    fn listing_key(user_id: &str) -> String {
        format!("tickets:{user_id}")
    }
}

/// 演示会话的汇总结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub requested: usize,
    pub created: Vec<String>,
    pub failed: usize,
    pub rejected: usize,
    pub prefetched: usize,
    pub listed_users: usize,
    pub breaker_state: Option<CircuitState>,
    pub audit_total: usize,
    pub audit_failed: usize,
}

/// 演示会话：模拟若干用户连续提交工单
pub struct DemoSession {
    client: Arc<HelpdeskClient>,
    users: Vec<String>,
}

impl DemoSession {
    pub fn new(client: Arc<HelpdeskClient>, users: usize) -> Self {
        let users = (1..=users.max(1)).map(|i| format!("user-{i}")).collect();
        Self { client, users }
    }

    /// 提交 `requests` 个工单，然后等待后台批量与去重任务完成
    pub async fn run(&self, requests: usize) -> PortalResult<SessionReport> {
        let mut report = SessionReport {
            requested: requests,
            ..SessionReport::default()
        };

        for i in 0..requests {
            let user = &self.users[i % self.users.len()];
            let request = NewTicket::new(user.as_str(), format!("问题 #{}", i + 1), "演示工单");

            match self.client.create_ticket(request).await {
                Ok(ticket) => {
                    debug!(ticket_id = %ticket.id, user_id = %user, "工单已创建");
                    self.client.prefetch_ticket(&ticket.id).await;
                    report.created.push(ticket.id);
                }
                Err(PortalError::CircuitOpen { .. }) => report.rejected += 1,
                Err(e) => {
                    warn!(user_id = %user, error = %e, "创建工单失败");
                    report.failed += 1;
                }
            }
            self.client.refresh_ticket_list(user).await;
        }

        let settle = self.client.settle_time();
        info!(wait_ms = settle.as_millis() as u64, "等待后台请求完成");
        tokio::time::sleep(settle).await;

        for id in &report.created {
            if self.client.cached_ticket(id).await.data.is_some() {
                report.prefetched += 1;
            }
        }
        for user in &self.users {
            if self.client.ticket_list(user).await.data.is_some() {
                report.listed_users += 1;
            }
        }

        report.breaker_state = Some(self.client.breaker().get_state().await);
        let stats = self.client.audit_log().get_stats(&AuditFilter::new()).await?;
        report.audit_total = stats.total;
        report.audit_failed = stats.failed;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpdesk::{MockHelpdeskBackend, TicketStatus};
    use chrono::Utc;
    use portal_core::mocks::RecordingSink;
    use portal_core::AuditStatus;

    fn ticket(id: &str, user: &str) -> Ticket {
        Ticket {
            id: id.to_string(),
            user_id: user.to_string(),
            subject: "s".to_string(),
            body: String::new(),
            status: TicketStatus::Open,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_ticket_is_audited() {
        let mut backend = MockHelpdeskBackend::new();
        backend
            .expect_create_ticket()
            .times(1)
            .returning(|req| Ok(ticket("T-1", &req.user_id)));

        let client = HelpdeskClient::new(Arc::new(backend), &ResilienceConfig::default());
        let created = client
            .create_ticket(NewTicket::new("u1", "打印机故障", ""))
            .await
            .unwrap();
        assert_eq!(created.id, "T-1");

        let logs = client.audit_log().get_logs(&AuditFilter::new()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].user_id, "u1");
        assert_eq!(logs[0].details["subject"], serde_json::json!("打印机故障"));
    }

    #[tokio::test]
    async fn test_open_breaker_rejection_is_audited_without_backend_call() {
        let mut backend = MockHelpdeskBackend::new();
        backend
            .expect_create_ticket()
            .times(5)
            .returning(|_| Err(PortalError::upstream(503, "down")));

        let sink = Arc::new(RecordingSink::new());
        let client =
            HelpdeskClient::with_sink(Arc::new(backend), &ResilienceConfig::default(), sink);

        for _ in 0..5 {
            let _ = client.create_ticket(NewTicket::new("u1", "x", "")).await;
        }
        assert!(client.breaker().is_open().await);

        // The sixth call never reaches the backend (times(5) would panic)
        let err = client
            .create_ticket(NewTicket::new("u1", "x", ""))
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());

        let failed = AuditFilter::new().status(AuditStatus::Failure);
        let logs = client.audit_log().get_logs(&failed).await.unwrap();
        assert_eq!(logs.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_collapses_per_user() {
        let mut backend = MockHelpdeskBackend::new();
        backend
            .expect_list_tickets()
            .times(1)
            .returning(|user| Ok(vec![ticket("T-9", user)]));

        let client = HelpdeskClient::new(Arc::new(backend), &ResilienceConfig::default());
        for _ in 0..4 {
            client.refresh_ticket_list("u1").await;
        }
        tokio::time::sleep(client.settle_time()).await;

        let listing = client.ticket_list("u1").await;
        assert_eq!(listing.data.map(|t| t.len()), Some(1));
    }
}
