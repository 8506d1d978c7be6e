//! 工单系统后端
//!
//! 门户通过 [`HelpdeskBackend`] 访问外部工单服务。传输层不在本仓库范围内，
//! [`SimulatedHelpdesk`] 在内存中模拟服务，并可注入随机故障和整体宕机。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_errors::{PortalError, PortalResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// 工单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    Closed,
}

/// 工单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub body: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

/// 创建工单请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub user_id: String,
    pub subject: String,
    pub body: String,
}

impl NewTicket {
    pub fn new(
        user_id: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// 工单服务接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HelpdeskBackend: Send + Sync {
    /// 创建工单
    async fn create_ticket(&self, request: NewTicket) -> PortalResult<Ticket>;

    /// 根据ID获取工单
    async fn get_ticket(&self, ticket_id: &str) -> PortalResult<Ticket>;

    /// 获取用户的全部工单
    async fn list_tickets(&self, user_id: &str) -> PortalResult<Vec<Ticket>>;
}

/// 内存模拟的工单服务
#[derive(Debug)]
pub struct SimulatedHelpdesk {
    tickets: RwLock<HashMap<String, Ticket>>,
    failure_rate: f64,
    latency: Duration,
    outage: AtomicBool,
    next_id: AtomicU64,
    requests: AtomicU64,
}

impl SimulatedHelpdesk {
    /// `failure_rate` 会被截断到 `[0, 1]`，NaN 视为 0
    pub fn new(failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            tickets: RwLock::new(HashMap::new()),
            failure_rate,
            latency: Duration::ZERO,
            outage: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            requests: AtomicU64::new(0),
        }
    }

    /// 每次请求前的模拟网络延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 开启或关闭整体宕机
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.outage.load(Ordering::SeqCst)
    }

    /// 已收到的请求数（包括失败的请求）
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    async fn round_trip(&self, operation: &str) -> PortalResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.is_down() {
            return Err(PortalError::upstream(503, "工单服务不可用"));
        }
        if self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate) {
            debug!(operation, "模拟网络故障");
            return Err(PortalError::Network(format!("{operation}: 连接被重置")));
        }
        Ok(())
    }
}

impl Default for SimulatedHelpdesk {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[async_trait]
impl HelpdeskBackend for SimulatedHelpdesk {
    async fn create_ticket(&self, request: NewTicket) -> PortalResult<Ticket> {
        self.round_trip("create_ticket").await?;

        if request.subject.trim().is_empty() {
            return Err(PortalError::validation_error("工单标题不能为空"));
        }

        let id = format!("T-{:05}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let ticket = Ticket {
            id: id.clone(),
            user_id: request.user_id,
            subject: request.subject,
            body: request.body,
            status: TicketStatus::Open,
            created_at: Utc::now(),
        };
        self.tickets.write().await.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn get_ticket(&self, ticket_id: &str) -> PortalResult<Ticket> {
        self.round_trip("get_ticket").await?;
        self.tickets
            .read()
            .await
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| PortalError::not_found("工单", ticket_id))
    }

    async fn list_tickets(&self, user_id: &str) -> PortalResult<Vec<Ticket>> {
        self.round_trip("list_tickets").await?;
        let tickets = self.tickets.read().await;
        let mut owned: Vec<Ticket> = tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(owned)
    }
}
