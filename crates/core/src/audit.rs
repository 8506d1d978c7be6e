//! 审计日志
//!
//! 包装一次操作的执行过程，为每次调用追加一条结构化、可查询的审计记录。
//! 失败时记录后原样重新抛出错误，从不吞掉失败。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use portal_config::AuditConfig;
use portal_errors::{PortalError, PortalResult};

use crate::notification::{NotificationSink, Notifier};

/// 审计结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

/// 审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 记录ID
    pub id: Uuid,
    /// 尝试执行的时间
    pub timestamp: DateTime<Utc>,
    /// 操作名称，例如 `create`
    pub action: String,
    /// 实体类型，例如 `ticket`
    pub entity: String,
    pub entity_id: String,
    pub user_id: String,
    /// 附加上下文
    pub details: HashMap<String, serde_json::Value>,
    pub status: AuditStatus,
    /// 失败时的错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 一次审计调用的上下文
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub user_id: String,
    pub details: HashMap<String, serde_json::Value>,
}

impl AuditContext {
    pub fn new(
        action: impl Into<String>,
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            entity: entity.into(),
            entity_id: entity_id.into(),
            user_id: user_id.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    fn into_entry(self) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: self.action,
            entity: self.entity,
            entity_id: self.entity_id,
            user_id: self.user_id,
            details: self.details,
            status: AuditStatus::Success,
            error: None,
        }
    }
}

/// 审计查询条件
///
/// 各字段之间为“与”关系，未设置的字段不做约束。时间范围两端均包含。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<AuditStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 分页限制
    pub limit: Option<usize>,
    /// 分页偏移
    pub offset: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn status(mut self, status: AuditStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    /// 检查单条记录是否满足条件（不考虑分页）
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        fn field_matches(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }

        field_matches(&self.action, &entry.action)
            && field_matches(&self.entity, &entry.entity)
            && field_matches(&self.entity_id, &entry.entity_id)
            && field_matches(&self.user_id, &entry.user_id)
            && self.status.map_or(true, |s| s == entry.status)
            && self.start_time.map_or(true, |t| entry.timestamp >= t)
            && self.end_time.map_or(true, |t| entry.timestamp <= t)
    }
}

/// 审计统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 按操作分组
    pub by_action: HashMap<String, usize>,
    /// 按实体类型分组
    pub by_entity: HashMap<String, usize>,
}

impl AuditStats {
    fn from_entries(entries: &[AuditEntry]) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.total += 1;
            match entry.status {
                AuditStatus::Success => stats.succeeded += 1,
                AuditStatus::Failure => stats.failed += 1,
            }
            *stats.by_action.entry(entry.action.clone()).or_default() += 1;
            *stats.by_entity.entry(entry.entity.clone()).or_default() += 1;
        }
        stats
    }
}

/// 审计存储接口
///
/// 只追加；持久化存储由外部实现
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// 追加审计记录
    async fn append(&self, entry: AuditEntry) -> PortalResult<()>;

    /// 按条件查询，按追加顺序返回
    async fn query(&self, filter: &AuditFilter) -> PortalResult<Vec<AuditEntry>>;

    /// 清空全部记录，不可恢复
    async fn clear(&self) -> PortalResult<()>;
}

/// 内存审计存储
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> PortalResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> PortalResult<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| filter.matches(e))
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> PortalResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// 审计日志控制器
#[derive(Clone)]
pub struct AuditLog {
    config: AuditConfig,
    notifier: Notifier,
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(config: AuditConfig) -> Self {
        let notifier = Notifier::new(config.show_toast);
        Self {
            config,
            notifier,
            store: Arc::new(InMemoryAuditStore::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = self.notifier.with_sink(sink);
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PortalError) + Send + Sync + 'static,
    {
        self.notifier = self.notifier.on_error(callback);
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier = self.notifier.on_success(callback);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// 执行操作并追加一条审计记录
    ///
    /// 每次调用恰好追加一条记录，状态与操作结果一致；失败时原错误原样返回。
    /// 存储写入失败只记录日志，不改变调用结果。
    pub async fn log<F, Fut, T>(&self, context: AuditContext, operation: F) -> PortalResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PortalResult<T>>,
    {
        let entry = context.into_entry();

        match operation().await {
            Ok(value) => {
                debug!(action = %entry.action, entity = %entry.entity, entity_id = %entry.entity_id, "审计: 操作成功");
                self.append(entry).await;
                self.notifier.success();
                Ok(value)
            }
            Err(err) => {
                let message = err.message();
                let failed = AuditEntry {
                    status: AuditStatus::Failure,
                    error: Some(message.clone()),
                    ..entry
                };
                error!(action = %failed.action, entity = %failed.entity, entity_id = %failed.entity_id, error = %message, "审计: 操作失败");

                let title = "Error";
                let toast = format!("Failed to {} {}: {}", failed.action, failed.entity, message);
                self.append(failed).await;
                self.notifier.failure(&err, title, &toast);
                Err(err)
            }
        }
    }

    async fn append(&self, entry: AuditEntry) {
        let status = entry.status.as_str();
        let entry_id = entry.id;
        match self.store.append(entry).await {
            Ok(()) => counter!("audit_entries_total", "status" => status).increment(1),
            Err(e) => error!(entry_id = %entry_id, error = %e, "写入审计记录失败"),
        }
    }

    pub async fn get_logs(&self, filter: &AuditFilter) -> PortalResult<Vec<AuditEntry>> {
        self.store.query(filter).await
    }

    pub async fn clear_logs(&self) -> PortalResult<()> {
        self.store.clear().await
    }

    /// 统计时忽略分页参数
    pub async fn get_stats(&self, filter: &AuditFilter) -> PortalResult<AuditStats> {
        let unpaged = AuditFilter {
            limit: None,
            offset: None,
            ..filter.clone()
        };
        let entries = self.store.query(&unpaged).await?;
        Ok(AuditStats::from_entries(&entries))
    }

    /// 导出为格式化的JSON数组
    pub async fn export_json(&self, filter: &AuditFilter) -> PortalResult<String> {
        let entries = self.store.query(filter).await?;
        Ok(serde_json::to_string_pretty(&entries)?)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}
