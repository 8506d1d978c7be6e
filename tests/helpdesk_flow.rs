use std::sync::Arc;
use std::time::Duration;

use client_portal::{DemoSession, HelpdeskClient, NewTicket, SimulatedHelpdesk};
use portal_config::{PortalConfig, ResilienceConfig};
use portal_core::mocks::RecordingSink;
use portal_core::{AuditFilter, AuditStatus, CircuitState, NotificationKind};

fn fast_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.reset_timeout = Duration::from_secs(10);
    config.batch.batch_size = 2;
    config.batch.batch_delay = Duration::from_millis(50);
    config.dedupe.dedupe_window = Duration::from_millis(200);
    config
}

#[tokio::test(start_paused = true)]
async fn healthy_backend_session() {
    let backend = Arc::new(SimulatedHelpdesk::new(0.0));
    let client = Arc::new(HelpdeskClient::new(backend.clone(), &fast_config()));

    let report = DemoSession::new(Arc::clone(&client), 2)
        .run(5)
        .await
        .unwrap();

    assert_eq!(report.created.len(), 5);
    assert_eq!(report.failed, 0);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.prefetched, 5);
    assert_eq!(report.listed_users, 2);
    assert_eq!(report.breaker_state, Some(CircuitState::Closed));
    assert_eq!(report.audit_total, 5);

    // 5 creates + 5 prefetches + one collapsed listing per user
    assert_eq!(backend.request_count(), 12);

    let listing = client.ticket_list("user-1").await.data.unwrap();
    assert_eq!(listing.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn outage_opens_breaker_and_recovers() {
    let backend = Arc::new(SimulatedHelpdesk::new(0.0));
    let sink = Arc::new(RecordingSink::new());
    let client = HelpdeskClient::with_sink(backend.clone(), &fast_config(), sink.clone());

    backend.set_outage(true);
    for i in 0..5 {
        let result = client
            .create_ticket(NewTicket::new("u1", format!("故障 {i}"), ""))
            .await;
        assert!(result.is_err());
    }
    assert_eq!(client.breaker().get_state().await, CircuitState::Open);
    // Only the first three reached the backend
    assert_eq!(backend.request_count(), 3);
    assert_eq!(sink.count_of(NotificationKind::Warning), 2);

    backend.set_outage(false);
    tokio::time::advance(Duration::from_secs(10)).await;

    let ticket = client
        .create_ticket(NewTicket::new("u1", "恢复", ""))
        .await
        .unwrap();
    assert_eq!(ticket.subject, "恢复");
    assert_eq!(client.breaker().get_state().await, CircuitState::Closed);

    let audit = client.audit_log();
    let failures = audit
        .get_logs(&AuditFilter::new().status(AuditStatus::Failure))
        .await
        .unwrap();
    assert_eq!(failures.len(), 5);
    let stats = audit.get_stats(&AuditFilter::new()).await.unwrap();
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn client_built_from_loaded_config() {
    let config = PortalConfig::from_toml(
        r#"
        [resilience.batch]
        batch_size = 1
        batch_delay = 20

        [resilience.dedupe]
        dedupe_window = 100
        "#,
    )
    .unwrap();

    let backend = Arc::new(SimulatedHelpdesk::new(0.0));
    let client = HelpdeskClient::new(backend, &config.resilience);
    let created = client
        .create_ticket(NewTicket::new("u9", "配置", ""))
        .await
        .unwrap();

    client.prefetch_ticket(&created.id).await;
    assert!(client.cached_ticket(&created.id).await.is_loading);
    tokio::time::sleep(client.settle_time()).await;
    assert_eq!(client.cached_ticket(&created.id).await.data, Some(created));
}
