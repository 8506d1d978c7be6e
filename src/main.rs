use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, Command};
use client_portal::{DemoSession, HelpdeskClient, SimulatedHelpdesk};
use portal_config::{LogFormat, LogLevel, PortalConfig};
use portal_core::AuditFilter;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("client-portal")
        .version("1.0.0")
        .about("客户门户弹性调用层演示")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（缺省时按默认路径查找）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"]),
        )
        .arg(
            Arg::new("requests")
                .short('n')
                .long("requests")
                .value_name("COUNT")
                .help("提交的工单数量")
                .value_parser(value_parser!(usize))
                .default_value("20"),
        )
        .arg(
            Arg::new("users")
                .long("users")
                .value_name("COUNT")
                .help("模拟的用户数量")
                .value_parser(value_parser!(usize))
                .default_value("3"),
        )
        .arg(
            Arg::new("failure-rate")
                .long("failure-rate")
                .value_name("RATE")
                .help("模拟工单服务的失败率 (0.0 - 1.0)")
                .value_parser(value_parser!(f64))
                .default_value("0.3"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let requests = matches.get_one::<usize>("requests").copied().unwrap_or(20);
    let users = matches.get_one::<usize>("users").copied().unwrap_or(3);
    let failure_rate = matches
        .get_one::<f64>("failure-rate")
        .copied()
        .unwrap_or(0.3);

    // 加载配置
    let mut config = PortalConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {config_path:?}"))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format
            .parse::<LogFormat>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    // 初始化日志系统
    init_logging(config.logging.level, config.logging.format)?;

    info!("启动客户门户演示会话");
    info!(requests, users, failure_rate, "会话参数");

    let backend = Arc::new(SimulatedHelpdesk::new(failure_rate));
    let client = Arc::new(HelpdeskClient::new(backend.clone(), &config.resilience));
    let session = DemoSession::new(Arc::clone(&client), users);

    let report = tokio::select! {
        report = session.run(requests) => report.context("演示会话失败")?,
        _ = wait_for_shutdown_signal() => {
            warn!("会话被中断，输出已记录的审计日志");
            let audit = client.audit_log().export_json(&AuditFilter::new()).await?;
            println!("{audit}");
            return Ok(());
        }
    };

    info!(
        created = report.created.len(),
        failed = report.failed,
        rejected = report.rejected,
        backend_requests = backend.request_count(),
        "会话完成"
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("序列化会话报告失败")?
    );
    let audit = client
        .audit_log()
        .export_json(&AuditFilter::new())
        .await
        .context("导出审计日志失败")?;
    println!("{audit}");

    Ok(())
}

/// 初始化日志系统
fn init_logging(level: LogLevel, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
            .context("初始化Compact日志格式失败")?,
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
