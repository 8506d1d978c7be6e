use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{logging::LoggingConfig, resilience::ResilienceConfig};
use crate::validation::ConfigValidator;

const DEFAULT_PATHS: [&str; 3] = [
    "config/portal.toml",
    "portal.toml",
    "/etc/client-portal/config.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub logging: LoggingConfig,
    pub resilience: ResilienceConfig,
}

impl PortalConfig {
    /// 按 默认值 -> TOML文件 -> PORTAL__* 环境变量 的顺序加载配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&PortalConfig::default()).context("生成默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_PATHS.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("PORTAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PortalConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: PortalConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for PortalConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.logging.validate()?;
        self.resilience.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogFormat, LogLevel};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_portal_config_default() {
        let config = PortalConfig::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.resilience.batch.batch_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_portal_config_from_toml() {
        let toml_str = r#"
[logging]
level = "debug"
format = "json"

[resilience.circuit_breaker]
failure_threshold = 2
reset_timeout = 1500

[resilience.batch]
batch_size = 4
batch_delay = 50

[resilience.dedupe]
dedupe_window = 250
show_toast = false
"#;

        let config = PortalConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 2);
        assert_eq!(
            config.resilience.circuit_breaker.reset_timeout,
            Duration::from_millis(1500)
        );
        // Unspecified fields keep their defaults
        assert_eq!(
            config.resilience.circuit_breaker.half_open_timeout,
            Duration::from_millis(5000)
        );
        assert_eq!(config.resilience.batch.batch_size, 4);
        assert_eq!(config.resilience.dedupe.dedupe_window, Duration::from_millis(250));
        assert!(!config.resilience.dedupe.show_toast);
    }

    #[test]
    fn test_portal_config_from_toml_rejects_invalid() {
        let toml_str = r#"
[resilience.batch]
batch_size = 0
"#;
        assert!(PortalConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_portal_config_toml_roundtrip() {
        let config = PortalConfig::default();
        let serialized = config.to_toml().expect("Failed to serialize");
        let parsed = PortalConfig::from_toml(&serialized).expect("Failed to parse");
        assert_eq!(
            parsed.resilience.circuit_breaker.reset_timeout,
            config.resilience.circuit_breaker.reset_timeout
        );
    }

    #[test]
    fn test_portal_config_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Failed to create temp file");
        writeln!(
            file,
            "[resilience.batch]\nbatch_size = 3\n\n[resilience.dedupe]\ndedupe_window = 400"
        )
        .expect("Failed to write config");

        let path = file.path().to_str().expect("temp path is utf-8");
        let config = PortalConfig::load(Some(path)).expect("Failed to load config");
        assert_eq!(config.resilience.batch.batch_size, 3);
        assert_eq!(config.resilience.dedupe.dedupe_window, Duration::from_millis(400));
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_portal_config_load_missing_file() {
        let result = PortalConfig::load(Some("/nonexistent/portal.toml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
    }
}
