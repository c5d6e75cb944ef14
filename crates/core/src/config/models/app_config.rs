use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatcher_worker::{DispatcherConfig, LocalWorkerConfig, RegistryConfig},
    observability::ObservabilityConfig,
    resilience::{MaintenanceConfig, RetryConfig},
};

/// 默认配置文件搜索路径
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/scheduler.toml",
    "scheduler.toml",
    "/etc/scheduler/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub registry: RegistryConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
    pub local_workers: LocalWorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER_, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("local_workers.supported_task_types")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate().context("分发器配置验证失败")?;
        self.registry.validate().context("Worker注册表配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.maintenance.validate().context("维护循环配置验证失败")?;
        self.local_workers
            .validate()
            .context("本地Worker配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.maintenance.enabled
            && self.maintenance.interval_ms > self.registry.heartbeat_timeout_ms
        {
            tracing::warn!(
                interval_ms = self.maintenance.interval_ms,
                heartbeat_timeout_ms = self.registry.heartbeat_timeout_ms,
                "维护扫描间隔大于心跳超时，失效Worker的任务回收将被推迟"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.selection_strategy, "load_based");
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [retry]
            max_retries = 5
            base_delay_ms = 200

            [registry]
            heartbeat_timeout_ms = 15000
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(config.registry.heartbeat_timeout_ms, 15_000);
        assert_eq!(config.dispatcher.backoff_min_ms, 10);
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let toml_str = r#"
            [dispatcher]
            selection_strategy = "random"
        "#;

        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let serialized = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(
            parsed.local_workers.supported_task_types,
            config.local_workers.supported_task_types
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [maintenance]
            interval_ms = 1000

            [local_workers]
            count = 3
            supported_task_types = ["echo"]
            "#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.maintenance.interval_ms, 1000);
        assert_eq!(config.local_workers.count, 3);
        assert_eq!(config.local_workers.supported_task_types, vec!["echo"]);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/scheduler.toml")).is_err());
    }
}
