use scheduler_core::config::*;
use scheduler_core::{LogConfig, LogFormat, LogLevel};
use std::env;
use std::io::Write;
use tempfile::Builder;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.dispatcher.selection_strategy, "load_based");
    assert!(config.dispatcher.reject_unroutable_tasks);
    assert_eq!(config.registry.heartbeat_timeout_ms, 90_000);
    assert!(config.maintenance.enabled);
    assert!(config.local_workers.enabled);
    assert_eq!(config.local_workers.id_prefix, "local-worker");
    assert!(!config.observability.metrics_enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[dispatcher]
selection_strategy = "round_robin"
backoff_min_ms = 20
backoff_max_ms = 1000
reject_unroutable_tasks = false
unroutable_timeout_ms = 5000

[registry]
heartbeat_timeout_ms = 10000

[retry]
max_retries = 5
base_delay_ms = 500
max_delay_ms = 30000
jitter_factor = 0.2

[maintenance]
enabled = true
interval_ms = 2000

[local_workers]
enabled = true
count = 4
id_prefix = "edge"
max_concurrent_tasks = 8
supported_task_types = ["echo", "sleep"]
heartbeat_interval_ms = 3000

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = true
metrics_listen_address = "127.0.0.1:9000"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.dispatcher.selection_strategy, "round_robin");
    assert!(!config.dispatcher.reject_unroutable_tasks);
    assert_eq!(config.registry.heartbeat_timeout_ms, 10_000);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.jitter_factor, 0.2);
    assert_eq!(config.local_workers.count, 4);
    assert_eq!(config.local_workers.supported_task_types, vec!["echo", "sleep"]);
    assert_eq!(
        config.observability.metrics_listen_address.as_deref(),
        Some("127.0.0.1:9000")
    );

    let log_config = LogConfig::from_observability(&config.observability).unwrap();
    assert_eq!(log_config.level, LogLevel::Debug);
    assert_eq!(log_config.format, LogFormat::Json);
}

#[test]
fn test_invalid_sections_rejected() {
    let cases = [
        "[dispatcher]\nbackoff_min_ms = 0",
        "[dispatcher]\nbackoff_min_ms = 100\nbackoff_max_ms = 50",
        "[registry]\nheartbeat_timeout_ms = 0",
        "[retry]\njitter_factor = -0.1",
        "[local_workers]\ncount = 0",
        "[local_workers]\nsupported_task_types = []",
        "[observability]\nlog_format = \"xml\"",
        "[observability]\nmetrics_enabled = true\nmetrics_listen_address = \"not-an-addr\"",
    ];

    for case in cases {
        assert!(AppConfig::from_toml(case).is_err(), "应当拒绝配置: {case}");
    }
}

#[test]
fn test_disabled_local_workers_skip_validation() {
    let config = AppConfig::from_toml("[local_workers]\nenabled = false\ncount = 0").unwrap();
    assert!(!config.local_workers.enabled);
}

#[test]
fn test_env_overrides_file() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[retry]\nmax_retries = 4\nbase_delay_ms = 100").unwrap();

    env::set_var("SCHEDULER_RETRY__MAX_RETRIES", "9");
    env::set_var("SCHEDULER_LOCAL_WORKERS__SUPPORTED_TASK_TYPES", "echo,fail");
    let config = AppConfig::load(file.path().to_str());
    env::remove_var("SCHEDULER_RETRY__MAX_RETRIES");
    env::remove_var("SCHEDULER_LOCAL_WORKERS__SUPPORTED_TASK_TYPES");

    let config = config.unwrap();
    assert_eq!(config.retry.max_retries, 9);
    assert_eq!(config.retry.base_delay_ms, 100);
    assert_eq!(config.local_workers.supported_task_types, vec!["echo", "fail"]);
}
