use serde::{Deserialize, Serialize};

/// 分发循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Worker选择策略: "load_based" | "round_robin"
    pub selection_strategy: String,
    /// 暂无可用Worker时的最小退避（毫秒）
    pub backoff_min_ms: u64,
    /// 暂无可用Worker时的最大退避（毫秒）
    pub backoff_max_ms: u64,
    /// 提交任务时若没有任何已注册Worker支持该类型则直接拒绝
    pub reject_unroutable_tasks: bool,
    /// 已入队任务失去全部可处理Worker后，进入死信前的等待时长（毫秒）
    pub unroutable_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            selection_strategy: "load_based".to_string(),
            backoff_min_ms: 10,
            backoff_max_ms: 500,
            reject_unroutable_tasks: true,
            unroutable_timeout_ms: 60_000,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_strategies = ["load_based", "round_robin"];
        if !valid_strategies.contains(&self.selection_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的选择策略: {}，支持的策略: {:?}",
                self.selection_strategy,
                valid_strategies
            ));
        }

        if self.backoff_min_ms == 0 {
            return Err(anyhow::anyhow!("最小退避时间必须大于0"));
        }

        if self.backoff_max_ms < self.backoff_min_ms {
            return Err(anyhow::anyhow!("最大退避时间不能小于最小退避时间"));
        }

        Ok(())
    }
}

/// Worker注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 心跳超时时间（毫秒），超过即视为不健康
    pub heartbeat_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 90_000,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_timeout_ms == 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 进程内Worker池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalWorkerConfig {
    pub enabled: bool,
    pub count: usize,
    pub id_prefix: String,
    pub max_concurrent_tasks: usize,
    pub supported_task_types: Vec<String>,
    pub heartbeat_interval_ms: u64,
}

impl Default for LocalWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 2,
            id_prefix: "local-worker".to_string(),
            max_concurrent_tasks: 4,
            supported_task_types: vec![
                "echo".to_string(),
                "sleep".to_string(),
                "fail".to_string(),
            ],
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl LocalWorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.count == 0 {
            return Err(anyhow::anyhow!("本地Worker数量必须大于0"));
        }

        if self.id_prefix.is_empty() {
            return Err(anyhow::anyhow!("Worker ID前缀不能为空"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.supported_task_types.is_empty() {
            return Err(anyhow::anyhow!("支持的任务类型不能为空"));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        Ok(())
    }
}
