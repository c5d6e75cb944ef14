use serde::{Deserialize, Serialize};

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 重试间隔的随机抖动范围（0.0-1.0），0表示不抖动
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_delay_ms == 0 {
            return Err(anyhow::anyhow!("基础重试间隔必须大于0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动系数必须在0.0到1.0之间: {}",
                self.jitter_factor
            ));
        }

        Ok(())
    }
}

/// 维护循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// 扫描间隔（毫秒）
    pub interval_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.interval_ms == 0 {
            return Err(anyhow::anyhow!("维护扫描间隔必须大于0"));
        }
        Ok(())
    }
}
