use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::Assignment;

/// 单一任务类型的处理器
///
/// `Ok` 表示执行成功，携带可选的输出；`Err` 会作为失败回报交给调度器决定是否重试。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &str;

    async fn execute(&self, assignment: &Assignment) -> SchedulerResult<Option<String>>;
}

fn parse_params<T>(assignment: &Assignment) -> SchedulerResult<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if assignment.task.payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(assignment.task.payload.clone()).map_err(|e| {
        SchedulerError::InvalidArgument(format!(
            "解析{}任务参数失败: {e}",
            assignment.task.task_type
        ))
    })
}

/// 原样返回任务负载
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn task_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, assignment: &Assignment) -> SchedulerResult<Option<String>> {
        let output = serde_json::to_string(&assignment.task.payload)?;
        debug!(task_id = %assignment.task_id(), output = %output, "执行echo任务");
        Ok(Some(output))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SleepTaskParams {
    pub duration_ms: u64,
}

impl Default for SleepTaskParams {
    fn default() -> Self {
        Self { duration_ms: 100 }
    }
}

/// 休眠指定时长后成功
pub struct SleepHandler {
    max_duration: Duration,
}

impl SleepHandler {
    pub fn new(max_duration: Duration) -> Self {
        Self { max_duration }
    }
}

impl Default for SleepHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    fn task_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, assignment: &Assignment) -> SchedulerResult<Option<String>> {
        let params: SleepTaskParams = parse_params(assignment)?;
        let duration = Duration::from_millis(params.duration_ms).min(self.max_duration);
        info!(
            task_id = %assignment.task_id(),
            duration_ms = duration.as_millis() as u64,
            "执行sleep任务"
        );
        sleep(duration).await;
        Ok(Some(format!("slept {}ms", duration.as_millis())))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FailTaskParams {
    /// 前多少次尝试失败，未设置时总是失败
    pub fail_attempts: Option<u32>,
    pub message: Option<String>,
}

/// 按参数失败，用于演示重试与死信
pub struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    fn task_type(&self) -> &str {
        "fail"
    }

    async fn execute(&self, assignment: &Assignment) -> SchedulerResult<Option<String>> {
        let params: FailTaskParams = parse_params(assignment)?;
        let attempt = assignment.retry_count + 1;
        let should_fail = match params.fail_attempts {
            Some(fail_attempts) => assignment.retry_count < fail_attempts,
            None => true,
        };

        if should_fail {
            let message = params
                .message
                .unwrap_or_else(|| format!("第{attempt}次尝试按要求失败"));
            return Err(SchedulerError::Internal(message));
        }
        Ok(Some(format!("第{attempt}次尝试成功")))
    }
}
