use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::TaskPriority;

pub type TaskId = Uuid;

/// 在给定时间点上加上延迟，溢出时饱和到最大时间
pub fn deadline_after(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 距离某个时间点的剩余时长，已过期时为零
pub fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// 可调度的工作单元
///
/// 任务在提交时创建，之后不再修改；在调度器内部以 `Arc<Task>` 共享。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    /// 最早可分发时间
    pub eligible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
        priority: TaskPriority,
        delay: Duration,
    ) -> Self {
        NewTask::new(task_type)
            .payload(payload)
            .priority(priority)
            .delay(delay)
            .build()
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.eligible_at <= now
    }
}

/// 任务提交请求
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: Option<TaskId>,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub delay: Duration,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: None,
            task_type: task_type.into(),
            payload: serde_json::Value::Null,
            priority: TaskPriority::Normal,
            delay: Duration::ZERO,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> Task {
        let now = Utc::now();
        Task {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            task_type: self.task_type,
            payload: self.payload,
            priority: self.priority,
            eligible_at: deadline_after(now, self.delay),
            created_at: now,
        }
    }
}

/// 单次失败执行的记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    /// 第几次尝试（从1开始）
    pub attempt: u32,
    pub worker_id: String,
    pub message: Option<String>,
    pub duration_ms: u64,
    pub failed_at: DateTime<Utc>,
}

/// 在任务队列中等待分发的条目
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub task: Arc<Task>,
    pub retry_count: u32,
    /// 本条目最早可被取出的时间
    pub not_before: DateTime<Utc>,
    pub failures: Vec<FailureRecord>,
    /// 首次发现没有任何Worker支持该任务类型的时间
    pub unroutable_since: Option<DateTime<Utc>>,
}

impl PendingTask {
    pub fn new(task: Arc<Task>) -> Self {
        let not_before = task.eligible_at;
        Self {
            task,
            retry_count: 0,
            not_before,
            failures: Vec::new(),
            unroutable_since: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn priority(&self) -> TaskPriority {
        self.task.priority
    }
}

/// 分发给Worker的执行指令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task: Arc<Task>,
    pub worker_id: String,
    /// 本次分发的纪元号，完成回报时必须原样带回
    pub epoch: u64,
    pub retry_count: u32,
}

impl Assignment {
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }
}

/// 正在执行中的任务记录，每个任务ID同一时刻至多存在一条
#[derive(Debug, Clone)]
pub struct Execution {
    pub task: Arc<Task>,
    pub worker_id: String,
    pub retry_count: u32,
    pub epoch: u64,
    pub started_at: DateTime<Utc>,
    pub failures: Vec<FailureRecord>,
}

impl Execution {
    pub fn assignment(&self) -> Assignment {
        Assignment {
            task: Arc::clone(&self.task),
            worker_id: self.worker_id.clone(),
            epoch: self.epoch,
            retry_count: self.retry_count,
        }
    }

    /// 执行被回收（如Worker失联）后重新入队，重试次数与失败历史保持不变
    pub fn into_pending(self) -> PendingTask {
        PendingTask {
            task: self.task,
            retry_count: self.retry_count,
            not_before: Utc::now(),
            failures: self.failures,
            unroutable_since: None,
        }
    }
}

/// Worker回报的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub task_id: TaskId,
    pub epoch: u64,
    pub success: bool,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl CompletionReport {
    pub fn success(assignment: &Assignment, duration_ms: u64) -> Self {
        Self {
            task_id: assignment.task_id(),
            epoch: assignment.epoch,
            success: true,
            message: None,
            duration_ms,
        }
    }

    pub fn failure(assignment: &Assignment, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: assignment.task_id(),
            epoch: assignment.epoch,
            success: false,
            message: Some(message.into()),
            duration_ms,
        }
    }
}

/// 等待退避结束后重新入队的任务
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub task: Arc<Task>,
    pub retry_count: u32,
    pub eligible_at: DateTime<Utc>,
    pub failures: Vec<FailureRecord>,
}

impl RetryEntry {
    pub fn into_pending(self) -> PendingTask {
        PendingTask {
            task: self.task,
            retry_count: self.retry_count,
            not_before: self.eligible_at,
            failures: self.failures,
            unroutable_since: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterReason {
    /// 重试次数耗尽
    RetriesExhausted,
    /// 长时间没有任何Worker声明支持该任务类型
    NoCapableWorker,
}

/// 死信记录，不会被自动重新分发
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: Arc<Task>,
    pub reason: DeadLetterReason,
    pub retry_count: u32,
    pub failures: Vec<FailureRecord>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// 任务生命周期状态，任一时刻任务只处于其中一种
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    RetryPending,
    Executing,
    Completed { retry_count: u32 },
    DeadLettered,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed { .. } | TaskState::DeadLettered)
    }
}

/// 处理完成回报后的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed { retry_count: u32 },
    RetryScheduled {
        retry_count: u32,
        eligible_at: DateTime<Utc>,
    },
    DeadLettered,
    /// 回报来自已被取代的执行（纪元不匹配或执行已被回收），已忽略
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_defaults() {
        let task = NewTask::new("echo").build();
        assert_eq!(task.task_type, "echo");
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.payload, serde_json::Value::Null);
        assert!(task.is_eligible(Utc::now()));
    }

    #[test]
    fn test_delayed_task_not_eligible() {
        let task = Task::new(
            "echo",
            json!({"k": "v"}),
            TaskPriority::High,
            Duration::from_secs(60),
        );
        assert!(!task.is_eligible(Utc::now()));
        assert!(task.eligible_at > task.created_at);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Utc::now();
        assert_eq!(deadline_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(deadline_after(now, Duration::ZERO), now);
    }

    #[test]
    fn test_remaining_until_never_negative() {
        let now = Utc::now();
        let past = now - TimeDelta::seconds(5);
        assert_eq!(remaining_until(past, now), Duration::ZERO);
        let future = now + TimeDelta::milliseconds(250);
        assert_eq!(remaining_until(future, now), Duration::from_millis(250));
    }

    #[test]
    fn test_execution_into_pending_keeps_history() {
        let task = Arc::new(NewTask::new("echo").build());
        let execution = Execution {
            task: Arc::clone(&task),
            worker_id: "w1".to_string(),
            retry_count: 2,
            epoch: 7,
            started_at: Utc::now(),
            failures: vec![FailureRecord {
                attempt: 1,
                worker_id: "w0".to_string(),
                message: Some("boom".to_string()),
                duration_ms: 5,
                failed_at: Utc::now(),
            }],
        };

        let assignment = execution.assignment();
        assert_eq!(assignment.epoch, 7);
        assert_eq!(assignment.task_id(), task.id);

        let pending = execution.into_pending();
        assert_eq!(pending.retry_count, 2);
        assert_eq!(pending.failures.len(), 1);
        assert_eq!(pending.id(), task.id);
    }
}
