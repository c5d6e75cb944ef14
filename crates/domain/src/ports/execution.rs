use async_trait::async_trait;
use scheduler_core::SchedulerResult;

use crate::entities::{Assignment, CompletionReport};

/// 调度器 → Worker 的执行接口
///
/// `assign` 只负责投递，不应等待任务执行完成。每次投递对应一次
/// `CompletionReport` 回报，回报中的纪元号必须与投递时一致。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn assign(&self, assignment: Assignment) -> SchedulerResult<()>;
}

/// Worker → 调度器 的事件
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Heartbeat { worker_id: String },
    Completed(CompletionReport),
}
