use thiserror::Error;
use uuid::Uuid;

/// 调度器错误类型定义
///
/// 单个任务的执行失败（可重试失败、重试耗尽、暂无可用Worker）不属于错误，
/// 它们以结果值的形式在调度器内部处理。这里只包含需要调用方感知的结构性错误。
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("任务ID重复: {id}")]
    DuplicateTask { id: Uuid },

    #[error("任务 {id} 已存在活跃的执行记录")]
    DuplicateExecution { id: Uuid },

    #[error("Worker已注册: {id}")]
    WorkerAlreadyRegistered { id: String },

    #[error("没有任何已注册的Worker支持任务类型: {task_type}")]
    NoCapableWorker { task_type: String },

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务分发失败: {0}")]
    Dispatch(String),

    #[error("调度器正在关闭")]
    ShuttingDown,

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为调用方的编程错误（重复ID、重复执行等），这类错误应在调用点暴露
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateTask { .. }
                | SchedulerError::DuplicateExecution { .. }
                | SchedulerError::WorkerAlreadyRegistered { .. }
        )
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::WorkerNotFound {
            id: "worker-1".to_string(),
        };
        assert_eq!(err.to_string(), "Worker未找到: worker-1");

        let err = SchedulerError::NoCapableWorker {
            task_type: "shell".to_string(),
        };
        assert!(err.to_string().contains("shell"));
    }

    #[test]
    fn test_structural_errors() {
        let id = Uuid::new_v4();
        assert!(SchedulerError::DuplicateTask { id }.is_structural());
        assert!(SchedulerError::DuplicateExecution { id }.is_structural());
        assert!(!SchedulerError::TaskNotFound { id }.is_structural());
        assert!(!SchedulerError::ShuttingDown.is_structural());
    }
}
