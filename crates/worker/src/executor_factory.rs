use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use scheduler_core::{SchedulerError, SchedulerResult};

use crate::executors::{EchoHandler, FailHandler, SleepHandler, TaskHandler};

/// 任务类型到处理器的映射
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含全部内置处理器
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoHandler));
        registry.register(Arc::new(SleepHandler::default()));
        registry.register(Arc::new(FailHandler));
        registry
    }

    /// 只创建配置中列出的内置处理器，未知类型返回配置错误
    pub fn from_task_types(task_types: &[String]) -> SchedulerResult<Self> {
        let mut registry = Self::new();
        for task_type in task_types {
            let handler: Arc<dyn TaskHandler> = match task_type.as_str() {
                "echo" => Arc::new(EchoHandler),
                "sleep" => Arc::new(SleepHandler::default()),
                "fail" => Arc::new(FailHandler),
                other => {
                    return Err(SchedulerError::Configuration(format!(
                        "未知的任务类型: {other}"
                    )))
                }
            };
            registry.register(handler);
        }
        info!(task_types = ?registry.task_types(), "任务处理器初始化完成");
        Ok(registry)
    }

    /// 注册处理器，同类型的旧处理器会被替换
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type().to_string(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_builtin_types() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(registry.task_types(), vec!["echo", "fail", "sleep"]);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("shell").is_none());
    }

    #[test]
    fn test_from_task_types() {
        let registry =
            HandlerRegistry::from_task_types(&["sleep".to_string(), "echo".to_string()]).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("fail"));

        let err = HandlerRegistry::from_task_types(&["http".to_string()]);
        assert!(matches!(err, Err(SchedulerError::Configuration(_))));
    }
}
