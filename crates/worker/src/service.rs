use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use scheduler_core::{LocalWorkerConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{Assignment, CompletionReport, TaskExecutor, TaskId, WorkerEvent};

use crate::components::HeartbeatManager;
use crate::executor_factory::HandlerRegistry;

/// 进程内Worker池
///
/// 池内的每个Worker共享同一组任务处理器。调度器通过 [`TaskExecutor::assign`]
/// 投递任务，池在后台执行后把 `WorkerEvent::Completed` 写入事件通道，
/// 心跳同样经由该通道发出。
pub struct LocalWorkerPool {
    worker_ids: Vec<String>,
    handlers: Arc<HandlerRegistry>,
    max_concurrent_tasks: usize,
    heartbeat_interval: Duration,

    /// 正在执行的任务 → 所在Worker
    running_tasks: Arc<RwLock<HashMap<TaskId, String>>>,

    events: mpsc::UnboundedSender<WorkerEvent>,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat_handle: RwLock<Option<JoinHandle<()>>>,
    is_running: RwLock<bool>,
}

impl LocalWorkerPool {
    /// 创建Worker池，返回池本身和事件接收端
    pub fn new(
        config: &LocalWorkerConfig,
        handlers: HandlerRegistry,
    ) -> SchedulerResult<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        if config.count == 0 {
            return Err(SchedulerError::Configuration(
                "本地Worker数量必须大于0".to_string(),
            ));
        }
        if handlers.is_empty() {
            return Err(SchedulerError::Configuration(
                "本地Worker池没有任何任务处理器".to_string(),
            ));
        }

        let worker_ids = (1..=config.count)
            .map(|n| format!("{}-{}", config.id_prefix, n))
            .collect();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let pool = Self {
            worker_ids,
            handlers: Arc::new(handlers),
            max_concurrent_tasks: config.max_concurrent_tasks,
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            running_tasks: Arc::new(RwLock::new(HashMap::new())),
            events,
            shutdown_tx,
            heartbeat_handle: RwLock::new(None),
            is_running: RwLock::new(true),
        };
        Ok((pool, events_rx))
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    pub fn supported_task_types(&self) -> Vec<String> {
        self.handlers.task_types()
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks
    }

    pub async fn running_count(&self) -> usize {
        self.running_tasks.read().await.len()
    }

    pub async fn running_on(&self, worker_id: &str) -> usize {
        self.running_tasks
            .read()
            .await
            .values()
            .filter(|id| id.as_str() == worker_id)
            .count()
    }

    /// 启动心跳任务，启动前先同步发送一轮心跳
    pub async fn start_heartbeats(&self) {
        let mut handle = self.heartbeat_handle.write().await;
        if handle.is_some() {
            warn!("心跳任务已在运行");
            return;
        }

        let manager = HeartbeatManager::new(
            self.worker_ids.clone(),
            self.heartbeat_interval,
            self.events.clone(),
        );
        manager.beat();
        *handle = Some(manager.start(self.shutdown_tx.subscribe()));
    }

    /// 停止心跳并拒绝新任务，已在执行的任务照常完成并回报
    pub async fn shutdown(&self) {
        {
            let mut is_running = self.is_running.write().await;
            if !*is_running {
                return;
            }
            *is_running = false;
        }

        info!(workers = self.worker_ids.len(), "正在停止本地Worker池");
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.heartbeat_handle.write().await.take() {
            if let Err(e) = handle.await {
                error!("心跳任务异常退出: {}", e);
            }
        }
    }

    async fn run_assignment(
        handlers: Arc<HandlerRegistry>,
        running_tasks: Arc<RwLock<HashMap<TaskId, String>>>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        assignment: Assignment,
    ) {
        let task_id = assignment.task_id();
        let start = Instant::now();

        let result = match handlers.get(&assignment.task.task_type) {
            Some(handler) => handler.execute(&assignment).await,
            None => Err(SchedulerError::InvalidArgument(format!(
                "Worker不支持任务类型: {}",
                assignment.task.task_type
            ))),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let report = match result {
            Ok(output) => {
                info!(duration_ms, output = ?output, "任务执行成功");
                CompletionReport::success(&assignment, duration_ms)
            }
            Err(e) => {
                warn!(duration_ms, error = %e, "任务执行失败");
                CompletionReport::failure(&assignment, e.to_string(), duration_ms)
            }
        };

        running_tasks.write().await.remove(&task_id);
        if events.send(WorkerEvent::Completed(report)).is_err() {
            warn!("事件通道已关闭，执行结果被丢弃");
        }
    }
}

#[async_trait]
impl TaskExecutor for LocalWorkerPool {
    async fn assign(&self, assignment: Assignment) -> SchedulerResult<()> {
        if !*self.is_running.read().await {
            return Err(SchedulerError::ShuttingDown);
        }
        if !self.worker_ids.contains(&assignment.worker_id) {
            return Err(SchedulerError::WorkerNotFound {
                id: assignment.worker_id.clone(),
            });
        }

        let task_id = assignment.task_id();
        debug!(
            task_id = %task_id,
            worker_id = %assignment.worker_id,
            epoch = assignment.epoch,
            "接收任务"
        );
        self.running_tasks
            .write()
            .await
            .insert(task_id, assignment.worker_id.clone());

        let span = tracing::info_span!(
            "execute_task",
            task_id = %task_id,
            task_type = %assignment.task.task_type,
            worker_id = %assignment.worker_id,
            attempt = assignment.retry_count + 1,
        );
        tokio::spawn(
            Self::run_assignment(
                Arc::clone(&self.handlers),
                Arc::clone(&self.running_tasks),
                self.events.clone(),
                assignment,
            )
            .instrument(span),
        );
        Ok(())
    }
}

impl Drop for LocalWorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use scheduler_domain::NewTask;

    fn config(count: usize) -> LocalWorkerConfig {
        LocalWorkerConfig {
            count,
            id_prefix: "test-worker".to_string(),
            heartbeat_interval_ms: 20,
            ..LocalWorkerConfig::default()
        }
    }

    fn assignment(worker_id: &str, task_type: &str, payload: serde_json::Value) -> Assignment {
        Assignment {
            task: Arc::new(NewTask::new(task_type).payload(payload).build()),
            worker_id: worker_id.to_string(),
            epoch: 7,
            retry_count: 0,
        }
    }

    #[test]
    fn test_worker_ids_follow_prefix() {
        let (pool, _rx) = LocalWorkerPool::new(&config(3), HandlerRegistry::with_defaults()).unwrap();
        assert_eq!(
            pool.worker_ids(),
            &["test-worker-1", "test-worker-2", "test-worker-3"]
        );
        assert_eq!(pool.supported_task_types(), vec!["echo", "fail", "sleep"]);
    }

    #[test]
    fn test_empty_handlers_rejected() {
        let result = LocalWorkerPool::new(&config(1), HandlerRegistry::new());
        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_assign_reports_completion_with_epoch() {
        let (pool, mut rx) =
            LocalWorkerPool::new(&config(1), HandlerRegistry::with_defaults()).unwrap();
        let assignment = assignment("test-worker-1", "echo", json!({"n": 1}));
        let task_id = assignment.task_id();

        pool.assign(assignment).await.unwrap();

        match rx.recv().await {
            Some(WorkerEvent::Completed(report)) => {
                assert_eq!(report.task_id, task_id);
                assert_eq!(report.epoch, 7);
                assert!(report.success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(pool.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_worker_rejected() {
        let (pool, _rx) =
            LocalWorkerPool::new(&config(1), HandlerRegistry::with_defaults()).unwrap();
        let result = pool.assign(assignment("ghost", "echo", json!(null))).await;
        assert!(matches!(result, Err(SchedulerError::WorkerNotFound { .. })));
    }

    #[tokio::test]
    async fn test_missing_handler_reported_as_failure() {
        let (pool, mut rx) =
            LocalWorkerPool::new(&config(1), HandlerRegistry::with_defaults()).unwrap();
        pool.assign(assignment("test-worker-1", "shell", json!(null)))
            .await
            .unwrap();

        match rx.recv().await {
            Some(WorkerEvent::Completed(report)) => {
                assert!(!report.success);
                assert!(report.message.unwrap().contains("shell"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_assignments() {
        let (pool, mut rx) =
            LocalWorkerPool::new(&config(2), HandlerRegistry::with_defaults()).unwrap();
        pool.start_heartbeats().await;

        let mut beats = 0;
        while beats < 2 {
            if let Some(WorkerEvent::Heartbeat { .. }) = rx.recv().await {
                beats += 1;
            }
        }

        pool.shutdown().await;
        let result = pool
            .assign(assignment("test-worker-1", "echo", json!(null)))
            .await;
        assert!(matches!(result, Err(SchedulerError::ShuttingDown)));
    }
}
