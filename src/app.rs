use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scheduler_core::AppConfig;
use scheduler_dispatcher::TaskScheduler;
use scheduler_domain::{NewTask, TaskPriority, WorkerEvent};
use scheduler_worker::{HandlerRegistry, LocalWorkerPool};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 统计日志的输出间隔
const STATS_INTERVAL: Duration = Duration::from_secs(10);
/// 关闭时等待在途任务回报的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// 主应用程序：嵌入式调度器 + 本地Worker池
pub struct Application {
    config: AppConfig,
    scheduler: Arc<TaskScheduler>,
    pool: Arc<LocalWorkerPool>,
    events: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    demo_tasks: usize,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(config: AppConfig, demo_tasks: usize) -> Result<Self> {
        if !config.local_workers.enabled {
            return Err(anyhow::anyhow!(
                "本地Worker被禁用，调度器没有可用的执行端，请检查 local_workers.enabled"
            ));
        }

        let handlers = HandlerRegistry::from_task_types(&config.local_workers.supported_task_types)
            .context("创建任务处理器失败")?;
        let (pool, events) =
            LocalWorkerPool::new(&config.local_workers, handlers).context("创建本地Worker池失败")?;
        let pool = Arc::new(pool);

        let scheduler =
            TaskScheduler::new(&config, pool.clone()).context("创建任务调度器失败")?;

        Ok(Self {
            config,
            scheduler: Arc::new(scheduler),
            pool,
            events: Mutex::new(Some(events)),
            demo_tasks,
        })
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let events = self
            .events
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("应用已经在运行"))?;

        for worker_id in self.pool.worker_ids() {
            self.scheduler
                .register_worker(
                    worker_id,
                    self.pool.supported_task_types(),
                    self.pool.max_concurrent_tasks(),
                )
                .with_context(|| format!("注册本地Worker失败: {worker_id}"))?;
        }
        info!(
            workers = self.pool.worker_ids().len(),
            max_concurrent_tasks = self.pool.max_concurrent_tasks(),
            task_types = ?self.pool.supported_task_types(),
            "本地Worker已注册"
        );

        let forwarder = spawn_event_forwarder(Arc::clone(&self.scheduler), events);
        self.pool.start_heartbeats().await;
        self.scheduler.start().context("启动调度器失败")?;

        if self.demo_tasks > 0 {
            self.submit_demo_tasks()?;
        }

        let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
        stats_interval.tick().await;
        loop {
            tokio::select! {
                _ = stats_interval.tick() => self.log_stats(),
                _ = shutdown_rx.recv() => {
                    info!("应用收到关闭信号");
                    break;
                }
            }
        }

        self.shutdown().await;
        forwarder.abort();
        Ok(())
    }

    /// 停止分发，等待在途任务回报后再停止Worker池
    async fn shutdown(&self) {
        self.scheduler.shutdown();
        self.scheduler.wait_stopped().await;

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.scheduler.stats().in_flight > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                in_flight = self.scheduler.stats().in_flight,
                "等待在途任务超时，剩余任务的结果将被丢弃"
            );
        }

        self.pool.shutdown().await;
        self.log_stats();
        info!("应用已停止");
    }

    fn submit_demo_tasks(&self) -> Result<()> {
        let types = &self.config.local_workers.supported_task_types;
        let priorities = [
            TaskPriority::Low,
            TaskPriority::Normal,
            TaskPriority::High,
            TaskPriority::Critical,
        ];

        for i in 0..self.demo_tasks {
            let task_type = &types[i % types.len()];
            let payload = match task_type.as_str() {
                "sleep" => json!({ "duration_ms": 50 + (i as u64 % 5) * 100 }),
                "fail" => json!({ "fail_attempts": (i % 3) as u32 }),
                _ => json!({ "index": i }),
            };
            let task = NewTask::new(task_type.as_str())
                .payload(payload)
                .priority(priorities[i % priorities.len()])
                .delay(Duration::from_millis((i % 4) as u64 * 250));

            let task_id = self
                .scheduler
                .submit(task)
                .with_context(|| format!("提交演示任务失败: {task_type}"))?;
            debug!(task_id = %task_id, task_type = %task_type, "已提交演示任务");
        }

        info!(count = self.demo_tasks, "演示任务已提交");
        Ok(())
    }

    fn log_stats(&self) {
        let stats = self.scheduler.stats();
        info!(
            queue_depth = stats.queue_depth,
            ready = stats.ready_depth,
            delayed = stats.delayed_depth,
            in_flight = stats.in_flight,
            retry_pending = stats.retry_queue_depth,
            dead_letters = stats.dead_letter_depth,
            workers = stats.registered_workers,
            healthy_workers = stats.healthy_workers,
            completed = stats.completed_total,
            failed = stats.failed_total,
            "调度器状态"
        );
    }
}

/// 把Worker池的事件转交给调度器
fn spawn_event_forwarder(
    scheduler: Arc<TaskScheduler>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = scheduler.handle_worker_event(event) {
                error!("处理Worker事件失败: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_domain::TaskState;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 20;
        config.retry.jitter_factor = 0.0;
        config.local_workers.count = 2;
        config.local_workers.heartbeat_interval_ms = 50;
        config
    }

    #[test]
    fn test_disabled_local_workers_rejected() {
        let mut config = test_config();
        config.local_workers.enabled = false;
        assert!(Application::new(config, 0).is_err());
    }

    #[tokio::test]
    async fn test_demo_run_and_graceful_shutdown() {
        let app = Arc::new(Application::new(test_config(), 8).unwrap());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let runner = Arc::clone(&app);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        let scheduler = Arc::clone(app.scheduler());
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let stats = scheduler.stats();
                let finished = stats.completed_total as usize + stats.dead_letter_depth;
                if finished == 8 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(scheduler.is_shutdown());
        assert_eq!(scheduler.stats().in_flight, 0);
        assert!(scheduler
            .dead_letters()
            .iter()
            .all(|entry| scheduler.task_state(&entry.task.id) == Some(TaskState::DeadLettered)));
    }
}
