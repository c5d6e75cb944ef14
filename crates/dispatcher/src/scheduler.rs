use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};

use scheduler_core::{AppConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    CompletionOutcome, CompletionReport, DeadLetterEntry, FailureRecord, NewTask, PendingTask,
    SchedulerStats, TaskExecutor, TaskId, TaskPriority, TaskState, WorkerEvent, WorkerSnapshot,
};

use crate::controller::Dispatcher;
use crate::dead_letter::DeadLetterSink;
use crate::execution_tracker::ExecutionTracker;
use crate::metrics::SchedulerMetrics;
use crate::recovery_service::WorkerRecovery;
use crate::retry_service::{RetryCoordinator, RetryDecision};
use crate::shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
use crate::strategies::strategy_from_name;
use crate::task_queue::TaskQueue;
use crate::task_state::TaskStateTable;
use crate::worker_failure_detector::{SweepReport, WorkerFailureDetector};
use crate::worker_registry::WorkerRegistry;

/// 进程内任务调度器
///
/// 组装任务队列、Worker注册表、执行表、重试协调器和死信存储，
/// `start` 之后在后台运行分发循环、重试循环和维护循环。
pub struct TaskScheduler {
    reject_unroutable_tasks: bool,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    tracker: Arc<ExecutionTracker>,
    retry: Arc<RetryCoordinator>,
    dead_letters: Arc<DeadLetterSink>,
    states: Arc<TaskStateTable>,
    recovery: Arc<WorkerRecovery>,
    dispatcher: Arc<Dispatcher>,
    detector: Arc<WorkerFailureDetector>,
    metrics: Arc<SchedulerMetrics>,
    shutdown_trigger: ShutdownTrigger,
    shutdown_signal: ShutdownSignal,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(config: &AppConfig, executor: Arc<dyn TaskExecutor>) -> SchedulerResult<Self> {
        let strategy = strategy_from_name(&config.dispatcher.selection_strategy)?;
        let metrics = Arc::new(SchedulerMetrics::new());
        let queue = Arc::new(TaskQueue::new());
        let registry = Arc::new(WorkerRegistry::new(&config.registry, strategy));
        let states = Arc::new(TaskStateTable::new());
        let dead_letters = Arc::new(DeadLetterSink::new());
        let tracker = Arc::new(ExecutionTracker::new(
            Arc::clone(&registry),
            Arc::clone(&states),
        ));
        let retry = Arc::new(RetryCoordinator::new(
            config.retry.clone(),
            Arc::clone(&queue),
            Arc::clone(&dead_letters),
            Arc::clone(&states),
            Arc::clone(&metrics),
        ));
        let recovery = Arc::new(WorkerRecovery::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&queue),
            Arc::clone(&states),
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.clone(),
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&dead_letters),
            Arc::clone(&states),
            executor,
            Arc::clone(&metrics),
        ));
        let detector = Arc::new(WorkerFailureDetector::new(
            config.maintenance.clone(),
            Arc::clone(&registry),
            Arc::clone(&recovery),
        ));
        let (shutdown_trigger, shutdown_signal) = shutdown_channel();

        Ok(Self {
            reject_unroutable_tasks: config.dispatcher.reject_unroutable_tasks,
            queue,
            registry,
            tracker,
            retry,
            dead_letters,
            states,
            recovery,
            dispatcher,
            detector,
            metrics,
            shutdown_trigger,
            shutdown_signal,
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// 在当前tokio运行时上启动后台循环
    pub fn start(&self) -> SchedulerResult<()> {
        if self.is_shutdown() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Internal("调度器已经启动".to_string()));
        }

        let mut handles = self.handles.lock();

        let dispatcher = Arc::clone(&self.dispatcher);
        let signal = self.shutdown_signal.clone();
        handles.push(tokio::spawn(async move { dispatcher.run(signal).await }));

        let retry = Arc::clone(&self.retry);
        let signal = self.shutdown_signal.clone();
        handles.push(tokio::spawn(async move { retry.run(signal).await }));

        let detector = Arc::clone(&self.detector);
        let signal = self.shutdown_signal.clone();
        handles.push(tokio::spawn(async move { detector.run(signal).await }));

        info!("任务调度器已启动");
        Ok(())
    }

    /// 提交任务，返回任务ID
    pub fn submit(&self, new_task: NewTask) -> SchedulerResult<TaskId> {
        if self.is_shutdown() {
            return Err(SchedulerError::ShuttingDown);
        }
        if new_task.task_type.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "任务类型不能为空".to_string(),
            ));
        }
        if self.reject_unroutable_tasks && !self.registry.has_capable_worker(&new_task.task_type) {
            warn!(task_type = %new_task.task_type, "没有Worker支持该任务类型，拒绝提交");
            return Err(SchedulerError::NoCapableWorker {
                task_type: new_task.task_type,
            });
        }

        let task = new_task.build();
        let task_id = task.id;
        self.states.reserve(task_id)?;

        debug!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = %task.priority,
            eligible_at = %task.eligible_at,
            "任务已提交"
        );
        self.queue.push(PendingTask::new(Arc::new(task)));
        self.metrics.record_scheduled();
        Ok(task_id)
    }

    pub fn schedule(
        &self,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        priority: TaskPriority,
        delay: Duration,
    ) -> SchedulerResult<TaskId> {
        self.submit(
            NewTask::new(task_type)
                .payload(payload)
                .priority(priority)
                .delay(delay),
        )
    }

    /// 处理Worker的完成回报
    ///
    /// 已被取代的执行（纪元不匹配、已被恢复或重复回报）返回 `Stale`，不产生副作用。
    pub fn report_completion(&self, report: CompletionReport) -> SchedulerResult<CompletionOutcome> {
        let span = info_span!("report_completion", task_id = %report.task_id, epoch = report.epoch);
        let _guard = span.enter();

        let Some(execution) = self.tracker.release(&report) else {
            if self.states.get(&report.task_id).is_none() {
                return Err(SchedulerError::TaskNotFound { id: report.task_id });
            }
            warn!(success = report.success, "忽略过期的完成回报");
            return Ok(CompletionOutcome::Stale);
        };
        self.metrics.record_execution(report.success, report.duration_ms);

        if report.success {
            let retry_count = execution.retry_count;
            self.states
                .set(report.task_id, TaskState::Completed { retry_count });
            info!(
                worker_id = %execution.worker_id,
                retry_count,
                duration_ms = report.duration_ms,
                "任务执行成功"
            );
            return Ok(CompletionOutcome::Completed { retry_count });
        }

        let failure = FailureRecord {
            attempt: execution.retry_count + 1,
            worker_id: execution.worker_id.clone(),
            message: report.message,
            duration_ms: report.duration_ms,
            failed_at: Utc::now(),
        };
        warn!(
            worker_id = %failure.worker_id,
            attempt = failure.attempt,
            message = failure.message.as_deref().unwrap_or(""),
            "任务执行失败"
        );

        Ok(match self.retry.handle_failure(execution, failure) {
            RetryDecision::Scheduled {
                retry_count,
                eligible_at,
                ..
            } => CompletionOutcome::RetryScheduled {
                retry_count,
                eligible_at,
            },
            RetryDecision::Exhausted => CompletionOutcome::DeadLettered,
        })
    }

    pub fn heartbeat(&self, worker_id: &str) -> SchedulerResult<()> {
        self.registry.heartbeat(worker_id)
    }

    pub fn register_worker(
        &self,
        worker_id: &str,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        max_concurrency: usize,
    ) -> SchedulerResult<()> {
        self.registry
            .register(worker_id, capabilities, max_concurrency)
            .map(|_| ())
    }

    /// 注销Worker，其在途任务重新入队；返回这些任务的ID
    pub fn unregister_worker(&self, worker_id: &str) -> SchedulerResult<Vec<TaskId>> {
        self.recovery.recover_worker(worker_id)
    }

    pub fn handle_worker_event(&self, event: WorkerEvent) -> SchedulerResult<()> {
        match event {
            WorkerEvent::Heartbeat { worker_id } => self.heartbeat(&worker_id),
            WorkerEvent::Completed(report) => self.report_completion(report).map(|_| ()),
        }
    }

    /// 立即执行一次维护扫描
    pub fn run_maintenance(&self) -> SweepReport {
        self.detector.sweep()
    }

    pub fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.states.get(task_id)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.list()
    }

    pub fn dead_letter(&self, task_id: &TaskId) -> Option<DeadLetterEntry> {
        self.dead_letters.get(task_id)
    }

    /// 人工把死信任务重新放回队列，重试次数与失败历史清零
    pub fn requeue_dead_letter(&self, task_id: &TaskId) -> SchedulerResult<()> {
        if self.is_shutdown() {
            return Err(SchedulerError::ShuttingDown);
        }
        let entry = self
            .dead_letters
            .take(task_id)
            .ok_or(SchedulerError::TaskNotFound { id: *task_id })?;

        if !self
            .states
            .transition(*task_id, TaskState::DeadLettered, TaskState::Queued)
        {
            error!(task_id = %task_id, state = ?self.states.get(task_id), "死信任务状态异常");
            self.states.set(*task_id, TaskState::Queued);
        }

        info!(task_id = %task_id, reason = ?entry.reason, "死信任务重新入队");
        let mut pending = PendingTask::new(entry.task);
        pending.not_before = Utc::now();
        self.queue.push(pending);
        Ok(())
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.registry.snapshots()
    }

    /// 状态快照，同时刷新指标gauge
    pub fn stats(&self) -> SchedulerStats {
        let (ready_depth, delayed_depth) = self.queue.depths();
        let stats = SchedulerStats {
            queue_depth: ready_depth + delayed_depth,
            ready_depth,
            delayed_depth,
            in_flight: self.tracker.len(),
            retry_queue_depth: self.retry.len(),
            dead_letter_depth: self.dead_letters.len(),
            registered_workers: self.registry.len(),
            healthy_workers: self.registry.healthy_count(Utc::now()),
            completed_total: self.tracker.completed_total(),
            failed_total: self.tracker.failed_total(),
        };
        self.metrics.update_from_stats(&stats);
        stats
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn execution_tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    pub fn retry_coordinator(&self) -> &Arc<RetryCoordinator> {
        &self.retry
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_trigger.is_triggered()
    }

    /// 通知所有后台循环退出；在途执行不受影响，完成回报仍会被处理
    pub fn shutdown(&self) {
        if self.is_shutdown() {
            return;
        }
        info!(
            in_flight = self.tracker.len(),
            queued = self.queue.len(),
            "正在关闭任务调度器"
        );
        self.shutdown_trigger.trigger();
    }

    /// 等待后台循环全部退出
    pub async fn wait_stopped(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "后台循环异常退出");
            }
        }
        info!("任务调度器已停止");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown_trigger.trigger();
    }
}
