use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use scheduler_core::{DispatcherConfig, SchedulerError};
use scheduler_domain::{DeadLetterEntry, DeadLetterReason, TaskExecutor, TaskState};

use crate::dead_letter::DeadLetterSink;
use crate::execution_tracker::ExecutionTracker;
use crate::metrics::SchedulerMetrics;
use crate::shutdown::ShutdownSignal;
use crate::task_queue::{QueuedTask, TaskQueue};
use crate::task_state::TaskStateTable;
use crate::worker_registry::WorkerRegistry;

/// 单次分发尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAttempt {
    Dispatched { worker_id: String, epoch: u64 },
    /// 暂无可用Worker，任务已原样放回队列
    NoWorker,
    /// 投递到执行接口失败，分发已撤销
    DeliveryFailed,
    /// 长时间没有任何Worker支持该类型，已转入死信
    DeadLettered,
    /// 队列条目对应的任务已有活跃执行，条目被丢弃
    Dropped,
}

enum Wake {
    Shutdown,
    Ready(QueuedTask),
    CapacityChanged,
    BackoffElapsed,
}

/// 分发循环
///
/// 找不到Worker时任务原样放回队列，该任务类型被暂时阻塞，循环继续分发其他类型的任务。
/// 被阻塞的类型在指数退避到期或Worker容量变化时恢复。同类型的低优先级任务同样被阻塞，
/// 不会抢在等待中的高优先级任务之前占用Worker。
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    tracker: Arc<ExecutionTracker>,
    dead_letters: Arc<DeadLetterSink>,
    states: Arc<TaskStateTable>,
    executor: Arc<dyn TaskExecutor>,
    metrics: Arc<SchedulerMetrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<TaskQueue>,
        registry: Arc<WorkerRegistry>,
        tracker: Arc<ExecutionTracker>,
        dead_letters: Arc<DeadLetterSink>,
        states: Arc<TaskStateTable>,
        executor: Arc<dyn TaskExecutor>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            config,
            queue,
            registry,
            tracker,
            dead_letters,
            states,
            executor,
            metrics,
        }
    }

    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!("启动任务分发循环");

        let min_backoff = Duration::from_millis(self.config.backoff_min_ms);
        let max_backoff = Duration::from_millis(self.config.backoff_max_ms);
        let mut backoff = min_backoff;
        // 暂时无法分发的任务类型，退避到期或Worker容量变化前不再从队列取出
        let mut blocked: HashSet<String> = HashSet::new();
        let mut retry_at = Instant::now();

        loop {
            let wake = if blocked.is_empty() {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => Wake::Shutdown,
                    entry = self.queue.take_ready() => Wake::Ready(entry),
                }
            } else {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => Wake::Shutdown,
                    _ = self.registry.capacity_changed() => Wake::CapacityChanged,
                    _ = tokio::time::sleep_until(retry_at) => Wake::BackoffElapsed,
                    entry = self.queue.take_ready_excluding(&blocked) => Wake::Ready(entry),
                }
            };

            let entry = match wake {
                Wake::Shutdown => break,
                Wake::CapacityChanged => {
                    debug!(blocked = ?blocked, "Worker容量变化，恢复被阻塞的任务类型");
                    blocked.clear();
                    continue;
                }
                Wake::BackoffElapsed => {
                    blocked.clear();
                    backoff = (backoff * 2).min(max_backoff);
                    continue;
                }
                Wake::Ready(entry) => entry,
            };

            let task_type = entry.pending.task.task_type.clone();
            // 分发过程不参与select，关闭信号不会打断进行中的分发
            match self.dispatch_one(entry).await {
                DispatchAttempt::NoWorker | DispatchAttempt::DeliveryFailed => {
                    if blocked.is_empty() {
                        retry_at = Instant::now() + backoff;
                    }
                    debug!(
                        task_type = %task_type,
                        backoff_ms = backoff.as_millis() as u64,
                        "暂无法分发，该类型任务退避等待"
                    );
                    blocked.insert(task_type);
                }
                DispatchAttempt::Dispatched { .. } if blocked.is_empty() => backoff = min_backoff,
                _ => {}
            }
        }

        info!(in_flight = self.tracker.len(), "任务分发循环已停止");
    }

    /// 尝试分发一个从队列取出的任务
    pub async fn dispatch_one(&self, mut entry: QueuedTask) -> DispatchAttempt {
        let task = Arc::clone(&entry.pending.task);
        let task_id = task.id;

        if !self.registry.has_capable_worker(&task.task_type) {
            return self.handle_unroutable(entry);
        }
        entry.pending.unroutable_since = None;

        let Some(worker) = self.registry.select(&task) else {
            self.queue.requeue(entry);
            return DispatchAttempt::NoWorker;
        };

        if !worker.try_acquire_slot() {
            debug!(task_id = %task_id, worker_id = worker.id(), "Worker槽位已被占满");
            self.queue.requeue(entry);
            return DispatchAttempt::NoWorker;
        }

        let assignment = match self.tracker.record_dispatch(&entry.pending, &worker) {
            Ok(assignment) => assignment,
            Err(SchedulerError::DuplicateExecution { .. }) => {
                worker.release_slot();
                error!(task_id = %task_id, "队列中出现正在执行的任务，丢弃该条目");
                return DispatchAttempt::Dropped;
            }
            Err(e) => {
                // Worker在选择之后被注销
                worker.release_slot();
                debug!(task_id = %task_id, worker_id = worker.id(), error = %e, "Worker已不可用");
                self.queue.requeue(entry);
                return DispatchAttempt::NoWorker;
            }
        };

        let worker_id = assignment.worker_id.clone();
        let epoch = assignment.epoch;

        if let Err(e) = self.executor.assign(assignment).await {
            warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                epoch,
                error = %e,
                "任务投递失败，撤销本次分发"
            );
            if self.tracker.rollback(&task_id, epoch).is_some() {
                self.states.set(task_id, TaskState::Queued);
                self.queue.requeue(entry);
            }
            return DispatchAttempt::DeliveryFailed;
        }

        self.metrics.record_dispatched();
        info!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = %task.priority,
            worker_id = %worker_id,
            epoch,
            retry_count = entry.pending.retry_count,
            "任务已分发"
        );

        DispatchAttempt::Dispatched { worker_id, epoch }
    }

    fn handle_unroutable(&self, mut entry: QueuedTask) -> DispatchAttempt {
        let now = Utc::now();
        let task_id = entry.id();
        let since = *entry.pending.unroutable_since.get_or_insert(now);
        let timeout = TimeDelta::milliseconds(
            i64::try_from(self.config.unroutable_timeout_ms).unwrap_or(i64::MAX),
        );

        if now - since < timeout {
            debug!(
                task_id = %task_id,
                task_type = %entry.pending.task.task_type,
                "没有Worker支持该任务类型，等待Worker注册"
            );
            self.queue.requeue(entry);
            return DispatchAttempt::NoWorker;
        }

        let pending = entry.into_pending();
        self.states.set(task_id, TaskState::DeadLettered);
        let dead_letter = DeadLetterEntry {
            task: pending.task,
            reason: DeadLetterReason::NoCapableWorker,
            retry_count: pending.retry_count,
            failures: pending.failures,
            dead_lettered_at: now,
        };
        if let Err(e) = self.dead_letters.commit(dead_letter) {
            error!(task_id = %task_id, error = %e, "写入死信失败");
        }
        self.metrics.record_dead_lettered();
        DispatchAttempt::DeadLettered
    }
}
