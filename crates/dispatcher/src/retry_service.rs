use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use scheduler_core::RetryConfig;
use scheduler_domain::{
    deadline_after, remaining_until, DeadLetterEntry, DeadLetterReason, Execution, FailureRecord,
    RetryEntry, TaskId, TaskState,
};

use crate::dead_letter::DeadLetterSink;
use crate::delay_queue::DelayHeap;
use crate::metrics::SchedulerMetrics;
use crate::shutdown::ShutdownSignal;
use crate::task_queue::TaskQueue;
use crate::task_state::TaskStateTable;

/// 失败回报的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 已登记重试，`retry_count` 为递增后的值
    Scheduled {
        retry_count: u32,
        delay: Duration,
        eligible_at: DateTime<Utc>,
    },
    /// 重试预算耗尽，已写入死信
    Exhausted,
}

/// 重试协调器
///
/// 失败的任务按退避时间进入延迟堆，后台循环在到期时把它们放回任务队列，
/// 保留原有优先级、重试次数和失败历史。
pub struct RetryCoordinator {
    config: RetryConfig,
    pending: Mutex<DelayHeap<RetryEntry>>,
    notify: Notify,
    queue: Arc<TaskQueue>,
    dead_letters: Arc<DeadLetterSink>,
    states: Arc<TaskStateTable>,
    metrics: Arc<SchedulerMetrics>,
}

impl RetryCoordinator {
    pub fn new(
        config: RetryConfig,
        queue: Arc<TaskQueue>,
        dead_letters: Arc<DeadLetterSink>,
        states: Arc<TaskStateTable>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            config,
            pending: Mutex::new(DelayHeap::new()),
            notify: Notify::new(),
            queue,
            dead_letters,
            states,
            metrics,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// 第 `retry_count` 次重试前的等待时间：base × 2^retry_count，不超过上限
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);

        let delay_ms = if self.config.jitter_factor > 0.0 {
            let jitter = delay_ms as f64 * self.config.jitter_factor * rand::random::<f64>();
            (delay_ms.saturating_add(jitter as u64)).min(self.config.max_delay_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// 处理一次失败的执行：登记重试或转入死信
    ///
    /// 调用方必须已经从执行表中移除了该执行。
    pub fn handle_failure(&self, execution: Execution, failure: FailureRecord) -> RetryDecision {
        let task_id = execution.task.id;
        let retry_count = execution.retry_count;
        let mut failures = execution.failures;
        failures.push(failure);

        if retry_count >= self.config.max_retries {
            self.states.set(task_id, TaskState::DeadLettered);
            let entry = DeadLetterEntry {
                task: execution.task,
                reason: DeadLetterReason::RetriesExhausted,
                retry_count,
                failures,
                dead_lettered_at: Utc::now(),
            };
            if let Err(e) = self.dead_letters.commit(entry) {
                error!(task_id = %task_id, error = %e, "写入死信失败");
            }
            self.metrics.record_dead_lettered();
            return RetryDecision::Exhausted;
        }

        let delay = self.backoff_delay(retry_count);
        let eligible_at = deadline_after(Utc::now(), delay);
        let next_retry = retry_count + 1;

        self.states.set(task_id, TaskState::RetryPending);
        self.pending.lock().push(
            eligible_at,
            RetryEntry {
                task: execution.task,
                retry_count: next_retry,
                eligible_at,
                failures,
            },
        );
        self.notify.notify_one();
        self.metrics.record_retried();

        info!(
            task_id = %task_id,
            retry_count = next_retry,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "任务执行失败，已安排重试"
        );

        RetryDecision::Scheduled {
            retry_count: next_retry,
            delay,
            eligible_at,
        }
    }

    /// 把所有在 `now` 之前到期的重试放回任务队列，返回数量
    pub fn reinject_due(&self, now: DateTime<Utc>) -> usize {
        let due = self.pending.lock().drain_due(now);
        let count = due.len();
        for entry in due {
            let task_id = entry.task.id;
            debug!(task_id = %task_id, retry_count = entry.retry_count, "重试到期，重新入队");
            self.states.set(task_id, TaskState::Queued);
            self.queue.push(entry.into_pending());
        }
        count
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().next_deadline()
    }

    /// 后台循环：只在最早的重试到期或有新重试登记时醒来
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!("启动重试协调循环");

        loop {
            let notified = self.notify.notified();

            self.reinject_due(Utc::now());
            let wait = self
                .next_deadline()
                .map(|deadline| remaining_until(deadline, Utc::now()));

            match wait {
                Some(duration) => {
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = notified => {}
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = notified => {}
                    }
                }
            }
        }

        let remaining = self.len();
        if remaining > 0 {
            warn!(remaining, "重试协调循环已停止，仍有重试等待中");
        } else {
            info!("重试协调循环已停止");
        }
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.pending
            .lock()
            .iter()
            .any(|entry| entry.task.id == *task_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
