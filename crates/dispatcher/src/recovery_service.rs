use std::sync::Arc;

use tracing::{debug, info, warn};

use scheduler_core::SchedulerResult;
use scheduler_domain::{TaskId, TaskState};

use crate::execution_tracker::ExecutionTracker;
use crate::metrics::SchedulerMetrics;
use crate::task_queue::TaskQueue;
use crate::task_state::TaskStateTable;
use crate::worker_registry::WorkerRegistry;

/// Worker丢失后的任务恢复
///
/// 注销Worker并把它名下的在途执行放回任务队列。重试次数与失败历史保持不变，
/// 恢复不算作一次失败，因此任务语义为至少一次执行。
pub struct WorkerRecovery {
    registry: Arc<WorkerRegistry>,
    tracker: Arc<ExecutionTracker>,
    queue: Arc<TaskQueue>,
    states: Arc<TaskStateTable>,
    metrics: Arc<SchedulerMetrics>,
}

impl WorkerRecovery {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tracker: Arc<ExecutionTracker>,
        queue: Arc<TaskQueue>,
        states: Arc<TaskStateTable>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            registry,
            tracker,
            queue,
            states,
            metrics,
        }
    }

    /// 注销Worker并恢复其在途任务，返回被重新入队的任务ID
    pub fn recover_worker(&self, worker_id: &str) -> SchedulerResult<Vec<TaskId>> {
        let in_flight = self.registry.unregister(worker_id)?;
        let mut recovered = Vec::with_capacity(in_flight.len());

        for task_id in in_flight {
            // 完成回报可能已经抢先释放了执行记录
            let Some(execution) = self.tracker.evict(&task_id, worker_id) else {
                debug!(task_id = %task_id, worker_id, "执行记录已释放，无需恢复");
                continue;
            };

            warn!(
                task_id = %task_id,
                worker_id,
                epoch = execution.epoch,
                retry_count = execution.retry_count,
                "Worker已失联，任务重新入队"
            );
            self.states.set(task_id, TaskState::Queued);
            self.queue.push(execution.into_pending());
            recovered.push(task_id);
        }

        if !recovered.is_empty() {
            self.metrics.record_recovered(recovered.len());
            self.registry.notify_capacity();
        }

        info!(worker_id, recovered = recovered.len(), "Worker恢复处理完成");
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::{RegistryConfig, SchedulerError};
    use scheduler_domain::{NewTask, PendingTask};

    struct Fixture {
        registry: Arc<WorkerRegistry>,
        tracker: Arc<ExecutionTracker>,
        queue: Arc<TaskQueue>,
        states: Arc<TaskStateTable>,
        recovery: WorkerRecovery,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(WorkerRegistry::with_load_based(&RegistryConfig::default()));
        let states = Arc::new(TaskStateTable::new());
        let tracker = Arc::new(ExecutionTracker::new(
            Arc::clone(&registry),
            Arc::clone(&states),
        ));
        let queue = Arc::new(TaskQueue::new());
        let recovery = WorkerRecovery::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&queue),
            Arc::clone(&states),
            Arc::new(SchedulerMetrics::new()),
        );
        Fixture {
            registry,
            tracker,
            queue,
            states,
            recovery,
        }
    }

    fn dispatch(f: &Fixture, worker_id: &str, retry_count: u32) -> TaskId {
        let worker = f.registry.get(worker_id).unwrap();
        let mut pending = PendingTask::new(Arc::new(NewTask::new("echo").build()));
        pending.retry_count = retry_count;
        f.states.reserve(pending.id()).unwrap();
        assert!(worker.try_acquire_slot());
        f.tracker.record_dispatch(&pending, &worker).unwrap();
        pending.id()
    }

    #[test]
    fn test_recover_requeues_each_in_flight_task_once() {
        let f = fixture();
        f.registry.register("w1", ["echo"], 5).unwrap();
        f.registry.register("w2", ["echo"], 5).unwrap();

        let lost: Vec<TaskId> = (0..3).map(|i| dispatch(&f, "w1", i)).collect();
        let kept = dispatch(&f, "w2", 0);

        let mut recovered = f.recovery.recover_worker("w1").unwrap();
        recovered.sort();
        let mut expected = lost.clone();
        expected.sort();
        assert_eq!(recovered, expected);

        for task_id in &lost {
            assert_eq!(f.queue.occurrences(task_id), 1);
            assert_eq!(f.states.get(task_id), Some(TaskState::Queued));
            assert!(!f.tracker.is_executing(task_id));
        }
        assert_eq!(f.queue.len(), 3);
        assert!(f.tracker.is_executing(&kept));
        assert!(f.registry.get("w1").is_none());
    }

    #[test]
    fn test_recovery_keeps_retry_count() {
        let f = fixture();
        f.registry.register("w1", ["echo"], 1).unwrap();
        let task_id = dispatch(&f, "w1", 2);

        f.recovery.recover_worker("w1").unwrap();
        let entry = f.queue.try_take_ready().unwrap();
        assert_eq!(entry.id(), task_id);
        assert_eq!(entry.pending.retry_count, 2);
    }

    #[test]
    fn test_recover_unknown_worker() {
        let f = fixture();
        assert!(matches!(
            f.recovery.recover_worker("ghost"),
            Err(SchedulerError::WorkerNotFound { .. })
        ));
    }
}
