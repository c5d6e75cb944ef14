use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    Assignment, CompletionReport, Execution, PendingTask, TaskId, TaskState, WorkerNode,
};

use crate::task_state::TaskStateTable;
use crate::worker_registry::WorkerRegistry;

/// 在途执行表
///
/// “每个任务同一时刻至多一条活跃执行”的唯一保证点。每次分发分配一个全局递增的纪元号，
/// 只有纪元号匹配的回报才能释放执行记录。
pub struct ExecutionTracker {
    executions: DashMap<TaskId, Execution>,
    registry: Arc<WorkerRegistry>,
    states: Arc<TaskStateTable>,
    next_epoch: AtomicU64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
}

impl ExecutionTracker {
    pub fn new(registry: Arc<WorkerRegistry>, states: Arc<TaskStateTable>) -> Self {
        Self {
            executions: DashMap::new(),
            registry,
            states,
            next_epoch: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
        }
    }

    /// 记录一次分发。调用前必须已在 `worker` 上占用执行槽位。
    pub fn record_dispatch(
        &self,
        pending: &PendingTask,
        worker: &WorkerNode,
    ) -> SchedulerResult<Assignment> {
        let task_id = pending.id();
        match self.executions.entry(task_id) {
            Entry::Occupied(existing) => {
                error!(
                    task_id = %task_id,
                    worker_id = %existing.get().worker_id,
                    epoch = existing.get().epoch,
                    "任务已有活跃执行，拒绝重复分发"
                );
                Err(SchedulerError::DuplicateExecution { id: task_id })
            }
            Entry::Vacant(vacant) => {
                if !worker.attach(task_id) {
                    return Err(SchedulerError::WorkerNotFound {
                        id: worker.id().to_string(),
                    });
                }

                let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
                let execution = Execution {
                    task: Arc::clone(&pending.task),
                    worker_id: worker.id().to_string(),
                    retry_count: pending.retry_count,
                    epoch,
                    started_at: Utc::now(),
                    failures: pending.failures.clone(),
                };
                let assignment = execution.assignment();
                vacant.insert(execution);
                self.states.set(task_id, TaskState::Executing);

                debug!(
                    task_id = %task_id,
                    worker_id = worker.id(),
                    epoch,
                    retry_count = pending.retry_count,
                    "记录任务分发"
                );
                Ok(assignment)
            }
        }
    }

    /// 处理完成回报：释放执行记录，归还槽位并累计Worker的完成/失败计数
    ///
    /// 纪元号不匹配或执行已被回收时返回 `None`，不产生任何副作用。
    pub fn release(&self, report: &CompletionReport) -> Option<Execution> {
        let (task_id, execution) = self
            .executions
            .remove_if(&report.task_id, |_, execution| execution.epoch == report.epoch)?;

        if let Some(worker) = self.registry.get(&execution.worker_id) {
            if worker.detach(&task_id) {
                worker.release_slot();
                if report.success {
                    worker.record_completed();
                } else {
                    worker.record_failed();
                }
            }
        }

        if report.success {
            self.completed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        self.registry.notify_capacity();

        Some(execution)
    }

    /// 撤销一次未能送达的分发，不计入完成/失败
    pub fn rollback(&self, task_id: &TaskId, epoch: u64) -> Option<Execution> {
        let (task_id, execution) = self
            .executions
            .remove_if(task_id, |_, execution| execution.epoch == epoch)?;

        if let Some(worker) = self.registry.get(&execution.worker_id) {
            if worker.detach(&task_id) {
                worker.release_slot();
            }
        }
        self.registry.notify_capacity();

        Some(execution)
    }

    /// 回收已失联Worker上的执行记录
    pub fn evict(&self, task_id: &TaskId, worker_id: &str) -> Option<Execution> {
        self.executions
            .remove_if(task_id, |_, execution| execution.worker_id == worker_id)
            .map(|(_, execution)| execution)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Execution> {
        self.executions
            .get(task_id)
            .map(|execution| execution.value().clone())
    }

    pub fn is_executing(&self, task_id: &TaskId) -> bool {
        self.executions.contains_key(task_id)
    }

    pub fn executions_on(&self, worker_id: &str) -> Vec<TaskId> {
        self.executions
            .iter()
            .filter(|entry| entry.value().worker_id == worker_id)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn completed_total(&self) -> u64 {
        self.completed_total.load(Ordering::Relaxed)
    }

    pub fn failed_total(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::RegistryConfig;
    use scheduler_domain::NewTask;

    fn setup() -> (Arc<WorkerRegistry>, Arc<TaskStateTable>, ExecutionTracker) {
        let registry = Arc::new(WorkerRegistry::with_load_based(&RegistryConfig::default()));
        let states = Arc::new(TaskStateTable::new());
        let tracker = ExecutionTracker::new(Arc::clone(&registry), Arc::clone(&states));
        (registry, states, tracker)
    }

    fn pending() -> PendingTask {
        PendingTask::new(Arc::new(NewTask::new("echo").build()))
    }

    #[test]
    fn test_second_dispatch_of_same_task_fails() {
        let (registry, states, tracker) = setup();
        let worker = registry.register("w1", ["echo"], 2).unwrap();
        let pending = pending();
        states.reserve(pending.id()).unwrap();

        assert!(worker.try_acquire_slot());
        let assignment = tracker.record_dispatch(&pending, &worker).unwrap();
        assert_eq!(assignment.worker_id, "w1");
        assert_eq!(states.get(&pending.id()), Some(TaskState::Executing));

        assert!(matches!(
            tracker.record_dispatch(&pending, &worker),
            Err(SchedulerError::DuplicateExecution { .. })
        ));
        assert_eq!(tracker.len(), 1);
        assert_eq!(worker.in_flight(), vec![pending.id()]);
    }

    #[test]
    fn test_release_updates_worker_counters() {
        let (registry, _states, tracker) = setup();
        let worker = registry.register("w1", ["echo"], 2).unwrap();
        let pending = pending();

        assert!(worker.try_acquire_slot());
        let assignment = tracker.record_dispatch(&pending, &worker).unwrap();
        assert_eq!(worker.active(), 1);

        let report = CompletionReport::failure(&assignment, "boom", 12);
        let execution = tracker.release(&report).unwrap();
        assert_eq!(execution.epoch, assignment.epoch);
        assert_eq!(worker.active(), 0);
        assert_eq!(worker.failed_count(), 1);
        assert_eq!(worker.completed_count(), 0);
        assert_eq!(tracker.failed_total(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let (registry, _states, tracker) = setup();
        let worker = registry.register("w1", ["echo"], 2).unwrap();
        let pending = pending();

        assert!(worker.try_acquire_slot());
        let assignment = tracker.record_dispatch(&pending, &worker).unwrap();

        let mut stale = CompletionReport::success(&assignment, 1);
        stale.epoch += 100;
        assert!(tracker.release(&stale).is_none());
        assert!(tracker.is_executing(&pending.id()));
        assert_eq!(worker.active(), 1);
        assert_eq!(tracker.completed_total(), 0);

        assert!(tracker.release(&CompletionReport::success(&assignment, 1)).is_some());
        assert!(tracker.release(&CompletionReport::success(&assignment, 1)).is_none());
        assert_eq!(tracker.completed_total(), 1);
    }

    #[test]
    fn test_retired_worker_rejects_dispatch() {
        let (registry, _states, tracker) = setup();
        let worker = registry.register("w1", ["echo"], 2).unwrap();
        registry.unregister("w1").unwrap();

        let pending = pending();
        assert!(matches!(
            tracker.record_dispatch(&pending, &worker),
            Err(SchedulerError::WorkerNotFound { .. })
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_rollback_and_evict() {
        let (registry, _states, tracker) = setup();
        let worker = registry.register("w1", ["echo"], 2).unwrap();
        let first = pending();
        let second = pending();

        assert!(worker.try_acquire_slot());
        let a = tracker.record_dispatch(&first, &worker).unwrap();
        assert!(worker.try_acquire_slot());
        tracker.record_dispatch(&second, &worker).unwrap();

        assert!(tracker.rollback(&first.id(), a.epoch + 1).is_none());
        assert!(tracker.rollback(&first.id(), a.epoch).is_some());
        assert_eq!(worker.active(), 1);
        assert_eq!(worker.completed_count() + worker.failed_count(), 0);

        assert!(tracker.evict(&second.id(), "w2").is_none());
        assert_eq!(tracker.executions_on("w1"), vec![second.id()]);
        assert!(tracker.evict(&second.id(), "w1").is_some());
        assert!(tracker.is_empty());
    }
}
