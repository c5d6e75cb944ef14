use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use scheduler_core::MaintenanceConfig;
use scheduler_domain::TaskId;

use crate::recovery_service::WorkerRecovery;
use crate::shutdown::ShutdownSignal;
use crate::worker_registry::WorkerRegistry;

/// 一次维护扫描的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub evicted_workers: Vec<String>,
    pub recovered_tasks: Vec<TaskId>,
}

/// Worker失效检测（维护循环）
///
/// 按固定间隔扫描注册表，注销心跳超时的Worker并恢复它们的在途任务。
pub struct WorkerFailureDetector {
    config: MaintenanceConfig,
    registry: Arc<WorkerRegistry>,
    recovery: Arc<WorkerRecovery>,
}

impl WorkerFailureDetector {
    pub fn new(
        config: MaintenanceConfig,
        registry: Arc<WorkerRegistry>,
        recovery: Arc<WorkerRecovery>,
    ) -> Self {
        Self {
            config,
            registry,
            recovery,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// 以 `now` 为当前时间执行一次扫描
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for worker_id in self.registry.unhealthy_workers(now) {
            if let Some(node) = self.registry.get(&worker_id) {
                warn!(
                    worker_id = %worker_id,
                    last_heartbeat = %node.last_heartbeat().format("%Y-%m-%d %H:%M:%S UTC"),
                    "检测到失效Worker"
                );
            }

            match self.recovery.recover_worker(&worker_id) {
                Ok(recovered) => {
                    report.recovered_tasks.extend(recovered);
                    report.evicted_workers.push(worker_id);
                }
                // 并发注销时Worker可能已经不在注册表中
                Err(e) => debug!(worker_id = %worker_id, error = %e, "跳过失效Worker"),
            }
        }

        if !report.evicted_workers.is_empty() {
            info!(
                evicted = report.evicted_workers.len(),
                recovered = report.recovered_tasks.len(),
                "维护扫描完成"
            );
        }
        report
    }

    pub async fn run(&self, shutdown: ShutdownSignal) {
        if !self.config.enabled {
            info!("维护循环已禁用");
            return;
        }

        let period = Duration::from_millis(self.config.interval_ms);
        info!(interval_ms = self.config.interval_ms, "启动Worker失效检测循环");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一次tick立即返回，跳过它以免启动时就扫描
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    let report = self.sweep();
                    if !report.evicted_workers.is_empty() && self.registry.is_empty() {
                        error!("所有Worker均已失效");
                    }
                }
            }
        }

        info!("Worker失效检测循环已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use scheduler_core::RegistryConfig;
    use scheduler_domain::{NewTask, PendingTask};

    use crate::execution_tracker::ExecutionTracker;
    use crate::metrics::SchedulerMetrics;
    use crate::task_queue::TaskQueue;
    use crate::task_state::TaskStateTable;

    struct Fixture {
        registry: Arc<WorkerRegistry>,
        tracker: Arc<ExecutionTracker>,
        queue: Arc<TaskQueue>,
        states: Arc<TaskStateTable>,
        detector: WorkerFailureDetector,
    }

    fn fixture(heartbeat_timeout_ms: u64, interval_ms: u64) -> Fixture {
        let registry = Arc::new(WorkerRegistry::with_load_based(&RegistryConfig {
            heartbeat_timeout_ms,
        }));
        let states = Arc::new(TaskStateTable::new());
        let tracker = Arc::new(ExecutionTracker::new(
            Arc::clone(&registry),
            Arc::clone(&states),
        ));
        let queue = Arc::new(TaskQueue::new());
        let recovery = Arc::new(WorkerRecovery::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&queue),
            Arc::clone(&states),
            Arc::new(SchedulerMetrics::new()),
        ));
        let detector = WorkerFailureDetector::new(
            MaintenanceConfig {
                enabled: true,
                interval_ms,
            },
            Arc::clone(&registry),
            recovery,
        );
        Fixture {
            registry,
            tracker,
            queue,
            states,
            detector,
        }
    }

    fn dispatch(f: &Fixture, worker_id: &str) -> TaskId {
        let worker = f.registry.get(worker_id).unwrap();
        let pending = PendingTask::new(Arc::new(NewTask::new("echo").build()));
        f.states.reserve(pending.id()).unwrap();
        assert!(worker.try_acquire_slot());
        f.tracker.record_dispatch(&pending, &worker).unwrap();
        pending.id()
    }

    #[test]
    fn test_sweep_evicts_only_unhealthy_workers() {
        let f = fixture(1_000, 1_000);
        f.registry.register("stale", ["echo"], 2).unwrap();
        f.registry.register("alive", ["echo"], 2).unwrap();
        let lost = dispatch(&f, "stale");

        let later = Utc::now() + TimeDelta::seconds(3);
        f.registry.heartbeat_at("alive", later).unwrap();

        let report = f.detector.sweep_at(later);
        assert_eq!(report.evicted_workers, vec!["stale".to_string()]);
        assert_eq!(report.recovered_tasks, vec![lost]);
        assert!(f.registry.get("stale").is_none());
        assert!(f.registry.get("alive").is_some());
        assert_eq!(f.queue.occurrences(&lost), 1);
    }

    #[test]
    fn test_sweep_with_healthy_workers_is_noop() {
        let f = fixture(60_000, 1_000);
        f.registry.register("w1", ["echo"], 2).unwrap();
        dispatch(&f, "w1");

        assert_eq!(f.detector.sweep(), SweepReport::default());
        assert_eq!(f.tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_run_recovers_silent_worker() {
        let f = fixture(50, 20);
        f.registry.register("w1", ["echo"], 2).unwrap();
        let lost = dispatch(&f, "w1");

        let detector = Arc::new(f.detector);
        let (trigger, signal) = crate::shutdown::shutdown_channel();
        let handle = {
            let detector = Arc::clone(&detector);
            tokio::spawn(async move { detector.run(signal).await })
        };

        let entry = tokio::time::timeout(Duration::from_secs(2), f.queue.take_ready())
            .await
            .unwrap();
        assert_eq!(entry.id(), lost);
        assert!(f.registry.is_empty());

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
