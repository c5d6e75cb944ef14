use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, info};

use scheduler_core::{RegistryConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{Task, TaskId, WorkerNode, WorkerSnapshot};

use crate::strategies::{LoadBasedStrategy, WorkerSelectionStrategy};

/// Worker注册表：身份、能力、容量与存活状态
pub struct WorkerRegistry {
    workers: DashMap<String, Arc<WorkerNode>>,
    next_seq: AtomicU64,
    heartbeat_timeout: Duration,
    strategy: Arc<dyn WorkerSelectionStrategy>,
    capacity_notify: Notify,
}

impl WorkerRegistry {
    pub fn new(config: &RegistryConfig, strategy: Arc<dyn WorkerSelectionStrategy>) -> Self {
        Self {
            workers: DashMap::new(),
            next_seq: AtomicU64::new(0),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
            strategy,
            capacity_notify: Notify::new(),
        }
    }

    pub fn with_load_based(config: &RegistryConfig) -> Self {
        Self::new(config, Arc::new(LoadBasedStrategy::new()))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    pub fn register(
        &self,
        worker_id: &str,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        max_concurrency: usize,
    ) -> SchedulerResult<Arc<WorkerNode>> {
        if worker_id.is_empty() {
            return Err(SchedulerError::InvalidArgument("Worker ID不能为空".to_string()));
        }
        if max_concurrency == 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "Worker {worker_id} 的最大并发数必须大于0"
            )));
        }

        let capabilities: HashSet<String> = capabilities.into_iter().map(Into::into).collect();
        if capabilities.is_empty() {
            return Err(SchedulerError::InvalidArgument(format!(
                "Worker {worker_id} 未声明任何任务类型"
            )));
        }

        let node = match self.workers.entry(worker_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(SchedulerError::WorkerAlreadyRegistered {
                    id: worker_id.to_string(),
                })
            }
            Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let node = Arc::new(WorkerNode::new(
                    worker_id,
                    capabilities,
                    max_concurrency,
                    seq,
                ));
                vacant.insert(Arc::clone(&node));
                node
            }
        };

        info!(
            worker_id,
            max_concurrency,
            capabilities = ?node.capabilities(),
            "Worker注册成功"
        );
        self.notify_capacity();
        Ok(node)
    }

    /// 注销Worker，返回其上仍在执行的任务ID
    pub fn unregister(&self, worker_id: &str) -> SchedulerResult<Vec<TaskId>> {
        let (_, node) = self
            .workers
            .remove(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;

        let in_flight = node.retire();
        info!(
            worker_id,
            in_flight = in_flight.len(),
            completed = node.completed_count(),
            failed = node.failed_count(),
            "Worker已注销"
        );
        Ok(in_flight)
    }

    pub fn heartbeat(&self, worker_id: &str) -> SchedulerResult<()> {
        self.heartbeat_at(worker_id, Utc::now())
    }

    pub fn heartbeat_at(&self, worker_id: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        let node = self.get(worker_id).ok_or_else(|| SchedulerError::WorkerNotFound {
            id: worker_id.to_string(),
        })?;
        let was_healthy = node.is_healthy(at, self.heartbeat_timeout);
        node.record_heartbeat(at);
        debug!(worker_id, "收到Worker心跳");
        if !was_healthy {
            self.notify_capacity();
        }
        Ok(())
    }

    /// 为任务选择Worker：健康、声明支持该类型、仍有空闲槽位
    pub fn select(&self, task: &Task) -> Option<Arc<WorkerNode>> {
        self.select_at(task, Utc::now())
    }

    pub fn select_at(&self, task: &Task, now: DateTime<Utc>) -> Option<Arc<WorkerNode>> {
        let mut candidates: Vec<Arc<WorkerNode>> = self
            .workers
            .iter()
            .filter(|entry| {
                let node = entry.value();
                node.is_healthy(now, self.heartbeat_timeout)
                    && node.accepts(&task.task_type)
                    && node.has_capacity()
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if candidates.is_empty() {
            debug!(task_id = %task.id, task_type = %task.task_type, "没有可用的Worker");
            return None;
        }

        candidates.sort_by_key(|node| node.registration_seq());
        self.strategy.select(task, &candidates)
    }

    /// 是否有任何已注册Worker（不论健康与否）声明支持该任务类型
    pub fn has_capable_worker(&self, task_type: &str) -> bool {
        self.workers
            .iter()
            .any(|entry| entry.value().accepts(task_type))
    }

    pub fn get(&self, worker_id: &str) -> Option<Arc<WorkerNode>> {
        self.workers
            .get(worker_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn unhealthy_workers(&self, now: DateTime<Utc>) -> Vec<String> {
        self.workers
            .iter()
            .filter(|entry| !entry.value().is_healthy(now, self.heartbeat_timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn healthy_count(&self, now: DateTime<Utc>) -> usize {
        self.workers
            .iter()
            .filter(|entry| entry.value().is_healthy(now, self.heartbeat_timeout))
            .count()
    }

    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let now = Utc::now();
        let mut snapshots: Vec<(u64, WorkerSnapshot)> = self
            .workers
            .iter()
            .map(|entry| {
                let node = entry.value();
                (
                    node.registration_seq(),
                    node.snapshot(now, self.heartbeat_timeout),
                )
            })
            .collect();
        snapshots.sort_by_key(|(seq, _)| *seq);
        snapshots.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// 有容量释放（完成回报、注册、恢复健康）时唤醒等待中的分发循环
    pub fn notify_capacity(&self) {
        self.capacity_notify.notify_one();
    }

    pub async fn capacity_changed(&self) {
        self.capacity_notify.notified().await
    }
}
