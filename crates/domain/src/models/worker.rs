use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::entities::TaskId;

/// Worker健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Default)]
struct InFlight {
    tasks: HashSet<TaskId>,
    /// 已从注册表移除，不再接受新的执行
    retired: bool,
}

/// 已注册的Worker节点
///
/// 活跃数、完成/失败计数和心跳时间都是原子量，分发循环与维护循环对不同Worker的
/// 更新互不阻塞。
#[derive(Debug)]
pub struct WorkerNode {
    id: String,
    capabilities: HashSet<String>,
    max_concurrency: usize,
    registration_seq: u64,
    registered_at: DateTime<Utc>,
    active: AtomicUsize,
    last_heartbeat_ms: AtomicI64,
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: Mutex<InFlight>,
}

impl WorkerNode {
    pub fn new(
        id: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
        max_concurrency: usize,
        registration_seq: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            max_concurrency,
            registration_seq,
            registered_at: now,
            active: AtomicUsize::new(0),
            last_heartbeat_ms: AtomicI64::new(now.timestamp_millis()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &HashSet<String> {
        &self.capabilities
    }

    /// 能力匹配是简单的集合成员判断
    pub fn accepts(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn registration_seq(&self) -> u64 {
        self.registration_seq
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn has_capacity(&self) -> bool {
        self.active() < self.max_concurrency
    }

    /// 负载率 = 活跃数 / 最大并发
    pub fn load_factor(&self) -> f64 {
        if self.max_concurrency == 0 {
            1.0
        } else {
            self.active() as f64 / self.max_concurrency as f64
        }
    }

    /// 占用一个执行槽位，活跃数永远不会超过最大并发
    pub fn try_acquire_slot(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max_concurrency).then_some(active + 1)
            })
            .is_ok()
    }

    pub fn release_slot(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                active.checked_sub(1)
            });
    }

    pub fn record_heartbeat(&self, at: DateTime<Utc>) {
        self.last_heartbeat_ms
            .fetch_max(at.timestamp_millis(), Ordering::AcqRel);
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        let millis = self.last_heartbeat_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(self.registered_at)
    }

    /// 距上次心跳的时间严格小于超时即为健康
    pub fn is_healthy(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let elapsed_ms = now.timestamp_millis() - self.last_heartbeat_ms.load(Ordering::Acquire);
        elapsed_ms < i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn status(&self, now: DateTime<Utc>, timeout: Duration) -> WorkerStatus {
        if self.is_healthy(now, timeout) {
            WorkerStatus::Healthy
        } else {
            WorkerStatus::Unhealthy
        }
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// 登记一个在该Worker上执行的任务；Worker已被移除时返回false
    pub fn attach(&self, task_id: TaskId) -> bool {
        let mut in_flight = self.in_flight.lock();
        if in_flight.retired {
            return false;
        }
        in_flight.tasks.insert(task_id);
        true
    }

    pub fn detach(&self, task_id: &TaskId) -> bool {
        self.in_flight.lock().tasks.remove(task_id)
    }

    pub fn in_flight(&self) -> Vec<TaskId> {
        self.in_flight.lock().tasks.iter().copied().collect()
    }

    /// 标记为已移除并取出全部在途任务，之后 `attach` 一律失败
    pub fn retire(&self) -> Vec<TaskId> {
        let mut in_flight = self.in_flight.lock();
        in_flight.retired = true;
        in_flight.tasks.drain().collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>, timeout: Duration) -> WorkerSnapshot {
        let mut capabilities: Vec<String> = self.capabilities.iter().cloned().collect();
        capabilities.sort();
        WorkerSnapshot {
            id: self.id.clone(),
            capabilities,
            max_concurrency: self.max_concurrency,
            active: self.active(),
            status: self.status(now, timeout),
            last_heartbeat: self.last_heartbeat(),
            registered_at: self.registered_at,
            completed: self.completed_count(),
            failed: self.failed_count(),
        }
    }
}

/// Worker的只读快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSnapshot {
    pub id: String,
    pub capabilities: Vec<String>,
    pub max_concurrency: usize,
    pub active: usize,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub completed: u64,
    pub failed: u64,
}
