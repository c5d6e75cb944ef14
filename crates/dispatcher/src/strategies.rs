use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{Task, WorkerNode};

/// Worker选择策略
///
/// 传入的候选Worker已经过健康、能力和容量过滤，并按注册顺序排列。
/// 选择过程不会阻塞，没有候选时返回 `None`。
pub trait WorkerSelectionStrategy: Send + Sync {
    fn select(&self, task: &Task, candidates: &[Arc<WorkerNode>]) -> Option<Arc<WorkerNode>>;

    fn name(&self) -> &str;
}

/// 比较两个Worker的负载率 active/max，用交叉相乘避免浮点误差
fn compare_load(a: &WorkerNode, b: &WorkerNode) -> CmpOrdering {
    let lhs = a.active() as u128 * b.max_concurrency() as u128;
    let rhs = b.active() as u128 * a.max_concurrency() as u128;
    lhs.cmp(&rhs)
}

/// 选择负载率最低的Worker，负载相同时先注册者优先
pub struct LoadBasedStrategy;

impl LoadBasedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadBasedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for LoadBasedStrategy {
    fn select(&self, task: &Task, candidates: &[Arc<WorkerNode>]) -> Option<Arc<WorkerNode>> {
        let selected = candidates.iter().min_by(|a, b| {
            compare_load(a, b).then_with(|| a.registration_seq().cmp(&b.registration_seq()))
        })?;

        debug!(
            task_id = %task.id,
            worker_id = selected.id(),
            load = selected.load_factor(),
            "负载均衡策略选择Worker"
        );

        Some(Arc::clone(selected))
    }

    fn name(&self) -> &str {
        "LoadBased"
    }
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for RoundRobinStrategy {
    fn select(&self, task: &Task, candidates: &[Arc<WorkerNode>]) -> Option<Arc<WorkerNode>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let selected = &candidates[index];

        debug!(
            task_id = %task.id,
            worker_id = selected.id(),
            index,
            total = candidates.len(),
            "轮询策略选择Worker"
        );

        Some(Arc::clone(selected))
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 根据配置名称创建策略
pub fn strategy_from_name(name: &str) -> SchedulerResult<Arc<dyn WorkerSelectionStrategy>> {
    match name {
        "load_based" => Ok(Arc::new(LoadBasedStrategy::new())),
        "round_robin" => Ok(Arc::new(RoundRobinStrategy::new())),
        other => Err(SchedulerError::Configuration(format!(
            "无效的选择策略: {other}"
        ))),
    }
}
