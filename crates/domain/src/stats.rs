use serde::{Deserialize, Serialize};

/// 调度器运行状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStats {
    /// 任务队列中的条目总数（就绪 + 尚未到期）
    pub queue_depth: usize,
    pub ready_depth: usize,
    pub delayed_depth: usize,
    pub in_flight: usize,
    pub retry_queue_depth: usize,
    pub dead_letter_depth: usize,
    pub registered_workers: usize,
    pub healthy_workers: usize,
    pub completed_total: u64,
    pub failed_total: u64,
}
