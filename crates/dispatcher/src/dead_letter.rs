use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::error;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{DeadLetterEntry, TaskId};

/// 死信存储：重试耗尽或无法路由的任务的终点
///
/// 条目不会被自动重新分发，只能通过 `take` 由运维显式取回。
#[derive(Default)]
pub struct DeadLetterSink {
    entries: DashMap<TaskId, DeadLetterEntry>,
}

impl DeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入死信，同一任务不会出现两次
    pub fn commit(&self, entry: DeadLetterEntry) -> SchedulerResult<()> {
        let task_id = entry.task.id;
        match self.entries.entry(task_id) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateTask { id: task_id }),
            Entry::Vacant(vacant) => {
                error!(
                    task_id = %task_id,
                    task_type = %entry.task.task_type,
                    reason = ?entry.reason,
                    retry_count = entry.retry_count,
                    failures = entry.failures.len(),
                    "任务进入死信队列"
                );
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, task_id: &TaskId) -> Option<DeadLetterEntry> {
        self.entries.get(task_id).map(|entry| entry.value().clone())
    }

    /// 取出一条死信（用于人工重新入队）
    pub fn take(&self, task_id: &TaskId) -> Option<DeadLetterEntry> {
        self.entries.remove(task_id).map(|(_, entry)| entry)
    }

    /// 按进入死信的时间排序
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        let mut entries: Vec<DeadLetterEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.dead_lettered_at);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
