use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{TaskId, TaskState};

/// 任务生命周期表
///
/// 任务ID在调度器生命周期内保持唯一，终态记录不会被删除。
/// 状态只由当前持有任务的组件修改：从队列取出、从执行表移除或从重试堆弹出的一方。
#[derive(Default)]
pub struct TaskStateTable {
    states: DashMap<TaskId, TaskState>,
}

impl TaskStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为新任务占用ID，ID已存在时返回 `DuplicateTask`
    pub fn reserve(&self, task_id: TaskId) -> SchedulerResult<()> {
        match self.states.entry(task_id) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateTask { id: task_id }),
            Entry::Vacant(vacant) => {
                vacant.insert(TaskState::Queued);
                Ok(())
            }
        }
    }

    pub fn set(&self, task_id: TaskId, state: TaskState) {
        self.states.insert(task_id, state);
    }

    /// 仅当当前状态等于 `expected` 时切换到 `next`
    pub fn transition(&self, task_id: TaskId, expected: TaskState, next: TaskState) -> bool {
        match self.states.get_mut(&task_id) {
            Some(mut state) if *state == expected => {
                *state = next;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskState> {
        self.states.get(task_id).map(|state| *state)
    }

    pub fn count_where(&self, predicate: impl Fn(&TaskState) -> bool) -> usize {
        self.states
            .iter()
            .filter(|entry| predicate(entry.value()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_rejects_duplicates() {
        let table = TaskStateTable::new();
        let id = TaskId::new_v4();
        table.reserve(id).unwrap();
        assert_eq!(table.get(&id), Some(TaskState::Queued));
        assert!(matches!(
            table.reserve(id),
            Err(SchedulerError::DuplicateTask { .. })
        ));

        // 终态之后ID依然被占用
        table.set(id, TaskState::Completed { retry_count: 0 });
        assert!(table.reserve(id).is_err());
    }

    #[test]
    fn test_transition_is_conditional() {
        let table = TaskStateTable::new();
        let id = TaskId::new_v4();
        table.reserve(id).unwrap();

        assert!(!table.transition(id, TaskState::Executing, TaskState::Queued));
        assert!(table.transition(id, TaskState::Queued, TaskState::Executing));
        assert_eq!(table.get(&id), Some(TaskState::Executing));
        assert!(!table.transition(TaskId::new_v4(), TaskState::Queued, TaskState::Executing));
        assert_eq!(table.count_where(|s| *s == TaskState::Executing), 1);
    }
}
