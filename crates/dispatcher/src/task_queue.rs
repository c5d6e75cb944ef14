use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use scheduler_domain::{remaining_until, PendingTask, TaskId};

use crate::delay_queue::DelayHeap;

/// 从队列中取出的任务，附带入队序号
///
/// 原样交回 `TaskQueue::requeue` 时保留序号，因此不会排到同级任务之后。
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub pending: PendingTask,
    seq: u64,
}

impl QueuedTask {
    pub fn id(&self) -> TaskId {
        self.pending.id()
    }

    pub fn into_pending(self) -> PendingTask {
        self.pending
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // 优先级高者在前；同优先级按可执行时间、创建时间、入队序号升序
    fn cmp(&self, other: &Self) -> Ordering {
        self.pending
            .priority()
            .cmp(&other.pending.priority())
            .then_with(|| other.pending.not_before.cmp(&self.pending.not_before))
            .then_with(|| other.pending.task.created_at.cmp(&self.pending.task.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<QueuedTask>,
    delayed: DelayHeap<QueuedTask>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, entry: QueuedTask) {
        if entry.pending.not_before <= Utc::now() {
            self.ready.push(entry);
        } else {
            self.delayed.push(entry.pending.not_before, entry);
        }
    }

    fn promote_due(&mut self) {
        for entry in self.delayed.drain_due(Utc::now()) {
            self.ready.push(entry);
        }
    }

    /// 取出任务类型不在 `blocked` 中的最高优先级条目，跳过的条目连同序号原样放回
    fn pop_ready_excluding(&mut self, blocked: &HashSet<String>) -> Option<QueuedTask> {
        if blocked.is_empty() {
            return self.ready.pop();
        }

        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = self.ready.pop() {
            if blocked.contains(&entry.pending.task.task_type) {
                skipped.push(entry);
            } else {
                found = Some(entry);
                break;
            }
        }
        self.ready.extend(skipped);
        found
    }
}

/// 按优先级排序的待分发任务队列
///
/// 未到可执行时间的任务保存在按时间排序的延迟堆里，`take_ready` 只在有任务到期或
/// 有新任务入队时才被唤醒，不会空转轮询。
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// 新任务入队
    pub fn push(&self, pending: PendingTask) {
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            trace!(task_id = %pending.id(), seq, "任务入队");
            state.insert(QueuedTask { pending, seq });
        }
        self.notify.notify_one();
    }

    /// 原样放回之前取出的任务
    pub fn requeue(&self, entry: QueuedTask) {
        self.state.lock().insert(entry);
        self.notify.notify_one();
    }

    /// 非阻塞地取出当前最高优先级的可执行任务
    pub fn try_take_ready(&self) -> Option<QueuedTask> {
        self.try_take_ready_excluding(&HashSet::new())
    }

    /// 非阻塞地取出最高优先级的可执行任务，忽略 `blocked` 中的任务类型
    pub fn try_take_ready_excluding(&self, blocked: &HashSet<String>) -> Option<QueuedTask> {
        let mut state = self.state.lock();
        state.promote_due();
        state.pop_ready_excluding(blocked)
    }

    /// 取出一个可执行任务，队列中没有到期任务时挂起
    ///
    /// 取消安全：返回前不存在await点，被丢弃的future不会带走任务。
    pub async fn take_ready(&self) -> QueuedTask {
        self.take_ready_excluding(&HashSet::new()).await
    }

    /// 同 `take_ready`，但只返回任务类型不在 `blocked` 中的任务
    ///
    /// 被跳过的任务留在队列中并保持原有位置。
    pub async fn take_ready_excluding(&self, blocked: &HashSet<String>) -> QueuedTask {
        loop {
            let notified = self.notify.notified();

            let wait = {
                let mut state = self.state.lock();
                state.promote_due();
                if let Some(entry) = state.pop_ready_excluding(blocked) {
                    return entry;
                }
                state
                    .delayed
                    .next_deadline()
                    .map(|deadline| remaining_until(deadline, Utc::now()))
            };

            match wait {
                Some(duration) => {
                    trace!(wait_ms = duration.as_millis() as u64, "等待最早的任务到期");
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        let state = self.state.lock();
        state.ready.iter().any(|entry| entry.id() == *task_id)
            || state.delayed.iter().any(|entry| entry.id() == *task_id)
    }

    /// 某个任务在队列中出现的次数，正常情况下只会是0或1
    pub fn occurrences(&self, task_id: &TaskId) -> usize {
        let state = self.state.lock();
        state
            .ready
            .iter()
            .chain(state.delayed.iter())
            .filter(|entry| entry.id() == *task_id)
            .count()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (已到期数, 未到期数)
    pub fn depths(&self) -> (usize, usize) {
        let mut state = self.state.lock();
        state.promote_due();
        (state.ready.len(), state.delayed.len())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
