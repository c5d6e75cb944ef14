use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

struct Delayed<T> {
    at: DateTime<Utc>,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    // BinaryHeap是大顶堆，反转后最早到期的在堆顶；同一时间按插入顺序
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 按到期时间排序的最小堆
///
/// 本身不负责等待，调用方用 `next_deadline` 计算需要休眠的时长。
pub struct DelayHeap<T> {
    heap: BinaryHeap<Delayed<T>>,
    next_seq: u64,
}

impl<T> DelayHeap<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Delayed { at, seq, item });
    }

    /// 最早的到期时间
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|delayed| delayed.at)
    }

    /// 弹出一个在 `now` 之前（含）到期的元素
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<T> {
        if self.heap.peek()?.at <= now {
            self.heap.pop().map(|delayed| delayed.item)
        } else {
            None
        }
    }

    /// 弹出所有已到期的元素，按到期顺序返回
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(item) = self.pop_due(now) {
            due.push(item);
        }
        due
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|delayed| &delayed.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for DelayHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}
