//! 调度器指标
//!
//! 通过 `metrics` 门面记录；未安装recorder时所有操作都是空操作。
//! 句柄在构造时绑定到当前的全局recorder，因此应在安装exporter之后再创建。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

use scheduler_domain::SchedulerStats;

pub struct SchedulerMetrics {
    tasks_scheduled_total: Counter,
    tasks_dispatched_total: Counter,
    tasks_completed_total: Counter,
    tasks_failed_total: Counter,
    tasks_retried_total: Counter,
    tasks_dead_lettered_total: Counter,
    tasks_recovered_total: Counter,
    task_execution_duration: Histogram,

    queue_depth: Gauge,
    in_flight: Gauge,
    retry_queue_depth: Gauge,
    dead_letter_depth: Gauge,
    registered_workers: Gauge,
    healthy_workers: Gauge,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self {
            tasks_scheduled_total: counter!("scheduler_tasks_scheduled_total"),
            tasks_dispatched_total: counter!("scheduler_tasks_dispatched_total"),
            tasks_completed_total: counter!("scheduler_tasks_completed_total"),
            tasks_failed_total: counter!("scheduler_tasks_failed_total"),
            tasks_retried_total: counter!("scheduler_tasks_retried_total"),
            tasks_dead_lettered_total: counter!("scheduler_tasks_dead_lettered_total"),
            tasks_recovered_total: counter!("scheduler_tasks_recovered_total"),
            task_execution_duration: histogram!("scheduler_task_execution_duration_seconds"),
            queue_depth: gauge!("scheduler_queue_depth"),
            in_flight: gauge!("scheduler_in_flight"),
            retry_queue_depth: gauge!("scheduler_retry_queue_depth"),
            dead_letter_depth: gauge!("scheduler_dead_letter_depth"),
            registered_workers: gauge!("scheduler_registered_workers"),
            healthy_workers: gauge!("scheduler_healthy_workers"),
        }
    }

    pub fn record_scheduled(&self) {
        self.tasks_scheduled_total.increment(1);
    }

    pub fn record_dispatched(&self) {
        self.tasks_dispatched_total.increment(1);
    }

    /// 记录一次执行结果及其耗时
    pub fn record_execution(&self, success: bool, duration_ms: u64) {
        if success {
            self.tasks_completed_total.increment(1);
        } else {
            self.tasks_failed_total.increment(1);
        }
        self.task_execution_duration
            .record(duration_ms as f64 / 1_000.0);
    }

    pub fn record_retried(&self) {
        self.tasks_retried_total.increment(1);
    }

    pub fn record_dead_lettered(&self) {
        self.tasks_dead_lettered_total.increment(1);
    }

    pub fn record_recovered(&self, count: usize) {
        self.tasks_recovered_total.increment(count as u64);
    }

    /// 用状态快照刷新全部gauge
    pub fn update_from_stats(&self, stats: &SchedulerStats) {
        self.queue_depth.set(stats.queue_depth as f64);
        self.in_flight.set(stats.in_flight as f64);
        self.retry_queue_depth.set(stats.retry_queue_depth as f64);
        self.dead_letter_depth.set(stats.dead_letter_depth as f64);
        self.registered_workers.set(stats.registered_workers as f64);
        self.healthy_workers.set(stats.healthy_workers as f64);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
