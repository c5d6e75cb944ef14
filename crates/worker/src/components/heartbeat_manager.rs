use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use scheduler_domain::WorkerEvent;

/// 定期为池内每个Worker发送心跳事件
pub struct HeartbeatManager {
    worker_ids: Vec<String>,
    heartbeat_interval: Duration,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl HeartbeatManager {
    pub fn new(
        worker_ids: Vec<String>,
        heartbeat_interval: Duration,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            worker_ids,
            heartbeat_interval,
            events,
        }
    }

    /// 立即为所有Worker发送一次心跳
    pub fn beat(&self) -> bool {
        for worker_id in &self.worker_ids {
            let event = WorkerEvent::Heartbeat {
                worker_id: worker_id.clone(),
            };
            if self.events.send(event).is_err() {
                return false;
            }
        }
        true
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                workers = self.worker_ids.len(),
                interval_ms = self.heartbeat_interval.as_millis() as u64,
                "心跳任务启动"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.beat() {
                            warn!("事件通道已关闭，心跳任务退出");
                            break;
                        }
                        debug!(workers = self.worker_ids.len(), "已发送心跳");
                    }
                    _ = shutdown_rx.recv() => {
                        info!("心跳任务停止");
                        break;
                    }
                }
            }
        })
    }
}
