//! In-process task dispatching
//!
//! Priority task queue, worker registry and selection strategies, execution
//! tracking with per-dispatch epochs, retry with exponential backoff, dead
//! letters, and the background loops that tie them together behind
//! [`TaskScheduler`].

pub mod controller;
pub mod dead_letter;
pub mod delay_queue;
pub mod execution_tracker;
pub mod metrics;
pub mod recovery_service;
pub mod retry_service;
pub mod scheduler;
pub mod shutdown;
pub mod strategies;
pub mod task_queue;
pub mod task_state;
pub mod worker_failure_detector;
pub mod worker_registry;

pub use controller::{DispatchAttempt, Dispatcher};
pub use dead_letter::DeadLetterSink;
pub use execution_tracker::ExecutionTracker;
pub use metrics::SchedulerMetrics;
pub use recovery_service::WorkerRecovery;
pub use retry_service::{RetryCoordinator, RetryDecision};
pub use scheduler::TaskScheduler;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use strategies::*;
pub use task_queue::{QueuedTask, TaskQueue};
pub use task_state::TaskStateTable;
pub use worker_failure_detector::{SweepReport, WorkerFailureDetector};
pub use worker_registry::WorkerRegistry;
