pub mod worker;

pub use worker::{WorkerNode, WorkerSnapshot, WorkerStatus};
