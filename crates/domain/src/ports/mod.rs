pub mod execution;

pub use execution::{TaskExecutor, WorkerEvent};
