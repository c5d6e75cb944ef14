pub mod components;
pub mod executor_factory;
pub mod executors;
pub mod service;

pub use components::HeartbeatManager;
pub use executor_factory::HandlerRegistry;
pub use executors::{
    EchoHandler, FailHandler, FailTaskParams, SleepHandler, SleepTaskParams, TaskHandler,
};
pub use service::LocalWorkerPool;
