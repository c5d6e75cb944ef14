pub mod config;
pub mod errors;
pub mod logging;

pub use config::{
    AppConfig, DispatcherConfig, LocalWorkerConfig, MaintenanceConfig, ObservabilityConfig,
    RegistryConfig, RetryConfig,
};
pub use errors::*;
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
