pub mod app_config;
pub mod dispatcher_worker;
pub mod observability;
pub mod resilience;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use dispatcher_worker::{DispatcherConfig, LocalWorkerConfig, RegistryConfig};
pub use observability::ObservabilityConfig;
pub use resilience::{MaintenanceConfig, RetryConfig};
