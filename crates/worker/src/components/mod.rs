pub mod heartbeat_manager;

pub use heartbeat_manager::HeartbeatManager;
