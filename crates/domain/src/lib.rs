pub mod entities;
pub mod models;
pub mod ports;
pub mod stats;
pub mod value_objects;

pub use entities::*;
pub use models::*;
pub use ports::*;
pub use scheduler_core::{SchedulerError, SchedulerResult};
pub use stats::SchedulerStats;
pub use value_objects::*;
