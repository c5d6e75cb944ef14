//! 调度器配置
//!
//! 配置按以下顺序分层加载：内置默认值 → TOML配置文件 → `SCHEDULER_` 前缀的环境变量。
//! 每个配置段都提供 `validate()`，在加载完成后统一校验。

pub mod models;

pub use models::*;
