//! # 门诊排队叫号编排服务
//!
//! 汇总各子模块，便于演示程序和外部集成直接引用。

pub use queue_admin;
pub use queue_core;
pub use queue_database;
pub use queue_integration;
pub use queue_workflow;

pub use queue_core::{QueueError, QueueRecord, QueueStatus, Result};
pub use queue_workflow::{CreateQueueRequest, QueueEngine};
