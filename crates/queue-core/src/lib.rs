//! # Queue Core
//!
//! 排队叫号系统的核心模块，提供基础数据结构、错误定义、存储契约和通用工具。

pub mod error;
pub mod events;
pub mod models;
pub mod store;
pub mod utils;

pub use error::{QueueError, Result};
pub use events::{EventPublisher, Job, JobDispatcher, JobName, JobPayload, QueueEvent};
pub use models::*;
pub use store::{
    NewQueueRecord, ParticipantDirectory, QueueStore, StoreError, StoreResult, UniqueConstraint,
};
