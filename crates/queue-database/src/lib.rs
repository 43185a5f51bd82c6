//! # 排队数据库模块
//!
//! 负责排队记录的持久化，提供PostgreSQL连接池、基于条件更新的存储实现，
//! 以及语义一致的内存存储（用于测试与演示）。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryQueueStore;
pub use models::*;
pub use queries::PgQueueStore;
