//! # 排队集成模块
//!
//! 提供排队状态变更的下游通道，包括：
//! - 消息队列集成，将任务持久化投递到RabbitMQ
//! - 实时通知，按医生和日期主题广播事件

pub mod message_queue;
pub mod realtime;

pub use message_queue::{AmqpDispatcher, LogDispatcher};
pub use realtime::TopicBroadcaster;
