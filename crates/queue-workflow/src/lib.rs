//! # 排队流程模块
//!
//! 提供排队叫号的核心编排功能，包括：
//! - 状态机：排队记录的合法状态转换
//! - 排队号分配：分区内连续、无重复的排队号
//! - 编排引擎：挂号入队、叫号、过号和查询
//! - 副作用交接：提交后异步分发任务和实时事件
//! - 批量导入：逐条隔离的历史数据导入

pub mod allocator;
mod deadline;
pub mod engine;
pub mod import;
pub mod side_effects;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出主要类型
pub use allocator::NumberAllocator;
pub use engine::{CreateQueueRequest, QueueEngine};
pub use import::{ImportItem, ImportItemResult, ImportReport};
pub use side_effects::{SideEffectWorkers, SideEffects};
pub use state_machine::{QueueAction, QueueStateMachine};
