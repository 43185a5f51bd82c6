//! 排队状态机
//!
//! 管理排队记录的状态转换规则

use queue_core::{QueueError, QueueRecord, QueueStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// 排队状态转换动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueAction {
    Call,     // 叫号
    Complete, // 就诊结束
    Skip,     // 过号
}

/// 排队状态机
#[derive(Debug)]
pub struct QueueStateMachine {
    transitions: HashMap<(QueueStatus, QueueAction), QueueStatus>,
}

impl QueueStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 过号只允许从候诊状态发起
        transitions.insert((QueueStatus::Waiting, QueueAction::Call), QueueStatus::Current);
        transitions.insert((QueueStatus::Current, QueueAction::Complete), QueueStatus::Completed);
        transitions.insert((QueueStatus::Waiting, QueueAction::Skip), QueueStatus::Skipped);

        Self { transitions }
    }

    /// 执行状态转换
    pub fn transition(&self, from: QueueStatus, action: QueueAction) -> Result<QueueStatus> {
        match self.transitions.get(&(from, action)) {
            Some(to) => Ok(*to),
            None => Err(QueueError::InvalidStateTransition {
                from: from.to_string(),
                action: format!("{:?}", action),
            }),
        }
    }

    /// 校验存储条件更新返回的记录落在转换表给出的目标状态
    pub fn confirm(&self, from: QueueStatus, action: QueueAction, record: &QueueRecord) -> Result<()> {
        let expected = self.transition(from, action)?;
        if record.status != expected {
            return Err(QueueError::Internal(format!(
                "queue record {} is {} after {:?}, expected {}",
                record.id, record.status, action, expected
            )));
        }
        Ok(())
    }

    /// `newer` 能否经一次或多次转换从 `older` 到达
    ///
    /// 单条记录的状态只会沿转换表前进，可达性即提交先后。
    pub fn supersedes(&self, newer: QueueStatus, older: QueueStatus) -> bool {
        let mut frontier = vec![older];
        let mut seen = HashSet::new();

        while let Some(state) = frontier.pop() {
            for ((from, _), to) in &self.transitions {
                if *from != state || !seen.insert(*to) {
                    continue;
                }
                if *to == newer {
                    return true;
                }
                frontier.push(*to);
            }
        }
        false
    }
}

impl Default for QueueStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
