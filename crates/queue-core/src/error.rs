//! 错误定义模块

use thiserror::Error;

use crate::store::{StoreError, UniqueConstraint};

/// 排队系统统一错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("验证错误: {0}")]
    Validation(String),

    #[error("冲突: {0}")]
    Conflict(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效状态转换: 从 {from} 执行 {action}")]
    InvalidStateTransition { from: String, action: String },

    #[error("存储操作超时: {0}")]
    Timeout(String),

    #[error("下游通道错误: {0}")]
    Downstream(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl QueueError {
    /// 面向调用方的错误类别代码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT_ERROR",
            Self::NotFound(_) => "NOT_FOUND_ERROR",
            Self::InvalidStateTransition { .. } => "STATE_ERROR",
            Self::Timeout(_) => "TIMEOUT_ERROR",
            Self::Downstream(_) => "DOWNSTREAM_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 调用方可以安全重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(UniqueConstraint::Registration) => {
                QueueError::Conflict("registration already has a queue record".to_string())
            }
            StoreError::UniqueViolation(UniqueConstraint::PartitionNumber) => {
                QueueError::Conflict("queue number already taken in partition".to_string())
            }
            StoreError::UniqueViolation(UniqueConstraint::PartitionCurrent) => {
                QueueError::Conflict("partition already has a current queue record".to_string())
            }
            StoreError::Timeout => QueueError::Timeout("store operation timed out".to_string()),
            // 后端原始信息只进日志，不返回调用方
            StoreError::Backend(detail) => {
                tracing::error!(%detail, "Queue store backend failure");
                QueueError::Database("queue store unavailable".to_string())
            }
        }
    }
}

/// 排队系统统一结果类型
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: QueueError = StoreError::UniqueViolation(UniqueConstraint::Registration).into();
        assert!(matches!(err, QueueError::Conflict(_)));

        let err: QueueError = StoreError::Timeout.into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "TIMEOUT_ERROR");
    }

    #[test]
    fn test_backend_detail_is_hidden() {
        let err: QueueError = StoreError::Backend("relation \"x\" does not exist".into()).into();
        assert!(!err.to_string().contains("relation"));
    }
}
