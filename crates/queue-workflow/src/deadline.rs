//! 存储调用的超时边界

use queue_admin::QueueMetrics;
use queue_core::{QueueError, StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;

/// 在 `timeout` 内等待存储操作，超时记为 `StoreError::Timeout`
pub(crate) async fn bounded<T, F>(timeout: Duration, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// 转换为调用方错误并计数超时
pub(crate) fn store_failure(err: StoreError, metrics: &QueueMetrics) -> QueueError {
    if err == StoreError::Timeout {
        metrics.record_store_timeout();
        tracing::warn!("Queue store operation timed out");
    }
    err.into()
}
