//! 排队号分配
//!
//! 候选号 = 分区当前最大号 + 1，随后在 (医生, 日期, 排队号) 唯一约束下插入。
//! 冲突说明有并发调用者抢先占用了该号，重新计算后重试，重试次数有上限。
//! 不同分区之间没有任何共享状态。

use queue_admin::QueueMetrics;
use queue_core::{
    NewQueueRecord, Partition, QueueError, QueueRecord, QueueStore, Result, StoreError,
    StoreResult, UniqueConstraint,
};
use std::time::Duration;
use tracing::{debug, warn};

use crate::deadline::{bounded, store_failure};

/// 排队号分配器
#[derive(Debug, Clone)]
pub struct NumberAllocator {
    max_attempts: u32,
    store_timeout: Duration,
    metrics: QueueMetrics,
}

impl NumberAllocator {
    pub fn new(max_attempts: u32, store_timeout: Duration, metrics: QueueMetrics) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            store_timeout,
            metrics,
        }
    }

    /// 计算分区的下一个候选排队号
    pub async fn allocate(&self, store: &dyn QueueStore, partition: &Partition) -> StoreResult<i32> {
        let max = bounded(self.store_timeout, store.max_queue_number(partition)).await?;
        Ok(max + 1)
    }

    /// 分配排队号并插入记录，`build` 根据候选号构造插入模型
    pub async fn insert_with_next_number<F>(
        &self,
        store: &dyn QueueStore,
        partition: &Partition,
        mut build: F,
    ) -> Result<QueueRecord>
    where
        F: FnMut(i32) -> NewQueueRecord + Send,
    {
        for attempt in 1..=self.max_attempts {
            let number = self
                .allocate(store, partition)
                .await
                .map_err(|e| store_failure(e, &self.metrics))?;
            let record = build(number);

            match bounded(self.store_timeout, store.insert(&record)).await {
                Ok(inserted) => {
                    debug!(
                        partition = %partition,
                        queue_number = number,
                        attempt,
                        "Allocated queue number"
                    );
                    return Ok(inserted);
                }
                Err(StoreError::UniqueViolation(UniqueConstraint::PartitionNumber)) => {
                    self.metrics.record_allocation_retry();
                    debug!(
                        partition = %partition,
                        queue_number = number,
                        attempt,
                        "Queue number taken concurrently, retrying"
                    );
                }
                Err(e) => return Err(store_failure(e, &self.metrics)),
            }
        }

        warn!(
            partition = %partition,
            attempts = self.max_attempts,
            "Queue number allocation exhausted"
        );
        Err(QueueError::Conflict(format!(
            "could not allocate a queue number for {} after {} attempts",
            partition, self.max_attempts
        )))
    }
}
