//! 排队编排引擎
//!
//! 状态记录的唯一写入方。协调存储、排队号分配器、状态机和提交后的副作用交接。
//! 分区内的一致性完全依赖存储的原子条件更新和唯一约束，进程内不加锁。

use chrono::{NaiveDate, Utc};
use queue_admin::{QueueMetrics, WorkflowConfig};
use queue_core::{
    JobName, NewQueueRecord, PageRequest, ParticipantDirectory, Partition, QueueError,
    QueueFilter, QueuePage, QueueRecord, QueueRecordView, QueueSort, QueueStatus, QueueStore,
    Result, StoreError, StoreResult, UniqueConstraint,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    allocator::NumberAllocator,
    deadline::{bounded, store_failure},
    side_effects::SideEffects,
    state_machine::{QueueAction, QueueStateMachine},
};

/// 新建排队请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueRequest {
    pub registration_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
}

/// 排队编排引擎
///
/// 可在多个请求处理任务间通过 `Arc` 共享。
pub struct QueueEngine {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) directory: Arc<dyn ParticipantDirectory>,
    pub(crate) state_machine: QueueStateMachine,
    allocator: NumberAllocator,
    pub(crate) side_effects: SideEffects,
    pub(crate) metrics: QueueMetrics,
    store_timeout: Duration,
    max_attempts: u32,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn ParticipantDirectory>,
        side_effects: SideEffects,
        metrics: QueueMetrics,
        config: &WorkflowConfig,
    ) -> Self {
        let store_timeout = config.store_timeout();
        let max_attempts = config.max_allocation_attempts.max(1);

        Self {
            store,
            directory,
            state_machine: QueueStateMachine::new(),
            allocator: NumberAllocator::new(max_attempts, store_timeout, metrics.clone()),
            side_effects,
            metrics,
            store_timeout,
            max_attempts,
        }
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub(crate) fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// 带超时的存储调用，失败转换为调用方错误
    pub(crate) async fn guarded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        bounded(self.store_timeout, operation)
            .await
            .map_err(|e| store_failure(e, &self.metrics))
    }

    /// 挂号入队：分配排队号并插入 WAITING 记录
    pub async fn create(&self, request: CreateQueueRequest) -> Result<QueueRecord> {
        if self
            .guarded(self.store.find_by_registration(request.registration_id))
            .await?
            .is_some()
        {
            return Err(QueueError::Conflict(format!(
                "registration {} already has a queue record",
                request.registration_id
            )));
        }

        let partition = Partition::new(request.doctor_id, request.queue_date);
        let record = self
            .allocator
            .insert_with_next_number(self.store.as_ref(), &partition, |number| {
                NewQueueRecord::waiting(
                    request.registration_id,
                    request.patient_id,
                    request.doctor_id,
                    request.queue_date,
                    number,
                )
            })
            .await?;

        self.metrics.record_transition("create");
        self.side_effects.committed(JobName::Created, &record);

        info!(
            queue_id = %record.id,
            doctor_id = %record.doctor_id,
            queue_date = %record.queue_date,
            queue_number = record.queue_number,
            "Queue record created"
        );
        Ok(record)
    }

    /// 叫号：结束当前就诊，再将排队号最小的候诊记录置为 CURRENT
    ///
    /// 两个阶段各是一次原子更新。第二阶段撞上"每分区一个 CURRENT"约束时，
    /// 说明另一个叫号请求在两阶段之间完成了提升，此时整体重试。
    pub async fn call_next(&self, doctor_id: Uuid, queue_date: NaiveDate) -> Result<QueueRecord> {
        let partition = Partition::new(doctor_id, queue_date);

        for attempt in 1..=self.max_attempts {
            let completed = self
                .guarded(self.store.complete_current(&partition, Utc::now()))
                .await?;
            if let Some(completed) = &completed {
                self.state_machine
                    .confirm(QueueStatus::Current, QueueAction::Complete, completed)?;
                self.metrics.record_transition("complete");
                self.side_effects.committed(JobName::Completed, completed);
                debug!(
                    queue_id = %completed.id,
                    queue_number = completed.queue_number,
                    "Current queue record completed"
                );
            }

            let claimed = bounded(
                self.store_timeout,
                self.store.claim_next_waiting(&partition, Utc::now()),
            )
            .await;

            match claimed {
                Ok(Some(current)) => {
                    self.state_machine
                        .confirm(QueueStatus::Waiting, QueueAction::Call, &current)?;
                    self.metrics.record_transition("call");
                    self.side_effects.committed(JobName::Called, &current);
                    info!(
                        queue_id = %current.id,
                        doctor_id = %doctor_id,
                        queue_date = %queue_date,
                        queue_number = current.queue_number,
                        "Queue record called"
                    );
                    return Ok(current);
                }
                Ok(None) => {
                    debug!(partition = %partition, "No waiting queue record to call");
                    return Err(QueueError::NotFound("no waiting queue".to_string()));
                }
                Err(StoreError::UniqueViolation(UniqueConstraint::PartitionCurrent)) => {
                    self.metrics.record_allocation_retry();
                    debug!(partition = %partition, attempt, "Concurrent call detected, retrying");
                }
                Err(e) => return Err(store_failure(e, &self.metrics)),
            }
        }

        warn!(partition = %partition, attempts = self.max_attempts, "Call next exhausted retries");
        Err(QueueError::Conflict(format!(
            "could not call next queue record for {} after {} attempts",
            partition, self.max_attempts
        )))
    }

    /// 过号，只对 WAITING 记录生效。已过号的记录原样返回，不触发副作用
    pub async fn skip(&self, queue_id: Uuid) -> Result<QueueRecord> {
        if let Some(skipped) = self
            .guarded(self.store.skip_waiting(queue_id, Utc::now()))
            .await?
        {
            self.state_machine
                .confirm(QueueStatus::Waiting, QueueAction::Skip, &skipped)?;
            self.metrics.record_transition("skip");
            self.side_effects.committed(JobName::Skipped, &skipped);
            info!(
                queue_id = %skipped.id,
                doctor_id = %skipped.doctor_id,
                queue_number = skipped.queue_number,
                "Queue record skipped"
            );
            return Ok(skipped);
        }

        let existing = self.get_by_id(queue_id).await?;
        if existing.status == QueueStatus::Skipped {
            return Ok(existing);
        }

        self.state_machine.transition(existing.status, QueueAction::Skip)?;
        // 条件更新未命中但记录仍是 WAITING，只可能是并发修改
        Err(QueueError::Conflict(format!(
            "queue record {} changed concurrently",
            queue_id
        )))
    }

    pub async fn get_current(&self, doctor_id: Uuid, queue_date: NaiveDate) -> Result<Option<QueueRecord>> {
        let partition = Partition::new(doctor_id, queue_date);
        self.guarded(self.store.find_current(&partition)).await
    }

    /// 分区内全部记录，按排队号升序
    pub async fn list_by_doctor_date(&self, doctor_id: Uuid, queue_date: NaiveDate) -> Result<Vec<QueueRecord>> {
        let partition = Partition::new(doctor_id, queue_date);
        self.guarded(self.store.list_partition(&partition)).await
    }

    pub async fn list(&self, filter: &QueueFilter, page: &PageRequest, sort: &QueueSort) -> Result<QueuePage> {
        let (data, total) = self.guarded(self.store.list(filter, page, sort)).await?;
        Ok(QueuePage { data, total })
    }

    pub async fn get_by_id(&self, queue_id: Uuid) -> Result<QueueRecord> {
        self.guarded(self.store.find_by_id(queue_id))
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("queue record {} not found", queue_id)))
    }

    /// 带患者和医生摘要的记录
    pub async fn get_view(&self, queue_id: Uuid) -> Result<QueueRecordView> {
        self.guarded(self.store.find_view(queue_id))
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("queue record {} not found", queue_id)))
    }
}
