//! 排队记录存储契约
//!
//! 存储层必须提供单语句原子的条件更新和唯一约束。每个方法对应一次原子操作，
//! 上层不依赖跨记录事务。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    PageRequest, Partition, ParticipantSummary, QueueFilter, QueueRecord, QueueRecordView,
    QueueSort, QueueStatus,
};

/// 存储层唯一约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    /// 每个挂号只对应一条记录
    Registration,
    /// (医生, 日期, 排队号) 唯一
    PartitionNumber,
    /// 每个分区最多一条 CURRENT
    PartitionCurrent,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0:?}")]
    UniqueViolation(UniqueConstraint),

    #[error("store operation timed out")]
    Timeout,

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 新记录插入模型
#[derive(Debug, Clone)]
pub struct NewQueueRecord {
    pub id: Uuid,
    pub registration_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: QueueStatus,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewQueueRecord {
    /// 新挂号产生的候诊记录
    pub fn waiting(
        registration_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
        queue_date: NaiveDate,
        queue_number: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registration_id: Some(registration_id),
            patient_id,
            doctor_id,
            queue_date,
            queue_number,
            status: QueueStatus::Waiting,
            called_at: None,
            completed_at: None,
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::new(self.doctor_id, self.queue_date)
    }
}

/// 排队记录存储
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<QueueRecord>>;

    async fn find_by_registration(&self, registration_id: Uuid) -> StoreResult<Option<QueueRecord>>;

    /// 分区内当前最大排队号，空分区返回0
    async fn max_queue_number(&self, partition: &Partition) -> StoreResult<i32>;

    /// 插入记录，违反唯一约束时返回 `StoreError::UniqueViolation`
    async fn insert(&self, record: &NewQueueRecord) -> StoreResult<QueueRecord>;

    /// 将分区内的 CURRENT 记录置为 COMPLETED
    async fn complete_current(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QueueRecord>>;

    /// 原子地选取分区内排队号最小的 WAITING 记录并置为 CURRENT
    async fn claim_next_waiting(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QueueRecord>>;

    /// 仅当记录处于 WAITING 时置为 SKIPPED
    async fn skip_waiting(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<QueueRecord>>;

    async fn find_current(&self, partition: &Partition) -> StoreResult<Option<QueueRecord>>;

    /// 分区内全部记录，按排队号升序
    async fn list_partition(&self, partition: &Partition) -> StoreResult<Vec<QueueRecord>>;

    /// 分页查询，返回 (当前页, 总数)
    async fn list(
        &self,
        filter: &QueueFilter,
        page: &PageRequest,
        sort: &QueueSort,
    ) -> StoreResult<(Vec<QueueRecord>, u64)>;

    /// 联表带出患者和医生摘要
    async fn find_view(&self, id: Uuid) -> StoreResult<Option<QueueRecordView>>;
}

/// 外部参与者目录（患者、医生），只读
///
/// 引用可以是参与者ID，也可以是外部编码。
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn resolve_patient(&self, reference: &str) -> StoreResult<Option<ParticipantSummary>>;

    async fn resolve_doctor(&self, reference: &str) -> StoreResult<Option<ParticipantSummary>>;
}
