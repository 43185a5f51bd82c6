//! 内存排队存储
//!
//! 与PostgreSQL实现保持相同的原子性语义：每个方法在一次写锁内完成，
//! 三个唯一约束在插入和叫号时检查。方法入口处让出调度，使并发调用能够交错执行。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue_core::{
    NewQueueRecord, PageRequest, Partition, ParticipantDirectory, ParticipantSummary,
    QueueFilter, QueueRecord, QueueRecordView, QueueSort, QueueStatus, QueueStore, SortField,
    SortOrder, StoreError, StoreResult, UniqueConstraint,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Participant {
    summary: ParticipantSummary,
    code: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<Uuid, QueueRecord>,
    patients: HashMap<Uuid, Participant>,
    doctors: HashMap<Uuid, Participant>,
}

impl MemoryState {
    fn partition_records<'a>(&'a self, partition: &'a Partition) -> impl Iterator<Item = &'a QueueRecord> + 'a {
        self.records
            .values()
            .filter(move |r| r.doctor_id == partition.doctor_id && r.queue_date == partition.queue_date)
    }

    fn has_current(&self, partition: &Partition) -> bool {
        self.partition_records(partition)
            .any(|r| r.status == QueueStatus::Current)
    }
}

fn resolve(participants: &HashMap<Uuid, Participant>, reference: &str) -> Option<ParticipantSummary> {
    match Uuid::parse_str(reference) {
        Ok(id) => participants.get(&id).map(|p| p.summary.clone()),
        Err(_) => participants
            .values()
            .find(|p| p.code.as_deref() == Some(reference))
            .map(|p| p.summary.clone()),
    }
}

fn compare_by(field: SortField, a: &QueueRecord, b: &QueueRecord) -> Ordering {
    match field {
        SortField::QueueDate => a.queue_date.cmp(&b.queue_date),
        SortField::QueueNumber => a.queue_number.cmp(&b.queue_number),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
    }
}

/// 内存排队存储
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: RwLock<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次操作前固定延迟，用于模拟慢存储
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            latency: Some(latency),
        }
    }

    /// 登记患者，返回摘要
    pub async fn add_patient(&self, name: &str, code: Option<&str>) -> ParticipantSummary {
        let summary = ParticipantSummary {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        let mut state = self.state.write().await;
        state.patients.insert(
            summary.id,
            Participant {
                summary: summary.clone(),
                code: code.map(str::to_string),
            },
        );
        summary
    }

    /// 登记医生，返回摘要
    pub async fn add_doctor(&self, name: &str, code: Option<&str>) -> ParticipantSummary {
        let summary = ParticipantSummary {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        let mut state = self.state.write().await;
        state.doctors.insert(
            summary.id,
            Participant {
                summary: summary.clone(),
                code: code.map(str::to_string),
            },
        );
        summary
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    async fn simulate_io(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<QueueRecord>> {
        self.simulate_io().await;
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn find_by_registration(&self, registration_id: Uuid) -> StoreResult<Option<QueueRecord>> {
        self.simulate_io().await;
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .find(|r| r.registration_id == Some(registration_id))
            .cloned())
    }

    async fn max_queue_number(&self, partition: &Partition) -> StoreResult<i32> {
        self.simulate_io().await;
        let state = self.state.read().await;
        Ok(state
            .partition_records(partition)
            .map(|r| r.queue_number)
            .max()
            .unwrap_or(0))
    }

    async fn insert(&self, record: &NewQueueRecord) -> StoreResult<QueueRecord> {
        self.simulate_io().await;
        if record.queue_number <= 0 {
            return Err(StoreError::Backend(format!(
                "queue_number check failed: {}",
                record.queue_number
            )));
        }

        let mut state = self.state.write().await;
        if state.records.contains_key(&record.id) {
            return Err(StoreError::Backend(format!("duplicate primary key {}", record.id)));
        }
        if let Some(registration_id) = record.registration_id {
            if state
                .records
                .values()
                .any(|r| r.registration_id == Some(registration_id))
            {
                return Err(StoreError::UniqueViolation(UniqueConstraint::Registration));
            }
        }
        let partition = record.partition();
        if state
            .partition_records(&partition)
            .any(|r| r.queue_number == record.queue_number)
        {
            return Err(StoreError::UniqueViolation(UniqueConstraint::PartitionNumber));
        }
        if record.status == QueueStatus::Current && state.has_current(&partition) {
            return Err(StoreError::UniqueViolation(UniqueConstraint::PartitionCurrent));
        }

        let now = Utc::now();
        let stored = QueueRecord {
            id: record.id,
            registration_id: record.registration_id,
            patient_id: record.patient_id,
            doctor_id: record.doctor_id,
            queue_date: record.queue_date,
            queue_number: record.queue_number,
            status: record.status,
            called_at: record.called_at,
            completed_at: record.completed_at,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn complete_current(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QueueRecord>> {
        self.simulate_io().await;
        let mut state = self.state.write().await;
        let current = state.records.values_mut().find(|r| {
            r.doctor_id == partition.doctor_id
                && r.queue_date == partition.queue_date
                && r.status == QueueStatus::Current
        });

        Ok(current.map(|record| {
            record.status = QueueStatus::Completed;
            record.completed_at = Some(now);
            record.updated_at = now;
            record.clone()
        }))
    }

    async fn claim_next_waiting(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QueueRecord>> {
        self.simulate_io().await;
        let mut state = self.state.write().await;
        let next_id = state
            .partition_records(partition)
            .filter(|r| r.status == QueueStatus::Waiting)
            .min_by_key(|r| r.queue_number)
            .map(|r| r.id);

        let Some(next_id) = next_id else {
            return Ok(None);
        };
        if state.has_current(partition) {
            return Err(StoreError::UniqueViolation(UniqueConstraint::PartitionCurrent));
        }

        Ok(state.records.get_mut(&next_id).map(|record| {
            record.status = QueueStatus::Current;
            record.called_at = Some(now);
            record.updated_at = now;
            record.clone()
        }))
    }

    async fn skip_waiting(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<QueueRecord>> {
        self.simulate_io().await;
        let mut state = self.state.write().await;
        Ok(state
            .records
            .get_mut(&id)
            .filter(|r| r.status == QueueStatus::Waiting)
            .map(|record| {
                record.status = QueueStatus::Skipped;
                record.updated_at = now;
                record.clone()
            }))
    }

    async fn find_current(&self, partition: &Partition) -> StoreResult<Option<QueueRecord>> {
        self.simulate_io().await;
        let state = self.state.read().await;
        let current = state
            .partition_records(partition)
            .find(|r| r.status == QueueStatus::Current)
            .cloned();
        Ok(current)
    }

    async fn list_partition(&self, partition: &Partition) -> StoreResult<Vec<QueueRecord>> {
        self.simulate_io().await;
        let state = self.state.read().await;
        let mut records: Vec<QueueRecord> = state.partition_records(partition).cloned().collect();
        records.sort_by_key(|r| r.queue_number);
        Ok(records)
    }

    async fn list(
        &self,
        filter: &QueueFilter,
        page: &PageRequest,
        sort: &QueueSort,
    ) -> StoreResult<(Vec<QueueRecord>, u64)> {
        self.simulate_io().await;
        let state = self.state.read().await;
        let mut records: Vec<QueueRecord> = state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        let keys = sort.keys();
        records.sort_by(|a, b| {
            keys.iter().fold(Ordering::Equal, |acc, (field, order)| {
                acc.then_with(|| {
                    let ordering = compare_by(*field, a, b);
                    match order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    }
                })
            })
        });

        let total = records.len() as u64;
        let data = records
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok((data, total))
    }

    async fn find_view(&self, id: Uuid) -> StoreResult<Option<QueueRecordView>> {
        self.simulate_io().await;
        let state = self.state.read().await;
        Ok(state.records.get(&id).map(|record| QueueRecordView {
            record: record.clone(),
            patient: state.patients.get(&record.patient_id).map(|p| p.summary.clone()),
            doctor: state.doctors.get(&record.doctor_id).map(|p| p.summary.clone()),
        }))
    }
}

#[async_trait]
impl ParticipantDirectory for MemoryQueueStore {
    async fn resolve_patient(&self, reference: &str) -> StoreResult<Option<ParticipantSummary>> {
        self.simulate_io().await;
        Ok(resolve(&self.state.read().await.patients, reference))
    }

    async fn resolve_doctor(&self, reference: &str) -> StoreResult<Option<ParticipantSummary>> {
        self.simulate_io().await;
        Ok(resolve(&self.state.read().await.doctors, reference))
    }
}
