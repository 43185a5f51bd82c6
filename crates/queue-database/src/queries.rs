//! 数据库查询操作
//!
//! 每个存储方法对应一条SQL语句。分区内的编号唯一性和 CURRENT 互斥由唯一索引保证，
//! 叫号通过 `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)` 原子完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue_core::{
    NewQueueRecord, PageRequest, Partition, ParticipantDirectory, ParticipantSummary,
    QueueFilter, QueueRecord, QueueRecordView, QueueSort, QueueStatus, QueueStore, Result,
    StoreError, StoreResult, UniqueConstraint,
};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{DbParticipant, DbQueueRecord, DbQueueRecordView};

const REGISTRATION_CONSTRAINT: &str = "uq_queue_records_registration";
const PARTITION_NUMBER_INDEX: &str = "uq_queue_records_partition_number";
const PARTITION_CURRENT_INDEX: &str = "uq_queue_records_partition_current";

/// 把sqlx错误归类为存储错误
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let constraint = match db_err.constraint() {
                Some(REGISTRATION_CONSTRAINT) => Some(UniqueConstraint::Registration),
                Some(PARTITION_NUMBER_INDEX) => Some(UniqueConstraint::PartitionNumber),
                Some(PARTITION_CURRENT_INDEX) => Some(UniqueConstraint::PartitionCurrent),
                _ => None,
            };
            if let Some(constraint) = constraint {
                return StoreError::UniqueViolation(constraint);
            }
        }
    }
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        other => StoreError::Backend(other.to_string()),
    }
}

fn into_record(row: DbQueueRecord) -> StoreResult<QueueRecord> {
    QueueRecord::try_from(row)
}

fn into_records(rows: Vec<DbQueueRecord>) -> StoreResult<Vec<QueueRecord>> {
    rows.into_iter().map(QueueRecord::try_from).collect()
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &QueueFilter) {
    builder.push(" WHERE TRUE");
    if let Some(doctor_id) = filter.doctor_id {
        builder.push(" AND doctor_id = ").push_bind(doctor_id);
    }
    if let Some(patient_id) = filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id);
    }
    if let Some(queue_date) = filter.queue_date {
        builder.push(" AND queue_date = ").push_bind(queue_date);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

/// PostgreSQL排队记录存储
#[derive(Debug, Clone)]
pub struct PgQueueStore {
    pool: DatabasePool,
}

impl PgQueueStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建排队表及索引
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS queue_records (
                id UUID PRIMARY KEY,
                registration_id UUID,
                patient_id UUID NOT NULL,
                doctor_id UUID NOT NULL,
                queue_date DATE NOT NULL,
                queue_number INTEGER NOT NULL CHECK (queue_number > 0),
                status VARCHAR(16) NOT NULL DEFAULT 'WAITING',
                called_at TIMESTAMP WITH TIME ZONE,
                completed_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CONSTRAINT uq_queue_records_registration UNIQUE (registration_id)
            )
        "#)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

        self.create_indexes().await?;

        tracing::info!("Queue tables created successfully");
        Ok(())
    }

    /// 创建索引，其中两个唯一索引承担编号与互斥约束
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_queue_records_partition_number ON queue_records(doctor_id, queue_date, queue_number)",
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_queue_records_partition_current ON queue_records(doctor_id, queue_date) WHERE status = 'CURRENT'",
            "CREATE INDEX IF NOT EXISTS idx_queue_records_patient_id ON queue_records(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_queue_records_status ON queue_records(status)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(map_sqlx_error)?;
        }

        tracing::info!("Queue indexes created successfully");
        Ok(())
    }

    async fn resolve_participant(
        &self,
        table: &'static str,
        reference: &str,
    ) -> StoreResult<Option<ParticipantSummary>> {
        let pool = self.pool.pool();
        let row = match Uuid::parse_str(reference) {
            Ok(id) => {
                let sql = format!("SELECT id, name FROM {} WHERE id = $1", table);
                sqlx::query_as::<_, DbParticipant>(&sql)
                    .bind(id)
                    .fetch_optional(pool)
                    .await
            }
            Err(_) => {
                let sql = format!("SELECT id, name FROM {} WHERE code = $1", table);
                sqlx::query_as::<_, DbParticipant>(&sql)
                    .bind(reference)
                    .fetch_optional(pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        Ok(row.map(ParticipantSummary::from))
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<QueueRecord>> {
        sqlx::query_as::<_, DbQueueRecord>("SELECT * FROM queue_records WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error)?
            .map(into_record)
            .transpose()
    }

    async fn find_by_registration(&self, registration_id: Uuid) -> StoreResult<Option<QueueRecord>> {
        sqlx::query_as::<_, DbQueueRecord>("SELECT * FROM queue_records WHERE registration_id = $1")
            .bind(registration_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_sqlx_error)?
            .map(into_record)
            .transpose()
    }

    async fn max_queue_number(&self, partition: &Partition) -> StoreResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(queue_number), 0) FROM queue_records WHERE doctor_id = $1 AND queue_date = $2",
        )
        .bind(partition.doctor_id)
        .bind(partition.queue_date)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert(&self, record: &NewQueueRecord) -> StoreResult<QueueRecord> {
        let row = sqlx::query_as::<_, DbQueueRecord>(r#"
            INSERT INTO queue_records (id, registration_id, patient_id, doctor_id, queue_date, queue_number, status, called_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
        "#)
        .bind(record.id)
        .bind(record.registration_id)
        .bind(record.patient_id)
        .bind(record.doctor_id)
        .bind(record.queue_date)
        .bind(record.queue_number)
        .bind(record.status.as_str())
        .bind(record.called_at)
        .bind(record.completed_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_record(row)
    }

    async fn complete_current(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QueueRecord>> {
        sqlx::query_as::<_, DbQueueRecord>(r#"
            UPDATE queue_records
            SET status = 'COMPLETED', completed_at = $3, updated_at = $3
            WHERE doctor_id = $1 AND queue_date = $2 AND status = 'CURRENT'
            RETURNING *
        "#)
        .bind(partition.doctor_id)
        .bind(partition.queue_date)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?
        .map(into_record)
        .transpose()
    }

    async fn claim_next_waiting(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QueueRecord>> {
        sqlx::query_as::<_, DbQueueRecord>(r#"
            UPDATE queue_records
            SET status = 'CURRENT', called_at = $3, updated_at = $3
            WHERE id = (
                SELECT id FROM queue_records
                WHERE doctor_id = $1 AND queue_date = $2 AND status = 'WAITING'
                ORDER BY queue_number ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'WAITING'
            RETURNING *
        "#)
        .bind(partition.doctor_id)
        .bind(partition.queue_date)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?
        .map(into_record)
        .transpose()
    }

    async fn skip_waiting(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<QueueRecord>> {
        sqlx::query_as::<_, DbQueueRecord>(r#"
            UPDATE queue_records
            SET status = 'SKIPPED', updated_at = $2
            WHERE id = $1 AND status = 'WAITING'
            RETURNING *
        "#)
        .bind(id)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?
        .map(into_record)
        .transpose()
    }

    async fn find_current(&self, partition: &Partition) -> StoreResult<Option<QueueRecord>> {
        sqlx::query_as::<_, DbQueueRecord>(
            "SELECT * FROM queue_records WHERE doctor_id = $1 AND queue_date = $2 AND status = $3",
        )
        .bind(partition.doctor_id)
        .bind(partition.queue_date)
        .bind(QueueStatus::Current.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?
        .map(into_record)
        .transpose()
    }

    async fn list_partition(&self, partition: &Partition) -> StoreResult<Vec<QueueRecord>> {
        let rows = sqlx::query_as::<_, DbQueueRecord>(
            "SELECT * FROM queue_records WHERE doctor_id = $1 AND queue_date = $2 ORDER BY queue_number ASC",
        )
        .bind(partition.doctor_id)
        .bind(partition.queue_date)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn list(
        &self,
        filter: &QueueFilter,
        page: &PageRequest,
        sort: &QueueSort,
    ) -> StoreResult<(Vec<QueueRecord>, u64)> {
        let pool = self.pool.pool();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM queue_records");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM queue_records");
        push_filter(&mut select, filter);

        // 排序字段来自白名单枚举，直接拼接
        let order_by = sort
            .keys()
            .iter()
            .map(|(field, order)| format!("{} {}", field.column(), order.keyword()))
            .collect::<Vec<_>>()
            .join(", ");
        select.push(" ORDER BY ").push(order_by);
        select.push(" LIMIT ").push_bind(i64::from(page.limit));
        select.push(" OFFSET ").push_bind(page.offset() as i64);

        let rows = select
            .build_query_as::<DbQueueRecord>()
            .fetch_all(pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok((into_records(rows)?, total.max(0) as u64))
    }

    async fn find_view(&self, id: Uuid) -> StoreResult<Option<QueueRecordView>> {
        sqlx::query_as::<_, DbQueueRecordView>(r#"
            SELECT q.*, p.name AS patient_name, d.name AS doctor_name
            FROM queue_records q
            LEFT JOIN patients p ON p.id = q.patient_id
            LEFT JOIN doctors d ON d.id = q.doctor_id
            WHERE q.id = $1
        "#)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_sqlx_error)?
        .map(QueueRecordView::try_from)
        .transpose()
    }
}

#[async_trait]
impl ParticipantDirectory for PgQueueStore {
    async fn resolve_patient(&self, reference: &str) -> StoreResult<Option<ParticipantSummary>> {
        self.resolve_participant("patients", reference).await
    }

    async fn resolve_doctor(&self, reference: &str) -> StoreResult<Option<ParticipantSummary>> {
        self.resolve_participant("doctors", reference).await
    }
}
