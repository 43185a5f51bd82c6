//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use queue_core::{ParticipantSummary, QueueRecord, QueueRecordView, QueueStatus, StoreError};
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 排队记录表
#[derive(Debug, FromRow)]
pub struct DbQueueRecord {
    pub id: Uuid,
    pub registration_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: String, // 存储为字符串，转换为QueueStatus枚举
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbQueueRecord> for QueueRecord {
    type Error = StoreError;

    fn try_from(row: DbQueueRecord) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<QueueStatus>()
            .map_err(|_| StoreError::Backend(format!("invalid status in row {}: {}", row.id, row.status)))?;

        Ok(QueueRecord {
            id: row.id,
            registration_id: row.registration_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            queue_date: row.queue_date,
            queue_number: row.queue_number,
            status,
            called_at: row.called_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 排队记录联表患者、医生名称
#[derive(Debug, FromRow)]
pub struct DbQueueRecordView {
    #[sqlx(flatten)]
    pub record: DbQueueRecord,
    pub patient_name: Option<String>,
    pub doctor_name: Option<String>,
}

impl TryFrom<DbQueueRecordView> for QueueRecordView {
    type Error = StoreError;

    fn try_from(row: DbQueueRecordView) -> Result<Self, Self::Error> {
        let record = QueueRecord::try_from(row.record)?;
        let patient = row.patient_name.map(|name| ParticipantSummary {
            id: record.patient_id,
            name,
        });
        let doctor = row.doctor_name.map(|name| ParticipantSummary {
            id: record.doctor_id,
            name,
        });
        Ok(QueueRecordView { record, patient, doctor })
    }
}

/// 外部参与者表（patients / doctors）
#[derive(Debug, FromRow)]
pub struct DbParticipant {
    pub id: Uuid,
    pub name: String,
}

impl From<DbParticipant> for ParticipantSummary {
    fn from(row: DbParticipant) -> Self {
        ParticipantSummary {
            id: row.id,
            name: row.name,
        }
    }
}
