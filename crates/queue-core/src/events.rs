//! 状态变更的下游通道：持久化任务队列与实时通知

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Partition, QueueRecord};

/// 下游任务名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobName {
    #[serde(rename = "queue-created")]
    Created,
    #[serde(rename = "queue-called")]
    Called,
    #[serde(rename = "queue-completed")]
    Completed,
    #[serde(rename = "queue-skipped")]
    Skipped,
}

impl JobName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "queue-created",
            Self::Called => "queue-called",
            Self::Completed => "queue-completed",
            Self::Skipped => "queue-skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub queue_id: Uuid,
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
}

/// 任务信封 `{jobName, payload}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_name: JobName,
    pub payload: JobPayload,
}

impl Job {
    pub fn for_record(job_name: JobName, record: &QueueRecord) -> Self {
        Self {
            job_name,
            payload: JobPayload {
                queue_id: record.id,
                doctor_id: record.doctor_id,
                queue_date: record.queue_date,
            },
        }
    }
}

/// 实时事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum QueueEvent {
    /// 完整记录
    QueueUpdated(QueueRecord),
    /// 刷新提示，订阅方重新查询列表
    QueueListUpdated(Partition),
}

impl QueueEvent {
    /// 事件所属的订阅主题
    pub fn topic(&self) -> String {
        match self {
            Self::QueueUpdated(record) => doctor_topic(record.doctor_id),
            Self::QueueListUpdated(partition) => partition_topic(partition),
        }
    }
}

/// 单个医生的记录更新主题
pub fn doctor_topic(doctor_id: Uuid) -> String {
    format!("queue:doctor:{}", doctor_id)
}

/// 医生某日列表刷新主题
pub fn partition_topic(partition: &Partition) -> String {
    format!("queue:doctor:{}:{}", partition.doctor_id, partition.queue_date)
}

/// 持久化任务队列
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, job: &Job) -> Result<()>;

    fn name(&self) -> &str;
}

/// 实时事件发布
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: &QueueEvent) -> Result<()>;
}
