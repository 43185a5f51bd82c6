//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// 医生当日队列中的一个排队号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: Uuid,
    pub registration_id: Option<Uuid>, // 批量导入的记录没有挂号
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: QueueStatus,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueRecord {
    pub fn partition(&self) -> Partition {
        Partition::new(self.doctor_id, self.queue_date)
    }
}

/// 排队状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,   // 候诊
    Current,   // 就诊中
    Completed, // 已完成
    Skipped,   // 已过号
}

impl QueueStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Current => "CURRENT",
            Self::Completed => "COMPLETED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITING" => Ok(Self::Waiting),
            "CURRENT" => Ok(Self::Current),
            "COMPLETED" => Ok(Self::Completed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(QueueError::Validation(format!("unknown queue status: {}", other))),
        }
    }
}

/// 编号与互斥的作用域：(医生, 日期)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub doctor_id: Uuid,
    pub queue_date: NaiveDate,
}

impl Partition {
    pub fn new(doctor_id: Uuid, queue_date: NaiveDate) -> Self {
        Self { doctor_id, queue_date }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.doctor_id, self.queue_date)
    }
}

/// 参与者摘要（患者或医生），仅用于展示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub name: String,
}

/// 带参与者信息的排队记录视图（读侧联表投影）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecordView {
    #[serde(flatten)]
    pub record: QueueRecord,
    pub patient: Option<ParticipantSummary>,
    pub doctor: Option<ParticipantSummary>,
}

/// 列表查询过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueFilter {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub queue_date: Option<NaiveDate>,
    pub status: Option<QueueStatus>,
}

impl QueueFilter {
    pub fn matches(&self, record: &QueueRecord) -> bool {
        self.doctor_id.map_or(true, |id| record.doctor_id == id)
            && self.patient_id.map_or(true, |id| record.patient_id == id)
            && self.queue_date.map_or(true, |date| record.queue_date == date)
            && self.status.map_or(true, |status| record.status == status)
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// 分页参数，页码从1开始
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Result<Self> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page == 0 {
            return Err(QueueError::Validation("page must start at 1".to_string()));
        }
        if limit == 0 {
            return Err(QueueError::Validation("limit must be positive".to_string()));
        }
        Ok(Self {
            page,
            limit: limit.min(MAX_PAGE_LIMIT),
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// 可排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    QueueDate,
    QueueNumber,
    CreatedAt,
    UpdatedAt,
    Status,
}

impl SortField {
    pub const fn column(&self) -> &'static str {
        match self {
            Self::QueueDate => "queue_date",
            Self::QueueNumber => "queue_number",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Status => "status",
        }
    }
}

impl FromStr for SortField {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queueDate" => Ok(Self::QueueDate),
            "queueNumber" => Ok(Self::QueueNumber),
            "createdAt" => Ok(Self::CreatedAt),
            "updatedAt" => Ok(Self::UpdatedAt),
            "status" => Ok(Self::Status),
            other => Err(QueueError::Validation(format!("unsupported sort field: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(QueueError::Validation(format!("unsupported sort order: {}", other))),
        }
    }
}

/// 排序规则。未指定字段时使用 (queueDate desc, queueNumber asc)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSort {
    pub field: Option<SortField>,
    pub order: Option<SortOrder>,
}

impl QueueSort {
    /// 展开为有序的 (字段, 方向) 列表，末尾追加排队号作为稳定排序键
    pub fn keys(&self) -> Vec<(SortField, SortOrder)> {
        match self.field {
            None => vec![
                (SortField::QueueDate, SortOrder::Desc),
                (SortField::QueueNumber, SortOrder::Asc),
            ],
            Some(SortField::QueueNumber) => {
                vec![(SortField::QueueNumber, self.order.unwrap_or(SortOrder::Asc))]
            }
            Some(field) => vec![
                (field, self.order.unwrap_or(SortOrder::Asc)),
                (SortField::QueueNumber, SortOrder::Asc),
            ],
        }
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePage {
    pub data: Vec<QueueRecord>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("waiting".parse::<QueueStatus>().unwrap(), QueueStatus::Waiting);
        assert_eq!(QueueStatus::Skipped.to_string(), "SKIPPED");
        assert!("DONE".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_upper_case() {
        let json = serde_json::to_string(&QueueStatus::Current).unwrap();
        assert_eq!(json, "\"CURRENT\"");
    }

    #[test]
    fn test_page_request_bounds() {
        let page = PageRequest::new(Some(3), Some(500)).unwrap();
        assert_eq!(page.limit, MAX_PAGE_LIMIT);
        assert_eq!(page.offset(), 200);
        assert!(PageRequest::new(Some(0), None).is_err());
        assert!(PageRequest::new(None, Some(0)).is_err());
    }

    #[test]
    fn test_default_sort_keys() {
        let keys = QueueSort::default().keys();
        assert_eq!(
            keys,
            vec![
                (SortField::QueueDate, SortOrder::Desc),
                (SortField::QueueNumber, SortOrder::Asc)
            ]
        );

        let keys = QueueSort {
            field: Some(SortField::CreatedAt),
            order: Some(SortOrder::Desc),
        }
        .keys();
        assert_eq!(keys[0], (SortField::CreatedAt, SortOrder::Desc));
        assert_eq!(keys[1], (SortField::QueueNumber, SortOrder::Asc));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = QueueRecord {
            id: Uuid::new_v4(),
            registration_id: None,
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            queue_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            queue_number: 1,
            status: QueueStatus::Waiting,
            called_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["queueNumber"], 1);
        assert_eq!(value["queueDate"], "2024-05-01");
        assert_eq!(value["status"], "WAITING");
    }
}
