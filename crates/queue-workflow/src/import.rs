//! 批量导入
//!
//! 逐条校验和插入，单条失败不影响其余条目。导入记录没有挂号。
//! 调用方给出的排队号必须恰好是分区的下一个号，分区内排队号始终从1连续。

use chrono::Utc;
use queue_core::{
    utils::{parse_queue_date, validate_queue_number},
    JobName, NewQueueRecord, Partition, QueueError, QueueRecord, QueueStatus, Result,
    StoreError, UniqueConstraint,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::deadline::{bounded, store_failure};
use crate::engine::QueueEngine;

/// 导入条目。患者和医生引用可以是ID或外部编码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportItem {
    pub patient_ref: String,
    pub doctor_ref: String,
    pub queue_number: i32,
    pub queue_date: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportItemResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<QueueRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 批量导入报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ImportItemResult>,
}

impl ImportReport {
    fn push(&mut self, index: usize, outcome: Result<QueueRecord>) {
        self.total += 1;
        let result = match outcome {
            Ok(record) => {
                self.succeeded += 1;
                ImportItemResult {
                    index,
                    success: true,
                    record: Some(record),
                    error: None,
                }
            }
            Err(e) => {
                self.failed += 1;
                ImportItemResult {
                    index,
                    success: false,
                    record: None,
                    error: Some(e.to_string()),
                }
            }
        };
        self.results.push(result);
    }
}

impl QueueEngine {
    /// 批量导入原始JSON条目，返回逐条结果
    pub async fn bulk_import(&self, items: Vec<Value>) -> ImportReport {
        let mut report = ImportReport::default();

        for (index, raw) in items.into_iter().enumerate() {
            let outcome = match serde_json::from_value::<ImportItem>(raw) {
                Ok(item) => self.import_one(&item).await,
                Err(e) => Err(QueueError::Validation(format!("malformed import item: {}", e))),
            };
            if let Err(e) = &outcome {
                debug!(index, "Import item rejected: {}", e);
            }
            report.push(index, outcome);
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk import finished"
        );
        report
    }

    async fn import_one(&self, item: &ImportItem) -> Result<QueueRecord> {
        let queue_date = parse_queue_date(&item.queue_date)?;
        let queue_number = validate_queue_number(item.queue_number)?;
        let status = match &item.status {
            Some(status) => status.parse::<QueueStatus>()?,
            None => QueueStatus::Waiting,
        };

        let patient = self
            .guarded(self.directory.resolve_patient(&item.patient_ref))
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("patient not found: {}", item.patient_ref)))?;
        let doctor = self
            .guarded(self.directory.resolve_doctor(&item.doctor_ref))
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("doctor not found: {}", item.doctor_ref)))?;

        let partition = Partition::new(doctor.id, queue_date);
        let expected = self.guarded(self.store.max_queue_number(&partition)).await? + 1;
        if queue_number != expected {
            return Err(QueueError::Conflict(format!(
                "queue number {} out of sequence for {}, expected {}",
                queue_number, partition, expected
            )));
        }

        // 按导入状态补齐对应转换的时间戳
        let now = Utc::now();
        let called_at = matches!(status, QueueStatus::Current | QueueStatus::Completed).then_some(now);
        let completed_at = (status == QueueStatus::Completed).then_some(now);

        let new_record = NewQueueRecord {
            id: Uuid::new_v4(),
            registration_id: None,
            patient_id: patient.id,
            doctor_id: doctor.id,
            queue_date,
            queue_number,
            status,
            called_at,
            completed_at,
        };

        let record = match bounded(self.store_timeout(), self.store.insert(&new_record)).await {
            Ok(record) => record,
            Err(StoreError::UniqueViolation(UniqueConstraint::PartitionNumber)) => {
                return Err(QueueError::Conflict(format!(
                    "queue number {} already taken for {}",
                    queue_number, partition
                )))
            }
            Err(StoreError::UniqueViolation(UniqueConstraint::PartitionCurrent)) => {
                return Err(QueueError::Conflict(format!(
                    "{} already has a current queue record",
                    partition
                )))
            }
            Err(e) => return Err(store_failure(e, &self.metrics)),
        };

        self.metrics.record_transition("import");
        self.side_effects.committed(JobName::Created, &record);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{harness, queue_date};
    use crate::engine::CreateQueueRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_invalid_item_is_isolated() {
        let h = harness();
        let patient = h.store.add_patient("Zhang San", Some("P-100")).await;
        let doctor = h.store.add_doctor("Wang Wu", Some("D-7")).await;

        let items = vec![
            json!({"patientRef": "P-100", "doctorRef": "D-7", "queueNumber": 1, "queueDate": "2024-09-02"}),
            json!({"patientRef": "P-100", "doctorRef": "D-404", "queueNumber": 2, "queueDate": "2024-09-02"}),
            json!({
                "patientRef": patient.id.to_string(),
                "doctorRef": doctor.id.to_string(),
                "queueNumber": 2,
                "queueDate": "2024-09-02T08:30:00Z",
                "status": "COMPLETED"
            }),
        ];

        let report = h.engine.bulk_import(items).await;
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.results[1].success);
        assert!(report.results[1].error.as_deref().unwrap().contains("D-404"));

        assert_eq!(h.store.record_count().await, 2);
        let stored = h.engine.list_by_doctor_date(doctor.id, queue_date()).await.unwrap();
        let numbers: Vec<_> = stored.iter().map(|r| (r.queue_number, r.status)).collect();
        assert_eq!(numbers, vec![(1, QueueStatus::Waiting), (2, QueueStatus::Completed)]);
        assert!(stored.iter().all(|r| r.registration_id.is_none()));
    }

    #[tokio::test]
    async fn test_imported_numbers_stay_contiguous() {
        let h = harness();
        h.store.add_patient("Qian Ba", Some("P-8")).await;
        let doctor = h.store.add_doctor("Zhou Jiu", Some("D-8")).await;
        let item = |number: i32| {
            json!({"patientRef": "P-8", "doctorRef": "D-8", "queueNumber": number, "queueDate": "2024-09-02"})
        };

        let report = h.engine.bulk_import(vec![item(7)]).await;
        assert_eq!(report.failed, 1);
        assert!(report.results[0].error.as_deref().unwrap().contains("expected 1"));

        let created = h.engine.create(CreateQueueRequest {
            registration_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: doctor.id,
            queue_date: queue_date(),
        });
        assert_eq!(created.await.unwrap().queue_number, 1);

        let report = h.engine.bulk_import(vec![item(2), item(4)]).await;
        assert!(report.results[0].success);
        assert!(!report.results[1].success);

        let stored = h.engine.list_by_doctor_date(doctor.id, queue_date()).await.unwrap();
        let numbers: Vec<_> = stored.iter().map(|r| r.queue_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_imported_status_carries_timestamps() {
        let h = harness();
        h.store.add_patient("Wu Shi", Some("P-10")).await;
        h.store.add_doctor("Zheng Yi", Some("D-10")).await;

        let items = vec![
            json!({"patientRef": "P-10", "doctorRef": "D-10", "queueNumber": 1, "queueDate": "2024-09-02", "status": "COMPLETED"}),
            json!({"patientRef": "P-10", "doctorRef": "D-10", "queueNumber": 2, "queueDate": "2024-09-02", "status": "CURRENT"}),
            json!({"patientRef": "P-10", "doctorRef": "D-10", "queueNumber": 3, "queueDate": "2024-09-02"}),
        ];

        let report = h.engine.bulk_import(items).await;
        assert_eq!(report.succeeded, 3);
        let records: Vec<_> = report.results.into_iter().map(|r| r.record.unwrap()).collect();

        assert!(records[0].called_at.is_some());
        assert!(records[0].completed_at.is_some());
        assert!(records[1].called_at.is_some());
        assert!(records[1].completed_at.is_none());
        assert!(records[2].called_at.is_none());
        assert!(records[2].completed_at.is_none());
    }

    #[tokio::test]
    async fn test_item_level_validation_failures() {
        let h = harness();
        h.store.add_patient("Zhao Liu", Some("P-1")).await;
        h.store.add_doctor("Sun Qi", Some("D-1")).await;

        let items = vec![
            json!({"patientRef": "P-1", "doctorRef": "D-1", "queueNumber": 1, "queueDate": "2024-09-02", "status": "CURRENT"}),
            json!({"patientRef": "P-1", "doctorRef": "D-1", "queueNumber": 1, "queueDate": "2024-09-02"}),
            json!({"patientRef": "P-1", "doctorRef": "D-1", "queueNumber": 2, "queueDate": "2024-09-02", "status": "CURRENT"}),
            json!({"patientRef": "P-1", "doctorRef": "D-1", "queueNumber": 0, "queueDate": "2024-09-02"}),
            json!({"patientRef": "P-1", "doctorRef": "D-1", "queueNumber": 4, "queueDate": "yesterday"}),
            json!({"patientRef": "P-1", "doctorRef": "D-1", "queueNumber": 5, "queueDate": "2024-09-02", "status": "DONE"}),
            json!({"patientRef": "P-1", "queueNumber": "six"}),
        ];

        let report = h.engine.bulk_import(items).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 6);
        assert!(report.results[0].success);
        assert_eq!(h.store.record_count().await, 1);
    }
}
