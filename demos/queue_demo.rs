//! 排队编排引擎演示程序
//!
//! 使用内存存储展示挂号入队、叫号、过号、批量导入和实时事件订阅

use chrono::NaiveDate;
use clinic_queue::queue_admin::{init_logging, LoggingConfig, QueueMetrics, WorkflowConfig};
use clinic_queue::queue_core::{events::partition_topic, Partition};
use clinic_queue::queue_database::MemoryQueueStore;
use clinic_queue::queue_integration::{LogDispatcher, TopicBroadcaster};
use clinic_queue::queue_workflow::SideEffects;
use clinic_queue::{CreateQueueRequest, QueueEngine, QueueError};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    init_logging(&LoggingConfig::default())?;

    println!("🏥 门诊排队叫号演示\n");

    let store = Arc::new(MemoryQueueStore::new());
    let doctor = store.add_doctor("王医生", Some("D-001")).await;
    let patients = [
        store.add_patient("张三", Some("P-001")).await,
        store.add_patient("李四", Some("P-002")).await,
        store.add_patient("王五", Some("P-003")).await,
    ];

    let broadcaster = TopicBroadcaster::default();
    let metrics = QueueMetrics::new()?;
    let (side_effects, workers) = SideEffects::spawn(
        Arc::new(LogDispatcher),
        Arc::new(broadcaster.clone()),
        metrics.clone(),
    );
    let engine = QueueEngine::new(
        store.clone(),
        store.clone(),
        side_effects,
        metrics.clone(),
        &WorkflowConfig::default(),
    );

    let queue_date = NaiveDate::from_ymd_opt(2024, 10, 8).ok_or_else(|| anyhow::anyhow!("invalid date"))?;
    let partition = Partition::new(doctor.id, queue_date);
    let mut list_updates = broadcaster.subscribe(partition_topic(&partition)).await;

    // 1. 挂号入队
    let mut records = Vec::new();
    for patient in &patients {
        let record = engine
            .create(CreateQueueRequest {
                registration_id: Uuid::new_v4(),
                patient_id: patient.id,
                doctor_id: doctor.id,
                queue_date,
            })
            .await?;
        println!("✅ {} 入队，排队号 {}", patient.name, record.queue_number);
        records.push(record);
    }

    // 2. 叫号
    let current = engine.call_next(doctor.id, queue_date).await?;
    println!("📢 请 {} 号就诊", current.queue_number);
    let current = engine.call_next(doctor.id, queue_date).await?;
    println!("📢 请 {} 号就诊", current.queue_number);

    // 3. 过号
    let skipped = engine.skip(records[2].id).await?;
    println!("⏭️  {} 号过号", skipped.queue_number);

    match engine.call_next(doctor.id, queue_date).await {
        Err(QueueError::NotFound(message)) => println!("ℹ️  {}", message),
        other => println!("⚠️  意外结果: {:?}", other),
    }

    // 4. 批量导入
    let report = engine
        .bulk_import(vec![
            json!({"patientRef": "P-001", "doctorRef": "D-001", "queueNumber": 1, "queueDate": "2024-10-09"}),
            json!({"patientRef": "P-404", "doctorRef": "D-001", "queueNumber": 2, "queueDate": "2024-10-09"}),
        ])
        .await;
    println!("\n📦 批量导入: 成功 {}，失败 {}", report.succeeded, report.failed);
    for result in report.results.iter().filter(|r| !r.success) {
        println!("   - 第 {} 条: {}", result.index, result.error.as_deref().unwrap_or_default());
    }

    // 5. 当日队列
    println!("\n📋 {} 当日队列:", doctor.name);
    for record in engine.list_by_doctor_date(doctor.id, queue_date).await? {
        println!("   {:>3} 号  {}", record.queue_number, record.status);
    }

    drop(engine);
    workers.join().await;

    let mut refreshes = 0;
    while list_updates.try_recv().is_ok() {
        refreshes += 1;
    }
    println!("\n🔔 收到 {} 条列表刷新通知", refreshes);
    println!("\n📊 指标:\n{}", metrics.render());

    println!("✅ 演示完成！");
    Ok(())
}
