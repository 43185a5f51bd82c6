//! 提交后的副作用交接
//!
//! 引擎在状态变更提交后把任务和事件放入两个无界通道，各由一个后台任务按顺序消费。
//! 发送方从不等待下游I/O，下游失败只记录日志和计数。
//!
//! 并发调用者交接事件的先后不一定等于存储提交的先后。通知任务记住每条记录最近转发的状态，
//! 不比它更新的记录更新事件直接丢弃，订阅者看到的单条记录状态只会前进。

use queue_admin::QueueMetrics;
use queue_core::{
    EventPublisher, Job, JobDispatcher, JobName, Partition, QueueEvent, QueueRecord, QueueStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::state_machine::QueueStateMachine;

const DISPATCHER_CHANNEL: &str = "dispatcher";
const NOTIFIER_CHANNEL: &str = "notifier";

/// 通知任务记住状态的最近记录数
const FORWARDED_CAPACITY: usize = 4096;

/// 副作用发送端，可在多个引擎实例间克隆
#[derive(Debug, Clone)]
pub struct SideEffects {
    jobs: mpsc::UnboundedSender<Job>,
    events: mpsc::UnboundedSender<QueueEvent>,
}

/// 后台消费任务句柄。所有 `SideEffects` 释放后任务自然结束
#[derive(Debug)]
pub struct SideEffectWorkers {
    jobs: JoinHandle<()>,
    events: JoinHandle<()>,
}

impl SideEffects {
    /// 启动两个后台消费任务，必须在tokio运行时内调用
    pub fn spawn(
        dispatcher: Arc<dyn JobDispatcher>,
        publisher: Arc<dyn EventPublisher>,
        metrics: QueueMetrics,
    ) -> (Self, SideEffectWorkers) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let jobs = tokio::spawn(run_dispatcher(jobs_rx, dispatcher, metrics.clone()));
        let events = tokio::spawn(run_notifier(events_rx, publisher, metrics));

        (
            Self {
                jobs: jobs_tx,
                events: events_tx,
            },
            SideEffectWorkers { jobs, events },
        )
    }

    /// 单条记录状态变更：一个任务，一条记录更新事件，一条列表刷新提示
    pub fn committed(&self, job_name: JobName, record: &QueueRecord) {
        self.enqueue(Job::for_record(job_name, record));
        self.publish(QueueEvent::QueueUpdated(record.clone()));
        self.list_changed(record.partition());
    }

    /// 仅列表刷新提示
    pub fn list_changed(&self, partition: Partition) {
        self.publish(QueueEvent::QueueListUpdated(partition));
    }

    fn enqueue(&self, job: Job) {
        if let Err(e) = self.jobs.send(job) {
            warn!(job = e.0.job_name.as_str(), "Dispatcher worker stopped, job dropped");
        }
    }

    fn publish(&self, event: QueueEvent) {
        if let Err(e) = self.events.send(event) {
            warn!(topic = %e.0.topic(), "Notifier worker stopped, event dropped");
        }
    }
}

impl SideEffectWorkers {
    /// 等待两个后台任务排空通道并退出
    pub async fn join(self) {
        if let Err(e) = self.jobs.await {
            error!("Dispatcher worker panicked: {}", e);
        }
        if let Err(e) = self.events.await {
            error!("Notifier worker panicked: {}", e);
        }
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Job>,
    dispatcher: Arc<dyn JobDispatcher>,
    metrics: QueueMetrics,
) {
    while let Some(job) = rx.recv().await {
        match dispatcher.enqueue(&job).await {
            Ok(()) => debug!(
                dispatcher = dispatcher.name(),
                job = job.job_name.as_str(),
                queue_id = %job.payload.queue_id,
                "Job dispatched"
            ),
            Err(e) => {
                metrics.record_side_effect_failure(DISPATCHER_CHANNEL);
                warn!(
                    dispatcher = dispatcher.name(),
                    job = job.job_name.as_str(),
                    queue_id = %job.payload.queue_id,
                    "Failed to dispatch job: {}",
                    e
                );
            }
        }
    }
    debug!("Dispatcher worker finished");
}

/// 最近转发过的记录状态，超出容量时淘汰最早的记录
struct ForwardedStatuses {
    state_machine: QueueStateMachine,
    statuses: HashMap<Uuid, QueueStatus>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl ForwardedStatuses {
    fn new(capacity: usize) -> Self {
        Self {
            state_machine: QueueStateMachine::new(),
            statuses: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 记录状态比上次转发的更新时放行
    fn admit(&mut self, record: &QueueRecord) -> bool {
        match self.statuses.get(&record.id) {
            Some(&last) if !self.state_machine.supersedes(record.status, last) => false,
            Some(_) => {
                self.statuses.insert(record.id, record.status);
                true
            }
            None => {
                if self.order.len() >= self.capacity {
                    if let Some(oldest) = self.order.pop_front() {
                        self.statuses.remove(&oldest);
                    }
                }
                self.order.push_back(record.id);
                self.statuses.insert(record.id, record.status);
                true
            }
        }
    }
}

async fn run_notifier(
    mut rx: mpsc::UnboundedReceiver<QueueEvent>,
    publisher: Arc<dyn EventPublisher>,
    metrics: QueueMetrics,
) {
    let mut forwarded = ForwardedStatuses::new(FORWARDED_CAPACITY);

    while let Some(event) = rx.recv().await {
        if let QueueEvent::QueueUpdated(record) = &event {
            if !forwarded.admit(record) {
                debug!(
                    queue_id = %record.id,
                    status = %record.status,
                    "Stale queue update dropped"
                );
                continue;
            }
        }

        let topic = event.topic();
        if let Err(e) = publisher.publish(&topic, &event).await {
            metrics.record_side_effect_failure(NOTIFIER_CHANNEL);
            warn!(topic = %topic, "Failed to publish event: {}", e);
        }
    }
    debug!("Notifier worker finished");
}
