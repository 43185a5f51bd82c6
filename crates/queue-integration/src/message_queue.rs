//! 消息队列集成模块
//!
//! 提供下游任务的持久化投递：
//! - RabbitMQ集成（持久化队列、持久化消息、发布确认）
//! - 未配置消息代理时的日志分发器

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
};
use queue_core::{Job, JobDispatcher, QueueError, Result};
use tracing::{debug, error, info};

/// AMQP持久化消息
const PERSISTENT_DELIVERY_MODE: u8 = 2;

fn downstream(context: &str, err: lapin::Error) -> QueueError {
    QueueError::Downstream(format!("{}: {}", context, err))
}

/// 任务信封的JSON编码
pub fn encode_job(job: &Job) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(job)?)
}

/// RabbitMQ任务分发器
///
/// 使用默认交换器，以队列名作为路由键。
pub struct AmqpDispatcher {
    _connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl AmqpDispatcher {
    /// 连接消息代理，声明持久化队列并开启发布确认
    pub async fn connect(url: &str, queue_name: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| downstream("failed to connect to message broker", e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| downstream("failed to open channel", e))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| downstream("failed to enable publisher confirms", e))?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| downstream("failed to declare job queue", e))?;

        info!(queue = queue_name, "Connected to message queue");
        Ok(Self {
            _connection: connection,
            channel,
            queue_name: queue_name.to_string(),
        })
    }
}

#[async_trait]
impl JobDispatcher for AmqpDispatcher {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let payload = encode_job(job)?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_message_id(job.payload.queue_id.to_string().into())
            .with_kind(job.job_name.as_str().into());

        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| downstream("failed to publish job", e))?
            .await
            .map_err(|e| downstream("failed to confirm job", e))?;

        if confirm.is_nack() {
            error!(job = job.job_name.as_str(), "Job publish rejected by broker");
            return Err(QueueError::Downstream("job publish rejected".to_string()));
        }

        debug!(
            job = job.job_name.as_str(),
            queue_id = %job.payload.queue_id,
            "Job published"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "amqp"
    }
}

/// 只记录日志的分发器
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

#[async_trait]
impl JobDispatcher for LogDispatcher {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let envelope = serde_json::to_string(job)?;
        info!(job = job.job_name.as_str(), %envelope, "Job dispatched to log");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
