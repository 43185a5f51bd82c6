//! WebSocket实时订阅
//!
//! 连接订阅某医生的记录更新主题和该医生某日的列表刷新主题，事件以JSON文本帧推送。

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::StreamExt,
    Sink, SinkExt,
};
use queue_core::{
    events::{doctor_topic, partition_topic},
    Partition, QueueEvent,
};
use queue_integration::TopicBroadcaster;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::error::ApiResult;
use crate::handlers::PartitionParams;
use crate::state::AppState;

/// 先校验医生和日期，再处理协议升级
pub async fn queue_socket(
    State(state): State<AppState>,
    params: Result<Query<PartitionParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let Query(params) = params?;
    let (doctor_id, queue_date) = params.parse()?;
    let partition = Partition::new(doctor_id, queue_date);

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    // 升级前订阅，握手期间的事件不会丢失
    let subscription = QueueSubscription::open(&state.broadcaster, &partition).await;

    info!(partition = %partition, "WebSocket subscription requested");
    Ok(ws.on_upgrade(move |socket| forward_events(socket, partition, subscription)))
}

/// 一个连接持有的两个主题订阅
pub(crate) struct QueueSubscription {
    updates: broadcast::Receiver<QueueEvent>,
    list: broadcast::Receiver<QueueEvent>,
}

impl QueueSubscription {
    pub(crate) async fn open(broadcaster: &TopicBroadcaster, partition: &Partition) -> Self {
        Self {
            updates: broadcaster.subscribe(doctor_topic(partition.doctor_id)).await,
            list: broadcaster.subscribe(partition_topic(partition)).await,
        }
    }
}

async fn forward_events(socket: WebSocket, partition: Partition, mut subscription: QueueSubscription) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        let open = tokio::select! {
            event = subscription.updates.recv() => forward(&mut sender, event).await,
            event = subscription.list.recv() => forward(&mut sender, event).await,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
        };
        if !open {
            break;
        }
    }

    debug!(partition = %partition, "WebSocket subscription closed");
}

/// 转发一条事件，返回连接是否继续
async fn forward<S>(sender: &mut S, event: Result<QueueEvent, RecvError>) -> bool
where
    S: Sink<Message> + Unpin,
{
    match event {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
            Err(e) => {
                warn!("Failed to encode queue event: {}", e);
                true
            }
        },
        Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "WebSocket subscriber lagging, events dropped");
            true
        }
        Err(RecvError::Closed) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use futures::channel::mpsc;
    use queue_core::{EventPublisher, QueueRecord, QueueStatus};
    use serde_json::Value;
    use uuid::Uuid;

    fn partition() -> Partition {
        Partition::new(Uuid::new_v4(), NaiveDate::from_ymd_opt(2024, 10, 8).unwrap())
    }

    fn record(partition: &Partition) -> QueueRecord {
        let now = Utc::now();
        QueueRecord {
            id: Uuid::new_v4(),
            registration_id: Some(Uuid::new_v4()),
            patient_id: Uuid::new_v4(),
            doctor_id: partition.doctor_id,
            queue_date: partition.queue_date,
            queue_number: 1,
            status: QueueStatus::Waiting,
            called_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn frame_json(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscription_forwards_both_topics_as_json() {
        let broadcaster = TopicBroadcaster::default();
        let partition = partition();
        let mut subscription = QueueSubscription::open(&broadcaster, &partition).await;

        let record = record(&partition);
        broadcaster
            .publish(&doctor_topic(partition.doctor_id), &QueueEvent::QueueUpdated(record.clone()))
            .await
            .unwrap();
        broadcaster
            .publish(&partition_topic(&partition), &QueueEvent::QueueListUpdated(partition))
            .await
            .unwrap();

        let (mut sink, mut frames) = mpsc::unbounded::<Message>();
        assert!(forward(&mut sink, subscription.updates.recv().await).await);
        assert!(forward(&mut sink, subscription.list.recv().await).await);

        let updated = frame_json(frames.next().await.unwrap());
        assert_eq!(updated["event"], "queueUpdated");
        assert_eq!(updated["data"]["id"], record.id.to_string());
        assert_eq!(updated["data"]["status"], "WAITING");

        let listed = frame_json(frames.next().await.unwrap());
        assert_eq!(listed["event"], "queueListUpdated");
        assert_eq!(listed["data"]["doctorId"], partition.doctor_id.to_string());
        assert_eq!(listed["data"]["queueDate"], "2024-10-08");
    }

    #[tokio::test]
    async fn test_other_partition_is_not_forwarded() {
        let broadcaster = TopicBroadcaster::default();
        let partition = partition();
        let mut subscription = QueueSubscription::open(&broadcaster, &partition).await;

        let other = Partition::new(partition.doctor_id, NaiveDate::from_ymd_opt(2024, 10, 9).unwrap());
        broadcaster
            .publish(&partition_topic(&other), &QueueEvent::QueueListUpdated(other))
            .await
            .unwrap();

        assert!(matches!(
            subscription.list.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_lag_keeps_connection_and_close_ends_it() {
        let (mut sink, mut frames) = mpsc::unbounded::<Message>();

        assert!(forward(&mut sink, Err(RecvError::Lagged(3))).await);
        assert!(!forward(&mut sink, Err(RecvError::Closed)).await);

        drop(sink);
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_socket_stops_forwarding() {
        let (mut sink, frames) = mpsc::unbounded::<Message>();
        drop(frames);

        let partition = partition();
        let event = Ok(QueueEvent::QueueListUpdated(partition));
        assert!(!forward(&mut sink, event).await);
    }
}
