//! 实时通知
//!
//! 每个主题一个广播通道。没有订阅者的主题不保留通道，事件直接丢弃；
//! 落后的订阅者丢失最旧的事件，不做持久化和重放。

use async_trait::async_trait;
use queue_core::{EventPublisher, QueueEvent, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

type ChannelsMap = Arc<RwLock<HashMap<String, broadcast::Sender<QueueEvent>>>>;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// 按主题分发的实时事件广播器
#[derive(Clone)]
pub struct TopicBroadcaster {
    channels: ChannelsMap,
    capacity: usize,
}

impl TopicBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// 订阅主题，主题不存在时创建通道
    pub async fn subscribe(&self, topic: impl Into<String>) -> broadcast::Receiver<QueueEvent> {
        let topic = topic.into();
        let mut channels = self.channels.write().await;
        let capacity = self.capacity;

        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// 向主题广播，返回收到事件的订阅者数量
    pub async fn broadcast(&self, topic: &str, event: QueueEvent) -> usize {
        {
            let channels = self.channels.read().await;
            match channels.get(topic) {
                Some(sender) if sender.receiver_count() > 0 => {
                    return sender.send(event).unwrap_or(0);
                }
                Some(_) => {}
                None => {
                    trace!(topic, "No subscribers for topic");
                    return 0;
                }
            }
        }

        // 订阅者已全部断开，回收通道
        let mut channels = self.channels.write().await;
        if channels
            .get(topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(topic);
            debug!(topic, "Released idle topic channel");
        }
        0
    }
}

impl Default for TopicBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for TopicBroadcaster {
    async fn publish(&self, topic: &str, event: &QueueEvent) -> Result<()> {
        let delivered = self.broadcast(topic, event.clone()).await;
        trace!(topic, delivered, "Event published");
        Ok(())
    }
}
