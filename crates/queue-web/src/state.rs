//! 共享应用状态

use queue_admin::QueueMetrics;
use queue_integration::TopicBroadcaster;
use queue_workflow::QueueEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueueEngine>,
    pub broadcaster: TopicBroadcaster,
    pub metrics: QueueMetrics,
}

impl AppState {
    pub fn new(engine: Arc<QueueEngine>, broadcaster: TopicBroadcaster) -> Self {
        let metrics = engine.metrics().clone();
        Self {
            engine,
            broadcaster,
            metrics,
        }
    }
}
