//! 测试用的下游通道替身

use async_trait::async_trait;
use queue_core::{EventPublisher, Job, JobDispatcher, QueueError, QueueEvent, Result};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingDispatcher {
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[derive(Debug)]
pub struct FailingDispatcher;

#[async_trait]
impl JobDispatcher for FailingDispatcher {
    async fn enqueue(&self, _job: &Job) -> Result<()> {
        Err(QueueError::Downstream("broker unreachable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, QueueEvent)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(String, QueueEvent)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, event: &QueueEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}
