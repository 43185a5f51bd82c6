//! 运行指标
//!
//! 使用独立的Prometheus注册表，由Web层以文本格式导出。

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// 排队引擎指标
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    registry: Registry,
    transitions: IntCounterVec,
    allocation_retries: IntCounter,
    side_effect_failures: IntCounterVec,
    store_timeouts: IntCounter,
}

impl QueueMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let transitions = IntCounterVec::new(
            Opts::new("queue_transitions_total", "Committed queue state transitions"),
            &["operation"],
        )?;
        let allocation_retries = IntCounter::new(
            "queue_allocation_retries_total",
            "Optimistic retries after a unique constraint collision",
        )?;
        let side_effect_failures = IntCounterVec::new(
            Opts::new(
                "queue_side_effect_failures_total",
                "Dispatcher and notifier failures",
            ),
            &["channel"],
        )?;
        let store_timeouts = IntCounter::new(
            "queue_store_timeouts_total",
            "Store operations that exceeded their deadline",
        )?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(allocation_retries.clone()))?;
        registry.register(Box::new(side_effect_failures.clone()))?;
        registry.register(Box::new(store_timeouts.clone()))?;

        Ok(Self {
            registry,
            transitions,
            allocation_retries,
            side_effect_failures,
            store_timeouts,
        })
    }

    pub fn record_transition(&self, operation: &str) {
        self.transitions.with_label_values(&[operation]).inc();
    }

    pub fn record_allocation_retry(&self) {
        self.allocation_retries.inc();
    }

    pub fn record_side_effect_failure(&self, channel: &str) {
        self.side_effect_failures.with_label_values(&[channel]).inc();
    }

    pub fn record_store_timeout(&self) {
        self.store_timeouts.inc();
    }

    pub fn transition_count(&self, operation: &str) -> u64 {
        self.transitions.with_label_values(&[operation]).get()
    }

    pub fn allocation_retry_count(&self) -> u64 {
        self.allocation_retries.get()
    }

    pub fn side_effect_failure_count(&self, channel: &str) -> u64 {
        self.side_effect_failures.with_label_values(&[channel]).get()
    }

    /// Prometheus文本格式
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
