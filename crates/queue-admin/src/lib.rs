//! # 排队管理模块
//!
//! 提供配置加载、日志初始化和运行指标等运维功能

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{
    AppConfig, DatabaseConfig, DispatcherConfig, LoggingConfig, NotifierConfig, ServerConfig,
    WorkflowConfig,
};
pub use logging::init_logging;
pub use metrics::QueueMetrics;
