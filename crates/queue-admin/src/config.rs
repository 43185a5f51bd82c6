//! 配置管理
//!
//! 配置来源按优先级从低到高：内置默认值、TOML配置文件、`QUEUE__` 前缀的环境变量。

use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 排队系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 排队流程配置
    pub workflow: WorkflowConfig,
    /// 任务分发配置
    pub dispatcher: DispatcherConfig,
    /// 实时通知配置
    pub notifier: NotifierConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 连接字符串
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 获取连接超时（秒）
    pub acquire_timeout_secs: u64,
    /// 启动时建表
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/clinic_queue".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// 排队流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 单次存储操作超时（毫秒）
    pub store_timeout_ms: u64,
    /// 编号分配与叫号的最大尝试次数
    pub max_allocation_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            max_allocation_attempts: 5,
        }
    }
}

impl WorkflowConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// 任务分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// AMQP地址，未配置时只记录日志
    pub amqp_url: Option<String>,
    /// 持久化队列名
    pub queue_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            amqp_url: None,
            queue_name: "queue-jobs".to_string(),
        }
    }
}

/// 实时通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// 每个主题的广播缓冲
    pub channel_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤表达式
    pub level: String,
    /// 彩色输出
    pub ansi: bool,
    /// 输出target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

impl AppConfig {
    /// 加载配置，`config_path` 为空时只用默认值和环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("QUEUE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;

        info!(
            source = config_path.unwrap_or("<defaults>"),
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be positive");
        }
        if self.workflow.store_timeout_ms == 0 {
            anyhow::bail!("workflow.store_timeout_ms must be positive");
        }
        if self.workflow.max_allocation_attempts == 0 {
            anyhow::bail!("workflow.max_allocation_attempts must be positive");
        }
        if self.dispatcher.queue_name.trim().is_empty() {
            anyhow::bail!("dispatcher.queue_name must not be empty");
        }
        if self.notifier.channel_capacity == 0 {
            anyhow::bail!("notifier.channel_capacity must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workflow.max_allocation_attempts, 5);
        assert_eq!(config.workflow.store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9090\n\n[workflow]\nmax_allocation_attempts = 8\n\n[dispatcher]\namqp_url = \"amqp://mq:5672\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.workflow.max_allocation_attempts, 8);
        assert_eq!(config.workflow.store_timeout_ms, 5_000);
        assert_eq!(config.dispatcher.amqp_url.as_deref(), Some("amqp://mq:5672"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = AppConfig::default();
        config.workflow.max_allocation_attempts = 0;
        assert!(config.validate().is_err());
    }
}
