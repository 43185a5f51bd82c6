//! 排队叫号服务主程序

use anyhow::Context;
use clap::Parser;
use queue_admin::{init_logging, AppConfig, QueueMetrics};
use queue_core::{JobDispatcher, ParticipantDirectory, QueueStore};
use queue_database::{DatabasePool, MemoryQueueStore, PgQueueStore};
use queue_integration::{AmqpDispatcher, LogDispatcher, TopicBroadcaster};
use queue_web::{AppState, WebServer};
use queue_workflow::{QueueEngine, SideEffects};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// 排队服务命令行参数
#[derive(Parser, Debug)]
#[command(name = "queue-server")]
#[command(about = "门诊排队叫号编排服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听地址，覆盖配置文件
    #[arg(long)]
    host: Option<String>,

    /// 监听端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 使用内存存储，无需PostgreSQL
    #[arg(long)]
    memory_store: bool,
}

type Stores = (Arc<dyn QueueStore>, Arc<dyn ParticipantDirectory>);

async fn open_stores(config: &AppConfig, memory: bool) -> anyhow::Result<Stores> {
    if memory {
        warn!("Using in-memory queue store, records are lost on restart");
        let store = Arc::new(MemoryQueueStore::new());
        let queue_store: Arc<dyn QueueStore> = store.clone();
        let directory: Arc<dyn ParticipantDirectory> = store;
        return Ok((queue_store, directory));
    }

    let pool = DatabasePool::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout(),
    )
    .await
    .context("failed to connect to database")?;
    let store = Arc::new(PgQueueStore::new(pool));

    if config.database.run_migrations {
        store.create_tables().await.context("failed to create queue tables")?;
    }
    let queue_store: Arc<dyn QueueStore> = store.clone();
    let directory: Arc<dyn ParticipantDirectory> = store;
    Ok((queue_store, directory))
}

async fn open_dispatcher(config: &AppConfig) -> anyhow::Result<Arc<dyn JobDispatcher>> {
    match &config.dispatcher.amqp_url {
        Some(url) => {
            let dispatcher = AmqpDispatcher::connect(url, &config.dispatcher.queue_name)
                .await
                .context("failed to connect to message broker")?;
            let dispatcher: Arc<dyn JobDispatcher> = Arc::new(dispatcher);
            Ok(dispatcher)
        }
        None => {
            info!("No message broker configured, jobs are written to the log");
            let dispatcher: Arc<dyn JobDispatcher> = Arc::new(LogDispatcher);
            Ok(dispatcher)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_logging(&config.logging)?;
    info!("启动排队叫号服务...");

    let metrics = QueueMetrics::new().context("failed to register metrics")?;
    let (store, directory) = open_stores(&config, args.memory_store).await?;
    let dispatcher = open_dispatcher(&config).await?;
    let broadcaster = TopicBroadcaster::new(config.notifier.channel_capacity);

    let (side_effects, workers) =
        SideEffects::spawn(dispatcher, Arc::new(broadcaster.clone()), metrics.clone());
    let engine = Arc::new(QueueEngine::new(
        store,
        directory,
        side_effects,
        metrics,
        &config.workflow,
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;

    WebServer::new(addr, AppState::new(engine, broadcaster)).run().await?;

    // 服务器退出后引擎随路由释放，等待副作用排空
    workers.join().await;
    info!("排队叫号服务已停止");
    Ok(())
}
