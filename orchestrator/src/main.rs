use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use agent_orchestrator::api::{self, AppState};
use agent_orchestrator::config::{Config, ExecutorKind};
use agent_orchestrator::redis_client::RedisClient;
use agent_orchestrator::tasks::{HttpExecutor, RedisExecutor, TaskExecutor};
use agent_orchestrator::{
    db, AgentRegistry, CommunicationValidator, DecisionTable, Dispatcher, EventPerceiver, EventProcessor,
    MessageLog, Metrics, PgStore, TaskQueue,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting agent orchestrator");

    let db_pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&db_pool).await?;
    let store = Arc::new(PgStore::new(db_pool));

    let registry = Arc::new(match &config.agent_registry_path {
        Some(path) => AgentRegistry::from_json_file(path)
            .with_context(|| format!("Failed to load agent registry from {}", path.display()))?,
        None => AgentRegistry::marketing_roster(),
    });
    info!(agents = registry.len(), "Agent registry loaded");

    let executor: Arc<dyn TaskExecutor> = match &config.executor {
        ExecutorKind::Redis { queue } => {
            let redis = RedisClient::new(&config.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            info!(queue = %queue, "Handing tasks off through Redis");
            Arc::new(RedisExecutor::new(redis, queue.clone()))
        }
        ExecutorKind::Http { url, api_key } => {
            info!(url = %url, "Handing tasks off over HTTP");
            Arc::new(HttpExecutor::new(url.clone(), api_key.clone(), config.handoff_timeout)?)
        }
    };

    let metrics = Arc::new(Metrics::new()?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(store.clone(), executor, config.dispatcher()).with_metrics(metrics.clone());
    let processor = EventProcessor::new(
        store.clone(),
        DecisionTable::marketing_defaults(),
        registry.clone(),
        config.processor(),
    )
    .with_metrics(metrics.clone());

    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    let processor_handle = tokio::spawn(processor.clone().run(shutdown_rx));

    let state = AppState {
        registry: registry.clone(),
        messages: MessageLog::new(CommunicationValidator::new(registry.clone()), store.clone())
            .with_metrics(metrics.clone()),
        tasks: TaskQueue::new(store.clone(), registry, config.max_task_retries),
        perceiver: EventPerceiver::new(store),
        processor,
        metrics,
    };

    let addr = ([0, 0, 0, 0], config.port);
    let (bound, server) = warp::serve(api::routes(state)).bind_with_graceful_shutdown(addr, async {
        tokio::signal::ctrl_c().await.ok();
    });
    info!(%bound, "Server listening");
    server.await;

    info!("Shutting down background loops");
    shutdown_tx.send(true).ok();
    let _ = tokio::join!(dispatcher_handle, processor_handle);
    Ok(())
}
