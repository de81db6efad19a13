use std::error::Error;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use chatq::cache::{CacheStore, MemoryStore};
use chatq::chat::{ChatService, MemoryConversationStore};
use chatq::config::Settings;
use chatq::routes::configure_routes;
use chatq::task_queue::{Broker, BrokerConfig, Consumer, MemoryBroker, PgBroker, Publisher};
use chatq::telemetry;
use chatq::worker::{EchoResponder, LlmWorker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let settings = Settings::from_env()?;

    let broker: Arc<dyn Broker> = match &settings.database_url {
        Some(url) => {
            let config = BrokerConfig::from_connection_string(url)?;
            Arc::new(PgBroker::connect(config).await?)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory broker, queued tasks will not survive a restart");
            Arc::new(MemoryBroker::new())
        }
    };
    broker.declare(&settings.topology()).await?;

    let chat = Arc::new(
        ChatService::new(
            Arc::new(MemoryConversationStore::new()),
            cache_store(&settings).await,
            Publisher::new(Arc::clone(&broker), settings.queue_name.clone()),
        )
        .with_cache_ttl(settings.cache_ttl),
    );

    let worker = Arc::new(LlmWorker::new(Arc::clone(&chat), Arc::new(EchoResponder)));
    let consumer_tag = format!("chatq-{}", std::process::id());
    let mut consumer = Consumer::new(
        broker,
        settings.consumer_config(consumer_tag),
        worker.into_handler(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(async move { consumer.run_with_reconnect(shutdown_rx).await });

    let routes = configure_routes(chat);
    info!(addr = %settings.bind_addr, "Starting server");

    tokio::select! {
        _ = warp::serve(routes).run(settings.bind_addr) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    let _ = shutdown_tx.send(true);
    match consumer_task.await {
        Ok(Ok(())) => info!("Worker stopped"),
        Ok(Err(e)) => error!(error = %e, "Worker stopped with error"),
        Err(e) => error!(error = %e, "Worker task failed"),
    }

    Ok(())
}

async fn cache_store(settings: &Settings) -> Arc<dyn CacheStore> {
    #[cfg(feature = "redis")]
    if let Some(url) = &settings.redis_url {
        match chatq::cache::RedisStore::connect(url).await {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!(error = %e, "Redis unavailable, using in-memory cache"),
        }
    }

    #[cfg(not(feature = "redis"))]
    if settings.redis_url.is_some() {
        warn!("REDIS_URL is set but the redis feature is disabled; using in-memory cache");
    }

    Arc::new(MemoryStore::new())
}
