//! Display dispatcher REST API: /enqueue, /queue/status, /job/:id, /failures.

use display_api::server::{self, AppState};
use display_dispatch::{Dispatcher, DispatcherConfig};
use display_queue::BrokerConfig;
use display_types::{JobStore, QueueAdapter};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(feature = "sqlite")]
fn open_backends(broker: BrokerConfig) -> Result<(Arc<dyn JobStore>, Arc<dyn QueueAdapter>), BoxError> {
    use display_queue::SqliteQueue;
    use display_store::SqliteJobStore;

    let store: Arc<dyn JobStore> = match std::env::var("DISPATCHER_DB") {
        Ok(path) => {
            tracing::info!(path = %path, "opening sqlite job store");
            Arc::new(SqliteJobStore::new(path)?)
        }
        Err(_) => Arc::new(SqliteJobStore::open_in_memory()?),
    };
    let queue: Arc<dyn QueueAdapter> = match std::env::var("DISPATCHER_QUEUE_DB") {
        Ok(path) => {
            tracing::info!(path = %path, "opening sqlite queue");
            Arc::new(SqliteQueue::new(path, broker)?)
        }
        Err(_) => Arc::new(SqliteQueue::open_in_memory(broker)?),
    };
    Ok((store, queue))
}

#[cfg(not(feature = "sqlite"))]
fn open_backends(broker: BrokerConfig) -> Result<(Arc<dyn JobStore>, Arc<dyn QueueAdapter>), BoxError> {
    use display_queue::InMemoryBroker;
    use display_store::InMemoryJobStore;

    Ok((
        Arc::new(InMemoryJobStore::new()),
        Arc::new(InMemoryBroker::new(broker)),
    ))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DispatcherConfig::from_env();
    let broker = BrokerConfig::from_env();
    tracing::info!(queue = %broker.queue_name, "dispatcher config: {:?}", config);
    let (store, queue) = open_backends(broker)?;
    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(store, queue, config),
    });

    let app = server::router(state);
    let addr: SocketAddr = std::env::var("DISPATCHER_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()?;
    tracing::info!("display dispatcher listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
