use std::sync::Arc;

use dispatcher::config::DispatcherConfig;
use dispatcher::http::{self, AppState};
use dispatcher::lifecycle::Shutdown;
use dispatcher::pipeline::Dispatcher;
use dispatcher::processor_client::HttpProcessorClient;
use dispatcher::store::PgStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing with default level WARN, overridable via RUST_LOG
    {
        use tracing_subscriber::{EnvFilter, fmt};
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt().with_env_filter(env_filter).try_init();
    }

    let config = DispatcherConfig::from_env()?;

    let store = Arc::new(PgStore::connect(&config.postgres_url, config.postgres_pool_size)?);
    store.init_schema().await?;

    let client = Arc::new(HttpProcessorClient::new(
        &config.default_processor_url,
        &config.fallback_processor_url,
        config.processor_timeout,
    ));

    // One trigger for the whole process: HTTP intake and the queue graph.
    let shutdown = Arc::new(Shutdown::new());
    let dispatcher = Arc::new(Dispatcher::start(
        &config.pipeline,
        client,
        store.clone(),
        store.clone(),
        Arc::clone(&shutdown),
    ));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "Listening");

    let state = Arc::new(AppState {
        dispatcher: Arc::clone(&dispatcher),
        store,
    });
    let server = tokio::spawn(http::serve(listener, state, shutdown.subscribe()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    // Intake stops first; the dispatcher then joins its tasks.
    shutdown.trigger();
    server.await?;
    dispatcher.shutdown().await;

    Ok(())
}
