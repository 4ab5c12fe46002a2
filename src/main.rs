use geochat::{AppState, Hub, RoomBroker, config::Config};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let broker = RoomBroker::new(config.broker.clone())?;
    let hub = Hub::new(broker);
    let _maintenance = hub.spawn_maintenance(config.sweep_interval);

    let app_state = AppState {
        hub,
        partitioning: config.partitioning,
    };

    let app = geochat::router(app_state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        partitioning = %config.partitioning,
        message_ttl_secs = config.broker.message_ttl.as_secs(),
        "geochat listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
