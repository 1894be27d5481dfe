use idempotency_gateway::api::{create_router, AppState};
use idempotency_gateway::config::{IdempotencyConfig, Settings, StoreBackend};
use idempotency_gateway::error::AppError;
use idempotency_gateway::idempotency::RequestInterceptor;
use idempotency_gateway::kv::{
    InMemoryKeyValueStore, KeyValueService, KeyValueStore, RedisKeyValueStore,
};
use idempotency_gateway::observability::{init_logging, init_metrics, LogConfig, LogFormat};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig::new(
        settings.logging.level.clone(),
        LogFormat::from(settings.logging.format.as_str()),
    ));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;
    let config = IdempotencyConfig::from_settings(&settings.idempotency)?;

    // Register the idempotency store
    let store: Arc<dyn KeyValueStore> = match settings.idempotency.backend {
        StoreBackend::Memory => {
            info!(store = %config.store, "Using in-memory idempotency store");
            let memory = Arc::new(InMemoryKeyValueStore::new(config.store.clone()));
            memory.spawn_sweeper(config.ttl);
            memory
        }
        StoreBackend::Redis => {
            let redis = settings.redis.as_ref().ok_or_else(|| {
                AppError::Validation("redis backend selected but [redis] url is missing".to_string())
            })?;
            info!("Connecting to Redis at {}...", redis.url);
            let store = RedisKeyValueStore::open(&redis.url, config.store.clone())?;
            store.ping().await?;
            info!("Redis connection established");
            Arc::new(store)
        }
    };
    let kv_service = KeyValueService::new();
    kv_service.register(store);

    let interceptor = Arc::new(RequestInterceptor::from_service(&kv_service, config)?);
    info!(
        store = %interceptor.config().store,
        header = %interceptor.config().header_name,
        ttl_secs = interceptor.config().ttl.as_secs(),
        "Idempotency coordinator ready"
    );

    let state = AppState::new(interceptor).with_metrics(metrics_handle);
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
