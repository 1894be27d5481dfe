use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::handlers;
use super::responses::ItemResponse;
use crate::idempotency::{with_idempotency, RequestInterceptor};

/// In-memory items backing the demo API.
#[derive(Debug, Default)]
pub struct ItemRepository {
    next_id: AtomicU64,
    items: RwLock<HashMap<u64, ItemResponse>>,
}

impl ItemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, name: String, quantity: u32) -> ItemResponse {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let item = ItemResponse {
            id,
            name,
            quantity,
            created_at: Utc::now(),
        };
        self.items.write().await.insert(id, item.clone());
        item
    }

    pub async fn find(&self, id: u64) -> Option<ItemResponse> {
        self.items.read().await.get(&id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.items.read().await.len()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Arc<RequestInterceptor>,
    pub items: Arc<ItemRepository>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(interceptor: Arc<RequestInterceptor>) -> Self {
        Self {
            interceptor,
            items: Arc::new(ItemRepository::new()),
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main API router. Only the item and echo routes are coordinated.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/echo", post(handlers::echo))
        .route("/items", post(handlers::create_item))
        .route("/items/:id", get(handlers::get_item));
    let api = with_idempotency(api, Arc::clone(&state.interceptor));

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/idempotency/stats", get(handlers::idempotency_stats))
        .merge(api)
        .with_state(state)
}
