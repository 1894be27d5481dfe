use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::api::requests::CreateItemRequest;
use crate::api::responses::{
    ApiResponse, ErrorResponse, HealthResponse, IdempotencyStatsResponse, ItemResponse,
    StoreHealth, ValidationErrorDetail,
};

use crate::kv::KeyValueStore;

use super::routes::AppState;

/// Health check endpoint. Reports the idempotency store's reachability.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let store = state.interceptor.store().backend();
    let reachable = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(store = store.name(), "Idempotency store ping failed: {}", e);
            false
        }
    };

    let response = HealthResponse {
        status: if reachable { "healthy".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        store: StoreHealth {
            name: store.name().to_string(),
            reachable,
        },
    };

    Json(ApiResponse::success(response))
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Idempotency counters for this instance.
pub async fn idempotency_stats(
    State(state): State<AppState>,
) -> Json<ApiResponse<IdempotencyStatsResponse>> {
    let config = state.interceptor.config();
    let counters = state.interceptor.metrics().snapshot();
    Json(ApiResponse::success(IdempotencyStatsResponse {
        store: config.store.clone(),
        header_name: config.header_name.clone(),
        ttl_seconds: config.ttl.as_secs(),
        deduplication_rate: counters.deduplication_rate(),
        counters,
    }))
}

// ============================================================================
// Demo mutating API
// ============================================================================

/// Echoes the request body back.
pub async fn echo(body: Bytes) -> impl IntoResponse {
    (StatusCode::OK, body)
}

/// Create a new item.
pub async fn create_item(
    State(state): State<AppState>,
    Json(request): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ItemResponse>>), (StatusCode, Json<ApiResponse<()>>)> {
    if let Err(errors) = request.validate() {
        let details: Vec<ValidationErrorDetail> = errors
            .iter()
            .map(|e| ValidationErrorDetail {
                field: e.field.clone(),
                message: e.message.clone(),
            })
            .collect();

        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                ErrorResponse::new("VALIDATION_ERROR", "Request validation failed")
                    .with_details(details),
            )),
        ));
    }

    let item = state.items.create(request.name, request.quantity).await;
    tracing::info!(item_id = item.id, "Item created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

/// Get item by ID.
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<ItemResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    match state.items.find(id).await {
        Some(item) => Ok(Json(ApiResponse::success(item))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(ErrorResponse::new(
                "NOT_FOUND",
                format!("Item {} not found", id),
            ))),
        )),
    }
}
