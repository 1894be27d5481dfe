//! axum integration: the rest of the router is the downstream pipeline.

use crate::idempotency::capture::{BufferedResponse, ResponseWriter};
use crate::idempotency::handler::{Downstream, InterceptError, RequestInterceptor};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use futures::StreamExt;
use std::sync::Arc;

/// Runs the inner router and streams its response through the given writer.
pub struct NextDownstream(Next);

#[async_trait]
impl Downstream<Request> for NextDownstream {
    type Error = axum::Error;

    async fn call(
        self,
        request: Request,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), Self::Error> {
        let (parts, body) = self.0.run(request).await.into_parts();
        response.set_status(parts.status);
        for (name, value) in parts.headers.iter() {
            response.insert_header(name.clone(), value.clone());
        }

        let mut frames = body.into_data_stream();
        while let Some(chunk) = frames.next().await {
            response.write(&chunk?);
        }
        Ok(())
    }
}

/// Middleware function for [`axum::middleware::from_fn_with_state`].
///
/// Requests that are not coordinated go straight to `next` and their response is returned as is,
/// streaming included. Coordinated requests are answered from a [`BufferedResponse`] holding the
/// whole body: `max_capture_bytes` bounds the stored copy only, not this outgoing buffer.
pub async fn idempotency_middleware(
    State(interceptor): State<Arc<RequestInterceptor>>,
    request: Request,
    next: Next,
) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().clone();

    if interceptor.coordinated_key(&request).is_none() {
        get_metrics().record_idempotency_outcome("pass_through");
        let response = next.run(request).await;
        get_metrics().record_http_request(method.as_str(), response.status().as_u16(), timer.elapsed_ms());
        return response;
    }

    let mut buffered = BufferedResponse::new();

    let response = match interceptor
        .handle(request, &mut buffered, NextDownstream(next))
        .await
    {
        Ok(_) => buffered.into_response(),
        Err(InterceptError::Downstream(e)) => {
            tracing::error!("Downstream response body failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(InterceptError::Store(e)) => e.into_response(),
    };

    get_metrics().record_http_request(method.as_str(), response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Puts every route of `router` behind the interceptor.
pub fn with_idempotency<S>(router: Router<S>, interceptor: Arc<RequestInterceptor>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(interceptor, idempotency_middleware))
}
