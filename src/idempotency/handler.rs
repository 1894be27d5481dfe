use crate::config::IdempotencyConfig;
use crate::error::{AppError, Result};
use crate::idempotency::capture::{ResponseCapture, ResponseWriter};
use crate::idempotency::storage::{EntryState, IdempotencyStore};
use crate::kv::KeyValueService;
use crate::observability::{get_metrics, mask_key};
use async_trait::async_trait;
use http::{header, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub executed_requests: AtomicU64,
    pub recorded_responses: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub conflicting_requests: AtomicU64,
    pub cleared_entries: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recorded(&self) {
        self.recorded_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicting_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleared(&self) {
        self.cleared_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            executed_requests: self.executed_requests.load(Ordering::Relaxed),
            recorded_responses: self.recorded_responses.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            conflicting_requests: self.conflicting_requests.load(Ordering::Relaxed),
            cleared_entries: self.cleared_entries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub executed_requests: u64,
    pub recorded_responses: u64,
    pub replayed_requests: u64,
    pub conflicting_requests: u64,
    pub cleared_entries: u64,
}

impl MetricsSnapshot {
    /// Share of keyed requests that were answered without running the pipeline.
    pub fn deduplication_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.replayed_requests + self.conflicting_requests) as f64
                / self.total_requests as f64
        }
    }
}

/// What the interceptor needs to know about an incoming request.
pub trait IdempotentRequest {
    fn request_method(&self) -> &Method;

    fn header_value(&self, name: &str) -> Option<&str>;
}

impl<B> IdempotentRequest for http::Request<B> {
    fn request_method(&self) -> &Method {
        self.method()
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

/// The business pipeline behind the interceptor. Invoked at most once per `handle` call.
#[async_trait]
pub trait Downstream<Req: Send + 'static>: Send + Sized {
    type Error: Send;

    async fn call(self, request: Req, response: &mut dyn ResponseWriter)
        -> std::result::Result<(), Self::Error>;
}

/// How a request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not a mutating request, or no key: the pipeline ran without coordination.
    PassThrough,
    /// The pipeline ran for a fresh key. `recorded` is false when the result was not cacheable.
    Executed { recorded: bool },
    /// A stored response was written back.
    Replayed,
    /// The key was in progress; 409 written.
    Conflict,
}

#[derive(Debug, thiserror::Error)]
pub enum InterceptError<E> {
    /// The downstream failure, untouched. The key has already been cleared.
    #[error("downstream pipeline failed: {0}")]
    Downstream(E),

    #[error(transparent)]
    Store(#[from] AppError),
}

pub fn conflict_message(key: &str) -> String {
    format!("Idempotent request already in progress for key '{}'", key)
}

/// Coordinates mutating requests that carry an idempotency key.
///
/// The read-absent / write-in-progress pair is not atomic: two first requests for the same key
/// arriving together can both execute. Closing that window needs a compare-and-set store.
pub struct RequestInterceptor {
    store: IdempotencyStore,
    config: IdempotencyConfig,
    metrics: Arc<IdempotencyMetrics>,
}

impl RequestInterceptor {
    pub fn new(store: IdempotencyStore, config: IdempotencyConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    /// Resolves the configured store name through `service`.
    pub fn from_service(service: &KeyValueService, config: IdempotencyConfig) -> Result<Self> {
        let kv = service.store(&config.store)?;
        Ok(Self::new(IdempotencyStore::new(kv), config))
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn store(&self) -> &IdempotencyStore {
        &self.store
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The idempotency key `request` is coordinated under, or `None` when it passes through
    /// (method not configured as mutating, or no key header).
    pub fn coordinated_key<Req: IdempotentRequest>(&self, request: &Req) -> Option<String> {
        if !self.config.is_mutating(request.request_method()) {
            return None;
        }
        request
            .header_value(&self.config.header_name)
            .map(str::to_owned)
    }

    pub async fn handle<Req, D>(
        &self,
        request: Req,
        response: &mut dyn ResponseWriter,
        downstream: D,
    ) -> std::result::Result<Disposition, InterceptError<D::Error>>
    where
        Req: IdempotentRequest + Send + 'static,
        D: Downstream<Req>,
    {
        let Some(key) = self.coordinated_key(&request) else {
            get_metrics().record_idempotency_outcome("pass_through");
            downstream
                .call(request, response)
                .await
                .map_err(InterceptError::Downstream)?;
            return Ok(Disposition::PassThrough);
        };

        self.metrics.record_request();

        let state = self.store.read(&key).await?;
        tracing::debug!(key = %mask_key(&key), state = state.label(), "Idempotency entry read");

        match state {
            EntryState::Absent => self.execute(key, request, response, downstream).await,
            EntryState::InProgress => {
                tracing::info!(key = %mask_key(&key), "Idempotent request already in progress");
                self.metrics.record_conflict();
                get_metrics().record_idempotency_outcome("conflict");
                write_conflict(response, &key);
                Ok(Disposition::Conflict)
            }
            EntryState::Completed { status, body } => {
                tracing::debug!(
                    key = %mask_key(&key),
                    status = status.as_u16(),
                    bytes = body.len(),
                    "Replaying stored response"
                );
                self.metrics.record_replayed();
                get_metrics().record_idempotency_outcome("replayed");
                response.write(&body);
                response.set_status(status);
                Ok(Disposition::Replayed)
            }
        }
    }

    async fn execute<Req, D>(
        &self,
        key: String,
        request: Req,
        response: &mut dyn ResponseWriter,
        downstream: D,
    ) -> std::result::Result<Disposition, InterceptError<D::Error>>
    where
        Req: IdempotentRequest + Send + 'static,
        D: Downstream<Req>,
    {
        self.store
            .write_in_progress(&key, self.config.ttl)
            .await?;
        self.metrics.record_executed();

        let pending = PendingExecution::new(&self.store, &self.metrics, key, self.config.ttl);
        let mut capture = ResponseCapture::new(response, self.config.max_capture_bytes);
        let outcome = downstream.call(request, &mut capture).await;
        pending.settle(outcome, capture).await
    }
}

fn write_conflict(response: &mut dyn ResponseWriter, key: &str) {
    response.set_status(StatusCode::CONFLICT);
    response.insert_header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.write(conflict_message(key).as_bytes());
}

/// An in-progress reservation that must be resolved exactly once.
///
/// `settle` consumes the value, so the record-or-clear decision cannot run twice. If the value is
/// dropped unsettled (the task was cancelled mid-pipeline) nothing is cleaned up and the marker
/// lives until its TTL runs out.
struct PendingExecution<'a> {
    store: &'a IdempotencyStore,
    metrics: &'a IdempotencyMetrics,
    key: String,
    ttl: Duration,
    settled: bool,
}

impl<'a> PendingExecution<'a> {
    fn new(
        store: &'a IdempotencyStore,
        metrics: &'a IdempotencyMetrics,
        key: String,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            key,
            ttl,
            settled: false,
        }
    }

    async fn settle<E>(
        mut self,
        outcome: std::result::Result<(), E>,
        capture: ResponseCapture<'_>,
    ) -> std::result::Result<Disposition, InterceptError<E>> {
        self.settled = true;
        let status = capture.capture_status();

        if let Err(e) = outcome {
            tracing::warn!(key = %mask_key(&self.key), "Downstream failed, clearing idempotency entry");
            get_metrics().record_idempotency_outcome("failed");
            self.clear("downstream_failure").await;
            return Err(InterceptError::Downstream(e));
        }

        get_metrics().record_idempotency_outcome("executed");

        if status.as_u16() >= 400 {
            tracing::debug!(
                key = %mask_key(&self.key),
                status = status.as_u16(),
                "Error status is not cached, clearing idempotency entry"
            );
            self.clear("error_status").await;
            return Ok(Disposition::Executed { recorded: false });
        }

        if capture.overflowed() {
            tracing::warn!(
                key = %mask_key(&self.key),
                "Response exceeds capture limit and will not be replayed"
            );
            get_metrics().record_capture_overflow();
            self.clear("capture_overflow").await;
            return Ok(Disposition::Executed { recorded: false });
        }

        match self
            .store
            .write_completed(&self.key, status, capture.capture_body(), self.ttl)
            .await
        {
            Ok(()) => {
                self.metrics.record_recorded();
                Ok(Disposition::Executed { recorded: true })
            }
            Err(e) => {
                tracing::error!(
                    key = %mask_key(&self.key),
                    "Failed to record idempotent response: {}",
                    e
                );
                self.clear("record_failure").await;
                Ok(Disposition::Executed { recorded: false })
            }
        }
    }

    /// A failed clear is logged only: the caller's outcome stands and the TTL bounds the damage.
    async fn clear(&self, reason: &'static str) {
        match self.store.clear(&self.key).await {
            Ok(()) => {
                self.metrics.record_cleared();
                get_metrics().record_entry_cleared(reason);
            }
            Err(e) => {
                tracing::error!(
                    key = %mask_key(&self.key),
                    reason,
                    "Failed to clear idempotency entry: {}",
                    e
                );
            }
        }
    }
}

impl Drop for PendingExecution<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                key = %mask_key(&self.key),
                ttl_secs = self.ttl.as_secs(),
                "Idempotent execution abandoned, key stays in progress until TTL expiry"
            );
        }
    }
}
