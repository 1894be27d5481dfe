#![allow(dead_code)]

use async_trait::async_trait;
use http::{Method, Request, StatusCode};
use idempotency_gateway::config::IdempotencyConfig;
use idempotency_gateway::error::{AppError, Result};
use idempotency_gateway::idempotency::{
    Downstream, IdempotencyStore, RequestInterceptor, ResponseWriter,
};
use idempotency_gateway::kv::{InMemoryKeyValueStore, KeyValueStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

pub const TTL: Duration = Duration::from_secs(30);
pub const STORE_NAME: &str = "requestcontroller";
pub const HEADER: &str = "NuxeoIdempotencyKey";
pub const CONTENT: &str = "test content";

pub fn unique_key() -> String {
    format!("key-{}", uuid::Uuid::new_v4())
}

pub fn request(method: Method, key: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().method(method).uri("/resource");
    if let Some(key) = key {
        builder = builder.header(HEADER, key);
    }
    builder.body(()).unwrap()
}

pub fn post(key: &str) -> Request<()> {
    request(Method::POST, Some(key))
}

pub fn interceptor_with(kv: Arc<dyn KeyValueStore>) -> Arc<RequestInterceptor> {
    let config = IdempotencyConfig::new(STORE_NAME, TTL);
    Arc::new(RequestInterceptor::new(IdempotencyStore::new(kv), config))
}

pub fn memory_interceptor() -> (Arc<InMemoryKeyValueStore>, Arc<RequestInterceptor>) {
    let kv = Arc::new(InMemoryKeyValueStore::new(STORE_NAME));
    let interceptor = interceptor_with(kv.clone());
    (kv, interceptor)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

/// Downstream that writes a fixed response, or fails, and counts its invocations.
#[derive(Debug, Clone)]
pub struct ScriptedDownstream {
    pub calls: Arc<AtomicUsize>,
    status: StatusCode,
    chunks: Vec<Vec<u8>>,
    status_after_body: bool,
    failure: Option<String>,
}

impl ScriptedDownstream {
    pub fn responding(status: StatusCode, body: &str) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            status,
            chunks: vec![body.as_bytes().to_vec()],
            status_after_body: false,
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::responding(StatusCode::OK, "")
        }
    }

    /// Streams `chunks` first and sets the status last.
    pub fn chunked(status: StatusCode, chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            status_after_body: true,
            ..Self::responding(status, "")
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<Req: Send + 'static> Downstream<Req> for ScriptedDownstream {
    type Error = TestError;

    async fn call(
        self,
        _request: Req,
        response: &mut dyn ResponseWriter,
    ) -> std::result::Result<(), TestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure {
            return Err(TestError(message));
        }
        if !self.status_after_body {
            response.set_status(self.status);
        }
        for chunk in &self.chunks {
            response.write(chunk);
        }
        if self.status_after_body {
            response.set_status(self.status);
        }
        Ok(())
    }
}

/// Wraps a store and counts operations.
pub struct CountingStore {
    inner: InMemoryKeyValueStore,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryKeyValueStore::new(STORE_NAME),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn total_operations(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
            + self.puts.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
}

/// Store whose every operation fails.
pub struct UnavailableStore;

#[async_trait]
impl KeyValueStore for UnavailableStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(AppError::Internal(anyhow::anyhow!("store unavailable")))
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(AppError::Internal(anyhow::anyhow!("store unavailable")))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(AppError::Internal(anyhow::anyhow!("store unavailable")))
    }
}

/// Store that holds the first `gated` reads at a barrier until all of them have arrived, so
/// concurrent first requests observe the same state.
pub struct GatedReadStore {
    inner: InMemoryKeyValueStore,
    barrier: Barrier,
    gated: usize,
    reads: AtomicUsize,
}

impl GatedReadStore {
    pub fn new(gated: usize) -> Self {
        Self {
            inner: InMemoryKeyValueStore::new(STORE_NAME),
            barrier: Barrier::new(gated),
            gated,
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl KeyValueStore for GatedReadStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.inner.get(key).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.gated {
            self.barrier.wait().await;
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}
