use crate::error::{AppError, Result};
use crate::kv::KeyValueStore;
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis-backed store shared by every instance pointing at the same server.
///
/// Keys are namespaced with the store name so several logical stores can share one database.
pub struct RedisKeyValueStore {
    client: redis::Client,
    name: String,
}

impl RedisKeyValueStore {
    pub fn new(client: redis::Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// Opens a client for `url` without connecting yet.
    pub fn open(url: &str, name: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(AppError::Redis)?;
        Ok(Self::new(client, name))
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }
}

/// SETEX rejects a zero expiry.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: std::result::Result<Option<Vec<u8>>, _> = conn.get(self.make_key(key)).await;
        get_metrics().record_store_operation("get", timer.elapsed_ms(), result.is_ok());
        result.map_err(AppError::Redis)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: std::result::Result<(), _> = conn
            .set_ex(self.make_key(key), value, ttl_seconds(ttl))
            .await;
        get_metrics().record_store_operation("put", timer.elapsed_ms(), result.is_ok());
        result.map_err(AppError::Redis)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: std::result::Result<i64, _> = conn.del(self.make_key(key)).await;
        get_metrics().record_store_operation("delete", timer.elapsed_ms(), result.is_ok());
        result.map(|_| ()).map_err(AppError::Redis)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }
}
