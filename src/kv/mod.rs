//! Named key-value stores with per-entry expiry.
//!
//! The idempotency coordinator only needs get / put-with-ttl / delete on single keys, so that is
//! all this capability exposes. No multi-key transactions, no compare-and-set.

pub mod memory;
pub mod redis_store;
pub mod service;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::InMemoryKeyValueStore;
pub use redis_store::RedisKeyValueStore;
pub use service::KeyValueService;

/// Per-key storage with expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name the store is registered under.
    fn name(&self) -> &str;

    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value and its expiry.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Checks that the backing store is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
