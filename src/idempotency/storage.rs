use crate::error::{AppError, Result};
use crate::kv::KeyValueStore;
use crate::observability::mask_key;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Stored in the content sub-record while the first request for a key is executing.
pub const IN_PROGRESS_MARKER: &[u8] = b"IDEMPOTENCY_INPROGRESS_MARKER";

pub const STATUS_PREFIX: &str = "status:";

pub const CONTENT_PREFIX: &str = "content:";

pub fn status_key(key: &str) -> String {
    format!("{}{}", STATUS_PREFIX, key)
}

pub fn content_key(key: &str) -> String {
    format!("{}{}", CONTENT_PREFIX, key)
}

/// Decoded state of one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    InProgress,
    Completed { status: StatusCode, body: Vec<u8> },
}

impl EntryState {
    pub fn label(&self) -> &'static str {
        match self {
            EntryState::Absent => "absent",
            EntryState::InProgress => "in_progress",
            EntryState::Completed { .. } => "completed",
        }
    }
}

/// Idempotency entries on top of a key-value store.
///
/// Each key is two sub-records sharing one TTL: `content:<key>` holds either the in-progress
/// marker or the captured body, `status:<key>` holds the captured status as decimal text.
/// Writes are ordered so a concurrent reader never sees the marker next to a status or a body
/// without one.
#[derive(Clone)]
pub struct IdempotencyStore {
    kv: Arc<dyn KeyValueStore>,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn name(&self) -> &str {
        self.kv.name()
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub async fn read(&self, key: &str) -> Result<EntryState> {
        let Some(content) = self.kv.get(&content_key(key)).await? else {
            return Ok(EntryState::Absent);
        };

        if content == IN_PROGRESS_MARKER {
            return Ok(EntryState::InProgress);
        }

        let raw_status = self.kv.get(&status_key(key)).await?.ok_or_else(|| {
            AppError::Consistency(format!(
                "completed entry for key '{}' has no status",
                mask_key(key)
            ))
        })?;

        let status = decode_status(&raw_status).ok_or_else(|| {
            AppError::Consistency(format!(
                "completed entry for key '{}' has unparsable status {:?}",
                mask_key(key),
                String::from_utf8_lossy(&raw_status)
            ))
        })?;

        Ok(EntryState::Completed {
            status,
            body: content,
        })
    }

    pub async fn write_in_progress(&self, key: &str, ttl: Duration) -> Result<()> {
        self.kv
            .put(&content_key(key), IN_PROGRESS_MARKER.to_vec(), ttl)
            .await
    }

    /// Status goes first: until the content is replaced, readers still see the marker.
    pub async fn write_completed(
        &self,
        key: &str,
        status: StatusCode,
        content: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        self.kv
            .put(&status_key(key), status.as_u16().to_string().into_bytes(), ttl)
            .await?;
        self.kv.put(&content_key(key), content.to_vec(), ttl).await
    }

    /// Content goes first: once it is gone the key reads as absent whatever happens next.
    pub async fn clear(&self, key: &str) -> Result<()> {
        self.kv.delete(&content_key(key)).await?;
        self.kv.delete(&status_key(key)).await
    }
}

fn decode_status(raw: &[u8]) -> Option<StatusCode> {
    let text = std::str::from_utf8(raw).ok()?;
    let code = text.trim().parse::<u16>().ok()?;
    StatusCode::from_u16(code).ok()
}
