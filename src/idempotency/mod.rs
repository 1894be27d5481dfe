pub mod capture;
pub mod handler;
pub mod middleware;
pub mod storage;

pub use capture::{BufferedResponse, ResponseCapture, ResponseWriter};
pub use handler::{
    conflict_message, Disposition, Downstream, IdempotencyMetrics, IdempotentRequest,
    InterceptError, MetricsSnapshot, RequestInterceptor,
};
pub use middleware::{idempotency_middleware, with_idempotency, NextDownstream};
pub use storage::{EntryState, IdempotencyStore, CONTENT_PREFIX, IN_PROGRESS_MARKER, STATUS_PREFIX};
