use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::{AppError, Result};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Prometheus metrics emitted by the gateway.
///
/// The macros are no-ops until a recorder is installed, so library users that never call
/// [`init_metrics`] pay nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// `outcome` is one of `pass_through`, `executed`, `replayed`, `conflict`, `failed`.
    pub fn record_idempotency_outcome(&self, outcome: &'static str) {
        counter!("idempotency_requests_total", "outcome" => outcome).increment(1);
    }

    pub fn record_entry_cleared(&self, reason: &'static str) {
        counter!("idempotency_entries_cleared_total", "reason" => reason).increment(1);
    }

    pub fn record_capture_overflow(&self) {
        counter!("idempotency_capture_overflow_total").increment(1);
    }

    pub fn record_store_operation(&self, operation: &'static str, duration_ms: f64, success: bool) {
        counter!("idempotency_store_operations_total", "operation" => operation, "success" => success.to_string()).increment(1);
        histogram!("idempotency_store_operation_duration_ms", "operation" => operation).record(duration_ms);
    }

    pub fn record_http_request(&self, method: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Requests seen by the idempotency coordinator, by outcome");
    describe_counter!("idempotency_entries_cleared_total", Unit::Count, "Idempotency entries removed after a failed or non-cacheable execution");
    describe_counter!("idempotency_capture_overflow_total", Unit::Count, "Responses too large to retain for replay");

    describe_counter!("idempotency_store_operations_total", Unit::Count, "Key-value store operations");
    describe_histogram!("idempotency_store_operation_duration_ms", Unit::Milliseconds, "Key-value store operation latency in milliseconds");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        let timer = LatencyTimer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 10.0);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = get_metrics();
        metrics.record_idempotency_outcome("replayed");
        metrics.record_store_operation("get", 1.5, true);
        metrics.record_capture_overflow();
    }
}
