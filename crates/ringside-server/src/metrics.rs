//! Prometheus metrics.
//!
//! Counters for the gate, the publisher and the consumer are emitted where
//! they happen (see [`names`]); this module installs the recorder, records
//! HTTP request metrics and refreshes the gauges derived from cache and
//! consumer statistics before each scrape.

use std::sync::OnceLock;
use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use ringside_auth::CacheStats;
use ringside_events::ConsumerStatsSnapshot;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Auth gate (emitted by ringside-auth)
    pub const GATE_REQUESTS_TOTAL: &str = "gate_requests_total";

    // Session events (emitted by ringside-events)
    pub const SESSION_EVENTS_PUBLISHED_TOTAL: &str = "session_events_published_total";
    pub const SESSION_EVENTS_PUBLISH_FAILURES_TOTAL: &str = "session_events_publish_failures_total";
    pub const SESSION_EVENTS_DROPPED_TOTAL: &str = "session_events_dropped_total";
    pub const SESSION_EVENTS_CONSUMED_TOTAL: &str = "session_events_consumed_total";
    pub const SESSION_EVENTS_CONSUMER_RECONNECTS_TOTAL: &str =
        "session_events_consumer_reconnects_total";

    // Consumer gauges (refreshed on scrape)
    pub const CONSUMER_APPLIED: &str = "session_events_consumer_applied";
    pub const CONSUMER_IGNORED: &str = "session_events_consumer_ignored";
    pub const CONSUMER_MALFORMED: &str = "session_events_consumer_malformed";
    pub const CONSUMER_RECONNECTS: &str = "session_events_consumer_reconnects";

    // Token cache gauges
    pub const TOKEN_CACHE_ENTRIES: &str = "token_cache_entries";
    pub const TOKEN_CACHE_HITS: &str = "token_cache_hits";
    pub const TOKEN_CACHE_MISSES: &str = "token_cache_misses";
    pub const TOKEN_CACHE_EVICTIONS: &str = "token_cache_evictions";
    pub const TOKEN_CACHE_HIT_RATE: &str = "token_cache_hit_rate";

    // Issuer
    pub const LOGINS_TOTAL: &str = "issuer_logins_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics is served by the app itself.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Middleware recording request count and latency per route template.
///
/// Unmatched paths are grouped under `unmatched` to keep cardinality bounded.
pub async fn http_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = std::time::Instant::now();

    let response = next.run(req).await;

    record_http_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

/// Publish token cache statistics as gauges.
pub fn record_cache_stats(stats: &CacheStats) {
    gauge!(names::TOKEN_CACHE_ENTRIES).set(stats.size as f64);
    gauge!(names::TOKEN_CACHE_HITS).set(stats.hits as f64);
    gauge!(names::TOKEN_CACHE_MISSES).set(stats.misses as f64);
    gauge!(names::TOKEN_CACHE_EVICTIONS).set(stats.evictions as f64);
    gauge!(names::TOKEN_CACHE_HIT_RATE).set(stats.hit_rate());
}

/// Publish consumer statistics as gauges.
pub fn record_consumer_stats(stats: &ConsumerStatsSnapshot) {
    gauge!(names::CONSUMER_APPLIED).set(stats.applied as f64);
    gauge!(names::CONSUMER_IGNORED).set(stats.ignored as f64);
    gauge!(names::CONSUMER_MALFORMED).set(stats.malformed as f64);
    gauge!(names::CONSUMER_RECONNECTS).set(stats.reconnects as f64);
}
