//! Prometheus-compatible metrics

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::cache::CacheStats;

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    /// Total requests processed
    request_count: RwLock<u64>,
    /// Requests by endpoint
    requests_by_endpoint: RwLock<HashMap<String, u64>>,
    /// Total bytes piped to clients
    bytes_served: RwLock<u64>,
    /// Admitted deliveries
    deliveries_started: RwLock<u64>,
    /// Active streams
    active_streams: RwLock<u64>,
    /// Errors by kind
    errors_by_type: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: RwLock::new(0),
            requests_by_endpoint: RwLock::new(HashMap::new()),
            bytes_served: RwLock::new(0),
            deliveries_started: RwLock::new(0),
            active_streams: RwLock::new(0),
            errors_by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Record a request
    pub fn record_request(&self, endpoint: &str) {
        *self.request_count.write() += 1;
        *self
            .requests_by_endpoint
            .write()
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    /// Record bytes served
    pub fn record_bytes(&self, bytes: u64) {
        *self.bytes_served.write() += bytes;
    }

    pub fn record_delivery(&self) {
        *self.deliveries_started.write() += 1;
    }

    /// Update active stream count
    pub fn set_active_streams(&self, count: u64) {
        *self.active_streams.write() = count;
    }

    /// Record error
    pub fn record_error(&self, error_type: &str) {
        *self
            .errors_by_type
            .write()
            .entry(error_type.to_string())
            .or_insert(0) += 1;
    }

    /// Count of one error kind
    pub fn error_count(&self, error_type: &str) -> u64 {
        self.errors_by_type
            .read()
            .get(error_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn bytes_served(&self) -> u64 {
        *self.bytes_served.read()
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Zero every counter except uptime
    pub fn reset(&self) {
        *self.request_count.write() = 0;
        self.requests_by_endpoint.write().clear();
        *self.bytes_served.write() = 0;
        *self.deliveries_started.write() = 0;
        *self.active_streams.write() = 0;
        self.errors_by_type.write().clear();
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self, caches: &[CacheStats]) -> String {
        let mut output = String::new();

        // Server info
        output.push_str("# HELP media_relay_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE media_relay_uptime_seconds counter\n");
        let _ = writeln!(output, "media_relay_uptime_seconds {}", self.uptime_secs());

        output.push_str(
            "\n# HELP media_relay_start_time_seconds Server start time as Unix timestamp\n",
        );
        output.push_str("# TYPE media_relay_start_time_seconds gauge\n");
        let _ = writeln!(
            output,
            "media_relay_start_time_seconds {}",
            std::time::SystemTime::UNIX_EPOCH
                .elapsed()
                .unwrap_or(Duration::ZERO)
                .as_secs()
                .saturating_sub(self.uptime_secs())
        );

        // Request metrics
        output.push_str("\n# HELP media_relay_requests_total Total number of HTTP requests\n");
        output.push_str("# TYPE media_relay_requests_total counter\n");
        let _ = writeln!(output, "media_relay_requests_total {}", *self.request_count.read());

        output.push_str("\n# HELP media_relay_requests_by_endpoint Requests by endpoint\n");
        output.push_str("# TYPE media_relay_requests_by_endpoint counter\n");
        for (endpoint, count) in self.requests_by_endpoint.read().iter() {
            let _ = writeln!(
                output,
                "media_relay_requests_by_endpoint{{endpoint=\"{}\"}} {}",
                endpoint, count
            );
        }

        // Delivery metrics
        output.push_str("\n# HELP media_relay_bytes_served_total Total bytes piped to clients\n");
        output.push_str("# TYPE media_relay_bytes_served_total counter\n");
        let _ = writeln!(output, "media_relay_bytes_served_total {}", self.bytes_served());

        output.push_str("\n# HELP media_relay_deliveries_total Admitted stream deliveries\n");
        output.push_str("# TYPE media_relay_deliveries_total counter\n");
        let _ = writeln!(
            output,
            "media_relay_deliveries_total {}",
            *self.deliveries_started.read()
        );

        output.push_str("\n# HELP media_relay_active_streams Number of active streams\n");
        output.push_str("# TYPE media_relay_active_streams gauge\n");
        let _ = writeln!(output, "media_relay_active_streams {}", *self.active_streams.read());

        // Cache metrics
        output.push_str("\n# HELP media_relay_cache_hits_total Cache hits by cache\n");
        output.push_str("# TYPE media_relay_cache_hits_total counter\n");
        for stats in caches {
            let _ = writeln!(
                output,
                "media_relay_cache_hits_total{{cache=\"{}\"}} {}",
                stats.name, stats.hits
            );
        }

        output.push_str("\n# HELP media_relay_cache_misses_total Cache misses by cache\n");
        output.push_str("# TYPE media_relay_cache_misses_total counter\n");
        for stats in caches {
            let _ = writeln!(
                output,
                "media_relay_cache_misses_total{{cache=\"{}\"}} {}",
                stats.name, stats.misses
            );
        }

        output.push_str("\n# HELP media_relay_cache_entries Stored entries by cache\n");
        output.push_str("# TYPE media_relay_cache_entries gauge\n");
        for stats in caches {
            let _ = writeln!(
                output,
                "media_relay_cache_entries{{cache=\"{}\"}} {}",
                stats.name, stats.entry_count
            );
        }

        // Error metrics
        output.push_str("\n# HELP media_relay_errors_total Total errors by type\n");
        output.push_str("# TYPE media_relay_errors_total counter\n");
        for (error_type, count) in self.errors_by_type.read().iter() {
            let _ = writeln!(
                output,
                "media_relay_errors_total{{type=\"{}\"}} {}",
                error_type, count
            );
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.uptime_secs() < 2);
    }

    #[test]
    fn test_record_request() {
        let metrics = Metrics::new();
        metrics.record_request("/health");
        metrics.record_request("/health");

        assert_eq!(*metrics.request_count.read(), 2);
        assert_eq!(metrics.requests_by_endpoint.read().get("/health"), Some(&2));
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = Metrics::new();
        metrics.record_request("/status");
        metrics.record_bytes(2048);
        let caches = [CacheStats {
            name: "search",
            entry_count: 3,
            capacity: 100,
            ttl_secs: 300,
            hits: 7,
            misses: 2,
        }];

        let output = metrics.export_prometheus(&caches);

        assert!(output.contains("media_relay_requests_total 1"));
        assert!(output.contains("media_relay_bytes_served_total 2048"));
        assert!(output.contains("media_relay_cache_hits_total{cache=\"search\"} 7"));
        assert!(output.contains("media_relay_uptime_seconds"));
    }

    #[test]
    fn test_error_recording() {
        let metrics = Metrics::new();
        metrics.record_error("client_aborted");
        metrics.record_error("client_aborted");
        metrics.record_error("stream_timeout");

        assert_eq!(metrics.error_count("client_aborted"), 2);
        assert_eq!(metrics.error_count("stream_timeout"), 1);
        assert_eq!(metrics.error_count("format_not_found"), 0);

        metrics.reset();
        assert_eq!(metrics.error_count("client_aborted"), 0);
    }
}
