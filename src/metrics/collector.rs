//! Metrics Collector

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use tracing::{debug, error};

/// Delivery failure reasons tracked as separate label values
pub const FAILURE_REASONS: [&str; 3] = ["closed", "timeout", "transport"];

/// Point-in-time copy of the relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounters {
    pub connections_total: u64,
    pub handshake_failures: u64,
    pub messages_received: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}

/// Collects and exports relay metrics
pub struct Metrics {
    prometheus_registry: Registry,

    // Prometheus metrics
    connections_total: IntCounter,
    active_connections: IntGauge,
    handshake_failures_total: IntCounter,
    messages_received_total: IntCounter,
    messages_ignored_total: IntCounter,
    deliveries_total: IntCounter,
    delivery_failures_total: IntCounterVec,
    fanout_recipients: Histogram,
    connection_duration: Histogram,

    // Internal counters
    total_connections: AtomicU64,
    handshake_failures: AtomicU64,
    messages_received: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let connections_total = IntCounter::new(
            "sigrelay_connections_total",
            "Total number of clients that completed the handshake"
        ).expect("Failed to create connections_total counter");

        let active_connections = IntGauge::new(
            "sigrelay_active_connections",
            "Number of currently registered clients"
        ).expect("Failed to create active_connections gauge");

        let handshake_failures_total = IntCounter::new(
            "sigrelay_handshake_failures_total",
            "Connections that failed before registration"
        ).expect("Failed to create handshake_failures_total counter");

        let messages_received_total = IntCounter::new(
            "sigrelay_messages_received_total",
            "Text payloads received from clients"
        ).expect("Failed to create messages_received_total counter");

        let messages_ignored_total = IntCounter::new(
            "sigrelay_messages_ignored_total",
            "Inbound frames that are not relayed (binary, ping, pong)"
        ).expect("Failed to create messages_ignored_total counter");

        let deliveries_total = IntCounter::new(
            "sigrelay_deliveries_total",
            "Successful payload deliveries to recipients"
        ).expect("Failed to create deliveries_total counter");

        let delivery_failures_total = IntCounterVec::new(
            Opts::new(
                "sigrelay_delivery_failures_total",
                "Failed payload deliveries, by failure reason"
            ),
            &["reason"]
        ).expect("Failed to create delivery_failures_total counter");

        let fanout_recipients = Histogram::with_opts(
            HistogramOpts::new(
                "sigrelay_fanout_recipients",
                "Number of recipients in each broadcast pass"
            ).buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0])
        ).expect("Failed to create fanout_recipients histogram");

        let connection_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sigrelay_connection_duration_seconds",
                "Lifetime of client connections in seconds"
            ).buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0])
        ).expect("Failed to create connection_duration histogram");

        // Register metrics
        prometheus_registry.register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        prometheus_registry.register(Box::new(active_connections.clone()))
            .expect("Failed to register active_connections");
        prometheus_registry.register(Box::new(handshake_failures_total.clone()))
            .expect("Failed to register handshake_failures_total");
        prometheus_registry.register(Box::new(messages_received_total.clone()))
            .expect("Failed to register messages_received_total");
        prometheus_registry.register(Box::new(messages_ignored_total.clone()))
            .expect("Failed to register messages_ignored_total");
        prometheus_registry.register(Box::new(deliveries_total.clone()))
            .expect("Failed to register deliveries_total");
        prometheus_registry.register(Box::new(delivery_failures_total.clone()))
            .expect("Failed to register delivery_failures_total");
        prometheus_registry.register(Box::new(fanout_recipients.clone()))
            .expect("Failed to register fanout_recipients");
        prometheus_registry.register(Box::new(connection_duration.clone()))
            .expect("Failed to register connection_duration");

        // Pre-create every reason so all series are exported from the start
        for reason in FAILURE_REASONS {
            delivery_failures_total.with_label_values(&[reason]);
        }

        Self {
            prometheus_registry,
            connections_total,
            active_connections,
            handshake_failures_total,
            messages_received_total,
            messages_ignored_total,
            deliveries_total,
            delivery_failures_total,
            fanout_recipients,
            connection_duration,
            total_connections: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// A client completed the handshake and was registered
    pub fn connection_opened(&self) {
        self.connections_total.inc();
        self.active_connections.inc();
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// A registered client went away
    pub fn connection_closed(&self, lifetime: Duration) {
        self.active_connections.dec();
        self.connection_duration.observe(lifetime.as_secs_f64());
    }

    /// A connection failed before it was registered
    pub fn record_handshake_failure(&self, reason: &str) {
        self.handshake_failures_total.inc();
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        debug!(reason = %reason, "Recorded handshake failure");
    }

    pub fn record_message_received(&self) {
        self.messages_received_total.inc();
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_ignored(&self) {
        self.messages_ignored_total.inc();
    }

    /// Record the outcome of one broadcast pass
    pub fn record_fanout(&self, recipients: usize, delivered: usize) {
        self.fanout_recipients.observe(recipients as f64);
        self.deliveries_total.inc_by(delivered as u64);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
    }

    /// Record one failed delivery; `reason` is one of [`FAILURE_REASONS`]
    pub fn record_delivery_failure(&self, reason: &str) {
        self.delivery_failures_total.with_label_values(&[reason]).inc();
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Failed deliveries recorded for a single reason
    pub fn delivery_failures_for(&self, reason: &str) -> u64 {
        self.delivery_failures_total.with_label_values(&[reason]).get()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }

    pub fn get_active_connections(&self) -> i64 {
        self.active_connections.get()
    }

    pub fn counters(&self) -> RelayCounters {
        RelayCounters {
            connections_total: self.total_connections.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
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
    fn test_connection_lifecycle_updates_gauge() {
        let metrics = Metrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed(Duration::from_secs(3));

        assert_eq!(metrics.get_active_connections(), 1);
        assert_eq!(metrics.counters().connections_total, 2);
    }

    #[test]
    fn test_delivery_failures_are_split_by_reason() {
        let metrics = Metrics::new();

        metrics.record_delivery_failure("timeout");
        metrics.record_delivery_failure("transport");
        metrics.record_delivery_failure("transport");

        assert_eq!(metrics.delivery_failures_for("closed"), 0);
        assert_eq!(metrics.delivery_failures_for("timeout"), 1);
        assert_eq!(metrics.delivery_failures_for("transport"), 2);
        assert_eq!(metrics.counters().delivery_failures, 3);
    }

    #[test]
    fn test_prometheus_export_contains_relay_series() {
        let metrics = Metrics::new();
        metrics.record_message_received();
        metrics.record_fanout(2, 2);

        let output = metrics.export_prometheus();
        assert!(output.contains("sigrelay_messages_received_total 1"));
        assert!(output.contains("sigrelay_deliveries_total 2"));
        assert!(output.contains("sigrelay_delivery_failures_total{reason=\"timeout\"} 0"));
    }
}
