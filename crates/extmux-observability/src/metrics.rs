//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for ExtMux:
//! - Inbound messages by payload kind and status code
//! - Forwarding latency and outcome per action or event
//! - Directory cache hits, misses and refreshes
//! - Provisioning and deprovisioning outcomes

use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for ExtMux
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    /// Inbound messages, labelled by payload kind and HTTP status
    pub messages_total: CounterVec,

    /// Forwarded calls, labelled by target and outcome
    pub forwards_total: CounterVec,
    /// Forwarding round-trip duration
    pub forward_duration_seconds: HistogramVec,

    /// Directory lookups, labelled by result (hit, miss, not_found)
    pub directory_lookups_total: CounterVec,
    /// Full directory cache reloads
    pub directory_refreshes_total: CounterVec,
    /// Entries currently cached
    pub directory_cached_entries: IntGauge,

    /// Provision and deprovision attempts, labelled by operation and outcome
    pub provisioning_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_total = CounterVec::new(
            Opts::new("extmux_messages_total", "Inbound messages by kind and status"),
            &["kind", "status"],
        )?;

        let forwards_total = CounterVec::new(
            Opts::new(
                "extmux_forwards_total",
                "Messages forwarded to tenant instances",
            ),
            &["target", "outcome"],
        )?;

        let forward_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "extmux_forward_duration_seconds",
                "Forwarding round-trip duration in seconds",
            )
            .buckets(vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0,
            ]),
            &["target"],
        )?;

        let directory_lookups_total = CounterVec::new(
            Opts::new(
                "extmux_directory_lookups_total",
                "Service directory lookups by result",
            ),
            &["result"],
        )?;

        let directory_refreshes_total = CounterVec::new(
            Opts::new(
                "extmux_directory_refreshes_total",
                "Service directory cache invalidations",
            ),
            &["reason"],
        )?;

        let directory_cached_entries = IntGauge::new(
            "extmux_directory_cached_entries",
            "Entries currently held in the directory cache",
        )?;

        let provisioning_total = CounterVec::new(
            Opts::new(
                "extmux_provisioning_total",
                "Instance provisioning operations by outcome",
            ),
            &["operation", "outcome"],
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(forwards_total.clone()))?;
        registry.register(Box::new(forward_duration_seconds.clone()))?;
        registry.register(Box::new(directory_lookups_total.clone()))?;
        registry.register(Box::new(directory_refreshes_total.clone()))?;
        registry.register(Box::new(directory_cached_entries.clone()))?;
        registry.register(Box::new(provisioning_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            messages_total,
            forwards_total,
            forward_duration_seconds,
            directory_lookups_total,
            directory_refreshes_total,
            directory_cached_entries,
            provisioning_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_message(&self, kind: &str, status: u16) {
        let status = status.to_string();
        self.messages_total
            .with_label_values(&[kind, status.as_str()])
            .inc();
    }

    pub fn record_forward(&self, target: &str, outcome: &str, duration_secs: f64) {
        self.forwards_total
            .with_label_values(&[target, outcome])
            .inc();
        self.forward_duration_seconds
            .with_label_values(&[target])
            .observe(duration_secs);
    }

    pub fn record_lookup(&self, result: &str) {
        self.directory_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a cache reload along with the number of entries now cached.
    pub fn record_refresh(&self, reason: &str, cached: usize) {
        self.directory_refreshes_total
            .with_label_values(&[reason])
            .inc();
        self.directory_cached_entries.set(cached as i64);
    }

    pub fn record_cached(&self, cached: usize) {
        self.directory_cached_entries.set(cached as i64);
    }

    pub fn record_provisioning(&self, operation: &str, outcome: &str) {
        self.provisioning_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}
