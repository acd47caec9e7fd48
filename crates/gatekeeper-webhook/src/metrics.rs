//! Prometheus metrics exposition.
//!
//! Metrics live in a private registry created on first use. Recording is a
//! no-op if registration ever failed, so admission never depends on metrics.

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::error::Result;

/// Admission decision label for requests rejected before evaluation.
pub const DECISION_INVALID: &str = "invalid";

/// Registry lookup outcome label for a successful lookup.
pub const OUTCOME_OK: &str = "ok";

static METRICS: Lazy<Option<GatekeeperMetrics>> = Lazy::new(|| match GatekeeperMetrics::new() {
    Ok(metrics) => Some(metrics),
    Err(error) => {
        warn!(error = %error, "Metrics registration failed; metrics disabled");
        None
    }
});

/// Metrics for the admission webhook.
pub struct GatekeeperMetrics {
    registry: Registry,

    /// Admission requests by decision (`allowed`, `denied`, `skipped`, `invalid`).
    pub admission_requests_total: CounterVec,

    /// Registry size lookups by outcome.
    pub registry_lookups_total: CounterVec,

    /// Registry size lookup latency.
    pub registry_lookup_duration_seconds: Histogram,

    /// Configuration reloads by result (`success`, `failure`).
    pub config_reloads_total: CounterVec,
}

impl GatekeeperMetrics {
    /// Creates and registers the metric set in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let admission_requests_total = CounterVec::new(
            Opts::new(
                "imagesize_admission_requests_total",
                "Admission requests handled, by decision",
            ),
            &["decision"],
        )?;

        let registry_lookups_total = CounterVec::new(
            Opts::new(
                "imagesize_registry_lookups_total",
                "Image size lookups against registries, by outcome",
            ),
            &["outcome"],
        )?;

        let registry_lookup_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "imagesize_registry_lookup_duration_seconds",
                "Duration of image size lookups in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        let config_reloads_total = CounterVec::new(
            Opts::new(
                "imagesize_config_reloads_total",
                "Configuration reload attempts, by result",
            ),
            &["result"],
        )?;

        registry.register(Box::new(admission_requests_total.clone()))?;
        registry.register(Box::new(registry_lookups_total.clone()))?;
        registry.register(Box::new(registry_lookup_duration_seconds.clone()))?;
        registry.register(Box::new(config_reloads_total.clone()))?;

        Ok(Self {
            registry,
            admission_requests_total,
            registry_lookups_total,
            registry_lookup_duration_seconds,
            config_reloads_total,
        })
    }

    /// Encodes every metric in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::WebhookError::Metrics {
            reason: e.to_string(),
        })
    }
}

/// Counts one admission request.
pub fn record_admission(decision: &str) {
    if let Some(metrics) = METRICS.as_ref() {
        metrics
            .admission_requests_total
            .with_label_values(&[decision])
            .inc();
    }
}

/// Counts one registry lookup and observes its latency.
pub fn record_lookup(outcome: &str, elapsed: Duration) {
    if let Some(metrics) = METRICS.as_ref() {
        metrics.registry_lookups_total.with_label_values(&[outcome]).inc();
        metrics
            .registry_lookup_duration_seconds
            .observe(elapsed.as_secs_f64());
    }
}

/// Counts one configuration reload attempt.
pub fn record_reload(success: bool) {
    if let Some(metrics) = METRICS.as_ref() {
        let result = if success { "success" } else { "failure" };
        metrics.config_reloads_total.with_label_values(&[result]).inc();
    }
}

/// Renders the global metrics for the `/metrics` endpoint.
pub fn render() -> Result<String> {
    METRICS.as_ref().map_or_else(|| Ok(String::new()), GatekeeperMetrics::encode)
}
