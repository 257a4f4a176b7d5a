use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

pub struct Metrics {
    pub registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub license_activations_total: IntCounterVec,
    pub two_factor_verifications_total: IntCounterVec,
    pub security_alerts_total: IntCounterVec,
    pub rate_limit_rejections_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn counter(name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(Opts::new(name, help), labels)
}

fn build() -> Result<Metrics, prometheus::Error> {
    let registry = Registry::new();

    let http_requests_total = counter(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"],
    )?;
    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;
    let license_activations_total = counter(
        "license_activations_total",
        "License activation attempts by outcome",
        &["outcome"],
    )?;
    let two_factor_verifications_total = counter(
        "two_factor_verifications_total",
        "Second-factor checks by method and result",
        &["method", "result"],
    )?;
    let security_alerts_total = counter(
        "security_alerts_total",
        "Security alerts raised by event type",
        &["event_type"],
    )?;
    let rate_limit_rejections_total = counter(
        "rate_limit_rejections_total",
        "Requests rejected by the rate limiter",
        &["prefix"],
    )?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration_seconds.clone()))?;
    registry.register(Box::new(license_activations_total.clone()))?;
    registry.register(Box::new(two_factor_verifications_total.clone()))?;
    registry.register(Box::new(security_alerts_total.clone()))?;
    registry.register(Box::new(rate_limit_rejections_total.clone()))?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        license_activations_total,
        two_factor_verifications_total,
        security_alerts_total,
        rate_limit_rejections_total,
    })
}

/// Idempotent; later calls keep the first registry.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = build()?;
    let _ = METRICS.set(metrics);
    Ok(())
}

pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

pub fn record_activation(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.license_activations_total.with_label_values(&[outcome]).inc();
    }
}

pub fn record_two_factor(method: &str, success: bool) {
    if let Some(m) = METRICS.get() {
        let result = if success { "success" } else { "failure" };
        m.two_factor_verifications_total
            .with_label_values(&[method, result])
            .inc();
    }
}

pub fn record_alert(event_type: &str) {
    if let Some(m) = METRICS.get() {
        m.security_alerts_total.with_label_values(&[event_type]).inc();
    }
}

pub fn record_rate_limit_rejection(prefix: &str) {
    if let Some(m) = METRICS.get() {
        m.rate_limit_rejections_total.with_label_values(&[prefix]).inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match METRICS.get() {
        Some(m) => &m.registry,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
