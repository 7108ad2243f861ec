// Telemetry module for structured logging, metrics, and tracing

use crate::config::ObservabilityConfig;
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

const SERVICE_NAME: &str = "promo-pipeline";

/// Install the global subscriber: JSON lines filtered by `RUST_LOG` or the
/// configured level, plus an OTLP span exporter when an endpoint is configured.
///
/// Fails if a subscriber is already installed in this process.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", config.log_level, e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let otel_layer = match config.tracing_endpoint.as_deref() {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(init_tracer(endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = %config.log_level,
        tracing_endpoint = config.tracing_endpoint.as_deref(),
        "Structured logging initialized"
    );

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    Ok(tracer_provider.tracer(SERVICE_NAME))
}

/// Flush buffered spans; call once on the way out
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter and describe the pipeline metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("promo_job_runs_total", "Total number of completed job runs");
    describe_counter!(
        "promo_job_failures_total",
        "Total number of job runs aborted by a configuration or storage error"
    );
    describe_counter!(
        "promo_items_sent_total",
        "Total number of items published to at least one channel"
    );
    describe_counter!(
        "promo_publish_failures_total",
        "Total number of failed channel publish attempts"
    );
    describe_counter!(
        "promo_cache_errors_total",
        "Total number of dedup cache errors that caused an item to be skipped"
    );
    describe_histogram!(
        "promo_job_duration_seconds",
        "Duration of job runs in seconds"
    );
    describe_gauge!("promo_jobs_due", "Number of jobs found due on the last tick");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_job_run(job_id: &Uuid, job_name: &str, items_sent: usize) {
    counter!("promo_job_runs_total", "job_id" => job_id.to_string(), "job_name" => job_name.to_string()).increment(1);
    if items_sent > 0 {
        counter!("promo_items_sent_total", "job_id" => job_id.to_string()).increment(items_sent as u64);
    }
}

/// Record a run that was aborted before dispatching anything
#[inline]
pub fn record_job_failure(job_id: &Uuid, job_name: &str, reason: &str) {
    counter!(
        "promo_job_failures_total",
        "job_id" => job_id.to_string(),
        "job_name" => job_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_job_duration(job_id: &Uuid, job_name: &str, duration_seconds: f64) {
    histogram!(
        "promo_job_duration_seconds",
        "job_id" => job_id.to_string(),
        "job_name" => job_name.to_string()
    )
    .record(duration_seconds);
}

#[inline]
pub fn record_publish_failure(channel_type: &str, reason: &str) {
    counter!(
        "promo_publish_failures_total",
        "channel_type" => channel_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// `stage` is where the cache was consulted: "finder" or "run"
#[inline]
pub fn record_cache_error(stage: &str) {
    counter!("promo_cache_errors_total", "stage" => stage.to_string()).increment(1);
}

#[inline]
pub fn update_jobs_due(count: usize) {
    gauge!("promo_jobs_due").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        // No recorder installed: these must be no-ops, not panics
        let job_id = Uuid::new_v4();
        record_job_run(&job_id, "test-job", 2);
        record_job_failure(&job_id, "test-job", "configuration");
        record_job_duration(&job_id, "test-job", 1.5);
        record_publish_failure("telegram", "timeout");
        record_cache_error("run");
        update_jobs_due(3);
    }
}
