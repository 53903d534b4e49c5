//! Tracing, trace-context propagation and Prometheus metrics for the registry.
//!
//! Every metric the registry emits is named in [`names`] and described once
//! when the recorder is installed, so `/metrics` carries HELP text for each
//! series. Spans go to an OTLP collector only when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set; otherwise tracing is log-only.
use crate::config::StorageBackend;
use anyhow::Context;
use metrics::Unit;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const INSTANCE_ID_ENV: &str = "MEMBRANE_SERVICE_INSTANCE_ID";

/// Metric names shared by the registry core and the sweeper.
pub mod names {
    pub const REGISTRATIONS: &str = "membrane_registry_registrations_total";
    pub const HEARTBEATS: &str = "membrane_registry_heartbeats_total";
    pub const SWEEPS: &str = "membrane_registry_sweeps_total";
    pub const MARKED_STALE: &str = "membrane_registry_membranes_marked_stale_total";
    pub const SWEEP_FAILURES: &str = "membrane_registry_sweep_failures_total";
    pub const ACTIVE_MEMBRANES: &str = "membrane_registry_active_membranes";
    pub const STALE_MEMBRANES: &str = "membrane_registry_stale_membranes";
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();
static PROPAGATOR_INIT: OnceLock<()> = OnceLock::new();

/// Install logging, optional span export and the metrics recorder.
///
/// Safe to call more than once; later calls return the first handle.
pub fn init_observability(
    service_name: &str,
    storage: StorageBackend,
) -> anyhow::Result<PrometheusHandle> {
    install_propagator();
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match build_tracer_provider(service_name, storage) {
            Ok(Some(provider)) => {
                let tracer = provider.tracer(service_name.to_string());
                global::set_tracer_provider(provider);
                let _ = subscriber
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
                tracing::info!(service = service_name, "exporting spans over otlp");
            }
            Ok(None) => {
                let _ = subscriber.try_init();
            }
            Err(err) => {
                let _ = subscriber.try_init();
                tracing::warn!(error = %format!("{err:#}"), "span export disabled");
            }
        }
    });
    install_metrics_recorder()
}

fn otlp_endpoint() -> Option<String> {
    std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn build_tracer_provider(
    service_name: &str,
    storage: StorageBackend,
) -> anyhow::Result<Option<SdkTracerProvider>> {
    if otlp_endpoint().is_none() {
        return Ok(None);
    }
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .context("build otlp span exporter")?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name, storage))
        .build();
    Ok(Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    ))
}

fn resource_attributes(service_name: &str, storage: StorageBackend) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("membrane.registry.storage", storage.as_str()),
    ];
    if let Ok(value) = std::env::var(INSTANCE_ID_ENV).or_else(|_| std::env::var("HOSTNAME")) {
        attrs.push(KeyValue::new("service.instance.id", value));
    }
    attrs
}

fn install_propagator() {
    PROPAGATOR_INIT.get_or_init(|| {
        global::set_text_map_propagator(TraceContextPropagator::new());
    });
}

/// Parent context from W3C `traceparent`/`tracestate` request headers.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|prop| prop.extract(&HeaderMapExtractor(headers)))
}

struct HeaderMapExtractor<'a>(&'a axum::http::HeaderMap);

impl Extractor for HeaderMapExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Serve `GET /metrics` on `listener` until `shutdown` resolves.
pub async fn serve_metrics<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")?;
    describe_metrics();
    let _ = METRICS_HANDLE.set(handle.clone());
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        names::REGISTRATIONS,
        Unit::Count,
        "Membranes accepted by the registry"
    );
    metrics::describe_counter!(
        names::HEARTBEATS,
        Unit::Count,
        "Heartbeat calls received, including unknown ids"
    );
    metrics::describe_counter!(names::SWEEPS, Unit::Count, "Stale sweep cycles started");
    metrics::describe_counter!(
        names::MARKED_STALE,
        Unit::Count,
        "Membranes moved from active to stale by the sweeper"
    );
    metrics::describe_counter!(
        names::SWEEP_FAILURES,
        Unit::Count,
        "Sweep cycles that failed against storage"
    );
    metrics::describe_gauge!(
        names::ACTIVE_MEMBRANES,
        Unit::Count,
        "Active membranes after the last sweep"
    );
    metrics::describe_gauge!(
        names::STALE_MEMBRANES,
        Unit::Count,
        "Stale membranes after the last sweep"
    );
}
