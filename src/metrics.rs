use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider, ObservableGauge};
use opentelemetry_otlp::{MetricExporter, Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::metrics::periodic_reader_with_async_runtime::PeriodicReader;
use opentelemetry_sdk::runtime;
use std::sync::{Arc, atomic::AtomicU64};

use crate::events::{EventSink, GatewayEvent};
use crate::telemetry::ExportTarget;

const METER_NAME: &str = "embeddings-gateway";

#[derive(Clone)]
pub struct Metrics {
    pub requests: Counter<u64>,
    pub errors: Counter<u64>,
    pub model_fallbacks: Counter<u64>,
    pub latency_ms: Histogram<f64>,
    pub upstream_latency_ms: Histogram<f64>,
    _inflight: ObservableGauge<i64>,
}

/// Metrics are fed from the same event stream as the logs.
impl EventSink for Metrics {
    fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::ModelFallback { .. } => self.model_fallbacks.add(1, &[]),
            GatewayEvent::UpstreamResponse {
                status, latency_ms, ..
            } => self.upstream_latency_ms.record(
                *latency_ms as f64,
                &[KeyValue::new("status", i64::from(*status))],
            ),
            GatewayEvent::RequestFailed {
                status, error_type, ..
            } => self.errors.add(
                1,
                &[
                    KeyValue::new("type", error_type.clone()),
                    KeyValue::new("status", i64::from(*status)),
                ],
            ),
            GatewayEvent::RequestCompleted { latency_ms, .. } => {
                self.latency_ms.record(*latency_ms as f64, &[])
            }
            GatewayEvent::RequestReceived { .. } => {}
        }
    }
}

pub fn init_metrics(
    service_name: String,
    target: &ExportTarget,
    inflight_count: Arc<AtomicU64>,
) -> Result<Metrics, String> {
    let exporter = match target.clone() {
        ExportTarget::LangfuseHttp {
            endpoint,
            timeout,
            headers,
        } => MetricExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_protocol(Protocol::HttpBinary)
            .with_timeout(timeout)
            .with_headers(headers)
            .build(),
        ExportTarget::Grpc { endpoint, timeout } => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_protocol(Protocol::Grpc)
            .with_timeout(timeout)
            .build(),
    }
    .map_err(|e| format!("metrics exporter init error: {}", e))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .build();

    let meter = provider.meter(METER_NAME);
    opentelemetry::global::set_meter_provider(provider);
    Ok(build_instruments(&meter, inflight_count))
}

pub fn init_metrics_noop(inflight_count: Arc<AtomicU64>) -> Metrics {
    let meter = opentelemetry::global::meter(METER_NAME);
    build_instruments(&meter, inflight_count)
}

fn build_instruments(meter: &Meter, inflight_count: Arc<AtomicU64>) -> Metrics {
    let requests = meter
        .u64_counter("embeddings.gateway.requests")
        .with_description("Embedding requests accepted for forwarding")
        .build();
    let errors = meter
        .u64_counter("embeddings.gateway.errors")
        .with_description("Requests answered with an error envelope")
        .build();
    let model_fallbacks = meter
        .u64_counter("embeddings.gateway.model_fallbacks")
        .with_description("Requests whose model was replaced by the default")
        .build();
    let latency_ms = meter
        .f64_histogram("embeddings.gateway.latency_ms")
        .with_unit("ms")
        .with_description("End-to-end request latency in ms")
        .build();
    let upstream_latency_ms = meter
        .f64_histogram("embeddings.gateway.upstream_latency_ms")
        .with_unit("ms")
        .with_description("Upstream call latency in ms")
        .build();
    let inflight = meter
        .i64_observable_gauge("embeddings.gateway.inflight")
        .with_description("In-flight requests")
        .with_callback(move |observer| {
            let value = inflight_count.load(std::sync::atomic::Ordering::Relaxed) as i64;
            observer.observe(value, &[]);
        })
        .build();

    Metrics {
        requests,
        errors,
        model_fallbacks,
        latency_ms,
        upstream_latency_ms,
        _inflight: inflight,
    }
}
