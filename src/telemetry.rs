use base64::Engine;
use opentelemetry::global;
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use crate::config::ObservabilityConfig;

/// Where OTLP data goes: a collector over gRPC, or Langfuse over HTTP with
/// basic auth.
#[derive(Clone, Debug, PartialEq)]
pub enum ExportTarget {
    Grpc {
        endpoint: String,
        timeout: Duration,
    },
    LangfuseHttp {
        endpoint: String,
        timeout: Duration,
        headers: HashMap<String, String>,
    },
}

impl ExportTarget {
    pub fn for_traces(config: &ObservabilityConfig) -> Self {
        Self::resolve(config, &config.exporters.tracing, config.otlp_http.traces_endpoint())
    }

    pub fn for_metrics(config: &ObservabilityConfig) -> Self {
        Self::resolve(config, &config.exporters.metrics, config.otlp_http.metrics_endpoint())
    }

    fn resolve(config: &ObservabilityConfig, kind: &str, http_endpoint: String) -> Self {
        match kind {
            "langfuse_http" => {
                let auth = base64::engine::general_purpose::STANDARD.encode(format!(
                    "{}:{}",
                    config.otlp_http.public_key, config.otlp_http.secret_key
                ));
                ExportTarget::LangfuseHttp {
                    endpoint: http_endpoint,
                    timeout: Duration::from_millis(config.otlp_http.timeout_ms),
                    headers: HashMap::from([(
                        String::from("Authorization"),
                        format!("Basic {}", auth),
                    )]),
                }
            }
            _ => ExportTarget::Grpc {
                endpoint: config.otlp_grpc.endpoint.clone(),
                timeout: Duration::from_millis(config.otlp_grpc.timeout_ms),
            },
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ExportTarget::Grpc { endpoint, .. } | ExportTarget::LangfuseHttp { endpoint, .. } => {
                endpoint
            }
        }
    }
}

pub fn init_tracer(target: &ExportTarget, service_name: String) -> Result<SdkTracerProvider, String> {
    let exporter = match target.clone() {
        ExportTarget::Grpc { endpoint, timeout } => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(timeout)
            .build(),
        ExportTarget::LangfuseHttp {
            endpoint,
            timeout,
            headers,
        } => SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_protocol(Protocol::HttpBinary)
            .with_timeout(timeout)
            .with_headers(headers)
            .build(),
    }
    .map_err(|e| format!("trace exporter init error: {}", e))?;

    let batch = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
    let provider = SdkTracerProvider::builder()
        .with_span_processor(batch)
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .build();

    hold_tracer_provider(provider.clone());
    Ok(provider)
}

pub fn init_tracer_noop(service_name: String) -> SdkTracerProvider {
    let provider = SdkTracerProvider::builder()
        .with_resource(Resource::builder().with_service_name(service_name).build())
        .build();
    hold_tracer_provider(provider.clone());
    provider
}

fn hold_tracer_provider(provider: SdkTracerProvider) {
    static GLOBAL_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();
    let _ = GLOBAL_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider);
}

pub fn spawn_tracer_watchdog(provider: SdkTracerProvider) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            std::thread::sleep(Duration::from_secs(30));
            if let Err(err) = provider.force_flush() {
                warn!("tracer provider force_flush failed: {}", err);
            }
        }
    })
}
