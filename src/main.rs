mod audit_log;
mod auth;
mod catalog;
mod config;
mod error;
mod events;
mod handlers;
mod metrics;
mod models;
mod relay;
mod state;
mod telemetry;
mod upstream;
mod validate;

use anyhow::Context;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::audit_log::AuditLogger;
use crate::config::{Config, LoggingConfig};
use crate::events::{EventSink, FanoutSink, TracingSink};
use crate::metrics::{init_metrics, init_metrics_noop};
use crate::state::AppState;
use crate::telemetry::{ExportTarget, init_tracer, init_tracer_noop, spawn_tracer_watchdog};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, atomic::AtomicU64};

fn parse_level(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("log file create dir error: {}", err);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("log file open error: {}", err);
            None
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let file_writer = logging.file.as_deref().and_then(open_log_file).map(Arc::new);
    let writer = match (logging.stdout, file_writer) {
        (true, Some(file)) => BoxMakeWriter::new(std::io::stdout.and(file)),
        (false, Some(file)) => BoxMakeWriter::new(file),
        (_, None) => BoxMakeWriter::new(std::io::stdout),
    };

    let level = parse_level(&logging.level);
    let fmt_layer = if logging.format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(level)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_filter(level)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer())
        .init();
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = run(config).await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let observability = &config.observability;
    let inflight_count = Arc::new(AtomicU64::new(0));

    let metrics_target = ExportTarget::for_metrics(observability);
    let metrics = init_metrics(
        observability.service_name.clone(),
        &metrics_target,
        inflight_count.clone(),
    )
    .unwrap_or_else(|err| {
        eprintln!("metrics init error (fallback to noop): {}", err);
        init_metrics_noop(inflight_count.clone())
    });

    let trace_target = ExportTarget::for_traces(observability);
    let tracer_provider = init_tracer(&trace_target, observability.service_name.clone())
        .unwrap_or_else(|err| {
            eprintln!("tracing init error (fallback to noop): {}", err);
            init_tracer_noop(observability.service_name.clone())
        });

    init_logging(&observability.logging);
    tracing::info!(
        tracing_exporter = %observability.exporters.tracing,
        tracing_endpoint = %trace_target.endpoint(),
        metrics_exporter = %observability.exporters.metrics,
        metrics_endpoint = %metrics_target.endpoint(),
        "telemetry exporters configured"
    );
    let _tracer_watchdog = spawn_tracer_watchdog(tracer_provider.clone());

    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    sinks.push(Arc::new(TracingSink::new(observability.dump_bodies)));
    sinks.push(Arc::new(metrics.clone()));
    if observability.audit_log.enabled {
        if let Some(path) = observability.audit_log.path.clone() {
            sinks.push(Arc::new(AuditLogger::new(
                path,
                observability.audit_log.max_file_bytes,
            )));
        }
    }
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(sinks));

    let state = AppState::new(&config, sink, metrics, inflight_count)
        .map_err(anyhow::Error::msg)
        .context("state init error")?;
    tracing::info!(
        upstream = %state.upstream.url(),
        models = state.catalog.len(),
        max_inflight = config.limits.max_inflight,
        max_queued = config.limits.max_queued,
        "gateway configured"
    );

    let app = handlers::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("bind error: {}", config.server.bind_addr))?;

    tracing::info!("listening on {}", config.server.bind_addr);
    axum::serve(listener, app).await.context("server error")?;
    drop(tracer_provider);
    Ok(())
}
