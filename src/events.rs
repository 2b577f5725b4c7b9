use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Structured record of what happened while serving one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    RequestReceived {
        request_id: String,
        headers: HashMap<String, String>,
        body: String,
    },
    ModelFallback {
        request_id: String,
        requested: String,
        fallback: String,
    },
    UpstreamResponse {
        request_id: String,
        model: String,
        status: u16,
        latency_ms: u128,
        body: String,
    },
    RequestFailed {
        request_id: String,
        status: u16,
        error_type: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    RequestCompleted {
        request_id: String,
        model: String,
        status: u16,
        latency_ms: u128,
    },
}

impl GatewayEvent {
    pub fn request_id(&self) -> &str {
        match self {
            GatewayEvent::RequestReceived { request_id, .. }
            | GatewayEvent::ModelFallback { request_id, .. }
            | GatewayEvent::UpstreamResponse { request_id, .. }
            | GatewayEvent::RequestFailed { request_id, .. }
            | GatewayEvent::RequestCompleted { request_id, .. } => request_id,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GatewayEvent);
}

/// Writes events through `tracing`. Bodies are only logged when `dump_bodies`.
pub struct TracingSink {
    dump_bodies: bool,
}

impl TracingSink {
    pub fn new(dump_bodies: bool) -> Self {
        Self { dump_bodies }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::RequestReceived { request_id, body, .. } => {
                if self.dump_bodies {
                    info!(request_id = %request_id, "embedding request: {}", body);
                }
            }
            GatewayEvent::ModelFallback {
                request_id,
                requested,
                fallback,
            } => {
                info!(
                    request_id = %request_id,
                    requested = %requested,
                    fallback = %fallback,
                    "unsupported embedding model, falling back to default"
                );
            }
            GatewayEvent::UpstreamResponse {
                request_id,
                model,
                status,
                latency_ms,
                body,
            } => {
                if self.dump_bodies {
                    info!(
                        request_id = %request_id,
                        model = %model,
                        status = *status,
                        latency_ms = *latency_ms,
                        "upstream response: {}",
                        body
                    );
                } else if *status != 200 {
                    warn!(
                        request_id = %request_id,
                        model = %model,
                        status = *status,
                        latency_ms = *latency_ms,
                        "non-200 response from upstream"
                    );
                }
            }
            GatewayEvent::RequestFailed {
                request_id,
                status,
                error_type,
                message,
                detail,
            } => {
                let detail = detail.as_deref().unwrap_or("");
                if *status >= 500 {
                    warn!(
                        request_id = %request_id,
                        status = *status,
                        error_type = %error_type,
                        detail = %detail,
                        "request failed: {}",
                        message
                    );
                } else {
                    info!(
                        request_id = %request_id,
                        status = *status,
                        error_type = %error_type,
                        "request failed: {}",
                        message
                    );
                }
            }
            GatewayEvent::RequestCompleted {
                request_id,
                model,
                status,
                latency_ms,
            } => {
                info!(
                    request_id = %request_id,
                    model = %model,
                    latency_ms = *latency_ms,
                    status = *status,
                    "request completed"
                );
            }
        }
    }
}

pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &GatewayEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
