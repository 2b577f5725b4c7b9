use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use crate::catalog::ModelCatalog;
use crate::models::ModelDescriptor;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_embeddings_url")]
    pub embeddings_url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_upstream_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    /// Sent on every outbound call before the caller's `Authorization`.
    #[serde(default = "default_upstream_headers")]
    pub headers: BTreeMap<String, String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            embeddings_url: default_embeddings_url(),
            connect_timeout_ms: default_upstream_timeout_ms(),
            read_timeout_ms: default_upstream_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            headers: default_upstream_headers(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Reject unknown models instead of substituting `default_model`.
    #[serde(default)]
    pub strict_model: bool,
    #[serde(default)]
    pub catalog: Option<Vec<ModelDescriptor>>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            strict_model: false,
            catalog: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Requests allowed to wait for a slot once `max_inflight` is reached.
    /// Past that they are rejected with 429.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_inflight: default_max_inflight(),
            max_queued: default_max_queued(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub dump_bodies: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit_log: AuditLogConfig,
    #[serde(default)]
    pub otlp_grpc: OtlpGrpcConfig,
    #[serde(default)]
    pub otlp_http: OtlpHttpConfig,
    #[serde(default)]
    pub exporters: ExportersConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            dump_bodies: false,
            logging: LoggingConfig::default(),
            audit_log: AuditLogConfig::default(),
            otlp_grpc: OtlpGrpcConfig::default(),
            otlp_http: OtlpHttpConfig::default(),
            exporters: ExportersConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuditLogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_audit_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            max_file_bytes: default_audit_max_file_bytes(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtlpGrpcConfig {
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otlp_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OtlpGrpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_otlp_endpoint(),
            timeout_ms: default_otlp_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtlpHttpConfig {
    #[serde(default = "default_langfuse_http_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_langfuse_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OtlpHttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_langfuse_http_base_url(),
            public_key: String::new(),
            secret_key: String::new(),
            timeout_ms: default_langfuse_timeout_ms(),
        }
    }
}

impl OtlpHttpConfig {
    pub fn traces_endpoint(&self) -> String {
        format!("{}/v1/traces", self.base_url.trim_end_matches('/'))
    }

    pub fn metrics_endpoint(&self) -> String {
        format!("{}/v1/metrics", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExportersConfig {
    #[serde(default = "default_exporter_kind")]
    pub tracing: String,
    #[serde(default = "default_exporter_kind")]
    pub metrics: String,
}

impl Default for ExportersConfig {
    fn default() -> Self {
        Self {
            tracing: default_exporter_kind(),
            metrics: default_exporter_kind(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            stdout: default_log_stdout(),
            file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let path = std::env::var("CONFIG_PATH")
            .map_err(|_| "CONFIG_PATH is required (strict YAML)".to_string())?;
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("CONFIG_PATH read error: {}", e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, String> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| format!("CONFIG_PATH invalid yaml: {}", e))?;
        config.normalize()?;
        Ok(config)
    }

    pub fn catalog(&self) -> ModelCatalog {
        match &self.models.catalog {
            Some(models) => ModelCatalog::new(models.clone()),
            None => ModelCatalog::builtin(),
        }
    }

    fn normalize(&mut self) -> Result<(), String> {
        self.observability.logging.format = self.observability.logging.format.to_lowercase();
        self.observability.logging.level = self.observability.logging.level.to_lowercase();
        match self.observability.logging.format.as_str() {
            "text" | "json" => {}
            other => return Err(format!("logging.format invalid: {}", other)),
        }
        match self.observability.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(format!("logging.level invalid: {}", other)),
        }
        if self.upstream.embeddings_url.trim().is_empty() {
            return Err("upstream.embeddings_url is required".to_string());
        }
        if self.upstream.connect_timeout_ms == 0 || self.upstream.read_timeout_ms == 0 {
            return Err("upstream timeouts must be greater than zero".to_string());
        }
        if self.limits.max_inflight == 0 {
            return Err("limits.max_inflight must be greater than zero".to_string());
        }
        if self.observability.audit_log.enabled && self.observability.audit_log.path.is_none() {
            return Err("observability.audit_log.path is required when enabled".to_string());
        }
        let catalog = self.catalog();
        if catalog.is_empty() {
            return Err("models.catalog must not be empty".to_string());
        }
        if !catalog.is_embedding_model(&self.models.default_model) {
            return Err(format!(
                "models.default_model {} is not an embeddings model in the catalog",
                self.models.default_model
            ));
        }
        Ok(())
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_embeddings_url() -> String {
    "https://api.individual.githubcopilot.com/embeddings".to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    120_000
}

fn default_pool_max_idle_per_host() -> usize {
    64
}

fn default_upstream_headers() -> BTreeMap<String, String> {
    [
        ("Content-Type", "application/json"),
        ("Editor-Version", "vscode/1.97.2"),
        ("Editor-Plugin-Version", "copilot-chat/0.24.1"),
        ("Copilot-Integration-Id", "vscode-chat"),
        ("Openai-Intent", "conversation-panel"),
        ("User-Agent", "GitHubCopilotChat/0.24.1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_model() -> String {
    crate::validate::DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_max_inflight() -> usize {
    10
}

fn default_max_queued() -> usize {
    64
}

fn default_service_name() -> String {
    "embeddings-gateway".to_string()
}

fn default_audit_max_file_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otlp_timeout_ms() -> u64 {
    3000
}

fn default_langfuse_http_base_url() -> String {
    "https://cloud.langfuse.com/api/public/otel".to_string()
}

fn default_langfuse_timeout_ms() -> u64 {
    5000
}

fn default_exporter_kind() -> String {
    "otlp_grpc".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_stdout() -> bool {
    true
}
