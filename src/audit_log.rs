use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::events::{EventSink, GatewayEvent};

/// Appends every gateway event as one JSON line. The file is rolled over to a
/// new timestamped path once it would grow past `max_file_bytes`.
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AuditLogRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogRecord {
    pub ts_ms: u128,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

impl AuditLogger {
    /// Must be called from within a tokio runtime.
    pub fn new(base_path: String, max_file_bytes: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditLogRecord>(256);
        tokio::spawn(async move {
            let mut current_path = build_log_path(&base_path);
            let mut file = match open_log_file(&current_path).await {
                Ok(file) => file,
                Err(err) => {
                    tracing::error!("audit log open error: {}", err);
                    return;
                }
            };
            let mut current_size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
            while let Some(record) = rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&record) else {
                    continue;
                };
                line.push('\n');
                let len = line.len() as u64;
                if current_size > 0 && current_size + len > max_file_bytes {
                    current_path = build_log_path(&base_path);
                    match open_log_file(&current_path).await {
                        Ok(new_file) => {
                            file = new_file;
                            current_size = 0;
                        }
                        Err(err) => tracing::error!("audit log rotate error: {}", err),
                    }
                }
                if let Err(err) = file.write_all(line.as_bytes()).await {
                    tracing::error!("audit log write error: {}", err);
                    continue;
                }
                if let Err(err) = file.flush().await {
                    tracing::error!("audit log flush error: {}", err);
                }
                current_size += len;
            }
        });
        Self { sender: tx }
    }
}

impl EventSink for AuditLogger {
    fn emit(&self, event: &GatewayEvent) {
        let record = AuditLogRecord {
            ts_ms: now_ms(),
            event: event.clone(),
        };
        if self.sender.try_send(record).is_err() {
            tracing::warn!(
                request_id = %event.request_id(),
                "audit log queue full, record dropped"
            );
        }
    }
}

/// Header snapshot for the audit trail with credentials redacted.
pub fn headers_to_map(headers: &axum::http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_credential_header(name.as_str()) {
                "[redacted]"
            } else {
                value.to_str().unwrap_or("[invalid]")
            };
            (name.to_string(), value.to_string())
        })
        .collect()
}

fn is_credential_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("x-api-key")
}

pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn build_log_path(base: &str) -> String {
    let ts = now_ms();
    if let Some(stripped) = base.strip_suffix(".jsonl") {
        format!("{}.{}.jsonl", stripped, ts)
    } else {
        format!("{}.{}", base, ts)
    }
}

async fn open_log_file(path: &str) -> Result<tokio::fs::File, std::io::Error> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}
