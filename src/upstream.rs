use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

use crate::config::UpstreamConfig;
use crate::error::AppError;
use crate::models::{EmbeddingParameters, UpstreamEmbeddingRequest, UpstreamOutcome};

/// Issues the single outbound embeddings call for a validated request.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
    baseline: HeaderMap,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()
            .map_err(|e| format!("upstream client build error: {}", e))?;
        Ok(Self {
            client,
            url: config.embeddings_url.clone(),
            baseline: baseline_headers(&config.headers)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Baseline headers with the caller's credential on top. Any
    /// `Authorization` in the baseline is replaced.
    pub fn headers_for(&self, token: &str) -> Result<HeaderMap, AppError> {
        let mut headers = self.baseline.clone();
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| AppError::Unauthorized)?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    pub async fn invoke(
        &self,
        params: &EmbeddingParameters,
        token: &str,
    ) -> Result<UpstreamOutcome, AppError> {
        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers_for(token)?)
            .json(&UpstreamEmbeddingRequest::from(params))
            .send()
            .await
            .map_err(|e| AppError::internal(format!("upstream request failed: {}", e)))?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AppError::internal(format!("upstream body read failed: {}", e)))?;
        Ok(UpstreamOutcome { status, body })
    }
}

fn baseline_headers(configured: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    for (name, value) in configured {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("upstream.headers invalid name {}: {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("upstream.headers invalid value for {}: {}", name, e))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
