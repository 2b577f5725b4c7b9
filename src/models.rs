use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// Validated embedding request, built once per inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingParameters {
    pub model: String,
    pub inputs: Vec<String>,
    pub user: String,
}

#[derive(Debug, Serialize)]
pub struct UpstreamEmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<&'a str>,
}

impl<'a> From<&'a EmbeddingParameters> for UpstreamEmbeddingRequest<'a> {
    fn from(params: &'a EmbeddingParameters) -> Self {
        Self {
            model: &params.model,
            input: &params.inputs,
            user: Some(params.user.as_str()).filter(|u| !u.is_empty()),
        }
    }
}

/// Raw result of the outbound call; the body is relayed untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamOutcome {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamOutcome {
    /// Body as text for error messages and events; invalid UTF-8 is replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub capabilities: ModelCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCapabilities {
    #[serde(rename = "type")]
    pub capability_type: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse<'a> {
    pub object: &'static str,
    pub data: Vec<&'a ModelDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
    #[serde(default, rename = "type")]
    pub capability_type: Option<String>,
}
