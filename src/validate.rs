use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::ModelCatalog;
use crate::events::{EventSink, GatewayEvent};
use crate::models::EmbeddingParameters;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid input format")]
    InvalidInputFormat,
    #[error("Input cannot be empty.")]
    EmptyInput,
    #[error("Input element at index {0} is not a string")]
    NonStringElement(usize),
    #[error("Unsupported embedding model: {0}")]
    UnsupportedModel(String),
}

/// Turns a parsed request document into [`EmbeddingParameters`].
#[derive(Clone)]
pub struct RequestValidator {
    catalog: Arc<ModelCatalog>,
    default_model: String,
    strict_model: bool,
    sink: Arc<dyn EventSink>,
}

impl RequestValidator {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        default_model: impl Into<String>,
        strict_model: bool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog,
            default_model: default_model.into(),
            strict_model,
            sink,
        }
    }

    pub fn validate(
        &self,
        request_id: &str,
        doc: &Value,
    ) -> Result<EmbeddingParameters, ValidationError> {
        let model = self.resolve_model(request_id, doc.get("model"))?;
        let inputs = extract_inputs(doc.get("input"))?;
        let user = doc
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(EmbeddingParameters {
            model,
            inputs,
            user,
        })
    }

    fn resolve_model(
        &self,
        request_id: &str,
        field: Option<&Value>,
    ) -> Result<String, ValidationError> {
        let requested = field
            .and_then(Value::as_str)
            .unwrap_or(self.default_model.as_str());
        if self.catalog.is_embedding_model(requested) {
            return Ok(requested.to_string());
        }
        if self.strict_model {
            return Err(ValidationError::UnsupportedModel(requested.to_string()));
        }
        self.sink.emit(&GatewayEvent::ModelFallback {
            request_id: request_id.to_string(),
            requested: requested.to_string(),
            fallback: self.default_model.clone(),
        });
        Ok(self.default_model.clone())
    }
}

fn extract_inputs(field: Option<&Value>) -> Result<Vec<String>, ValidationError> {
    let inputs = match field {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::String(text) => Ok(text.clone()),
                _ => Err(ValidationError::NonStringElement(idx)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(ValidationError::InvalidInputFormat),
    };
    if inputs.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    Ok(inputs)
}
