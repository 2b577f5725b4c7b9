use crate::models::{ModelCapabilities, ModelDescriptor};

pub const EMBEDDINGS_CAPABILITY: &str = "embeddings";

/// Read-only list of the models the upstream serves. Built once at startup
/// and shared behind an `Arc`; there is no mutation API.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn builtin() -> Self {
        let entries = [
            ("text-embedding-3-small", "Embedding V3 small", "Azure OpenAI", "embeddings"),
            ("text-embedding-3-small-inference", "Embedding V3 small (Inference)", "Azure OpenAI", "embeddings"),
            ("text-embedding-ada-002", "Embedding V2 Ada", "Azure OpenAI", "embeddings"),
            ("gpt-4o", "GPT-4o", "Azure OpenAI", "chat"),
            ("gpt-4o-mini", "GPT-4o mini", "Azure OpenAI", "chat"),
            ("gpt-4.1", "GPT-4.1", "Azure OpenAI", "chat"),
            ("o3-mini", "o3-mini", "Azure OpenAI", "chat"),
            ("claude-3.5-sonnet", "Claude 3.5 Sonnet", "Anthropic", "chat"),
        ];
        let models = entries
            .iter()
            .map(|(id, name, vendor, kind)| ModelDescriptor {
                id: id.to_string(),
                name: Some(name.to_string()),
                vendor: Some(vendor.to_string()),
                capabilities: ModelCapabilities {
                    capability_type: kind.to_string(),
                },
            })
            .collect();
        Self::new(models)
    }

    /// Exact id match that is also typed as an embeddings model.
    pub fn find_embedding_model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.id == id && m.capabilities.capability_type == EMBEDDINGS_CAPABILITY)
    }

    pub fn is_embedding_model(&self, id: &str) -> bool {
        self.find_embedding_model(id).is_some()
    }

    pub fn by_type<'a>(&'a self, capability_type: Option<&'a str>) -> Vec<&'a ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| capability_type.is_none_or(|t| m.capabilities.capability_type == t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
