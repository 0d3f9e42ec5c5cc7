use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompatible,
    AzureOpenai,
    Anthropic,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "openai" | "openai_compatible" => Some(ProviderKind::OpenaiCompatible),
            "azure" | "azure_openai" => Some(ProviderKind::AzureOpenai),
            "anthropic" => Some(ProviderKind::Anthropic),
            _ => None,
        }
    }
}

/// Everything needed to build one chat provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRuntimeConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// Model name, or the deployment name for Azure.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    /// API base for OpenAI-compatible and Anthropic; resource endpoint for Azure.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for LLMRuntimeConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: String::new(),
            base_url: None,
            api_version: default_api_version(),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::AzureOpenai
}

fn default_model_id() -> String {
    "gpt-4o".to_string()
}

fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}
