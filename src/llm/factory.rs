use std::sync::Arc;

use crate::error::AppError;
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::openai_compatible::OpenAICompatibleProvider;
use crate::llm::provider::LLMProvider;
use crate::models::llm::{LLMRuntimeConfig, ProviderKind};

pub fn provider_from_runtime_config(cfg: &LLMRuntimeConfig) -> Result<Arc<dyn LLMProvider>, AppError> {
    if cfg.api_key.trim().is_empty() {
        return Err(AppError::Config("Model config is missing api_key".to_string()));
    }

    let provider: Arc<dyn LLMProvider> = match cfg.provider {
        ProviderKind::OpenaiCompatible => Arc::new(OpenAICompatibleProvider::new(
            cfg.api_key.clone(),
            cfg.model_id.clone(),
            cfg.base_url.clone(),
        )?),
        ProviderKind::AzureOpenai => {
            let endpoint = cfg
                .base_url
                .clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| AppError::Config("Azure OpenAI requires an endpoint".to_string()))?;
            Arc::new(OpenAICompatibleProvider::azure(
                cfg.api_key.clone(),
                endpoint,
                cfg.model_id.clone(),
                cfg.api_version.clone(),
            )?)
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            cfg.api_key.clone(),
            cfg.model_id.clone(),
            cfg.base_url.clone(),
        )?),
    };

    tracing::info!(
        provider = provider.provider_name(),
        model = provider.model_id(),
        "language model provider configured"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_config_error() {
        let err = provider_from_runtime_config(&LLMRuntimeConfig::default()).err().unwrap();
        assert_eq!(err.code(), "config");
    }

    #[test]
    fn azure_needs_endpoint() {
        let cfg = LLMRuntimeConfig {
            api_key: "k".into(),
            ..LLMRuntimeConfig::default()
        };
        assert!(provider_from_runtime_config(&cfg).is_err());

        let cfg = LLMRuntimeConfig {
            base_url: Some("https://res.openai.azure.com".into()),
            ..cfg
        };
        let provider = provider_from_runtime_config(&cfg).unwrap();
        assert_eq!(provider.model_id(), "gpt-4o");
    }

    #[test]
    fn builds_each_provider_kind() {
        for kind in [ProviderKind::OpenaiCompatible, ProviderKind::Anthropic] {
            let cfg = LLMRuntimeConfig {
                provider: kind,
                model_id: "m".into(),
                api_key: "k".into(),
                ..LLMRuntimeConfig::default()
            };
            assert!(provider_from_runtime_config(&cfg).is_ok());
        }
    }
}
