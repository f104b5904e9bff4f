use std::str::FromStr;
use std::sync::Arc;

use strum_macros::{Display, EnumIter, EnumString};

use super::{
    base::Provider, configs::ProviderConfig, gemini::GeminiProvider, ollama::OllamaProvider,
    openai::OpenAiCompatibleProvider,
};
use crate::catalog::ModelCatalog;
use crate::errors::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ProviderKind {
    #[strum(to_string = "OpenAI")]
    OpenAi,
    #[strum(to_string = "OpenRouter")]
    OpenRouter,
    #[strum(to_string = "XAI")]
    Xai,
    #[strum(to_string = "Gemini")]
    Gemini,
    #[strum(to_string = "Ollama")]
    Ollama,
}

impl ProviderKind {
    pub fn default_host(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Xai => "https://api.x.ai/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::OpenRouter => "qwen/qwen3-4b:free",
            ProviderKind::Xai => "grok-3-mini",
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::Ollama => "qwen3:latest",
        }
    }

    /// Environment variable conventionally holding the API key
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Xai => Some("XAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    /// Local runtimes are called without an API key
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }

    pub fn is_openai_compatible(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Xai
        )
    }
}

/// Resolve a user supplied provider name to its kind and default model
pub fn kind_and_default_model(name: &str) -> Result<(ProviderKind, &'static str), ProviderError> {
    let kind = ProviderKind::from_str(name.trim())
        .map_err(|_| ProviderError::InvalidRequest(format!("unsupported provider: {:?}", name)))?;
    Ok((kind, kind.default_model()))
}

pub fn get_provider(
    config: ProviderConfig,
    catalog: Arc<ModelCatalog>,
) -> Result<Box<dyn Provider>, ProviderError> {
    if config.model().is_empty() {
        return Err(ProviderError::InvalidRequest(format!(
            "model required for provider {}",
            config.kind()
        )));
    }

    match config {
        ProviderConfig::OpenAiCompatible(openai_config) => Ok(Box::new(
            OpenAiCompatibleProvider::new(openai_config, catalog)?,
        )),
        ProviderConfig::Gemini(gemini_config) => {
            Ok(Box::new(GeminiProvider::new(gemini_config, catalog)?))
        }
        ProviderConfig::Ollama(ollama_config) => {
            Ok(Box::new(OllamaProvider::new(ollama_config, catalog)?))
        }
    }
}
