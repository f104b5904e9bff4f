use std::collections::HashMap;

use super::factory::ProviderKind;

// Unified enum to wrap the configuration of each adapter variant
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    OpenAiCompatible(OpenAiCompatibleConfig),
    Gemini(GeminiProviderConfig),
    Ollama(OllamaProviderConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::OpenAiCompatible(config) => config.kind,
            ProviderConfig::Gemini(_) => ProviderKind::Gemini,
            ProviderConfig::Ollama(_) => ProviderKind::Ollama,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::OpenAiCompatible(config) => &config.model,
            ProviderConfig::Gemini(config) => &config.model,
            ProviderConfig::Ollama(config) => &config.model,
        }
    }
}

/// Serves OpenAI, OpenRouter, XAI and anything else speaking chat completions
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiCompatibleConfig {
    pub kind: ProviderKind,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`
    pub host: String,
    pub api_key: String,
    pub model: String,
    /// Sent on every request, e.g. OpenRouter's `HTTP-Referer` and `X-Title`
    pub extra_headers: HashMap<String, String>,
}

impl OpenAiCompatibleConfig {
    pub fn new<K: Into<String>, M: Into<String>>(kind: ProviderKind, api_key: K, model: M) -> Self {
        Self {
            kind,
            host: kind.default_host().to_string(),
            api_key: api_key.into(),
            model: model.into(),
            extra_headers: HashMap::new(),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl GeminiProviderConfig {
    pub fn new<K: Into<String>, M: Into<String>>(api_key: K, model: M) -> Self {
        Self {
            host: ProviderKind::Gemini.default_host().to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub model: String,
}

impl OllamaProviderConfig {
    pub fn new<M: Into<String>>(model: M) -> Self {
        Self {
            host: ProviderKind::Ollama.default_host().to_string(),
            model: model.into(),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }
}
