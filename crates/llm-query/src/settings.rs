//! Provider settings read from a TOML document
//!
//! ```toml
//! [provider]
//! type = "openrouter"
//! model = "qwen/qwen3-4b:free"
//!
//! [provider.headers]
//! x-title = "my-app"
//! ```
//!
//! Hosts and models fall back to the per-kind defaults. A hosted provider without an
//! `api_key` gets one from a [`SecretSource`] under its conventional variable name.

use std::collections::HashMap;

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::providers::configs::{
    GeminiProviderConfig, OllamaProviderConfig, OpenAiCompatibleConfig, ProviderConfig,
};
use crate::providers::factory::ProviderKind;
use crate::secrets::{check_key_length, SecretError, SecretSource};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostedSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LocalSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi(HostedSettings),
    OpenRouter(HostedSettings),
    Xai(HostedSettings),
    Gemini(HostedSettings),
    Ollama(LocalSettings),
}

impl ProviderSettings {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderSettings::OpenAi(_) => ProviderKind::OpenAi,
            ProviderSettings::OpenRouter(_) => ProviderKind::OpenRouter,
            ProviderSettings::Xai(_) => ProviderKind::Xai,
            ProviderSettings::Gemini(_) => ProviderKind::Gemini,
            ProviderSettings::Ollama(_) => ProviderKind::Ollama,
        }
    }

    /// Convert to a provider config, filling defaults and resolving the API key
    pub fn into_config(self, secrets: &dyn SecretSource) -> Result<ProviderConfig, ConfigError> {
        let kind = self.kind();
        match self {
            ProviderSettings::Ollama(settings) => {
                let mut config =
                    OllamaProviderConfig::new(settings.model.unwrap_or_else(|| default_model(kind)));
                if let Some(host) = settings.host {
                    config = config.with_host(host);
                }
                Ok(ProviderConfig::Ollama(config))
            }
            ProviderSettings::Gemini(settings) => {
                let api_key = resolve_api_key(kind, settings.api_key, secrets)?;
                let mut config = GeminiProviderConfig::new(
                    api_key,
                    settings.model.unwrap_or_else(|| default_model(kind)),
                );
                if let Some(host) = settings.host {
                    config = config.with_host(host);
                }
                Ok(ProviderConfig::Gemini(config))
            }
            ProviderSettings::OpenAi(settings)
            | ProviderSettings::OpenRouter(settings)
            | ProviderSettings::Xai(settings) => {
                let api_key = resolve_api_key(kind, settings.api_key, secrets)?;
                let mut config = OpenAiCompatibleConfig::new(
                    kind,
                    api_key,
                    settings.model.unwrap_or_else(|| default_model(kind)),
                );
                if let Some(host) = settings.host {
                    config = config.with_host(host);
                }
                config.extra_headers.extend(settings.headers);
                Ok(ProviderConfig::OpenAiCompatible(config))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // "missing field `type`" names the field we need
                let error_str = err.to_string();
                if let Some(rest) = error_str.strip_prefix("missing field `") {
                    let field = rest.split('`').next().unwrap_or(rest);
                    Err(ConfigError::MissingField(field.to_string()))
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingField(field.clone()))
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_model(kind: ProviderKind) -> String {
    kind.default_model().to_string()
}

fn resolve_api_key(
    kind: ProviderKind,
    configured: Option<String>,
    secrets: &dyn SecretSource,
) -> Result<String, ConfigError> {
    let env_var = kind.api_key_env().unwrap_or_default();
    let key = match configured.filter(|key| !key.is_empty()) {
        Some(key) => key,
        None => match secrets.secret(env_var) {
            Ok(key) => key,
            Err(SecretError::NotFound(_)) => {
                return Err(ConfigError::MissingApiKey {
                    provider: kind.to_string(),
                    env_var: env_var.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        },
    };

    match check_key_length(env_var, &key) {
        Ok(()) => Ok(key),
        Err(SecretError::TooShort { required, got, .. }) => Err(ConfigError::ApiKeyTooShort {
            provider: kind.to_string(),
            required,
            got,
        }),
        Err(err) => Err(err.into()),
    }
}
