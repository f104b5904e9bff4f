//! Capability table used to annotate `list_models` results
//!
//! Most providers only return bare model identifiers. The catalog supplies per-provider
//! defaults and per-model overrides (context size, tool/image/streaming support, ...).
//! It is parsed once by the composition root and shared read-only with every provider.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::providers::factory::ProviderKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub name: String,
    pub context_size: u32,
    pub supports_tools: bool,
    pub supports_thinking: bool,
    pub supports_input_image: bool,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    pub supports_structured: bool,
}

impl ModelInfo {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Optional fields replacing the provider defaults for one model
///
/// `None` means "not set", so an explicit `false` still overrides a `true` default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOverride {
    pub context_size: Option<u32>,
    pub supports_tools: Option<bool>,
    pub supports_thinking: Option<bool>,
    pub supports_input_image: Option<bool>,
    pub supports_streaming: Option<bool>,
    pub supports_json_mode: Option<bool>,
    pub supports_structured: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderModels {
    pub defaults: ModelInfo,
    pub models: HashMap<String, ModelOverride>,
    /// Regexes of model ids to drop from listings
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub version: u32,
    /// Keyed by provider kind as displayed, e.g. `"OpenAI"` or `"Ollama"`
    pub providers: HashMap<String, ProviderModels>,
}

impl ModelCatalog {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderModels> {
        self.providers.get(&kind.to_string())
    }

    /// Turn bare model ids into annotated, name-sorted model infos
    pub fn annotate<I, S>(&self, kind: ProviderKind, ids: I) -> Vec<ModelInfo>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(provider) = self.provider(kind) else {
            tracing::debug!("no catalog entry for {}, returning bare model names", kind);
            let mut infos: Vec<ModelInfo> = ids.into_iter().map(ModelInfo::named).collect();
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            return infos;
        };

        let excludes: Vec<Regex> = provider
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("ignoring invalid exclude pattern {:?}: {}", pattern, e);
                    None
                }
            })
            .collect();

        let mut infos: Vec<ModelInfo> = ids
            .into_iter()
            .map(|id| -> String { id.into() })
            .filter(|id| !excludes.iter().any(|re| re.is_match(id)))
            .map(|id| {
                let mut info = match provider.models.get(&id) {
                    Some(overrides) => merge(&provider.defaults, overrides),
                    None => provider.defaults.clone(),
                };
                info.name = id;
                info
            })
            .collect();

        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

/// Start from the defaults and replace every field the override sets
pub fn merge(defaults: &ModelInfo, overrides: &ModelOverride) -> ModelInfo {
    let mut merged = defaults.clone();

    if let Some(context_size) = overrides.context_size {
        merged.context_size = context_size;
    }
    if let Some(supports_tools) = overrides.supports_tools {
        merged.supports_tools = supports_tools;
    }
    if let Some(supports_thinking) = overrides.supports_thinking {
        merged.supports_thinking = supports_thinking;
    }
    if let Some(supports_input_image) = overrides.supports_input_image {
        merged.supports_input_image = supports_input_image;
    }
    if let Some(supports_streaming) = overrides.supports_streaming {
        merged.supports_streaming = supports_streaming;
    }
    if let Some(supports_json_mode) = overrides.supports_json_mode {
        merged.supports_json_mode = supports_json_mode;
    }
    if let Some(supports_structured) = overrides.supports_structured {
        merged.supports_structured = supports_structured;
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "version": 1,
        "providers": {
            "OpenAI": {
                "defaults": {"context_size": 8192, "supports_streaming": true, "supports_tools": true},
                "models": {
                    "gpt-4o-mini": {"context_size": 128000, "supports_input_image": true},
                    "gpt-3.5-turbo": {"supports_tools": false}
                },
                "exclude_patterns": ["^dall-e", "^whisper"]
            }
        }
    }"#;

    #[test]
    fn test_merge_explicit_false_overrides_default() {
        let defaults = ModelInfo {
            supports_tools: true,
            context_size: 4096,
            ..Default::default()
        };
        let overrides = ModelOverride {
            supports_tools: Some(false),
            ..Default::default()
        };

        let merged = merge(&defaults, &overrides);
        assert!(!merged.supports_tools);
        assert_eq!(merged.context_size, 4096);
    }

    #[test]
    fn test_annotate_applies_overrides_and_excludes() -> anyhow::Result<()> {
        let catalog = ModelCatalog::from_json(CATALOG)?;
        let infos = catalog.annotate(
            ProviderKind::OpenAi,
            ["gpt-4o-mini", "dall-e-3", "gpt-3.5-turbo", "gpt-4.1"],
        );

        let names: Vec<&str> = infos.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(names, vec!["gpt-3.5-turbo", "gpt-4.1", "gpt-4o-mini"]);

        assert!(!infos[0].supports_tools);
        assert_eq!(infos[1].context_size, 8192);
        assert_eq!(infos[2].context_size, 128000);
        assert!(infos[2].supports_input_image);
        assert!(infos[2].supports_streaming);
        Ok(())
    }

    #[test]
    fn test_annotate_without_provider_entry() {
        let catalog = ModelCatalog::default();
        let infos = catalog.annotate(ProviderKind::Ollama, ["qwen3:latest", "llama3.2"]);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0], ModelInfo::named("llama3.2"));
    }
}
