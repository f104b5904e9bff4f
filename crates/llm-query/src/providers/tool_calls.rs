//! Canonical tool-call shape for every provider
//!
//! The OpenAI family issues call ids and encodes arguments as a JSON string literal. Ollama
//! never issues ids and sends arguments as a raw object. Gemini may or may not carry an id.
//! [`ToolCallNormalizer`] turns all of these into [`ToolCall`]s whose ids are non-empty and
//! unique within one response, keeping argument bytes exactly as received.

use std::collections::HashSet;

use serde_json::value::RawValue;
use uuid::Uuid;

use crate::errors::ProviderError;
use crate::models::tool::ToolCall;

/// A fresh, globally unique tool call id
pub fn synthesize_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Default)]
pub struct ToolCallNormalizer {
    seen: HashSet<String>,
}

impl ToolCallNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a call, keeping the provider id unless it is missing, empty or already used
    pub fn normalize(
        &mut self,
        id: Option<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> ToolCall {
        let id = match id.filter(|id| !id.is_empty()) {
            Some(id) if !self.seen.contains(&id) => id,
            Some(id) => {
                tracing::warn!("provider reused tool call id {}, replacing it", id);
                self.fresh_id()
            }
            None => self.fresh_id(),
        };
        self.seen.insert(id.clone());
        ToolCall::new(id, name, arguments)
    }

    /// Normalize calls assembled elsewhere, e.g. from streamed fragments
    pub fn normalize_all(&mut self, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        calls
            .into_iter()
            .map(|call| self.normalize(Some(call.id), call.name, call.arguments))
            .collect()
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = synthesize_id();
            if !self.seen.contains(&id) {
                return id;
            }
        }
    }
}

/// Raw argument text as it appeared on the wire, empty when the field was absent or null
pub fn raw_arguments(raw: Option<&RawValue>) -> String {
    match raw.map(RawValue::get) {
        Some("null") | None => String::new(),
        Some(text) => text.to_string(),
    }
}

/// Arguments for the OpenAI family, which expects a JSON string literal
///
/// Text that already is a string literal is sent verbatim. Anything else, such as an object
/// received from Ollama or Gemini, is encoded into one.
pub fn openai_arguments(arguments: &str) -> Result<Box<RawValue>, ProviderError> {
    let trimmed = arguments.trim();
    if trimmed.starts_with('"') {
        if let Ok(raw) = RawValue::from_string(arguments.to_string()) {
            return Ok(raw);
        }
    }

    let inner = if trimmed.is_empty() { "{}" } else { arguments };
    let encoded = serde_json::to_string(inner).map_err(|e| ProviderError::Internal(e.to_string()))?;
    RawValue::from_string(encoded).map_err(|e| ProviderError::Internal(e.to_string()))
}

/// Arguments for providers expecting a JSON object (Ollama, Gemini)
///
/// A string literal received from the OpenAI family is unwrapped to the JSON it encodes.
pub fn object_arguments(arguments: &str) -> Result<Box<RawValue>, ProviderError> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return RawValue::from_string("{}".to_string())
            .map_err(|e| ProviderError::Internal(e.to_string()));
    }

    let text = if trimmed.starts_with('"') {
        let inner: String = serde_json::from_str(trimmed).map_err(|e| {
            ProviderError::InvalidRequest(format!("tool call arguments are not valid JSON: {}", e))
        })?;
        if inner.trim().is_empty() {
            "{}".to_string()
        } else {
            inner
        }
    } else {
        arguments.to_string()
    };

    RawValue::from_string(text).map_err(|e| {
        ProviderError::InvalidRequest(format!("tool call arguments are not valid JSON: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ids_are_unique() {
        let mut normalizer = ToolCallNormalizer::new();
        let first = normalizer.normalize(None, "get_weather", r#"{"location":"Paris"}"#);
        let second = normalizer.normalize(None, "get_weather", r#"{"location":"Rome"}"#);

        assert!(!first.id.is_empty());
        assert!(!second.id.is_empty());
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("call_"));
    }

    #[test]
    fn test_provider_ids_kept() {
        let mut normalizer = ToolCallNormalizer::new();
        let call = normalizer.normalize(Some("call_abc".to_string()), "ping", "{}");
        assert_eq!(call.id, "call_abc");
    }

    #[test]
    fn test_empty_and_duplicate_ids_replaced() {
        let mut normalizer = ToolCallNormalizer::new();
        let empty = normalizer.normalize(Some(String::new()), "ping", "{}");
        assert!(!empty.id.is_empty());

        let first = normalizer.normalize(Some("dup".to_string()), "ping", "{}");
        let second = normalizer.normalize(Some("dup".to_string()), "ping", "{}");
        assert_eq!(first.id, "dup");
        assert_ne!(second.id, "dup");
    }

    #[test]
    fn test_arguments_preserved_verbatim() {
        let mut normalizer = ToolCallNormalizer::new();
        let raw = r#"{ "location" : "Paris",  "unit":"c" }"#;
        let call = normalizer.normalize(None, "get_weather", raw);
        assert_eq!(call.arguments, raw);
    }

    #[test]
    fn test_raw_arguments_null_is_empty() {
        let raw: Box<RawValue> = serde_json::from_str("null").unwrap();
        assert_eq!(raw_arguments(Some(&raw)), "");
        assert_eq!(raw_arguments(None), "");

        let raw: Box<RawValue> = serde_json::from_str(r#""{\"a\":1}""#).unwrap();
        assert_eq!(raw_arguments(Some(&raw)), r#""{\"a\":1}""#);
    }

    #[test]
    fn test_openai_arguments() {
        let literal = r#""{\"param\": \"value\"}""#;
        assert_eq!(openai_arguments(literal).unwrap().get(), literal);

        let object = r#"{"param":"value"}"#;
        assert_eq!(
            openai_arguments(object).unwrap().get(),
            r#""{\"param\":\"value\"}""#
        );

        assert_eq!(openai_arguments("").unwrap().get(), r#""{}""#);
    }

    #[test]
    fn test_object_arguments() {
        let object = r#"{"param": "value"}"#;
        assert_eq!(object_arguments(object).unwrap().get(), object);

        let literal = r#""{\"param\":\"value\"}""#;
        assert_eq!(object_arguments(literal).unwrap().get(), r#"{"param":"value"}"#);

        assert_eq!(object_arguments("").unwrap().get(), "{}");
        assert!(object_arguments("invalid json {").is_err());
    }
}
