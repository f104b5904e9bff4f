use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::message::Message;
use super::tool::{Tool, ToolChoice};
use crate::errors::ProviderError;

/// A provider-neutral chat completion request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// Overrides the model configured on the provider
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    /// OpenAI style response format, e.g. `{"type": "json_object"}`
    pub response_format: Option<Value>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Makes `Provider::query` stream the response and return it once complete
    pub stream: bool,
    /// Provider-specific fields merged into the top level of the wire payload
    pub extras: Map<String, Value>,
    pub extra_headers: HashMap<String, String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_response_format(mut self, response_format: Value) -> Self {
        self.response_format = Some(response_format);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_extra<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    /// The model to call, falling back to the provider default
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model
            .as_deref()
            .filter(|model| !model.is_empty())
            .unwrap_or(default)
    }

    /// Check the request before any I/O happens
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.messages.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "request must have at least one message".to_string(),
            ));
        }

        let mut tool_names = HashSet::new();
        for tool in &self.tools {
            if tool.name.is_empty() {
                return Err(ProviderError::InvalidRequest(
                    "tool name cannot be empty".to_string(),
                ));
            }
            if !tool_names.insert(tool.name.as_str()) {
                return Err(ProviderError::InvalidRequest(format!(
                    "Duplicate tool name: {}",
                    tool.name
                )));
            }
        }

        for message in &self.messages {
            for call in &message.tool_calls {
                if call.id.is_empty() {
                    return Err(ProviderError::InvalidRequest(format!(
                        "tool call '{}' has an empty id",
                        call.name
                    )));
                }
            }
        }

        Ok(())
    }
}
