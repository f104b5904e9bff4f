use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::tool::ToolCall;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Build usage from optional counters, computing the total when the provider omits it
    pub fn from_counts(
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Self {
        let prompt = prompt_tokens.unwrap_or_default();
        let completion = completion_tokens.unwrap_or_default();
        Self::new(
            prompt,
            completion,
            total_tokens.unwrap_or(prompt.saturating_add(completion)),
        )
    }
}

/// A provider-neutral chat completion result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// Body as received from the provider, empty for streamed responses
    pub raw: Bytes,
}

impl ChatResponse {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_computed_when_missing() {
        let usage = Usage::from_counts(Some(10), Some(20), None);
        assert_eq!(usage, Usage::new(10, 20, 30));

        let usage = Usage::from_counts(Some(10), Some(20), Some(35));
        assert_eq!(usage.total_tokens, 35);
    }

    #[test]
    fn test_usage_total_saturates() {
        let usage = Usage::from_counts(Some(u32::MAX), Some(1), None);
        assert_eq!(usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_usage_deserialization_defaults() -> anyhow::Result<()> {
        let usage: Usage = serde_json::from_str(r#"{"prompt_tokens": 12}"#)?;
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 0);
        Ok(())
    }
}
