use serde::{Deserialize, Serialize};

/// A fragment of a tool call streamed by the provider
///
/// Fragments sharing an `index` belong to the same call. The id and name usually arrive
/// on the first fragment and argument text is split over the following ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One incremental unit of a streaming response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Terminal marker, nothing follows a done delta
    pub done: bool,
    /// Only set on the done delta
    pub finish_reason: Option<String>,
}

impl Delta {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallDelta>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn done(finish_reason: Option<String>) -> Self {
        Self {
            done: true,
            finish_reason,
            ..Default::default()
        }
    }
}
