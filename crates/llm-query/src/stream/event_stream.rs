use serde::Deserialize;
use serde_json::Value;

use super::{ArgumentEncoding, StreamAccumulator, StreamDecoder};
use crate::errors::ProviderError;
use crate::models::delta::{Delta, ToolCallDelta};
use crate::models::response::{ChatResponse, Usage};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChoiceDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

/// Decoder for OpenAI-compatible `text/event-stream` bodies
///
/// Every `data:` line carries one chat completion chunk and `data: [DONE]` ends the stream.
/// Comment lines, blank lines and other event fields are ignored. A frame that does not
/// parse is logged and skipped.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    acc: StreamAccumulator,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<Delta>) -> Result<(), ProviderError> {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(e) => {
                tracing::warn!("skipping event stream line that is not UTF-8: {}", e);
                return Ok(());
            }
        };

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Ok(());
        };
        let payload = payload.trim_start();

        if payload == DONE_SENTINEL {
            out.extend(self.acc.done());
            return Ok(());
        }
        if payload.is_empty() {
            return Ok(());
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("skipping malformed stream frame {:?}: {}", payload, e);
                return Ok(());
            }
        };

        if chunk.error.as_ref().is_some_and(|error| !error.is_null()) {
            return Err(ProviderError::Protocol {
                status: 200,
                body: payload.to_string(),
            });
        }

        if let Some(usage) = chunk.usage {
            self.acc.set_usage(Usage::from_counts(
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
            ));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };

        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content.as_deref() {
                out.extend(self.acc.push_text(text));
            }

            let fragments: Vec<ToolCallDelta> = delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(position, call)| {
                    let function = call.function;
                    ToolCallDelta {
                        index: call.index.unwrap_or(position),
                        id: call.id,
                        name: function.as_ref().and_then(|f| f.name.clone()),
                        arguments: function.and_then(|f| f.arguments),
                    }
                })
                .collect();

            if !fragments.is_empty() {
                for fragment in &fragments {
                    self.acc.push_tool_call(fragment);
                }
                out.push(Delta::tool_calls(fragments));
            }
        }

        self.acc.set_finish_reason(choice.finish_reason);
        Ok(())
    }
}

impl StreamDecoder for EventStreamDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Delta>, ProviderError> {
        let mut out = Vec::new();
        if self.acc.is_done() {
            return Ok(out);
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.process_line(&line[..line.len() - 1], &mut out)?;
            if self.acc.is_done() {
                self.buffer.clear();
                break;
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<Delta>, ProviderError> {
        let mut out = Vec::new();
        if !self.acc.is_done() && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut out)?;
        }
        out.extend(self.acc.done());
        Ok(out)
    }

    fn is_done(&self) -> bool {
        self.acc.is_done()
    }

    fn into_response(self) -> ChatResponse {
        self.acc.into_response(ArgumentEncoding::StringLiteral)
    }
}
