use super::{ArgumentEncoding, StreamAccumulator, StreamDecoder};
use crate::errors::ProviderError;
use crate::models::delta::{Delta, ToolCallDelta};
use crate::models::response::ChatResponse;
use crate::providers::ollama::OllamaChatResponse;
use crate::providers::tool_calls::{raw_arguments, synthesize_id};

/// Decoder for Ollama's newline-delimited JSON stream
///
/// Each line is one chat object. A line with `done: true` ends the stream, as does EOF.
/// Unlike the event stream, a malformed line aborts the stream.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    acc: StreamAccumulator,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<Delta>) -> Result<(), ProviderError> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let chunk: OllamaChatResponse = serde_json::from_str(line).map_err(|e| {
            ProviderError::Decode(format!("malformed stream line {:?}: {}", line, e))
        })?;

        if chunk.error.as_deref().is_some_and(|error| !error.is_empty()) {
            return Err(ProviderError::Protocol {
                status: 200,
                body: line.to_string(),
            });
        }

        if let Some(message) = &chunk.message {
            out.extend(self.acc.push_text(&message.content));

            let first_index = self.acc.tool_call_count();
            let fragments: Vec<ToolCallDelta> = message
                .tool_calls
                .iter()
                .flatten()
                .enumerate()
                .map(|(offset, call)| ToolCallDelta {
                    index: first_index + offset,
                    id: Some(synthesize_id()),
                    name: Some(call.function.name.clone()),
                    arguments: Some(raw_arguments(call.function.arguments.as_deref())),
                })
                .collect();
            if !fragments.is_empty() {
                for fragment in &fragments {
                    self.acc.push_tool_call(fragment);
                }
                out.push(Delta::tool_calls(fragments));
            }
        }

        if chunk.done {
            self.acc.set_finish_reason(Some(chunk.finish_reason()));
            if let Some(usage) = chunk.usage() {
                self.acc.set_usage(usage);
            }
            out.extend(self.acc.done());
        }
        Ok(())
    }
}

impl StreamDecoder for NdjsonDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Delta>, ProviderError> {
        let mut out = Vec::new();
        if self.acc.is_done() {
            return Ok(out);
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.process_line(&line, &mut out)?;
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
        self.acc.into_response(ArgumentEncoding::Raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::response::Usage;
    use std::collections::HashSet;

    fn decode_all(chunks: &[&str]) -> Result<(Vec<Delta>, ChatResponse), ProviderError> {
        let mut decoder = NdjsonDecoder::new();
        let mut deltas = Vec::new();
        for chunk in chunks {
            deltas.extend(decoder.feed(chunk.as_bytes())?);
        }
        deltas.extend(decoder.finish()?);
        Ok((deltas, decoder.into_response()))
    }

    #[test]
    fn test_lines_until_done() -> anyhow::Result<()> {
        let (deltas, response) = decode_all(&[
            "{\"model\":\"qwen3\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"role\":\"assi",
            "stant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":7,\"eval_count\":3}\n",
        ])?;

        let texts: Vec<&str> = deltas.iter().filter_map(|d| d.text.as_deref()).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
        assert_eq!(deltas.iter().filter(|d| d.done).count(), 1);
        assert_eq!(response.text, "Hello");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage, Some(Usage::new(7, 3, 10)));
        Ok(())
    }

    #[test]
    fn test_done_without_reason_defaults_to_stop() -> anyhow::Result<()> {
        let (deltas, _) = decode_all(&["{\"message\":{\"content\":\"x\"},\"done\":true}"])?;
        assert_eq!(deltas.last().unwrap().finish_reason.as_deref(), Some("stop"));
        Ok(())
    }

    #[test]
    fn test_eof_ends_stream() -> anyhow::Result<()> {
        let (deltas, response) = decode_all(&["{\"message\":{\"content\":\"cut\"},\"done\":false}\n"])?;
        assert_eq!(deltas.len(), 2);
        assert!(deltas[1].done);
        assert_eq!(response.text, "cut");
        Ok(())
    }

    #[test]
    fn test_error_line_is_protocol_error() {
        let err = decode_all(&["{\"error\":\"model 'nope' not found\"}\n"]).unwrap_err();
        assert!(matches!(err, ProviderError::Protocol { status: 200, .. }));
        assert!(err.body().unwrap().contains("not found"));
    }

    #[test]
    fn test_malformed_line_aborts() {
        let err = decode_all(&["{\"message\":{\"content\":\"a\"},\"done\":false}\nnot json\n"])
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn test_tool_calls_get_unique_ids() -> anyhow::Result<()> {
        let (deltas, response) = decode_all(&[concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[",
            "{\"function\":{\"name\":\"get_weather\",\"arguments\":{\"location\":\"Paris\"}}},",
            "{\"function\":{\"name\":\"get_weather\",\"arguments\":{\"location\":\"Rome\"}}}",
            "]},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
        )])?;

        assert_eq!(deltas[0].tool_calls.len(), 2);
        assert_eq!(response.tool_calls.len(), 2);

        let ids: HashSet<&str> = response.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| !id.is_empty()));
        assert_eq!(response.tool_calls[1].arguments, r#"{"location":"Rome"}"#);
        Ok(())
    }
}
