use serde_json::Deserializer;

use super::{ArgumentEncoding, StreamAccumulator, StreamDecoder};
use crate::errors::ProviderError;
use crate::models::delta::{Delta, ToolCallDelta};
use crate::models::response::ChatResponse;
use crate::providers::gemini::GenerateContentResponse;
use crate::providers::tool_calls::{raw_arguments, synthesize_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitOpenBracket,
    /// After `[`: an element or `]`
    AwaitFirstElement,
    /// After `,`: an element only
    AwaitElement,
    /// After an element: `,` or `]`
    AwaitSeparator,
    Done,
}

/// Decoder for Gemini's `streamGenerateContent` body
///
/// The body is a single JSON array whose elements arrive over time. The brackets and
/// commas are consumed explicitly, then each complete element is decoded as soon as its
/// bytes are buffered. Broken framing or an element that fails to decode aborts the stream.
#[derive(Debug)]
pub struct JsonArrayDecoder {
    state: State,
    buffer: Vec<u8>,
    /// The buffered element was cut short, nothing changes until a `}` arrives
    incomplete: bool,
    acc: StreamAccumulator,
}

impl Default for JsonArrayDecoder {
    fn default() -> Self {
        Self {
            state: State::AwaitOpenBracket,
            buffer: Vec::new(),
            incomplete: false,
            acc: StreamAccumulator::new(),
        }
    }
}

impl JsonArrayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(
        &mut self,
        element: GenerateContentResponse,
        raw: &[u8],
        out: &mut Vec<Delta>,
    ) -> Result<(), ProviderError> {
        if element.error.as_ref().is_some_and(|error| !error.is_null()) {
            return Err(ProviderError::Protocol {
                status: 200,
                body: String::from_utf8_lossy(raw).into_owned(),
            });
        }

        out.extend(self.acc.push_text(&element.text()));

        let first_index = self.acc.tool_call_count();
        let fragments: Vec<ToolCallDelta> = element
            .function_calls()
            .into_iter()
            .enumerate()
            .map(|(offset, call)| ToolCallDelta {
                index: first_index + offset,
                id: Some(
                    call.id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(synthesize_id),
                ),
                name: Some(call.name.clone()),
                arguments: Some(raw_arguments(call.args.as_deref())),
            })
            .collect();
        if !fragments.is_empty() {
            for fragment in &fragments {
                self.acc.push_tool_call(fragment);
            }
            out.push(Delta::tool_calls(fragments));
        }

        self.acc.set_finish_reason(element.finish_reason());
        if let Some(usage) = element.usage() {
            self.acc.set_usage(usage);
        }
        Ok(())
    }

    fn drain(&mut self, out: &mut Vec<Delta>) -> Result<(), ProviderError> {
        let mut pos = 0;
        self.incomplete = false;

        loop {
            while pos < self.buffer.len() && self.buffer[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= self.buffer.len() {
                break;
            }

            let byte = self.buffer[pos];
            match self.state {
                State::AwaitOpenBracket => {
                    if byte != b'[' {
                        return Err(unexpected("'['", byte));
                    }
                    pos += 1;
                    self.state = State::AwaitFirstElement;
                }
                State::AwaitFirstElement | State::AwaitSeparator if byte == b']' => {
                    self.state = State::Done;
                    out.extend(self.acc.done());
                    self.buffer.clear();
                    return Ok(());
                }
                State::AwaitSeparator => {
                    if byte != b',' {
                        return Err(unexpected("',' or ']'", byte));
                    }
                    pos += 1;
                    self.state = State::AwaitElement;
                }
                State::AwaitFirstElement | State::AwaitElement => {
                    if byte == b',' || byte == b']' {
                        return Err(unexpected("an array element", byte));
                    }
                    let mut elements = Deserializer::from_slice(&self.buffer[pos..])
                        .into_iter::<GenerateContentResponse>();
                    let element = match elements.next() {
                        Some(Ok(element)) => element,
                        Some(Err(e)) if e.is_eof() => {
                            self.incomplete = true;
                            break;
                        }
                        Some(Err(e)) => return Err(ProviderError::decode(e)),
                        None => break,
                    };
                    let end = pos + elements.byte_offset();
                    let raw = self.buffer[pos..end].to_vec();
                    pos = end;
                    self.state = State::AwaitSeparator;
                    tracing::trace!("decoded stream element of {} bytes", raw.len());
                    self.handle(element, &raw, out)?;
                }
                State::Done => break,
            }
        }

        self.buffer.drain(..pos);
        Ok(())
    }
}

fn unexpected(expected: &str, found: u8) -> ProviderError {
    ProviderError::Decode(format!(
        "malformed stream: expected {}, found {:?}",
        expected, found as char
    ))
}

impl StreamDecoder for JsonArrayDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Delta>, ProviderError> {
        let mut out = Vec::new();
        if self.state == State::Done {
            return Ok(out);
        }
        self.buffer.extend_from_slice(chunk);
        // An object can only complete on a closing brace
        if self.incomplete && !chunk.contains(&b'}') {
            return Ok(out);
        }
        self.drain(&mut out)?;
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<Delta>, ProviderError> {
        let mut out = Vec::new();
        if self.state != State::Done {
            self.drain(&mut out)?;
        }

        match self.state {
            State::Done => return Ok(out),
            State::AwaitOpenBracket => {
                return Err(ProviderError::Decode(
                    "stream ended before the opening '['".to_string(),
                ))
            }
            State::AwaitElement => {
                return Err(ProviderError::Decode(
                    "stream ended after a trailing ','".to_string(),
                ))
            }
            State::AwaitFirstElement | State::AwaitSeparator => {}
        }

        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(ProviderError::Decode(format!(
                "stream ended inside an array element: {}",
                String::from_utf8_lossy(&self.buffer)
            )));
        }

        tracing::debug!("stream ended without closing ']'");
        self.state = State::Done;
        out.extend(self.acc.done());
        Ok(out)
    }

    fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn into_response(self) -> ChatResponse {
        self.acc.into_response(ArgumentEncoding::Raw)
    }
}
