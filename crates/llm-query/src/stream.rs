//! Incremental decoding of streamed provider responses
//!
//! Each provider frames its stream differently: OpenAI-compatible servers send an event
//! stream, Gemini sends a single JSON array that arrives piece by piece and Ollama sends
//! newline-delimited JSON. A [`StreamDecoder`] turns raw body chunks into [`Delta`]s while
//! accumulating the final [`ChatResponse`]. [`ChatStream`] drives a decoder on a producer
//! task and hands the deltas to the caller through a bounded channel.

pub mod event_stream;
pub mod json_array;
pub mod ndjson;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;

use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::delta::{Delta, ToolCallDelta};
use crate::models::response::{ChatResponse, Usage};
use crate::providers::tool_calls::ToolCallNormalizer;

pub use event_stream::EventStreamDecoder;
pub use json_array::JsonArrayDecoder;
pub use ndjson::NdjsonDecoder;

/// Deltas buffered between the producer task and the consumer
const STREAM_BUFFER: usize = 32;

/// Turns body chunks into deltas
///
/// Implementations must tolerate frames split across chunk boundaries, emit exactly one
/// done delta, and ignore any input fed after it.
pub trait StreamDecoder: Send + 'static {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Delta>, ProviderError>;

    /// Called once the body is exhausted
    fn finish(&mut self) -> Result<Vec<Delta>, ProviderError>;

    fn is_done(&self) -> bool;

    fn into_response(self) -> ChatResponse
    where
        Self: Sized;
}

/// How streamed tool-call arguments are rendered in the final response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentEncoding {
    /// Fragments concatenate to JSON text which is wrapped in a string literal (OpenAI family)
    StringLiteral,
    /// Arguments arrive as raw JSON and are kept as is
    Raw,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// State shared by every decoder: text, finish reason, usage and tool calls seen so far
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    tool_calls: BTreeMap<usize, ToolCallBuilder>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: &str) -> Option<Delta> {
        if text.is_empty() {
            return None;
        }
        self.text.push_str(text);
        Some(Delta::text(text))
    }

    pub fn push_tool_call(&mut self, fragment: &ToolCallDelta) {
        let builder = self.tool_calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.as_ref().filter(|id| !id.is_empty()) {
            builder.id = Some(id.clone());
        }
        if let Some(name) = fragment.name.as_ref().filter(|name| !name.is_empty()) {
            builder.name = name.clone();
        }
        if let Some(arguments) = &fragment.arguments {
            builder.arguments.push_str(arguments);
        }
    }

    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.len()
    }

    /// Later non-empty values win
    pub fn set_finish_reason(&mut self, finish_reason: Option<String>) {
        if let Some(reason) = finish_reason.filter(|reason| !reason.is_empty()) {
            self.finish_reason = Some(reason);
        }
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The done delta, only the first time it is asked for
    pub fn done(&mut self) -> Option<Delta> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(Delta::done(self.finish_reason.clone()))
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_response(self, encoding: ArgumentEncoding) -> ChatResponse {
        let mut normalizer = ToolCallNormalizer::new();
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|builder| {
                let arguments = match encoding {
                    ArgumentEncoding::StringLiteral => {
                        serde_json::Value::String(builder.arguments).to_string()
                    }
                    ArgumentEncoding::Raw => builder.arguments,
                };
                normalizer.normalize(builder.id, builder.name, arguments)
            })
            .collect();

        ChatResponse {
            text: self.text,
            finish_reason: self.finish_reason,
            tool_calls,
            usage: self.usage,
            raw: Bytes::new(),
        }
    }
}

/// A live streaming response
///
/// Yields deltas in order; the last one is the done delta unless the stream failed.
/// [`ChatStream::response`] returns the aggregated response, or the error that ended the
/// stream. Dropping the stream cancels the producer task.
pub struct ChatStream {
    deltas: ReceiverStream<Delta>,
    handle: JoinHandle<Result<ChatResponse, ProviderError>>,
    _guard: DropGuard,
}

impl ChatStream {
    /// Drive `decoder` over `body` on a producer task bound to a child of `ctx`
    pub fn new<S, D>(ctx: &CallContext, body: S, decoder: D) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
        D: StreamDecoder,
    {
        let ctx = ctx.child();
        let guard = ctx.token().clone().drop_guard();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let handle = tokio::spawn(drive(ctx, body, decoder, tx));

        Self {
            deltas: ReceiverStream::new(rx),
            handle,
            _guard: guard,
        }
    }

    /// Replay a complete response as a stream: its text, its tool calls, then done
    pub fn from_response(response: ChatResponse) -> Self {
        let ctx = CallContext::new();
        let guard = ctx.token().clone().drop_guard();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let handle = tokio::spawn(async move {
            let mut deltas = Vec::new();
            if !response.text.is_empty() {
                deltas.push(Delta::text(response.text.clone()));
            }
            if response.has_tool_calls() {
                deltas.push(Delta::tool_calls(
                    response
                        .tool_calls
                        .iter()
                        .enumerate()
                        .map(|(index, call)| ToolCallDelta {
                            index,
                            id: Some(call.id.clone()),
                            name: Some(call.name.clone()),
                            arguments: Some(call.arguments.clone()),
                        })
                        .collect(),
                ));
            }
            deltas.push(Delta::done(response.finish_reason.clone()));

            for delta in deltas {
                tx.send(delta)
                    .await
                    .map_err(|_| ProviderError::Cancelled)?;
            }
            Ok(response)
        });

        Self {
            deltas: ReceiverStream::new(rx),
            handle,
            _guard: guard,
        }
    }

    /// Drain any remaining deltas and return the aggregated response
    pub async fn response(mut self) -> Result<ChatResponse, ProviderError> {
        while self.deltas.next().await.is_some() {}
        join(self.handle).await
    }

    /// Consume the whole stream, returning every delta and the aggregated response
    pub async fn collect(mut self) -> Result<(Vec<Delta>, ChatResponse), ProviderError> {
        let mut deltas = Vec::new();
        while let Some(delta) = self.deltas.next().await {
            deltas.push(delta);
        }
        let response = join(self.handle).await?;
        Ok((deltas, response))
    }
}

impl Stream for ChatStream {
    type Item = Delta;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.deltas).poll_next(cx)
    }
}

async fn join(
    handle: JoinHandle<Result<ChatResponse, ProviderError>>,
) -> Result<ChatResponse, ProviderError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(ProviderError::Cancelled),
        Err(e) => Err(ProviderError::Internal(e.to_string())),
    }
}

async fn drive<S, D>(
    ctx: CallContext,
    body: S,
    mut decoder: D,
    tx: mpsc::Sender<Delta>,
) -> Result<ChatResponse, ProviderError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    D: StreamDecoder,
{
    let mut body = Box::pin(body);

    loop {
        let next = ctx.run(async { Ok(body.next().await) }).await?;
        let (deltas, eof) = match next {
            Some(chunk) => {
                let chunk = chunk?;
                tracing::trace!("stream chunk of {} bytes", chunk.len());
                (decoder.feed(&chunk)?, false)
            }
            None => (decoder.finish()?, true),
        };

        for delta in deltas {
            ctx.run(async { tx.send(delta).await.map_err(|_| ProviderError::Cancelled) })
                .await?;
        }

        if eof || decoder.is_done() {
            break;
        }
    }

    Ok(decoder.into_response())
}
